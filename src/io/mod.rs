// Copyright (c) 2025 co_rt contributors. Licensed under Apache License, Version 2.0.

//! The non-blocking I/O façade: file handles, standard stream bootstrapping, and the
//! process-wide default input/output surface.

mod async_file;
mod streams;

pub use async_file::{AsyncFile, Lines, Metadata, ReadSpec, ReadValue, SeekWhence, VbufMode};
pub use streams::{current_input, current_output, input, output, stderr, stdin, stdout};
