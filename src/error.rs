// Copyright (c) 2025 co_rt contributors. Licensed under Apache License, Version 2.0.

//! Error taxonomy for the runtime.
//!
//! Failures split into four buckets: would-block (never surfaced, converted to a
//! suspension), I/O failure (surfaced to the caller), programming error (abort), and
//! task-body failure (terminates the task, scheduler keeps running). Only the first two
//! need a type here — programming errors panic, task-body failures are handled in
//! [`crate::task`].

use std::fmt;
use std::io;

/// An I/O failure surfaced from an [`crate::io::AsyncFile`] operation.
///
/// Carries the same information a caller would get from `strerror`, plus (for `Open`)
/// the path that was being opened.
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    /// Failed to open a path. Message is prefixed with the path.
    #[error("{path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Any other OS-level failure (read/write/seek/flush/fcntl).
    #[error(transparent)]
    Os(#[from] io::Error),

    /// The handle was already closed.
    #[error("operation on a closed file")]
    Closed,
}

impl IoError {
    pub(crate) fn open(path: impl Into<String>, source: io::Error) -> Self {
        IoError::Open { path: path.into(), source }
    }
}

/// Result alias used throughout the I/O facade.
pub type IoResult<T> = Result<T, IoError>;

/// A read specification was not one of the recognized forms.
///
/// This is a programming error; callers should not expect to recover from it, so it
/// implements [`std::error::Error`] purely so it can be used at `.expect()`/`panic!`
/// sites with a readable message, not so it can be caught and handled.
#[derive(Debug)]
pub struct UnknownReadSpec(pub String);

impl fmt::Display for UnknownReadSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown read spec: {:?}", self.0)
    }
}

impl std::error::Error for UnknownReadSpec {}
