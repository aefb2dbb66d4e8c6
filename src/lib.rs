// Copyright (c) 2025 co_rt contributors. Licensed under Apache License, Version 2.0.

//! `co_rt`: a small cooperative-concurrency runtime.
//!
//! A user-space scheduler ([`Scheduler`]) drives [`Future`](std::future::Future)-backed
//! tasks atop a readiness-based reactor (`mio`), and a non-blocking async file façade
//! ([`io::AsyncFile`]) makes ordinary read/write/flush/seek operations suspend the
//! calling task instead of blocking the process.
//!
//! Threading surface: [`spawn`], [`yield_now`], [`yield_read`], [`yield_write`],
//! [`yield_timeout`]. I/O surface: [`io::AsyncFile::open`]/`read`/`write`/`flush`/
//! `seek`/`lines`/`close`/`popen`, plus process-wide [`read`], [`write`], [`flush`],
//! [`input`], [`output`], and the well-known handles [`io::stdin`], [`io::stdout`],
//! [`io::stderr`].

mod buffer_pool;
mod error;
pub mod io;
mod reactor;
mod scheduler;
mod task;
mod wait_index;

use std::future::Future;
use std::os::fd::RawFd;
use std::time::Duration;

pub use error::{IoError, IoResult, UnknownReadSpec};
pub use io::{ReadSpec, ReadValue};
pub use reactor::{EventKind, PumpMode};
pub use scheduler::{JoinHandle, Scheduler};
pub use task::TaskId;

/// Runs `root` to completion on the process-wide default [`Scheduler`].
pub fn block_on<F: Future>(root: F) -> F::Output {
    Scheduler::default().block_on(root)
}

/// Spawns `fut` as a new task on the process-wide default scheduler. Must be called from
/// within a task already running on that scheduler (typically inside a [`block_on`] root
/// future).
pub async fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + 'static,
    F::Output: 'static,
{
    Scheduler::default().spawn(fut).await
}

/// Cooperative reschedule with no I/O: suspends the current task until its turn comes
/// back around the idle queue.
pub async fn yield_now() {
    Scheduler::default().yield_now().await
}

/// Suspends the current task until `fd` is readable, or `timeout` elapses.
pub async fn yield_read(fd: RawFd, timeout: Option<Duration>) {
    Scheduler::default().yield_read(fd, timeout).await
}

/// Suspends the current task until `fd` is writable, or `timeout` elapses.
pub async fn yield_write(fd: RawFd, timeout: Option<Duration>) {
    Scheduler::default().yield_write(fd, timeout).await
}

/// Suspends the current task for at least `ms` milliseconds.
pub async fn yield_timeout(ms: u64) {
    Scheduler::default().yield_timeout(ms).await
}

/// Process-wide `read`: reads from [`io::current_input`].
pub async fn read(specs: &[ReadSpec]) -> IoResult<Vec<Option<ReadValue>>> {
    io::current_input().read(specs).await
}

/// Process-wide `write`: writes to [`io::current_output`].
pub async fn write(items: &[&[u8]]) -> IoResult<bool> {
    io::current_output().write(items).await
}

/// Process-wide `flush`: flushes [`io::current_output`].
pub async fn flush() -> IoResult<bool> {
    io::current_output().flush().await
}

/// Process-wide `lines`: iterates [`io::current_input`].
pub fn lines() -> io::Lines {
    io::current_input().lines()
}

pub use io::{input, output};
