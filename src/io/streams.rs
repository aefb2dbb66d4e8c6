// Copyright (c) 2025 co_rt contributors. Licensed under Apache License, Version 2.0.

//! Standard stream bootstrapping: `stdin`/`stdout`/`stderr` placed in non-blocking mode
//! at first use, plus the `input`/`output` default-reassignment surface.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::IoResult;
use crate::io::async_file::AsyncFile;
use crate::scheduler::Scheduler;

/// Either an already-open handle or a path to open on demand: a string opens that path,
/// a handle is used directly.
pub enum StreamArg {
    Path(String),
    Handle(Rc<AsyncFile>),
}

impl From<&str> for StreamArg {
    fn from(s: &str) -> Self { StreamArg::Path(s.to_string()) }
}

impl From<Rc<AsyncFile>> for StreamArg {
    fn from(f: Rc<AsyncFile>) -> Self { StreamArg::Handle(f) }
}

struct Defaults {
    input: RefCell<Option<Rc<AsyncFile>>>,
    output: RefCell<Option<Rc<AsyncFile>>>,
}

thread_local! {
    static STDIN: Rc<AsyncFile> = bootstrap_stdio(libc_fd::STDIN);
    static STDOUT: Rc<AsyncFile> = bootstrap_stdio(libc_fd::STDOUT);
    static STDERR: Rc<AsyncFile> = bootstrap_stdio(libc_fd::STDERR);
    static DEFAULTS: Defaults = const { Defaults { input: RefCell::new(None), output: RefCell::new(None) } };
}

/// Well-known non-blocking fd numbers for the three standard streams — the only place
/// this crate hardcodes POSIX fd numbers rather than going through `rustix`, since there
/// is no "open" call involved: these descriptors already exist at process start.
mod libc_fd {
    pub const STDIN: i32 = 0;
    pub const STDOUT: i32 = 1;
    pub const STDERR: i32 = 2;
}

fn bootstrap_stdio(fd: i32) -> Rc<AsyncFile> {
    use rustix::fd::{FromRawFd, OwnedFd};
    // Safety: 0/1/2 are the process's inherited standard streams, valid for the
    // lifetime of the process; wrapping them in an `OwnedFd` here means they are never
    // closed by this crate's `AsyncFile::close` in ordinary use, but the type now owns
    // them for the non-blocking fcntl.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    let scheduler = Scheduler::default();
    Rc::new(AsyncFile::wrap(scheduler, owned).expect("fcntl non-blocking setup on a standard stream failed"))
}

/// The process-wide non-blocking `stdin` handle.
pub fn stdin() -> Rc<AsyncFile> { STDIN.with(Rc::clone) }
/// The process-wide non-blocking `stdout` handle.
pub fn stdout() -> Rc<AsyncFile> { STDOUT.with(Rc::clone) }
/// The process-wide non-blocking `stderr` handle.
pub fn stderr() -> Rc<AsyncFile> { STDERR.with(Rc::clone) }

/// The handle `read`/`lines` use when no explicit handle is given.
pub fn current_input() -> Rc<AsyncFile> {
    DEFAULTS.with(|d| d.input.borrow().clone()).unwrap_or_else(stdin)
}

/// The handle `write`/`flush` use when no explicit handle is given.
pub fn current_output() -> Rc<AsyncFile> {
    DEFAULTS.with(|d| d.output.borrow().clone()).unwrap_or_else(stdout)
}

/// Reassigns the process-wide default input stream. A string opens that path for
/// reading; a handle is used directly.
pub fn input(arg: impl Into<StreamArg>) -> IoResult<()> {
    let handle = match arg.into() {
        StreamArg::Path(path) => Rc::new(AsyncFile::open(&Scheduler::default(), path, "r")?),
        StreamArg::Handle(h) => h,
    };
    DEFAULTS.with(|d| *d.input.borrow_mut() = Some(handle));
    Ok(())
}

/// Reassigns the process-wide default output stream. A string opens that path for
/// writing; a handle is used directly.
pub fn output(arg: impl Into<StreamArg>) -> IoResult<()> {
    let handle = match arg.into() {
        StreamArg::Path(path) => Rc::new(AsyncFile::open(&Scheduler::default(), path, "w")?),
        StreamArg::Handle(h) => h,
    };
    DEFAULTS.with(|d| *d.output.borrow_mut() = Some(handle));
    Ok(())
}
