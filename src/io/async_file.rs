// Copyright (c) 2025 co_rt contributors. Licensed under Apache License, Version 2.0.

//! The async file handle: a non-blocking fd wrapper whose read/write/flush/seek
//! operations suspend the calling task on would-block instead of blocking the process.
//!
//! Grounded on `rustix`'s safe POSIX wrappers, the same crate `r3bl_tui` already pulls in
//! for `termios` (`tui/Cargo.toml`); this module extends that dependency to
//! `open`/`fcntl`/`fstat`/`pipe` rather than reaching for raw `libc`.

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::rc::Rc;

use rustix::fd::{AsRawFd, BorrowedFd, OwnedFd};
use rustix::fs::{self, Mode, OFlags};
use rustix::io as rio;

use crate::buffer_pool::{BufferPool, BUFSIZ};
use crate::error::{IoError, IoResult, UnknownReadSpec};
use crate::scheduler::Scheduler;

/// A read request: a byte count, or one of three tagged forms (a line, a numeric token,
/// or everything until EOF).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSpec {
    /// Read exactly `n` bytes, or fewer at EOF.
    Bytes(usize),
    /// One line, newline stripped.
    Line,
    /// One numeric token, parsed as `f64`.
    Number,
    /// All remaining bytes until EOF.
    All,
}

/// The result of one [`ReadSpec`]. `None` means "nothing available": a zero-byte
/// `Bytes`/`All` read, a `Line` read at EOF with no pending data, or a `Number` read
/// that found no numeric token.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadValue {
    Bytes(Vec<u8>),
    Line(String),
    Number(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Set,
    Cur,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VbufMode {
    No,
    Full,
    Line,
}

pub type Metadata = rustix::fs::Stat;

enum Origin {
    Plain,
    /// Wraps a subprocess whose pipe we own the read or write end of. `close` drops
    /// the fd *and* waits on the child so the process is properly reaped.
    Popen(RefCell<Child>),
}

/// A non-blocking file-descriptor wrapper. `fd: RefCell<Option<OwnedFd>>` makes a
/// double-close a type-level non-event rather than a runtime check: closing takes the
/// `Option`, leaving `None` behind.
pub struct AsyncFile {
    scheduler: Rc<Scheduler>,
    fd: RefCell<Option<OwnedFd>>,
    pool: BufferPool,
    /// Bytes already read from the fd but not yet consumed by a `Line`/`Number` read.
    pending: RefCell<Vec<u8>>,
    vbuf: Cell<VbufMode>,
    origin: Origin,
}

impl AsyncFile {
    fn new_with_origin(scheduler: Rc<Scheduler>, fd: OwnedFd, origin: Origin) -> IoResult<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(AsyncFile {
            scheduler,
            fd: RefCell::new(Some(fd)),
            pool: BufferPool::new(),
            pending: RefCell::new(Vec::new()),
            vbuf: Cell::new(VbufMode::Full),
            origin,
        })
    }

    /// Wraps an already-open, owned fd (e.g. one end of a pipe) as an async file handle,
    /// placing it in non-blocking mode. Lets a handle adopt an externally created fd —
    /// a pipe end handed off from elsewhere, for instance — rather than only ones this
    /// façade opened itself.
    pub fn from_owned_fd(scheduler: &Rc<Scheduler>, fd: OwnedFd) -> IoResult<Self> {
        Self::new_with_origin(Rc::clone(scheduler), fd, Origin::Plain)
    }

    /// Opens `path` in `mode` ("r", "rb", "r+", "w", "wb", "a", "a+", and their "b"/"+b"
    /// equivalents), placing the fd in non-blocking mode.
    pub fn open(scheduler: &Rc<Scheduler>, path: impl AsRef<Path>, mode: &str) -> IoResult<Self> {
        let path = path.as_ref();
        let oflags = mode_to_oflags(mode);
        let fd = fs::open(path, oflags, Mode::from_raw_mode(0o666))
            .map_err(|errno| IoError::open(path.display().to_string(), errno.into()))?;
        AsyncFile::new_with_origin(Rc::clone(scheduler), fd, Origin::Plain)
    }

    /// Wraps an already-open fd (used for stdio bootstrapping).
    pub(crate) fn wrap(scheduler: Rc<Scheduler>, fd: OwnedFd) -> IoResult<Self> {
        AsyncFile::new_with_origin(scheduler, fd, Origin::Plain)
    }

    /// Spawns a subprocess pipe and places the fd in non-blocking mode. `mode = "r"`
    /// reads the child's stdout; `mode = "w"` writes the child's stdin.
    pub fn popen(scheduler: &Rc<Scheduler>, cmd: &str, mode: &str) -> IoResult<Self> {
        let mut command_line = Command::new("/bin/sh");
        command_line.arg("-c").arg(cmd);
        let (stdio_in, stdio_out) = match mode {
            "r" => (Stdio::null(), Stdio::piped()),
            "w" => (Stdio::piped(), Stdio::null()),
            other => panic!("unknown popen mode {other:?}"),
        };
        command_line.stdin(stdio_in).stdout(stdio_out).stderr(Stdio::null());
        let mut child = command_line.spawn().map_err(IoError::Os)?;
        let fd = match mode {
            "r" => {
                let stdout = child.stdout.take().expect("piped stdout requested");
                OwnedFd::from(stdout)
            }
            "w" => {
                let stdin = child.stdin.take().expect("piped stdin requested");
                OwnedFd::from(stdin)
            }
            _ => unreachable!(),
        };
        set_nonblocking(fd.as_raw_fd())?;
        Ok(AsyncFile {
            scheduler: Rc::clone(scheduler),
            fd: RefCell::new(Some(fd)),
            pool: BufferPool::new(),
            pending: RefCell::new(Vec::new()),
            vbuf: Cell::new(VbufMode::Full),
            origin: Origin::Popen(RefCell::new(child)),
        })
    }

    fn raw_fd(&self) -> IoResult<i32> {
        self.fd.borrow().as_ref().map(|fd| fd.as_raw_fd()).ok_or(IoError::Closed)
    }

    /// Closes the handle. Idempotent: a second close returns `Ok(true)` without side
    /// effect.
    pub fn close(&self) -> IoResult<bool> {
        let Some(fd) = self.fd.borrow_mut().take() else {
            return Ok(true);
        };
        self.scheduler.reactor().forget(fd.as_raw_fd());
        drop(fd);
        if let Origin::Popen(child) = &self.origin {
            let _ = child.borrow_mut().wait();
        }
        Ok(true)
    }

    pub fn try_clone(&self) -> IoResult<AsyncFile> {
        let fd = self.fd.borrow();
        let fd = fd.as_ref().ok_or(IoError::Closed)?;
        let cloned = fd.try_clone().map_err(IoError::Os)?;
        Ok(AsyncFile {
            scheduler: Rc::clone(&self.scheduler),
            fd: RefCell::new(Some(cloned)),
            pool: self.pool.clone(),
            pending: RefCell::new(Vec::new()),
            vbuf: Cell::new(self.vbuf.get()),
            origin: Origin::Plain,
        })
    }

    pub fn metadata(&self) -> IoResult<Metadata> {
        let fd = self.fd.borrow();
        let fd = fd.as_ref().ok_or(IoError::Closed)?;
        rustix::fs::fstat(fd).map_err(|e| IoError::Os(e.into()))
    }

    /// Records the buffering mode a caller wants for this handle. This façade never
    /// buffers writes internally (every `write` already retries to completion), so
    /// `size` is unused; the mode is recorded for callers that inspect it but has no
    /// other effect — `write`/`flush` behave identically regardless of mode.
    pub fn setvbuf(&self, mode: VbufMode, _size: Option<usize>) {
        self.vbuf.set(mode);
    }

    /// Attempt the syscall; on `EAGAIN`/`EWOULDBLOCK` yield-read and retry, otherwise
    /// surface the failure.
    async fn read_raw(&self, buf: &mut [u8]) -> IoResult<usize> {
        loop {
            let fd = self.raw_fd()?;
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            match rio::read(borrowed, &mut *buf) {
                Ok(n) => return Ok(n),
                Err(e) if e == rio::Errno::AGAIN || e == rio::Errno::WOULDBLOCK => {
                    self.scheduler.yield_read(fd, None).await;
                }
                Err(e) => return Err(IoError::Os(e.into())),
            }
        }
    }

    async fn write_raw(&self, buf: &[u8]) -> IoResult<usize> {
        loop {
            let fd = self.raw_fd()?;
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            match rio::write(borrowed, buf) {
                Ok(n) => return Ok(n),
                Err(e) if e == rio::Errno::AGAIN || e == rio::Errno::WOULDBLOCK => {
                    self.scheduler.yield_write(fd, None).await;
                }
                Err(e) => return Err(IoError::Os(e.into())),
            }
        }
    }

    /// Fixed-length read: loop requesting `min(remaining, BUFSIZ)` into a pooled buffer
    /// until `remaining` reaches 0 or EOF. Checks `pending` first so bytes read ahead for
    /// a prior `Line`/`Number` request aren't lost.
    async fn read_n(&self, mut remaining: usize) -> IoResult<Vec<u8>> {
        let mut out = Vec::new();
        {
            let mut pending = self.pending.borrow_mut();
            let take = remaining.min(pending.len());
            out.extend(pending.drain(..take));
            remaining -= take;
        }
        while remaining > 0 {
            let mut pooled = self.pool.borrow();
            let chunk = remaining.min(BUFSIZ);
            let n = self.read_raw(&mut pooled.as_mut_slice()[..chunk]).await?;
            if n == 0 {
                break; // EOF
            }
            out.extend_from_slice(&pooled.as_mut_slice()[..n]);
            remaining -= n;
        }
        Ok(out)
    }

    /// Reads until EOF, expressed directly as "keep reading until EOF" rather than a
    /// fixed-length read sized at `usize::MAX`, which would try to pre-size an
    /// allocation.
    async fn read_all(&self) -> IoResult<Vec<u8>> {
        let mut out = std::mem::take(&mut *self.pending.borrow_mut());
        loop {
            let mut pooled = self.pool.borrow();
            let n = self.read_raw(pooled.as_mut_slice()).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&pooled.as_mut_slice()[..n]);
        }
        Ok(out)
    }

    /// Fills `pending` with at least one more chunk from the fd. Returns `false` at EOF.
    async fn fill_pending(&self) -> IoResult<bool> {
        let mut pooled = self.pool.borrow();
        let n = self.read_raw(pooled.as_mut_slice()).await?;
        if n == 0 {
            return Ok(false);
        }
        self.pending.borrow_mut().extend_from_slice(&pooled.as_mut_slice()[..n]);
        Ok(true)
    }

    /// Line read: repeatedly grow `pending` until it contains a newline or EOF is hit.
    /// The trailing-newline check below must be `ends_with('\n')`, not its negation —
    /// getting that inverted silently turns every complete line into a lost one.
    async fn read_line(&self) -> IoResult<Option<String>> {
        loop {
            let found = {
                let pending = self.pending.borrow();
                pending.iter().position(|&b| b == b'\n')
            };
            if let Some(pos) = found {
                let mut pending = self.pending.borrow_mut();
                let mut line: Vec<u8> = pending.drain(..=pos).collect();
                line.pop(); // drop the trailing newline itself.
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            if !self.fill_pending().await? {
                let mut pending = self.pending.borrow_mut();
                if pending.is_empty() {
                    return Ok(None);
                }
                let rest = std::mem::take(&mut *pending);
                return Ok(Some(String::from_utf8_lossy(&rest).into_owned()));
            }
        }
    }

    /// Number read: consumes leading whitespace then one formatted numeric token, parsed
    /// as `f64`. Pulls more data only while the token is still open — i.e. no trailing
    /// whitespace has shown up yet to close it and the stream hasn't hit EOF — so a
    /// short, complete token (`"42.5 "` on an otherwise-idle pipe) parses as soon as its
    /// terminator arrives instead of waiting for a full buffer's worth of bytes.
    async fn read_number(&self) -> IoResult<Option<f64>> {
        loop {
            let closed = {
                let pending = self.pending.borrow();
                let text = String::from_utf8_lossy(&pending);
                let token_region = text.trim_start();
                token_region.find(|c: char| c.is_whitespace()).is_some()
            };
            if closed {
                break;
            }
            if !self.fill_pending().await? {
                break; // EOF: parse whatever trailing token we have, closed or not.
            }
        }
        let mut pending = self.pending.borrow_mut();
        let text = String::from_utf8_lossy(&pending);
        let trimmed_start = text.len() - text.trim_start().len();
        let token_region = &text[trimmed_start..];
        let token_end = token_region
            .find(|c: char| c.is_whitespace())
            .unwrap_or(token_region.len());
        let token = &token_region[..token_end];
        match token.parse::<f64>() {
            Ok(value) => {
                let consumed = trimmed_start + token_end;
                pending.drain(..consumed);
                Ok(Some(value))
            }
            Err(_) => Ok(None),
        }
    }

    /// Reads one value per `spec` in order. Zero specs defaults to a single `Line`.
    pub async fn read(&self, specs: &[ReadSpec]) -> IoResult<Vec<Option<ReadValue>>> {
        if self.fd.borrow().is_none() {
            return Err(IoError::Closed);
        }
        let specs: &[ReadSpec] = if specs.is_empty() { &[ReadSpec::Line] } else { specs };
        let mut out = Vec::with_capacity(specs.len());
        for spec in specs {
            let value = match spec {
                ReadSpec::Bytes(n) => {
                    let bytes = self.read_n(*n).await?;
                    if bytes.is_empty() { None } else { Some(ReadValue::Bytes(bytes)) }
                }
                ReadSpec::All => {
                    let bytes = self.read_all().await?;
                    if bytes.is_empty() { None } else { Some(ReadValue::Bytes(bytes)) }
                }
                ReadSpec::Line => self.read_line().await?.map(ReadValue::Line),
                ReadSpec::Number => self.read_number().await?.map(ReadValue::Number),
            };
            out.push(value);
        }
        Ok(out)
    }

    /// Writes each item in order; short writes are retried until the item drains or an
    /// error occurs.
    pub async fn write(&self, items: &[&[u8]]) -> IoResult<bool> {
        if self.fd.borrow().is_none() {
            return Err(IoError::Closed);
        }
        for item in items {
            let mut offset = 0;
            while offset < item.len() {
                let n = self.write_raw(&item[offset..]).await?;
                offset += n;
            }
        }
        Ok(true)
    }

    /// This façade has no internal write buffer to drain (every `write` call above
    /// already retries to completion), so flush is a closed-handle check and nothing
    /// else.
    pub async fn flush(&self) -> IoResult<bool> {
        if self.fd.borrow().is_none() {
            return Err(IoError::Closed);
        }
        Ok(true)
    }

    /// Seeks to `offset` relative to `whence`, discarding any buffered lookahead.
    pub fn seek(&self, whence: SeekWhence, offset: i64) -> IoResult<u64> {
        let fd = self.fd.borrow();
        let fd = fd.as_ref().ok_or(IoError::Closed)?;
        let from = match whence {
            SeekWhence::Set => fs::SeekFrom::Start(offset.max(0) as u64),
            SeekWhence::Cur => fs::SeekFrom::Current(offset),
            SeekWhence::End => fs::SeekFrom::End(offset),
        };
        let new_pos = fs::seek(fd, from).map_err(|e| IoError::Os(e.into()))?;
        self.pending.borrow_mut().clear();
        Ok(new_pos)
    }

    /// A cursor yielding one line per call until EOF.
    pub fn lines(self: &Rc<Self>) -> Lines {
        Lines { file: Rc::clone(self) }
    }
}

/// Cursor returned by [`AsyncFile::lines`]: yields one line per call, then `None` at
/// end-of-stream. Modeled as a type with an async `next()` rather than a
/// `Stream`/`Iterator` impl, since both of those require a synchronous `next` and line
/// reads can suspend.
pub struct Lines {
    file: Rc<AsyncFile>,
}

impl Lines {
    pub async fn next(&mut self) -> IoResult<Option<String>> {
        self.file.read_line().await
    }
}

fn mode_to_oflags(mode: &str) -> OFlags {
    let stripped: String = mode.chars().filter(|&c| c != 'b').collect();
    let base = match stripped.as_str() {
        "r" => OFlags::RDONLY,
        "r+" | "+r" => OFlags::RDWR,
        "w" => OFlags::WRONLY | OFlags::CREATE | OFlags::TRUNC,
        "w+" | "+w" => OFlags::RDWR | OFlags::CREATE | OFlags::TRUNC,
        "a" => OFlags::WRONLY | OFlags::CREATE | OFlags::APPEND,
        "a+" | "+a" => OFlags::RDWR | OFlags::CREATE | OFlags::APPEND,
        other => panic!("unknown file mode {other:?}"),
    };
    base | OFlags::NONBLOCK
}

fn set_nonblocking(fd: i32) -> IoResult<()> {
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let flags = fs::fcntl_getfl(borrowed).map_err(|e| IoError::Os(e.into()))?;
    fs::fcntl_setfl(borrowed, flags | OFlags::NONBLOCK).map_err(|e| IoError::Os(e.into()))?;
    Ok(())
}

/// Parses a textual read spec ("*l", "*n", "*a", or a byte count) into a [`ReadSpec`],
/// for callers that carry these forms as strings instead of constructing the enum
/// directly.
impl std::str::FromStr for ReadSpec {
    type Err = UnknownReadSpec;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "*l" => Ok(ReadSpec::Line),
            "*n" => Ok(ReadSpec::Number),
            "*a" => Ok(ReadSpec::All),
            other => other.parse::<usize>().map(ReadSpec::Bytes).map_err(|_| UnknownReadSpec(other.to_string())),
        }
    }
}
