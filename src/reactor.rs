// Copyright (c) 2025 co_rt contributors. Licensed under Apache License, Version 2.0.

//! The reactor adapter: a thin contract over [`mio`] exposing one-shot readiness/timeout
//! watches and a pump with [`NonBlock`]/[`Once`] modes.
//!
//! Grounded on the `mio`-based input backend in `r3bl_tui`'s
//! `core::resilient_reactor_thread` / `DirectToAnsi` machinery, which already uses `mio`
//! to watch `stdin` and a signal fd together on this corpus's target platforms. Unlike
//! that backend, this reactor runs inline on the single scheduler thread: there is no
//! dedicated OS thread and no broadcast channel, because cooperative scheduling here is
//! strictly single-threaded.
//!
//! [`NonBlock`]: PumpMode::NonBlock
//! [`Once`]: PumpMode::Once

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

/// The four event classes a task can suspend on. `Idle` never touches the reactor; it is
/// a purely internal wait-index queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Read,
    Write,
    Timeout,
    Idle,
}

/// How far [`Reactor::pump`] is willing to block.
///
/// A self-documenting enum in place of a bare `bool`, matching the style the corpus uses
/// for binary-but-meaningful states (e.g. `LivenessState`, `ShutdownDecision` in
/// `r3bl_tui::core::resilient_reactor_thread::thread_liveness`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpMode {
    /// Process whatever is immediately ready and return without blocking.
    NonBlock,
    /// Block until at least one event fires, then process and return.
    Once,
}

/// A fired registration: which kind completed, and for `Read`/`Write`, which fd.
/// `Timeout` carries no fd — timers share a sentinel key in the wait index instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    pub kind: EventKind,
    pub fd: Option<RawFd>,
}

struct TimerEntry {
    deadline: Instant,
}

/// A deadline attached to an I/O watch that was registered with an optional timeout.
/// When it expires before the fd becomes ready, the reactor fires the *same* `(kind, fd)`
/// ready event the real readiness would have — the task retries its syscall, gets
/// `EAGAIN` again (nothing was actually ready), and that is how it learns it timed out
/// rather than received data.
struct IoDeadline {
    fd: RawFd,
    kind: EventKind,
    deadline: Instant,
}

/// Which directions are currently registered for a given fd. Tracked separately from
/// `mio::Interest` (which has no "remove one direction" operation) so that a one-shot
/// `Read` firing can drop just the read interest while leaving a concurrent `Write`
/// watch on the same fd untouched.
#[derive(Default, Clone, Copy)]
struct Registered {
    readable: bool,
    writable: bool,
}

impl Registered {
    fn interest(self) -> Option<Interest> {
        match (self.readable, self.writable) {
            (true, true) => Some(Interest::READABLE.add(Interest::WRITABLE)),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

/// Readiness multiplexer. One instance drives one [`crate::scheduler::Scheduler`].
pub struct Reactor {
    poll: RefCell<Poll>,
    events: RefCell<Events>,
    registered: RefCell<HashMap<RawFd, Registered>>,
    timers: RefCell<Vec<TimerEntry>>,
    io_deadlines: RefCell<Vec<IoDeadline>>,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        Ok(Reactor {
            poll: RefCell::new(Poll::new()?),
            events: RefCell::new(Events::with_capacity(128)),
            registered: RefCell::new(HashMap::new()),
            timers: RefCell::new(Vec::new()),
            io_deadlines: RefCell::new(Vec::new()),
        })
    }

    /// Registers a one-shot watch for `fd` becoming ready for `kind` (`Read` or
    /// `Write`), with an optional deadline racing the readiness. Merges with any
    /// existing registration on the same fd so a reader and a writer on the same pipe
    /// don't clobber each other.
    pub fn watch_io(&self, fd: RawFd, kind: EventKind, timeout: Option<Duration>) -> io::Result<()> {
        let mut registered = self.registered.borrow_mut();
        let mut entry = registered.get(&fd).copied().unwrap_or_default();
        let before = entry.interest();
        match kind {
            EventKind::Read => entry.readable = true,
            EventKind::Write => entry.writable = true,
            EventKind::Timeout | EventKind::Idle => {
                panic!("watch_io called with non-I/O event kind {kind:?}")
            }
        }
        let after = entry.interest().expect("just set at least one direction");
        let mut source = SourceFd(&fd);
        match before {
            None => self.poll.borrow().registry().register(&mut source, Token(fd as usize), after)?,
            Some(prev) if prev == after => {}
            Some(_) => self.poll.borrow().registry().reregister(&mut source, Token(fd as usize), after)?,
        }
        registered.insert(fd, entry);
        drop(registered);
        if let Some(timeout) = timeout {
            self.io_deadlines.borrow_mut().push(IoDeadline { fd, kind, deadline: Instant::now() + timeout });
        }
        Ok(())
    }

    /// Deregisters `fd` entirely. Called when a file handle closes, so a registration
    /// never outlives its fd.
    pub fn forget(&self, fd: RawFd) {
        if self.registered.borrow_mut().remove(&fd).is_some() {
            let mut source = SourceFd(&fd);
            let _ = self.poll.borrow().registry().deregister(&mut source);
        }
        self.io_deadlines.borrow_mut().retain(|d| d.fd != fd);
    }

    /// Registers a one-shot timer that fires after `timeout`. All timers share the single
    /// `(Timeout, sentinel)` wait-index bucket, so no timer identity needs to flow back
    /// out of this call.
    pub fn watch_timeout(&self, timeout: Duration) {
        self.timers.borrow_mut().push(TimerEntry { deadline: Instant::now() + timeout });
    }

    /// Processes immediately-ready I/O events and expired timers, then, per `mode`,
    /// either returns promptly ([`PumpMode::NonBlock`]) or blocks until something fires
    /// ([`PumpMode::Once`]). Firing a `Read`/`Write` event clears that one direction's
    /// registration (one-shot); a direction with no remaining watcher is deregistered.
    pub fn pump(&self, mode: PumpMode) -> io::Result<Vec<ReadyEvent>> {
        let wait = match mode {
            PumpMode::NonBlock => Some(Duration::ZERO),
            PumpMode::Once => self.earliest_deadline_wait(),
        };

        let mut events = self.events.borrow_mut();
        match self.poll.borrow_mut().poll(&mut events, wait) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }

        let mut ready = Vec::new();
        let mut registered = self.registered.borrow_mut();
        for event in events.iter() {
            let fd = event.token().0 as RawFd;
            let Some(entry) = registered.get_mut(&fd) else { continue };
            if event.is_readable() && entry.readable {
                entry.readable = false;
                ready.push(ReadyEvent { kind: EventKind::Read, fd: Some(fd) });
            }
            if event.is_writable() && entry.writable {
                entry.writable = false;
                ready.push(ReadyEvent { kind: EventKind::Write, fd: Some(fd) });
            }
            let mut source = SourceFd(&fd);
            match entry.interest() {
                Some(remaining) => {
                    let _ = self.poll.borrow().registry().reregister(&mut source, Token(fd as usize), remaining);
                }
                None => {
                    let _ = self.poll.borrow().registry().deregister(&mut source);
                    registered.remove(&fd);
                }
            }
        }
        // A real readiness just won the race against any deadline racing the same
        // (kind, fd); drop the loser so it doesn't also fire.
        self.io_deadlines.borrow_mut().retain(|d| {
            !ready.iter().any(|r| r.fd == Some(d.fd) && r.kind == d.kind)
        });

        let now = Instant::now();
        let mut io_deadlines = self.io_deadlines.borrow_mut();
        let (expired, pending): (Vec<_>, Vec<_>) =
            io_deadlines.drain(..).partition(|d| d.deadline <= now);
        *io_deadlines = pending;
        drop(io_deadlines);
        for d in expired {
            if let Some(entry) = registered.get_mut(&d.fd) {
                let still_watching = match d.kind {
                    EventKind::Read => entry.readable,
                    EventKind::Write => entry.writable,
                    _ => false,
                };
                if still_watching {
                    match d.kind {
                        EventKind::Read => entry.readable = false,
                        EventKind::Write => entry.writable = false,
                        _ => {}
                    }
                    let mut source = SourceFd(&d.fd);
                    match entry.interest() {
                        Some(remaining) => {
                            let _ = self.poll.borrow().registry().reregister(&mut source, Token(d.fd as usize), remaining);
                        }
                        None => {
                            let _ = self.poll.borrow().registry().deregister(&mut source);
                            registered.remove(&d.fd);
                        }
                    }
                    ready.push(ReadyEvent { kind: d.kind, fd: Some(d.fd) });
                }
            }
        }
        drop(registered);

        let mut timers = self.timers.borrow_mut();
        let expired_count = timers.iter().filter(|t| t.deadline <= now).count();
        timers.retain(|t| t.deadline > now);
        drop(timers);
        for _ in 0..expired_count {
            ready.push(ReadyEvent { kind: EventKind::Timeout, fd: None });
        }

        Ok(ready)
    }

    fn earliest_deadline_wait(&self) -> Option<Duration> {
        let now = Instant::now();
        self.timers
            .borrow()
            .iter()
            .map(|t| t.deadline)
            .chain(self.io_deadlines.borrow().iter().map(|d| d.deadline))
            .map(|deadline| deadline.saturating_duration_since(now))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn pump_nonblock_returns_promptly_with_nothing_ready() {
        let reactor = Reactor::new().unwrap();
        let ready = reactor.pump(PumpMode::NonBlock).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn pump_nonblock_does_not_wait_for_an_outstanding_timer() {
        let reactor = Reactor::new().unwrap();
        reactor.watch_timeout(Duration::from_millis(500));
        let start = Instant::now();
        let ready = reactor.pump(PumpMode::NonBlock).unwrap();
        assert!(ready.is_empty());
        assert!(
            start.elapsed() < Duration::from_millis(100),
            "NonBlock pumped for {:?} with an unexpired timer outstanding",
            start.elapsed()
        );
    }

    #[test]
    fn pipe_becomes_writable_immediately() {
        let reactor = Reactor::new().unwrap();
        let (_r, w) = rustix::pipe::pipe().unwrap();
        let fd = w.as_raw_fd();
        reactor.watch_io(fd, EventKind::Write, None).unwrap();
        let ready = reactor.pump(PumpMode::Once).unwrap();
        assert!(ready.iter().any(|e| e.kind == EventKind::Write && e.fd == Some(fd)));
    }

    #[test]
    fn write_readiness_is_one_shot() {
        let reactor = Reactor::new().unwrap();
        let (_r, w) = rustix::pipe::pipe().unwrap();
        let fd = w.as_raw_fd();
        reactor.watch_io(fd, EventKind::Write, None).unwrap();
        let first = reactor.pump(PumpMode::Once).unwrap();
        assert_eq!(first.len(), 1);
        let second = reactor.pump(PumpMode::NonBlock).unwrap();
        assert!(second.is_empty(), "a one-shot watch must not refire without re-arming");
    }

    #[test]
    fn timer_fires_after_its_deadline() {
        let reactor = Reactor::new().unwrap();
        reactor.watch_timeout(Duration::from_millis(10));
        let start = Instant::now();
        loop {
            let ready = reactor.pump(PumpMode::Once).unwrap();
            if ready.iter().any(|e| e.kind == EventKind::Timeout) {
                break;
            }
        }
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
