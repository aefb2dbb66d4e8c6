// Copyright (c) 2025 co_rt contributors. Licensed under Apache License, Version 2.0.

//! The wait index: the map from event-and-descriptor to parked task(s).
//!
//! Two different queue disciplines coexist by design, not accident: I/O waiters on the
//! same `(kind, fd)` are almost always the same logical task re-parking itself after a
//! partial read, so popping the most recently parked one first (LIFO) is the cheap,
//! correct choice. Idle tasks are independent units of work competing for the CPU, so
//! FIFO approximates fairness among them.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::os::fd::RawFd;

use crate::reactor::EventKind;
use crate::task::TaskId;

/// Key for the I/O buckets. `Timeout` watches all share the sentinel key `(Timeout,
/// None)` — timers have no fd of their own to bucket under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BucketKey(EventKind, Option<RawFd>);

#[derive(Default)]
pub(crate) struct WaitIndex {
    buckets: RefCell<HashMap<BucketKey, Vec<TaskId>>>,
    idle: RefCell<VecDeque<TaskId>>,
}

impl WaitIndex {
    pub(crate) fn new() -> Self { Self::default() }

    /// Parks `task` under `(kind, fd)`. `Idle` ignores `fd` and uses the single idle
    /// queue; `Timeout` ignores `fd` and uses the sentinel bucket.
    pub(crate) fn park(&self, task: TaskId, kind: EventKind, fd: Option<RawFd>) {
        match kind {
            EventKind::Idle => self.idle.borrow_mut().push_back(task),
            EventKind::Timeout => {
                self.buckets.borrow_mut().entry(BucketKey(kind, None)).or_default().push(task);
            }
            EventKind::Read | EventKind::Write => {
                self.buckets.borrow_mut().entry(BucketKey(kind, fd)).or_default().push(task);
            }
        }
    }

    /// Pops the top (most recently parked) task waiting on `(kind, fd)`.
    ///
    /// # Panics
    ///
    /// Panics if the bucket is empty or missing: a reactor callback firing for a
    /// `(kind, fd)` with no waiter is a programming error, not a recoverable condition.
    pub(crate) fn unpark_one(&self, kind: EventKind, fd: Option<RawFd>) -> TaskId {
        let key = match kind {
            EventKind::Timeout => BucketKey(kind, None),
            _ => BucketKey(kind, fd),
        };
        let mut buckets = self.buckets.borrow_mut();
        let stack = buckets.get_mut(&key).unwrap_or_else(|| {
            panic!("reactor callback fired for {key:?} with no parked task")
        });
        let task = stack.pop().unwrap_or_else(|| {
            panic!("reactor callback fired for {key:?} with no parked task")
        });
        if stack.is_empty() {
            buckets.remove(&key);
        }
        task
    }

    /// Pops one runnable task from the idle queue, FIFO.
    pub(crate) fn take_idle(&self) -> Option<TaskId> { self.idle.borrow_mut().pop_front() }

    /// Removes every occurrence of `task` from every bucket and the idle queue.
    /// Supports task cancellation: dropping a `JoinHandle` scrubs the task out of
    /// whichever bucket it was parked in.
    pub(crate) fn cancel(&self, task: TaskId) {
        self.buckets.borrow_mut().retain(|_, stack| {
            stack.retain(|&t| t != task);
            !stack.is_empty()
        });
        self.idle.borrow_mut().retain(|&t| t != task);
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.buckets.borrow().is_empty() && self.idle.borrow().is_empty()
    }
}
