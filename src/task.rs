// Copyright (c) 2025 co_rt contributors. Licensed under Apache License, Version 2.0.

//! Task identifiers and the resumable-unit abstraction.
//!
//! A task is a boxed, single-threaded [`Future`]. "Resuming" a task is one `poll()`
//! call; "suspending" is that `poll()` returning [`Poll::Pending`] after the task has
//! parked itself in the scheduler's wait index (see [`crate::scheduler`]).

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::num::NonZeroU64;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque handle to a resumable unit of execution.
///
/// [`TaskId::MAIN`] denotes the initial caller of [`crate::Scheduler::block_on`];
/// resuming it means returning control from the dispatch loop to that caller rather than
/// polling a stored future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(NonZeroU64);

impl TaskId {
    /// The sentinel identifying the scheduler's caller rather than a spawned task.
    pub const MAIN: TaskId = TaskId(NonZeroU64::new(1).unwrap());

    pub(crate) fn is_main(self) -> bool { self == Self::MAIN }

    fn next() -> TaskId {
        static NEXT: AtomicU64 = AtomicU64::new(2); // 1 is reserved for MAIN.
        let raw = NEXT.fetch_add(1, Ordering::Relaxed);
        TaskId(NonZeroU64::new(raw).expect("task id counter should never wrap to zero"))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_main() {
            write!(f, "task(main)")
        } else {
            write!(f, "task({})", self.0)
        }
    }
}

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()>>>;

/// A spawned child task: a boxed future plus the bookkeeping the scheduler needs to
/// decide whether it is still alive.
pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) future: BoxFuture,
    /// Set once the future has panicked or completed, so a stray wake doesn't poll it
    /// again. Cancelling a task flips this without polling it.
    pub(crate) dead: Cell<bool>,
}

impl Task {
    pub(crate) fn new(future: BoxFuture) -> Self {
        Task { id: TaskId::next(), future, dead: Cell::new(false) }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("id", &self.id).field("dead", &self.dead.get()).finish()
    }
}
