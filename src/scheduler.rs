// Copyright (c) 2025 co_rt contributors. Licensed under Apache License, Version 2.0.

//! The dispatch engine and the yield primitive that bridges it to tasks.
//!
//! The scheduler is a value an application owns (`Scheduler::new`), with a thin
//! process-wide default accessor (`default()`) for the free-function surface in
//! [`crate`] — rather than module-level globals. This mirrors the "singleton over
//! `Lazy<Mutex<...>>`" pattern used elsewhere for a single-threaded runtime's global
//! reactor instance, adapted to a `thread_local!` since nothing here crosses an OS
//! thread boundary.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::reactor::{EventKind, PumpMode, Reactor};
use crate::task::{Task, TaskId};
use crate::wait_index::WaitIndex;

/// Owns the reactor, the wait index, and the task table. One `Scheduler` is one
/// cooperative-concurrency runtime instance; tests construct isolated instances instead
/// of sharing process-wide state.
pub struct Scheduler {
    reactor: Reactor,
    wait_index: WaitIndex,
    tasks: RefCell<HashMap<TaskId, Task>>,
    next_hint: Cell<Option<TaskId>>,
    current: Cell<TaskId>,
}

impl Scheduler {
    /// Creates a new runtime instance with its own reactor.
    pub fn new() -> io::Result<Rc<Scheduler>> {
        Ok(Rc::new(Scheduler {
            reactor: Reactor::new()?,
            wait_index: WaitIndex::new(),
            tasks: RefCell::new(HashMap::new()),
            next_hint: Cell::new(None),
            current: Cell::new(TaskId::MAIN),
        }))
    }

    /// The process-wide default instance. Lazily constructed on first use, confined to
    /// this thread.
    #[allow(clippy::should_implement_trait)] // intentionally not `std::default::Default`: returns `Rc<Self>`, not `Self`.
    pub fn default() -> Rc<Scheduler> {
        thread_local! {
            static DEFAULT: Rc<Scheduler> =
                Scheduler::new().expect("failed to initialize the default scheduler's reactor");
        }
        DEFAULT.with(Rc::clone)
    }

    /// Which task is currently executing. Read by the yield primitive to know who to
    /// park; at most one task is current at any instant.
    pub(crate) fn current(&self) -> TaskId { self.current.get() }

    /// Runs `root` to completion as the main task: whenever `root` suspends, this drives
    /// the dispatch loop until `root` is the next runnable task, then polls it again.
    pub fn block_on<F: Future>(self: &Rc<Self>, root: F) -> F::Output {
        let mut root = Box::pin(root);
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        self.current.set(TaskId::MAIN);
        loop {
            match root.as_mut().poll(&mut cx) {
                Poll::Ready(v) => return v,
                Poll::Pending => {
                    self.drive_until_main_ready();
                    self.current.set(TaskId::MAIN);
                }
            }
        }
    }

    /// Pump the reactor, then either resume the next runnable task or, if none is ready,
    /// escalate to a blocking pump. Returns once the main task itself becomes the next
    /// runnable entry.
    fn drive_until_main_ready(self: &Rc<Self>) {
        let mut mode = PumpMode::NonBlock;
        loop {
            let ready = self.reactor.pump(mode).expect("reactor pump failed");
            mode = PumpMode::NonBlock;

            for event in ready {
                let task = self.wait_index.unpark_one(event.kind, event.fd);
                if self.next_hint.get().is_none() {
                    self.next_hint.set(Some(task));
                } else {
                    // At most one task is resumed per pump; the rest accumulate as idle
                    // so they aren't lost.
                    self.wait_index.park(task, EventKind::Idle, None);
                }
            }

            match self.next_hint.take().or_else(|| self.wait_index.take_idle()) {
                None => mode = PumpMode::Once,
                Some(id) if id.is_main() => return,
                Some(id) => {
                    self.current.set(id);
                    self.resume_task(id);
                }
            }
        }
    }

    fn resume_task(self: &Rc<Self>, id: TaskId) {
        let Some(mut task) = self.tasks.borrow_mut().remove(&id) else {
            return; // Cancelled before it got a turn.
        };
        if task.dead.get() {
            return;
        }
        let waker = Waker::noop();
        let mut cx = Context::from_waker(waker);
        let poll_result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.future.as_mut().poll(&mut cx)));
        match poll_result {
            Ok(Poll::Pending) => {
                self.tasks.borrow_mut().insert(id, task);
            }
            Ok(Poll::Ready(())) => {
                tracing::trace!(task = %id, "task completed");
            }
            Err(panic_payload) => {
                tracing::error!(task = %id, "task panicked; scheduler continues");
                drop(panic_payload);
            }
        }
    }

    /// Spawns `fut` as a new task. Parks the child in the idle queue,
    /// then parks the *caller* in the idle queue and yields — so the caller does not
    /// resume until its own turn comes back around the idle FIFO, and the child is not
    /// guaranteed to run before the caller returns from this call.
    pub async fn spawn<F>(self: &Rc<Self>, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let slot: Rc<RefCell<Option<F::Output>>> = Rc::new(RefCell::new(None));
        let slot_for_task = Rc::clone(&slot);
        let wrapped: Pin<Box<dyn Future<Output = ()>>> = Box::pin(async move {
            let value = fut.await;
            *slot_for_task.borrow_mut() = Some(value);
        });
        let task = Task::new(wrapped);
        let id = task.id;
        self.tasks.borrow_mut().insert(id, task);
        self.wait_index.park(id, EventKind::Idle, None);

        let handle = JoinHandle { scheduler: Rc::clone(self), id, slot, cancelled: Cell::new(false) };
        self.yield_now().await;
        handle
    }

    /// Cooperative reschedule with no I/O: park under `IDLE`.
    pub fn yield_now(self: &Rc<Self>) -> YieldOnce {
        YieldOnce::new(Rc::clone(self), EventKind::Idle, None, None)
    }

    /// Suspend until `fd` is readable or `timeout` elapses.
    pub fn yield_read(self: &Rc<Self>, fd: RawFd, timeout: Option<Duration>) -> YieldOnce {
        YieldOnce::new(Rc::clone(self), EventKind::Read, Some(fd), timeout)
    }

    /// Suspend until `fd` is writable or `timeout` elapses.
    pub fn yield_write(self: &Rc<Self>, fd: RawFd, timeout: Option<Duration>) -> YieldOnce {
        YieldOnce::new(Rc::clone(self), EventKind::Write, Some(fd), timeout)
    }

    /// Suspend for at least `ms` milliseconds. A 64-bit millisecond count throughout
    /// avoids the overflow risk of a split `sec`/`usec` representation.
    pub fn yield_timeout(self: &Rc<Self>, ms: u64) -> YieldOnce {
        YieldOnce::new(Rc::clone(self), EventKind::Timeout, None, Some(Duration::from_millis(ms)))
    }

    pub(crate) fn reactor(&self) -> &Reactor { &self.reactor }
}

/// A future that performs a park-and-possibly-register side effect on its first poll
/// and completes on its second. Every suspension point in this crate is exactly this
/// shape: read, write, timeout, and plain idle yields differ only in which [`EventKind`]
/// and fd/timeout they park under.
pub struct YieldOnce {
    scheduler: Rc<Scheduler>,
    kind: EventKind,
    fd: Option<RawFd>,
    timeout: Option<Duration>,
    started: Cell<bool>,
}

impl YieldOnce {
    fn new(scheduler: Rc<Scheduler>, kind: EventKind, fd: Option<RawFd>, timeout: Option<Duration>) -> Self {
        YieldOnce { scheduler, kind, fd, timeout, started: Cell::new(false) }
    }
}

impl Future for YieldOnce {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.started.get() {
            return Poll::Ready(());
        }
        self.started.set(true);

        let current = self.scheduler.current();
        self.scheduler.wait_index.park(current, self.kind, self.fd);
        match self.kind {
            EventKind::Idle => {}
            EventKind::Timeout => {
                self.scheduler.reactor.watch_timeout(self.timeout.expect("yield_timeout requires a duration"));
            }
            EventKind::Read | EventKind::Write => {
                let fd = self.fd.expect("read/write yields require an fd");
                self.scheduler
                    .reactor
                    .watch_io(fd, self.kind, self.timeout)
                    .expect("reactor registration failed");
            }
        }
        Poll::Pending
    }
}

/// A handle to a spawned task's eventual result.
///
/// Dropping an unawaited handle cancels the task: it is removed from whichever wait
/// bucket it was parked in and marked dead so a pending reactor registration does not
/// resurrect it.
pub struct JoinHandle<T> {
    scheduler: Rc<Scheduler>,
    id: TaskId,
    slot: Rc<RefCell<Option<T>>>,
    cancelled: Cell<bool>,
}

impl<T> JoinHandle<T> {
    /// Explicitly cancels the task without waiting for it.
    pub fn cancel(&self) {
        if !self.cancelled.replace(true) {
            self.scheduler.wait_index.cancel(self.id);
            if let Some(task) = self.scheduler.tasks.borrow().get(&self.id) {
                task.dead.set(true);
            }
        }
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        if let Some(value) = self.slot.borrow_mut().take() {
            return Poll::Ready(value);
        }
        // The task isn't done; yield this poll and let the scheduler give it a turn.
        // A one-shot idle re-park on every poll is sufficient here because awaiting a
        // `JoinHandle` only ever happens from within a task body, which the scheduler
        // re-polls each time it is woken via the idle queue.
        let mut yield_now = self.scheduler.yield_now();
        let pinned = Pin::new(&mut yield_now);
        match pinned.poll(cx) {
            Poll::Ready(()) => self.poll(cx),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_on_runs_root_future_to_completion() {
        let sched = Scheduler::new().unwrap();
        let result = sched.block_on(async { 1 + 1 });
        assert_eq!(result, 2);
    }

    #[test]
    fn spawned_task_eventually_runs_and_is_joinable() {
        let sched = Scheduler::new().unwrap();
        let result = sched.block_on(async {
            let handle = sched.spawn(async { 41 + 1 }).await;
            handle.await
        });
        assert_eq!(result, 42);
    }

    #[test]
    fn yield_now_lets_a_spawned_sibling_run_first() {
        let sched = Scheduler::new().unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let log2 = Rc::clone(&log);
        sched.block_on(async {
            let handle = sched.spawn(async move {
                log2.borrow_mut().push("child");
            }).await;
            sched.yield_now().await;
            log.borrow_mut().push("main");
            handle.await
        });
        assert_eq!(*log.borrow(), vec!["child", "main"]);
    }

    #[test]
    fn cancelling_a_join_handle_stops_the_task_from_running() {
        let sched = Scheduler::new().unwrap();
        let ran = Rc::new(Cell::new(false));
        let ran2 = Rc::clone(&ran);
        sched.block_on(async {
            // A child that yields once before doing its real work: by the time
            // `spawn().await` returns, the FIFO idle queue has already given the child
            // its first turn, so cancellation only has a chance to win the race against
            // a task that doesn't complete on that very first turn.
            let sched_inner = Rc::clone(&sched);
            let handle = sched.spawn(async move {
                sched_inner.yield_now().await;
                ran2.set(true);
            }).await;
            handle.cancel();
            sched.yield_now().await;
            sched.yield_now().await;
        });
        assert!(!ran.get());
    }
}
