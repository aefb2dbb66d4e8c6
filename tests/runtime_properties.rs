// Copyright (c) 2025 co_rt contributors. Licensed under Apache License, Version 2.0.

//! Integration tests for the runtime's end-to-end scenarios, round-trip laws, and
//! invariants that aren't already exercised by the module-local unit tests in
//! `src/reactor.rs`, `src/wait_index.rs`, and `src/scheduler.rs`.
//!
//! Each test builds its own [`Scheduler`] rather than touching the process-wide default,
//! so tests run with isolated instances instead of sharing state.

use std::io::Write as _;
use std::rc::Rc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use rustix::fd::AsRawFd;
use serial_test::serial;

use co_rt::io::AsyncFile;
use co_rt::{ReadSpec, ReadValue, Scheduler};

fn new_scheduler() -> Rc<Scheduler> {
    Scheduler::new().expect("failed to build a test runtime")
}

/// Scenario 1: echo. A spawned task reads a line from one pipe and writes it (minus the
/// newline, plus a fresh one) to another pipe.
#[test]
fn scenario_echo() {
    let scheduler = new_scheduler();
    let result = scheduler.block_on(async {
        let (in_r, in_w) = rustix::pipe::pipe().unwrap();
        let (out_r, out_w) = rustix::pipe::pipe().unwrap();
        let in_read = Rc::new(AsyncFile::from_owned_fd(&scheduler, in_r).unwrap());
        let out_write = Rc::new(AsyncFile::from_owned_fd(&scheduler, out_w).unwrap());

        let handle = scheduler
            .spawn(async move {
                let values = in_read.read(&[ReadSpec::Line]).await.unwrap();
                if let Some(Some(ReadValue::Line(text))) = values.into_iter().next() {
                    out_write.write(&[text.as_bytes()]).await.unwrap();
                }
            })
            .await;

        let in_write = AsyncFile::from_owned_fd(&scheduler, in_w).unwrap();
        in_write.write(&[b"hello\n"]).await.unwrap();
        handle.await;

        let out_read = AsyncFile::from_owned_fd(&scheduler, out_r).unwrap();
        let bytes = out_read.read(&[ReadSpec::Bytes(5)]).await.unwrap();
        match bytes.into_iter().next() {
            Some(Some(ReadValue::Bytes(b))) => String::from_utf8(b).unwrap(),
            other => panic!("expected bytes, got {other:?}"),
        }
    });
    assert_eq!(result, "hello");
}

/// Scenario 2: timeout wake. `yield_timeout(50)` must return after at least 50ms and
/// (generously, to tolerate slow CI) under 1s of wall-clock.
#[test]
fn scenario_timeout_wake() {
    let scheduler = new_scheduler();
    let start = Instant::now();
    scheduler.block_on(async {
        scheduler.yield_timeout(50).await;
    });
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50), "woke too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1000), "woke too late: {elapsed:?}");
}

/// Scenario 3: two readers on two fds. Feeding fd A before fd B must make task A
/// complete before task B, exercising the per-fd wait-index bucketing.
#[test]
fn scenario_two_readers_ordering() {
    let scheduler = new_scheduler();
    let order = Rc::new(std::cell::RefCell::new(Vec::new()));

    scheduler.block_on(async {
        let (a_r, a_w) = rustix::pipe::pipe().unwrap();
        let (b_r, b_w) = rustix::pipe::pipe().unwrap();
        let a_read = Rc::new(AsyncFile::from_owned_fd(&scheduler, a_r).unwrap());
        let b_read = Rc::new(AsyncFile::from_owned_fd(&scheduler, b_r).unwrap());

        let order_a = Rc::clone(&order);
        let handle_a = scheduler
            .spawn(async move {
                a_read.read(&[ReadSpec::Line]).await.unwrap();
                order_a.borrow_mut().push('A');
            })
            .await;
        let order_b = Rc::clone(&order);
        let handle_b = scheduler
            .spawn(async move {
                b_read.read(&[ReadSpec::Line]).await.unwrap();
                order_b.borrow_mut().push('B');
            })
            .await;

        let a_write = AsyncFile::from_owned_fd(&scheduler, a_w).unwrap();
        a_write.write(&[b"first\n"]).await.unwrap();
        handle_a.await;

        let b_write = AsyncFile::from_owned_fd(&scheduler, b_w).unwrap();
        b_write.write(&[b"second\n"]).await.unwrap();
        handle_b.await;
    });

    assert_eq!(*order.borrow(), vec!['A', 'B']);
}

/// Scenario 4: would-block retry. A reader parked on an empty pipe must resume and
/// return the data once it's written 10ms later.
#[test]
fn scenario_would_block_retry() {
    let scheduler = new_scheduler();
    let result = scheduler.block_on(async {
        let (r, w) = rustix::pipe::pipe().unwrap();
        let read_file = Rc::new(AsyncFile::from_owned_fd(&scheduler, r).unwrap());
        let write_file = AsyncFile::from_owned_fd(&scheduler, w).unwrap();

        let handle = scheduler
            .spawn(async move {
                let values = read_file.read(&[ReadSpec::Bytes(1)]).await.unwrap();
                match values.into_iter().next() {
                    Some(Some(ReadValue::Bytes(b))) => String::from_utf8(b).unwrap(),
                    other => panic!("expected bytes, got {other:?}"),
                }
            })
            .await;

        scheduler.yield_timeout(10).await;
        write_file.write(&[b"x"]).await.unwrap();
        handle.await
    });
    assert_eq!(result, "x");
}

/// Scenario 5: numeric parse. `read(Number)` on `"42.5 foo"` yields `42.5`, and the
/// following `read(Line)` yields `" foo"` (leading space preserved — only the consumed
/// numeric token and its immediately trailing separator are dropped).
#[test]
fn scenario_numeric_parse() {
    let scheduler = new_scheduler();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("numbers.txt");
    std::fs::write(&path, "42.5 foo").unwrap();

    let (number, rest) = scheduler.block_on(async {
        let file = AsyncFile::open(&scheduler, &path, "r").unwrap();
        let number = match file.read(&[ReadSpec::Number]).await.unwrap().into_iter().next() {
            Some(Some(ReadValue::Number(n))) => n,
            other => panic!("expected a number, got {other:?}"),
        };
        let rest = match file.read(&[ReadSpec::Line]).await.unwrap().into_iter().next() {
            Some(Some(ReadValue::Line(s))) => s,
            other => panic!("expected a line, got {other:?}"),
        };
        (number, rest)
    });
    assert_eq!(number, 42.5);
    assert_eq!(rest, " foo");
}

/// `read(Number)` on a pipe that delivers a complete token plus its trailing separator,
/// with the writer still open (so no EOF is coming), must parse as soon as the separator
/// arrives rather than waiting for a full buffer's worth of bytes.
#[test]
fn numeric_parse_on_a_still_open_pipe_does_not_wait_for_eof() {
    let scheduler = new_scheduler();
    let number = scheduler.block_on(async {
        let (r, w) = rustix::pipe::pipe().unwrap();
        let read_file = AsyncFile::from_owned_fd(&scheduler, r).unwrap();
        let write_file = AsyncFile::from_owned_fd(&scheduler, w).unwrap();
        write_file.write(&[b"42.5 "]).await.unwrap();
        match read_file.read(&[ReadSpec::Number]).await.unwrap().into_iter().next() {
            Some(Some(ReadValue::Number(n))) => n,
            other => panic!("expected a number, got {other:?}"),
        }
    });
    assert_eq!(number, 42.5);
}

/// Scenario 6: line iteration. `"a\nb\nc"` (no trailing newline) yields `"a"`, `"b"`,
/// `"c"`, then nothing.
#[test]
fn scenario_line_iteration() {
    let scheduler = new_scheduler();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lines.txt");
    std::fs::write(&path, "a\nb\nc").unwrap();

    let lines = scheduler.block_on(async {
        let file = Rc::new(AsyncFile::open(&scheduler, &path, "r").unwrap());
        let mut cursor = file.lines();
        let mut out = Vec::new();
        while let Some(line) = cursor.next().await.unwrap() {
            out.push(line);
        }
        out
    });
    assert_eq!(lines, vec!["a", "b", "c"]);
}

/// Invariant 4: after `close`, further operations fail with `Closed`; a second close is
/// a no-op success.
#[test]
fn closed_handle_rejects_further_operations() {
    let scheduler = new_scheduler();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("closeme.txt");
    std::fs::write(&path, "data").unwrap();

    scheduler.block_on(async {
        let file = AsyncFile::open(&scheduler, &path, "r").unwrap();
        assert_eq!(file.close().unwrap(), true);
        assert_eq!(file.close().unwrap(), true, "second close is a no-op success");
        let err = file.read(&[ReadSpec::All]).await.unwrap_err();
        assert!(matches!(err, co_rt::IoError::Closed));
    });
}

/// Invariant 6: `open` followed by `close` across 10,000 iterations leaks no fd.
///
/// Serialized (`serial_test`, `tui/Cargo.toml`'s own dev-dependency for tests that
/// can't tolerate concurrent fd churn from the rest of the suite) because `/proc/self/fd`
/// reflects the whole process, not just this test's thread — any other test opening
/// pipes or files concurrently would otherwise make the before/after counts noisy.
#[test]
#[serial]
fn open_close_does_not_leak_file_descriptors() {
    let scheduler = new_scheduler();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leakcheck.txt");
    std::fs::write(&path, "x").unwrap();

    let before = open_fd_count();
    for _ in 0..10_000 {
        let file = AsyncFile::open(&scheduler, &path, "r").unwrap();
        file.close().unwrap();
    }
    let after = open_fd_count();
    assert_eq!(before, after, "fd count grew after 10,000 open/close cycles");
}

fn open_fd_count() -> usize {
    std::fs::read_dir("/proc/self/fd").map(|entries| entries.count()).unwrap_or(0)
}

/// Round-trip law: `write(f, s); close(f); open(path); read(All) == s`.
#[test]
fn round_trip_write_close_reopen_read_all() {
    let scheduler = new_scheduler();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roundtrip.bin");
    let payload: &[u8] = b"the quick brown fox\x00jumps\xff\xfe";

    scheduler.block_on(async {
        let file = AsyncFile::open(&scheduler, &path, "w").unwrap();
        file.write(&[payload]).await.unwrap();
        file.close().unwrap();

        let reopened = AsyncFile::open(&scheduler, &path, "r").unwrap();
        let read_back = match reopened.read(&[ReadSpec::All]).await.unwrap().into_iter().next() {
            Some(Some(ReadValue::Bytes(b))) => b,
            other => panic!("expected bytes, got {other:?}"),
        };
        assert_eq!(read_back, payload);
    });
}

/// Round-trip law: `seek(Set, 0); read(All)` equals a freshly opened read-all of the
/// same file.
#[test]
fn round_trip_seek_to_start_matches_fresh_read() {
    let scheduler = new_scheduler();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seekcheck.txt");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(b"0123456789").unwrap();
    drop(f);

    scheduler.block_on(async {
        let file = AsyncFile::open(&scheduler, &path, "r").unwrap();
        // Consume a few bytes so the seek actually has to rewind something.
        file.read(&[ReadSpec::Bytes(4)]).await.unwrap();
        file.seek(co_rt::io::SeekWhence::Set, 0).unwrap();
        let rewound = match file.read(&[ReadSpec::All]).await.unwrap().into_iter().next() {
            Some(Some(ReadValue::Bytes(b))) => b,
            other => panic!("expected bytes, got {other:?}"),
        };

        let fresh_handle = AsyncFile::open(&scheduler, &path, "r").unwrap();
        let fresh = match fresh_handle.read(&[ReadSpec::All]).await.unwrap().into_iter().next() {
            Some(Some(ReadValue::Bytes(b))) => b,
            other => panic!("expected bytes, got {other:?}"),
        };
        assert_eq!(rewound, fresh);
    });
}

/// A subprocess pipe whose output can be read like any other async file handle.
#[test]
fn popen_reads_subprocess_output() {
    let scheduler = new_scheduler();
    let result = scheduler.block_on(async {
        let proc = AsyncFile::popen(&scheduler, "printf hello", "r").unwrap();
        let values = proc.read(&[ReadSpec::All]).await.unwrap();
        match values.into_iter().next() {
            Some(Some(ReadValue::Bytes(b))) => String::from_utf8(b).unwrap(),
            other => panic!("expected bytes, got {other:?}"),
        }
    });
    assert_eq!(result, "hello");
}

/// `try_clone` produces an independent handle over the same open file description.
#[test]
fn try_clone_shares_the_same_file_description() {
    let scheduler = new_scheduler();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clone.txt");
    std::fs::write(&path, "abcdef").unwrap();

    scheduler.block_on(async {
        let file = AsyncFile::open(&scheduler, &path, "r").unwrap();
        let clone = file.try_clone().unwrap();
        assert_ne!(file.metadata().unwrap().st_ino, 0);

        // Reading through one handle advances the shared file offset the other
        // handle observes, since `try_clone` dup's the fd rather than reopening the
        // path.
        file.read(&[ReadSpec::Bytes(3)]).await.unwrap();
        let rest = match clone.read(&[ReadSpec::All]).await.unwrap().into_iter().next() {
            Some(Some(ReadValue::Bytes(b))) => b,
            other => panic!("expected bytes, got {other:?}"),
        };
        assert_eq!(rest, b"def");
    });
}

/// Sanity check that `from_owned_fd` genuinely places the fd in non-blocking mode
/// (otherwise every "would-block" test above would simply block the process).
#[test]
fn pipes_are_placed_in_non_blocking_mode() {
    let scheduler = new_scheduler();
    let (r, _w) = rustix::pipe::pipe().unwrap();
    let fd = r.as_raw_fd();
    let file = AsyncFile::from_owned_fd(&scheduler, r).unwrap();
    let flags = rustix::fs::fcntl_getfl(unsafe { rustix::fd::BorrowedFd::borrow_raw(fd) }).unwrap();
    assert!(flags.contains(rustix::fs::OFlags::NONBLOCK));
    drop(file);
}
