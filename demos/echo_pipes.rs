// Copyright (c) 2025 co_rt contributors. Licensed under Apache License, Version 2.0.

//! Minimal demonstration of a spawned task reading a line from one pipe and writing it
//! to another, while the main task waits on the result.
//!
//! Uses the process-wide default scheduler (`co_rt::block_on`/`co_rt::spawn`) rather than
//! an explicit [`co_rt::Scheduler`] instance — the ergonomic surface most callers reach
//! for; tests that need isolated runtimes construct their own `Scheduler` directly.

use std::rc::Rc;

use co_rt::io::AsyncFile;
use co_rt::{block_on, spawn, ReadSpec, ReadValue, Scheduler};

fn main() {
    block_on(run());
}

async fn run() {
    let scheduler = Scheduler::default();
    let (in_r, in_w) = rustix::pipe::pipe().unwrap();
    let (out_r, out_w) = rustix::pipe::pipe().unwrap();

    let in_read = Rc::new(AsyncFile::from_owned_fd(&scheduler, in_r).unwrap());
    let out_write = Rc::new(AsyncFile::from_owned_fd(&scheduler, out_w).unwrap());

    let handle = spawn(async move {
        let line = in_read.read(&[ReadSpec::Line]).await.unwrap();
        if let Some(Some(ReadValue::Line(text))) = line.into_iter().next() {
            out_write.write(&[text.as_bytes(), b"\n"]).await.unwrap();
        }
    })
    .await;

    let in_write = AsyncFile::from_owned_fd(&scheduler, in_w).unwrap();
    in_write.write(&[b"hello\n"]).await.unwrap();

    handle.await;

    let out_read = AsyncFile::from_owned_fd(&scheduler, out_r).unwrap();
    let result = out_read.read(&[ReadSpec::Line]).await.unwrap();
    if let Some(Some(ReadValue::Line(text))) = result.into_iter().next() {
        println!("echoed: {text}");
    }
}
