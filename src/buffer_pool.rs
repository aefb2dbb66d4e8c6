// Copyright (c) 2025 co_rt contributors. Licensed under Apache License, Version 2.0.

//! A small fixed-capacity free-list of `BUFSIZ`-sized buffers, reused across reads to
//! avoid repeated allocation.
//!
//! Bounded at a small fixed count rather than weakly held: correctness must not depend
//! on residency either way, so a pool that's always empty (every borrow allocates fresh)
//! is still a valid, if slower, implementation. This one just avoids the allocation in
//! the common case.

use std::cell::RefCell;
use std::rc::Rc;

/// Matches the host's conventional stdio buffer size; 8 KiB is the common glibc value.
pub const BUFSIZ: usize = 8192;

const POOL_CAPACITY: usize = 8;

/// A buffer on loan from the pool. Returns itself to the pool on drop, unless the pool
/// is already at capacity, in which case it's simply freed.
pub(crate) struct PooledBuf {
    pool: Rc<BufferPoolInner>,
    buf: Option<Box<[u8; BUFSIZ]>>,
}

impl PooledBuf {
    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8; BUFSIZ] {
        self.buf.as_mut().expect("buffer taken exactly once, returned on drop")
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}

#[derive(Default)]
struct BufferPoolInner {
    free: RefCell<Vec<Box<[u8; BUFSIZ]>>>,
}

impl BufferPoolInner {
    fn give_back(&self, buf: Box<[u8; BUFSIZ]>) {
        let mut free = self.free.borrow_mut();
        if free.len() < POOL_CAPACITY {
            free.push(buf);
        }
    }
}

/// Shared handle to a buffer pool; cheap to clone (`Rc`), matching how an [`AsyncFile`]
/// and the process-wide stream defaults both need access to the same pool without each
/// owning it outright.
///
/// [`AsyncFile`]: crate::io::AsyncFile
#[derive(Clone, Default)]
pub(crate) struct BufferPool {
    inner: Rc<BufferPoolInner>,
}

impl BufferPool {
    pub(crate) fn new() -> Self { Self::default() }

    /// Borrow a buffer, reusing a pooled one if available.
    pub(crate) fn borrow(&self) -> PooledBuf {
        let buf = self.inner.free.borrow_mut().pop().unwrap_or_else(|| Box::new([0u8; BUFSIZ]));
        PooledBuf { pool: Rc::clone(&self.inner), buf: Some(buf) }
    }

    #[cfg(test)]
    fn free_count(&self) -> usize { self.inner.free.borrow().len() }
}
