//! Cooperative thread-block substrate
//!
//! Emulates the accelerator execution model on host threads: a launch spawns
//! `num_blocks * block_size` threads, every thread in a block shares one
//! barrier, and each thread receives a [`BlockContext`] carrying its block
//! index, rank within the block, and the barrier used by `sync_threads()`.
//!
//! Store operations are block-cooperative: all threads of a block enter the
//! same call with identical arguments, the leader (rank 0) performs the
//! atomic ring operations, and the whole block shares bulk byte copies.

use std::sync::{Arc, Barrier};

use crate::{store_error, Result};

/// Per-thread execution context for a cooperative block.
#[derive(Clone)]
pub struct BlockContext {
    block_idx: usize,
    thread_rank: usize,
    block_dim: usize,
    barrier: Arc<Barrier>,
}

impl BlockContext {
    /// Create a context for one thread of a block.
    ///
    /// `barrier` must be shared by exactly the `block_dim` threads of the
    /// block, or `sync_threads()` will deadlock.
    pub fn new(
        block_idx: usize,
        thread_rank: usize,
        block_dim: usize,
        barrier: Arc<Barrier>,
    ) -> Result<Self> {
        if thread_rank >= block_dim {
            return Err(store_error!(
                "thread rank {} exceeds block dimension {}",
                thread_rank,
                block_dim
            ));
        }
        Ok(Self {
            block_idx,
            thread_rank,
            block_dim,
            barrier,
        })
    }

    /// Index of this thread's block within the grid.
    pub fn block_index(&self) -> usize {
        self.block_idx
    }

    /// Rank of this thread within its block.
    pub fn thread_rank(&self) -> usize {
        self.thread_rank
    }

    /// Number of threads in the block.
    pub fn block_dim(&self) -> usize {
        self.block_dim
    }

    /// True for the block leader (rank 0), the only thread allowed to touch
    /// the ring atomics.
    pub fn is_leader(&self) -> bool {
        self.thread_rank == 0
    }

    /// Block-wide barrier, analogous to `__syncthreads()`.
    pub fn sync_threads(&self) {
        self.barrier.wait();
    }
}

/// Launch a cooperative grid and block until every thread returns.
///
/// The kernel closure runs once per thread; threads of the same block share
/// a barrier through their [`BlockContext`]. Scoped threads let the kernel
/// borrow from the caller's stack (the store, input slices, output buffers).
pub fn launch<F>(num_blocks: usize, block_size: usize, kernel: F) -> Result<()>
where
    F: Fn(&BlockContext) + Send + Sync,
{
    if num_blocks < 1 || block_size < 1 {
        return Err(store_error!(
            "launch geometry {}x{} must be at least 1x1",
            num_blocks,
            block_size
        ));
    }

    let kernel = &kernel;
    std::thread::scope(|scope| {
        for block_idx in 0..num_blocks {
            let barrier = Arc::new(Barrier::new(block_size));
            for thread_rank in 0..block_size {
                let barrier = barrier.clone();
                scope.spawn(move || {
                    // Geometry was validated above; constructing the context
                    // cannot fail for ranks in 0..block_size.
                    let ctx = BlockContext::new(block_idx, thread_rank, block_size, barrier)
                        .expect("launch geometry already validated");
                    kernel(&ctx);
                });
            }
        }
    });
    Ok(())
}

/// Block-cooperative byte copy.
///
/// Each thread copies one contiguous chunk of `len / block_dim` bytes (the
/// last chunk absorbs the remainder), so the block moves the whole range in
/// parallel. The caller is responsible for `sync_threads()` before reading
/// the destination and after the producer finished writing the source.
///
/// # Safety
///
/// `src` must be valid for reads of `len` bytes and `dst` for writes of
/// `len` bytes for the duration of the call, the ranges must not overlap,
/// and every thread of the block must pass identical arguments.
pub unsafe fn copy_strided(ctx: &BlockContext, dst: *mut u8, src: *const u8, len: usize) {
    let chunk = len.div_ceil(ctx.block_dim());
    let start = (ctx.thread_rank() * chunk).min(len);
    let end = (start + chunk).min(len);
    if start < end {
        // SAFETY: chunks of distinct ranks are disjoint subranges of
        // [0, len); validity of the full range is the caller's contract.
        unsafe { std::ptr::copy_nonoverlapping(src.add(start), dst.add(start), end - start) };
    }
}
