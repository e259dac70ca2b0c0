//! Accelerator-side store API
//!
//! Every operation is block-cooperative: all threads of a block enter the
//! same call with identical arguments. The leader (rank 0) is the only
//! thread touching ring atomics; the whole block shares bulk byte copies;
//! leader decisions are broadcast through the block's scratch resources
//! between barriers. Push and pop both busy-wait — backpressure is purely
//! capacity-driven.
//!
//! Constraints (caller errors, unchecked on the hot path beyond debug
//! asserts): at most `max_num_keys` keys per batch, one shared key size and
//! one shared value size per batch, keys within `max_key_size`, values
//! within `max_value_size`.

use crate::grid::{copy_strided, BlockContext};
use crate::memory::{MultiBuffer, SingleBuffer, StatusBuffer};
use crate::ring::{Command, KvStatus, RequestMessage};
use crate::store::{BlockShared, KvStore};

impl KvStore {
    /// Store one key/value pair. Blocks until the host worker responds.
    pub fn put(&self, ctx: &BlockContext, key: &[u8], value: &[u8]) -> KvStatus {
        let blk = self.shared(ctx);
        debug_assert!(value.len() <= self.max_value_size());
        self.push_spin(ctx, blk, 1, |pos| {
            if ctx.is_leader() {
                let msg = self.request(blk, Command::Put, 1, key.len(), value.len());
                blk.sq.write_slot(pos, &msg);
                blk.sq.write_key(pos, key);
            }
            // SAFETY: the claimed bank slot is producer-owned until publish;
            // value fits the slot per the caller constraint.
            unsafe { copy_strided(ctx, blk.host_bank.slot_device(pos), value.as_ptr(), value.len()) };
        });
        self.collect_status(ctx, blk, 1)
    }

    /// Store a batch of pairs; one status per key.
    pub fn multi_put(
        &self,
        ctx: &BlockContext,
        keys: &[&[u8]],
        values: &[&[u8]],
        statuses: &StatusBuffer,
    ) {
        let n = keys.len();
        debug_assert!(n >= 1 && n <= self.max_num_keys());
        debug_assert_eq!(values.len(), n);
        debug_assert!(statuses.count() >= n);

        let blk = self.shared(ctx);
        self.push_spin(ctx, blk, n as u32, |pos| {
            if ctx.is_leader() {
                let mut msg = self.request(blk, Command::MultiPut, n as u32, keys[0].len(), values[0].len());
                for i in 0..n {
                    let slot_pos = pos.wrapping_add(i as u32);
                    msg.key_size = keys[i].len() as u32;
                    msg.buff_size = values[i].len() as u32;
                    blk.sq.write_slot(slot_pos, &msg);
                    blk.sq.write_key(slot_pos, keys[i]);
                }
            }
            for (i, value) in values.iter().enumerate() {
                let slot_pos = pos.wrapping_add(i as u32);
                // SAFETY: claimed bank slots are producer-owned until publish.
                unsafe {
                    copy_strided(ctx, blk.host_bank.slot_device(slot_pos), value.as_ptr(), value.len())
                };
            }
        });
        self.pop_spin(ctx, blk, n as u32, |pos| {
            if ctx.is_leader() {
                for i in 0..n {
                    statuses.set(i, blk.cq.status(pos, i));
                }
            }
        });
    }

    /// Load the value for `key` into `out`. Blocks until the host worker
    /// responds; at most `out.size_bytes()` bytes are transferred.
    pub fn get(&self, ctx: &BlockContext, key: &[u8], out: &SingleBuffer) -> KvStatus {
        let blk = self.shared(ctx);
        let buff_size = out.size_bytes().min(self.max_value_size());
        self.push_spin(ctx, blk, 1, |pos| {
            if ctx.is_leader() {
                let msg = self.request(blk, Command::Get, 1, key.len(), buff_size);
                blk.sq.write_slot(pos, &msg);
                blk.sq.write_key(pos, key);
            }
        });
        self.pop_spin(ctx, blk, 1, |pos| {
            // SAFETY: the response's bank slot is consumer-owned until the
            // head advances; `out` is at least buff_size bytes.
            unsafe {
                copy_strided(
                    ctx,
                    out.device_ptr(),
                    blk.device_bank.slot_device(pos) as *const u8,
                    buff_size,
                )
            };
            if ctx.is_leader() {
                blk.resources.set_status(0, blk.cq.status(pos, 0));
                blk.resources.set_backend_code(0, blk.cq.backend_code(pos, 0));
            }
        });
        blk.resources.status(0)
    }

    /// Load a batch of values into `out` (one element per key); one status
    /// per key.
    pub fn multi_get(
        &self,
        ctx: &BlockContext,
        keys: &[&[u8]],
        out: &MultiBuffer,
        statuses: &StatusBuffer,
    ) {
        let n = keys.len();
        debug_assert!(n >= 1 && n <= self.max_num_keys());
        debug_assert!(out.count() >= n);
        debug_assert!(statuses.count() >= n);

        let blk = self.shared(ctx);
        let buff_size = out.elem_size().min(self.max_value_size());
        self.push_spin(ctx, blk, n as u32, |pos| {
            if ctx.is_leader() {
                let mut msg = self.request(blk, Command::MultiGet, n as u32, keys[0].len(), buff_size);
                for i in 0..n {
                    let slot_pos = pos.wrapping_add(i as u32);
                    msg.key_size = keys[i].len() as u32;
                    blk.sq.write_slot(slot_pos, &msg);
                    blk.sq.write_key(slot_pos, keys[i]);
                }
            }
        });
        self.pop_spin(ctx, blk, n as u32, |pos| {
            for i in 0..n {
                let bank_pos = pos.wrapping_add(i as u32);
                // SAFETY: response bank slots are consumer-owned until the
                // head advances; out elements hold elem_size >= buff_size.
                unsafe {
                    copy_strided(
                        ctx,
                        out.elem_device(i),
                        blk.device_bank.slot_device(bank_pos) as *const u8,
                        buff_size,
                    )
                };
            }
            if ctx.is_leader() {
                for i in 0..n {
                    statuses.set(i, blk.cq.status(pos, i));
                }
            }
        });
    }

    /// Remove `key`. Blocks until the host worker responds.
    pub fn delete(&self, ctx: &BlockContext, key: &[u8]) -> KvStatus {
        let blk = self.shared(ctx);
        self.push_spin(ctx, blk, 1, |pos| {
            if ctx.is_leader() {
                let msg = self.request(blk, Command::Delete, 1, key.len(), 0);
                blk.sq.write_slot(pos, &msg);
                blk.sq.write_key(pos, key);
            }
        });
        self.collect_status(ctx, blk, 1)
    }

    /// Start an asynchronous batched GET and return its ticket.
    ///
    /// The host writes values into `values` and per-key statuses into
    /// `statuses` in the background; both become observable only after
    /// [`async_get_finalize`](Self::async_get_finalize) returns for the
    /// ticket.
    ///
    /// # Safety
    ///
    /// `values` and `statuses` must stay alive and must not be read or
    /// written by the caller until the matching finalize returns: their
    /// addresses travel through the ring to a background host job.
    pub unsafe fn async_get_initiate(
        &self,
        ctx: &BlockContext,
        keys: &[&[u8]],
        values: &MultiBuffer,
        statuses: &StatusBuffer,
    ) -> u32 {
        let n = keys.len();
        debug_assert!(n >= 1 && n <= self.max_num_keys());
        debug_assert!(values.count() >= n);
        debug_assert!(statuses.count() >= n);

        let blk = self.shared(ctx);
        self.push_spin(ctx, blk, n as u32, |pos| {
            if ctx.is_leader() {
                let mut msg = self.request(
                    blk,
                    Command::AsyncGetInitiate,
                    n as u32,
                    keys[0].len(),
                    values.elem_size(),
                );
                for i in 0..n {
                    let slot_pos = pos.wrapping_add(i as u32);
                    msg.key_size = keys[i].len() as u32;
                    msg.user_value = values.elem_host(i) as usize;
                    msg.user_status = statuses.cell_addr(i);
                    blk.sq.write_slot(slot_pos, &msg);
                    blk.sq.write_key(slot_pos, keys[i]);
                }
            }
        });
        self.pop_spin(ctx, blk, n as u32, |pos| {
            if ctx.is_leader() {
                blk.resources.set_ticket(blk.cq.ticket(pos));
            }
        });
        blk.resources.ticket()
    }

    /// Block until the asynchronous GET identified by `ticket` has
    /// completed on the host. After this returns, the buffers supplied to
    /// the matching initiate hold the values and statuses.
    pub fn async_get_finalize(&self, ctx: &BlockContext, ticket: u32) {
        let blk = self.shared(ctx);
        self.push_spin(ctx, blk, 1, |pos| {
            if ctx.is_leader() {
                let mut msg = self.request(blk, Command::AsyncGetFinalize, 1, 0, 0);
                msg.ticket = ticket;
                blk.sq.write_slot(pos, &msg);
            }
        });
        self.pop_spin(ctx, blk, 1, |_pos| {});
    }

    /// Terminate this block's host worker.
    pub fn exit(&self, ctx: &BlockContext) {
        let blk = self.shared(ctx);
        self.push_spin(ctx, blk, 1, |pos| {
            if ctx.is_leader() {
                let msg = self.request(blk, Command::Exit, 1, 0, 0);
                blk.sq.write_slot(pos, &msg);
            }
        });
        self.pop_spin(ctx, blk, 1, |_pos| {});
    }

    // ── Cooperative push/pop machinery ────────────────────────────────

    /// Leader-only descriptor template; called inside the leader section of
    /// a fill closure so the request id is drawn exactly once per request.
    fn request(
        &self,
        blk: &BlockShared,
        cmd: Command,
        increment: u32,
        key_size: usize,
        buff_size: usize,
    ) -> RequestMessage {
        RequestMessage {
            cmd: cmd as u32,
            request_id: blk.resources.next_request_id(),
            increment_size: increment,
            key_size: key_size as u32,
            buff_size: buff_size as u32,
            ticket: 0,
            user_value: 0,
            user_status: 0,
        }
    }

    /// Spin until `batch` submission slots are claimed, run `fill` with the
    /// claimed position on every thread of the block, then publish.
    fn push_spin<F>(&self, ctx: &BlockContext, blk: &BlockShared, batch: u32, fill: F) -> u32
    where
        F: Fn(u32),
    {
        loop {
            if ctx.is_leader() {
                match blk.sq.try_claim(batch) {
                    Some(pos) => blk.resources.set_claim(true, pos),
                    None => blk.resources.set_claim(false, 0),
                }
            }
            ctx.sync_threads();
            let (claimed, pos) = blk.resources.claim();
            if claimed {
                fill(pos);
                ctx.sync_threads();
                if ctx.is_leader() {
                    blk.sq.publish(pos.wrapping_add(batch));
                }
                ctx.sync_threads();
                return pos;
            }
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }

    /// Spin until a response is visible, run `consume` with its position on
    /// every thread of the block, then release the slots.
    fn pop_spin<F>(&self, ctx: &BlockContext, blk: &BlockShared, batch: u32, consume: F)
    where
        F: Fn(u32),
    {
        loop {
            if ctx.is_leader() {
                match blk.cq.peek() {
                    Some(pos) => blk.resources.set_claim(true, pos),
                    None => blk.resources.set_claim(false, 0),
                }
            }
            ctx.sync_threads();
            let (ready, pos) = blk.resources.claim();
            if ready {
                consume(pos);
                ctx.sync_threads();
                if ctx.is_leader() {
                    blk.cq.advance(pos.wrapping_add(batch));
                }
                ctx.sync_threads();
                return;
            }
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }

    /// Pop a single-slot response and return its leading status on every
    /// thread of the block.
    fn collect_status(&self, ctx: &BlockContext, blk: &BlockShared, batch: u32) -> KvStatus {
        self.pop_spin(ctx, blk, batch, |pos| {
            if ctx.is_leader() {
                blk.resources.set_status(0, blk.cq.status(pos, 0));
                blk.resources.set_backend_code(0, blk.cq.backend_code(pos, 0));
            }
        });
        blk.resources.status(0)
    }
}
