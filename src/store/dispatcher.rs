//! Host dispatcher
//!
//! One worker per thread block: pop the block's submission ring, execute the
//! request against the backend, publish the response into the block's
//! completion ring, and exit on EXIT. Batches are fanned out over the shared
//! worker pool; asynchronous GETs are spawned onto the pool and tracked in
//! the block's ticket table.

use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;

use crate::backend::{decode, KvBackend};
use crate::memory::DataBank;
use crate::ring::{Command, CqProducer, KvStatus, RequestMessage, SqConsumer};
use crate::store::async_get::TicketTable;

/// Iterations of pure spinning before the worker starts sleeping between
/// polls. Busy-wait is bounded to keep idle blocks cheap on the host.
const SPIN_LIMIT: u32 = 256;
const POLL_SLEEP: Duration = Duration::from_micros(20);

/// Everything one block's worker needs, moved into its thread.
pub(crate) struct WorkerContext {
    pub block_idx: usize,
    pub sq: SqConsumer,
    pub cq: CqProducer,
    pub host_bank: Arc<DataBank>,
    pub device_bank: Arc<DataBank>,
    pub tickets: Arc<TicketTable>,
    pub backend: Arc<dyn KvBackend>,
    pub pool: Arc<rayon::ThreadPool>,
    pub delay: Option<Duration>,
}

/// Worker loop: drain the submission ring until EXIT.
pub(crate) fn run_worker(ctx: WorkerContext) {
    log::debug!("worker for block {} started", ctx.block_idx);
    loop {
        let (pos, req) = pop_blocking(&ctx.sq);
        if let Some(delay) = ctx.delay {
            std::thread::sleep(delay);
        }
        if process_kv_request(&ctx, pos, &req) {
            break;
        }
    }
    log::debug!("worker for block {} exited", ctx.block_idx);
}

/// Bounded spin, then short sleeps. No condition variables in this path.
fn pop_blocking(sq: &SqConsumer) -> (u32, RequestMessage) {
    let mut spins = 0u32;
    loop {
        if let Some(popped) = sq.pop() {
            return popped;
        }
        if spins < SPIN_LIMIT {
            spins += 1;
            std::hint::spin_loop();
        } else {
            std::thread::sleep(POLL_SLEEP);
        }
    }
}

fn claim_completion(cq: &CqProducer, batch: u32) -> u32 {
    let mut spins = 0u32;
    loop {
        if let Some(pos) = cq.try_claim(batch) {
            return pos;
        }
        if spins < SPIN_LIMIT {
            spins += 1;
            std::hint::spin_loop();
        } else {
            std::thread::sleep(POLL_SLEEP);
        }
    }
}

/// Execute one request and publish its response. Returns true on EXIT.
fn process_kv_request(ctx: &WorkerContext, sq_pos: u32, req: &RequestMessage) -> bool {
    let increment = req.increment_size.max(1);
    let cq_pos = claim_completion(&ctx.cq, increment);
    let mut exit = false;

    match req.command() {
        Some(Command::Put) | Some(Command::MultiPut) => put_batch(ctx, sq_pos, req, cq_pos),
        Some(Command::Get) | Some(Command::MultiGet) => get_batch(ctx, sq_pos, req, cq_pos),
        Some(Command::Delete) => delete_one(ctx, sq_pos, req, cq_pos),
        Some(Command::AsyncGetInitiate) => async_initiate(ctx, sq_pos, req, cq_pos),
        Some(Command::AsyncGetFinalize) => async_finalize(ctx, req, cq_pos),
        Some(Command::Exit) => {
            ctx.cq.set_status(cq_pos, 0, KvStatus::Exit);
            exit = true;
        }
        None => {
            log::error!(
                "block {}: corrupted descriptor cmd {} for request {}",
                ctx.block_idx,
                req.cmd,
                req.request_id
            );
            ctx.cq.set_status(cq_pos, 0, KvStatus::Fail);
        }
    }

    ctx.cq.publish(cq_pos.wrapping_add(increment));
    exit
}

fn record(ctx: &WorkerContext, cmd: Command, req: &RequestMessage, cq_pos: u32, i: usize, code: i32) {
    let status = decode(code);
    if status == KvStatus::Fail {
        log::warn!(
            "{} failed for request {}: backend code {}",
            cmd.name(),
            req.request_id,
            code
        );
    }
    ctx.cq.set_backend_code(cq_pos, i, code);
    ctx.cq.set_status(cq_pos, i, status);
}

fn put_batch(ctx: &WorkerContext, sq_pos: u32, req: &RequestMessage, cq_pos: u32) {
    let n = req.increment_size.max(1) as usize;
    let cmd = if n > 1 { Command::MultiPut } else { Command::Put };
    let run = |i: usize| {
        let slot_pos = sq_pos.wrapping_add(i as u32);
        let slot = if i == 0 { *req } else { ctx.sq.slot(slot_pos) };
        let key = ctx.sq.key(slot_pos, slot.key_size as usize);
        let len = (slot.buff_size as usize).min(ctx.host_bank.value_size());
        // SAFETY: the slot's bank slab holds at least value_size bytes and
        // belongs to this in-flight request.
        let value = unsafe { std::slice::from_raw_parts(ctx.host_bank.slot_host(slot_pos), len) };
        record(ctx, cmd, req, cq_pos, i, ctx.backend.put(key, value));
    };
    if n > 1 {
        ctx.pool.install(|| (0..n).into_par_iter().for_each(run));
    } else {
        run(0);
    }
}

fn get_batch(ctx: &WorkerContext, sq_pos: u32, req: &RequestMessage, cq_pos: u32) {
    let n = req.increment_size.max(1) as usize;
    let cmd = if n > 1 { Command::MultiGet } else { Command::Get };
    let run = |i: usize| {
        let slot_pos = sq_pos.wrapping_add(i as u32);
        let slot = if i == 0 { *req } else { ctx.sq.slot(slot_pos) };
        let key = ctx.sq.key(slot_pos, slot.key_size as usize);
        let len = (slot.buff_size as usize).min(ctx.device_bank.value_size());
        let bank_pos = cq_pos.wrapping_add(i as u32);
        // SAFETY: the response's bank slab is owned by the host until the
        // completion publishes; distinct i write distinct slots.
        let out =
            unsafe { std::slice::from_raw_parts_mut(ctx.device_bank.slot_host(bank_pos), len) };
        let (code, _actual) = ctx.backend.get(key, out);
        record(ctx, cmd, req, cq_pos, i, code);
    };
    if n > 1 {
        ctx.pool.install(|| (0..n).into_par_iter().for_each(run));
    } else {
        run(0);
    }
}

fn delete_one(ctx: &WorkerContext, sq_pos: u32, req: &RequestMessage, cq_pos: u32) {
    let key = ctx.sq.key(sq_pos, req.key_size as usize);
    record(ctx, Command::Delete, req, cq_pos, 0, ctx.backend.delete(key));
}

/// One key of an in-flight asynchronous GET: the key bytes (copied out of
/// the ring, whose slots are reclaimed long before the job runs) and the
/// caller's value/status cell addresses carried through the descriptor.
struct AsyncKeyTask {
    key: Vec<u8>,
    value_addr: usize,
    value_cap: usize,
    status_addr: usize,
}

// Safety: the addresses point into caller-owned shared buffers that the
// initiate contract keeps alive until finalize returns.
unsafe impl Send for AsyncKeyTask {}

impl AsyncKeyTask {
    fn execute(&self, backend: &dyn KvBackend) {
        // SAFETY: per the struct contract the value cell is valid for
        // value_cap bytes and this job is its only writer.
        let out =
            unsafe { std::slice::from_raw_parts_mut(self.value_addr as *mut u8, self.value_cap) };
        let (code, _actual) = backend.get(&self.key, out);
        if self.status_addr != 0 {
            // SAFETY: the status cell is a caller-owned u32 with one writer.
            unsafe { *(self.status_addr as *mut u32) = decode(code) as u32 };
        }
    }
}

fn async_initiate(ctx: &WorkerContext, sq_pos: u32, req: &RequestMessage, cq_pos: u32) {
    let n = req.increment_size.max(1) as usize;
    let ticket = cq_pos;

    let tasks: Vec<AsyncKeyTask> = (0..n)
        .map(|i| {
            let slot_pos = sq_pos.wrapping_add(i as u32);
            let slot = if i == 0 { *req } else { ctx.sq.slot(slot_pos) };
            AsyncKeyTask {
                key: ctx.sq.key(slot_pos, slot.key_size as usize).to_vec(),
                value_addr: slot.user_value,
                value_cap: slot.buff_size as usize,
                status_addr: slot.user_status,
            }
        })
        .collect();

    match ctx.tickets.try_insert(ticket) {
        Some(job) => {
            let backend = ctx.backend.clone();
            ctx.pool.spawn(move || {
                for task in &tasks {
                    task.execute(backend.as_ref());
                }
                job.complete();
            });
            ctx.cq.set_ticket(cq_pos, ticket);
            ctx.cq.set_status(cq_pos, 0, KvStatus::Success);
        }
        None => {
            log::warn!(
                "block {}: ticket table full, refusing async GET request {}",
                ctx.block_idx,
                req.request_id
            );
            for task in &tasks {
                if task.status_addr != 0 {
                    // SAFETY: see AsyncKeyTask contract.
                    unsafe { *(task.status_addr as *mut u32) = KvStatus::Fail as u32 };
                }
            }
            ctx.cq.set_ticket(cq_pos, ticket);
            ctx.cq.set_status(cq_pos, 0, KvStatus::Fail);
        }
    }
}

fn async_finalize(ctx: &WorkerContext, req: &RequestMessage, cq_pos: u32) {
    match ctx.tickets.take(req.ticket) {
        Some(job) => {
            job.wait();
            ctx.cq.set_status(cq_pos, 0, KvStatus::Success);
        }
        None => {
            log::warn!(
                "block {}: finalize for unknown ticket {} (request {})",
                ctx.block_idx,
                req.ticket,
                req.request_id
            );
            ctx.cq.set_status(cq_pos, 0, KvStatus::Fail);
        }
    }
}
