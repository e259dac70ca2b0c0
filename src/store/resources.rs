//! Per-block scratch state
//!
//! One [`BlockResources`] per thread block: the monotonic request-id
//! counter, the claim flag and head/tail snapshot the leader broadcasts to
//! its block between barriers, and the status scratch the leader fills from
//! a completion slot so every thread of the block can return the same
//! result.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use crate::ring::KvStatus;

pub struct BlockResources {
    request_id: AtomicU32,
    claim_ok: AtomicBool,
    claim_pos: AtomicU32,
    ticket: AtomicU32,
    statuses: Box<[AtomicU32]>,
    backend_codes: Box<[AtomicI32]>,
}

impl BlockResources {
    pub fn new(max_num_keys: usize) -> Self {
        Self {
            request_id: AtomicU32::new(0),
            claim_ok: AtomicBool::new(false),
            claim_pos: AtomicU32::new(0),
            ticket: AtomicU32::new(0),
            statuses: (0..max_num_keys).map(|_| AtomicU32::new(0)).collect(),
            backend_codes: (0..max_num_keys).map(|_| AtomicI32::new(0)).collect(),
        }
    }

    /// Next request id. Strictly increasing within the block; only the
    /// leader calls this.
    pub fn next_request_id(&self) -> u32 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Leader broadcast: outcome of a claim attempt plus the claimed
    /// (or observed) ring position. Read by the block after a barrier.
    pub fn set_claim(&self, ok: bool, pos: u32) {
        self.claim_pos.store(pos, Ordering::Relaxed);
        self.claim_ok.store(ok, Ordering::Relaxed);
    }

    pub fn claim(&self) -> (bool, u32) {
        (
            self.claim_ok.load(Ordering::Relaxed),
            self.claim_pos.load(Ordering::Relaxed),
        )
    }

    pub fn set_ticket(&self, ticket: u32) {
        self.ticket.store(ticket, Ordering::Relaxed);
    }

    pub fn ticket(&self) -> u32 {
        self.ticket.load(Ordering::Relaxed)
    }

    pub fn set_status(&self, key_idx: usize, status: KvStatus) {
        self.statuses[key_idx].store(status as u32, Ordering::Relaxed);
    }

    pub fn status(&self, key_idx: usize) -> KvStatus {
        KvStatus::from_wire(self.statuses[key_idx].load(Ordering::Relaxed))
    }

    pub fn set_backend_code(&self, key_idx: usize, code: i32) {
        self.backend_codes[key_idx].store(code, Ordering::Relaxed);
    }

    pub fn backend_code(&self, key_idx: usize) -> i32 {
        self.backend_codes[key_idx].load(Ordering::Relaxed)
    }
}
