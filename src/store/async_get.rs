//! Asynchronous GET pipeline
//!
//! Host-side half of initiate/finalize: a per-block table mapping tickets
//! (completion-ring tail counters at initiation time) to in-flight jobs.
//! The job runs the backend GET loop on the worker pool and writes directly
//! into the buffers the accelerator supplied at initiation; finalize waits
//! on the job and reclaims the ticket.
//!
//! Ticket state machine: issued -> running -> ready -> consumed. The table
//! holds the ticket from issue until finalize's wait returns.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

/// Completion latch for one in-flight asynchronous GET batch.
pub struct AsyncGetJob {
    done: Mutex<bool>,
    ready: Condvar,
}

impl AsyncGetJob {
    pub fn new() -> Self {
        Self {
            done: Mutex::new(false),
            ready: Condvar::new(),
        }
    }

    /// Mark the job ready. Called once by the pool worker after every key's
    /// value and status have been written.
    pub fn complete(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.ready.notify_all();
    }

    /// Block until the job is ready.
    pub fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.ready.wait(&mut done);
        }
    }

    /// Non-blocking readiness probe.
    pub fn is_ready(&self) -> bool {
        *self.done.lock()
    }
}

impl Default for AsyncGetJob {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-block ticket table.
///
/// Tickets are monotone completion-ring tail values, so a ticket is unique
/// for as long as its job is outstanding. The table refuses new tickets at
/// `capacity` outstanding jobs.
pub struct TicketTable {
    jobs: DashMap<u32, Arc<AsyncGetJob>>,
    capacity: usize,
}

impl TicketTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: DashMap::new(),
            capacity,
        }
    }

    /// Register a ticket. Returns the job latch, or `None` when the table
    /// is full or the ticket is already outstanding.
    pub fn try_insert(&self, ticket: u32) -> Option<Arc<AsyncGetJob>> {
        if self.jobs.len() >= self.capacity {
            return None;
        }
        let job = Arc::new(AsyncGetJob::new());
        match self.jobs.entry(ticket) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(job.clone());
                Some(job)
            }
        }
    }

    /// Remove and return the job for `ticket`.
    pub fn take(&self, ticket: u32) -> Option<Arc<AsyncGetJob>> {
        self.jobs.remove(&ticket).map(|(_, job)| job)
    }

    /// Outstanding jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// True when no job is outstanding.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
