//! Completion ring — host-producer / accelerator-consumer
//!
//! Mirror of the submission ring. Each slot carries a response: an array of
//! per-key statuses, an array of raw backend codes, and a ticket word (used
//! by asynchronous GET initiation). For a batch the leading slot's arrays
//! hold every key's result; the batch still occupies `increment_size` slots
//! so head and tail advance in lockstep with the submission ring.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::memory::MultiBuffer;
use crate::ring::KvStatus;
use crate::Result;

/// Lock-free single-producer/single-consumer response ring.
pub struct CompletionQueue {
    head: AtomicU32,
    tail: AtomicU32,
    queue_size: u32,
    max_num_keys: usize,
    statuses: MultiBuffer,
    backend_codes: MultiBuffer,
    tickets: MultiBuffer,
}

impl CompletionQueue {
    /// Allocate a ring of `queue_size` response slots, each able to report
    /// up to `max_num_keys` keys.
    pub fn new(queue_size: usize, max_num_keys: usize) -> Result<Self> {
        let word = std::mem::size_of::<u32>();
        Ok(Self {
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            queue_size: queue_size as u32,
            max_num_keys,
            statuses: MultiBuffer::new(queue_size, max_num_keys * word)?,
            backend_codes: MultiBuffer::new(queue_size, max_num_keys * word)?,
            tickets: MultiBuffer::new(queue_size, word)?,
        })
    }

    /// Split into the producer and consumer endpoints.
    pub fn endpoints(self) -> (CqProducer, CqConsumer) {
        let ring = Arc::new(self);
        (
            CqProducer { ring: ring.clone() },
            CqConsumer { ring },
        )
    }

    /// Ring capacity in slots.
    pub fn capacity(&self) -> u32 {
        self.queue_size
    }

    /// Maximum keys reported by one response.
    pub fn max_num_keys(&self) -> usize {
        self.max_num_keys
    }

    /// Occupied slots at this instant.
    pub fn len(&self) -> u32 {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    /// True when no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot_index(&self, pos: u32) -> usize {
        (pos % self.queue_size) as usize
    }

    fn status_cell(&self, pos: u32, key_idx: usize) -> *mut u32 {
        assert!(key_idx < self.max_num_keys, "key index out of range");
        let base = self.statuses.elem_host(self.slot_index(pos)) as *mut u32;
        // SAFETY: key_idx < max_num_keys keeps the cell inside the element.
        unsafe { base.add(key_idx) }
    }

    fn code_cell(&self, pos: u32, key_idx: usize) -> *mut i32 {
        assert!(key_idx < self.max_num_keys, "key index out of range");
        let base = self.backend_codes.elem_host(self.slot_index(pos)) as *mut i32;
        // SAFETY: key_idx < max_num_keys keeps the cell inside the element.
        unsafe { base.add(key_idx) }
    }
}

/// Producer endpoint, driven by the block's host worker.
pub struct CqProducer {
    ring: Arc<CompletionQueue>,
}

impl CqProducer {
    /// Try to claim `batch` consecutive response slots.
    pub fn try_claim(&self, batch: u32) -> Option<u32> {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        let head = self.ring.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head).wrapping_add(batch) > self.ring.queue_size {
            return None;
        }
        Some(tail)
    }

    /// Write the status for key `key_idx` of the response at `pos`.
    ///
    /// Distinct key cells of one claimed slot may be written concurrently by
    /// the worker pool; each cell has exactly one writer.
    pub fn set_status(&self, pos: u32, key_idx: usize, status: KvStatus) {
        // SAFETY: the claimed slot is owned by the producer until publish.
        unsafe { *self.ring.status_cell(pos, key_idx) = status as u32 };
    }

    /// Write the raw backend code for key `key_idx` of the response at `pos`.
    pub fn set_backend_code(&self, pos: u32, key_idx: usize, code: i32) {
        // SAFETY: see set_status.
        unsafe { *self.ring.code_cell(pos, key_idx) = code };
    }

    /// Write the ticket word of the response at `pos`.
    pub fn set_ticket(&self, pos: u32, ticket: u32) {
        self.ring
            .tickets
            .write_elem(self.ring.slot_index(pos), &ticket.to_ne_bytes());
    }

    /// Publish every slot in `[tail, new_tail)` with a single release store.
    pub fn publish(&self, new_tail: u32) {
        self.ring.tail.store(new_tail, Ordering::Release);
    }

    /// Shared ring observers.
    pub fn ring(&self) -> &CompletionQueue {
        &self.ring
    }
}

/// Consumer endpoint, held by the owning thread block.
pub struct CqConsumer {
    ring: Arc<CompletionQueue>,
}

impl CqConsumer {
    /// Observe the head position of a pending response, if any.
    ///
    /// Does not advance the ring; callers read the response contents and
    /// then call [`advance`](Self::advance).
    pub fn peek(&self) -> Option<u32> {
        let head = self.ring.head.load(Ordering::Relaxed);
        let tail = self.ring.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        Some(head)
    }

    /// Read the status for key `key_idx` of the response at `pos`.
    pub fn status(&self, pos: u32, key_idx: usize) -> KvStatus {
        // SAFETY: the published slot is owned by the consumer until advance.
        KvStatus::from_wire(unsafe { *self.ring.status_cell(pos, key_idx) })
    }

    /// Read the raw backend code for key `key_idx` of the response at `pos`.
    pub fn backend_code(&self, pos: u32, key_idx: usize) -> i32 {
        // SAFETY: see status.
        unsafe { *self.ring.code_cell(pos, key_idx) }
    }

    /// Read the ticket word of the response at `pos`.
    pub fn ticket(&self, pos: u32) -> u32 {
        let mut raw = [0u8; 4];
        self.ring
            .tickets
            .read_elem(self.ring.slot_index(pos), &mut raw);
        u32::from_ne_bytes(raw)
    }

    /// Release every slot in `[head, new_head)` back to the producer.
    pub fn advance(&self, new_head: u32) {
        self.ring.head.store(new_head, Ordering::Release);
    }

    /// Shared ring observers.
    pub fn ring(&self) -> &CompletionQueue {
        &self.ring
    }
}
