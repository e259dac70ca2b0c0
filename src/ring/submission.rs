//! Submission ring — accelerator-producer / host-consumer
//!
//! Slots hold [`RequestMessage`] descriptors plus an inline key buffer per
//! slot in a separate arena. `head` and `tail` are monotone `u32` counters:
//! occupancy is `tail - head`, the slot index is `counter mod queue_size`,
//! and a batch of `k` slots requires `tail - head + k - 1 < queue_size`.
//!
//! # Ordering
//!
//! The producer loads `tail` relaxed (it is the only writer) and `head` with
//! acquire (to observe consumer progress), fills the claimed slots, then
//! publishes the new tail with release. The consumer mirrors this on `head`.
//! The release/release-acquire pairing is what carries slot contents across
//! the host/accelerator boundary.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::memory::MultiBuffer;
use crate::ring::RequestMessage;
use crate::Result;

/// Lock-free single-producer/single-consumer request ring.
pub struct SubmissionQueue {
    head: AtomicU32,
    tail: AtomicU32,
    queue_size: u32,
    max_key_size: usize,
    slots: MultiBuffer,
    keys: MultiBuffer,
}

impl SubmissionQueue {
    /// Allocate a ring of `queue_size` slots with `max_key_size`-byte key
    /// buffers.
    pub fn new(queue_size: usize, max_key_size: usize) -> Result<Self> {
        Ok(Self {
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            queue_size: queue_size as u32,
            max_key_size,
            slots: MultiBuffer::new(queue_size, std::mem::size_of::<RequestMessage>())?,
            keys: MultiBuffer::new(queue_size, max_key_size)?,
        })
    }

    /// Split into the producer and consumer endpoints.
    ///
    /// Called exactly once per ring at store construction; the endpoints are
    /// what encode the single-producer/single-consumer discipline.
    pub fn endpoints(self) -> (SqProducer, SqConsumer) {
        let ring = Arc::new(self);
        (
            SqProducer { ring: ring.clone() },
            SqConsumer { ring },
        )
    }

    /// Ring capacity in slots.
    pub fn capacity(&self) -> u32 {
        self.queue_size
    }

    /// Key buffer capacity per slot.
    pub fn max_key_size(&self) -> usize {
        self.max_key_size
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
}

/// Producer endpoint, held by the owning thread block.
///
/// Only the block leader calls the claim/publish methods; the rest of the
/// block may cooperate on filling the payload bank before publication.
pub struct SqProducer {
    ring: Arc<SubmissionQueue>,
}

impl SqProducer {
    /// Try to claim `batch` consecutive slots.
    ///
    /// Returns the claimed tail position, or `None` without mutating state
    /// when the ring lacks capacity.
    pub fn try_claim(&self, batch: u32) -> Option<u32> {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        let head = self.ring.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head).wrapping_add(batch) > self.ring.queue_size {
            return None;
        }
        Some(tail)
    }

    /// Write a descriptor into the slot at `pos`.
    ///
    /// The slot must have been claimed and not yet published.
    pub fn write_slot(&self, pos: u32, msg: &RequestMessage) {
        let idx = self.ring.slot_index(pos);
        // SAFETY: the claimed slot is exclusively owned by this producer
        // until publish; the arena element is sized and aligned for
        // RequestMessage.
        unsafe { *(self.ring.slots.elem_host(idx) as *mut RequestMessage) = *msg };
    }

    /// Copy key bytes into the slot's inline key buffer.
    ///
    /// # Panics
    /// Panics if `key` exceeds the ring's key capacity.
    pub fn write_key(&self, pos: u32, key: &[u8]) {
        self.ring.keys.write_elem(self.ring.slot_index(pos), key);
    }

    /// Publish every slot in `[tail, new_tail)` with a single release store.
    ///
    /// Batches become visible atomically; partial visibility is impossible.
    pub fn publish(&self, new_tail: u32) {
        self.ring.tail.store(new_tail, Ordering::Release);
    }

    /// Shared ring observers.
    pub fn ring(&self) -> &SubmissionQueue {
        &self.ring
    }
}

/// Consumer endpoint, moved into the block's host worker.
pub struct SqConsumer {
    ring: Arc<SubmissionQueue>,
}

impl SqConsumer {
    /// Pop the request at the head of the ring.
    ///
    /// Copies the leading descriptor out, advances `head` by the request's
    /// `increment_size` with release, and returns the leading position with
    /// the descriptor. Returns `None` when the ring is empty.
    pub fn pop(&self) -> Option<(u32, RequestMessage)> {
        let head = self.ring.head.load(Ordering::Relaxed);
        let tail = self.ring.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let idx = self.ring.slot_index(head);
        // SAFETY: the published slot is owned by the consumer until head
        // advances past it; the arena element holds a RequestMessage.
        let msg = unsafe { *(self.ring.slots.elem_host(idx) as *const RequestMessage) };
        let increment = msg.increment_size.max(1);
        self.ring
            .head
            .store(head.wrapping_add(increment), Ordering::Release);
        Some((head, msg))
    }

    /// Read the descriptor of a trailing batch slot.
    ///
    /// Safe for the slots of the request just popped: the producer cannot
    /// reclaim them before the block observes this request's completion.
    pub fn slot(&self, pos: u32) -> RequestMessage {
        let idx = self.ring.slot_index(pos);
        // SAFETY: see above; the slot belongs to the in-flight request.
        unsafe { *(self.ring.slots.elem_host(idx) as *const RequestMessage) }
    }

    /// Borrow the key bytes of a slot of the in-flight request.
    pub fn key(&self, pos: u32, key_size: usize) -> &[u8] {
        let len = key_size.min(self.ring.max_key_size);
        let ptr = self.ring.keys.elem_host(self.ring.slot_index(pos));
        // SAFETY: the arena element is at least max_key_size bytes and the
        // slot belongs to the in-flight request.
        unsafe { std::slice::from_raw_parts(ptr, len) }
    }

    /// Shared ring observers.
    pub fn ring(&self) -> &SubmissionQueue {
        &self.ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::Command;

    fn request(cmd: Command, id: u32, batch: u32) -> RequestMessage {
        RequestMessage {
            cmd: cmd as u32,
            request_id: id,
            increment_size: batch,
            key_size: 4,
            buff_size: 0,
            ticket: 0,
            user_value: 0,
            user_status: 0,
        }
    }

    #[test]
    fn push_pop_single() {
        let (producer, consumer) = SubmissionQueue::new(4, 8).unwrap().endpoints();

        let tail = producer.try_claim(1).unwrap();
        producer.write_slot(tail, &request(Command::Put, 7, 1));
        producer.write_key(tail, b"key0");
        producer.publish(tail.wrapping_add(1));

        let (pos, msg) = consumer.pop().unwrap();
        assert_eq!(pos, tail);
        assert_eq!(msg.request_id, 7);
        assert_eq!(consumer.key(pos, 4), b"key0");
        assert!(consumer.ring().is_empty());
    }

    #[test]
    fn refuses_when_full() {
        let (producer, consumer) = SubmissionQueue::new(2, 4).unwrap().endpoints();

        for i in 0..2 {
            let tail = producer.try_claim(1).unwrap();
            producer.write_slot(tail, &request(Command::Put, i, 1));
            producer.publish(tail.wrapping_add(1));
        }
        assert!(producer.try_claim(1).is_none());

        consumer.pop().unwrap();
        assert!(producer.try_claim(1).is_some());
    }

    #[test]
    fn refuses_oversized_batch() {
        let (producer, _consumer) = SubmissionQueue::new(4, 4).unwrap().endpoints();
        assert!(producer.try_claim(5).is_none());
        assert!(producer.try_claim(4).is_some());
    }

    #[test]
    fn batch_occupies_consecutive_slots() {
        let (producer, consumer) = SubmissionQueue::new(8, 4).unwrap().endpoints();

        let tail = producer.try_claim(3).unwrap();
        for i in 0..3 {
            let mut msg = request(Command::MultiPut, 42, 3);
            msg.key_size = 2;
            producer.write_slot(tail.wrapping_add(i), &msg);
            producer.write_key(tail.wrapping_add(i), &[i as u8, 0xEE]);
        }
        producer.publish(tail.wrapping_add(3));
        assert_eq!(consumer.ring().len(), 3);

        let (pos, msg) = consumer.pop().unwrap();
        assert_eq!(msg.increment_size, 3);
        for i in 0..3 {
            assert_eq!(consumer.key(pos.wrapping_add(i), 2), &[i as u8, 0xEE]);
        }
        // head advanced by the whole batch
        assert!(consumer.ring().is_empty());
    }

    #[test]
    fn wraps_around() {
        let (producer, consumer) = SubmissionQueue::new(4, 4).unwrap().endpoints();

        for round in 0..3u32 {
            for i in 0..4u32 {
                let tail = producer.try_claim(1).unwrap();
                producer.write_slot(tail, &request(Command::Get, round * 100 + i, 1));
                producer.publish(tail.wrapping_add(1));
            }
            assert!(producer.try_claim(1).is_none());
            for i in 0..4u32 {
                let (_, msg) = consumer.pop().unwrap();
                assert_eq!(msg.request_id, round * 100 + i);
            }
            assert!(consumer.ring().is_empty());
        }
    }

    #[test]
    fn spsc_cross_thread_fifo() {
        let (producer, consumer) = SubmissionQueue::new(8, 4).unwrap().endpoints();
        const COUNT: u32 = 10_000;

        std::thread::scope(|scope| {
            scope.spawn(move || {
                for id in 0..COUNT {
                    let tail = loop {
                        if let Some(t) = producer.try_claim(1) {
                            break t;
                        }
                        std::hint::spin_loop();
                    };
                    producer.write_slot(tail, &request(Command::Put, id, 1));
                    producer.publish(tail.wrapping_add(1));
                }
            });

            let mut next = 0u32;
            while next < COUNT {
                if let Some((_, msg)) = consumer.pop() {
                    assert_eq!(msg.request_id, next, "FIFO order violated");
                    next += 1;
                } else {
                    std::hint::spin_loop();
                }
            }
        });
    }
}
