//! Caller-facing per-key status arrays

use crate::memory::MultiBuffer;
use crate::ring::KvStatus;
use crate::Result;

/// Shared array of [`KvStatus`] words, one per key of a batched operation.
///
/// Allocated by the caller and passed to the multi-key and asynchronous
/// store operations; the fabric writes it, the caller reads it after the
/// operation (or, for async GETs, after finalize) returns.
pub struct StatusBuffer {
    buf: MultiBuffer,
}

impl StatusBuffer {
    /// Allocate a status array for `count` keys, initialised to `Success`.
    pub fn new(count: usize) -> Result<Self> {
        Ok(Self {
            buf: MultiBuffer::new(count, std::mem::size_of::<u32>())?,
        })
    }

    /// Number of status cells.
    pub fn count(&self) -> usize {
        self.buf.count()
    }

    /// Read the status for key `index`.
    pub fn get(&self, index: usize) -> KvStatus {
        let mut raw = [0u8; 4];
        self.buf.read_elem(index, &mut raw);
        KvStatus::from_wire(u32::from_ne_bytes(raw))
    }

    /// Write the status for key `index`.
    ///
    /// Written by the fabric; callers normally only read.
    pub fn set(&self, index: usize, status: KvStatus) {
        self.buf.write_elem(index, &(status as u32).to_ne_bytes());
    }

    /// Address of the `index`-th cell, for descriptors that carry caller
    /// cell addresses through the ring.
    pub(crate) fn cell_addr(&self, index: usize) -> usize {
        self.buf.elem_host(index) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_success() {
        let statuses = StatusBuffer::new(4).unwrap();
        for i in 0..4 {
            assert_eq!(statuses.get(i), KvStatus::Success);
        }
    }

    #[test]
    fn set_get_round_trip() {
        let statuses = StatusBuffer::new(2).unwrap();
        statuses.set(1, KvStatus::NonExist);
        assert_eq!(statuses.get(0), KvStatus::Success);
        assert_eq!(statuses.get(1), KvStatus::NonExist);
    }
}
