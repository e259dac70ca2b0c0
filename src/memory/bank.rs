//! Data banks
//!
//! A data bank is the bulk-payload slab paired with one ring: `queue_size`
//! slots of `max_value_size` bytes, addressed by `position mod queue_size`
//! where `position` is the ring's monotone head/tail counter. The producer
//! for a direction exclusively owns the slot at its tail until it publishes;
//! the consumer exclusively owns the slot at its head until it advances.

use crate::memory::MultiBuffer;
use crate::Result;

/// Which side of the fabric the payload bytes serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residence {
    /// Host-resident slab: PUT payloads written by the accelerator,
    /// consumed by the host dispatcher.
    HostPinned,
    /// Accelerator-resident slab: GET payloads written by the host
    /// dispatcher, consumed by the accelerator.
    DeviceShared,
}

/// Payload slab paired with a submission or completion ring.
pub struct DataBank {
    buf: MultiBuffer,
    queue_size: usize,
    residence: Residence,
}

impl DataBank {
    /// Allocate a bank of `queue_size` slots of `max_value_size` bytes.
    pub fn new(queue_size: usize, max_value_size: usize, residence: Residence) -> Result<Self> {
        Ok(Self {
            buf: MultiBuffer::new(queue_size, max_value_size)?,
            queue_size,
            residence,
        })
    }

    /// Payload capacity of one slot.
    pub fn value_size(&self) -> usize {
        self.buf.elem_size()
    }

    /// Residence of the slab.
    pub fn residence(&self) -> Residence {
        self.residence
    }

    /// Host-side pointer to the slot for ring position `pos`.
    pub fn slot_host(&self, pos: u32) -> *mut u8 {
        self.buf.elem_host(pos as usize % self.queue_size)
    }

    /// Accelerator-side pointer to the slot for ring position `pos`.
    pub fn slot_device(&self, pos: u32) -> *mut u8 {
        self.buf.elem_device(pos as usize % self.queue_size)
    }

    /// Copy `data` into the slot for ring position `pos`.
    ///
    /// The caller must own the slot per the ring protocol.
    pub fn write_slot(&self, pos: u32, data: &[u8]) {
        self.buf.write_elem(pos as usize % self.queue_size, data);
    }

    /// Copy the slot for ring position `pos` into `out`.
    pub fn read_slot(&self, pos: u32, out: &mut [u8]) {
        self.buf.read_elem(pos as usize % self.queue_size, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_wrap_modulo_queue_size() {
        let bank = DataBank::new(4, 8, Residence::HostPinned).unwrap();
        bank.write_slot(1, b"one");
        // Position 5 aliases slot 1 in a 4-deep ring.
        assert_eq!(bank.slot_host(5), bank.slot_host(1));
        let mut out = [0u8; 3];
        bank.read_slot(5, &mut out);
        assert_eq!(&out, b"one");
    }

    #[test]
    fn residence_is_recorded() {
        let bank = DataBank::new(2, 4, Residence::DeviceShared).unwrap();
        assert_eq!(bank.residence(), Residence::DeviceShared);
        assert_eq!(bank.value_size(), 4);
    }
}
