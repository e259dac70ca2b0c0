//! Host/device shared buffers
//!
//! A [`MultiBuffer`] is a zeroed allocation of `count * elem_size` bytes
//! exposing a host pointer and a device pointer that alias the same memory.
//! Writes through either view become visible to the other side after a
//! release/acquire pair issued by the caller — the buffer itself performs no
//! synchronization.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::{memory_error, Result};

/// Alignment of every shared allocation, sufficient for the descriptor
/// types and key arenas stored in them.
const SHARED_ALIGN: usize = 8;

/// Typed-by-size multi-element shared buffer.
pub struct MultiBuffer {
    ptr: NonNull<u8>,
    count: usize,
    elem_size: usize,
    layout: Layout,
}

// Safety: the buffer is explicitly designed for cross-thread sharing; slot
// ownership is coordinated by the ring head/tail protocol of the callers.
unsafe impl Send for MultiBuffer {}
unsafe impl Sync for MultiBuffer {}

impl MultiBuffer {
    /// Allocate a zeroed buffer of `count` elements of `elem_size` bytes.
    pub fn new(count: usize, elem_size: usize) -> Result<Self> {
        if count == 0 || elem_size == 0 {
            return Err(memory_error!(
                "cannot allocate shared buffer of {}x{} bytes",
                count,
                elem_size
            ));
        }
        let bytes = count
            .checked_mul(elem_size)
            .ok_or_else(|| memory_error!("shared buffer size {}x{} overflows", count, elem_size))?;
        let layout = Layout::from_size_align(bytes, SHARED_ALIGN)
            .map_err(|e| memory_error!("invalid shared buffer layout: {}", e))?;

        // SAFETY: layout has non-zero size (checked above).
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| memory_error!("failed to allocate {} shared bytes", bytes))?;

        Ok(Self {
            ptr,
            count,
            elem_size,
            layout,
        })
    }

    /// Number of elements.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Size of one element in bytes.
    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    /// Total size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.count * self.elem_size
    }

    /// Host-side view of the allocation.
    pub fn host_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Accelerator-side view of the allocation. Numerically equal to the
    /// host view on this substrate; kept distinct so call sites document
    /// which side is touching the bytes.
    pub fn device_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Host-side pointer to the `index`-th element.
    ///
    /// # Panics
    /// Panics if `index >= count`.
    pub fn elem_host(&self, index: usize) -> *mut u8 {
        assert!(index < self.count, "element index out of range");
        // SAFETY: index * elem_size < size_bytes by the assert above.
        unsafe { self.ptr.as_ptr().add(index * self.elem_size) }
    }

    /// Accelerator-side pointer to the `index`-th element.
    pub fn elem_device(&self, index: usize) -> *mut u8 {
        self.elem_host(index)
    }

    /// Copy `data` into the `index`-th element.
    ///
    /// The caller must own the element per the ring protocol; concurrent
    /// writers to the same element are a contract violation.
    ///
    /// # Panics
    /// Panics if `data` is larger than one element.
    pub fn write_elem(&self, index: usize, data: &[u8]) {
        assert!(data.len() <= self.elem_size, "write exceeds element size");
        let dst = self.elem_host(index);
        // SAFETY: dst is valid for elem_size >= data.len() bytes and the
        // caller holds exclusive ownership of the element.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
    }

    /// Copy the `index`-th element's leading bytes into `out`.
    ///
    /// # Panics
    /// Panics if `out` is larger than one element.
    pub fn read_elem(&self, index: usize, out: &mut [u8]) {
        assert!(out.len() <= self.elem_size, "read exceeds element size");
        let src = self.elem_host(index);
        // SAFETY: src is valid for elem_size >= out.len() bytes.
        unsafe { std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), out.len()) };
    }
}

impl Drop for MultiBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with exactly this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Single contiguous shared slab.
pub struct SingleBuffer {
    inner: MultiBuffer,
}

impl SingleBuffer {
    /// Allocate a zeroed slab of `bytes` bytes.
    pub fn new(bytes: usize) -> Result<Self> {
        Ok(Self {
            inner: MultiBuffer::new(1, bytes)?,
        })
    }

    /// Size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.inner.size_bytes()
    }

    /// Host-side view.
    pub fn host_ptr(&self) -> *mut u8 {
        self.inner.host_ptr()
    }

    /// Accelerator-side view.
    pub fn device_ptr(&self) -> *mut u8 {
        self.inner.device_ptr()
    }

    /// Copy `data` into the slab starting at byte 0.
    pub fn write(&self, data: &[u8]) {
        self.inner.write_elem(0, data);
    }

    /// Copy the slab's leading bytes into `out`.
    pub fn read(&self, out: &mut [u8]) {
        self.inner.read_elem(0, out);
    }
}
