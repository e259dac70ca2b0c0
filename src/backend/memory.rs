//! In-memory backend
//!
//! A concurrent byte-vector map. Double-insert of the same key is an
//! idempotent overwrite and reports success.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::backend::{code, KvBackend};
use crate::{backend_error, Result};

/// Concurrent map backend keyed by byte vectors.
#[derive(Default)]
pub struct MemoryBackend {
    map: DashMap<Vec<u8>, Vec<u8>>,
    open: AtomicBool,
}

impl MemoryBackend {
    /// Create a closed, empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no key is stored.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl KvBackend for MemoryBackend {
    fn open(&self) -> Result<()> {
        if self.open.swap(true, Ordering::AcqRel) {
            return Err(backend_error!("memory backend already open"));
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Err(backend_error!("memory backend not open"));
        }
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        if self.is_open() {
            return Err(backend_error!("cannot destroy an open memory backend"));
        }
        self.map.clear();
        Ok(())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> i32 {
        if !self.is_open() {
            return code::CLOSED;
        }
        self.map.insert(key.to_vec(), value.to_vec());
        code::OK
    }

    fn get(&self, key: &[u8], value_out: &mut [u8]) -> (i32, usize) {
        if !self.is_open() {
            return (code::CLOSED, 0);
        }
        match self.map.get(key) {
            Some(entry) => {
                let len = entry.len().min(value_out.len());
                value_out[..len].copy_from_slice(&entry[..len]);
                (code::OK, len)
            }
            None => (code::NOT_FOUND, 0),
        }
    }

    fn delete(&self, key: &[u8]) -> i32 {
        if !self.is_open() {
            return code::CLOSED;
        }
        match self.map.remove(key) {
            Some(_) => code::OK,
            None => code::NOT_FOUND,
        }
    }
}
