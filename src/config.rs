//! Store configuration
//!
//! All knobs are constructor parameters of the store. Environment variables
//! are honoured only through the explicit `*_from_env` helpers, intended for
//! the outermost driver layer.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::time::Duration;

use crate::{config_error, Result};

/// Geometry and behaviour of a [`KvStore`](crate::store::KvStore).
///
/// `queue_size` is the ring depth per block; `max_num_keys` bounds the batch
/// length of a single multi-key operation and therefore may not exceed the
/// ring depth.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StoreConfig {
    /// Number of thread blocks, each paired with one host worker
    pub num_blocks: usize,
    /// Threads per block cooperating on bulk copies
    pub block_size: usize,
    /// Slots per submission/completion ring
    pub queue_size: usize,
    /// Payload capacity of one data bank slot, in bytes
    pub max_value_size: usize,
    /// Key capacity of one ring slot, in bytes
    pub max_key_size: usize,
    /// Maximum keys per batched operation
    pub max_num_keys: usize,
    /// Artificial per-request delay in the host worker. Benchmarking and
    /// backpressure-testing hook; leave `None` in production.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub worker_delay: Option<Duration>,
}

impl StoreConfig {
    /// Create a configuration with the given geometry and no worker delay.
    pub fn new(
        num_blocks: usize,
        block_size: usize,
        queue_size: usize,
        max_value_size: usize,
        max_key_size: usize,
        max_num_keys: usize,
    ) -> Self {
        Self {
            num_blocks,
            block_size,
            queue_size,
            max_value_size,
            max_key_size,
            max_num_keys,
            worker_delay: None,
        }
    }

    /// Set an artificial per-request worker delay.
    pub fn with_worker_delay(mut self, delay: Duration) -> Self {
        self.worker_delay = Some(delay);
        self
    }

    /// Validate the geometry.
    ///
    /// Violations are fatal at store construction.
    pub fn validate(&self) -> Result<()> {
        if self.num_blocks < 1 {
            return Err(config_error!("num_blocks must be at least 1"));
        }
        if self.block_size < 1 {
            return Err(config_error!("block_size must be at least 1"));
        }
        if self.max_num_keys < 1 {
            return Err(config_error!("max_num_keys must be at least 1"));
        }
        if self.queue_size < self.max_num_keys {
            return Err(config_error!(
                "queue_size {} is smaller than max_num_keys {}",
                self.queue_size,
                self.max_num_keys
            ));
        }
        if self.max_value_size < 1 {
            return Err(config_error!("max_value_size must be at least 1"));
        }
        if self.max_key_size < 1 {
            return Err(config_error!("max_key_size must be at least 1"));
        }
        Ok(())
    }
}

/// Read the ring depth from the `QUEUE_SIZE` environment variable.
///
/// Returns `default` when the variable is unset; malformed values are an
/// error rather than a silent fallback.
pub fn queue_size_from_env(default: usize) -> Result<usize> {
    match std::env::var("QUEUE_SIZE") {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|e| config_error!("QUEUE_SIZE {:?} is not a valid size: {}", raw, e)),
        Err(_) => Ok(default),
    }
}

/// Read the persistent backend identity from the `DB_IDENTIFY` environment
/// variable, if set.
pub fn db_identity_from_env() -> Option<String> {
    std::env::var("DB_IDENTIFY").ok().filter(|s| !s.is_empty())
}
