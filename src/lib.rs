//! # gridkv
//!
//! A GPU-initiated key–value access fabric: batched PUT/GET/DELETE and
//! asynchronous GET issued from inside a cooperative kernel against an
//! external key–value engine on the host, without leaving the kernel.
//!
//! Each thread block is paired with one host worker through two lock-free
//! single-producer/single-consumer rings — a submission ring the block fills
//! and a completion ring the worker fills — plus a payload data bank per
//! direction. Backends are pluggable capability objects; an in-memory
//! concurrent map and a persistent engine are provided.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gridkv::prelude::*;
//!
//! let config = StoreConfig::new(1, 32, 8, 64, 16, 4);
//! let store = KvStore::new(config, Arc::new(MemoryBackend::new())).unwrap();
//! store.open_db().unwrap();
//!
//! store
//!     .launch_kernel(|ctx| {
//!         let status = store.put(ctx, b"key", b"value");
//!         assert_eq!(status, KvStatus::Success);
//!     })
//!     .unwrap();
//!
//! store.close_db().unwrap();
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod grid;
pub mod memory;
pub mod ring;
pub mod store;

pub use config::StoreConfig;
pub use error::{GridKvError, Result};
pub use ring::{Command, KvStatus};
pub use store::KvStore;

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::backend::{KvBackend, MemoryBackend, PersistentBackend};
    pub use crate::config::StoreConfig;
    pub use crate::error::{GridKvError, Result};
    pub use crate::grid::BlockContext;
    pub use crate::memory::{MultiBuffer, SingleBuffer, StatusBuffer};
    pub use crate::ring::KvStatus;
    pub use crate::store::KvStore;
}
