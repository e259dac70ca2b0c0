//! Error types for the gridkv fabric

use thiserror::Error;

/// Errors surfaced by store construction, backend lifecycle, and the
/// shared-memory primitives.
///
/// Per-key operation failures are not errors — they are reported through
/// [`KvStatus`](crate::ring::KvStatus) arrays so a failed key never unwinds
/// a queue.
#[derive(Error, Debug)]
pub enum GridKvError {
    /// Invalid store geometry or configuration parameter
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Shared buffer or data bank allocation failure
    #[error("memory error: {0}")]
    Memory(String),

    /// Backend open/close/destroy failure
    #[error("backend error: {0}")]
    Backend(String),

    /// Store lifecycle misuse (double open, close without open, ...)
    #[error("store error: {0}")]
    Store(String),
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, GridKvError>;

/// Create a configuration error with a formatted message
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::error::GridKvError::InvalidConfig(format!($($arg)*))
    };
}

/// Create a memory error with a formatted message
#[macro_export]
macro_rules! memory_error {
    ($($arg:tt)*) => {
        $crate::error::GridKvError::Memory(format!($($arg)*))
    };
}

/// Create a backend error with a formatted message
#[macro_export]
macro_rules! backend_error {
    ($($arg:tt)*) => {
        $crate::error::GridKvError::Backend(format!($($arg)*))
    };
}

/// Create a store error with a formatted message
#[macro_export]
macro_rules! store_error {
    ($($arg:tt)*) => {
        $crate::error::GridKvError::Store(format!($($arg)*))
    };
}
