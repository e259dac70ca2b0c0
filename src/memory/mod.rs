//! Shared memory primitives
//!
//! Buffers allocated here are mapped into both the host and accelerator
//! address spaces; on this substrate the two views alias the same bytes.

pub mod bank;
pub mod shared;
pub mod status;

pub use bank::{DataBank, Residence};
pub use shared::{MultiBuffer, SingleBuffer};
pub use status::StatusBuffer;
