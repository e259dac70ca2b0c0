//! Lock-free request/response rings
//!
//! Each thread block owns one [`SubmissionQueue`] (accelerator-producer,
//! host-consumer) and one [`CompletionQueue`] (host-producer,
//! accelerator-consumer). Both are single-producer/single-consumer rings of
//! fixed-size descriptors with monotone 32-bit head/tail counters; the slot
//! index is `counter mod queue_size` and wrap happens only through that
//! modular indexing.

pub mod completion;
pub mod submission;

pub use completion::{CompletionQueue, CqConsumer, CqProducer};
pub use submission::{SqConsumer, SqProducer, SubmissionQueue};

/// Commands carried by a submission-ring descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    Put = 1,
    MultiPut = 2,
    Get = 3,
    MultiGet = 4,
    Delete = 5,
    AsyncGetInitiate = 6,
    AsyncGetFinalize = 7,
    Exit = 8,
}

impl Command {
    /// Decode a wire value. Unknown values are a corrupted descriptor.
    pub fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Command::Put),
            2 => Some(Command::MultiPut),
            3 => Some(Command::Get),
            4 => Some(Command::MultiGet),
            5 => Some(Command::Delete),
            6 => Some(Command::AsyncGetInitiate),
            7 => Some(Command::AsyncGetFinalize),
            8 => Some(Command::Exit),
            _ => None,
        }
    }

    /// Human-readable command name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Command::Put => "PUT",
            Command::MultiPut => "MULTI_PUT",
            Command::Get => "GET",
            Command::MultiGet => "MULTI_GET",
            Command::Delete => "DELETE",
            Command::AsyncGetInitiate => "ASYNC_GET_INITIATE",
            Command::AsyncGetFinalize => "ASYNC_GET_FINALIZE",
            Command::Exit => "EXIT",
        }
    }
}

/// Per-key operation status visible to accelerator callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum KvStatus {
    /// Operation completed
    #[default]
    Success = 0,
    /// Key absent on GET/DELETE
    NonExist = 1,
    /// Backend error; diagnostic logged with command name and request id
    Fail = 2,
    /// Status written on the EXIT completion; informational
    Exit = 3,
}

impl KvStatus {
    /// Decode a wire value. Unknown values map to `Fail`.
    pub fn from_wire(raw: u32) -> Self {
        match raw {
            0 => KvStatus::Success,
            1 => KvStatus::NonExist,
            3 => KvStatus::Exit,
            _ => KvStatus::Fail,
        }
    }
}

/// Fixed-size request descriptor occupying one submission-ring slot.
///
/// A batch of `increment_size` keys occupies that many consecutive slots;
/// the leading slot carries the batch descriptor and every slot carries its
/// own key bytes (in the ring's key arena) and, for asynchronous GETs, the
/// addresses of its caller-owned value and status cells.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct RequestMessage {
    pub cmd: u32,
    pub request_id: u32,
    pub increment_size: u32,
    pub key_size: u32,
    pub buff_size: u32,
    pub ticket: u32,
    /// Caller value-cell address for async GET slots; 0 otherwise.
    pub user_value: usize,
    /// Caller status-cell address for async GET slots; 0 otherwise.
    pub user_status: usize,
}

impl RequestMessage {
    /// An empty descriptor (cmd 0 decodes to no command).
    pub fn zeroed() -> Self {
        Self {
            cmd: 0,
            request_id: 0,
            increment_size: 0,
            key_size: 0,
            buff_size: 0,
            ticket: 0,
            user_value: 0,
            user_status: 0,
        }
    }

    /// Decode the command field.
    pub fn command(&self) -> Option<Command> {
        Command::from_wire(self.cmd)
    }
}
