use thiserror::Error;

use crate::device::BoHandle;
use crate::job::JobState;

pub type Result<T> = std::result::Result<T, Host1xError>;

#[derive(Debug, Error)]
pub enum Host1xError {
    #[error("device could not allocate {size} bytes: {reason}")]
    AllocationFailed { size: u64, reason: String },

    #[error("buffer objects must not be empty")]
    ZeroSize,

    #[error("wrap out of bounds: offset={offset} len={len} available={available}")]
    WrapOutOfBounds { offset: u64, len: u64, available: u64 },

    #[error("range out of bounds: offset={offset} len={len} size={size}")]
    RangeOutOfBounds { offset: u64, len: u64, size: u64 },

    #[error("offset {offset} is not aligned to {alignment} bytes")]
    MisalignedOffset { offset: u64, alignment: u64 },

    #[error("buffer object {handle} is not mapped")]
    NotMapped { handle: BoHandle },

    #[error("pushbuffer is full ({capacity} words)")]
    PushBufferOverflow { capacity: usize },

    #[error("job has no pushbuffer at index {index}")]
    NoPushBuffer { index: usize },

    #[error("job is {state:?}, expected {expected}")]
    InvalidState {
        state: JobState,
        expected: &'static str,
    },

    #[error("job has no pushbuffers")]
    EmptyJob,

    #[error("two relocations patch word {offset:#x} of buffer object {handle}")]
    OverlappingRelocation { handle: BoHandle, offset: u64 },

    #[error("offset arithmetic overflow")]
    OffsetOverflow,

    #[error("unknown buffer object handle {0}")]
    UnknownHandle(BoHandle),

    #[error("syncpoint {0} is not available")]
    NoSyncpoint(u32),

    #[error("no device backend could be opened")]
    NoBackend,

    #[error("device {op} failed ({code}): {message}")]
    Device {
        op: &'static str,
        code: i32,
        message: String,
    },
}

impl Host1xError {
    /// `true` for failures reported by the device rather than rejected arguments or misuse.
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            Host1xError::AllocationFailed { .. } | Host1xError::NoBackend | Host1xError::Device { .. }
        )
    }

    pub(crate) fn device(op: &'static str, code: i32, message: impl Into<String>) -> Self {
        Host1xError::Device {
            op,
            code,
            message: message.into(),
        }
    }
}
