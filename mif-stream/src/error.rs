use core::fmt;

use intr_bits::IntrBitError;
use packet_buffer::BufferError;

/// Error type for stream channel operations.
///
/// "No data" is not an error: reads return `Ok(0)` and peeks return `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// Shared memory or doorbell bits ran out.
    ResourceExhausted,
    /// Bad direction, target, geometry or packet size, or a stale handle.
    InvalidArgument,
    /// The channel is closed or its link has been torn down.
    Unavailable,
    /// Every slot holds an unread packet. Retry after the reader catches up.
    BufferFull,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            StreamError::ResourceExhausted => "out of shared memory or doorbell bits",
            StreamError::InvalidArgument => "invalid argument",
            StreamError::Unavailable => "stream or link unavailable",
            StreamError::BufferFull => "stream buffer full",
        };
        f.write_str(msg)
    }
}

impl From<BufferError> for StreamError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Full => StreamError::BufferFull,
            BufferError::OutOfMemory => StreamError::ResourceExhausted,
            BufferError::TooLarge
            | BufferError::Empty
            | BufferError::InvalidGeometry
            | BufferError::OutOfBounds => StreamError::InvalidArgument,
        }
    }
}

impl From<IntrBitError> for StreamError {
    fn from(err: IntrBitError) -> Self {
        match err {
            IntrBitError::Exhausted => StreamError::ResourceExhausted,
            IntrBitError::OutOfRange | IntrBitError::NotAllocated | IntrBitError::Reserved => {
                StreamError::InvalidArgument
            }
        }
    }
}
