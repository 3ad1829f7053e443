use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    /// No response within the read timeout; retried by the transport.
    #[error("link timeout")]
    Timeout,
    /// Response id differs from the request id. The stream is
    /// desynchronized; never retried.
    #[error("response id {got} does not match request id {expected}")]
    IdMismatch { expected: u8, got: u8 },
    /// Device answered with a nonzero status byte.
    #[error("device fault on message {id}: status {status}")]
    DeviceFault { id: u8, status: u8 },
    /// Response body too short or otherwise malformed for its decoder.
    #[error("malformed response body for message {id}: expected {expected} bytes, got {got}")]
    Decode { id: u8, expected: usize, got: usize },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
