use std::path::PathBuf;
use thiserror::Error;

/// Failures raised at the register transport seam. The transport owns
/// retries; by the time one of these surfaces here the request is dead.
#[derive(Debug, Error, PartialEq)]
pub enum TransportError {
    #[error("modbus request failed: {0}")]
    Request(String),

    #[error("modbus exception response: {0}")]
    Exception(String),

    #[error("request timed out")]
    Timeout,

    #[error("no connection to device")]
    Disconnected,
}

/// Malformed register content. Fatal to the poll cycle that produced it,
/// never to the process.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("register block length {got}, expected {expected}")]
    BlockLength { expected: usize, got: usize },

    #[error("status word encodes unmapped state {0}")]
    InvalidState(u8),
}

/// Everything that can go wrong in one poll cycle.
#[derive(Debug, Error, PartialEq)]
pub enum ReadError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
}

/// Operator setpoint rejected before any write is attempted.
#[derive(Debug, Error, PartialEq)]
pub enum EncodeError {
    #[error("{field} = {value} exceeds the 16-bit reference range")]
    OutOfRange { field: &'static str, value: f64 },
}

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("encode: {0}")]
    Encode(#[from] EncodeError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

/// Filesystem failure in the datalog writer or event journal. These are
/// logged and swallowed by their owners; the affected row is dropped.
#[derive(Debug, Error)]
pub enum LogIoError {
    #[error("failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write to {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
