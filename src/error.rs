//! Error types for PetraBench

use thiserror::Error;

/// Main error type for PetraBench
#[derive(Error, Debug)]
pub enum PetraBenchError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Unrecoverable protocol conditions.
///
/// Once one of these is returned the stream position can no longer be
/// trusted and the connection must be abandoned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Unexpected line while expecting VALUE | STORED | END: {0}")]
    UnexpectedLine(String),

    #[error("Unknown HTTP response: {0}")]
    UnexpectedStatus(String),

    #[error("Malformed HTTP response: {0}")]
    MalformedHttp(#[from] httparse::Error),

    #[error("Bad header magic: expected {expected}, found {found}")]
    BadMagic { expected: u16, found: u16 },

    #[error("Unknown opcode: {0:#04x}")]
    UnknownOpcode(u16),

    #[error("Invalid length field: {0}")]
    InvalidLength(String),

    #[error("Invalid leader id: {0}")]
    InvalidLeader(String),

    #[error(
        "Internal server error on server {server} (leader {leader}, op time {latency_us:.1}us): {status}"
    )]
    BackendFault {
        status: String,
        latency_us: f64,
        server: u32,
        leader: u32,
    },

    #[error("SASL authentication failed (status {0:#06x})")]
    SaslFailed(u16),

    #[error("Key is not a logical block address: {0}")]
    InvalidBlockKey(String),

    #[error("No free request handles ({0} in flight)")]
    HandlesExhausted(usize),

    #[error("Response carries unknown request handle {0}")]
    UnknownHandle(u64),

    #[error("Response headers ended without Content-Length")]
    MissingContentLength,

    #[error("Unsolicited data in state {0}")]
    UnsolicitedData(&'static str),
}

pub type Result<T> = std::result::Result<T, PetraBenchError>;
