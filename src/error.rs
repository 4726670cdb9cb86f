// Error types for splice
// One enum for the whole crate; every fallible call returns it

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpliceError {
    /// Substitution asked for an injection point the request does not have
    #[error("injection point {index} out of range (request has {count})")]
    IndexOutOfRange { index: usize, count: usize },

    /// Regions out of order or overlapping when serializing
    #[error("request regions are inconsistent: {0}")]
    Serialization(String),

    /// The core answered with a non-success status
    #[error("core request failed with status {status}: {body}")]
    CoreRequestFailed { status: u16, body: String },

    /// The core answered 2xx but the payload had the wrong shape
    #[error("malformed core response: {0}")]
    MalformedCoreResponse(String),

    #[error("invalid injection range {start}..{end} for a {len} byte request")]
    InvalidRange { start: usize, end: usize, len: usize },

    #[error("invalid request parts: {0}")]
    InvalidRequestParts(String),

    #[error("property '{0}' is reserved for the core wire format")]
    ReservedProperty(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SpliceError>;
