//! Error types for the transport IO engine

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// MTU direction, used to name the violated precondition in diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtuDirection {
    Read,
    Write,
}

impl std::fmt::Display for MtuDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MtuDirection::Read => write!(f, "reading"),
            MtuDirection::Write => write!(f, "writing"),
        }
    }
}

/// Errors detected before a worker enters its running state.
///
/// These are fatal to the worker only; each is reported exactly once and
/// the worker exits without touching the transport descriptors.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Invalid BT socket: {0}")]
    InvalidSocket(i32),

    #[error("Invalid {direction} MTU: {value}")]
    InvalidMtu {
        direction: MtuDirection,
        value: usize,
    },

    #[error("Couldn't initialize {codec} codec: {source}")]
    CodecInit {
        codec: &'static str,
        source: CodecError,
    },
}

/// Codec adapter errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid configuration size: {actual} (expected {expected})")]
    InvalidConfigSize { expected: usize, actual: usize },

    #[error("invalid {field}: {value:#04x}")]
    InvalidField { field: &'static str, value: u32 },

    #[error("invalid bitpool range: {min}..={max}")]
    InvalidBitpool { min: u8, max: u8 },

    #[error("invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("decoder state corrupted: {0}")]
    Fatal(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
