use crate::frame::FrameTag;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The primary error type for the `distox-lib` library.
#[derive(Error, Debug)]
pub enum DistoError {
    #[error("Failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("Transport closed by the device")]
    TransportClosed,

    #[error("Session is not open")]
    NotOpen,

    #[error("No reply within {0:?}")]
    NoReply(Duration),

    #[error("Timeout during serial operation: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Partial reply: expected {expected} bytes, got {actual}")]
    PartialReply { expected: usize, actual: usize },

    #[error("Wrong reply opcode: expected {expected:#04x}, got {actual:#04x}")]
    WrongOpcode { expected: u8, actual: u8 },

    #[error("Wrong reply address: expected {expected:#06x}, got {actual:#06x}")]
    WrongAddress { expected: u16, actual: u16 },

    #[error("{0} toggle is not supported")]
    UnsupportedOperation(&'static str),

    #[error("Mode toggle failed: expected {expected:#06x}, last read {actual:?}")]
    ModeToggleFailed { expected: u16, actual: Option<u16> },

    #[error("Pairing broken: expected {expected:?} frame, got {actual:?}")]
    PairingBroken { expected: FrameTag, actual: FrameTag },

    #[error("Invalid command byte {0:#04x}")]
    InvalidCommand(u8),

    #[error("Invalid length: {0} bytes")]
    InvalidLength(usize),

    #[error("Insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Page {0:#x} is outside the bootloader address space")]
    PageOutOfRange(usize),
}

impl DistoError {
    /// Faults that a caller may retry on the same open session.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DistoError::NoReply(_) | DistoError::Timeout(_) | DistoError::PartialReply { .. }
        )
    }

    /// Faults after which the session must be torn down and reopened.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DistoError::Open { .. } | DistoError::Transport(_) | DistoError::TransportClosed
        )
    }
}
