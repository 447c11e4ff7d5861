use crate::constants::*;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Hardware generation. The two models differ in frame pairing,
/// roll resolution, register addresses and mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Model {
    /// DistoX1 (Leica A3 based)
    A3,
    /// DistoX2 (Leica X310 based)
    #[default]
    X310,
}

impl Model {
    pub fn status_address(self) -> u16 {
        match self {
            Model::A3 => STATUS_ADDRESS_A3,
            Model::X310 => STATUS_ADDRESS_X310,
        }
    }

    pub fn head_tail_address(self) -> u16 {
        match self {
            Model::A3 => HEAD_TAIL_ADDRESS_A3,
            Model::X310 => HEAD_TAIL_ADDRESS_X310,
        }
    }

    /// Newer model streams each measurement as a DATA + VECTOR pair.
    pub fn paired_measurements(self) -> bool {
        matches!(self, Model::X310)
    }

    /// Bytes of coefficient memory to transfer.
    pub fn coefficient_len(self) -> usize {
        match self {
            Model::A3 => COEFF_LINEAR_LEN,
            Model::X310 => COEFF_BUFFER_LEN,
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::A3 => f.write_str("A3"),
            Model::X310 => f.write_str("X310"),
        }
    }
}

impl FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a3" | "x1" | "distox1" => Ok(Model::A3),
            "x310" | "x2" | "distox2" => Ok(Model::X310),
            other => Err(format!("unknown model '{other}' (expected a3 or x310)")),
        }
    }
}

/// Connection and retry settings for a [`crate::DistoX`] session.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Serial device, usually an RFCOMM tty
    pub path: PathBuf,
    pub baud_rate: u32,
    pub model: Model,
    /// Bounded wait for each read on the transport
    pub read_timeout: Duration,
    /// Attempts for addressed operations (mode toggles, memory, pages)
    pub attempts: usize,
    /// Consecutive timeouts tolerated by the download loop
    pub download_retries: i32,
    /// Acknowledge streamed frames
    pub acknowledge: bool,
    status_address: Option<u16>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DEVICE),
            baud_rate: DEFAULT_BAUD_RATE,
            model: Model::default(),
            read_timeout: DEFAULT_TIMEOUT,
            attempts: DEFAULT_ATTEMPTS,
            download_retries: DEFAULT_DOWNLOAD_RETRIES,
            acknowledge: true,
            status_address: None,
        }
    }
}

impl DeviceConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: Model) -> Self {
        self.model = model;
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_download_retries(mut self, retries: i32) -> Self {
        self.download_retries = retries;
        self
    }

    pub fn without_acknowledge(mut self) -> Self {
        self.acknowledge = false;
        self
    }

    /// Overrides the model's status register address. The X310 register
    /// moved between firmware releases.
    pub fn with_status_address(mut self, address: u16) -> Self {
        self.status_address = Some(address);
        self
    }

    pub fn status_address(&self) -> u16 {
        self.status_address.unwrap_or_else(|| self.model.status_address())
    }
}
