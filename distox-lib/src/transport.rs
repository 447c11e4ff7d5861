use crate::constants::DEFAULT_BAUD_RATE;
use crate::error::DistoError;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::info;

/// Opens the byte stream a session runs on. Reconnecting is simply
/// dropping the old stream and connecting again.
pub trait Connector {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    fn connect(&self) -> impl Future<Output = Result<Self::Stream, DistoError>> + Send;
}

/// A serial device node, typically a bound RFCOMM tty, opened raw 8N1
/// without flow control.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    path: PathBuf,
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl Connector for SerialConnector {
    type Stream = SerialStream;

    async fn connect(&self) -> Result<SerialStream, DistoError> {
        info!("Opening {} at {} baud", self.path.display(), self.baud_rate);
        tokio_serial::new(self.path.to_string_lossy(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| DistoError::Open {
                path: self.path.clone(),
                source: e.into(),
            })
    }
}
