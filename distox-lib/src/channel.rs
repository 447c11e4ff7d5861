use crate::constants::FRAME_SIZE;
use crate::error::DistoError;
use crate::frame::{Frame, Opcode, encode_request};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, trace};

/// Addressed request/reply exchange over a half-duplex byte stream.
///
/// Every read is bounded by the configured timeout. The channel never
/// retries; callers decide what to do with each fault.
pub struct PacketChannel<S> {
    stream: S,
    read_timeout: Duration,
}

impl<S> PacketChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        Self { stream, read_timeout }
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Writes raw bytes and flushes them to the transport.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), DistoError> {
        trace!("-> {}", hex::encode(bytes));
        timeout(self.read_timeout, self.stream.write_all(bytes)).await??;
        timeout(self.read_timeout, self.stream.flush()).await??;
        Ok(())
    }

    /// Single-byte write, used for acknowledgements and mode commands.
    pub async fn send_byte(&mut self, byte: u8) -> Result<(), DistoError> {
        self.write_all(&[byte]).await
    }

    /// Reads exactly one frame or fails once the read timeout expires.
    pub async fn read_frame(&mut self) -> Result<Frame, DistoError> {
        let mut buf = [0u8; FRAME_SIZE];
        let mut filled = 0;
        let deadline = Instant::now() + self.read_timeout;

        while filled < FRAME_SIZE {
            match timeout_at(deadline, self.stream.read(&mut buf[filled..])).await {
                Err(_) if filled == 0 => return Err(DistoError::NoReply(self.read_timeout)),
                Err(_) => {
                    return Err(DistoError::PartialReply {
                        expected: FRAME_SIZE,
                        actual: filled,
                    });
                }
                Ok(Ok(0)) => return Err(DistoError::TransportClosed),
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) => return Err(DistoError::Transport(e)),
            }
        }

        let frame = Frame::new(buf);
        trace!("<- {}", frame);
        Ok(frame)
    }

    /// Sends `{opcode, addrLo, addrHi}` and validates the echoed reply.
    pub async fn request(&mut self, opcode: Opcode, address: u16) -> Result<Frame, DistoError> {
        self.request_with_payload(opcode, address, &[]).await
    }

    /// Like [`Self::request`] with data appended to the request header,
    /// as memory and page writes do.
    pub async fn request_with_payload(
        &mut self,
        opcode: Opcode,
        address: u16,
        payload: &[u8],
    ) -> Result<Frame, DistoError> {
        let request = encode_request(opcode, address, payload);
        debug!("{} request at {:#06x} ({} payload bytes)", opcode, address, payload.len());
        self.write_all(&request).await?;

        let reply = self.read_frame().await?;
        debug!("{} reply: {}", opcode, reply);
        reply.verify_reply(opcode.reply_opcode(), address)
    }

    /// Discards input until the line stays quiet for `quiet`.
    /// Used to resynchronise after a partial or stray frame.
    pub async fn drain(&mut self, quiet: Duration) -> Result<usize, DistoError> {
        let mut scratch = [0u8; 64];
        let mut discarded = 0;
        loop {
            match timeout(quiet, self.stream.read(&mut scratch)).await {
                Err(_) => break,
                Ok(Ok(0)) => return Err(DistoError::TransportClosed),
                Ok(Ok(n)) => discarded += n,
                Ok(Err(e)) => return Err(DistoError::Transport(e)),
            }
        }
        if discarded > 0 {
            debug!("Drained {} stray bytes", discarded);
        }
        Ok(discarded)
    }
}
