use crate::calib::CalibrationCoefficients;
use crate::channel::PacketChannel;
use crate::config::Model;
use crate::constants::{
    COEFF_ADDRESS, DRAIN_QUIET, FRAME_SIZE, MEMORY_WORD_SIZE, QUEUE_WRAP_A3, QUEUE_WRAP_X310,
};
use crate::error::DistoError;
use crate::frame::Opcode;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Distance from `tail` to `head` on a ring of `modulus` slots.
pub fn queue_distance(head: u16, tail: u16, modulus: u16) -> usize {
    (i32::from(head) - i32::from(tail)).rem_euclid(i32::from(modulus)) as usize
}

/// Pointers of the device's internal measurement store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HeadTail {
    pub head: u16,
    pub tail: u16,
}

impl HeadTail {
    pub fn from_word(word: [u8; MEMORY_WORD_SIZE]) -> Self {
        Self {
            head: u16::from_le_bytes([word[0], word[1]]),
            tail: u16::from_le_bytes([word[2], word[3]]),
        }
    }

    /// Frames the device still has to stream. The A3 counts bytes,
    /// the X310 counts two-frame records.
    pub fn pending_frames(&self, model: Model) -> usize {
        match model {
            Model::A3 => queue_distance(self.head, self.tail, QUEUE_WRAP_A3) / FRAME_SIZE,
            Model::X310 => queue_distance(self.head, self.tail, QUEUE_WRAP_X310) * 2,
        }
    }
}

/// Addressed access to device memory: status, queue pointers and
/// calibration coefficients.
pub struct MemoryAccess<'a, S> {
    channel: &'a mut PacketChannel<S>,
    attempts: usize,
}

impl<'a, S> MemoryAccess<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(channel: &'a mut PacketChannel<S>, attempts: usize) -> Self {
        Self {
            channel,
            attempts: attempts.max(1),
        }
    }

    pub async fn read_word(&mut self, address: u16) -> Result<[u8; MEMORY_WORD_SIZE], DistoError> {
        let mut last_err = None;
        for attempt in 1..=self.attempts {
            match self.channel.request(Opcode::MemoryRead, address).await {
                Ok(reply) => return Ok(reply.reply_data()),
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Read at {:#06x} attempt {}/{} failed: {}",
                        address, attempt, self.attempts, e
                    );
                    self.channel.drain(DRAIN_QUIET).await?;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(DistoError::NoReply(self.channel.read_timeout())))
    }

    /// Writes one 4-byte word; the device acknowledges with a read reply.
    pub async fn write_word(
        &mut self,
        address: u16,
        word: [u8; MEMORY_WORD_SIZE],
    ) -> Result<(), DistoError> {
        let mut last_err = None;
        for attempt in 1..=self.attempts {
            match self.channel.request_with_payload(Opcode::MemoryWrite, address, &word).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Write at {:#06x} attempt {}/{} failed: {}",
                        address, attempt, self.attempts, e
                    );
                    self.channel.drain(DRAIN_QUIET).await?;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(DistoError::NoReply(self.channel.read_timeout())))
    }

    /// Reads `len` bytes starting at `start`, one word per request.
    pub async fn read_range(&mut self, start: u16, len: usize) -> Result<Vec<u8>, DistoError> {
        let mut data = Vec::with_capacity(len.next_multiple_of(MEMORY_WORD_SIZE));
        for offset in (0..len).step_by(MEMORY_WORD_SIZE) {
            let address = u16::try_from(offset)
                .ok()
                .and_then(|o| start.checked_add(o))
                .ok_or(DistoError::InvalidLength(len))?;
            data.extend_from_slice(&self.read_word(address).await?);
        }
        data.truncate(len);
        Ok(data)
    }

    pub async fn write_range(&mut self, start: u16, data: &[u8]) -> Result<(), DistoError> {
        for (i, chunk) in data.chunks(MEMORY_WORD_SIZE).enumerate() {
            let address = u16::try_from(i * MEMORY_WORD_SIZE)
                .ok()
                .and_then(|o| start.checked_add(o))
                .ok_or(DistoError::InvalidLength(data.len()))?;
            let mut word = [0xFFu8; MEMORY_WORD_SIZE];
            word[..chunk.len()].copy_from_slice(chunk);
            self.write_word(address, word).await?;
        }
        Ok(())
    }

    pub async fn read_head_tail(&mut self, model: Model) -> Result<HeadTail, DistoError> {
        let word = self.read_word(model.head_tail_address()).await?;
        let head_tail = HeadTail::from_word(word);
        debug!("Head {:#06x} tail {:#06x}", head_tail.head, head_tail.tail);
        Ok(head_tail)
    }

    pub async fn read_coefficients(
        &mut self,
        model: Model,
    ) -> Result<CalibrationCoefficients, DistoError> {
        let bytes = self.read_range(COEFF_ADDRESS, model.coefficient_len()).await?;
        CalibrationCoefficients::from_bytes(&bytes)
    }

    pub async fn write_coefficients(
        &mut self,
        model: Model,
        coefficients: &CalibrationCoefficients,
    ) -> Result<(), DistoError> {
        let bytes = coefficients.to_bytes();
        let len = model.coefficient_len();
        info!("Writing {} coefficient bytes", len);
        self.write_range(COEFF_ADDRESS, &bytes[..len]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_distance_wraps() {
        assert_eq!(queue_distance(10, 4, 1064), 6);
        assert_eq!(queue_distance(2, 1060, 1064), 6);
        assert_eq!(queue_distance(7, 7, 1064), 0);
    }

    #[test]
    fn pending_frames_per_model() {
        let ht = HeadTail::from_word([0x40, 0x00, 0x00, 0x00]);
        assert_eq!(ht.pending_frames(Model::A3), 8);
        assert_eq!(ht.pending_frames(Model::X310), 128);

        let wrapped = HeadTail { head: 0x0008, tail: 0x7FF8 };
        assert_eq!(wrapped.pending_frames(Model::A3), 2);
    }
}
