use crate::channel::PacketChannel;
use crate::config::Model;
use crate::constants::DRAIN_QUIET;
use crate::error::DistoError;
use crate::frame::{Command, Opcode};
use crate::mode::{DeviceMode, ModeFlag};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Reads and toggles device mode bits, verifying every change by
/// reading the status register back.
pub struct ModeController<'a, S> {
    channel: &'a mut PacketChannel<S>,
    model: Model,
    status_address: u16,
    attempts: usize,
}

impl<'a, S> ModeController<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        channel: &'a mut PacketChannel<S>,
        model: Model,
        status_address: u16,
        attempts: usize,
    ) -> Self {
        Self {
            channel,
            model,
            status_address,
            attempts: attempts.max(1),
        }
    }

    async fn read_mode_once(&mut self) -> Result<DeviceMode, DistoError> {
        let reply = self.channel.request(Opcode::MemoryRead, self.status_address).await?;
        Ok(DeviceMode::from_reply(self.model, &reply))
    }

    /// Reads the status register, retrying non-fatal faults.
    pub async fn read_mode(&mut self) -> Result<DeviceMode, DistoError> {
        let mut last_err = None;
        for attempt in 1..=self.attempts {
            match self.read_mode_once().await {
                Ok(mode) => {
                    debug!("Mode {}", mode);
                    return Ok(mode);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Status read attempt {}/{} failed: {}", attempt, self.attempts, e);
                    self.channel.drain(DRAIN_QUIET).await?;
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(DistoError::NoReply(self.channel.read_timeout())))
    }

    pub async fn set_calibration(&mut self, on: bool) -> Result<DeviceMode, DistoError> {
        self.set_flag(ModeFlag::Calibration, on).await
    }

    pub async fn set_silent(&mut self, on: bool) -> Result<DeviceMode, DistoError> {
        self.set_flag(ModeFlag::Silent, on).await
    }

    pub async fn set_grad(&mut self, _on: bool) -> Result<DeviceMode, DistoError> {
        Err(DistoError::UnsupportedOperation("grad mode"))
    }

    pub async fn set_compass(&mut self, _on: bool) -> Result<DeviceMode, DistoError> {
        Err(DistoError::UnsupportedOperation("compass/clino mode"))
    }

    /// Flips the calibration bit, whatever its current state.
    pub async fn toggle_calibration(&mut self) -> Result<DeviceMode, DistoError> {
        let current = self.read_mode().await?;
        let command = Command::calibration(!current.calibration());
        self.toggle(current, ModeFlag::Calibration, command).await
    }

    async fn set_flag(&mut self, flag: ModeFlag, on: bool) -> Result<DeviceMode, DistoError> {
        let command = match flag {
            ModeFlag::Calibration => Command::calibration(on),
            ModeFlag::Silent => Command::silent(on),
            ModeFlag::Grad => return self.set_grad(on).await,
            ModeFlag::Compass => return self.set_compass(on).await,
        };

        let current = self.read_mode().await?;
        if current.is_set(flag) == on {
            debug!("{} mode already {}", flag, if on { "on" } else { "off" });
            return Ok(current);
        }
        self.toggle(current, flag, command).await
    }

    async fn toggle(
        &mut self,
        current: DeviceMode,
        flag: ModeFlag,
        command: Command,
    ) -> Result<DeviceMode, DistoError> {
        let expected = current.toggled(flag);
        let mut last_seen = None;

        for attempt in 1..=self.attempts {
            debug!("Sending {} ({}/{})", command, attempt, self.attempts);
            if let Err(e) = self.channel.send_byte(command.into()).await {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!("Sending {} failed: {}", command, e);
                continue;
            }

            match self.read_mode_once().await {
                Ok(mode) if mode == expected => {
                    info!("{} mode now {}", flag, if mode.is_set(flag) { "on" } else { "off" });
                    return Ok(mode);
                }
                Ok(mode) => {
                    warn!(
                        "Expected mode {:#06x}, device reports {:#06x}",
                        expected.bits, mode.bits
                    );
                    last_seen = Some(mode.bits);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Verifying {} failed: {}", command, e);
                    self.channel.drain(DRAIN_QUIET).await?;
                }
            }
        }

        Err(DistoError::ModeToggleFailed {
            expected: expected.bits,
            actual: last_seen,
        })
    }
}
