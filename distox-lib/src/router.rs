//! Demultiplexing of the passive frame stream into typed queues.

use crate::calib::CalibrationSample;
use crate::config::Model;
use crate::error::DistoError;
use crate::frame::{Command, Frame, FrameKind, FrameTag};
use crate::measurement::Measurement;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct QueueState {
    data: VecDeque<Frame>,
    calib: VecDeque<Frame>,
    commands: VecDeque<Command>,
    data_received: usize,
    calib_received: usize,
    dropped: usize,
}

/// Shared FIFO queues: measurement frames, calibration frames and
/// host-to-device commands. Cloning yields another handle to the same
/// queues, so a reader task and a consumer may live on different threads.
#[derive(Debug, Clone, Default)]
pub struct Queues {
    inner: Arc<Mutex<QueueState>>,
}

impl Queues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_data(&self, frame: Frame) {
        let mut state = self.inner.lock();
        state.data.push_back(frame);
        state.data_received += 1;
    }

    pub fn push_calib(&self, frame: Frame) {
        let mut state = self.inner.lock();
        state.calib.push_back(frame);
        state.calib_received += 1;
    }

    pub fn data_len(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn calib_len(&self) -> usize {
        self.inner.lock().calib.len()
    }

    /// Frames ever enqueued for measurements; never decreases.
    pub fn data_received(&self) -> usize {
        self.inner.lock().data_received
    }

    /// Frames ever enqueued for calibration; never decreases.
    pub fn calib_received(&self) -> usize {
        self.inner.lock().calib_received
    }

    /// Frames discarded as noise or broken pairs.
    pub fn dropped(&self) -> usize {
        self.inner.lock().dropped
    }

    pub fn put_command(&self, command: Command) {
        self.inner.lock().commands.push_back(command);
    }

    pub fn put_command_byte(&self, byte: u8) -> Result<(), DistoError> {
        let command = Command::try_from(byte).map_err(|_| DistoError::InvalidCommand(byte))?;
        self.put_command(command);
        Ok(())
    }

    pub fn command_len(&self) -> usize {
        self.inner.lock().commands.len()
    }

    /// Removes all staged commands in the order they were queued.
    pub fn take_commands(&self) -> Vec<Command> {
        self.inner.lock().commands.drain(..).collect()
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.data.clear();
        state.calib.clear();
        state.commands.clear();
    }

    /// Pops the next complete measurement. Frames that cannot start or
    /// complete a measurement are dropped. A DATA frame still waiting for
    /// its VECTOR stays queued.
    pub fn next_measurement(&self, model: Model) -> Option<Measurement> {
        let mut state = self.inner.lock();
        loop {
            let first = *state.data.front()?;
            if first.tag() != FrameTag::Data {
                debug!("Discarding {:?} frame on measurement queue", first.tag());
                state.data.pop_front();
                state.dropped += 1;
                continue;
            }

            if !model.paired_measurements() {
                state.data.pop_front();
                return Measurement::decode(model, first.bytes(), None);
            }

            let second = *state.data.get(1)?;
            if second.tag() == FrameTag::Vector {
                state.data.pop_front();
                state.data.pop_front();
                return Measurement::decode(model, first.bytes(), Some(second.bytes()));
            }

            warn!(
                "{}",
                DistoError::PairingBroken {
                    expected: FrameTag::Vector,
                    actual: second.tag(),
                }
            );
            state.data.pop_front();
            state.dropped += 1;
        }
    }

    /// Pops the next G/M pair, with the same dropping rules as
    /// [`Self::next_measurement`].
    pub fn next_calibration(&self) -> Option<CalibrationSample> {
        let mut state = self.inner.lock();
        loop {
            let first = *state.calib.front()?;
            if first.tag() != FrameTag::GravityCalib {
                debug!("Discarding {:?} frame on calibration queue", first.tag());
                state.calib.pop_front();
                state.dropped += 1;
                continue;
            }

            let second = *state.calib.get(1)?;
            if second.tag() == FrameTag::MagneticCalib {
                state.calib.pop_front();
                state.calib.pop_front();
                return Some(CalibrationSample::from_frames(first.bytes(), second.bytes()));
            }

            warn!(
                "{}",
                DistoError::PairingBroken {
                    expected: FrameTag::MagneticCalib,
                    actual: second.tag(),
                }
            );
            state.calib.pop_front();
            state.dropped += 1;
        }
    }
}

/// Where [`PacketRouter::route`] put a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Measurement,
    Calibration,
    /// Retransmission of the previous frame; acknowledged but not queued.
    Duplicate,
}

/// Classifies streamed frames and feeds the queues.
#[derive(Debug, Clone, Default)]
pub struct PacketRouter {
    queues: Queues,
    last_sequence: Option<bool>,
}

impl PacketRouter {
    pub fn new(queues: Queues) -> Self {
        Self {
            queues,
            last_sequence: None,
        }
    }

    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    /// Forgets the sequence bit, e.g. after reopening the transport.
    pub fn reset(&mut self) {
        self.last_sequence = None;
    }

    pub fn route(&mut self, frame: Frame) -> Routed {
        let sequence = frame.sequence_bit();
        if self.last_sequence == Some(sequence) {
            debug!("Duplicate frame {}", frame);
            return Routed::Duplicate;
        }
        self.last_sequence = Some(sequence);

        match frame.kind() {
            FrameKind::GravityCalib(f) | FrameKind::MagneticCalib(f) => {
                self.queues.push_calib(f);
                Routed::Calibration
            }
            FrameKind::Data(f)
            | FrameKind::Vector(f)
            | FrameKind::Reply(f)
            | FrameKind::Unknown(f) => {
                self.queues.push_data(f);
                Routed::Measurement
            }
        }
    }
}
