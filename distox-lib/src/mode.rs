use crate::config::Model;
use crate::frame::Frame;
use modular_bitfield::prelude::*;
use std::fmt;
use strum_macros::Display;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Status byte of the A3 (address 0x8000).
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct A3Status {
    pub grad: bool,
    pub bluetooth: bool,
    pub compass: bool,
    pub calibration: bool,
    pub silent: bool,
    #[skip]
    unused: B3,
}

/// 16-bit mode register of the X310.
#[bitfield(bytes = 2)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct X310Mode {
    pub distance_unit: B3,
    pub angle_grad: bool,
    pub endpiece: bool,
    pub calibration: bool,
    pub display_light: bool,
    pub beep: bool,
    pub triple_shot: bool,
    pub bluetooth: bool,
    pub locked_power: bool,
    pub calibration_session: bool,
    pub alkaline: bool,
    pub silent: bool,
    pub reverse_shot: bool,
    #[skip]
    unused: bool,
}

/// Mode bits a caller may query or toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ModeFlag {
    #[strum(to_string = "calibration")]
    Calibration,
    #[strum(to_string = "silent")]
    Silent,
    #[strum(to_string = "grad")]
    Grad,
    #[strum(to_string = "compass")]
    Compass,
}

impl ModeFlag {
    /// Bit mask of this flag in the model's status register, if it has one.
    pub fn mask(self, model: Model) -> Option<u16> {
        match (self, model) {
            (ModeFlag::Calibration, Model::A3) => Some(0x08),
            (ModeFlag::Calibration, Model::X310) => Some(0x20),
            (ModeFlag::Silent, Model::A3) => Some(0x10),
            (ModeFlag::Silent, Model::X310) => Some(0x2000),
            (ModeFlag::Grad, Model::A3) => Some(0x01),
            (ModeFlag::Grad, Model::X310) => Some(0x08),
            (ModeFlag::Compass, Model::A3) => Some(0x04),
            (ModeFlag::Compass, Model::X310) => None,
        }
    }
}

/// Snapshot of the device's status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceMode {
    pub model: Model,
    pub bits: u16,
}

impl DeviceMode {
    pub fn new(model: Model, bits: u16) -> Self {
        let bits = match model {
            Model::A3 => bits & 0x00FF,
            Model::X310 => bits,
        };
        Self { model, bits }
    }

    /// Extracts the mode from a status read reply: one byte on the A3,
    /// a little-endian word on the X310.
    pub fn from_reply(model: Model, reply: &Frame) -> Self {
        let data = reply.reply_data();
        match model {
            Model::A3 => Self::new(model, u16::from(data[0])),
            Model::X310 => Self::new(model, u16::from_le_bytes([data[0], data[1]])),
        }
    }

    pub fn is_set(&self, flag: ModeFlag) -> bool {
        flag.mask(self.model).is_some_and(|mask| self.bits & mask != 0)
    }

    /// The mode with exactly `flag` flipped. Flags without a bit on this
    /// model leave the mode unchanged.
    pub fn toggled(&self, flag: ModeFlag) -> Self {
        match flag.mask(self.model) {
            Some(mask) => Self::new(self.model, self.bits ^ mask),
            None => *self,
        }
    }

    pub fn a3_status(&self) -> A3Status {
        A3Status::from_bytes([self.bits as u8])
    }

    pub fn x310_mode(&self) -> X310Mode {
        X310Mode::from_bytes(self.bits.to_le_bytes())
    }

    pub fn calibration(&self) -> bool {
        self.is_set(ModeFlag::Calibration)
    }

    pub fn silent(&self) -> bool {
        self.is_set(ModeFlag::Silent)
    }
}

fn on_off(f: &mut fmt::Formatter<'_>, name: &str, on: bool) -> fmt::Result {
    write!(f, " {name}:{}", if on { "on" } else { "off" })
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.model {
            Model::A3 => {
                let s = self.a3_status();
                write!(f, "{:#04x}", self.bits)?;
                on_off(f, "calib", s.calibration())?;
                on_off(f, "silent", s.silent())?;
                on_off(f, "grad", s.grad())?;
                on_off(f, "compass", s.compass())?;
                on_off(f, "bt", s.bluetooth())
            }
            Model::X310 => {
                let m = self.x310_mode();
                write!(f, "{:#06x} unit:{}", self.bits, m.distance_unit())?;
                on_off(f, "calib", m.calibration())?;
                on_off(f, "silent", m.silent())?;
                on_off(f, "grad", m.angle_grad())?;
                on_off(f, "beep", m.beep())?;
                on_off(f, "light", m.display_light())?;
                on_off(f, "bt", m.bluetooth())
            }
        }
    }
}
