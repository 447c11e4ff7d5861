use crate::constants::{
    COEFF_BUFFER_LEN, COEFF_LINEAR_LEN, COEFF_NONLINEAR_LEN, FM, FN, FRAME_SIZE, FV,
};
use crate::error::DistoError;
use std::fmt;
use zerocopy::byteorder::little_endian::I16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// G or M calibration frame layout (8 bytes)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CalibFrameRaw {
    pub header: u8,
    pub x: I16,
    pub y: I16,
    pub z: I16,
    pub reserved: u8,
}

impl CalibFrameRaw {
    pub fn from_frame(bytes: &[u8; FRAME_SIZE]) -> Self {
        zerocopy::transmute!(*bytes)
    }

    pub fn vector(&self) -> [i16; 3] {
        [self.x.get(), self.y.get(), self.z.get()]
    }
}

/// Raw sensor triples streamed while the device is in calibration mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationSample {
    pub gravity: [i16; 3],
    pub magnetic: [i16; 3],
}

impl CalibrationSample {
    pub fn from_frames(g: &[u8; FRAME_SIZE], m: &[u8; FRAME_SIZE]) -> Self {
        Self {
            gravity: CalibFrameRaw::from_frame(g).vector(),
            magnetic: CalibFrameRaw::from_frame(m).vector(),
        }
    }
}

impl fmt::Display for CalibrationSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [gx, gy, gz] = self.gravity;
        let [mx, my, mz] = self.magnetic;
        write!(
            f,
            "{:04x} {:04x} {:04x} {:04x} {:04x} {:04x}",
            gx as u16, gy as u16, gz as u16, mx as u16, my as u16, mz as u16
        )
    }
}

pub fn decode_bias(word: i16) -> f64 {
    f64::from(word) / FV
}

pub fn encode_bias(value: f64) -> i16 {
    to_word(value * FV)
}

pub fn decode_matrix(word: i16) -> f64 {
    f64::from(word) / FM
}

pub fn encode_matrix(value: f64) -> i16 {
    to_word(value * FM)
}

fn to_word(scaled: f64) -> i16 {
    scaled.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

/// Nonlinear coefficient byte: biased by one, wrapping into [-128, 127].
pub fn decode_nonlinear(byte: u8) -> f64 {
    f64::from(byte.wrapping_add(1) as i8) / FN
}

/// Exact inverse of [`decode_nonlinear`].
pub fn encode_nonlinear(value: f64) -> u8 {
    let v = (value * FN).round().clamp(-128.0, 127.0) as i8;
    (v as u8).wrapping_sub(1)
}

/// Bias vector and 3x3 matrix of one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorCoefficients {
    pub bias: [f64; 3],
    pub matrix: [[f64; 3]; 3],
}

impl SensorCoefficients {
    /// Decodes 12 words: X bias, X row, Y bias, Y row, Z bias, Z row.
    fn from_words(words: &[i16]) -> Self {
        let mut coeff = Self::default();
        for axis in 0..3 {
            let block = &words[axis * 4..axis * 4 + 4];
            coeff.bias[axis] = decode_bias(block[0]);
            for col in 0..3 {
                coeff.matrix[axis][col] = decode_matrix(block[1 + col]);
            }
        }
        coeff
    }

    fn to_words(&self) -> [i16; 12] {
        let mut words = [0i16; 12];
        for axis in 0..3 {
            words[axis * 4] = encode_bias(self.bias[axis]);
            for col in 0..3 {
                words[axis * 4 + 1 + col] = encode_matrix(self.matrix[axis][col]);
            }
        }
        words
    }
}

/// Calibration coefficients as stored in device memory.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationCoefficients {
    pub gravity: SensorCoefficients,
    pub magnetic: SensorCoefficients,
    pub nonlinear: Option<[f64; 3]>,
}

impl CalibrationCoefficients {
    /// Parses a coefficient buffer of 48 bytes, or 51 to 52 bytes with the
    /// nonlinear tail. Nonlinear terms are present when bytes 48..51 are
    /// not all 0xff padding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DistoError> {
        if bytes.len() < COEFF_LINEAR_LEN {
            return Err(DistoError::InsufficientData {
                expected: COEFF_LINEAR_LEN,
                actual: bytes.len(),
            });
        }
        // a nonlinear tail is all three bytes or nothing
        let partial_tail = (COEFF_LINEAR_LEN + 1..COEFF_NONLINEAR_LEN).contains(&bytes.len());
        if partial_tail || bytes.len() > COEFF_BUFFER_LEN {
            return Err(DistoError::InvalidLength(bytes.len()));
        }

        let words: Vec<i16> = bytes[..COEFF_LINEAR_LEN]
            .chunks_exact(2)
            .map(|w| i16::from_le_bytes([w[0], w[1]]))
            .collect();

        let nonlinear = match bytes.get(COEFF_LINEAR_LEN..COEFF_NONLINEAR_LEN) {
            Some(nl) if nl.iter().any(|&b| b != 0xFF) => {
                Some([decode_nonlinear(nl[0]), decode_nonlinear(nl[1]), decode_nonlinear(nl[2])])
            }
            _ => None,
        };

        Ok(Self {
            gravity: SensorCoefficients::from_words(&words[..12]),
            magnetic: SensorCoefficients::from_words(&words[12..]),
            nonlinear,
        })
    }

    /// Encodes into the full coefficient window, padding with 0xff.
    pub fn to_bytes(&self) -> [u8; COEFF_BUFFER_LEN] {
        let mut bytes = [0xFFu8; COEFF_BUFFER_LEN];
        let words = self.gravity.to_words().into_iter().chain(self.magnetic.to_words());
        for (i, word) in words.enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&word.to_le_bytes());
        }
        if let Some(nl) = self.nonlinear {
            for (i, value) in nl.into_iter().enumerate() {
                bytes[COEFF_LINEAR_LEN + i] = encode_nonlinear(value);
            }
        }
        bytes
    }

    /// Number of meaningful bytes in [`Self::to_bytes`].
    pub fn encoded_len(&self) -> usize {
        if self.nonlinear.is_some() { COEFF_NONLINEAR_LEN } else { COEFF_LINEAR_LEN }
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, label: &str, row: &[f64; 3]) -> fmt::Result {
    writeln!(f, "{label:<4} {:8.4} {:8.4} {:8.4}", row[0], row[1], row[2])
}

impl fmt::Display for CalibrationCoefficients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Calibration coefficients.")?;
        write_row(f, "BG:", &self.gravity.bias)?;
        write_row(f, "AGx:", &self.gravity.matrix[0])?;
        write_row(f, "AGy:", &self.gravity.matrix[1])?;
        write_row(f, "AGz:", &self.gravity.matrix[2])?;
        write_row(f, "BM:", &self.magnetic.bias)?;
        write_row(f, "AMx:", &self.magnetic.matrix[0])?;
        write_row(f, "AMy:", &self.magnetic.matrix[1])?;
        write_row(f, "AMz:", &self.magnetic.matrix[2])?;
        if let Some(nl) = &self.nonlinear {
            write_row(f, "NL:", nl)?;
        }
        Ok(())
    }
}
