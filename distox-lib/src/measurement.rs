use crate::config::Model;
use crate::constants::{DISTANCE_HIGH_BIT, FRAME_SIZE};
use std::fmt;
use uom::si::angle::degree;
use uom::si::f64::{Angle, Length};
use uom::si::length::meter;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// DATA frame layout (8 bytes)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct DataFrameRaw {
    /// Tag, sequence bit, distance bit 16
    pub header: u8,
    /// Distance bits 0..16, millimeters
    pub distance: U16,
    pub compass: U16,
    pub clino: U16,
    /// Full roll on the A3, high byte on the X310
    pub roll: u8,
}

/// VECTOR frame layout (8 bytes), X310 only
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct VectorFrameRaw {
    pub header: u8,
    pub acceleration: U16,
    pub magnetic: U16,
    pub dip: U16,
    /// Low byte of the 16-bit roll
    pub roll_low: u8,
}

impl DataFrameRaw {
    pub fn from_frame(bytes: &[u8; FRAME_SIZE]) -> Self {
        zerocopy::transmute!(*bytes)
    }

    /// 17-bit distance magnitude in millimeters.
    pub fn distance_mm(&self) -> u32 {
        (u32::from(self.header & DISTANCE_HIGH_BIT) << 10) | u32::from(self.distance.get())
    }
}

impl VectorFrameRaw {
    pub fn from_frame(bytes: &[u8; FRAME_SIZE]) -> Self {
        zerocopy::transmute!(*bytes)
    }
}

pub fn distance(raw_mm: u32) -> Length {
    Length::new::<meter>(f64::from(raw_mm) / 1000.0)
}

pub fn compass(raw: u16) -> Angle {
    Angle::new::<degree>(f64::from(raw) * 180.0 / 32768.0)
}

/// Inverse of [`compass`], wrapping into [0, 360).
pub fn encode_compass(angle: Angle) -> u16 {
    let deg = angle.get::<degree>().rem_euclid(360.0);
    ((deg * 32768.0 / 180.0).round() as u32 % 0x1_0000) as u16
}

/// Two-sided clino scale: the upper half of the raw range counts down from 0.
/// Raw 0x8000 sits outside the (-90°, 90°] range and decodes to -180°.
pub fn clino(raw: u16) -> Angle {
    let deg = if raw < 0x8000 {
        f64::from(raw) * 90.0 / 16384.0
    } else {
        (0x1_0000 - u32::from(raw)) as f64 * -90.0 / 16384.0
    };
    Angle::new::<degree>(deg)
}

pub fn encode_clino(angle: Angle) -> u16 {
    let deg = angle.get::<degree>();
    let magnitude = (deg.abs() * 16384.0 / 90.0).round() as u32;
    if deg >= 0.0 || magnitude == 0 {
        magnitude.min(0x7FFF) as u16
    } else {
        (0x1_0000 - magnitude.min(0x8000)) as u16
    }
}

/// 8-bit roll of the A3.
pub fn roll_a3(raw: u8) -> Angle {
    Angle::new::<degree>(f64::from(raw) * 180.0 / 128.0)
}

/// 16-bit roll of the X310.
pub fn roll_x310(raw: u16) -> Angle {
    Angle::new::<degree>(f64::from(raw) * 180.0 / 32768.0)
}

/// Dip is a signed 16-bit value on an otherwise unsigned field.
pub fn dip(raw: u16) -> Angle {
    Angle::new::<degree>(f64::from(raw as i16) * 90.0 / 16384.0)
}

/// Extra fields carried by the X310 VECTOR frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VectorData {
    /// Acceleration magnitude, raw units
    pub acceleration: u16,
    /// Magnetic field magnitude, raw units
    pub magnetic: u16,
    pub dip: Angle,
}

/// A decoded survey shot.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Measurement {
    pub distance: Length,
    pub compass: Angle,
    pub clino: Angle,
    pub roll: Angle,
    pub vector: Option<VectorData>,
}

impl Measurement {
    pub fn from_a3(data: &[u8; FRAME_SIZE]) -> Self {
        let raw = DataFrameRaw::from_frame(data);
        Self {
            distance: distance(raw.distance_mm()),
            compass: compass(raw.compass.get()),
            clino: clino(raw.clino.get()),
            roll: roll_a3(raw.roll),
            vector: None,
        }
    }

    pub fn from_x310(data: &[u8; FRAME_SIZE], vector: &[u8; FRAME_SIZE]) -> Self {
        let raw = DataFrameRaw::from_frame(data);
        let vec = VectorFrameRaw::from_frame(vector);
        let roll = u16::from_be_bytes([raw.roll, vec.roll_low]);
        Self {
            distance: distance(raw.distance_mm()),
            compass: compass(raw.compass.get()),
            clino: clino(raw.clino.get()),
            roll: roll_x310(roll),
            vector: Some(VectorData {
                acceleration: vec.acceleration.get(),
                magnetic: vec.magnetic.get(),
                dip: dip(vec.dip.get()),
            }),
        }
    }

    /// Decodes one measurement; `vector` is ignored on the A3.
    pub fn decode(
        model: Model,
        data: &[u8; FRAME_SIZE],
        vector: Option<&[u8; FRAME_SIZE]>,
    ) -> Option<Self> {
        match (model, vector) {
            (Model::A3, _) => Some(Self::from_a3(data)),
            (Model::X310, Some(vector)) => Some(Self::from_x310(data, vector)),
            (Model::X310, None) => None,
        }
    }

    pub fn distance_m(&self) -> f64 {
        self.distance.get::<meter>()
    }

    pub fn compass_deg(&self) -> f64 {
        self.compass.get::<degree>()
    }

    pub fn clino_deg(&self) -> f64 {
        self.clino.get::<degree>()
    }

    pub fn roll_deg(&self) -> f64 {
        self.roll.get::<degree>()
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3} m  {:6.2}°  {:6.2}°  roll {:6.2}°",
            self.distance_m(),
            self.compass_deg(),
            self.clino_deg(),
            self.roll_deg()
        )?;
        if let Some(v) = &self.vector {
            write!(
                f,
                "  acc {}  mag {}  dip {:6.2}°",
                v.acceleration,
                v.magnetic,
                v.dip.get::<degree>()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn distance_folds_bit_six_of_byte_zero() {
        // 0x40 in byte 0 adds 0x10000 mm
        let raw = DataFrameRaw::from_frame(&[0x41, 0x34, 0x12, 0, 0, 0, 0, 0]);
        assert_eq!(raw.distance_mm(), 0x1_1234);
        assert!(close(distance(raw.distance_mm()).get::<meter>(), 70.196));
    }

    #[test]
    fn compass_scale() {
        assert!(close(compass(0x0000).get::<degree>(), 0.0));
        assert!(close(compass(0x4000).get::<degree>(), 90.0));
        assert!(close(compass(0x8000).get::<degree>(), 180.0));
        assert!(compass(0xFFFF).get::<degree>() < 360.0);
        assert_eq!(encode_compass(Angle::new::<degree>(270.0)), 0xC000);
        assert_eq!(encode_compass(Angle::new::<degree>(-90.0)), 0xC000);
    }

    #[test]
    fn roll_width_depends_on_model() {
        assert!(close(roll_a3(0x40).get::<degree>(), 90.0));
        assert!(close(roll_x310(0x4000).get::<degree>(), 90.0));
        assert!(close(roll_x310(0x0040).get::<degree>(), 0.3515625));
    }

    #[test]
    fn dip_is_signed() {
        assert!(close(dip(0x4000).get::<degree>(), 90.0));
        assert!(close(dip(0xC000).get::<degree>(), -90.0));
        assert!(close(dip(0x0000).get::<degree>(), 0.0));
    }

    #[test]
    fn a3_measurement_single_frame() {
        // distance 1234 mm, compass 0x2000 (45°), clino 0x1000 (22.5°), roll 0x20 (45°)
        let m = Measurement::from_a3(&[0x01, 0xD2, 0x04, 0x00, 0x20, 0x00, 0x10, 0x20]);
        assert!(close(m.distance_m(), 1.234));
        assert!(close(m.compass_deg(), 45.0));
        assert!(close(m.clino_deg(), 22.5));
        assert!(close(m.roll_deg(), 45.0));
        assert!(m.vector.is_none());
    }

    #[test]
    fn x310_roll_spans_both_frames() {
        let data = [0x01, 0xE8, 0x03, 0x00, 0x00, 0x00, 0x00, 0x40];
        let vector = [0x04, 0x10, 0x27, 0x20, 0x4E, 0x00, 0xE0, 0x00];
        let m = Measurement::from_x310(&data, &vector);
        assert!(close(m.distance_m(), 1.0));
        assert!(close(m.roll_deg(), 90.0));
        let v = m.vector.unwrap();
        assert_eq!(v.acceleration, 10000);
        assert_eq!(v.magnetic, 20000);
        assert!(close(v.dip.get::<degree>(), -45.0));
    }

    #[test]
    fn decode_requires_vector_on_x310() {
        let data = [0x01, 0, 0, 0, 0, 0, 0, 0];
        assert!(Measurement::decode(Model::X310, &data, None).is_none());
        assert!(Measurement::decode(Model::A3, &data, None).is_some());
    }
}
