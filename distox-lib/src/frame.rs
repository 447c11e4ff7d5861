use crate::constants::{
    ACK_BYTE, FRAME_SIZE, REPLY_DATA_OFFSET, REQUEST_SIZE, SEQUENCE_BIT, TAG_MASK,
};
use crate::error::DistoError;
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};
use std::fmt;
use strum_macros::Display;

/// Type tag carried in the low 6 bits of byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum FrameTag {
    Data = 0x01,
    GravityCalib = 0x02,
    MagneticCalib = 0x03,
    Vector = 0x04,
    MemoryReply = 0x38,
    BootloaderRead = 0x3A,
    BootloaderWrite = 0x3B,

    #[num_enum(catch_all)]
    Unknown(u8),
}

/// Lead byte of an addressed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    #[strum(to_string = "memory read")]
    MemoryRead = 0x38,
    #[strum(to_string = "memory write")]
    MemoryWrite = 0x39,
    #[strum(to_string = "bootloader read")]
    BootloaderRead = 0x3A,
    #[strum(to_string = "bootloader write")]
    BootloaderWrite = 0x3B,
}

impl Opcode {
    /// Opcode byte the device echoes in byte 0 of its reply.
    pub fn reply_opcode(self) -> u8 {
        match self {
            // memory writes are acknowledged with a read reply
            Opcode::MemoryWrite => Opcode::MemoryRead.into(),
            other => other.into(),
        }
    }
}

/// Single-byte mode commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Command {
    #[strum(to_string = "stop calibration")]
    StopCalibration = 0x30,
    #[strum(to_string = "start calibration")]
    StartCalibration = 0x31,
    #[strum(to_string = "stop silent")]
    StopSilent = 0x32,
    #[strum(to_string = "start silent")]
    StartSilent = 0x33,
}

impl Command {
    pub fn calibration(on: bool) -> Self {
        if on { Command::StartCalibration } else { Command::StopCalibration }
    }

    pub fn silent(on: bool) -> Self {
        if on { Command::StartSilent } else { Command::StopSilent }
    }
}

/// A fixed 8-byte wire unit.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Frame([u8; FRAME_SIZE]);

impl Frame {
    pub const fn new(bytes: [u8; FRAME_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.0
    }

    pub fn tag(&self) -> FrameTag {
        FrameTag::from_primitive(self.0[0] & TAG_MASK)
    }

    /// Full byte 0; replies echo the request opcode here.
    pub fn opcode(&self) -> u8 {
        self.0[0]
    }

    /// Bytes 1-2 of a reply, little-endian.
    pub fn echoed_address(&self) -> u16 {
        u16::from_le_bytes([self.0[1], self.0[2]])
    }

    /// Bytes 3..7 of a memory reply.
    pub fn reply_data(&self) -> [u8; 4] {
        [
            self.0[REPLY_DATA_OFFSET],
            self.0[REPLY_DATA_OFFSET + 1],
            self.0[REPLY_DATA_OFFSET + 2],
            self.0[REPLY_DATA_OFFSET + 3],
        ]
    }

    pub fn sequence_bit(&self) -> bool {
        self.0[0] & SEQUENCE_BIT != 0
    }

    /// Byte the host sends back to acknowledge a streamed frame.
    pub fn ack_byte(&self) -> u8 {
        (self.0[0] & SEQUENCE_BIT) | ACK_BYTE
    }

    /// Checks a reply against the request that produced it.
    pub fn verify_reply(self, opcode: u8, address: u16) -> Result<Self, DistoError> {
        if self.opcode() != opcode {
            return Err(DistoError::WrongOpcode {
                expected: opcode,
                actual: self.opcode(),
            });
        }
        if self.echoed_address() != address {
            return Err(DistoError::WrongAddress {
                expected: address,
                actual: self.echoed_address(),
            });
        }
        Ok(self)
    }

    pub fn kind(self) -> FrameKind {
        match self.tag() {
            FrameTag::Data => FrameKind::Data(self),
            FrameTag::Vector => FrameKind::Vector(self),
            FrameTag::GravityCalib => FrameKind::GravityCalib(self),
            FrameTag::MagneticCalib => FrameKind::MagneticCalib(self),
            FrameTag::MemoryReply | FrameTag::BootloaderRead | FrameTag::BootloaderWrite => {
                FrameKind::Reply(self)
            }
            FrameTag::Unknown(_) => FrameKind::Unknown(self),
        }
    }
}

impl From<[u8; FRAME_SIZE]> for Frame {
    fn from(bytes: [u8; FRAME_SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Frame {
    type Error = DistoError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; FRAME_SIZE] = bytes
            .try_into()
            .map_err(|_| DistoError::InvalidLength(bytes.len()))?;
        Ok(Self(array))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", hex::encode(self.0))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Tagged-variant view of a frame, used by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Data(Frame),
    Vector(Frame),
    GravityCalib(Frame),
    MagneticCalib(Frame),
    Reply(Frame),
    Unknown(Frame),
}

pub fn parse_frame(bytes: [u8; FRAME_SIZE]) -> FrameKind {
    Frame::new(bytes).kind()
}

/// Builds the bytes of an addressed request, optionally followed by a payload.
pub fn encode_request(opcode: Opcode, address: u16, payload: &[u8]) -> Bytes {
    let mut request = BytesMut::with_capacity(REQUEST_SIZE + payload.len());
    request.put_u8(opcode.into());
    request.put_u16_le(address);
    request.extend_from_slice(payload);
    request.freeze()
}
