// Protocol constants for the DistoX family

use std::time::Duration;

/// Size of every frame exchanged with the device (8 bytes)
pub const FRAME_SIZE: usize = 8;

/// Size of an addressed request: opcode + 16-bit little-endian address
pub const REQUEST_SIZE: usize = 3;

/// Data bytes carried by a memory reply (bytes 3..7)
pub const MEMORY_WORD_SIZE: usize = 4;

/// Offset of the data bytes inside a memory reply
pub const REPLY_DATA_OFFSET: usize = 3;

/// Low 6 bits of byte 0 carry the frame type tag
pub const TAG_MASK: u8 = 0x3F;

/// Bit 7 of byte 0 is the sequence bit on streamed frames
pub const SEQUENCE_BIT: u8 = 0x80;

/// Bit 6 of byte 0 is bit 16 of the distance
pub const DISTANCE_HIGH_BIT: u8 = 0x40;

/// Base of the acknowledge byte; the sequence bit is OR'd in
pub const ACK_BYTE: u8 = 0x55;

/// Status byte address on the A3
pub const STATUS_ADDRESS_A3: u16 = 0x8000;

/// Mode register address on the X310 (firmware 2.4 and later)
pub const STATUS_ADDRESS_X310: u16 = 0xC044;

/// Head/tail pointers of the A3 internal queue
pub const HEAD_TAIL_ADDRESS_A3: u16 = 0xC020;

/// Head/tail pointers of the X310 internal queue
pub const HEAD_TAIL_ADDRESS_X310: u16 = 0xE008;

/// The A3 data queue wraps at 0x8000 bytes, 8 bytes per frame
pub const QUEUE_WRAP_A3: u16 = 0x8000;

/// The X310 data queue wraps at 1064 records
pub const QUEUE_WRAP_X310: u16 = 1064;

/// Base address of the calibration coefficients
pub const COEFF_ADDRESS: u16 = 0x8010;

/// Linear coefficients: 24 signed 16-bit words
pub const COEFF_LINEAR_LEN: usize = 48;

/// Linear coefficients plus 3 nonlinear bytes
pub const COEFF_NONLINEAR_LEN: usize = 51;

/// Size of the coefficient window in device memory
pub const COEFF_BUFFER_LEN: usize = 52;

/// Fixed-point scale of bias entries
pub const FV: f64 = 24000.0;

/// Fixed-point scale of matrix entries (2^14)
pub const FM: f64 = 16384.0;

/// Fixed-point scale of nonlinear entries
pub const FN: f64 = 1638.4;

/// Bootloader page size
pub const PAGE_SIZE: usize = 256;

/// Number of 8-byte reads that carry one page
pub const PAGE_FRAMES: usize = PAGE_SIZE / FRAME_SIZE;

/// Bootloader page addresses are a single byte
pub const PAGE_COUNT: usize = 256;

/// Pages 0x00..0x08 hold the bootloader and are never bulk-written
pub const PROTECTED_PAGES: usize = 0x08;

/// End of the code area (16 KiB)
pub const FIRMWARE_END_PAGE: usize = 0x40;

/// Attempts for addressed operations
pub const DEFAULT_ATTEMPTS: usize = 3;

/// Timeout-retry budget of the passive download loop
pub const DEFAULT_DOWNLOAD_RETRIES: i32 = 3;

/// Default per-read timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Quiet period used when draining stale bytes before a retry
pub const DRAIN_QUIET: Duration = Duration::from_millis(50);

/// Default serial device
pub const DEFAULT_DEVICE: &str = "/dev/rfcomm0";

/// Line speed for wired adapters; ignored by RFCOMM ttys
pub const DEFAULT_BAUD_RATE: u32 = 9600;
