//! Fixed-size header frame.
//!
//! # Frame layout
//!
//! ```text
//! offset  size  field
//! 0       1     operation (low nibble) | flags (high nibble)
//! 1       3     reserved, zero
//! 4       4     payload_size, u32 big-endian
//! 8       32    checksum, reserved
//! 40      984   zero padding
//! ```
//!
//! Operation codes are one-hot: ACK=0x1, NAK=0x2, ROTATE=0x4, EXIT=0x8.
//! Flag bits: ROTATE_180=0x1, ROTATE_270=0x2, ENCRYPTED=0x4, CHECKSUM=0x8.

use std::fmt;
use std::ops::BitOr;

use imgrot_transform::Angle;

use crate::error::ChannelError;
use crate::{CHECKSUM_LEN, FRAME_SIZE};

const OP_FLAGS_OFFSET: usize = 0;
const SIZE_OFFSET: usize = 4;
const CHECKSUM_OFFSET: usize = 8;

/// Request/response operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    Ack = 0x1,
    Nak = 0x2,
    Rotate = 0x4,
    Exit = 0x8,
}

impl Operation {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x1 => Some(Operation::Ack),
            0x2 => Some(Operation::Nak),
            0x4 => Some(Operation::Rotate),
            0x8 => Some(Operation::Exit),
            _ => None,
        }
    }
}

/// 4-bit flag set carried next to the operation.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const ROTATE_180: Flags = Flags(0x1);
    pub const ROTATE_270: Flags = Flags(0x2);
    /// Reserved; never set by this implementation.
    pub const ENCRYPTED: Flags = Flags(0x4);
    /// Reserved; never set by this implementation.
    pub const CHECKSUM: Flags = Flags(0x8);

    const MASK: u8 = 0x0F;

    /// Builds a flag set from raw bits. Bits above the low nibble are dropped.
    pub fn from_bits(bits: u8) -> Self {
        Flags(bits & Self::MASK)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// The requested angle, if exactly one rotation bit is set and nothing
    /// else. ENCRYPTED and CHECKSUM are not supported, so any reserved bit
    /// makes the request invalid.
    pub fn angle(self) -> Option<Angle> {
        match self.0 {
            0x1 => Some(Angle::Rotate180),
            0x2 => Some(Angle::Rotate270),
            _ => None,
        }
    }
}

impl From<Angle> for Flags {
    fn from(angle: Angle) -> Self {
        match angle {
            Angle::Rotate180 => Flags::ROTATE_180,
            Angle::Rotate270 => Flags::ROTATE_270,
        }
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({:#06b})", self.0)
    }
}

/// A decoded header frame.
///
/// The payload itself is never part of the packet; exactly `payload_size`
/// bytes follow the frame on the stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub operation: Operation,
    pub flags: Flags,
    pub payload_size: u32,
    pub checksum: [u8; CHECKSUM_LEN],
}

impl Packet {
    pub fn new(operation: Operation, flags: Flags, payload_size: u32) -> Self {
        Self {
            operation,
            flags,
            payload_size,
            checksum: [0; CHECKSUM_LEN],
        }
    }

    /// ROTATE request with exactly one rotation bit set.
    pub fn rotate(angle: Angle, payload_size: u32) -> Self {
        Self::new(Operation::Rotate, Flags::from(angle), payload_size)
    }

    pub fn ack(payload_size: u32) -> Self {
        Self::new(Operation::Ack, Flags::NONE, payload_size)
    }

    pub fn nak() -> Self {
        Self::new(Operation::Nak, Flags::NONE, 0)
    }

    pub fn exit() -> Self {
        Self::new(Operation::Exit, Flags::NONE, 0)
    }

    /// Encodes into a full, zero-padded frame.
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut frame = [0u8; FRAME_SIZE];
        frame[OP_FLAGS_OFFSET] = (self.operation.code() & 0x0F) | (self.flags.bits() << 4);
        frame[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&self.payload_size.to_be_bytes());
        frame[CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_LEN].copy_from_slice(&self.checksum);
        frame
    }

    /// Decodes a frame.
    ///
    /// `buf` must hold at least [`FRAME_SIZE`] bytes; anything shorter is a
    /// protocol error. Bytes past the frame are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, ChannelError> {
        if buf.len() < FRAME_SIZE {
            return Err(ChannelError::Protocol(format!(
                "short header: {} bytes (need {FRAME_SIZE})",
                buf.len()
            )));
        }

        let op_flags = buf[OP_FLAGS_OFFSET];
        let code = op_flags & 0x0F;
        let operation = Operation::from_code(code).ok_or_else(|| {
            ChannelError::Protocol(format!("unknown operation code {code:#x}"))
        })?;
        let flags = Flags::from_bits(op_flags >> 4);

        let mut size = [0u8; 4];
        size.copy_from_slice(&buf[SIZE_OFFSET..SIZE_OFFSET + 4]);

        let mut checksum = [0u8; CHECKSUM_LEN];
        checksum.copy_from_slice(&buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_LEN]);

        Ok(Self {
            operation,
            flags,
            payload_size: u32::from_be_bytes(size),
            checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_operations() {
        let packets = [
            Packet::rotate(Angle::Rotate180, 100),
            Packet::rotate(Angle::Rotate270, u32::MAX),
            Packet::ack(4096),
            Packet::nak(),
            Packet::exit(),
            Packet::new(Operation::Rotate, Flags::ROTATE_180 | Flags::CHECKSUM, 7),
        ];
        for packet in packets {
            let decoded = Packet::decode(&packet.encode()).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn frame_layout_is_bit_exact() {
        let frame = Packet::rotate(Angle::Rotate270, 0x0102_0304).encode();
        assert_eq!(frame.len(), FRAME_SIZE);
        // ROTATE (0x4) in the low nibble, ROTATE_270 (0x2) in the high nibble.
        assert_eq!(frame[0], 0x24);
        assert_eq!(&frame[1..4], &[0, 0, 0]);
        assert_eq!(&frame[4..8], &[0x01, 0x02, 0x03, 0x04]);
        assert!(frame[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn checksum_field_is_carried_verbatim() {
        let mut packet = Packet::ack(1);
        packet.checksum = [0xAB; CHECKSUM_LEN];
        let frame = packet.encode();
        assert!(frame[8..40].iter().all(|&b| b == 0xAB));
        assert!(frame[40..].iter().all(|&b| b == 0));
        assert_eq!(Packet::decode(&frame).unwrap().checksum, [0xAB; CHECKSUM_LEN]);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let frame = Packet::exit().encode();
        for len in [0, 1, 8, FRAME_SIZE - 1] {
            assert!(matches!(
                Packet::decode(&frame[..len]),
                Err(ChannelError::Protocol(_))
            ));
        }
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let mut frame = [0u8; FRAME_SIZE];
        for code in [0x0, 0x3, 0x5, 0xF] {
            frame[0] = code;
            assert!(Packet::decode(&frame).is_err(), "code {code:#x}");
        }
    }

    #[test]
    fn flags_angle_requires_exactly_one_rotation_bit() {
        assert_eq!(Flags::ROTATE_180.angle(), Some(Angle::Rotate180));
        assert_eq!(Flags::ROTATE_270.angle(), Some(Angle::Rotate270));
        assert_eq!(Flags::NONE.angle(), None);
        assert_eq!((Flags::ROTATE_180 | Flags::ROTATE_270).angle(), None);
        assert_eq!(Flags::ENCRYPTED.angle(), None);
    }

    #[test]
    fn reserved_bits_invalidate_rotation() {
        assert_eq!((Flags::ROTATE_180 | Flags::ENCRYPTED).angle(), None);
        assert_eq!((Flags::ROTATE_270 | Flags::ENCRYPTED).angle(), None);
        assert_eq!((Flags::ROTATE_180 | Flags::CHECKSUM).angle(), None);
        assert_eq!(Flags::from_bits(0xF).angle(), None);
    }

    #[test]
    fn flags_from_bits_masks_to_nibble() {
        assert_eq!(Flags::from_bits(0xF1).bits(), 0x1);
        assert!(Flags::from_bits(0x3).contains(Flags::ROTATE_270));
    }

    #[test]
    fn operation_codes_roundtrip() {
        for op in [Operation::Ack, Operation::Nak, Operation::Rotate, Operation::Exit] {
            assert_eq!(Operation::from_code(op.code()), Some(op));
        }
        assert_eq!(Operation::from_code(0), None);
    }
}
