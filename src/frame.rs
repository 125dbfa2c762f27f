// can-messenger/src/frame.rs
//
// Wire codec for classic CAN 2.0 and CAN FD frames.
//
// This file is part of the Rust 'can-messenger' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CAN bus frames and their SocketCAN wire format.
//!
//! The Linux kernel exchanges CAN traffic as fixed-size records: 16 bytes
//! for a classic `can_frame`, 72 bytes for a `canfd_frame`. Both start with
//! a 32-bit identifier word whose low 29 bits carry the CAN ID and whose
//! bit 31 (`CAN_EFF_FLAG`) marks a 29-bit extended identifier, followed by
//! a length byte, padding, and the left-aligned payload.
//!
//! [`CanFrame`] is the in-memory form. [`CanFrame::encode`] and
//! [`CanFrame::parse`] convert to and from the kernel layout, with the
//! byte order of the identifier word selectable per call — network order
//! by default, native little-endian for systems that pack that way.

use crate::errors::FrameError;
use bitflags::bitflags;
use embedded_can::{ExtendedId, Id, StandardId};
use itertools::Itertools;
use libc::canid_t;
use std::fmt;

pub use libc::{
    CANFD_MAX_DLEN, CANFD_MTU, CAN_EFF_FLAG, CAN_EFF_MASK, CAN_ERR_FLAG, CAN_MAX_DLEN, CAN_MTU,
    CAN_RTR_FLAG, CAN_SFF_MASK,
};

/// Minimum parseable prefix: identifier word, DLC and padding.
pub const FRAME_HEADER_LEN: usize = 8;

bitflags! {
    /// Bit flags in the composite SocketCAN ID word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IdFlags: canid_t {
        /// Indicates frame uses a 29-bit extended ID.
        const EFF = CAN_EFF_FLAG;
        /// Indicates a remote request frame.
        const RTR = CAN_RTR_FLAG;
        /// Indicates an error frame.
        const ERR = CAN_ERR_FLAG;
    }
}

/// Byte order of a multi-byte field.
///
/// Selects how the identifier word is laid out on the wire, and doubles as
/// the DBC signal byte order (Intel = little, Motorola = big).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Network order; the identifier-word default.
    #[default]
    BigEndian,
    /// Native order on x86-class hosts; DBC "Intel" signals.
    LittleEndian,
}

/// Creates a CAN ID from a raw integer value.
///
/// If the `id` is <= 0x7FF, it's assumed to be a standard ID, otherwise
/// it is created as an Extended ID. If you require an Extended ID <= 0x7FF,
/// create it explicitly.
pub fn id_from_raw(id: u32) -> Option<Id> {
    let id = match id {
        n if n <= CAN_SFF_MASK => StandardId::new(n as u16)?.into(),
        n => ExtendedId::new(n)?.into(),
    };
    Some(id)
}

/// Gets the raw numeric value from an Id.
pub fn id_to_raw(id: Id) -> u32 {
    match id {
        Id::Standard(id) => id.as_raw() as u32,
        Id::Extended(id) => id.as_raw(),
    }
}

/// A CAN frame: identifier, flags and payload.
///
/// Covers both classic CAN 2.0 (up to 8 data bytes) and CAN FD (up to 64),
/// distinguished by [`is_fd`](Self::is_fd). The identifier always holds at
/// most 29 bits; whether it is interpreted as an 11-bit or 29-bit address
/// is carried separately in the EFF flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    flags: IdFlags,
    id: u32,
    fd: bool,
    data: Vec<u8>,
}

impl CanFrame {
    /// Create a classic CAN 2.0 data frame.
    pub fn new(id: impl Into<Id>, data: &[u8]) -> Result<Self, FrameError> {
        let id = id.into();
        Self::from_raw_parts(id_to_raw(id), matches!(id, Id::Extended(_)), false, data)
    }

    /// Create a CAN FD data frame.
    pub fn new_fd(id: impl Into<Id>, data: &[u8]) -> Result<Self, FrameError> {
        let id = id.into();
        Self::from_raw_parts(id_to_raw(id), matches!(id, Id::Extended(_)), true, data)
    }

    /// Create a frame from an untyped identifier.
    ///
    /// Identifier bits beyond the low 29 are silently masked off. Fails
    /// with [`FrameError::InvalidLength`] if `data` exceeds what the
    /// requested format can carry.
    pub fn from_raw_parts(
        id: u32,
        extended: bool,
        fd: bool,
        data: &[u8],
    ) -> Result<Self, FrameError> {
        let max = if fd { CANFD_MAX_DLEN } else { CAN_MAX_DLEN };
        if data.len() > max {
            return Err(FrameError::InvalidLength {
                len: data.len(),
                max,
            });
        }
        let flags = if extended {
            IdFlags::EFF
        } else {
            IdFlags::empty()
        };
        Ok(Self {
            flags,
            id: id & CAN_EFF_MASK,
            fd,
            data: data.to_vec(),
        })
    }

    /// Parse a frame from its kernel wire format.
    ///
    /// `fd` forces the format; with `None` it is auto-detected from the
    /// buffer size (>= 72 bytes means FD). Rejects buffers shorter than
    /// the 8-byte header. The classic DLC keeps only its low nibble, as
    /// the kernel does; if the buffer is too short to hold the announced
    /// payload, the payload comes back empty.
    pub fn parse(bytes: &[u8], order: ByteOrder, fd: Option<bool>) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(FrameError::Incomplete {
                len: bytes.len(),
                min: FRAME_HEADER_LEN,
            });
        }
        let fd = fd.unwrap_or(bytes.len() >= CANFD_MTU);

        let word = bytes[0..4].try_into().unwrap();
        let word = match order {
            ByteOrder::BigEndian => u32::from_be_bytes(word),
            ByteOrder::LittleEndian => u32::from_le_bytes(word),
        };

        let dlc = if fd {
            bytes[4] as usize
        } else {
            (bytes[4] & 0x0F) as usize
        };
        let data = bytes
            .get(FRAME_HEADER_LEN..FRAME_HEADER_LEN + dlc)
            .map(<[u8]>::to_vec)
            .unwrap_or_default();

        Ok(Self {
            flags: IdFlags::from_bits_truncate(word),
            id: word & CAN_EFF_MASK,
            fd,
            data,
        })
    }

    /// Serialize to the kernel wire format: 16 bytes classic, 72 bytes FD.
    ///
    /// The payload is left-aligned and zero-padded; reserved bytes are
    /// zero. Only the identifier word is affected by `order`.
    pub fn encode(&self, order: ByteOrder) -> Vec<u8> {
        let size = if self.fd { CANFD_MTU } else { CAN_MTU };
        let mut buf = vec![0u8; size];

        let word = self.id | self.flags.bits();
        buf[0..4].copy_from_slice(&match order {
            ByteOrder::BigEndian => word.to_be_bytes(),
            ByteOrder::LittleEndian => word.to_le_bytes(),
        });
        buf[4] = self.data.len() as u8;
        buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + self.data.len()].copy_from_slice(&self.data);
        buf
    }

    /// The raw CAN ID, without flag bits.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The EFF/RTR/ERR flags carried in the identifier word.
    pub fn id_flags(&self) -> IdFlags {
        self.flags
    }

    /// Whether the frame uses a 29-bit extended identifier.
    pub fn is_extended(&self) -> bool {
        self.flags.contains(IdFlags::EFF)
    }

    /// Whether this is a flexible data-rate frame.
    pub fn is_fd(&self) -> bool {
        self.fd
    }

    /// The payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload length in bytes.
    pub fn dlc(&self) -> usize {
        self.data.len()
    }

    /// The CAN ID as the embedded HAL Id type.
    pub fn hal_id(&self) -> Id {
        if self.is_extended() {
            ExtendedId::new(self.id & CAN_EFF_MASK).unwrap().into()
        } else {
            StandardId::new((self.id & CAN_SFF_MASK) as u16)
                .unwrap()
                .into()
        }
    }
}

impl fmt::UpperHex for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:X}#", self.id | self.flags.bits())?;
        let mut parts = self.data.iter().map(|v| format!("{:02X}", v));
        write!(f, "{}", parts.join(" "))
    }
}

/////////////////////////////////////////////////////////////////////////////
