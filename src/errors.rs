// can-messenger/src/errors.rs
//
// Error types for the can-messenger library.
//
// This file is part of the Rust 'can-messenger' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Error types.
//!
//! Usage errors (oversized payloads, unknown DBC message names, values that
//! do not fit their signal) propagate to the caller. Transport faults are
//! recovered where they occur: the socket adapter and the listener log them
//! and carry on, so a listener survives transient bus trouble.

use std::io;
use thiserror::Error;

/// Errors building or parsing a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Payload larger than the frame format allows.
    #[error("payload of {len} bytes exceeds the {max}-byte frame limit")]
    InvalidLength {
        /// Supplied payload length.
        len: usize,
        /// Limit for the requested format (8 classic, 64 FD).
        max: usize,
    },
    /// Too few bytes to hold the identifier word and DLC.
    #[error("frame truncated: got {len} bytes, need at least {min}")]
    Incomplete {
        /// Supplied buffer length.
        len: usize,
        /// Minimum parseable length.
        min: usize,
    },
}

/// Errors opening a CAN socket.
///
/// These are never propagated out of the messenger: the operation that
/// needed the socket logs the error and returns without it.
#[derive(Debug, Error)]
pub enum SocketOpenError {
    /// The interface name could not be resolved.
    #[error("CAN device not found: {0}")]
    Lookup(#[from] nix::Error),

    /// Creating, binding or configuring the socket failed.
    #[error("I/O: {0}")]
    Io(#[from] io::Error),
}

/// Errors translating between engineering values and payload bytes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DbcError {
    /// Encode referenced a message name the database does not define.
    #[error("message {0:?} is not defined in the database")]
    UnknownMessage(String),

    /// The raw integer form of a value does not fit the signal's bit field.
    #[error("raw value {raw} out of range for signal {signal}")]
    SignalOutOfRange {
        /// Signal name.
        signal: String,
        /// Raw value after scaling, before packing.
        raw: i64,
    },

    /// The signal's bit span extends past its message's declared length.
    #[error("signal {signal} does not fit in a {dlc}-byte message")]
    SignalExceedsMessage {
        /// Signal name.
        signal: String,
        /// Declared message length in bytes.
        dlc: usize,
    },

    /// A bit position fell outside the supplied buffer.
    #[error("bit position {bit} outside the {available}-bit buffer")]
    BitPositionOutOfBounds {
        /// Offending absolute bit position.
        bit: usize,
        /// Number of bits the buffer actually holds.
        available: usize,
    },
}

/// Any error a messenger operation can propagate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Frame construction or parsing failed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// DBC encoding or decoding failed.
    #[error(transparent)]
    Dbc(#[from] DbcError),
}

// ===== BusError =====

/// A bus problem reported through an error frame.
///
/// Drivers report trouble on the bus as incoming frames with the ERR flag
/// set: the error class lives in the identifier bits and details in the
/// data bytes. Reception requires subscribing with
/// [`set_error_filter`](crate::CanSocket::set_error_filter); the listener
/// logs any that arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    /// TX timeout (by netdevice driver).
    #[error("transmission timeout")]
    TransmitTimeout,
    /// Arbitration was lost after the given bit number, 0 if unspecified.
    #[error("arbitration lost after {0} bits")]
    LostArbitration(u8),
    /// Problem in the CAN controller.
    #[error("controller problem: {0}")]
    ControllerProblem(ControllerProblem),
    /// Protocol violation somewhere in a frame.
    #[error("protocol violation")]
    ProtocolViolation,
    /// Transceiver error.
    #[error("transceiver error")]
    TransceiverError,
    /// No ACK received for current CAN frame.
    #[error("no ack")]
    NoAck,
    /// Bus off (due to too many detected errors).
    #[error("bus off")]
    BusOff,
    /// Bus error (due to too many detected errors).
    #[error("bus error")]
    BusError,
    /// The bus has been restarted.
    #[error("restarted")]
    Restarted,
    /// Unknown, possibly invalid, error class.
    #[error("unknown error ({0:#x})")]
    Unknown(u32),
}

impl BusError {
    /// Interpret an error frame.
    ///
    /// `None` if the frame does not carry the ERR flag.
    pub fn from_frame(frame: &crate::frame::CanFrame) -> Option<Self> {
        use crate::frame::IdFlags;

        if !frame.id_flags().contains(IdFlags::ERR) {
            return None;
        }

        let data = |idx: usize| frame.data().get(idx).copied().unwrap_or(0);

        Some(match frame.id() {
            0x0001 => BusError::TransmitTimeout,
            0x0002 => BusError::LostArbitration(data(0)),
            0x0004 => BusError::ControllerProblem(ControllerProblem::from(data(1))),
            0x0008 => BusError::ProtocolViolation,
            0x0010 => BusError::TransceiverError,
            0x0020 => BusError::NoAck,
            0x0040 => BusError::BusOff,
            0x0080 => BusError::BusError,
            0x0100 => BusError::Restarted,
            e => BusError::Unknown(e),
        })
    }
}

/// Error status of the CAN controller, from `data[1]` of an error frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ControllerProblem {
    /// Unspecified.
    #[error("unspecified controller problem")]
    Unspecified,
    /// RX buffer overflow.
    #[error("receive buffer overflow")]
    ReceiveBufferOverflow,
    /// TX buffer overflow.
    #[error("transmit buffer overflow")]
    TransmitBufferOverflow,
    /// Reached warning level for RX errors.
    #[error("ERROR WARNING (receive)")]
    ReceiveErrorWarning,
    /// Reached warning level for TX errors.
    #[error("ERROR WARNING (transmit)")]
    TransmitErrorWarning,
    /// Reached error passive status RX.
    #[error("ERROR PASSIVE (receive)")]
    ReceiveErrorPassive,
    /// Reached error passive status TX.
    #[error("ERROR PASSIVE (transmit)")]
    TransmitErrorPassive,
    /// Recovered to error active state.
    #[error("ERROR ACTIVE")]
    Active,
}

impl From<u8> for ControllerProblem {
    fn from(val: u8) -> Self {
        use ControllerProblem::*;
        match val {
            0x01 => ReceiveBufferOverflow,
            0x02 => TransmitBufferOverflow,
            0x04 => ReceiveErrorWarning,
            0x08 => TransmitErrorWarning,
            0x10 => ReceiveErrorPassive,
            0x20 => TransmitErrorPassive,
            0x40 => Active,
            _ => Unspecified,
        }
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ByteOrder, CanFrame, CAN_ERR_FLAG};

    fn error_frame(class: u32, data: &[u8]) -> CanFrame {
        let mut bytes = vec![0u8; 16];
        bytes[0..4].copy_from_slice(&(CAN_ERR_FLAG | class).to_be_bytes());
        bytes[4] = data.len() as u8;
        bytes[8..8 + data.len()].copy_from_slice(data);
        CanFrame::parse(&bytes, ByteOrder::BigEndian, None).unwrap()
    }

    #[test]
    fn error_frames_decode_by_class() {
        assert_eq!(
            BusError::from_frame(&error_frame(0x0001, &[])),
            Some(BusError::TransmitTimeout)
        );
        assert_eq!(
            BusError::from_frame(&error_frame(0x0002, &[17])),
            Some(BusError::LostArbitration(17))
        );
        assert_eq!(
            BusError::from_frame(&error_frame(0x0004, &[0, 0x01])),
            Some(BusError::ControllerProblem(
                ControllerProblem::ReceiveBufferOverflow
            ))
        );
        assert_eq!(
            BusError::from_frame(&error_frame(0x0020, &[])),
            Some(BusError::NoAck)
        );
        assert_eq!(
            BusError::from_frame(&error_frame(0x0800, &[])),
            Some(BusError::Unknown(0x0800))
        );
    }

    #[test]
    fn plain_frames_are_not_bus_errors() {
        let frame = CanFrame::from_raw_parts(0x123, false, false, &[1]).unwrap();
        assert_eq!(BusError::from_frame(&frame), None);
    }

    #[test]
    fn truncated_error_frames_read_zero_details() {
        assert_eq!(
            BusError::from_frame(&error_frame(0x0002, &[])),
            Some(BusError::LostArbitration(0))
        );
    }

    #[test]
    fn error_messages_read_well() {
        assert_eq!(
            FrameError::InvalidLength { len: 9, max: 8 }.to_string(),
            "payload of 9 bytes exceeds the 8-byte frame limit"
        );
        assert_eq!(
            DbcError::UnknownMessage("Engine".into()).to_string(),
            "message \"Engine\" is not defined in the database"
        );
        assert_eq!(
            BusError::ControllerProblem(ControllerProblem::Active).to_string(),
            "controller problem: ERROR ACTIVE"
        );
    }
}
