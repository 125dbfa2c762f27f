// can-messenger/src/dbc/mod.rs
//
// DBC database parsing and whole-message encode/decode.
//
// This file is part of the Rust 'can-messenger' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CAN database (DBC) support.
//!
//! Parses the message (`BO_`) and signal (`SG_`) subset of the DBC text
//! format and translates between engineering-unit values and payload
//! bytes:
//!
//! ```text
//! BO_ 256 Example: 8 Vector__XXX
//!  SG_ Speed : 0|8@1+ (1,0) [0|255] "km/h" Vector__XXX
//!  SG_ Temp : 8|8@1+ (0.5,0) [0|127.5] "C" Vector__XXX
//! ```
//!
//! Parsing is line-oriented and lenient: lines are trimmed, anything that
//! is not a recognized `BO_` or `SG_` shape is skipped, and transmission
//! relations (`BO_TX_BU_`) are explicitly ignored. Min/max, unit and
//! receiver fields of a signal are accepted but not retained. A message
//! name defined twice keeps the later definition.
//!
//! [`Dbc::encode_can`] and [`Dbc::decode_can`] work on whole messages; the
//! per-signal bit math lives in [`Signal`].

mod signal;

pub use self::signal::{Signal, ValueType};

use crate::errors::DbcError;
use crate::frame::ByteOrder;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::{fs, io, path::Path};
use tracing::warn;

/// `BO_ <id> <name>: <dlc> <transmitter>`
static MESSAGE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^BO_\s+(\d+)\s+(\w+)\s*:\s*(\d+)\s+(\w+)").unwrap());

/// `SG_ <name> : <start>|<len>@<endian><sign> (<factor>,<offset>) ...`
static SIGNAL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^SG_\s+(\w+)\s*:\s*(\d+)\|(\d+)@([01])([+-])\s*\(([^,]+),([^)]+)\)").unwrap()
});

/// One message definition: identifier, payload length and signal list.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// CAN identifier the message is sent under.
    pub id: u32,
    /// Message name, unique within the database.
    pub name: String,
    /// Payload length in bytes.
    pub dlc: usize,
    /// Signals laid out within the payload.
    pub signals: Vec<Signal>,
}

impl Message {
    /// Encode the signals present in `values` into a fresh payload.
    ///
    /// The payload starts zeroed at the declared length; signals without
    /// an entry in `values` stay zero, and keys naming no signal are
    /// ignored.
    pub fn encode(&self, values: &HashMap<String, f64>) -> Result<Vec<u8>, DbcError> {
        let mut data = vec![0u8; self.dlc];
        for signal in &self.signals {
            if let Some(value) = values.get(&signal.name) {
                signal.check_fits(self.dlc)?;
                signal.encode(*value, &mut data)?;
            }
        }
        Ok(data)
    }

    /// Decode every signal out of `data`.
    ///
    /// Fails if any signal reaches past the supplied bytes — a payload
    /// shorter than the declared length is reported, not zero-filled.
    pub fn decode(&self, data: &[u8]) -> Result<HashMap<String, f64>, DbcError> {
        let mut signals = HashMap::with_capacity(self.signals.len());
        for signal in &self.signals {
            signals.insert(signal.name.clone(), signal.decode(data)?);
        }
        Ok(signals)
    }
}

/// A message identifier and payload produced by [`Dbc::encode_can`].
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedMessage {
    /// CAN identifier to send under.
    pub id: u32,
    /// Encoded payload bytes.
    pub data: Vec<u8>,
}

/// A message name and its decoded signals from [`Dbc::decode_can`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    /// Name of the matched message.
    pub name: String,
    /// Signal name to engineering value.
    pub signals: HashMap<String, f64>,
}

/// An in-memory CAN database: message definitions keyed by name.
///
/// Immutable once parsed; share it freely between listeners.
#[derive(Debug, Clone, Default)]
pub struct Dbc {
    messages: HashMap<String, Message>,
}

impl Dbc {
    /// Parse database text.
    ///
    /// Never fails: unrecognized lines are skipped, malformed numeric
    /// fields drop the line with a warning.
    pub fn new(text: &str) -> Self {
        let mut messages: HashMap<String, Message> = HashMap::new();
        // signals attach to the message most recently opened by a BO_ line
        let mut current: Option<String> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("BO_TX_BU_") {
                continue;
            }

            if let Some(caps) = MESSAGE_LINE.captures(line) {
                let (id, dlc) = match (caps[1].parse::<u32>(), caps[3].parse::<usize>()) {
                    (Ok(id), Ok(dlc)) => (id, dlc),
                    _ => {
                        warn!(line, "skipping message with unparseable id or length");
                        current = None;
                        continue;
                    }
                };
                let name = caps[2].to_string();
                if messages
                    .insert(
                        name.clone(),
                        Message {
                            id,
                            name: name.clone(),
                            dlc,
                            signals: Vec::new(),
                        },
                    )
                    .is_some()
                {
                    warn!(message = %name, "duplicate message definition, keeping the later one");
                }
                current = Some(name);
                continue;
            }

            if let Some(caps) = SIGNAL_LINE.captures(line) {
                let Some(message) = current.as_ref().and_then(|n| messages.get_mut(n)) else {
                    warn!(line, "signal before any message definition, skipping");
                    continue;
                };
                match parse_signal(&caps) {
                    Some(signal) => message.signals.push(signal),
                    None => warn!(line, "skipping unparseable signal"),
                }
            }
        }

        Self { messages }
    }

    /// Parse a database file.
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(&fs::read_to_string(path)?))
    }

    /// Look up a message by name.
    pub fn message(&self, name: &str) -> Option<&Message> {
        self.messages.get(name)
    }

    /// Look up a message by CAN identifier.
    ///
    /// Databases hold at most a few hundred messages, so this is a linear
    /// scan.
    pub fn message_by_id(&self, id: u32) -> Option<&Message> {
        self.messages.values().find(|m| m.id == id)
    }

    /// Iterate over all message definitions.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    /// Number of message definitions.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the database holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Encode the named message from engineering values.
    ///
    /// Fails with [`DbcError::UnknownMessage`] for an unknown name, and
    /// propagates signal range and layout errors.
    pub fn encode_can(
        &self,
        name: &str,
        values: &HashMap<String, f64>,
    ) -> Result<EncodedMessage, DbcError> {
        let message = self
            .message(name)
            .ok_or_else(|| DbcError::UnknownMessage(name.to_string()))?;
        Ok(EncodedMessage {
            id: message.id,
            data: message.encode(values)?,
        })
    }

    /// Decode a payload received under `id`.
    ///
    /// `Ok(None)` when no message matches the identifier.
    pub fn decode_can(&self, id: u32, data: &[u8]) -> Result<Option<DecodedMessage>, DbcError> {
        let Some(message) = self.message_by_id(id) else {
            return Ok(None);
        };
        Ok(Some(DecodedMessage {
            name: message.name.clone(),
            signals: message.decode(data)?,
        }))
    }
}

/// Build a signal from a matched `SG_` line.
fn parse_signal(caps: &regex::Captures<'_>) -> Option<Signal> {
    let start_bit = caps[2].parse().ok()?;
    let length: u16 = caps[3].parse().ok()?;
    if !(1..=64).contains(&length) {
        return None;
    }
    let byte_order = match &caps[4] {
        "1" => ByteOrder::LittleEndian,
        _ => ByteOrder::BigEndian,
    };
    let value_type = match &caps[5] {
        "-" => ValueType::Signed,
        _ => ValueType::Unsigned,
    };
    let factor: f64 = caps[6].trim().parse().ok()?;
    let offset: f64 = caps[7].trim().parse().ok()?;
    if factor == 0.0 {
        return None;
    }

    Some(Signal {
        name: caps[1].to_string(),
        start_bit,
        length,
        byte_order,
        value_type,
        factor,
        offset,
    })
}

/////////////////////////////////////////////////////////////////////////////
