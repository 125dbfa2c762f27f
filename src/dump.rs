// can-messenger/src/dump.rs
//
// Implements candump format parsing.
//
// This file is part of the Rust 'can-messenger' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! candump format parsing.
//!
//! Parses the text log format emitted by the `candump` utility, which is
//! part of [can-utils](https://github.com/linux-can/can-utils).
//!
//! Example:
//!
//! ```text
//! (1735270496.916858) can0 110#00112233
//! (1735270509.245511) can0 110#44556677
//! (1735270588.936508) can0 120##500112233445566778899AABB
//! (1469439874.299654) can1 104#
//! ```
//!
//! Records parse into the same [`CanFrame`] the live socket path uses, so
//! a logged bus can be replayed through the DBC decoder. The FD flags
//! nibble (`##<flags>`) is accepted and discarded; remote-request records
//! (`#R`) are reported as unsupported since the messenger does not
//! transmit them.

use crate::errors::FrameError;
use crate::frame::{id_from_raw, CanFrame};
use hex::FromHex;
use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};
use thiserror::Error;

/// A CAN log reader.
#[derive(Debug)]
pub struct Reader<R> {
    // The underlying reader
    rdr: R,
    // The line buffer
    buf: String,
}

impl<R: io::Read> Reader<R> {
    /// Creates an I/O buffered reader from a CAN log reader.
    pub fn from_reader(rdr: R) -> Reader<BufReader<R>> {
        Reader {
            rdr: BufReader::new(rdr),
            buf: String::with_capacity(256),
        }
    }
}

impl Reader<File> {
    /// Creates an I/O buffered reader from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Reader<BufReader<File>>> {
        Ok(Reader::from_reader(File::open(path)?))
    }
}

/// Record iterator
#[derive(Debug)]
pub struct CanDumpRecords<'a, R: 'a> {
    src: &'a mut Reader<R>,
}

/// Recorded CAN frame.
#[derive(Debug)]
pub struct CanDumpRecord<'a> {
    /// The timestamp, in microseconds
    pub t_us: u64,
    /// The name of the device
    pub device: &'a str,
    /// The parsed frame
    pub frame: CanFrame,
}

/// candump line parse error
#[derive(Debug, Error)]
pub enum ParseError {
    /// I/O Error
    #[error("I/O: {0}")]
    Io(#[from] io::Error),
    /// Unexpected end of line
    #[error("unexpected end of line")]
    UnexpectedEndOfLine,
    /// Invalid time stamp
    #[error("invalid timestamp")]
    InvalidTimestamp,
    /// Invalid CAN frame
    #[error("invalid CAN frame")]
    InvalidCanFrame,
    /// Remote-request records are not represented
    #[error("remote-request records are not supported")]
    UnsupportedRemoteFrame,
    /// Error creating the frame
    #[error("constructing the frame: {0}")]
    Construction(#[from] FrameError),
}

impl<R: BufRead> Reader<R> {
    /// Returns an iterator over all records
    pub fn records(&mut self) -> CanDumpRecords<R> {
        CanDumpRecords { src: self }
    }

    /// Advance state, returning next record.
    pub fn next_record(&mut self) -> Result<Option<CanDumpRecord>, ParseError> {
        self.buf.clear();
        let nread = self.rdr.read_line(&mut self.buf)?;

        // reached EOF
        if nread == 0 {
            return Ok(None);
        }

        let line = self.buf[..nread].trim();
        let mut field_iter = line.split(' ');

        // parse timestamp field
        let ts = field_iter.next().ok_or(ParseError::UnexpectedEndOfLine)?;

        if ts.len() < 3 || !ts.starts_with('(') || !ts.ends_with(')') {
            return Err(ParseError::InvalidTimestamp);
        }

        let ts = &ts[1..ts.len() - 1];

        let t_us = match ts.split_once('.') {
            Some((num, mant)) => {
                let num = num
                    .parse::<u64>()
                    .map_err(|_| ParseError::InvalidTimestamp)?;
                let mant = mant
                    .parse::<u64>()
                    .map_err(|_| ParseError::InvalidTimestamp)?;
                num.saturating_mul(1_000_000).saturating_add(mant)
            }
            _ => return Err(ParseError::InvalidTimestamp),
        };

        // device name
        let device = field_iter.next().ok_or(ParseError::UnexpectedEndOfLine)?;

        // parse packet
        let can_raw = field_iter.next().ok_or(ParseError::UnexpectedEndOfLine)?;

        let (can_id_str, can_data) = can_raw
            .split_once('#')
            .ok_or(ParseError::InvalidCanFrame)?;

        // ids above the standard range log as extended
        let can_id = u32::from_str_radix(can_id_str, 16)
            .ok()
            .and_then(id_from_raw)
            .ok_or(ParseError::InvalidCanFrame)?;

        // Frame type and separators:
        //   CAN FD: "<canid>##<flags>[data]"
        //   Remote: "<canid>#R[len]"
        //   Data:   "<canid>#[data]"
        let frame = if let Some(fd_data) = can_data.strip_prefix('#') {
            // the flags nibble is validated but not retained
            fd_data
                .get(0..1)
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or(ParseError::InvalidCanFrame)?;
            let data = Vec::from_hex(&fd_data[1..]).map_err(|_| ParseError::InvalidCanFrame)?;
            CanFrame::new_fd(can_id, &data)?
        } else if can_data.starts_with('R') {
            return Err(ParseError::UnsupportedRemoteFrame);
        } else {
            let data = Vec::from_hex(can_data).map_err(|_| ParseError::InvalidCanFrame)?;
            CanFrame::new(can_id, &data)?
        };

        Ok(Some(CanDumpRecord {
            t_us,
            device,
            frame,
        }))
    }
}

impl<R: io::Read> Iterator for CanDumpRecords<'_, BufReader<R>> {
    type Item = Result<(u64, CanFrame), ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        // lift Option:
        match self.src.next_record() {
            Ok(Some(CanDumpRecord { t_us, frame, .. })) => Some(Ok((t_us, frame))),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
