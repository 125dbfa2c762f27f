// can-messenger/src/lib.rs
//
// CAN bus messaging for Linux SocketCAN with DBC signal codecs.
//
// This file is part of the Rust 'can-messenger' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! # can-messenger
//!
//! Send, receive and filter CAN bus frames on Linux through raw SocketCAN
//! sockets, for both classic CAN 2.0 (up to 8 data bytes) and CAN FD (up
//! to 64), with 11-bit standard and 29-bit extended identifiers.
//!
//! The wire format matches the kernel's `can_frame`/`canfd_frame` layouts
//! byte for byte, so anything built here interoperates with `candump`,
//! virtual CAN interfaces and other SocketCAN tooling. A small CAN
//! database (DBC) engine translates between engineering-unit signal
//! values and payload bytes, including the Motorola bit interleaving that
//! big-endian signals use.
//!
//! Sending a raw frame:
//!
//! ```no_run
//! use can_messenger::Messenger;
//!
//! let messenger = Messenger::new("can0");
//! messenger.send_raw(0x123, &[0xDE, 0xAD, 0xBE, 0xEF])?;
//! # Ok::<(), can_messenger::Error>(())
//! ```
//!
//! Listening with a filter and a database, stopping from another thread:
//!
//! ```no_run
//! use can_messenger::{Dbc, IdFilter, ListenOptions, Messenger};
//!
//! let dbc = Dbc::load("vehicle.dbc")?;
//! let messenger = Messenger::new("can0");
//!
//! std::thread::scope(|scope| {
//!     scope.spawn(|| {
//!         let options = ListenOptions {
//!             filter: Some(IdFilter::Range(0x100..=0x200)),
//!             dbc: Some(&dbc),
//!             ..Default::default()
//!         };
//!         messenger.listen(options, |message| {
//!             if let Some(decoded) = &message.decoded {
//!                 println!("{}: {:?}", decoded.name, decoded.signals);
//!             }
//!         });
//!     });
//!
//!     // ... later, from any thread:
//!     messenger.stop_listening();
//! });
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! Encoding signals through a database:
//!
//! ```
//! use can_messenger::Dbc;
//! use std::collections::HashMap;
//!
//! let dbc = Dbc::new(
//!     "BO_ 256 Example: 8 Vector__XXX\n \
//!      SG_ Speed : 0|8@1+ (1,0) [0|255] \"km/h\" Vector__XXX\n",
//! );
//! let values = HashMap::from([("Speed".to_string(), 10.0)]);
//! let encoded = dbc.encode_can("Example", &values)?;
//! assert_eq!(encoded.id, 256);
//! assert_eq!(encoded.data[0], 10);
//! # Ok::<(), can_messenger::DbcError>(())
//! ```
//!
//! Sockets are opened per operation and always released, including on
//! faults and cancellation. The library spawns no threads and writes its
//! diagnostics through [`tracing`].

#![warn(missing_docs)]

pub mod dbc;
pub mod dump;
pub mod errors;
pub mod filter;
pub mod frame;
pub mod messenger;
pub mod socket;

pub use crate::{
    dbc::{Dbc, DecodedMessage, EncodedMessage, Message, Signal, ValueType},
    errors::{BusError, ControllerProblem, DbcError, Error, FrameError, SocketOpenError},
    filter::{IdFilter, IdMask},
    frame::{ByteOrder, CanFrame, IdFlags},
    messenger::{CanMessage, ListenOptions, Messenger, DEFAULT_READ_TIMEOUT},
    socket::{Adapter, CanInterface, CanSocket, ShouldRetry, Transport},
};
