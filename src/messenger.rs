// can-messenger/src/messenger.rs
//
// Sending frames and the blocking listen loop.
//
// This file is part of the Rust 'can-messenger' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! The messenger: one-shot sends and a cancellable receive loop.
//!
//! A [`Messenger`] is configured once with an interface name, an
//! identifier-word byte order, an FD default and a receive timeout. Each
//! `send_*` call and each [`listen`](Messenger::listen) invocation opens
//! its own socket through the messenger's [`Adapter`] and releases it when
//! the operation finishes, on every exit path.
//!
//! The listener runs on the caller's thread; no threads are spawned here.
//! [`stop_listening`](Messenger::stop_listening) may be called from any
//! thread and takes effect at the next loop iteration, so worst-case stop
//! latency is one receive timeout. Usage errors (payload too long, unknown
//! DBC name, value out of range) propagate; transport faults, undecodable
//! frames and panicking callbacks are logged and the loop carries on.

use crate::dbc::{Dbc, DecodedMessage};
use crate::errors::{BusError, Error};
use crate::filter::{accepts, IdFilter};
use crate::frame::{ByteOrder, CanFrame, IdFlags, CAN_SFF_MASK};
use crate::socket::{Adapter, CanInterface, Transport};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Default socket receive timeout; also the worst-case stop latency.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Options for one [`Messenger::listen`] invocation.
#[derive(Debug, Default)]
pub struct ListenOptions<'a> {
    /// Identifier filter; `None` delivers every frame.
    pub filter: Option<IdFilter>,
    /// Override the messenger's FD default for this listen.
    pub fd: Option<bool>,
    /// Decode matching frames against this database.
    pub dbc: Option<&'a Dbc>,
}

/// A received frame, with its DBC decode when one applied.
#[derive(Debug, Clone)]
pub struct CanMessage {
    /// The parsed frame.
    pub frame: CanFrame,
    /// Present when a database was supplied and a message matched the id.
    pub decoded: Option<DecodedMessage>,
}

/// Sends and receives CAN frames on one interface.
///
/// Generic over the [`Adapter`] so tests and alternative CAN stacks can
/// substitute the transport; defaults to the Linux SocketCAN
/// [`CanInterface`].
///
/// All methods take `&self`; wrap the messenger in an `Arc` (or use scoped
/// threads) to stop a listener from another thread.
#[derive(Debug)]
pub struct Messenger<A: Adapter = CanInterface> {
    interface: String,
    byte_order: ByteOrder,
    fd: bool,
    read_timeout: Duration,
    adapter: A,
    listening: AtomicBool,
}

impl Messenger<CanInterface> {
    /// A messenger for the named SocketCAN interface, e.g. `"can0"`.
    ///
    /// Defaults: big-endian identifier word, classic CAN, 1 s receive
    /// timeout.
    pub fn new(interface: impl Into<String>) -> Self {
        Self::with_adapter(interface, CanInterface)
    }
}

impl<A: Adapter> Messenger<A> {
    /// A messenger using a custom adapter.
    pub fn with_adapter(interface: impl Into<String>, adapter: A) -> Self {
        Self {
            interface: interface.into(),
            byte_order: ByteOrder::BigEndian,
            fd: false,
            read_timeout: DEFAULT_READ_TIMEOUT,
            adapter,
            listening: AtomicBool::new(false),
        }
    }

    /// Set the byte order of the identifier word on the wire.
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Default to CAN FD frames for sends and listens.
    pub fn with_fd(mut self, fd: bool) -> Self {
        self.fd = fd;
        self
    }

    /// Set the socket receive timeout (bounds the stop latency).
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// The interface this messenger is bound to.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Send one frame from a raw identifier and payload.
    ///
    /// Identifiers above the 11-bit range are sent as extended; use
    /// [`send_frame`](Self::send_frame) for an extended identifier that
    /// fits in 11 bits. The FD default of the messenger applies. Length
    /// errors propagate; transport faults are logged and swallowed.
    pub fn send_raw(&self, id: u32, data: &[u8]) -> Result<(), Error> {
        let frame = CanFrame::from_raw_parts(id, id > CAN_SFF_MASK, self.fd, data)?;
        self.transmit(&frame)
    }

    /// Send an already-constructed frame.
    pub fn send_frame(&self, frame: &CanFrame) -> Result<(), Error> {
        self.transmit(frame)
    }

    /// Encode `signals` for the named database message and send it.
    ///
    /// Fails with [`DbcError::UnknownMessage`](crate::DbcError) when the
    /// name is absent and with
    /// [`DbcError::SignalOutOfRange`](crate::DbcError) when a value cannot
    /// be represented; an encoded payload longer than the messenger's
    /// frame format fails like any oversized send.
    pub fn send_with_dbc(
        &self,
        dbc: &Dbc,
        message: &str,
        signals: &HashMap<String, f64>,
    ) -> Result<(), Error> {
        let encoded = dbc.encode_can(message, signals)?;
        let frame =
            CanFrame::from_raw_parts(encoded.id, encoded.id > CAN_SFF_MASK, self.fd, &encoded.data)?;
        self.transmit(&frame)
    }

    fn transmit(&self, frame: &CanFrame) -> Result<(), Error> {
        let socket = match self
            .adapter
            .open(&self.interface, frame.is_fd(), self.read_timeout)
        {
            Ok(socket) => socket,
            Err(err) => {
                error!(interface = %self.interface, %err, "cannot open CAN socket");
                return Ok(());
            }
        };
        if let Err(err) = socket.write_frame(&frame.encode(self.byte_order)) {
            error!(interface = %self.interface, %err, "failed to write frame");
        }
        Ok(())
        // socket drops here, releasing the descriptor
    }

    /// Receive frames until [`stop_listening`](Self::stop_listening).
    ///
    /// Blocks the calling thread. Each received frame is parsed, run
    /// through the filter, optionally decoded against the database, and
    /// handed to `callback`. Timeouts are quiet ticks; read and parse
    /// failures are logged and skipped; a panicking callback is logged and
    /// the loop continues. If the socket cannot be opened the call logs
    /// and returns without invoking the callback.
    ///
    /// Listening is re-entrant across invocations: after a stop, calling
    /// `listen` again resumes delivery.
    pub fn listen<F>(&self, options: ListenOptions<'_>, mut callback: F)
    where
        F: FnMut(CanMessage),
    {
        self.listening.store(true, Ordering::SeqCst);
        let fd_enabled = options.fd.unwrap_or(self.fd);

        let socket = match self
            .adapter
            .open(&self.interface, fd_enabled, self.read_timeout)
        {
            Ok(socket) => socket,
            Err(err) => {
                error!(interface = %self.interface, %err, "cannot open CAN socket, not listening");
                self.listening.store(false, Ordering::SeqCst);
                return;
            }
        };

        while self.listening.load(Ordering::SeqCst) {
            let bytes = match socket.read_frame(fd_enabled) {
                Ok(Some(bytes)) => bytes,
                // timeout tick; gives the stop flag a chance to be seen
                Ok(None) => continue,
                Err(err) => {
                    warn!(interface = %self.interface, %err, "CAN read failed");
                    continue;
                }
            };

            let frame = match CanFrame::parse(&bytes, self.byte_order, None) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(%err, "dropping undecodable frame");
                    continue;
                }
            };

            if frame.id_flags().contains(IdFlags::ERR) {
                if let Some(bus_error) = BusError::from_frame(&frame) {
                    warn!(interface = %self.interface, %bus_error, "bus error frame received");
                }
            }

            if !accepts(options.filter.as_ref(), frame.id()) {
                continue;
            }

            let decoded = options.dbc.and_then(|dbc| {
                match dbc.decode_can(frame.id(), frame.data()) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        warn!(id = frame.id(), %err, "DBC decode failed");
                        None
                    }
                }
            });

            let message = CanMessage { frame, decoded };
            if catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                error!(interface = %self.interface, "listener callback panicked");
            }
        }

        debug!(interface = %self.interface, "listener stopped");
        // socket drops here, releasing the descriptor
    }

    /// Ask a running listener to stop.
    ///
    /// Safe to call from any thread and idempotent. The loop observes the
    /// flag at its next iteration, after at most one receive timeout.
    pub fn stop_listening(&self) {
        self.listening.store(false, Ordering::SeqCst);
    }

    /// Whether a listen loop is currently running.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

/////////////////////////////////////////////////////////////////////////////
