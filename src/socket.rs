// can-messenger/src/socket.rs
//
// Raw SocketCAN transport and the adapter abstraction over it.
//
// This file is part of the Rust 'can-messenger' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Socket adapters.
//!
//! The messenger talks to the bus through two small traits: [`Adapter`]
//! opens a configured socket on a named interface, [`Transport`] moves
//! whole frames through it. The default implementation,
//! [`CanInterface`]/[`CanSocket`], is a PF_CAN/SOCK_RAW/CAN_RAW socket
//! bound to a Linux network interface. Tests and alternative CAN stacks
//! (virtual buses, simulators) substitute their own adapter.
//!
//! [`CanSocket`] also exposes the raw-CAN socket options: kernel
//! prefiltering from [`IdMask`](crate::IdMask) pairs, the bus-error
//! subscription mask, loopback and receive-own-messages.
//!
//! A socket is created by opening it and closed by dropping it; every
//! acquisition releases its descriptor on all exit paths.

use crate::errors::SocketOpenError;
use crate::filter::IdMask;
use libc::{
    sa_family_t, sockaddr, sockaddr_can, socklen_t, suseconds_t, time_t, timeval, AF_CAN,
    CAN_INV_FILTER, CAN_RAW, CAN_RAW_ERR_FILTER, CAN_RAW_FD_FRAMES, CAN_RAW_FILTER,
    CAN_RAW_LOOPBACK, CAN_RAW_RECV_OWN_MSGS, EINPROGRESS, ENOPROTOOPT, PF_CAN, SOCK_RAW,
    SOL_CAN_RAW, SOL_SOCKET, SO_RCVTIMEO,
};
use nix::net::if_::if_nametoindex;
use std::{
    fmt, io, mem,
    os::{
        raw::{c_int, c_uint, c_void},
        unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd},
    },
    ptr, slice,
    time::Duration,
};
use tracing::warn;

pub use libc::{CANFD_MTU, CAN_ERR_MASK, CAN_MTU};

/// An error mask that will cause SocketCAN to report all errors.
pub const ERR_MASK_ALL: u32 = CAN_ERR_MASK;

/// An error mask that will cause SocketCAN to silently drop all errors.
pub const ERR_MASK_NONE: u32 = 0;

/// Check an error return value for timeouts.
///
/// The kernel reports an elapsed receive timeout as an error, so a read on
/// a socket with a timeout that saw no frame in time comes back as `Err`.
/// This trait adds a `should_retry` method to `Error` and `Result` to
/// recognize that condition.
pub trait ShouldRetry {
    /// Check for timeout.
    ///
    /// If `true`, the error is probably due to a timeout.
    fn should_retry(&self) -> bool;
}

impl ShouldRetry for io::Error {
    fn should_retry(&self) -> bool {
        match self.kind() {
            // EAGAIN and EWOULDBLOCK are mapped to WouldBlock by the stdlib
            io::ErrorKind::WouldBlock => true,
            // EINPROGRESS is also possible
            _ => self.raw_os_error() == Some(EINPROGRESS),
        }
    }
}

impl<E: fmt::Debug> ShouldRetry for io::Result<E> {
    fn should_retry(&self) -> bool {
        match *self {
            Err(ref e) => e.should_retry(),
            _ => false,
        }
    }
}

// ===== Private libc plumbing =====

fn as_timeval(t: Duration) -> timeval {
    timeval {
        tv_sec: t.as_secs() as time_t,
        tv_usec: t.subsec_micros() as suseconds_t,
    }
}

/// Zeroed CAN socket address for the interface index.
fn can_addr(ifindex: c_uint) -> sockaddr_can {
    let mut addr: sockaddr_can = unsafe { mem::zeroed() };
    addr.can_family = AF_CAN as sa_family_t;
    addr.can_ifindex = ifindex as c_int;
    addr
}

/// The kernel's form of one id/mask prefilter.
fn raw_filter(filter: &IdMask) -> libc::can_filter {
    let invert = if filter.is_inverted() {
        CAN_INV_FILTER
    } else {
        0
    };
    libc::can_filter {
        can_id: filter.id() | invert,
        can_mask: filter.mask(),
    }
}

/// Typed `setsockopt` over a slice of values.
///
/// An empty slice installs a zero-length option, which is how the kernel
/// filter list is cleared.
fn set_option_slice<T>(fd: c_int, level: c_int, name: c_int, values: &[T]) -> io::Result<()> {
    let (val_ptr, val_len) = if values.is_empty() {
        (ptr::null(), 0)
    } else {
        (values.as_ptr() as *const c_void, mem::size_of_val(values))
    };

    let rv = unsafe { libc::setsockopt(fd, level, name, val_ptr, val_len as socklen_t) };
    if rv == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Typed `setsockopt` for a single value.
fn set_option<T>(fd: c_int, level: c_int, name: c_int, val: &T) -> io::Result<()> {
    set_option_slice(fd, level, name, slice::from_ref(val))
}

/// Create and bind the raw socket for the interface index.
///
/// The descriptor is wrapped before binding, so every failure path after
/// creation still closes it.
fn open_raw(ifindex: c_uint) -> Result<CanSocket, SocketOpenError> {
    let fd = unsafe { libc::socket(PF_CAN, SOCK_RAW, CAN_RAW) };
    if fd == -1 {
        return Err(io::Error::last_os_error().into());
    }
    let socket = CanSocket { fd };

    let addr = can_addr(ifindex);
    let rv = unsafe {
        libc::bind(
            socket.fd,
            &addr as *const sockaddr_can as *const sockaddr,
            mem::size_of::<sockaddr_can>() as socklen_t,
        )
    };
    if rv == -1 {
        return Err(io::Error::last_os_error().into());
    }

    Ok(socket)
}

// ===== Adapter / Transport traits =====

/// One open connection to a CAN bus, able to move whole frames.
///
/// CAN_RAW sockets are record-oriented: a write either transfers the whole
/// frame or fails, and a read yields exactly one frame.
pub trait Transport {
    /// Write a single frame, already in wire format.
    fn write_frame(&self, bytes: &[u8]) -> io::Result<()>;

    /// Read a single frame, blocking up to the configured receive timeout.
    ///
    /// `Ok(None)` means the timeout elapsed with nothing to read; any
    /// other failure is a transport error for the caller to handle.
    fn read_frame(&self, fd_enabled: bool) -> io::Result<Option<Vec<u8>>>;
}

/// Opens transports on a named interface.
///
/// Implemented by [`CanInterface`] for the Linux SocketCAN stack; test
/// doubles and alternative backends implement it to stand in for the bus.
pub trait Adapter {
    /// The transport this adapter produces.
    type Socket: Transport;

    /// Open a bound, configured socket.
    ///
    /// `fd_enabled` requests CAN FD frame support; `read_timeout` becomes
    /// the socket receive timeout, which bounds how long a blocked read
    /// (and therefore a listener stop request) can take.
    fn open(
        &self,
        ifname: &str,
        fd_enabled: bool,
        read_timeout: Duration,
    ) -> Result<Self::Socket, SocketOpenError>;
}

// ===== CanSocket =====

/// An open raw CAN socket.
///
/// Will be closed upon deallocation. To close manually, use std::drop::Drop.
/// Internally this is just a wrapped file-descriptor.
#[allow(missing_copy_implementations)]
#[derive(Debug)]
pub struct CanSocket {
    /// The raw file descriptor
    fd: c_int,
}

impl CanSocket {
    /// Sets the read timeout on the socket.
    ///
    /// For convenience, a read result can be checked with
    /// `ShouldRetry::should_retry` when a timeout is set.
    pub fn set_read_timeout(&self, duration: Duration) -> io::Result<()> {
        set_option(
            self.as_raw_fd(),
            SOL_SOCKET,
            SO_RCVTIMEO,
            &as_timeval(duration),
        )
    }

    /// Installs kernel prefilters on the socket.
    ///
    /// Received frames are matched against the pairs in the kernel; only
    /// matching frames reach this socket. By default a single pair
    /// matching everything is installed. An empty slice drops all traffic,
    /// as [`filter_drop_all`](Self::filter_drop_all) does.
    pub fn set_filters(&self, filters: &[IdMask]) -> io::Result<()> {
        let filters: Vec<libc::can_filter> = filters.iter().map(raw_filter).collect();
        set_option_slice(self.as_raw_fd(), SOL_CAN_RAW, CAN_RAW_FILTER, &filters)
    }

    /// Disable reception of CAN frames.
    ///
    /// Installs an empty prefilter list, dropping all incoming frames.
    pub fn filter_drop_all(&self) -> io::Result<()> {
        self.set_filters(&[])
    }

    /// Accept all frames, disabling any kind of kernel prefiltering.
    pub fn filter_accept_all(&self) -> io::Result<()> {
        self.set_filters(&[IdMask::new(0, 0)])
    }

    /// Sets the error mask on the socket.
    ///
    /// By default ([`ERR_MASK_NONE`]) no bus error conditions are
    /// reported as error frames. Setting [`ERR_MASK_ALL`] or another
    /// non-empty mask subscribes the socket to the selected conditions.
    pub fn set_error_filter(&self, mask: u32) -> io::Result<()> {
        set_option(self.as_raw_fd(), SOL_CAN_RAW, CAN_RAW_ERR_FILTER, &mask)
    }

    /// Enable or disable loopback.
    ///
    /// By default, loopback is enabled, so other applications on the same
    /// host that open the bus see frames this socket sends.
    pub fn set_loopback(&self, enabled: bool) -> io::Result<()> {
        let loopback = c_int::from(enabled);
        set_option(self.as_raw_fd(), SOL_CAN_RAW, CAN_RAW_LOOPBACK, &loopback)
    }

    /// Enable or disable receiving of own frames.
    ///
    /// When loopback is enabled, this controls whether frames sent on this
    /// socket are received back on it. Default is off.
    pub fn set_recv_own_msgs(&self, enabled: bool) -> io::Result<()> {
        let recv_own_msgs = c_int::from(enabled);
        set_option(
            self.as_raw_fd(),
            SOL_CAN_RAW,
            CAN_RAW_RECV_OWN_MSGS,
            &recv_own_msgs,
        )
    }

    /// Enables reception and transmission of CAN FD frames.
    ///
    /// Kernels without `CAN_RAW_FD_FRAMES` refuse the option; that case is
    /// logged and the socket stays in classic mode.
    fn set_fd_frames(&self, enable: bool) -> io::Result<()> {
        let enable = enable as c_int;
        match set_option(self.as_raw_fd(), SOL_CAN_RAW, CAN_RAW_FD_FRAMES, &enable) {
            Err(e) if e.raw_os_error() == Some(ENOPROTOOPT) => {
                warn!("kernel does not support CAN FD frames, staying in classic mode");
                Ok(())
            }
            other => other,
        }
    }
}

impl Transport for CanSocket {
    fn write_frame(&self, bytes: &[u8]) -> io::Result<()> {
        let ret = unsafe { libc::write(self.fd, bytes.as_ptr() as *const c_void, bytes.len()) };

        if ret as usize != bytes.len() {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    fn read_frame(&self, fd_enabled: bool) -> io::Result<Option<Vec<u8>>> {
        let size = if fd_enabled { CANFD_MTU } else { CAN_MTU };
        let mut buf = vec![0u8; size];

        let read_rv = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut c_void, size) };

        if read_rv < 0 {
            let err = io::Error::last_os_error();
            if err.should_retry() {
                return Ok(None);
            }
            return Err(err);
        }

        // an FD-enabled socket still delivers 16-byte classic frames
        buf.truncate(read_rv as usize);
        Ok(Some(buf))
    }
}

impl AsRawFd for CanSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl FromRawFd for CanSocket {
    unsafe fn from_raw_fd(fd: RawFd) -> CanSocket {
        CanSocket { fd }
    }
}

impl IntoRawFd for CanSocket {
    fn into_raw_fd(self) -> RawFd {
        let fd = self.fd;
        mem::forget(self);
        fd
    }
}

impl Drop for CanSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

// ===== CanInterface =====

/// The default SocketCAN adapter.
///
/// Opening resolves the interface name, creates and binds the raw socket,
/// sets the receive timeout, and enables FD frames when requested.
#[derive(Debug, Default, Clone, Copy)]
pub struct CanInterface;

impl Adapter for CanInterface {
    type Socket = CanSocket;

    fn open(
        &self,
        ifname: &str,
        fd_enabled: bool,
        read_timeout: Duration,
    ) -> Result<CanSocket, SocketOpenError> {
        let if_index = if_nametoindex(ifname)?;
        let socket = open_raw(if_index)?;
        socket.set_read_timeout(read_timeout)?;
        if fd_enabled {
            socket.set_fd_frames(true)?;
        }
        Ok(socket)
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefilter_maps_to_the_kernel_form() {
        let raw = raw_filter(&IdMask::new(0x123, 0x7FF));
        assert_eq!(raw.can_id, 0x123);
        assert_eq!(raw.can_mask, 0x7FF);

        let raw = raw_filter(&IdMask::new(0x123, 0x7FF).inverted());
        assert_ne!(raw.can_id & CAN_INV_FILTER, 0);
        assert_eq!(raw.can_id & !CAN_INV_FILTER, 0x123);
        assert_eq!(raw.can_mask, 0x7FF);
    }

    #[test]
    fn timeout_errors_should_retry() {
        assert!(io::Error::from(io::ErrorKind::WouldBlock).should_retry());
        assert!(io::Error::from_raw_os_error(EINPROGRESS).should_retry());
        assert!(!io::Error::from(io::ErrorKind::NotFound).should_retry());

        let res: io::Result<()> = Err(io::Error::from(io::ErrorKind::WouldBlock));
        assert!(res.should_retry());
        let res: io::Result<()> = Ok(());
        assert!(!res.should_retry());
    }

    #[test]
    fn timeval_conversion_keeps_subseconds() {
        let tv = as_timeval(Duration::from_millis(1500));
        assert_eq!(tv.tv_sec, 1);
        assert_eq!(tv.tv_usec, 500_000);
    }

    #[test]
    fn addr_carries_family_and_index() {
        let addr = can_addr(5);
        assert_eq!(addr.can_family, AF_CAN as sa_family_t);
        assert_eq!(addr.can_ifindex, 5);
    }
}
