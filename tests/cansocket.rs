// can-messenger/tests/cansocket.rs
//
// Integration tests against a real virtual CAN interface.
//
// These need a vcan device on the host:
//   sudo modprobe vcan
//   sudo ip link add dev vcan0 type vcan
//   sudo ip link set up vcan0
// and run with `cargo test --features vcan_tests`.
//
// This file is part of the Rust 'can-messenger' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

#![cfg(feature = "vcan_tests")]

use can_messenger::{
    Adapter, ByteOrder, CanFrame, CanInterface, ListenOptions, Messenger, Transport,
};
use std::thread;
use std::time::Duration;

// The virtual CAN interface to use for tests.
const VCAN: &str = "vcan0";

#[test]
fn nonexistent_device_fails_to_open() {
    assert!(CanInterface
        .open("invalid", false, Duration::from_millis(100))
        .is_err());
}

#[test]
fn vcan_read_times_out_quietly() {
    let socket = CanInterface
        .open(VCAN, false, Duration::from_millis(100))
        .unwrap();
    assert!(socket.read_frame(false).unwrap().is_none());
}

#[test]
fn vcan_socket_options_are_accepted() {
    use can_messenger::socket::{ERR_MASK_ALL, ERR_MASK_NONE};
    use can_messenger::IdMask;

    let socket = CanInterface
        .open(VCAN, false, Duration::from_millis(100))
        .unwrap();

    socket
        .set_filters(&[IdMask::new(0x100, 0x700), IdMask::new(0x200, 0x700)])
        .unwrap();
    socket
        .set_filters(&[IdMask::new(0x123, 0x7FF).inverted()])
        .unwrap();
    socket.filter_accept_all().unwrap();
    socket.set_error_filter(ERR_MASK_ALL).unwrap();
    socket.set_error_filter(ERR_MASK_NONE).unwrap();
    socket.set_loopback(true).unwrap();
    socket.set_recv_own_msgs(true).unwrap();
}

#[test]
fn vcan_kernel_filter_drops_everything() {
    let socket = CanInterface
        .open(VCAN, false, Duration::from_millis(100))
        .unwrap();
    socket.filter_drop_all().unwrap();

    Messenger::new(VCAN).send_raw(0x123, &[1]).unwrap();
    assert!(socket.read_frame(false).unwrap().is_none());
}

#[test]
fn vcan_send_and_receive_round_trip() {
    let receiver = Messenger::new(VCAN)
        .with_byte_order(native_order())
        .with_read_timeout(Duration::from_millis(200));
    let sender = Messenger::new(VCAN).with_byte_order(native_order());

    thread::scope(|scope| {
        let frames = scope.spawn(|| {
            let mut seen = Vec::new();
            receiver.listen(ListenOptions::default(), |message| {
                seen.push((message.frame.id(), message.frame.data().to_vec()));
                receiver.stop_listening();
            });
            seen
        });

        while !receiver.is_listening() {
            thread::yield_now();
        }
        // loopback delivers this to the receiver's socket
        sender.send_raw(0x123, &[0xDE, 0xAD]).unwrap();

        let seen = frames.join().unwrap();
        assert_eq!(seen, vec![(0x123, vec![0xDE, 0xAD])]);
    });
}

#[test]
fn vcan_wire_bytes_match_the_kernel_layout() {
    let socket = CanInterface
        .open(VCAN, false, Duration::from_millis(200))
        .unwrap();
    let probe = CanInterface
        .open(VCAN, false, Duration::from_millis(200))
        .unwrap();

    let order = native_order();
    let frame = CanFrame::from_raw_parts(0x1ABC, true, false, &[1, 2, 3]).unwrap();
    socket.write_frame(&frame.encode(order)).unwrap();

    let bytes = probe.read_frame(false).unwrap().expect("no frame on vcan");
    let parsed = CanFrame::parse(&bytes, order, None).unwrap();
    assert_eq!(parsed, frame);
}

// The kernel packs the id word in native order.
fn native_order() -> ByteOrder {
    if cfg!(target_endian = "big") {
        ByteOrder::BigEndian
    } else {
        ByteOrder::LittleEndian
    }
}
