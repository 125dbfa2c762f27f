// can-messenger/tests/messenger.rs
//
// Integration tests for the messenger against a scripted mock adapter.
//
// This file is part of the Rust 'can-messenger' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

use can_messenger::{
    Adapter, ByteOrder, CanFrame, Dbc, IdFilter, ListenOptions, Messenger, SocketOpenError,
    Transport,
};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// One scripted receive outcome.
enum Rx {
    /// Timeout tick: `read_frame` yields `Ok(None)`.
    Timeout,
    /// A frame arrives with these wire bytes.
    Frame(Vec<u8>),
    /// The read fails with an injected I/O error.
    Fault,
}

#[derive(Default)]
struct Shared {
    script: Mutex<VecDeque<Rx>>,
    written: Mutex<Vec<Vec<u8>>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

/// Test double for the SocketCAN adapter.
///
/// Reads pop scripted outcomes; an exhausted script keeps ticking
/// timeouts so a listener only exits through `stop_listening`.
#[derive(Clone, Default)]
struct MockAdapter {
    shared: Arc<Shared>,
    refuse_open: bool,
}

impl MockAdapter {
    fn refusing() -> Self {
        MockAdapter {
            refuse_open: true,
            ..Default::default()
        }
    }

    fn push(&self, rx: Rx) {
        self.shared.script.lock().unwrap().push_back(rx);
    }

    fn push_frame(&self, frame: &CanFrame) {
        self.push(Rx::Frame(frame.encode(ByteOrder::BigEndian)));
    }

    fn written(&self) -> Vec<Vec<u8>> {
        self.shared.written.lock().unwrap().clone()
    }

    fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

struct MockSocket {
    shared: Arc<Shared>,
}

impl Transport for MockSocket {
    fn write_frame(&self, bytes: &[u8]) -> io::Result<()> {
        self.shared.written.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    fn read_frame(&self, _fd_enabled: bool) -> io::Result<Option<Vec<u8>>> {
        match self.shared.script.lock().unwrap().pop_front() {
            Some(Rx::Frame(bytes)) => Ok(Some(bytes)),
            Some(Rx::Fault) => Err(io::Error::new(io::ErrorKind::Other, "injected fault")),
            Some(Rx::Timeout) | None => {
                // keep the pace of a real (fast) receive timeout
                thread::sleep(Duration::from_millis(1));
                Ok(None)
            }
        }
    }
}

impl Drop for MockSocket {
    fn drop(&mut self) {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Adapter for MockAdapter {
    type Socket = MockSocket;

    fn open(
        &self,
        _ifname: &str,
        _fd_enabled: bool,
        _read_timeout: Duration,
    ) -> Result<MockSocket, SocketOpenError> {
        if self.refuse_open {
            return Err(SocketOpenError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "no such interface",
            )));
        }
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MockSocket {
            shared: self.shared.clone(),
        })
    }
}

fn messenger(adapter: &MockAdapter) -> Messenger<MockAdapter> {
    Messenger::with_adapter("mock0", adapter.clone()).with_read_timeout(Duration::from_millis(5))
}

// ===== Sending =====

#[test]
fn send_raw_writes_the_classic_layout() {
    let adapter = MockAdapter::default();
    messenger(&adapter)
        .send_raw(0x123, &[0xDE, 0xAD, 0xBE, 0xEF])
        .unwrap();

    assert_eq!(
        adapter.written(),
        vec![vec![
            0x00, 0x00, 0x01, 0x23, 0x04, 0x00, 0x00, 0x00, 0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x00,
            0x00, 0x00
        ]]
    );
    assert_eq!(adapter.opens(), 1);
    assert_eq!(adapter.closes(), 1);
}

#[test]
fn send_raw_infers_extended_addressing() {
    let adapter = MockAdapter::default();
    messenger(&adapter)
        .send_raw(0x1ABC, &[0xDE, 0xAD, 0xBE, 0xEF])
        .unwrap();

    assert_eq!(
        adapter.written(),
        vec![vec![
            0x80, 0x00, 0x1A, 0xBC, 0x04, 0x00, 0x00, 0x00, 0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x00,
            0x00, 0x00
        ]]
    );
}

#[test]
fn send_raw_fd_writes_72_bytes() {
    let adapter = MockAdapter::default();
    messenger(&adapter)
        .with_fd(true)
        .send_raw(0x123, &[0xAA; 64])
        .unwrap();

    let written = adapter.written();
    assert_eq!(written.len(), 1);
    let bytes = &written[0];
    assert_eq!(bytes.len(), 72);
    assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x01, 0x23]);
    assert_eq!(bytes[4], 0x40);
    assert!(bytes[8..72].iter().all(|&b| b == 0xAA));
}

#[test]
fn send_raw_little_endian_id_word() {
    let adapter = MockAdapter::default();
    messenger(&adapter)
        .with_byte_order(ByteOrder::LittleEndian)
        .send_raw(0x123, &[])
        .unwrap();

    assert_eq!(&adapter.written()[0][0..4], &[0x23, 0x01, 0x00, 0x00]);
}

#[test]
fn send_raw_propagates_length_errors_without_opening() {
    let adapter = MockAdapter::default();
    assert!(messenger(&adapter).send_raw(0x123, &[0u8; 9]).is_err());
    assert_eq!(adapter.opens(), 0);
    assert!(adapter.written().is_empty());
}

#[test]
fn send_swallows_open_failures() {
    let adapter = MockAdapter::refusing();
    messenger(&adapter).send_raw(0x123, &[1, 2, 3]).unwrap();
    assert!(adapter.written().is_empty());
}

#[test]
fn send_with_dbc_encodes_and_writes() {
    let adapter = MockAdapter::default();
    let dbc = Dbc::new(
        "BO_ 256 Example: 8 Vector__XXX\n \
         SG_ Speed : 0|8@1+ (1,0) [0|255] \"km/h\" Vector__XXX\n \
         SG_ Temp : 8|8@1+ (0.5,0) [0|127.5] \"C\" Vector__XXX\n",
    );
    let values = HashMap::from([("Speed".to_string(), 10.0), ("Temp".to_string(), 20.0)]);
    messenger(&adapter)
        .send_with_dbc(&dbc, "Example", &values)
        .unwrap();

    assert_eq!(
        adapter.written(),
        vec![vec![
            0x00, 0x00, 0x01, 0x00, 0x08, 0x00, 0x00, 0x00, 10, 40, 0, 0, 0, 0, 0, 0
        ]]
    );
}

#[test]
fn send_with_dbc_unknown_message_propagates() {
    let adapter = MockAdapter::default();
    let dbc = Dbc::new("");
    assert!(messenger(&adapter)
        .send_with_dbc(&dbc, "Missing", &HashMap::new())
        .is_err());
    assert_eq!(adapter.opens(), 0);
}

// ===== Listening =====

#[test]
fn listener_stops_within_one_tick_and_releases_the_socket() {
    let adapter = MockAdapter::default();
    let messenger = messenger(&adapter);

    thread::scope(|scope| {
        let handle = scope.spawn(|| messenger.listen(ListenOptions::default(), |_| {}));

        while !messenger.is_listening() {
            thread::yield_now();
        }
        let stop_requested = Instant::now();
        messenger.stop_listening();
        handle.join().unwrap();

        // worst case is one receive timeout; the mock tick is 1 ms
        assert!(stop_requested.elapsed() < Duration::from_millis(250));
    });

    assert!(!messenger.is_listening());
    assert_eq!(adapter.opens(), 1);
    assert_eq!(adapter.closes(), 1);
}

#[test]
fn listener_applies_the_filter() {
    let adapter = MockAdapter::default();
    adapter.push_frame(&CanFrame::from_raw_parts(0x300, false, false, &[9]).unwrap());
    adapter.push_frame(&CanFrame::from_raw_parts(0x150, false, false, &[7]).unwrap());

    let messenger = messenger(&adapter);
    let seen = Mutex::new(Vec::new());
    let options = ListenOptions {
        filter: Some(IdFilter::Range(0x100..=0x200)),
        ..Default::default()
    };
    messenger.listen(options, |message| {
        seen.lock().unwrap().push(message.frame.id());
        messenger.stop_listening();
    });

    // 0x300 was dropped before the callback; 0x150 stopped the loop
    assert_eq!(*seen.lock().unwrap(), vec![0x150]);
}

#[test]
fn listener_attaches_dbc_decodes() {
    let adapter = MockAdapter::default();
    adapter.push_frame(&CanFrame::from_raw_parts(0x99, false, false, &[1]).unwrap());
    adapter.push_frame(
        &CanFrame::from_raw_parts(256, false, false, &[10, 40, 0, 0, 0, 0, 0, 0]).unwrap(),
    );

    let dbc = Dbc::new(
        "BO_ 256 Example: 8 Vector__XXX\n \
         SG_ Speed : 0|8@1+ (1,0) [0|255] \"km/h\" Vector__XXX\n \
         SG_ Temp : 8|8@1+ (0.5,0) [0|127.5] \"C\" Vector__XXX\n",
    );
    let messenger = messenger(&adapter);
    let seen = Mutex::new(Vec::new());
    let options = ListenOptions {
        dbc: Some(&dbc),
        ..Default::default()
    };
    messenger.listen(options, |message| {
        if message.frame.id() == 256 {
            messenger.stop_listening();
        }
        seen.lock().unwrap().push(message);
    });

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.len(), 2);
    // no database entry for 0x99
    assert!(seen[0].decoded.is_none());
    let decoded = seen[1].decoded.as_ref().unwrap();
    assert_eq!(decoded.name, "Example");
    assert_eq!(decoded.signals["Speed"], 10.0);
    assert_eq!(decoded.signals["Temp"], 20.0);
}

#[test]
fn listener_survives_read_faults_and_garbage_frames() {
    let adapter = MockAdapter::default();
    adapter.push(Rx::Fault);
    adapter.push(Rx::Frame(vec![0x01, 0x02])); // too short to parse
    adapter.push(Rx::Timeout);
    adapter.push_frame(&CanFrame::from_raw_parts(0x42, false, false, &[5]).unwrap());

    let messenger = messenger(&adapter);
    let seen = Mutex::new(Vec::new());
    messenger.listen(ListenOptions::default(), |message| {
        seen.lock().unwrap().push(message.frame.id());
        messenger.stop_listening();
    });

    assert_eq!(*seen.lock().unwrap(), vec![0x42]);
    assert_eq!(adapter.closes(), 1);
}

#[test]
fn listener_survives_a_panicking_callback() {
    let adapter = MockAdapter::default();
    adapter.push_frame(&CanFrame::from_raw_parts(0x10, false, false, &[]).unwrap());
    adapter.push_frame(&CanFrame::from_raw_parts(0x20, false, false, &[]).unwrap());

    let messenger = messenger(&adapter);
    let seen = Mutex::new(Vec::new());
    messenger.listen(ListenOptions::default(), |message| {
        seen.lock().unwrap().push(message.frame.id());
        if message.frame.id() == 0x10 {
            panic!("callback exploded");
        }
        messenger.stop_listening();
    });

    assert_eq!(*seen.lock().unwrap(), vec![0x10, 0x20]);
    assert_eq!(adapter.closes(), 1);
}

#[test]
fn listener_delivers_error_frames_with_the_flag_observable() {
    use can_messenger::IdFlags;

    let adapter = MockAdapter::default();
    // a no-ack error frame, as the kernel would deliver it
    let mut bytes = vec![0u8; 16];
    bytes[0..4].copy_from_slice(&(0x2000_0020u32).to_be_bytes());
    adapter.push(Rx::Frame(bytes));

    let messenger = messenger(&adapter);
    let seen = Mutex::new(Vec::new());
    messenger.listen(ListenOptions::default(), |message| {
        seen.lock().unwrap().push(message.frame.id_flags());
        messenger.stop_listening();
    });

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains(IdFlags::ERR));
}

#[test]
fn listener_is_reentrant_after_stop() {
    let adapter = MockAdapter::default();
    let messenger = messenger(&adapter);

    for round in 0..2 {
        adapter.push_frame(&CanFrame::from_raw_parts(0x100 + round, false, false, &[]).unwrap());
        let seen = Mutex::new(Vec::new());
        messenger.listen(ListenOptions::default(), |message| {
            seen.lock().unwrap().push(message.frame.id());
            messenger.stop_listening();
        });
        assert_eq!(*seen.lock().unwrap(), vec![0x100 + round]);
        assert!(!messenger.is_listening());
    }

    assert_eq!(adapter.opens(), 2);
    assert_eq!(adapter.closes(), 2);
}

#[test]
fn listener_logs_and_returns_when_open_fails() {
    let adapter = MockAdapter::refusing();
    let messenger = messenger(&adapter);
    let mut called = false;
    messenger.listen(ListenOptions::default(), |_| called = true);

    assert!(!called);
    assert!(!messenger.is_listening());
    assert_eq!(adapter.closes(), 0);
}
