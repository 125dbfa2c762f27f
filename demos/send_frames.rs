// can-messenger/demos/send_frames.rs
//
// Periodically send a frame on a CAN interface.
//
//   cargo run --example send_frames -- vcan0

use can_messenger::Messenger;
use std::time::Duration;

fn main() -> Result<(), can_messenger::Error> {
    let iface = std::env::args().nth(1).unwrap_or_else(|| "vcan0".into());
    let messenger = Messenger::new(&iface);

    loop {
        println!("Writing on {}", iface);
        messenger.send_raw(0x1, &[0])?;
        std::thread::sleep(Duration::from_secs(3));
    }
}
