// can-messenger/demos/print_frames.rs
//
// Print every frame seen on a CAN interface until Ctrl-C.
//
//   cargo run --example print_frames -- vcan0

use can_messenger::{ListenOptions, Messenger};

fn main() {
    let iface = std::env::args().nth(1).unwrap_or_else(|| "vcan0".into());
    let messenger = Messenger::new(&iface);

    println!("Reading on {}", iface);
    messenger.listen(ListenOptions::default(), |message| {
        println!("{:X}", message.frame);
    });
}
