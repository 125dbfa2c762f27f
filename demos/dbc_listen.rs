// can-messenger/demos/dbc_listen.rs
//
// Decode traffic against a DBC file and print engineering values.
//
//   cargo run --example dbc_listen -- vehicle.dbc vcan0

use can_messenger::{Dbc, ListenOptions, Messenger};

fn main() -> std::io::Result<()> {
    let mut args = std::env::args().skip(1);
    let dbc_path = args.next().expect("usage: dbc_listen <file.dbc> [iface]");
    let iface = args.next().unwrap_or_else(|| "vcan0".into());

    let dbc = Dbc::load(&dbc_path)?;
    println!("Loaded {} messages from {}", dbc.len(), dbc_path);

    let messenger = Messenger::new(&iface);
    let options = ListenOptions {
        dbc: Some(&dbc),
        ..Default::default()
    };
    messenger.listen(options, |message| match &message.decoded {
        Some(decoded) => println!("{}: {:?}", decoded.name, decoded.signals),
        None => println!("{:X}", message.frame),
    });

    Ok(())
}
