use dmxp_channel::{Channel, ChannelOptions, CreatePolicy};
use std::env;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let name = args.get(1).map(String::as_str).unwrap_or("dmxp-demo");

    println!("Blocking Consumer: Connecting to {}", name);

    let options = ChannelOptions::new().with_create_policy(CreatePolicy::JoinOnly);
    let channel = Channel::join(name, options)?;

    println!("Blocking Consumer: Waiting for messages...");

    loop {
        match channel.read(None) {
            Ok(msg) => {
                println!(
                    "Received [type {} from pid {}]: {}",
                    msg.msg_type(),
                    msg.sender_pid(),
                    String::from_utf8_lossy(msg.payload())
                );
                channel.release(msg)?;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    channel.leave()?;
    Ok(())
}
