// Polls the demo channel and checks each "index:sha256" message.
use dmxp_channel::{Channel, ChannelOptions, CreatePolicy, ErrorCode};
use sha2::{Digest, Sha256};
use std::env;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const CHANNEL_NAME: &str = "dmxp-demo";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <expected_messages>", args[0]);
        std::process::exit(1);
    }

    let expected_messages: usize = args[1].parse().expect("Invalid number of messages");
    let mut received = 0;
    let mut mismatched = 0;

    println!("Consumer: Waiting for {}...", CHANNEL_NAME);
    let options = ChannelOptions::new().with_create_policy(CreatePolicy::JoinOnly);
    let channel = match Channel::join(CHANNEL_NAME, options) {
        Ok(channel) => channel,
        Err(e) => {
            eprintln!("Failed to join channel: {}", e);
            return Ok(());
        }
    };

    let start = Instant::now();
    let mut last_progress = Instant::now();
    println!("\n{:<10} {}", "Msg #", "Hash");
    println!("{}", "=".repeat(80));

    while received < expected_messages {
        match channel.peek() {
            Ok(msg) => {
                let text = String::from_utf8_lossy(msg.payload()).into_owned();
                channel.release(msg)?;

                // Parse "message_number:hash" format
                match text.split_once(':') {
                    Some((num_str, hash)) => {
                        let expected = format!(
                            "{:x}",
                            Sha256::digest(format!("message_{}", num_str).as_bytes())
                        );
                        if expected != hash {
                            mismatched += 1;
                        }
                        println!("{:<10} {}", num_str, hash);
                    }
                    None => println!("Invalid format: {}", text),
                }
                received += 1;
                last_progress = Instant::now();

                if received % 100 == 0 {
                    println!("--- Received {} messages ---", received);
                }
            }
            Err(ErrorCode::TimedOut) => {
                if last_progress.elapsed() > Duration::from_secs(5) {
                    eprintln!("Timeout waiting for messages");
                    break;
                }
                std::thread::yield_now();
            }
            Err(e) => {
                eprintln!("Error receiving message: {}", e);
                break;
            }
        }
    }

    let elapsed = start.elapsed();
    println!("\n{}", "=".repeat(80));
    println!("Consumer: Received {} messages in {:.2?}", received, elapsed);
    println!(
        "Average: {:.2} messages/second",
        received as f64 / elapsed.as_secs_f64()
    );

    if received == expected_messages && mismatched == 0 {
        println!("All messages received and verified");
    } else if mismatched > 0 {
        println!("{} messages failed hash verification", mismatched);
    }

    channel.leave()?;
    Ok(())
}
