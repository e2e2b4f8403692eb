// Publishes "index:sha256" messages; run `consumer` alongside to verify them.
use dmxp_channel::{Channel, ChannelOptions, ErrorCode};
use sha2::{Digest, Sha256};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const CHANNEL_NAME: &str = "dmxp-demo";
const MSG_HASH: u16 = 1;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <num_messages> [--auto-exit]", args[0]);
        std::process::exit(1);
    }

    let num_messages: usize = args[1].parse().expect("Invalid number of messages");
    let auto_exit = args.get(2).map(|s| s == "--auto-exit").unwrap_or(false);

    println!("Producer: Precomputing {} hashes...", num_messages);
    let start_precompute = Instant::now();
    let hashes: Vec<String> = (0..num_messages)
        .map(|i| format!("{:x}", Sha256::digest(format!("message_{}", i).as_bytes())))
        .collect();
    println!(
        "Producer: Precomputed {} hashes in {:.2?}",
        num_messages,
        start_precompute.elapsed()
    );

    let channel = Channel::join(CHANNEL_NAME, ChannelOptions::new())?;
    if channel.last_error() == Some(ErrorCode::ChanStale) {
        println!("Producer: Previous owner is gone, recovering channel");
        channel.recover()?;
    }

    let keep_alive = Arc::new(AtomicBool::new(true));
    let keep_alive_for_handler = Arc::clone(&keep_alive);

    // Handle Ctrl+C to clean up
    ctrlc::set_handler(move || {
        keep_alive_for_handler.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    println!(
        "Producer: Joined {} ({} byte ring)",
        channel.name(),
        channel.capacity()
    );

    let start_send = Instant::now();
    let mut sent = 0;

    for (i, hash) in hashes.iter().enumerate() {
        if !keep_alive.load(Ordering::SeqCst) {
            break;
        }
        // Format: "message_number:hash"
        let message = format!("{}:{}", i, hash);

        loop {
            match channel.write(MSG_HASH, message.as_bytes()) {
                Ok(()) => {
                    sent += 1;
                    if sent % 100 == 0 {
                        println!("Sent {} messages", sent);
                    }
                    break;
                }
                Err(e) if e.is_retryable() => {
                    std::thread::sleep(Duration::from_micros(10));
                }
                Err(e) => {
                    eprintln!("Failed to send message {}: {}", i, e);
                    break;
                }
            }
        }
    }

    let send_time = start_send.elapsed();
    println!("Producer: Sent {} messages in {:.2?}", sent, send_time);
    println!(
        "Producer: Throughput: {:.2} messages/sec",
        sent as f64 / send_time.as_secs_f64()
    );

    if auto_exit {
        println!("Producer: Auto-exit mode, waiting 2 seconds for consumer...");
        std::thread::sleep(Duration::from_secs(2));
    } else {
        println!("Waiting for consumer to finish processing (press Ctrl+C to exit)...");
        while keep_alive.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    let stats = channel.get_stats();
    println!(
        "Producer: Shutting down ({} written, {} read, {} lock retries)",
        stats.messages_written, stats.messages_read, stats.write_contention_count
    );
    channel.leave()?;
    Ok(())
}
