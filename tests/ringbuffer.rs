// Single-handle ring behaviour: framing, FIFO order, wraparound, capacity limits
// and corruption detection.
// Run with: cargo test --test ringbuffer -- --nocapture

use dmxp_channel::Core::{attach_shared_memory, SharedMemoryBackend};
use dmxp_channel::IPC::Buffer::CHANNEL_HEADER_SIZE;
use dmxp_channel::{Channel, ChannelOptions, CreatePolicy, ErrorCode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

static SEQ: AtomicUsize = AtomicUsize::new(0);

fn unique_name(tag: &str) -> String {
    format!(
        "dmxp-rb-{}-{}-{}",
        tag,
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// A freshly created channel whose ring holds exactly `capacity` bytes.
fn channel_with_capacity(tag: &str, capacity: usize) -> Channel {
    let opts = ChannelOptions::new()
        .with_size(CHANNEL_HEADER_SIZE + capacity)
        .with_create_policy(CreatePolicy::CreateOnly);
    let ch = Channel::join(&unique_name(tag), opts).unwrap();
    assert_eq!(ch.capacity(), capacity);
    ch
}

#[test]
fn test_write_read_round_trip() {
    let ch = channel_with_capacity("roundtrip", 4096);
    ch.write(7, b"hello channel").unwrap();

    let msg = ch.read(Some(Duration::from_millis(100))).unwrap();
    assert_eq!(msg.payload(), b"hello channel");
    assert_eq!(msg.msg_type(), 7);
    assert_eq!(msg.sender_pid(), std::process::id() as i32);
    assert_eq!(msg.iov_count(), 1);
    assert_eq!(msg.total_len(), 56);
    assert!(!msg.is_owned());
    assert!(msg.timestamp().seconds > 0);
    ch.release(msg).unwrap();

    let stats = ch.get_stats();
    assert_eq!(stats.messages_written, 1);
    assert_eq!(stats.messages_read, 1);
    assert_eq!(stats.bytes_written, 13);
    assert_eq!(stats.bytes_read, 13);
    assert_eq!(stats.buffer_bytes_used, 0);
    assert_eq!(ch.last_error(), None);
}

#[test]
fn test_fifo_order_and_framing() {
    let ch = channel_with_capacity("fifo", 64 * 1024);
    let mut sent = Vec::new();
    for i in 0..200u16 {
        let len = fastrand::usize(0..300);
        let payload: Vec<u8> = (0..len).map(|_| fastrand::u8(..)).collect();
        ch.write(i, &payload).unwrap();
        sent.push(payload);
        // Drain now and then so the ring wraps several times
        if i % 3 == 2 {
            while let Ok(msg) = ch.peek() {
                let idx = msg.msg_type() as usize;
                assert_eq!(msg.payload(), sent[idx].as_slice());
                ch.release(msg).unwrap();
            }
        }
    }
    while let Ok(msg) = ch.peek() {
        ch.release(msg).unwrap();
    }
    let stats = ch.get_stats();
    assert_eq!(stats.messages_written, 200);
    assert_eq!(stats.messages_read, 200);
    assert_eq!(stats.bytes_read, sent.iter().map(|p| p.len() as u64).sum::<u64>());
}

#[test]
fn test_messages_arrive_in_write_order() {
    let ch = channel_with_capacity("order", 4096);
    for i in 0..10u16 {
        ch.write(i, &i.to_le_bytes()).unwrap();
    }
    for i in 0..10u16 {
        let msg = ch.peek().unwrap();
        assert_eq!(msg.msg_type(), i);
        assert_eq!(msg.payload(), i.to_le_bytes());
        ch.release(msg).unwrap();
    }
    assert_eq!(ch.peek().unwrap_err(), ErrorCode::TimedOut);
}

#[test]
fn test_zero_length_and_scatter_writes() {
    let ch = channel_with_capacity("scatter", 4096);
    ch.write(1, &[]).unwrap();
    ch.writev(2, &[&b"abc"[..], &b""[..], &b"defg"[..]]).unwrap();

    let msg = ch.peek().unwrap();
    assert!(msg.payload().is_empty());
    assert_eq!(msg.total_len(), 40);
    ch.release(msg).unwrap();

    let msg = ch.peek().unwrap();
    assert_eq!(msg.payload(), b"abcdefg");
    assert_eq!(msg.iov_count(), 3);
    ch.release(msg).unwrap();
}

#[test]
fn test_empty_channel_times_out() {
    let ch = channel_with_capacity("empty", 1024);
    assert_eq!(ch.peek().unwrap_err(), ErrorCode::TimedOut);
    assert_eq!(ch.last_error(), Some(ErrorCode::TimedOut));
    assert_eq!(ch.read(Some(Duration::ZERO)).unwrap_err(), ErrorCode::TimedOut);

    let started = Instant::now();
    assert_eq!(
        ch.read(Some(Duration::from_millis(50))).unwrap_err(),
        ErrorCode::TimedOut
    );
    assert!(started.elapsed() >= Duration::from_millis(50));

    // A successful operation clears the recorded error
    ch.write(1, b"x").unwrap();
    assert_eq!(ch.last_error(), None);
}

#[test]
fn test_peek_does_not_consume() {
    let ch = channel_with_capacity("peek", 1024);
    ch.write(3, b"first").unwrap();
    ch.write(4, b"second").unwrap();

    let a = ch.peek().unwrap();
    let b = ch.peek().unwrap();
    assert_eq!(a.start(), b.start());
    assert_eq!(a.payload(), b"first");
    drop(b);
    ch.release(a).unwrap();

    let msg = ch.peek().unwrap();
    assert_eq!(msg.payload(), b"second");
}

#[test]
fn test_capacity_boundary() {
    let ch = channel_with_capacity("boundary", 256);

    // Largest payload: the slot takes the whole ring
    assert_eq!(ch.write(1, &[0xAB; 217]).unwrap_err(), ErrorCode::MsgTooLarge);
    ch.write(1, &[0xAB; 216]).unwrap();
    assert_eq!(ch.get_stats().buffer_bytes_used, 256);

    assert_eq!(ch.write(2, &[]).unwrap_err(), ErrorCode::BufferFull);
    assert!(ErrorCode::BufferFull.is_retryable());

    let msg = ch.peek().unwrap();
    assert_eq!(msg.payload().len(), 216);
    ch.release(msg).unwrap();

    // Space is reusable once released
    ch.write(2, &[]).unwrap();
}

#[test]
fn test_full_then_partial_free() {
    let ch = channel_with_capacity("partial", 256);
    // Four 64-byte slots fill the ring
    for i in 0..4u16 {
        ch.write(i, &[i as u8; 24]).unwrap();
    }
    assert_eq!(ch.write(9, &[0; 24]).unwrap_err(), ErrorCode::BufferFull);
    let msg = ch.peek().unwrap();
    ch.release(msg).unwrap();
    ch.write(9, &[0; 24]).unwrap();
    assert_eq!(ch.write(10, &[]).unwrap_err(), ErrorCode::BufferFull);
}

#[test]
fn test_wrapped_message_is_linearized() {
    let ch = channel_with_capacity("wrap", 256);

    // Move the cursors to offset 144
    ch.write(1, &[1; 100]).unwrap();
    let msg = ch.peek().unwrap();
    ch.release(msg).unwrap();

    // 40 + 100 bytes from offset 144 run past the physical end at 256
    let payload: Vec<u8> = (0..100).map(|i| i as u8).collect();
    ch.write(2, &payload).unwrap();
    let msg = ch.peek().unwrap();
    assert!(msg.is_owned());
    assert_eq!(msg.payload(), payload.as_slice());
    assert_eq!(msg.msg_type(), 2);
    ch.release(msg).unwrap();

    // The header itself straddling the end must also work
    let ch = channel_with_capacity("wrap-header", 256);
    ch.write(1, &[0; 200]).unwrap(); // 240-byte slot
    let msg = ch.peek().unwrap();
    ch.release(msg).unwrap();
    ch.write(5, b"split header").unwrap();
    let msg = ch.peek().unwrap();
    assert_eq!(msg.payload(), b"split header");
    assert_eq!(msg.msg_type(), 5);
    ch.release(msg).unwrap();
}

#[test]
fn test_release_of_consumed_message_is_rejected() {
    let name = unique_name("double");
    let a = Channel::join(&name, ChannelOptions::new().with_size(8192)).unwrap();
    let b = Channel::join(&name, ChannelOptions::new()).unwrap();
    a.write(1, b"only one").unwrap();

    let seen_by_a = a.peek().unwrap();
    let seen_by_b = b.peek().unwrap();
    assert_eq!(seen_by_a.start(), seen_by_b.start());

    a.release(seen_by_a).unwrap();
    assert_eq!(b.release(seen_by_b).unwrap_err(), ErrorCode::InvalidArg);
    assert_eq!(b.get_stats().messages_read, 1);
}

#[test]
fn test_release_through_wrong_handle_is_rejected() {
    let a = channel_with_capacity("wrong-a", 1024);
    let b = channel_with_capacity("wrong-b", 1024);
    a.write(1, b"x").unwrap();
    let msg = a.peek().unwrap();
    assert_eq!(b.release(msg).unwrap_err(), ErrorCode::InvalidArg);
    // Still unconsumed on its own channel
    assert_eq!(a.peek().unwrap().payload(), b"x");
}

#[test]
fn test_corrupt_header_is_detected() {
    let ch = channel_with_capacity("corrupt", 1024);
    ch.write(1, b"about to be damaged").unwrap();

    // Scribble over the slot's magic through a second mapping
    let raw = attach_shared_memory(ch.path(), 0).unwrap();
    unsafe {
        let slot = raw.as_ptr().add(CHANNEL_HEADER_SIZE);
        std::ptr::write_bytes(slot, 0x5A, 8);
    }

    assert_eq!(ch.peek().unwrap_err(), ErrorCode::Corrupt);
    assert_eq!(ch.last_error(), Some(ErrorCode::Corrupt));
    assert!(ErrorCode::Corrupt.is_fatal());
}

#[test]
fn test_stats_do_not_disturb_the_channel() {
    let ch = channel_with_capacity("stats", 1024);
    ch.write(1, b"abc").unwrap();
    let first = ch.get_stats();
    let second = ch.get_stats();
    assert_eq!(first, second);
    assert_eq!(first.buffer_capacity, 1024);
    assert_eq!(first.buffer_bytes_used, 48);
    assert_eq!(first.buffer_bytes_reserved, 0);
    assert_eq!(first.active_connections, 1);
    assert_eq!(first.owner_pid, std::process::id() as i32);
}
