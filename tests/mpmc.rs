// Many writers and readers sharing one channel, plus blocking and readiness wakeups.
// Run with: cargo test --test mpmc -- --nocapture

use dmxp_channel::IPC::Buffer::CHANNEL_HEADER_SIZE;
use dmxp_channel::{Channel, ChannelOptions, CreatePolicy, ErrorCode};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

static SEQ: AtomicUsize = AtomicUsize::new(0);

fn unique_name(tag: &str) -> String {
    format!(
        "dmxp-mpmc-{}-{}-{}",
        tag,
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

fn join(name: &str) -> Channel {
    Channel::join(
        name,
        ChannelOptions::new().with_create_policy(CreatePolicy::JoinOnly),
    )
    .unwrap()
}

/// Payload: writer id, sequence number, then random filler.
fn encode(writer: u16, seq: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&writer.to_le_bytes());
    buf.extend_from_slice(&seq.to_le_bytes());
    let filler = fastrand::usize(0..200);
    buf.extend((0..filler).map(|i| (i as u8) ^ (seq as u8)));
    buf
}

fn decode(payload: &[u8]) -> (u16, u32) {
    let writer = u16::from_le_bytes([payload[0], payload[1]]);
    let seq = u32::from_le_bytes([payload[2], payload[3], payload[4], payload[5]]);
    for (i, b) in payload[6..].iter().enumerate() {
        assert_eq!(*b, (i as u8) ^ (seq as u8), "filler damaged");
    }
    (writer, seq)
}

#[test]
fn mpmc_correctness_many_threads() {
    let name = unique_name("many");
    // Small enough that writers regularly hit BufferFull
    let owner = Channel::join(
        &name,
        ChannelOptions::new()
            .with_size(CHANNEL_HEADER_SIZE + 16 * 1024)
            .with_create_policy(CreatePolicy::CreateOnly),
    )
    .unwrap();

    let writers = 4u16;
    let readers = 3;
    let msgs_per_writer = 2000u32;
    let total = writers as usize * msgs_per_writer as usize;

    let received = Arc::new(Mutex::new(Vec::with_capacity(total)));
    let consumed = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for w in 0..writers {
        let name = name.clone();
        handles.push(thread::spawn(move || {
            let ch = join(&name);
            for seq in 0..msgs_per_writer {
                let payload = encode(w, seq);
                loop {
                    match ch.write(w, &payload) {
                        Ok(()) => break,
                        Err(e) if e.is_retryable() => thread::yield_now(),
                        Err(e) => panic!("writer {} failed: {}", w, e),
                    }
                }
            }
        }));
    }

    for _ in 0..readers {
        let name = name.clone();
        let received = Arc::clone(&received);
        let consumed = Arc::clone(&consumed);
        handles.push(thread::spawn(move || {
            let ch = join(&name);
            let mut local = Vec::new();
            while consumed.load(Ordering::Acquire) < total {
                let msg = match ch.read(Some(Duration::from_millis(20))) {
                    Ok(msg) => msg,
                    Err(ErrorCode::TimedOut) => continue,
                    Err(e) => panic!("reader failed: {}", e),
                };
                // Only trust the bytes once our release proves nobody freed the slot
                let payload = msg.payload().to_vec();
                let msg_type = msg.msg_type();
                match ch.release(msg) {
                    Ok(()) => {
                        let decoded = decode(&payload);
                        assert_eq!(msg_type, decoded.0);
                        local.push(decoded);
                        consumed.fetch_add(1, Ordering::AcqRel);
                    }
                    // Another reader got there first
                    Err(ErrorCode::InvalidArg) => {}
                    Err(e) => panic!("release failed: {}", e),
                }
            }
            received.lock().unwrap().extend(local);
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    let received = received.lock().unwrap();
    assert_eq!(received.len(), total);
    let unique: HashSet<_> = received.iter().copied().collect();
    assert_eq!(unique.len(), total, "a message was delivered twice");

    let stats = owner.get_stats();
    println!("stats: {:?}", stats);
    assert_eq!(stats.messages_written, total as u64);
    assert_eq!(stats.messages_read, total as u64);
    assert_eq!(stats.bytes_written, stats.bytes_read);
    assert_eq!(stats.buffer_bytes_used, 0);
    assert_eq!(stats.buffer_bytes_reserved, 0);
}

#[test]
fn per_writer_order_is_preserved() {
    let name = unique_name("order");
    let reader = Channel::join(
        &name,
        ChannelOptions::new()
            .with_size(CHANNEL_HEADER_SIZE + 8 * 1024)
            .with_create_policy(CreatePolicy::CreateOnly),
    )
    .unwrap();

    let writers = 3u16;
    let per_writer = 1000u32;
    let mut handles = vec![];
    for w in 0..writers {
        let name = name.clone();
        handles.push(thread::spawn(move || {
            let ch = join(&name);
            for seq in 0..per_writer {
                let payload = encode(w, seq);
                while let Err(e) = ch.write(w, &payload) {
                    assert!(e.is_retryable(), "writer {} failed: {}", w, e);
                    thread::yield_now();
                }
            }
        }));
    }

    let mut next = vec![0u32; writers as usize];
    let mut remaining = writers as usize * per_writer as usize;
    while remaining > 0 {
        let msg = reader.read(Some(Duration::from_secs(5))).unwrap();
        let (w, seq) = decode(msg.payload());
        assert_eq!(seq, next[w as usize], "writer {} out of order", w);
        next[w as usize] += 1;
        reader.release(msg).unwrap();
        remaining -= 1;
    }
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn writers_spinning_on_the_lock_count_contention() {
    let name = unique_name("contention");
    let opts = ChannelOptions::new().with_lock_timeout(Duration::from_secs(2));
    let owner = Channel::join(&name, opts.clone().with_create_policy(CreatePolicy::CreateOnly))
        .unwrap();

    let writers = 3;
    let barrier = Arc::new(Barrier::new(writers + 1));
    // Hold the cursor lock so every writer has to spin for it
    owner.header().lock.store(1, Ordering::Release);

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let name = name.clone();
            let opts = opts.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let ch = Channel::join(&name, opts.with_create_policy(CreatePolicy::JoinOnly))
                    .unwrap();
                barrier.wait();
                ch.write(w as u16, b"contended").unwrap();
            })
        })
        .collect();

    barrier.wait();
    let deadline = Instant::now() + Duration::from_millis(500);
    while owner.header().write_contention_count.load(Ordering::Relaxed) == 0
        && Instant::now() < deadline
    {
        thread::sleep(Duration::from_millis(1));
    }
    thread::sleep(Duration::from_millis(10));
    owner.header().lock.store(0, Ordering::Release);

    for h in handles {
        h.join().unwrap();
    }
    let stats = owner.get_stats();
    assert!(stats.write_contention_count > 0, "stats: {:?}", stats);
    assert_eq!(stats.messages_written, writers as u64);
}

#[test]
fn stats_are_taken_under_the_cursor_lock() {
    let owner = Channel::join(
        &unique_name("stats-lock"),
        ChannelOptions::new()
            .with_create_policy(CreatePolicy::CreateOnly)
            .with_lock_timeout(Duration::from_secs(2)),
    )
    .unwrap();
    owner.write(1, b"counted").unwrap();

    owner.header().lock.store(1, Ordering::Release);
    thread::scope(|s| {
        let snapshot = s.spawn(|| owner.get_stats());
        thread::sleep(Duration::from_millis(30));
        assert!(!snapshot.is_finished(), "stats read while the lock was held");
        owner.header().lock.store(0, Ordering::Release);
        let stats = snapshot.join().unwrap();
        assert_eq!(stats.messages_written, 1);
        assert_eq!(stats.buffer_bytes_used, 48);
    });
}

#[test]
fn stats_snapshots_stay_consistent_under_traffic() {
    let name = unique_name("stats-traffic");
    let owner = Channel::join(
        &name,
        ChannelOptions::new()
            .with_size(CHANNEL_HEADER_SIZE + 2048)
            .with_create_policy(CreatePolicy::CreateOnly),
    )
    .unwrap();
    let capacity = owner.capacity();
    let rounds = 3000u32;

    thread::scope(|s| {
        s.spawn(|| {
            let ch = join(&name);
            for seq in 0..rounds {
                let payload = encode(0, seq);
                while let Err(e) = ch.write(0, &payload) {
                    assert!(e.is_retryable(), "writer failed: {}", e);
                    thread::yield_now();
                }
            }
        });
        s.spawn(|| {
            let ch = join(&name);
            let mut seen = 0;
            while seen < rounds {
                let msg = match ch.read(Some(Duration::from_millis(20))) {
                    Ok(msg) => msg,
                    Err(ErrorCode::TimedOut) => continue,
                    Err(e) => panic!("reader failed: {}", e),
                };
                ch.release(msg).unwrap();
                seen += 1;
            }
        });

        let mut last_written = 0;
        loop {
            let stats = owner.get_stats();
            assert!(stats.buffer_bytes_used + stats.buffer_bytes_reserved <= capacity, "{:?}", stats);
            assert!(stats.messages_read <= stats.messages_written, "{:?}", stats);
            assert!(stats.messages_written >= last_written);
            last_written = stats.messages_written;
            if stats.messages_read == rounds as u64 {
                break;
            }
        }
    });
}

#[test]
fn blocking_read_wakes_on_write() {
    let name = unique_name("wake");
    let reader = Channel::join(
        &name,
        ChannelOptions::new().with_create_policy(CreatePolicy::CreateOnly),
    )
    .unwrap();

    let writer = thread::spawn({
        let name = name.clone();
        move || {
            let ch = join(&name);
            thread::sleep(Duration::from_millis(50));
            ch.write(5, b"wake up").unwrap();
        }
    });

    let started = Instant::now();
    let msg = reader.read(None).unwrap();
    assert_eq!(msg.payload(), b"wake up");
    assert!(started.elapsed() >= Duration::from_millis(40));
    reader.release(msg).unwrap();
    writer.join().unwrap();
}

#[test]
fn interrupt_unblocks_reader() {
    let ch = Arc::new(
        Channel::join(
            &unique_name("interrupt"),
            ChannelOptions::new().with_create_policy(CreatePolicy::CreateOnly),
        )
        .unwrap(),
    );

    let blocked = thread::spawn({
        let ch = Arc::clone(&ch);
        move || ch.read(None).map(|msg| msg.payload().to_vec())
    });

    thread::sleep(Duration::from_millis(50));
    ch.interrupt();
    assert_eq!(blocked.join().unwrap().unwrap_err(), ErrorCode::TimedOut);

    // Later reads are unaffected
    ch.write(1, b"still works").unwrap();
    assert_eq!(
        ch.read(Some(Duration::from_millis(100))).unwrap().payload(),
        b"still works"
    );
}

#[cfg(target_os = "linux")]
#[test]
fn readiness_fd_signals_new_messages() {
    let name = unique_name("fd");
    let reader = Channel::join(
        &name,
        ChannelOptions::new().with_create_policy(CreatePolicy::CreateOnly),
    )
    .unwrap();
    let writer = join(&name);

    let fd = reader.get_fd().unwrap();
    assert!(fd >= 0);
    assert_eq!(reader.get_fd().unwrap(), fd, "descriptor is created once");

    let poll = |timeout_ms: i32| {
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let n = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        n == 1 && (pfd.revents & libc::POLLIN) != 0
    };

    assert!(!poll(50), "readable with nothing published");

    writer.write(1, b"ping").unwrap();
    assert!(poll(2000), "not readable after a write");

    reader.acknowledge_fd();
    let msg = reader.peek().unwrap();
    assert_eq!(msg.payload(), b"ping");
    reader.release(msg).unwrap();
    assert!(!poll(50), "still readable after acknowledge");

    writer.write(2, b"pong").unwrap();
    assert!(poll(2000));
}
