// Allocation tracking for the read and write paths
//
// Note: dhat only allows one profiler per process at a time, so everything runs
// inside a single #[serial_test::serial] test.
//
// # Run
// cargo test --test allocation_tracking -- --nocapture

use dmxp_channel::IPC::Buffer::CHANNEL_HEADER_SIZE;
use dmxp_channel::{Channel, ChannelOptions, CreatePolicy};

#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

#[test]
#[serial_test::serial]
fn test_channel_hot_path_with_dhat() {
    let name = format!("dmxp-alloc-{}", std::process::id());
    let ch = Channel::join(
        &name,
        ChannelOptions::new()
            .with_size(CHANNEL_HEADER_SIZE + 256)
            .with_create_policy(CreatePolicy::CreateOnly),
    )
    .unwrap();
    let payload = [0x5Au8; 100];

    let _profiler = dhat::Profiler::builder().testing().build();

    // Writes and contiguous reads touch only the mapped segment
    let before = dhat::HeapStats::get();
    for i in 0..16u16 {
        ch.write(i, &payload[..24]).unwrap();
        let msg = ch.peek().unwrap();
        assert!(!msg.is_owned());
        assert_eq!(msg.payload().len(), 24);
        ch.release(msg).unwrap();
    }
    let after = dhat::HeapStats::get();
    dhat::assert_eq!(after.total_blocks, before.total_blocks);

    // Head is now at offset 0 again; a 140-byte message from offset 144 wraps
    ch.write(1, &payload).unwrap();
    let msg = ch.peek().unwrap();
    ch.release(msg).unwrap();
    ch.write(2, &payload).unwrap();

    let before = dhat::HeapStats::get();
    let msg = ch.peek().unwrap();
    assert!(msg.is_owned());
    let during = dhat::HeapStats::get();
    dhat::assert_eq!(during.total_blocks, before.total_blocks + 1);
    dhat::assert_eq!(during.curr_blocks, before.curr_blocks + 1);

    ch.release(msg).unwrap();
    let after = dhat::HeapStats::get();
    // The linearized copy is freed with the message
    dhat::assert_eq!(after.curr_blocks, before.curr_blocks);
}
