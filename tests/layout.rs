// Layout conformance tests for the shared segment.
// Every attached process, whatever it was built with, must agree on these
// sizes and offsets. Observed values are printed to aid debugging.
use dmxp_channel::IPC::Buffer::{ChannelHeader, CHANNEL_HEADER_SIZE};
use dmxp_channel::IPC::Structs::{MessageHeader, Timestamp, MESSAGE_HEADER_SIZE};
use memoffset::offset_of;
use std::mem::{align_of, size_of};

#[test]
#[cfg(target_pointer_width = "64")]
fn test_channel_header_layout() {
    let size = size_of::<ChannelHeader>();
    let off_wait_word = offset_of!(ChannelHeader, wait_word);
    let off_total = offset_of!(ChannelHeader, total_shm_size);
    let off_capacity = offset_of!(ChannelHeader, buffer_capacity);
    let off_owner = offset_of!(ChannelHeader, owner_pid);
    let off_lock = offset_of!(ChannelHeader, lock);
    let off_conns = offset_of!(ChannelHeader, active_connections);
    let off_head = offset_of!(ChannelHeader, head);
    let off_tail = offset_of!(ChannelHeader, tail);
    let off_tx_head = offset_of!(ChannelHeader, tx_head);
    let off_recovered = offset_of!(ChannelHeader, channel_recovered_count);

    println!(
        "ChannelHeader => size: {size}, align: {}, offsets: [wait_word:{off_wait_word}, total_shm_size:{off_total}, buffer_capacity:{off_capacity}, owner_pid:{off_owner}, lock:{off_lock}, active_connections:{off_conns}, head:{off_head}, tail:{off_tail}, tx_head:{off_tx_head}, channel_recovered_count:{off_recovered}]",
        align_of::<ChannelHeader>()
    );

    assert_eq!(offset_of!(ChannelHeader, magic), 0);
    assert_eq!(off_wait_word, 8);
    assert_eq!(off_total, 16);
    assert_eq!(off_capacity, 24);
    assert_eq!(off_owner, 32);
    assert_eq!(off_lock, 36);
    assert_eq!(off_conns, 40);
    assert_eq!(off_head, 48);
    assert_eq!(off_tail, 56);
    assert_eq!(off_tx_head, 64);
    assert_eq!(offset_of!(ChannelHeader, messages_written), 72);
    assert_eq!(offset_of!(ChannelHeader, bytes_read), 96);
    assert_eq!(offset_of!(ChannelHeader, write_contention_count), 104);
    assert_eq!(off_recovered, 112);
    assert_eq!(size, 120);
    assert_eq!(CHANNEL_HEADER_SIZE, size);
    // The ring starts right after the header, so slots stay 8-aligned
    assert_eq!(CHANNEL_HEADER_SIZE % 8, 0);
}

#[test]
fn test_message_header_layout() {
    let size = size_of::<MessageHeader>();
    println!(
        "MessageHeader => size: {size}, align: {}",
        align_of::<MessageHeader>()
    );

    assert_eq!(size, 40);
    assert_eq!(MESSAGE_HEADER_SIZE, 40);
    assert_eq!(align_of::<MessageHeader>(), align_of::<u64>());
    assert_eq!(offset_of!(MessageHeader, magic), 0);
    assert_eq!(offset_of!(MessageHeader, total_len), 8);
    assert_eq!(offset_of!(MessageHeader, payload_len), 12);
    assert_eq!(offset_of!(MessageHeader, msg_type), 16);
    assert_eq!(offset_of!(MessageHeader, iov_count), 18);
    assert_eq!(offset_of!(MessageHeader, sender_pid), 20);
    assert_eq!(offset_of!(MessageHeader, timestamp), 24);
    assert_eq!(offset_of!(Timestamp, nanoseconds), 8);
}
