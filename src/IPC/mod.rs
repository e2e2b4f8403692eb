mod debug;
mod getters;
mod lifecycle;
mod options;
mod reader;
mod stats;
mod writer;

pub use lifecycle::{Channel, ChannelState};
pub use options::{ChannelOptions, CreatePolicy, UnlinkPolicy, MAX_NAME_LEN};
pub use reader::{Message, MessageBody};
pub use stats::ChannelStats;
pub use writer::Transaction;

pub mod Buffer {
    pub mod Ring;
    pub mod Ring_impl;
    pub mod layout;
    pub(crate) mod lock;
    pub use layout::{ChannelHeader, CHANNEL_HEADER_SIZE, CHANNEL_MAGIC}; // re-export for stable path
    pub use Ring::RingBuffer;
}

pub mod Structs {
    pub mod Message_Structs;
    pub use Message_Structs::{
        MessageHeader, Timestamp, MESSAGE_HEADER_SIZE, MESSAGE_MAGIC, RESERVED_MAGIC, SKIP_MAGIC,
    }; // re-export for stable path
}
