// Module naming follows project convention (IPC = Inter-Process Channel)
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod IPC;
#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

pub mod error;
pub mod ffi;

pub use error::{strerror, ErrorCode, Result};
pub use IPC::{
    Channel, ChannelOptions, ChannelState, ChannelStats, CreatePolicy, Message, MessageBody,
    Transaction, UnlinkPolicy,
};
