pub mod SharedMemory;
pub mod futex;
pub mod liveness;
pub(crate) mod notify;

pub use SharedMemory::{
    attach_shared_memory, create_shared_memory, unlink_shared_memory, RawHandle,
    SharedMemoryBackend,
};
pub use futex::WaitOutcome;
pub use liveness::{OsLiveness, ProcessLiveness};
