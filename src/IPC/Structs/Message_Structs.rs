// Per-message framing placed inline at the start of every slot.

// no atomics in MessageHeader; keep as plain integral types for ABI

/// Marks a slot carrying a published message.
pub const MESSAGE_MAGIC: u64 = 0xBAAD_F00D_BAAD_F00D;

/// Marks an aborted reservation that readers step over without delivering.
pub const SKIP_MAGIC: u64 = 0x1EAB_C0DE_1EAB_C0DE;

/// Marks a reservation whose writer has not finished yet. `total_len` is already valid.
pub const RESERVED_MAGIC: u64 = 0x5107_BE1D_5107_BE1D;

/// Wall-clock send time.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanoseconds: i64,
}

impl Timestamp {
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: now.as_secs() as i64,
            nanoseconds: now.subsec_nanos() as i64,
        }
    }
}

/// Header that precedes each payload in a slot.
///
/// `total_len` is the slot's physical footprint (header + payload + padding, or the
/// whole reservation for two-phase writes); `payload_len <= total_len - MESSAGE_HEADER_SIZE`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: u64,
    pub total_len: u32,
    pub payload_len: u32,
    pub msg_type: u16,
    pub iov_count: u16,
    pub sender_pid: i32,
    pub timestamp: Timestamp,
}

pub const MESSAGE_HEADER_SIZE: usize = std::mem::size_of::<MessageHeader>();

impl MessageHeader {
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: repr(C) plain-old-data with no interior padding left uninitialised
        // (fields are laid out without gaps: 8+4+4+2+2+4+16).
        unsafe {
            std::slice::from_raw_parts(self as *const Self as *const u8, MESSAGE_HEADER_SIZE)
        }
    }

    /// Decode a header from (at least) `MESSAGE_HEADER_SIZE` raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < MESSAGE_HEADER_SIZE {
            return None;
        }
        // SAFETY: length checked; read_unaligned tolerates any alignment and every
        // bit pattern is a valid MessageHeader.
        Some(unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const Self) })
    }

    pub fn is_skip(&self) -> bool {
        self.magic == SKIP_MAGIC
    }

    /// Placeholder written when a slot is reserved.
    pub fn reserved(total_len: usize) -> Self {
        Self {
            magic: RESERVED_MAGIC,
            total_len: total_len as u32,
            ..Default::default()
        }
    }

    /// True once the writer has handed the slot over, as a message or a skip record.
    pub fn is_finished(&self) -> bool {
        self.magic == MESSAGE_MAGIC || self.magic == SKIP_MAGIC
    }
}
