use crate::error::{strerror, ErrorCode};
use crate::IPC::{Channel, ChannelOptions, ChannelStats, Transaction};
use std::ffi::{c_char, CStr, CString};
use std::ptr;
use std::sync::OnceLock;
use std::time::Duration;

// Result codes are the `ErrorCode` discriminants; success is 0.
const DMXP_SUCCESS: i32 = 0;

/// Handle to a joined channel (opaque pointer)
pub struct ChannelHandle {
    inner: Channel,
}

/// Handle to an open two-phase write (opaque pointer)
///
/// Must be committed or aborted before its channel handle is left.
pub struct TransactionHandle {
    inner: Transaction<'static>,
}

/// Counter snapshot in C layout.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct DmxpChannelStats {
    pub messages_written: u64,
    pub messages_read: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub write_contention_count: u64,
    pub channel_recovered_count: u64,
    pub active_connections: u32,
    pub owner_pid: i32,
    pub buffer_capacity: u64,
    pub buffer_bytes_used: u64,
    pub buffer_bytes_reserved: u64,
}

impl From<ChannelStats> for DmxpChannelStats {
    fn from(s: ChannelStats) -> Self {
        Self {
            messages_written: s.messages_written,
            messages_read: s.messages_read,
            bytes_written: s.bytes_written,
            bytes_read: s.bytes_read,
            write_contention_count: s.write_contention_count,
            channel_recovered_count: s.channel_recovered_count,
            active_connections: s.active_connections,
            owner_pid: s.owner_pid,
            buffer_capacity: s.buffer_capacity as u64,
            buffer_bytes_used: s.buffer_bytes_used as u64,
            buffer_bytes_reserved: s.buffer_bytes_reserved as u64,
        }
    }
}

fn code<T>(res: crate::Result<T>) -> i32 {
    match res {
        Ok(_) => DMXP_SUCCESS,
        Err(e) => e.as_i32(),
    }
}

// -----------------------------------------------------------------------------
// Lifecycle
// -----------------------------------------------------------------------------

/// Join (or create) a channel.
///
/// # Arguments
/// * `name` - NUL-terminated channel name.
/// * `size` - Segment size when creating; 0 selects the default.
/// * `out` - Receives the handle on success.
///
/// # Returns
/// * 0 on success, negative error code otherwise.
#[no_mangle]
pub extern "C" fn dmxp_channel_join(
    name: *const c_char,
    size: usize,
    out: *mut *mut ChannelHandle,
) -> i32 {
    if name.is_null() || out.is_null() {
        return ErrorCode::InvalidArg.as_i32();
    }
    let name = match unsafe { CStr::from_ptr(name) }.to_str() {
        Ok(name) => name,
        Err(_) => return ErrorCode::InvalidArg.as_i32(),
    };

    let mut options = ChannelOptions::new();
    if size != 0 {
        options = options.with_size(size);
    }

    match Channel::join(name, options) {
        Ok(channel) => {
            let handle = Box::new(ChannelHandle { inner: channel });
            unsafe { *out = Box::into_raw(handle) };
            DMXP_SUCCESS
        }
        Err(e) => {
            unsafe { *out = ptr::null_mut() };
            e.as_i32()
        }
    }
}

/// Leave a channel and free its handle.
#[no_mangle]
pub extern "C" fn dmxp_channel_leave(handle: *mut ChannelHandle) -> i32 {
    if handle.is_null() {
        return ErrorCode::InvalidArg.as_i32();
    }
    let handle = unsafe { Box::from_raw(handle) };
    code(handle.inner.leave())
}

/// Recover a channel whose owner has died.
#[no_mangle]
pub extern "C" fn dmxp_channel_recover(handle: *mut ChannelHandle) -> i32 {
    match unsafe { handle.as_ref() } {
        Some(h) => code(h.inner.recover()),
        None => ErrorCode::InvalidArg.as_i32(),
    }
}

// -----------------------------------------------------------------------------
// Writing
// -----------------------------------------------------------------------------

/// Publish one message.
#[no_mangle]
pub extern "C" fn dmxp_channel_write(
    handle: *mut ChannelHandle,
    msg_type: u16,
    data: *const u8,
    len: usize,
) -> i32 {
    let channel = match unsafe { handle.as_ref() } {
        Some(h) => &h.inner,
        None => return ErrorCode::InvalidArg.as_i32(),
    };
    if data.is_null() && len != 0 {
        return ErrorCode::InvalidArg.as_i32();
    }
    let payload: &[u8] = if len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(data, len) }
    };
    code(channel.write(msg_type, payload))
}

/// Reserve space for a payload of up to `size` bytes.
#[no_mangle]
pub extern "C" fn dmxp_channel_begin_write(
    handle: *mut ChannelHandle,
    size: usize,
    out: *mut *mut TransactionHandle,
) -> i32 {
    if handle.is_null() || out.is_null() {
        return ErrorCode::InvalidArg.as_i32();
    }
    // The caller guarantees the channel handle outlives the transaction.
    let channel: &'static Channel = unsafe { &(*handle).inner };
    match channel.begin_write(size) {
        Ok(tx) => {
            unsafe { *out = Box::into_raw(Box::new(TransactionHandle { inner: tx })) };
            DMXP_SUCCESS
        }
        Err(e) => {
            unsafe { *out = ptr::null_mut() };
            e.as_i32()
        }
    }
}

/// Copy `len` bytes into a reservation and publish it; frees the transaction handle.
#[no_mangle]
pub extern "C" fn dmxp_channel_commit_write(
    tx: *mut TransactionHandle,
    msg_type: u16,
    data: *const u8,
    len: usize,
) -> i32 {
    if tx.is_null() || (data.is_null() && len != 0) {
        return ErrorCode::InvalidArg.as_i32();
    }
    let tx = unsafe { Box::from_raw(tx) };
    let payload: &[u8] = if len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(data, len) }
    };
    code(tx.inner.commit(msg_type, &[payload]))
}

/// Abandon a reservation; frees the transaction handle.
#[no_mangle]
pub extern "C" fn dmxp_channel_abort_write(tx: *mut TransactionHandle) -> i32 {
    if tx.is_null() {
        return ErrorCode::InvalidArg.as_i32();
    }
    let tx = unsafe { Box::from_raw(tx) };
    code(tx.inner.abort())
}

// -----------------------------------------------------------------------------
// Reading
// -----------------------------------------------------------------------------

/// Read and consume one message.
///
/// # Arguments
/// * `timeout_ms` - Negative waits forever, 0 polls.
/// * `out_type` - Receives the message type (may be NULL).
/// * `out_buf` - Buffer to copy the payload into.
/// * `out_len` - Input: size of buf, Output: payload length.
///
/// # Returns
/// * 0 on success.
/// * InvalidArg with `*out_len` set to the required size if the buffer is too small;
///   the message stays at the head of the channel.
#[no_mangle]
pub extern "C" fn dmxp_channel_read(
    handle: *mut ChannelHandle,
    timeout_ms: i64,
    out_type: *mut u16,
    out_buf: *mut u8,
    out_len: *mut usize,
) -> i32 {
    let channel = match unsafe { handle.as_ref() } {
        Some(h) => &h.inner,
        None => return ErrorCode::InvalidArg.as_i32(),
    };
    if out_len.is_null() {
        return ErrorCode::InvalidArg.as_i32();
    }
    let max_len = unsafe { *out_len };
    let timeout = u64::try_from(timeout_ms).ok().map(Duration::from_millis);

    let msg = match channel.read(timeout) {
        Ok(msg) => msg,
        Err(e) => return e.as_i32(),
    };
    let payload = msg.payload();
    unsafe { *out_len = payload.len() };
    if payload.len() > max_len || (out_buf.is_null() && !payload.is_empty()) {
        return ErrorCode::InvalidArg.as_i32();
    }

    unsafe {
        if !payload.is_empty() {
            ptr::copy_nonoverlapping(payload.as_ptr(), out_buf, payload.len());
        }
        if !out_type.is_null() {
            *out_type = msg.msg_type();
        }
    }
    code(channel.release(msg))
}

/// Type of the head message without consuming it.
#[no_mangle]
pub extern "C" fn dmxp_channel_peek_type(handle: *mut ChannelHandle, out_type: *mut u16) -> i32 {
    let channel = match unsafe { handle.as_ref() } {
        Some(h) => &h.inner,
        None => return ErrorCode::InvalidArg.as_i32(),
    };
    if out_type.is_null() {
        return ErrorCode::InvalidArg.as_i32();
    }
    match channel.peek() {
        Ok(msg) => {
            unsafe { *out_type = msg.msg_type() };
            DMXP_SUCCESS
        }
        Err(e) => e.as_i32(),
    }
}

// -----------------------------------------------------------------------------
// Introspection
// -----------------------------------------------------------------------------

/// Readiness descriptor, or a negative error code.
#[no_mangle]
pub extern "C" fn dmxp_channel_get_fd(handle: *mut ChannelHandle) -> i32 {
    match unsafe { handle.as_ref() } {
        Some(h) => match h.inner.get_fd() {
            Ok(fd) => fd,
            Err(e) => e.as_i32(),
        },
        None => ErrorCode::InvalidArg.as_i32(),
    }
}

#[no_mangle]
pub extern "C" fn dmxp_channel_get_stats(
    handle: *mut ChannelHandle,
    out: *mut DmxpChannelStats,
) -> i32 {
    match unsafe { handle.as_ref() } {
        Some(h) if !out.is_null() => {
            unsafe { *out = h.inner.get_stats().into() };
            DMXP_SUCCESS
        }
        _ => ErrorCode::InvalidArg.as_i32(),
    }
}

/// Result code of the handle's most recent operation (0 for success).
#[no_mangle]
pub extern "C" fn dmxp_channel_last_error(handle: *mut ChannelHandle) -> i32 {
    match unsafe { handle.as_ref() } {
        Some(h) => h.inner.last_error().map_or(DMXP_SUCCESS, ErrorCode::as_i32),
        None => ErrorCode::InvalidArg.as_i32(),
    }
}

/// Static, NUL-terminated text for a result code.
#[no_mangle]
pub extern "C" fn dmxp_strerror(code: i32) -> *const c_char {
    static TEXTS: OnceLock<Vec<(i32, CString)>> = OnceLock::new();
    let texts = TEXTS.get_or_init(|| {
        std::iter::once(DMXP_SUCCESS)
            .chain(ErrorCode::ALL.iter().map(|c| c.as_i32()))
            .chain(std::iter::once(i32::MIN))
            .filter_map(|c| CString::new(strerror(c)).ok().map(|s| (c, s)))
            .collect()
    });
    texts
        .iter()
        .find(|(c, _)| *c == code)
        .or_else(|| texts.last())
        .map_or(ptr::null(), |(_, s)| s.as_ptr())
}
