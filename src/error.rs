// Error taxonomy shared by the Rust API and the C ABI.

/// Declares `ErrorCode` together with its text, so `Display` and `description`
/// read from the same table.
macro_rules! error_codes {
    ($($name:ident = $value:literal => $text:tt,)*) => {
        /// Failure codes returned by every channel operation.
        ///
        /// The numeric values are part of the C ABI (see `ffi.rs`) and must not change.
        /// Success is not a variant: it is `Ok(..)` on the Rust side and `0` across FFI.
        #[repr(i32)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
        pub enum ErrorCode {
            $(
                #[error($text)]
                $name = $value,
            )*
        }

        impl ErrorCode {
            pub const ALL: &'static [ErrorCode] = &[$(ErrorCode::$name),*];

            pub fn description(self) -> &'static str {
                match self {
                    $(ErrorCode::$name => $text,)*
                }
            }
        }
    };
}

error_codes! {
    InvalidArg = -1 => "Invalid argument",
    NoMem = -2 => "Out of memory",
    ChanExists = -3 => "Channel already exists",
    ChanNotFound = -4 => "Channel not found",
    ShmMapFailed = -5 => "Shared memory mmap failed",
    BadMagic = -6 => "Invalid channel/message magic",
    BufferFull = -7 => "Channel buffer is full",
    MsgTooLarge = -8 => "Message is too large",
    TimedOut = -9 => "Operation timed out",
    Corrupt = -10 => "Channel data is corrupt",
    IoctlFailed = -11 => "Platform operation failed",
    TxInProgress = -12 => "Another transaction is in progress",
    ChanStale = -13 => "Channel is stale, needs recovery",
    Internal = -99 => "Internal library error",
}

pub type Result<T> = std::result::Result<T, ErrorCode>;

impl ErrorCode {
    /// Convert from the C ABI value. Returns None for `0` and unknown values.
    pub fn from_i32(val: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_i32() == val)
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Conditions that may clear up on their own if the caller retries later.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::BufferFull | ErrorCode::TimedOut | ErrorCode::NoMem
        )
    }

    /// The shared state can no longer be trusted; the attachment should be abandoned.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorCode::BadMagic | ErrorCode::Corrupt | ErrorCode::Internal
        )
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> i32 {
        code.as_i32()
    }
}

/// Human-readable text for a raw result code (`0` is success).
pub fn strerror(code: i32) -> &'static str {
    if code == 0 {
        return "Success";
    }
    match ErrorCode::from_i32(code) {
        Some(c) => c.description(),
        None => "Unknown error",
    }
}
