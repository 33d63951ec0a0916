//! Error handling and C-ABI error codes for radij

use std::cell::RefCell;
use std::fmt;
use std::os::raw::c_char;

/// Error type for KeyedTrie operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Arena, mask table or descriptor pool is full.
    OutOfMemory,
    /// The (key, mask) pair is already present.
    AlreadyExists,
    /// No entry for the key, or no chain member with that mask.
    NotFound,
    /// Key or mask bytes violate the length-prefix encoding.
    InvalidKey(String),
    /// Structural invariant broken, or an operation that would break one.
    InvariantViolation(String),
    /// The lock guarding a shared trie is unusable.
    Lock(String),
    InvalidConfig(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory => f.write_str("out of memory"),
            Error::AlreadyExists => f.write_str("entry already exists"),
            Error::NotFound => f.write_str("entry not found"),
            Error::InvalidKey(why) => write!(f, "invalid key: {why}"),
            Error::InvariantViolation(why) => write!(f, "invariant violation: {why}"),
            Error::Lock(why) => write!(f, "lock failure: {why}"),
            Error::InvalidConfig(why) => write!(f, "invalid configuration: {why}"),
        }
    }
}

impl std::error::Error for Error {}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    OutOfMemory = 1,
    AlreadyExists = 2,
    NotFound = 3,
    InvalidKey = 4,
    InvariantViolation = 5,
    InvalidHandle = 6,
    LockFailed = 7,
    InvalidConfig = 8,
    /// Route was inserted but its mask annotation could not be allocated.
    MaskNotEntered = 9,
    Unknown = 255,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Success => "Success",
            ErrorCode::OutOfMemory => "Out of memory",
            ErrorCode::AlreadyExists => "Already exists",
            ErrorCode::NotFound => "Not found",
            ErrorCode::InvalidKey => "Invalid key",
            ErrorCode::InvariantViolation => "Invariant violation",
            ErrorCode::InvalidHandle => "Invalid handle",
            ErrorCode::LockFailed => "Lock failed",
            ErrorCode::InvalidConfig => "Invalid configuration",
            ErrorCode::MaskNotEntered => "Mask for route not entered",
            ErrorCode::Unknown => "Unknown error",
        }
    }

    fn as_cstr(self) -> &'static [u8] {
        match self {
            ErrorCode::Success => b"Success\0",
            ErrorCode::OutOfMemory => b"Out of memory\0",
            ErrorCode::AlreadyExists => b"Already exists\0",
            ErrorCode::NotFound => b"Not found\0",
            ErrorCode::InvalidKey => b"Invalid key\0",
            ErrorCode::InvariantViolation => b"Invariant violation\0",
            ErrorCode::InvalidHandle => b"Invalid handle\0",
            ErrorCode::LockFailed => b"Lock failed\0",
            ErrorCode::InvalidConfig => b"Invalid configuration\0",
            ErrorCode::MaskNotEntered => b"Mask for route not entered\0",
            ErrorCode::Unknown => b"Unknown error\0",
        }
    }
}

// Thread-local last error for C-ABI
thread_local! {
    static LAST_ERROR: RefCell<ErrorCode> = const { RefCell::new(ErrorCode::Success) };
}

pub fn set_last_error(code: ErrorCode) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = code);
}

pub fn get_last_error() -> ErrorCode {
    LAST_ERROR.with(|cell| *cell.borrow())
}

#[no_mangle]
pub extern "C" fn radij_last_error() -> ErrorCode {
    get_last_error()
}

#[no_mangle]
pub extern "C" fn radij_strerror(code: ErrorCode) -> *const c_char {
    code.as_cstr().as_ptr() as *const c_char
}

// Map internal Error to ErrorCode
pub fn map_error(e: &Error) -> ErrorCode {
    match e {
        Error::OutOfMemory => ErrorCode::OutOfMemory,
        Error::AlreadyExists => ErrorCode::AlreadyExists,
        Error::NotFound => ErrorCode::NotFound,
        Error::InvalidKey(_) => ErrorCode::InvalidKey,
        Error::InvariantViolation(_) => ErrorCode::InvariantViolation,
        Error::Lock(_) => ErrorCode::LockFailed,
        Error::InvalidConfig(_) => ErrorCode::InvalidConfig,
    }
}
