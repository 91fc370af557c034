//! Crate-wide error type.
//!
//! A failed precondition check never touches the transport (`InvalidArg`),
//! a transport failure carries the underlying OS error, a response that
//! arrived but didn't parse is `Protocol`, and a non-zero NVMe status byte
//! is returned to the caller as [`Error::DeviceStatus`] rather than
//! treated as a library failure.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("timed out waiting for response")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("MIC mismatch: expected {expected:#010x}, found {found:#010x}")]
    CrcMismatch { expected: u32, found: u32 },

    #[error("command slot mismatch between request and response")]
    SlotMismatch,

    /// Not a library failure: the exchange succeeded and the device
    /// responded with a non-zero status byte, returned verbatim.
    #[error("device returned status {0:#04x}")]
    DeviceStatus(u8),
}

impl Error {
    pub fn invalid_arg(msg: impl Into<String>) -> Self {
        Error::InvalidArg(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Returns the device status byte, if this error represents one rather
    /// than a transport/library failure.
    pub fn device_status(&self) -> Option<u8> {
        match self {
            Error::DeviceStatus(s) => Some(*s),
            _ => None,
        }
    }
}
