//! Error types for wgq-netlink

use std::io;
use thiserror::Error;

/// Result type alias for link store and device operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the kernel-facing backends
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The requested link does not exist
    #[error("link not found: {0}")]
    NotFound(String),

    /// The object being created is already present
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Kernel rejected the request with the given errno
    #[error("netlink error: {}", io::Error::from_raw_os_error(*.0))]
    Netlink(i32),

    /// Malformed or unexpected netlink response
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Generic netlink family is not registered (module not loaded)
    #[error("generic netlink family not available: {0}")]
    FamilyNotFound(String),

    /// Key material could not be decoded
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Netlink is only available on Linux
    #[error("unsupported platform: link management is only available on Linux")]
    UnsupportedPlatform,
}

impl Error {
    /// Check if the error is a clean "does not exist" condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_)) || matches!(self, Error::Netlink(e) if *e == libc::ENODEV)
    }

    /// Check if the error reports that the object is already present
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
            || matches!(self, Error::Netlink(e) if *e == libc::EEXIST)
            || matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::AlreadyExists)
    }
}
