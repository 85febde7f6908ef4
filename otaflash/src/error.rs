//! Error types for otaflash.

use std::io;
use thiserror::Error;

/// Result type for otaflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for otaflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Invalid or oversized firmware image.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Malformed device response. Not retried: the peer is not the
    /// expected bootloader, or the link is corrupting data beyond what
    /// retransmission can repair.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Live device metadata disagrees with the configured part.
    #[error("Device metadata mismatch: {0}")]
    DeviceMismatch(String),

    /// No valid device-info response within the attempt budget.
    #[error("Unable to contact device")]
    Unreachable,

    /// Bootloader synchronization gave up.
    #[error("Cannot synchronize: {0}")]
    SyncFailed(String),

    /// Packet retransmission ceiling reached.
    #[error("Device unresponsive after {retries} retransmissions")]
    Unresponsive {
        /// Number of retransmissions performed before giving up.
        retries: u64,
    },

    /// Malformed radio address string.
    #[error("Invalid address: {0}")]
    AddressSyntax(String),

    /// No usable serial port found.
    #[error("No serial port found")]
    PortNotFound,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
