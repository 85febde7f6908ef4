//! Firmware image loading.

pub mod hex;

// Re-export common types
pub use hex::{FILL_BYTE, FirmwareImage, HexImage};
