//! Protocol implementations.

pub mod crc;
pub mod wire;

// Re-export common types
pub use crc::crc16_arc;
pub use wire::{CHUNK_SIZE, Command, DeviceInfo, Packet, Response, classify};
