//! # otaflash
//!
//! A library for uploading firmware over the air to AVR XMEGA OTA
//! bootloaders.
//!
//! This crate provides the core functionality for driving the bootloader
//! over a serial radio link, including:
//!
//! - Intel-HEX firmware image loading and padding
//! - The length-prefixed packet protocol with per-packet retransmission
//! - Bootloader synchronization and device-identity validation
//! - CRC-16/ARC checksum calculation
//!
//! ## Supported Parts
//!
//! - ATxmega32A4U
//! - ATxmega128A4U
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport`
//!   crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use otaflash::{HexImage, LinkAddresses, Part, SessionConfig, Uploader};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Parse the firmware image
//!     let image = HexImage::from_file("firmware.hex")?;
//!
//!     // Create an uploader and connect (native only)
//!     #[cfg(feature = "native")]
//!     {
//!         let part = Part::Atxmega32A4u;
//!         let mut uploader = part.create_uploader(
//!             "/dev/ttyUSB0",
//!             115200,
//!             LinkAddresses::default(),
//!             SessionConfig::default(),
//!         )?;
//!
//!         // Synchronize and validate the device
//!         let device = uploader.connect()?;
//!
//!         // Pad to the device-reported application size and upload
//!         let firmware = image.pad_to(device.app_size() as usize)?;
//!         let summary = uploader.upload(&firmware, &mut |sent, total| {
//!             println!("Transferring: {sent}/{total}");
//!         })?;
//!
//!         println!("Retransmitted {} times", summary.retransmits);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod host;
pub mod image;
pub mod port;
pub mod protocol;
pub mod target;

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use host::{auto_detect_port, discover_ports};
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    device::{DetectedPort, DeviceKind},
    error::{Error, Result},
    image::hex::{FILL_BYTE, FirmwareImage, HexImage},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::crc::crc16_arc,
    protocol::wire::{CHUNK_SIZE, Command, DeviceInfo, Packet, Response, classify},
    target::part::{
        DEFAULT_BAUD, DEFAULT_BOOT_ADDR, DEFAULT_INFO_ADDR, LinkAddresses, Part, PartSpec,
        Uploader, parse_address,
    },
    target::xmega::plan::TransferPlan,
    target::xmega::session::{SessionConfig, UploadSummary, XmegaSession},
};
