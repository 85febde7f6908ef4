//! Part abstraction for supported AVR XMEGA devices.
//!
//! Each supported part carries the static configuration the OTA bootloader
//! is cross-checked against before any flash-modifying command is sent:
//! the three-byte device signature, the application-section size, and the
//! flash page size.

use crate::error::{Error, Result};
use crate::image::hex::FirmwareImage;
use crate::protocol::wire::DeviceInfo;
use std::fmt;

#[cfg(feature = "native")]
use crate::port::{NativePort, SerialConfig};
use crate::port::Port;
use crate::target::xmega::session::{SessionConfig, UploadSummary, XmegaSession};

/// Default baud rate for the OTA radio link.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default radio address of the device's metadata region.
pub const DEFAULT_INFO_ADDR: &str = "3e:3e:3e:3e:24";

/// Default radio address of the device's boot/application region.
pub const DEFAULT_BOOT_ADDR: &str = "3e:3e:3e:3e:3e";

/// Supported device parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Part {
    /// ATxmega32A4U (32 KiB application section).
    #[default]
    Atxmega32A4u,
    /// ATxmega128A4U (128 KiB application section).
    Atxmega128A4u,
}

impl Part {
    /// Static configuration for this part.
    #[must_use]
    pub fn spec(&self) -> PartSpec {
        match self {
            Self::Atxmega32A4u => PartSpec {
                device_id: [0x41, 0x95, 0x1E],
                app_section_size: 32768,
                page_size: 256,
            },
            Self::Atxmega128A4u => PartSpec {
                device_id: [0x46, 0x97, 0x1E],
                app_section_size: 131072,
                page_size: 256,
            },
        }
    }

    /// Get the part from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "atxmega32a4u" => Some(Self::Atxmega32A4u),
            "atxmega128a4u" => Some(Self::Atxmega128A4u),
            _ => None,
        }
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atxmega32A4u => write!(f, "atxmega32a4u"),
            Self::Atxmega128A4u => write!(f, "atxmega128a4u"),
        }
    }
}

/// Static part configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSpec {
    /// Device signature bytes.
    pub device_id: [u8; 3],
    /// Total application-section size in bytes.
    pub app_section_size: u32,
    /// Flash page size in bytes.
    pub page_size: u16,
}

impl PartSpec {
    /// Writable image size in bytes.
    ///
    /// The OTA bootloader double-buffers the application section: the new
    /// image lands in the upper half and is copied over on reboot, so only
    /// half the section is addressable per upload.
    #[must_use]
    pub fn app_image_size(&self) -> u32 {
        self.app_section_size / 2
    }

    /// Cross-check live device metadata against this part.
    ///
    /// Identity, page size, and application size must all agree before any
    /// flash-modifying command is sent.
    pub fn validate(&self, info: &DeviceInfo) -> Result<()> {
        if info.device_id != self.device_id {
            return Err(Error::DeviceMismatch(format!(
                "device id {:02x}.{:02x}.{:02x} != expected {:02x}.{:02x}.{:02x}",
                info.device_id[0],
                info.device_id[1],
                info.device_id[2],
                self.device_id[0],
                self.device_id[1],
                self.device_id[2],
            )));
        }
        if info.page_size != self.page_size {
            return Err(Error::DeviceMismatch(format!(
                "page size {} != expected {}",
                info.page_size, self.page_size
            )));
        }
        if info.app_size() != self.app_image_size() {
            return Err(Error::DeviceMismatch(format!(
                "app size {} != expected {}",
                info.app_size(),
                self.app_image_size()
            )));
        }
        Ok(())
    }
}

/// The two radio addresses an upload talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAddresses {
    /// Address of the device metadata region.
    pub info: [u8; 5],
    /// Address of the boot/application region.
    pub boot: [u8; 5],
}

impl LinkAddresses {
    /// Parse both addresses from colon-separated hex octet strings.
    pub fn new(info: &str, boot: &str) -> Result<Self> {
        Ok(Self {
            info: parse_address(info)?,
            boot: parse_address(boot)?,
        })
    }
}

impl Default for LinkAddresses {
    #[allow(clippy::unwrap_used)] // Default address strings are well-formed
    fn default() -> Self {
        Self::new(DEFAULT_INFO_ADDR, DEFAULT_BOOT_ADDR).unwrap()
    }
}

/// Parse a 5-byte address from a colon-separated hex octet string
/// (e.g. `"3e:3e:3e:3e:24"`).
pub fn parse_address(text: &str) -> Result<[u8; 5]> {
    let mut bytes = [0u8; 5];
    let mut count = 0;

    for (i, octet) in text.split(':').enumerate() {
        if i >= bytes.len() {
            return Err(Error::AddressSyntax(format!(
                "'{text}' has more than {} octets",
                bytes.len()
            )));
        }
        bytes[i] = u8::from_str_radix(octet, 16)
            .map_err(|_| Error::AddressSyntax(format!("'{octet}' is not a hex octet")))?;
        count = i + 1;
    }

    if count != bytes.len() {
        return Err(Error::AddressSyntax(format!(
            "'{text}' has {count} octets, expected {}",
            bytes.len()
        )));
    }

    Ok(bytes)
}

/// Trait for driving one complete OTA upload.
///
/// This provides a unified interface so the CLI can work against any
/// supported part through a common API.
pub trait Uploader {
    /// Synchronize with the bootloader and validate device metadata.
    ///
    /// Runs the handshake, selects the metadata region, queries and
    /// cross-checks device info, then selects the boot region. Returns the
    /// live metadata so the caller can pad the image to the reported
    /// application size.
    fn connect(&mut self) -> Result<DeviceInfo>;

    /// Erase, transfer, and commit a padded firmware image.
    ///
    /// # Arguments
    ///
    /// * `image` - Image padded to the device's application size
    /// * `progress` - Progress callback (bytes_sent, total_bytes)
    fn upload(
        &mut self,
        image: &FirmwareImage,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<UploadSummary>;

    /// Cumulative retransmission count for this session.
    fn retransmits(&self) -> u64;

    /// Close the uploader and release the port.
    ///
    /// It is safe to call even if the connection is not active. After
    /// calling this method, the uploader cannot be used.
    fn close(&mut self);
}

impl Part {
    /// Create an uploader for this part by opening a serial port (native
    /// platforms).
    ///
    /// # Arguments
    ///
    /// * `port_name` - Serial port name (e.g., "/dev/ttyUSB0")
    /// * `baud` - Baud rate of the radio link
    /// * `addresses` - Info/boot region radio addresses
    /// * `config` - Retry policy for the session
    #[cfg(feature = "native")]
    pub fn create_uploader(
        &self,
        port_name: &str,
        baud: u32,
        addresses: LinkAddresses,
        config: SessionConfig,
    ) -> Result<Box<dyn Uploader>> {
        let port = NativePort::open(&SerialConfig::new(port_name, baud))?;
        Ok(self.create_uploader_with_port(port, addresses, config))
    }

    /// Create an uploader with an existing port (generic, works for any
    /// `Port` type). Useful for testing or custom transports.
    pub fn create_uploader_with_port<P: Port + 'static>(
        &self,
        port: P,
        addresses: LinkAddresses,
        config: SessionConfig,
    ) -> Box<dyn Uploader> {
        Box::new(XmegaSession::new(port, self.spec(), addresses).with_config(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_from_name() {
        assert_eq!(Part::from_name("atxmega32a4u"), Some(Part::Atxmega32A4u));
        assert_eq!(Part::from_name("ATXMEGA128A4U"), Some(Part::Atxmega128A4u));
        assert_eq!(Part::from_name("atmega328p"), None);
    }

    #[test]
    fn test_part_table() {
        let spec = Part::Atxmega32A4u.spec();
        assert_eq!(spec.device_id, [0x41, 0x95, 0x1E]);
        assert_eq!(spec.app_section_size, 32768);
        assert_eq!(spec.page_size, 256);

        let spec = Part::Atxmega128A4u.spec();
        assert_eq!(spec.device_id, [0x46, 0x97, 0x1E]);
        assert_eq!(spec.app_section_size, 131072);
        assert_eq!(spec.page_size, 256);
    }

    #[test]
    fn test_app_image_size_is_half_section() {
        assert_eq!(Part::Atxmega32A4u.spec().app_image_size(), 16384);
        assert_eq!(Part::Atxmega128A4u.spec().app_image_size(), 65536);
    }

    #[test]
    fn test_validate_accepts_matching_device() {
        let spec = Part::Atxmega32A4u.spec();
        let info = DeviceInfo {
            device_id: [0x41, 0x95, 0x1E],
            page_size: 256,
            app_pages: 64, // 64 * 256 = 16384 = 32768 / 2
        };
        assert!(spec.validate(&info).is_ok());
    }

    #[test]
    fn test_validate_rejects_full_section_report() {
        // A device reporting the WHOLE application section (128 pages of
        // 256 = 32768) does not satisfy the halving rule and must be fatal.
        let spec = Part::Atxmega32A4u.spec();
        let info = DeviceInfo {
            device_id: [0x41, 0x95, 0x1E],
            page_size: 256,
            app_pages: 128,
        };
        assert!(matches!(
            spec.validate(&info),
            Err(Error::DeviceMismatch(_))
        ));
    }

    #[test]
    fn test_validate_rejects_wrong_identity() {
        let spec = Part::Atxmega32A4u.spec();
        let info = DeviceInfo {
            device_id: [0x46, 0x97, 0x1E],
            page_size: 256,
            app_pages: 64,
        };
        assert!(matches!(
            spec.validate(&info),
            Err(Error::DeviceMismatch(_))
        ));
    }

    #[test]
    fn test_validate_rejects_wrong_page_size() {
        let spec = Part::Atxmega32A4u.spec();
        let info = DeviceInfo {
            device_id: [0x41, 0x95, 0x1E],
            page_size: 128,
            app_pages: 128,
        };
        assert!(matches!(
            spec.validate(&info),
            Err(Error::DeviceMismatch(_))
        ));
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address("3e:3e:3e:3e:24").unwrap(),
            [0x3E, 0x3E, 0x3E, 0x3E, 0x24]
        );
        assert_eq!(parse_address("0:1:2:3:ff").unwrap(), [0, 1, 2, 3, 0xFF]);
    }

    #[test]
    fn test_parse_address_rejects_bad_input() {
        assert!(parse_address("3e:3e:3e:3e").is_err());
        assert!(parse_address("3e:3e:3e:3e:3e:3e").is_err());
        assert!(parse_address("3e:3e:zz:3e:3e").is_err());
        assert!(parse_address("").is_err());
    }

    #[test]
    fn test_default_addresses() {
        let addrs = LinkAddresses::default();
        assert_eq!(addrs.info, [0x3E, 0x3E, 0x3E, 0x3E, 0x24]);
        assert_eq!(addrs.boot, [0x3E, 0x3E, 0x3E, 0x3E, 0x3E]);
    }

    #[test]
    fn test_part_display_roundtrip() {
        for part in [Part::Atxmega32A4u, Part::Atxmega128A4u] {
            assert_eq!(Part::from_name(&part.to_string()), Some(part));
        }
    }
}
