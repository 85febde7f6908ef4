//! Intel-HEX firmware image loading and padding.
//!
//! Firmware for AVR parts ships as Intel-HEX records:
//!
//! ```text
//! :LLAAAATT<data...>CC
//! ```
//!
//! where `LL` is the data byte count, `AAAA` the 16-bit load offset, `TT`
//! the record type, and `CC` a two's-complement checksum of all preceding
//! record bytes. Records are flattened into a single byte buffer starting
//! at address zero; gaps are filled with the erased-flash fill byte.
//!
//! The OTA bootloader computes its acceptance checksum over the WHOLE
//! application area, so before transfer the image must be padded with the
//! fill byte up to the device-reported application size — `pad_to` produces
//! that [`FirmwareImage`].

use crate::error::{Error, Result};
use crate::protocol::crc::crc16_arc;
use log::debug;
use std::fs;
use std::path::Path;

/// Fill byte representing erased/unprogrammed flash.
pub const FILL_BYTE: u8 = 0xFF;

/// Upper bound on a flattened image, to reject hex files that place records
/// at addresses far outside any supported part's flash.
const MAX_IMAGE_SIZE: usize = 4 * 1024 * 1024;

/// Intel-HEX record types we understand.
const REC_DATA: u8 = 0x00;
const REC_EOF: u8 = 0x01;
const REC_EXT_SEGMENT: u8 = 0x02;
const REC_START_SEGMENT: u8 = 0x03;
const REC_EXT_LINEAR: u8 = 0x04;
const REC_START_LINEAR: u8 = 0x05;

/// A firmware image flattened from Intel-HEX records (or raw bytes).
#[derive(Debug, Clone)]
pub struct HexImage {
    data: Vec<u8>,
}

impl HexImage {
    /// Load and parse an Intel-HEX file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let image = Self::parse(&text)?;
        debug!(
            "Loaded {} ({} bytes)",
            path.as_ref().display(),
            image.len()
        );
        Ok(image)
    }

    /// Parse Intel-HEX text into a flat image.
    pub fn parse(text: &str) -> Result<Self> {
        let mut data: Vec<u8> = Vec::new();
        let mut base: usize = 0;
        let mut seen_data = false;

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let record = decode_record(line)
                .map_err(|e| Error::InvalidImage(format!("line {}: {e}", lineno + 1)))?;

            match record.kind {
                REC_DATA => {
                    let start = base + usize::from(record.offset);
                    let end = start + record.data.len();
                    if end > MAX_IMAGE_SIZE {
                        return Err(Error::InvalidImage(format!(
                            "record at {start:#x} lies outside any supported flash"
                        )));
                    }
                    if end > data.len() {
                        data.resize(end, FILL_BYTE);
                    }
                    data[start..end].copy_from_slice(&record.data);
                    seen_data = true;
                },
                REC_EOF => break,
                REC_EXT_SEGMENT => {
                    base = usize::from(record.field_u16()?) << 4;
                },
                REC_EXT_LINEAR => {
                    base = usize::from(record.field_u16()?) << 16;
                },
                // Start addresses are meaningless for a bootloader upload
                REC_START_SEGMENT | REC_START_LINEAR => {},
                other => {
                    return Err(Error::InvalidImage(format!(
                        "line {}: unknown record type {other:#04x}",
                        lineno + 1
                    )));
                },
            }
        }

        if !seen_data {
            return Err(Error::InvalidImage("no data records found".into()));
        }

        Ok(Self { data })
    }

    /// Wrap raw binary data as an image.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Pad the image with [`FILL_BYTE`] up to `app_size` bytes, producing
    /// the buffer that is transferred and checksummed.
    pub fn pad_to(&self, app_size: usize) -> Result<FirmwareImage> {
        if self.data.len() > app_size {
            return Err(Error::InvalidImage(format!(
                "image is {} bytes but the application area holds only {app_size}",
                self.data.len()
            )));
        }

        let mut data = self.data.clone();
        data.resize(app_size, FILL_BYTE);
        Ok(FirmwareImage { data })
    }
}

/// A firmware image padded to the exact application-area size.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Padded length in bytes (always equal to the application size).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Padded image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// CRC-16/ARC over the full padded buffer; this is the value the device
    /// recomputes over its flash before accepting the image.
    pub fn checksum(&self) -> u16 {
        crc16_arc(&self.data)
    }
}

struct Record {
    kind: u8,
    offset: u16,
    data: Vec<u8>,
}

impl Record {
    /// Interpret the record data as a single big-endian u16 field
    /// (extended segment/linear address records).
    fn field_u16(&self) -> Result<u16> {
        if self.data.len() != 2 {
            return Err(Error::InvalidImage(format!(
                "address record with {} data bytes",
                self.data.len()
            )));
        }
        Ok((u16::from(self.data[0]) << 8) | u16::from(self.data[1]))
    }
}

fn decode_record(line: &str) -> std::result::Result<Record, String> {
    let body = line
        .strip_prefix(':')
        .ok_or_else(|| "record does not start with ':'".to_string())?;

    if !body.is_ascii() {
        return Err("record contains non-ASCII bytes".into());
    }

    if body.len() % 2 != 0 {
        return Err("odd number of hex digits".into());
    }

    let bytes: Vec<u8> = (0..body.len() / 2)
        .map(|i| u8::from_str_radix(&body[2 * i..2 * i + 2], 16))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| format!("bad hex digit: {e}"))?;

    if bytes.len() < 5 {
        return Err("record too short".into());
    }

    let count = usize::from(bytes[0]);
    if bytes.len() != count + 5 {
        return Err(format!(
            "record length mismatch ({} != {})",
            bytes.len(),
            count + 5
        ));
    }

    // Two's-complement checksum: all record bytes must sum to zero
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    if sum != 0 {
        return Err(format!("record checksum mismatch (sum {sum:#04x})"));
    }

    Ok(Record {
        kind: bytes[3],
        offset: (u16::from(bytes[1]) << 8) | u16::from(bytes[2]),
        data: bytes[4..4 + count].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_HEX: &str = ":0400000001020304F2\n:00000001FF\n";

    #[test]
    fn test_parse_simple() {
        let image = HexImage::parse(SIMPLE_HEX).unwrap();
        assert_eq!(image.data(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_parse_with_gap() {
        // 4 bytes at 0x0000, 2 bytes at 0x0010; the gap reads as erased flash
        let text = ":0400000001020304F2\n:02001000AABB89\n:00000001FF\n";
        let image = HexImage::parse(text).unwrap();
        assert_eq!(image.len(), 0x12);
        assert_eq!(&image.data()[..4], &[0x01, 0x02, 0x03, 0x04]);
        assert!(image.data()[4..0x10].iter().all(|&b| b == FILL_BYTE));
        assert_eq!(&image.data()[0x10..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_parse_ext_linear_zero() {
        let text = ":020000040000FA\n:0400000001020304F2\n:00000001FF\n";
        let image = HexImage::parse(text).unwrap();
        assert_eq!(image.len(), 4);
    }

    #[test]
    fn test_parse_ignores_start_address_record() {
        // Type 05 start-linear-address record before EOF
        let text = ":0400000001020304F2\n:04000005000000C037\n:00000001FF\n";
        let image = HexImage::parse(text).unwrap();
        assert_eq!(image.len(), 4);
    }

    #[test]
    fn test_parse_bad_checksum() {
        let err = HexImage::parse(":0400000001020304F3\n").unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
    }

    #[test]
    fn test_parse_odd_digits() {
        let err = HexImage::parse(":0400000001020304F\n").unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
    }

    #[test]
    fn test_parse_missing_colon() {
        let err = HexImage::parse("0400000001020304F2\n").unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
    }

    #[test]
    fn test_parse_no_data() {
        let err = HexImage::parse(":00000001FF\n").unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
    }

    #[test]
    fn test_records_after_eof_ignored() {
        let text = ":0400000001020304F2\n:00000001FF\n:02001000AABB89\n";
        let image = HexImage::parse(text).unwrap();
        assert_eq!(image.len(), 4);
    }

    #[test]
    fn test_pad_to_exact_size() {
        let image = HexImage::from_bytes(vec![0xAB; 300]);
        let padded = image.pad_to(512).unwrap();
        assert_eq!(padded.len(), 512);
        assert!(padded.data()[..300].iter().all(|&b| b == 0xAB));
        assert!(padded.data()[300..].iter().all(|&b| b == FILL_BYTE));
    }

    #[test]
    fn test_pad_to_no_padding_needed() {
        let image = HexImage::from_bytes(vec![0x01; 64]);
        let padded = image.pad_to(64).unwrap();
        assert_eq!(padded.len(), 64);
    }

    #[test]
    fn test_pad_to_oversized_image() {
        let image = HexImage::from_bytes(vec![0x01; 600]);
        let err = image.pad_to(512).unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
    }

    #[test]
    fn test_padded_checksum_matches_crc_over_padded_bytes() {
        let image = HexImage::from_bytes(vec![0x12, 0x34, 0x56]);
        let padded = image.pad_to(16).unwrap();

        let mut reference = vec![0x12, 0x34, 0x56];
        reference.resize(16, FILL_BYTE);
        assert_eq!(padded.checksum(), crc16_arc(&reference));
    }
}
