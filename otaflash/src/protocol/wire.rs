//! OTA bootloader wire protocol: packet framing and response parsing.
//!
//! Host-to-device commands travel in a minimal length-prefixed frame:
//!
//! ```text
//! +-----+--------+-----+-----------------+
//! | 'W' | Length | Tag |     Payload     |
//! +-----+--------+-----+-----------------+
//! | 1   | 1      | 1   |  0..=254 bytes  |
//! +-----+--------+-----+-----------------+
//! ```
//!
//! The length byte counts the tag plus payload. The device answers with
//! text lines: a line starting with `success` acknowledges the frame,
//! anything else (including silence) means the frame must be retransmitted
//! unchanged. The only binary reply is the device-info record, embedded in
//! a line of the form `R(<len>,<pipe>):<payload>`.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};

/// Frame header byte.
pub const FRAME_HEADER: u8 = b'W';

/// Maximum data bytes in a single write-chunk packet. Sized so the whole
/// chunk payload stays under the transport framing limit.
pub const CHUNK_SIZE: usize = 29;

/// Maximum tag + payload length representable by the length byte.
pub const MAX_PAYLOAD: usize = 255;

/// Acknowledgment token sent by the device.
pub const ACK_TOKEN: &[u8] = b"success";

/// Prompt emitted by the bootloader while waiting for a handshake.
pub const SYNC_PROMPT: &[u8] = b"?";

/// Synchronization request tag (host to device).
pub const SYNC_REQUEST: u8 = b'p';

/// Synchronization reply tag (device to host).
pub const SYNC_REPLY: u8 = b'P';

/// Declared payload length of a device-info response.
pub const INFO_PAYLOAD_LEN: usize = 8;

/// Bootloader command tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Select a radio address (sent bare, without the `'W'` frame).
    SelectAddress = b'A',
    /// Query device metadata.
    QueryInfo = b's',
    /// Erase the application area.
    Erase = b'e',
    /// Write a chunk at an offset within the current page buffer.
    WriteChunk = b'B',
    /// Commit the buffered page to flash.
    CommitPage = b'm',
    /// Commit the whole image with its checksum.
    CommitImage = b'w',
}

/// Command packet builder.
#[derive(Debug, Clone)]
pub struct Packet {
    cmd: Command,
    data: Vec<u8>,
}

impl Packet {
    /// Create a new packet with the given command tag.
    pub fn new(cmd: Command) -> Self {
        Self {
            cmd,
            data: Vec::new(),
        }
    }

    /// Build a query-info packet.
    pub fn query_info() -> Self {
        Self::new(Command::QueryInfo)
    }

    /// Build an erase packet.
    pub fn erase() -> Self {
        Self::new(Command::Erase)
    }

    /// Build a write-chunk packet for `data` at byte `offset` within the
    /// current page.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn write_chunk(offset: u16, data: &[u8]) -> Self {
        debug_assert!(data.len() <= CHUNK_SIZE);
        let mut pkt = Self::new(Command::WriteChunk);
        pkt.data.write_u16::<LittleEndian>(offset).unwrap();
        pkt.data.extend_from_slice(data);
        pkt
    }

    /// Build a commit-page packet.
    pub fn commit_page() -> Self {
        Self::new(Command::CommitPage)
    }

    /// Build a commit-image packet carrying the image checksum.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn commit_image(checksum: u16) -> Self {
        let mut pkt = Self::new(Command::CommitImage);
        pkt.data.write_u16::<LittleEndian>(checksum).unwrap();
        pkt
    }

    /// Encode the complete wire frame: `'W'` + length + tag + payload.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = 1 + self.data.len();
        debug_assert!(payload_len <= MAX_PAYLOAD);

        let mut buf = Vec::with_capacity(2 + payload_len);
        buf.push(FRAME_HEADER);
        // Safe cast: payload_len <= 255
        buf.push(payload_len as u8);
        buf.push(self.cmd as u8);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Get the command tag.
    pub fn command(&self) -> Command {
        self.cmd
    }
}

/// Parsed reply to a query-info packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// Device identity triple (vendor/family/revision signature bytes).
    pub device_id: [u8; 3],
    /// Flash page size in bytes.
    pub page_size: u16,
    /// Application area size in pages.
    pub app_pages: u16,
}

impl DeviceInfo {
    /// Application area size in bytes.
    #[must_use]
    pub fn app_size(&self) -> u32 {
        u32::from(self.page_size) * u32::from(self.app_pages)
    }
}

/// One classified device response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Frame acknowledged.
    Ack,
    /// Device-info record.
    Info(DeviceInfo),
    /// Unrecognized non-empty line.
    Other(Vec<u8>),
    /// Empty line (read timeout on the wire).
    Empty,
}

/// Classify a trimmed response line.
///
/// An `R(`-prefixed line is parsed strictly: a wrong declared length, a
/// truncated payload, or a wrong message id is a protocol error, because it
/// means the peer is not the bootloader this protocol expects.
pub fn classify(line: &[u8]) -> Result<Response> {
    if line.is_empty() {
        return Ok(Response::Empty);
    }
    if line.starts_with(ACK_TOKEN) {
        return Ok(Response::Ack);
    }
    if line.starts_with(b"R(") {
        return parse_info_line(line).map(Response::Info);
    }
    Ok(Response::Other(line.to_vec()))
}

/// Parse a `R(<len>,<pipe>):<payload>` device-info line.
///
/// Payload layout: message id (1, must be `'s'`) + identity (3) +
/// page size (u16 BE) + application size in pages (u16 BE).
fn parse_info_line(line: &[u8]) -> Result<DeviceInfo> {
    let close = line
        .iter()
        .position(|&b| b == b')')
        .ok_or_else(|| Error::Protocol("unterminated info response header".into()))?;

    if line.get(close + 1) != Some(&b':') {
        return Err(Error::Protocol("missing ':' in info response".into()));
    }

    let header = &line[2..close];
    let comma = header
        .iter()
        .position(|&b| b == b',')
        .ok_or_else(|| Error::Protocol("missing ',' in info response header".into()))?;

    let declared_len: usize = std::str::from_utf8(&header[..comma])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Protocol("unparsable info response length".into()))?;

    if declared_len != INFO_PAYLOAD_LEN {
        return Err(Error::Protocol(format!(
            "info response length is wrong ({declared_len} != {INFO_PAYLOAD_LEN})"
        )));
    }

    let payload = &line[close + 2..];
    if payload.len() != INFO_PAYLOAD_LEN {
        return Err(Error::Protocol(format!(
            "info payload truncated ({} != {INFO_PAYLOAD_LEN} bytes)",
            payload.len()
        )));
    }

    if payload[0] != Command::QueryInfo as u8 {
        return Err(Error::Protocol(format!(
            "invalid info message id ({:#04x} != 's')",
            payload[0]
        )));
    }

    Ok(DeviceInfo {
        device_id: [payload[1], payload[2], payload[3]],
        page_size: BigEndian::read_u16(&payload[4..6]),
        app_pages: BigEndian::read_u16(&payload[6..8]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_line(payload: &[u8]) -> Vec<u8> {
        let mut line = format!("R({},0):", payload.len()).into_bytes();
        line.extend_from_slice(payload);
        line
    }

    #[test]
    fn test_encode_erase() {
        assert_eq!(Packet::erase().encode(), b"W\x01e");
    }

    #[test]
    fn test_encode_query_info() {
        assert_eq!(Packet::query_info().encode(), b"W\x01s");
    }

    #[test]
    fn test_encode_write_chunk() {
        let pkt = Packet::write_chunk(0x0123, &[0xAA, 0xBB, 0xCC]);
        let frame = pkt.encode();
        // 'W' + len(1 tag + 2 offset + 3 data = 6) + 'B' + LE offset + data
        assert_eq!(frame, [b'W', 6, b'B', 0x23, 0x01, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_encode_commit_image() {
        let frame = Packet::commit_image(0xBEEF).encode();
        assert_eq!(frame, [b'W', 3, b'w', 0xEF, 0xBE]);
    }

    #[test]
    fn test_encode_commit_page() {
        assert_eq!(Packet::commit_page().encode(), b"W\x01m");
    }

    #[test]
    fn test_classify_ack() {
        assert_eq!(classify(b"success").unwrap(), Response::Ack);
        // Token match is a prefix check
        assert_eq!(classify(b"success: page written").unwrap(), Response::Ack);
    }

    #[test]
    fn test_classify_empty() {
        assert_eq!(classify(b"").unwrap(), Response::Empty);
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(
            classify(b"error 3").unwrap(),
            Response::Other(b"error 3".to_vec())
        );
    }

    #[test]
    fn test_classify_info() {
        let payload = [b's', 0x41, 0x95, 0x1E, 0x01, 0x00, 0x00, 0x40];
        let line = info_line(&payload);
        let info = match classify(&line).unwrap() {
            Response::Info(info) => info,
            other => panic!("expected info, got {other:?}"),
        };
        assert_eq!(info.device_id, [0x41, 0x95, 0x1E]);
        assert_eq!(info.page_size, 256);
        assert_eq!(info.app_pages, 64);
        assert_eq!(info.app_size(), 16384);
    }

    #[test]
    fn test_classify_info_wrong_length() {
        // Declared length 7 instead of 8
        let mut line = b"R(7,0):".to_vec();
        line.extend_from_slice(&[b's', 0x41, 0x95, 0x1E, 0x01, 0x00, 0x00]);
        assert!(matches!(classify(&line), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_classify_info_truncated_payload() {
        let mut line = b"R(8,0):".to_vec();
        line.extend_from_slice(&[b's', 0x41, 0x95]);
        assert!(matches!(classify(&line), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_classify_info_wrong_message_id() {
        let payload = [b'x', 0x41, 0x95, 0x1E, 0x01, 0x00, 0x00, 0x40];
        let line = info_line(&payload);
        assert!(matches!(classify(&line), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_classify_info_garbled_header() {
        assert!(matches!(classify(b"R(zz,0):xxxxxxxx"), Err(Error::Protocol(_))));
        assert!(matches!(classify(b"R(8:xxxxxxxx"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_device_info_app_size() {
        let info = DeviceInfo {
            device_id: [0x46, 0x97, 0x1E],
            page_size: 256,
            app_pages: 256,
        };
        assert_eq!(info.app_size(), 65536);
    }
}
