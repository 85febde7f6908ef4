//! XMEGA OTA transfer session.
//!
//! This module drives one complete upload against the bootloader:
//! synchronize, validate device metadata, then erase, transfer, and commit
//! the image. The session owns its port exclusively and is strictly
//! synchronous: every frame is written, then one response line is read.
//!
//! ## Retransmission
//!
//! Any response other than a line starting with `success` (including an
//! empty line from a read timeout) is a NACK, and the byte-identical frame
//! is retransmitted. The bootloader's receive path is idempotent per frame,
//! so the default policy retransmits without bound, favoring eventual
//! success over bounded latency; [`SessionConfig`] can cap it.

use crate::error::{Error, Result};
use crate::image::hex::FirmwareImage;
use crate::port::Port;
use crate::protocol::wire::{
    Command, DeviceInfo, Packet, Response, SYNC_PROMPT, SYNC_REPLY, SYNC_REQUEST, classify,
};
use crate::target::part::{LinkAddresses, PartSpec, Uploader};
use crate::target::xmega::plan::TransferPlan;
use log::{debug, info, trace};

/// Retry policy for one transfer session.
///
/// The info-query budget is fixed by the protocol (10 framed queries, 3
/// line reads each). Synchronization and per-packet retransmission default
/// to unbounded, matching the bootloader's wait-for-a-device-to-appear
/// deployment model; production callers can cap both.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Framed query-info attempts before declaring the device unreachable.
    pub info_attempts: u32,
    /// Response lines examined per query-info attempt.
    pub info_reads: u32,
    /// Cap on synchronization attempts (None = retry forever).
    pub max_sync_attempts: Option<u32>,
    /// Cap on per-packet retransmissions (None = retransmit forever).
    pub max_packet_retries: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            info_attempts: 10,
            info_reads: 3,
            max_sync_attempts: None,
            max_packet_retries: None,
        }
    }
}

/// Result of a completed upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSummary {
    /// Image bytes transferred (equals the padded image length).
    pub bytes_sent: usize,
    /// CRC-16/ARC committed to the device.
    pub checksum: u16,
    /// Total retransmissions over the whole session.
    pub retransmits: u64,
}

/// One live OTA session against an XMEGA bootloader.
///
/// Generic over the port type `P`, which must implement the `Port` trait.
pub struct XmegaSession<P: Port> {
    port: P,
    part: PartSpec,
    addresses: LinkAddresses,
    config: SessionConfig,
    retransmits: u64,
}

impl<P: Port> XmegaSession<P> {
    /// Create a new session over an opened port.
    pub fn new(port: P, part: PartSpec, addresses: LinkAddresses) -> Self {
        Self {
            port,
            part,
            addresses,
            config: SessionConfig::default(),
            retransmits: 0,
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the session and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Cumulative retransmission count.
    pub fn retransmits(&self) -> u64 {
        self.retransmits
    }

    /// Read one response line, trimmed of surrounding whitespace.
    ///
    /// A read timeout mid-line returns whatever arrived; a timeout with no
    /// data returns an empty line, which the callers treat as a NACK.
    fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        let mut buf = [0u8; 1];

        loop {
            match self.port.read(&mut buf) {
                Ok(1) => {
                    if buf[0] == b'\n' {
                        break;
                    }
                    line.push(buf[0]);
                },
                Ok(_) => break,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        while line.last().is_some_and(u8::is_ascii_whitespace) {
            line.pop();
        }
        let start = line
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(line.len());
        line.drain(..start);

        Ok(line)
    }

    /// Read and discard unsolicited lines until an empty read.
    fn drain_lines(&mut self) -> Result<()> {
        loop {
            let line = self.read_line()?;
            if line.is_empty() {
                return Ok(());
            }
            trace!("Draining: {}", String::from_utf8_lossy(&line));
        }
    }

    /// Synchronize with the bootloader.
    ///
    /// Pokes the link with null bytes until the bootloader prompt (`?`)
    /// appears, then runs the counter handshake: `'p'` + counter must be
    /// echoed back as `'P'` + counter. A wrong echo drains the link and
    /// retries with the counter incremented.
    #[allow(clippy::cast_sign_loss)] // Counter travels as a raw byte
    pub fn synchronize(&mut self) -> Result<()> {
        self.port.clear_buffers()?;

        info!("Attempting to synchronize on {}", self.port.name());

        let mut probes = 0u32;
        loop {
            probes += 1;
            if let Some(cap) = self.config.max_sync_attempts {
                if probes > cap {
                    return Err(Error::SyncFailed(format!(
                        "no bootloader prompt after {cap} probes"
                    )));
                }
            }

            self.port.write_all(&[0x00])?;
            self.port.flush()?;

            let line = self.read_line()?;
            if line == SYNC_PROMPT {
                debug!("Got bootloader prompt after {probes} probe(s)");
                break;
            }
        }

        let mut counter: i8 = 0;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if let Some(cap) = self.config.max_sync_attempts {
                if attempts > cap {
                    return Err(Error::SyncFailed(format!(
                        "counter handshake failed after {cap} attempts"
                    )));
                }
            }

            counter = counter.wrapping_add(1);
            let request = [SYNC_REQUEST, counter as u8];
            trace!("Sync request {counter}");
            self.port.write_all(&request)?;
            self.port.flush()?;

            let line = self.read_line()?;
            if line == [SYNC_REPLY, counter as u8] {
                info!("Synchronized");
                return Ok(());
            }

            trace!("Unexpected sync reply: {}", String::from_utf8_lossy(&line));
            self.drain_lines()?;
        }
    }

    /// Select the target radio address.
    ///
    /// Address selection is a bare `'A'` frame outside the acknowledged
    /// packet protocol; the device answers with one status line that is
    /// read and discarded.
    fn select_address(&mut self, address: [u8; 5]) -> Result<()> {
        let mut frame = [0u8; 6];
        frame[0] = Command::SelectAddress as u8;
        frame[1..].copy_from_slice(&address);

        self.port.write_all(&frame)?;
        self.port.flush()?;

        let line = self.read_line()?;
        trace!("Address select reply: {}", String::from_utf8_lossy(&line));
        Ok(())
    }

    /// Query and validate device metadata.
    ///
    /// Sends up to `info_attempts` framed query-info packets; for each,
    /// scans up to `info_reads` response lines for the info record. A
    /// malformed record is a protocol error (fatal, not retried); a valid
    /// record that disagrees with the configured part is fatal before any
    /// flash-modifying command is sent.
    pub fn query_info(&mut self) -> Result<DeviceInfo> {
        for attempt in 1..=self.config.info_attempts {
            self.send_packet(&Packet::query_info())?;

            for _ in 0..self.config.info_reads {
                let line = self.read_line()?;
                if let Response::Info(device) = classify(&line)? {
                    info!(
                        "Device id {:x}.{:x}.{:x}, page size {}, app size {}",
                        device.device_id[0],
                        device.device_id[1],
                        device.device_id[2],
                        device.page_size,
                        device.app_size()
                    );

                    self.part.validate(&device)?;
                    return Ok(device);
                }
            }

            debug!(
                "No info response (attempt {attempt}/{})",
                self.config.info_attempts
            );
        }

        Err(Error::Unreachable)
    }

    /// Send one framed packet through the retransmitting codec.
    ///
    /// The same encoded frame is rewritten until the device acknowledges
    /// it; every non-ACK response bumps the session retransmit counter.
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let frame = packet.encode();
        let mut retries = 0u64;

        loop {
            self.port.write_all(&frame)?;
            self.port.flush()?;

            let line = self.read_line()?;
            if matches!(classify(&line), Ok(Response::Ack)) {
                trace!("{:?} acknowledged", packet.command());
                return Ok(());
            }

            retries += 1;
            self.retransmits += 1;
            if let Some(cap) = self.config.max_packet_retries {
                if retries > cap {
                    return Err(Error::Unresponsive { retries: cap });
                }
            }
            trace!("Retransmitting {:?}", packet.command());
        }
    }

    /// Erase, transfer, and commit a padded image.
    #[allow(clippy::cast_possible_truncation)]
    fn transfer(
        &mut self,
        image: &FirmwareImage,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<UploadSummary> {
        let expected = self.part.app_image_size() as usize;
        if image.len() != expected {
            return Err(Error::InvalidImage(format!(
                "padded image is {} bytes, application area is {expected}",
                image.len()
            )));
        }

        let checksum = image.checksum();
        let total = image.len();
        info!("Transmitting {total} bytes, checksum {checksum:#06x}");

        self.send_packet(&Packet::erase())?;

        let plan = TransferPlan::new(image.data(), self.part.page_size);
        let mut sent = 0usize;

        for page in plan.pages() {
            for chunk in page.chunks() {
                self.send_packet(&Packet::write_chunk(chunk.offset, chunk.data))?;
                sent += chunk.data.len();
                progress(sent, total);
            }
            self.send_packet(&Packet::commit_page())?;
        }

        self.send_packet(&Packet::commit_image(checksum))?;

        info!("Retransmitted {} time(s)", self.retransmits);
        Ok(UploadSummary {
            bytes_sent: sent,
            checksum,
            retransmits: self.retransmits,
        })
    }
}

impl<P: Port> Uploader for XmegaSession<P> {
    fn connect(&mut self) -> Result<DeviceInfo> {
        self.synchronize()?;

        debug!("Switching to info address");
        self.select_address(self.addresses.info)?;
        let device = self.query_info()?;

        debug!("Switching to boot address");
        self.select_address(self.addresses.boot)?;

        Ok(device)
    }

    fn upload(
        &mut self,
        image: &FirmwareImage,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<UploadSummary> {
        self.transfer(image, progress)
    }

    fn retransmits(&self) -> u64 {
        self.retransmits
    }

    fn close(&mut self) {
        let _ = self.port.close();
    }
}
