//! Flash and probe command implementations.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use otaflash::{DeviceInfo, HexImage, LinkAddresses, Part, SessionConfig, Uploader};
use std::path::Path;

use crate::config::Config;
use crate::{Cli, CliError, get_port, use_fancy_output};

/// Parse the two radio addresses, mapping bad syntax to a usage error.
fn link_addresses(info_addr: &str, boot_addr: &str) -> Result<LinkAddresses> {
    LinkAddresses::new(info_addr, boot_addr).map_err(|e| CliError::Usage(e.to_string()).into())
}

/// Open the port and run the connect handshake, reporting progress.
fn connect_uploader(
    cli: &Cli,
    config: &mut Config,
    addresses: LinkAddresses,
    session_config: SessionConfig,
) -> Result<(Box<dyn Uploader>, DeviceInfo)> {
    let port = get_port(cli, config)?;
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&port).green(),
            cli.baud
        );
    }

    let part: Part = cli.part.into();
    let mut uploader = part
        .create_uploader(&port, cli.baud, addresses, session_config)
        .with_context(|| format!("Failed to open port {port}"))?;

    if !cli.quiet {
        eprintln!(
            "{} Synchronizing with the bootloader (reset the device if nothing happens)...",
            style("⏳").yellow()
        );
    }
    let device = uploader.connect()?;

    if !cli.quiet {
        eprintln!(
            "{} Device id {:x}.{:x}.{:x}, page size {}, app size {}",
            style("✓").green(),
            device.device_id[0],
            device.device_id[1],
            device.device_id[2],
            device.page_size,
            device.app_size()
        );
    }

    Ok((uploader, device))
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &mut Config,
    firmware: &Path,
    boot_addr: &str,
    info_addr: &str,
    max_retries: Option<u64>,
    max_sync_attempts: Option<u32>,
) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware {}",
            style("📦").cyan(),
            firmware.display()
        );
    }

    let image = HexImage::from_file(firmware)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Parsed {} bytes of image data",
            style("ℹ").blue(),
            image.len()
        );
    }

    let addresses = link_addresses(info_addr, boot_addr)?;
    let session_config = SessionConfig {
        max_packet_retries: max_retries,
        max_sync_attempts,
        ..SessionConfig::default()
    };

    let (mut uploader, device) = connect_uploader(cli, config, addresses, session_config)?;

    // Pad to the size the live device just reported; the checksum must
    // cover the whole application area.
    let padded = image.pad_to(device.app_size() as usize)?;

    // Create progress bar
    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(padded.len() as u64);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] \
                     {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let summary = uploader.upload(&padded, &mut |sent, _total| {
        pb.set_position(sent as u64);
    })?;

    pb.finish_with_message("done");
    uploader.close();

    if !cli.quiet {
        eprintln!(
            "{} Committed {} bytes, checksum {:#06x}, retransmitted {} time(s)",
            style("ℹ").blue(),
            summary.bytes_sent,
            summary.checksum,
            summary.retransmits
        );
        eprintln!(
            "\n{} Upload complete, device is validating the image",
            style("🎉").green().bold()
        );
    }

    Ok(())
}

/// Probe command implementation.
pub(crate) fn cmd_probe(
    cli: &Cli,
    config: &mut Config,
    info_addr: &str,
    boot_addr: &str,
    max_sync_attempts: Option<u32>,
    json: bool,
) -> Result<()> {
    let addresses = link_addresses(info_addr, boot_addr)?;
    let session_config = SessionConfig {
        max_sync_attempts,
        ..SessionConfig::default()
    };

    let (mut uploader, device) = connect_uploader(cli, config, addresses, session_config)?;
    uploader.close();

    if json {
        let info = serde_json::json!({
            "device_id": format!(
                "{:02x}.{:02x}.{:02x}",
                device.device_id[0], device.device_id[1], device.device_id[2]
            ),
            "page_size": device.page_size,
            "app_pages": device.app_pages,
            "app_size": device.app_size(),
        });
        println!("{}", serde_json::to_string_pretty(&info).unwrap_or_default());
    } else if !cli.quiet {
        eprintln!(
            "\n{} Device matches configured part {}",
            style("🎉").green().bold(),
            cli.part_name()
        );
    }

    Ok(())
}
