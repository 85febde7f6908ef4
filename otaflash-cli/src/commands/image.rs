//! Firmware image inspection command.

use anyhow::{Context, Result};
use console::style;
use otaflash::{HexImage, Part};
use std::path::Path;

use crate::Cli;

/// Info command implementation.
///
/// Reports the parsed image size and the checksum that would be committed
/// for the selected part's application area.
pub(crate) fn cmd_info(cli: &Cli, firmware: &Path, json: bool) -> Result<()> {
    let image = HexImage::from_file(firmware)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;

    let part: Part = cli.part.into();
    let spec = part.spec();
    let app_size = spec.app_image_size() as usize;
    let padded = image.pad_to(app_size).with_context(|| {
        format!(
            "Image does not fit the {} application area",
            cli.part_name()
        )
    })?;

    if json {
        let info = serde_json::json!({
            "file": firmware.display().to_string(),
            "part": cli.part_name(),
            "image_bytes": image.len(),
            "app_size": app_size,
            "pad_bytes": app_size - image.len(),
            "page_size": spec.page_size,
            "checksum": format!("{:#06x}", padded.checksum()),
        });
        println!("{}", serde_json::to_string_pretty(&info).unwrap_or_default());
        return Ok(());
    }

    eprintln!("\n{}", style("Firmware Image").bold().underlined());
    eprintln!("  File:       {}", firmware.display());
    eprintln!("  Part:       {}", cli.part_name());
    eprintln!("  Image size: {} bytes", image.len());
    eprintln!(
        "  App size:   {} bytes ({} pad bytes)",
        app_size,
        app_size - image.len()
    );
    eprintln!("  Page size:  {} bytes", spec.page_size);
    eprintln!("  Checksum:   {:#06x}", padded.checksum());

    Ok(())
}
