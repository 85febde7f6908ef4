//! Serial monitor command.

use anyhow::{Context, Result};
use console::style;
use std::io::{self, Read, Write};

use crate::config::Config;
use crate::{Cli, get_port};

/// Monitor command implementation.
///
/// Handy for watching the device boot after an upload.
pub(crate) fn cmd_monitor(cli: &Cli, config: &mut Config, monitor_baud: u32) -> Result<()> {
    let port = get_port(cli, config)?;

    eprintln!(
        "{} Opening monitor on {} at {} baud",
        style("📡").cyan(),
        style(&port).green(),
        monitor_baud
    );
    eprintln!("{}", style("Press Ctrl-C to exit").dim());

    // Simple serial monitor
    let mut serial = serialport::new(&port, monitor_baud)
        .timeout(std::time::Duration::from_millis(100))
        .open()
        .with_context(|| format!("Failed to open port {port}"))?;

    let mut buf = [0u8; 1024];
    loop {
        match serial.read(&mut buf) {
            Ok(n) if n > 0 => {
                // Print received data
                let data = &buf[..n];
                if let Ok(s) = std::str::from_utf8(data) {
                    print!("{s}");
                } else {
                    // Hex dump for non-UTF8 data
                    for byte in data {
                        print!("{byte:02X} ");
                    }
                }
                io::stdout().flush().ok();
            },
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                // Timeout is expected, continue
            },
            Err(e) => {
                return Err(e).context("Serial port error");
            },
            _ => {},
        }
    }
}
