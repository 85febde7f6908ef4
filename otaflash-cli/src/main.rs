//! otaflash CLI - Command-line tool for uploading firmware over the air to
//! AVR XMEGA OTA bootloaders.
//!
//! ## Features
//!
//! - Upload Intel-HEX firmware images over a serial radio link
//! - Probe live device metadata
//! - Inspect firmware images and their commit checksums
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use otaflash::{DEFAULT_BOOT_ADDR, DEFAULT_INFO_ADDR, Part};
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Error classes that map to distinct process exit codes.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Invalid invocation or environment (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// User cancelled an interactive prompt (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// otaflash - upload firmware over the air to AVR XMEGA OTA bootloaders.
///
/// Environment variables:
///   OTAFLASH_PORT              - Default serial port
///   OTAFLASH_BAUD              - Default baud rate (default: 115200)
///   OTAFLASH_PART              - Default device part
///   OTAFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "otaflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "OTAFLASH_PORT")]
    port: Option<String>,

    /// Baud rate of the radio link.
    #[arg(
        short,
        long,
        global = true,
        default_value = "115200",
        env = "OTAFLASH_BAUD"
    )]
    baud: u32,

    /// Target device part.
    #[arg(
        long,
        global = true,
        default_value = "atxmega32a4u",
        env = "OTAFLASH_PART"
    )]
    part: PartArg,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "OTAFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Supported device parts.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum PartArg {
    /// ATxmega32A4U (32 KiB application section, default).
    Atxmega32a4u,
    /// ATxmega128A4U (128 KiB application section).
    Atxmega128a4u,
}

impl From<PartArg> for Part {
    fn from(part: PartArg) -> Self {
        match part {
            PartArg::Atxmega32a4u => Part::Atxmega32A4u,
            PartArg::Atxmega128a4u => Part::Atxmega128A4u,
        }
    }
}

impl Cli {
    /// Canonical name of the selected part.
    fn part_name(&self) -> String {
        Part::from(self.part).to_string()
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload a firmware image over the air.
    Flash {
        /// Path to the Intel-HEX firmware file.
        firmware: PathBuf,

        /// Remote boot upload address (colon-separated hex octets).
        #[arg(short = 'B', long, default_value = DEFAULT_BOOT_ADDR)]
        boot_addr: String,

        /// Remote device info address (colon-separated hex octets).
        #[arg(short = 'I', long, default_value = DEFAULT_INFO_ADDR)]
        info_addr: String,

        /// Cap per-packet retransmissions (default: retransmit forever).
        #[arg(long)]
        max_retries: Option<u64>,

        /// Cap synchronization attempts (default: retry forever).
        #[arg(long)]
        max_sync_attempts: Option<u32>,
    },

    /// Synchronize with a device and show its metadata.
    Probe {
        /// Remote device info address (colon-separated hex octets).
        #[arg(short = 'I', long, default_value = DEFAULT_INFO_ADDR)]
        info_addr: String,

        /// Remote boot upload address (colon-separated hex octets).
        #[arg(short = 'B', long, default_value = DEFAULT_BOOT_ADDR)]
        boot_addr: String,

        /// Cap synchronization attempts (default: retry forever).
        #[arg(long)]
        max_sync_attempts: Option<u32>,

        /// Output metadata as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Show information about a firmware image file.
    Info {
        /// Path to the Intel-HEX firmware file.
        firmware: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Open serial monitor.
    Monitor {
        /// Baud rate for monitoring (default: 115200).
        #[arg(long, default_value = "115200")]
        monitor_baud: u32,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        // Disable all color output
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "otaflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        let code = match err.downcast_ref::<CliError>() {
            Some(CliError::Usage(_)) => 2,
            Some(CliError::Cancelled(_)) => 130,
            None => 1,
        };
        std::process::exit(code);
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash {
            firmware,
            boot_addr,
            info_addr,
            max_retries,
            max_sync_attempts,
        } => commands::flash::cmd_flash(
            cli,
            &mut config,
            firmware,
            boot_addr,
            info_addr,
            *max_retries,
            *max_sync_attempts,
        ),
        Commands::Probe {
            info_addr,
            boot_addr,
            max_sync_attempts,
            json,
        } => commands::flash::cmd_probe(
            cli,
            &mut config,
            info_addr,
            boot_addr,
            *max_sync_attempts,
            *json,
        ),
        Commands::Info { firmware, json } => commands::image::cmd_info(cli, firmware, *json),
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(*json);
            Ok(())
        },
        Commands::Monitor { monitor_baud } => {
            commands::monitor::cmd_monitor(cli, &mut config, *monitor_baud)
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Get serial port from CLI args or interactive selection.
fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    // Ask to remember if not a known device and interactive mode
    if !selected.is_known && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    // ---- clap validation ----

    #[test]
    fn test_cli_command_is_valid() {
        // Verifies that all derive macros produce a valid clap Command
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_flash() {
        let cli = Cli::try_parse_from([
            "otaflash",
            "--port",
            "/dev/ttyUSB0",
            "--baud",
            "57600",
            "flash",
            "firmware.hex",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.baud, 57600);
        assert!(matches!(cli.command, Commands::Flash { .. }));
    }

    #[test]
    fn test_cli_parse_flash_with_all_options() {
        let cli = Cli::try_parse_from([
            "otaflash",
            "flash",
            "fw.hex",
            "--boot-addr",
            "01:02:03:04:05",
            "--info-addr",
            "01:02:03:04:06",
            "--max-retries",
            "50",
            "--max-sync-attempts",
            "20",
        ])
        .unwrap();
        if let Commands::Flash {
            firmware,
            boot_addr,
            info_addr,
            max_retries,
            max_sync_attempts,
        } = cli.command
        {
            assert_eq!(firmware.to_str().unwrap(), "fw.hex");
            assert_eq!(boot_addr, "01:02:03:04:05");
            assert_eq!(info_addr, "01:02:03:04:06");
            assert_eq!(max_retries, Some(50));
            assert_eq!(max_sync_attempts, Some(20));
        } else {
            panic!("Expected Flash command");
        }
    }

    #[test]
    fn test_cli_flash_default_addresses() {
        let cli = Cli::try_parse_from(["otaflash", "flash", "fw.hex"]).unwrap();
        if let Commands::Flash {
            boot_addr,
            info_addr,
            max_retries,
            ..
        } = cli.command
        {
            assert_eq!(boot_addr, DEFAULT_BOOT_ADDR);
            assert_eq!(info_addr, DEFAULT_INFO_ADDR);
            assert_eq!(max_retries, None);
        } else {
            panic!("Expected Flash command");
        }
    }

    #[test]
    fn test_cli_parse_probe() {
        let cli = Cli::try_parse_from(["otaflash", "probe", "--json"]).unwrap();
        if let Commands::Probe { json, .. } = cli.command {
            assert!(json);
        } else {
            panic!("Expected Probe command");
        }
    }

    #[test]
    fn test_cli_parse_info() {
        let cli = Cli::try_parse_from(["otaflash", "info", "firmware.hex"]).unwrap();
        assert!(matches!(cli.command, Commands::Info { json: false, .. }));
    }

    #[test]
    fn test_cli_parse_list_ports_json() {
        let cli = Cli::try_parse_from(["otaflash", "list-ports", "--json"]).unwrap();
        if let Commands::ListPorts { json } = cli.command {
            assert!(json);
        } else {
            panic!("Expected ListPorts command");
        }
    }

    #[test]
    fn test_cli_parse_monitor_default_baud() {
        let cli = Cli::try_parse_from(["otaflash", "monitor"]).unwrap();
        if let Commands::Monitor { monitor_baud } = cli.command {
            assert_eq!(monitor_baud, 115200);
        } else {
            panic!("Expected Monitor command");
        }
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["otaflash", "completions", "bash"]).unwrap();
        assert!(matches!(cli.command, Commands::Completions { .. }));
    }

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::try_parse_from(["otaflash", "list-ports"]).unwrap();
        assert_eq!(cli.baud, 115200);
        assert!(matches!(cli.part, PartArg::Atxmega32a4u));
        assert!(!cli.quiet);
        assert!(!cli.non_interactive);
        assert!(!cli.confirm_port);
        assert!(!cli.list_all_ports);
        assert!(cli.port.is_none());
        assert!(cli.config_path.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "otaflash",
            "--port",
            "COM3",
            "--baud",
            "57600",
            "--part",
            "atxmega128a4u",
            "-vv",
            "--quiet",
            "--non-interactive",
            "--confirm-port",
            "--list-all-ports",
            "--config",
            "/tmp/config.toml",
            "list-ports",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM3"));
        assert_eq!(cli.baud, 57600);
        assert!(matches!(cli.part, PartArg::Atxmega128a4u));
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(cli.non_interactive);
        assert!(cli.confirm_port);
        assert!(cli.list_all_ports);
    }

    #[test]
    fn test_cli_missing_subcommand() {
        let result = Cli::try_parse_from(["otaflash"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_invalid_part() {
        let result = Cli::try_parse_from(["otaflash", "--part", "atmega328p", "list-ports"]);
        assert!(result.is_err());
    }

    // ---- PartArg conversion ----

    #[test]
    fn test_part_arg_to_part() {
        assert_eq!(Part::from(PartArg::Atxmega32a4u), Part::Atxmega32A4u);
        assert_eq!(Part::from(PartArg::Atxmega128a4u), Part::Atxmega128A4u);
    }
}
