//! Command-line interface for the patchbay hub.
//!
//! Argument parsing is handled by `clap`; CLI options override their
//! configuration-file counterparts.

use clap::{Arg, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the backend library directory
    pub backend_dir: Option<PathBuf>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Whether to load backend libraries built against a different core version
    pub allow_version_mismatch: bool,
}

impl CliArgs {
    /// Parses command line arguments using clap.
    pub fn parse() -> Self {
        let matches = Command::new("patchbay")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Protocol-agnostic event routing hub")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("patchbay.toml"),
            )
            .arg(
                Arg::new("backends")
                    .short('b')
                    .long("backends")
                    .value_name("DIR")
                    .help("Backend library directory path"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("allow-version-mismatch")
                    .long("allow-version-mismatch")
                    .help("Load backend libraries built against a different core version (MAY CAUSE CRASHES)")
                    .action(clap::ArgAction::SetTrue),
            )
            .get_matches();

        Self {
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .expect("default config path is always set"),
            ),
            backend_dir: matches.get_one::<String>("backends").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            allow_version_mismatch: matches.get_flag("allow-version-mismatch"),
        }
    }
}
