//! # Patchbay - Main Entry Point
//!
//! Protocol-agnostic event routing hub. Backends translate wire protocols
//! into channel events; the core routes them through configured mappings
//! on a single-threaded, fd-multiplexed event loop.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! patchbay
//!
//! # Specify custom configuration
//! patchbay --config studio.toml
//!
//! # Override specific settings
//! patchbay --backends /opt/patchbay/backends --log-level debug
//!
//! # JSON logging for production
//! patchbay --json-logs
//! ```
//!
//! ## Configuration
//!
//! Configuration comes from a TOML file (default: `patchbay.toml`). If the
//! file doesn't exist, a default configuration is created.
//!
//! ## Signal Handling
//!
//! The hub shuts down gracefully on SIGINT (Ctrl+C) and SIGTERM.

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Exit codes: 0 on clean shutdown, 1 on startup or runtime failure.
fn main() {
    let args = CliArgs::parse();

    // Logging settings come from the file, so load it before the
    // subscriber exists; errors here can only go to stderr
    let mut config = match AppConfig::load_from_file(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "❌ Failed to load configuration from {}: {e}",
                args.config_path.display()
            );
            std::process::exit(1);
        }
    };
    app::apply_cli_overrides(&mut config, &args);

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args, config) {
        Ok(app) => {
            if let Err(e) = app.run() {
                error!("❌ Application error: {e}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e}");
            std::process::exit(1);
        }
    }
}
