//! Logging system setup.
//!
//! Initializes the tracing-based logging system with support for both
//! human-readable and JSON output formats.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes logging from the configured settings.
///
/// Respects `RUST_LOG` when set; `json_format` forces JSON output over the
/// config file's choice.
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(fmt::layer().json().with_file(false).with_line_number(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

/// Displays the startup banner.
pub fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║            🎛  PATCHBAY v{}           ║", version);
    info!("║                                          ║");
    info!("║  Protocol-Agnostic Event Routing Hub     ║");
    info!("║  🔌 Dynamically Loaded Backends          ║");
    info!("║  🧵 Single-Threaded Cooperative Core     ║");
    info!("╚══════════════════════════════════════════╝");
}
