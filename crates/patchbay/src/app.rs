//! Application lifecycle management.
//!
//! The `Application` struct wires everything together: configuration,
//! backend loading, core construction and the event loop.

use crate::{cli::CliArgs, config::AppConfig, logging::display_banner, signals};
use backend_loopback::LoopbackBackend;
use patchbay_core::Core;
use patchbay_plugins::BackendLoader;
use std::path::Path;
use tracing::{error, info};

/// The assembled hub, ready to run.
///
/// Field order matters: the core (and with it every backend instance) must
/// drop before the loader unmaps the libraries the backends live in.
pub struct Application {
    config: AppConfig,
    core: Core,
    loader: BackendLoader,
}

impl Application {
    /// Builds the hub from an already loaded configuration.
    ///
    /// The caller loads the file and applies CLI overrides before logging
    /// comes up, so load errors surface under the right settings.
    ///
    /// 1. Validate the configuration
    /// 2. Register the built-in loopback backend, load backend libraries
    /// 3. Create instances and mappings from the configuration
    /// 4. Install signal handlers wired to the core's shutdown flag
    pub fn new(args: CliArgs, config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated");

        display_banner();

        let mut core = Core::new()?;
        core.register_backend(Box::new(LoopbackBackend))?;

        let mut loader = BackendLoader::new();
        loader.allow_version_mismatch = args.allow_version_mismatch;
        if config.plugins.auto_load {
            loader.load_directory(&mut core, Path::new(&config.plugins.directory))?;
        }

        config.apply(&mut core)?;

        signals::install(core.shutdown_flag())?;

        info!(
            "📂 Config: {} | Backends: {} | Mappings: {}",
            args.config_path.display(),
            config.plugins.directory,
            core.mapping_count()
        );

        Ok(Self {
            config,
            core,
            loader,
        })
    }

    /// Runs the event loop until a shutdown signal arrives or a backend
    /// fails. Backends are torn down either way.
    pub fn run(mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!(
            "🌟 Patchbay running ({} instances, {} backend libraries)",
            self.config.instances.len(),
            self.loader.library_count()
        );
        info!("🛑 Press Ctrl+C to shut down");

        match self.core.run() {
            Ok(()) => {
                info!("✅ Patchbay shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("❌ Event loop failed: {e}");
                Err(e.into())
            }
        }
    }
}

/// CLI options win over their configuration-file counterparts.
pub(crate) fn apply_cli_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(backend_dir) = &args.backend_dir {
        config.plugins.directory = backend_dir.to_string_lossy().to_string();
    }
    if let Some(log_level) = &args.log_level {
        config.logging.level = log_level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
}
