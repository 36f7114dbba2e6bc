//! Configuration management for the patchbay hub.
//!
//! Handles loading, validation and application of the TOML configuration:
//! backend options, instances and channel mappings.

use patchbay_core::{ConfigError, Core};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Backend library loading settings
    #[serde(default)]
    pub plugins: PluginSettings,
    /// Backend-global options, keyed by backend name
    #[serde(default)]
    pub backend_options: BTreeMap<String, BTreeMap<String, String>>,
    /// Configured backend instances
    #[serde(default)]
    pub instances: Vec<InstanceSettings>,
    /// Channel mappings between instances
    #[serde(default)]
    pub mappings: Vec<MappingSettings>,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

/// Backend library loading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Directory where backend libraries are located
    #[serde(default = "default_backend_directory")]
    pub directory: String,
    /// Whether to load every library in the directory on startup
    #[serde(default = "default_auto_load")]
    pub auto_load: bool,
}

/// One configured activation of a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSettings {
    /// Name of the backend this instance belongs to
    pub backend: String,
    /// Unique instance name, referenced by mappings
    pub name: String,
    /// Instance options handed to the backend
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// One configured channel mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingSettings {
    /// Source channel spec, `instance.channel` with optional globs
    pub from: String,
    /// Destination channel spec
    pub to: String,
    /// Also map the reverse direction
    #[serde(default)]
    pub bidirectional: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_backend_directory() -> String {
    "backends".to_string()
}

fn default_auto_load() -> bool {
    true
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            directory: default_backend_directory(),
            auto_load: default_auto_load(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingSettings::default(),
            plugins: PluginSettings::default(),
            backend_options: BTreeMap::new(),
            instances: Vec::new(),
            mappings: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at
    /// the specified path and returns the default configuration.
    pub fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            std::fs::write(path, toml_content)?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.plugins.directory.is_empty() {
            return Err("Backend directory cannot be empty".to_string());
        }

        for (index, instance) in self.instances.iter().enumerate() {
            if instance.name.is_empty() {
                return Err(format!("Instance {index} has an empty name"));
            }
            if instance.backend.is_empty() {
                return Err(format!(
                    "Instance {:?} does not name a backend",
                    instance.name
                ));
            }
            if self.instances[..index]
                .iter()
                .any(|other| other.name == instance.name)
            {
                return Err(format!("Duplicate instance name: {:?}", instance.name));
            }
        }

        for mapping in &self.mappings {
            for spec in [&mapping.from, &mapping.to] {
                match spec.split_once('.') {
                    Some((instance, channel)) if !instance.is_empty() && !channel.is_empty() => {}
                    _ => {
                        return Err(format!(
                            "Mapping spec {spec:?} must have the form instance.channel"
                        ))
                    }
                }
            }
        }

        Ok(())
    }

    /// Applies the configuration to a core: backend options first, then
    /// instances, then mappings. Fails on the first rejected item.
    pub fn apply(&self, core: &mut Core) -> Result<(), ConfigError> {
        for (backend, options) in &self.backend_options {
            for (option, value) in options {
                debug!(backend = %backend, option = %option, "applying backend option");
                core.configure_backend(backend, option, value)?;
            }
        }

        for settings in &self.instances {
            let instance = core.create_instance(&settings.backend, &settings.name)?;
            for (option, value) in &settings.options {
                core.configure_instance(&instance, option, value)?;
            }
        }

        let mut mapped = 0;
        for mapping in &self.mappings {
            mapped += core.map_channels(&mapping.from, &mapping.to)?;
            if mapping.bidirectional {
                mapped += core.map_channels(&mapping.to, &mapping.from)?;
            }
        }
        info!(
            instances = self.instances.len(),
            mappings = mapped,
            "configuration applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend_loopback::LoopbackBackend;

    #[test]
    fn default_config_validates() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_config_parses() {
        let toml_content = r#"
[logging]
level = "debug"
json_format = true

[plugins]
directory = "/opt/patchbay/backends"
auto_load = false

[backend_options.midi]
detect = "on"

[[instances]]
backend = "loopback"
name = "lo"

[instances.options]
buffer = "16"

[[instances]]
backend = "midi"
name = "deck"

[[mappings]]
from = "deck.cc.0.[1-4]"
to = "lo.fader[1-4]"
bidirectional = true
"#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert_eq!(config.plugins.directory, "/opt/patchbay/backends");
        assert!(!config.plugins.auto_load);
        assert_eq!(config.backend_options["midi"]["detect"], "on");
        assert_eq!(config.instances.len(), 2);
        assert_eq!(config.instances[0].options["buffer"], "16");
        assert_eq!(config.mappings.len(), 1);
        assert!(config.mappings[0].bidirectional);
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid log level"));
    }

    #[test]
    fn duplicate_instance_names_are_rejected() {
        let mut config = AppConfig::default();
        for _ in 0..2 {
            config.instances.push(InstanceSettings {
                backend: "loopback".to_string(),
                name: "lo".to_string(),
                options: BTreeMap::new(),
            });
        }
        assert!(config
            .validate()
            .unwrap_err()
            .contains("Duplicate instance name"));
    }

    #[test]
    fn mapping_spec_without_channel_part_is_rejected() {
        let mut config = AppConfig::default();
        config.mappings.push(MappingSettings {
            from: "nodot".to_string(),
            to: "lo.out".to_string(),
            bidirectional: false,
        });
        assert!(config
            .validate()
            .unwrap_err()
            .contains("instance.channel"));
    }

    #[test]
    fn apply_builds_instances_and_mappings() {
        let toml_content = r#"
[[instances]]
backend = "loopback"
name = "a"

[[instances]]
backend = "loopback"
name = "b"

[[mappings]]
from = "a.out[1-4]"
to = "b.in[1-4]"

[[mappings]]
from = "a.main"
to = "b.main"
bidirectional = true
"#;
        let config: AppConfig = toml::from_str(toml_content).unwrap();
        config.validate().unwrap();

        let mut core = Core::new().unwrap();
        core.register_backend(Box::new(LoopbackBackend)).unwrap();
        config.apply(&mut core).unwrap();

        assert!(core.instance_by_name("a").is_some());
        assert!(core.instance_by_name("b").is_some());
        assert_eq!(core.mapping_count(), 6);
    }

    #[test]
    fn apply_rejects_unknown_backend() {
        let mut config = AppConfig::default();
        config.instances.push(InstanceSettings {
            backend: "missing".to_string(),
            name: "x".to_string(),
            options: BTreeMap::new(),
        });

        let mut core = Core::new().unwrap();
        assert!(config.apply(&mut core).is_err());
    }

    #[test]
    fn load_surfaces_syntax_errors_instead_of_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patchbay.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug").unwrap();

        assert!(AppConfig::load_from_file(&path).is_err());
    }

    #[test]
    fn load_creates_default_file_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patchbay.toml");

        let config = AppConfig::load_from_file(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.logging.level, "info");

        // reloading parses the file we just wrote
        let reloaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(reloaded.plugins.directory, config.plugins.directory);
    }
}
