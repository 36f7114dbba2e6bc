//! Discovery and loading of dynamically linked backends

use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use patchbay_core::{Backend, Core, CORE_VERSION};
use tracing::{error, info, warn};

use crate::error::PluginError;

/// Loads backend libraries and registers the backends they export.
///
/// Every loaded [`Library`] stays held here so the backend code it maps
/// remains valid. The loader must outlive the [`Core`] the backends were
/// registered into; drop the core first.
pub struct BackendLoader {
    /// Ignore version differences between backend and core
    pub allow_version_mismatch: bool,
    libraries: Vec<Library>,
}

impl BackendLoader {
    pub fn new() -> Self {
        Self {
            allow_version_mismatch: false,
            libraries: Vec::new(),
        }
    }

    /// Load every backend library in a directory and register its backend.
    ///
    /// A library that fails to load is reported and skipped; the rest of
    /// the directory still loads. Returns the number of backends
    /// registered.
    pub fn load_directory(
        &mut self,
        core: &mut Core,
        directory: &Path,
    ) -> Result<usize, PluginError> {
        if !directory.exists() {
            warn!(directory = %directory.display(), "backend directory does not exist");
            return Ok(0);
        }
        if !directory.is_dir() {
            return Err(PluginError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("backend path is not a directory: {}", directory.display()),
            )));
        }

        info!(directory = %directory.display(), "🔌 loading backends");
        let files = discover_backend_files(directory)?;
        if files.is_empty() {
            info!("📂 no backend libraries found");
            return Ok(0);
        }

        let mut loaded = 0;
        for file in &files {
            match self.load_file(core, file) {
                Ok(name) => {
                    info!(backend = %name, "✅ backend loaded");
                    loaded += 1;
                }
                Err(e) => {
                    error!(file = %file.display(), error = %e, "❌ backend failed to load");
                }
            }
        }
        info!("🎉 {loaded}/{} backend libraries loaded", files.len());
        Ok(loaded)
    }

    /// Load one backend library and register the backend it exports.
    pub fn load_file(&mut self, core: &mut Core, path: &Path) -> Result<String, PluginError> {
        let display = path.display().to_string();

        let library = unsafe {
            Library::new(path).map_err(|e| PluginError::LibraryError {
                path: display.clone(),
                message: e.to_string(),
            })?
        };

        let version: Symbol<unsafe extern "C" fn() -> *const std::os::raw::c_char> = unsafe {
            library
                .get(b"patchbay_backend_version")
                .map_err(|_| PluginError::MissingSymbol {
                    path: display.clone(),
                    symbol: "patchbay_backend_version",
                })?
        };
        let version_ptr = unsafe { version() };
        if version_ptr.is_null() {
            return Err(PluginError::LibraryError {
                path: display,
                message: "null version string".to_string(),
            });
        }
        let plugin_version = unsafe {
            std::ffi::CStr::from_ptr(version_ptr)
                .to_string_lossy()
                .to_string()
        };

        if !self.allow_version_mismatch && !versions_compatible(&plugin_version, CORE_VERSION) {
            return Err(PluginError::VersionMismatch {
                path: display,
                plugin: plugin_version,
                core: CORE_VERSION.to_string(),
            });
        }

        let create: Symbol<unsafe extern "C" fn() -> *mut dyn Backend> = unsafe {
            library
                .get(b"patchbay_backend_create")
                .map_err(|_| PluginError::MissingSymbol {
                    path: display.clone(),
                    symbol: "patchbay_backend_create",
                })?
        };
        let backend_ptr = unsafe { create() };
        if backend_ptr.is_null() {
            return Err(PluginError::NullBackend { path: display });
        }
        let backend = unsafe { Box::from_raw(backend_ptr) };
        let name = backend.name().to_string();

        core.register_backend(backend)?;
        self.libraries.push(library);
        Ok(name)
    }

    /// Number of libraries currently held.
    pub fn library_count(&self) -> usize {
        self.libraries.len()
    }
}

impl Default for BackendLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// List the backend libraries in a directory, by platform extension.
fn discover_backend_files(directory: &Path) -> Result<Vec<PathBuf>, PluginError> {
    #[cfg(target_os = "macos")]
    const EXTENSION: &str = "dylib";
    #[cfg(not(target_os = "macos"))]
    const EXTENSION: &str = "so";

    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let path = entry?.path();
        if path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.to_string_lossy().to_lowercase() == EXTENSION)
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Major.minor compatibility check between a backend and this core.
fn versions_compatible(plugin_version: &str, core_version: &str) -> bool {
    let major_minor = |version: &str| -> Option<(u32, u32)> {
        let mut parts = version.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        Some((major, minor))
    };
    match (major_minor(plugin_version), major_minor(core_version)) {
        (Some(plugin), Some(core)) => plugin == core,
        _ => plugin_version == core_version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_match_on_major_minor_only() {
        assert!(versions_compatible("0.1.0", "0.1.9"));
        assert!(!versions_compatible("0.2.0", "0.1.0"));
        assert!(!versions_compatible("1.1.0", "0.1.0"));
        // unparseable versions fall back to exact comparison
        assert!(versions_compatible("dev", "dev"));
        assert!(!versions_compatible("dev", "0.1.0"));
    }

    #[test]
    fn discovery_filters_by_platform_extension() {
        let dir = tempfile::tempdir().unwrap();
        #[cfg(target_os = "macos")]
        let (good, ext) = ("backend_a.dylib", "dylib");
        #[cfg(not(target_os = "macos"))]
        let (good, ext) = ("backend_a.so", "so");

        std::fs::write(dir.path().join(good), []).unwrap();
        std::fs::write(dir.path().join("notes.txt"), []).unwrap();
        std::fs::write(dir.path().join("README"), []).unwrap();
        std::fs::create_dir(dir.path().join(format!("subdir.{ext}"))).unwrap();

        let files = discover_backend_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with(good));
    }

    #[test]
    fn missing_directory_loads_nothing() {
        let mut core = Core::new().unwrap();
        let mut loader = BackendLoader::new();
        let loaded = loader
            .load_directory(&mut core, Path::new("/nonexistent/backends"))
            .unwrap();
        assert_eq!(loaded, 0);
        assert_eq!(loader.library_count(), 0);
    }
}
