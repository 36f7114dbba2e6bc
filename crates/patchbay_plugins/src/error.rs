//! Error types for backend loading

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("failed to load library {path}: {message}")]
    LibraryError { path: String, message: String },

    #[error("backend library {path} is missing export {symbol:?}")]
    MissingSymbol { path: String, symbol: &'static str },

    #[error("backend library {path} built against core v{plugin}, this core is v{core}")]
    VersionMismatch {
        path: String,
        plugin: String,
        core: String,
    },

    #[error("backend library {path} returned a null backend")]
    NullBackend { path: String },

    #[error("backend registration failed: {0}")]
    Registration(#[from] patchbay_core::RegistryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
