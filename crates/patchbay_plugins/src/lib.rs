//! # patchbay plugins
//!
//! Dynamic loading of protocol backends. Backend libraries are ordinary
//! `cdylib` crates that implement [`Backend`] and export the FFI entry
//! points through [`declare_backend!`]; the [`BackendLoader`] discovers
//! them by platform extension, checks version compatibility against the
//! core (major.minor) and registers the exported backend.

pub mod error;
pub mod loader;
mod macros;

pub use error::PluginError;
pub use loader::BackendLoader;

// Re-exported for declare_backend! expansion in backend crates.
pub use patchbay_core::{Backend, CORE_VERSION};
