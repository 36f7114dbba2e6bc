//! Error types for the routing core

use std::io;

/// Errors raised by the identity registries.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A backend with the same name was already registered
    #[error("backend already registered: {0}")]
    DuplicateBackend(String),

    /// No backend with that name exists
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// An instance with the same name was already created
    #[error("instance name already in use: {0}")]
    DuplicateInstance(String),

    /// No instance with that name exists
    #[error("unknown instance: {0}")]
    UnknownInstance(String),

    /// Channel lookup with `create = false` found nothing
    #[error("no channel with ident {ident} on instance {instance}")]
    ChannelNotFound { instance: String, ident: u64 },
}

/// Errors that reject a configuration before the event loop starts.
///
/// Nothing is torn down when one of these surfaces: no backend has been
/// started yet.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Malformed bracket glob inside a channel spec
    #[error("malformed channel glob in {spec:?}: {reason}")]
    GlobSyntax { spec: String, reason: String },

    /// Paired channel specs expand to different channel counts
    #[error(
        "mapping {from:?} -> {to:?} expands to {from_channels} source channel(s) \
         but {to_channels} destination channel(s)"
    )]
    GlobCardinalityMismatch {
        from: String,
        to: String,
        from_channels: usize,
        to_channels: usize,
    },

    /// A channel was mapped onto itself
    #[error("channel {spec:?} is mapped onto itself")]
    SelfReferentialMapping { spec: String },

    /// A channel spec did not contain an `instance.channel` separator
    #[error("channel spec {spec:?} names no instance")]
    MissingInstance { spec: String },

    /// A backend rejected a configuration option
    #[error("backend {backend} rejected option {option} = {value:?}: {source}")]
    BadOption {
        backend: String,
        option: String,
        value: String,
        source: BackendError,
    },

    /// A backend failed to parse a concrete channel spec
    #[error("backend {backend} failed to parse channel {spec:?}: {source}")]
    BadChannel {
        backend: String,
        spec: String,
        source: BackendError,
    },

    /// A backend failed to set up a freshly allocated instance
    #[error("backend {backend} failed to create instance {instance}: {source}")]
    InstanceCreation {
        backend: String,
        instance: String,
        source: BackendError,
    },
}

/// Fatal errors after the loop has started.
///
/// Any of these triggers the full ordered shutdown sequence and a non-zero
/// process exit. The core never isolates or restarts a failing backend.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A backend callback signalled failure
    #[error("backend {backend} failed during {during}: {source}")]
    BackendFailed {
        backend: String,
        during: &'static str,
        source: BackendError,
    },

    /// The fd multiplexing primitive failed
    #[error("fd multiplexing failed: {0}")]
    Poll(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// What backend callbacks return to signal failure.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{0}")]
    Message(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl BackendError {
    /// Shorthand for a plain message error.
    pub fn message(message: impl Into<String>) -> Self {
        BackendError::Message(message.into())
    }
}
