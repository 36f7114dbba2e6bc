//! # patchbay core
//!
//! The routing engine of the patchbay event hub. It connects heterogeneous
//! control-protocol endpoints through a uniform backend contract and routes
//! discrete value-change events from any input channel to any configured
//! set of output channels.
//!
//! ## Architecture
//!
//! - **Identity registries** ([`registry`]): the backend, instance and
//!   channel tables. `(instance, ident)` uniquely identifies a channel and
//!   lookups are idempotent.
//! - **Glob/mapping engine** ([`glob`], [`router`]): expands configured
//!   channel-spec pairs (with bracketed ranges and enumerations) into
//!   concrete one-to-one mappings and keeps the directed adjacency.
//! - **Dispatch buffer** ([`router`]): per-iteration event accumulation,
//!   grouped by destination instance, last-write-wins per channel.
//! - **Event loop** ([`event_loop`]): single-threaded, fd-multiplexed
//!   scheduler driving every backend and flushing the buffer once per
//!   iteration.
//!
//! Everything runs on one thread. Backends needing background concurrency
//! must signal back into the loop through a managed fd.
//!
//! ## Example
//!
//! ```no_run
//! use patchbay_core::Core;
//! # fn register_my_backends(_core: &mut Core) {}
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut core = Core::new()?;
//! register_my_backends(&mut core);
//!
//! core.create_instance("loopback", "lo")?;
//! core.map_channels("lo.in[1-4]", "lo.out[5-8]")?;
//!
//! core.run()?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod event_loop;
pub mod glob;
pub mod registry;
pub mod router;

#[cfg(test)]
mod test_support;

pub use backend::{Backend, ChannelUpdate, ChannelValue, ManagedFd, Raw};
pub use error::{BackendError, ConfigError, RegistryError, RuntimeError};
pub use event_loop::Core;
pub use glob::ChannelSpec;
pub use registry::{Channel, Instance, Registry};
pub use router::Router;

/// Core version, exported for plugin ABI compatibility checks.
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
