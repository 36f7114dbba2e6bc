//! Backend capability trait and the value types that cross it
//!
//! A backend is a protocol adapter: it owns the wire side of one or more
//! configured instances and talks to the core exclusively through the
//! [`Core`](crate::Core) context object it is handed in every callback.
//!
//! The lifecycle of a backend is:
//!
//! * registration (once, at plugin load) via [`Core::register_backend`](crate::Core::register_backend)
//! * `configure` for every backend-global option in the configuration
//! * `create_instance` / `configure_instance` while instances are parsed
//! * `parse_channel` whenever a channel spec referencing one of its
//!   instances has to be resolved for the mapping table
//! * `start`, only for backends that ended up with at least one instance
//! * the processing loop: `process` once per iteration with the batch of
//!   ready fds, `handle_event` once per iteration and instance with every
//!   channel that changed
//! * `shutdown`, exactly once for every registered backend, started or not

use std::any::Any;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

use crate::error::BackendError;
use crate::event_loop::Core;
use crate::registry::{Channel, Instance};

/// The raw payload of a channel event.
///
/// The core never inspects this; it is forwarded unmodified from the
/// reporting backend to every mapped destination. Interpretation is
/// entirely backend-defined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Raw {
    Double(f64),
    U64(u64),
}

/// A channel event value: the backend-defined raw form plus a derived
/// normalized double in `0.0 ..= 1.0` that backends use to translate
/// between value ranges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelValue {
    pub raw: Raw,
    pub normalized: f64,
}

impl ChannelValue {
    /// A value carrying only a normalized double.
    pub fn normalized(value: f64) -> Self {
        Self {
            raw: Raw::Double(value),
            normalized: value,
        }
    }

    /// A value with a raw 64-bit integer payload and a separately derived
    /// normalized form.
    pub fn from_u64(raw: u64, normalized: f64) -> Self {
        Self {
            raw: Raw::U64(raw),
            normalized,
        }
    }
}

/// One changed channel in a per-instance event batch.
#[derive(Debug, Clone)]
pub struct ChannelUpdate {
    pub channel: Rc<Channel>,
    pub value: ChannelValue,
}

/// A file descriptor managed by the event loop on behalf of a backend.
///
/// The payload is backend-defined; the core only threads it through to
/// [`Backend::process`] when the descriptor becomes ready to read.
#[derive(Clone)]
pub struct ManagedFd {
    pub fd: RawFd,
    pub payload: Option<Rc<dyn Any>>,
}

/// The capability set every protocol adapter implements.
///
/// Execution is strictly single-threaded: every callback runs to completion
/// on the loop thread before the next is invoked, so implementations need
/// neither `Send` nor any internal locking. Backends that want background
/// concurrency must run it off-thread and signal completion back through a
/// managed fd (self-notifying pipe), never through a direct call.
pub trait Backend {
    /// The unique name this backend registers under.
    fn name(&self) -> &str;

    /// Parse a backend-global configuration option.
    ///
    /// The default rejects every option; backends without global options
    /// need not override it.
    fn configure(&mut self, option: &str, value: &str) -> Result<(), BackendError> {
        let _ = value;
        Err(BackendError::message(format!(
            "backend {} has no global option {option:?}",
            self.name()
        )))
    }

    /// Attach backend state to a freshly allocated, core-owned instance.
    fn create_instance(&mut self, instance: &Rc<Instance>) -> Result<(), BackendError>;

    /// Parse an instance configuration option.
    fn configure_instance(
        &mut self,
        instance: &Rc<Instance>,
        option: &str,
        value: &str,
    ) -> Result<(), BackendError>;

    /// Resolve a channel spec (globs already substituted) to a channel.
    ///
    /// Implementations resolve their spec syntax to a 64-bit ident and go
    /// through [`Core::channel`] so repeated references yield the same
    /// channel.
    fn parse_channel(
        &mut self,
        core: &mut Core,
        instance: &Rc<Instance>,
        spec: &str,
    ) -> Result<Rc<Channel>, BackendError>;

    /// Deliver one iteration's worth of changed channels for one instance.
    ///
    /// Called at most once per instance per iteration, with the full set of
    /// channels that changed. Events reported from inside this callback are
    /// buffered and delivered the following iteration.
    fn handle_event(
        &mut self,
        core: &mut Core,
        instance: &Rc<Instance>,
        updates: &[ChannelUpdate],
    ) -> Result<(), BackendError>;

    /// Service this backend's ready file descriptors.
    ///
    /// Invoked once per iteration for every started backend. `ready` holds
    /// every registered fd that became readable; backends without fds are
    /// still called with an empty slice to support pure-polling designs.
    ///
    /// Readiness is edge-triggered: a descriptor is reported when it
    /// becomes readable, not for as long as it stays readable. Drain it
    /// before returning; data left unread is only reported again after
    /// the next write to the descriptor.
    fn process(&mut self, core: &mut Core, ready: &[ManagedFd]) -> Result<(), BackendError>;

    /// Called after all instances exist and all mappings are built, before
    /// the loop starts. Only backends with at least one instance are
    /// started.
    fn start(&mut self, core: &mut Core) -> Result<(), BackendError>;

    /// Release everything. Called exactly once for every registered
    /// backend when the loop exits, in registration order; the core
    /// ignores failures here.
    fn shutdown(&mut self, core: &mut Core);

    /// Release backend state attached to a channel. Invoked during
    /// teardown for every registered channel that still carries a payload.
    fn free_channel(&mut self, channel: &Channel) {
        let _ = channel;
    }

    /// Maximum time this backend is willing to sleep between `process`
    /// calls. `None` contributes the default of one second.
    fn interval(&self) -> Option<Duration> {
        None
    }
}
