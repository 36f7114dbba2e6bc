//! The core context object and the fd-multiplexed event loop
//!
//! [`Core`] is the one explicit context threaded through every backend
//! callback: it owns the identity registries, the mapping table, the
//! dispatch buffer, the managed-fd set and the iteration timestamp. There
//! is no hidden process-wide state.
//!
//! The loop is single-threaded and cooperative. One iteration:
//!
//! 1. compute the wake deadline: `min(1 s, min over every started
//!    backend's declared interval)`
//! 2. poll the managed-fd set up to that deadline
//! 3. invoke `process` once on every started backend with its batch of
//!    ready fds (an empty batch when nothing fired)
//! 4. flush the dispatch buffer: one `handle_event` per instance with
//!    accumulated updates
//! 5. advance the timestamp
//!
//! A failing callback or poll error aborts the loop; either way every
//! registered backend receives exactly one `shutdown` call, in
//! registration order, before [`Core::run`] returns.

use std::any::Any;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, trace};

use crate::backend::{Backend, ChannelValue, ManagedFd};
use crate::error::{ConfigError, RegistryError, RuntimeError};
use crate::glob::ChannelSpec;
use crate::registry::{Channel, Instance, Registry};
use crate::router::Router;

/// Upper bound on how long one iteration may sleep.
const MAX_INTERVAL: Duration = Duration::from_millis(1000);

struct FdEntry {
    fd: RawFd,
    backend: usize,
    payload: Option<Rc<dyn Any>>,
}

/// The routing core: registries, mapping engine, dispatch buffer and the
/// event loop driving them.
pub struct Core {
    registry: Registry,
    router: Router,
    poll: Poll,
    events: Events,
    fds: Vec<Option<FdEntry>>,
    epoch: Instant,
    timestamp_ms: u64,
    shutdown: Arc<AtomicBool>,
    torn_down: bool,
}

impl Core {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            registry: Registry::new(),
            router: Router::new(),
            poll: Poll::new()?,
            events: Events::with_capacity(64),
            fds: Vec::new(),
            epoch: Instant::now(),
            timestamp_ms: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
            torn_down: false,
        })
    }

    // --- identity ---

    /// Register a backend under the name it reports.
    pub fn register_backend(&mut self, backend: Box<dyn Backend>) -> Result<(), RegistryError> {
        let name = backend.name().to_string();
        self.registry.register_backend(backend)?;
        info!(backend = %name, "backend registered");
        Ok(())
    }

    /// Hand a backend-global configuration option to the named backend.
    pub fn configure_backend(
        &mut self,
        backend: &str,
        option: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let index = self
            .registry
            .backend_index(backend)
            .ok_or_else(|| RegistryError::UnknownBackend(backend.to_string()))?;
        let handle = self.registry.backend_handle(index);
        let result = handle.borrow_mut().configure(option, value);
        result.map_err(|source| ConfigError::BadOption {
            backend: backend.to_string(),
            option: option.to_string(),
            value: value.to_string(),
            source,
        })
    }

    /// Allocate a core-owned instance and let its backend attach state.
    pub fn create_instance(
        &mut self,
        backend: &str,
        name: &str,
    ) -> Result<Rc<Instance>, ConfigError> {
        let instance = self.registry.create_instance(backend, name)?;
        let handle = self.registry.backend_handle(instance.backend_index());
        handle
            .borrow_mut()
            .create_instance(&instance)
            .map_err(|source| ConfigError::InstanceCreation {
                backend: backend.to_string(),
                instance: name.to_string(),
                source,
            })?;
        debug!(backend = %backend, instance = %name, "instance created");
        Ok(instance)
    }

    /// Hand an instance configuration option to the owning backend.
    pub fn configure_instance(
        &mut self,
        instance: &Rc<Instance>,
        option: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let handle = self.registry.backend_handle(instance.backend_index());
        let backend = self
            .registry
            .backend_name(instance.backend_index())
            .to_string();
        let result = handle.borrow_mut().configure_instance(instance, option, value);
        result.map_err(|source| ConfigError::BadOption {
            backend,
            option: option.to_string(),
            value: value.to_string(),
            source,
        })
    }

    /// Find an instance by backend name and backend-assigned ident.
    pub fn find_instance(&self, backend: &str, ident: u64) -> Option<Rc<Instance>> {
        self.registry.find_instance(backend, ident)
    }

    /// Find an instance by its configured name.
    pub fn instance_by_name(&self, name: &str) -> Option<Rc<Instance>> {
        self.registry.instance_by_name(name)
    }

    /// All instances configured for one backend.
    pub fn query_instances(&self, backend: &str) -> Vec<Rc<Instance>> {
        self.registry.query_instances(backend)
    }

    /// Resolve (or, with `create`, allocate) the channel with `ident` on
    /// an instance. See [`Registry::channel`].
    pub fn channel(
        &self,
        instance: &Rc<Instance>,
        ident: u64,
        create: bool,
    ) -> Result<Rc<Channel>, RegistryError> {
        self.registry.channel(instance, ident, create)
    }

    // --- mapping ---

    /// Expand a pair of channel specs and register the resulting
    /// one-to-one mappings.
    ///
    /// Both specs carry an `instance.channel` prefix; the channel part may
    /// contain glob tokens. Source and destination must expand to the same
    /// number of channels, and concrete source `i` is paired with concrete
    /// destination `i`. Returns the number of mappings created.
    pub fn map_channels(&mut self, from: &str, to: &str) -> Result<usize, ConfigError> {
        let (from_instance, from_channels) = split_spec(from)?;
        let (to_instance, to_channels) = split_spec(to)?;

        let from_instance = self
            .registry
            .instance_by_name(from_instance)
            .ok_or_else(|| RegistryError::UnknownInstance(from_instance.to_string()))?;
        let to_instance = self
            .registry
            .instance_by_name(to_instance)
            .ok_or_else(|| RegistryError::UnknownInstance(to_instance.to_string()))?;

        let from_spec = ChannelSpec::parse(from_channels)?;
        let to_spec = ChannelSpec::parse(to_channels)?;
        if from_spec.channels() != to_spec.channels() {
            return Err(ConfigError::GlobCardinalityMismatch {
                from: from.to_string(),
                to: to.to_string(),
                from_channels: from_spec.channels(),
                to_channels: to_spec.channels(),
            });
        }

        let count = from_spec.channels();
        for index in 0..count {
            let source = self.parse_channel(&from_instance, &from_spec.render(index))?;
            let destination = self.parse_channel(&to_instance, &to_spec.render(index))?;
            self.router.add_mapping(&source, &destination)?;
        }
        trace!(from = %from, to = %to, count, "channel pair mapped");
        Ok(count)
    }

    fn parse_channel(
        &mut self,
        instance: &Rc<Instance>,
        spec: &str,
    ) -> Result<Rc<Channel>, ConfigError> {
        let handle = self.registry.backend_handle(instance.backend_index());
        let backend = self
            .registry
            .backend_name(instance.backend_index())
            .to_string();
        let result = handle.borrow_mut().parse_channel(self, instance, spec);
        result.map_err(|source| ConfigError::BadChannel {
            backend,
            spec: spec.to_string(),
            source,
        })
    }

    /// Total number of registered source→destination edges.
    pub fn mapping_count(&self) -> usize {
        self.router.mapping_count()
    }

    // --- runtime ---

    /// Register (`manage = true`) or drop (`manage = false`) a file
    /// descriptor from the multiplexed set.
    ///
    /// Managing an already-managed fd updates its owner and payload.
    /// Dropping an unknown fd is a no-op.
    pub fn manage_fd(
        &mut self,
        fd: RawFd,
        backend: &str,
        manage: bool,
        payload: Option<Rc<dyn Any>>,
    ) -> Result<(), RuntimeError> {
        let index = self
            .registry
            .backend_index(backend)
            .ok_or_else(|| RegistryError::UnknownBackend(backend.to_string()))?;

        if manage {
            if let Some(entry) = self.fds.iter_mut().flatten().find(|entry| entry.fd == fd) {
                entry.backend = index;
                entry.payload = payload;
                return Ok(());
            }
            let slot = match self.fds.iter().position(Option::is_none) {
                Some(slot) => slot,
                None => {
                    self.fds.push(None);
                    self.fds.len() - 1
                }
            };
            self.poll
                .registry()
                .register(&mut SourceFd(&fd), Token(slot), Interest::READABLE)?;
            self.fds[slot] = Some(FdEntry {
                fd,
                backend: index,
                payload,
            });
            trace!(fd, backend = %backend, "fd managed");
        } else {
            let Some(slot) = self
                .fds
                .iter()
                .position(|entry| entry.as_ref().is_some_and(|e| e.fd == fd))
            else {
                debug!(fd, backend = %backend, "ignoring unmanage of unknown fd");
                return Ok(());
            };
            self.poll.registry().deregister(&mut SourceFd(&fd))?;
            self.fds[slot] = None;
            trace!(fd, backend = %backend, "fd released");
        }
        Ok(())
    }

    /// Number of currently managed fds.
    pub fn managed_fd_count(&self) -> usize {
        self.fds.iter().flatten().count()
    }

    /// Report a value change on a channel.
    ///
    /// Called by backends from `process` (or `handle_event`) when their
    /// backing implementation produced an event. Delivery is deferred: the
    /// update is routed into the dispatch buffer and flushed at the end of
    /// the iteration. An event on an unmapped channel is silently dropped.
    pub fn report_channel_event(&mut self, channel: &Rc<Channel>, value: ChannelValue) {
        self.router.record(channel, value);
    }

    /// The timestamp advanced once per iteration, in milliseconds since
    /// the core was created. Resolution is bounded by iteration latency;
    /// use it for coarse interval bookkeeping only.
    pub fn current_timestamp(&self) -> u64 {
        self.timestamp_ms
    }

    /// Ask the loop to stop after the current iteration.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// The flag [`Self::run`] watches between iterations. Safe to set from
    /// a signal handler or another thread.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Start every backend that has at least one configured instance.
    ///
    /// Backends without instances stay unstarted; they are skipped by the
    /// loop but still receive the final `shutdown` call.
    pub fn start(&mut self) -> Result<(), RuntimeError> {
        for index in 0..self.registry.backend_count() {
            let has_instances = self
                .registry
                .instances()
                .iter()
                .any(|instance| instance.backend_index() == index);
            if has_instances {
                self.registry.mark_started(index);
            } else {
                debug!(
                    backend = %self.registry.backend_name(index),
                    "backend has no instances, not starting"
                );
            }
        }

        for index in 0..self.registry.backend_count() {
            if !self.registry.is_started(index) {
                continue;
            }
            let handle = self.registry.backend_handle(index);
            let name = self.registry.backend_name(index).to_string();
            info!(backend = %name, "starting backend");
            handle
                .borrow_mut()
                .start(self)
                .map_err(|source| RuntimeError::BackendFailed {
                    backend: name,
                    during: "start",
                    source,
                })?;
        }
        Ok(())
    }

    /// Run one loop iteration: wait, process, flush, advance timestamp.
    pub fn iterate(&mut self) -> Result<(), RuntimeError> {
        let timeout = self.wake_deadline();
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            // A signal woke us; treat it as an empty readiness set so the
            // shutdown flag gets checked.
            Err(e) if e.kind() == io::ErrorKind::Interrupted => self.events.clear(),
            Err(e) => return Err(RuntimeError::Poll(e)),
        }

        let backend_count = self.registry.backend_count();
        let mut ready: Vec<Vec<ManagedFd>> = vec![Vec::new(); backend_count];
        for event in self.events.iter() {
            let Token(slot) = event.token();
            if let Some(Some(entry)) = self.fds.get(slot) {
                ready[entry.backend].push(ManagedFd {
                    fd: entry.fd,
                    payload: entry.payload.clone(),
                });
            }
        }

        for index in 0..backend_count {
            if !self.registry.is_started(index) {
                continue;
            }
            let batch = std::mem::take(&mut ready[index]);
            let handle = self.registry.backend_handle(index);
            let name = self.registry.backend_name(index).to_string();
            handle
                .borrow_mut()
                .process(self, &batch)
                .map_err(|source| RuntimeError::BackendFailed {
                    backend: name,
                    during: "process",
                    source,
                })?;
        }

        self.flush()?;
        self.timestamp_ms = self.epoch.elapsed().as_millis() as u64;
        Ok(())
    }

    /// Deliver everything accumulated this iteration: one `handle_event`
    /// per destination instance with its full set of changed channels.
    fn flush(&mut self) -> Result<(), RuntimeError> {
        let pending = self.router.take_pending();
        for batch in pending {
            let index = batch.instance.backend_index();
            let handle = self.registry.backend_handle(index);
            let name = self.registry.backend_name(index).to_string();
            trace!(
                backend = %name,
                instance = %batch.instance.name(),
                channels = batch.updates.len(),
                "flushing channel updates"
            );
            handle
                .borrow_mut()
                .handle_event(self, &batch.instance, &batch.updates)
                .map_err(|source| RuntimeError::BackendFailed {
                    backend: name,
                    during: "handle_event",
                    source,
                })?;
        }
        Ok(())
    }

    fn wake_deadline(&self) -> Duration {
        let mut deadline = MAX_INTERVAL;
        for index in 0..self.registry.backend_count() {
            if !self.registry.is_started(index) {
                continue;
            }
            if let Some(interval) = self.registry.backend_handle(index).borrow().interval() {
                deadline = deadline.min(interval);
            }
        }
        deadline
    }

    /// Start the configured backends and run until the shutdown flag is
    /// set or a callback fails. Every registered backend receives exactly
    /// one `shutdown` call before this returns, whatever the outcome.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        let result = self.run_inner();
        self.shutdown_backends();
        result
    }

    fn run_inner(&mut self) -> Result<(), RuntimeError> {
        self.start()?;
        info!(
            mappings = self.router.mapping_count(),
            fds = self.managed_fd_count(),
            "event loop running"
        );
        while !self.shutdown.load(Ordering::Relaxed) {
            self.iterate()?;
        }
        info!("shutdown requested, leaving event loop");
        Ok(())
    }

    /// Shut down every registered backend, started or not, exactly once,
    /// in registration order; then release instances and channels.
    /// Idempotent.
    pub fn shutdown_backends(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        for index in 0..self.registry.backend_count() {
            let handle = self.registry.backend_handle(index);
            debug!(backend = %self.registry.backend_name(index), "shutting down backend");
            handle.borrow_mut().shutdown(self);
        }

        // Channels may carry backend state; give the owning backend a
        // chance to release it, then drain the lists so the
        // instance/channel reference cycles unwind.
        let instances: Vec<_> = self.registry.instances().to_vec();
        for instance in instances {
            let handle = self.registry.backend_handle(instance.backend_index());
            for channel in instance.take_channels() {
                if channel.has_payload() {
                    handle.borrow_mut().free_channel(&channel);
                }
            }
        }
        self.router.clear();
    }
}

fn split_spec(spec: &str) -> Result<(&str, &str), ConfigError> {
    match spec.split_once('.') {
        Some((instance, channels)) if !instance.is_empty() && !channels.is_empty() => {
            Ok((instance, channels))
        }
        _ => Err(ConfigError::MissingInstance {
            spec: spec.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::NullBackend;

    fn core_with(names: &[&'static str]) -> Core {
        let mut core = Core::new().unwrap();
        for name in names {
            core.register_backend(Box::new(NullBackend::named(name))).unwrap();
        }
        core
    }

    #[test]
    fn deadline_defaults_to_one_second() {
        let mut core = core_with(&["a"]);
        core.create_instance("a", "a0").unwrap();
        core.start().unwrap();
        assert_eq!(core.wake_deadline(), Duration::from_millis(1000));
    }

    #[test]
    fn deadline_is_minimum_of_declared_intervals() {
        let mut core = core_with(&[]);
        core.register_backend(Box::new(
            NullBackend::named("fast").with_interval(Duration::from_millis(250)),
        ))
        .unwrap();
        core.register_backend(Box::new(
            NullBackend::named("slow").with_interval(Duration::from_millis(4000)),
        ))
        .unwrap();
        core.register_backend(Box::new(NullBackend::named("default")))
            .unwrap();
        core.create_instance("fast", "f0").unwrap();
        core.create_instance("slow", "s0").unwrap();
        core.create_instance("default", "d0").unwrap();
        core.start().unwrap();

        assert_eq!(core.wake_deadline(), Duration::from_millis(250));
    }

    #[test]
    fn unstarted_backend_interval_does_not_shorten_the_deadline() {
        let mut core = core_with(&["a"]);
        core.register_backend(Box::new(
            NullBackend::named("idle").with_interval(Duration::from_millis(1)),
        ))
        .unwrap();
        core.create_instance("a", "a0").unwrap();
        core.start().unwrap();

        // "idle" has no instances and never started
        assert_eq!(core.wake_deadline(), Duration::from_millis(1000));
    }

    #[test]
    fn manage_fd_registers_updates_and_releases() {
        let mut core = core_with(&["a", "b"]);

        let mut pipe = [0 as libc::c_int; 2];
        assert_eq!(unsafe { libc::pipe(pipe.as_mut_ptr()) }, 0);
        let [read_fd, write_fd] = pipe;

        core.manage_fd(read_fd, "a", true, None).unwrap();
        assert_eq!(core.managed_fd_count(), 1);

        // re-managing moves ownership instead of duplicating the entry
        core.manage_fd(read_fd, "b", true, Some(Rc::new(7u32))).unwrap();
        assert_eq!(core.managed_fd_count(), 1);

        core.manage_fd(read_fd, "b", false, None).unwrap();
        assert_eq!(core.managed_fd_count(), 0);

        // dropping an fd nobody manages is a no-op
        core.manage_fd(read_fd, "b", false, None).unwrap();

        let err = core.manage_fd(read_fd, "nope", true, None).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Registry(RegistryError::UnknownBackend(_))
        ));

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    #[test]
    fn timestamp_advances_with_iterations() {
        let mut core = core_with(&[]);
        core.register_backend(Box::new(
            NullBackend::named("tick").with_interval(Duration::from_millis(1)),
        ))
        .unwrap();
        core.create_instance("tick", "t0").unwrap();
        core.start().unwrap();

        assert_eq!(core.current_timestamp(), 0);
        core.iterate().unwrap();
        let first = core.current_timestamp();
        std::thread::sleep(Duration::from_millis(2));
        core.iterate().unwrap();
        assert!(core.current_timestamp() > first);
    }

    #[test]
    fn options_are_forwarded_to_the_owning_backend() {
        let mut core = core_with(&["a"]);
        let instance = core.create_instance("a", "a0").unwrap();

        // NullBackend keeps the default configure, which rejects everything
        let err = core.configure_backend("a", "detect", "on").unwrap_err();
        assert!(matches!(err, ConfigError::BadOption { .. }));
        core.configure_instance(&instance, "buffer", "16").unwrap();

        assert!(matches!(
            core.configure_backend("nope", "detect", "on"),
            Err(ConfigError::Registry(RegistryError::UnknownBackend(_)))
        ));
    }

    #[test]
    fn mapping_a_channel_onto_itself_is_rejected() {
        let mut core = core_with(&["a"]);
        core.create_instance("a", "a0").unwrap();
        let err = core.map_channels("a0.5", "a0.5").unwrap_err();
        assert!(matches!(err, ConfigError::SelfReferentialMapping { .. }));
    }

    #[test]
    fn spec_without_instance_prefix_is_rejected() {
        let mut core = core_with(&["a"]);
        core.create_instance("a", "a0").unwrap();
        assert!(matches!(
            core.map_channels("nodot", "a0.1"),
            Err(ConfigError::MissingInstance { .. })
        ));
        assert!(matches!(
            core.map_channels("a0.1", ".ch"),
            Err(ConfigError::MissingInstance { .. })
        ));
    }
}
