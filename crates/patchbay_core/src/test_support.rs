//! Minimal backend used by the unit tests.

use std::rc::Rc;
use std::time::Duration;

use crate::backend::{Backend, ChannelUpdate, ManagedFd};
use crate::error::BackendError;
use crate::event_loop::Core;
use crate::registry::{Channel, Instance};

/// A backend that accepts everything and does nothing. Channel specs are
/// plain decimal idents.
pub(crate) struct NullBackend {
    name: &'static str,
    interval: Option<Duration>,
}

impl NullBackend {
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            interval: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

impl Backend for NullBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn create_instance(&mut self, _instance: &Rc<Instance>) -> Result<(), BackendError> {
        Ok(())
    }

    fn configure_instance(
        &mut self,
        _instance: &Rc<Instance>,
        _option: &str,
        _value: &str,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    fn parse_channel(
        &mut self,
        core: &mut Core,
        instance: &Rc<Instance>,
        spec: &str,
    ) -> Result<Rc<Channel>, BackendError> {
        let ident = spec
            .parse::<u64>()
            .map_err(|_| BackendError::message(format!("bad channel spec {spec:?}")))?;
        Ok(core.channel(instance, ident, true)?)
    }

    fn handle_event(
        &mut self,
        _core: &mut Core,
        _instance: &Rc<Instance>,
        _updates: &[ChannelUpdate],
    ) -> Result<(), BackendError> {
        Ok(())
    }

    fn process(&mut self, _core: &mut Core, _ready: &[ManagedFd]) -> Result<(), BackendError> {
        Ok(())
    }

    fn start(&mut self, _core: &mut Core) -> Result<(), BackendError> {
        Ok(())
    }

    fn shutdown(&mut self, _core: &mut Core) {}

    fn interval(&self) -> Option<Duration> {
        self.interval
    }
}
