//! Loopback backend
//!
//! Echoes every event delivered to one of its channels right back out on
//! the same channel, next iteration. Useful for bridging two mappings
//! (map protocol A into the loopback, map the loopback into protocol B)
//! and for exercising a mapping setup without hardware attached.
//!
//! Channel specs are free-form names; each instance assigns idents in
//! order of first reference.

use std::rc::Rc;
use std::time::Duration;

use patchbay_core::{
    Backend, BackendError, Channel, ChannelUpdate, Core, Instance, ManagedFd,
};
use patchbay_plugins::declare_backend;
use tracing::{debug, trace};

/// Per-instance channel name table; the ident of a name is its index.
#[derive(Default)]
struct LoopbackData {
    names: Vec<String>,
}

#[derive(Default)]
pub struct LoopbackBackend;

impl Backend for LoopbackBackend {
    fn name(&self) -> &str {
        "loopback"
    }

    fn create_instance(&mut self, instance: &Rc<Instance>) -> Result<(), BackendError> {
        instance.set_payload(Box::new(LoopbackData::default()));
        Ok(())
    }

    fn configure_instance(
        &mut self,
        _instance: &Rc<Instance>,
        option: &str,
        _value: &str,
    ) -> Result<(), BackendError> {
        Err(BackendError::message(format!(
            "loopback instances have no option {option:?}"
        )))
    }

    fn parse_channel(
        &mut self,
        core: &mut Core,
        instance: &Rc<Instance>,
        spec: &str,
    ) -> Result<Rc<Channel>, BackendError> {
        if spec.is_empty() {
            return Err(BackendError::message("empty channel name"));
        }
        let ident = {
            let mut data = instance
                .payload_mut::<LoopbackData>()
                .ok_or_else(|| BackendError::message("instance has no loopback state"))?;
            match data.names.iter().position(|name| name == spec) {
                Some(index) => index as u64,
                None => {
                    data.names.push(spec.to_string());
                    debug!(instance = %instance.name(), channel = %spec, "loopback channel registered");
                    (data.names.len() - 1) as u64
                }
            }
        };
        Ok(core.channel(instance, ident, true)?)
    }

    fn handle_event(
        &mut self,
        core: &mut Core,
        instance: &Rc<Instance>,
        updates: &[ChannelUpdate],
    ) -> Result<(), BackendError> {
        trace!(instance = %instance.name(), channels = updates.len(), "echoing updates");
        for update in updates {
            core.report_channel_event(&update.channel, update.value);
        }
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
        None
    }
}

declare_backend!(LoopbackBackend);

#[cfg(test)]
mod tests {
    use super::*;
    use patchbay_core::ChannelValue;

    fn core_with_loopback() -> Core {
        let mut core = Core::new().unwrap();
        core.register_backend(Box::new(LoopbackBackend)).unwrap();
        core
    }

    #[test]
    fn channel_names_resolve_to_stable_idents() {
        let mut core = core_with_loopback();
        core.create_instance("loopback", "lo").unwrap();
        let lo = core.instance_by_name("lo").unwrap();

        let mut backend = LoopbackBackend;
        let fader = backend.parse_channel(&mut core, &lo, "fader").unwrap();
        let knob = backend.parse_channel(&mut core, &lo, "knob").unwrap();
        let again = backend.parse_channel(&mut core, &lo, "fader").unwrap();

        assert_eq!(fader.ident(), 0);
        assert_eq!(knob.ident(), 1);
        assert!(Rc::ptr_eq(&fader, &again));
    }

    #[test]
    fn empty_channel_name_is_rejected() {
        let mut core = core_with_loopback();
        core.create_instance("loopback", "lo").unwrap();
        let lo = core.instance_by_name("lo").unwrap();

        let mut backend = LoopbackBackend;
        assert!(backend.parse_channel(&mut core, &lo, "").is_err());
    }

    #[test]
    fn ffi_exports_create_a_working_backend() {
        unsafe {
            let version = patchbay_backend_version();
            assert!(!version.is_null());
            let version = std::ffi::CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version, patchbay_core::CORE_VERSION);

            let backend = patchbay_backend_create();
            assert!(!backend.is_null());
            assert_eq!((*backend).name(), "loopback");
            patchbay_backend_destroy(backend);
        }
    }

    #[test]
    fn events_are_echoed_one_iteration_later() {
        let mut core = core_with_loopback();
        core.create_instance("loopback", "lo").unwrap();

        // a self-sustaining pair: in -> out is configured, the echo on
        // "out" has nowhere to go and is dropped
        core.map_channels("lo.in", "lo.out").unwrap();
        core.start().unwrap();

        let lo = core.instance_by_name("lo").unwrap();
        let input = core.channel(&lo, 0, false).unwrap();
        core.report_channel_event(&input, ChannelValue::normalized(0.5));

        // delivery and the resulting echo both complete without error
        core.iterate().unwrap();
    }
}
