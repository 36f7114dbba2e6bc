//! Identity registries: the backend, instance and channel tables
//!
//! Instances and channels are handed out as `Rc` handles. The registry (and
//! through it the core) owns them for the lifetime of the process; backends
//! attach their own state through the opaque payload slots and must never
//! assume anything about the handles beyond identity.

use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use crate::backend::Backend;
use crate::error::RegistryError;

/// Key uniquely identifying a channel: core-internal instance id plus the
/// backend-assigned 64-bit channel ident.
pub(crate) type ChannelKey = (u64, u64);

/// A configured activation of a backend.
///
/// Created by the core during configuration, released exactly once at
/// shutdown. The `ident` is optional and backend-assigned (typically during
/// `start`); [`Registry::find_instance`] only works for backends that set
/// it.
pub struct Instance {
    id: u64,
    backend: usize,
    name: String,
    ident: Cell<Option<u64>>,
    payload: RefCell<Option<Box<dyn Any>>>,
    channels: RefCell<Vec<Rc<Channel>>>,
}

impl Instance {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backend-assigned instance identifier, if one was set.
    pub fn ident(&self) -> Option<u64> {
        self.ident.get()
    }

    /// Assign the backend-specific instance identifier.
    pub fn set_ident(&self, ident: u64) {
        self.ident.set(Some(ident));
    }

    /// Replace the backend-opaque payload.
    pub fn set_payload(&self, payload: Box<dyn Any>) {
        *self.payload.borrow_mut() = Some(payload);
    }

    /// Borrow the payload downcast to the backend's type.
    pub fn payload<T: Any>(&self) -> Option<Ref<'_, T>> {
        Ref::filter_map(self.payload.borrow(), |slot| {
            slot.as_ref().and_then(|p| p.downcast_ref::<T>())
        })
        .ok()
    }

    /// Mutably borrow the payload downcast to the backend's type.
    pub fn payload_mut<T: Any>(&self) -> Option<RefMut<'_, T>> {
        RefMut::filter_map(self.payload.borrow_mut(), |slot| {
            slot.as_mut().and_then(|p| p.downcast_mut::<T>())
        })
        .ok()
    }

    /// Number of channels registered on this instance.
    pub fn channel_count(&self) -> usize {
        self.channels.borrow().len()
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn backend_index(&self) -> usize {
        self.backend
    }

    /// Drain the channel list, breaking the instance/channel `Rc` cycle
    /// during teardown.
    pub(crate) fn take_channels(&self) -> Vec<Rc<Channel>> {
        std::mem::take(&mut self.channels.borrow_mut())
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.name)
            .field("ident", &self.ident.get())
            .field("channels", &self.channels.borrow().len())
            .finish()
    }
}

/// An addressable value endpoint within an instance.
///
/// `(instance, ident)` uniquely identifies a channel; lookups through
/// [`Registry::channel`] are idempotent and return the same `Rc` for the
/// same key.
pub struct Channel {
    instance: Rc<Instance>,
    ident: u64,
    payload: RefCell<Option<Box<dyn Any>>>,
}

impl Channel {
    pub fn instance(&self) -> &Rc<Instance> {
        &self.instance
    }

    pub fn ident(&self) -> u64 {
        self.ident
    }

    pub fn set_payload(&self, payload: Box<dyn Any>) {
        *self.payload.borrow_mut() = Some(payload);
    }

    pub fn payload<T: Any>(&self) -> Option<Ref<'_, T>> {
        Ref::filter_map(self.payload.borrow(), |slot| {
            slot.as_ref().and_then(|p| p.downcast_ref::<T>())
        })
        .ok()
    }

    pub fn payload_mut<T: Any>(&self) -> Option<RefMut<'_, T>> {
        RefMut::filter_map(self.payload.borrow_mut(), |slot| {
            slot.as_mut().and_then(|p| p.downcast_mut::<T>())
        })
        .ok()
    }

    pub(crate) fn has_payload(&self) -> bool {
        self.payload.borrow().is_some()
    }

    pub(crate) fn key(&self) -> ChannelKey {
        (self.instance.id, self.ident)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.instance.name, self.ident)
    }
}

pub(crate) struct BackendEntry {
    pub name: String,
    pub handle: Rc<RefCell<Box<dyn Backend>>>,
    pub started: bool,
}

/// Owns the backend, instance and channel tables.
#[derive(Default)]
pub struct Registry {
    backends: Vec<BackendEntry>,
    instances: Vec<Rc<Instance>>,
    next_instance_id: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under the name it reports. Names are unique.
    pub fn register_backend(&mut self, backend: Box<dyn Backend>) -> Result<(), RegistryError> {
        let name = backend.name().to_string();
        if self.backend_index(&name).is_some() {
            return Err(RegistryError::DuplicateBackend(name));
        }
        self.backends.push(BackendEntry {
            name,
            handle: Rc::new(RefCell::new(backend)),
            started: false,
        });
        Ok(())
    }

    pub fn backend_index(&self, name: &str) -> Option<usize> {
        self.backends.iter().position(|entry| entry.name == name)
    }

    pub(crate) fn backend_handle(&self, index: usize) -> Rc<RefCell<Box<dyn Backend>>> {
        Rc::clone(&self.backends[index].handle)
    }

    pub(crate) fn backend_name(&self, index: usize) -> &str {
        &self.backends[index].name
    }

    pub(crate) fn backend_count(&self) -> usize {
        self.backends.len()
    }

    pub(crate) fn is_started(&self, index: usize) -> bool {
        self.backends[index].started
    }

    pub(crate) fn mark_started(&mut self, index: usize) {
        self.backends[index].started = true;
    }

    /// Allocate a zero-valued, core-owned instance under the named backend.
    pub fn create_instance(
        &mut self,
        backend: &str,
        name: &str,
    ) -> Result<Rc<Instance>, RegistryError> {
        let index = self
            .backend_index(backend)
            .ok_or_else(|| RegistryError::UnknownBackend(backend.to_string()))?;
        if self.instances.iter().any(|inst| inst.name == name) {
            return Err(RegistryError::DuplicateInstance(name.to_string()));
        }
        let instance = Rc::new(Instance {
            id: self.next_instance_id,
            backend: index,
            name: name.to_string(),
            ident: Cell::new(None),
            payload: RefCell::new(None),
            channels: RefCell::new(Vec::new()),
        });
        self.next_instance_id += 1;
        self.instances.push(Rc::clone(&instance));
        Ok(instance)
    }

    /// Find an instance by backend name and backend-assigned ident.
    ///
    /// Assigning an ident is optional and backend-specific; instances that
    /// never had one set are not found this way.
    pub fn find_instance(&self, backend: &str, ident: u64) -> Option<Rc<Instance>> {
        let index = self.backend_index(backend)?;
        self.instances
            .iter()
            .find(|inst| inst.backend == index && inst.ident() == Some(ident))
            .cloned()
    }

    /// Find an instance by its configured name.
    pub fn instance_by_name(&self, name: &str) -> Option<Rc<Instance>> {
        self.instances.iter().find(|inst| inst.name == name).cloned()
    }

    /// All instances configured for one backend.
    pub fn query_instances(&self, backend: &str) -> Vec<Rc<Instance>> {
        match self.backend_index(backend) {
            Some(index) => self
                .instances
                .iter()
                .filter(|inst| inst.backend == index)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn instances(&self) -> &[Rc<Instance>] {
        &self.instances
    }

    /// The single canonical identity-resolution point for channels.
    ///
    /// If a channel with `ident` exists on `instance` it is returned; a
    /// second call with the same key always returns the same `Rc`. With
    /// `create == false` a missing channel fails with
    /// [`RegistryError::ChannelNotFound`] and allocates nothing.
    pub fn channel(
        &self,
        instance: &Rc<Instance>,
        ident: u64,
        create: bool,
    ) -> Result<Rc<Channel>, RegistryError> {
        let mut channels = instance.channels.borrow_mut();
        if let Some(existing) = channels.iter().find(|ch| ch.ident == ident) {
            return Ok(Rc::clone(existing));
        }
        if !create {
            return Err(RegistryError::ChannelNotFound {
                instance: instance.name.clone(),
                ident,
            });
        }
        let channel = Rc::new(Channel {
            instance: Rc::clone(instance),
            ident,
            payload: RefCell::new(None),
        });
        channels.push(Rc::clone(&channel));
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::NullBackend;

    fn registry_with_backend(name: &'static str) -> Registry {
        let mut registry = Registry::new();
        registry
            .register_backend(Box::new(NullBackend::named(name)))
            .unwrap();
        registry
    }

    #[test]
    fn duplicate_backend_name_is_rejected() {
        let mut registry = registry_with_backend("midi");
        let err = registry
            .register_backend(Box::new(NullBackend::named("midi")))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateBackend(name) if name == "midi"));
    }

    #[test]
    fn duplicate_instance_name_is_rejected() {
        let mut registry = registry_with_backend("midi");
        registry.create_instance("midi", "deck").unwrap();
        let err = registry.create_instance("midi", "deck").unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateInstance(name) if name == "deck"));
    }

    #[test]
    fn find_instance_requires_backend_assigned_ident() {
        let mut registry = registry_with_backend("midi");
        let instance = registry.create_instance("midi", "deck").unwrap();
        assert!(registry.find_instance("midi", 7).is_none());

        instance.set_ident(7);
        let found = registry.find_instance("midi", 7).unwrap();
        assert!(Rc::ptr_eq(&found, &instance));
        assert!(registry.find_instance("midi", 8).is_none());
        assert!(registry.find_instance("osc", 7).is_none());
    }

    #[test]
    fn channel_lookup_is_pointer_idempotent() {
        let mut registry = registry_with_backend("midi");
        let instance = registry.create_instance("midi", "deck").unwrap();

        let first = registry.channel(&instance, 42, true).unwrap();
        let second = registry.channel(&instance, 42, true).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(instance.channel_count(), 1);
    }

    #[test]
    fn channel_lookup_without_create_allocates_nothing() {
        let mut registry = registry_with_backend("midi");
        let instance = registry.create_instance("midi", "deck").unwrap();

        let err = registry.channel(&instance, 9, false).unwrap_err();
        assert!(matches!(err, RegistryError::ChannelNotFound { ident: 9, .. }));
        assert_eq!(instance.channel_count(), 0);
    }

    #[test]
    fn query_instances_filters_by_backend() {
        let mut registry = registry_with_backend("midi");
        registry
            .register_backend(Box::new(NullBackend::named("osc")))
            .unwrap();
        registry.create_instance("midi", "a").unwrap();
        registry.create_instance("osc", "b").unwrap();
        registry.create_instance("midi", "c").unwrap();

        let names: Vec<_> = registry
            .query_instances("midi")
            .iter()
            .map(|inst| inst.name().to_string())
            .collect();
        assert_eq!(names, ["a", "c"]);
        assert!(registry.query_instances("lua").is_empty());
    }

    #[test]
    fn instance_payload_roundtrip() {
        let mut registry = registry_with_backend("midi");
        let instance = registry.create_instance("midi", "deck").unwrap();

        instance.set_payload(Box::new(vec![1u8, 2, 3]));
        instance.payload_mut::<Vec<u8>>().unwrap().push(4);
        assert_eq!(instance.payload::<Vec<u8>>().unwrap().as_slice(), &[1, 2, 3, 4]);
        assert!(instance.payload::<String>().is_none());
    }
}
