//! In-memory reference backend.
//!
//! Stores attributes and method closures per object name and fans emitted
//! events out to live subscribers. The server binary runs against this, and
//! the integration tests use it as the far end of the protocol.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::RegistryError;
use crate::object_ref::ObjectRef;
use crate::registry::{EventSink, ManagementRegistry, SubscriptionHandle};

type MethodFn =
    std::sync::Arc<dyn Fn(&[Vec<u8>]) -> Result<Option<Vec<u8>>, RegistryError> + Send + Sync>;

#[derive(Default)]
struct ObjectState {
    attributes: HashMap<String, Vec<u8>>,
    methods: HashMap<String, MethodFn>,
}

struct SubEntry {
    object: String,
    sink: EventSink,
}

#[derive(Default)]
struct State {
    objects: HashMap<String, ObjectState>,
    next_handle: u64,
    subscriptions: HashMap<u64, SubEntry>,
}

/// A registry held entirely in process memory.
#[derive(Default)]
pub struct InMemoryRegistry {
    state: Mutex<State>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an (initially empty) object under `name`.
    pub fn register_object(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.objects.entry(name.to_string()).or_default();
    }

    /// Attach a method closure to an object, creating the object if needed.
    pub fn register_method<F>(&self, object: &str, method: &str, f: F)
    where
        F: Fn(&[Vec<u8>]) -> Result<Option<Vec<u8>>, RegistryError> + Send + Sync + 'static,
    {
        let mut state = self.state.lock().unwrap();
        state
            .objects
            .entry(object.to_string())
            .or_default()
            .methods
            .insert(method.to_string(), std::sync::Arc::new(f));
    }

    /// Seed an attribute value directly (bypassing the wire path).
    pub fn put_attribute(&self, object: &str, attribute: &str, value: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state
            .objects
            .entry(object.to_string())
            .or_default()
            .attributes
            .insert(attribute.to_string(), value);
    }

    /// Fire one event on an object, delivering to every live subscriber.
    ///
    /// Sinks run on the caller's thread, in subscription order.
    pub fn emit(&self, object: &str, event: Vec<u8>) {
        let sinks: Vec<EventSink> = {
            let state = self.state.lock().unwrap();
            state
                .subscriptions
                .values()
                .filter(|s| s.object == object)
                .map(|s| s.sink.clone())
                .collect()
        };
        for sink in sinks {
            sink(event.clone());
        }
    }

    /// Number of live subscriptions (test observability).
    pub fn subscription_count(&self) -> usize {
        self.state.lock().unwrap().subscriptions.len()
    }
}

impl ManagementRegistry for InMemoryRegistry {
    fn get_attribute(&self, object: &ObjectRef, attribute: &str) -> Result<Vec<u8>, RegistryError> {
        let state = self.state.lock().unwrap();
        let obj = state
            .objects
            .get(object.as_str())
            .ok_or_else(|| RegistryError::InstanceNotFound(object.to_string()))?;
        obj.attributes
            .get(attribute)
            .cloned()
            .ok_or_else(|| RegistryError::AttributeNotFound(attribute.to_string()))
    }

    fn set_attribute(
        &self,
        object: &ObjectRef,
        attribute: &str,
        value: &[u8],
    ) -> Result<(), RegistryError> {
        if value.is_empty() {
            return Err(RegistryError::InvalidAttributeValue(attribute.to_string()));
        }
        let mut state = self.state.lock().unwrap();
        let obj = state
            .objects
            .get_mut(object.as_str())
            .ok_or_else(|| RegistryError::InstanceNotFound(object.to_string()))?;
        obj.attributes
            .insert(attribute.to_string(), value.to_vec());
        Ok(())
    }

    fn invoke(
        &self,
        object: &ObjectRef,
        method: &str,
        args: &[Vec<u8>],
        _signature: &[String],
    ) -> Result<Option<Vec<u8>>, RegistryError> {
        let f = {
            let state = self.state.lock().unwrap();
            let obj = state
                .objects
                .get(object.as_str())
                .ok_or_else(|| RegistryError::InstanceNotFound(object.to_string()))?;
            obj.methods
                .get(method)
                .cloned()
                .ok_or_else(|| RegistryError::MethodNotFound(method.to_string()))?
        };
        // Run outside the lock; methods may be slow or re-enter `emit`.
        f(args)
    }

    fn query_names(&self, filter: Option<&[u8]>) -> Result<Vec<String>, RegistryError> {
        let pattern = match filter {
            None => None,
            Some(bytes) => Some(
                std::str::from_utf8(bytes)
                    .map_err(|_| RegistryError::OperationFailed("non-utf8 query filter".into()))?
                    .to_string(),
            ),
        };
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .objects
            .keys()
            .filter(|name| match pattern.as_deref() {
                None | Some("*") => true,
                Some(p) => match p.strip_suffix('*') {
                    Some(prefix) => name.starts_with(prefix),
                    None => name.as_str() == p,
                },
            })
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    fn subscribe(
        &self,
        object: &ObjectRef,
        _filter: Option<&[u8]>,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, RegistryError> {
        let mut state = self.state.lock().unwrap();
        if !state.objects.contains_key(object.as_str()) {
            return Err(RegistryError::InstanceNotFound(object.to_string()));
        }
        state.next_handle += 1;
        let handle = state.next_handle;
        state.subscriptions.insert(
            handle,
            SubEntry {
                object: object.to_string(),
                sink,
            },
        );
        Ok(SubscriptionHandle(handle))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), RegistryError> {
        let mut state = self.state.lock().unwrap();
        state
            .subscriptions
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(RegistryError::ListenerNotFound(handle.0 as i32))
    }
}
