//! Server-side notification routing.
//!
//! For each client subscription id, the bridge registers a proxy sink
//! against the backend. When the backend fires an event, the sink encodes
//! a push frame (correlation id 0) and enqueues it on the outbound channel;
//! the per-connection writer task does the actual I/O, so backend callback
//! threads never touch the stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use registry_core::{EventSink, ManagementRegistry, ObjectRef, RegistryError, SubscriptionHandle};
use registry_protocol::encode_push;
use tracing::{debug, warn};

use crate::types::OutboundTx;

pub struct NotificationBridge {
    registry: Arc<dyn ManagementRegistry>,
    outbound: OutboundTx,
    entries: Mutex<HashMap<i32, SubscriptionHandle>>,
}

impl NotificationBridge {
    pub fn new(registry: Arc<dyn ManagementRegistry>, outbound: OutboundTx) -> Self {
        NotificationBridge {
            registry,
            outbound,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a backend subscription under the client's id. The handback
    /// is stored server-side and echoed verbatim in every push frame.
    pub fn add(
        &self,
        object: &ObjectRef,
        subscription_id: i32,
        filter: Option<&[u8]>,
        handback: Vec<u8>,
    ) -> Result<(), RegistryError> {
        if subscription_id == 0 {
            return Err(RegistryError::OperationFailed(
                "subscription id 0 is reserved".into(),
            ));
        }
        if self
            .entries
            .lock()
            .unwrap()
            .contains_key(&subscription_id)
        {
            return Err(RegistryError::OperationFailed(format!(
                "subscription id {} already registered",
                subscription_id
            )));
        }

        let outbound = self.outbound.clone();
        let sink: EventSink = Arc::new(move |event: Vec<u8>| {
            let mut body = Vec::with_capacity(16 + event.len() + handback.len());
            match encode_push(subscription_id, &event, &handback, &mut body) {
                Ok(()) => {
                    // Enqueue only; the writer task owns the stream.
                    let _ = outbound.send(body);
                }
                Err(e) => warn!(subscription_id, error = %e, "dropping unencodable event"),
            }
        });

        let handle = self.registry.subscribe(object, filter, sink)?;
        self.entries
            .lock()
            .unwrap()
            .insert(subscription_id, handle);
        Ok(())
    }

    /// Drop one subscription. Removal is idempotent: an unknown id logs
    /// and succeeds (the client may have raced an in-flight event).
    pub fn remove(&self, subscription_id: i32) -> Result<(), RegistryError> {
        let handle = self.entries.lock().unwrap().remove(&subscription_id);
        match handle {
            Some(handle) => {
                if let Err(e) = self.registry.unsubscribe(handle) {
                    warn!(subscription_id, error = %e, "backend unsubscribe failed");
                }
                Ok(())
            }
            None => {
                debug!(subscription_id, "remove for unknown subscription id");
                Ok(())
            }
        }
    }

    /// Channel teardown: unregister everything from the backend so no live
    /// subscription leaks past the connection.
    pub fn remove_all(&self) {
        let drained: Vec<(i32, SubscriptionHandle)> =
            self.entries.lock().unwrap().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "unregistering all subscriptions");
        }
        for (subscription_id, handle) in drained {
            if let Err(e) = self.registry.unsubscribe(handle) {
                warn!(subscription_id, error = %e, "backend unsubscribe failed");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use registry_core::InMemoryRegistry;
    use registry_protocol::{decode_frame, MessageType, Param, WireMessage};
    use tokio::sync::mpsc;

    use super::*;

    fn setup() -> (Arc<InMemoryRegistry>, NotificationBridge, crate::types::OutboundRx) {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.register_object("a:type=X");
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = NotificationBridge::new(registry.clone(), tx);
        (registry, bridge, rx)
    }

    #[test]
    fn backend_event_becomes_a_push_frame() {
        let (registry, bridge, mut rx) = setup();
        let object = ObjectRef::new("a:type=X").unwrap();
        bridge.add(&object, 5, None, b"hb".to_vec()).unwrap();

        registry.emit("a:type=X", b"evt".to_vec());

        let body = rx.try_recv().expect("push frame enqueued");
        match decode_frame(&body).unwrap() {
            WireMessage::Request(frame) => {
                assert_eq!(frame.msg_type, MessageType::Notification);
                assert_eq!(frame.correlation_id, 0);
                assert_eq!(frame.params[0], Param::Integer(5));
                assert_eq!(frame.params[1], Param::Event(b"evt".to_vec()));
                assert_eq!(frame.params[2], Param::Object(b"hb".to_vec()));
            }
            other => panic!("expected push frame, got {:?}", other),
        }
    }

    #[test]
    fn remove_is_idempotent_and_remove_all_clears_backend() {
        let (registry, bridge, _rx) = setup();
        let object = ObjectRef::new("a:type=X").unwrap();
        bridge.add(&object, 1, None, vec![]).unwrap();
        bridge.add(&object, 2, None, vec![]).unwrap();
        assert_eq!(registry.subscription_count(), 2);

        bridge.remove(1).unwrap();
        bridge.remove(1).unwrap(); // unknown now, still Ok
        assert_eq!(registry.subscription_count(), 1);

        bridge.remove_all();
        assert_eq!(registry.subscription_count(), 0);
        assert!(bridge.is_empty());
    }

    #[test]
    fn duplicate_and_zero_ids_are_rejected() {
        let (_registry, bridge, _rx) = setup();
        let object = ObjectRef::new("a:type=X").unwrap();
        assert!(bridge.add(&object, 0, None, vec![]).is_err());
        bridge.add(&object, 3, None, vec![]).unwrap();
        assert!(bridge.add(&object, 3, None, vec![]).is_err());
    }
}
