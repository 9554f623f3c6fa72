//! Client-side subscription table.
//!
//! Subscription ids use the same numbering scheme as correlation ids
//! (positive, wrap to 1, skip ids in use) but live in their own namespace.
//! Lookups happen on the notification hot path in the receive loop, so the
//! entries live in a `DashMap`; only the id counter takes a mutex.

use std::sync::Arc;
use std::sync::Mutex;

use dashmap::DashMap;
use registry_core::{Notification, ObjectRef};

/// Local callback invoked with each delivered event.
///
/// Runs on the channel receive loop, so implementations must hand the
/// event off (e.g. onto a channel) without blocking.
pub type NotificationListener = Arc<dyn Fn(Notification) + Send + Sync>;

/// One local notification registration.
#[derive(Clone)]
pub struct Subscription {
    pub object: ObjectRef,
    pub filter: Option<Vec<u8>>,
    pub listener: NotificationListener,
}

pub(crate) struct SubscriptionTable {
    next_id: Mutex<i32>,
    entries: DashMap<i32, Subscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        SubscriptionTable {
            next_id: Mutex::new(1),
            entries: DashMap::new(),
        }
    }

    /// Allocate a fresh id and store the subscription under it.
    pub fn insert(&self, subscription: Subscription) -> i32 {
        let mut next = self.next_id.lock().unwrap();
        loop {
            let id = *next;
            *next = if id == i32::MAX { 1 } else { id + 1 };
            if self.entries.contains_key(&id) {
                continue;
            }
            self.entries.insert(id, subscription);
            return id;
        }
    }

    pub fn remove(&self, id: i32) -> Option<Subscription> {
        self.entries.remove(&id).map(|(_, sub)| sub)
    }

    pub fn get(&self, id: i32) -> Option<Subscription> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy() -> Subscription {
        Subscription {
            object: ObjectRef::new("a:type=X").unwrap(),
            filter: None,
            listener: Arc::new(|_| {}),
        }
    }

    #[test]
    fn ids_are_unique_and_positive() {
        let table = SubscriptionTable::new();
        let a = table.insert(dummy());
        let b = table.insert(dummy());
        assert!(a > 0 && b > 0);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let table = SubscriptionTable::new();
        let id = table.insert(dummy());
        assert!(table.remove(id).is_some());
        assert!(table.remove(id).is_none());
        assert!(table.get(id).is_none());
    }
}
