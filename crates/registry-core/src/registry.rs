//! The backend trait.
//!
//! The protocol engine is a pass-through: attribute values, invocation
//! arguments and results, filters and events are all opaque serialized
//! payloads (`Vec<u8>`) produced and consumed by an external object
//! serialization service. The registry backend therefore speaks bytes.

use std::sync::Arc;

use crate::error::RegistryError;
use crate::object_ref::ObjectRef;

/// Backend-issued handle for one live event subscription.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Callback the backend fires with a serialized event payload.
///
/// May be invoked from any backend thread; implementations must hand the
/// payload off without blocking (the server router enqueues a push frame).
pub type EventSink = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// The management registry the server exposes remotely.
///
/// All methods are synchronous; the server invokes them from worker tasks,
/// never from the channel receive path.
pub trait ManagementRegistry: Send + Sync {
    /// Read one attribute, returning its serialized value.
    fn get_attribute(&self, object: &ObjectRef, attribute: &str) -> Result<Vec<u8>, RegistryError>;

    /// Write one attribute from a serialized value.
    fn set_attribute(
        &self,
        object: &ObjectRef,
        attribute: &str,
        value: &[u8],
    ) -> Result<(), RegistryError>;

    /// Invoke a named method. `signature` disambiguates overloads; the
    /// result is `None` for void methods.
    fn invoke(
        &self,
        object: &ObjectRef,
        method: &str,
        args: &[Vec<u8>],
        signature: &[String],
    ) -> Result<Option<Vec<u8>>, RegistryError>;

    /// List object names matching an opaque filter (`None` = all).
    fn query_names(&self, filter: Option<&[u8]>) -> Result<Vec<String>, RegistryError>;

    /// Register an event sink against one object. Events matching `filter`
    /// are pushed into `sink` until the handle is unsubscribed.
    fn subscribe(
        &self,
        object: &ObjectRef,
        filter: Option<&[u8]>,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, RegistryError>;

    /// Drop a subscription. Unknown handles raise `ListenerNotFound`.
    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), RegistryError>;

    /// Informational hook: the owning client connection went away. Any
    /// subscriptions were already unsubscribed individually.
    fn connection_closed(&self) {}
}
