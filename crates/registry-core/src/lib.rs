//! registry-core
//!
//! Pure domain types for the remote management registry:
//! - object references
//! - the `ManagementRegistry` backend trait
//! - operation error kinds and the serialized error object
//! - notification/event types
//! - an in-memory reference backend (used by the server binary and tests)

pub mod error;
pub mod mem_registry;
pub mod notification;
pub mod object_ref;
pub mod registry;

pub use error::{ErrorObject, OperationErrorKind, RegistryError};
pub use mem_registry::InMemoryRegistry;
pub use notification::Notification;
pub use object_ref::ObjectRef;
pub use registry::{EventSink, ManagementRegistry, SubscriptionHandle};
