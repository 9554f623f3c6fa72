//! Steady-state operation handlers.
//!
//! Dispatch is a function table: message type byte → handler fn, built
//! once per session and read-only afterwards. Every handler parses its
//! parameters, calls through to the backend and returns an optional result
//! parameter; the session layer turns errors into failure responses.

use std::sync::Arc;

use futures::future::BoxFuture;
use registry_core::{ObjectRef, RegistryError};
use registry_protocol::{Frame, MessageType, Param};

use crate::types::SessionCtx;

pub(crate) type HandlerResult = Result<Option<Param>, RegistryError>;
pub(crate) type Handler = fn(Arc<SessionCtx>, Frame) -> BoxFuture<'static, HandlerResult>;

const SLOT_COUNT: usize = 16;

/// Immutable message-type → handler table.
pub(crate) struct HandlerRegistry {
    slots: [Option<Handler>; SLOT_COUNT],
}

impl HandlerRegistry {
    pub fn new() -> Self {
        let mut slots: [Option<Handler>; SLOT_COUNT] = [None; SLOT_COUNT];
        slots[MessageType::GetAttribute as usize] = Some(get_attribute as Handler);
        slots[MessageType::SetAttribute as usize] = Some(set_attribute as Handler);
        slots[MessageType::Invoke as usize] = Some(invoke as Handler);
        slots[MessageType::QueryNames as usize] = Some(query_names as Handler);
        slots[MessageType::AddListener as usize] = Some(add_listener as Handler);
        slots[MessageType::RemoveListener as usize] = Some(remove_listener as Handler);
        HandlerRegistry { slots }
    }

    pub fn lookup(&self, msg_type: MessageType) -> Option<Handler> {
        self.slots.get(msg_type as usize).copied().flatten()
    }
}

fn bad_params(op: &str) -> RegistryError {
    RegistryError::OperationFailed(format!("malformed {} parameters", op))
}

/// Zero-length opaque payloads mean "absent" for optional filter/handback
/// parameters.
fn optional_blob(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.is_empty() {
        None
    } else {
        Some(bytes)
    }
}

fn get_attribute(ctx: Arc<SessionCtx>, frame: Frame) -> BoxFuture<'static, HandlerResult> {
    Box::pin(async move {
        let (object, attribute) = match frame.params.as_slice() {
            [Param::String(object), Param::String(attribute)] => {
                (ObjectRef::new(object.clone())?, attribute.clone())
            }
            _ => return Err(bad_params("get-attribute")),
        };
        let value = ctx.registry.get_attribute(&object, &attribute)?;
        Ok(Some(Param::Object(value)))
    })
}

fn set_attribute(ctx: Arc<SessionCtx>, frame: Frame) -> BoxFuture<'static, HandlerResult> {
    Box::pin(async move {
        let (object, attribute, value) = match frame.params.as_slice() {
            [Param::String(object), Param::String(attribute), Param::Object(value)] => (
                ObjectRef::new(object.clone())?,
                attribute.clone(),
                value.clone(),
            ),
            _ => return Err(bad_params("set-attribute")),
        };
        ctx.registry.set_attribute(&object, &attribute, &value)?;
        Ok(None)
    })
}

fn invoke(ctx: Arc<SessionCtx>, frame: Frame) -> BoxFuture<'static, HandlerResult> {
    Box::pin(async move {
        let mut params = frame.params.into_iter();
        let (object, method, signature) = match (params.next(), params.next(), params.next()) {
            (
                Some(Param::String(object)),
                Some(Param::String(method)),
                Some(Param::StringArray(signature)),
            ) => (ObjectRef::new(object)?, method, signature),
            _ => return Err(bad_params("invoke")),
        };
        let mut args = Vec::new();
        for param in params {
            match param {
                Param::Object(bytes) => args.push(bytes),
                _ => return Err(bad_params("invoke")),
            }
        }
        let result = ctx.registry.invoke(&object, &method, &args, &signature)?;
        Ok(result.map(Param::Object))
    })
}

fn query_names(ctx: Arc<SessionCtx>, frame: Frame) -> BoxFuture<'static, HandlerResult> {
    Box::pin(async move {
        let filter = match frame.params.as_slice() {
            [Param::Object(filter)] => optional_blob(filter).map(<[u8]>::to_vec),
            _ => return Err(bad_params("query-names")),
        };
        let names = ctx.registry.query_names(filter.as_deref())?;
        Ok(Some(Param::StringArray(names)))
    })
}

fn add_listener(ctx: Arc<SessionCtx>, frame: Frame) -> BoxFuture<'static, HandlerResult> {
    Box::pin(async move {
        let (object, subscription_id, filter, handback) = match frame.params.as_slice() {
            [Param::String(object), Param::Integer(id), Param::Object(filter), Param::Object(handback)] => {
                (
                    ObjectRef::new(object.clone())?,
                    *id,
                    optional_blob(filter).map(<[u8]>::to_vec),
                    handback.clone(),
                )
            }
            _ => return Err(bad_params("add-listener")),
        };
        ctx.notifications
            .add(&object, subscription_id, filter.as_deref(), handback)?;
        Ok(None)
    })
}

fn remove_listener(ctx: Arc<SessionCtx>, frame: Frame) -> BoxFuture<'static, HandlerResult> {
    Box::pin(async move {
        let subscription_id = match frame.params.as_slice() {
            [Param::Integer(id)] => *id,
            _ => return Err(bad_params("remove-listener")),
        };
        ctx.notifications.remove(subscription_id)?;
        Ok(None)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_exactly_the_steady_state_operations() {
        let registry = HandlerRegistry::new();
        for t in [
            MessageType::GetAttribute,
            MessageType::SetAttribute,
            MessageType::Invoke,
            MessageType::QueryNames,
            MessageType::AddListener,
            MessageType::RemoveListener,
        ] {
            assert!(registry.lookup(t).is_some(), "{:?} has no handler", t);
        }
        for t in [
            MessageType::Begin,
            MessageType::Parameters,
            MessageType::Notification,
            MessageType::Terminate,
        ] {
            assert!(registry.lookup(t).is_none(), "{:?} should not dispatch", t);
        }
    }
}
