//! Backend error types and the wire-level error object.
//!
//! A failed remote operation travels as an [`ErrorObject`]: a kind code plus
//! a message. The client re-raises it as the most specific kind declared by
//! the operation it invoked (ordered first-match, see
//! `OperationErrorKind::matches`), and the server sanitizes undeclared kinds
//! to [`OperationErrorKind::Internal`] before they cross the wire.

use thiserror::Error;

/// Errors a `ManagementRegistry` backend can raise.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("no object registered as {0}")]
    InstanceNotFound(String),

    #[error("attribute {0} not found")]
    AttributeNotFound(String),

    #[error("invalid value for attribute {0}")]
    InvalidAttributeValue(String),

    #[error("method {0} not found")]
    MethodNotFound(String),

    #[error("listener {0} not found")]
    ListenerNotFound(i32),

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("internal registry error: {0}")]
    Internal(String),
}

impl RegistryError {
    pub fn kind(&self) -> OperationErrorKind {
        match self {
            RegistryError::InstanceNotFound(_) => OperationErrorKind::InstanceNotFound,
            RegistryError::AttributeNotFound(_) => OperationErrorKind::AttributeNotFound,
            RegistryError::InvalidAttributeValue(_) => OperationErrorKind::InvalidAttributeValue,
            RegistryError::MethodNotFound(_) => OperationErrorKind::MethodNotFound,
            RegistryError::ListenerNotFound(_) => OperationErrorKind::ListenerNotFound,
            RegistryError::OperationFailed(_) => OperationErrorKind::OperationFailed,
            RegistryError::Internal(_) => OperationErrorKind::Internal,
        }
    }
}

/// Kind codes for typed remote failures.
///
/// The codes are part of the wire contract (first byte of a serialized
/// error object); do not renumber.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OperationErrorKind {
    InstanceNotFound = 1,
    AttributeNotFound = 2,
    InvalidAttributeValue = 3,
    MethodNotFound = 4,
    ListenerNotFound = 5,

    /// Generic declared failure; matches any raised kind (catch-all).
    OperationFailed = 6,

    /// Sanitized server-side failure. Never declared by an operation.
    Internal = 7,
}

impl OperationErrorKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(OperationErrorKind::InstanceNotFound),
            2 => Some(OperationErrorKind::AttributeNotFound),
            3 => Some(OperationErrorKind::InvalidAttributeValue),
            4 => Some(OperationErrorKind::MethodNotFound),
            5 => Some(OperationErrorKind::ListenerNotFound),
            6 => Some(OperationErrorKind::OperationFailed),
            7 => Some(OperationErrorKind::Internal),
            _ => None,
        }
    }

    /// Whether a declared kind (`self`) matches a raised kind.
    ///
    /// Exact kinds match only themselves; `OperationFailed` is the broad
    /// fallback and matches everything. Callers walk an operation's declared
    /// kinds in order, narrowest first, and re-raise the first match.
    pub fn matches(self, raised: OperationErrorKind) -> bool {
        self == raised || self == OperationErrorKind::OperationFailed
    }
}

/// The decoded form of a serialized remote error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorObject {
    pub kind: OperationErrorKind,
    pub message: String,
}

impl ErrorObject {
    pub fn new(kind: OperationErrorKind, message: impl Into<String>) -> Self {
        ErrorObject {
            kind,
            message: message.into(),
        }
    }

    /// Build the wire-safe form of a backend error, keeping only kinds the
    /// operation declares. Anything else becomes a generic internal error so
    /// unrelated server state never leaks to a remote peer.
    pub fn sanitized(err: &RegistryError, declared: &[OperationErrorKind]) -> Self {
        let raised = err.kind();
        if declared.iter().any(|k| *k == raised) {
            ErrorObject::new(raised, err.to_string())
        } else {
            ErrorObject::new(OperationErrorKind::Internal, "internal server error")
        }
    }

    /// Find the most specific declared kind matching this error.
    ///
    /// `declared` is ordered narrowest-first; the first kind whose
    /// `matches` accepts the raised kind wins. `None` means the caller
    /// should fall back to a generic wrapped failure.
    pub fn resolve(&self, declared: &[OperationErrorKind]) -> Option<OperationErrorKind> {
        declared.iter().copied().find(|k| k.matches(self.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowest_declared_kind_wins() {
        let err = ErrorObject::new(OperationErrorKind::AttributeNotFound, "no such attribute");
        let declared = [
            OperationErrorKind::InstanceNotFound,
            OperationErrorKind::AttributeNotFound,
            OperationErrorKind::OperationFailed,
        ];
        assert_eq!(
            err.resolve(&declared),
            Some(OperationErrorKind::AttributeNotFound)
        );
    }

    #[test]
    fn generic_fallback_matches_undeclared_kinds() {
        let err = ErrorObject::new(OperationErrorKind::MethodNotFound, "nope");
        let declared = [
            OperationErrorKind::InstanceNotFound,
            OperationErrorKind::OperationFailed,
        ];
        assert_eq!(
            err.resolve(&declared),
            Some(OperationErrorKind::OperationFailed)
        );
    }

    #[test]
    fn no_declared_match_yields_none() {
        let err = ErrorObject::new(OperationErrorKind::MethodNotFound, "nope");
        let declared = [OperationErrorKind::InstanceNotFound];
        assert_eq!(err.resolve(&declared), None);
    }

    #[test]
    fn undeclared_backend_error_is_sanitized() {
        let err = RegistryError::Internal("lock poisoned at order 7".into());
        let declared = [OperationErrorKind::InstanceNotFound];
        let obj = ErrorObject::sanitized(&err, &declared);
        assert_eq!(obj.kind, OperationErrorKind::Internal);
        assert!(!obj.message.contains("order 7"));
    }

    #[test]
    fn declared_backend_error_keeps_its_message() {
        let err = RegistryError::InstanceNotFound("a:b=c".into());
        let declared = [OperationErrorKind::InstanceNotFound];
        let obj = ErrorObject::sanitized(&err, &declared);
        assert_eq!(obj.kind, OperationErrorKind::InstanceNotFound);
        assert!(obj.message.contains("a:b=c"));
    }
}
