//! Object references.
//!
//! An `ObjectRef` names one object in the management registry, e.g.
//! `com.example:type=Cache,name=sessions`. The engine treats the name as
//! an opaque non-empty string; interpretation belongs to the backend.

use std::fmt;

use crate::error::RegistryError;

/// Maximum object name length accepted on either end.
pub const MAX_OBJECT_NAME_LEN: usize = 512;

/// Reference to one registered management object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef(String);

impl ObjectRef {
    /// Build a reference, rejecting empty or oversized names.
    pub fn new(name: impl Into<String>) -> Result<Self, RegistryError> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_OBJECT_NAME_LEN {
            return Err(RegistryError::OperationFailed(format!(
                "invalid object name (len {})",
                name.len()
            )));
        }
        Ok(ObjectRef(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_oversized_names() {
        assert!(ObjectRef::new("").is_err());
        assert!(ObjectRef::new("a".repeat(MAX_OBJECT_NAME_LEN + 1)).is_err());
        assert!(ObjectRef::new("com.example:type=Cache").is_ok());
    }
}
