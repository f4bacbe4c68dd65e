use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::codec::{Value, ValueType};

/// Section/key pair a collaborator declares an entry under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigDefinition {
    pub section: String,
    pub key: String,
    #[serde(default)]
    pub description: String,
    /// Unsynchronized entries are never broadcast.
    #[serde(default = "default_synchronized")]
    pub synchronized: bool,
}

fn default_synchronized() -> bool {
    true
}

impl ConfigDefinition {
    pub fn new(section: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            key: key.into(),
            description: String::new(),
            synchronized: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn local_only(mut self) -> Self {
        self.synchronized = false;
        self
    }
}

impl fmt::Display for ConfigDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section, self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CustomId(pub(crate) usize);

impl EntryId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl CustomId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub(crate) definition: ConfigDefinition,
    pub(crate) value_type: ValueType,
    pub(crate) value: Value,
    pub(crate) default: Value,
    /// The node's own value, held aside while a server override is live.
    pub(crate) local_base_value: Option<Value>,
    pub(crate) read_only: bool,
}

impl ConfigEntry {
    pub fn definition(&self) -> &ConfigDefinition {
        &self.definition
    }

    pub fn section(&self) -> &str {
        &self.definition.section
    }

    pub fn key(&self) -> &str {
        &self.definition.key
    }

    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub fn local_base_value(&self) -> Option<&Value> {
        self.local_base_value.as_ref()
    }

    pub fn is_synchronized(&self) -> bool {
        self.definition.synchronized
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Value that belongs in durable storage: the node's own value, never a
    /// server override.
    pub fn persisted_value(&self) -> &Value {
        self.local_base_value.as_ref().unwrap_or(&self.value)
    }
}

#[derive(Debug, Clone)]
pub struct CustomSyncedValue {
    pub(crate) identifier: String,
    pub(crate) value_type: ValueType,
    pub(crate) value: Value,
    pub(crate) local_base_value: Option<Value>,
    pub(crate) priority: i32,
}

impl CustomSyncedValue {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn local_base_value(&self) -> Option<&Value> {
        self.local_base_value.as_ref()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

/// Typed view of a registered entry.
pub struct EntryHandle<T> {
    id: EntryId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> EntryHandle<T> {
    pub(crate) fn new(id: EntryId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }
}

impl<T> Clone for EntryHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EntryHandle<T> {}

impl<T> fmt::Debug for EntryHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntryHandle").field(&self.id).finish()
    }
}

/// Typed view of a registered custom value.
pub struct CustomHandle<T> {
    id: CustomId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CustomHandle<T> {
    pub(crate) fn new(id: CustomId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> CustomId {
        self.id
    }
}

impl<T> Clone for CustomHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CustomHandle<T> {}

impl<T> fmt::Debug for CustomHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CustomHandle").field(&self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_defaults_to_synchronized() {
        let definition: ConfigDefinition =
            serde_json::from_str(r#"{"section":"General","key":"VerboseLogging"}"#).unwrap();
        assert!(definition.synchronized);
        assert!(definition.description.is_empty());
        assert_eq!(definition.to_string(), "General.VerboseLogging");

        let local = ConfigDefinition::new("General", "VerboseLogging").local_only();
        let json = serde_json::to_string(&local).unwrap();
        let back: ConfigDefinition = serde_json::from_str(&json).unwrap();
        assert!(!back.synchronized);
    }

    #[test]
    fn test_values_serialize_with_their_type() {
        let json = serde_json::to_string(&Value::F32(12.5)).unwrap();
        assert_eq!(json, r#"{"F32":12.5}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::F32(12.5));
    }
}
