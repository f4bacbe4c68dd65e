mod entry;
mod store;

use std::collections::HashMap;

pub use entry::{
    ConfigDefinition, ConfigEntry, CustomHandle, CustomId, CustomSyncedValue, EntryHandle, EntryId,
};
pub use store::{ConfigStore, MemoryStore, MemoryStoreState};

use crate::codec::{SyncValue, TypeRegistry, Value, ValueType};
use crate::error::RegistryError;

/// Section under which custom values and protocol extras travel.
pub const INTERNAL_SECTION: &str = "Internal";
pub const SERVER_VERSION_KEY: &str = "serverversion";
pub const LOCK_EXEMPT_KEY: &str = "lockexempt";

/// What a local edit did to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalEdit {
    /// The live value changed.
    Applied,
    /// A server value is live; the edit went to the local base value.
    Shadowed,
    Unchanged,
}

/// Entries and custom values declared by one mod.
#[derive(Debug, Default)]
pub struct ConfigRegistry {
    entries: Vec<ConfigEntry>,
    index: HashMap<(String, String), EntryId>,
    custom_values: Vec<CustomSyncedValue>,
    custom_order: Vec<CustomId>,
    locking: Option<EntryId>,
    types: TypeRegistry,
    processing_update: bool,
    dirty_entries: Vec<EntryId>,
    dirty_custom: Vec<CustomId>,
    locking_changed: bool,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        definition: ConfigDefinition,
        value_type: ValueType,
        default: Value,
    ) -> Result<EntryId, RegistryError> {
        let key = (definition.section.clone(), definition.key.clone());
        if self.index.contains_key(&key) {
            return Err(RegistryError::DuplicateEntry {
                section: key.0,
                key: key.1,
            });
        }
        if !default.conforms_to(&value_type) {
            return Err(RegistryError::WrongType {
                name: definition.to_string(),
                expected: value_type.type_name(),
            });
        }

        self.types.register(&value_type);
        let id = EntryId(self.entries.len());
        self.entries.push(ConfigEntry {
            definition,
            value_type,
            value: default.clone(),
            default,
            local_base_value: None,
            read_only: false,
        });
        self.index.insert(key, id);
        Ok(id)
    }

    pub fn register_typed<T: SyncValue>(
        &mut self,
        definition: ConfigDefinition,
        default: T,
    ) -> Result<EntryHandle<T>, RegistryError> {
        self.register(definition, T::value_type(), default.into_value())
            .map(EntryHandle::new)
    }

    /// Registers a custom value. Identifiers are unique per registry and
    /// `serverversion` is reserved.
    pub fn register_custom(
        &mut self,
        identifier: impl Into<String>,
        value_type: ValueType,
        priority: i32,
        initial: Value,
    ) -> Result<CustomId, RegistryError> {
        let identifier = identifier.into();
        if identifier == SERVER_VERSION_KEY || self.find_custom(&identifier).is_some() {
            return Err(RegistryError::DuplicateCustomValue(identifier));
        }
        if !initial.conforms_to(&value_type) {
            return Err(RegistryError::WrongType {
                name: identifier,
                expected: value_type.type_name(),
            });
        }

        self.types.register(&value_type);
        let id = CustomId(self.custom_values.len());
        self.custom_values.push(CustomSyncedValue {
            identifier,
            value_type,
            value: initial,
            local_base_value: None,
            priority,
        });

        // Stable sort keeps registration order among equal priorities.
        self.custom_order.push(id);
        let values = &self.custom_values;
        self.custom_order
            .sort_by(|a, b| values[b.0].priority.cmp(&values[a.0].priority));
        Ok(id)
    }

    pub fn set_locking(&mut self, id: EntryId) -> Result<(), RegistryError> {
        if self.locking.is_some() {
            return Err(RegistryError::LockingEntryAlreadySet);
        }
        self.entry_checked(id)?;
        self.locking = Some(id);
        Ok(())
    }

    pub fn locking_entry(&self) -> Option<EntryId> {
        self.locking
    }

    /// Integer reading of the locking entry; `None` without one.
    pub fn locking_value(&self) -> Option<i64> {
        let id = self.locking?;
        self.entries.get(id.0)?.value.as_i64()
    }

    pub fn entry(&self, id: EntryId) -> Option<&ConfigEntry> {
        self.entries.get(id.0)
    }

    pub fn entries(&self) -> impl Iterator<Item = (EntryId, &ConfigEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (EntryId(i), entry))
    }

    pub fn entry_ids(&self) -> Vec<EntryId> {
        (0..self.entries.len()).map(EntryId).collect()
    }

    pub fn find(&self, section: &str, key: &str) -> Option<EntryId> {
        self.index
            .get(&(section.to_string(), key.to_string()))
            .copied()
    }

    pub fn custom(&self, id: CustomId) -> Option<&CustomSyncedValue> {
        self.custom_values.get(id.0)
    }

    /// Custom values in processing order, highest priority first.
    pub fn custom_values(&self) -> impl Iterator<Item = (CustomId, &CustomSyncedValue)> {
        self.custom_order
            .iter()
            .map(|id| (*id, &self.custom_values[id.0]))
    }

    pub fn custom_ids(&self) -> Vec<CustomId> {
        self.custom_order.clone()
    }

    pub fn find_custom(&self, identifier: &str) -> Option<CustomId> {
        self.custom_values
            .iter()
            .position(|value| value.identifier == identifier)
            .map(CustomId)
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn get<T: SyncValue>(&self, handle: EntryHandle<T>) -> Option<T> {
        T::from_value(&self.entries.get(handle.id().0)?.value)
    }

    pub fn get_custom<T: SyncValue>(&self, handle: CustomHandle<T>) -> Option<T> {
        T::from_value(&self.custom_values.get(handle.id().0)?.value)
    }

    pub fn is_processing_update(&self) -> bool {
        self.processing_update
    }

    pub(crate) fn set_processing_update(&mut self, processing: bool) {
        self.processing_update = processing;
    }

    /// Local edit made by a collaborator on this node. The live value
    /// changes and synchronized entries are queued for broadcast.
    pub fn set_local(&mut self, id: EntryId, value: Value) -> Result<LocalEdit, RegistryError> {
        let processing = self.processing_update;
        let is_locking = self.locking == Some(id);
        let entry = self.entry_checked_mut(id)?;
        check_type(&entry.definition.to_string(), &entry.value_type, &value)?;
        if entry.value == value {
            return Ok(LocalEdit::Unchanged);
        }

        entry.value = value;
        let synchronized = entry.definition.synchronized;
        if synchronized && !processing && !self.dirty_entries.contains(&id) {
            self.dirty_entries.push(id);
        }
        if is_locking {
            self.locking_changed = true;
        }
        Ok(LocalEdit::Applied)
    }

    /// Edit that must not replace a server value, such as a reread of the
    /// local config file. While a server value is held the edit goes to the
    /// local base; otherwise it behaves like [`ConfigRegistry::set_local`].
    pub fn set_local_base(&mut self, id: EntryId, value: Value) -> Result<LocalEdit, RegistryError> {
        let entry = self.entry_checked_mut(id)?;
        check_type(&entry.definition.to_string(), &entry.value_type, &value)?;
        if let Some(base) = entry.local_base_value.as_mut() {
            if *base == value {
                return Ok(LocalEdit::Unchanged);
            }
            *base = value;
            return Ok(LocalEdit::Shadowed);
        }
        self.set_local(id, value)
    }

    pub fn set_custom_local(
        &mut self,
        id: CustomId,
        value: Value,
    ) -> Result<LocalEdit, RegistryError> {
        let processing = self.processing_update;
        let custom = self.custom_checked_mut(id)?;
        check_type(&custom.identifier, &custom.value_type, &value)?;
        if custom.value == value {
            return Ok(LocalEdit::Unchanged);
        }

        custom.value = value;
        if !processing && !self.dirty_custom.contains(&id) {
            self.dirty_custom.push(id);
        }
        Ok(LocalEdit::Applied)
    }

    pub fn set_custom_local_base(
        &mut self,
        id: CustomId,
        value: Value,
    ) -> Result<LocalEdit, RegistryError> {
        let custom = self.custom_checked_mut(id)?;
        check_type(&custom.identifier, &custom.value_type, &value)?;
        if let Some(base) = custom.local_base_value.as_mut() {
            if *base == value {
                return Ok(LocalEdit::Unchanged);
            }
            *base = value;
            return Ok(LocalEdit::Shadowed);
        }
        self.set_custom_local(id, value)
    }

    /// Writes a value received from a peer. With `keep_base` the current
    /// value is first saved as the local base, unless one is already held.
    pub(crate) fn apply_incoming(&mut self, id: EntryId, value: Value, keep_base: bool) -> bool {
        let is_locking = self.locking == Some(id);
        let Some(entry) = self.entries.get_mut(id.0) else {
            return false;
        };
        if keep_base && entry.local_base_value.is_none() {
            entry.local_base_value = Some(entry.value.clone());
        }
        let changed = entry.value != value;
        entry.value = value;
        if changed && is_locking {
            self.locking_changed = true;
        }
        changed
    }

    pub(crate) fn apply_incoming_custom(&mut self, id: CustomId, value: Value, keep_base: bool) {
        if let Some(custom) = self.custom_values.get_mut(id.0) {
            if keep_base && custom.local_base_value.is_none() {
                custom.local_base_value = Some(custom.value.clone());
            }
            custom.value = value;
        }
    }

    /// Puts every held local base value back live and clears the shadows.
    /// Returns the entries whose live value changed.
    pub(crate) fn restore_local_base(&mut self) -> (Vec<EntryId>, Vec<CustomId>) {
        let mut entries = Vec::new();
        for (i, entry) in self.entries.iter_mut().enumerate() {
            if let Some(base) = entry.local_base_value.take() {
                if entry.value != base {
                    entry.value = base;
                    entries.push(EntryId(i));
                    if self.locking == Some(EntryId(i)) {
                        self.locking_changed = true;
                    }
                }
            }
        }

        let mut customs = Vec::new();
        for (i, custom) in self.custom_values.iter_mut().enumerate() {
            if let Some(base) = custom.local_base_value.take() {
                if custom.value != base {
                    custom.value = base;
                    customs.push(CustomId(i));
                }
            }
        }
        (entries, customs)
    }

    pub fn has_pending(&self) -> bool {
        !self.dirty_entries.is_empty() || !self.dirty_custom.is_empty()
    }

    /// Drains the local edits waiting to be broadcast.
    pub fn take_pending(&mut self) -> (Vec<EntryId>, Vec<CustomId>) {
        (
            std::mem::take(&mut self.dirty_entries),
            std::mem::take(&mut self.dirty_custom),
        )
    }

    pub(crate) fn take_locking_changed(&mut self) -> bool {
        std::mem::take(&mut self.locking_changed)
    }

    pub(crate) fn set_read_only(&mut self, id: EntryId, read_only: bool) {
        if let Some(entry) = self.entries.get_mut(id.0) {
            entry.read_only = read_only;
        }
    }

    fn entry_checked(&self, id: EntryId) -> Result<&ConfigEntry, RegistryError> {
        self.entries.get(id.0).ok_or(RegistryError::UnknownEntry(id.0))
    }

    fn entry_checked_mut(&mut self, id: EntryId) -> Result<&mut ConfigEntry, RegistryError> {
        self.entries
            .get_mut(id.0)
            .ok_or(RegistryError::UnknownEntry(id.0))
    }

    fn custom_checked_mut(&mut self, id: CustomId) -> Result<&mut CustomSyncedValue, RegistryError> {
        self.custom_values
            .get_mut(id.0)
            .ok_or(RegistryError::UnknownEntry(id.0))
    }
}

fn check_type(name: &str, value_type: &ValueType, value: &Value) -> Result<(), RegistryError> {
    if value.conforms_to(value_type) {
        return Ok(());
    }
    Err(RegistryError::WrongType {
        name: name.to_string(),
        expected: value_type.type_name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Toggle;

    fn registry() -> (ConfigRegistry, EntryHandle<f32>, EntryHandle<bool>) {
        let mut registry = ConfigRegistry::new();
        let purity = registry
            .register_typed(ConfigDefinition::new("StatusEffects", "PurityDuration"), 10.0f32)
            .unwrap();
        let verbose = registry
            .register_typed(
                ConfigDefinition::new("General", "VerboseLogging").local_only(),
                false,
            )
            .unwrap();
        (registry, purity, verbose)
    }

    #[test]
    fn test_duplicate_entries_are_rejected() {
        let (mut registry, _, _) = registry();
        let err = registry
            .register_typed(ConfigDefinition::new("StatusEffects", "PurityDuration"), 3.0f32)
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateEntry { .. }));
    }

    #[test]
    fn test_reserved_and_duplicate_custom_values_are_rejected() {
        let mut registry = ConfigRegistry::new();
        registry
            .register_custom("recipes", ValueType::String, 0, Value::Null)
            .unwrap();

        for identifier in ["recipes", "serverversion"] {
            let err = registry
                .register_custom(identifier, ValueType::String, 0, Value::Null)
                .unwrap_err();
            assert_eq!(err, RegistryError::DuplicateCustomValue(identifier.into()));
        }
    }

    #[test]
    fn test_custom_values_iterate_by_descending_priority() {
        let mut registry = ConfigRegistry::new();
        for (name, priority) in [("low", -1), ("high", 10), ("mid", 0), ("mid2", 0)] {
            registry
                .register_custom(name, ValueType::I32, priority, Value::I32(0))
                .unwrap();
        }
        let order: Vec<_> = registry.custom_values().map(|(_, v)| v.identifier()).collect();
        assert_eq!(order, ["high", "mid", "mid2", "low"]);
    }

    #[test]
    fn test_only_synchronized_local_edits_are_queued() {
        let (mut registry, purity, verbose) = registry();
        assert_eq!(
            registry.set_local(purity.id(), Value::F32(12.0)).unwrap(),
            LocalEdit::Applied
        );
        assert_eq!(
            registry.set_local(verbose.id(), Value::Bool(true)).unwrap(),
            LocalEdit::Applied
        );

        let (entries, customs) = registry.take_pending();
        assert_eq!(entries, vec![purity.id()]);
        assert!(customs.is_empty());
        assert!(!registry.has_pending());
    }

    #[test]
    fn test_edits_while_processing_are_not_queued() {
        let (mut registry, purity, _) = registry();
        registry.set_processing_update(true);
        registry.set_local(purity.id(), Value::F32(1.0)).unwrap();
        registry.set_processing_update(false);
        assert!(!registry.has_pending());
    }

    #[test]
    fn test_local_edit_under_override_goes_live() {
        let (mut registry, purity, _) = registry();
        registry.apply_incoming(purity.id(), Value::F32(99.0), true);

        let edit = registry.set_local(purity.id(), Value::F32(5.0)).unwrap();
        assert_eq!(edit, LocalEdit::Applied);
        assert_eq!(registry.get(purity), Some(5.0));
        let (entries, _) = registry.take_pending();
        assert_eq!(entries, vec![purity.id()]);
        assert_eq!(
            registry.entry(purity.id()).unwrap().local_base_value(),
            Some(&Value::F32(10.0))
        );
    }

    #[test]
    fn test_base_edit_under_override_is_shadowed() {
        let (mut registry, purity, _) = registry();
        registry.apply_incoming(purity.id(), Value::F32(99.0), true);

        let edit = registry.set_local_base(purity.id(), Value::F32(5.0)).unwrap();
        assert_eq!(edit, LocalEdit::Shadowed);
        assert_eq!(registry.get(purity), Some(99.0));
        assert!(!registry.has_pending());

        let (restored, _) = registry.restore_local_base();
        assert_eq!(restored, vec![purity.id()]);
        assert_eq!(registry.get(purity), Some(5.0));
        assert!(registry.entry(purity.id()).unwrap().local_base_value().is_none());
    }

    #[test]
    fn test_base_edit_without_override_goes_live() {
        let (mut registry, purity, _) = registry();
        let edit = registry.set_local_base(purity.id(), Value::F32(5.0)).unwrap();
        assert_eq!(edit, LocalEdit::Applied);
        assert_eq!(registry.get(purity), Some(5.0));
        assert!(registry.has_pending());
    }

    #[test]
    fn test_wrong_typed_edit_is_refused() {
        let (mut registry, purity, _) = registry();
        let err = registry.set_local(purity.id(), Value::I32(3)).unwrap_err();
        assert!(matches!(err, RegistryError::WrongType { .. }));
    }

    #[test]
    fn test_locking_entry_is_set_once_and_reports_changes() {
        let mut registry = ConfigRegistry::new();
        let lock = registry
            .register_typed(ConfigDefinition::new("General", "Lock Configuration"), Toggle::On)
            .unwrap();
        registry.set_locking(lock.id()).unwrap();
        assert_eq!(
            registry.set_locking(lock.id()).unwrap_err(),
            RegistryError::LockingEntryAlreadySet
        );
        assert_eq!(registry.locking_value(), Some(1));

        registry.set_local(lock.id(), Toggle::Off.into_value()).unwrap();
        assert!(registry.take_locking_changed());
        assert!(!registry.take_locking_changed());
        assert_eq!(registry.locking_value(), Some(0));
    }
}
