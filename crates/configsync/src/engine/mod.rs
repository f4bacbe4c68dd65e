mod apply;
mod context;
mod fragments;
mod package;

use std::collections::VecDeque;
use std::sync::Arc;

pub use apply::{ApplyOutcome, ApplyReport};
pub use context::SyncContext;
pub use fragments::{FragmentCache, FragmentProgress};
pub use package::PackageExtra;

use crate::codec::{SyncValue, Value, ValueType};
use crate::config::SyncConfig;
use crate::error::RegistryError;
use crate::registry::{
    ConfigDefinition, ConfigRegistry, ConfigStore, CustomHandle, CustomId, EntryHandle, EntryId,
    LocalEdit, MemoryStore,
};
use crate::transport::PeerId;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    AuthorityChanged {
        authoritative: bool,
    },
    LockedConfigChanged,
    /// Entries whose value came from a package, including local values a
    /// full package put back live.
    ValuesApplied {
        sender: PeerId,
        entries: Vec<EntryId>,
        custom_values: Vec<CustomId>,
    },
    /// Local values came back after the server connection was lost.
    ValuesRestored {
        entries: Vec<EntryId>,
        custom_values: Vec<CustomId>,
    },
}

/// Sync state for one mod's registry.
pub struct SyncEngine {
    name: String,
    display_name: String,
    current_version: Option<String>,
    minimum_required_version: Option<String>,
    context: Arc<SyncContext>,
    config: SyncConfig,
    registry: ConfigRegistry,
    force_locking: Option<bool>,
    authoritative: bool,
    initial_sync_done: bool,
    /// Read-only state follows lock changes while server values are held.
    watching_server_lock: bool,
    server_version: Option<String>,
    fragments: FragmentCache,
    events: VecDeque<SyncEvent>,
    store: Box<dyn ConfigStore>,
}

impl SyncEngine {
    pub fn new(name: impl Into<String>, context: Arc<SyncContext>) -> Self {
        Self::with_config(name, context, SyncConfig::default())
    }

    pub fn with_config(name: impl Into<String>, context: Arc<SyncContext>, config: SyncConfig) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            current_version: None,
            minimum_required_version: None,
            context,
            fragments: FragmentCache::new(config.fragment_expiry),
            config,
            registry: ConfigRegistry::new(),
            force_locking: None,
            authoritative: true,
            initial_sync_done: false,
            watching_server_lock: false,
            server_version: None,
            events: VecDeque::new(),
            store: Box::new(MemoryStore::new()),
        }
    }

    pub fn set_store(&mut self, store: Box<dyn ConfigStore>) {
        self.store = store;
    }

    pub fn set_display_name(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
    }

    pub fn set_version(&mut self, current: impl Into<String>, minimum_required: impl Into<String>) {
        self.current_version = Some(current.into());
        self.minimum_required_version = Some(minimum_required.into());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn current_version(&self) -> Option<&str> {
        self.current_version.as_deref()
    }

    pub fn minimum_required_version(&self) -> Option<&str> {
        self.minimum_required_version.as_deref()
    }

    /// Version announced by the server in its login package.
    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    pub fn channel_name(&self) -> String {
        format!("{} ConfigSync", self.name)
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.context
    }

    pub fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    pub fn pending_fragments(&self) -> usize {
        self.fragments.len()
    }

    pub fn add_config_entry<T: SyncValue>(
        &mut self,
        definition: ConfigDefinition,
        default: T,
    ) -> Result<EntryHandle<T>, RegistryError> {
        self.registry.register_typed(definition, default)
    }

    /// Registers the entry whose integer value decides whether the registry
    /// is locked. Only one per registry.
    pub fn add_locking_config_entry<T: SyncValue>(
        &mut self,
        definition: ConfigDefinition,
        default: T,
    ) -> Result<EntryHandle<T>, RegistryError> {
        if self.registry.locking_entry().is_some() {
            return Err(RegistryError::LockingEntryAlreadySet);
        }
        let handle = self.registry.register_typed(definition, default)?;
        self.registry.set_locking(handle.id())?;
        Ok(handle)
    }

    pub fn add_custom_value<T: SyncValue>(
        &mut self,
        identifier: impl Into<String>,
        priority: i32,
        initial: T,
    ) -> Result<CustomHandle<T>, RegistryError> {
        self.registry
            .register_custom(identifier, T::value_type(), priority, initial.into_value())
            .map(CustomHandle::new)
    }

    /// Registers an entry whose type is only known at runtime, such as a
    /// struct schema.
    pub fn add_dynamic_config_entry(
        &mut self,
        definition: ConfigDefinition,
        value_type: ValueType,
        default: Value,
    ) -> Result<EntryId, RegistryError> {
        self.registry.register(definition, value_type, default)
    }

    pub fn add_dynamic_custom_value(
        &mut self,
        identifier: impl Into<String>,
        value_type: ValueType,
        priority: i32,
        initial: Value,
    ) -> Result<CustomId, RegistryError> {
        self.registry
            .register_custom(identifier, value_type, priority, initial)
    }

    pub fn entry_value(&self, id: EntryId) -> Option<&Value> {
        self.registry.entry(id).map(|entry| entry.value())
    }

    pub fn value<T: SyncValue>(&self, handle: EntryHandle<T>) -> Option<T> {
        self.registry.get(handle)
    }

    pub fn set_value<T: SyncValue>(
        &mut self,
        handle: EntryHandle<T>,
        value: T,
    ) -> Result<LocalEdit, RegistryError> {
        self.set_entry_value(handle.id(), value.into_value())
    }

    /// Local edit of an entry. Writable synchronized edits go live and are
    /// broadcast on the next [`SyncEngine::take_broadcast`]; edits the node
    /// may not make right now only land in the local base.
    pub fn set_entry_value(&mut self, id: EntryId, value: Value) -> Result<LocalEdit, RegistryError> {
        let edit = if self.is_writable(id) {
            self.registry.set_local(id, value)?
        } else {
            self.registry.set_local_base(id, value)?
        };
        self.after_local_edit(id, edit);
        Ok(edit)
    }

    /// Value reread from the node's own config file. It never replaces a
    /// live server value.
    pub fn reload_entry_value(&mut self, id: EntryId, value: Value) -> Result<LocalEdit, RegistryError> {
        let edit = self.registry.set_local_base(id, value)?;
        self.after_local_edit(id, edit);
        Ok(edit)
    }

    fn after_local_edit(&mut self, id: EntryId, edit: LocalEdit) {
        if edit != LocalEdit::Unchanged {
            self.persist(&[id]);
            self.check_locking_changed();
        }
    }

    pub fn custom_value<T: SyncValue>(&self, handle: CustomHandle<T>) -> Option<T> {
        self.registry.get_custom(handle)
    }

    pub fn set_custom_value<T: SyncValue>(
        &mut self,
        handle: CustomHandle<T>,
        value: T,
    ) -> Result<LocalEdit, RegistryError> {
        let id = handle.id();
        let has_base = self
            .registry
            .custom(id)
            .is_some_and(|custom| custom.local_base_value().is_some());
        if self.authoritative || !has_base || !self.is_locked() {
            self.registry.set_custom_local(id, value.into_value())
        } else {
            self.registry.set_custom_local_base(id, value.into_value())
        }
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    pub fn initial_sync_done(&self) -> bool {
        self.initial_sync_done
    }

    pub fn is_locked(&self) -> bool {
        let locked = self.force_locking.unwrap_or_else(|| {
            self.registry
                .locking_value()
                .is_some_and(|value| value != 0)
        });
        locked && !self.context.lock_exempt()
    }

    pub fn is_admin(&self) -> bool {
        self.context.lock_exempt() || self.authoritative
    }

    /// Overrides the locking entry; `None` goes back to it.
    pub fn set_force_locking(&mut self, force: Option<bool>) {
        let was_locked = self.is_locked();
        self.force_locking = force;
        if self.is_locked() != was_locked {
            self.locked_config_changed();
        }
    }

    /// Whether a collaborator may edit the entry right now. Entries holding a
    /// server value are read-only while the registry is locked, and the
    /// locking entry itself only opens up to lock-exempt nodes.
    pub fn is_writable(&self, id: EntryId) -> bool {
        let Some(entry) = self.registry.entry(id) else {
            return true;
        };
        if self.authoritative || !entry.is_synchronized() || entry.local_base_value().is_none() {
            return true;
        }
        !self.is_locked()
            && (self.registry.locking_entry() != Some(id) || self.context.lock_exempt())
    }

    pub fn refresh_read_only(&mut self) {
        for id in self.registry.entry_ids() {
            let writable = self.is_writable(id);
            self.registry.set_read_only(id, !writable);
        }
    }

    /// Builds a partial package with the local edits made since the last
    /// call. Nodes that are locked and not admin never broadcast.
    pub fn take_broadcast(&mut self) -> Option<Vec<u8>> {
        if !self.registry.has_pending() {
            return None;
        }
        let (entries, custom_values) = self.registry.take_pending();
        if self.is_locked() && !self.is_admin() {
            log::debug!(
                "Not broadcasting {} local changes for mod {}, config is locked",
                entries.len() + custom_values.len(),
                self.display_name
            );
            return None;
        }

        match self.build_package(&entries, &custom_values, &[], true) {
            Ok(package) => Some(package.into_bytes()),
            Err(error) => {
                log::warn!("Failed to build config package for mod {}: {}", self.display_name, error);
                None
            }
        }
    }

    /// The server connection went away: local values come back and this
    /// node is authoritative again.
    pub fn server_connection_lost(&mut self) {
        let (entries, custom_values) = self.registry.restore_local_base();
        self.persist(&entries);
        self.watching_server_lock = false;
        self.initial_sync_done = false;
        self.server_version = None;
        self.set_authoritative(true);
        self.refresh_read_only();
        self.check_locking_changed();

        if !entries.is_empty() || !custom_values.is_empty() {
            self.events.push_back(SyncEvent::ValuesRestored {
                entries,
                custom_values,
            });
        }
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SyncEvent> + '_ {
        self.events.drain(..)
    }

    fn set_authoritative(&mut self, authoritative: bool) {
        if self.authoritative == authoritative {
            return;
        }
        self.authoritative = authoritative;
        log::debug!(
            "Mod {} is {} the source of truth",
            self.display_name,
            if authoritative { "now" } else { "no longer" }
        );
        self.events
            .push_back(SyncEvent::AuthorityChanged { authoritative });
    }

    fn check_locking_changed(&mut self) {
        if self.registry.take_locking_changed() {
            self.locked_config_changed();
        }
    }

    fn locked_config_changed(&mut self) {
        self.events.push_back(SyncEvent::LockedConfigChanged);
        if self.watching_server_lock {
            self.refresh_read_only();
        }
    }

    /// Writes entries to the store as one batch with a single flush.
    fn persist(&mut self, ids: &[EntryId]) {
        if ids.is_empty() {
            return;
        }
        for id in ids {
            if let Some(entry) = self.registry.entry(*id) {
                self.store.set_value(entry.definition(), entry.persisted_value());
            }
        }
        if let Err(error) = self.store.flush() {
            log::warn!("Failed to save config for mod {}: {}", self.display_name, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Toggle;

    fn engine(is_server: bool) -> (SyncEngine, EntryHandle<f32>, EntryHandle<Toggle>) {
        let mut engine = SyncEngine::new("test.mod", Arc::new(SyncContext::new(is_server)));
        let lock = engine
            .add_locking_config_entry(ConfigDefinition::new("General", "Lock Configuration"), Toggle::On)
            .unwrap();
        let purity = engine
            .add_config_entry(ConfigDefinition::new("StatusEffects", "PurityDuration"), 10.0f32)
            .unwrap();
        (engine, purity, lock)
    }

    #[test]
    fn test_channel_name_uses_mod_name() {
        let (engine, _, _) = engine(true);
        assert_eq!(engine.channel_name(), "test.mod ConfigSync");
    }

    #[test]
    fn test_second_locking_entry_is_rejected() {
        let (mut engine, _, _) = engine(true);
        let err = engine
            .add_locking_config_entry(ConfigDefinition::new("General", "Other Lock"), Toggle::On)
            .unwrap_err();
        assert_eq!(err, RegistryError::LockingEntryAlreadySet);
        assert!(engine.registry().find("General", "Other Lock").is_none());
    }

    #[test]
    fn test_lock_follows_entry_force_and_exemption() {
        let (mut engine, _, lock) = engine(true);
        assert!(engine.is_locked());

        engine.set_value(lock, Toggle::Off).unwrap();
        assert!(!engine.is_locked());

        engine.set_force_locking(Some(true));
        assert!(engine.is_locked());

        engine.context().set_lock_exempt(true);
        assert!(!engine.is_locked());
        engine.context().set_lock_exempt(false);

        engine.set_force_locking(None);
        assert!(!engine.is_locked());
    }

    #[test]
    fn test_locking_entry_change_raises_event() {
        let (mut engine, _, lock) = engine(true);
        engine.set_value(lock, Toggle::Off).unwrap();
        let events: Vec<_> = engine.drain_events().collect();
        assert_eq!(events, vec![SyncEvent::LockedConfigChanged]);
    }

    #[test]
    fn test_authoritative_edits_are_broadcast_once() {
        let (mut engine, purity, _) = engine(true);
        assert!(engine.take_broadcast().is_none());

        engine.set_value(purity, 12.5).unwrap();
        assert!(engine.take_broadcast().is_some());
        assert!(engine.take_broadcast().is_none());
    }

    #[test]
    fn test_local_edits_are_persisted_with_one_flush_each() {
        let (mut engine, purity, _) = engine(true);
        let store = MemoryStore::new();
        engine.set_store(Box::new(store.clone()));

        engine.set_value(purity, 3.0).unwrap();
        engine.set_value(purity, 3.0).unwrap();
        assert_eq!(store.flush_count(), 1);
        assert_eq!(store.saved("StatusEffects", "PurityDuration"), Some(Value::F32(3.0)));
    }
    fn client_with_server_values(lock: Toggle) -> (SyncEngine, EntryHandle<f32>, EntryHandle<Toggle>) {
        let (mut engine, purity, lock_handle) = engine(false);
        engine.set_authoritative(false);
        engine.registry.apply_incoming(purity.id(), Value::F32(99.0), true);
        engine.registry.apply_incoming(lock_handle.id(), lock.into_value(), true);
        engine.registry.take_locking_changed();
        (engine, purity, lock_handle)
    }

    #[test]
    fn test_unlocked_client_edit_goes_live_and_is_broadcast() {
        let (mut engine, purity, _) = client_with_server_values(Toggle::Off);
        assert!(engine.is_writable(purity.id()));

        assert_eq!(engine.set_value(purity, 42.0).unwrap(), LocalEdit::Applied);
        assert_eq!(engine.value(purity), Some(42.0));
        assert!(engine.take_broadcast().is_some());
    }

    #[test]
    fn test_locked_client_edit_only_reaches_local_base() {
        let (mut engine, purity, _) = client_with_server_values(Toggle::On);
        assert!(!engine.is_writable(purity.id()));

        assert_eq!(engine.set_value(purity, 42.0).unwrap(), LocalEdit::Shadowed);
        assert_eq!(engine.value(purity), Some(99.0));
        assert!(engine.take_broadcast().is_none());
    }

    #[test]
    fn test_lock_entry_is_writable_only_when_exempt() {
        let (engine, purity, lock) = client_with_server_values(Toggle::Off);
        assert!(engine.is_writable(purity.id()));
        assert!(!engine.is_writable(lock.id()));

        engine.context().set_lock_exempt(true);
        assert!(engine.is_writable(lock.id()));
    }

    #[test]
    fn test_reloaded_value_never_replaces_server_value() {
        let (mut engine, purity, _) = client_with_server_values(Toggle::Off);
        let edit = engine.reload_entry_value(purity.id(), Value::F32(7.0)).unwrap();
        assert_eq!(edit, LocalEdit::Shadowed);
        assert_eq!(engine.value(purity), Some(99.0));
        assert!(engine.take_broadcast().is_none());

        engine.server_connection_lost();
        assert_eq!(engine.value(purity), Some(7.0));
    }
}

