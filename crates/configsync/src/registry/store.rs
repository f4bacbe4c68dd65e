use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use super::entry::ConfigDefinition;
use crate::codec::Value;

/// Durable config storage owned by the collaborator. The engine calls
/// `set_value` for every entry in a batch, then `flush` once.
pub trait ConfigStore {
    fn set_value(&mut self, definition: &ConfigDefinition, value: &Value);
    fn flush(&mut self) -> io::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStoreState {
    pub staged: BTreeMap<(String, String), Value>,
    pub saved: BTreeMap<(String, String), Value>,
    pub writes: usize,
    pub flushes: usize,
}

/// In-memory store; clones share state so a test can keep a handle after
/// giving one to an engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryStoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MemoryStoreState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn flush_count(&self) -> usize {
        self.snapshot().flushes
    }

    pub fn saved(&self, section: &str, key: &str) -> Option<Value> {
        self.snapshot()
            .saved
            .get(&(section.to_string(), key.to_string()))
            .cloned()
    }
}

impl ConfigStore for MemoryStore {
    fn set_value(&mut self, definition: &ConfigDefinition, value: &Value) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.writes += 1;
        state.staged.insert(
            (definition.section.clone(), definition.key.clone()),
            value.clone(),
        );
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let staged = std::mem::take(&mut state.staged);
        state.saved.extend(staged);
        state.flushes += 1;
        Ok(())
    }
}
