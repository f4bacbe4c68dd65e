use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::Context;
use configsync::{ConfigDefinition, ConfigStore, Value};

type Sections = BTreeMap<String, BTreeMap<String, Value>>;

/// Config file with one JSON object per section. Writes are staged until
/// `flush`, which rewrites the whole file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    sections: Sections,
    dirty: bool,
}

impl JsonFileStore {
    /// A missing file starts out empty.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let sections = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?,
            Err(error) if error.kind() == io::ErrorKind::NotFound => Sections::new(),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("Failed to read config file {}", path.display()));
            }
        };
        Ok(Self {
            path,
            sections,
            dirty: false,
        })
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.sections.get(section)?.get(key)
    }
}

impl ConfigStore for JsonFileStore {
    fn set_value(&mut self, definition: &ConfigDefinition, value: &Value) {
        self.sections
            .entry(definition.section.clone())
            .or_default()
            .insert(definition.key.clone(), value.clone());
        self.dirty = true;
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let text = serde_json::to_string_pretty(&self.sections).map_err(io::Error::other)?;
        fs::write(&self.path, text)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("configsync-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_values_survive_reopen() {
        let path = temp_path("reopen");
        let mut store = JsonFileStore::open(&path).unwrap();
        store.set_value(
            &ConfigDefinition::new("StatusEffects", "PurityDuration"),
            &Value::F32(12.5),
        );
        store.flush().unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("StatusEffects", "PurityDuration"),
            Some(&Value::F32(12.5))
        );
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_is_empty() {
        let store = JsonFileStore::open(temp_path("missing")).unwrap();
        assert!(store.get("General", "Lock Configuration").is_none());
    }

    #[test]
    fn test_clean_flush_does_not_create_file() {
        let path = temp_path("clean");
        let mut store = JsonFileStore::open(&path).unwrap();
        store.flush().unwrap();
        assert!(!path.exists());
    }
}
