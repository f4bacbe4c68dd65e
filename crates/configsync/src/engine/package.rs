use super::SyncEngine;
use crate::codec::{self, Package, PackageFlags, SyncValue, Value, ValueType};
use crate::error::CodecError;
use crate::registry::{CustomId, EntryId, INTERNAL_SECTION, LOCK_EXEMPT_KEY, SERVER_VERSION_KEY};

/// Protocol value sent ahead of a registry's own entries.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageExtra {
    pub section: String,
    pub key: String,
    pub value_type: ValueType,
    pub value: Value,
}

impl PackageExtra {
    pub fn internal<T: SyncValue>(key: &str, value: T) -> Self {
        Self {
            section: INTERNAL_SECTION.to_string(),
            key: key.to_string(),
            value_type: T::value_type(),
            value: value.into_value(),
        }
    }
}

impl SyncEngine {
    /// Serializes extras, then custom values, then entries. Unsynchronized
    /// entries are left out.
    pub fn build_package(
        &self,
        entries: &[EntryId],
        custom_values: &[CustomId],
        extras: &[PackageExtra],
        partial: bool,
    ) -> Result<Package, CodecError> {
        let entries: Vec<_> = entries
            .iter()
            .filter_map(|id| self.registry.entry(*id))
            .filter(|entry| entry.is_synchronized())
            .collect();
        let custom_values: Vec<_> = custom_values
            .iter()
            .filter_map(|id| self.registry.custom(*id))
            .collect();

        let mut package = Package::new();
        package.write_flags(if partial {
            PackageFlags::PARTIAL
        } else {
            PackageFlags::empty()
        });
        package.write_len(extras.len() + custom_values.len() + entries.len());

        for extra in extras {
            write_triple(&mut package, &extra.section, &extra.key, &extra.value, &extra.value_type)?;
        }
        for custom in custom_values {
            write_triple(
                &mut package,
                INTERNAL_SECTION,
                custom.identifier(),
                custom.value(),
                custom.value_type(),
            )?;
        }
        for entry in entries {
            write_triple(
                &mut package,
                entry.section(),
                entry.key(),
                entry.value(),
                entry.value_type(),
            )?;
        }
        Ok(package)
    }

    /// Full package a connecting peer receives for this registry.
    pub fn login_package(&self, peer_is_admin: bool) -> Result<Package, CodecError> {
        let mut extras = Vec::with_capacity(2);
        if let Some(version) = &self.current_version {
            extras.push(PackageExtra::internal(SERVER_VERSION_KEY, version.clone()));
        }
        extras.push(PackageExtra::internal(LOCK_EXEMPT_KEY, peer_is_admin));

        self.build_package(
            &self.registry.entry_ids(),
            &self.registry.custom_ids(),
            &extras,
            false,
        )
    }
}

fn write_triple(
    package: &mut Package,
    section: &str,
    key: &str,
    value: &Value,
    ty: &ValueType,
) -> Result<(), CodecError> {
    package.write_str(section);
    package.write_str(key);
    if value.is_null() {
        package.write_str("");
        return Ok(());
    }
    package.write_str(&ty.type_name());
    codec::encode(package, value, ty)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::SyncContext;
    use crate::registry::ConfigDefinition;

    fn read_triple(package: &mut Package) -> (String, String, String) {
        (
            package.read_str().unwrap(),
            package.read_str().unwrap(),
            package.read_str().unwrap(),
        )
    }

    #[test]
    fn test_login_package_layout() {
        let mut engine = SyncEngine::new("layout", Arc::new(SyncContext::new(true)));
        engine.set_version("1.0.0", "1.0.0");
        engine
            .add_config_entry(ConfigDefinition::new("General", "VerboseLogging").local_only(), false)
            .unwrap();
        engine
            .add_config_entry(ConfigDefinition::new("StatusEffects", "TauntDuration"), 15.0f32)
            .unwrap();
        engine.add_custom_value("motd", 0, None::<String>).unwrap();

        let mut package = Package::from_bytes(engine.login_package(true).unwrap().into_bytes());
        assert_eq!(package.read_flags().unwrap(), PackageFlags::empty());
        assert_eq!(package.read_len().unwrap(), 4);

        let (section, key, ty) = read_triple(&mut package);
        assert_eq!((section.as_str(), key.as_str(), ty.as_str()), ("Internal", "serverversion", "string"));
        assert_eq!(package.read_str().unwrap(), "1.0.0");

        let (_, key, ty) = read_triple(&mut package);
        assert_eq!((key.as_str(), ty.as_str()), ("lockexempt", "bool"));
        assert!(package.read_bool().unwrap());

        let (_, key, ty) = read_triple(&mut package);
        assert_eq!((key.as_str(), ty.as_str()), ("motd", ""));

        let (section, key, ty) = read_triple(&mut package);
        assert_eq!(
            (section.as_str(), key.as_str(), ty.as_str()),
            ("StatusEffects", "TauntDuration", "f32")
        );
        assert_eq!(package.read_f32().unwrap(), 15.0);
        assert_eq!(package.remaining(), 0);
    }

    #[test]
    fn test_partial_flag_follows_argument() {
        let engine = SyncEngine::new("flags", Arc::new(SyncContext::new(true)));
        let package = engine.build_package(&[], &[], &[], true).unwrap();
        assert_eq!(package.as_bytes(), &[1, 0, 0, 0, 0]);
    }
}
