use std::time::Duration;

use super::fragments::FragmentProgress;
use super::{SyncEngine, SyncEvent};
use crate::codec::{self, Package, PackageFlags, Value, ValueType};
use crate::error::{CodecError, SyncError};
use crate::registry::{CustomId, EntryId, INTERNAL_SECTION, LOCK_EXEMPT_KEY, SERVER_VERSION_KEY};
use crate::transport::{AdminOracle, PeerId, compress};

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    pub sender: PeerId,
    pub partial: bool,
    pub entries: Vec<EntryId>,
    pub custom_values: Vec<CustomId>,
    /// Entries put back to their local value before a full package.
    pub restored: Vec<EntryId>,
    /// Triples that were skipped; the rest of the package still applied.
    pub skipped: Vec<SyncError>,
}

impl ApplyReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.custom_values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(ApplyReport),
    /// A fragment was stored; the package is not complete yet.
    Incomplete {
        package_id: u64,
        received: usize,
        expected: usize,
    },
    /// Sender may not change config; nothing was touched.
    Rejected(SyncError),
    /// Package could not be read; nothing was applied.
    Discarded(SyncError),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_))
    }

    pub fn report(&self) -> Option<&ApplyReport> {
        match self {
            ApplyOutcome::Applied(report) => Some(report),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct ParsedPackage {
    entries: Vec<(EntryId, Value)>,
    custom_values: Vec<(CustomId, Value)>,
    lock_exempt: Option<bool>,
    server_version: Option<String>,
    skipped: Vec<SyncError>,
}

fn accepts(ty: &ValueType, type_name: &str) -> bool {
    if type_name.is_empty() {
        ty.is_nullable()
    } else {
        ty.type_name() == type_name
    }
}

impl SyncEngine {
    /// Package received over the server connection. The first one makes
    /// this node non-authoritative.
    pub fn handle_server_package(&mut self, payload: &[u8], now: Duration) -> ApplyOutcome {
        self.watching_server_lock = true;
        self.set_authoritative(false);
        let outcome = self.apply_package(PeerId::SERVER, payload, false, now, &|_: PeerId| true);
        if outcome.is_applied() {
            self.initial_sync_done = true;
        }
        outcome
    }

    /// Package pushed by a client, or relayed from one.
    pub fn handle_peer_package(
        &mut self,
        sender: PeerId,
        payload: &[u8],
        now: Duration,
        admins: &dyn AdminOracle,
    ) -> ApplyOutcome {
        self.apply_package(sender, payload, true, now, admins)
    }

    pub fn apply_package(
        &mut self,
        sender: PeerId,
        payload: &[u8],
        is_client_update: bool,
        now: Duration,
        admins: &dyn AdminOracle,
    ) -> ApplyOutcome {
        if self.context.is_server() && self.is_locked() && !admins.is_admin(sender) {
            log::warn!(
                "Rejected config from {} for mod {}, config is locked and sender is not an admin",
                sender,
                self.display_name
            );
            return ApplyOutcome::Rejected(SyncError::UnauthorizedSender(sender));
        }

        self.fragments.expire(now);

        let (mut package, flags) = match self.unwrap_package(sender, payload, now) {
            Ok(unwrapped) => unwrapped,
            Err(Unwrap::Incomplete {
                package_id,
                received,
                expected,
            }) => {
                log::debug!(
                    "Received fragment {}/{} of package {} from {}",
                    received,
                    expected,
                    package_id,
                    sender
                );
                return ApplyOutcome::Incomplete {
                    package_id,
                    received,
                    expected,
                };
            }
            Err(Unwrap::Failed(error)) => {
                log::warn!(
                    "Discarding config package from {} for mod {}: {}",
                    sender,
                    self.display_name,
                    error
                );
                return ApplyOutcome::Discarded(error);
            }
        };

        let parsed = match self.read_package(&mut package) {
            Ok(parsed) => parsed,
            Err(error) => {
                log::warn!(
                    "Aborted reading of config package from {} for mod {}: {}",
                    sender,
                    self.display_name,
                    error
                );
                return ApplyOutcome::Discarded(error);
            }
        };
        let partial = flags.contains(PackageFlags::PARTIAL);
        ApplyOutcome::Applied(self.apply_parsed(sender, parsed, partial, is_client_update))
    }

    /// Strips fragmentation and compression, returning the inner package
    /// positioned after its flag byte.
    fn unwrap_package(
        &mut self,
        sender: PeerId,
        payload: &[u8],
        now: Duration,
    ) -> Result<(Package, PackageFlags), Unwrap> {
        let mut package = Package::from_bytes(payload.to_vec());
        let mut flags = package.read_flags().map_err(Unwrap::codec)?;

        if flags.contains(PackageFlags::FRAGMENTED) {
            let package_id = package.read_i64().map_err(Unwrap::codec)? as u64;
            let index = package.read_i32().map_err(Unwrap::codec)?;
            let count = package.read_i32().map_err(Unwrap::codec)?;
            let chunk = package.read_bytes().map_err(Unwrap::codec)?;

            match self
                .fragments
                .insert(sender, package_id, index, count, chunk, now)
                .map_err(Unwrap::Failed)?
            {
                FragmentProgress::Incomplete { received, expected } => {
                    return Err(Unwrap::Incomplete {
                        package_id,
                        received,
                        expected,
                    });
                }
                FragmentProgress::Complete(data) => {
                    package = Package::from_bytes(data);
                    flags = package.read_flags().map_err(Unwrap::codec)?;
                }
            }
        }

        if flags.contains(PackageFlags::COMPRESSED) {
            let compressed = package.read_bytes().map_err(Unwrap::codec)?;
            let inflated = compress::inflate(&compressed, self.config.max_decompressed_size)
                .map_err(|error| Unwrap::Failed(error.into()))?;
            package = Package::from_bytes(inflated);
            flags = package.read_flags().map_err(Unwrap::codec)?;
        }

        Ok((package, flags))
    }

    fn read_package(&self, package: &mut Package) -> Result<ParsedPackage, SyncError> {
        let mut parsed = ParsedPackage::default();
        let count = package.read_len()?;

        for _ in 0..count {
            let section = package.read_str()?;
            let key = package.read_str()?;
            let type_name = package.read_str()?;

            let value = if type_name.is_empty() {
                Value::Null
            } else {
                let Some(ty) = self.registry.types().resolve(&type_name) else {
                    return Err(CodecError::UnknownType(type_name).into());
                };
                match codec::decode_resolving(package, &ty, self.registry.types()) {
                    Ok(value) => value,
                    Err(CodecError::TypeMismatch {
                        expected,
                        received,
                        field,
                    }) => {
                        log::warn!(
                            "Got unexpected struct internal type {} for field {} struct {} for {} in section {} for mod {}, expecting {}",
                            received,
                            field,
                            type_name,
                            key,
                            section,
                            self.display_name,
                            expected
                        );
                        parsed.skipped.push(SyncError::TypeMismatch {
                            section,
                            key,
                            reason: format!("field {}: expected {}, got {}", field, expected, received),
                        });
                        continue;
                    }
                    Err(error) => return Err(error.into()),
                }
            };

            if section == INTERNAL_SECTION {
                self.read_internal(&mut parsed, key, &type_name, value);
                continue;
            }

            let Some(id) = self.registry.find(&section, &key) else {
                log::warn!(
                    "Received unknown config entry {} in section {} for mod {}",
                    key,
                    section,
                    self.display_name
                );
                parsed.skipped.push(SyncError::UnknownEntry { section, key });
                continue;
            };
            let expected = self.registry.entry(id).map(|entry| entry.value_type());
            match expected {
                Some(ty) if accepts(ty, &type_name) => parsed.entries.push((id, value)),
                _ => {
                    let expected = expected.map(ValueType::type_name).unwrap_or_default();
                    log::warn!(
                        "Got unexpected type {} for {} in section {} for mod {}, expecting {}",
                        type_name,
                        key,
                        section,
                        self.display_name,
                        expected
                    );
                    parsed.skipped.push(SyncError::TypeMismatch {
                        section,
                        key,
                        reason: format!("expected {}, got {}", expected, type_name),
                    });
                }
            }
        }
        Ok(parsed)
    }

    fn read_internal(&self, parsed: &mut ParsedPackage, key: String, type_name: &str, value: Value) {
        match (key.as_str(), &value) {
            (LOCK_EXEMPT_KEY, Value::Bool(flag)) => {
                if self.context.is_server() {
                    log::warn!("Ignoring lock exemption sent to the server for mod {}", self.display_name);
                } else {
                    parsed.lock_exempt = Some(*flag);
                }
                return;
            }
            (SERVER_VERSION_KEY, Value::String(version)) => {
                parsed.server_version = Some(version.clone());
                return;
            }
            _ => {}
        }

        let Some(id) = self.registry.find_custom(&key) else {
            log::warn!(
                "Received unknown internal value {} for mod {}",
                key,
                self.display_name
            );
            parsed.skipped.push(SyncError::UnknownEntry {
                section: INTERNAL_SECTION.to_string(),
                key,
            });
            return;
        };
        let expected = self.registry.custom(id).map(|custom| custom.value_type());
        match expected {
            Some(ty) if accepts(ty, type_name) => parsed.custom_values.push((id, value)),
            _ => {
                let expected = expected.map(ValueType::type_name).unwrap_or_default();
                log::warn!(
                    "Got unexpected type {} for internal value {} for mod {}, expecting {}",
                    type_name,
                    key,
                    self.display_name,
                    expected
                );
                parsed.skipped.push(SyncError::TypeMismatch {
                    section: INTERNAL_SECTION.to_string(),
                    key,
                    reason: format!("expected {}, got {}", expected, type_name),
                });
            }
        }
    }

    fn apply_parsed(
        &mut self,
        sender: PeerId,
        parsed: ParsedPackage,
        partial: bool,
        is_client_update: bool,
    ) -> ApplyReport {
        let is_server = self.context.is_server();
        let keep_base = !is_server;

        self.registry.set_processing_update(true);
        let (restored, restored_custom) = if partial {
            (Vec::new(), Vec::new())
        } else {
            self.registry.restore_local_base()
        };

        let mut entries = Vec::with_capacity(parsed.entries.len());
        for (id, value) in parsed.entries {
            self.registry.apply_incoming(id, value, keep_base);
            entries.push(id);
        }
        let mut changed: Vec<EntryId> = restored.clone();
        changed.extend(entries.iter().filter(|id| !restored.contains(id)));
        self.persist(&changed);

        let mut custom_values = Vec::with_capacity(parsed.custom_values.len());
        for (id, value) in parsed.custom_values {
            self.registry.apply_incoming_custom(id, value, keep_base);
            custom_values.push(id);
        }
        self.registry.set_processing_update(false);

        if let Some(flag) = parsed.lock_exempt {
            self.context.set_lock_exempt(flag);
        }
        if let Some(version) = parsed.server_version {
            self.server_version = Some(version);
        }

        log::info!(
            "Received {} configs and {} custom values from {} for mod {}",
            entries.len(),
            custom_values.len(),
            if is_server || is_client_update {
                format!("client {}", sender)
            } else {
                "server".to_string()
            },
            self.display_name
        );

        if !is_server {
            self.refresh_read_only();
        }
        self.check_locking_changed();
        let mut changed_custom = restored_custom;
        for id in &custom_values {
            if !changed_custom.contains(id) {
                changed_custom.push(*id);
            }
        }
        self.events.push_back(SyncEvent::ValuesApplied {
            sender,
            entries: changed,
            custom_values: changed_custom,
        });

        ApplyReport {
            sender,
            partial,
            entries,
            custom_values,
            restored,
            skipped: parsed.skipped,
        }
    }
}

enum Unwrap {
    Incomplete {
        package_id: u64,
        received: usize,
        expected: usize,
    },
    Failed(SyncError),
}

impl Unwrap {
    fn codec(error: CodecError) -> Self {
        Unwrap::Failed(error.into())
    }
}
