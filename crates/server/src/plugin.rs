use configsync::{
    ConfigDefinition, EntryHandle, EntryId, LocalEdit, RegistryError, SyncEngine, Toggle, Value,
};

use crate::store::JsonFileStore;

pub const MOD_NAME: &str = "rpg.statuseffects";
pub const DISPLAY_NAME: &str = "RPG Status Effects";
pub const VERSION: &str = "1.0.0";

pub const DEFAULT_RECIPE: &str = "Wood,10,5,LeatherScraps,5,2,SwordCheat,1,0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub item: String,
    pub amount: i32,
    pub amount_per_level: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecipeError {
    #[error("expected item,amount,per-level triples, got {0} fields")]
    FieldCount(usize),
    #[error("empty item name in requirement {0}")]
    EmptyItem(usize),
    #[error("invalid amount {value:?} for {item}")]
    InvalidAmount { item: String, value: String },
}

/// Parses `Item,Amount,AmountPerLevel,...` into crafting requirements.
pub fn parse_recipe(recipe: &str) -> Result<Vec<Requirement>, RecipeError> {
    let fields: Vec<&str> = recipe.split(',').map(str::trim).collect();
    if fields.len() % 3 != 0 {
        return Err(RecipeError::FieldCount(fields.len()));
    }

    fields
        .chunks(3)
        .enumerate()
        .map(|(index, chunk)| {
            let item = chunk[0];
            if item.is_empty() {
                return Err(RecipeError::EmptyItem(index));
            }
            let amount = |value: &str| {
                value.parse::<i32>().map_err(|_| RecipeError::InvalidAmount {
                    item: item.to_string(),
                    value: value.to_string(),
                })
            };
            Ok(Requirement {
                item: item.to_string(),
                amount: amount(chunk[1])?,
                amount_per_level: amount(chunk[2])?,
            })
        })
        .collect()
}

/// Entries the status effects plugin registers with its sync engine.
#[derive(Debug, Clone, Copy)]
pub struct PluginConfig {
    pub lock: EntryHandle<Toggle>,
    pub verbose_logging: EntryHandle<bool>,
    pub purity_duration: EntryHandle<f32>,
    pub taunt_duration: EntryHandle<f32>,
    pub taunt_hammer_recipe: EntryHandle<String>,
}

impl PluginConfig {
    pub fn register(engine: &mut SyncEngine) -> Result<Self, RegistryError> {
        engine.set_display_name(DISPLAY_NAME);
        engine.set_version(VERSION, VERSION);

        Ok(Self {
            lock: engine.add_locking_config_entry(
                ConfigDefinition::new("General", "Lock Configuration")
                    .with_description("If on, the configuration is locked and can be changed by server admins only."),
                Toggle::On,
            )?,
            verbose_logging: engine.add_config_entry(
                ConfigDefinition::new("General", "VerboseLogging")
                    .with_description("Enable detailed debug logs."),
                false,
            )?,
            purity_duration: engine.add_config_entry(
                ConfigDefinition::new("StatusEffects", "PurityDuration")
                    .with_description("Duration of the Purity status effect in seconds."),
                10.0f32,
            )?,
            taunt_duration: engine.add_config_entry(
                ConfigDefinition::new("StatusEffects", "TauntDuration")
                    .with_description("Duration of the Taunt effect in seconds."),
                15.0f32,
            )?,
            taunt_hammer_recipe: engine.add_config_entry(
                ConfigDefinition::new("Item_Recipe_TauntHammer", "Recipe").with_description(
                    "Recipe for the taunt hammer (format: ItemName,Amount,AmountPerLevel,...)",
                ),
                DEFAULT_RECIPE.to_string(),
            )?,
        })
    }

    fn ids(&self) -> [EntryId; 5] {
        [
            self.lock.id(),
            self.verbose_logging.id(),
            self.purity_duration.id(),
            self.taunt_duration.id(),
            self.taunt_hammer_recipe.id(),
        ]
    }

    /// Rereads the values saved in `store`. Values held from the server stay
    /// live; the saved ones wait in the local base.
    pub fn load(&self, engine: &mut SyncEngine, store: &JsonFileStore) -> usize {
        let mut loaded = 0;
        for id in self.ids() {
            let Some(entry) = engine.registry().entry(id) else {
                continue;
            };
            let Some(value) = store.get(entry.section(), entry.key()).cloned() else {
                continue;
            };
            let name = entry.definition().to_string();
            match engine.reload_entry_value(id, value) {
                Ok(_) => loaded += 1,
                Err(error) => log::warn!("Ignoring saved value for {}: {}", name, error),
            }
        }
        loaded
    }

    pub fn touches_recipe(&self, entries: &[EntryId]) -> bool {
        entries.contains(&self.taunt_hammer_recipe.id())
    }

    /// Resets the recipe to its default when it cannot be parsed. Returns
    /// whether the live recipe was replaced; a node that may not edit the
    /// server's value only resets its local base.
    pub fn validate_recipe(&self, engine: &mut SyncEngine) -> bool {
        let problem = match engine.value(self.taunt_hammer_recipe) {
            Some(recipe) => match parse_recipe(&recipe) {
                Ok(_) => return false,
                Err(error) => error.to_string(),
            },
            None => "recipe is not set".to_string(),
        };

        if engine.value(self.verbose_logging).unwrap_or(false) {
            log::warn!(
                "Invalid recipe config for the taunt hammer ({}), resetting to default",
                problem
            );
        }
        let default = Value::String(DEFAULT_RECIPE.to_string());
        match engine.set_entry_value(self.taunt_hammer_recipe.id(), default) {
            Ok(LocalEdit::Applied) => true,
            Ok(_) => false,
            Err(error) => {
                log::warn!("Failed to reset taunt hammer recipe: {}", error);
                false
            }
        }
    }

    pub fn describe(&self, engine: &SyncEngine) -> String {
        let value = |id: EntryId| {
            engine
                .registry()
                .entry(id)
                .map(|entry| format!("{}={:?}", entry.definition(), entry.value()))
                .unwrap_or_default()
        };
        self.ids().map(value).join(", ")
    }
}
