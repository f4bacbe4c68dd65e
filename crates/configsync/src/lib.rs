pub mod admin;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod loopback;
pub mod node;
pub mod registry;
pub mod transport;

pub use admin::{AdminWatcher, admin_channel_name};
pub use codec::{
    FieldSchema, Package, PackageFlags, StructSchema, SyncValue, Toggle, TypeRegistry, Value,
    ValueType,
};
pub use config::SyncConfig;
pub use engine::{ApplyOutcome, ApplyReport, PackageExtra, SyncContext, SyncEngine, SyncEvent};
pub use error::{CodecError, CompressionError, RegistryError, SyncError};
pub use loopback::{
    LoopbackLink, LoopbackMessage, LoopbackNetwork, PacketLossSimulation, VERSION_MATCH_CHANNEL,
};
pub use node::{NodeEvent, SyncNode};
pub use registry::{
    ConfigDefinition, ConfigEntry, ConfigRegistry, ConfigStore, CustomHandle, CustomId,
    CustomSyncedValue, EntryHandle, EntryId, LocalEdit, MemoryStore,
};
pub use transport::{
    AdminOracle, BatchId, Clock, DeliveryResult, DeliveryScheduler, LoginBuffer, ManualClock,
    PeerId, PeerLink, SystemClock,
};
