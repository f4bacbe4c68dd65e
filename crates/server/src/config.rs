use std::time::Duration;

use configsync::{PacketLossSimulation, SyncConfig};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub client_count: u64,
    pub admins: Vec<String>,
    pub sync: SyncConfig,
    pub global_packet_loss: Option<PacketLossSimulation>,
    /// Client whose send queue never drains, to exercise the send timeout.
    pub stalled_client: Option<u64>,
    /// Time between server-side edits of the taunt duration. Zero disables.
    pub edit_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            client_count: 4,
            admins: Vec::new(),
            sync: SyncConfig::default(),
            global_packet_loss: None,
            stalled_client: None,
            edit_interval: Duration::from_secs(10),
        }
    }
}
