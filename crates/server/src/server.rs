use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use configsync::{
    ApplyOutcome, Clock, LoopbackMessage, LoopbackNetwork, NodeEvent, PeerId, SyncEvent,
    SyncNode, SystemClock,
};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};
use crate::plugin::{MOD_NAME, PluginConfig};
use crate::store::JsonFileStore;

const SERVER: PeerId = PeerId::SERVER;
const INVALID_RECIPE: &str = "Wood,many,5";

struct SimulatedClient {
    node: SyncNode,
    plugin: PluginConfig,
    host_name: String,
}

/// Hosts the status effects config on an in-process network and drives a
/// set of simulated clients through login, edits and timeouts.
pub struct ConfigServer {
    config: ServerConfig,
    clock: Arc<SystemClock>,
    network: LoopbackNetwork,
    host: SyncNode,
    plugin: PluginConfig,
    clients: BTreeMap<PeerId, SimulatedClient>,
    tick: u64,
    tick_duration: Duration,
    last_edit: Duration,
    edits: u64,
    running: Arc<AtomicBool>,
    pending_events: VecDeque<ServerEvent>,
}

impl ConfigServer {
    pub fn new(config: ServerConfig, store: Option<JsonFileStore>) -> anyhow::Result<Self> {
        let clock = Arc::new(SystemClock::new());
        let mut network = LoopbackNetwork::new(clock.clone());
        network.set_admins(config.admins.clone());

        let mut host = SyncNode::with_config(MOD_NAME, true, clock.clone(), config.sync.clone());
        let engine = host.create_engine(MOD_NAME);
        let plugin = PluginConfig::register(engine).context("Failed to register config entries")?;
        if let Some(store) = store {
            let loaded = plugin.load(engine, &store);
            log::info!("Loaded {} saved config values", loaded);
            engine.set_store(Box::new(store));
        }
        plugin.validate_recipe(engine);
        log::info!("Serving {}", plugin.describe(engine));

        let tick_duration = Duration::from_secs_f64(1.0 / config.tick_rate.max(1) as f64);
        let mut server = Self {
            clock,
            network,
            host,
            plugin,
            clients: BTreeMap::new(),
            tick: 0,
            tick_duration,
            last_edit: Duration::ZERO,
            edits: 0,
            running: Arc::new(AtomicBool::new(true)),
            pending_events: VecDeque::new(),
            config,
        };

        for id in 1..=server.config.client_count {
            server.add_client(id)?;
        }
        Ok(server)
    }

    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    fn add_client(&mut self, id: u64) -> anyhow::Result<()> {
        let peer = PeerId(id);
        let host_name = format!("client-{}", id);

        let mut node =
            SyncNode::with_config(MOD_NAME, false, self.clock.clone(), self.config.sync.clone());
        let plugin = PluginConfig::register(node.create_engine(MOD_NAME))
            .with_context(|| format!("Failed to register config entries for {}", host_name))?;
        node.connect_to_server(SERVER);

        self.network.set_host_name(peer, host_name.clone());
        if let Some(simulation) = &self.config.global_packet_loss {
            self.network.set_simulation(peer, simulation.clone());
        }
        if self.config.stalled_client == Some(id) {
            self.network.set_send_queue(SERVER, peer, Some(usize::MAX));
        }
        self.network.connect(SERVER, peer);

        let mut link = self.network.link(SERVER);
        self.host.peer_connected(&mut link, peer);
        self.host
            .send_game_message(&mut link, peer, "PeerInfo", host_name.clone().into_bytes());
        self.host.version_match(&mut link, peer);
        node.request_admin_status(&mut self.network.link(peer));

        self.pending_events.push_back(ServerEvent::ClientJoined {
            peer,
            host_name: host_name.clone(),
        });
        self.clients.insert(
            peer,
            SimulatedClient {
                node,
                plugin,
                host_name,
            },
        );
        Ok(())
    }

    pub fn tick_once(&mut self) {
        self.tick += 1;

        for message in self.network.deliver() {
            self.route(message);
        }

        self.host.tick(&mut self.network.link(SERVER));
        for (&peer, client) in self.clients.iter_mut() {
            client.node.tick(&mut self.network.link(peer));
        }

        self.collect_events();
        self.handle_disconnects();

        if !self.config.edit_interval.is_zero()
            && self.clock.now() >= self.last_edit + self.config.edit_interval
        {
            self.last_edit = self.clock.now();
            self.edit_config();
        }
    }

    fn route(&mut self, message: LoopbackMessage) {
        let LoopbackMessage {
            from,
            to,
            channel,
            payload,
        } = message;

        let outcome = if to == SERVER {
            self.host
                .handle_message(&mut self.network.link(SERVER), from, &channel, &payload)
        } else if let Some(client) = self.clients.get_mut(&to) {
            client
                .node
                .handle_message(&mut self.network.link(to), from, &channel, &payload)
        } else {
            return;
        };

        match outcome {
            Some(ApplyOutcome::Applied(report)) => {
                self.pending_events.push_back(ServerEvent::ConfigApplied {
                    receiver: to,
                    entries: report.entries.len(),
                });
                for skipped in &report.skipped {
                    log::warn!("Node {} skipped a config entry: {}", to, skipped);
                }
            }
            Some(ApplyOutcome::Incomplete {
                package_id,
                received,
                expected,
            }) => {
                log::debug!(
                    "Node {} holds {}/{} fragments of package {}",
                    to,
                    received,
                    expected,
                    package_id
                );
            }
            Some(ApplyOutcome::Rejected(error)) | Some(ApplyOutcome::Discarded(error)) => {
                log::warn!("Node {} dropped config from {}: {}", to, from, error);
            }
            None => log::debug!("Node {} received {} from {}", to, channel, from),
        }
    }

    fn collect_events(&mut self) {
        let host_events: Vec<NodeEvent> = self.host.drain_events().collect();
        for event in host_events {
            self.handle_node_event(SERVER, event);
        }

        let client_events: Vec<(PeerId, NodeEvent)> = self
            .clients
            .iter_mut()
            .flat_map(|(&peer, client)| client.node.drain_events().map(move |event| (peer, event)))
            .collect();
        for (peer, event) in client_events {
            self.handle_node_event(peer, event);
        }
    }

    fn handle_node_event(&mut self, node: PeerId, event: NodeEvent) {
        match event {
            NodeEvent::Registry { event, .. } => {
                let recheck = match &event {
                    SyncEvent::ValuesApplied { entries, .. }
                    | SyncEvent::ValuesRestored { entries, .. } => {
                        self.plugin.touches_recipe(entries)
                    }
                    SyncEvent::LockedConfigChanged => true,
                    SyncEvent::AuthorityChanged { authoritative } => {
                        log::debug!("Node {} authoritative: {}", node, authoritative);
                        false
                    }
                };
                if recheck && self.validate_recipe(node) {
                    self.pending_events.push_back(ServerEvent::RecipeReset { node });
                }
            }
            NodeEvent::PeerTimedOut(peer) => {
                self.pending_events.push_back(ServerEvent::ClientLeft {
                    peer,
                    reason: DisconnectReason::Timeout,
                });
            }
            NodeEvent::LoginSyncComplete(peer) => {
                self.pending_events
                    .push_back(ServerEvent::ClientSynced { peer });
            }
            NodeEvent::AdminStatusChanged { is_admin } => {
                self.pending_events
                    .push_back(ServerEvent::AdminStatus { peer: node, is_admin });
            }
        }
    }

    fn validate_recipe(&mut self, node: PeerId) -> bool {
        let (engine, plugin) = if node == SERVER {
            (self.host.engine_mut(MOD_NAME), self.plugin)
        } else {
            match self.clients.get_mut(&node) {
                Some(client) => (client.node.engine_mut(MOD_NAME), client.plugin),
                None => return false,
            }
        };
        engine.is_some_and(|engine| plugin.validate_recipe(engine))
    }

    fn handle_disconnects(&mut self) {
        for (closed_by, other) in self.network.take_disconnects() {
            let peer = if closed_by == SERVER { other } else { closed_by };
            self.host.peer_disconnected(peer);
            if let Some(mut client) = self.clients.remove(&peer) {
                client.node.server_disconnected();
                log::debug!(
                    "Dropped {} with {} pending events",
                    client.host_name,
                    client.node.drain_events().count()
                );
            }
        }
    }

    /// Alternates taunt duration edits with an unparsable recipe. Admin
    /// clients reset it on arrival and send the default back; the server
    /// also repairs it on its next edit.
    fn edit_config(&mut self) {
        self.edits += 1;
        let plugin = self.plugin;
        let Some(engine) = self.host.engine_mut(MOD_NAME) else {
            return;
        };

        let result = if self.edits % 4 == 0 {
            engine.set_value(plugin.taunt_hammer_recipe, INVALID_RECIPE.to_string())
        } else {
            plugin.validate_recipe(engine);
            engine.set_value(plugin.taunt_duration, 15.0 + (self.edits % 5) as f32)
        };
        if let Err(error) = result {
            log::warn!("Server config edit failed: {}", error);
        }
    }

    /// Closes every client connection. Clients fall back to their local
    /// values.
    pub fn shutdown(&mut self) {
        let peers: Vec<PeerId> = self.clients.keys().copied().collect();
        for peer in peers {
            self.network.sever(SERVER, peer);
            self.host.peer_disconnected(peer);
            if let Some(client) = self.clients.get_mut(&peer) {
                client.node.server_disconnected();
            }
            self.pending_events.push_back(ServerEvent::ClientLeft {
                peer,
                reason: DisconnectReason::Graceful,
            });
        }
        self.collect_events();
        self.clients.clear();
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            tick: self.tick,
            uptime_secs: self.clock.now().as_secs_f64(),
            clients: self.clients.len(),
            logging_in: self
                .clients
                .keys()
                .filter(|peer| self.host.is_logging_in(**peer))
                .count(),
            deliveries_in_flight: self.host.deliveries_in_flight(),
            messages_in_flight: self.network.in_flight(),
            messages_dropped: self.network.dropped(),
            config_edits: self.edits,
            config: self
                .host
                .engine(MOD_NAME)
                .map(|engine| self.plugin.describe(engine))
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub tick: u64,
    pub uptime_secs: f64,
    pub clients: usize,
    pub logging_in: usize,
    pub deliveries_in_flight: usize,
    pub messages_in_flight: usize,
    pub messages_dropped: u64,
    pub config_edits: u64,
    pub config: String,
}

#[cfg(test)]
mod tests {
    use configsync::SyncEngine;

    use super::*;

    impl ConfigServer {
        fn host_engine(&self) -> &SyncEngine {
            self.host.engine(MOD_NAME).unwrap()
        }

        fn client_engine(&self, peer: PeerId) -> Option<&SyncEngine> {
            self.clients.get(&peer)?.node.engine(MOD_NAME)
        }
    }

    fn run_ticks(server: &mut ConfigServer, ticks: usize) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        for _ in 0..ticks {
            server.tick_once();
            events.extend(server.drain_events());
        }
        events
    }

    fn quiet_config() -> ServerConfig {
        ServerConfig {
            client_count: 2,
            admins: vec!["client-2".into()],
            edit_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_clients_finish_login_sync() {
        let mut server = ConfigServer::new(quiet_config(), None).unwrap();
        let events = run_ticks(&mut server, 10);

        let synced = events
            .iter()
            .filter(|event| matches!(event, ServerEvent::ClientSynced { .. }))
            .count();
        assert_eq!(synced, 2);
        for peer in [PeerId(1), PeerId(2)] {
            let engine = server.client_engine(peer).unwrap();
            assert!(engine.initial_sync_done());
            assert_eq!(engine.server_version(), Some("1.0.0"));
        }
        assert!(events.iter().any(|event| matches!(
            event,
            ServerEvent::AdminStatus {
                peer: PeerId(2),
                is_admin: true
            }
        )));
    }

    #[test]
    fn test_server_edits_reach_clients() {
        let mut server = ConfigServer::new(quiet_config(), None).unwrap();
        run_ticks(&mut server, 10);

        server.edit_config();
        let events = run_ticks(&mut server, 5);

        let plugin = server.plugin;
        assert_eq!(server.host_engine().value(plugin.taunt_duration), Some(16.0));
        for peer in [PeerId(1), PeerId(2)] {
            let engine = server.client_engine(peer).unwrap();
            assert_eq!(engine.value(plugin.taunt_duration), Some(16.0));
        }
        assert!(events.iter().any(|event| matches!(
            event,
            ServerEvent::ConfigApplied {
                receiver: PeerId(1),
                entries: 1
            }
        )));
    }

    #[test]
    fn test_invalid_recipe_is_reset_by_clients() {
        let mut server = ConfigServer::new(quiet_config(), None).unwrap();
        run_ticks(&mut server, 10);

        server.edits = 3;
        server.edit_config();
        let events = run_ticks(&mut server, 10);

        let resets: Vec<PeerId> = events
            .iter()
            .filter_map(|event| match event {
                ServerEvent::RecipeReset { node } => Some(*node),
                _ => None,
            })
            .collect();
        assert_eq!(resets, vec![PeerId(2)]);

        let plugin = server.plugin;
        assert_eq!(
            server.host_engine().value(plugin.taunt_hammer_recipe).as_deref(),
            Some(crate::plugin::DEFAULT_RECIPE)
        );
        for peer in [PeerId(1), PeerId(2)] {
            assert_eq!(
                server
                    .client_engine(peer)
                    .unwrap()
                    .value(plugin.taunt_hammer_recipe)
                    .as_deref(),
                Some(crate::plugin::DEFAULT_RECIPE)
            );
        }
    }

    #[test]
    fn test_shutdown_disconnects_every_client() {
        let mut server = ConfigServer::new(quiet_config(), None).unwrap();
        run_ticks(&mut server, 10);
        server.shutdown();

        let left = server
            .drain_events()
            .filter(|event| {
                matches!(
                    event,
                    ServerEvent::ClientLeft {
                        reason: DisconnectReason::Graceful,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(left, 2);
        assert_eq!(server.stats().clients, 0);
    }
}
