use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::admin::{self, AdminWatcher};
use crate::config::SyncConfig;
use crate::engine::{ApplyOutcome, SyncContext, SyncEngine, SyncEvent};
use crate::error::SyncError;
use crate::transport::{
    BatchId, Clock, DEFAULT_BUFFERED_CHANNELS, DeliveryResult, DeliveryScheduler, LoginBuffer,
    PeerId, PeerLink,
};

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Registry { name: String, event: SyncEvent },
    PeerTimedOut(PeerId),
    /// Every registry reached the peer and its held traffic was released.
    LoginSyncComplete(PeerId),
    AdminStatusChanged { is_admin: bool },
}

#[derive(Debug)]
struct LoginProgress {
    next_engine: usize,
    batch: Option<BatchId>,
    buffer: LoginBuffer,
}

/// All registries of one process plus the delivery machinery they share.
pub struct SyncNode {
    mod_name: String,
    context: Arc<SyncContext>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    engines: Vec<SyncEngine>,
    scheduler: DeliveryScheduler,
    server: Option<PeerId>,
    logins: BTreeMap<PeerId, LoginProgress>,
    buffered_channels: HashSet<String>,
    admin_watcher: AdminWatcher,
    events: VecDeque<NodeEvent>,
}

impl SyncNode {
    pub fn new(mod_name: impl Into<String>, is_server: bool, clock: Arc<dyn Clock>) -> Self {
        Self::with_config(mod_name, is_server, clock, SyncConfig::default())
    }

    pub fn with_config(
        mod_name: impl Into<String>,
        is_server: bool,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let mod_name = mod_name.into();
        let context = Arc::new(SyncContext::new(is_server));
        Self {
            admin_watcher: AdminWatcher::new(&mod_name, config.admin_poll_interval),
            scheduler: DeliveryScheduler::new(config.clone(), Arc::clone(&context)),
            mod_name,
            context,
            config,
            clock,
            engines: Vec::new(),
            server: None,
            logins: BTreeMap::new(),
            buffered_channels: DEFAULT_BUFFERED_CHANNELS
                .iter()
                .map(|channel| channel.to_string())
                .collect(),
            events: VecDeque::new(),
        }
    }

    pub fn mod_name(&self) -> &str {
        &self.mod_name
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.context
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn set_buffered_channels<I, S>(&mut self, channels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.buffered_channels = channels.into_iter().map(Into::into).collect();
    }

    /// Creates a registry sharing this node's context. Login sync sends
    /// registries in creation order.
    pub fn create_engine(&mut self, name: impl Into<String>) -> &mut SyncEngine {
        let engine = SyncEngine::with_config(name, Arc::clone(&self.context), self.config.clone());
        self.engines.push(engine);
        let last = self.engines.len() - 1;
        &mut self.engines[last]
    }

    pub fn engine(&self, name: &str) -> Option<&SyncEngine> {
        self.engines.iter().find(|engine| engine.name() == name)
    }

    pub fn engine_mut(&mut self, name: &str) -> Option<&mut SyncEngine> {
        self.engines.iter_mut().find(|engine| engine.name() == name)
    }

    pub fn engines(&self) -> &[SyncEngine] {
        &self.engines
    }

    pub fn admin_channel(&self) -> &str {
        self.admin_watcher.channel()
    }

    pub fn is_logging_in(&self, peer: PeerId) -> bool {
        self.logins.contains_key(&peer)
    }

    pub fn deliveries_in_flight(&self) -> usize {
        self.scheduler.in_flight()
    }

    /// Client side: packages from `server` are treated as authoritative.
    pub fn connect_to_server(&mut self, server: PeerId) {
        self.server = Some(server);
    }

    pub fn server_disconnected(&mut self) {
        self.server = None;
        for engine in &mut self.engines {
            engine.server_connection_lost();
        }
        self.collect_engine_events();
    }

    /// Server side: starts the login sync for a new peer.
    pub fn peer_connected(&mut self, link: &mut dyn PeerLink, peer: PeerId) {
        if !self.context.is_server() {
            return;
        }
        self.logins.insert(
            peer,
            LoginProgress {
                next_engine: 0,
                batch: None,
                buffer: LoginBuffer::new(),
            },
        );
        let now = self.clock.now();
        self.advance_login(link, peer, now);
    }

    pub fn peer_disconnected(&mut self, peer: PeerId) {
        if self.logins.remove(&peer).is_some() {
            log::debug!("Peer {} left during login sync", peer);
        }
    }

    /// Sends game traffic, holding it back while the peer's login sync runs.
    pub fn send_game_message(
        &mut self,
        link: &mut dyn PeerLink,
        peer: PeerId,
        channel: &str,
        payload: Vec<u8>,
    ) {
        match self.logins.get_mut(&peer) {
            Some(login) if self.buffered_channels.contains(channel) => {
                login.buffer.push_message(channel, payload);
            }
            _ => link.send(peer, channel, payload),
        }
    }

    pub fn version_match(&mut self, link: &mut dyn PeerLink, peer: PeerId) {
        match self.logins.get_mut(&peer) {
            Some(login) => login.buffer.push_version_match(),
            None => link.version_match(peer),
        }
    }

    /// Client side: asks the server whether this node is an admin.
    pub fn request_admin_status(&mut self, link: &mut dyn PeerLink) {
        if let Some(server) = self.server {
            let channel = self.admin_watcher.channel().to_string();
            link.send(server, &channel, admin::encode_status(false));
        }
    }

    /// Routes an incoming message. Returns the apply outcome for config
    /// channels, `None` for anything else.
    pub fn handle_message(
        &mut self,
        link: &mut dyn PeerLink,
        from: PeerId,
        channel: &str,
        payload: &[u8],
    ) -> Option<ApplyOutcome> {
        if channel == self.admin_watcher.channel() {
            self.handle_admin_status(link, from, payload);
            return None;
        }

        let now = self.clock.now();
        let from_server = !self.context.is_server() && self.server == Some(from);
        let engine = self
            .engines
            .iter_mut()
            .find(|engine| engine.channel_name() == channel)?;
        let outcome = if from_server {
            engine.handle_server_package(payload, now)
        } else {
            let admins = |peer: PeerId| link.is_admin(peer);
            engine.handle_peer_package(from, payload, now, &admins)
        };

        if self.context.is_server() {
            if let Some(report) = outcome.report().filter(|report| !report.is_empty()) {
                let targets: Vec<PeerId> =
                    link.peers().into_iter().filter(|&peer| peer != from).collect();
                if !targets.is_empty() {
                    let relayed = engine
                        .build_package(&report.entries, &report.custom_values, &[], true)
                        .map_err(SyncError::from)
                        .and_then(|package| {
                            self.scheduler
                                .send(link, &targets, channel, package.into_bytes(), now)
                                .map_err(SyncError::from)
                        });
                    if let Err(error) = relayed {
                        log::warn!(
                            "Failed to relay config from client {} for mod {}: {}",
                            from,
                            engine.display_name(),
                            error
                        );
                    }
                }
            }
        }
        self.collect_engine_events();
        Some(outcome)
    }

    /// One scheduler step: advances deliveries, flushes local edits, moves
    /// login syncs along and polls the admin list.
    pub fn tick(&mut self, link: &mut dyn PeerLink) {
        let now = self.clock.now();
        self.scheduler.tick(link, now);
        for report in self.scheduler.drain_finished() {
            if report.result == DeliveryResult::TimedOut {
                log::warn!("{}", SyncError::PeerTimeout(report.peer));
                self.events.push_back(NodeEvent::PeerTimedOut(report.peer));
            }
        }

        self.broadcast_local_changes(link, now);

        let peers: Vec<PeerId> = self.logins.keys().copied().collect();
        for peer in peers {
            self.advance_login(link, peer, now);
        }

        if self.context.is_server() {
            self.admin_watcher.poll(link, now);
        }
        self.collect_engine_events();
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = NodeEvent> + '_ {
        self.events.drain(..)
    }

    fn broadcast_local_changes(&mut self, link: &mut dyn PeerLink, now: Duration) {
        for engine in &mut self.engines {
            let Some(package) = engine.take_broadcast() else {
                continue;
            };
            let targets = link.peers();
            if let Err(error) =
                self.scheduler
                    .send(link, &targets, &engine.channel_name(), package, now)
            {
                log::warn!("Failed to send config for mod {}: {}", engine.display_name(), error);
            }
        }
    }

    /// Starts the next registry once the previous one has been delivered,
    /// and releases held traffic after the last.
    fn advance_login(&mut self, link: &mut dyn PeerLink, peer: PeerId, now: Duration) {
        let Some(login) = self.logins.get_mut(&peer) else {
            return;
        };
        if login.batch.is_some_and(|batch| self.scheduler.is_pending(batch)) {
            return;
        }
        if !link.is_connected(peer) {
            self.logins.remove(&peer);
            return;
        }

        if login.next_engine >= self.engines.len() {
            if let Some(login) = self.logins.remove(&peer) {
                let released = login.buffer.release(link, peer);
                log::info!(
                    "Config sync to {} complete, released {} held messages",
                    peer,
                    released
                );
                self.events.push_back(NodeEvent::LoginSyncComplete(peer));
            }
            return;
        }

        let engine = &self.engines[login.next_engine];
        login.next_engine += 1;
        let package = match engine.login_package(link.is_admin(peer)) {
            Ok(package) => package,
            Err(error) => {
                log::warn!(
                    "Failed to build login package for mod {}: {}",
                    engine.display_name(),
                    error
                );
                return;
            }
        };
        match self
            .scheduler
            .send(link, &[peer], &engine.channel_name(), package.into_bytes(), now)
        {
            Ok(batch) => login.batch = Some(batch),
            Err(error) => log::warn!(
                "Failed to send login config for mod {} to {}: {}",
                engine.display_name(),
                peer,
                error
            ),
        }
    }

    fn handle_admin_status(&mut self, link: &mut dyn PeerLink, from: PeerId, payload: &[u8]) {
        if self.context.is_server() {
            self.admin_watcher.answer_request(link, from);
            return;
        }

        if self.server != Some(from) {
            log::debug!("Ignoring admin status for mod {} from peer {}", self.mod_name, from);
            return;
        }

        let is_admin = admin::decode_status(payload);
        self.context.set_lock_exempt(is_admin);
        log::info!(
            "Admin status for mod {} is now {}",
            self.mod_name,
            if is_admin { "admin" } else { "not admin" }
        );
        for engine in &mut self.engines {
            engine.refresh_read_only();
        }
        self.events
            .push_back(NodeEvent::AdminStatusChanged { is_admin });
    }

    fn collect_engine_events(&mut self) {
        for engine in &mut self.engines {
            let name = engine.name().to_string();
            self.events.extend(engine.drain_events().map(|event| NodeEvent::Registry {
                name: name.clone(),
                event,
            }));
        }
    }
}
