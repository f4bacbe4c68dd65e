use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::transport::{Clock, PeerId, PeerLink};

/// Channel on which [`PeerLink::version_match`] shows up in the loopback.
pub const VERSION_MATCH_CHANNEL: &str = "VersionMatch";

#[derive(Debug, Clone, Default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
}

impl PacketLossSimulation {
    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rand_percent() * 100.0 < self.loss_percent
    }

    pub fn delay_ms(&self) -> u32 {
        if !self.enabled || self.max_latency_ms == 0 {
            return 0;
        }
        let base = self.min_latency_ms;
        let range = self.max_latency_ms.saturating_sub(self.min_latency_ms);
        let jitter = if self.jitter_ms > 0 {
            (rand_percent() * self.jitter_ms as f32) as u32
        } else {
            0
        };
        base + (rand_percent() * range as f32) as u32 + jitter
    }
}

fn rand_percent() -> f32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default(),
    );
    (hasher.finish() % 10000) as f32 / 10000.0
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackMessage {
    pub from: PeerId,
    pub to: PeerId,
    pub channel: String,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct DelayedMessage {
    release_time: Duration,
    sequence: u64,
    message: LoopbackMessage,
}

impl PartialEq for DelayedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time && self.sequence == other.sequence
    }
}

impl Eq for DelayedMessage {}

impl PartialOrd for DelayedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other
            .release_time
            .cmp(&self.release_time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// In-memory message network for tests and the soak binary. Messages are
/// held until [`LoopbackNetwork::deliver`] and their bytes count towards the
/// sender's send queue until then.
pub struct LoopbackNetwork {
    clock: Arc<dyn Clock>,
    connections: BTreeSet<(PeerId, PeerId)>,
    unready: BTreeSet<PeerId>,
    host_names: HashMap<PeerId, String>,
    admins: Vec<String>,
    simulations: HashMap<PeerId, PacketLossSimulation>,
    queue_overrides: HashMap<(PeerId, PeerId), usize>,
    in_flight: BinaryHeap<DelayedMessage>,
    next_sequence: u64,
    disconnects: Vec<(PeerId, PeerId)>,
    dropped: u64,
}

impl LoopbackNetwork {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            connections: BTreeSet::new(),
            unready: BTreeSet::new(),
            host_names: HashMap::new(),
            admins: Vec::new(),
            simulations: HashMap::new(),
            queue_overrides: HashMap::new(),
            in_flight: BinaryHeap::new(),
            next_sequence: 0,
            disconnects: Vec::new(),
            dropped: 0,
        }
    }

    fn pair(a: PeerId, b: PeerId) -> (PeerId, PeerId) {
        if a <= b { (a, b) } else { (b, a) }
    }

    pub fn connect(&mut self, a: PeerId, b: PeerId) {
        self.connections.insert(Self::pair(a, b));
    }

    /// Drops the connection without recording it as a link disconnect.
    pub fn sever(&mut self, a: PeerId, b: PeerId) {
        self.connections.remove(&Self::pair(a, b));
    }

    pub fn is_connected(&self, a: PeerId, b: PeerId) -> bool {
        self.connections.contains(&Self::pair(a, b))
    }

    pub fn set_ready(&mut self, peer: PeerId, ready: bool) {
        if ready {
            self.unready.remove(&peer);
        } else {
            self.unready.insert(peer);
        }
    }

    pub fn set_host_name(&mut self, peer: PeerId, host_name: impl Into<String>) {
        self.host_names.insert(peer, host_name.into());
    }

    pub fn set_admins(&mut self, admins: Vec<String>) {
        self.admins = admins;
    }

    pub fn set_simulation(&mut self, peer: PeerId, simulation: PacketLossSimulation) {
        if simulation.enabled {
            self.simulations.insert(peer, simulation);
        } else {
            self.simulations.remove(&peer);
        }
    }

    /// Pins the reported send queue depth from `from` to `to`.
    pub fn set_send_queue(&mut self, from: PeerId, to: PeerId, bytes: Option<usize>) {
        match bytes {
            Some(bytes) => {
                self.queue_overrides.insert((from, to), bytes);
            }
            None => {
                self.queue_overrides.remove(&(from, to));
            }
        }
    }

    pub fn link(&mut self, local: PeerId) -> LoopbackLink<'_> {
        LoopbackLink {
            network: self,
            local,
        }
    }

    /// Messages whose release time has passed, in send order.
    pub fn deliver(&mut self) -> Vec<LoopbackMessage> {
        let now = self.clock.now();
        let mut messages = Vec::new();
        while let Some(delayed) = self.in_flight.peek() {
            if delayed.release_time > now {
                break;
            }
            let Some(delayed) = self.in_flight.pop() else {
                break;
            };
            if self.is_connected(delayed.message.from, delayed.message.to) {
                messages.push(delayed.message);
            }
        }
        messages
    }

    /// Connections closed through a link since the last call, as
    /// (closed by, other side).
    pub fn take_disconnects(&mut self) -> Vec<(PeerId, PeerId)> {
        std::mem::take(&mut self.disconnects)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn queued_bytes(&self, from: PeerId, to: PeerId) -> usize {
        if let Some(bytes) = self.queue_overrides.get(&(from, to)) {
            return *bytes;
        }
        self.in_flight
            .iter()
            .filter(|delayed| delayed.message.from == from && delayed.message.to == to)
            .map(|delayed| delayed.message.payload.len())
            .sum()
    }

    fn enqueue(&mut self, message: LoopbackMessage) {
        let simulation = self.simulations.get(&message.to);
        if simulation.is_some_and(|sim| sim.should_drop()) {
            self.dropped += 1;
            return;
        }
        let delay = simulation.map_or(Duration::ZERO, |sim| {
            Duration::from_millis(sim.delay_ms() as u64)
        });
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.in_flight.push(DelayedMessage {
            release_time: self.clock.now() + delay,
            sequence,
            message,
        });
    }
}

pub struct LoopbackLink<'a> {
    network: &'a mut LoopbackNetwork,
    local: PeerId,
}

impl PeerLink for LoopbackLink<'_> {
    fn peers(&self) -> Vec<PeerId> {
        self.network
            .connections
            .iter()
            .filter_map(|&(a, b)| match (a == self.local, b == self.local) {
                (true, false) => Some(b),
                (false, true) => Some(a),
                _ => None,
            })
            .collect()
    }

    fn is_ready(&self, peer: PeerId) -> bool {
        self.is_connected(peer) && !self.network.unready.contains(&peer)
    }

    fn is_connected(&self, peer: PeerId) -> bool {
        self.network.is_connected(self.local, peer)
    }

    fn send_queue_size(&self, peer: PeerId) -> usize {
        self.network.queued_bytes(self.local, peer)
    }

    fn send(&mut self, peer: PeerId, channel: &str, payload: Vec<u8>) {
        if !self.is_connected(peer) {
            log::debug!("Dropping {} bytes to unconnected peer {}", payload.len(), peer);
            return;
        }
        self.network.enqueue(LoopbackMessage {
            from: self.local,
            to: peer,
            channel: channel.to_string(),
            payload,
        });
    }

    fn disconnect(&mut self, peer: PeerId) {
        if self.network.is_connected(self.local, peer) {
            self.network.sever(self.local, peer);
            self.network.disconnects.push((self.local, peer));
        }
    }

    fn admin_list(&self) -> Vec<String> {
        self.network.admins.clone()
    }

    fn is_admin(&self, peer: PeerId) -> bool {
        self.network
            .host_names
            .get(&peer)
            .is_some_and(|host| self.network.admins.contains(host))
    }

    fn version_match(&mut self, peer: PeerId) {
        self.send(peer, VERSION_MATCH_CHANNEL, Vec::new());
    }
}
