use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Sender id used for packages arriving over the server connection.
    pub const SERVER: PeerId = PeerId(0);
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host networking layer as seen by the sync protocol. Peers are referenced
/// by id only; the host owns sockets and sessions.
pub trait PeerLink {
    fn peers(&self) -> Vec<PeerId>;
    fn is_ready(&self, peer: PeerId) -> bool;
    fn is_connected(&self, peer: PeerId) -> bool;
    /// Bytes waiting in the peer's outbound queue.
    fn send_queue_size(&self, peer: PeerId) -> usize;
    fn send(&mut self, peer: PeerId, channel: &str, payload: Vec<u8>);
    fn disconnect(&mut self, peer: PeerId);
    /// Current admin list, compared between polls to detect changes.
    fn admin_list(&self) -> Vec<String>;
    fn is_admin(&self, peer: PeerId) -> bool;

    /// Tells the peer its version was accepted.
    fn version_match(&mut self, _peer: PeerId) {}
}

/// Answers whether a sender may push config while the registry is locked.
pub trait AdminOracle {
    fn is_admin(&self, peer: PeerId) -> bool;
}

impl<F> AdminOracle for F
where
    F: Fn(PeerId) -> bool,
{
    fn is_admin(&self, peer: PeerId) -> bool {
        self(peer)
    }
}
