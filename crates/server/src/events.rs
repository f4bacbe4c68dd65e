use std::fmt;

use configsync::PeerId;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientJoined {
        peer: PeerId,
        host_name: String,
    },
    ClientSynced {
        peer: PeerId,
    },
    ClientLeft {
        peer: PeerId,
        reason: DisconnectReason,
    },
    ConfigApplied {
        receiver: PeerId,
        entries: usize,
    },
    RecipeReset {
        node: PeerId,
    },
    AdminStatus {
        peer: PeerId,
        is_admin: bool,
    },
}

#[derive(Debug, Clone, Copy)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
        }
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::ClientJoined { peer, host_name } => {
                write!(f, "Client {} connected as {}", peer, host_name)
            }
            ServerEvent::ClientSynced { peer } => write!(f, "Client {} finished config sync", peer),
            ServerEvent::ClientLeft { peer, reason } => {
                write!(f, "Client {} {}", peer, reason.as_str())
            }
            ServerEvent::ConfigApplied { receiver, entries } => {
                write!(f, "Node {} applied {} config entries", receiver, entries)
            }
            ServerEvent::RecipeReset { node } => {
                write!(f, "Node {} reset an invalid recipe to its default", node)
            }
            ServerEvent::AdminStatus { peer, is_admin } => write!(
                f,
                "Client {} is {}",
                peer,
                if *is_admin { "an admin" } else { "not an admin" }
            ),
        }
    }
}
