use std::time::Duration;

use crate::codec::Package;
use crate::transport::{PeerId, PeerLink};

pub fn admin_channel_name(mod_name: &str) -> String {
    format!("{} AdminStatusSync", mod_name)
}

pub fn encode_status(is_admin: bool) -> Vec<u8> {
    let mut package = Package::new();
    package.write_bool(is_admin);
    package.into_bytes()
}

/// Unreadable payloads count as "not admin".
pub fn decode_status(payload: &[u8]) -> bool {
    Package::from_bytes(payload.to_vec())
        .read_bool()
        .unwrap_or(false)
}

/// Server side: polls the admin list and tells every peer its status when
/// the list changes.
#[derive(Debug)]
pub struct AdminWatcher {
    channel: String,
    interval: Duration,
    next_poll: Option<Duration>,
    known: Vec<String>,
}

impl AdminWatcher {
    pub fn new(mod_name: &str, interval: Duration) -> Self {
        Self {
            channel: admin_channel_name(mod_name),
            interval,
            next_poll: None,
            known: Vec::new(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Returns the number of peers notified.
    pub fn poll(&mut self, link: &mut dyn PeerLink, now: Duration) -> usize {
        let Some(next_poll) = self.next_poll else {
            self.known = link.admin_list();
            self.next_poll = Some(now + self.interval);
            return 0;
        };
        if now < next_poll {
            return 0;
        }
        self.next_poll = Some(now + self.interval);

        let current = link.admin_list();
        if current == self.known {
            return 0;
        }
        self.known = current;
        log::info!("Admin list changed, sending admin status to peers");

        let mut notified = 0;
        for peer in link.peers() {
            if !link.is_ready(peer) {
                continue;
            }
            let is_admin = link.is_admin(peer);
            link.send(peer, &self.channel, encode_status(is_admin));
            notified += 1;
        }
        notified
    }

    /// A client asked for its status; only admins get an answer.
    pub fn answer_request(&self, link: &mut dyn PeerLink, peer: PeerId) -> bool {
        if !link.is_admin(peer) {
            return false;
        }
        link.send(peer, &self.channel, encode_status(true));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_payload_is_one_byte() {
        assert_eq!(encode_status(true), vec![1]);
        assert!(decode_status(&[1]));
        assert!(!decode_status(&[0]));
        assert!(!decode_status(&[]));
    }
}
