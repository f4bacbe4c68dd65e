use super::link::{PeerId, PeerLink};

/// Game channels held back from a peer until its login sync is done.
pub const DEFAULT_BUFFERED_CHANNELS: [&str; 3] = ["PeerInfo", "RoutedRPC", "ZDOData"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferedItem {
    Message { channel: String, payload: Vec<u8> },
    VersionMatch,
}

/// Outbound traffic for one peer, queued while its config is sent.
#[derive(Debug, Default)]
pub struct LoginBuffer {
    items: Vec<BufferedItem>,
}

impl LoginBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_message(&mut self, channel: &str, payload: Vec<u8>) {
        self.items.push(BufferedItem::Message {
            channel: channel.to_string(),
            payload,
        });
    }

    /// Records the version match at its position in the queue.
    pub fn push_version_match(&mut self) {
        self.items.push(BufferedItem::VersionMatch);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sends everything in the order it was queued.
    pub fn release(self, link: &mut dyn PeerLink, peer: PeerId) -> usize {
        let count = self.items.len();
        for item in self.items {
            match item {
                BufferedItem::Message { channel, payload } => link.send(peer, &channel, payload),
                BufferedItem::VersionMatch => link.version_match(peer),
            }
        }
        count
    }
}
