use std::time::Duration;

pub const COMPRESSION_THRESHOLD: usize = 10_000;
pub const FRAGMENT_SIZE: usize = 250_000;
pub const SEND_QUEUE_LIMIT: usize = 20_000;
pub const SEND_TIMEOUT_SECS: u64 = 30;
pub const FRAGMENT_EXPIRY_SECS: u64 = 60;
pub const ADMIN_POLL_SECS: u64 = 30;

/// Protocol limits shared by every registry on a node.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Packages larger than this are deflated before sending.
    pub compression_threshold: usize,
    pub fragment_size: usize,
    /// Peer send-queue depth above which delivery waits.
    pub send_queue_limit: usize,
    pub send_timeout: Duration,
    pub fragment_expiry: Duration,
    pub admin_poll_interval: Duration,
    pub max_decompressed_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            compression_threshold: COMPRESSION_THRESHOLD,
            fragment_size: FRAGMENT_SIZE,
            send_queue_limit: SEND_QUEUE_LIMIT,
            send_timeout: Duration::from_secs(SEND_TIMEOUT_SECS),
            fragment_expiry: Duration::from_secs(FRAGMENT_EXPIRY_SECS),
            admin_poll_interval: Duration::from_secs(ADMIN_POLL_SECS),
            max_decompressed_size: 64 * 1024 * 1024,
        }
    }
}
