use std::collections::VecDeque;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use super::compress;
use super::link::{PeerId, PeerLink};
use crate::codec::{Package, PackageFlags};
use crate::config::SyncConfig;
use crate::engine::SyncContext;
use crate::error::CompressionError;

/// Groups the per-peer tasks created by one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered,
    /// Peer went away before everything was sent.
    Aborted,
    /// Send queue stayed full too long; the peer was disconnected.
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub batch: BatchId,
    pub peer: PeerId,
    pub result: DeliveryResult,
}

/// Deflates `package` into a compressed message when it is larger than the
/// compression threshold.
pub fn prepare_payload(package: Vec<u8>, config: &SyncConfig) -> Result<Vec<u8>, CompressionError> {
    if package.len() <= config.compression_threshold {
        return Ok(package);
    }
    let compressed = compress::deflate(&package)?;
    let mut message = Package::new();
    message.write_flags(PackageFlags::COMPRESSED);
    message.write_bytes(&compressed);
    log::debug!(
        "Compressed config package from {} to {} bytes",
        package.len(),
        message.len()
    );
    Ok(message.into_bytes())
}

pub fn fragment_message(package_id: u64, index: usize, count: usize, chunk: &[u8]) -> Vec<u8> {
    let mut message = Package::new();
    message.write_flags(PackageFlags::FRAGMENTED);
    message.write_i64(package_id as i64);
    message.write_i32(index as i32);
    message.write_i32(count as i32);
    message.write_bytes(chunk);
    message.into_bytes()
}

/// Streams one payload to one peer, a fragment per step, waiting while the
/// peer's send queue is over the limit.
#[derive(Debug)]
pub struct PeerDelivery {
    peer: PeerId,
    channel: Arc<str>,
    payload: Arc<[u8]>,
    package_id: Option<u64>,
    fragment_size: usize,
    fragment_count: usize,
    next_fragment: usize,
    queue_limit: usize,
    timeout: Duration,
    wait_started: Option<Duration>,
}

impl PeerDelivery {
    pub fn new(
        peer: PeerId,
        channel: Arc<str>,
        payload: Arc<[u8]>,
        config: &SyncConfig,
        context: &SyncContext,
    ) -> Self {
        let fragment_size = config.fragment_size.max(1);
        let (package_id, fragment_count) = if payload.len() > fragment_size {
            (
                Some(context.next_package_id()),
                payload.len().div_ceil(fragment_size),
            )
        } else {
            (None, 1)
        };

        Self {
            peer,
            channel,
            payload,
            package_id,
            fragment_size,
            fragment_count,
            next_fragment: 0,
            queue_limit: config.send_queue_limit,
            timeout: config.send_timeout,
            wait_started: None,
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Set only when the payload is split into fragments.
    pub fn package_id(&self) -> Option<u64> {
        self.package_id
    }

    pub fn fragment_count(&self) -> usize {
        self.fragment_count
    }

    pub fn fragments_sent(&self) -> usize {
        self.next_fragment
    }

    pub fn poll(&mut self, link: &mut dyn PeerLink, now: Duration) -> Poll<DeliveryResult> {
        if !link.is_connected(self.peer) {
            log::debug!("Peer {} disconnected, dropping config delivery", self.peer);
            return Poll::Ready(DeliveryResult::Aborted);
        }

        if link.send_queue_size(self.peer) > self.queue_limit {
            let started = *self.wait_started.get_or_insert(now);
            if now.saturating_sub(started) >= self.timeout {
                log::info!(
                    "Disconnecting {} after {} seconds config sending timeout",
                    self.peer,
                    self.timeout.as_secs()
                );
                link.disconnect(self.peer);
                return Poll::Ready(DeliveryResult::TimedOut);
            }
            return Poll::Pending;
        }
        self.wait_started = None;

        let message = match self.package_id {
            Some(package_id) => {
                let start = self.next_fragment * self.fragment_size;
                let end = (start + self.fragment_size).min(self.payload.len());
                fragment_message(
                    package_id,
                    self.next_fragment,
                    self.fragment_count,
                    &self.payload[start..end],
                )
            }
            None => self.payload.to_vec(),
        };
        link.send(self.peer, &self.channel, message);
        self.next_fragment += 1;

        if self.next_fragment >= self.fragment_count {
            Poll::Ready(DeliveryResult::Delivered)
        } else {
            Poll::Pending
        }
    }
}

/// Runs delivery tasks interleaved, one step per task per tick.
#[derive(Debug)]
pub struct DeliveryScheduler {
    config: SyncConfig,
    context: Arc<SyncContext>,
    tasks: Vec<(BatchId, PeerDelivery)>,
    finished: VecDeque<DeliveryReport>,
    next_batch: u64,
}

impl DeliveryScheduler {
    pub fn new(config: SyncConfig, context: Arc<SyncContext>) -> Self {
        Self {
            config,
            context,
            tasks: Vec::new(),
            finished: VecDeque::new(),
            next_batch: 0,
        }
    }

    /// Starts delivering `package` to every ready peer in `targets`. Each
    /// task takes its first step immediately.
    pub fn send(
        &mut self,
        link: &mut dyn PeerLink,
        targets: &[PeerId],
        channel: &str,
        package: Vec<u8>,
        now: Duration,
    ) -> Result<BatchId, CompressionError> {
        let payload: Arc<[u8]> = prepare_payload(package, &self.config)?.into();
        let channel: Arc<str> = Arc::from(channel);
        let batch = BatchId(self.next_batch);
        self.next_batch += 1;

        for &peer in targets {
            if !link.is_ready(peer) {
                continue;
            }
            let mut task = PeerDelivery::new(
                peer,
                Arc::clone(&channel),
                Arc::clone(&payload),
                &self.config,
                &self.context,
            );
            match task.poll(link, now) {
                Poll::Ready(result) => self.finished.push_back(DeliveryReport {
                    batch,
                    peer,
                    result,
                }),
                Poll::Pending => self.tasks.push((batch, task)),
            }
        }
        Ok(batch)
    }

    pub fn tick(&mut self, link: &mut dyn PeerLink, now: Duration) {
        let finished = &mut self.finished;
        self.tasks.retain_mut(|(batch, task)| match task.poll(link, now) {
            Poll::Ready(result) => {
                finished.push_back(DeliveryReport {
                    batch: *batch,
                    peer: task.peer(),
                    result,
                });
                false
            }
            Poll::Pending => true,
        });
    }

    pub fn is_pending(&self, batch: BatchId) -> bool {
        self.tasks.iter().any(|(b, _)| *b == batch)
    }

    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn drain_finished(&mut self) -> impl Iterator<Item = DeliveryReport> + '_ {
        self.finished.drain(..)
    }
}
