use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::error::SyncError;
use crate::transport::PeerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentProgress {
    Incomplete { received: usize, expected: usize },
    /// Every fragment arrived; the payload is concatenated in index order.
    Complete(Vec<u8>),
}

#[derive(Debug)]
struct PartialPackage {
    fragments: BTreeMap<u32, Vec<u8>>,
    expires_at: Duration,
}

/// Reassembles fragmented packages per (sender, package id).
#[derive(Debug)]
pub struct FragmentCache {
    pending: HashMap<(PeerId, u64), PartialPackage>,
    expiry: Duration,
}

impl FragmentCache {
    pub fn new(expiry: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            expiry,
        }
    }

    /// Drops incomplete packages whose expiry time has been reached.
    pub fn expire(&mut self, now: Duration) -> usize {
        let before = self.pending.len();
        self.pending.retain(|(sender, id), partial| {
            let keep = now < partial.expires_at;
            if !keep {
                log::debug!(
                    "Dropping {} of package {} from {}, expired",
                    partial.fragments.len(),
                    id,
                    sender
                );
            }
            keep
        });
        before - self.pending.len()
    }

    pub fn insert(
        &mut self,
        sender: PeerId,
        package_id: u64,
        index: i32,
        count: i32,
        chunk: Vec<u8>,
        now: Duration,
    ) -> Result<FragmentProgress, SyncError> {
        if count <= 0 || index < 0 || index >= count {
            return Err(SyncError::MalformedPackage(format!(
                "fragment {} of {} for package {}",
                index, count, package_id
            )));
        }

        let key = (sender, package_id);
        let expiry = self.expiry;
        let partial = self.pending.entry(key).or_insert_with(|| PartialPackage {
            fragments: BTreeMap::new(),
            expires_at: now + expiry,
        });
        partial.fragments.insert(index as u32, chunk);

        let expected = count as usize;
        if partial.fragments.len() < expected {
            return Ok(FragmentProgress::Incomplete {
                received: partial.fragments.len(),
                expected,
            });
        }

        let fragments = self
            .pending
            .remove(&key)
            .map(|partial| partial.fragments)
            .unwrap_or_default();
        Ok(FragmentProgress::Complete(
            fragments.into_values().flatten().collect(),
        ))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPIRY: Duration = Duration::from_secs(60);

    #[test]
    fn test_out_of_order_fragments_reassemble_by_index() {
        let mut cache = FragmentCache::new(EXPIRY);
        let sender = PeerId(3);
        let now = Duration::ZERO;

        let progress = cache.insert(sender, 7, 2, 3, vec![5, 6], now).unwrap();
        assert_eq!(progress, FragmentProgress::Incomplete { received: 1, expected: 3 });
        cache.insert(sender, 7, 0, 3, vec![1, 2], now).unwrap();

        let progress = cache.insert(sender, 7, 1, 3, vec![3, 4], now).unwrap();
        assert_eq!(progress, FragmentProgress::Complete(vec![1, 2, 3, 4, 5, 6]));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_same_package_id_from_different_senders_is_kept_apart() {
        let mut cache = FragmentCache::new(EXPIRY);
        cache.insert(PeerId(1), 1, 0, 2, vec![1], Duration::ZERO).unwrap();
        cache.insert(PeerId(2), 1, 1, 2, vec![2], Duration::ZERO).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_expiry_is_measured_from_the_first_fragment() {
        let mut cache = FragmentCache::new(EXPIRY);
        cache.insert(PeerId(1), 1, 0, 2, vec![1], Duration::ZERO).unwrap();

        assert_eq!(cache.expire(Duration::from_millis(59_999)), 0);
        assert_eq!(cache.expire(EXPIRY), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_nonsense_fragment_headers_are_malformed() {
        let mut cache = FragmentCache::new(EXPIRY);
        for (index, count) in [(0, 0), (-1, 2), (2, 2)] {
            let result = cache.insert(PeerId(1), 1, index, count, vec![], Duration::ZERO);
            assert!(matches!(result, Err(SyncError::MalformedPackage(_))));
        }
    }
}
