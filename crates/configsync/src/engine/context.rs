use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Process-wide sync state shared by every engine on a node.
#[derive(Debug, Default)]
pub struct SyncContext {
    is_server: AtomicBool,
    lock_exempt: AtomicBool,
    package_counter: AtomicU64,
}

impl SyncContext {
    pub fn new(is_server: bool) -> Self {
        Self {
            is_server: AtomicBool::new(is_server),
            ..Self::default()
        }
    }

    pub fn is_server(&self) -> bool {
        self.is_server.load(Ordering::SeqCst)
    }

    pub fn set_server(&self, is_server: bool) {
        self.is_server.store(is_server, Ordering::SeqCst);
    }

    pub fn lock_exempt(&self) -> bool {
        self.lock_exempt.load(Ordering::SeqCst)
    }

    /// Returns the previous value.
    pub fn set_lock_exempt(&self, exempt: bool) -> bool {
        self.lock_exempt.swap(exempt, Ordering::SeqCst)
    }

    /// Next fragmented package id. Ids start at 1.
    pub fn next_package_id(&self) -> u64 {
        self.package_counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}
