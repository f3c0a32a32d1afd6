//! Generic handle table: opaque numeric handles mapped to owned resources.
//!
//! Allocation is strictly monotonic starting at 1; zero is reserved as the
//! invalid sentinel and handles are never recycled, so a stale handle used
//! after release is a deterministic lookup failure rather than an alias of a
//! newer resource.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

/// Maps opaque handles to shared resources. RwLock serializes allocation and
/// release against concurrent lookups.
pub struct HandleTable<T> {
    next: AtomicU32,
    entries: RwLock<HashMap<u32, T>>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a resource and return its freshly allocated handle.
    pub async fn allocate(&self, value: T) -> u32 {
        let handle = self.next.fetch_add(1, Ordering::SeqCst);
        self.entries.write().await.insert(handle, value);
        handle
    }

    /// Remove the entry and return ownership to the caller. A second release
    /// of the same handle returns `None`.
    pub async fn release(&self, handle: u32) -> Option<T> {
        self.entries.write().await.remove(&handle)
    }

    /// Handles of all live entries, in no particular order.
    pub async fn handles(&self) -> Vec<u32> {
        self.entries.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<T: Clone> HandleTable<T> {
    /// Look up a live entry. Returns a clone so the table lock is never held
    /// across caller await points.
    pub async fn get(&self, handle: u32) -> Option<T> {
        self.entries.read().await.get(&handle).cloned()
    }
}
