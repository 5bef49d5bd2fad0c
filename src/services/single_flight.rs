use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Keyed async locks that serialize concurrent regeneration of the same
/// cache entry within one process.
///
/// Callers acquire the lock for a key, do their work while holding the
/// returned guard, then call `release` after dropping it so idle entries do
/// not accumulate. Coalescing across processes is intentionally out of scope;
/// the store's unique-key upsert keeps uncoordinated writers convergent.
#[derive(Default)]
pub struct KeyedLocks {
    entries: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, creating it on first use. The guard
    /// releases the lock when dropped, on every exit path.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        cell.lock_owned().await
    }

    /// Prune the map entry for `key` once no guard or waiter references it.
    pub async fn release(&self, key: &str) {
        let mut entries = self.entries.lock().await;
        if let Some(cell) = entries.get(key) {
            if Arc::strong_count(cell) == 1 {
                entries.remove(key);
            }
        }
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.entries.lock().await.len()
    }
}
