use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A mutex that locks on a key (e.g. a moderation record id).
///
/// Writes to a single record must be serialized (the orchestrator and the
/// callback processor may both touch it) while unrelated records proceed in
/// parallel, so a global lock would be wrong here.
#[derive(Debug, Clone)]
pub struct KeyedMutex {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Acquires the lock for the given key; released when the guard drops.
    pub async fn lock(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        mutex.lock_owned().await
    }

    /// Drops map entries whose lock is not currently held. Called from the
    /// background worker to bound memory across many distinct record ids.
    pub fn cleanup(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }
}

impl Default for KeyedMutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = KeyedMutex::new();
        let guard = locks.lock("record-1").await;
        // A second lock on the same key must not be immediately available.
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            locks.lock("record-1"),
        )
        .await;
        assert!(second.is_err());
        drop(guard);
        assert!(
            tokio::time::timeout(
                std::time::Duration::from_millis(50),
                locks.lock("record-1")
            )
            .await
            .is_ok()
        );
    }

    #[tokio::test]
    async fn test_different_keys_are_independent() {
        let locks = KeyedMutex::new();
        let _a = locks.lock("record-a").await;
        let b = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            locks.lock("record-b"),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_retains_held_locks() {
        let locks = KeyedMutex::new();
        let _held = locks.lock("held").await;
        drop(locks.lock("released").await);
        locks.cleanup();
        assert!(locks.locks.contains_key("held"));
        assert!(!locks.locks.contains_key("released"));
    }
}
