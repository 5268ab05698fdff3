//! Per-key async mutual exclusion.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes operations on the same key while letting different keys
/// proceed independently. Used to serialize concurrent publishes of the same
/// VLNV; the index unique constraint remains the backstop for anything that
/// slips past (e.g. two processes).
#[derive(Default)]
pub(crate) struct KeyedLock {
    // The map only ever grows by one tiny entry per distinct key, bounded by
    // the number of distinct VLNVs a process publishes.
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut guard = self.inner.lock().await;
            guard.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        entry.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_same_key_serializes() {
        let lock = Arc::new(KeyedLock::new());
        let active = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let active = active.clone();
            handles.push(tokio::spawn(async move {
                let _guard = lock.acquire("acme:lib1:foo:1.0.0").await;
                // Exactly one task may hold the guard at a time.
                assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
                tokio::task::yield_now().await;
                assert_eq!(active.fetch_sub(1, Ordering::SeqCst), 1);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let lock = KeyedLock::new();
        let _a = lock.acquire("a").await;
        // Would deadlock if "b" shared "a"'s mutex.
        let _b = lock.acquire("b").await;
    }
}
