use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedMutexGuard, Mutex as AsyncMutex};

/// Refcounted table of per-locator-key exclusive locks.
///
/// Grounded on `internal/cache/fs_store.go`'s `lockEntry`: a central mutex
/// protects the table itself; each entry is reference-counted so idle keys
/// are evicted once the last holder releases, keeping the table bounded by
/// concurrent writers rather than by cumulative distinct keys ever seen.
#[derive(Default)]
pub struct LockTable {
    entries: Mutex<HashMap<String, Arc<Entry>>>,
}

struct Entry {
    mutex: AsyncMutex<()>,
    refs: Mutex<usize>,
}

/// Held while a `put`/`remove` is in flight for one locator key. Dropping
/// this releases the per-key lock and, if no other waiter remains,
/// removes the table entry.
pub struct LockGuard<'t> {
    table: &'t LockTable,
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> LockGuard<'_> {
        let entry = {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| {
                    Arc::new(Entry {
                        mutex: AsyncMutex::new(()),
                        refs: Mutex::new(0),
                    })
                })
                .clone();
            *entry.refs.lock().unwrap() += 1;
            entry
        };

        let guard = entry.mutex.lock_owned().await;
        LockGuard {
            table: self,
            key: key.to_string(),
            _guard: guard,
        }
    }

    fn release(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(key) {
            let mut refs = entry.refs.lock().unwrap();
            *refs -= 1;
            if *refs == 0 {
                drop(refs);
                entries.remove(key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.table.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn same_key_serializes() {
        let table = Arc::new(LockTable::new());
        let counter = Arc::new(AtomicU32::new(0));
        let max_concurrent = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = table.clone();
            let counter = counter.clone();
            let max_concurrent = max_concurrent.clone();
            handles.push(tokio::spawn(async move {
                let _guard = table.acquire("tenant::/a").await;
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(n, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_serialize() {
        let table = LockTable::new();
        let g1 = table.acquire("tenant::/a").await;
        let g2 = table.acquire("tenant::/b").await;
        drop(g1);
        drop(g2);
    }

    #[tokio::test]
    async fn table_shrinks_after_release() {
        let table = LockTable::new();
        {
            let _g = table.acquire("tenant::/a").await;
            assert_eq!(table.len(), 1);
        }
        assert_eq!(table.len(), 0);
    }
}
