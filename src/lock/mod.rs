//! Per-key mutual exclusion for cache population.
//!
//! A shared table of mutexes keyed by the 32-bit lock handle. Entries are
//! created on demand and removed as soon as the holder finishes, so the
//! table stays bounded by the number of in-flight populations.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = Arc<DashMap<u32, Arc<Mutex<()>>>>;

/// Self-pruning table of per-key population locks. Cloning shares the table.
#[derive(Clone, Default)]
pub struct KeyLockTable {
    locks: LockTable,
}

impl KeyLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a handle, creating it if absent. The returned
    /// guard removes the table entry when dropped; late waiters queued on
    /// the same mutex still drain one at a time.
    pub async fn acquire(&self, handle: u32) -> KeyLockGuard {
        let mutex = self
            .locks
            .entry(handle)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.clone().lock_owned().await;
        KeyLockGuard {
            handle,
            mutex,
            locks: Arc::clone(&self.locks),
            _guard: guard,
        }
    }

    /// Number of in-flight population locks.
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }
}

/// Holds a population lock; releasing it prunes the table entry.
pub struct KeyLockGuard {
    handle: u32,
    mutex: Arc<Mutex<()>>,
    locks: LockTable,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        // Prune only the entry we acquired, and only while nobody else holds
        // a reference to it (three counts: the table entry, this guard's
        // handle, and the owned mutex guard). Waiters each hold a clone, so
        // an entry with waiters survives and they keep draining in turn.
        self.locks.remove_if(&self.handle, |_, m| {
            Arc::ptr_eq(m, &self.mutex) && Arc::strong_count(m) <= 3
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn table_prunes_after_release() {
        let table = KeyLockTable::new();
        {
            let _guard = table.acquire(42).await;
            assert_eq!(table.in_flight(), 1);
        }
        assert_eq!(table.in_flight(), 0);
    }

    #[tokio::test]
    async fn distinct_handles_do_not_block_each_other() {
        let table = KeyLockTable::new();
        let _a = table.acquire(1).await;
        // Would deadlock if handle 2 shared handle 1's mutex.
        let _b = table.acquire(2).await;
        assert_eq!(table.in_flight(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_handle_serializes_holders() {
        let table = KeyLockTable::new();
        let concurrent = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let table = table.clone();
            let concurrent = concurrent.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _guard = table.acquire(7).await;
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(table.in_flight(), 0);
    }
}
