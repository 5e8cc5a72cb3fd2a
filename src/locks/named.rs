//! Named Lock Module
//!
//! A registry of per-name reader/writer locks that are created on first use
//! and reclaimed once nobody holds or waits for them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock as AsyncRwLock};
use tracing::trace;

use crate::error::{CacheError, Result};

// == Named Locker ==
/// Registry of named locks. Cloning shares the same registry.
#[derive(Debug, Clone, Default)]
pub struct NamedLocker {
    locks: Arc<RwLock<HashMap<String, Arc<LockEntry>>>>,
}

/// Per-name state shared by every holder and waiter of a name.
#[derive(Debug, Default)]
struct LockEntry {
    lock: Arc<AsyncRwLock<()>>,
    /// Holders plus waiters; the entry is reclaimed when this drops to zero
    queue_size: AtomicUsize,
    /// Readers of the current cycle that called `upgrade`
    upgraders: AtomicUsize,
    /// Set by the first upgrader of a cycle to obtain the write lock
    subsequent_writer: AtomicBool,
}

enum Guard {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
    Released,
}

// == Named Lock ==
/// A held named lock. Dropping it releases the lock.
pub struct NamedLock {
    name: String,
    entry: Arc<LockEntry>,
    locker: NamedLocker,
    guard: Guard,
    upgraded: bool,
}

impl NamedLocker {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // == Acquire ==
    /// Acquires the exclusive (write) lock for `name`, waiting until granted.
    pub async fn acquire(&self, name: &str) -> Result<NamedLock> {
        let mut lock = self.prepare(name)?;
        lock.guard = Guard::Write(lock.entry.lock.clone().write_owned().await);
        trace!(lock = name, "write lock acquired");
        Ok(lock)
    }

    // == RAcquire ==
    /// Acquires a shared (read) lock for `name`, waiting until granted.
    pub async fn racquire(&self, name: &str) -> Result<NamedLock> {
        let mut lock = self.prepare(name)?;
        lock.guard = Guard::Read(lock.entry.lock.clone().read_owned().await);
        trace!(lock = name, "read lock acquired");
        Ok(lock)
    }

    /// Returns the number of live lock entries.
    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.read().is_empty()
    }

    /// Registers interest in `name` before blocking on it, so a concurrent
    /// release can't reclaim the entry in between.
    fn prepare(&self, name: &str) -> Result<NamedLock> {
        if name.is_empty() {
            return Err(CacheError::InvalidLockName);
        }
        Ok(NamedLock {
            name: name.to_string(),
            entry: self.enqueue(name),
            locker: self.clone(),
            guard: Guard::Released,
            upgraded: false,
        })
    }

    fn enqueue(&self, name: &str) -> Arc<LockEntry> {
        {
            let locks = self.locks.read();
            if let Some(entry) = locks.get(name) {
                entry.queue_size.fetch_add(1, Ordering::AcqRel);
                return entry.clone();
            }
        }

        // Another task may have created the entry while we waited for the write lock
        let mut locks = self.locks.write();
        let entry = locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LockEntry::default()))
            .clone();
        entry.queue_size.fetch_add(1, Ordering::AcqRel);
        entry
    }

    fn dequeue(&self, name: &str, entry: &Arc<LockEntry>) {
        if entry.queue_size.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        let mut locks = self.locks.write();
        // Re-check: an acquirer may have joined, or the name may already map
        // to a newer entry
        if entry.queue_size.load(Ordering::Acquire) == 0
            && locks.get(name).is_some_and(|e| Arc::ptr_eq(e, entry))
        {
            locks.remove(name);
            trace!(lock = name, "lock entry reclaimed");
        }
    }
}

impl NamedLock {
    /// The name this lock was acquired under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true while the exclusive lock is held.
    pub fn is_write(&self) -> bool {
        matches!(self.guard, Guard::Write(_))
    }

    // == Upgrade ==
    /// Trades the held read lock for the write lock on the same name.
    ///
    /// Returns `true` to the first upgrader of a read cycle to obtain the
    /// write lock. Later upgraders get `false` and must re-validate anything
    /// they read under the shared lock. Returns `false` immediately if no
    /// read lock is held.
    pub async fn upgrade(&mut self) -> bool {
        if !matches!(self.guard, Guard::Read(_)) {
            return false;
        }
        if !self.upgraded {
            self.upgraded = true;
            self.entry.upgraders.fetch_add(1, Ordering::AcqRel);
        }

        self.guard = Guard::Released;
        self.guard = Guard::Write(self.entry.lock.clone().write_owned().await);

        !self.entry.subsequent_writer.swap(true, Ordering::AcqRel)
    }

    // == Release ==
    /// Releases a held write lock.
    pub fn release(self) {
        debug_assert!(self.is_write(), "release called on a read lock");
        drop(self);
    }

    // == RRelease ==
    /// Releases a held read lock.
    pub fn rrelease(self) {
        debug_assert!(!self.is_write(), "rrelease called on a write lock");
        drop(self);
    }
}

impl Drop for NamedLock {
    fn drop(&mut self) {
        // Reset while the write lock is still held so the next cycle starts clean
        if self.upgraded && self.entry.upgraders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.entry.subsequent_writer.store(false, Ordering::Release);
        }
        self.guard = Guard::Released;
        self.locker.dequeue(&self.name, &self.entry);
    }
}

impl fmt::Debug for NamedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.guard {
            Guard::Read(_) => "read",
            Guard::Write(_) => "write",
            Guard::Released => "released",
        };
        f.debug_struct("NamedLock")
            .field("name", &self.name)
            .field("mode", &mode)
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Barrier;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let locker = NamedLocker::new();
        assert!(matches!(
            locker.acquire("").await,
            Err(CacheError::InvalidLockName)
        ));
        assert!(matches!(
            locker.racquire("").await,
            Err(CacheError::InvalidLockName)
        ));
        assert!(locker.is_empty());
    }

    #[tokio::test]
    async fn test_write_lock_is_exclusive() {
        let locker = NamedLocker::new();
        let held = locker.acquire("k").await.unwrap();

        let contender = locker.clone();
        let attempt = timeout(Duration::from_millis(50), contender.acquire("k")).await;
        assert!(attempt.is_err(), "second writer must wait");

        held.release();
        let lock = timeout(Duration::from_millis(50), locker.acquire("k"))
            .await
            .expect("lock should be free after release")
            .unwrap();
        assert!(lock.is_write());
    }

    #[tokio::test]
    async fn test_readers_share() {
        let locker = NamedLocker::new();
        let first = locker.racquire("k").await.unwrap();
        let second = timeout(Duration::from_millis(50), locker.racquire("k"))
            .await
            .expect("readers must not block each other")
            .unwrap();

        let writer = timeout(Duration::from_millis(50), locker.acquire("k")).await;
        assert!(writer.is_err(), "writer must wait for readers");

        first.rrelease();
        second.rrelease();
        assert!(locker.is_empty());
    }

    #[tokio::test]
    async fn test_different_names_do_not_block() {
        let locker = NamedLocker::new();
        let _a = locker.acquire("a").await.unwrap();
        let b = timeout(Duration::from_millis(50), locker.acquire("b")).await;
        assert!(b.is_ok());
        assert_eq!(locker.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_upgrade_exactly_one_winner() {
        const READERS: usize = 8;
        let locker = NamedLocker::new();
        let barrier = Arc::new(Barrier::new(READERS));

        let mut handles = Vec::new();
        for _ in 0..READERS {
            let locker = locker.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                let mut lock = locker.racquire("shared").await.unwrap();
                barrier.wait().await;
                let won = lock.upgrade().await;
                assert!(lock.is_write());
                tokio::time::sleep(Duration::from_millis(5)).await;
                lock.release();
                won
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(locker.is_empty());

        // A fresh read cycle gets its own winner
        let mut lock = locker.racquire("shared").await.unwrap();
        assert!(lock.upgrade().await);
    }

    #[tokio::test]
    async fn test_upgrade_without_read_lock() {
        let locker = NamedLocker::new();
        let mut lock = locker.acquire("k").await.unwrap();
        assert!(!lock.upgrade().await);
        assert!(lock.is_write());
    }

    #[tokio::test]
    async fn test_entry_reclaimed_after_release() {
        let locker = NamedLocker::new();

        let lock = locker.acquire("k").await.unwrap();
        assert_eq!(locker.len(), 1);
        lock.release();
        assert_eq!(locker.len(), 0);

        let held = locker.racquire("k").await.unwrap();
        let contender = locker.clone();
        let waiter = tokio::spawn(async move { contender.acquire("k").await.unwrap().release() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Held by the reader, awaited by the writer
        assert_eq!(locker.len(), 1);
        held.rrelease();
        waiter.await.unwrap();
        assert!(locker.is_empty());

        // Re-acquiring starts from a fresh entry
        let mut lock = locker.racquire("k").await.unwrap();
        assert!(lock.upgrade().await);
    }

    #[tokio::test]
    async fn test_cancelled_acquire_is_reclaimed() {
        let locker = NamedLocker::new();
        let held = locker.acquire("k").await.unwrap();
        let attempt = timeout(Duration::from_millis(20), locker.racquire("k")).await;
        assert!(attempt.is_err());
        held.release();
        assert!(locker.is_empty());
    }
}
