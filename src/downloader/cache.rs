// Artifact cache - fetch key to artifact path and fetch time
//
// A single mutex guards both the mapping and the per-path in-use counts, so
// lookup, insert, remove and the sweeper's retire step are linearizable with
// respect to each other. The cache never deletes files on its own; the
// sweeper hands it the deletion step through `retire_artifact`.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;

use super::models::FetchKey;

/// Snapshot of a cache mapping entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub artifact_path: PathBuf,
    pub fetched_at: OffsetDateTime,
    /// Callers currently holding an [`ArtifactLease`] on this artifact
    pub in_use_count: usize,
}

impl CacheEntry {
    /// Time half of validity: `now` is strictly before `fetched_at + ttl`
    pub fn is_fresh(&self, now: OffsetDateTime, ttl: Duration) -> bool {
        is_fresh(self.fetched_at, now, ttl)
    }
}

/// A ttl too large to represent never expires
fn is_fresh(fetched_at: OffsetDateTime, now: OffsetDateTime, ttl: Duration) -> bool {
    match time::Duration::try_from(ttl)
        .ok()
        .and_then(|ttl| fetched_at.checked_add(ttl))
    {
        Some(expires_at) => now < expires_at,
        None => true,
    }
}

/// Outcome of [`ArtifactCache::retire_artifact`]
#[derive(Debug, PartialEq, Eq)]
pub enum Retirement {
    /// The file is gone and these keys were dropped from the mapping
    Retired(Vec<FetchKey>),
    /// Leases are still open on the artifact; nothing was touched
    InUse(usize),
}

#[derive(Debug)]
struct StoredEntry {
    artifact_path: PathBuf,
    fetched_at: OffsetDateTime,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<FetchKey, StoredEntry>,
    in_use: HashMap<PathBuf, usize>,
}

impl CacheState {
    fn snapshot(&self, stored: &StoredEntry) -> CacheEntry {
        CacheEntry {
            artifact_path: stored.artifact_path.clone(),
            fetched_at: stored.fetched_at,
            in_use_count: self.in_use.get(&stored.artifact_path).copied().unwrap_or(0),
        }
    }

    fn acquire(&mut self, path: &Path) {
        *self.in_use.entry(path.to_path_buf()).or_insert(0) += 1;
    }

    fn release(&mut self, path: &Path) {
        if let Some(count) = self.in_use.get_mut(path) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.in_use.remove(path);
            }
        }
    }
}

/// Process-wide artifact cache. Cloning shares the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct ArtifactCache {
    state: Arc<Mutex<CacheState>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        // A panic while holding the lock cannot leave the maps half-updated:
        // every critical section performs single map operations.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lookup(&self, key: &FetchKey) -> Option<CacheEntry> {
        let state = self.state();
        state.entries.get(key).map(|stored| state.snapshot(stored))
    }

    /// Insert or replace the entry for `key` (last writer wins).
    pub fn insert(
        &self,
        key: FetchKey,
        artifact_path: impl Into<PathBuf>,
        fetched_at: OffsetDateTime,
    ) -> CacheEntry {
        let stored = StoredEntry {
            artifact_path: artifact_path.into(),
            fetched_at,
        };
        let mut state = self.state();
        let entry = state.snapshot(&stored);
        if let Some(previous) = state.entries.insert(key, stored) {
            if previous.artifact_path != entry.artifact_path {
                tracing::debug!(
                    "[Cache] replaced entry for {}",
                    previous.artifact_path.display()
                );
            }
        }
        entry
    }

    /// Drop the mapping entry only. The artifact file is left alone.
    pub fn remove(&self, key: &FetchKey) -> Option<CacheEntry> {
        let mut state = self.state();
        let stored = state.entries.remove(key)?;
        Some(state.snapshot(&stored))
    }

    /// Drop the mapping entry for `key` only if it is no longer valid.
    ///
    /// An entry a concurrent fetch just inserted is left in place.
    pub fn remove_if_stale(&self, key: &FetchKey, now: OffsetDateTime, ttl: Duration) -> Option<CacheEntry> {
        let mut state = self.state();
        let entry = state.entries.get(key).map(|stored| state.snapshot(stored))?;
        if Self::valid_for(&entry, now, ttl) {
            return None;
        }
        state.entries.remove(key);
        Some(entry)
    }

    /// Valid iff the artifact still exists and the entry has not expired.
    ///
    /// The existence check is a `stat`, and callers inside the cache run it
    /// under the lock; it is the only filesystem call made there.
    pub fn valid_for(entry: &CacheEntry, now: OffsetDateTime, ttl: Duration) -> bool {
        entry.is_fresh(now, ttl) && entry.artifact_path.is_file()
    }

    /// Look up `key` and, if the entry is valid, take a lease on its artifact
    /// in the same critical section.
    pub fn checkout(&self, key: &FetchKey, now: OffsetDateTime, ttl: Duration) -> Option<ArtifactLease> {
        let mut state = self.state();
        let entry = state.entries.get(key).map(|stored| state.snapshot(stored))?;
        if !Self::valid_for(&entry, now, ttl) {
            return None;
        }
        state.acquire(&entry.artifact_path);
        Some(ArtifactLease {
            state: Arc::clone(&self.state),
            artifact_path: entry.artifact_path,
            fetched_at: entry.fetched_at,
        })
    }

    /// Take a lease on an artifact that was just fetched.
    pub fn lease(&self, artifact_path: impl Into<PathBuf>, fetched_at: OffsetDateTime) -> ArtifactLease {
        let artifact_path = artifact_path.into();
        self.state().acquire(&artifact_path);
        ArtifactLease {
            state: Arc::clone(&self.state),
            artifact_path,
            fetched_at,
        }
    }

    /// Number of open leases on `path`
    pub fn in_use_count(&self, path: &Path) -> usize {
        self.state().in_use.get(path).copied().unwrap_or(0)
    }

    /// Delete an artifact and every mapping entry pointing at it, atomically
    /// with respect to lookups.
    ///
    /// `delete` performs the actual removal from durable storage and runs
    /// while the lock is held, so it must not block for long. If any lease
    /// is open, `delete` is not called.
    pub fn retire_artifact<F>(&self, path: &Path, delete: F) -> io::Result<Retirement>
    where
        F: FnOnce(&Path) -> io::Result<()>,
    {
        let mut state = self.state();
        if let Some(&count) = state.in_use.get(path) {
            if count > 0 {
                return Ok(Retirement::InUse(count));
            }
        }

        delete(path)?;

        let keys: Vec<FetchKey> = state
            .entries
            .iter()
            .filter(|(_, stored)| stored.artifact_path == path)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            state.entries.remove(key);
        }
        Ok(Retirement::Retired(keys))
    }

    /// Drop mapping entries whose TTL has elapsed. Files are untouched.
    pub fn prune_expired(&self, now: OffsetDateTime, ttl: Duration) -> usize {
        let mut state = self.state();
        let before = state.entries.len();
        state
            .entries
            .retain(|_, stored| is_fresh(stored.fetched_at, now, ttl));
        before - state.entries.len()
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Marks an artifact as being transferred to a caller.
///
/// While any lease on a path is alive the sweeper will not delete the file.
#[derive(Debug)]
pub struct ArtifactLease {
    state: Arc<Mutex<CacheState>>,
    artifact_path: PathBuf,
    fetched_at: OffsetDateTime,
}

impl ArtifactLease {
    pub fn path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn fetched_at(&self) -> OffsetDateTime {
        self.fetched_at
    }
}

impl Drop for ArtifactLease {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(&self.artifact_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;

    const TTL: Duration = Duration::from_secs(300);

    fn key(selector: &str) -> FetchKey {
        FetchKey::new("https://www.youtube.com/watch?v=abc", selector)
    }

    fn t(secs: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(secs)
    }

    fn artifact(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, b"data").unwrap();
        path
    }

    #[test]
    fn test_insert_then_lookup() {
        let cache = ArtifactCache::new();
        cache.insert(key("22"), "/tmp/a.mp4", t(0));
        let entry = cache.lookup(&key("22")).unwrap();
        assert_eq!(entry.artifact_path, PathBuf::from("/tmp/a.mp4"));
        assert_eq!(entry.fetched_at, t(0));
        assert_eq!(entry.in_use_count, 0);
    }

    #[test]
    fn test_last_writer_wins() {
        let cache = ArtifactCache::new();
        cache.insert(key("22"), "/tmp/first.mp4", t(0));
        cache.insert(key("22"), "/tmp/second.mp4", t(5));
        let entry = cache.lookup(&key("22")).unwrap();
        assert_eq!(entry.artifact_path, PathBuf::from("/tmp/second.mp4"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_valid_for_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new();
        let entry = cache.insert(key("22"), artifact(&dir, "a.mp4"), t(0));

        assert!(ArtifactCache::valid_for(&entry, t(0), TTL));
        assert!(ArtifactCache::valid_for(&entry, t(299), TTL));
        assert!(!ArtifactCache::valid_for(&entry, t(300), TTL));
        assert!(!ArtifactCache::valid_for(&entry, t(301), TTL));
    }

    #[test]
    fn test_missing_file_is_invalid() {
        let cache = ArtifactCache::new();
        let entry = cache.insert(key("22"), "/nonexistent/media-fetch/a.mp4", t(0));
        assert!(!ArtifactCache::valid_for(&entry, t(0), TTL));
        assert!(cache.checkout(&key("22"), t(0), TTL).is_none());
    }

    #[test]
    fn test_remove_leaves_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(&dir, "a.mp4");
        let cache = ArtifactCache::new();
        cache.insert(key("22"), &path, t(0));

        assert!(cache.remove(&key("22")).is_some());
        assert!(cache.lookup(&key("22")).is_none());
        assert!(path.exists());
        assert!(cache.remove(&key("22")).is_none());
    }

    #[test]
    fn test_checkout_tracks_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(&dir, "a.mp4");
        let cache = ArtifactCache::new();
        cache.insert(key("22"), &path, t(0));

        let first = cache.checkout(&key("22"), t(10), TTL).unwrap();
        let second = cache.checkout(&key("22"), t(10), TTL).unwrap();
        assert_eq!(first.path(), path.as_path());
        assert_eq!(cache.lookup(&key("22")).unwrap().in_use_count, 2);

        drop(first);
        assert_eq!(cache.in_use_count(&path), 1);
        drop(second);
        assert_eq!(cache.in_use_count(&path), 0);
    }

    #[test]
    fn test_checkout_of_expired_entry_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new();
        cache.insert(key("22"), artifact(&dir, "a.mp4"), t(0));
        assert!(cache.checkout(&key("22"), t(299), TTL).is_some());
        assert!(cache.checkout(&key("22"), t(301), TTL).is_none());
    }

    #[test]
    fn test_retire_blocked_while_leased() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(&dir, "a.mp4");
        let cache = ArtifactCache::new();
        cache.insert(key("22"), &path, t(0));
        let lease = cache.lease(&path, t(0));

        let outcome = cache
            .retire_artifact(&path, |p| fs::remove_file(p))
            .unwrap();
        assert_eq!(outcome, Retirement::InUse(1));
        assert!(path.exists());

        drop(lease);
        let outcome = cache
            .retire_artifact(&path, |p| fs::remove_file(p))
            .unwrap();
        assert_eq!(outcome, Retirement::Retired(vec![key("22")]));
        assert!(!path.exists());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_retire_drops_every_key_for_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(&dir, "shared.mp4");
        let other = artifact(&dir, "other.mp4");
        let cache = ArtifactCache::new();
        cache.insert(key("22"), &path, t(0));
        cache.insert(key("best"), &path, t(1));
        cache.insert(key("18"), &other, t(2));

        match cache.retire_artifact(&path, |p| fs::remove_file(p)).unwrap() {
            Retirement::Retired(keys) => assert_eq!(keys.len(), 2),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup(&key("18")).is_some());
    }

    #[test]
    fn test_retire_error_keeps_entries() {
        let cache = ArtifactCache::new();
        cache.insert(key("22"), "/tmp/a.mp4", t(0));
        let result = cache.retire_artifact(Path::new("/tmp/a.mp4"), |_| {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        });
        assert!(result.is_err());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_prune_expired() {
        let cache = ArtifactCache::new();
        cache.insert(key("old"), "/tmp/old.mp4", t(0));
        cache.insert(key("new"), "/tmp/new.mp4", t(200));
        assert_eq!(cache.prune_expired(t(350), TTL), 1);
        assert!(cache.lookup(&key("old")).is_none());
        assert!(cache.lookup(&key("new")).is_some());
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(&dir, "a.mp4");
        let cache = ArtifactCache::new();
        cache.insert(key("22"), &path, t(0));

        let huge = Duration::from_secs(u64::MAX / 2);
        assert_eq!(cache.prune_expired(t(1_000_000), huge), 0);
        assert!(cache.checkout(&key("22"), t(1_000_000), huge).is_some());
        assert!(cache.lookup(&key("22")).unwrap().is_fresh(t(1_000_000), Duration::MAX));
    }

    #[test]
    fn test_remove_if_stale_keeps_fresh_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = artifact(&dir, "a.mp4");
        let cache = ArtifactCache::new();
        cache.insert(key("22"), &path, t(0));

        assert!(cache.remove_if_stale(&key("22"), t(100), TTL).is_none());
        assert!(cache.lookup(&key("22")).is_some());

        let removed = cache.remove_if_stale(&key("22"), t(300), TTL).unwrap();
        assert_eq!(removed.artifact_path, path);
        assert!(cache.lookup(&key("22")).is_none());
        assert!(path.is_file());
        assert!(cache.remove_if_stale(&key("22"), t(300), TTL).is_none());
    }

    #[test]
    fn test_concurrent_inserts_and_lookups() {
        let cache = ArtifactCache::new();
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 0..200 {
                        let k = key(&format!("{}", i % 10));
                        let path = PathBuf::from(format!("/tmp/{}-{}.mp4", worker, i));
                        cache.insert(k.clone(), &path, t(i));
                        let seen = cache.lookup(&k).unwrap();
                        assert!(seen.artifact_path.starts_with("/tmp"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 10);
    }
}
