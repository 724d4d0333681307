//! Prefix cache (C3) — §4.3
//!
//! Grounded on the teacher's `core/cache_manager/manager.rs` two-tier design:
//! an `lru::LruCache` L1 in front of a slower L2. Here L2 is a disk-persisted
//! store under a documented namespace layout rather than the teacher's
//! `DashMap`, since §4.3 asks for the cache to survive a process restart
//! rather than just serve as an in-memory speed-up. Lazy TTL eviction on read
//! follows the teacher's `CacheEntry::is_expired` check-on-access pattern
//! rather than a background sweep.

pub mod fingerprint;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{CacheEntry, Fingerprint};

/// Capacity of the in-memory L1 tier fronting the disk-persisted store.
const L1_CAPACITY: usize = 1024;

pub use fingerprint::{fingerprint as compute_fingerprint, FingerprintInput};

/// What a prefix-cache lookup resolved to (§9: content-cache hit wins over a
/// response-id cache hit when both are present).
#[derive(Debug, Clone)]
pub enum CacheHit {
    /// A previously generated response body, usable without calling the provider.
    Content(String),
    /// A provider-side response id, usable for prefix-chained continuation calls.
    ResponseId(String),
}

/// Two-tier (memory + disk) store for the three cache namespaces documented in
/// §4.3: `content:<fingerprint>`, `response_id:<fingerprint>`, and
/// `fold:<fingerprint>:<strategy>`.
pub struct PrefixCache {
    root: PathBuf,
    memory: Mutex<LruCache<String, CacheEntry<serde_json::Value>>>,
}

impl PrefixCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            memory: Mutex::new(LruCache::new(NonZeroUsize::new(L1_CAPACITY).unwrap())),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.root.join(format!("{safe}.json"))
    }

    async fn read_entry<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        {
            let mut memory = self.memory.lock();
            let hit = memory.get(key).map(|cached| (cached.is_expired(), cached.clone()));
            if let Some((expired, cached)) = hit {
                if expired {
                    memory.pop(key);
                } else {
                    let value: T = serde_json::from_value(cached.value).ok()?;
                    return Some(CacheEntry {
                        value,
                        expires_at: cached.expires_at,
                    });
                }
            }
        }

        let path = self.path_for(key);
        let bytes = tokio::fs::read(&path).await.ok()?;
        let entry: CacheEntry<T> = match serde_json::from_slice(&bytes) {
            Ok(e) => e,
            Err(e) => {
                warn!(key, error = %e, "dropping unreadable cache entry");
                let _ = tokio::fs::remove_file(&path).await;
                return None;
            }
        };
        if entry.is_expired() {
            debug!(key, "evicting expired cache entry on read");
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }
        Some(entry)
    }

    async fn write_entry<T: Serialize + Clone>(&self, key: &str, entry: CacheEntry<T>) -> Result<()> {
        let value = serde_json::to_value(&entry.value)?;
        self.memory.lock().put(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: entry.expires_at,
            },
        );

        if self.root != Path::new("") {
            tokio::fs::create_dir_all(&self.root).await?;
            let path = self.path_for(key);
            let bytes = serde_json::to_vec(&entry)?;
            tokio::fs::write(&path, bytes).await?;
        }
        Ok(())
    }

    pub async fn put_content(
        &self,
        fp: &Fingerprint,
        value: String,
        ttl: std::time::Duration,
    ) -> Result<()> {
        self.write_entry(&content_key(fp), CacheEntry::new(value, ttl)).await
    }

    pub async fn put_response_id(
        &self,
        fp: &Fingerprint,
        value: String,
        ttl: std::time::Duration,
    ) -> Result<()> {
        self.write_entry(&response_id_key(fp), CacheEntry::new(value, ttl)).await
    }

    pub async fn put_fold(
        &self,
        fp: &Fingerprint,
        strategy: &str,
        value: String,
        ttl: std::time::Duration,
    ) -> Result<()> {
        self.write_entry(&fold_key(fp, strategy), CacheEntry::new(value, ttl)).await
    }

    pub async fn get_fold(&self, fp: &Fingerprint, strategy: &str) -> Option<String> {
        self.read_entry::<String>(&fold_key(fp, strategy)).await.map(|e| e.value)
    }

    /// Content-cache-wins lookup (§9 Open Question resolution): checks the
    /// `content` namespace first, then falls back to `response_id`.
    pub async fn resolve(&self, fp: &Fingerprint) -> Option<CacheHit> {
        if let Some(entry) = self.read_entry::<String>(&content_key(fp)).await {
            return Some(CacheHit::Content(entry.value));
        }
        if let Some(entry) = self.read_entry::<String>(&response_id_key(fp)).await {
            return Some(CacheHit::ResponseId(entry.value));
        }
        None
    }
}

fn content_key(fp: &Fingerprint) -> String {
    format!("content:{fp}")
}

fn response_id_key(fp: &Fingerprint) -> String {
    format!("response_id:{fp}")
}

fn fold_key(fp: &Fingerprint, strategy: &str) -> String {
    format!("fold:{fp}:{strategy}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fp(seed: u8) -> Fingerprint {
        Fingerprint([seed; 32])
    }

    #[tokio::test]
    async fn content_cache_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PrefixCache::new(dir.path());
        let key = fp(1);
        cache
            .put_content(&key, "cached answer".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        match cache.resolve(&key).await {
            Some(CacheHit::Content(v)) => assert_eq!(v, "cached answer"),
            other => panic!("expected content hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn content_hit_wins_over_response_id_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PrefixCache::new(dir.path());
        let key = fp(2);
        cache
            .put_response_id(&key, "resp_123".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .put_content(&key, "content wins".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        match cache.resolve(&key).await {
            Some(CacheHit::Content(v)) => assert_eq!(v, "content wins"),
            other => panic!("expected content hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_entries_are_evicted_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PrefixCache::new(dir.path());
        let key = fp(3);
        cache
            .put_content(&key, "stale".to_string(), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.resolve(&key).await.is_none());
        assert!(!cache.path_for(&content_key(&key)).exists());
    }

    #[tokio::test]
    async fn survives_reconstruction_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let key = fp(4);
        {
            let cache = PrefixCache::new(dir.path());
            cache
                .put_content(&key, "persisted".to_string(), Duration::from_secs(60))
                .await
                .unwrap();
        }
        let reopened = PrefixCache::new(dir.path());
        match reopened.resolve(&key).await {
            Some(CacheHit::Content(v)) => assert_eq!(v, "persisted"),
            other => panic!("expected content hit after reopen, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fold_namespace_is_keyed_by_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PrefixCache::new(dir.path());
        let key = fp(5);
        cache
            .put_fold(&key, "distill", "short summary".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get_fold(&key, "distill").await,
            Some("short summary".to_string())
        );
        assert_eq!(cache.get_fold(&key, "consolidate").await, None);
    }
}
