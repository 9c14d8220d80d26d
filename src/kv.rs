//! Namespaced key-value store abstraction with optional per-entry TTL.
//!
//! The core only ever touches two prefixes: `activityIdempotence` (inbox dedup) and
//! `remoteDocument` (document-loader cache). Keys are ordered path segments so callers can
//! namespace freely without string concatenation footguns.

use async_trait::async_trait;
use moka::future::Cache;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

/// Default prefixes used by the federation registry.
#[derive(Debug, Clone)]
pub struct KvPrefixes {
    /// Prefix under which inbox idempotence markers are stored
    pub activity_idempotence: Vec<String>,
    /// Prefix under which cached remote documents are stored
    pub remote_document: Vec<String>,
}

impl Default for KvPrefixes {
    fn default() -> Self {
        Self {
            activity_idempotence: vec!["_fedireg".to_string(), "activityIdempotence".to_string()],
            remote_document: vec!["_fedireg".to_string(), "remoteDocument".to_string()],
        }
    }
}

/// Options accepted by [`KvStore::set`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Entry expires after this duration, if set
    pub ttl: Option<Duration>,
}

/// Opaque byte-oriented key-value store, namespaced by an ordered key path.
///
/// Implementations must tolerate interleaved reads/writes from other processes; the core relies
/// only on [`KvStore::set_if_absent`] to safely claim the inbox idempotence key exactly once.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the raw bytes stored at `key`, if present and not expired.
    async fn get(&self, key: &[String]) -> Option<Vec<u8>>;
    /// Store `value` at `key`, applying the TTL in `options` if given.
    async fn set(&self, key: &[String], value: Vec<u8>, options: SetOptions);
    /// Remove whatever is stored at `key`.
    async fn delete(&self, key: &[String]);
    /// Atomically store `value` at `key` only if nothing is currently stored there. Returns
    /// `true` if this call won the race and the value was stored, `false` if the key already
    /// existed.
    async fn set_if_absent(&self, key: &[String], value: Vec<u8>, options: SetOptions) -> bool;
}

/// Convenience helpers layered over the raw [`KvStore`] trait for JSON payloads.
#[async_trait]
pub trait KvStoreExt: KvStore {
    /// Fetch and deserialize a JSON value stored at `key`.
    async fn get_json<T: DeserializeOwned>(&self, key: &[String]) -> Option<T> {
        let bytes = self.get(key).await?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Serialize `value` as JSON and store it at `key`.
    async fn set_json<T: Serialize + Sync>(&self, key: &[String], value: &T, options: SetOptions) {
        if let Ok(bytes) = serde_json::to_vec(value) {
            self.set(key, bytes, options).await;
        }
    }
}

impl<T: KvStore + ?Sized> KvStoreExt for T {}

fn join(key: &[String]) -> String {
    key.join("\u{1f}")
}

/// Production key-value store backed by [`moka`]'s async cache.
pub struct MokaKvStore {
    cache: Cache<String, (Vec<u8>, Option<Instant>)>,
}

impl MokaKvStore {
    /// Build a store with the given maximum entry count.
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: Cache::new(max_capacity),
        }
    }

    fn is_expired(expires_at: Option<Instant>) -> bool {
        expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

impl Default for MokaKvStore {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl KvStore for MokaKvStore {
    async fn get(&self, key: &[String]) -> Option<Vec<u8>> {
        let key = join(key);
        let (value, expires_at) = self.cache.get(&key).await?;
        if Self::is_expired(expires_at) {
            self.cache.invalidate(&key).await;
            return None;
        }
        Some(value)
    }

    async fn set(&self, key: &[String], value: Vec<u8>, options: SetOptions) {
        let key = join(key);
        let expires_at = options.ttl.map(|ttl| Instant::now() + ttl);
        self.cache.insert(key, (value, expires_at)).await;
    }

    async fn delete(&self, key: &[String]) {
        self.cache.invalidate(&join(key)).await;
    }

    async fn set_if_absent(&self, key: &[String], value: Vec<u8>, options: SetOptions) -> bool {
        let joined = join(key);
        let expires_at = options.ttl.map(|ttl| Instant::now() + ttl);
        let entry = self
            .cache
            .entry(joined)
            .or_insert_with(async move { (value, expires_at) })
            .await;
        entry.is_fresh()
    }
}

/// Simple in-memory store for tests, avoiding the `moka` cache machinery entirely.
#[derive(Default)]
pub struct TestKvStore {
    inner: Arc<Mutex<std::collections::HashMap<String, (Vec<u8>, Option<Instant>)>>>,
}

impl TestKvStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for TestKvStore {
    async fn get(&self, key: &[String]) -> Option<Vec<u8>> {
        let mut map = self.inner.lock().await;
        let joined = join(key);
        match map.get(&joined) {
            Some((_, expires_at)) if MokaKvStore::is_expired(*expires_at) => {
                map.remove(&joined);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    async fn set(&self, key: &[String], value: Vec<u8>, options: SetOptions) {
        let expires_at = options.ttl.map(|ttl| Instant::now() + ttl);
        self.inner.lock().await.insert(join(key), (value, expires_at));
    }

    async fn delete(&self, key: &[String]) {
        self.inner.lock().await.remove(&join(key));
    }

    async fn set_if_absent(&self, key: &[String], value: Vec<u8>, options: SetOptions) -> bool {
        let mut map = self.inner.lock().await;
        let joined = join(key);
        if map.contains_key(&joined) {
            return false;
        }
        let expires_at = options.ttl.map(|ttl| Instant::now() + ttl);
        map.insert(joined, (value, expires_at));
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_only_wins_once() {
        let store = TestKvStore::new();
        let key = vec!["a".to_string(), "b".to_string()];
        assert!(store.set_if_absent(&key, b"1".to_vec(), SetOptions::default()).await);
        assert!(!store.set_if_absent(&key, b"2".to_vec(), SetOptions::default()).await);
        assert_eq!(store.get(&key).await.unwrap(), b"1".to_vec());
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let store = TestKvStore::new();
        let key = vec!["k".to_string()];
        store
            .set(
                &key,
                b"v".to_vec(),
                SetOptions {
                    ttl: Some(Duration::from_millis(1)),
                },
            )
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let store = TestKvStore::new();
        let key = vec!["k".to_string()];
        store.set(&key, b"v".to_vec(), SetOptions::default()).await;
        store.delete(&key).await;
        assert!(store.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn json_helpers_round_trip() {
        let store = TestKvStore::new();
        let key = vec!["json".to_string()];
        store.set_json(&key, &vec![1, 2, 3], SetOptions::default()).await;
        let back: Vec<i32> = store.get_json(&key).await.unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }
}
