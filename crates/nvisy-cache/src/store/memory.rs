//! In-process store with memcached semantics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{
    CasToken, Direction, OperationDriver, StoreClient, StoreFailure, StoreResult, VersionedValue,
    counter, effective_ttl,
};
use crate::TRACING_TARGET_STORE;

/// A stored entry.
#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    token: CasToken,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// In-process [`StoreClient`] with memcached semantics.
///
/// Every write assigns a fresh revision token, expired entries are treated as
/// absent, and counters are kept as ASCII decimals. An optional artificial
/// latency is applied before each operation, which makes timeouts observable
/// in tests.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    next_token: AtomicU64,
    operations: AtomicU64,
    latency: Option<Duration>,
    driver: OperationDriver,
}

/// Memory store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    /// Number of live entries.
    pub entry_count: usize,
    /// Number of operations issued against the store since creation.
    pub operations: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            operations: AtomicU64::new(0),
            latency: None,
            driver: OperationDriver::new(),
        }
    }

    /// Delays every operation by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Returns the raw bytes stored under a physical key, if live.
    pub async fn raw(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Returns store statistics, sweeping expired entries first.
    pub async fn stats(&self) -> MemoryStats {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.is_live(now));
        MemoryStats {
            entry_count: entries.len(),
            operations: self.operations.load(Ordering::SeqCst),
        }
    }

    fn next_token(&self) -> CasToken {
        CasToken::from(self.next_token.fetch_add(1, Ordering::SeqCst))
    }

    fn entry(&self, value: Bytes, ttl: Option<Duration>, now: Instant) -> Entry {
        Entry {
            value,
            token: self.next_token(),
            expires_at: effective_ttl(ttl).map(|ttl| now + ttl),
        }
    }

    /// Runs `apply` against the entry map through the operation driver.
    ///
    /// An expired entry under `key` is dropped first, so `apply` only ever
    /// sees live entries for the key it touches.
    async fn execute<T, F>(&self, key: &str, timeout: Duration, apply: F) -> StoreResult<T>
    where
        T: Send,
        F: FnOnce(&mut HashMap<String, Entry>, Instant) -> StoreResult<T> + Send,
    {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.driver
            .run(key, timeout, async {
                if let Some(latency) = self.latency {
                    tokio::time::sleep(latency).await;
                }
                let mut entries = self.entries.lock().await;
                let now = Instant::now();
                if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
                    entries.remove(key);
                }
                apply(&mut entries, now)
            })
            .await
    }
}

#[async_trait::async_trait]
impl StoreClient for MemoryStore {
    async fn get(&self, key: &str, timeout: Duration) -> StoreResult<Option<Bytes>> {
        self.execute(key, timeout, |entries, _| {
            Ok(entries.get(key).map(|entry| entry.value.clone()))
        })
        .await
    }

    async fn gets(&self, key: &str, timeout: Duration) -> StoreResult<Option<VersionedValue>> {
        self.execute(key, timeout, |entries, _| {
            Ok(entries.get(key).map(|entry| VersionedValue {
                value: entry.value.clone(),
                token: entry.token,
            }))
        })
        .await
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        timeout: Duration,
    ) -> StoreResult<()> {
        self.execute(key, timeout, |entries, now| {
            entries.insert(key.to_owned(), self.entry(value, ttl, now));
            Ok(())
        })
        .await
    }

    async fn add(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        timeout: Duration,
    ) -> StoreResult<bool> {
        self.execute(key, timeout, |entries, now| {
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(key.to_owned(), self.entry(value, ttl, now));
            Ok(true)
        })
        .await
    }

    async fn cas(
        &self,
        key: &str,
        value: Bytes,
        token: CasToken,
        ttl: Option<Duration>,
        timeout: Duration,
    ) -> StoreResult<bool> {
        self.execute(key, timeout, |entries, now| {
            match entries.get(key) {
                Some(entry) if entry.token == token => {}
                _ => return Ok(false),
            }
            entries.insert(key.to_owned(), self.entry(value, ttl, now));
            Ok(true)
        })
        .await
    }

    async fn delete(&self, key: &str, timeout: Duration) -> StoreResult<bool> {
        self.execute(key, timeout, |entries, _| Ok(entries.remove(key).is_some()))
            .await
    }

    async fn mutate(
        &self,
        key: &str,
        direction: Direction,
        delta: u64,
        default: u64,
        ttl: Option<Duration>,
        timeout: Duration,
    ) -> StoreResult<Option<u64>> {
        self.execute(key, timeout, |entries, now| {
            let Some(entry) = entries.get_mut(key) else {
                entries.insert(key.to_owned(), self.entry(counter::format(default), ttl, now));
                return Ok(Some(default));
            };

            let current = counter::parse(&entry.value)
                .map_err(|details| StoreFailure::unhandled(key, details))?;
            let next = direction.apply(current, delta);
            entry.value = counter::format(next);
            entry.token = self.next_token();
            Ok(Some(next))
        })
        .await
    }

    async fn shutdown(&self, grace: Duration) -> bool {
        let first = self.driver.shutdown(grace).await;
        if first {
            tracing::debug!(
                target: TRACING_TARGET_STORE,
                "Memory store shut down"
            );
        }
        first
    }

    fn is_shut_down(&self) -> bool {
        self.driver.is_closing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Status;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn bytes(value: &'static str) -> Bytes {
        Bytes::from_static(value.as_bytes())
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::new();
        store.set("k", bytes("v"), None, TIMEOUT).await.unwrap();
        assert_eq!(store.get("k", TIMEOUT).await.unwrap(), Some(bytes("v")));
        assert_eq!(store.get("missing", TIMEOUT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_only_when_absent() {
        let store = MemoryStore::new();
        assert!(store.add("k", bytes("1"), None, TIMEOUT).await.unwrap());
        assert!(!store.add("k", bytes("2"), None, TIMEOUT).await.unwrap());
        assert_eq!(store.raw("k").await, Some(bytes("1")));
    }

    #[tokio::test]
    async fn test_cas_consumes_token() {
        let store = MemoryStore::new();
        store.set("k", bytes("a"), None, TIMEOUT).await.unwrap();
        let read = store.gets("k", TIMEOUT).await.unwrap().unwrap();

        assert!(store.cas("k", bytes("b"), read.token, None, TIMEOUT).await.unwrap());
        assert!(!store.cas("k", bytes("c"), read.token, None, TIMEOUT).await.unwrap());
        assert_eq!(store.raw("k").await, Some(bytes("b")));
    }

    #[tokio::test]
    async fn test_cas_on_missing_key() {
        let store = MemoryStore::new();
        let token = CasToken::from(1);
        assert!(!store.cas("k", bytes("b"), token, None, TIMEOUT).await.unwrap());
        assert_eq!(store.raw("k").await, None);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        assert!(!store.delete("k", TIMEOUT).await.unwrap());
        store.set("k", bytes("v"), None, TIMEOUT).await.unwrap();
        assert!(store.delete("k", TIMEOUT).await.unwrap());
        assert_eq!(store.get("k", TIMEOUT).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        let ttl = Some(Duration::from_secs(10));
        store.set("k", bytes("v"), ttl, TIMEOUT).await.unwrap();
        store.set("forever", bytes("v"), Some(Duration::ZERO), TIMEOUT).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.get("k", TIMEOUT).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k", TIMEOUT).await.unwrap(), None);
        assert!(store.add("k", bytes("w"), None, TIMEOUT).await.unwrap());
        assert!(store.get("forever", TIMEOUT).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_checked_per_key() {
        let store = MemoryStore::new();
        store.set("short", bytes("v"), Some(Duration::from_secs(10)), TIMEOUT).await.unwrap();
        store.set("long", bytes("v"), None, TIMEOUT).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;

        store.get("long", TIMEOUT).await.unwrap();
        assert_eq!(store.entries.lock().await.len(), 2);

        assert_eq!(store.stats().await.entry_count, 1);
        assert_eq!(store.entries.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mutate_with_default() {
        let store = MemoryStore::new();
        for expected in [100, 105] {
            let value = store
                .mutate("n", Direction::Increment, 5, 100, None, TIMEOUT)
                .await
                .unwrap();
            assert_eq!(value, Some(expected));
        }
        assert_eq!(
            store
                .mutate("n", Direction::Decrement, 200, 0, None, TIMEOUT)
                .await
                .unwrap(),
            Some(0)
        );
        assert_eq!(store.raw("n").await, Some(bytes("0")));
    }

    #[tokio::test]
    async fn test_mutate_non_numeric() {
        let store = MemoryStore::new();
        store.set("k", bytes("\"text\""), None, TIMEOUT).await.unwrap();
        let failure = store
            .mutate("k", Direction::Increment, 1, 0, None, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(failure.status, Status::Unhandled(_)));
        assert_eq!(failure.key, "k");
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_causes_timeout() {
        let store = MemoryStore::new().with_latency(Duration::from_millis(500));
        let failure = store
            .set("k", bytes("v"), None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(failure.status, Status::TimedOut);
        assert_eq!(store.raw("k").await, None);
    }

    #[tokio::test]
    async fn test_stats_and_shutdown() {
        let store = MemoryStore::new();
        store.set("a", bytes("1"), None, TIMEOUT).await.unwrap();
        store.get("a", TIMEOUT).await.unwrap();
        assert_eq!(
            store.stats().await,
            MemoryStats {
                entry_count: 1,
                operations: 2,
            }
        );

        assert!(store.shutdown(Duration::from_millis(10)).await);
        assert!(store.is_shut_down());
        let failure = store.get("a", TIMEOUT).await.unwrap_err();
        assert_eq!(failure.status, Status::Cancelled);
    }
}
