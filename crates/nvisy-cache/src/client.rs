//! Cache client construction and connection lifecycle.
//!
//! # Sharing
//!
//! `CacheClient` is cheaply cloneable: clones share the same store connection,
//! and typed [`Cache`] handles obtained from it share it as well. Operations
//! hold no client-side state across await points besides that connection, so
//! any number of tasks can use one client concurrently.
//!
//! ```ignore
//! let client = CacheClient::connect(config).await?;
//! let sessions = client.cache::<Session>();
//! sessions.set("abc", &session, Some(Duration::from_secs(3600))).await?;
//! client.close().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::store::{Direction, MemoryStore, NatsStore, StoreClient};
use crate::{
    Cache, CacheConfig, Codec, JsonCodec, KeyNamespace, Result, TRACING_TARGET_CACHE,
    TRACING_TARGET_CLIENT,
};

/// Cache client owning the store connection.
#[derive(Debug, Clone)]
pub struct CacheClient {
    inner: Arc<CacheClientInner>,
}

/// Inner data for the cache client
#[derive(Debug)]
pub(crate) struct CacheClientInner {
    pub(crate) store: Arc<dyn StoreClient>,
    pub(crate) namespace: KeyNamespace,
    pub(crate) config: CacheConfig,
}

impl CacheClient {
    /// Validates the configuration and connects to the configured NATS servers.
    #[tracing::instrument(skip(config), target = TRACING_TARGET_CLIENT)]
    pub async fn connect(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let store = NatsStore::connect(&config).await?;
        Ok(Self::with_store(store, config))
    }

    /// Creates a client backed by a fresh in-process [`MemoryStore`].
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::with_store(MemoryStore::new(), config)
    }

    /// Creates a client over an existing store.
    pub fn with_store(store: impl StoreClient + 'static, config: CacheConfig) -> Self {
        Self::with_shared_store(Arc::new(store), config)
    }

    /// Creates a client over a store shared with other owners.
    pub fn with_shared_store(store: Arc<dyn StoreClient>, config: CacheConfig) -> Self {
        let namespace = KeyNamespace::new(config.key_prefix());
        tracing::debug!(
            target: TRACING_TARGET_CLIENT,
            prefix = ?namespace.prefix(),
            operation_timeout_ms = config.operation_timeout().as_millis(),
            "Created cache client"
        );

        Self {
            inner: Arc::new(CacheClientInner {
                store,
                namespace,
                config,
            }),
        }
    }

    /// Returns a typed cache handle using the JSON codec.
    pub fn cache<T>(&self) -> Cache<T>
    where
        JsonCodec: Codec<T>,
    {
        self.cache_with_codec(JsonCodec)
    }

    /// Returns a typed cache handle using a custom codec.
    pub fn cache_with_codec<T, C>(&self, codec: C) -> Cache<T, C>
    where
        C: Codec<T>,
    {
        Cache::new(Arc::clone(&self.inner), codec)
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Returns the key namespace.
    #[must_use]
    pub fn namespace(&self) -> &KeyNamespace {
        &self.inner.namespace
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn StoreClient> {
        &self.inner.store
    }

    /// Deletes a key. Returns `false` if nothing was stored under it.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_CACHE)]
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    /// Increments a counter, initializing it to `default` when absent.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_CACHE)]
    pub async fn incr(
        &self,
        key: &str,
        delta: u64,
        default: u64,
        ttl: Option<Duration>,
    ) -> Result<u64> {
        self.inner
            .mutate(key, Direction::Increment, delta, default, ttl)
            .await
    }

    /// Decrements a counter, initializing it to `default` when absent.
    ///
    /// Counters never go below zero.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_CACHE)]
    pub async fn decr(
        &self,
        key: &str,
        delta: u64,
        default: u64,
        ttl: Option<Duration>,
    ) -> Result<u64> {
        self.inner
            .mutate(key, Direction::Decrement, delta, default, ttl)
            .await
    }

    /// Closes the store connection.
    ///
    /// In-flight operations get the configured grace period to finish; the rest
    /// fail with [`Error::Cancelled`](crate::Error::Cancelled), as does every
    /// operation issued afterwards. Calling `close` again is a no-op that
    /// returns `false`.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_CLIENT)]
    pub async fn close(&self) -> bool {
        let grace = self.inner.config.shutdown_grace();
        let closed = self.inner.store.shutdown(grace).await;
        if closed {
            tracing::info!(
                target: TRACING_TARGET_CLIENT,
                grace_ms = grace.as_millis(),
                "Cache client closed"
            );
        }
        closed
    }

    /// Returns `true` once the client has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.store.is_shut_down()
    }
}

impl CacheClientInner {
    /// Per-operation timeout.
    pub(crate) fn timeout(&self) -> Duration {
        self.config.operation_timeout()
    }

    pub(crate) async fn delete(&self, key: &str) -> Result<bool> {
        let physical = self.namespace.encode(key);
        let deleted = self
            .store
            .delete(&physical, self.timeout())
            .await
            .map_err(|failure| failure.into_error(&self.namespace))?;

        tracing::debug!(
            target: TRACING_TARGET_CACHE,
            key = %key,
            deleted = deleted,
            "Deleted key"
        );
        Ok(deleted)
    }

    async fn mutate(
        &self,
        key: &str,
        direction: Direction,
        delta: u64,
        default: u64,
        ttl: Option<Duration>,
    ) -> Result<u64> {
        let physical = self.namespace.encode(key);
        let value = self
            .store
            .mutate(&physical, direction, delta, default, ttl, self.timeout())
            .await
            .map_err(|failure| failure.into_error(&self.namespace))?
            .ok_or_else(|| crate::Error::illegal_complete_status(key))?;

        tracing::debug!(
            target: TRACING_TARGET_CACHE,
            key = %key,
            operation = %direction,
            delta = delta,
            value = value,
            "Mutated counter"
        );
        Ok(value)
    }
}
