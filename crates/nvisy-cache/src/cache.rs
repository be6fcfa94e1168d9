//! Typed cache facade.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::client::CacheClientInner;
use crate::store::{CasToken, StoreFailure};
use crate::{Codec, Error, JsonCodec, Result, TRACING_TARGET_CACHE};

/// Typed cache handle for values of type `T`, encoded with `C`.
///
/// Obtained from [`CacheClient::cache`](crate::CacheClient::cache) or
/// [`CacheClient::cache_with_codec`](crate::CacheClient::cache_with_codec).
/// Handles are cheap to clone and share the client's connection.
///
/// Write operations take the value as `impl Into<Option<&T>>`: passing `None`
/// skips the write entirely and completes without contacting the store.
pub struct Cache<T, C = JsonCodec> {
    inner: Arc<CacheClientInner>,
    codec: C,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C: Clone> Clone for Cache<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            codec: self.codec.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, C> fmt::Debug for Cache<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("prefix", &self.inner.namespace.prefix())
            .field("type_name", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<T, C> Cache<T, C> {
    pub(crate) fn new(inner: Arc<CacheClientInner>, codec: C) -> Self {
        Self {
            inner,
            codec,
            _marker: PhantomData,
        }
    }
}

impl<T, C> Cache<T, C>
where
    T: Send + Sync + 'static,
    C: Codec<T>,
{
    /// Per-operation timeout from the client configuration.
    pub(crate) fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    /// Stores `value` only if `key` is absent.
    ///
    /// Returns `true` if the value was written and `false` if the key already
    /// existed, in which case the stored value is left untouched. A `None`
    /// value returns `false` without contacting the store.
    #[tracing::instrument(skip(self, value), target = TRACING_TARGET_CACHE)]
    pub async fn add<'a>(
        &self,
        key: &str,
        value: impl Into<Option<&'a T>>,
        ttl: Option<Duration>,
    ) -> Result<bool>
    where
        T: 'a,
    {
        let Some(value) = value.into() else {
            return Ok(false);
        };
        let bytes = self.encode(key, value)?;
        self.add_encoded(key, bytes, ttl, self.timeout()).await
    }

    /// Stores `value` unconditionally. A `None` value is a no-op.
    #[tracing::instrument(skip(self, value), target = TRACING_TARGET_CACHE)]
    pub async fn set<'a>(
        &self,
        key: &str,
        value: impl Into<Option<&'a T>>,
        ttl: Option<Duration>,
    ) -> Result<()>
    where
        T: 'a,
    {
        let Some(value) = value.into() else {
            return Ok(());
        };
        let bytes = self.encode(key, value)?;
        let size = bytes.len();
        let physical = self.inner.namespace.encode(key);
        self.inner
            .store
            .set(&physical, bytes, ttl, self.timeout())
            .await
            .map_err(|failure| self.translate(failure))?;

        tracing::debug!(
            target: TRACING_TARGET_CACHE,
            key = %key,
            size_bytes = size,
            "Stored value"
        );
        Ok(())
    }

    /// Reads a value. A missing key is `Ok(None)`, never an error.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_CACHE)]
    pub async fn get(&self, key: &str) -> Result<Option<T>> {
        let physical = self.inner.namespace.encode(key);
        let bytes = self
            .inner
            .store
            .get(&physical, self.timeout())
            .await
            .map_err(|failure| self.translate(failure))?;

        tracing::debug!(
            target: TRACING_TARGET_CACHE,
            key = %key,
            cache_hit = bytes.is_some(),
            "Retrieved value"
        );
        bytes.map(|bytes| self.decode(key, &bytes)).transpose()
    }

    /// Reads a value, falling back to `default` on a miss.
    ///
    /// `default` is only evaluated when the key is absent.
    #[tracing::instrument(skip(self, default), target = TRACING_TARGET_CACHE)]
    pub async fn get_or_else<F>(&self, key: &str, default: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        Ok(self.get(key).await?.unwrap_or_else(default))
    }

    /// Deletes a key. Returns `false` if nothing was stored under it.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_CACHE)]
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    /// Replaces the value under `key` if it currently equals `expected`.
    ///
    /// With `expected = None` this is [`add`](Self::add): the write only
    /// happens if the key does not exist yet. Otherwise the current value is
    /// read along with its revision token; if the key is missing or the value
    /// differs from `expected`, `false` is returned without writing. If it
    /// matches, a compare-and-set with the token decides the outcome, so a
    /// concurrent writer in between makes this return `false`.
    #[tracing::instrument(skip(self, expected, new_value), target = TRACING_TARGET_CACHE)]
    pub async fn compare_and_set<'a>(
        &self,
        key: &str,
        expected: Option<&T>,
        new_value: impl Into<Option<&'a T>>,
        ttl: Option<Duration>,
    ) -> Result<bool>
    where
        T: PartialEq + 'a,
    {
        let Some(expected) = expected else {
            return self.add(key, new_value, ttl).await;
        };
        let Some(new_value) = new_value.into() else {
            return Ok(false);
        };

        let Some((current, token)) = self.gets_decoded(key, self.timeout()).await? else {
            tracing::debug!(
                target: TRACING_TARGET_CACHE,
                key = %key,
                "Compare-and-set skipped, key is absent"
            );
            return Ok(false);
        };

        if current != *expected {
            tracing::debug!(
                target: TRACING_TARGET_CACHE,
                key = %key,
                "Compare-and-set skipped, value differs from expected"
            );
            return Ok(false);
        }

        let bytes = self.encode(key, new_value)?;
        self.cas_encoded(key, bytes, token, ttl, self.timeout())
            .await
    }

    pub(crate) fn encode(&self, key: &str, value: &T) -> Result<Bytes> {
        self.codec
            .encode(value)
            .map_err(|source| Error::codec(key, source))
    }

    pub(crate) fn decode(&self, key: &str, bytes: &[u8]) -> Result<T> {
        self.codec
            .decode(bytes)
            .map_err(|source| Error::codec(key, source))
    }

    pub(crate) fn translate(&self, failure: StoreFailure) -> Error {
        failure.into_error(&self.inner.namespace)
    }

    /// Add-if-absent of an already encoded value.
    pub(crate) async fn add_encoded(
        &self,
        key: &str,
        bytes: Bytes,
        ttl: Option<Duration>,
        timeout: Duration,
    ) -> Result<bool> {
        let physical = self.inner.namespace.encode(key);
        let added = self
            .inner
            .store
            .add(&physical, bytes, ttl, timeout)
            .await
            .map_err(|failure| self.translate(failure))?;

        tracing::debug!(
            target: TRACING_TARGET_CACHE,
            key = %key,
            added = added,
            "Add completed"
        );
        Ok(added)
    }

    /// Compare-and-set of an already encoded value.
    pub(crate) async fn cas_encoded(
        &self,
        key: &str,
        bytes: Bytes,
        token: CasToken,
        ttl: Option<Duration>,
        timeout: Duration,
    ) -> Result<bool> {
        let physical = self.inner.namespace.encode(key);
        let stored = self
            .inner
            .store
            .cas(&physical, bytes, token, ttl, timeout)
            .await
            .map_err(|failure| self.translate(failure))?;

        tracing::debug!(
            target: TRACING_TARGET_CACHE,
            key = %key,
            token = %token,
            stored = stored,
            "Compare-and-set completed"
        );
        Ok(stored)
    }

    /// Reads and decodes a value together with its revision token.
    pub(crate) async fn gets_decoded(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<(T, CasToken)>> {
        let physical = self.inner.namespace.encode(key);
        let versioned = self
            .inner
            .store
            .gets(&physical, timeout)
            .await
            .map_err(|failure| self.translate(failure))?;

        versioned
            .map(|versioned| Ok((self.decode(key, &versioned.value)?, versioned.token)))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::store::MemoryStore;
    use crate::{CacheClient, CacheConfig, CodecError};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Session {
        user: String,
        visits: u32,
    }

    fn session(user: &str, visits: u32) -> Session {
        Session {
            user: user.to_string(),
            visits,
        }
    }

    fn config() -> CacheConfig {
        CacheConfig::new("nats://localhost:4222").with_key_prefix("test")
    }

    fn setup() -> (Arc<MemoryStore>, Cache<Session>) {
        let store = Arc::new(MemoryStore::new());
        let client = CacheClient::with_shared_store(store.clone(), config());
        (store, client.cache())
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (store, cache) = setup();
        cache.set("s1", &session("ada", 1), None).await.unwrap();
        assert_eq!(cache.get("s1").await.unwrap(), Some(session("ada", 1)));
        assert!(store.raw("test-s1").await.is_some());
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (_, cache) = setup();
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_none_writes_skip_the_store() {
        let (store, cache) = setup();
        cache.set("k", None, None).await.unwrap();
        assert!(!cache.add("k", None, None).await.unwrap());
        assert!(
            !cache
                .compare_and_set("k", Some(&session("a", 1)), None, None)
                .await
                .unwrap()
        );
        assert_eq!(store.stats().await.operations, 0);
    }

    #[tokio::test]
    async fn test_add_twice() {
        let (_, cache) = setup();
        assert!(cache.add("k", &session("first", 1), None).await.unwrap());
        assert!(!cache.add("k", &session("second", 2), None).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(session("first", 1)));
    }

    #[tokio::test]
    async fn test_get_or_else_is_lazy() {
        let (_, cache) = setup();
        cache.set("k", &session("ada", 1), None).await.unwrap();

        let hit = cache
            .get_or_else("k", || panic!("default evaluated on a hit"))
            .await
            .unwrap();
        assert_eq!(hit, session("ada", 1));

        let miss = cache
            .get_or_else("other", || session("default", 0))
            .await
            .unwrap();
        assert_eq!(miss, session("default", 0));
    }

    #[tokio::test]
    async fn test_delete() {
        let (_, cache) = setup();
        assert!(!cache.delete("k").await.unwrap());
        cache.set("k", &session("ada", 1), None).await.unwrap();
        assert!(cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_compare_and_set_without_expected_behaves_like_add() {
        let (_, cache) = setup();
        assert!(
            cache
                .compare_and_set("k", None, &session("first", 1), None)
                .await
                .unwrap()
        );
        assert!(
            !cache
                .compare_and_set("k", None, &session("second", 2), None)
                .await
                .unwrap()
        );
        assert_eq!(cache.get("k").await.unwrap(), Some(session("first", 1)));
    }

    #[tokio::test]
    async fn test_compare_and_set_with_matching_value() {
        let (_, cache) = setup();
        cache.set("k", &session("ada", 1), None).await.unwrap();
        assert!(
            cache
                .compare_and_set("k", Some(&session("ada", 1)), &session("ada", 2), None)
                .await
                .unwrap()
        );
        assert_eq!(cache.get("k").await.unwrap(), Some(session("ada", 2)));
    }

    #[tokio::test]
    async fn test_compare_and_set_with_mismatched_value_does_not_write() {
        let (store, cache) = setup();
        cache.set("k", &session("ada", 1), None).await.unwrap();
        let before = store.stats().await.operations;

        assert!(
            !cache
                .compare_and_set("k", Some(&session("bob", 1)), &session("ada", 9), None)
                .await
                .unwrap()
        );
        assert_eq!(cache.get("k").await.unwrap(), Some(session("ada", 1)));
        // one read-with-version for the compare, one for the get above
        assert_eq!(store.stats().await.operations, before + 2);
    }

    #[tokio::test]
    async fn test_compare_and_set_on_absent_key() {
        let (store, cache) = setup();
        assert!(
            !cache
                .compare_and_set("k", Some(&session("ada", 1)), &session("ada", 2), None)
                .await
                .unwrap()
        );
        assert_eq!(store.raw("test-k").await, None);
    }

    #[tokio::test]
    async fn test_decode_error_carries_logical_key() {
        let store = Arc::new(MemoryStore::new());
        let client = CacheClient::with_shared_store(store.clone(), config());
        client.cache::<String>().set("k", &"text".to_string(), None).await.unwrap();

        let error = client.cache::<Session>().get("k").await.unwrap_err();
        assert!(matches!(error, Error::Codec { key, .. } if key == "k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out() {
        let client = CacheClient::with_store(
            MemoryStore::new().with_latency(Duration::from_secs(2)),
            config().with_operation_timeout_ms(100),
        );
        let error = client.cache::<Session>().get("k").await.unwrap_err();
        assert!(matches!(&error, Error::Timeout { key } if key == "k"));
        assert!(error.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let (_, cache) = setup();
        cache
            .set("k", &session("ada", 1), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    /// Stores strings as raw UTF-8 instead of JSON.
    #[derive(Debug, Clone, Copy)]
    struct Utf8Codec;

    impl Codec<String> for Utf8Codec {
        fn encode(&self, value: &String) -> std::result::Result<Bytes, CodecError> {
            Ok(Bytes::copy_from_slice(value.as_bytes()))
        }

        fn decode(&self, bytes: &[u8]) -> std::result::Result<String, CodecError> {
            Ok(String::from_utf8(bytes.to_vec())?)
        }
    }

    #[tokio::test]
    async fn test_custom_codec() {
        let store = Arc::new(MemoryStore::new());
        let client = CacheClient::with_shared_store(store.clone(), config());
        let cache = client.cache_with_codec(Utf8Codec);

        cache.set("greeting", &"hello".to_string(), None).await.unwrap();
        assert_eq!(
            store.raw("test-greeting").await,
            Some(Bytes::from_static(b"hello"))
        );
        assert_eq!(
            cache.get("greeting").await.unwrap(),
            Some("hello".to_string())
        );
    }
}
