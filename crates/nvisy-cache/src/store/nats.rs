//! NATS JetStream key-value adapter.
//!
//! Maps the cache store operations onto a JetStream KV bucket:
//!
//! | Store operation | KV operation                                   |
//! |-----------------|------------------------------------------------|
//! | `get`/`gets`    | `entry`, with the revision as the CAS token    |
//! | `set`           | `put`                                          |
//! | `add`           | `create`, or `create_with_ttl` given a TTL     |
//! | `cas`           | `update` with the expected revision            |
//! | `delete`        | `delete_expect_revision` on the read revision  |
//! | `mutate`        | `create`/`update` loop on an ASCII counter     |
//!
//! Per-entry TTLs are honored where a key is created (`add` and the first write
//! of a counter), which requires a bucket with limit markers enabled; buckets
//! created here have them. `put` and `update` have no per-message TTL, so `set`,
//! `cas` and counter updates keep whatever expiry the entry already has, and
//! otherwise the bucket's `max_age` applies.

use std::fmt::Display;
use std::time::Duration;

use async_nats::jetstream::{self, kv};
use async_nats::{Client, ConnectOptions};
use bytes::Bytes;
use tokio::time::timeout;

use super::{
    CasToken, Direction, OperationDriver, StoreClient, StoreFailure, StoreResult, VersionedValue,
    counter,
};
use crate::{
    CacheConfig, Credentials, Error, FailureMode, Result, TRACING_TARGET_CONNECTION,
    TRACING_TARGET_STORE,
};

const CLIENT_NAME: &str = "nvisy-cache";
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const LIMIT_MARKER_TTL: Duration = Duration::from_secs(60);

/// [`StoreClient`] backed by a NATS JetStream key-value bucket.
///
/// The underlying `async-nats` client multiplexes every operation over one
/// connection, so a single `NatsStore` serves any number of concurrent callers.
#[derive(Debug)]
pub struct NatsStore {
    client: Client,
    bucket: kv::Store,
    driver: OperationDriver,
}

impl NatsStore {
    /// Connects to the configured servers and opens (or creates) the bucket.
    #[tracing::instrument(skip(config), target = TRACING_TARGET_CONNECTION)]
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        tracing::info!(
            target: TRACING_TARGET_CONNECTION,
            servers = %config.cache_servers,
            failure_mode = %config.cache_failure_mode,
            protocol = %config.cache_protocol,
            "Connecting to cache servers"
        );

        let client = timeout(
            config.connect_timeout(),
            async_nats::connect_with_options(
                config.cache_servers.as_str(),
                Self::connect_options(config),
            ),
        )
        .await
        .map_err(|_| {
            Error::Connection(
                format!("connection timed out after {:?}", config.connect_timeout()).into(),
            )
        })?
        .map_err(|e| Error::Connection(Box::new(e)))?;

        let jetstream = jetstream::new(client.clone());
        let bucket = Self::open_bucket(&jetstream, config.bucket()).await?;

        let server_info = client.server_info();
        tracing::info!(
            target: TRACING_TARGET_CONNECTION,
            server_host = %server_info.host,
            server_version = %server_info.version,
            bucket = %config.bucket(),
            "Connected to cache servers"
        );

        Ok(Self {
            client,
            bucket,
            driver: OperationDriver::new(),
        })
    }

    /// Builds connection options from the configuration.
    fn connect_options(config: &CacheConfig) -> ConnectOptions {
        let mut options = ConnectOptions::new()
            .name(CLIENT_NAME)
            .connection_timeout(config.connect_timeout());

        options = match config.credentials() {
            Some(Credentials::UserPassword { user, pass }) => {
                options.user_and_password(user, pass)
            }
            Some(Credentials::Token { token }) => options.token(token),
            None => options,
        };

        options = match config.cache_failure_mode {
            FailureMode::Retry => options.retry_on_initial_connect().max_reconnects(None),
            FailureMode::Cancel => options.max_reconnects(Some(1)),
            FailureMode::Redistribute => options.max_reconnects(config.max_reconnects_option()),
        };

        let base_delay = config.reconnect_delay();
        options.reconnect_delay_callback(move |attempts| {
            base_delay
                .saturating_mul(2_u32.saturating_pow(attempts.min(16) as u32))
                .min(MAX_RECONNECT_DELAY)
        })
    }

    /// Opens the bucket, creating it when it does not exist yet.
    async fn open_bucket(jetstream: &jetstream::Context, name: &str) -> Result<kv::Store> {
        if let Ok(bucket) = jetstream.get_key_value(name).await {
            tracing::debug!(
                target: TRACING_TARGET_CONNECTION,
                bucket = %name,
                "Using existing KV bucket"
            );
            return Ok(bucket);
        }

        tracing::debug!(
            target: TRACING_TARGET_CONNECTION,
            bucket = %name,
            "Creating new KV bucket"
        );
        jetstream
            .create_key_value(Self::bucket_config(name))
            .await
            .map_err(|e| Error::Connection(Box::new(e)))
    }

    /// Bucket settings; limit markers enable per-entry TTLs on create.
    fn bucket_config(name: &str) -> kv::Config {
        kv::Config {
            bucket: name.to_string(),
            description: "Cache entries".to_string(),
            history: 1,
            limit_markers: Some(LIMIT_MARKER_TTL),
            ..Default::default()
        }
    }

    /// Reads the live entry for a key, treating delete markers as absent.
    async fn live_entry(&self, key: &str) -> StoreResult<Option<kv::Entry>> {
        let entry = self
            .bucket
            .entry(key)
            .await
            .map_err(|e| entry_failure(key, e))?;
        Ok(entry.filter(|entry| matches!(entry.operation, kv::Operation::Put)))
    }

    async fn create(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StoreResult<bool> {
        let created = match super::effective_ttl(ttl) {
            Some(ttl) => self.bucket.create_with_ttl(key, value, ttl).await,
            None => self.bucket.create(key, value).await,
        };
        match created {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), kv::CreateErrorKind::AlreadyExists) => Ok(false),
            Err(e) => Err(unhandled(key, e)),
        }
    }

    async fn update(&self, key: &str, value: Bytes, revision: u64) -> StoreResult<bool> {
        match self.bucket.update(key, value, revision).await {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), kv::UpdateErrorKind::WrongLastRevision) => Ok(false),
            Err(e) => Err(update_failure(key, e)),
        }
    }
}

fn unhandled(key: &str, error: impl Display) -> StoreFailure {
    StoreFailure::unhandled(key, error.to_string())
}

/// Maps an entry read error, keeping timeouts distinguishable.
fn entry_failure(key: &str, error: kv::EntryError) -> StoreFailure {
    match error.kind() {
        kv::EntryErrorKind::TimedOut => StoreFailure::timed_out(key),
        _ => unhandled(key, error),
    }
}

/// Maps an update or delete error, keeping timeouts distinguishable.
fn update_failure(key: &str, error: kv::UpdateError) -> StoreFailure {
    match error.kind() {
        kv::UpdateErrorKind::TimedOut => StoreFailure::timed_out(key),
        _ => unhandled(key, error),
    }
}

fn ignore_ttl(key: &str, ttl: Option<Duration>) {
    if let Some(ttl) = super::effective_ttl(ttl) {
        tracing::trace!(
            target: TRACING_TARGET_STORE,
            key = %key,
            ttl_secs = ttl.as_secs(),
            "Per-entry TTL not supported for this write, existing expiry applies"
        );
    }
}

#[async_trait::async_trait]
impl StoreClient for NatsStore {
    async fn get(&self, key: &str, timeout: Duration) -> StoreResult<Option<Bytes>> {
        self.driver
            .run(key, timeout, async {
                Ok(self.live_entry(key).await?.map(|entry| entry.value))
            })
            .await
    }

    async fn gets(&self, key: &str, timeout: Duration) -> StoreResult<Option<VersionedValue>> {
        self.driver
            .run(key, timeout, async {
                Ok(self.live_entry(key).await?.map(|entry| VersionedValue {
                    value: entry.value,
                    token: CasToken::from(entry.revision),
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
        ignore_ttl(key, ttl);
        self.driver
            .run(key, timeout, async {
                self.bucket
                    .put(key, value)
                    .await
                    .map(|_| ())
                    .map_err(|e| unhandled(key, e))
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
        self.driver
            .run(key, timeout, self.create(key, value, ttl))
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
        ignore_ttl(key, ttl);
        self.driver
            .run(key, timeout, self.update(key, value, token.into()))
            .await
    }

    async fn delete(&self, key: &str, timeout: Duration) -> StoreResult<bool> {
        self.driver
            .run(key, timeout, async {
                loop {
                    let Some(entry) = self.live_entry(key).await? else {
                        return Ok(false);
                    };
                    match self
                        .bucket
                        .delete_expect_revision(key, Some(entry.revision))
                        .await
                    {
                        Ok(()) => return Ok(true),
                        Err(e) if matches!(e.kind(), kv::DeleteErrorKind::WrongLastRevision) => {
                            tokio::task::yield_now().await;
                        }
                        Err(e) => return Err(update_failure(key, e)),
                    }
                }
            })
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
        self.driver
            .run(key, timeout, async {
                loop {
                    let written = match self.live_entry(key).await? {
                        None => self
                            .create(key, counter::format(default), ttl)
                            .await?
                            .then_some(default),
                        Some(entry) => {
                            ignore_ttl(key, ttl);
                            let current = counter::parse(&entry.value)
                                .map_err(|details| StoreFailure::unhandled(key, details))?;
                            let next = direction.apply(current, delta);
                            self.update(key, counter::format(next), entry.revision)
                                .await?
                                .then_some(next)
                        }
                    };

                    if written.is_some() {
                        return Ok(written);
                    }
                    tokio::task::yield_now().await;
                }
            })
            .await
    }

    async fn shutdown(&self, grace: Duration) -> bool {
        if !self.driver.shutdown(grace).await {
            return false;
        }

        match timeout(grace, self.client.flush()).await {
            Ok(Ok(())) => tracing::info!(
                target: TRACING_TARGET_CONNECTION,
                "Cache connection closed"
            ),
            Ok(Err(e)) => tracing::warn!(
                target: TRACING_TARGET_CONNECTION,
                error = %e,
                "Failed to flush cache connection on close"
            ),
            Err(_) => tracing::warn!(
                target: TRACING_TARGET_CONNECTION,
                grace_ms = grace.as_millis(),
                "Timed out flushing cache connection on close"
            ),
        }
        true
    }

    fn is_shut_down(&self) -> bool {
        self.driver.is_closing()
    }
}
