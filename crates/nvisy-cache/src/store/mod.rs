//! Store client adapters.
//!
//! This module defines the boundary between the cache facade and the store
//! that actually holds the data:
//! - [`StoreClient`]: operations issued against physical keys
//! - [`StoreFailure`] / [`Status`]: the failure side of every operation
//! - [`MemoryStore`]: in-process store with memcached semantics
//! - [`NatsStore`]: NATS JetStream key-value adapter
//!
//! Every operation takes the physical key and a timeout, and completes with
//! either its own success payload or a [`StoreFailure`]. Success payloads
//! differ per operation category: presence (`Option<Bytes>`), a value with its
//! [`CasToken`], a boolean, or a counter.

mod counter;
mod driver;
mod memory;
mod nats;

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
pub use counter::Direction;
pub use driver::OperationDriver;
pub use memory::{MemoryStats, MemoryStore};
pub use nats::NatsStore;

/// Result of a single store operation.
pub type StoreResult<T> = std::result::Result<T, StoreFailure>;

/// Why a store operation did not complete.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum Status {
    /// The operation's timeout elapsed first.
    #[display("timed out")]
    TimedOut,
    /// The operation was aborted, typically by shutdown.
    #[display("cancelled")]
    Cancelled,
    /// Any other status reported by the store.
    #[display("unhandled status: {_0}")]
    Unhandled(String),
}

/// A failed store operation on a physical key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("store operation on '{key}' failed: {status}")]
pub struct StoreFailure {
    /// Physical key the operation was issued for.
    pub key: String,
    /// Failure status.
    pub status: Status,
}

impl StoreFailure {
    /// Create a failure with the given status.
    pub fn new(key: impl Into<String>, status: Status) -> Self {
        Self {
            key: key.into(),
            status,
        }
    }

    /// Create a timed out failure.
    pub fn timed_out(key: impl Into<String>) -> Self {
        Self::new(key, Status::TimedOut)
    }

    /// Create a cancelled failure.
    pub fn cancelled(key: impl Into<String>) -> Self {
        Self::new(key, Status::Cancelled)
    }

    /// Create an unhandled status failure.
    pub fn unhandled(key: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(key, Status::Unhandled(details.into()))
    }
}

/// Opaque revision of a stored value, consumed by [`StoreClient::cas`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    derive_more::Display,
    derive_more::From,
    derive_more::Into
)]
pub struct CasToken(u64);

/// A stored value together with the token of its current revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    /// Raw stored bytes.
    pub value: Bytes,
    /// Revision token to pass to a subsequent compare-and-set.
    pub token: CasToken,
}

/// Operations a cache store must provide.
///
/// Keys are physical keys. A `ttl` of `None` or zero means the entry never
/// expires. Implementations bound every call by `timeout` and report
/// [`Status::TimedOut`] when it elapses, and report [`Status::Cancelled`] for
/// calls made after, or aborted by, [`shutdown`](Self::shutdown).
#[async_trait::async_trait]
pub trait StoreClient: fmt::Debug + Send + Sync {
    /// Reads a value.
    async fn get(&self, key: &str, timeout: Duration) -> StoreResult<Option<Bytes>>;

    /// Reads a value together with its revision token.
    async fn gets(&self, key: &str, timeout: Duration) -> StoreResult<Option<VersionedValue>>;

    /// Writes a value unconditionally.
    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        timeout: Duration,
    ) -> StoreResult<()>;

    /// Writes a value only if the key is absent. Returns `false` if it existed.
    async fn add(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        timeout: Duration,
    ) -> StoreResult<bool>;

    /// Writes a value only if its revision still matches `token`.
    ///
    /// Returns `false` when the token is stale or the key no longer exists.
    async fn cas(
        &self,
        key: &str,
        value: Bytes,
        token: CasToken,
        ttl: Option<Duration>,
        timeout: Duration,
    ) -> StoreResult<bool>;

    /// Removes a key. Returns `false` if nothing was stored under it.
    async fn delete(&self, key: &str, timeout: Duration) -> StoreResult<bool>;

    /// Atomically increments or decrements a counter.
    ///
    /// An absent key is initialized to `default` (subject to `ttl`), which is
    /// then the returned value. A successful completion always carries the new
    /// value; `Ok(None)` is a contract violation the facade reports as such.
    async fn mutate(
        &self,
        key: &str,
        direction: Direction,
        delta: u64,
        default: u64,
        ttl: Option<Duration>,
        timeout: Duration,
    ) -> StoreResult<Option<u64>>;

    /// Stops accepting operations and releases the connection.
    ///
    /// Waits up to `grace` for in-flight operations to finish, then cancels
    /// the rest. Returns `false` if the store was already shut down.
    async fn shutdown(&self, grace: Duration) -> bool;

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    fn is_shut_down(&self) -> bool;
}

/// Converts a TTL into the optional expiry interval it denotes.
pub(crate) fn effective_ttl(ttl: Option<Duration>) -> Option<Duration> {
    ttl.filter(|ttl| !ttl.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(Status::TimedOut.to_string(), "timed out");
        assert_eq!(
            Status::Unhandled("NOT_STORED".to_string()).to_string(),
            "unhandled status: NOT_STORED"
        );
    }

    #[test]
    fn test_failure_display() {
        let failure = StoreFailure::cancelled("app-key");
        assert_eq!(
            failure.to_string(),
            "store operation on 'app-key' failed: cancelled"
        );
    }

    #[test]
    fn test_cas_token_conversions() {
        let token = CasToken::from(7);
        assert_eq!(u64::from(token), 7);
        assert_eq!(token.to_string(), "7");
    }

    #[test]
    fn test_effective_ttl() {
        assert_eq!(effective_ttl(None), None);
        assert_eq!(effective_ttl(Some(Duration::ZERO)), None);
        assert_eq!(
            effective_ttl(Some(Duration::from_secs(5))),
            Some(Duration::from_secs(5))
        );
    }
}
