#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for client construction and lifecycle.
///
/// Use this target for logging client wiring, configuration, and shutdown.
pub const TRACING_TARGET_CLIENT: &str = "nvisy_cache::client";

/// Tracing target for cache facade operations.
///
/// Use this target for logging get/set/add/delete, compare-and-set and transform operations.
pub const TRACING_TARGET_CACHE: &str = "nvisy_cache::cache";

/// Tracing target for store adapter operations.
///
/// Use this target for logging the raw operations issued against the underlying store.
pub const TRACING_TARGET_STORE: &str = "nvisy_cache::store";

/// Tracing target for store connection operations.
///
/// Use this target for logging connection establishment, reconnection, and teardown.
pub const TRACING_TARGET_CONNECTION: &str = "nvisy_cache::connection";

mod cache;
mod client;
mod codec;
mod config;
mod error;
mod key;
pub mod prelude;
pub mod store;
mod transform;

pub use cache::Cache;
pub use client::CacheClient;
pub use codec::{Codec, CodecError, JsonCodec};
pub use config::{CacheConfig, Credentials, FailureMode, Protocol};
pub use error::{BoxedError, Error, Result};
pub use key::{KEY_SEPARATOR, KeyNamespace};
pub use transform::Transformed;
