//! Prelude module for nvisy-cache.
//!
//! This module re-exports the most commonly used types and traits from nvisy-cache,
//! making it easy to import everything you need with a single `use` statement.
//!
//! # Example
//!
//! ```rust,ignore
//! use nvisy_cache::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let config = CacheConfig::new("nats://localhost:4222").with_key_prefix("app");
//! let client = CacheClient::connect(config).await?;
//! let hits = client
//!     .cache::<u64>()
//!     .transform_and_get("hits", None, |n| n.copied().unwrap_or(0) + 1)
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Client and cache handles
pub use crate::{Cache, CacheClient, Transformed};
// Configuration
pub use crate::{CacheConfig, Credentials, FailureMode, Protocol};
// Codecs
pub use crate::{Codec, JsonCodec};
// Store adapters
pub use crate::store::{MemoryStore, NatsStore, StoreClient};
// Error types
pub use crate::{Error, Result};
