//! Cache operations exposed as subcommands.
//!
//! Values are JSON documents, stored with the library's JSON codec, so entries
//! written here are readable by any `Cache<T>` whose `T` deserializes from
//! them. Every command prints its result as JSON.

use std::time::Duration;

use anyhow::Context;
use clap::Subcommand;
use nvisy_cache::{CacheClient, Transformed};
use serde_json::Value;
use tokio::time::Instant;

use crate::TRACING_TARGET_COMMAND;

/// A single cache operation.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the value stored under a key, or null
    Get {
        /// Logical key
        key: String,
        /// Value printed on a miss instead of null
        #[arg(long, value_parser = parse_json)]
        default: Option<Value>,
    },

    /// Store a value unconditionally
    Set {
        /// Logical key
        key: String,
        /// JSON value
        #[arg(value_parser = parse_json)]
        value: Value,
    },

    /// Store a value only if the key is absent
    Add {
        /// Logical key
        key: String,
        /// JSON value
        #[arg(value_parser = parse_json)]
        value: Value,
    },

    /// Remove a key
    Delete {
        /// Logical key
        key: String,
    },

    /// Increment a counter
    Incr {
        /// Logical key
        key: String,
        /// Amount to add
        #[arg(long, default_value_t = 1)]
        delta: u64,
        /// Initial value when the counter does not exist
        #[arg(long, default_value_t = 0)]
        default: u64,
    },

    /// Decrement a counter, never going below zero
    Decr {
        /// Logical key
        key: String,
        /// Amount to subtract
        #[arg(long, default_value_t = 1)]
        delta: u64,
        /// Initial value when the counter does not exist
        #[arg(long, default_value_t = 0)]
        default: u64,
    },

    /// Replace a value only if it currently equals the expected one
    Cas {
        /// Logical key
        key: String,
        /// New JSON value
        #[arg(value_parser = parse_json)]
        value: Value,
        /// Expected current JSON value; omit to write only if absent
        #[arg(long, value_parser = parse_json)]
        expected: Option<Value>,
    },

    /// Atomically add to a JSON integer, creating it when absent
    Bump {
        /// Logical key
        key: String,
        /// Amount to add, may be negative
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        by: i64,
    },
}

impl Command {
    /// Runs the command and returns its JSON result.
    pub async fn execute(
        &self,
        client: &CacheClient,
        ttl: Option<Duration>,
    ) -> anyhow::Result<Value> {
        tracing::debug!(
            target: TRACING_TARGET_COMMAND,
            command = self.name(),
            ttl_secs = ?ttl.map(|ttl| ttl.as_secs()),
            "Executing command"
        );

        let values = client.cache::<Value>();
        let output = match self {
            Self::Get { key, default } => {
                let value = values.get(key).await.context("get failed")?;
                value.or_else(|| default.clone()).unwrap_or(Value::Null)
            }
            Self::Set { key, value } => {
                values.set(key, value, ttl).await.context("set failed")?;
                Value::Bool(true)
            }
            Self::Add { key, value } => {
                let added = values.add(key, value, ttl).await.context("add failed")?;
                Value::Bool(added)
            }
            Self::Delete { key } => {
                let deleted = client.delete(key).await.context("delete failed")?;
                Value::Bool(deleted)
            }
            Self::Incr { key, delta, default } => {
                let value = client
                    .incr(key, *delta, *default, ttl)
                    .await
                    .context("incr failed")?;
                Value::from(value)
            }
            Self::Decr { key, delta, default } => {
                let value = client
                    .decr(key, *delta, *default, ttl)
                    .await
                    .context("decr failed")?;
                Value::from(value)
            }
            Self::Cas {
                key,
                value,
                expected,
            } => {
                let stored = values
                    .compare_and_set(key, expected.as_ref(), value, ttl)
                    .await
                    .context("compare-and-set failed")?;
                Value::Bool(stored)
            }
            Self::Bump { key, by } => {
                let deadline = Instant::now() + client.config().operation_timeout();
                let Transformed { old, new } = client
                    .cache::<i64>()
                    .transform(key, ttl, deadline, |current| {
                        current.copied().unwrap_or(0).saturating_add(*by)
                    })
                    .await
                    .context("bump failed")?;
                serde_json::json!({ "old": old, "new": new })
            }
        };

        Ok(output)
    }

    /// Returns the subcommand name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Set { .. } => "set",
            Self::Add { .. } => "add",
            Self::Delete { .. } => "delete",
            Self::Incr { .. } => "incr",
            Self::Decr { .. } => "decr",
            Self::Cas { .. } => "cas",
            Self::Bump { .. } => "bump",
        }
    }
}

/// Parses a command-line argument as a JSON document.
fn parse_json(raw: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(raw)
}
