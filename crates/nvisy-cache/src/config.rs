//! Cache client configuration.

use std::time::Duration;

#[cfg(feature = "config")]
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How the store adapter reacts when a server becomes unreachable.
///
/// Passed through to the adapter unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[derive(derive_more::Display)]
#[cfg_attr(feature = "config", derive(ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Keep retrying the failed server.
    #[display("retry")]
    Retry,
    /// Fail pending operations as soon as the server is lost.
    #[display("cancel")]
    Cancel,
    /// Move to the other configured servers.
    #[default]
    #[display("redistribute")]
    Redistribute,
}

/// Wire sub-protocol requested from the store adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[derive(derive_more::Display)]
#[cfg_attr(feature = "config", derive(ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Binary framing.
    #[default]
    #[display("binary")]
    Binary,
    /// Text framing.
    #[display("text")]
    Text,
}

/// Store authentication credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Credentials {
    /// Username and password authentication
    UserPassword {
        /// Username for authentication
        user: String,
        /// Password for authentication
        pass: String,
    },
    /// Token authentication
    Token {
        /// Token string
        token: String,
    },
}

impl Credentials {
    /// Create user/password credentials.
    pub fn user_password(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self::UserPassword {
            user: user.into(),
            pass: pass.into(),
        }
    }

    /// Create token-based credentials.
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token {
            token: token.into(),
        }
    }
}

/// Configuration for cache clients with sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct CacheConfig {
    /// Cache server URLs (comma-separated)
    #[cfg_attr(feature = "config", arg(long = "cache-servers", env = "CACHE_SERVERS"))]
    pub cache_servers: String,

    /// Prefix prepended to every key
    #[cfg_attr(
        feature = "config",
        arg(long = "cache-key-prefix", env = "CACHE_KEY_PREFIX")
    )]
    pub cache_key_prefix: Option<String>,

    /// Key-value bucket holding the cache entries
    #[cfg_attr(feature = "config", arg(long = "cache-bucket", env = "CACHE_BUCKET"))]
    pub cache_bucket: Option<String>,

    /// Per-operation timeout in milliseconds
    #[cfg_attr(
        feature = "config",
        arg(long = "cache-operation-timeout", env = "CACHE_OPERATION_TIMEOUT_MS")
    )]
    pub cache_operation_timeout_ms: Option<u64>,

    /// Behavior when a server becomes unreachable
    #[cfg_attr(
        feature = "config",
        arg(
            long = "cache-failure-mode",
            env = "CACHE_FAILURE_MODE",
            value_enum,
            default_value_t = FailureMode::Redistribute
        )
    )]
    #[serde(default)]
    pub cache_failure_mode: FailureMode,

    /// Wire sub-protocol
    #[cfg_attr(
        feature = "config",
        arg(
            long = "cache-protocol",
            env = "CACHE_PROTOCOL",
            value_enum,
            default_value_t = Protocol::Binary
        )
    )]
    #[serde(default)]
    pub cache_protocol: Protocol,

    /// Username for authentication
    #[cfg_attr(feature = "config", arg(long = "cache-user", env = "CACHE_USER"))]
    pub cache_user: Option<String>,

    /// Password for authentication
    #[cfg_attr(
        feature = "config",
        arg(long = "cache-password", env = "CACHE_PASSWORD")
    )]
    pub cache_password: Option<String>,

    /// Authentication token
    #[cfg_attr(feature = "config", arg(long = "cache-token", env = "CACHE_TOKEN"))]
    pub cache_token: Option<String>,

    /// Connection timeout in seconds (optional)
    #[cfg_attr(
        feature = "config",
        arg(long = "cache-connect-timeout", env = "CACHE_CONNECT_TIMEOUT_SECS")
    )]
    pub cache_connect_timeout: Option<u64>,

    /// Maximum number of reconnection attempts (0 = unlimited)
    #[cfg_attr(
        feature = "config",
        arg(long = "cache-max-reconnects", env = "CACHE_MAX_RECONNECTS")
    )]
    pub cache_max_reconnects: Option<usize>,

    /// Time allowed for in-flight operations to finish on close, in milliseconds
    #[cfg_attr(
        feature = "config",
        arg(long = "cache-shutdown-grace", env = "CACHE_SHUTDOWN_GRACE_MS")
    )]
    pub cache_shutdown_grace_ms: Option<u64>,
}

// Default values
const DEFAULT_BUCKET: &str = "cache";
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RECONNECTS: usize = 10;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 2;
const SERVER_SCHEMES: [&str; 2] = ["nats://", "tls://"];

impl CacheConfig {
    /// Create a new configuration for the given server URL(s).
    pub fn new(servers: impl Into<String>) -> Self {
        Self {
            cache_servers: servers.into(),
            cache_key_prefix: None,
            cache_bucket: None,
            cache_operation_timeout_ms: None,
            cache_failure_mode: FailureMode::default(),
            cache_protocol: Protocol::default(),
            cache_user: None,
            cache_password: None,
            cache_token: None,
            cache_connect_timeout: None,
            cache_max_reconnects: None,
            cache_shutdown_grace_ms: None,
        }
    }

    /// Returns the server URLs as a vector (splits comma-separated URLs).
    pub fn servers(&self) -> Vec<&str> {
        self.cache_servers
            .split(',')
            .map(str::trim)
            .filter(|server| !server.is_empty())
            .collect()
    }

    /// Returns the key prefix, if configured.
    #[inline]
    pub fn key_prefix(&self) -> Option<&str> {
        self.cache_key_prefix.as_deref()
    }

    /// Returns the bucket name, using the default if not set.
    #[inline]
    pub fn bucket(&self) -> &str {
        self.cache_bucket.as_deref().unwrap_or(DEFAULT_BUCKET)
    }

    /// Returns the per-operation timeout.
    #[inline]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(
            self.cache_operation_timeout_ms
                .unwrap_or(DEFAULT_OPERATION_TIMEOUT_MS),
        )
    }

    /// Returns the connection timeout.
    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.cache_connect_timeout
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        )
    }

    /// Returns the shutdown grace period.
    #[inline]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(
            self.cache_shutdown_grace_ms
                .unwrap_or(DEFAULT_SHUTDOWN_GRACE_MS),
        )
    }

    /// Returns the reconnect delay as a Duration.
    #[inline]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS)
    }

    /// Returns the max reconnects as Option (0 means unlimited).
    #[inline]
    pub fn max_reconnects_option(&self) -> Option<usize> {
        let max = self.cache_max_reconnects.unwrap_or(DEFAULT_MAX_RECONNECTS);
        if max == 0 { None } else { Some(max) }
    }

    /// Returns the configured credentials, preferring user/password over a token.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.cache_user, &self.cache_password, &self.cache_token) {
            (Some(user), Some(pass), _) => Some(Credentials::user_password(user, pass)),
            (_, _, Some(token)) => Some(Credentials::token(token)),
            _ => None,
        }
    }

    /// Set server URL(s).
    #[must_use]
    pub fn with_servers(mut self, servers: impl Into<String>) -> Self {
        self.cache_servers = servers.into();
        self
    }

    /// Set the key prefix.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_key_prefix = Some(prefix.into());
        self
    }

    /// Set the bucket name.
    #[must_use]
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.cache_bucket = Some(bucket.into());
        self
    }

    /// Set the per-operation timeout in milliseconds.
    #[must_use]
    pub fn with_operation_timeout_ms(mut self, millis: u64) -> Self {
        self.cache_operation_timeout_ms = Some(millis);
        self
    }

    /// Set the failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.cache_failure_mode = mode;
        self
    }

    /// Set the wire sub-protocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.cache_protocol = protocol;
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        match credentials {
            Credentials::UserPassword { user, pass } => {
                self.cache_user = Some(user);
                self.cache_password = Some(pass);
                self.cache_token = None;
            }
            Credentials::Token { token } => {
                self.cache_user = None;
                self.cache_password = None;
                self.cache_token = Some(token);
            }
        }
        self
    }

    /// Set the connection timeout in seconds.
    #[must_use]
    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.cache_connect_timeout = Some(secs);
        self
    }

    /// Set maximum reconnection attempts (0 for unlimited).
    #[must_use]
    pub fn with_max_reconnects(mut self, max_reconnects: usize) -> Self {
        self.cache_max_reconnects = Some(max_reconnects);
        self
    }

    /// Set the shutdown grace period in milliseconds.
    #[must_use]
    pub fn with_shutdown_grace_ms(mut self, millis: u64) -> Self {
        self.cache_shutdown_grace_ms = Some(millis);
        self
    }

    /// Validate the configuration and return any issues.
    pub fn validate(&self) -> Result<()> {
        let servers = self.servers();
        if servers.is_empty() {
            return Err(Error::invalid_config(
                "At least one server URL must be provided",
            ));
        }

        for server in servers {
            if !SERVER_SCHEMES
                .iter()
                .any(|scheme| server.starts_with(scheme))
            {
                return Err(Error::invalid_config(format!(
                    "Invalid server URL format: {server}"
                )));
            }
        }

        if self.cache_key_prefix.as_deref() == Some("") {
            return Err(Error::invalid_config("Key prefix cannot be empty when set"));
        }

        if self.cache_bucket.as_deref() == Some("") {
            return Err(Error::invalid_config("Bucket name cannot be empty when set"));
        }

        if self.operation_timeout().is_zero() {
            return Err(Error::invalid_config("Operation timeout must be positive"));
        }

        if self.cache_user.is_some() != self.cache_password.is_some() {
            return Err(Error::invalid_config(
                "User and password must be provided together",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_config() {
        let config = CacheConfig::new("nats://localhost:4222");
        assert_eq!(config.servers(), vec!["nats://localhost:4222"]);
        assert_eq!(config.key_prefix(), None);
        assert_eq!(config.bucket(), DEFAULT_BUCKET);
        assert_eq!(config.operation_timeout(), Duration::from_secs(1));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.cache_failure_mode, FailureMode::Redistribute);
        assert_eq!(config.cache_protocol, Protocol::Binary);
        assert_eq!(config.max_reconnects_option(), Some(DEFAULT_MAX_RECONNECTS));
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::new("nats://localhost:4222")
            .with_key_prefix("sessions")
            .with_bucket("hot")
            .with_operation_timeout_ms(250)
            .with_failure_mode(FailureMode::Cancel)
            .with_protocol(Protocol::Text)
            .with_connect_timeout_secs(5)
            .with_max_reconnects(0)
            .with_shutdown_grace_ms(100);

        assert_eq!(config.key_prefix(), Some("sessions"));
        assert_eq!(config.bucket(), "hot");
        assert_eq!(config.operation_timeout(), Duration::from_millis(250));
        assert_eq!(config.cache_failure_mode, FailureMode::Cancel);
        assert_eq!(config.cache_protocol, Protocol::Text);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_reconnects_option(), None);
        assert_eq!(config.shutdown_grace(), Duration::from_millis(100));
    }

    #[test]
    fn test_multiple_servers() {
        let config = CacheConfig::new("nats://a:4222, nats://b:4222,,tls://c:4222");
        assert_eq!(
            config.servers(),
            vec!["nats://a:4222", "nats://b:4222", "tls://c:4222"]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_credentials() {
        let config = CacheConfig::new("nats://localhost:4222")
            .with_credentials(Credentials::user_password("ada", "secret"));
        assert!(matches!(
            config.credentials(),
            Some(Credentials::UserPassword { user, .. }) if user == "ada"
        ));

        let config = config.with_credentials(Credentials::token("t0k3n"));
        assert!(matches!(
            config.credentials(),
            Some(Credentials::Token { token }) if token == "t0k3n"
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(CacheConfig::new("nats://localhost:4222").validate().is_ok());
        assert!(CacheConfig::new("").validate().is_err());
        assert!(CacheConfig::new("localhost:11211").validate().is_err());
        assert!(
            CacheConfig::new("nats://localhost:4222")
                .with_key_prefix("")
                .validate()
                .is_err()
        );
        assert!(
            CacheConfig::new("nats://localhost:4222")
                .with_operation_timeout_ms(0)
                .validate()
                .is_err()
        );

        let mut half_credentials = CacheConfig::new("nats://localhost:4222");
        half_credentials.cache_user = Some("ada".to_string());
        assert!(matches!(
            half_credentials.validate(),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_serde_defaults() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"cache_servers":"nats://localhost:4222"}"#).unwrap();
        assert_eq!(config.cache_failure_mode, FailureMode::Redistribute);
        assert_eq!(config.cache_protocol, Protocol::Binary);
        assert_eq!(config.bucket(), "cache");
    }
}
