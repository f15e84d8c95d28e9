//! Connection settings and credential builders for the eventlog client.
//!
//! This crate is kept dependency-light because it is imported by every
//! other eventlog crate. It has no I/O of its own: it only builds the
//! typed configuration that `eventlog-client` consumes to drive the
//! connection engine.
//!
//! # Usage
//!
//! ```rust
//! use eventlog_settings::{ConnectionSettings, UserCredentials};
//!
//! let settings = ConnectionSettings::builder()
//!     .with_default_user_credentials(UserCredentials::new("admin", "changeit"))
//!     .with_connection_timeout_ms(1_000)
//!     .enable_verbose_logging()
//!     .build()
//!     .unwrap();
//!
//! assert!(settings.verbose_logging);
//! ```

mod cluster;
mod credentials;

pub use cluster::{ClusterSettings, ClusterSettingsBuilder, GossipSeed, NodePreference};
pub use credentials::UserCredentials;

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while building settings, never while running the engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("connection name must not be empty")]
    EmptyConnectionName,
    #[error("{0} must be greater than zero")]
    NonPositiveDuration(&'static str),
}

/// Fully resolved connection settings, matching the Configuration
/// enumeration: queueing and retry limits, timeouts, heartbeat cadence,
/// default credentials, and TLS/master-routing toggles.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub max_queue_size: usize,
    pub max_concurrent_items: usize,
    pub max_retries: u32,
    pub max_reconnections: u32,
    pub reconnection_delay: Duration,
    pub operation_timeout: Duration,
    pub operation_timeout_check_period: Duration,
    pub client_connection_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub default_user_credentials: Option<UserCredentials>,
    pub use_ssl_connection: bool,
    pub target_host: Option<String>,
    pub validate_server: bool,
    pub fail_on_no_server_response: bool,
    pub require_master: bool,
    pub connection_name: String,
    pub verbose_logging: bool,
}

impl ConnectionSettings {
    pub fn builder() -> ConnectionSettingsBuilder {
        ConnectionSettingsBuilder::default()
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettingsBuilder::default()
            .build()
            .expect("default settings are always valid")
    }
}

/// Fluent builder mirroring `client.CreateConnectionSettings()...Build()`.
pub struct ConnectionSettingsBuilder {
    max_queue_size: usize,
    max_concurrent_items: usize,
    max_retries: u32,
    max_reconnections: u32,
    reconnection_delay: Duration,
    operation_timeout: Duration,
    operation_timeout_check_period: Duration,
    client_connection_timeout: Duration,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    default_user_credentials: Option<UserCredentials>,
    use_ssl_connection: bool,
    target_host: Option<String>,
    validate_server: bool,
    fail_on_no_server_response: bool,
    require_master: bool,
    connection_name: Option<String>,
    verbose_logging: bool,
}

impl Default for ConnectionSettingsBuilder {
    fn default() -> Self {
        Self {
            max_queue_size: 5_000,
            max_concurrent_items: 5_000,
            max_retries: 10,
            max_reconnections: 10,
            reconnection_delay: Duration::from_millis(100),
            operation_timeout: Duration::from_secs(7),
            operation_timeout_check_period: Duration::from_secs(1),
            client_connection_timeout: Duration::from_secs(1),
            heartbeat_interval: Duration::from_millis(750),
            heartbeat_timeout: Duration::from_millis(1_500),
            default_user_credentials: None,
            use_ssl_connection: false,
            target_host: None,
            validate_server: true,
            fail_on_no_server_response: false,
            require_master: true,
            connection_name: None,
            verbose_logging: false,
        }
    }
}

impl ConnectionSettingsBuilder {
    pub fn with_max_queue_size(mut self, n: usize) -> Self {
        self.max_queue_size = n;
        self
    }

    pub fn with_max_concurrent_items(mut self, n: usize) -> Self {
        self.max_concurrent_items = n;
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_max_reconnections(mut self, n: u32) -> Self {
        self.max_reconnections = n;
        self
    }

    pub fn with_reconnection_delay(mut self, d: Duration) -> Self {
        self.reconnection_delay = d;
        self
    }

    pub fn with_operation_timeout(mut self, d: Duration) -> Self {
        self.operation_timeout = d;
        self
    }

    pub fn with_operation_timeout_check_period(mut self, d: Duration) -> Self {
        self.operation_timeout_check_period = d;
        self
    }

    pub fn with_connection_timeout_ms(mut self, ms: u64) -> Self {
        self.client_connection_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_heartbeat_interval(mut self, d: Duration) -> Self {
        self.heartbeat_interval = d;
        self
    }

    pub fn with_heartbeat_timeout(mut self, d: Duration) -> Self {
        self.heartbeat_timeout = d;
        self
    }

    pub fn with_default_user_credentials(mut self, creds: UserCredentials) -> Self {
        self.default_user_credentials = Some(creds);
        self
    }

    pub fn use_ssl_connection(mut self, target_host: impl Into<String>) -> Self {
        self.use_ssl_connection = true;
        self.target_host = Some(target_host.into());
        self
    }

    pub fn skip_server_validation(mut self) -> Self {
        self.validate_server = false;
        self
    }

    pub fn fail_on_no_server_response(mut self) -> Self {
        self.fail_on_no_server_response = true;
        self
    }

    pub fn require_master(mut self, require: bool) -> Self {
        self.require_master = require;
        self
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    pub fn enable_verbose_logging(mut self) -> Self {
        self.verbose_logging = true;
        self
    }

    /// Build settings, defaulting `connection_name` to `"ES-" + uuid` when
    /// none was supplied, matching `NewConnection`'s fallback.
    pub fn build(self) -> Result<ConnectionSettings, SettingsError> {
        let connection_name = match self.connection_name {
            Some(name) if name.is_empty() => return Err(SettingsError::EmptyConnectionName),
            Some(name) => name,
            None => format!("ES-{}", Uuid::new_v4()),
        };
        if self.operation_timeout.is_zero() {
            return Err(SettingsError::NonPositiveDuration("operation_timeout"));
        }
        if self.client_connection_timeout.is_zero() {
            return Err(SettingsError::NonPositiveDuration(
                "client_connection_timeout",
            ));
        }

        Ok(ConnectionSettings {
            max_queue_size: self.max_queue_size,
            max_concurrent_items: self.max_concurrent_items,
            max_retries: self.max_retries,
            max_reconnections: self.max_reconnections,
            reconnection_delay: self.reconnection_delay,
            operation_timeout: self.operation_timeout,
            operation_timeout_check_period: self.operation_timeout_check_period,
            client_connection_timeout: self.client_connection_timeout,
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_timeout: self.heartbeat_timeout,
            default_user_credentials: self.default_user_credentials,
            use_ssl_connection: self.use_ssl_connection,
            target_host: self.target_host,
            validate_server: self.validate_server,
            fail_on_no_server_response: self.fail_on_no_server_response,
            require_master: self.require_master,
            connection_name,
            verbose_logging: self.verbose_logging,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_documented_defaults() {
        let settings = ConnectionSettings::default();
        assert_eq!(settings.max_concurrent_items, 5_000);
        assert_eq!(settings.max_retries, 10);
        assert_eq!(settings.max_reconnections, 10);
        assert_eq!(settings.reconnection_delay, Duration::from_millis(100));
        assert_eq!(settings.operation_timeout, Duration::from_secs(7));
        assert!(settings.require_master);
        assert!(!settings.verbose_logging);
        assert!(settings.connection_name.starts_with("ES-"));
    }

    #[test]
    fn builder_overrides_apply() {
        let settings = ConnectionSettings::builder()
            .with_max_retries(3)
            .with_connection_name("AllCatchUpSubscriber")
            .enable_verbose_logging()
            .build()
            .unwrap();
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.connection_name, "AllCatchUpSubscriber");
        assert!(settings.verbose_logging);
    }

    #[test]
    fn empty_connection_name_is_rejected() {
        let err = ConnectionSettings::builder()
            .with_connection_name("")
            .build()
            .unwrap_err();
        assert_eq!(err, SettingsError::EmptyConnectionName);
    }

    #[test]
    fn zero_operation_timeout_is_rejected() {
        let err = ConnectionSettings::builder()
            .with_operation_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(err, SettingsError::NonPositiveDuration("operation_timeout"));
    }

    #[test]
    fn ssl_connection_sets_target_host() {
        let settings = ConnectionSettings::builder()
            .use_ssl_connection("eventlog.internal")
            .build()
            .unwrap();
        assert!(settings.use_ssl_connection);
        assert_eq!(settings.target_host.as_deref(), Some("eventlog.internal"));
    }
}
