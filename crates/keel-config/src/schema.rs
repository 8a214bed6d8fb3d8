// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema definitions for keel.
//!
//! The [`ServerConfig`] is the immutable snapshot a server is built from.
//! Every section has serde defaults, so an empty document is a valid
//! configuration for a single-threaded server without endpoints.
//!
//! # Schema Structure
//!
//! ```text
//! ServerConfig
//! ├── application: ApplicationConfig
//! ├── endpoints: Vec<EndpointConfig>
//! ├── concurrency: ConcurrencyConfig
//! ├── maintenance: MaintenanceConfig
//! ├── limits: LimitsConfig
//! ├── subscriptions: SubscriptionConfig
//! ├── logging: LoggingConfig
//! └── custom_hostname: Option<String>
//! ```
//!
//! Durations are written in milliseconds.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use keel_core::types::{SecurityMode, SecurityPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Constants
// =============================================================================

/// Default application URI (namespace 1).
pub const DEFAULT_APPLICATION_URI: &str = "urn:keel:server";

/// Default interval of the channel/session cleanup sweep (10 s).
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 10_000;

/// Default upper bound of one iterate wait (50 ms).
pub const DEFAULT_MAX_ITERATE_WAIT_MS: u64 = 50;

/// Default lifetime of a discovery registration (1 h).
pub const DEFAULT_DISCOVERY_CLEANUP_TIMEOUT_MS: u64 = 3_600_000;

/// Default number of pooled worker threads.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Maximum number of pooled worker threads.
pub const MAX_WORKER_COUNT: usize = 256;

/// Default maximum number of secure channels.
pub const DEFAULT_MAX_SECURE_CHANNELS: usize = 40;

/// Default maximum security token lifetime (10 min).
pub const DEFAULT_MAX_SECURITY_TOKEN_LIFETIME_MS: u64 = 600_000;

/// Default maximum number of sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 100;

/// Default maximum session timeout (1 h).
pub const DEFAULT_MAX_SESSION_TIMEOUT_MS: u64 = 3_600_000;

// =============================================================================
// Top-Level Configuration
// =============================================================================

/// The root configuration of a keel server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Application description.
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Transport endpoints.
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    /// Execution model.
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Periodic maintenance policy.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    /// Resource limits and parameter revision ranges.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Subscription engine behaviour.
    #[serde(default)]
    pub subscriptions: SubscriptionConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Hostname hint handed to transport listeners.
    #[serde(default)]
    pub custom_hostname: Option<String>,
}

impl ServerConfig {
    /// Validates every section.
    ///
    /// An empty endpoint list is valid; the server warns at startup.
    pub fn validate(&self) -> ConfigResult<()> {
        self.application.validate()?;

        let mut urls = HashSet::new();
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            endpoint.validate(index)?;
            if !urls.insert((&endpoint.url, endpoint.security_policy, endpoint.security_mode)) {
                return Err(ConfigError::validation(
                    format!("endpoints[{index}]"),
                    format!("duplicate endpoint {} ({})", endpoint.url, endpoint.security_policy),
                ));
            }
        }

        self.concurrency.validate()?;
        self.maintenance.validate()?;
        self.limits.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// A validated configuration with one unsecured endpoint at `url`.
    pub fn minimal(url: impl Into<String>) -> Self {
        Self {
            endpoints: vec![EndpointConfig::unsecured(url)],
            ..Self::default()
        }
    }

    /// Configuration for tests: no endpoints, single-threaded, short sweeps.
    pub fn for_testing() -> Self {
        Self {
            application: ApplicationConfig {
                application_uri: "urn:keel:test".to_string(),
                ..ApplicationConfig::default()
            },
            maintenance: MaintenanceConfig {
                cleanup_interval: Duration::from_millis(1_000),
                ..MaintenanceConfig::default()
            },
            ..Self::default()
        }
    }
}

// =============================================================================
// Application
// =============================================================================

/// The role the server plays towards discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationType {
    /// A regular server.
    #[default]
    Server,
    /// A discovery server that accepts registrations.
    DiscoveryServer,
}

/// Application description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplicationConfig {
    /// Application URI; becomes namespace 1.
    #[serde(default = "default_application_uri")]
    pub application_uri: String,

    /// Human-readable application name.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Product URI.
    #[serde(default = "default_product_uri")]
    pub product_uri: String,

    /// Server or discovery server.
    #[serde(default)]
    pub application_type: ApplicationType,
}

fn default_application_uri() -> String {
    DEFAULT_APPLICATION_URI.to_string()
}

fn default_application_name() -> String {
    "keel server".to_string()
}

fn default_product_uri() -> String {
    "urn:keel".to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            application_uri: default_application_uri(),
            application_name: default_application_name(),
            product_uri: default_product_uri(),
            application_type: ApplicationType::default(),
        }
    }
}

impl ApplicationConfig {
    /// Validates the application section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.application_uri.trim().is_empty() {
            return Err(ConfigError::validation(
                "application.application_uri",
                "cannot be empty",
            ));
        }
        if self.application_uri == keel_core_ns0_uri() {
            return Err(ConfigError::validation(
                "application.application_uri",
                "cannot be the standard namespace URI",
            ));
        }
        Ok(())
    }
}

/// URI of the standard namespace (index 0).
pub const NS0_URI: &str = "http://opcfoundation.org/UA/";

fn keel_core_ns0_uri() -> &'static str {
    NS0_URI
}

// =============================================================================
// Endpoints
// =============================================================================

/// One transport endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    /// Endpoint URL, e.g. `opc.tcp://0.0.0.0:4840`.
    pub url: String,

    /// Security policy.
    #[serde(default)]
    pub security_policy: SecurityPolicy,

    /// Message security mode.
    #[serde(default)]
    pub security_mode: SecurityMode,

    /// DER certificate presented by the endpoint.
    #[serde(default)]
    pub certificate_path: Option<PathBuf>,

    /// Private key matching the certificate.
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
}

impl EndpointConfig {
    /// An endpoint without security.
    pub fn unsecured(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            security_policy: SecurityPolicy::None,
            security_mode: SecurityMode::None,
            certificate_path: None,
            private_key_path: None,
        }
    }

    /// Validates the endpoint at position `index`.
    pub fn validate(&self, index: usize) -> ConfigResult<()> {
        let field = |name: &str| format!("endpoints[{index}].{name}");

        if !self.url.contains("://") {
            return Err(ConfigError::validation(
                field("url"),
                format!("'{}' is not a URL", self.url),
            ));
        }

        match (self.security_policy, self.security_mode) {
            (SecurityPolicy::None, SecurityMode::None) => {}
            (SecurityPolicy::None, mode) => {
                return Err(ConfigError::validation(
                    field("security_mode"),
                    format!("policy None requires mode None, got {mode}"),
                ));
            }
            (policy, SecurityMode::None) => {
                return Err(ConfigError::validation(
                    field("security_mode"),
                    format!("policy {policy} requires Sign or SignAndEncrypt"),
                ));
            }
            _ => {}
        }

        if self.security_policy.requires_certificate() {
            if self.certificate_path.is_none() {
                return Err(ConfigError::missing_field(field("certificate_path")));
            }
            if self.private_key_path.is_none() {
                return Err(ConfigError::missing_field(field("private_key_path")));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Concurrency
// =============================================================================

/// How callbacks are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// Everything runs on the thread that calls `iterate`.
    #[default]
    SingleThreaded,
    /// Callbacks run on a fixed pool of worker threads.
    Pooled,
}

/// Execution model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcurrencyConfig {
    /// Single-threaded or pooled.
    #[serde(default)]
    pub mode: ConcurrencyMode,

    /// Worker threads in pooled mode.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            mode: ConcurrencyMode::default(),
            worker_count: DEFAULT_WORKER_COUNT,
        }
    }
}

impl ConcurrencyConfig {
    /// Pooled execution with `worker_count` threads.
    pub fn pooled(worker_count: usize) -> Self {
        Self {
            mode: ConcurrencyMode::Pooled,
            worker_count,
        }
    }

    /// Validates the concurrency section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.mode == ConcurrencyMode::Pooled
            && !(1..=MAX_WORKER_COUNT).contains(&self.worker_count)
        {
            return Err(ConfigError::out_of_range(
                "concurrency.worker_count",
                self.worker_count,
                1,
                MAX_WORKER_COUNT,
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Maintenance
// =============================================================================

/// Periodic maintenance policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MaintenanceConfig {
    /// Interval of the channel/session/discovery cleanup sweep.
    #[serde(default = "default_cleanup_interval", with = "duration_ms")]
    pub cleanup_interval: Duration,

    /// Upper bound of the transport poll inside one iterate.
    #[serde(default = "default_max_iterate_wait", with = "duration_ms")]
    pub max_iterate_wait: Duration,

    /// Age after which a discovery registration is dropped.
    #[serde(default = "default_discovery_cleanup_timeout", with = "duration_ms")]
    pub discovery_cleanup_timeout: Duration,
}

fn default_cleanup_interval() -> Duration {
    Duration::from_millis(DEFAULT_CLEANUP_INTERVAL_MS)
}

fn default_max_iterate_wait() -> Duration {
    Duration::from_millis(DEFAULT_MAX_ITERATE_WAIT_MS)
}

fn default_discovery_cleanup_timeout() -> Duration {
    Duration::from_millis(DEFAULT_DISCOVERY_CLEANUP_TIMEOUT_MS)
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: default_cleanup_interval(),
            max_iterate_wait: default_max_iterate_wait(),
            discovery_cleanup_timeout: default_discovery_cleanup_timeout(),
        }
    }
}

impl MaintenanceConfig {
    /// Validates the maintenance section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::validation(
                "maintenance.cleanup_interval",
                "must be positive",
            ));
        }
        if self.max_iterate_wait.is_zero() {
            return Err(ConfigError::validation(
                "maintenance.max_iterate_wait",
                "must be positive",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Limits
// =============================================================================

/// Inclusive duration range used to revise client-requested intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DurationRange {
    /// Lower bound.
    #[serde(with = "duration_ms")]
    pub min: Duration,
    /// Upper bound.
    #[serde(with = "duration_ms")]
    pub max: Duration,
}

impl DurationRange {
    /// Creates a range from millisecond bounds.
    pub const fn from_millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    /// Clamps `value` into the range.
    pub fn clamp(&self, value: Duration) -> Duration {
        value.clamp(self.min, self.max)
    }

    fn validate(&self, field: &str) -> ConfigResult<()> {
        if self.min > self.max || self.min.is_zero() {
            return Err(ConfigError::validation(
                field,
                format!("invalid range {:?}..={:?}", self.min, self.max),
            ));
        }
        Ok(())
    }
}

/// Inclusive count range used to revise client-requested counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountRange {
    /// Lower bound.
    pub min: u32,
    /// Upper bound.
    pub max: u32,
}

impl CountRange {
    /// Creates a range.
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Clamps `value` into the range.
    pub fn clamp(&self, value: u32) -> u32 {
        value.clamp(self.min, self.max)
    }

    fn validate(&self, field: &str) -> ConfigResult<()> {
        if self.min > self.max || self.min == 0 {
            return Err(ConfigError::validation(
                field,
                format!("invalid range {}..={}", self.min, self.max),
            ));
        }
        Ok(())
    }
}

/// Resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum number of concurrently open secure channels.
    #[serde(default = "default_max_secure_channels")]
    pub max_secure_channels: usize,

    /// Upper bound of a revised security token lifetime.
    #[serde(default = "default_max_security_token_lifetime", with = "duration_ms")]
    pub max_security_token_lifetime: Duration,

    /// Maximum number of sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Upper bound of a revised session timeout.
    #[serde(default = "default_max_session_timeout", with = "duration_ms")]
    pub max_session_timeout: Duration,

    /// Maximum subscriptions per session (0 = unlimited).
    #[serde(default = "default_max_subscriptions_per_session")]
    pub max_subscriptions_per_session: usize,

    /// Maximum monitored items per subscription (0 = unlimited).
    #[serde(default = "default_max_monitored_items_per_subscription")]
    pub max_monitored_items_per_subscription: usize,

    /// Server-side cap on notifications per publish (0 = unlimited).
    #[serde(default = "default_max_notifications_per_publish")]
    pub max_notifications_per_publish: u32,

    /// Allowed publishing intervals.
    #[serde(default = "default_publishing_interval_limits")]
    pub publishing_interval: DurationRange,

    /// Allowed lifetime counts.
    #[serde(default = "default_lifetime_count_limits")]
    pub lifetime_count: CountRange,

    /// Allowed keep-alive counts.
    #[serde(default = "default_keep_alive_count_limits")]
    pub keep_alive_count: CountRange,

    /// Allowed sampling intervals.
    #[serde(default = "default_sampling_interval_limits")]
    pub sampling_interval: DurationRange,

    /// Allowed monitored-item queue sizes.
    #[serde(default = "default_queue_size_limits")]
    pub queue_size: CountRange,
}

fn default_max_secure_channels() -> usize {
    DEFAULT_MAX_SECURE_CHANNELS
}

fn default_max_security_token_lifetime() -> Duration {
    Duration::from_millis(DEFAULT_MAX_SECURITY_TOKEN_LIFETIME_MS)
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

fn default_max_session_timeout() -> Duration {
    Duration::from_millis(DEFAULT_MAX_SESSION_TIMEOUT_MS)
}

fn default_max_subscriptions_per_session() -> usize {
    100
}

fn default_max_monitored_items_per_subscription() -> usize {
    1_000
}

fn default_max_notifications_per_publish() -> u32 {
    1_000
}

fn default_publishing_interval_limits() -> DurationRange {
    DurationRange::from_millis(100, 3_600_000)
}

fn default_lifetime_count_limits() -> CountRange {
    CountRange::new(3, 15_000)
}

fn default_keep_alive_count_limits() -> CountRange {
    CountRange::new(1, 100)
}

fn default_sampling_interval_limits() -> DurationRange {
    DurationRange::from_millis(50, 86_400_000)
}

fn default_queue_size_limits() -> CountRange {
    CountRange::new(1, 100)
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_secure_channels: default_max_secure_channels(),
            max_security_token_lifetime: default_max_security_token_lifetime(),
            max_sessions: default_max_sessions(),
            max_session_timeout: default_max_session_timeout(),
            max_subscriptions_per_session: default_max_subscriptions_per_session(),
            max_monitored_items_per_subscription: default_max_monitored_items_per_subscription(),
            max_notifications_per_publish: default_max_notifications_per_publish(),
            publishing_interval: default_publishing_interval_limits(),
            lifetime_count: default_lifetime_count_limits(),
            keep_alive_count: default_keep_alive_count_limits(),
            sampling_interval: default_sampling_interval_limits(),
            queue_size: default_queue_size_limits(),
        }
    }
}

impl LimitsConfig {
    /// Validates the limits section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_secure_channels == 0 {
            return Err(ConfigError::validation(
                "limits.max_secure_channels",
                "must be at least 1",
            ));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::validation("limits.max_sessions", "must be at least 1"));
        }
        if self.max_security_token_lifetime.is_zero() {
            return Err(ConfigError::validation(
                "limits.max_security_token_lifetime",
                "must be positive",
            ));
        }
        if self.max_session_timeout.is_zero() {
            return Err(ConfigError::validation(
                "limits.max_session_timeout",
                "must be positive",
            ));
        }
        self.publishing_interval.validate("limits.publishing_interval")?;
        self.lifetime_count.validate("limits.lifetime_count")?;
        self.keep_alive_count.validate("limits.keep_alive_count")?;
        self.sampling_interval.validate("limits.sampling_interval")?;
        self.queue_size.validate("limits.queue_size")?;
        Ok(())
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// When monitored items are sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Each item has its own repeated callback at its sampling interval.
    #[default]
    Timer,
    /// Items are sampled at the start of their subscription's publishing cycle.
    Publishing,
}

/// Subscription engine behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionConfig {
    /// Sampling strategy.
    #[serde(default)]
    pub sampling_mode: SamplingMode,
}

// =============================================================================
// Logging
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable multi-field lines.
    #[default]
    Text,
    /// Compact single-line output.
    Compact,
    /// JSON lines.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default level filter (`RUST_LOG` takes precedence).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Validates the logging section.
    pub fn validate(&self) -> ConfigResult<()> {
        match self.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(ConfigError::validation(
                "logging.level",
                format!("unknown level '{other}'"),
            )),
        }
    }
}

// =============================================================================
// Serde helpers
// =============================================================================

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert!(config.endpoints.is_empty());
        assert_eq!(config.maintenance.cleanup_interval, Duration::from_secs(10));
        assert_eq!(config.maintenance.max_iterate_wait, Duration::from_millis(50));
        assert_eq!(config.concurrency.mode, ConcurrencyMode::SingleThreaded);
    }

    #[test]
    fn test_minimal_config() {
        let config = ServerConfig::minimal("opc.tcp://localhost:4840");
        config.validate().unwrap();
        assert_eq!(config.endpoints.len(), 1);
        assert_eq!(config.endpoints[0].security_policy, SecurityPolicy::None);
    }

    #[test]
    fn test_secured_endpoint_requires_certificate() {
        let mut endpoint = EndpointConfig::unsecured("opc.tcp://localhost:4840");
        endpoint.security_policy = SecurityPolicy::Basic256Sha256;
        endpoint.security_mode = SecurityMode::SignAndEncrypt;
        let err = endpoint.validate(0).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));

        endpoint.certificate_path = Some("server.der".into());
        endpoint.private_key_path = Some("server.pem".into());
        endpoint.validate(0).unwrap();
    }

    #[test]
    fn test_policy_mode_mismatch() {
        let mut endpoint = EndpointConfig::unsecured("opc.tcp://localhost:4840");
        endpoint.security_mode = SecurityMode::Sign;
        assert!(endpoint.validate(0).is_err());
    }

    #[test]
    fn test_duplicate_endpoint_rejected() {
        let mut config = ServerConfig::minimal("opc.tcp://localhost:4840");
        config.endpoints.push(EndpointConfig::unsecured("opc.tcp://localhost:4840"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_count_range() {
        assert!(ConcurrencyConfig::pooled(0).validate().is_err());
        assert!(ConcurrencyConfig::pooled(4).validate().is_ok());
        assert!(ConcurrencyConfig::pooled(MAX_WORKER_COUNT + 1).validate().is_err());
    }

    #[test]
    fn test_ranges() {
        let range = DurationRange::from_millis(100, 1_000);
        assert_eq!(range.clamp(Duration::from_millis(5)), Duration::from_millis(100));
        assert_eq!(range.clamp(Duration::from_secs(5)), Duration::from_millis(1_000));
        assert_eq!(CountRange::new(3, 10).clamp(50), 10);

        let mut limits = LimitsConfig::default();
        limits.lifetime_count = CountRange::new(10, 3);
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_reject_ns0_application_uri() {
        let mut config = ServerConfig::default();
        config.application.application_uri = NS0_URI.to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut logging = LoggingConfig::default();
        logging.level = "verbose".to_string();
        assert!(logging.validate().is_err());
        logging.level = "DEBUG".to_string();
        assert!(logging.validate().is_ok());
    }
}
