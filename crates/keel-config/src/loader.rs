// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading for keel.
//!
//! # Loading Pipeline
//!
//! 1. Read the file (YAML, TOML or JSON, chosen by extension)
//! 2. Resolve `${VAR}` / `${VAR:default}` placeholders in the raw text
//! 3. Deserialize into [`ServerConfig`]
//! 4. Apply `KEEL_*` environment overrides
//! 5. Resolve relative certificate paths against the file's directory
//! 6. Validate
//!
//! # Environment Variable Override
//!
//! Sections and fields are separated by a double underscore:
//!
//! ```text
//! KEEL_MAINTENANCE__MAX_ITERATE_WAIT=20
//! KEEL_CONCURRENCY__MODE=pooled
//! KEEL_LIMITS__MAX_SESSIONS=500
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{ConcurrencyMode, LogFormat, SamplingMode, ServerConfig};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "KEEL";

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads a [`ServerConfig`] from files or strings.
///
/// ```no_run
/// use keel_config::ConfigLoader;
///
/// let config = ConfigLoader::new().load("server.yaml").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    base_path: Option<PathBuf>,
    env_prefix: String,
    resolve_env_vars: bool,
    resolve_paths: bool,
}

impl ConfigLoader {
    /// Creates a loader with the `KEEL` prefix and all resolution enabled.
    pub fn new() -> Self {
        Self {
            base_path: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
            resolve_paths: true,
        }
    }

    /// Sets the base path for resolving relative paths.
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables placeholder resolution and env overrides.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Enables or disables relative path resolution.
    pub fn with_path_resolution(mut self, enabled: bool) -> Self {
        self.resolve_paths = enabled;
        self
    }

    /// Loads and validates a configuration file.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<ServerConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let base_path = self.base_path.clone().unwrap_or_else(|| {
            path.parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        });

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;

        let format = ConfigFormat::from_path(path)?;
        let mut config = self.parse(&content, format).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::parse(path, message),
            other => other,
        })?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }
        if self.resolve_paths {
            resolve_relative_paths(&mut config, &base_path);
        }

        config.validate()?;

        debug!(
            endpoints = config.endpoints.len(),
            concurrency = ?config.concurrency.mode,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Loads and validates configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<ServerConfig> {
        let mut config = self.parse(content, format)?;
        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn parse(&self, content: &str, format: ConfigFormat) -> ConfigResult<ServerConfig> {
        if self.resolve_env_vars {
            parse_str(&resolve_env_placeholders(content)?, format)
        } else {
            parse_str(content, format)
        }
    }

    /// Applies `PREFIX_SECTION__FIELD` overrides.
    fn apply_env_overrides(&self, config: &mut ServerConfig) -> ConfigResult<()> {
        let var = |section: &str, field: &str| {
            format!("{}_{}__{}", self.env_prefix, section, field)
        };

        if let Some(value) = env_string(&var("APPLICATION", "APPLICATION_URI")) {
            config.application.application_uri = value;
        }
        if let Some(value) = env_string(&var("APPLICATION", "APPLICATION_NAME")) {
            config.application.application_name = value;
        }

        if let Some(value) = env_string(&var("CONCURRENCY", "MODE")) {
            config.concurrency.mode = match value.to_lowercase().as_str() {
                "single_threaded" | "single" => ConcurrencyMode::SingleThreaded,
                "pooled" => ConcurrencyMode::Pooled,
                _ => {
                    return Err(ConfigError::invalid_env_var(
                        var("CONCURRENCY", "MODE"),
                        "expected 'single_threaded' or 'pooled'",
                    ))
                }
            };
        }
        if let Some(value) = env_parse(&var("CONCURRENCY", "WORKER_COUNT"))? {
            config.concurrency.worker_count = value;
        }

        if let Some(value) = env_millis(&var("MAINTENANCE", "CLEANUP_INTERVAL"))? {
            config.maintenance.cleanup_interval = value;
        }
        if let Some(value) = env_millis(&var("MAINTENANCE", "MAX_ITERATE_WAIT"))? {
            config.maintenance.max_iterate_wait = value;
        }
        if let Some(value) = env_millis(&var("MAINTENANCE", "DISCOVERY_CLEANUP_TIMEOUT"))? {
            config.maintenance.discovery_cleanup_timeout = value;
        }

        if let Some(value) = env_parse(&var("LIMITS", "MAX_SECURE_CHANNELS"))? {
            config.limits.max_secure_channels = value;
        }
        if let Some(value) = env_parse(&var("LIMITS", "MAX_SESSIONS"))? {
            config.limits.max_sessions = value;
        }
        if let Some(value) = env_millis(&var("LIMITS", "MAX_SESSION_TIMEOUT"))? {
            config.limits.max_session_timeout = value;
        }
        if let Some(value) = env_millis(&var("LIMITS", "MAX_SECURITY_TOKEN_LIFETIME"))? {
            config.limits.max_security_token_lifetime = value;
        }

        if let Some(value) = env_string(&var("SUBSCRIPTIONS", "SAMPLING_MODE")) {
            config.subscriptions.sampling_mode = match value.to_lowercase().as_str() {
                "timer" => SamplingMode::Timer,
                "publishing" => SamplingMode::Publishing,
                _ => {
                    return Err(ConfigError::invalid_env_var(
                        var("SUBSCRIPTIONS", "SAMPLING_MODE"),
                        "expected 'timer' or 'publishing'",
                    ))
                }
            };
        }

        if let Some(value) = env_string(&var("LOGGING", "LEVEL")) {
            config.logging.level = value;
        }
        if let Some(value) = env_string(&var("LOGGING", "FORMAT")) {
            config.logging.format = match value.to_lowercase().as_str() {
                "text" => LogFormat::Text,
                "compact" => LogFormat::Compact,
                "json" => LogFormat::Json,
                _ => {
                    return Err(ConfigError::invalid_env_var(
                        var("LOGGING", "FORMAT"),
                        "expected 'text', 'compact' or 'json'",
                    ))
                }
            };
        }

        if let Some(value) = env_string(&format!("{}_CUSTOM_HOSTNAME", self.env_prefix)) {
            config.custom_hostname = Some(value);
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file extension.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// File extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Toml => "toml",
            Self::Json => "json",
        }
    }
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads a configuration file with the default loader.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<ServerConfig> {
    ConfigLoader::new().load(path)
}

/// Loads configuration from a string with the default loader.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<ServerConfig> {
    ConfigLoader::new().load_from_str(content, format)
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> ConfigResult<T> {
    match format {
        ConfigFormat::Yaml => parse_yaml(content),
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
    }
}

/// YAML goes through the `config` crate.
fn parse_yaml<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    if content.trim().is_empty() {
        return parse_str("{}", ConfigFormat::Json);
    }
    config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| ConfigError::serialization(e.to_string()))
}

/// Resolves `${VAR}` and `${VAR:default}` placeholders.
///
/// A placeholder without default whose variable is unset is an error.
fn resolve_env_placeholders(content: &str) -> ConfigResult<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated placeholder is kept verbatim.
            result.push_str(&rest[start..]);
            return Ok(result);
        };

        let body = &after[..end];
        let (name, default) = match body.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (body, None),
        };

        match (env::var(name), default) {
            (Ok(value), _) => result.push_str(&value),
            (Err(_), Some(default)) => result.push_str(default),
            (Err(_), None) => {
                warn!(variable = name, "Environment variable not set");
                return Err(ConfigError::env_var_not_found(name));
            }
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

fn resolve_relative_paths(config: &mut ServerConfig, base_path: &Path) {
    for endpoint in &mut config.endpoints {
        for path in [&mut endpoint.certificate_path, &mut endpoint.private_key_path]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = base_path.join(&*path);
            }
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> ConfigResult<Option<T>> {
    env_string(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid_env_var(name, format!("cannot parse '{value}'")))
        })
        .transpose()
}

fn env_millis(name: &str) -> ConfigResult<Option<Duration>> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_millis))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
application:
  application_uri: "urn:example:plant"
endpoints:
  - url: "opc.tcp://0.0.0.0:4840"
concurrency:
  mode: pooled
  worker_count: 2
maintenance:
  max_iterate_wait: 20
"#;

    fn loader() -> ConfigLoader {
        ConfigLoader::new().with_env_prefix("KEEL_LOADER_TEST")
    }

    #[test]
    fn test_load_yaml_string() {
        let config = loader().load_from_str(YAML, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.application.application_uri, "urn:example:plant");
        assert_eq!(config.concurrency.mode, ConcurrencyMode::Pooled);
        assert_eq!(config.concurrency.worker_count, 2);
        assert_eq!(config.maintenance.max_iterate_wait, Duration::from_millis(20));
        assert_eq!(config.maintenance.cleanup_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_load_toml_and_json() {
        let toml = r#"
[limits]
max_sessions = 5

[subscriptions]
sampling_mode = "publishing"
"#;
        let config = loader().load_from_str(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.limits.max_sessions, 5);
        assert_eq!(config.subscriptions.sampling_mode, SamplingMode::Publishing);

        let json = r#"{"custom_hostname": "plant-01"}"#;
        let config = loader().load_from_str(json, ConfigFormat::Json).unwrap();
        assert_eq!(config.custom_hostname.as_deref(), Some("plant-01"));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = loader().load_from_str("", ConfigFormat::Yaml).unwrap();
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = loader()
            .load_from_str(r#"{"bogus": 1}"#, ConfigFormat::Json)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Serialization { .. }));
    }

    #[test]
    fn test_placeholder_default() {
        let resolved =
            resolve_env_placeholders("uri: ${KEEL_LOADER_TEST_UNSET_VAR:urn:fallback}").unwrap();
        assert_eq!(resolved, "uri: urn:fallback");
    }

    #[test]
    fn test_placeholder_missing_is_error() {
        let err = resolve_env_placeholders("${KEEL_LOADER_TEST_DEFINITELY_UNSET}").unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarNotFound { .. }));
    }

    #[test]
    fn test_unterminated_placeholder_kept() {
        assert_eq!(resolve_env_placeholders("a ${b").unwrap(), "a ${b");
    }

    #[test]
    fn test_env_override() {
        env::set_var("KEEL_ENV_TEST_MAINTENANCE__MAX_ITERATE_WAIT", "7");
        env::set_var("KEEL_ENV_TEST_LIMITS__MAX_SESSIONS", "3");
        let config = ConfigLoader::new()
            .with_env_prefix("KEEL_ENV_TEST")
            .load_from_str("{}", ConfigFormat::Json)
            .unwrap();
        env::remove_var("KEEL_ENV_TEST_MAINTENANCE__MAX_ITERATE_WAIT");
        env::remove_var("KEEL_ENV_TEST_LIMITS__MAX_SESSIONS");

        assert_eq!(config.maintenance.max_iterate_wait, Duration::from_millis(7));
        assert_eq!(config.limits.max_sessions, 3);
    }

    #[test]
    fn test_invalid_env_override() {
        env::set_var("KEEL_BAD_ENV_TEST_LIMITS__MAX_SESSIONS", "many");
        let err = ConfigLoader::new()
            .with_env_prefix("KEEL_BAD_ENV_TEST")
            .load_from_str("{}", ConfigFormat::Json)
            .unwrap_err();
        env::remove_var("KEEL_BAD_ENV_TEST_LIMITS__MAX_SESSIONS");
        assert!(matches!(err, ConfigError::InvalidEnvVar { .. }));
    }

    #[test]
    fn test_load_file_resolves_paths() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
endpoints:
  - url: "opc.tcp://0.0.0.0:4843"
    security_policy: basic256_sha256
    security_mode: sign_and_encrypt
    certificate_path: "pki/server.der"
    private_key_path: "pki/server.pem"
"#
        )
        .unwrap();

        let config = loader().load(file.path()).unwrap();
        let cert = config.endpoints[0].certificate_path.as_ref().unwrap();
        assert!(cert.is_absolute());
        assert!(cert.ends_with("pki/server.der"));
    }

    #[test]
    fn test_missing_file() {
        let err = loader().load("/nonexistent/keel.yaml").unwrap_err();
        assert!(err.is_io_error());
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("a.YML")).unwrap(),
            ConfigFormat::Yaml
        );
        assert!(ConfigFormat::from_path(Path::new("a.ini")).is_err());
        assert!(ConfigFormat::from_path(Path::new("config")).is_err());
    }
}
