// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # keel-config
//!
//! Configuration management for the keel OPC UA server core.
//!
//! ## Features
//!
//! - **Schema Definition**: one [`ServerConfig`] snapshot with per-section
//!   validation and defaults
//! - **Multi-Format Support**: YAML, TOML and JSON files
//! - **Environment Overrides**: `${VAR:default}` placeholders and
//!   `KEEL_SECTION__FIELD` variables
//!
//! ## Quick Start
//!
//! ```no_run
//! use keel_config::load_config;
//!
//! let config = load_config("server.yaml").unwrap();
//! println!("Endpoints: {}", config.endpoints.len());
//! ```
//!
//! ## Configuration Schema
//!
//! - `application` - application URI and type
//! - `endpoints` - transport endpoints and their security
//! - `concurrency` - single-threaded or pooled execution
//! - `maintenance` - cleanup interval and iterate wait bound
//! - `limits` - channel, session and subscription limits
//! - `subscriptions` - sampling strategy
//! - `logging` - level and output format

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_str, ConfigFormat, ConfigLoader};
pub use schema::{
    ApplicationConfig, ApplicationType, ConcurrencyConfig, ConcurrencyMode, CountRange,
    DurationRange, EndpointConfig, LimitsConfig, LogFormat, LoggingConfig, MaintenanceConfig,
    SamplingMode, ServerConfig, SubscriptionConfig, NS0_URI,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
