// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Endpoints and their certificates.
//!
//! The registry sits behind a read-write lock. Channel negotiation holds
//! the read side while it picks an endpoint and copies its certificate;
//! certificate rotation holds the write side for its whole sweep and swap,
//! so no channel is ever negotiated with a certificate that is being
//! replaced.

use std::fs;
use std::sync::Arc;

use keel_config::EndpointConfig;
use keel_core::{SecurityMode, SecurityPolicy, UaError, UaResult};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

use crate::error::{ServerError, ServerResult};

/// DER-encoded certificate or key bytes.
pub type Certificate = Arc<[u8]>;

/// A transport endpoint with its security configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Endpoint URL.
    pub url: String,
    /// Security policy.
    pub security_policy: SecurityPolicy,
    /// Message security mode.
    pub security_mode: SecurityMode,
    certificate: Certificate,
    private_key: Certificate,
}

impl Endpoint {
    /// Creates an endpoint from in-memory certificate material.
    pub fn new(
        url: impl Into<String>,
        security_policy: SecurityPolicy,
        security_mode: SecurityMode,
        certificate: impl Into<Certificate>,
        private_key: impl Into<Certificate>,
    ) -> Self {
        Self {
            url: url.into(),
            security_policy,
            security_mode,
            certificate: certificate.into(),
            private_key: private_key.into(),
        }
    }

    /// Creates an endpoint without security.
    pub fn unsecured(url: impl Into<String>) -> Self {
        Self::new(url, SecurityPolicy::None, SecurityMode::None, Vec::new(), Vec::new())
    }

    /// Builds an endpoint from configuration, reading its certificate files.
    pub fn from_config(config: &EndpointConfig) -> ServerResult<Self> {
        let read = |path: &Option<std::path::PathBuf>| -> ServerResult<Certificate> {
            match path {
                Some(path) => fs::read(path)
                    .map(Certificate::from)
                    .map_err(|e| ServerError::certificate_load(path, e)),
                None => Ok(Certificate::from(Vec::new())),
            }
        };
        Ok(Self {
            url: config.url.clone(),
            security_policy: config.security_policy,
            security_mode: config.security_mode,
            certificate: read(&config.certificate_path)?,
            private_key: read(&config.private_key_path)?,
        })
    }

    /// The certificate presented to clients.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Returns `true` if this endpoint presents `certificate`.
    pub fn uses_certificate(&self, certificate: &[u8]) -> bool {
        *self.certificate == *certificate
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("security_policy", &self.security_policy)
            .field("security_mode", &self.security_mode)
            .field("certificate_len", &self.certificate.len())
            .finish_non_exhaustive()
    }
}

/// The set of endpoints a server offers.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: RwLock<Vec<Endpoint>>,
}

impl EndpointRegistry {
    /// Creates a registry.
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints: RwLock::new(endpoints),
        }
    }

    /// Builds a registry from configuration.
    pub fn from_config(configs: &[EndpointConfig]) -> ServerResult<Self> {
        let endpoints = configs
            .iter()
            .map(Endpoint::from_config)
            .collect::<ServerResult<Vec<_>>>()?;
        Ok(Self::new(endpoints))
    }

    /// Shared access; held during channel negotiation.
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<Endpoint>> {
        self.endpoints.read()
    }

    /// Exclusive access; held during certificate rotation.
    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<Endpoint>> {
        self.endpoints.write()
    }

    /// Copy of all endpoints.
    pub fn snapshot(&self) -> Vec<Endpoint> {
        self.endpoints.read().clone()
    }

    /// Number of endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    /// Returns `true` if no endpoint is configured.
    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }
}

/// Finds the endpoint matching a channel request.
pub fn select_endpoint<'a>(
    endpoints: &'a [Endpoint],
    url: &str,
    policy: SecurityPolicy,
    mode: SecurityMode,
) -> UaResult<&'a Endpoint> {
    endpoints
        .iter()
        .find(|e| e.url == url && e.security_policy == policy && e.security_mode == mode)
        .ok_or_else(|| UaError::SecurityPolicyRejected {
            policy: format!("{policy} / {mode} at {url}"),
        })
}

/// Replaces `old` with the new pair on every matching endpoint.
///
/// Returns the number of endpoints updated.
pub fn swap_certificate(
    endpoints: &mut [Endpoint],
    old: &[u8],
    certificate: &Certificate,
    private_key: &Certificate,
) -> usize {
    let mut swapped = 0;
    for endpoint in endpoints.iter_mut().filter(|e| e.uses_certificate(old)) {
        endpoint.certificate = Arc::clone(certificate);
        endpoint.private_key = Arc::clone(private_key);
        swapped += 1;
        info!(
            url = %endpoint.url,
            policy = %endpoint.security_policy,
            "Endpoint certificate replaced"
        );
    }
    swapped
}
