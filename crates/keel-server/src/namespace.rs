// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Namespace table.
//!
//! An append-only list of URIs where the position is the namespace index.
//! Index 0 is the standard namespace and index 1 the application URI.
//! Readers take a shared lock; only `add` takes the write lock.

use keel_core::{UaError, UaResult};
use parking_lot::RwLock;
use tracing::info;

/// URI of the standard namespace.
pub use keel_config::NS0_URI;

/// Append-only table of namespace URIs.
#[derive(Debug)]
pub struct NamespaceTable {
    uris: RwLock<Vec<String>>,
}

impl NamespaceTable {
    /// Creates a table with the standard namespace and `application_uri`.
    pub fn new(application_uri: impl Into<String>) -> Self {
        Self {
            uris: RwLock::new(vec![NS0_URI.to_string(), application_uri.into()]),
        }
    }

    /// Returns the index of `uri`, appending it if absent.
    pub fn add(&self, uri: &str) -> UaResult<u16> {
        if let Ok(index) = self.index_of(uri) {
            return Ok(index);
        }

        let mut uris = self.uris.write();
        // Another writer may have added it between the two locks.
        if let Some(index) = position(&uris, uri) {
            return Ok(index);
        }
        let index = u16::try_from(uris.len())
            .map_err(|_| UaError::out_of_memory("namespace table is full"))?;
        uris.try_reserve(1)
            .map_err(|_| UaError::out_of_memory("namespace table"))?;
        uris.push(uri.to_string());
        info!(namespace = uri, index, "Added namespace");
        Ok(index)
    }

    /// Looks up the index of `uri`.
    pub fn index_of(&self, uri: &str) -> UaResult<u16> {
        position(&self.uris.read(), uri).ok_or_else(|| UaError::not_found("namespace", uri))
    }

    /// Looks up the URI at `index`.
    pub fn uri_at(&self, index: u16) -> UaResult<String> {
        self.uris
            .read()
            .get(usize::from(index))
            .cloned()
            .ok_or_else(|| UaError::not_found("namespace", index.to_string()))
    }

    /// Copy of the whole table (the `NamespaceArray` value).
    pub fn snapshot(&self) -> Vec<String> {
        self.uris.read().clone()
    }

    /// Number of namespaces.
    pub fn len(&self) -> usize {
        self.uris.read().len()
    }

    /// Always `false`: the two fixed entries are present from construction.
    pub fn is_empty(&self) -> bool {
        self.uris.read().is_empty()
    }
}

fn position(uris: &[String], uri: &str) -> Option<u16> {
    uris.iter()
        .position(|u| u == uri)
        .and_then(|i| u16::try_from(i).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::StatusCode;
    use std::sync::Arc;

    #[test]
    fn test_fixed_entries() {
        let table = NamespaceTable::new("urn:keel:test");
        assert_eq!(table.index_of(NS0_URI).unwrap(), 0);
        assert_eq!(table.index_of("urn:keel:test").unwrap(), 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_add_is_idempotent() {
        let table = NamespaceTable::new("urn:keel:test");
        let first = table.add("urn:test").unwrap();
        let len = table.len();
        let second = table.add("urn:test").unwrap();
        assert_eq!(first, 2);
        assert_eq!(first, second);
        assert_eq!(table.len(), len);
        assert_eq!(table.uri_at(2).unwrap(), "urn:test");
    }

    #[test]
    fn test_unknown_lookups() {
        let table = NamespaceTable::new("urn:keel:test");
        assert_eq!(
            table.index_of("urn:missing").unwrap_err().status_code(),
            StatusCode::BadNotFound
        );
        assert!(table.uri_at(9).is_err());
    }

    #[test]
    fn test_concurrent_adds_agree() {
        let table = Arc::new(NamespaceTable::new("urn:keel:test"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&table);
                std::thread::spawn(move || t.add("urn:shared").unwrap())
            })
            .collect();
        let indices: Vec<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(indices.iter().all(|&i| i == 2));
        assert_eq!(table.len(), 3);
    }
}
