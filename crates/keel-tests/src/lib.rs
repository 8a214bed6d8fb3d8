// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # keel-tests
//!
//! Integration tests and shared test utilities for the keel workspace.
//!
//! ## Module Structure
//!
//! ```text
//! keel-tests/
//! ├── src/
//! │   ├── lib.rs          # This file
//! │   └── common/
//! │       ├── mod.rs      # Logging setup and temp directories
//! │       ├── fixtures.rs # Configurations and address-space fixtures
//! │       ├── builders.rs # TestServerBuilder
//! │       ├── assertions.rs # Assertion extensions for Server
//! │       ├── mocks.rs    # Mock listeners, recorders, tracking nodestore
//! │       └── harness.rs  # TestServer driven by a manual clock
//! └── tests/
//!     ├── integration_config.rs
//!     ├── integration_consistency.rs
//!     ├── integration_lifecycle.rs
//!     ├── integration_sessions.rs
//!     ├── integration_subscriptions.rs
//!     └── integration_workqueue.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All integration tests
//! cargo test -p keel-tests
//!
//! # One file
//! cargo test -p keel-tests --test integration_lifecycle
//!
//! # With logs
//! RUST_LOG=keel_server=debug cargo test -p keel-tests -- --nocapture
//! ```
//!
//! ## Test Categories
//!
//! - **Lifecycle**: startup, iterate, repeated callbacks, shutdown
//! - **Sessions**: channel/session binding, expiry sweeps, certificate rotation
//! - **Work queue**: deferred release ordering in both execution models
//! - **Subscriptions**: sampling, publishing, keep-alives, deletion callbacks
//! - **Consistency**: type hierarchy, value checks, snapshot iteration
//! - **Config**: file loading, placeholders, validation
//!
//! ## Harness
//!
//! ```rust,ignore
//! use keel_tests::prelude::*;
//!
//! let mut test = TestServerBuilder::new()
//!     .listener(MockListener::new("tcp"))
//!     .build()?;
//! test.startup()?;
//! test.run_for(Duration::from_millis(550));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Everything a test file usually needs.
pub mod prelude {
    pub use crate::common::assertions::*;
    pub use crate::common::builders::*;
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::mocks::*;
    pub use crate::common::{init_test_logging, temp_test_dir, unique_test_id};
}
