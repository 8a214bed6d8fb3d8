// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # keel-core
//!
//! Foundation types for the keel OPC UA server core.
//!
//! ## Overview
//!
//! This crate holds everything the runtime needs to talk about the address
//! space without owning it:
//!
//! - **Errors**: the closed [`StatusCode`] taxonomy and the structured
//!   [`UaError`]
//! - **Types**: [`NodeId`], [`Variant`], [`DataValue`] and friends
//! - **Nodes**: the [`Node`] snapshot with class-specific attributes
//! - **Nodestore**: the storage contract plus an in-memory implementation
//! - **Consistency**: type-hierarchy walks, value compatibility checks and
//!   snapshot-based reference iteration
//!
//! ## Example
//!
//! ```rust,ignore
//! use keel_core::prelude::*;
//!
//! let store = MemoryNodestore::new();
//! let supertypes = get_type_hierarchy(&store, &NodeId::numeric(0, 6), false)?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod consistency;
pub mod error;
pub mod node;
pub mod nodestore;
pub mod types;

pub use consistency::{
    check_value_for_node, compatible_array_dimensions, compatible_data_type, compatible_value,
    compatible_value_array_dimensions, compatible_value_rank_array_dimensions,
    compatible_value_ranks, edit_node, for_each_child_node, get_node_type, get_type_hierarchy,
    get_types_hierarchy, has_subtype_or_instances, is_node_in_tree, remove_node_checked,
    ChildReference,
};
pub use error::{ErrorSeverity, StatusCode, UaError, UaResult};
pub use node::{Node, NodeAttributes, QualifiedName, ReferenceKind, VariableAttributes};
pub use nodestore::{MemoryNodestore, NodeGuard, Nodestore};
pub use types::{
    AttributeId, BuiltinType, DataValue, NodeClass, NodeId, NodeIdentifier, SecurityMode,
    SecurityPolicy, Variant, VariantArray,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Commonly used items.
pub mod prelude {
    pub use crate::consistency::*;
    pub use crate::error::{StatusCode, UaError, UaResult};
    pub use crate::node::{Node, NodeAttributes, VariableAttributes};
    pub use crate::nodestore::{MemoryNodestore, NodeGuard, Nodestore};
    pub use crate::types::{ids, value_rank, DataValue, NodeClass, NodeId, Variant};
}
