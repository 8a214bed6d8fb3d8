// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Node representation shared between the core and nodestore backends.
//!
//! A [`Node`] is snapshot data: the core reads it through the
//! [`Nodestore`](crate::nodestore::Nodestore), copies it when it needs to
//! change it, and hands the copy back through `replace_node`.

use serde::{Deserialize, Serialize};

use crate::types::{ids, value_rank, DataValue, NodeClass, NodeId};

// =============================================================================
// QualifiedName
// =============================================================================

/// A namespace-qualified browse name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Namespace index of the name.
    pub namespace_index: u16,
    /// The name text.
    pub name: String,
}

impl QualifiedName {
    /// Creates a qualified name.
    pub fn new(namespace_index: u16, name: impl Into<String>) -> Self {
        Self {
            namespace_index,
            name: name.into(),
        }
    }
}

// =============================================================================
// ReferenceKind
// =============================================================================

/// All references of one type and direction held by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceKind {
    /// The reference type.
    pub reference_type_id: NodeId,
    /// `true` when the references point from the targets to this node.
    pub is_inverse: bool,
    /// Target node ids, in insertion order.
    pub targets: Vec<NodeId>,
}

impl ReferenceKind {
    /// Returns `true` if this group matches the type and direction.
    #[inline]
    pub fn matches(&self, reference_type_id: &NodeId, is_inverse: bool) -> bool {
        self.is_inverse == is_inverse && &self.reference_type_id == reference_type_id
    }
}

// =============================================================================
// NodeAttributes
// =============================================================================

/// Attributes of a variable or variable type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableAttributes {
    /// The current value.
    pub value: DataValue,
    /// Declared data type.
    pub data_type: NodeId,
    /// Declared value rank.
    pub value_rank: i32,
    /// Declared array dimensions.
    pub array_dimensions: Vec<u32>,
}

impl Default for VariableAttributes {
    fn default() -> Self {
        Self {
            value: DataValue::default(),
            data_type: NodeId::numeric(0, ids::BASE_DATA_TYPE),
            value_rank: value_rank::ANY,
            array_dimensions: Vec::new(),
        }
    }
}

/// Class-specific attributes of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_class", rename_all = "snake_case")]
pub enum NodeAttributes {
    /// Object instance.
    Object {
        /// Event notifier bits.
        event_notifier: u8,
    },
    /// Variable instance.
    Variable(VariableAttributes),
    /// Method.
    Method {
        /// Whether the method may be called.
        executable: bool,
    },
    /// Object type.
    ObjectType {
        /// Abstract types cannot be instantiated.
        is_abstract: bool,
    },
    /// Variable type.
    VariableType {
        /// Type-level value constraints.
        attributes: VariableAttributes,
        /// Abstract types cannot be instantiated.
        is_abstract: bool,
    },
    /// Reference type.
    ReferenceType {
        /// Abstract types cannot be used in references.
        is_abstract: bool,
        /// Symmetric references read the same in both directions.
        symmetric: bool,
    },
    /// Data type.
    DataType {
        /// Abstract types cannot be the type of a value.
        is_abstract: bool,
    },
    /// View.
    View {
        /// Event notifier bits.
        event_notifier: u8,
    },
}

impl NodeAttributes {
    /// Default attributes for a fresh node of the given class.
    pub fn for_class(class: NodeClass) -> Self {
        match class {
            NodeClass::Object => Self::Object { event_notifier: 0 },
            NodeClass::Variable => Self::Variable(VariableAttributes::default()),
            NodeClass::Method => Self::Method { executable: true },
            NodeClass::ObjectType => Self::ObjectType { is_abstract: false },
            NodeClass::VariableType => Self::VariableType {
                attributes: VariableAttributes::default(),
                is_abstract: false,
            },
            NodeClass::ReferenceType => Self::ReferenceType {
                is_abstract: false,
                symmetric: false,
            },
            NodeClass::DataType => Self::DataType { is_abstract: false },
            NodeClass::View => Self::View { event_notifier: 0 },
        }
    }

    /// The node class these attributes belong to.
    pub fn node_class(&self) -> NodeClass {
        match self {
            Self::Object { .. } => NodeClass::Object,
            Self::Variable(_) => NodeClass::Variable,
            Self::Method { .. } => NodeClass::Method,
            Self::ObjectType { .. } => NodeClass::ObjectType,
            Self::VariableType { .. } => NodeClass::VariableType,
            Self::ReferenceType { .. } => NodeClass::ReferenceType,
            Self::DataType { .. } => NodeClass::DataType,
            Self::View { .. } => NodeClass::View,
        }
    }
}

// =============================================================================
// Node
// =============================================================================

/// A node of the address space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// The node id.
    pub node_id: NodeId,
    /// Browse name.
    pub browse_name: QualifiedName,
    /// Display name.
    pub display_name: String,
    /// References grouped by type and direction.
    pub references: Vec<ReferenceKind>,
    /// Class-specific attributes.
    pub attributes: NodeAttributes,
    /// Bumped by the nodestore on every successful replace.
    #[serde(default)]
    pub version: u64,
}

impl Node {
    /// Creates an empty node of the given class with a null id.
    pub fn new(class: NodeClass) -> Self {
        Self {
            node_id: NodeId::null(),
            browse_name: QualifiedName::default(),
            display_name: String::new(),
            references: Vec::new(),
            attributes: NodeAttributes::for_class(class),
            version: 0,
        }
    }

    /// Sets the node id.
    pub fn with_id(mut self, node_id: NodeId) -> Self {
        self.node_id = node_id;
        self
    }

    /// Sets browse and display name from one string.
    pub fn with_name(mut self, namespace_index: u16, name: impl Into<String>) -> Self {
        let name = name.into();
        self.display_name = name.clone();
        self.browse_name = QualifiedName::new(namespace_index, name);
        self
    }

    /// Adds a reference and returns the node.
    pub fn with_reference(
        mut self,
        reference_type_id: NodeId,
        target: NodeId,
        is_inverse: bool,
    ) -> Self {
        self.add_reference(reference_type_id, target, is_inverse);
        self
    }

    /// Replaces the class attributes.
    pub fn with_attributes(mut self, attributes: NodeAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// The node class.
    #[inline]
    pub fn node_class(&self) -> NodeClass {
        self.attributes.node_class()
    }

    /// Variable attributes of a variable or variable type.
    pub fn variable(&self) -> Option<&VariableAttributes> {
        match &self.attributes {
            NodeAttributes::Variable(attributes) => Some(attributes),
            NodeAttributes::VariableType { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    /// Mutable variable attributes of a variable or variable type.
    pub fn variable_mut(&mut self) -> Option<&mut VariableAttributes> {
        match &mut self.attributes {
            NodeAttributes::Variable(attributes) => Some(attributes),
            NodeAttributes::VariableType { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    /// `IsAbstract` of a type node; `false` for instances.
    pub fn is_abstract(&self) -> bool {
        match self.attributes {
            NodeAttributes::ObjectType { is_abstract }
            | NodeAttributes::VariableType { is_abstract, .. }
            | NodeAttributes::ReferenceType { is_abstract, .. }
            | NodeAttributes::DataType { is_abstract } => is_abstract,
            _ => false,
        }
    }

    // =========================================================================
    // References
    // =========================================================================

    /// Adds a reference. Returns `false` if it already existed.
    pub fn add_reference(
        &mut self,
        reference_type_id: NodeId,
        target: NodeId,
        is_inverse: bool,
    ) -> bool {
        match self
            .references
            .iter_mut()
            .find(|rk| rk.matches(&reference_type_id, is_inverse))
        {
            Some(kind) if kind.targets.contains(&target) => false,
            Some(kind) => {
                kind.targets.push(target);
                true
            }
            None => {
                self.references.push(ReferenceKind {
                    reference_type_id,
                    is_inverse,
                    targets: vec![target],
                });
                true
            }
        }
    }

    /// Removes a reference. Returns `false` if it did not exist.
    pub fn delete_reference(
        &mut self,
        reference_type_id: &NodeId,
        target: &NodeId,
        is_inverse: bool,
    ) -> bool {
        let Some(index) = self
            .references
            .iter()
            .position(|rk| rk.matches(reference_type_id, is_inverse))
        else {
            return false;
        };
        let kind = &mut self.references[index];
        let before = kind.targets.len();
        kind.targets.retain(|t| t != target);
        let removed = kind.targets.len() != before;
        if kind.targets.is_empty() {
            self.references.remove(index);
        }
        removed
    }

    /// Removes every reference whose type is in `reference_types`.
    pub fn delete_references_subset(&mut self, reference_types: &[NodeId]) {
        self.references
            .retain(|rk| !reference_types.contains(&rk.reference_type_id));
    }

    /// Targets of references with the given type and direction.
    pub fn targets<'a>(
        &'a self,
        reference_type_id: &'a NodeId,
        is_inverse: bool,
    ) -> impl Iterator<Item = &'a NodeId> + 'a {
        self.references
            .iter()
            .filter(move |rk| rk.matches(reference_type_id, is_inverse))
            .flat_map(|rk| rk.targets.iter())
    }

    /// Returns `true` if the node references `target` with the given type and direction.
    pub fn has_reference(
        &self,
        reference_type_id: &NodeId,
        target: &NodeId,
        is_inverse: bool,
    ) -> bool {
        self.targets(reference_type_id, is_inverse).any(|t| t == target)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn has_subtype() -> NodeId {
        NodeId::numeric(0, ids::HAS_SUBTYPE)
    }

    #[test]
    fn test_new_node_defaults() {
        let node = Node::new(NodeClass::Variable);
        assert!(node.node_id.is_null());
        assert_eq!(node.node_class(), NodeClass::Variable);
        let var = node.variable().unwrap();
        assert_eq!(var.value_rank, value_rank::ANY);
        assert!(var.data_type.is_ns0(ids::BASE_DATA_TYPE));
    }

    #[test]
    fn test_add_reference_is_idempotent() {
        let mut node = Node::new(NodeClass::DataType);
        let target = NodeId::numeric(0, 26);
        assert!(node.add_reference(has_subtype(), target.clone(), true));
        assert!(!node.add_reference(has_subtype(), target.clone(), true));
        assert!(node.add_reference(has_subtype(), target.clone(), false));
        assert_eq!(node.references.len(), 2);
        assert!(node.has_reference(&has_subtype(), &target, true));
    }

    #[test]
    fn test_delete_reference_drops_empty_group() {
        let organizes = NodeId::numeric(0, ids::ORGANIZES);
        let target = NodeId::numeric(1, 7);
        let mut node =
            Node::new(NodeClass::Object).with_reference(organizes.clone(), target.clone(), false);
        assert!(node.delete_reference(&organizes, &target, false));
        assert!(node.references.is_empty());
        assert!(!node.delete_reference(&organizes, &target, false));
    }

    #[test]
    fn test_delete_references_subset() {
        let mut node = Node::new(NodeClass::Object)
            .with_reference(NodeId::numeric(0, ids::ORGANIZES), NodeId::numeric(1, 1), false)
            .with_reference(NodeId::numeric(0, ids::HAS_COMPONENT), NodeId::numeric(1, 2), false)
            .with_reference(
                NodeId::numeric(0, ids::HAS_TYPE_DEFINITION),
                NodeId::numeric(0, 58),
                false,
            );
        node.delete_references_subset(&[
            NodeId::numeric(0, ids::ORGANIZES),
            NodeId::numeric(0, ids::HAS_COMPONENT),
        ]);
        assert_eq!(node.references.len(), 1);
        assert!(node.references[0].reference_type_id.is_ns0(ids::HAS_TYPE_DEFINITION));
    }

    #[test]
    fn test_is_abstract() {
        let node = Node::new(NodeClass::DataType)
            .with_attributes(NodeAttributes::DataType { is_abstract: true });
        assert!(node.is_abstract());
        assert!(!Node::new(NodeClass::Object).is_abstract());
    }
}
