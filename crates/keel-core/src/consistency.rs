// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Consistency helpers layered over a [`Nodestore`].
//!
//! These routines walk the type hierarchy, check whether a value fits the
//! declared type of a variable, and iterate a node's references safely
//! while the callback mutates the graph.
//!
//! # Design Principles
//!
//! - **Check out, read, release**: every node is borrowed through
//!   [`NodeGuard`] and released before the next hop, so no walk holds more
//!   than one borrow at a time.
//! - **Cycles terminate**: walks keep a visited set. The type graph should
//!   be acyclic but a broken model must not hang the server.
//! - **Allocation failure is incompatibility**: the boolean checks return
//!   `false` when they cannot reserve memory for their bookkeeping.
//! - **Snapshot-then-iterate**: [`for_each_child_node`] copies the
//!   reference list before the first callback runs.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::{StatusCode, UaError, UaResult};
use crate::node::Node;
use crate::nodestore::{NodeGuard, Nodestore};
use crate::types::{ids, value_rank, BuiltinType, NodeClass, NodeId, Variant};

/// Maximum number of hops [`is_node_in_tree`] follows upward.
pub const MAX_TREE_DEPTH: usize = 50;

/// Attempts [`edit_node`] makes before giving up on concurrent writers.
pub const MAX_EDIT_ATTEMPTS: usize = 16;

fn has_subtype() -> NodeId {
    NodeId::numeric(0, ids::HAS_SUBTYPE)
}

// =============================================================================
// Type hierarchy
// =============================================================================

/// Collects `leaf` and every type reachable over `HasSubtype`.
///
/// Walking upward yields the supertypes, walking downward the subtypes. The
/// result starts with the leaf and contains each id once.
pub fn get_type_hierarchy(
    store: &dyn Nodestore,
    leaf: &NodeId,
    walk_downwards: bool,
) -> UaResult<Vec<NodeId>> {
    get_types_hierarchy(store, std::slice::from_ref(leaf), walk_downwards)
}

/// Multi-leaf form of [`get_type_hierarchy`].
pub fn get_types_hierarchy(
    store: &dyn Nodestore,
    leaves: &[NodeId],
    walk_downwards: bool,
) -> UaResult<Vec<NodeId>> {
    let reference_type = has_subtype();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut results: Vec<NodeId> = Vec::new();
    results
        .try_reserve(leaves.len())
        .map_err(|_| UaError::out_of_memory("collecting the type hierarchy"))?;

    for leaf in leaves {
        if visited.insert(leaf.clone()) {
            results.push(leaf.clone());
        }
    }

    // Breadth-first over the growing result list.
    let mut cursor = 0;
    while cursor < results.len() {
        let current = results[cursor].clone();
        cursor += 1;

        let Some(node) = NodeGuard::checkout(store, &current) else {
            continue;
        };
        for target in node.targets(&reference_type, !walk_downwards) {
            if visited.contains(target) {
                continue;
            }
            results
                .try_reserve(1)
                .map_err(|_| UaError::out_of_memory("collecting the type hierarchy"))?;
            visited.insert(target.clone());
            results.push(target.clone());
        }
    }

    Ok(results)
}

/// Returns `true` if `target` is reachable from `leaf` by following inverse
/// references whose type is one of `reference_types`.
///
/// `leaf == target` counts as reachable. The search stops after
/// [`MAX_TREE_DEPTH`] hops.
pub fn is_node_in_tree(
    store: &dyn Nodestore,
    leaf: &NodeId,
    target: &NodeId,
    reference_types: &[NodeId],
) -> bool {
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<(NodeId, usize)> = vec![(leaf.clone(), 0)];

    while let Some((current, depth)) = stack.pop() {
        if &current == target {
            return true;
        }
        if depth >= MAX_TREE_DEPTH {
            warn!(leaf = %leaf, target = %target, "Tree search exceeded maximum depth");
            continue;
        }
        if visited.try_reserve(1).is_err() {
            return false;
        }
        if !visited.insert(current.clone()) {
            continue;
        }

        let Some(node) = NodeGuard::checkout(store, &current) else {
            continue;
        };
        for kind in node
            .references
            .iter()
            .filter(|rk| rk.is_inverse && reference_types.contains(&rk.reference_type_id))
        {
            if stack.try_reserve(kind.targets.len()).is_err() {
                return false;
            }
            stack.extend(kind.targets.iter().map(|t| (t.clone(), depth + 1)));
        }
    }

    false
}

/// Returns `true` if `sub_type` equals `super_type` or derives from it.
pub fn is_subtype_of(store: &dyn Nodestore, sub_type: &NodeId, super_type: &NodeId) -> bool {
    is_node_in_tree(store, sub_type, super_type, &[has_subtype()])
}

/// Returns the type node of `node`.
///
/// Instances follow `HasTypeDefinition`; types follow the inverse
/// `HasSubtype` to their parent type. Methods and views have no type.
pub fn get_node_type<'a>(store: &'a dyn Nodestore, node: &Node) -> Option<NodeGuard<'a>> {
    let (reference_type, is_inverse) = match node.node_class() {
        NodeClass::Object | NodeClass::Variable => {
            (NodeId::numeric(0, ids::HAS_TYPE_DEFINITION), false)
        }
        NodeClass::ObjectType
        | NodeClass::VariableType
        | NodeClass::ReferenceType
        | NodeClass::DataType => (has_subtype(), true),
        NodeClass::Method | NodeClass::View => return None,
    };
    let found = node
        .targets(&reference_type, is_inverse)
        .find_map(|target| NodeGuard::checkout(store, target));
    found
}

/// Returns `true` if a type node still has subtypes or instances.
pub fn has_subtype_or_instances(node: &Node) -> bool {
    let has_type_definition = NodeId::numeric(0, ids::HAS_TYPE_DEFINITION);
    let has_subtype = has_subtype();
    node.references.iter().any(|rk| {
        (!rk.is_inverse && rk.reference_type_id == has_subtype)
            || (rk.is_inverse && rk.reference_type_id == has_type_definition)
    })
}

// =============================================================================
// Type compatibility
// =============================================================================

/// Checks whether `data_type` may be stored where `constraint` is declared.
///
/// With `is_value` set, `data_type` is the type of an actual value, which
/// may also be a built-in supertype of a constraint that refines it.
pub fn compatible_data_type(
    store: &dyn Nodestore,
    data_type: &NodeId,
    constraint: &NodeId,
    is_value: bool,
) -> bool {
    if data_type.is_null() {
        return false;
    }
    if constraint.is_null() || data_type == constraint {
        return true;
    }
    if constraint.is_ns0(ids::BASE_DATA_TYPE) {
        return true;
    }
    if is_subtype_of(store, data_type, constraint) {
        return true;
    }
    // Enumerations carry Int32 values.
    let enumeration = NodeId::numeric(0, ids::ENUMERATION);
    if data_type.is_ns0(BuiltinType::Int32.type_id())
        && is_subtype_of(store, constraint, &enumeration)
    {
        return true;
    }
    // A built-in value may fill a constraint derived from its type.
    if is_value
        && data_type.namespace_index == 0
        && data_type.as_numeric().is_some_and(|n| n <= 25)
        && is_subtype_of(store, constraint, data_type)
    {
        return true;
    }
    false
}

/// Checks a value rank against a constraining value rank.
pub fn compatible_value_ranks(value_rank: i32, constraint: i32) -> bool {
    match constraint {
        value_rank::SCALAR_OR_ONE_DIMENSION => value_rank == value_rank::SCALAR || value_rank == 1,
        value_rank::ANY => true,
        value_rank::SCALAR => value_rank == value_rank::SCALAR,
        value_rank::ONE_OR_MORE_DIMENSIONS => value_rank >= 0,
        c if c < value_rank::SCALAR_OR_ONE_DIMENSION => false,
        c => value_rank == c,
    }
}

/// Checks array dimensions against constraining array dimensions.
///
/// An empty constraint accepts anything. Otherwise the number of dimensions
/// must match and every fixed (non-zero) constraint length bounds the
/// corresponding length.
pub fn compatible_array_dimensions(constraint: &[u32], test: &[u32]) -> bool {
    if constraint.is_empty() {
        return true;
    }
    if constraint.len() != test.len() {
        return false;
    }
    constraint
        .iter()
        .zip(test)
        .all(|(&c, &t)| c == 0 || t <= c)
}

/// Checks the dimensions of an actual value against declared dimensions.
pub fn compatible_value_array_dimensions(value: &Variant, target: &[u32]) -> bool {
    if value.is_scalar() || value.is_empty() {
        return target.is_empty();
    }
    compatible_array_dimensions(target, &value.array_dimensions())
}

/// Checks that a declared value rank and array-dimension count agree.
pub fn compatible_value_rank_array_dimensions(rank: i32, dimensions_len: usize) -> bool {
    if rank < value_rank::SCALAR_OR_ONE_DIMENSION {
        return false;
    }
    if rank <= value_rank::ONE_OR_MORE_DIMENSIONS {
        // Ranks without a fixed dimension count may only list dimensions
        // when the rank admits arrays of any shape.
        return dimensions_len == 0 || rank == value_rank::ONE_OR_MORE_DIMENSIONS;
    }
    usize::try_from(rank).is_ok_and(|r| r == dimensions_len)
}

/// Checks whether the shape of `value` satisfies `rank`.
fn compatible_value_rank_value(rank: i32, value: &Variant) -> bool {
    if rank < value_rank::SCALAR_OR_ONE_DIMENSION {
        return false;
    }
    let dimensions = if value.is_scalar() {
        0
    } else {
        value.array_dimensions().len().max(1)
    };
    match rank {
        value_rank::SCALAR_OR_ONE_DIMENSION => dimensions <= 1,
        value_rank::ANY => true,
        value_rank::SCALAR => dimensions == 0,
        value_rank::ONE_OR_MORE_DIMENSIONS => dimensions >= 1,
        r => usize::try_from(r).is_ok_and(|r| r == dimensions),
    }
}

/// Full pre-write check of `value` against a variable's declared type,
/// rank and dimensions.
pub fn compatible_value(
    store: &dyn Nodestore,
    target_data_type: &NodeId,
    target_rank: i32,
    target_dimensions: &[u32],
    value: &Variant,
) -> bool {
    let Some(value_type) = value.data_type() else {
        // Only untyped targets accept an empty value.
        return target_data_type.is_null() || target_data_type.is_ns0(ids::BASE_DATA_TYPE);
    };
    if !compatible_data_type(store, &value_type, target_data_type, true) {
        debug!(
            value_type = %value_type,
            target = %target_data_type,
            "Value data type is not compatible"
        );
        return false;
    }
    if !compatible_value_array_dimensions(value, target_dimensions) {
        return false;
    }
    compatible_value_rank_value(target_rank, value)
}

/// Checks `value` against the variable node `node` and reports why it does
/// not fit.
pub fn check_value_for_node(store: &dyn Nodestore, node: &Node, value: &Variant) -> UaResult<()> {
    let attributes = node.variable().ok_or_else(|| UaError::AttributeIdInvalid {
        node_id: node.node_id.to_string(),
        attribute: "Value".to_string(),
    })?;
    if compatible_value(
        store,
        &attributes.data_type,
        attributes.value_rank,
        &attributes.array_dimensions,
        value,
    ) {
        Ok(())
    } else {
        Err(UaError::type_mismatch(
            format!(
                "{} (rank {}, dimensions {:?})",
                attributes.data_type, attributes.value_rank, attributes.array_dimensions
            ),
            value.type_name(),
        ))
    }
}

// =============================================================================
// Editing and traversal
// =============================================================================

/// Copies a node, applies `edit`, and writes it back.
///
/// Retries when another writer replaced the node in between. An error from
/// `edit` discards the copy and is returned unchanged.
pub fn edit_node<F>(store: &dyn Nodestore, node_id: &NodeId, mut edit: F) -> UaResult<()>
where
    F: FnMut(&mut Node) -> UaResult<()>,
{
    let mut last_error = None;
    for _ in 0..MAX_EDIT_ATTEMPTS {
        let mut copy = store.get_node_copy(node_id)?;
        if let Err(e) = edit(&mut copy) {
            store.delete_node(copy);
            return Err(e);
        }
        match store.replace_node(copy) {
            Ok(()) => return Ok(()),
            Err(e) if e.status_code() == StatusCode::BadInternalError => {
                debug!(node_id = %node_id, "Node changed during edit, retrying");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error.unwrap_or_else(|| UaError::internal("edit retries exhausted")))
}

/// Removes a node, refusing type nodes that still have subtypes or instances.
pub fn remove_node_checked(store: &dyn Nodestore, node_id: &NodeId) -> UaResult<()> {
    {
        let node = NodeGuard::checkout(store, node_id)
            .ok_or_else(|| UaError::node_id_unknown(node_id))?;
        if node.node_class().is_type() && has_subtype_or_instances(&node) {
            return Err(UaError::ReferencesNotAllowed {
                node_id: node_id.to_string(),
            });
        }
    }
    store.remove_node(node_id)
}

/// One reference of a node as seen by [`for_each_child_node`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildReference {
    /// The node on the other end.
    pub target: NodeId,
    /// Direction of the reference.
    pub is_inverse: bool,
    /// The reference type.
    pub reference_type_id: NodeId,
}

/// Calls `callback` for every reference of `parent`.
///
/// The reference list is copied before the first call, so the callback may
/// add or remove references of `parent` without affecting the traversal.
/// References are visited last-to-first; the first callback error stops
/// the traversal and is returned.
pub fn for_each_child_node<F>(
    store: &dyn Nodestore,
    parent: &NodeId,
    mut callback: F,
) -> UaResult<()>
where
    F: FnMut(&ChildReference) -> UaResult<()>,
{
    let snapshot = {
        let node = NodeGuard::checkout(store, parent)
            .ok_or_else(|| UaError::node_id_unknown(parent))?;
        let total: usize = node.references.iter().map(|rk| rk.targets.len()).sum();
        let mut snapshot: Vec<ChildReference> = Vec::new();
        snapshot
            .try_reserve_exact(total)
            .map_err(|_| UaError::out_of_memory("copying references for iteration"))?;
        for kind in &node.references {
            for target in &kind.targets {
                snapshot.push(ChildReference {
                    target: target.clone(),
                    is_inverse: kind.is_inverse,
                    reference_type_id: kind.reference_type_id.clone(),
                });
            }
        }
        snapshot
    };

    snapshot.iter().rev().try_for_each(&mut callback)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeAttributes, VariableAttributes};
    use crate::nodestore::MemoryNodestore;
    use crate::types::DataValue;

    fn insert_type(store: &MemoryNodestore, id: u32, parent: Option<u32>) {
        let mut node = Node::new(NodeClass::DataType).with_id(NodeId::numeric(0, id));
        if let Some(parent) = parent {
            node.add_reference(has_subtype(), NodeId::numeric(0, parent), true);
        }
        store.insert_node(node).unwrap();
        if let Some(parent) = parent {
            edit_node(store, &NodeId::numeric(0, parent), |p| {
                p.add_reference(has_subtype(), NodeId::numeric(0, id), false);
                Ok(())
            })
            .unwrap();
        }
    }

    /// BaseDataType -> Number -> Integer -> Int32, Number -> Double,
    /// BaseDataType -> Enumeration -> (ns=1;i=3000), BaseDataType -> DateTime -> UtcTime(294).
    fn type_store() -> MemoryNodestore {
        let store = MemoryNodestore::new();
        insert_type(&store, ids::BASE_DATA_TYPE, None);
        insert_type(&store, ids::NUMBER, Some(ids::BASE_DATA_TYPE));
        insert_type(&store, ids::INTEGER, Some(ids::NUMBER));
        insert_type(&store, 6, Some(ids::INTEGER));
        insert_type(&store, 11, Some(ids::NUMBER));
        insert_type(&store, ids::ENUMERATION, Some(ids::BASE_DATA_TYPE));
        insert_type(&store, 13, Some(ids::BASE_DATA_TYPE));
        insert_type(&store, 294, Some(13));
        insert_type(&store, 12, Some(ids::BASE_DATA_TYPE));

        let mut custom_enum = Node::new(NodeClass::DataType).with_id(NodeId::numeric(1, 3000));
        custom_enum.add_reference(has_subtype(), NodeId::numeric(0, ids::ENUMERATION), true);
        store.insert_node(custom_enum).unwrap();
        store
    }

    #[test]
    fn test_type_hierarchy_upward() {
        let store = type_store();
        let up = get_type_hierarchy(&store, &NodeId::numeric(0, 6), false).unwrap();
        assert_eq!(
            up,
            vec![
                NodeId::numeric(0, 6),
                NodeId::numeric(0, ids::INTEGER),
                NodeId::numeric(0, ids::NUMBER),
                NodeId::numeric(0, ids::BASE_DATA_TYPE),
            ]
        );
        assert_eq!(store.outstanding_borrows(), 0);
    }

    #[test]
    fn test_type_hierarchy_downward_multiple_leaves() {
        let store = type_store();
        let down = get_types_hierarchy(
            &store,
            &[NodeId::numeric(0, ids::NUMBER), NodeId::numeric(0, ids::INTEGER)],
            true,
        )
        .unwrap();
        assert_eq!(down.len(), 4);
        assert_eq!(down[0], NodeId::numeric(0, ids::NUMBER));
        assert!(down.contains(&NodeId::numeric(0, 6)));
        assert!(down.contains(&NodeId::numeric(0, 11)));
    }

    #[test]
    fn test_type_hierarchy_cycle_terminates() {
        let store = MemoryNodestore::new();
        insert_type(&store, 5001, None);
        insert_type(&store, 5002, Some(5001));
        insert_type(&store, 5003, Some(5002));
        // Close the loop: 5001 is also a subtype of 5003.
        edit_node(&store, &NodeId::numeric(0, 5001), |n| {
            n.add_reference(has_subtype(), NodeId::numeric(0, 5003), true);
            Ok(())
        })
        .unwrap();

        let up = get_type_hierarchy(&store, &NodeId::numeric(0, 5003), false).unwrap();
        assert_eq!(up.len(), 3);
        let unique: HashSet<_> = up.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_is_node_in_tree() {
        let store = type_store();
        let refs = [has_subtype()];
        let int32 = NodeId::numeric(0, 6);
        let number = NodeId::numeric(0, ids::NUMBER);
        assert!(is_node_in_tree(&store, &int32, &number, &refs));
        assert!(is_node_in_tree(&store, &int32, &int32, &refs));
        assert!(!is_node_in_tree(&store, &number, &int32, &refs));
        assert!(!is_node_in_tree(
            &store,
            &int32,
            &number,
            &[NodeId::numeric(0, ids::ORGANIZES)]
        ));
    }

    #[test]
    fn test_compatible_data_type() {
        let store = type_store();
        let int32 = NodeId::numeric(0, 6);
        let number = NodeId::numeric(0, ids::NUMBER);
        let double = NodeId::numeric(0, 11);
        let base = NodeId::numeric(0, ids::BASE_DATA_TYPE);

        assert!(compatible_data_type(&store, &int32, &number, false));
        assert!(compatible_data_type(&store, &double, &base, false));
        assert!(!compatible_data_type(&store, &double, &int32, false));
        assert!(!compatible_data_type(&store, &NodeId::null(), &base, false));
        // Int32 is accepted for enumeration subtypes.
        assert!(compatible_data_type(&store, &int32, &NodeId::numeric(1, 3000), true));
        // A DateTime value fits a UtcTime declaration.
        let date_time = NodeId::numeric(0, 13);
        let utc_time = NodeId::numeric(0, 294);
        assert!(compatible_data_type(&store, &date_time, &utc_time, true));
        assert!(!compatible_data_type(&store, &date_time, &utc_time, false));
    }

    #[test]
    fn test_compatible_value_ranks() {
        assert!(compatible_value_ranks(-1, value_rank::SCALAR_OR_ONE_DIMENSION));
        assert!(compatible_value_ranks(1, value_rank::SCALAR_OR_ONE_DIMENSION));
        assert!(!compatible_value_ranks(2, value_rank::SCALAR_OR_ONE_DIMENSION));
        assert!(compatible_value_ranks(3, value_rank::ANY));
        assert!(!compatible_value_ranks(1, value_rank::SCALAR));
        assert!(compatible_value_ranks(2, value_rank::ONE_OR_MORE_DIMENSIONS));
        assert!(!compatible_value_ranks(-1, value_rank::ONE_OR_MORE_DIMENSIONS));
        assert!(compatible_value_ranks(2, 2));
        assert!(!compatible_value_ranks(1, 2));
    }

    #[test]
    fn test_compatible_array_dimensions() {
        assert!(compatible_array_dimensions(&[], &[4, 4]));
        assert!(compatible_array_dimensions(&[4, 0], &[3, 100]));
        assert!(!compatible_array_dimensions(&[4, 4], &[5, 4]));
        assert!(!compatible_array_dimensions(&[4], &[4, 1]));
    }

    #[test]
    fn test_compatible_value_rank_array_dimensions() {
        assert!(compatible_value_rank_array_dimensions(-1, 0));
        assert!(!compatible_value_rank_array_dimensions(-1, 1));
        assert!(compatible_value_rank_array_dimensions(2, 2));
        assert!(!compatible_value_rank_array_dimensions(2, 1));
        assert!(!compatible_value_rank_array_dimensions(-4, 0));
    }

    #[test]
    fn test_compatible_value() {
        let store = type_store();
        let number = NodeId::numeric(0, ids::NUMBER);
        let array =
            Variant::array(BuiltinType::Int32, vec![Variant::Int32(1), Variant::Int32(2)]).unwrap();

        assert!(compatible_value(&store, &number, value_rank::SCALAR, &[], &Variant::Int32(5)));
        assert!(!compatible_value(&store, &number, value_rank::SCALAR, &[], &array));
        assert!(compatible_value(&store, &number, value_rank::ONE_DIMENSION, &[2], &array));
        assert!(!compatible_value(&store, &number, value_rank::ONE_DIMENSION, &[1], &array));
        assert!(!compatible_value(&store, &number, value_rank::ANY, &[], &Variant::from("text")));
        assert!(!compatible_value(&store, &number, value_rank::ANY, &[], &Variant::Empty));
        assert!(compatible_value(
            &store,
            &NodeId::numeric(0, ids::BASE_DATA_TYPE),
            value_rank::ANY,
            &[],
            &Variant::Empty
        ));
    }

    #[test]
    fn test_check_value_for_node() {
        let store = type_store();
        let node = Node::new(NodeClass::Variable).with_attributes(NodeAttributes::Variable(
            VariableAttributes {
                value: DataValue::new(1.0),
                data_type: NodeId::numeric(0, 11),
                value_rank: value_rank::SCALAR,
                array_dimensions: Vec::new(),
            },
        ));
        assert!(check_value_for_node(&store, &node, &Variant::Double(2.0)).is_ok());
        let err = check_value_for_node(&store, &node, &Variant::Int32(2)).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BadTypeMismatch);
    }

    #[test]
    fn test_get_node_type() {
        let store = type_store();
        let int32 = store.get_node_copy(&NodeId::numeric(0, 6)).unwrap();
        let parent = get_node_type(&store, &int32).unwrap();
        assert_eq!(parent.node_id, NodeId::numeric(0, ids::INTEGER));
        drop(parent);

        let method = Node::new(NodeClass::Method);
        assert!(get_node_type(&store, &method).is_none());
        assert_eq!(store.outstanding_borrows(), 0);
    }

    #[test]
    fn test_remove_node_checked() {
        let store = type_store();
        let err = remove_node_checked(&store, &NodeId::numeric(0, ids::NUMBER)).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BadReferencesNotAllowed);
        remove_node_checked(&store, &NodeId::numeric(0, 294)).unwrap();
    }

    #[test]
    fn test_for_each_child_node_snapshot() {
        let store = MemoryNodestore::new();
        let organizes = NodeId::numeric(0, ids::ORGANIZES);
        let mut parent = Node::new(NodeClass::Object).with_id(NodeId::numeric(1, 1));
        for i in 10..13 {
            parent.add_reference(organizes.clone(), NodeId::numeric(1, i), false);
        }
        store.insert_node(parent).unwrap();

        let mut seen = Vec::new();
        for_each_child_node(&store, &NodeId::numeric(1, 1), |child| {
            seen.push(child.target.clone());
            // Mutate the very list being iterated.
            edit_node(&store, &NodeId::numeric(1, 1), |p| {
                p.delete_reference(&organizes, &child.target, false);
                p.add_reference(organizes.clone(), NodeId::numeric(2, 99), false);
                Ok(())
            })
        })
        .unwrap();

        assert_eq!(
            seen,
            vec![NodeId::numeric(1, 12), NodeId::numeric(1, 11), NodeId::numeric(1, 10)]
        );
        let after = store.get_node_copy(&NodeId::numeric(1, 1)).unwrap();
        assert_eq!(after.targets(&organizes, false).count(), 1);
        assert_eq!(store.outstanding_borrows(), 0);
    }

    #[test]
    fn test_for_each_child_node_stops_on_error() {
        let store = MemoryNodestore::new();
        let organizes = NodeId::numeric(0, ids::ORGANIZES);
        let mut parent = Node::new(NodeClass::Object).with_id(NodeId::numeric(1, 1));
        for i in 0..5 {
            parent.add_reference(organizes.clone(), NodeId::numeric(1, 100 + i), false);
        }
        store.insert_node(parent).unwrap();

        let mut calls = 0;
        let result = for_each_child_node(&store, &NodeId::numeric(1, 1), |_| {
            calls += 1;
            if calls == 2 {
                Err(UaError::invalid_argument("child", "stop"))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);

        let missing = for_each_child_node(&store, &NodeId::numeric(1, 404), |_| Ok(()));
        assert_eq!(missing.unwrap_err().status_code(), StatusCode::BadNodeIdUnknown);
    }
}
