// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Standard address-space content.
//!
//! Populates the part of namespace 0 the runtime relies on: the reference
//! type and built-in data type trees walked by the consistency helpers,
//! the base object and variable types, the `Objects` folder and the
//! `Server` object with its namespace array and status variables.
//!
//! Every hierarchical link is written in both directions so upward and
//! downward walks see the same graph.

use std::collections::BTreeMap;

use keel_core::types::{ids, value_rank};
use keel_core::{
    BuiltinType, DataValue, Node, NodeAttributes, NodeClass, NodeId, Nodestore, UaResult,
    VariableAttributes, Variant,
};
use tracing::debug;

fn ns0(id: u32) -> NodeId {
    NodeId::numeric(0, id)
}

/// Collects ns0 nodes before they are inserted.
struct Ns0Builder {
    nodes: BTreeMap<u32, Node>,
}

impl Ns0Builder {
    fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }

    fn node(&mut self, id: u32, name: &str, attributes: NodeAttributes) -> &mut Self {
        self.nodes.insert(
            id,
            Node::new(attributes.node_class())
                .with_id(ns0(id))
                .with_name(0, name)
                .with_attributes(attributes),
        );
        self
    }

    fn link(&mut self, source: u32, reference_type: u32, target: u32) -> &mut Self {
        if let Some(node) = self.nodes.get_mut(&source) {
            node.add_reference(ns0(reference_type), ns0(target), false);
        }
        if let Some(node) = self.nodes.get_mut(&target) {
            node.add_reference(ns0(reference_type), ns0(source), true);
        }
        self
    }

    fn subtype(&mut self, parent: u32, child: u32) -> &mut Self {
        self.link(parent, ids::HAS_SUBTYPE, child)
    }

    fn typed(&mut self, instance: u32, type_definition: u32) -> &mut Self {
        if let Some(node) = self.nodes.get_mut(&instance) {
            node.add_reference(ns0(ids::HAS_TYPE_DEFINITION), ns0(type_definition), false);
        }
        self
    }

    fn reference_types(&mut self) -> &mut Self {
        let abstract_type = |symmetric| NodeAttributes::ReferenceType {
            is_abstract: true,
            symmetric,
        };
        let concrete = NodeAttributes::ReferenceType {
            is_abstract: false,
            symmetric: false,
        };
        self.node(ids::REFERENCES, "References", abstract_type(true))
            .node(ids::HIERARCHICAL_REFERENCES, "HierarchicalReferences", abstract_type(false))
            .node(
                ids::NON_HIERARCHICAL_REFERENCES,
                "NonHierarchicalReferences",
                abstract_type(false),
            )
            .node(ids::HAS_CHILD, "HasChild", abstract_type(false))
            .node(ids::AGGREGATES, "Aggregates", abstract_type(false))
            .node(ids::ORGANIZES, "Organizes", concrete.clone())
            .node(ids::HAS_SUBTYPE, "HasSubtype", concrete.clone())
            .node(ids::HAS_COMPONENT, "HasComponent", concrete.clone())
            .node(ids::HAS_PROPERTY, "HasProperty", concrete.clone())
            .node(ids::HAS_TYPE_DEFINITION, "HasTypeDefinition", concrete)
            .subtype(ids::REFERENCES, ids::HIERARCHICAL_REFERENCES)
            .subtype(ids::REFERENCES, ids::NON_HIERARCHICAL_REFERENCES)
            .subtype(ids::HIERARCHICAL_REFERENCES, ids::HAS_CHILD)
            .subtype(ids::HIERARCHICAL_REFERENCES, ids::ORGANIZES)
            .subtype(ids::HAS_CHILD, ids::AGGREGATES)
            .subtype(ids::HAS_CHILD, ids::HAS_SUBTYPE)
            .subtype(ids::AGGREGATES, ids::HAS_COMPONENT)
            .subtype(ids::AGGREGATES, ids::HAS_PROPERTY)
            .subtype(ids::NON_HIERARCHICAL_REFERENCES, ids::HAS_TYPE_DEFINITION)
    }

    fn data_types(&mut self) -> &mut Self {
        let data_type = |is_abstract| NodeAttributes::DataType { is_abstract };
        self.node(ids::BASE_DATA_TYPE, "BaseDataType", data_type(true))
            .node(ids::NUMBER, "Number", data_type(true))
            .node(ids::INTEGER, "Integer", data_type(true))
            .node(ids::UINTEGER, "UInteger", data_type(true))
            .node(ids::ENUMERATION, "Enumeration", data_type(true))
            .node(ids::STRUCTURE, "Structure", data_type(true))
            .subtype(ids::BASE_DATA_TYPE, ids::NUMBER)
            .subtype(ids::NUMBER, ids::INTEGER)
            .subtype(ids::NUMBER, ids::UINTEGER)
            .subtype(ids::BASE_DATA_TYPE, ids::ENUMERATION)
            .subtype(ids::BASE_DATA_TYPE, ids::STRUCTURE);

        for builtin in BuiltinType::ALL {
            let parent = match builtin {
                BuiltinType::SByte
                | BuiltinType::Int16
                | BuiltinType::Int32
                | BuiltinType::Int64 => ids::INTEGER,
                BuiltinType::Byte
                | BuiltinType::UInt16
                | BuiltinType::UInt32
                | BuiltinType::UInt64 => ids::UINTEGER,
                BuiltinType::Float | BuiltinType::Double => ids::NUMBER,
                _ => ids::BASE_DATA_TYPE,
            };
            self.node(builtin.type_id(), builtin.name(), data_type(false))
                .subtype(parent, builtin.type_id());
        }
        self
    }

    fn object_and_variable_types(&mut self) -> &mut Self {
        let variable_type = |is_abstract| NodeAttributes::VariableType {
            attributes: VariableAttributes::default(),
            is_abstract,
        };
        self.node(
            ids::BASE_OBJECT_TYPE,
            "BaseObjectType",
            NodeAttributes::ObjectType { is_abstract: false },
        )
        .node(
            ids::FOLDER_TYPE,
            "FolderType",
            NodeAttributes::ObjectType { is_abstract: false },
        )
        .node(ids::BASE_VARIABLE_TYPE, "BaseVariableType", variable_type(true))
        .node(ids::BASE_DATA_VARIABLE_TYPE, "BaseDataVariableType", variable_type(false))
        .node(ids::PROPERTY_TYPE, "PropertyType", variable_type(false))
        .subtype(ids::BASE_OBJECT_TYPE, ids::FOLDER_TYPE)
        .subtype(ids::BASE_VARIABLE_TYPE, ids::BASE_DATA_VARIABLE_TYPE)
        .subtype(ids::BASE_VARIABLE_TYPE, ids::PROPERTY_TYPE)
    }

    fn server_object(&mut self, namespaces: &[String]) -> UaResult<&mut Self> {
        let uris = namespaces.iter().map(|uri| Variant::from(uri.as_str())).collect();
        let namespace_array = VariableAttributes {
            value: DataValue::new(Variant::array(BuiltinType::String, uris)?),
            data_type: BuiltinType::String.node_id(),
            value_rank: value_rank::ONE_DIMENSION,
            array_dimensions: vec![0],
        };
        let date_time = || VariableAttributes {
            value: DataValue::default(),
            data_type: BuiltinType::DateTime.node_id(),
            value_rank: value_rank::SCALAR,
            array_dimensions: Vec::new(),
        };
        let status = VariableAttributes {
            data_type: ns0(ids::STRUCTURE),
            value_rank: value_rank::SCALAR,
            ..VariableAttributes::default()
        };

        self.node(ids::OBJECTS_FOLDER, "Objects", NodeAttributes::Object { event_notifier: 0 })
            .node(ids::SERVER, "Server", NodeAttributes::Object { event_notifier: 1 })
            .node(
                ids::SERVER_NAMESPACE_ARRAY,
                "NamespaceArray",
                NodeAttributes::Variable(namespace_array),
            )
            .node(ids::SERVER_SERVER_STATUS, "ServerStatus", NodeAttributes::Variable(status))
            .node(
                ids::SERVER_SERVER_STATUS_START_TIME,
                "StartTime",
                NodeAttributes::Variable(date_time()),
            )
            .node(
                ids::SERVER_SERVER_STATUS_CURRENT_TIME,
                "CurrentTime",
                NodeAttributes::Variable(date_time()),
            )
            .typed(ids::OBJECTS_FOLDER, ids::FOLDER_TYPE)
            .typed(ids::SERVER, ids::BASE_OBJECT_TYPE)
            .typed(ids::SERVER_NAMESPACE_ARRAY, ids::PROPERTY_TYPE)
            .typed(ids::SERVER_SERVER_STATUS, ids::BASE_DATA_VARIABLE_TYPE)
            .typed(ids::SERVER_SERVER_STATUS_START_TIME, ids::BASE_DATA_VARIABLE_TYPE)
            .typed(ids::SERVER_SERVER_STATUS_CURRENT_TIME, ids::BASE_DATA_VARIABLE_TYPE)
            .link(ids::OBJECTS_FOLDER, ids::ORGANIZES, ids::SERVER)
            .link(ids::SERVER, ids::HAS_PROPERTY, ids::SERVER_NAMESPACE_ARRAY)
            .link(ids::SERVER, ids::HAS_COMPONENT, ids::SERVER_SERVER_STATUS)
            .link(
                ids::SERVER_SERVER_STATUS,
                ids::HAS_COMPONENT,
                ids::SERVER_SERVER_STATUS_START_TIME,
            )
            .link(
                ids::SERVER_SERVER_STATUS,
                ids::HAS_COMPONENT,
                ids::SERVER_SERVER_STATUS_CURRENT_TIME,
            );
        Ok(self)
    }
}

/// Inserts the standard nodes into `store`.
///
/// `namespaces` seeds the `NamespaceArray` value. Returns the number of
/// nodes inserted.
pub fn populate_ns0(store: &dyn Nodestore, namespaces: &[String]) -> UaResult<usize> {
    let mut builder = Ns0Builder::new();
    builder
        .reference_types()
        .data_types()
        .object_and_variable_types()
        .server_object(namespaces)?;

    let count = builder.nodes.len();
    for (_, node) in builder.nodes {
        store.insert_node(node)?;
    }
    debug!(nodes = count, "Populated standard namespace");
    Ok(count)
}

/// Node class of an ns0 id inserted by [`populate_ns0`], if any.
pub fn ns0_class(store: &dyn Nodestore, id: u32) -> Option<NodeClass> {
    store.get_node(&ns0(id)).map(|node| node.node_class())
}
