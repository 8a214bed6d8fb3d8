// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configurations and address-space fixtures.

use std::time::Duration;

use keel_config::{ApplicationType, ConcurrencyConfig, EndpointConfig, ServerConfig};
use keel_core::types::{ids, value_rank};
use keel_core::{
    edit_node, BuiltinType, DataValue, Node, NodeAttributes, NodeClass, NodeId, Nodestore,
    UaResult, Variant, VariableAttributes,
};
use keel_server::SubscriptionRequest;

/// URL of the endpoint every fixture configuration exposes.
pub const TEST_ENDPOINT_URL: &str = "opc.tcp://localhost:4840";

/// Namespace registered by most tests.
pub const TEST_NAMESPACE_URI: &str = "urn:test";

/// Test configuration with one unsecured endpoint.
pub fn server_config() -> ServerConfig {
    let mut config = ServerConfig::for_testing();
    config.endpoints = vec![EndpointConfig::unsecured(TEST_ENDPOINT_URL)];
    config
}

/// [`server_config`] with a pooled work queue.
pub fn pooled_config(workers: usize) -> ServerConfig {
    ServerConfig {
        concurrency: ConcurrencyConfig::pooled(workers),
        ..server_config()
    }
}

/// [`server_config`] for a discovery server.
pub fn discovery_config(cleanup_timeout: Duration) -> ServerConfig {
    let mut config = server_config();
    config.application.application_type = ApplicationType::DiscoveryServer;
    config.maintenance.discovery_cleanup_timeout = cleanup_timeout;
    config
}

/// A subscription publishing every 100 ms with short counters.
pub fn fast_subscription() -> SubscriptionRequest {
    SubscriptionRequest {
        publishing_interval: Duration::from_millis(100),
        lifetime_count: 30,
        max_keep_alive_count: 3,
        ..SubscriptionRequest::default()
    }
}

/// A scalar variable named `name` of `data_type` holding `value`, with an
/// inverse Organizes reference to the Objects folder.
pub fn variable_node(id: NodeId, name: &str, data_type: u32, value: impl Into<Variant>) -> Node {
    Node::new(NodeClass::Variable)
        .with_id(id.clone())
        .with_name(id.namespace_index, name)
        .with_reference(
            NodeId::numeric(0, ids::ORGANIZES),
            NodeId::numeric(0, ids::OBJECTS_FOLDER),
            true,
        )
        .with_attributes(NodeAttributes::Variable(VariableAttributes {
            value: DataValue::new(value),
            data_type: NodeId::numeric(0, data_type),
            value_rank: value_rank::SCALAR,
            array_dimensions: Vec::new(),
        }))
}

/// Inserts a Double variable under Objects, links it from the folder and
/// returns its id.
pub fn insert_double_variable(
    store: &dyn Nodestore,
    namespace: u16,
    name: &str,
    value: f64,
) -> UaResult<NodeId> {
    let id = store.insert_node(variable_node(
        NodeId::string(namespace, name),
        name,
        BuiltinType::Double.type_id(),
        value,
    ))?;
    let organizes = NodeId::numeric(0, ids::ORGANIZES);
    edit_node(store, &NodeId::numeric(0, ids::OBJECTS_FOLDER), |folder| {
        folder.add_reference(organizes.clone(), id.clone(), false);
        Ok(())
    })?;
    Ok(id)
}
