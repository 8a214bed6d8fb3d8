// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Monitored items and their callbacks.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use keel_core::{
    AttributeId, BuiltinType, DataValue, NodeAttributes, NodeGuard, NodeId, Nodestore,
    StatusCode, Variant,
};
use serde::{Deserialize, Serialize};

use super::filter::{DataChangeFilter, StandardFilter};
use super::SubscriptionId;
use crate::session::SessionId;
use crate::timer::CallbackId;

/// Identifier of a monitored item, unique within its subscription.
pub type MonitoredItemId = u32;

/// Application data attached to a subscription or monitored item.
pub type ItemContext = Arc<dyn Any + Send + Sync>;

/// Sampling interval used when none is requested, in milliseconds.
pub const DEFAULT_SAMPLING_INTERVAL_MS: f64 = 250.0;

// =============================================================================
// Callbacks
// =============================================================================

/// Identifies the item a callback is about.
#[derive(Clone, Copy)]
pub struct ItemNotice<'a> {
    /// Owning session; the admin session for server-local items.
    pub session_id: &'a SessionId,
    /// Owning subscription; 0 for server-local items.
    pub subscription_id: SubscriptionId,
    /// Context of the owning subscription.
    pub subscription_context: Option<&'a ItemContext>,
    /// The item.
    pub monitored_item_id: MonitoredItemId,
    /// Context of the item.
    pub monitored_item_context: Option<&'a ItemContext>,
}

/// Receives data-change notifications of a server-local item.
pub type DataChangeCallback = Arc<dyn Fn(&ItemNotice<'_>, &DataValue) + Send + Sync>;

/// Receives the event fields of a server-local event item.
pub type EventCallback = Arc<dyn Fn(&ItemNotice<'_>, &[Variant]) + Send + Sync>;

/// Invoked exactly once when an item is removed, for whatever reason.
pub type ItemDeleteCallback = Arc<dyn Fn(&ItemNotice<'_>) + Send + Sync>;

/// Notification callback of a server-local item; the variant fixes its kind.
#[derive(Clone)]
pub enum ItemCallback {
    /// Data-change item.
    DataChange(DataChangeCallback),
    /// Event item.
    Event(EventCallback),
}

impl ItemCallback {
    /// Kind of item this callback serves.
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::DataChange(_) => ItemKind::DataChange,
            Self::Event(_) => ItemKind::Event,
        }
    }
}

impl fmt::Debug for ItemCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataChange(_) => f.write_str("ItemCallback::DataChange"),
            Self::Event(_) => f.write_str("ItemCallback::Event"),
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

/// What a monitored item watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Attribute value changes.
    DataChange,
    /// Events emitted by a source node.
    Event,
}

/// Monitoring mode of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringMode {
    /// No sampling.
    Disabled,
    /// Sampled and queued, not reported.
    Sampling,
    /// Sampled, queued and reported.
    #[default]
    Reporting,
}

/// Parameters of a monitored item.
#[derive(Debug, Clone)]
pub struct MonitoredItemRequest {
    /// Watched node (the event source for event items).
    pub node_id: NodeId,
    /// Watched attribute.
    pub attribute_id: AttributeId,
    /// Data change or event.
    pub kind: ItemKind,
    /// Initial monitoring mode.
    pub mode: MonitoringMode,
    /// Handle echoed in notifications.
    pub client_handle: u32,
    /// Requested sampling interval in milliseconds. Negative means the
    /// publishing interval of the subscription.
    pub sampling_interval: f64,
    /// Requested queue size.
    pub queue_size: u32,
    /// Overflow drops the oldest entry instead of the new one.
    pub discard_oldest: bool,
    /// Data-change filter.
    pub filter: Arc<dyn DataChangeFilter>,
}

impl MonitoredItemRequest {
    /// Watches the value of `node_id`.
    pub fn data_change(node_id: NodeId) -> Self {
        Self {
            node_id,
            attribute_id: AttributeId::Value,
            kind: ItemKind::DataChange,
            mode: MonitoringMode::Reporting,
            client_handle: 0,
            sampling_interval: DEFAULT_SAMPLING_INTERVAL_MS,
            queue_size: 1,
            discard_oldest: true,
            filter: Arc::new(StandardFilter::default()),
        }
    }

    /// Watches events emitted by `source`.
    pub fn event(source: NodeId) -> Self {
        Self {
            attribute_id: AttributeId::EventNotifier,
            kind: ItemKind::Event,
            ..Self::data_change(source)
        }
    }

    /// Sets the watched attribute.
    pub fn with_attribute(mut self, attribute_id: AttributeId) -> Self {
        self.attribute_id = attribute_id;
        self
    }

    /// Sets the monitoring mode.
    pub fn with_mode(mut self, mode: MonitoringMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the client handle.
    pub fn with_client_handle(mut self, client_handle: u32) -> Self {
        self.client_handle = client_handle;
        self
    }

    /// Sets the sampling interval in milliseconds.
    pub fn with_sampling_interval(mut self, millis: f64) -> Self {
        self.sampling_interval = millis;
        self
    }

    /// Sets queue size and overflow policy.
    pub fn with_queue(mut self, queue_size: u32, discard_oldest: bool) -> Self {
        self.queue_size = queue_size;
        self.discard_oldest = discard_oldest;
        self
    }

    /// Sets the data-change filter.
    pub fn with_filter(mut self, filter: impl DataChangeFilter + 'static) -> Self {
        self.filter = Arc::new(filter);
        self
    }
}

/// Application hooks of a monitored item.
#[derive(Clone, Default)]
pub struct ItemHooks {
    /// Context handed back in callbacks.
    pub context: Option<ItemContext>,
    /// Deletion callback.
    pub on_delete: Option<ItemDeleteCallback>,
}

impl fmt::Debug for ItemHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemHooks")
            .field("context", &self.context.is_some())
            .field("on_delete", &self.on_delete.is_some())
            .finish()
    }
}

/// Changes to an existing item. `None` keeps the current setting.
#[derive(Debug, Clone, Default)]
pub struct ModifyItemRequest {
    /// New sampling interval in milliseconds.
    pub sampling_interval: Option<f64>,
    /// New queue size.
    pub queue_size: Option<u32>,
    /// New overflow policy.
    pub discard_oldest: Option<bool>,
    /// New filter.
    pub filter: Option<Arc<dyn DataChangeFilter>>,
}

// =============================================================================
// MonitoredItem
// =============================================================================

/// A monitored item with its revised parameters.
pub struct MonitoredItem {
    pub(crate) id: MonitoredItemId,
    pub(crate) node_id: NodeId,
    pub(crate) attribute_id: AttributeId,
    pub(crate) kind: ItemKind,
    pub(crate) mode: MonitoringMode,
    pub(crate) client_handle: u32,
    pub(crate) sampling_interval: Duration,
    pub(crate) queue_size: u32,
    pub(crate) discard_oldest: bool,
    pub(crate) filter: Arc<dyn DataChangeFilter>,
    pub(crate) hooks: ItemHooks,
    /// Set for server-local items only.
    pub(crate) callback: Option<ItemCallback>,
    pub(crate) last_value: Option<DataValue>,
    pub(crate) queued: usize,
    pub(crate) discarded: u64,
    pub(crate) timer_id: Option<CallbackId>,
}

impl MonitoredItem {
    pub(crate) fn new(
        id: MonitoredItemId,
        request: MonitoredItemRequest,
        sampling_interval: Duration,
        queue_size: u32,
        hooks: ItemHooks,
        callback: Option<ItemCallback>,
    ) -> Self {
        Self {
            id,
            node_id: request.node_id,
            attribute_id: request.attribute_id,
            kind: callback.as_ref().map_or(request.kind, ItemCallback::kind),
            mode: request.mode,
            client_handle: request.client_handle,
            sampling_interval,
            queue_size,
            discard_oldest: request.discard_oldest,
            filter: request.filter,
            hooks,
            callback,
            last_value: None,
            queued: 0,
            discarded: 0,
            timer_id: None,
        }
    }

    /// Returns `true` if the item is sampled on its own timer.
    pub(crate) fn samples(&self) -> bool {
        self.kind == ItemKind::DataChange && self.mode != MonitoringMode::Disabled
    }

    /// Filters a new sample. Returns it when it must be queued or reported.
    pub(crate) fn accept(&mut self, value: DataValue) -> Option<DataValue> {
        if self.mode == MonitoringMode::Disabled {
            return None;
        }
        if !self.filter.is_change(self.last_value.as_ref(), &value) {
            return None;
        }
        self.last_value = Some(value.clone());
        Some(value)
    }

    /// Invokes the deletion callback.
    pub(crate) fn notify_deleted(
        &self,
        session_id: &SessionId,
        subscription_id: SubscriptionId,
        subscription_context: Option<&ItemContext>,
    ) {
        if let Some(on_delete) = &self.hooks.on_delete {
            on_delete(&ItemNotice {
                session_id,
                subscription_id,
                subscription_context,
                monitored_item_id: self.id,
                monitored_item_context: self.hooks.context.as_ref(),
            });
        }
    }

    /// Snapshot of the item's state.
    pub fn info(&self) -> MonitoredItemInfo {
        MonitoredItemInfo {
            id: self.id,
            node_id: self.node_id.clone(),
            kind: self.kind,
            mode: self.mode,
            sampling_interval: self.sampling_interval,
            queue_size: self.queue_size,
            discard_oldest: self.discard_oldest,
            queued: self.queued,
            discarded: self.discarded,
            last_value: self.last_value.clone(),
        }
    }
}

impl fmt::Debug for MonitoredItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredItem")
            .field("id", &self.id)
            .field("node_id", &self.node_id)
            .field("kind", &self.kind)
            .field("mode", &self.mode)
            .field("queued", &self.queued)
            .field("discarded", &self.discarded)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a monitored item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoredItemInfo {
    /// Item id.
    pub id: MonitoredItemId,
    /// Watched node.
    pub node_id: NodeId,
    /// Kind.
    pub kind: ItemKind,
    /// Monitoring mode.
    pub mode: MonitoringMode,
    /// Revised sampling interval.
    pub sampling_interval: Duration,
    /// Revised queue size.
    pub queue_size: u32,
    /// Overflow policy.
    pub discard_oldest: bool,
    /// Notifications waiting in the subscription queue.
    pub queued: usize,
    /// Notifications dropped by overflow.
    pub discarded: u64,
    /// Last accepted sample.
    pub last_value: Option<DataValue>,
}

// =============================================================================
// Attribute access
// =============================================================================

/// Reads one attribute of a node for sampling.
///
/// Failures are reported in the status of the returned value so they reach
/// the client like any other sample.
pub fn read_attribute(
    store: &dyn Nodestore,
    node_id: &NodeId,
    attribute: AttributeId,
) -> DataValue {
    let Some(node) = NodeGuard::checkout(store, node_id) else {
        return DataValue::bad(StatusCode::BadNodeIdUnknown);
    };
    let variable = node.variable();
    let value = match attribute {
        AttributeId::Value => return variable.map_or_else(attribute_invalid, |v| v.value.clone()),
        AttributeId::NodeId => Variant::from(node.node_id.clone()),
        AttributeId::NodeClass => Variant::Int32(node.node_class().value() as i32),
        AttributeId::BrowseName => Variant::String(node.browse_name.name.clone()),
        AttributeId::DisplayName => Variant::String(node.display_name.clone()),
        AttributeId::EventNotifier => match node.attributes {
            NodeAttributes::Object { event_notifier } | NodeAttributes::View { event_notifier } => {
                Variant::Byte(event_notifier)
            }
            _ => return attribute_invalid(),
        },
        AttributeId::DataType => match variable {
            Some(v) => Variant::from(v.data_type.clone()),
            None => return attribute_invalid(),
        },
        AttributeId::ValueRank => match variable {
            Some(v) => Variant::Int32(v.value_rank),
            None => return attribute_invalid(),
        },
        AttributeId::ArrayDimensions => {
            let Some(v) = variable else {
                return attribute_invalid();
            };
            let dims = v.array_dimensions.iter().copied().map(Variant::UInt32).collect();
            match Variant::array(BuiltinType::UInt32, dims) {
                Ok(array) => array,
                Err(e) => return DataValue::bad(e.status_code()),
            }
        }
    };
    DataValue::new(value)
}

fn attribute_invalid() -> DataValue {
    DataValue::bad(StatusCode::BadAttributeIdInvalid)
}

/// Converts a requested interval in milliseconds into a duration inside
/// `[min, max]`. NaN maps to `min`.
pub(crate) fn millis_to_duration(millis: f64, min: Duration, max: Duration) -> Duration {
    if millis.is_nan() {
        return min;
    }
    let secs = (millis / 1000.0).clamp(min.as_secs_f64(), max.as_secs_f64());
    Duration::try_from_secs_f64(secs).unwrap_or(min).clamp(min, max)
}
