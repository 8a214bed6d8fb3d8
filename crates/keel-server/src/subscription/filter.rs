// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Data-change filters.
//!
//! A filter decides whether a freshly sampled value differs enough from the
//! last reported one to produce a notification. [`StandardFilter`] covers the
//! trigger and absolute deadband of the data-change filter; other policies
//! implement [`DataChangeFilter`].

use std::fmt;

use keel_core::{DataValue, Variant};
use serde::{Deserialize, Serialize};

/// Decides whether a sample is reportable.
pub trait DataChangeFilter: Send + Sync + fmt::Debug {
    /// Returns `true` if `current` must be reported given the last reported
    /// value. `previous` is `None` for the first sample.
    fn is_change(&self, previous: Option<&DataValue>, current: &DataValue) -> bool;
}

/// Which parts of a data value count as a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataChangeTrigger {
    /// Status only.
    Status,
    /// Status or value.
    #[default]
    StatusValue,
    /// Status, value or source timestamp.
    StatusValueTimestamp,
}

/// Deadband applied to numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deadband {
    /// Every value change is reported.
    #[default]
    None,
    /// A change is reported when it exceeds the given absolute amount.
    Absolute(f64),
}

/// Trigger plus deadband.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StandardFilter {
    /// Trigger.
    pub trigger: DataChangeTrigger,
    /// Deadband.
    pub deadband: Deadband,
}

impl StandardFilter {
    /// Filter with an absolute deadband and the default trigger.
    pub fn absolute(deadband: f64) -> Self {
        Self {
            trigger: DataChangeTrigger::StatusValue,
            deadband: Deadband::Absolute(deadband),
        }
    }

    fn value_changed(&self, previous: &Variant, current: &Variant) -> bool {
        match self.deadband {
            Deadband::None => previous != current,
            Deadband::Absolute(limit) => outside_deadband(previous, current, limit),
        }
    }
}

/// Absolute deadband over scalars and element-wise over arrays of equal
/// length. Non-numeric values fall back to plain inequality.
fn outside_deadband(previous: &Variant, current: &Variant, limit: f64) -> bool {
    match (previous, current) {
        (Variant::Array(a), Variant::Array(b)) => {
            a.values.len() != b.values.len()
                || a.values
                    .iter()
                    .zip(&b.values)
                    .any(|(x, y)| outside_deadband(x, y, limit))
        }
        _ => match (previous.as_f64(), current.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() > limit,
            _ => previous != current,
        },
    }
}

impl DataChangeFilter for StandardFilter {
    fn is_change(&self, previous: Option<&DataValue>, current: &DataValue) -> bool {
        let Some(previous) = previous else {
            return true;
        };
        if previous.status != current.status {
            return true;
        }
        match self.trigger {
            DataChangeTrigger::Status => false,
            DataChangeTrigger::StatusValue => self.value_changed(&previous.value, &current.value),
            DataChangeTrigger::StatusValueTimestamp => {
                previous.source_timestamp != current.source_timestamp
                    || self.value_changed(&previous.value, &current.value)
            }
        }
    }
}
