// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Value-level OPC UA types shared by every crate in the workspace.
//!
//! - **NodeId**: namespace-qualified node identifiers with string parsing
//! - **BuiltinType / Variant / DataValue**: typed attribute values
//! - **NodeClass / AttributeId**: node classification
//! - **SecurityPolicy / SecurityMode**: endpoint security settings
//! - **ids / value_rank**: well-known standard-namespace constants
//!
//! # Examples
//!
//! ```
//! use keel_core::types::{NodeId, Variant};
//!
//! let node_id: NodeId = "ns=2;s=Boiler.Temperature".parse().unwrap();
//! assert_eq!(node_id.namespace_index, 2);
//!
//! let value = Variant::Double(21.5);
//! assert_eq!(value.data_type(), Some(NodeId::numeric(0, 11)));
//! ```

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StatusCode, UaError};

// =============================================================================
// NodeId
// =============================================================================

/// OPC UA node identifier.
///
/// A namespace index plus a numeric, string, GUID or opaque identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = standard namespace).
    pub namespace_index: u16,

    /// The identifier within the namespace.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    /// Creates a numeric node id.
    #[inline]
    pub const fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node id.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Creates a GUID node id.
    #[inline]
    pub const fn guid(namespace_index: u16, value: Uuid) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Guid(value),
        }
    }

    /// Creates an opaque node id.
    #[inline]
    pub fn opaque(namespace_index: u16, value: impl Into<Vec<u8>>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Opaque(value.into()),
        }
    }

    /// The null node id (`ns=0;i=0`).
    #[inline]
    pub const fn null() -> Self {
        Self::numeric(0, 0)
    }

    /// Returns `true` for the null node id.
    ///
    /// A null id handed to [`Nodestore::insert_node`](crate::nodestore::Nodestore::insert_node)
    /// asks the store to assign a fresh numeric id.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.namespace_index == 0 && matches!(self.identifier, NodeIdentifier::Numeric(0))
    }

    /// Returns the numeric identifier if this is a numeric node id.
    #[inline]
    pub fn as_numeric(&self) -> Option<u32> {
        match self.identifier {
            NodeIdentifier::Numeric(v) => Some(v),
            _ => None,
        }
    }

    /// Returns `true` if this is `ns=0;i=<value>`.
    #[inline]
    pub fn is_ns0(&self, value: u32) -> bool {
        self.namespace_index == 0 && self.as_numeric() == Some(value)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_index == 0 {
            write!(f, "{}", self.identifier)
        } else {
            write!(f, "ns={};{}", self.namespace_index, self.identifier)
        }
    }
}

impl FromStr for NodeId {
    type Err = UaError;

    /// Parses `ns=<n>;i=<u32>`, `s=`, `g=` or `b=` (base64) forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, ident) = rest.split_once(';').ok_or_else(|| {
                    UaError::node_id_invalid(s, "missing identifier after namespace")
                })?;
                let ns: u16 = ns
                    .parse()
                    .map_err(|_| UaError::node_id_invalid(s, "invalid namespace index"))?;
                (ns, ident)
            }
            None => (0, s),
        };

        let identifier = if let Some(id) = identifier_part.strip_prefix("i=") {
            NodeIdentifier::Numeric(
                id.parse()
                    .map_err(|_| UaError::node_id_invalid(s, "invalid numeric identifier"))?,
            )
        } else if let Some(id) = identifier_part.strip_prefix("s=") {
            NodeIdentifier::String(id.to_string())
        } else if let Some(id) = identifier_part.strip_prefix("g=") {
            NodeIdentifier::Guid(
                Uuid::parse_str(id)
                    .map_err(|e| UaError::node_id_invalid(s, format!("invalid GUID: {e}")))?,
            )
        } else if let Some(id) = identifier_part.strip_prefix("b=") {
            NodeIdentifier::Opaque(
                BASE64
                    .decode(id)
                    .map_err(|e| UaError::node_id_invalid(s, format!("invalid base64: {e}")))?,
            )
        } else {
            return Err(UaError::node_id_invalid(
                s,
                "unknown identifier type, expected i=, s=, g= or b=",
            ));
        };

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

/// The identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),
    /// String identifier.
    String(String),
    /// GUID identifier.
    Guid(Uuid),
    /// Opaque byte-string identifier.
    Opaque(Vec<u8>),
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={}", v),
            Self::String(v) => write!(f, "s={}", v),
            Self::Guid(v) => write!(f, "g={}", v),
            Self::Opaque(v) => write!(f, "b={}", BASE64.encode(v)),
        }
    }
}

// =============================================================================
// Well-known identifiers
// =============================================================================

/// Numeric identifiers of standard-namespace nodes the core depends on.
pub mod ids {
    /// `References`, root of the reference-type tree.
    pub const REFERENCES: u32 = 31;
    /// `NonHierarchicalReferences`.
    pub const NON_HIERARCHICAL_REFERENCES: u32 = 32;
    /// `HierarchicalReferences`.
    pub const HIERARCHICAL_REFERENCES: u32 = 33;
    /// `HasChild`.
    pub const HAS_CHILD: u32 = 34;
    /// `Organizes`.
    pub const ORGANIZES: u32 = 35;
    /// `HasTypeDefinition`.
    pub const HAS_TYPE_DEFINITION: u32 = 40;
    /// `Aggregates`.
    pub const AGGREGATES: u32 = 44;
    /// `HasSubtype`.
    pub const HAS_SUBTYPE: u32 = 45;
    /// `HasProperty`.
    pub const HAS_PROPERTY: u32 = 46;
    /// `HasComponent`.
    pub const HAS_COMPONENT: u32 = 47;

    /// `BaseDataType`, root of the data-type tree.
    pub const BASE_DATA_TYPE: u32 = 24;
    /// `Number`.
    pub const NUMBER: u32 = 26;
    /// `Integer`.
    pub const INTEGER: u32 = 27;
    /// `UInteger`.
    pub const UINTEGER: u32 = 28;
    /// `Enumeration`.
    pub const ENUMERATION: u32 = 29;
    /// `Structure`.
    pub const STRUCTURE: u32 = 22;

    /// `BaseObjectType`.
    pub const BASE_OBJECT_TYPE: u32 = 58;
    /// `FolderType`.
    pub const FOLDER_TYPE: u32 = 61;
    /// `BaseVariableType`.
    pub const BASE_VARIABLE_TYPE: u32 = 62;
    /// `BaseDataVariableType`.
    pub const BASE_DATA_VARIABLE_TYPE: u32 = 63;
    /// `PropertyType`.
    pub const PROPERTY_TYPE: u32 = 68;

    /// `Objects` folder.
    pub const OBJECTS_FOLDER: u32 = 85;
    /// `Server` object.
    pub const SERVER: u32 = 2253;
    /// `Server.NamespaceArray`.
    pub const SERVER_NAMESPACE_ARRAY: u32 = 2255;
    /// `Server.ServerStatus`.
    pub const SERVER_SERVER_STATUS: u32 = 2256;
    /// `Server.ServerStatus.StartTime`.
    pub const SERVER_SERVER_STATUS_START_TIME: u32 = 2257;
    /// `Server.ServerStatus.CurrentTime`.
    pub const SERVER_SERVER_STATUS_CURRENT_TIME: u32 = 2258;
}

/// Value-rank constants.
pub mod value_rank {
    /// Scalar or one-dimensional array.
    pub const SCALAR_OR_ONE_DIMENSION: i32 = -3;
    /// Any rank.
    pub const ANY: i32 = -2;
    /// Scalar only.
    pub const SCALAR: i32 = -1;
    /// Array with one or more dimensions.
    pub const ONE_OR_MORE_DIMENSIONS: i32 = 0;
    /// One-dimensional array.
    pub const ONE_DIMENSION: i32 = 1;
}

// =============================================================================
// BuiltinType
// =============================================================================

/// OPC UA built-in data types carried by [`Variant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinType {
    /// Boolean value.
    Boolean,
    /// Signed 8-bit integer.
    SByte,
    /// Unsigned 8-bit integer.
    Byte,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Signed 32-bit integer.
    Int32,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 64-bit integer.
    UInt64,
    /// 32-bit IEEE 754 float.
    Float,
    /// 64-bit IEEE 754 double.
    Double,
    /// UTF-8 string.
    String,
    /// Date and time.
    DateTime,
    /// GUID.
    Guid,
    /// Raw byte string.
    ByteString,
    /// Node id.
    NodeId,
    /// Status code.
    StatusCode,
}

impl BuiltinType {
    /// Returns the data-type node id number in namespace 0.
    pub const fn type_id(&self) -> u32 {
        match self {
            Self::Boolean => 1,
            Self::SByte => 2,
            Self::Byte => 3,
            Self::Int16 => 4,
            Self::UInt16 => 5,
            Self::Int32 => 6,
            Self::UInt32 => 7,
            Self::Int64 => 8,
            Self::UInt64 => 9,
            Self::Float => 10,
            Self::Double => 11,
            Self::String => 12,
            Self::DateTime => 13,
            Self::Guid => 14,
            Self::ByteString => 15,
            Self::NodeId => 17,
            Self::StatusCode => 19,
        }
    }

    /// Returns the data-type node id.
    pub const fn node_id(&self) -> NodeId {
        NodeId::numeric(0, self.type_id())
    }

    /// Returns the type name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Boolean => "Boolean",
            Self::SByte => "SByte",
            Self::Byte => "Byte",
            Self::Int16 => "Int16",
            Self::UInt16 => "UInt16",
            Self::Int32 => "Int32",
            Self::UInt32 => "UInt32",
            Self::Int64 => "Int64",
            Self::UInt64 => "UInt64",
            Self::Float => "Float",
            Self::Double => "Double",
            Self::String => "String",
            Self::DateTime => "DateTime",
            Self::Guid => "Guid",
            Self::ByteString => "ByteString",
            Self::NodeId => "NodeId",
            Self::StatusCode => "StatusCode",
        }
    }

    /// All built-in types, in type-id order.
    pub const ALL: [BuiltinType; 17] = [
        Self::Boolean,
        Self::SByte,
        Self::Byte,
        Self::Int16,
        Self::UInt16,
        Self::Int32,
        Self::UInt32,
        Self::Int64,
        Self::UInt64,
        Self::Float,
        Self::Double,
        Self::String,
        Self::DateTime,
        Self::Guid,
        Self::ByteString,
        Self::NodeId,
        Self::StatusCode,
    ];

    /// Returns `true` for the numeric types.
    #[inline]
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::SByte
                | Self::Byte
                | Self::Int16
                | Self::UInt16
                | Self::Int32
                | Self::UInt32
                | Self::Int64
                | Self::UInt64
                | Self::Float
                | Self::Double
        )
    }
}

impl fmt::Display for BuiltinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Variant
// =============================================================================

/// A typed value as stored in a variable's `Value` attribute.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Variant {
    /// No value.
    #[default]
    Empty,
    /// Boolean value.
    Boolean(bool),
    /// Signed 8-bit integer.
    SByte(i8),
    /// Unsigned 8-bit integer.
    Byte(u8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Unsigned 16-bit integer.
    UInt16(u16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Date and time in UTC.
    DateTime(DateTime<Utc>),
    /// GUID.
    Guid(Uuid),
    /// Raw bytes.
    ByteString(Vec<u8>),
    /// Node id.
    NodeId(Box<NodeId>),
    /// Status code.
    StatusCode(StatusCode),
    /// Homogeneous array of scalars.
    Array(Box<VariantArray>),
}

/// The payload of an array [`Variant`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantArray {
    /// Element type shared by every value.
    pub element_type: BuiltinType,
    /// Flattened values.
    pub values: Vec<Variant>,
    /// Dimension lengths; empty means one dimension of `values.len()`.
    pub dimensions: Vec<u32>,
}

impl Variant {
    /// Builds a one-dimensional array, rejecting mixed element types.
    pub fn array(element_type: BuiltinType, values: Vec<Variant>) -> Result<Self, UaError> {
        if let Some(bad) = values
            .iter()
            .find(|v| v.scalar_type() != Some(element_type))
        {
            return Err(UaError::type_mismatch(
                element_type.name(),
                bad.type_name(),
            ));
        }
        Ok(Self::Array(Box::new(VariantArray {
            element_type,
            values,
            dimensions: Vec::new(),
        })))
    }

    /// Builds a multi-dimensional array; the product of `dimensions` must
    /// equal the number of values.
    pub fn matrix(
        element_type: BuiltinType,
        values: Vec<Variant>,
        dimensions: Vec<u32>,
    ) -> Result<Self, UaError> {
        let expected: u64 = dimensions.iter().map(|&d| u64::from(d)).product();
        if expected != values.len() as u64 {
            return Err(UaError::invalid_argument(
                "dimensions",
                format!("{} values do not fill dimensions {:?}", values.len(), dimensions),
            ));
        }
        match Self::array(element_type, values)? {
            Self::Array(mut array) => {
                array.dimensions = dimensions;
                Ok(Self::Array(array))
            }
            _ => Err(UaError::internal("array constructor returned a scalar")),
        }
    }

    /// Returns the built-in type of a scalar value.
    pub fn scalar_type(&self) -> Option<BuiltinType> {
        Some(match self {
            Self::Empty | Self::Array(_) => return None,
            Self::Boolean(_) => BuiltinType::Boolean,
            Self::SByte(_) => BuiltinType::SByte,
            Self::Byte(_) => BuiltinType::Byte,
            Self::Int16(_) => BuiltinType::Int16,
            Self::UInt16(_) => BuiltinType::UInt16,
            Self::Int32(_) => BuiltinType::Int32,
            Self::UInt32(_) => BuiltinType::UInt32,
            Self::Int64(_) => BuiltinType::Int64,
            Self::UInt64(_) => BuiltinType::UInt64,
            Self::Float(_) => BuiltinType::Float,
            Self::Double(_) => BuiltinType::Double,
            Self::String(_) => BuiltinType::String,
            Self::DateTime(_) => BuiltinType::DateTime,
            Self::Guid(_) => BuiltinType::Guid,
            Self::ByteString(_) => BuiltinType::ByteString,
            Self::NodeId(_) => BuiltinType::NodeId,
            Self::StatusCode(_) => BuiltinType::StatusCode,
        })
    }

    /// Returns the built-in type of the value or of the array elements.
    pub fn builtin_type(&self) -> Option<BuiltinType> {
        match self {
            Self::Array(array) => Some(array.element_type),
            other => other.scalar_type(),
        }
    }

    /// Returns the data-type node id of the value, `None` when empty.
    pub fn data_type(&self) -> Option<NodeId> {
        self.builtin_type().map(|t| t.node_id())
    }

    /// Returns a short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Empty => "Empty",
            Self::Array(_) => "Array",
            other => other.scalar_type().map(|t| t.name()).unwrap_or("Empty"),
        }
    }

    /// Returns `true` for the empty variant.
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns `true` for scalar (non-array, non-empty) values.
    #[inline]
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Empty | Self::Array(_))
    }

    /// Returns the array payload, if any.
    pub fn as_array(&self) -> Option<&VariantArray> {
        match self {
            Self::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Returns the array dimensions as reported to clients.
    ///
    /// Scalars report no dimensions; a one-dimensional array without explicit
    /// dimensions reports its length.
    pub fn array_dimensions(&self) -> Vec<u32> {
        match self {
            Self::Array(array) if array.dimensions.is_empty() => {
                vec![u32::try_from(array.values.len()).unwrap_or(u32::MAX)]
            }
            Self::Array(array) => array.dimensions.clone(),
            _ => Vec::new(),
        }
    }

    /// Converts a numeric scalar to `f64` for deadband evaluation.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::SByte(v) => Some(f64::from(*v)),
            Self::Byte(v) => Some(f64::from(*v)),
            Self::Int16(v) => Some(f64::from(*v)),
            Self::UInt16(v) => Some(f64::from(*v)),
            Self::Int32(v) => Some(f64::from(*v)),
            Self::UInt32(v) => Some(f64::from(*v)),
            Self::Int64(v) => Some(*v as f64),
            Self::UInt64(v) => Some(*v as f64),
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<u32> for Variant {
    fn from(v: u32) -> Self {
        Self::UInt32(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for Variant {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}

impl From<NodeId> for Variant {
    fn from(v: NodeId) -> Self {
        Self::NodeId(Box::new(v))
    }
}

// =============================================================================
// DataValue
// =============================================================================

/// A value with its status and timestamps.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataValue {
    /// The value.
    pub value: Variant,
    /// Quality of the value.
    pub status: StatusCode,
    /// When the value was produced by its source.
    pub source_timestamp: Option<DateTime<Utc>>,
    /// When the server observed the value.
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// Creates a good value without timestamps.
    pub fn new(value: impl Into<Variant>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    /// Creates a value-less result carrying a bad status.
    pub fn bad(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Sets the server timestamp.
    pub fn with_server_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.server_timestamp = Some(timestamp);
        self
    }

    /// Sets the source timestamp.
    pub fn with_source_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.source_timestamp = Some(timestamp);
        self
    }
}

// =============================================================================
// NodeClass / AttributeId
// =============================================================================

/// OPC UA node classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    /// Object instance.
    Object,
    /// Variable instance.
    Variable,
    /// Method.
    Method,
    /// Object type.
    ObjectType,
    /// Variable type.
    VariableType,
    /// Reference type.
    ReferenceType,
    /// Data type.
    DataType,
    /// View.
    View,
}

impl NodeClass {
    /// Returns the OPC UA mask value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Object => 1,
            Self::Variable => 2,
            Self::Method => 4,
            Self::ObjectType => 8,
            Self::VariableType => 16,
            Self::ReferenceType => 32,
            Self::DataType => 64,
            Self::View => 128,
        }
    }

    /// Returns `true` for the four type classes.
    #[inline]
    pub const fn is_type(&self) -> bool {
        matches!(
            self,
            Self::ObjectType | Self::VariableType | Self::ReferenceType | Self::DataType
        )
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Object => "Object",
            Self::Variable => "Variable",
            Self::Method => "Method",
            Self::ObjectType => "ObjectType",
            Self::VariableType => "VariableType",
            Self::ReferenceType => "ReferenceType",
            Self::DataType => "DataType",
            Self::View => "View",
        };
        f.write_str(name)
    }
}

/// Node attributes a monitored item can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeId {
    /// `NodeId`.
    NodeId,
    /// `NodeClass`.
    NodeClass,
    /// `BrowseName`.
    BrowseName,
    /// `DisplayName`.
    DisplayName,
    /// `EventNotifier`.
    EventNotifier,
    /// `Value`.
    #[default]
    Value,
    /// `DataType`.
    DataType,
    /// `ValueRank`.
    ValueRank,
    /// `ArrayDimensions`.
    ArrayDimensions,
}

impl AttributeId {
    /// Returns the numeric attribute id.
    pub const fn value(&self) -> u32 {
        match self {
            Self::NodeId => 1,
            Self::NodeClass => 2,
            Self::BrowseName => 3,
            Self::DisplayName => 4,
            Self::EventNotifier => 12,
            Self::Value => 13,
            Self::DataType => 14,
            Self::ValueRank => 15,
            Self::ArrayDimensions => 16,
        }
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// SecurityMode / SecurityPolicy
// =============================================================================

/// Message security mode of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// No security.
    #[default]
    None,
    /// Messages are signed.
    Sign,
    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

impl SecurityMode {
    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Security policy of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    /// No security policy.
    #[default]
    None,
    /// Basic128Rsa15 (deprecated).
    Basic128Rsa15,
    /// Basic256 (deprecated).
    Basic256,
    /// Basic256Sha256.
    Basic256Sha256,
    /// Aes128Sha256RsaOaep.
    Aes128Sha256RsaOaep,
    /// Aes256Sha256RsaPss.
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    /// Returns the policy URI.
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::None => "http://opcfoundation.org/UA/SecurityPolicy#None",
            Self::Basic128Rsa15 => "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15",
            Self::Basic256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256",
            Self::Basic256Sha256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
            Self::Aes128Sha256RsaOaep => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep"
            }
            Self::Aes256Sha256RsaPss => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss"
            }
        }
    }

    /// Returns `true` if endpoints with this policy need a certificate.
    #[inline]
    pub const fn requires_certificate(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Resolves a policy from its URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        [
            Self::None,
            Self::Basic128Rsa15,
            Self::Basic256,
            Self::Basic256Sha256,
            Self::Aes128Sha256RsaOaep,
            Self::Aes256Sha256RsaPss,
        ]
        .into_iter()
        .find(|p| p.uri() == uri)
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uri = self.uri();
        f.write_str(uri.rsplit('#').next().unwrap_or(uri))
    }
}

// =============================================================================
// Tests
// =============================================================================
