//! Tagged attribute values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute data type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Bool,
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    String,
    Array,
}

impl AttributeType {
    /// Whether values of this type are integral.
    pub fn is_integer(&self) -> bool {
        !matches!(
            self,
            AttributeType::Bool | AttributeType::String | AttributeType::Array
        )
    }
}

/// A typed attribute value.
///
/// Every access goes through the variant tag; there is no untyped view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    I8(i8),
    I16(i16),
    I32(i32),
    String(String),
    Array(Vec<u8>),
}

impl AttributeValue {
    /// The type tag of this value.
    pub fn attr_type(&self) -> AttributeType {
        match self {
            Self::Bool(_) => AttributeType::Bool,
            Self::U8(_) => AttributeType::U8,
            Self::U16(_) => AttributeType::U16,
            Self::U32(_) => AttributeType::U32,
            Self::I8(_) => AttributeType::I8,
            Self::I16(_) => AttributeType::I16,
            Self::I32(_) => AttributeType::I32,
            Self::String(_) => AttributeType::String,
            Self::Array(_) => AttributeType::Array,
        }
    }

    /// The zero value for a type, used when an attribute is declared before
    /// its first report.
    pub fn default_for(ty: AttributeType) -> Self {
        match ty {
            AttributeType::Bool => Self::Bool(false),
            AttributeType::U8 => Self::U8(0),
            AttributeType::U16 => Self::U16(0),
            AttributeType::U32 => Self::U32(0),
            AttributeType::I8 => Self::I8(0),
            AttributeType::I16 => Self::I16(0),
            AttributeType::I32 => Self::I32(0),
            AttributeType::String => Self::String(String::new()),
            AttributeType::Array => Self::Array(Vec::new()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Widen any integral variant to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::U8(v) => Some(i64::from(*v)),
            Self::U16(v) => Some(i64::from(*v)),
            Self::U32(v) => Some(i64::from(*v)),
            Self::I8(v) => Some(i64::from(*v)),
            Self::I16(v) => Some(i64::from(*v)),
            Self::I32(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Array(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Array(b) => write!(f, "[{} bytes]", b.len()),
        }
    }
}
