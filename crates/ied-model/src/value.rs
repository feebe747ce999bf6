//! ---
//! ied_section: "02-information-model"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Declared attribute types and the JSON <-> MMS value codec."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use strum::{Display, EnumIter, EnumString};

use crate::error::{ModelError, Result};

/// Closed set of attribute types a schema may declare.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    Int32,
    Int64,
    Float,
    Boolean,
    Uint32,
    Timestamp,
}

/// Value as held by the protocol stack.
#[derive(Debug, Clone, PartialEq)]
pub enum MmsValue {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Uint32(u32),
    Float(f32),
    /// Milliseconds since the Unix epoch.
    UtcTime(u64),
    BitString { bits: u32, size: u8 },
    VisibleString(String),
    Structure(Vec<MmsValue>),
    Array(Vec<MmsValue>),
}

impl MmsValue {
    /// Short name of the value kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            MmsValue::Boolean(_) => "boolean",
            MmsValue::Int32(_) => "int32",
            MmsValue::Int64(_) => "int64",
            MmsValue::Uint32(_) => "uint32",
            MmsValue::Float(_) => "float",
            MmsValue::UtcTime(_) => "utc-time",
            MmsValue::BitString { .. } => "bit-string",
            MmsValue::VisibleString(_) => "visible-string",
            MmsValue::Structure(_) => "structure",
            MmsValue::Array(_) => "array",
        }
    }
}

/// Encode a JSON value into the stack representation of `data_type`.
///
/// Timestamps accept epoch milliseconds or an RFC 3339 string.
pub fn encode(data_type: DataType, value: &Value) -> Result<MmsValue> {
    let invalid = || ModelError::InvalidValue {
        data_type,
        value: value.to_string(),
    };
    match data_type {
        DataType::Boolean => value.as_bool().map(MmsValue::Boolean).ok_or_else(invalid),
        DataType::Int32 => value
            .as_i64()
            .and_then(|raw| i32::try_from(raw).ok())
            .map(MmsValue::Int32)
            .ok_or_else(invalid),
        DataType::Int64 => value.as_i64().map(MmsValue::Int64).ok_or_else(invalid),
        DataType::Uint32 => value
            .as_u64()
            .and_then(|raw| u32::try_from(raw).ok())
            .map(MmsValue::Uint32)
            .ok_or_else(invalid),
        DataType::Float => value
            .as_f64()
            .map(|raw| raw as f32)
            .filter(|narrowed| narrowed.is_finite())
            .map(MmsValue::Float)
            .ok_or_else(invalid),
        DataType::Timestamp => encode_timestamp(value)
            .map(MmsValue::UtcTime)
            .ok_or_else(invalid),
    }
}

fn encode_timestamp(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|raw| *raw >= 0.0).map(|raw| raw as u64)),
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .and_then(|parsed| u64::try_from(parsed.timestamp_millis()).ok()),
        _ => None,
    }
}

/// Decode a stack value into JSON.
///
/// With a declared type the value must be of a compatible kind. Structures and
/// arrays decode element by element; bit strings and visible strings have no
/// decoder.
pub fn decode(declared: Option<DataType>, value: &MmsValue) -> Result<Value> {
    match value {
        MmsValue::Structure(items) | MmsValue::Array(items) => items
            .iter()
            .map(|item| decode(None, item))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        leaf => {
            if let Some(data_type) = declared {
                if !accepts(data_type, leaf) {
                    return Err(ModelError::UnsupportedType(format!(
                        "{} value for attribute declared as {}",
                        leaf.kind(),
                        data_type
                    )));
                }
            }
            decode_leaf(leaf)
        }
    }
}

fn accepts(data_type: DataType, value: &MmsValue) -> bool {
    matches!(
        (data_type, value),
        (DataType::Boolean, MmsValue::Boolean(_))
            | (DataType::Int32, MmsValue::Int32(_))
            | (
                DataType::Int64,
                MmsValue::Int64(_) | MmsValue::Int32(_) | MmsValue::Uint32(_)
            )
            | (DataType::Uint32, MmsValue::Uint32(_))
            | (DataType::Float, MmsValue::Float(_))
            | (DataType::Timestamp, MmsValue::UtcTime(_))
    )
}

fn decode_leaf(value: &MmsValue) -> Result<Value> {
    match value {
        MmsValue::Boolean(v) => Ok(Value::Bool(*v)),
        MmsValue::Int32(v) => Ok(Value::from(*v)),
        MmsValue::Int64(v) => Ok(Value::from(*v)),
        MmsValue::Uint32(v) => Ok(Value::from(*v)),
        // Widen through the shortest f32 text so 0.1 reads back as 0.1.
        MmsValue::Float(v) => Ok(v
            .to_string()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        MmsValue::UtcTime(v) => Ok(Value::from(*v)),
        other => Err(ModelError::UnsupportedType(other.kind().to_owned())),
    }
}
