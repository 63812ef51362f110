//! Literal values and type inference

use crate::error::{Error, Result};
use crate::types::{DataType, Field, IntervalUnit, TypeKind};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Unscaled digits plus scale: `Decimal { digits: 12345, scale: 2 }` is 123.45
    Decimal { digits: i128, scale: u8 },
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp {
        value: NaiveDateTime,
        timezone: Option<String>,
    },
    Interval { count: i64, unit: IntervalUnit },
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Struct(Vec<(String, Value)>),
    Json(String),
}

impl Value {
    /// Infer the narrowest type holding this value.
    ///
    /// Integers follow the 8→16→32→64 ladder by range containment; floats
    /// are always `Float64`.
    pub fn infer(&self) -> Result<DataType> {
        let dtype = match self {
            Value::Null => DataType::null(),
            Value::Bool(_) => DataType::boolean(),
            Value::Int(v) => DataType::int(signed_width(*v)),
            Value::UInt(v) => DataType::uint(unsigned_width(*v)),
            Value::Float(_) => DataType::float64(),
            Value::Decimal { digits, scale } => {
                let count = digits.unsigned_abs().to_string().len() as u8;
                DataType::decimal(count.max(*scale).max(1), *scale)?
            }
            Value::String(_) => DataType::string(),
            Value::Bytes(_) => DataType::binary(),
            Value::Date(_) => DataType::date(),
            Value::Time(_) => DataType::time(),
            Value::Timestamp { timezone, .. } => DataType::timestamp_with(timezone.as_deref(), None),
            Value::Interval { unit, .. } => DataType::interval(*unit),
            Value::Array(items) => DataType::array(unify(items.iter())?),
            Value::Map(entries) => DataType::map(
                unify(entries.iter().map(|(k, _)| k))?,
                unify(entries.iter().map(|(_, v)| v))?,
            ),
            Value::Struct(fields) => DataType::structure(
                fields
                    .iter()
                    .map(|(name, v)| Ok(Field::new(name.clone(), v.infer()?)))
                    .collect::<Result<Vec<_>>>()?,
            )?,
            Value::Json(_) => DataType::json(),
        };
        Ok(dtype)
    }

    /// Whether this value can be stored in a slot of type `dtype` as is.
    pub fn conforms_to(&self, dtype: &DataType) -> bool {
        match (self, &dtype.kind) {
            (Value::Null, _) => dtype.nullable,
            (Value::Int(v), TypeKind::Int { width, signed: true }) => signed_width(*v) <= *width,
            (Value::Int(v), TypeKind::Int { width, signed: false }) => {
                *v >= 0 && unsigned_width(*v as u64) <= *width
            }
            (Value::UInt(v), TypeKind::Int { width, signed: false }) => unsigned_width(*v) <= *width,
            (Value::UInt(v), TypeKind::Int { width, signed: true }) => {
                i64::try_from(*v).map(|v| signed_width(v) <= *width).unwrap_or(false)
            }
            (Value::Int(_) | Value::UInt(_) | Value::Float(_), TypeKind::Float { .. }) => true,
            (Value::Int(v), TypeKind::Decimal { precision, scale }) => {
                integer_digits(u128::from(v.unsigned_abs()), 0) <= room(*precision, *scale)
            }
            (Value::UInt(v), TypeKind::Decimal { precision, scale }) => {
                integer_digits(u128::from(*v), 0) <= room(*precision, *scale)
            }
            (
                Value::Decimal { digits, scale },
                TypeKind::Decimal {
                    precision,
                    scale: s,
                },
            ) => scale <= s && integer_digits(digits.unsigned_abs(), *scale) <= room(*precision, *s),
            (Value::Date(_), TypeKind::Timestamp { .. }) => true,
            (Value::Timestamp { timezone, .. }, TypeKind::Timestamp { timezone: tz, .. }) => {
                timezone == tz
            }
            (Value::String(_), TypeKind::Json) | (Value::Json(_), TypeKind::Json) => true,
            (Value::Array(items), TypeKind::Array(element)) => {
                items.iter().all(|v| v.conforms_to(element))
            }
            (Value::Map(entries), TypeKind::Map { key, value }) => entries
                .iter()
                .all(|(k, v)| k.conforms_to(key) && v.conforms_to(value)),
            (Value::Struct(values), TypeKind::Struct(fields)) => {
                values.len() == fields.len()
                    && values
                        .iter()
                        .zip(fields)
                        .all(|((n, v), f)| *n == f.name && v.conforms_to(&f.data_type))
            }
            _ => self.infer().map(|t| t.same_kind(dtype)).unwrap_or(false),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

fn signed_width(v: i64) -> u8 {
    if i8::try_from(v).is_ok() {
        8
    } else if i16::try_from(v).is_ok() {
        16
    } else if i32::try_from(v).is_ok() {
        32
    } else {
        64
    }
}

fn unsigned_width(v: u64) -> u8 {
    if u8::try_from(v).is_ok() {
        8
    } else if u16::try_from(v).is_ok() {
        16
    } else if u32::try_from(v).is_ok() {
        32
    } else {
        64
    }
}

/// Digits left of the decimal point in `magnitude` scaled down by `10^scale`.
fn integer_digits(magnitude: u128, scale: u8) -> u32 {
    let whole = 10u128
        .checked_pow(u32::from(scale))
        .map_or(0, |divisor| magnitude / divisor);
    whole.checked_ilog10().map_or(0, |log| log + 1)
}

/// Integer digits a `decimal(precision, scale)` slot holds.
fn room(precision: u8, scale: u8) -> u32 {
    u32::from(precision.saturating_sub(scale))
}

/// Highest-precedence type across a collection; empty collections are `Null`.
fn unify<'a>(values: impl Iterator<Item = &'a Value>) -> Result<DataType> {
    let mut acc: Option<DataType> = None;
    for v in values {
        let t = v.infer()?;
        acc = Some(match acc {
            None => t,
            Some(prev) => prev.common_supertype(&t).map_err(|_| {
                Error::Type(format!("cannot infer a single type from mixed {prev} and {t} elements"))
            })?,
        });
    }
    Ok(acc.unwrap_or_else(DataType::null))
}

// Floats compare by bit pattern so literal nodes can be hash-consed.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (
                Value::Decimal { digits: d1, scale: s1 },
                Value::Decimal { digits: d2, scale: s2 },
            ) => d1 == d2 && s1 == s2,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (
                Value::Timestamp { value: v1, timezone: t1 },
                Value::Timestamp { value: v2, timezone: t2 },
            ) => v1 == v2 && t1 == t2,
            (
                Value::Interval { count: c1, unit: u1 },
                Value::Interval { count: c2, unit: u2 },
            ) => c1 == c2 && u1 == u2,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::UInt(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Decimal { digits, scale } => {
                digits.hash(state);
                scale.hash(state);
            }
            Value::String(v) | Value::Json(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::Time(v) => v.hash(state),
            Value::Timestamp { value, timezone } => {
                value.hash(state);
                timezone.hash(state);
            }
            Value::Interval { count, unit } => {
                count.hash(state);
                unit.hash(state);
            }
            Value::Array(v) => v.hash(state),
            Value::Map(v) => v.hash(state),
            Value::Struct(v) => v.hash(state),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
