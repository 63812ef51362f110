//! Snowflake
//!
//! Integers are all `NUMBER(38, 0)` underneath, but the declared alias is
//! kept so a column reads back at the width it was written with. Semi
//! structured data lives in `VARIANT`, `ARRAY` and `OBJECT`, whose elements
//! are untyped.

use crate::ast::{Expr, Sql};
use crate::backend::SqlBackend;
use crate::ops::{self, Rule, SqlRegistry};
use deferql_compile::{types::lossy_fallback, Cx};
use deferql_ir::{DataType, Error, Graph, NodeId, OpKind, Result, TimestampUnit, TypeKind, Value};
use std::fmt;

pub const MAX_PRECISION: u8 = 38;
pub const MAX_SCALE: u8 = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnowflakeType {
    Boolean,
    /// `TINYINT`, `SMALLINT`, `INTEGER` or `BIGINT` by width.
    Integer(u8),
    Number(u8, u8),
    Float,
    Varchar,
    Binary,
    Date,
    Time,
    TimestampNtz(Option<u8>),
    TimestampTz(Option<u8>),
    Variant,
    Array,
    Object,
}

fn with_scale(f: &mut fmt::Formatter<'_>, name: &str, scale: Option<u8>) -> fmt::Result {
    match scale {
        Some(scale) => write!(f, "{name}({scale})"),
        None => write!(f, "{name}"),
    }
}

impl fmt::Display for SnowflakeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnowflakeType::Boolean => write!(f, "BOOLEAN"),
            SnowflakeType::Integer(8) => write!(f, "TINYINT"),
            SnowflakeType::Integer(16) => write!(f, "SMALLINT"),
            SnowflakeType::Integer(32) => write!(f, "INTEGER"),
            SnowflakeType::Integer(_) => write!(f, "BIGINT"),
            SnowflakeType::Number(p, s) => write!(f, "NUMBER({p}, {s})"),
            SnowflakeType::Float => write!(f, "FLOAT"),
            SnowflakeType::Varchar => write!(f, "VARCHAR"),
            SnowflakeType::Binary => write!(f, "BINARY"),
            SnowflakeType::Date => write!(f, "DATE"),
            SnowflakeType::Time => write!(f, "TIME"),
            SnowflakeType::TimestampNtz(scale) => with_scale(f, "TIMESTAMP_NTZ", *scale),
            SnowflakeType::TimestampTz(scale) => with_scale(f, "TIMESTAMP_TZ", *scale),
            SnowflakeType::Variant => write!(f, "VARIANT"),
            SnowflakeType::Array => write!(f, "ARRAY"),
            SnowflakeType::Object => write!(f, "OBJECT"),
        }
    }
}

fn is_variant(dtype: &DataType) -> bool {
    dtype.nullable && matches!(dtype.kind, TypeKind::Json)
}

pub fn to_native(dtype: &DataType) -> Result<SnowflakeType> {
    let unrepresentable = || Error::unrepresentable(dtype, "snowflake");
    Ok(match &dtype.kind {
        TypeKind::Boolean => SnowflakeType::Boolean,
        TypeKind::Int {
            width: width @ (8 | 16 | 32 | 64),
            signed: true,
        } => SnowflakeType::Integer(*width),
        TypeKind::Float { width: 64 } => SnowflakeType::Float,
        TypeKind::Decimal { precision, scale } if *precision <= MAX_PRECISION => {
            SnowflakeType::Number(*precision, *scale)
        }
        TypeKind::String => SnowflakeType::Varchar,
        TypeKind::Binary => SnowflakeType::Binary,
        TypeKind::Date => SnowflakeType::Date,
        TypeKind::Time => SnowflakeType::Time,
        TypeKind::Timestamp { timezone, scale } => {
            if scale.is_some_and(|s| s > MAX_SCALE) {
                return Err(unrepresentable());
            }
            match timezone.as_deref() {
                None => SnowflakeType::TimestampNtz(*scale),
                Some("UTC") => SnowflakeType::TimestampTz(*scale),
                Some(_) => return Err(unrepresentable()),
            }
        }
        TypeKind::Json => SnowflakeType::Variant,
        TypeKind::Array(element) if is_variant(element) => SnowflakeType::Array,
        TypeKind::Map { key, value }
            if key.nullable && matches!(key.kind, TypeKind::String) && is_variant(value) =>
        {
            SnowflakeType::Object
        }
        _ => return Err(unrepresentable()),
    })
}

pub fn from_native(native: &SnowflakeType, nullable: bool) -> Result<DataType> {
    let dtype = match native {
        SnowflakeType::Boolean => DataType::boolean(),
        SnowflakeType::Integer(width) => DataType::int(*width),
        SnowflakeType::Number(p, s) => DataType::decimal(*p, *s)?,
        SnowflakeType::Float => DataType::float64(),
        SnowflakeType::Varchar => DataType::string(),
        SnowflakeType::Binary => DataType::binary(),
        SnowflakeType::Date => DataType::date(),
        SnowflakeType::Time => DataType::time(),
        SnowflakeType::TimestampNtz(scale) => DataType::timestamp_with(None, *scale),
        SnowflakeType::TimestampTz(scale) => DataType::timestamp_with(Some("UTC"), *scale),
        SnowflakeType::Variant => DataType::json(),
        SnowflakeType::Array => DataType::array(DataType::json()),
        SnowflakeType::Object => DataType::map(DataType::string(), DataType::json()),
    };
    Ok(dtype.with_nullable(nullable))
}

/// Typed nested values degrade to their semi-structured counterparts before
/// the generic simplifications apply.
pub fn fallback(dtype: &DataType) -> Option<(DataType, &'static str)> {
    let nullable = dtype.nullable;
    match &dtype.kind {
        TypeKind::Array(element) if !is_variant(element) => Some((
            DataType::array(DataType::json()).with_nullable(nullable),
            "typed arrays stored as ARRAY of VARIANT",
        )),
        TypeKind::Map { .. } | TypeKind::Struct(_) if to_native(dtype).is_err() => Some((
            DataType::map(DataType::string(), DataType::json()).with_nullable(nullable),
            "maps and structs stored as OBJECT",
        )),
        _ => lossy_fallback(dtype),
    }
}

pub fn registry() -> SqlRegistry {
    ops::baseline()
        .layer("snowflake")
        .with(OpKind::Reduction, reduction as Rule)
        .with(OpKind::IntegerToTimestamp, integer_to_timestamp)
}

fn reduction(_: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<Sql> {
    let (_, call) = ops::aggregate_call(graph, id, children)?;
    Ok(Sql::Expr(ops::filter_as_case(call)))
}

/// `TO_TIMESTAMP(x, scale)` interprets `x` in units of `10^-scale` seconds.
fn integer_to_timestamp(
    _: &mut Cx<SqlBackend>,
    graph: &Graph,
    id: NodeId,
    children: Vec<Sql>,
) -> Result<Sql> {
    let scale = match ops::timestamp_unit(graph, id)? {
        TimestampUnit::Seconds => 0,
        TimestampUnit::Millis => 3,
        TimestampUnit::Micros => 6,
    };
    let mut args = children.into_iter().map(Sql::into_expr).collect::<Result<Vec<_>>>()?;
    args.push(Expr::literal(Value::Int(scale), DataType::int8()));
    Ok(Sql::Expr(Expr::function("to_timestamp", args)))
}
