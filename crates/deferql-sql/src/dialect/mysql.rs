//! MySQL
//!
//! Unsigned integers and wide decimals, but no nested types or intervals.
//! Several baseline constructs are rewritten here: `ILIKE`, aggregate
//! `FILTER`, approximate distinct counts and full outer joins.

use crate::ast::{Expr, Sql};
use crate::backend::SqlBackend;
use crate::ops::{self, Rule, SqlRegistry};
use deferql_compile::Cx;
use deferql_ir::{
    BinaryOp, DataType, Error, Graph, JoinKind, NodeId, Op, OpKind, ReductionFunc, Result, TimestampUnit,
    TypeKind, Value,
};
use std::fmt;

pub const MAX_PRECISION: u8 = 65;
pub const MAX_SCALE: u8 = 30;
pub const MAX_FSP: u8 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MySqlType {
    Boolean,
    TinyInt { unsigned: bool },
    SmallInt { unsigned: bool },
    Int { unsigned: bool },
    BigInt { unsigned: bool },
    Float,
    Double,
    Decimal(u8, u8),
    Text,
    Blob,
    Date,
    Time,
    /// Wall-clock time; holds naive timestamps.
    DateTime(Option<u8>),
    /// Stored as UTC and converted through the session zone.
    Timestamp(Option<u8>),
    Json,
}

impl MySqlType {
    /// Target name inside `CAST(.. AS ..)`, which accepts a narrower set of
    /// names than column definitions.
    pub fn cast_target(&self) -> String {
        match self {
            MySqlType::Boolean
            | MySqlType::TinyInt { unsigned: false }
            | MySqlType::SmallInt { unsigned: false }
            | MySqlType::Int { unsigned: false }
            | MySqlType::BigInt { unsigned: false } => "SIGNED".to_string(),
            MySqlType::TinyInt { unsigned: true }
            | MySqlType::SmallInt { unsigned: true }
            | MySqlType::Int { unsigned: true }
            | MySqlType::BigInt { unsigned: true } => "UNSIGNED".to_string(),
            MySqlType::Text => "CHAR".to_string(),
            MySqlType::Blob => "BINARY".to_string(),
            MySqlType::Timestamp(fsp) => MySqlType::DateTime(*fsp).to_string(),
            other => other.to_string(),
        }
    }
}

fn with_fsp(f: &mut fmt::Formatter<'_>, name: &str, fsp: Option<u8>) -> fmt::Result {
    match fsp {
        Some(fsp) => write!(f, "{name}({fsp})"),
        None => write!(f, "{name}"),
    }
}

impl fmt::Display for MySqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unsigned = |u: &bool| if *u { " UNSIGNED" } else { "" };
        match self {
            MySqlType::Boolean => write!(f, "BOOLEAN"),
            MySqlType::TinyInt { unsigned: u } => write!(f, "TINYINT{}", unsigned(u)),
            MySqlType::SmallInt { unsigned: u } => write!(f, "SMALLINT{}", unsigned(u)),
            MySqlType::Int { unsigned: u } => write!(f, "INT{}", unsigned(u)),
            MySqlType::BigInt { unsigned: u } => write!(f, "BIGINT{}", unsigned(u)),
            MySqlType::Float => write!(f, "FLOAT"),
            MySqlType::Double => write!(f, "DOUBLE"),
            MySqlType::Decimal(p, s) => write!(f, "DECIMAL({p}, {s})"),
            MySqlType::Text => write!(f, "TEXT"),
            MySqlType::Blob => write!(f, "BLOB"),
            MySqlType::Date => write!(f, "DATE"),
            MySqlType::Time => write!(f, "TIME"),
            MySqlType::DateTime(fsp) => with_fsp(f, "DATETIME", *fsp),
            MySqlType::Timestamp(fsp) => with_fsp(f, "TIMESTAMP", *fsp),
            MySqlType::Json => write!(f, "JSON"),
        }
    }
}

pub fn to_native(dtype: &DataType) -> Result<MySqlType> {
    let unrepresentable = || Error::unrepresentable(dtype, "mysql");
    Ok(match &dtype.kind {
        TypeKind::Boolean => MySqlType::Boolean,
        TypeKind::Int { width, signed } => {
            let unsigned = !signed;
            match width {
                8 => MySqlType::TinyInt { unsigned },
                16 => MySqlType::SmallInt { unsigned },
                32 => MySqlType::Int { unsigned },
                64 => MySqlType::BigInt { unsigned },
                _ => return Err(unrepresentable()),
            }
        }
        TypeKind::Float { width: 32 } => MySqlType::Float,
        TypeKind::Float { width: 64 } => MySqlType::Double,
        TypeKind::Decimal { precision, scale } if *precision <= MAX_PRECISION && *scale <= MAX_SCALE => {
            MySqlType::Decimal(*precision, *scale)
        }
        TypeKind::String => MySqlType::Text,
        TypeKind::Binary => MySqlType::Blob,
        TypeKind::Date => MySqlType::Date,
        TypeKind::Time => MySqlType::Time,
        TypeKind::Timestamp { timezone, scale } => {
            if scale.is_some_and(|s| s > MAX_FSP) {
                return Err(unrepresentable());
            }
            match timezone.as_deref() {
                None => MySqlType::DateTime(*scale),
                Some("UTC") => MySqlType::Timestamp(*scale),
                Some(_) => return Err(unrepresentable()),
            }
        }
        TypeKind::Json => MySqlType::Json,
        _ => return Err(unrepresentable()),
    })
}

pub fn from_native(native: &MySqlType, nullable: bool) -> Result<DataType> {
    let int = |width: u8, unsigned: bool| {
        if unsigned {
            DataType::uint(width)
        } else {
            DataType::int(width)
        }
    };
    let dtype = match native {
        MySqlType::Boolean => DataType::boolean(),
        MySqlType::TinyInt { unsigned } => int(8, *unsigned),
        MySqlType::SmallInt { unsigned } => int(16, *unsigned),
        MySqlType::Int { unsigned } => int(32, *unsigned),
        MySqlType::BigInt { unsigned } => int(64, *unsigned),
        MySqlType::Float => DataType::float32(),
        MySqlType::Double => DataType::float64(),
        MySqlType::Decimal(p, s) => DataType::decimal(*p, *s)?,
        MySqlType::Text => DataType::string(),
        MySqlType::Blob => DataType::binary(),
        MySqlType::Date => DataType::date(),
        MySqlType::Time => DataType::time(),
        MySqlType::DateTime(fsp) => DataType::timestamp_with(None, *fsp),
        MySqlType::Timestamp(fsp) => DataType::timestamp_with(Some("UTC"), *fsp),
        MySqlType::Json => DataType::json(),
    };
    Ok(dtype.with_nullable(nullable))
}

pub fn registry() -> SqlRegistry {
    ops::baseline()
        .layer("mysql")
        .with(OpKind::Binary, binary as Rule)
        .with(OpKind::Reduction, reduction)
        .with(OpKind::Join, join)
        .with(OpKind::IntegerToTimestamp, integer_to_timestamp)
}

/// `a ILIKE b` as `LOWER(a) LIKE LOWER(b)`.
fn binary(cx: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<Sql> {
    match ops::binary(cx, graph, id, children)? {
        Sql::Expr(Expr::Binary {
            op: BinaryOp::ILike,
            left,
            right,
        }) => Ok(Sql::Expr(Expr::binary(
            BinaryOp::Like,
            Expr::function("lower", vec![*left]),
            Expr::function("lower", vec![*right]),
        ))),
        other => Ok(other),
    }
}

/// No aggregate filters and no approximate distinct count; the latter is
/// answered exactly.
fn reduction(_: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<Sql> {
    let (func, call) = ops::aggregate_call(graph, id, children)?;
    let call = match (func, call) {
        (ReductionFunc::ApproxCountDistinct, Expr::Aggregate { args, filter, .. }) => Expr::Aggregate {
            name: "count".to_string(),
            args,
            distinct: true,
            filter,
        },
        (_, call) => call,
    };
    Ok(Sql::Expr(ops::filter_as_case(call)))
}

fn join(cx: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<Sql> {
    if let Op::Join {
        kind: JoinKind::Outer,
        ..
    } = graph.op(id)?
    {
        return Err(Error::unsupported(OpKind::Join, "mysql"));
    }
    ops::join(cx, graph, id, children)
}

fn integer_to_timestamp(
    _: &mut Cx<SqlBackend>,
    graph: &Graph,
    id: NodeId,
    children: Vec<Sql>,
) -> Result<Sql> {
    let divisor = match ops::timestamp_unit(graph, id)? {
        TimestampUnit::Seconds => None,
        TimestampUnit::Millis => Some(1_000),
        TimestampUnit::Micros => Some(1_000_000),
    };
    let arg = children
        .into_iter()
        .next()
        .ok_or_else(|| Error::Invariant(format!("{id} is missing its argument")))?
        .into_expr()?;
    let arg = match divisor {
        Some(d) => Expr::binary(BinaryOp::Div, arg, Expr::literal(Value::Int(d), DataType::int32())),
        None => arg,
    };
    Ok(Sql::Expr(Expr::function("from_unixtime", vec![arg])))
}
