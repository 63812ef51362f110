//! Canonical types as Substrait `Type` messages
//!
//! Substrait tracks nullability on every nested type, so arrays and maps
//! round-trip with their element nullability intact. Timestamps need an
//! explicit scale; structs, JSON, enums, intervals and unsigned integers
//! have no counterpart here.

use deferql_compile::TypeMapper;
use deferql_ir::{DataType, Error, Result, TypeKind};
use substrait::proto::r#type::{self, Kind, Nullability};
use substrait::proto::Type;

const BACKEND: &str = "substrait";

/// Widest decimal precision Substrait defines.
pub const MAX_PRECISION: u8 = 38;

/// Finest timestamp precision Substrait defines (picoseconds).
pub const MAX_TIMESTAMP_PRECISION: u8 = 12;

pub fn nullability(nullable: bool) -> i32 {
    if nullable {
        Nullability::Nullable as i32
    } else {
        Nullability::Required as i32
    }
}

#[allow(deprecated)]
pub fn is_nullable(ty: &Type) -> bool {
    let nullability = match &ty.kind {
        Some(Kind::Bool(t)) => t.nullability,
        Some(Kind::I8(t)) => t.nullability,
        Some(Kind::I16(t)) => t.nullability,
        Some(Kind::I32(t)) => t.nullability,
        Some(Kind::I64(t)) => t.nullability,
        Some(Kind::Fp32(t)) => t.nullability,
        Some(Kind::Fp64(t)) => t.nullability,
        Some(Kind::Decimal(t)) => t.nullability,
        Some(Kind::String(t)) => t.nullability,
        Some(Kind::Binary(t)) => t.nullability,
        Some(Kind::Date(t)) => t.nullability,
        Some(Kind::Time(t)) => t.nullability,
        Some(Kind::PrecisionTimestamp(t)) => t.nullability,
        Some(Kind::PrecisionTimestampTz(t)) => t.nullability,
        Some(Kind::List(t)) => t.nullability,
        Some(Kind::Map(t)) => t.nullability,
        _ => Nullability::Nullable as i32,
    };
    nullability != Nullability::Required as i32
}

pub fn boolean(nullable: bool) -> Type {
    Type {
        kind: Some(Kind::Bool(r#type::Boolean {
            nullability: nullability(nullable),
            ..Default::default()
        })),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubstraitTypes;

impl TypeMapper for SubstraitTypes {
    type Native = Type;

    fn backend(&self) -> &str {
        BACKEND
    }

    fn to_native(&self, dtype: &DataType) -> Result<Type> {
        to_native(dtype)
    }

    fn from_native(&self, native: &Type, nullable: bool) -> Result<DataType> {
        Ok(from_native(native)?.with_nullable(nullable))
    }
}

#[allow(deprecated)]
pub fn to_native(dtype: &DataType) -> Result<Type> {
    let unrepresentable = || Error::unrepresentable(dtype, BACKEND);
    let n = nullability(dtype.nullable);
    let kind = match &dtype.kind {
        TypeKind::Boolean => Kind::Bool(r#type::Boolean {
            nullability: n,
            ..Default::default()
        }),
        TypeKind::Int { width, signed: true } => match width {
            8 => Kind::I8(r#type::I8 {
                nullability: n,
                ..Default::default()
            }),
            16 => Kind::I16(r#type::I16 {
                nullability: n,
                ..Default::default()
            }),
            32 => Kind::I32(r#type::I32 {
                nullability: n,
                ..Default::default()
            }),
            64 => Kind::I64(r#type::I64 {
                nullability: n,
                ..Default::default()
            }),
            _ => return Err(unrepresentable()),
        },
        TypeKind::Float { width: 32 } => Kind::Fp32(r#type::Fp32 {
            nullability: n,
            ..Default::default()
        }),
        TypeKind::Float { width: 64 } => Kind::Fp64(r#type::Fp64 {
            nullability: n,
            ..Default::default()
        }),
        TypeKind::Decimal { precision, scale } if *precision <= MAX_PRECISION => {
            Kind::Decimal(r#type::Decimal {
                precision: i32::from(*precision),
                scale: i32::from(*scale),
                nullability: n,
                ..Default::default()
            })
        }
        TypeKind::String => Kind::String(r#type::String {
            nullability: n,
            ..Default::default()
        }),
        TypeKind::Binary => Kind::Binary(r#type::Binary {
            nullability: n,
            ..Default::default()
        }),
        TypeKind::Date => Kind::Date(r#type::Date {
            nullability: n,
            ..Default::default()
        }),
        TypeKind::Time => Kind::Time(r#type::Time {
            nullability: n,
            ..Default::default()
        }),
        TypeKind::Timestamp {
            timezone,
            scale: Some(scale),
        } if *scale <= MAX_TIMESTAMP_PRECISION => {
            let precision = r#type::PrecisionTimestamp {
                precision: i32::from(*scale),
                nullability: n,
                ..Default::default()
            };
            match timezone.as_deref() {
                None => Kind::PrecisionTimestamp(precision),
                Some("UTC") => Kind::PrecisionTimestampTz(r#type::PrecisionTimestampTz {
                    precision: precision.precision,
                    nullability: n,
                    ..Default::default()
                }),
                Some(_) => return Err(unrepresentable()),
            }
        }
        TypeKind::Array(element) => Kind::List(Box::new(r#type::List {
            r#type: Some(Box::new(to_native(element)?)),
            nullability: n,
            ..Default::default()
        })),
        TypeKind::Map { key, value } => Kind::Map(Box::new(r#type::Map {
            key: Some(Box::new(to_native(key)?)),
            value: Some(Box::new(to_native(value)?)),
            nullability: n,
            ..Default::default()
        })),
        _ => return Err(unrepresentable()),
    };
    Ok(Type { kind: Some(kind) })
}

/// Canonical type with the nullability recorded in the message, nested
/// types included.
#[allow(deprecated)]
pub fn from_native(native: &Type) -> Result<DataType> {
    let kind = native
        .kind
        .as_ref()
        .ok_or_else(|| Error::Type("Substrait type without a kind".to_string()))?;
    let nested = |ty: &Option<Box<Type>>| -> Result<DataType> {
        let ty = ty
            .as_deref()
            .ok_or_else(|| Error::Type("nested Substrait type is missing".to_string()))?;
        from_native(ty)
    };
    let dtype = match kind {
        Kind::Bool(_) => DataType::boolean(),
        Kind::I8(_) => DataType::int8(),
        Kind::I16(_) => DataType::int16(),
        Kind::I32(_) => DataType::int32(),
        Kind::I64(_) => DataType::int64(),
        Kind::Fp32(_) => DataType::float32(),
        Kind::Fp64(_) => DataType::float64(),
        Kind::Decimal(d) => DataType::decimal(narrow(d.precision)?, narrow(d.scale)?)?,
        Kind::String(_) => DataType::string(),
        Kind::Binary(_) => DataType::binary(),
        Kind::Date(_) => DataType::date(),
        Kind::Time(_) => DataType::time(),
        Kind::PrecisionTimestamp(t) => DataType::timestamp_with(None, Some(narrow(t.precision)?)),
        Kind::PrecisionTimestampTz(t) => {
            DataType::timestamp_with(Some("UTC"), Some(narrow(t.precision)?))
        }
        Kind::List(list) => DataType::array(nested(&list.r#type)?),
        Kind::Map(map) => DataType::map(nested(&map.key)?, nested(&map.value)?),
        other => {
            return Err(Error::Type(format!(
                "Substrait type {other:?} has no canonical counterpart"
            )))
        }
    };
    Ok(dtype.with_nullable(is_nullable(native)))
}

fn narrow(n: i32) -> Result<u8> {
    u8::try_from(n).map_err(|_| Error::Type(format!("type parameter {n} is out of range")))
}
