//! DuckDB: the baseline dialect
//!
//! The widest native vocabulary of the SQL backends: unsigned integers,
//! lists, maps, structs and JSON are all first class.

use crate::ops::{self, SqlRegistry};
use deferql_ir::{DataType, Error, IntervalUnit, Result, TypeKind};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuckType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    UTinyInt,
    USmallInt,
    UInteger,
    UBigInt,
    Float,
    Double,
    Decimal(u8, u8),
    Varchar,
    Blob,
    Date,
    Time,
    /// `TIMESTAMP` when the scale is unspecified, otherwise the
    /// `TIMESTAMP_S`/`_MS`/`_US`/`_NS` variants.
    Timestamp(Option<u8>),
    /// Always stored as UTC instants.
    TimestampTz,
    /// DuckDB intervals carry no unit; the unit rides along so the
    /// canonical type survives the trip.
    Interval(IntervalUnit),
    List(Box<DuckType>),
    Map(Box<DuckType>, Box<DuckType>),
    Struct(Vec<(String, DuckType)>),
    Json,
}

impl fmt::Display for DuckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuckType::Boolean => write!(f, "BOOLEAN"),
            DuckType::TinyInt => write!(f, "TINYINT"),
            DuckType::SmallInt => write!(f, "SMALLINT"),
            DuckType::Integer => write!(f, "INTEGER"),
            DuckType::BigInt => write!(f, "BIGINT"),
            DuckType::UTinyInt => write!(f, "UTINYINT"),
            DuckType::USmallInt => write!(f, "USMALLINT"),
            DuckType::UInteger => write!(f, "UINTEGER"),
            DuckType::UBigInt => write!(f, "UBIGINT"),
            DuckType::Float => write!(f, "FLOAT"),
            DuckType::Double => write!(f, "DOUBLE"),
            DuckType::Decimal(p, s) => write!(f, "DECIMAL({p}, {s})"),
            DuckType::Varchar => write!(f, "VARCHAR"),
            DuckType::Blob => write!(f, "BLOB"),
            DuckType::Date => write!(f, "DATE"),
            DuckType::Time => write!(f, "TIME"),
            DuckType::Timestamp(None) => write!(f, "TIMESTAMP"),
            DuckType::Timestamp(Some(0)) => write!(f, "TIMESTAMP_S"),
            DuckType::Timestamp(Some(3)) => write!(f, "TIMESTAMP_MS"),
            DuckType::Timestamp(Some(6)) => write!(f, "TIMESTAMP_US"),
            DuckType::Timestamp(Some(_)) => write!(f, "TIMESTAMP_NS"),
            DuckType::TimestampTz => write!(f, "TIMESTAMPTZ"),
            DuckType::Interval(_) => write!(f, "INTERVAL"),
            DuckType::List(element) => write!(f, "{element}[]"),
            DuckType::Map(key, value) => write!(f, "MAP({key}, {value})"),
            DuckType::Struct(fields) => {
                write!(f, "STRUCT(")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\" {ty}", name.replace('"', "\"\""))?;
                }
                write!(f, ")")
            }
            DuckType::Json => write!(f, "JSON"),
        }
    }
}

pub fn to_native(dtype: &DataType) -> Result<DuckType> {
    let unrepresentable = || Error::unrepresentable(dtype, "duckdb");
    Ok(match &dtype.kind {
        TypeKind::Boolean => DuckType::Boolean,
        TypeKind::Int { width, signed: true } => match width {
            8 => DuckType::TinyInt,
            16 => DuckType::SmallInt,
            32 => DuckType::Integer,
            64 => DuckType::BigInt,
            _ => return Err(unrepresentable()),
        },
        TypeKind::Int { width, signed: false } => match width {
            8 => DuckType::UTinyInt,
            16 => DuckType::USmallInt,
            32 => DuckType::UInteger,
            64 => DuckType::UBigInt,
            _ => return Err(unrepresentable()),
        },
        TypeKind::Float { width: 32 } => DuckType::Float,
        TypeKind::Float { width: 64 } => DuckType::Double,
        TypeKind::Decimal { precision, scale } if *precision <= 38 => {
            DuckType::Decimal(*precision, *scale)
        }
        TypeKind::String => DuckType::Varchar,
        TypeKind::Binary => DuckType::Blob,
        TypeKind::Date => DuckType::Date,
        TypeKind::Time => DuckType::Time,
        TypeKind::Timestamp {
            timezone: None,
            scale,
        } => match scale {
            None | Some(0) | Some(3) | Some(6) | Some(9) => DuckType::Timestamp(*scale),
            Some(_) => return Err(unrepresentable()),
        },
        TypeKind::Timestamp {
            timezone: Some(tz),
            scale: None,
        } if tz == "UTC" => DuckType::TimestampTz,
        TypeKind::Interval { unit } if *unit != IntervalUnit::Nanosecond => DuckType::Interval(*unit),
        TypeKind::Array(element) if element.nullable => DuckType::List(Box::new(to_native(element)?)),
        TypeKind::Map { key, value } if key.nullable && value.nullable => {
            DuckType::Map(Box::new(to_native(key)?), Box::new(to_native(value)?))
        }
        TypeKind::Struct(fields) if fields.iter().all(|f| f.data_type.nullable) => DuckType::Struct(
            fields
                .iter()
                .map(|f| Ok((f.name.clone(), to_native(&f.data_type)?)))
                .collect::<Result<_>>()?,
        ),
        TypeKind::Json => DuckType::Json,
        _ => return Err(unrepresentable()),
    })
}

/// Nested element types come back nullable; DuckDB does not track
/// nullability below the column.
pub fn from_native(native: &DuckType, nullable: bool) -> Result<DataType> {
    let dtype = match native {
        DuckType::Boolean => DataType::boolean(),
        DuckType::TinyInt => DataType::int8(),
        DuckType::SmallInt => DataType::int16(),
        DuckType::Integer => DataType::int32(),
        DuckType::BigInt => DataType::int64(),
        DuckType::UTinyInt => DataType::uint(8),
        DuckType::USmallInt => DataType::uint(16),
        DuckType::UInteger => DataType::uint(32),
        DuckType::UBigInt => DataType::uint(64),
        DuckType::Float => DataType::float32(),
        DuckType::Double => DataType::float64(),
        DuckType::Decimal(p, s) => DataType::decimal(*p, *s)?,
        DuckType::Varchar => DataType::string(),
        DuckType::Blob => DataType::binary(),
        DuckType::Date => DataType::date(),
        DuckType::Time => DataType::time(),
        DuckType::Timestamp(scale) => DataType::timestamp_with(None, *scale),
        DuckType::TimestampTz => DataType::timestamp_with(Some("UTC"), None),
        DuckType::Interval(unit) => DataType::interval(*unit),
        DuckType::List(element) => DataType::array(from_native(element, true)?),
        DuckType::Map(key, value) => DataType::map(from_native(key, true)?, from_native(value, true)?),
        DuckType::Struct(fields) => DataType::structure(
            fields
                .iter()
                .map(|(name, ty)| Ok(deferql_ir::Field::new(name.clone(), from_native(ty, true)?)))
                .collect::<Result<_>>()?,
        )?,
        DuckType::Json => DataType::json(),
    };
    Ok(dtype.with_nullable(nullable))
}

pub fn registry() -> SqlRegistry {
    ops::baseline().layer("duckdb")
}

#[cfg(test)]
mod tests {
    use super::*;
    use deferql_ir::Field;

    #[test]
    fn test_round_trip() {
        let types = [
            DataType::boolean(),
            DataType::int8(),
            DataType::int64().not_null(),
            DataType::uint(64),
            DataType::float32(),
            DataType::decimal(38, 9).unwrap(),
            DataType::string(),
            DataType::binary(),
            DataType::date(),
            DataType::time(),
            DataType::timestamp(),
            DataType::timestamp_with(None, Some(3)),
            DataType::timestamp_with(None, Some(9)),
            DataType::timestamp_with(Some("UTC"), None),
            DataType::interval(IntervalUnit::Day),
            DataType::array(DataType::int32()),
            DataType::map(DataType::string(), DataType::array(DataType::float64())),
            DataType::structure(vec![
                Field::new("a", DataType::int32()),
                Field::new("b", DataType::string()),
            ])
            .unwrap(),
            DataType::json(),
        ];
        for dtype in types {
            let native = to_native(&dtype).unwrap();
            assert_eq!(from_native(&native, dtype.nullable).unwrap(), dtype, "{native}");
        }
    }

    #[test]
    fn test_unrepresentable() {
        for dtype in [
            DataType::timestamp_with(Some("+02:00"), None),
            DataType::timestamp_with(None, Some(2)),
            DataType::decimal(40, 2).unwrap(),
            DataType::enumeration(),
            DataType::null(),
            DataType::array(DataType::int32().not_null()),
        ] {
            assert!(matches!(to_native(&dtype), Err(Error::Type(_))), "{dtype}");
        }
    }

    #[test]
    fn test_type_names() {
        let native = to_native(&DataType::map(DataType::string(), DataType::array(DataType::int64()))).unwrap();
        assert_eq!(native.to_string(), "MAP(VARCHAR, BIGINT[])");
        assert_eq!(to_native(&DataType::timestamp_with(None, Some(0))).unwrap().to_string(), "TIMESTAMP_S");
    }
}
