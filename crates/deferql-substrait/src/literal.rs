//! Values as Substrait literals
//!
//! Encoding follows the native type the value is stored as, so values of a
//! lossily coerced type are encoded in the substitute's representation.

use crate::types::is_nullable;
use chrono::{Datelike, NaiveDateTime, Timelike};
use deferql_ir::{Error, Result, Value};
use substrait::proto::expression::literal::{self, map::KeyValue, LiteralType};
use substrait::proto::expression::Literal;
use substrait::proto::r#type::Kind;
use substrait::proto::Type;

/// Days from 0001-01-01 to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Untyped null, for literals whose type is still unknown.
pub fn untyped_null() -> Literal {
    Literal {
        nullable: true,
        type_variation_reference: 0,
        literal_type: Some(LiteralType::Null(Type { kind: None })),
    }
}

#[allow(deprecated)]
pub fn encode(value: &Value, ty: &Type) -> Result<Literal> {
    let mismatch = || Error::Type(format!("cannot encode {value:?} as Substrait {ty:?}"));
    let kind = ty.kind.as_ref().ok_or_else(mismatch)?;
    let literal_type = match (value, kind) {
        (Value::Null, _) => LiteralType::Null(ty.clone()),
        (Value::Bool(b), Kind::Bool(_)) => LiteralType::Boolean(*b),
        (Value::Int(_) | Value::UInt(_), Kind::I8(_)) => {
            LiteralType::I8(narrow_int(value, i8::MIN.into(), i8::MAX.into())?)
        }
        (Value::Int(_) | Value::UInt(_), Kind::I16(_)) => {
            LiteralType::I16(narrow_int(value, i16::MIN.into(), i16::MAX.into())?)
        }
        (Value::Int(_) | Value::UInt(_), Kind::I32(_)) => {
            LiteralType::I32(narrow_int(value, i32::MIN.into(), i32::MAX.into())?)
        }
        (Value::Int(_) | Value::UInt(_), Kind::I64(_)) => LiteralType::I64(as_i64(value)?),
        (Value::Float(f), Kind::Fp32(_)) => LiteralType::Fp32(*f as f32),
        (Value::Float(f), Kind::Fp64(_)) => LiteralType::Fp64(*f),
        (Value::Int(_) | Value::UInt(_), Kind::Fp64(_)) => LiteralType::Fp64(as_i64(value)? as f64),
        (Value::Decimal { digits, scale }, Kind::Decimal(d)) => {
            LiteralType::Decimal(decimal(*digits, *scale, d.precision, d.scale)?)
        }
        (Value::Int(_) | Value::UInt(_), Kind::Decimal(d)) => {
            LiteralType::Decimal(decimal(i128::from(as_i64(value)?), 0, d.precision, d.scale)?)
        }
        (Value::String(s), Kind::String(_)) => LiteralType::String(s.clone()),
        (Value::Json(s), Kind::String(_)) => LiteralType::String(s.clone()),
        (Value::Bytes(b), Kind::Binary(_)) => LiteralType::Binary(b.clone()),
        (Value::Date(d), Kind::Date(_)) => {
            LiteralType::Date(d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
        }
        (Value::Time(t), Kind::Time(_)) => LiteralType::Time(
            i64::from(t.num_seconds_from_midnight()) * 1_000_000 + i64::from(t.nanosecond() / 1_000),
        ),
        (Value::Timestamp { value, timezone: None }, Kind::PrecisionTimestamp(t)) => {
            LiteralType::PrecisionTimestamp(literal::PrecisionTimestamp {
                precision: t.precision,
                value: ticks(value, t.precision)?,
            })
        }
        (Value::Timestamp { value, timezone: Some(_) }, Kind::PrecisionTimestampTz(t)) => {
            LiteralType::PrecisionTimestampTz(literal::PrecisionTimestamp {
                precision: t.precision,
                value: ticks(value, t.precision)?,
            })
        }
        (Value::Interval { count, .. }, Kind::I64(_)) => LiteralType::I64(*count),
        (Value::Array(values), Kind::List(list)) => {
            let element = list.r#type.as_deref().ok_or_else(mismatch)?;
            if values.is_empty() {
                LiteralType::EmptyList((**list).clone())
            } else {
                LiteralType::List(literal::List {
                    values: values.iter().map(|v| encode(v, element)).collect::<Result<_>>()?,
                })
            }
        }
        (Value::Map(entries), Kind::Map(map)) => {
            let key = map.key.as_deref().ok_or_else(mismatch)?;
            let val = map.value.as_deref().ok_or_else(mismatch)?;
            if entries.is_empty() {
                LiteralType::EmptyMap((**map).clone())
            } else {
                LiteralType::Map(literal::Map {
                    key_values: entries
                        .iter()
                        .map(|(k, v)| {
                            Ok(KeyValue {
                                key: Some(encode(k, key)?),
                                value: Some(encode(v, val)?),
                            })
                        })
                        .collect::<Result<_>>()?,
                })
            }
        }
        _ => return Err(mismatch()),
    };
    Ok(Literal {
        nullable: is_nullable(ty) || value.is_null(),
        type_variation_reference: 0,
        literal_type: Some(literal_type),
    })
}

fn as_i64(value: &Value) -> Result<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::UInt(u) => i64::try_from(*u).map_err(|_| out_of_range(value)),
        _ => Err(out_of_range(value)),
    }
}

fn narrow_int(value: &Value, min: i64, max: i64) -> Result<i32> {
    let v = as_i64(value)?;
    if v < min || v > max {
        return Err(out_of_range(value));
    }
    i32::try_from(v).map_err(|_| out_of_range(value))
}

fn out_of_range(value: &Value) -> Error {
    Error::Type(format!("{value:?} is out of range for its Substrait type"))
}

/// Sixteen little-endian two's complement bytes, rescaled to `to_scale`.
fn decimal(digits: i128, scale: u8, precision: i32, to_scale: i32) -> Result<literal::Decimal> {
    let overflow = || {
        Error::Type(format!(
            "decimal {digits}e-{scale} does not fit DECIMAL({precision}, {to_scale})"
        ))
    };
    let shift = to_scale - i32::from(scale);
    let factor = 10i128
        .checked_pow(shift.unsigned_abs())
        .ok_or_else(overflow)?;
    let rescaled = if shift >= 0 {
        digits.checked_mul(factor).ok_or_else(overflow)?
    } else if digits % factor == 0 {
        digits / factor
    } else {
        return Err(overflow());
    };
    let limit = 10i128
        .checked_pow(u32::try_from(precision).map_err(|_| overflow())?)
        .ok_or_else(overflow)?;
    if rescaled.abs() >= limit {
        return Err(overflow());
    }
    Ok(literal::Decimal {
        value: rescaled.to_le_bytes().to_vec(),
        precision,
        scale: to_scale,
    })
}

/// Ticks of `10^-precision` seconds since the epoch.
fn ticks(value: &NaiveDateTime, precision: i32) -> Result<i64> {
    let overflow = || Error::Type(format!("{value} overflows a precision-{precision} timestamp"));
    let instant = value.and_utc();
    let precision = u32::try_from(precision).map_err(|_| overflow())?;
    let seconds = instant
        .timestamp()
        .checked_mul(10i64.checked_pow(precision).ok_or_else(overflow)?)
        .ok_or_else(overflow)?;
    let nanos = i64::from(instant.timestamp_subsec_nanos());
    let fraction = if precision <= 9 {
        nanos / 10i64.pow(9 - precision)
    } else {
        nanos
            .checked_mul(10i64.checked_pow(precision - 9).ok_or_else(overflow)?)
            .ok_or_else(overflow)?
    };
    seconds.checked_add(fraction).ok_or_else(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::to_native;
    use chrono::{NaiveDate, NaiveTime};
    use deferql_ir::DataType;

    fn lit(value: Value, dtype: DataType) -> Result<LiteralType> {
        Ok(encode(&value, &to_native(&dtype)?)?.literal_type.unwrap())
    }

    #[test]
    fn test_integers_follow_the_column_width() {
        assert_eq!(lit(Value::Int(5), DataType::int8()).unwrap(), LiteralType::I8(5));
        assert_eq!(lit(Value::UInt(7), DataType::int64()).unwrap(), LiteralType::I64(7));
        assert!(matches!(lit(Value::Int(300), DataType::int8()), Err(Error::Type(_))));
    }

    #[test]
    fn test_decimal_rescaled() {
        let LiteralType::Decimal(d) = lit(
            Value::Decimal { digits: 12345, scale: 2 },
            DataType::decimal(10, 4).unwrap(),
        )
        .unwrap() else {
            panic!("expected a decimal");
        };
        assert_eq!(d.value, 1_234_500i128.to_le_bytes().to_vec());
        assert_eq!((d.precision, d.scale), (10, 4));

        let too_wide = lit(Value::Decimal { digits: 12345, scale: 2 }, DataType::decimal(4, 2).unwrap());
        assert!(matches!(too_wide, Err(Error::Type(_))));
    }

    #[test]
    #[allow(deprecated)]
    fn test_temporal_values() {
        let date = NaiveDate::from_ymd_opt(1970, 1, 11).unwrap();
        assert_eq!(lit(Value::Date(date), DataType::date()).unwrap(), LiteralType::Date(10));

        let time = NaiveTime::from_hms_micro_opt(0, 0, 2, 5).unwrap();
        assert_eq!(lit(Value::Time(time), DataType::time()).unwrap(), LiteralType::Time(2_000_005));

        let ts = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_milli_opt(0, 0, 1, 500)
            .unwrap();
        let encoded = lit(
            Value::Timestamp { value: ts, timezone: Some("UTC".to_string()) },
            DataType::timestamp_with(Some("UTC"), Some(3)),
        )
        .unwrap();
        assert_eq!(
            encoded,
            LiteralType::PrecisionTimestampTz(literal::PrecisionTimestamp { precision: 3, value: 1_500 })
        );
    }

    #[test]
    fn test_nested_values() {
        let list = lit(
            Value::Array(vec![Value::Int(1), Value::Null]),
            DataType::array(DataType::int32()),
        )
        .unwrap();
        let LiteralType::List(list) = list else {
            panic!("expected a list");
        };
        assert_eq!(list.values.len(), 2);
        assert!(list.values[1].nullable);

        let empty = lit(Value::Map(vec![]), DataType::map(DataType::string(), DataType::int64())).unwrap();
        assert!(matches!(empty, LiteralType::EmptyMap(_)));
    }

    #[test]
    fn test_mismatched_value_rejected() {
        assert!(matches!(lit(Value::from("x"), DataType::int32()), Err(Error::Type(_))));
    }
}
