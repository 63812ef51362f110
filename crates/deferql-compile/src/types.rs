//! Canonical ↔ native type marshalling

use crate::policy::BackendPolicy;
use deferql_ir::{DataType, Error, Field, Result, TypeKind};
use std::fmt;

/// Record of a coercion that lost information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FidelityNote {
    pub backend: String,
    pub requested: DataType,
    pub stored_as: DataType,
    pub reason: String,
}

impl fmt::Display for FidelityNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} stores {} as {}: {}",
            self.backend, self.requested, self.stored_as, self.reason
        )
    }
}

/// Bidirectional converter between [`DataType`] and one backend's native
/// type vocabulary.
///
/// `to_native` and `from_native` are strict: for every type `d` the backend
/// represents, `from_native(to_native(d), d.nullable) == d`, and everything
/// else fails with a type error. Lossy behavior lives in [`coerce`] and
/// [`read_back`], and only applies when the policy asks for it.
///
/// [`coerce`]: TypeMapper::coerce
/// [`read_back`]: TypeMapper::read_back
pub trait TypeMapper: Send + Sync {
    type Native: Clone + fmt::Debug + PartialEq + Send + Sync;

    fn backend(&self) -> &str;

    fn to_native(&self, dtype: &DataType) -> Result<Self::Native>;

    fn from_native(&self, native: &Self::Native, nullable: bool) -> Result<DataType>;

    /// Nearest type the backend is expected to hold in place of `dtype`.
    fn fallback(&self, dtype: &DataType) -> Option<(DataType, &'static str)> {
        lossy_fallback(dtype)
    }

    /// Map `dtype`, falling back to a lossy substitute when the policy allows.
    fn coerce(
        &self,
        dtype: &DataType,
        policy: &BackendPolicy,
    ) -> Result<(Self::Native, Option<FidelityNote>)> {
        let err = match self.to_native(dtype) {
            Ok(native) => return Ok((native, None)),
            Err(err) => err,
        };
        if !policy.lossy_coercion {
            return Err(err);
        }
        let mut current = dtype.clone();
        let mut reasons = Vec::new();
        // Each fallback step strictly simplifies the type, so this terminates.
        while let Some((next, reason)) = self.fallback(&current) {
            reasons.push(reason);
            current = next;
            if let Ok(native) = self.to_native(&current) {
                let note = FidelityNote {
                    backend: self.backend().to_string(),
                    requested: dtype.clone(),
                    stored_as: current,
                    reason: reasons.join("; "),
                };
                tracing::warn!(%note, "Lossy type coercion");
                return Ok((native, Some(note)));
            }
        }
        Err(err)
    }

    /// Map a native column type back, applying read-side policies.
    fn read_back(
        &self,
        native: &Self::Native,
        nullable: bool,
        policy: &BackendPolicy,
    ) -> Result<(DataType, Option<FidelityNote>)> {
        let dtype = self.from_native(native, nullable)?;
        if policy.zero_scale_decimal_as_int64 {
            if let TypeKind::Decimal { precision, scale: 0 } = dtype.kind {
                let as_int = DataType::int64().with_nullable(nullable);
                let note = (precision > 18).then(|| FidelityNote {
                    backend: self.backend().to_string(),
                    requested: dtype.clone(),
                    stored_as: as_int.clone(),
                    reason: format!("DECIMAL({precision}, 0) can exceed the Int64 range"),
                });
                if let Some(note) = &note {
                    tracing::warn!(%note, "Lossy decimal read-back");
                }
                return Ok((as_int, note));
            }
        }
        Ok((dtype, None))
    }

    /// Native schema for a canonical one, column by column.
    fn schema_to_native(&self, fields: &[Field]) -> Result<Vec<(String, Self::Native)>> {
        fields
            .iter()
            .map(|f| Ok((f.name.clone(), self.to_native(&f.data_type)?)))
            .collect()
    }
}

/// Generic one-step simplification used by lossy coercion.
pub fn lossy_fallback(dtype: &DataType) -> Option<(DataType, &'static str)> {
    let nullable = dtype.nullable;
    let (kind, reason) = match &dtype.kind {
        TypeKind::Int { signed: false, .. } => (
            TypeKind::Int {
                width: 64,
                signed: true,
            },
            "unsigned integers widened to the widest signed integer",
        ),
        TypeKind::Float { width } if *width < 64 => {
            (TypeKind::Float { width: 64 }, "floats widened to 64 bits")
        }
        TypeKind::Timestamp {
            timezone: Some(tz),
            scale,
        } if tz != "UTC" => (
            TypeKind::Timestamp {
                timezone: Some("UTC".to_string()),
                scale: *scale,
            },
            "zoned timestamps normalized to UTC",
        ),
        TypeKind::Timestamp {
            timezone,
            scale: None,
        } => (
            TypeKind::Timestamp {
                timezone: timezone.clone(),
                scale: Some(6),
            },
            "unspecified timestamp scale stored as microseconds",
        ),
        TypeKind::Enum => (TypeKind::String, "enums stored as strings"),
        TypeKind::Json => (TypeKind::String, "JSON stored as text"),
        TypeKind::Interval { .. } => (
            TypeKind::Int {
                width: 64,
                signed: true,
            },
            "intervals stored as integer counts",
        ),
        TypeKind::Decimal { precision, scale } if *precision > 38 => (
            TypeKind::Decimal {
                precision: 38,
                scale: (*scale).min(38),
            },
            "decimal precision capped at 38",
        ),
        TypeKind::Array(element) => {
            let (element, reason) = lossy_fallback(element)?;
            (TypeKind::Array(Box::new(element)), reason)
        }
        TypeKind::Map { key, value } => {
            if let Some((key, reason)) = lossy_fallback(key) {
                (
                    TypeKind::Map {
                        key: Box::new(key),
                        value: value.clone(),
                    },
                    reason,
                )
            } else {
                let (value, reason) = lossy_fallback(value)?;
                (
                    TypeKind::Map {
                        key: key.clone(),
                        value: Box::new(value),
                    },
                    reason,
                )
            }
        }
        _ => return None,
    };
    Some((DataType { kind, nullable }, reason))
}

/// Fail with the standard message for a type outside the backend's subset.
pub fn unrepresentable<T>(dtype: &DataType, backend: &str) -> Result<T> {
    Err(Error::unrepresentable(dtype, backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A backend that only knows signed 64-bit integers and strings.
    struct Tiny;

    #[derive(Debug, Clone, PartialEq)]
    enum TinyType {
        BigInt,
        Text,
    }

    impl TypeMapper for Tiny {
        type Native = TinyType;

        fn backend(&self) -> &str {
            "tiny"
        }

        fn to_native(&self, dtype: &DataType) -> Result<TinyType> {
            match dtype.kind {
                TypeKind::Int {
                    width: 64,
                    signed: true,
                } => Ok(TinyType::BigInt),
                TypeKind::String => Ok(TinyType::Text),
                _ => unrepresentable(dtype, self.backend()),
            }
        }

        fn from_native(&self, native: &TinyType, nullable: bool) -> Result<DataType> {
            Ok(match native {
                TinyType::BigInt => DataType::int64(),
                TinyType::Text => DataType::string(),
            }
            .with_nullable(nullable))
        }
    }

    #[test]
    fn test_strict_by_default() {
        let err = Tiny.coerce(&DataType::uint(32), &BackendPolicy::default()).unwrap_err();
        assert!(matches!(err, Error::Type(_)));
    }

    #[test]
    fn test_lossy_coercion_notes() {
        let policy = BackendPolicy::default().with_lossy_coercion(true);
        let (native, note) = Tiny.coerce(&DataType::uint(32), &policy).unwrap();
        assert_eq!(native, TinyType::BigInt);
        let note = note.unwrap();
        assert_eq!(note.stored_as, DataType::int64());

        let (native, note) = Tiny.coerce(&DataType::json(), &policy).unwrap();
        assert_eq!(native, TinyType::Text);
        assert!(note.is_some());

        let (_, note) = Tiny.coerce(&DataType::int64(), &policy).unwrap();
        assert!(note.is_none());

        assert!(Tiny.coerce(&DataType::boolean(), &policy).is_err());
    }

    #[test]
    fn test_zero_scale_read_back() {
        struct Decimals;
        impl TypeMapper for Decimals {
            type Native = (u8, u8);
            fn backend(&self) -> &str {
                "decimals"
            }
            fn to_native(&self, dtype: &DataType) -> Result<(u8, u8)> {
                match dtype.kind {
                    TypeKind::Decimal { precision, scale } => Ok((precision, scale)),
                    _ => unrepresentable(dtype, self.backend()),
                }
            }
            fn from_native(&self, native: &(u8, u8), nullable: bool) -> Result<DataType> {
                Ok(DataType::decimal(native.0, native.1)?.with_nullable(nullable))
            }
        }

        let strict = BackendPolicy::default();
        let (t, _) = Decimals.read_back(&(38, 0), true, &strict).unwrap();
        assert_eq!(t, DataType::decimal(38, 0).unwrap());

        let policy = BackendPolicy {
            zero_scale_decimal_as_int64: true,
            ..BackendPolicy::default()
        };
        let (t, note) = Decimals.read_back(&(38, 0), true, &policy).unwrap();
        assert_eq!(t, DataType::int64());
        assert!(note.is_some());

        let (_, note) = Decimals.read_back(&(10, 0), true, &policy).unwrap();
        assert!(note.is_none());
    }
}
