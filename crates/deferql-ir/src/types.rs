//! Type system for deferql IR
//!
//! A closed set of engine-neutral types. Equality is structural: two
//! `Array(Int32)` values compare equal wherever they were built.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest decimal precision any supported engine accepts.
pub const MAX_DECIMAL_PRECISION: u8 = 76;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataType {
    pub kind: TypeKind,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Null,
    Boolean,
    Int { width: u8, signed: bool },
    Float { width: u8 },
    Decimal { precision: u8, scale: u8 },
    String,
    Binary,
    Date,
    Time,
    Timestamp {
        timezone: Option<String>,
        scale: Option<u8>,
    },
    Interval { unit: IntervalUnit },
    Array(Box<DataType>),
    Map { key: Box<DataType>, value: Box<DataType> },
    Struct(Vec<Field>),
    Json,
    Enum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IntervalUnit {
    Year,
    Quarter,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
}

impl IntervalUnit {
    pub fn short_name(self) -> &'static str {
        match self {
            IntervalUnit::Year => "Y",
            IntervalUnit::Quarter => "Q",
            IntervalUnit::Month => "M",
            IntervalUnit::Week => "W",
            IntervalUnit::Day => "D",
            IntervalUnit::Hour => "h",
            IntervalUnit::Minute => "m",
            IntervalUnit::Second => "s",
            IntervalUnit::Millisecond => "ms",
            IntervalUnit::Microsecond => "us",
            IntervalUnit::Nanosecond => "ns",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

impl DataType {
    pub fn new(kind: TypeKind) -> Self {
        Self { kind, nullable: true }
    }

    pub fn null() -> Self {
        Self::new(TypeKind::Null)
    }

    pub fn boolean() -> Self {
        Self::new(TypeKind::Boolean)
    }

    pub fn int(width: u8) -> Self {
        Self::new(TypeKind::Int { width, signed: true })
    }

    pub fn uint(width: u8) -> Self {
        Self::new(TypeKind::Int { width, signed: false })
    }

    pub fn int8() -> Self {
        Self::int(8)
    }

    pub fn int16() -> Self {
        Self::int(16)
    }

    pub fn int32() -> Self {
        Self::int(32)
    }

    pub fn int64() -> Self {
        Self::int(64)
    }

    pub fn float32() -> Self {
        Self::new(TypeKind::Float { width: 32 })
    }

    pub fn float64() -> Self {
        Self::new(TypeKind::Float { width: 64 })
    }

    /// Decimal with `0 <= scale <= precision <= MAX_DECIMAL_PRECISION`.
    pub fn decimal(precision: u8, scale: u8) -> Result<Self> {
        if precision == 0 || scale > precision || precision > MAX_DECIMAL_PRECISION {
            return Err(Error::Type(format!(
                "invalid decimal precision/scale ({precision}, {scale})"
            )));
        }
        Ok(Self::new(TypeKind::Decimal { precision, scale }))
    }

    pub fn string() -> Self {
        Self::new(TypeKind::String)
    }

    pub fn binary() -> Self {
        Self::new(TypeKind::Binary)
    }

    pub fn date() -> Self {
        Self::new(TypeKind::Date)
    }

    pub fn time() -> Self {
        Self::new(TypeKind::Time)
    }

    /// Naive timestamp with the backend's default sub-second scale.
    pub fn timestamp() -> Self {
        Self::new(TypeKind::Timestamp {
            timezone: None,
            scale: None,
        })
    }

    pub fn timestamp_with(timezone: Option<&str>, scale: Option<u8>) -> Self {
        Self::new(TypeKind::Timestamp {
            timezone: timezone.map(str::to_string),
            scale,
        })
    }

    pub fn interval(unit: IntervalUnit) -> Self {
        Self::new(TypeKind::Interval { unit })
    }

    pub fn array(element: DataType) -> Self {
        Self::new(TypeKind::Array(Box::new(element)))
    }

    pub fn map(key: DataType, value: DataType) -> Self {
        Self::new(TypeKind::Map {
            key: Box::new(key),
            value: Box::new(value),
        })
    }

    pub fn structure(fields: Vec<Field>) -> Result<Self> {
        ensure_unique(fields.iter().map(|f| f.name.as_str()))?;
        Ok(Self::new(TypeKind::Struct(fields)))
    }

    pub fn json() -> Self {
        Self::new(TypeKind::Json)
    }

    pub fn enumeration() -> Self {
        Self::new(TypeKind::Enum)
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn not_null(self) -> Self {
        self.with_nullable(false)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, TypeKind::Null)
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self.kind, TypeKind::Boolean)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.kind, TypeKind::Int { .. })
    }

    pub fn is_floating(&self) -> bool {
        matches!(self.kind, TypeKind::Float { .. })
    }

    pub fn is_decimal(&self) -> bool {
        matches!(self.kind, TypeKind::Decimal { .. })
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_floating() || self.is_decimal()
    }

    pub fn is_string(&self) -> bool {
        matches!(self.kind, TypeKind::String)
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self.kind, TypeKind::Timestamp { .. })
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Date | TypeKind::Time | TypeKind::Timestamp { .. }
        )
    }

    pub fn is_interval(&self) -> bool {
        matches!(self.kind, TypeKind::Interval { .. })
    }

    /// Compare shapes while ignoring nullability at every level.
    pub fn same_kind(&self, other: &DataType) -> bool {
        self.clone().erase_nullability() == other.clone().erase_nullability()
    }

    fn erase_nullability(mut self) -> Self {
        self.nullable = true;
        self.kind = match self.kind {
            TypeKind::Array(e) => TypeKind::Array(Box::new(e.erase_nullability())),
            TypeKind::Map { key, value } => TypeKind::Map {
                key: Box::new(key.erase_nullability()),
                value: Box::new(value.erase_nullability()),
            },
            TypeKind::Struct(fields) => TypeKind::Struct(
                fields
                    .into_iter()
                    .map(|f| Field::new(f.name, f.data_type.erase_nullability()))
                    .collect(),
            ),
            other => other,
        };
        self
    }

    /// Smallest type both operands convert to without loss.
    ///
    /// Integers widen along the 8/16/32/64 ladder, signed/unsigned mixes
    /// pick a signed type wide enough for both, integers mixed with floats
    /// become `Float64`, floats widen to the widest operand.
    pub fn common_supertype(&self, other: &DataType) -> Result<DataType> {
        let nullable = self.nullable || other.nullable;
        let kind = match (&self.kind, &other.kind) {
            (TypeKind::Null, _) => return Ok(other.clone().with_nullable(true)),
            (_, TypeKind::Null) => return Ok(self.clone().with_nullable(true)),
            (a, b) if a == b => a.clone(),
            (
                TypeKind::Int { width: w1, signed: s1 },
                TypeKind::Int { width: w2, signed: s2 },
            ) => {
                if s1 == s2 {
                    TypeKind::Int {
                        width: (*w1).max(*w2),
                        signed: *s1,
                    }
                } else {
                    let (sw, uw) = if *s1 { (*w1, *w2) } else { (*w2, *w1) };
                    if uw >= 64 {
                        return Err(Error::Type(format!(
                            "no signed integer can hold both {self} and {other}"
                        )));
                    }
                    TypeKind::Int {
                        width: sw.max(uw * 2),
                        signed: true,
                    }
                }
            }
            (TypeKind::Float { width: w1 }, TypeKind::Float { width: w2 }) => TypeKind::Float {
                width: (*w1).max(*w2),
            },
            (TypeKind::Int { .. }, TypeKind::Float { .. })
            | (TypeKind::Float { .. }, TypeKind::Int { .. }) => TypeKind::Float { width: 64 },
            (
                TypeKind::Decimal { precision: p1, scale: s1 },
                TypeKind::Decimal { precision: p2, scale: s2 },
            ) => {
                let scale = (*s1).max(*s2);
                let integral = (p1 - s1).max(p2 - s2);
                let precision = (integral + scale).min(MAX_DECIMAL_PRECISION);
                TypeKind::Decimal { precision, scale }
            }
            (TypeKind::Decimal { precision, scale }, TypeKind::Int { width, .. })
            | (TypeKind::Int { width, .. }, TypeKind::Decimal { precision, scale }) => {
                let digits = integer_digits(*width);
                let precision = (precision - scale).max(digits) + scale;
                TypeKind::Decimal {
                    precision: precision.min(MAX_DECIMAL_PRECISION),
                    scale: *scale,
                }
            }
            (TypeKind::Array(a), TypeKind::Array(b)) => {
                TypeKind::Array(Box::new(a.common_supertype(b)?))
            }
            (TypeKind::Map { key: k1, value: v1 }, TypeKind::Map { key: k2, value: v2 }) => {
                TypeKind::Map {
                    key: Box::new(k1.common_supertype(k2)?),
                    value: Box::new(v1.common_supertype(v2)?),
                }
            }
            _ if self.same_kind(other) => self.kind.clone(),
            _ => {
                return Err(Error::Type(format!(
                    "{self} and {other} have no common supertype"
                )))
            }
        };
        Ok(DataType { kind, nullable })
    }

    /// Whether a value of `self` can be cast to `to`.
    pub fn can_cast_to(&self, to: &DataType) -> bool {
        use TypeKind::*;
        match (&self.kind, &to.kind) {
            (Null, _) => true,
            (_, String) => true,
            (a, b) if a == b => true,
            (Boolean, Int { .. }) | (Int { .. }, Boolean) => true,
            (Int { .. } | Float { .. } | Decimal { .. }, Int { .. } | Float { .. } | Decimal { .. }) => {
                true
            }
            (String, Boolean | Int { .. } | Float { .. } | Decimal { .. } | Date | Time | Timestamp { .. } | Json | Binary) => true,
            (Date, Timestamp { .. }) | (Timestamp { .. }, Date) => true,
            (Timestamp { .. }, Timestamp { .. }) => true,
            (Timestamp { .. }, Time) => true,
            (Int { .. }, Interval { .. }) => true,
            (Json, _) => true,
            (Array(a), Array(b)) => a.can_cast_to(b),
            _ => false,
        }
    }

    /// Whether `self` converts to `to` and back without losing information.
    pub fn widens_losslessly_to(&self, to: &DataType) -> bool {
        match (&self.kind, &to.kind) {
            (a, b) if a == b => true,
            (TypeKind::Int { width: w1, signed: s1 }, TypeKind::Int { width: w2, signed: s2 }) => {
                (s1 == s2 && w1 <= w2) || (!s1 && *s2 && w1 < w2)
            }
            (TypeKind::Float { width: w1 }, TypeKind::Float { width: w2 }) => w1 <= w2,
            (TypeKind::Int { width, .. }, TypeKind::Float { width: 64 }) => *width <= 32,
            (TypeKind::Int { width, .. }, TypeKind::Decimal { precision, scale }) => {
                integer_digits(*width) <= precision - scale
            }
            (
                TypeKind::Decimal { precision: p1, scale: s1 },
                TypeKind::Decimal { precision: p2, scale: s2 },
            ) => s1 <= s2 && (p1 - s1) <= (p2 - s2),
            (TypeKind::Date, TypeKind::Timestamp { timezone: None, .. }) => true,
            _ => false,
        }
    }
}

/// Decimal digits needed for any integer of the given bit width.
fn integer_digits(width: u8) -> u8 {
    match width {
        8 => 3,
        16 => 5,
        32 => 10,
        _ => 20,
    }
}

pub(crate) fn ensure_unique<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(Error::Invariant(format!("duplicate field name '{name}'")));
        }
    }
    Ok(())
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.nullable {
            write!(f, "!")?;
        }
        match &self.kind {
            TypeKind::Null => write!(f, "null"),
            TypeKind::Boolean => write!(f, "boolean"),
            TypeKind::Int { width, signed: true } => write!(f, "int{width}"),
            TypeKind::Int { width, signed: false } => write!(f, "uint{width}"),
            TypeKind::Float { width } => write!(f, "float{width}"),
            TypeKind::Decimal { precision, scale } => write!(f, "decimal({precision}, {scale})"),
            TypeKind::String => write!(f, "string"),
            TypeKind::Binary => write!(f, "binary"),
            TypeKind::Date => write!(f, "date"),
            TypeKind::Time => write!(f, "time"),
            TypeKind::Timestamp { timezone, scale } => {
                write!(f, "timestamp")?;
                match (timezone, scale) {
                    (None, None) => Ok(()),
                    (Some(tz), None) => write!(f, "('{tz}')"),
                    (None, Some(s)) => write!(f, "({s})"),
                    (Some(tz), Some(s)) => write!(f, "('{tz}', {s})"),
                }
            }
            TypeKind::Interval { unit } => write!(f, "interval('{}')", unit.short_name()),
            TypeKind::Array(element) => write!(f, "array<{element}>"),
            TypeKind::Map { key, value } => write!(f, "map<{key}, {value}>"),
            TypeKind::Struct(fields) => {
                write!(f, "struct<")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.data_type)?;
                }
                write!(f, ">")
            }
            TypeKind::Json => write!(f, "json"),
            TypeKind::Enum => write!(f, "enum"),
        }
    }
}

/// Ordered sequence of uniquely named fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        ensure_unique(fields.iter().map(|f| f.name.as_str()))?;
        Ok(Self { fields })
    }

    pub fn from_pairs<N: Into<String>>(pairs: impl IntoIterator<Item = (N, DataType)>) -> Result<Self> {
        Self::new(
            pairs
                .into_iter()
                .map(|(name, dtype)| Field::new(name, dtype))
                .collect(),
        )
    }

    pub fn find_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Join output: left fields followed by right fields; right names that
    /// collide with a left name get a `_right` suffix.
    pub fn join(&self, right: &Schema) -> Result<Schema> {
        let mut fields = self.fields.clone();
        for field in &right.fields {
            let name = if self.find_field(&field.name).is_some() {
                format!("{}_right", field.name)
            } else {
                field.name.clone()
            };
            fields.push(Field::new(name, field.data_type.clone()));
        }
        Schema::new(fields)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", field.name, field.data_type)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        assert_eq!(DataType::array(DataType::int32()), DataType::array(DataType::int32()));
        assert_ne!(DataType::int32(), DataType::int32().not_null());
    }

    #[test]
    fn test_decimal_bounds() {
        assert!(DataType::decimal(10, 2).is_ok());
        assert!(DataType::decimal(2, 3).is_err());
        assert!(DataType::decimal(0, 0).is_err());
        assert!(DataType::decimal(77, 0).is_err());
    }

    #[test]
    fn test_common_supertype_ladder() {
        let t = DataType::int8().common_supertype(&DataType::int32()).unwrap();
        assert_eq!(t, DataType::int32());

        let t = DataType::int8().common_supertype(&DataType::uint(8)).unwrap();
        assert_eq!(t, DataType::int16());

        assert!(DataType::int8().common_supertype(&DataType::uint(64)).is_err());

        let t = DataType::float32().common_supertype(&DataType::float64()).unwrap();
        assert_eq!(t, DataType::float64());

        let t = DataType::int64().common_supertype(&DataType::float32()).unwrap();
        assert_eq!(t, DataType::float64());

        assert!(DataType::string().common_supertype(&DataType::int8()).is_err());
    }

    #[test]
    fn test_null_is_absorbed() {
        let t = DataType::null().common_supertype(&DataType::string().not_null()).unwrap();
        assert_eq!(t, DataType::string());
    }

    #[test]
    fn test_lossless_widening() {
        assert!(DataType::int32().widens_losslessly_to(&DataType::int64()));
        assert!(!DataType::int64().widens_losslessly_to(&DataType::int32()));
        assert!(DataType::uint(32).widens_losslessly_to(&DataType::int64()));
        assert!(!DataType::uint(64).widens_losslessly_to(&DataType::int64()));
        assert!(!DataType::int64().widens_losslessly_to(&DataType::float64()));
    }

    #[test]
    fn test_join_schema_suffixes_collisions() {
        let left = Schema::from_pairs([("a", DataType::int32()), ("b", DataType::string())]).unwrap();
        let right = Schema::from_pairs([("a", DataType::int32()), ("c", DataType::date())]).unwrap();
        let joined = left.join(&right).unwrap();
        assert_eq!(joined.names().collect::<Vec<_>>(), vec!["a", "b", "a_right", "c"]);
    }

    #[test]
    fn test_schema_rejects_duplicates() {
        let err = Schema::from_pairs([("a", DataType::int32()), ("a", DataType::string())]);
        assert!(matches!(err, Err(Error::Invariant(_))));
    }

    #[test]
    fn test_display() {
        let t = DataType::map(DataType::string(), DataType::array(DataType::int64().not_null()));
        assert_eq!(t.to_string(), "map<string, array<!int64>>");
        assert_eq!(DataType::timestamp_with(Some("UTC"), Some(3)).to_string(), "timestamp('UTC', 3)");
    }
}
