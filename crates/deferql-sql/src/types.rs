//! Native column types across the SQL dialects

use crate::dialect::{duckdb, mysql, snowflake, Dialect};
use deferql_compile::types::lossy_fallback;
use deferql_compile::TypeMapper;
use deferql_ir::{DataType, Error, Result};
use std::fmt;

pub use duckdb::DuckType;
pub use mysql::MySqlType;
pub use snowflake::SnowflakeType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    DuckDb(DuckType),
    MySql(MySqlType),
    Snowflake(SnowflakeType),
}

impl SqlType {
    /// Spelling inside `CAST(.. AS ..)`.
    pub fn cast_target(&self) -> String {
        match self {
            SqlType::MySql(ty) => ty.cast_target(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::DuckDb(ty) => ty.fmt(f),
            SqlType::MySql(ty) => ty.fmt(f),
            SqlType::Snowflake(ty) => ty.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlTypes {
    dialect: Dialect,
}

impl SqlTypes {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }
}

impl TypeMapper for SqlTypes {
    type Native = SqlType;

    fn backend(&self) -> &str {
        self.dialect.name()
    }

    fn to_native(&self, dtype: &DataType) -> Result<SqlType> {
        Ok(match self.dialect {
            Dialect::DuckDb => SqlType::DuckDb(duckdb::to_native(dtype)?),
            Dialect::MySql => SqlType::MySql(mysql::to_native(dtype)?),
            Dialect::Snowflake => SqlType::Snowflake(snowflake::to_native(dtype)?),
        })
    }

    fn from_native(&self, native: &SqlType, nullable: bool) -> Result<DataType> {
        match (self.dialect, native) {
            (Dialect::DuckDb, SqlType::DuckDb(ty)) => duckdb::from_native(ty, nullable),
            (Dialect::MySql, SqlType::MySql(ty)) => mysql::from_native(ty, nullable),
            (Dialect::Snowflake, SqlType::Snowflake(ty)) => snowflake::from_native(ty, nullable),
            (dialect, other) => Err(Error::Invariant(format!(
                "{dialect} cannot read back native type {other:?}"
            ))),
        }
    }

    fn fallback(&self, dtype: &DataType) -> Option<(DataType, &'static str)> {
        match self.dialect {
            Dialect::Snowflake => snowflake::fallback(dtype),
            Dialect::DuckDb | Dialect::MySql => lossy_fallback(dtype),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deferql_compile::BackendPolicy;

    #[test]
    fn test_dialect_dispatch() {
        let int = DataType::int32();
        assert_eq!(SqlTypes::new(Dialect::DuckDb).to_native(&int).unwrap().to_string(), "INTEGER");
        assert_eq!(SqlTypes::new(Dialect::MySql).to_native(&int).unwrap().to_string(), "INT");
        assert_eq!(SqlTypes::new(Dialect::Snowflake).to_native(&int).unwrap().to_string(), "INTEGER");
    }

    #[test]
    fn test_foreign_native_rejected() {
        let err = SqlTypes::new(Dialect::MySql)
            .from_native(&SqlType::DuckDb(DuckType::Varchar), true)
            .unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
    }

    #[test]
    fn test_lossy_paths_per_dialect() {
        let lossy = BackendPolicy::default().with_lossy_coercion(true);
        let list = DataType::array(DataType::int64());

        let (native, note) = SqlTypes::new(Dialect::Snowflake).coerce(&list, &lossy).unwrap();
        assert_eq!(native, SqlType::Snowflake(SnowflakeType::Array));
        assert!(note.is_some());

        assert!(SqlTypes::new(Dialect::MySql).coerce(&list, &lossy).is_err());

        let (native, _) = SqlTypes::new(Dialect::MySql)
            .coerce(&DataType::interval(deferql_ir::IntervalUnit::Second), &lossy)
            .unwrap();
        assert_eq!(native, SqlType::MySql(MySqlType::BigInt { unsigned: false }));
    }

    #[test]
    fn test_zero_scale_snowflake_numbers() {
        let types = SqlTypes::new(Dialect::Snowflake);
        let native = types.to_native(&DataType::decimal(38, 0).unwrap()).unwrap();
        let (strict, _) = types.read_back(&native, true, &BackendPolicy::default()).unwrap();
        assert_eq!(strict, DataType::decimal(38, 0).unwrap());

        let policy = BackendPolicy {
            zero_scale_decimal_as_int64: true,
            ..BackendPolicy::default()
        };
        let (as_int, note) = types.read_back(&native, true, &policy).unwrap();
        assert_eq!(as_int, DataType::int64());
        assert!(note.is_some());
    }
}
