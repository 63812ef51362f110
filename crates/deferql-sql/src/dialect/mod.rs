//! SQL dialects
//!
//! A dialect selects the operation registry, the native type vocabulary and
//! the surface syntax the renderer emits.

pub mod duckdb;
pub mod mysql;
pub mod snowflake;

use crate::ast::Expr;
use crate::ops::SqlRegistry;
use deferql_compile::BackendPolicy;
use deferql_ir::{BinaryOp, DataType, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    DuckDb,
    MySql,
    Snowflake,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::DuckDb => "duckdb",
            Dialect::MySql => "mysql",
            Dialect::Snowflake => "snowflake",
        }
    }

    pub fn registry(self) -> SqlRegistry {
        match self {
            Dialect::DuckDb => duckdb::registry(),
            Dialect::MySql => mysql::registry(),
            Dialect::Snowflake => snowflake::registry(),
        }
    }

    /// MySQL `DATETIME` columns hold session-local wall-clock time; the
    /// others keep naive and zoned timestamps apart and reject ambiguity.
    pub fn default_policy(self) -> BackendPolicy {
        match self {
            Dialect::MySql => BackendPolicy::session_local("UTC"),
            Dialect::DuckDb | Dialect::Snowflake => BackendPolicy::default(),
        }
    }

    pub fn quote_ident(self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
            Dialect::DuckDb | Dialect::Snowflake => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Predicate matching NaN, when the engine can store NaN at all.
    pub fn nan_check(self, expr: Expr) -> Option<Expr> {
        match self {
            Dialect::DuckDb => Some(Expr::function("isnan", vec![expr])),
            Dialect::Snowflake => Some(Expr::binary(
                BinaryOp::Eq,
                expr,
                Expr::literal(Value::Float(f64::NAN), DataType::float64()),
            )),
            Dialect::MySql => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Dialect {
    type Err = deferql_ir::Error;

    fn from_str(s: &str) -> deferql_ir::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "duckdb" => Ok(Dialect::DuckDb),
            "mysql" => Ok(Dialect::MySql),
            "snowflake" => Ok(Dialect::Snowflake),
            other => Err(deferql_ir::Error::NotFound(format!("SQL dialect '{other}'"))),
        }
    }
}
