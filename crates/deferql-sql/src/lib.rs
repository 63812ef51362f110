//! SQL backends for deferql
//!
//! Compiles operation graphs into a SQL fragment tree ([`ast`]) through a
//! layered operation registry: [`ops::baseline`] holds the translations every
//! dialect shares and each [`Dialect`] overrides its quirks on top. The
//! finished [`NativeProgram`] renders to statement text with [`to_sql`].
//!
//! ```ignore
//! let session = Session::new(SqlBackend::duckdb());
//! let program = session.compile(&graph, root, &Params::new(), None)?;
//! let sql = deferql_sql::to_sql(&program, Dialect::DuckDb)?;
//! ```
//!
//! [`NativeProgram`]: deferql_compile::NativeProgram

pub mod ast;
pub mod backend;
pub mod dialect;
pub mod ops;
pub mod render;
pub mod types;

pub use ast::{Expr, Query, Relation, Sql};
pub use backend::SqlBackend;
pub use dialect::Dialect;
pub use render::{expr_to_sql, to_sql};
pub use types::{SqlType, SqlTypes};
