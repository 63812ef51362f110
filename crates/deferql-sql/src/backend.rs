//! SQL backend: one per dialect

use crate::ast::{Expr, Query, Relation, Sql};
use crate::dialect::Dialect;
use crate::ops::SqlRegistry;
use crate::types::SqlTypes;
use deferql_compile::{Backend, BackendPolicy, Cx, Handle};
use deferql_ir::{BinaryOp, Error, Graph, NodeId, Result, Value};

#[derive(Debug, Clone)]
pub struct SqlBackend {
    dialect: Dialect,
    registry: SqlRegistry,
    types: SqlTypes,
    policy: BackendPolicy,
}

impl SqlBackend {
    /// Backend for `dialect` with the dialect's default policy.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            registry: dialect.registry(),
            types: SqlTypes::new(dialect),
            policy: dialect.default_policy(),
        }
    }

    pub fn duckdb() -> Self {
        Self::new(Dialect::DuckDb)
    }

    pub fn mysql() -> Self {
        Self::new(Dialect::MySql)
    }

    pub fn snowflake() -> Self {
        Self::new(Dialect::Snowflake)
    }

    pub fn with_policy(mut self, policy: BackendPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
}

impl Backend for SqlBackend {
    type Fragment = Sql;
    type Types = SqlTypes;
    type State = ();

    fn name(&self) -> &str {
        self.dialect.name()
    }

    fn registry(&self) -> &SqlRegistry {
        &self.registry
    }

    fn types(&self) -> &SqlTypes {
        &self.types
    }

    fn policy(&self) -> &BackendPolicy {
        &self.policy
    }

    /// Hoists the relation into a `WITH sN AS (..)` clause.
    fn share(cx: &mut Cx<Self>, _: &Graph, id: NodeId, fragment: Sql) -> Result<Sql> {
        let name = format!("s{}", cx.shared().len());
        let rel = fragment.into_rel()?;
        tracing::trace!(%id, name, "Hoisting shared relation");
        cx.push_shared(name.clone(), id, Sql::Rel(rel));
        Ok(Sql::Rel(Relation::Named(name)))
    }

    fn materialized(_: &mut Cx<Self>, _: &Graph, _: NodeId, handle: &Handle<Sql>) -> Result<Sql> {
        Ok(Sql::Rel(Relation::Named(handle.name.clone())))
    }

    fn restrict_time(
        _: &mut Cx<Self>,
        graph: &Graph,
        id: NodeId,
        fragment: Sql,
        column: &str,
        bounds: (Value, Value),
    ) -> Result<Sql> {
        let dtype = graph
            .schema(id)?
            .find_field(column)
            .map(|f| f.data_type.clone().not_null())
            .ok_or_else(|| Error::Invariant(format!("{id} has no column '{column}'")))?;
        let (start, end) = bounds;
        let mut query = Query::scan(id, fragment.into_rel()?);
        query.filter = vec![
            Expr::binary(
                BinaryOp::Ge,
                Expr::column(id, column),
                Expr::literal(start, dtype.clone()),
            ),
            Expr::binary(BinaryOp::Lt, Expr::column(id, column), Expr::literal(end, dtype)),
        ];
        Ok(Sql::Rel(query.into_rel()))
    }
}
