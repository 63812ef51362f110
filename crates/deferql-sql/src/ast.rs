//! SQL fragment tree
//!
//! Translation produces these nodes; [`crate::render`] turns a finished
//! program into statement text. Every relation consumed by another is
//! wrapped in a [`Source`] aliased after the consumed node, so a column
//! reference only needs the id of the relation it reads from.

use crate::types::SqlType;
use deferql_ir::{BinaryOp, DataType, Error, FrameSpec, JoinKind, NodeId, Result, UnaryOp, Value};

/// Translation of one node.
#[derive(Debug, Clone, PartialEq)]
pub enum Sql {
    Expr(Expr),
    Rel(Relation),
}

impl Sql {
    pub fn into_expr(self) -> Result<Expr> {
        match self {
            Sql::Expr(expr) => Ok(expr),
            Sql::Rel(rel) => Err(Error::Invariant(format!(
                "expected a value expression, found relation {rel:?}"
            ))),
        }
    }

    pub fn into_rel(self) -> Result<Relation> {
        match self {
            Sql::Rel(rel) => Ok(rel),
            Sql::Expr(expr) => Err(Error::Invariant(format!(
                "expected a relation, found expression {expr:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Relation {
    /// Base table, staged table, materialization or hoisted common table
    /// expression.
    Named(String),
    Query(Box<Query>),
}

/// Alias given to the relation produced by node `id` where it is consumed.
pub fn alias(id: NodeId) -> String {
    format!("t{}", id.index())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub rel: Relation,
    pub alias: String,
}

impl Source {
    pub fn new(id: NodeId, rel: Relation) -> Self {
        Self {
            rel,
            alias: alias(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromClause {
    Source(Source),
    Join {
        kind: JoinKind,
        left: Source,
        right: Source,
        on: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub descending: bool,
}

/// A single `SELECT`.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Empty selects every column.
    pub select: Vec<SelectItem>,
    pub from: FromClause,
    pub filter: Vec<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: u64,
}

impl Query {
    pub fn new(from: FromClause) -> Self {
        Self {
            select: Vec::new(),
            from,
            filter: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    /// `SELECT * FROM <rel> AS t<id>`
    pub fn scan(id: NodeId, rel: Relation) -> Self {
        Self::new(FromClause::Source(Source::new(id, rel)))
    }

    pub fn into_rel(self) -> Relation {
        Relation::Query(Box::new(self))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column {
        qualifier: String,
        name: String,
    },
    Wildcard {
        qualifier: String,
    },
    Literal {
        value: Value,
        dtype: DataType,
    },
    Cast {
        expr: Box<Expr>,
        to: SqlType,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Function {
        name: String,
        args: Vec<Expr>,
    },
    /// Aggregate call; no arguments renders as `name(*)`.
    Aggregate {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
        filter: Option<Box<Expr>>,
    },
    Case {
        when: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
    Window {
        func: Box<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<OrderBy>,
        frame: Option<FrameSpec>,
    },
    Exists {
        negated: bool,
        query: Box<Query>,
    },
}

impl Expr {
    pub fn column(table: NodeId, name: impl Into<String>) -> Self {
        Expr::Column {
            qualifier: alias(table),
            name: name.into(),
        }
    }

    pub fn literal(value: Value, dtype: DataType) -> Self {
        Expr::Literal { value, dtype }
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deferql_ir::Graph;

    #[test]
    fn test_fragment_kinds_checked() {
        let expr = Sql::Expr(Expr::literal(Value::Int(1), DataType::int8()));
        assert!(expr.clone().into_expr().is_ok());
        assert!(matches!(expr.into_rel(), Err(Error::Invariant(_))));

        let rel = Sql::Rel(Relation::Named("t".to_string()));
        assert!(matches!(rel.into_expr(), Err(Error::Invariant(_))));
    }

    #[test]
    fn test_alias_follows_node() {
        let mut g = Graph::new();
        g.literal(1).unwrap();
        let lit = g.literal(2).unwrap();
        assert_eq!(alias(lit), "t1");
        assert_eq!(
            Expr::column(lit, "a"),
            Expr::Column {
                qualifier: "t1".to_string(),
                name: "a".to_string()
            }
        );
    }
}
