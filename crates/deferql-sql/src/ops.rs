//! Baseline translations shared by every SQL dialect
//!
//! Each rule receives its children already translated, in
//! [`deferql_ir::Op::children`] order. Dialects layer their quirks over
//! [`baseline`] in `crate::dialect`.

use crate::ast::{Expr, FromClause, OrderBy, Query, Relation, SelectItem, Source, Sql};
use crate::backend::SqlBackend;
use deferql_compile::Cx;
use deferql_ir::{
    AnalyticFunc, BinaryOp, DataType, Error, Graph, JoinKind, NodeId, Op, OpKind, ReductionFunc,
    Result, TimestampUnit, UnaryOp, Value,
};
use deferql_registry::{Registry, TranslateFn};

pub type SqlRegistry = Registry<Cx<SqlBackend>, Sql>;
pub type Rule = TranslateFn<Cx<SqlBackend>, Sql>;

pub fn baseline() -> SqlRegistry {
    Registry::new("sql")
        .with(OpKind::Table, table as Rule)
        .with(OpKind::InMemory, in_memory)
        .with(OpKind::Cached, passthrough)
        .with(OpKind::View, passthrough)
        .with(OpKind::Filter, filter)
        .with(OpKind::Project, project)
        .with(OpKind::Join, join)
        .with(OpKind::Aggregate, aggregate)
        .with(OpKind::Sort, sort)
        .with(OpKind::Limit, limit)
        .with(OpKind::Literal, literal)
        .with(OpKind::Param, param)
        .with(OpKind::Column, column)
        .with(OpKind::Cast, cast)
        .with(OpKind::Binary, binary)
        .with(OpKind::Unary, unary)
        .with(OpKind::Reduction, reduction)
        .with(OpKind::Analytic, analytic)
        .with(OpKind::Window, window)
        .with(OpKind::IntegerToTimestamp, integer_to_timestamp)
}

fn mismatch(graph: &Graph, id: NodeId, expected: OpKind) -> Error {
    let found = graph.op(id).map(|op| op.kind().to_string()).unwrap_or_default();
    Error::Invariant(format!("{id} dispatched as {expected} but is {found}"))
}

/// Splits translated children into the leading relation and the
/// expressions after it.
fn relation_and_exprs(children: Vec<Sql>) -> Result<(Relation, Vec<Expr>)> {
    let mut children = children.into_iter();
    let rel = children
        .next()
        .ok_or_else(|| Error::Invariant("relational operation without an input".to_string()))?
        .into_rel()?;
    let exprs = children.map(Sql::into_expr).collect::<Result<_>>()?;
    Ok((rel, exprs))
}

fn single_expr(children: Vec<Sql>) -> Result<Expr> {
    let mut children = children.into_iter();
    match (children.next(), children.next()) {
        (Some(child), None) => child.into_expr(),
        _ => Err(Error::Invariant("expected exactly one argument".to_string())),
    }
}

fn items(names: impl IntoIterator<Item = String>, exprs: impl IntoIterator<Item = Expr>) -> Vec<SelectItem> {
    names
        .into_iter()
        .zip(exprs)
        .map(|(name, expr)| SelectItem {
            expr,
            alias: Some(name),
        })
        .collect()
}

// Relations

pub fn table(_: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, _: Vec<Sql>) -> Result<Sql> {
    let Op::Table { name, .. } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Table));
    };
    Ok(Sql::Rel(Relation::Named(name.clone())))
}

/// Staged rows are registered with the program and referenced by name,
/// never inlined into the statement.
pub fn in_memory(cx: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, _: Vec<Sql>) -> Result<Sql> {
    let Op::InMemory { name, schema, rows } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::InMemory));
    };
    for field in &schema.fields {
        cx.native_type(&field.data_type)?;
    }
    cx.register_memtable(name, schema, rows);
    Ok(Sql::Rel(Relation::Named(name.clone())))
}

/// Views and not-yet-materialized cache entries are their input; the
/// consumer aliases them after their own node.
pub fn passthrough(_: &mut Cx<SqlBackend>, _: &Graph, _: NodeId, children: Vec<Sql>) -> Result<Sql> {
    children
        .into_iter()
        .next()
        .ok_or_else(|| Error::Invariant("pass-through relation without an input".to_string()))
}

pub fn filter(_: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<Sql> {
    let Op::Filter { table, .. } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Filter));
    };
    let (rel, predicates) = relation_and_exprs(children)?;
    let mut query = Query::scan(*table, rel);
    query.filter = predicates;
    Ok(Sql::Rel(query.into_rel()))
}

pub fn project(_: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<Sql> {
    let Op::Project { table, columns } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Project));
    };
    let (rel, exprs) = relation_and_exprs(children)?;
    let mut query = Query::scan(*table, rel);
    query.select = items(columns.iter().map(|(name, _)| name.clone()), exprs);
    Ok(Sql::Rel(query.into_rel()))
}

pub fn join(_: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<Sql> {
    let Op::Join {
        kind, left, right, ..
    } = graph.op(id)?
    else {
        return Err(mismatch(graph, id, OpKind::Join));
    };
    let mut children = children.into_iter();
    let mut next_rel = || -> Result<Relation> {
        children
            .next()
            .ok_or_else(|| Error::Invariant(format!("join {id} is missing an input")))?
            .into_rel()
    };
    let left_rel = next_rel()?;
    let right_rel = next_rel()?;
    let on = children.map(Sql::into_expr).collect::<Result<Vec<_>>>()?;

    let left_source = Source::new(*left, left_rel);
    let right_source = Source::new(*right, right_rel);

    if matches!(kind, JoinKind::Semi | JoinKind::Anti) {
        let mut correlated = Query::new(FromClause::Source(right_source));
        correlated.select = vec![SelectItem {
            expr: Expr::literal(Value::Int(1), DataType::int8()),
            alias: None,
        }];
        correlated.filter = on;
        let mut query = Query::new(FromClause::Source(left_source));
        query.select = vec![SelectItem {
            expr: Expr::Wildcard {
                qualifier: crate::ast::alias(*left),
            },
            alias: None,
        }];
        query.filter = vec![Expr::Exists {
            negated: *kind == JoinKind::Anti,
            query: Box::new(correlated),
        }];
        return Ok(Sql::Rel(query.into_rel()));
    }

    // Output names already carry the suffixes that resolve collisions.
    let output = graph.schema(id)?;
    let left_schema = graph.schema(*left)?;
    let right_schema = graph.schema(*right)?;
    let inputs = left_schema
        .fields
        .iter()
        .map(|f| Expr::column(*left, f.name.clone()))
        .chain(right_schema.fields.iter().map(|f| Expr::column(*right, f.name.clone())));

    let mut query = Query::new(FromClause::Join {
        kind: *kind,
        left: left_source,
        right: right_source,
        on,
    });
    query.select = items(output.names().map(str::to_string), inputs);
    Ok(Sql::Rel(query.into_rel()))
}

pub fn aggregate(_: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<Sql> {
    let Op::Aggregate { table, by, metrics } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Aggregate));
    };
    let (rel, exprs) = relation_and_exprs(children)?;
    let group_by: Vec<Expr> = exprs.iter().take(by.len()).cloned().collect();
    let names = by.iter().chain(metrics).map(|(name, _)| name.clone());

    let mut query = Query::scan(*table, rel);
    query.select = items(names, exprs);
    query.group_by = group_by;
    Ok(Sql::Rel(query.into_rel()))
}

pub fn sort(_: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<Sql> {
    let Op::Sort { table, keys } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Sort));
    };
    let (rel, exprs) = relation_and_exprs(children)?;
    let mut query = Query::scan(*table, rel);
    query.order_by = keys
        .iter()
        .zip(exprs)
        .map(|(key, expr)| OrderBy {
            expr,
            descending: key.descending,
        })
        .collect();
    Ok(Sql::Rel(query.into_rel()))
}

/// Folds into the input query when it has no limit of its own, so the
/// input's ordering stays attached to it.
pub fn limit(_: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<Sql> {
    let Op::Limit { table, n, offset } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Limit));
    };
    let (rel, _) = relation_and_exprs(children)?;
    let mut query = match rel {
        Relation::Query(query) if query.limit.is_none() && query.offset == 0 => *query,
        rel => Query::scan(*table, rel),
    };
    query.limit = Some(*n);
    query.offset = *offset;
    Ok(Sql::Rel(query.into_rel()))
}

// Values

/// Literals must be representable; untyped nulls pass as-is.
pub fn literal(cx: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, _: Vec<Sql>) -> Result<Sql> {
    let Op::Literal { value, dtype } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Literal));
    };
    if !dtype.is_null() {
        cx.native_type(dtype)?;
    }
    Ok(Sql::Expr(Expr::literal(value.clone(), dtype.clone())))
}

pub fn param(cx: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, _: Vec<Sql>) -> Result<Sql> {
    let Op::Param { dtype, .. } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Param));
    };
    let value = cx.param(graph, id)?;
    cx.native_type(dtype)?;
    Ok(Sql::Expr(Expr::literal(value, dtype.clone())))
}

pub fn column(_: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, _: Vec<Sql>) -> Result<Sql> {
    let Op::Column { table, name } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Column));
    };
    Ok(Sql::Expr(Expr::column(*table, name.clone())))
}

pub fn cast(cx: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<Sql> {
    let Op::Cast { to, .. } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Cast));
    };
    Ok(Sql::Expr(Expr::Cast {
        expr: Box::new(single_expr(children)?),
        to: cx.native_type(to)?,
    }))
}

pub fn binary(_: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<Sql> {
    let Op::Binary { op, .. } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Binary));
    };
    let mut children = children.into_iter().map(Sql::into_expr);
    match (children.next(), children.next()) {
        (Some(left), Some(right)) => Ok(Sql::Expr(Expr::binary(*op, left?, right?))),
        _ => Err(Error::Invariant(format!("binary {id} needs two operands"))),
    }
}

/// Under `nan_as_null`, null checks on floating operands also match NaN
/// where the engine can hold NaN at all.
pub fn unary(cx: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<Sql> {
    let Op::Unary { op, arg } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Unary));
    };
    let expr = single_expr(children)?;
    let nan_check = match op {
        UnaryOp::IsNull | UnaryOp::NotNull
            if cx.policy().nan_as_null && graph.dtype(*arg)?.is_floating() =>
        {
            cx.backend().dialect().nan_check(expr.clone())
        }
        _ => None,
    };
    let null_check = Expr::Unary {
        op: *op,
        expr: Box::new(expr),
    };
    Ok(Sql::Expr(match (op, nan_check) {
        (UnaryOp::IsNull, Some(nan)) => Expr::binary(BinaryOp::Or, null_check, nan),
        (UnaryOp::NotNull, Some(nan)) => Expr::binary(
            BinaryOp::And,
            null_check,
            Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(nan),
            },
        ),
        _ => null_check,
    }))
}

/// Aggregate call with its `FILTER (WHERE ..)` clause still attached.
pub fn aggregate_call(graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<(ReductionFunc, Expr)> {
    let Op::Reduction { func, arg, filter } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Reduction));
    };
    let mut children = children.into_iter().map(Sql::into_expr);
    let arg = match arg {
        Some(_) => Some(children.next().transpose()?.ok_or_else(|| {
            Error::Invariant(format!("reduction {id} is missing its argument"))
        })?),
        None => None,
    };
    let filter = match filter {
        Some(_) => Some(Box::new(children.next().transpose()?.ok_or_else(|| {
            Error::Invariant(format!("reduction {id} is missing its filter"))
        })?)),
        None => None,
    };
    let (name, distinct) = match func {
        ReductionFunc::Count | ReductionFunc::CountDistinct => ("count", *func == ReductionFunc::CountDistinct),
        ReductionFunc::ApproxCountDistinct => ("approx_count_distinct", false),
        ReductionFunc::Sum => ("sum", false),
        ReductionFunc::Mean => ("avg", false),
        ReductionFunc::Min => ("min", false),
        ReductionFunc::Max => ("max", false),
    };
    Ok((
        *func,
        Expr::Aggregate {
            name: name.to_string(),
            args: arg.into_iter().collect(),
            distinct,
            filter,
        },
    ))
}

/// `agg(x) FILTER (WHERE p)` as `agg(CASE WHEN p THEN x END)`, for engines
/// without aggregate filters.
pub fn filter_as_case(expr: Expr) -> Expr {
    match expr {
        Expr::Aggregate {
            name,
            args,
            distinct,
            filter: Some(filter),
        } => {
            let value = args
                .into_iter()
                .next()
                .unwrap_or_else(|| Expr::literal(Value::Int(1), DataType::int8()));
            Expr::Aggregate {
                name,
                args: vec![Expr::Case {
                    when: vec![(*filter, value)],
                    otherwise: None,
                }],
                distinct,
                filter: None,
            }
        }
        other => other,
    }
}

pub fn reduction(_: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<Sql> {
    let (_, call) = aggregate_call(graph, id, children)?;
    Ok(Sql::Expr(call))
}

pub fn analytic(_: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<Sql> {
    let Op::Analytic { func, .. } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Analytic));
    };
    let mut args = children.into_iter().map(Sql::into_expr).collect::<Result<Vec<_>>>()?;
    let name = match func {
        AnalyticFunc::RowNumber => "row_number",
        AnalyticFunc::Rank => "rank",
        AnalyticFunc::DenseRank => "dense_rank",
        AnalyticFunc::Lag { offset } | AnalyticFunc::Lead { offset } => {
            args.push(Expr::literal(Value::Int(i64::from(*offset)), DataType::int64()));
            if matches!(func, AnalyticFunc::Lag { .. }) {
                "lag"
            } else {
                "lead"
            }
        }
    };
    Ok(Sql::Expr(Expr::function(name, args)))
}

pub fn window(_: &mut Cx<SqlBackend>, graph: &Graph, id: NodeId, children: Vec<Sql>) -> Result<Sql> {
    let Op::Window {
        partition_by,
        order_by,
        frame,
        ..
    } = graph.op(id)?
    else {
        return Err(mismatch(graph, id, OpKind::Window));
    };
    let mut exprs = children.into_iter().map(Sql::into_expr);
    let func = exprs
        .next()
        .ok_or_else(|| Error::Invariant(format!("window {id} has no function")))??;
    let exprs = exprs.collect::<Result<Vec<_>>>()?;
    let (partition, order) = exprs.split_at(partition_by.len().min(exprs.len()));
    Ok(Sql::Expr(Expr::Window {
        func: Box::new(func),
        partition_by: partition.to_vec(),
        order_by: order_by
            .iter()
            .zip(order.iter().cloned())
            .map(|(key, expr)| OrderBy {
                expr,
                descending: key.descending,
            })
            .collect(),
        frame: *frame,
    }))
}

pub fn timestamp_unit(graph: &Graph, id: NodeId) -> Result<TimestampUnit> {
    match graph.op(id)? {
        Op::IntegerToTimestamp { unit, .. } => Ok(*unit),
        _ => Err(mismatch(graph, id, OpKind::IntegerToTimestamp)),
    }
}

/// DuckDB's epoch conversions.
pub fn integer_to_timestamp(
    _: &mut Cx<SqlBackend>,
    graph: &Graph,
    id: NodeId,
    children: Vec<Sql>,
) -> Result<Sql> {
    let arg = single_expr(children)?;
    // to_timestamp yields TIMESTAMPTZ; these stay naive
    Ok(Sql::Expr(match timestamp_unit(graph, id)? {
        TimestampUnit::Seconds => {
            let micros = Value::Int(1_000_000);
            let scaled = Expr::binary(BinaryOp::Mul, arg, Expr::literal(micros, DataType::int64()));
            Expr::function("make_timestamp", vec![scaled])
        }
        TimestampUnit::Millis => Expr::function("epoch_ms", vec![arg]),
        TimestampUnit::Micros => Expr::function("make_timestamp", vec![arg]),
    }))
}
