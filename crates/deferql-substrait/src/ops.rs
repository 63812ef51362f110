//! Translations into Substrait relations and expressions
//!
//! Each rule receives its children already translated, in
//! [`deferql_ir::Op::children`] order. Expressions stay symbolic until the
//! relation consuming them lowers them against its input layout.

use crate::backend::SubstraitBackend;
use crate::fragment::{Fragment, Layout, Rex};
use crate::functions::Function;
use crate::literal;
use crate::types;
use deferql_compile::Cx;
use deferql_ir::{
    BinaryOp, DataType, Error, Graph, JoinKind, NodeId, Op, OpKind, ReductionFunc, Result, Schema,
    UnaryOp, Value,
};
use deferql_registry::{Registry, TranslateFn};
use substrait::proto::aggregate_rel::{Grouping, Measure};
use substrait::proto::read_rel::{NamedTable, ReadType};
use substrait::proto::rel::RelType;
use substrait::proto::rel_common::{Emit, EmitKind};
use substrait::proto::sort_field::{SortDirection, SortKind};
use substrait::proto::{
    join_rel, r#type, AggregateRel, Expression, FilterRel, FunctionOption, JoinRel, NamedStruct,
    ProjectRel, ReadRel, Rel, RelCommon, SortField, SortRel,
};

pub type SubstraitRegistry = Registry<Cx<SubstraitBackend>, Fragment>;
pub type Rule = TranslateFn<Cx<SubstraitBackend>, Fragment>;

/// Window functions, limits and epoch conversions have no translation and
/// are reported unsupported before translation starts.
pub fn registry() -> SubstraitRegistry {
    Registry::new("substrait")
        .with(OpKind::Table, table as Rule)
        .with(OpKind::InMemory, in_memory)
        .with(OpKind::Cached, passthrough)
        .with(OpKind::View, passthrough)
        .with(OpKind::Filter, filter)
        .with(OpKind::Project, project)
        .with(OpKind::Join, join)
        .with(OpKind::Aggregate, aggregate)
        .with(OpKind::Sort, sort)
        .with(OpKind::Literal, literal)
        .with(OpKind::Param, param)
        .with(OpKind::Column, column)
        .with(OpKind::Cast, cast)
        .with(OpKind::Binary, binary)
        .with(OpKind::Unary, unary)
        .with(OpKind::Reduction, reduction)
}

fn mismatch(graph: &Graph, id: NodeId, expected: OpKind) -> Error {
    let found = graph.op(id).map(|op| op.kind().to_string()).unwrap_or_default();
    Error::Invariant(format!("{id} dispatched as {expected} but is {found}"))
}

pub fn wrap(rel_type: RelType) -> Fragment {
    Fragment::Rel(Rel {
        rel_type: Some(rel_type),
    })
}

/// Splits translated children into the leading relation and the
/// expressions after it.
fn relation_and_exprs(children: Vec<Fragment>) -> Result<(Rel, Vec<Rex>)> {
    let mut children = children.into_iter();
    let rel = children
        .next()
        .ok_or_else(|| Error::Invariant("relational operation without an input".to_string()))?
        .into_rel()?;
    let exprs = children.map(Fragment::into_rex).collect::<Result<_>>()?;
    Ok((rel, exprs))
}

fn lower_all(exprs: &[Rex], layout: &Layout) -> Result<Vec<Expression>> {
    exprs.iter().map(|rex| rex.lower(layout)).collect()
}

/// Native output type of the value node `id`.
fn output(cx: &Cx<SubstraitBackend>, graph: &Graph, id: NodeId) -> Result<substrait::proto::Type> {
    cx.native_type(graph.dtype(id)?)
}

/// Conjunction of `predicates`; `None` when there are none.
fn conjunction(cx: &Cx<SubstraitBackend>, mut predicates: Vec<Rex>) -> Result<Option<Rex>> {
    if predicates.len() <= 1 {
        return Ok(predicates.pop());
    }
    let boolean = cx.native_type(&DataType::boolean())?;
    Ok(Some(Rex::call(Function::And, predicates, boolean)))
}

/// Base schema of a scan, in native types.
pub fn named_struct(cx: &Cx<SubstraitBackend>, schema: &Schema) -> Result<NamedStruct> {
    Ok(NamedStruct {
        names: schema.names().map(str::to_string).collect(),
        r#struct: Some(r#type::Struct {
            types: schema
                .fields
                .iter()
                .map(|f| cx.native_type(&f.data_type))
                .collect::<Result<_>>()?,
            nullability: types::nullability(false),
            ..Default::default()
        }),
    })
}

/// Scan of a table registered with the consumer under `name`.
pub fn named_read(cx: &Cx<SubstraitBackend>, name: &str, schema: &Schema) -> Result<Fragment> {
    let read = ReadRel {
        base_schema: Some(named_struct(cx, schema)?),
        read_type: Some(ReadType::NamedTable(NamedTable {
            names: vec![name.to_string()],
            ..Default::default()
        })),
        ..Default::default()
    };
    Ok(wrap(RelType::Read(Box::new(read))))
}

pub fn filter_rel(input: Rel, condition: Expression) -> Fragment {
    wrap(RelType::Filter(Box::new(FilterRel {
        input: Some(Box::new(input)),
        condition: Some(Box::new(condition)),
        ..Default::default()
    })))
}

/// Projection emitting only the computed expressions, in order.
fn project_rel(input: Rel, input_width: usize, expressions: Vec<Expression>) -> Fragment {
    let output_mapping = (input_width..input_width + expressions.len())
        .map(|i| i32::try_from(i).unwrap_or(i32::MAX))
        .collect();
    project_with_mapping(input, expressions, output_mapping)
}

fn project_with_mapping(
    input: Rel,
    expressions: Vec<Expression>,
    output_mapping: Vec<i32>,
) -> Fragment {
    wrap(RelType::Project(Box::new(ProjectRel {
        common: Some(RelCommon {
            emit_kind: Some(EmitKind::Emit(Emit { output_mapping })),
            ..Default::default()
        }),
        input: Some(Box::new(input)),
        expressions,
        ..Default::default()
    })))
}

// Relations

pub fn table(
    cx: &mut Cx<SubstraitBackend>,
    graph: &Graph,
    id: NodeId,
    _: Vec<Fragment>,
) -> Result<Fragment> {
    let Op::Table { name, schema } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Table));
    };
    named_read(cx, name, schema)
}

/// Staged rows are registered with the program and read by name, never
/// inlined as a virtual table.
pub fn in_memory(
    cx: &mut Cx<SubstraitBackend>,
    graph: &Graph,
    id: NodeId,
    _: Vec<Fragment>,
) -> Result<Fragment> {
    let Op::InMemory { name, schema, rows } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::InMemory));
    };
    let read = named_read(cx, name, schema)?;
    cx.register_memtable(name, schema, rows);
    Ok(read)
}

/// Views and not-yet-materialized cache entries are their input.
pub fn passthrough(
    _: &mut Cx<SubstraitBackend>,
    _: &Graph,
    _: NodeId,
    children: Vec<Fragment>,
) -> Result<Fragment> {
    children
        .into_iter()
        .next()
        .ok_or_else(|| Error::Invariant("pass-through relation without an input".to_string()))
}

pub fn filter(
    cx: &mut Cx<SubstraitBackend>,
    graph: &Graph,
    id: NodeId,
    children: Vec<Fragment>,
) -> Result<Fragment> {
    let Op::Filter { table, .. } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Filter));
    };
    let (rel, predicates) = relation_and_exprs(children)?;
    match conjunction(cx, predicates)? {
        Some(condition) => Ok(filter_rel(rel, condition.lower(&Layout::single(*table))?)),
        None => Ok(Fragment::Rel(rel)),
    }
}

pub fn project(
    _: &mut Cx<SubstraitBackend>,
    graph: &Graph,
    id: NodeId,
    children: Vec<Fragment>,
) -> Result<Fragment> {
    let Op::Project { table, .. } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Project));
    };
    let (rel, exprs) = relation_and_exprs(children)?;
    let expressions = lower_all(&exprs, &Layout::single(*table))?;
    Ok(project_rel(rel, graph.schema(*table)?.len(), expressions))
}

pub fn join(
    cx: &mut Cx<SubstraitBackend>,
    graph: &Graph,
    id: NodeId,
    children: Vec<Fragment>,
) -> Result<Fragment> {
    let Op::Join {
        kind, left, right, ..
    } = graph.op(id)?
    else {
        return Err(mismatch(graph, id, OpKind::Join));
    };
    let mut children = children.into_iter();
    let mut next_rel = || -> Result<Rel> {
        children
            .next()
            .ok_or_else(|| Error::Invariant(format!("join {id} is missing an input")))?
            .into_rel()
    };
    let left_rel = next_rel()?;
    let right_rel = next_rel()?;
    let predicates = children.map(Fragment::into_rex).collect::<Result<Vec<_>>>()?;

    let layout = Layout::pair(*left, *right, graph.schema(*left)?.len());
    let expression = match conjunction(cx, predicates)? {
        Some(condition) => condition.lower(&layout)?,
        None => Rex::Literal(literal::encode(
            &Value::Bool(true),
            &types::boolean(false),
        )?)
        .lower(&layout)?,
    };
    let join_type = match kind {
        JoinKind::Inner => join_rel::JoinType::Inner,
        JoinKind::Left => join_rel::JoinType::Left,
        JoinKind::Right => join_rel::JoinType::Right,
        JoinKind::Outer => join_rel::JoinType::Outer,
        JoinKind::Semi => join_rel::JoinType::LeftSemi,
        JoinKind::Anti => join_rel::JoinType::LeftAnti,
    };
    // Output columns are left then right; semi and anti joins keep only the
    // left side. Names are assigned at the plan root.
    Ok(wrap(RelType::Join(Box::new(JoinRel {
        left: Some(Box::new(left_rel)),
        right: Some(Box::new(right_rel)),
        expression: Some(Box::new(expression)),
        r#type: join_type as i32,
        ..Default::default()
    }))))
}

/// Grouping keys first, then one measure per metric. Metrics that wrap
/// their aggregates in further arithmetic get a projection on top.
pub fn aggregate(
    _: &mut Cx<SubstraitBackend>,
    graph: &Graph,
    id: NodeId,
    children: Vec<Fragment>,
) -> Result<Fragment> {
    let Op::Aggregate { table, by, .. } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Aggregate));
    };
    let (rel, mut exprs) = relation_and_exprs(children)?;
    let metrics = exprs.split_off(by.len().min(exprs.len()));
    let input = Layout::single(*table);
    let grouping_expressions = lower_all(&exprs, &input)?;

    let mut measures = Vec::new();
    let computed: Vec<Rex> = metrics
        .into_iter()
        .map(|metric| metric.extract_measures(id, by.len(), &mut measures))
        .collect();
    let bare = computed.len() == measures.len()
        && computed
            .iter()
            .enumerate()
            .all(|(i, rex)| *rex == Rex::Field { table: id, index: by.len() + i });

    let measures = measures
        .iter()
        .map(|m| {
            let (call, filter) = m.lower_measure(&input)?;
            Ok(Measure {
                measure: Some(call),
                filter,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let groupings = if grouping_expressions.is_empty() {
        vec![]
    } else {
        #[allow(deprecated)]
        let grouping = Grouping {
            expression_references: (0..grouping_expressions.len())
                .map(|i| u32::try_from(i).unwrap_or(u32::MAX))
                .collect(),
            ..Default::default()
        };
        vec![grouping]
    };
    let width = grouping_expressions.len() + measures.len();
    let aggregated = Rel {
        rel_type: Some(RelType::Aggregate(Box::new(AggregateRel {
            input: Some(Box::new(rel)),
            groupings,
            measures,
            grouping_expressions,
            ..Default::default()
        }))),
    };
    if bare {
        return Ok(Fragment::Rel(aggregated));
    }

    let expressions = lower_all(&computed, &Layout::single(id))?;
    let output_mapping = (0..by.len())
        .chain(width..width + expressions.len())
        .map(|i| i32::try_from(i).unwrap_or(i32::MAX))
        .collect();
    Ok(project_with_mapping(aggregated, expressions, output_mapping))
}

/// Ascending keys sort nulls first, descending keys nulls last.
pub fn sort(
    _: &mut Cx<SubstraitBackend>,
    graph: &Graph,
    id: NodeId,
    children: Vec<Fragment>,
) -> Result<Fragment> {
    let Op::Sort { table, keys } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Sort));
    };
    let (rel, exprs) = relation_and_exprs(children)?;
    let layout = Layout::single(*table);
    let sorts = keys
        .iter()
        .zip(&exprs)
        .map(|(key, rex)| {
            let direction = if key.descending {
                SortDirection::DescNullsLast
            } else {
                SortDirection::AscNullsFirst
            };
            Ok(SortField {
                expr: Some(rex.lower(&layout)?),
                sort_kind: Some(SortKind::Direction(direction as i32)),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(wrap(RelType::Sort(Box::new(SortRel {
        input: Some(Box::new(rel)),
        sorts,
        ..Default::default()
    }))))
}

// Values

/// Untyped nulls carry no type.
pub fn literal(
    cx: &mut Cx<SubstraitBackend>,
    graph: &Graph,
    id: NodeId,
    _: Vec<Fragment>,
) -> Result<Fragment> {
    let Op::Literal { value, dtype } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Literal));
    };
    if dtype.is_null() {
        return Ok(Fragment::Expr(Rex::Literal(literal::untyped_null())));
    }
    let native = cx.native_type(dtype)?;
    Ok(Fragment::Expr(Rex::Literal(literal::encode(value, &native)?)))
}

pub fn param(
    cx: &mut Cx<SubstraitBackend>,
    graph: &Graph,
    id: NodeId,
    _: Vec<Fragment>,
) -> Result<Fragment> {
    let Op::Param { dtype, .. } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Param));
    };
    let value = cx.param(graph, id)?;
    let native = cx.native_type(dtype)?;
    Ok(Fragment::Expr(Rex::Literal(literal::encode(&value, &native)?)))
}

pub fn column(
    _: &mut Cx<SubstraitBackend>,
    graph: &Graph,
    id: NodeId,
    _: Vec<Fragment>,
) -> Result<Fragment> {
    let Op::Column { table, name } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Column));
    };
    let index = graph
        .schema(*table)?
        .index_of(name)
        .ok_or_else(|| Error::Invariant(format!("{table} has no column '{name}'")))?;
    Ok(Fragment::Expr(Rex::Field {
        table: *table,
        index,
    }))
}

fn single(children: Vec<Fragment>) -> Result<Rex> {
    let mut children = children.into_iter();
    match (children.next(), children.next()) {
        (Some(child), None) => child.into_rex(),
        _ => Err(Error::Invariant("expected exactly one argument".to_string())),
    }
}

pub fn cast(
    cx: &mut Cx<SubstraitBackend>,
    graph: &Graph,
    id: NodeId,
    children: Vec<Fragment>,
) -> Result<Fragment> {
    let Op::Cast { to, .. } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Cast));
    };
    Ok(Fragment::Expr(Rex::Cast {
        input: Box::new(single(children)?),
        to: cx.native_type(to)?,
    }))
}

pub fn binary(
    cx: &mut Cx<SubstraitBackend>,
    graph: &Graph,
    id: NodeId,
    children: Vec<Fragment>,
) -> Result<Fragment> {
    let Op::Binary { op, .. } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Binary));
    };
    let args = children.into_iter().map(Fragment::into_rex).collect::<Result<Vec<_>>>()?;
    if args.len() != 2 {
        return Err(Error::Invariant(format!("binary {id} needs two operands")));
    }
    let function = match op {
        BinaryOp::Add => Function::Add,
        BinaryOp::Sub => Function::Subtract,
        BinaryOp::Mul => Function::Multiply,
        BinaryOp::Div => Function::Divide,
        BinaryOp::Mod => Function::Modulus,
        BinaryOp::Eq => Function::Equal,
        BinaryOp::Ne => Function::NotEqual,
        BinaryOp::Lt => Function::Lt,
        BinaryOp::Le => Function::Lte,
        BinaryOp::Gt => Function::Gt,
        BinaryOp::Ge => Function::Gte,
        BinaryOp::And => Function::And,
        BinaryOp::Or => Function::Or,
        BinaryOp::Like | BinaryOp::ILike => Function::Like,
    };
    let options = match op {
        BinaryOp::ILike => vec![FunctionOption {
            name: "case_sensitivity".to_string(),
            preference: vec!["CASE_INSENSITIVE".to_string()],
        }],
        _ => Vec::new(),
    };
    Ok(Fragment::Expr(Rex::Call {
        function,
        args,
        options,
        output: output(cx, graph, id)?,
    }))
}

/// Under `nan_as_null`, null checks on floating operands also match NaN.
pub fn unary(
    cx: &mut Cx<SubstraitBackend>,
    graph: &Graph,
    id: NodeId,
    children: Vec<Fragment>,
) -> Result<Fragment> {
    let Op::Unary { op, arg } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Unary));
    };
    let arg_rex = single(children)?;
    let out = output(cx, graph, id)?;
    let function = match op {
        UnaryOp::Not => Function::Not,
        UnaryOp::Negate => Function::Negate,
        UnaryOp::IsNull => Function::IsNull,
        UnaryOp::NotNull => Function::IsNotNull,
    };
    let null_check = Rex::call(function, vec![arg_rex.clone()], out.clone());
    let nan_aware = matches!(op, UnaryOp::IsNull | UnaryOp::NotNull)
        && cx.policy().nan_as_null
        && graph.dtype(*arg)?.is_floating();
    if !nan_aware {
        return Ok(Fragment::Expr(null_check));
    }
    let boolean = types::boolean(true);
    let is_nan = Rex::call(Function::IsNan, vec![arg_rex], boolean.clone());
    Ok(Fragment::Expr(match op {
        UnaryOp::IsNull => Rex::call(Function::Or, vec![null_check, is_nan], out),
        _ => Rex::call(
            Function::And,
            vec![null_check, Rex::call(Function::Not, vec![is_nan], boolean)],
            out,
        ),
    }))
}

pub fn reduction(
    cx: &mut Cx<SubstraitBackend>,
    graph: &Graph,
    id: NodeId,
    children: Vec<Fragment>,
) -> Result<Fragment> {
    let Op::Reduction { func, arg, filter } = graph.op(id)? else {
        return Err(mismatch(graph, id, OpKind::Reduction));
    };
    let mut children = children.into_iter().map(Fragment::into_rex);
    let args = match arg {
        Some(_) => vec![children.next().transpose()?.ok_or_else(|| {
            Error::Invariant(format!("reduction {id} is missing its argument"))
        })?],
        None => Vec::new(),
    };
    let filter = match filter {
        Some(_) => Some(Box::new(children.next().transpose()?.ok_or_else(|| {
            Error::Invariant(format!("reduction {id} is missing its filter"))
        })?)),
        None => None,
    };
    let (function, distinct) = match func {
        ReductionFunc::Count => (Function::Count, false),
        ReductionFunc::CountDistinct => (Function::Count, true),
        ReductionFunc::ApproxCountDistinct => (Function::ApproxCountDistinct, false),
        ReductionFunc::Sum => (Function::Sum, false),
        ReductionFunc::Mean => (Function::Avg, false),
        ReductionFunc::Min => (Function::Min, false),
        ReductionFunc::Max => (Function::Max, false),
    };
    Ok(Fragment::Expr(Rex::Aggregate {
        function,
        args,
        distinct,
        filter,
        output: output(cx, graph, id)?,
    }))
}
