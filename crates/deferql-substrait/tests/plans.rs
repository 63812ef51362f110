//! End-to-end compilation to Substrait plans
//!
//! Run with: cargo test --package deferql-substrait --test plans

use chrono::{NaiveDate, TimeZone, Utc};
use deferql_compile::{BackendPolicy, Params, Session, TimeContext};
use deferql_ir::{
    AnalyticFunc, BinaryOp, DataType, Error, Graph, JoinKind, NodeId, OpKind, ReductionFunc,
    Schema, SortKey, TimestampUnit, UnaryOp, Value,
};
use deferql_substrait::{to_bytes, to_json, to_plan, Function, SubstraitBackend};
use prost::Message;
use substrait::proto::aggregate_function::AggregationInvocation;
use substrait::proto::expression::field_reference::ReferenceType;
use substrait::proto::expression::literal::{LiteralType, PrecisionTimestamp};
use substrait::proto::expression::reference_segment;
use substrait::proto::expression::{RexType, ScalarFunction};
use substrait::proto::function_argument::ArgType;
use substrait::proto::plan_rel::RelType as PlanRelType;
use substrait::proto::read_rel::ReadType;
use substrait::proto::rel::RelType;
use substrait::proto::rel_common::EmitKind;
use substrait::proto::sort_field::{SortDirection, SortKind};
use substrait::proto::{join_rel, Expression, Plan, Rel};

fn compile_with(backend: SubstraitBackend, g: &Graph, root: NodeId) -> deferql_ir::Result<Plan> {
    let program = Session::new(backend).compile(g, root, &Params::new(), None)?;
    to_plan(&program)
}

fn plan(g: &Graph, root: NodeId) -> Plan {
    compile_with(SubstraitBackend::new(), g, root).unwrap()
}

fn people(g: &mut Graph) -> NodeId {
    g.table(
        "people",
        Schema::from_pairs([
            ("id", DataType::int64().not_null()),
            ("name", DataType::string()),
            ("boss", DataType::int64()),
            ("score", DataType::float64()),
        ])
        .unwrap(),
    )
    .unwrap()
}

/// The root relation and its output names.
fn root(plan: &Plan) -> (&Rel, &[String]) {
    match plan.relations.last().and_then(|r| r.rel_type.as_ref()) {
        Some(PlanRelType::Root(root)) => (root.input.as_ref().unwrap(), &root.names),
        other => panic!("expected a root relation last, got {other:?}"),
    }
}

fn kind(rel: &Rel) -> &RelType {
    rel.rel_type.as_ref().unwrap()
}

fn input(rel: &Rel) -> &Rel {
    match kind(rel) {
        RelType::Filter(f) => f.input.as_deref().unwrap(),
        RelType::Project(p) => p.input.as_deref().unwrap(),
        RelType::Aggregate(a) => a.input.as_deref().unwrap(),
        RelType::Sort(s) => s.input.as_deref().unwrap(),
        other => panic!("{other:?} has no single input"),
    }
}

fn table_names(rel: &Rel) -> Vec<String> {
    let RelType::Read(read) = kind(rel) else {
        panic!("expected a read, got {rel:?}");
    };
    match &read.read_type {
        Some(ReadType::NamedTable(t)) => t.names.clone(),
        other => panic!("expected a named table, got {other:?}"),
    }
}

fn call(expr: &Expression) -> &ScalarFunction {
    match &expr.rex_type {
        Some(RexType::ScalarFunction(f)) => f,
        other => panic!("expected a function call, got {other:?}"),
    }
}

fn arg(f: &ScalarFunction, i: usize) -> &Expression {
    match &f.arguments[i].arg_type {
        Some(ArgType::Value(e)) => e,
        other => panic!("expected a value argument, got {other:?}"),
    }
}

fn field(expr: &Expression) -> i32 {
    let Some(RexType::Selection(reference)) = &expr.rex_type else {
        panic!("expected a field reference, got {expr:?}");
    };
    let Some(ReferenceType::DirectReference(segment)) = &reference.reference_type else {
        panic!("expected a direct reference");
    };
    match &segment.reference_type {
        Some(reference_segment::ReferenceType::StructField(f)) => f.field,
        other => panic!("expected a struct field, got {other:?}"),
    }
}

fn literal(expr: &Expression) -> &LiteralType {
    match &expr.rex_type {
        Some(RexType::Literal(l)) => l.literal_type.as_ref().unwrap(),
        other => panic!("expected a literal, got {other:?}"),
    }
}

fn emit(rel: &Rel) -> Vec<i32> {
    let RelType::Project(p) = kind(rel) else {
        panic!("expected a projection, got {rel:?}");
    };
    match p.common.as_ref().and_then(|c| c.emit_kind.as_ref()) {
        Some(EmitKind::Emit(e)) => e.output_mapping.clone(),
        other => panic!("expected an emit mapping, got {other:?}"),
    }
}

#[test]
fn test_filter_scan() {
    let mut g = Graph::new();
    let t = people(&mut g);
    let score = g.column(t, "score").unwrap();
    let half = g.literal(0.5).unwrap();
    let p = g.gt(score, half).unwrap();
    let f = g.filter(t, vec![p]).unwrap();

    let plan = plan(&g, f);
    assert_eq!(plan.relations.len(), 1);
    assert_eq!(plan.version.as_ref().unwrap().minor_number, 53);
    let (rel, names) = root(&plan);
    assert_eq!(names, ["id", "name", "boss", "score"]);

    let RelType::Filter(filter) = kind(rel) else {
        panic!("expected a filter, got {rel:?}");
    };
    let condition = call(filter.condition.as_deref().unwrap());
    assert_eq!(condition.function_reference, Function::Gt.anchor());
    assert_eq!(field(arg(condition, 0)), 3);
    assert_eq!(literal(arg(condition, 1)), &LiteralType::Fp64(0.5));

    let scan = input(rel);
    assert_eq!(table_names(scan), ["people"]);
    let RelType::Read(read) = kind(scan) else {
        unreachable!()
    };
    assert_eq!(read.base_schema.as_ref().unwrap().names, ["id", "name", "boss", "score"]);
}

#[test]
#[allow(deprecated)]
fn test_every_plan_declares_the_catalog() {
    let mut g = Graph::new();
    let t = people(&mut g);
    let plan = plan(&g, t);
    assert_eq!(plan.extensions.len(), Function::ALL.len());
    assert!(!plan.extension_uris.is_empty());
}

#[test]
fn test_projection_emits_only_computed_columns() {
    let mut g = Graph::new();
    let t = people(&mut g);
    let name = g.column(t, "name").unwrap();
    let score = g.column(t, "score").unwrap();
    let two = g.literal(2.0).unwrap();
    let doubled = g.binary(BinaryOp::Mul, score, two).unwrap();
    let p = g.project(t, [("name", name), ("double", doubled)]).unwrap();

    let plan = plan(&g, p);
    let (rel, names) = root(&plan);
    assert_eq!(names, ["name", "double"]);
    assert_eq!(emit(rel), vec![4, 5]);
    let RelType::Project(project) = kind(rel) else {
        unreachable!()
    };
    assert_eq!(field(&project.expressions[0]), 1);
    assert_eq!(call(&project.expressions[1]).function_reference, Function::Multiply.anchor());
}

#[test]
fn test_self_join_scans_once() {
    let mut g = Graph::new();
    let t = people(&mut g);
    let v = g.view(t).unwrap();
    let boss = g.column(t, "boss").unwrap();
    let id = g.column(v, "id").unwrap();
    let on = g.eq(boss, id).unwrap();
    let j = g.join(JoinKind::Inner, t, v, vec![on]).unwrap();

    let plan = plan(&g, j);
    assert_eq!(plan.relations.len(), 2);
    let Some(PlanRelType::Rel(shared)) = &plan.relations[0].rel_type else {
        panic!("expected the shared scan first");
    };
    assert_eq!(table_names(shared), ["people"]);

    let (rel, names) = root(&plan);
    assert_eq!(names, ["id", "name", "boss", "score", "id_right", "name_right", "boss_right", "score_right"]);
    let RelType::Join(join) = kind(rel) else {
        panic!("expected a join, got {rel:?}");
    };
    assert_eq!(join.r#type, join_rel::JoinType::Inner as i32);
    for side in [&join.left, &join.right] {
        match kind(side.as_deref().unwrap()) {
            RelType::Reference(r) => assert_eq!(r.subtree_ordinal, 0),
            other => panic!("expected a reference, got {other:?}"),
        }
    }
    let on = call(join.expression.as_deref().unwrap());
    assert_eq!(on.function_reference, Function::Equal.anchor());
    assert_eq!((field(arg(on, 0)), field(arg(on, 1))), (2, 4));
}

#[test]
fn test_semi_and_anti_joins() {
    for (kind_, expected) in [
        (JoinKind::Semi, join_rel::JoinType::LeftSemi),
        (JoinKind::Anti, join_rel::JoinType::LeftAnti),
    ] {
        let mut g = Graph::new();
        let t = people(&mut g);
        let bosses = g
            .table("bosses", Schema::from_pairs([("bid", DataType::int64())]).unwrap())
            .unwrap();
        let boss = g.column(t, "boss").unwrap();
        let bid = g.column(bosses, "bid").unwrap();
        let on = g.eq(boss, bid).unwrap();
        let j = g.join(kind_, t, bosses, vec![on]).unwrap();

        let plan = plan(&g, j);
        let (rel, names) = root(&plan);
        assert_eq!(names, ["id", "name", "boss", "score"]);
        let RelType::Join(join) = kind(rel) else {
            panic!("expected a join, got {rel:?}");
        };
        assert_eq!(join.r#type, expected as i32);
        assert_eq!(table_names(join.right.as_deref().unwrap()), ["bosses"]);
    }
}

#[test]
fn test_grouped_aggregate_with_filtered_measure() {
    let mut g = Graph::new();
    let t = people(&mut g);
    let boss = g.column(t, "boss").unwrap();
    let score = g.column(t, "score").unwrap();
    let name = g.column(t, "name").unwrap();
    let zero = g.literal(0.0).unwrap();
    let positive = g.gt(score, zero).unwrap();
    let total = g.reduction(ReductionFunc::Sum, Some(score), Some(positive)).unwrap();
    let names = g.reduction(ReductionFunc::CountDistinct, Some(name), None).unwrap();
    let a = g
        .aggregate(t, [("boss", boss)], [("total", total), ("names", names)])
        .unwrap();

    let plan = plan(&g, a);
    let (rel, out) = root(&plan);
    assert_eq!(out, ["boss", "total", "names"]);
    let RelType::Aggregate(agg) = kind(rel) else {
        panic!("expected a bare aggregation, got {rel:?}");
    };
    assert_eq!(agg.grouping_expressions.len(), 1);
    assert_eq!(field(&agg.grouping_expressions[0]), 2);
    #[allow(deprecated)]
    let references = agg.groupings[0].expression_references.clone();
    assert_eq!(references, vec![0]);

    assert_eq!(agg.measures.len(), 2);
    let sum = &agg.measures[0];
    assert_eq!(sum.measure.as_ref().unwrap().function_reference, Function::Sum.anchor());
    let filter = call(sum.filter.as_ref().unwrap());
    assert_eq!(filter.function_reference, Function::Gt.anchor());
    let distinct = agg.measures[1].measure.as_ref().unwrap();
    assert_eq!(distinct.function_reference, Function::Count.anchor());
    assert_eq!(distinct.invocation, AggregationInvocation::Distinct as i32);
    assert!(agg.measures[1].filter.is_none());
}

#[test]
fn test_metric_arithmetic_projects_over_measures() {
    let mut g = Graph::new();
    let t = people(&mut g);
    let boss = g.column(t, "boss").unwrap();
    let score = g.column(t, "score").unwrap();
    let total = g.reduction(ReductionFunc::Sum, Some(score), None).unwrap();
    let n = g.reduction(ReductionFunc::Count, None, None).unwrap();
    let n = g.cast(n, DataType::float64()).unwrap();
    let avg = g.binary(BinaryOp::Div, total, n).unwrap();
    let a = g.aggregate(t, [("boss", boss)], [("avg", avg)]).unwrap();

    let plan = plan(&g, a);
    let (rel, names) = root(&plan);
    assert_eq!(names, ["boss", "avg"]);
    assert_eq!(emit(rel), vec![0, 3]);
    let RelType::Project(project) = kind(rel) else {
        unreachable!()
    };
    let div = call(&project.expressions[0]);
    assert_eq!(div.function_reference, Function::Divide.anchor());
    assert_eq!(field(arg(div, 0)), 1);

    let RelType::Aggregate(agg) = kind(input(rel)) else {
        panic!("expected the aggregation under the projection");
    };
    assert_eq!(agg.measures.len(), 2);
}

#[test]
fn test_global_aggregate_has_no_grouping() {
    let mut g = Graph::new();
    let t = people(&mut g);
    let n = g.reduction(ReductionFunc::Count, None, None).unwrap();
    let a = g.aggregate(t, Vec::<(&str, NodeId)>::new(), [("n", n)]).unwrap();

    let plan = plan(&g, a);
    let (rel, _) = root(&plan);
    let RelType::Aggregate(agg) = kind(rel) else {
        panic!("expected an aggregation, got {rel:?}");
    };
    assert!(agg.groupings.is_empty());
    assert!(agg.grouping_expressions.is_empty());
    assert!(agg.measures[0].measure.as_ref().unwrap().arguments.is_empty());
}

#[test]
fn test_sort_directions() {
    let mut g = Graph::new();
    let t = people(&mut g);
    let boss = g.column(t, "boss").unwrap();
    let score = g.column(t, "score").unwrap();
    let s = g.sort(t, vec![SortKey::asc(boss), SortKey::desc(score)]).unwrap();

    let plan = plan(&g, s);
    let (rel, _) = root(&plan);
    let RelType::Sort(sort) = kind(rel) else {
        panic!("expected a sort, got {rel:?}");
    };
    let directions: Vec<_> = sort
        .sorts
        .iter()
        .map(|f| (field(f.expr.as_ref().unwrap()), f.sort_kind.clone()))
        .collect();
    assert_eq!(
        directions,
        vec![
            (2, Some(SortKind::Direction(SortDirection::AscNullsFirst as i32))),
            (3, Some(SortKind::Direction(SortDirection::DescNullsLast as i32))),
        ]
    );
}

#[test]
fn test_unsupported_operations() {
    let mut g = Graph::new();
    let t = people(&mut g);
    let limited = g.limit(t, 10, 0).unwrap();
    let err = compile_with(SubstraitBackend::new(), &g, limited).unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperation { kind: OpKind::Limit, .. }));
    assert!(err.is_retryable());

    let boss = g.column(t, "boss").unwrap();
    let rank = g.analytic(AnalyticFunc::RowNumber, None).unwrap();
    let w = g.window(rank, vec![boss], vec![], None).unwrap();
    let p = g.project(t, [("rn", w)]).unwrap();
    assert!(compile_with(SubstraitBackend::new(), &g, p).unwrap_err().is_retryable());

    let id = g.column(t, "id").unwrap();
    let at = g.integer_to_timestamp(id, TimestampUnit::Seconds).unwrap();
    let p = g.project(t, [("at", at)]).unwrap();
    assert!(compile_with(SubstraitBackend::new(), &g, p).unwrap_err().is_retryable());

    let session = Session::new(SubstraitBackend::new());
    assert!(session.has_operation(OpKind::Join));
    assert!(!session.has_operation(OpKind::Limit));
}

#[test]
fn test_unsigned_columns_need_lossy_coercion() {
    let mut g = Graph::new();
    let t = g
        .table("counters", Schema::from_pairs([("hits", DataType::uint(16))]).unwrap())
        .unwrap();
    assert!(matches!(
        compile_with(SubstraitBackend::new(), &g, t),
        Err(Error::Type(_))
    ));

    let lossy = SubstraitBackend::new().with_policy(BackendPolicy::default().with_lossy_coercion(true));
    let plan = compile_with(lossy, &g, t).unwrap();
    let (rel, _) = root(&plan);
    let RelType::Read(read) = kind(rel) else {
        panic!("expected a read, got {rel:?}");
    };
    let types = &read.base_schema.as_ref().unwrap().r#struct.as_ref().unwrap().types;
    assert!(matches!(
        types[0].kind,
        Some(substrait::proto::r#type::Kind::I64(_))
    ));
}

fn day(d: u32) -> chrono::DateTime<Utc> {
    Utc.from_utc_datetime(&NaiveDate::from_ymd_opt(2024, 1, d).unwrap().and_hms_opt(0, 0, 0).unwrap())
}

#[test]
fn test_time_window_restricts_the_scan() {
    let mut g = Graph::new();
    let t = g
        .table(
            "ticks",
            Schema::from_pairs([
                ("v", DataType::int32()),
                ("time", DataType::timestamp_with(Some("UTC"), Some(6))),
            ])
            .unwrap(),
        )
        .unwrap();
    let v = g.column(t, "v").unwrap();
    let p = g.project(t, [("v", v)]).unwrap();

    let ctx = TimeContext::new(day(1), day(2));
    let program = Session::new(SubstraitBackend::new())
        .compile(&g, p, &Params::new(), Some(&ctx))
        .unwrap();
    let plan = to_plan(&program).unwrap();
    let (rel, _) = root(&plan);
    let RelType::Filter(filter) = kind(input(rel)) else {
        panic!("expected the window filter under the projection");
    };
    let both = call(filter.condition.as_deref().unwrap());
    assert_eq!(both.function_reference, Function::And.anchor());
    let lower = call(arg(both, 0));
    let upper = call(arg(both, 1));
    assert_eq!(lower.function_reference, Function::Gte.anchor());
    assert_eq!(upper.function_reference, Function::Lt.anchor());
    assert_eq!(field(arg(lower, 0)), 1);
    assert_eq!(
        literal(arg(lower, 1)),
        &LiteralType::PrecisionTimestampTz(PrecisionTimestamp {
            precision: 6,
            value: day(1).timestamp_micros(),
        })
    );
    assert_eq!(table_names(filter.input.as_deref().unwrap()), ["ticks"]);
}

#[test]
fn test_params_become_literals() {
    let mut g = Graph::new();
    let t = people(&mut g);
    let name = g.column(t, "name").unwrap();
    let who = g.param("who", DataType::string()).unwrap();
    let p = g.eq(name, who).unwrap();
    let f = g.filter(t, vec![p]).unwrap();

    let session = Session::new(SubstraitBackend::new());
    let err = session.compile(&g, f, &Params::new(), None).unwrap_err();
    assert!(matches!(err, Error::UnboundParameter(_)));

    let params = Params::from([("who".to_string(), Value::from("O'Hara"))]);
    let plan = to_plan(&session.compile(&g, f, &params, None).unwrap()).unwrap();
    let (rel, _) = root(&plan);
    let RelType::Filter(filter) = kind(rel) else {
        panic!("expected a filter, got {rel:?}");
    };
    let eq = call(filter.condition.as_deref().unwrap());
    assert_eq!(literal(arg(eq, 1)), &LiteralType::String("O'Hara".to_string()));
}

#[test]
fn test_nan_counts_as_null_under_policy() {
    let mut g = Graph::new();
    let t = people(&mut g);
    let score = g.column(t, "score").unwrap();
    let missing = g.unary(UnaryOp::IsNull, score).unwrap();
    let f = g.filter(t, vec![missing]).unwrap();

    let plain = plan(&g, f);
    let RelType::Filter(filter) = kind(root(&plain).0) else {
        panic!("expected a filter");
    };
    assert_eq!(call(filter.condition.as_deref().unwrap()).function_reference, Function::IsNull.anchor());

    let policy = BackendPolicy {
        nan_as_null: true,
        ..BackendPolicy::default()
    };
    let nan_aware = compile_with(SubstraitBackend::new().with_policy(policy), &g, f).unwrap();
    let RelType::Filter(filter) = kind(root(&nan_aware).0) else {
        panic!("expected a filter");
    };
    let either = call(filter.condition.as_deref().unwrap());
    assert_eq!(either.function_reference, Function::Or.anchor());
    assert_eq!(call(arg(either, 1)).function_reference, Function::IsNan.anchor());
}

#[test]
fn test_memtable_registered_not_inlined() {
    let mut g = Graph::new();
    let schema = Schema::from_pairs([("id", DataType::int64())]).unwrap();
    let m = g
        .memtable(schema, vec![vec![Value::Int(4141)], vec![Value::Int(4242)]])
        .unwrap();

    let program = Session::new(SubstraitBackend::new())
        .compile(&g, m, &Params::new(), None)
        .unwrap();
    assert_eq!(program.memtables.len(), 1);
    assert_eq!(program.memtables[0].rows.len(), 2);
    let name = program.memtables[0].name.clone();

    let plan = to_plan(&program).unwrap();
    assert_eq!(table_names(root(&plan).0), [name]);
    assert!(!to_json(&program).unwrap().contains("4141"));
}

#[test]
fn test_cached_result_read_by_name() {
    let session = Session::new(SubstraitBackend::new());
    let mut g = Graph::new();
    let t = people(&mut g);
    let boss = g.column(t, "boss").unwrap();
    let none = g.unary(UnaryOp::IsNull, boss).unwrap();
    let roots = g.filter(t, vec![none]).unwrap();
    let (handle, cached) = session.cache_table(&mut g, roots, "roots").unwrap();
    assert!(matches!(kind(root(&to_plan(&handle.program).unwrap()).0), RelType::Filter(_)));

    let name = g.column(cached, "name").unwrap();
    let p = g.project(cached, [("name", name)]).unwrap();
    let plan = to_plan(&session.compile(&g, p, &Params::new(), None).unwrap()).unwrap();
    let (rel, _) = root(&plan);
    assert_eq!(table_names(input(rel)), ["roots"]);
}

#[test]
fn test_scalar_root_reads_one_row() {
    let mut g = Graph::new();
    let one = g.literal(1).unwrap();
    let two = g.literal(2).unwrap();
    let sum = g.binary(BinaryOp::Add, one, two).unwrap();

    let plan = plan(&g, sum);
    let (rel, names) = root(&plan);
    assert_eq!(names, ["value"]);
    assert_eq!(emit(rel), vec![0]);
    let RelType::Read(read) = kind(input(rel)) else {
        panic!("expected a virtual table under the scalar");
    };
    match &read.read_type {
        Some(ReadType::VirtualTable(v)) => assert_eq!(v.expressions.len(), 1),
        other => panic!("expected a virtual table, got {other:?}"),
    }
}

#[test]
fn test_wire_and_json_encodings() {
    let mut g = Graph::new();
    let t = people(&mut g);
    let program = Session::new(SubstraitBackend::new())
        .compile(&g, t, &Params::new(), None)
        .unwrap();

    let bytes = to_bytes(&program).unwrap();
    assert!(!bytes.is_empty());
    assert_eq!(Plan::decode(bytes.as_slice()).unwrap(), to_plan(&program).unwrap());

    let json = to_json(&program).unwrap();
    assert!(json.contains("\"people\""));
    assert!(json.contains("deferql"));
}
