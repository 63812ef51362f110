use super::rewrite;
use deferql_ir::{
    AnalyticFunc, BinaryOp, DataType, Graph, NodeId, Op, ReductionFunc, Schema, SortKey, UnaryOp,
};

fn events(g: &mut Graph) -> NodeId {
    g.table(
        "events",
        Schema::from_pairs([
            ("a", DataType::int32()),
            ("b", DataType::string()),
            ("flag", DataType::boolean()),
        ])
        .unwrap(),
    )
    .unwrap()
}

#[test]
fn test_cast_identity() {
    let mut g = Graph::new();
    let t = events(&mut g);
    let a = g.column(t, "a").unwrap();
    let cast = g.cast(a, DataType::int32()).unwrap();
    let p = g.project(t, [("a2", cast)]).unwrap();

    let (out, root) = rewrite(&g, p).unwrap();
    let Op::Project { columns, .. } = out.op(root).unwrap() else {
        panic!("expected projection");
    };
    assert!(matches!(out.op(columns[0].1).unwrap(), Op::Column { .. }));
}

#[test]
fn test_cast_roundtrip_only_when_lossless() {
    let mut g = Graph::new();
    let t = events(&mut g);
    let a = g.column(t, "a").unwrap();
    let wide = g.cast(a, DataType::int64()).unwrap();
    let back = g.cast(wide, DataType::int32()).unwrap();
    let (out, root) = rewrite(&g, back).unwrap();
    assert!(matches!(out.op(root).unwrap(), Op::Column { .. }));

    // float -> int -> float truncates, so it stays.
    let f = g.literal(1.5).unwrap();
    let narrow = g.cast(f, DataType::int32()).unwrap();
    let again = g.cast(narrow, DataType::float64()).unwrap();
    let (out, root) = rewrite(&g, again).unwrap();
    assert!(matches!(out.op(root).unwrap(), Op::Cast { .. }));
}

#[test]
fn test_double_negation_and_folding() {
    let mut g = Graph::new();
    let t = events(&mut g);
    let flag = g.column(t, "flag").unwrap();
    let n1 = g.not(flag).unwrap();
    let n2 = g.not(n1).unwrap();
    let (out, root) = rewrite(&g, n2).unwrap();
    assert!(matches!(out.op(root).unwrap(), Op::Column { .. }));

    let yes = g.literal(true).unwrap();
    let no = g.unary(UnaryOp::Not, yes).unwrap();
    let (out, root) = rewrite(&g, no).unwrap();
    assert!(matches!(
        out.op(root).unwrap(),
        Op::Literal { value: deferql_ir::Value::Bool(false), .. }
    ));
}

#[test]
fn test_filter_fusion() {
    let mut g = Graph::new();
    let t = events(&mut g);
    let a = g.column(t, "a").unwrap();
    let five = g.literal(5).unwrap();
    let p = g.gt(a, five).unwrap();
    let f1 = g.filter(t, vec![p]).unwrap();

    let b = g.column(f1, "b").unwrap();
    let x = g.literal("x").unwrap();
    let q = g.eq(b, x).unwrap();
    let f2 = g.filter(f1, vec![q]).unwrap();

    let (out, root) = rewrite(&g, f2).unwrap();
    let Op::Filter { table, predicates } = out.op(root).unwrap() else {
        panic!("expected filter");
    };
    assert!(matches!(out.op(*table).unwrap(), Op::Table { .. }));
    assert_eq!(predicates.len(), 2);
    for p in predicates {
        assert_eq!(out.free_tables(*p).unwrap().into_iter().collect::<Vec<_>>(), vec![*table]);
    }
    assert_eq!(out.schema(root).unwrap(), g.schema(f2).unwrap());
}

#[test]
fn test_limit_fusion() {
    let mut g = Graph::new();
    let t = events(&mut g);
    let l1 = g.limit(t, 10, 5).unwrap();
    let l2 = g.limit(l1, 20, 3).unwrap();
    let (out, root) = rewrite(&g, l2).unwrap();
    assert!(matches!(
        out.op(root).unwrap(),
        Op::Limit { n: 7, offset: 8, .. }
    ));
}

#[test]
fn test_identity_projection() {
    let mut g = Graph::new();
    let t = events(&mut g);
    let a = g.column(t, "a").unwrap();
    let b = g.column(t, "b").unwrap();
    let flag = g.column(t, "flag").unwrap();
    let p = g.project(t, [("a", a), ("b", b), ("flag", flag)]).unwrap();
    let (out, root) = rewrite(&g, p).unwrap();
    assert!(matches!(out.op(root).unwrap(), Op::Table { .. }));

    let reordered = g.project(t, [("b", b), ("a", a), ("flag", flag)]).unwrap();
    let (out, root) = rewrite(&g, reordered).unwrap();
    assert!(matches!(out.op(root).unwrap(), Op::Project { .. }));
}

#[test]
fn test_bare_analytic_gets_window() {
    let mut g = Graph::new();
    let t = events(&mut g);
    let rn = g.analytic(AnalyticFunc::RowNumber, None).unwrap();
    let a = g.column(t, "a").unwrap();
    let total = g.reduction(ReductionFunc::Sum, Some(a), None).unwrap();
    let p = g.project(t, [("a", a), ("rn", rn), ("total", total)]).unwrap();

    let (out, root) = rewrite(&g, p).unwrap();
    let Op::Project { columns, .. } = out.op(root).unwrap() else {
        panic!("expected projection");
    };
    assert!(matches!(out.op(columns[0].1).unwrap(), Op::Column { .. }));
    assert!(matches!(out.op(columns[1].1).unwrap(), Op::Window { .. }));
    assert!(matches!(out.op(columns[2].1).unwrap(), Op::Window { .. }));
    assert_eq!(out.schema(root).unwrap(), g.schema(p).unwrap());
}

#[test]
fn test_nested_reduction_gets_window() {
    let mut g = Graph::new();
    let t = events(&mut g);
    let a = g.column(t, "a").unwrap();
    let total = g.reduction(ReductionFunc::Sum, Some(a), None).unwrap();
    let gap = g.binary(BinaryOp::Sub, a, total).unwrap();
    let p = g.project(t, [("a", a), ("gap", gap)]).unwrap();

    let (out, root) = rewrite(&g, p).unwrap();
    let Op::Project { columns, .. } = out.op(root).unwrap() else {
        panic!("expected projection");
    };
    let Op::Binary { left, right, .. } = out.op(columns[1].1).unwrap() else {
        panic!("expected subtraction");
    };
    assert!(matches!(out.op(*left).unwrap(), Op::Column { .. }));
    let Op::Window { func, .. } = out.op(*right).unwrap() else {
        panic!("expected whole-relation window");
    };
    assert!(matches!(out.op(*func).unwrap(), Op::Reduction { .. }));
    assert_eq!(out.schema(root).unwrap(), g.schema(p).unwrap());

    let (again, r2) = rewrite(&out, root).unwrap();
    assert_eq!(again.fingerprint(r2).unwrap(), out.fingerprint(root).unwrap());
}

#[test]
fn test_rewrite_is_idempotent() {
    let mut g = Graph::new();
    let t = events(&mut g);
    let a = g.column(t, "a").unwrap();
    let five = g.literal(5).unwrap();
    let p = g.gt(a, five).unwrap();
    let np = g.not(p).unwrap();
    let nnp = g.not(np).unwrap();
    let f1 = g.filter(t, vec![nnp]).unwrap();
    let flag = g.column(f1, "flag").unwrap();
    let f2 = g.filter(f1, vec![flag]).unwrap();
    let a2 = g.column(f2, "a").unwrap();
    let cast = g.cast(a2, DataType::int32()).unwrap();
    let rn = g.analytic(AnalyticFunc::RowNumber, None).unwrap();
    let proj = g.project(f2, [("a", cast), ("rn", rn)]).unwrap();
    let a3 = g.column(proj, "a").unwrap();
    let sorted = g.sort(proj, vec![SortKey::desc(a3)]).unwrap();
    let l1 = g.limit(sorted, 100, 0).unwrap();
    let root = g.limit(l1, 10, 0).unwrap();

    let (once, r1) = rewrite(&g, root).unwrap();
    let (twice, r2) = rewrite(&once, r1).unwrap();
    assert_eq!(once.fingerprint(r1).unwrap(), twice.fingerprint(r2).unwrap());
    assert_eq!(once.len(), twice.len());
    assert_eq!(once.schema(r1).unwrap(), g.schema(root).unwrap());
}

#[test]
fn test_untouched_graph_is_compacted() {
    let mut g = Graph::new();
    g.literal("unrelated").unwrap();
    let t = events(&mut g);
    let (out, root) = rewrite(&g, t).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out.fingerprint(root).unwrap(), g.fingerprint(t).unwrap());
}
