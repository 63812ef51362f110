//! Operation graph
//!
//! Nodes live in an append-only arena and are addressed by [`NodeId`]. A node
//! may only reference nodes that already exist, so every id is greater than
//! the ids it points at and cycles cannot be built. Identical operations are
//! interned: building the same `(kind, arguments, parameters)` twice returns
//! the same id, which is what the translator memoizes on.

use crate::error::{Error, Result};
use crate::provider::SchemaProvider;
use crate::types::{DataType, Schema, TypeKind};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Outer,
    Semi,
    Anti,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    // Arithmetic
    Add, Sub, Mul, Div, Mod,
    // Comparison
    Eq, Ne, Lt, Le, Gt, Ge,
    // Logical
    And, Or,
    // String
    Like, ILike,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    IsNull,
    NotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReductionFunc {
    Count,
    CountDistinct,
    ApproxCountDistinct,
    Sum,
    Mean,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalyticFunc {
    RowNumber,
    Rank,
    DenseRank,
    Lag { offset: u32 },
    Lead { offset: u32 },
}

impl AnalyticFunc {
    pub fn needs_order(self) -> bool {
        !matches!(self, AnalyticFunc::RowNumber)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimestampUnit {
    Seconds,
    Millis,
    Micros,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: NodeId,
    #[serde(default)]
    pub descending: bool,
}

impl SortKey {
    pub fn asc(expr: NodeId) -> Self {
        Self { expr, descending: false }
    }

    pub fn desc(expr: NodeId) -> Self {
        Self { expr, descending: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSpec {
    pub mode: FrameMode,
    pub start: FrameBound,
    pub end: FrameBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameMode {
    Rows,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameBound {
    UnboundedPreceding,
    UnboundedFollowing,
    CurrentRow,
    Preceding(u64),
    Following(u64),
}

/// One logical computation step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    // Relations
    Table { name: String, schema: Schema },
    InMemory { name: String, schema: Schema, rows: Vec<Vec<Value>> },
    Cached { name: String, table: NodeId },
    View { table: NodeId, tag: u32 },
    Filter { table: NodeId, predicates: Vec<NodeId> },
    Project { table: NodeId, columns: Vec<(String, NodeId)> },
    Join { kind: JoinKind, left: NodeId, right: NodeId, predicates: Vec<NodeId> },
    Aggregate { table: NodeId, by: Vec<(String, NodeId)>, metrics: Vec<(String, NodeId)> },
    Sort { table: NodeId, keys: Vec<SortKey> },
    Limit { table: NodeId, n: u64, offset: u64 },

    // Values
    Literal { value: Value, dtype: DataType },
    Param { name: String, dtype: DataType },
    Column { table: NodeId, name: String },
    Cast { arg: NodeId, to: DataType },
    Binary { op: BinaryOp, left: NodeId, right: NodeId },
    Unary { op: UnaryOp, arg: NodeId },
    Reduction { func: ReductionFunc, arg: Option<NodeId>, filter: Option<NodeId> },
    Analytic { func: AnalyticFunc, arg: Option<NodeId> },
    Window { func: NodeId, partition_by: Vec<NodeId>, order_by: Vec<SortKey>, frame: Option<FrameSpec> },
    IntegerToTimestamp { arg: NodeId, unit: TimestampUnit },
}

/// Operation kind, the registry's dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpKind {
    Table,
    InMemory,
    Cached,
    View,
    Filter,
    Project,
    Join,
    Aggregate,
    Sort,
    Limit,
    Literal,
    Param,
    Column,
    Cast,
    Binary,
    Unary,
    Reduction,
    Analytic,
    Window,
    IntegerToTimestamp,
}

impl OpKind {
    pub const ALL: [OpKind; 20] = [
        OpKind::Table,
        OpKind::InMemory,
        OpKind::Cached,
        OpKind::View,
        OpKind::Filter,
        OpKind::Project,
        OpKind::Join,
        OpKind::Aggregate,
        OpKind::Sort,
        OpKind::Limit,
        OpKind::Literal,
        OpKind::Param,
        OpKind::Column,
        OpKind::Cast,
        OpKind::Binary,
        OpKind::Unary,
        OpKind::Reduction,
        OpKind::Analytic,
        OpKind::Window,
        OpKind::IntegerToTimestamp,
    ];
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Op {
    pub fn kind(&self) -> OpKind {
        match self {
            Op::Table { .. } => OpKind::Table,
            Op::InMemory { .. } => OpKind::InMemory,
            Op::Cached { .. } => OpKind::Cached,
            Op::View { .. } => OpKind::View,
            Op::Filter { .. } => OpKind::Filter,
            Op::Project { .. } => OpKind::Project,
            Op::Join { .. } => OpKind::Join,
            Op::Aggregate { .. } => OpKind::Aggregate,
            Op::Sort { .. } => OpKind::Sort,
            Op::Limit { .. } => OpKind::Limit,
            Op::Literal { .. } => OpKind::Literal,
            Op::Param { .. } => OpKind::Param,
            Op::Column { .. } => OpKind::Column,
            Op::Cast { .. } => OpKind::Cast,
            Op::Binary { .. } => OpKind::Binary,
            Op::Unary { .. } => OpKind::Unary,
            Op::Reduction { .. } => OpKind::Reduction,
            Op::Analytic { .. } => OpKind::Analytic,
            Op::Window { .. } => OpKind::Window,
            Op::IntegerToTimestamp { .. } => OpKind::IntegerToTimestamp,
        }
    }

    /// Nodes whose translations this node's translation consumes, in the
    /// order they are handed to a translate function.
    ///
    /// A column's table is a scope reference, not an input, and is left out.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Op::Table { .. }
            | Op::InMemory { .. }
            | Op::Literal { .. }
            | Op::Param { .. }
            | Op::Column { .. } => vec![],
            Op::Cached { table, .. } | Op::View { table, .. } | Op::Limit { table, .. } => {
                vec![*table]
            }
            Op::Filter { table, predicates } => {
                std::iter::once(*table).chain(predicates.iter().copied()).collect()
            }
            Op::Project { table, columns } => std::iter::once(*table)
                .chain(columns.iter().map(|(_, id)| *id))
                .collect(),
            Op::Join {
                left,
                right,
                predicates,
                ..
            } => [*left, *right]
                .into_iter()
                .chain(predicates.iter().copied())
                .collect(),
            Op::Aggregate { table, by, metrics } => std::iter::once(*table)
                .chain(by.iter().map(|(_, id)| *id))
                .chain(metrics.iter().map(|(_, id)| *id))
                .collect(),
            Op::Sort { table, keys } => std::iter::once(*table)
                .chain(keys.iter().map(|k| k.expr))
                .collect(),
            Op::Cast { arg, .. } | Op::Unary { arg, .. } | Op::IntegerToTimestamp { arg, .. } => {
                vec![*arg]
            }
            Op::Binary { left, right, .. } => vec![*left, *right],
            Op::Reduction { arg, filter, .. } => arg.iter().chain(filter.iter()).copied().collect(),
            Op::Analytic { arg, .. } => arg.iter().copied().collect(),
            Op::Window {
                func,
                partition_by,
                order_by,
                ..
            } => std::iter::once(*func)
                .chain(partition_by.iter().copied())
                .chain(order_by.iter().map(|k| k.expr))
                .collect(),
        }
    }

    /// Every node this operation references, scope references included.
    pub fn references(&self) -> Vec<NodeId> {
        match self {
            Op::Column { table, .. } => vec![*table],
            other => other.children(),
        }
    }

    /// The same operation with every referenced id passed through `f`.
    pub fn map_ids(&self, f: impl Fn(NodeId) -> NodeId) -> Op {
        let key = |k: &SortKey| SortKey {
            expr: f(k.expr),
            descending: k.descending,
        };
        let named = |cols: &[(String, NodeId)]| -> Vec<(String, NodeId)> {
            cols.iter().map(|(n, id)| (n.clone(), f(*id))).collect()
        };
        match self {
            Op::Table { .. } | Op::InMemory { .. } | Op::Literal { .. } | Op::Param { .. } => {
                self.clone()
            }
            Op::Cached { name, table } => Op::Cached {
                name: name.clone(),
                table: f(*table),
            },
            Op::View { table, tag } => Op::View {
                table: f(*table),
                tag: *tag,
            },
            Op::Filter { table, predicates } => Op::Filter {
                table: f(*table),
                predicates: predicates.iter().map(|p| f(*p)).collect(),
            },
            Op::Project { table, columns } => Op::Project {
                table: f(*table),
                columns: named(columns),
            },
            Op::Join {
                kind,
                left,
                right,
                predicates,
            } => Op::Join {
                kind: *kind,
                left: f(*left),
                right: f(*right),
                predicates: predicates.iter().map(|p| f(*p)).collect(),
            },
            Op::Aggregate { table, by, metrics } => Op::Aggregate {
                table: f(*table),
                by: named(by),
                metrics: named(metrics),
            },
            Op::Sort { table, keys } => Op::Sort {
                table: f(*table),
                keys: keys.iter().map(key).collect(),
            },
            Op::Limit { table, n, offset } => Op::Limit {
                table: f(*table),
                n: *n,
                offset: *offset,
            },
            Op::Column { table, name } => Op::Column {
                table: f(*table),
                name: name.clone(),
            },
            Op::Cast { arg, to } => Op::Cast {
                arg: f(*arg),
                to: to.clone(),
            },
            Op::Binary { op, left, right } => Op::Binary {
                op: *op,
                left: f(*left),
                right: f(*right),
            },
            Op::Unary { op, arg } => Op::Unary { op: *op, arg: f(*arg) },
            Op::Reduction { func, arg, filter } => Op::Reduction {
                func: *func,
                arg: arg.map(&f),
                filter: filter.map(&f),
            },
            Op::Analytic { func, arg } => Op::Analytic {
                func: *func,
                arg: arg.map(&f),
            },
            Op::Window {
                func,
                partition_by,
                order_by,
                frame,
            } => Op::Window {
                func: f(*func),
                partition_by: partition_by.iter().map(|p| f(*p)).collect(),
                order_by: order_by.iter().map(key).collect(),
                frame: *frame,
            },
            Op::IntegerToTimestamp { arg, unit } => Op::IntegerToTimestamp {
                arg: f(*arg),
                unit: *unit,
            },
        }
    }
}

/// What a node produces: a single value or a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Output {
    Value(DataType),
    Table(Schema),
}

impl Output {
    pub fn is_table(&self) -> bool {
        matches!(self, Output::Table(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub op: Op,
    pub output: Output,
}

impl Node {
    pub fn kind(&self) -> OpKind {
        self.op.kind()
    }

    pub fn is_table(&self) -> bool {
        self.output.is_table()
    }

    pub fn dtype(&self) -> Option<&DataType> {
        match &self.output {
            Output::Value(t) => Some(t),
            Output::Table(_) => None,
        }
    }

    pub fn schema(&self) -> Option<&Schema> {
        match &self.output {
            Output::Table(s) => Some(s),
            Output::Value(_) => None,
        }
    }
}

/// Arena of interned operation nodes.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<Op, NodeId>,
    views: u32,
}

#[derive(Serialize, Deserialize)]
struct GraphRepr {
    ops: Vec<Op>,
}

impl Serialize for Graph {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        GraphRepr {
            ops: self.nodes.iter().map(|n| n.op.clone()).collect(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Graph {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = GraphRepr::deserialize(deserializer)?;
        Graph::from_ops(repr.ops).map_err(serde::de::Error::custom)
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from a flat op list, re-validating every node.
    ///
    /// An op may only reference earlier positions; anything else is a cycle
    /// or a dangling reference.
    pub fn from_ops(ops: Vec<Op>) -> Result<Self> {
        let mut graph = Graph::new();
        let mut remap: Vec<NodeId> = Vec::with_capacity(ops.len());
        for (position, op) in ops.into_iter().enumerate() {
            for referenced in op.references() {
                if referenced.index() >= position {
                    return Err(Error::Invariant(format!(
                        "node #{position} references {referenced}, which is not an earlier node"
                    )));
                }
            }
            let op = op.map_ids(|id| remap[id.index()]);
            remap.push(graph.intern(op)?);
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| Error::Invariant(format!("{id} is not a node of this graph")))
    }

    pub fn op(&self, id: NodeId) -> Result<&Op> {
        Ok(&self.get(id)?.op)
    }

    pub fn dtype(&self, id: NodeId) -> Result<&DataType> {
        self.get(id)?
            .dtype()
            .ok_or_else(|| Error::Type(format!("{id} is a table, expected a value")))
    }

    pub fn schema(&self, id: NodeId) -> Result<&Schema> {
        self.get(id)?
            .schema()
            .ok_or_else(|| Error::Type(format!("{id} is a value, expected a table")))
    }

    /// Add `op`, or return the id of the structurally identical node.
    pub fn intern(&mut self, op: Op) -> Result<NodeId> {
        if let Some(id) = self.index.get(&op) {
            return Ok(*id);
        }
        let output = self.infer_output(&op)?;
        let id = NodeId(
            u32::try_from(self.nodes.len())
                .map_err(|_| Error::Invariant("graph exceeds u32::MAX nodes".to_string()))?,
        );
        if let Op::View { tag, .. } = &op {
            let next = tag
                .checked_add(1)
                .ok_or_else(|| Error::Invariant(format!("view tag {tag} leaves no room for another")))?;
            self.views = self.views.max(next);
        }
        self.index.insert(op.clone(), id);
        self.nodes.push(Node { op, output });
        Ok(id)
    }

    /// Reachable nodes from `root` in ascending id order, which is a
    /// topological order: children before parents.
    pub fn reachable(&self, root: NodeId) -> Result<Vec<NodeId>> {
        self.get(root)?;
        let mut seen = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                stack.extend(self.get(id)?.op.references());
            }
        }
        Ok(seen.into_iter().collect())
    }

    /// Copy the subgraph reachable from `root` into a fresh arena.
    pub fn extract(&self, root: NodeId) -> Result<(Graph, NodeId)> {
        let mut out = Graph::new();
        out.views = self.views;
        let mut remap = HashMap::new();
        for id in self.reachable(root)? {
            let op = self.get(id)?.op.map_ids(|old| remap[&old]);
            remap.insert(id, out.intern(op)?);
        }
        Ok((out, remap[&root]))
    }

    /// SHA-256 over the canonical form of the subgraph under `root`.
    ///
    /// Independent of where the nodes sit in the arena, so two graphs built
    /// in different orders fingerprint equally when structurally equal.
    pub fn fingerprint(&self, root: NodeId) -> Result<String> {
        let mut local: HashMap<NodeId, NodeId> = HashMap::new();
        let mut ops = Vec::new();
        self.canonical_order(root, &mut local, &mut ops)?;
        let json = serde_json::to_string(&GraphRepr { ops })
            .map_err(|e| Error::Invariant(format!("graph failed to serialize: {e}")))?;
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn canonical_order(
        &self,
        id: NodeId,
        local: &mut HashMap<NodeId, NodeId>,
        ops: &mut Vec<Op>,
    ) -> Result<NodeId> {
        if let Some(mapped) = local.get(&id) {
            return Ok(*mapped);
        }
        let op = &self.get(id)?.op;
        for referenced in op.references() {
            self.canonical_order(referenced, local, ops)?;
        }
        let op = op.map_ids(|old| local[&old]);
        let mapped = NodeId(ops.len() as u32);
        ops.push(op);
        local.insert(id, mapped);
        Ok(mapped)
    }

    /// Relations referenced by columns inside the value expression `id`.
    pub fn free_tables(&self, id: NodeId) -> Result<BTreeSet<NodeId>> {
        let mut tables = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let node = self.get(id)?;
            match &node.op {
                Op::Column { table, .. } => {
                    tables.insert(*table);
                }
                _ if node.is_table() => {}
                op => stack.extend(op.children()),
            }
        }
        Ok(tables)
    }

    fn check_scope(&self, exprs: impl IntoIterator<Item = NodeId>, allowed: &[NodeId]) -> Result<()> {
        for expr in exprs {
            self.dtype(expr)?;
            for table in self.free_tables(expr)? {
                if !allowed.contains(&table) {
                    return Err(Error::Invariant(format!(
                        "expression {expr} references table {table}, which is not an input here"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Reject aggregates and windows inside a per-row predicate.
    fn expect_row_level(&self, id: NodeId, what: &str) -> Result<()> {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let node = self.get(id)?;
            match &node.op {
                op @ (Op::Reduction { .. } | Op::Analytic { .. } | Op::Window { .. }) => {
                    return Err(Error::Type(format!(
                        "{what} contains {} {id}; project it first and filter on the column",
                        op.kind()
                    )))
                }
                _ if node.is_table() => {}
                op => stack.extend(op.children()),
            }
        }
        Ok(())
    }

    fn expect_boolean(&self, id: NodeId, what: &str) -> Result<()> {
        let dtype = self.dtype(id)?;
        if dtype.is_boolean() || dtype.is_null() {
            Ok(())
        } else {
            Err(Error::Type(format!("{what} must be boolean, got {dtype}")))
        }
    }

    fn infer_output(&self, op: &Op) -> Result<Output> {
        for referenced in op.references() {
            self.get(referenced)?;
        }
        let output = match op {
            Op::Table { name, schema } => {
                if name.is_empty() {
                    return Err(Error::Invariant("table name must not be empty".to_string()));
                }
                Output::Table(schema.clone())
            }
            Op::InMemory { schema, rows, .. } => {
                for (i, row) in rows.iter().enumerate() {
                    if row.len() != schema.len() {
                        return Err(Error::Type(format!(
                            "row {i} has {} values, schema has {} fields",
                            row.len(),
                            schema.len()
                        )));
                    }
                    for (value, field) in row.iter().zip(&schema.fields) {
                        if !value.conforms_to(&field.data_type) {
                            return Err(Error::Type(format!(
                                "row {i}: {value:?} does not fit column '{}' of type {}",
                                field.name, field.data_type
                            )));
                        }
                    }
                }
                Output::Table(schema.clone())
            }
            Op::Cached { table, .. } | Op::View { table, .. } | Op::Limit { table, .. } => {
                Output::Table(self.schema(*table)?.clone())
            }
            Op::Filter { table, predicates } => {
                let schema = self.schema(*table)?.clone();
                self.check_scope(predicates.iter().copied(), &[*table])?;
                for p in predicates {
                    self.expect_boolean(*p, "filter predicate")?;
                    self.expect_row_level(*p, "filter predicate")?;
                }
                Output::Table(schema)
            }
            Op::Project { table, columns } => {
                self.schema(*table)?;
                if columns.is_empty() {
                    return Err(Error::Invariant("projection needs at least one column".to_string()));
                }
                self.check_scope(columns.iter().map(|(_, id)| *id), &[*table])?;
                Output::Table(Schema::from_pairs(
                    columns
                        .iter()
                        .map(|(name, id)| Ok((name.clone(), self.dtype(*id)?.clone())))
                        .collect::<Result<Vec<_>>>()?,
                )?)
            }
            Op::Join {
                kind,
                left,
                right,
                predicates,
            } => {
                if left == right {
                    return Err(Error::Invariant(format!(
                        "self-join of {left} needs a view of one side"
                    )));
                }
                let l = self.schema(*left)?;
                let r = self.schema(*right)?;
                self.check_scope(predicates.iter().copied(), &[*left, *right])?;
                for p in predicates {
                    self.expect_boolean(*p, "join predicate")?;
                    self.expect_row_level(*p, "join predicate")?;
                }
                let nullable = |s: &Schema| {
                    let mut s = s.clone();
                    for f in &mut s.fields {
                        f.data_type.nullable = true;
                    }
                    s
                };
                let schema = match kind {
                    JoinKind::Semi | JoinKind::Anti => l.clone(),
                    JoinKind::Inner => l.join(r)?,
                    JoinKind::Left => l.join(&nullable(r))?,
                    JoinKind::Right => nullable(l).join(r)?,
                    JoinKind::Outer => nullable(l).join(&nullable(r))?,
                };
                Output::Table(schema)
            }
            Op::Aggregate { table, by, metrics } => {
                self.schema(*table)?;
                if by.is_empty() && metrics.is_empty() {
                    return Err(Error::Invariant("aggregation needs keys or metrics".to_string()));
                }
                self.check_scope(
                    by.iter().chain(metrics.iter()).map(|(_, id)| *id),
                    &[*table],
                )?;
                Output::Table(Schema::from_pairs(
                    by.iter()
                        .chain(metrics.iter())
                        .map(|(name, id)| Ok((name.clone(), self.dtype(*id)?.clone())))
                        .collect::<Result<Vec<_>>>()?,
                )?)
            }
            Op::Sort { table, keys } => {
                let schema = self.schema(*table)?.clone();
                self.check_scope(keys.iter().map(|k| k.expr), &[*table])?;
                Output::Table(schema)
            }
            Op::Literal { value, dtype } => {
                if !value.conforms_to(dtype) {
                    return Err(Error::Type(format!("literal {value:?} does not fit {dtype}")));
                }
                Output::Value(dtype.clone())
            }
            Op::Param { name, dtype } => {
                if name.is_empty() {
                    return Err(Error::Invariant("parameter name must not be empty".to_string()));
                }
                Output::Value(dtype.clone())
            }
            Op::Column { table, name } => {
                let field = self.schema(*table)?.find_field(name).ok_or_else(|| {
                    Error::Type(format!("column '{name}' not found in table {table}"))
                })?;
                Output::Value(field.data_type.clone())
            }
            Op::Cast { arg, to } => {
                let from = self.dtype(*arg)?;
                if !from.can_cast_to(to) {
                    return Err(Error::Type(format!("cannot cast {from} to {to}")));
                }
                Output::Value(to.clone().with_nullable(from.nullable))
            }
            Op::Binary { op, left, right } => {
                Output::Value(binary_type(*op, self.dtype(*left)?, self.dtype(*right)?)?)
            }
            Op::Unary { op, arg } => {
                let t = self.dtype(*arg)?;
                Output::Value(match op {
                    UnaryOp::Not if t.is_boolean() || t.is_null() => DataType::boolean().with_nullable(t.nullable),
                    UnaryOp::Negate if t.is_numeric() || t.is_interval() => t.clone(),
                    UnaryOp::IsNull | UnaryOp::NotNull => DataType::boolean().not_null(),
                    _ => return Err(Error::Type(format!("{op:?} is not defined for {t}"))),
                })
            }
            Op::Reduction { func, arg, filter } => {
                if let Some(w) = filter {
                    self.expect_boolean(*w, "aggregate filter")?;
                }
                let arg = arg.map(|a| self.dtype(a)).transpose()?;
                Output::Value(reduction_type(*func, arg)?)
            }
            Op::Analytic { func, arg } => {
                let arg = arg.map(|a| self.dtype(a)).transpose()?;
                Output::Value(match (func, arg) {
                    (AnalyticFunc::RowNumber | AnalyticFunc::Rank | AnalyticFunc::DenseRank, None) => {
                        DataType::int64().not_null()
                    }
                    (AnalyticFunc::Lag { .. } | AnalyticFunc::Lead { .. }, Some(t)) => {
                        t.clone().with_nullable(true)
                    }
                    (func, _) => {
                        return Err(Error::Type(format!("wrong number of arguments for {func:?}")))
                    }
                })
            }
            Op::Window {
                func,
                partition_by,
                order_by,
                ..
            } => {
                for id in partition_by.iter().chain(order_by.iter().map(|k| &k.expr)) {
                    self.dtype(*id)?;
                }
                match &self.get(*func)?.op {
                    Op::Reduction { .. } => {}
                    Op::Analytic { func: f, .. } => {
                        if f.needs_order() && order_by.is_empty() {
                            return Err(Error::Type(format!("{f:?} requires an ordered window")));
                        }
                    }
                    other => {
                        return Err(Error::Type(format!(
                            "{} cannot be evaluated over a window",
                            other.kind()
                        )))
                    }
                }
                Output::Value(self.dtype(*func)?.clone())
            }
            Op::IntegerToTimestamp { arg, .. } => {
                let t = self.dtype(*arg)?;
                if !t.is_integer() {
                    return Err(Error::Type(format!("integer_to_timestamp expects an integer, got {t}")));
                }
                Output::Value(DataType::timestamp().with_nullable(t.nullable))
            }
        };
        Ok(output)
    }

    // Builders

    pub fn table(&mut self, name: impl Into<String>, schema: Schema) -> Result<NodeId> {
        self.intern(Op::Table {
            name: name.into(),
            schema,
        })
    }

    /// Scan a table whose schema comes from the schema collaborator.
    pub fn table_from(&mut self, provider: &dyn SchemaProvider, name: &str) -> Result<NodeId> {
        let schema = provider.get_native_schema(name)?;
        self.table(name, schema)
    }

    /// Staged rows under a generated, session-unique name.
    pub fn memtable(&mut self, schema: Schema, rows: Vec<Vec<Value>>) -> Result<NodeId> {
        let name = format!("_memtable_{}", uuid::Uuid::new_v4().simple());
        self.memtable_named(name, schema, rows)
    }

    pub fn memtable_named(
        &mut self,
        name: impl Into<String>,
        schema: Schema,
        rows: Vec<Vec<Value>>,
    ) -> Result<NodeId> {
        self.intern(Op::InMemory {
            name: name.into(),
            schema,
            rows,
        })
    }

    pub fn cached(&mut self, table: NodeId, name: impl Into<String>) -> Result<NodeId> {
        self.intern(Op::Cached {
            name: name.into(),
            table,
        })
    }

    /// A distinct reference to `table`, for self-joins.
    pub fn view(&mut self, table: NodeId) -> Result<NodeId> {
        let tag = self.views;
        self.intern(Op::View { table, tag })
    }

    pub fn filter(&mut self, table: NodeId, predicates: Vec<NodeId>) -> Result<NodeId> {
        self.intern(Op::Filter { table, predicates })
    }

    pub fn project<N: Into<String>>(
        &mut self,
        table: NodeId,
        columns: impl IntoIterator<Item = (N, NodeId)>,
    ) -> Result<NodeId> {
        let columns = columns.into_iter().map(|(n, id)| (n.into(), id)).collect();
        self.intern(Op::Project { table, columns })
    }

    pub fn join(
        &mut self,
        kind: JoinKind,
        left: NodeId,
        right: NodeId,
        predicates: Vec<NodeId>,
    ) -> Result<NodeId> {
        self.intern(Op::Join {
            kind,
            left,
            right,
            predicates,
        })
    }

    pub fn aggregate<N: Into<String>, M: Into<String>>(
        &mut self,
        table: NodeId,
        by: impl IntoIterator<Item = (N, NodeId)>,
        metrics: impl IntoIterator<Item = (M, NodeId)>,
    ) -> Result<NodeId> {
        self.intern(Op::Aggregate {
            table,
            by: by.into_iter().map(|(n, id)| (n.into(), id)).collect(),
            metrics: metrics.into_iter().map(|(n, id)| (n.into(), id)).collect(),
        })
    }

    pub fn sort(&mut self, table: NodeId, keys: Vec<SortKey>) -> Result<NodeId> {
        self.intern(Op::Sort { table, keys })
    }

    pub fn limit(&mut self, table: NodeId, n: u64, offset: u64) -> Result<NodeId> {
        self.intern(Op::Limit { table, n, offset })
    }

    /// Literal typed by inference.
    pub fn literal(&mut self, value: impl Into<Value>) -> Result<NodeId> {
        let value = value.into();
        let dtype = value.infer()?;
        self.intern(Op::Literal { value, dtype })
    }

    pub fn literal_as(&mut self, value: impl Into<Value>, dtype: DataType) -> Result<NodeId> {
        self.intern(Op::Literal {
            value: value.into(),
            dtype,
        })
    }

    pub fn param(&mut self, name: impl Into<String>, dtype: DataType) -> Result<NodeId> {
        self.intern(Op::Param {
            name: name.into(),
            dtype,
        })
    }

    pub fn column(&mut self, table: NodeId, name: impl Into<String>) -> Result<NodeId> {
        self.intern(Op::Column {
            table,
            name: name.into(),
        })
    }

    pub fn cast(&mut self, arg: NodeId, to: DataType) -> Result<NodeId> {
        self.intern(Op::Cast { arg, to })
    }

    pub fn binary(&mut self, op: BinaryOp, left: NodeId, right: NodeId) -> Result<NodeId> {
        self.intern(Op::Binary { op, left, right })
    }

    pub fn eq(&mut self, left: NodeId, right: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::Eq, left, right)
    }

    pub fn gt(&mut self, left: NodeId, right: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::Gt, left, right)
    }

    pub fn lt(&mut self, left: NodeId, right: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::Lt, left, right)
    }

    pub fn and(&mut self, left: NodeId, right: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::And, left, right)
    }

    pub fn unary(&mut self, op: UnaryOp, arg: NodeId) -> Result<NodeId> {
        self.intern(Op::Unary { op, arg })
    }

    pub fn not(&mut self, arg: NodeId) -> Result<NodeId> {
        self.unary(UnaryOp::Not, arg)
    }

    pub fn reduction(
        &mut self,
        func: ReductionFunc,
        arg: Option<NodeId>,
        filter: Option<NodeId>,
    ) -> Result<NodeId> {
        self.intern(Op::Reduction { func, arg, filter })
    }

    pub fn analytic(&mut self, func: AnalyticFunc, arg: Option<NodeId>) -> Result<NodeId> {
        self.intern(Op::Analytic { func, arg })
    }

    pub fn window(
        &mut self,
        func: NodeId,
        partition_by: Vec<NodeId>,
        order_by: Vec<SortKey>,
        frame: Option<FrameSpec>,
    ) -> Result<NodeId> {
        self.intern(Op::Window {
            func,
            partition_by,
            order_by,
            frame,
        })
    }

    pub fn integer_to_timestamp(&mut self, arg: NodeId, unit: TimestampUnit) -> Result<NodeId> {
        self.intern(Op::IntegerToTimestamp { arg, unit })
    }
}

fn binary_type(op: BinaryOp, l: &DataType, r: &DataType) -> Result<DataType> {
    let nullable = l.nullable || r.nullable;
    let mismatch = || Error::Type(format!("{op:?} is not defined for {l} and {r}"));
    let out = match op {
        BinaryOp::Add | BinaryOp::Sub => {
            if l.is_numeric() && r.is_numeric() {
                l.common_supertype(r)?
            } else if (l.is_timestamp() || matches!(l.kind, TypeKind::Date)) && r.is_interval() {
                l.clone()
            } else if op == BinaryOp::Add && l.is_interval() && r.is_timestamp() {
                r.clone()
            } else {
                return Err(mismatch());
            }
        }
        BinaryOp::Mul | BinaryOp::Mod => {
            if !(l.is_numeric() && r.is_numeric()) {
                return Err(mismatch());
            }
            l.common_supertype(r)?
        }
        BinaryOp::Div => {
            if !(l.is_numeric() && r.is_numeric()) {
                return Err(mismatch());
            }
            if l.is_decimal() && r.is_decimal() {
                l.common_supertype(r)?
            } else {
                DataType::float64()
            }
        }
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let comparable = l.common_supertype(r).is_ok()
                || (l.is_timestamp() && r.is_timestamp())
                || (l.is_temporal() && r.is_string());
            if !comparable {
                return Err(mismatch());
            }
            DataType::boolean()
        }
        BinaryOp::And | BinaryOp::Or => {
            let ok = |t: &DataType| t.is_boolean() || t.is_null();
            if !(ok(l) && ok(r)) {
                return Err(mismatch());
            }
            DataType::boolean()
        }
        BinaryOp::Like | BinaryOp::ILike => {
            if !(l.is_string() && r.is_string()) {
                return Err(mismatch());
            }
            DataType::boolean()
        }
    };
    Ok(out.with_nullable(nullable))
}

fn reduction_type(func: ReductionFunc, arg: Option<&DataType>) -> Result<DataType> {
    let require = || Error::Type(format!("{func:?} requires an argument"));
    Ok(match func {
        ReductionFunc::Count | ReductionFunc::CountDistinct | ReductionFunc::ApproxCountDistinct => {
            if func != ReductionFunc::Count && arg.is_none() {
                return Err(require());
            }
            DataType::int64().not_null()
        }
        ReductionFunc::Sum => {
            let t = arg.ok_or_else(require)?;
            match &t.kind {
                TypeKind::Boolean | TypeKind::Int { signed: true, .. } => DataType::int64(),
                TypeKind::Int { signed: false, .. } => DataType::uint(64),
                TypeKind::Float { .. } => DataType::float64(),
                TypeKind::Decimal { scale, .. } => DataType::decimal(38, *scale)?,
                _ => return Err(Error::Type(format!("sum is not defined for {t}"))),
            }
        }
        ReductionFunc::Mean => {
            let t = arg.ok_or_else(require)?;
            match &t.kind {
                TypeKind::Boolean | TypeKind::Int { .. } | TypeKind::Float { .. } => DataType::float64(),
                TypeKind::Decimal { scale, .. } => DataType::decimal(38, *scale)?,
                _ => return Err(Error::Type(format!("mean is not defined for {t}"))),
            }
        }
        ReductionFunc::Min | ReductionFunc::Max => arg.ok_or_else(require)?.clone().with_nullable(true),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users(graph: &mut Graph) -> NodeId {
        let schema = Schema::from_pairs([
            ("id", DataType::int32().not_null()),
            ("name", DataType::string()),
            ("age", DataType::int32()),
        ])
        .unwrap();
        graph.table("users", schema).unwrap()
    }

    #[test]
    fn test_interning_shares_identical_nodes() {
        let mut g = Graph::new();
        let t1 = users(&mut g);
        let t2 = users(&mut g);
        assert_eq!(t1, t2);

        let a = g.column(t1, "age").unwrap();
        let b = g.column(t2, "age").unwrap();
        assert_eq!(a, b);
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn test_filter_preserves_schema() {
        let mut g = Graph::new();
        let t = users(&mut g);
        let age = g.column(t, "age").unwrap();
        let lit = g.literal(18).unwrap();
        let pred = g.gt(age, lit).unwrap();
        let f = g.filter(t, vec![pred]).unwrap();
        assert_eq!(g.schema(f).unwrap(), g.schema(t).unwrap());
    }

    #[test]
    fn test_filter_rejects_non_boolean() {
        let mut g = Graph::new();
        let t = users(&mut g);
        let age = g.column(t, "age").unwrap();
        assert!(matches!(g.filter(t, vec![age]), Err(Error::Type(_))));
    }

    #[test]
    fn test_unknown_column() {
        let mut g = Graph::new();
        let t = users(&mut g);
        assert!(matches!(g.column(t, "missing"), Err(Error::Type(_))));
    }

    #[test]
    fn test_predicates_reject_aggregates_and_windows() {
        let mut g = Graph::new();
        let t = users(&mut g);
        let age = g.column(t, "age").unwrap();
        let mean = g.reduction(ReductionFunc::Mean, Some(age), None).unwrap();
        let above = g.gt(age, mean).unwrap();
        assert!(matches!(g.filter(t, vec![above]), Err(Error::Type(_))));

        let whole = g.window(mean, vec![], vec![], None).unwrap();
        let above = g.gt(age, whole).unwrap();
        assert!(matches!(g.filter(t, vec![above]), Err(Error::Type(_))));

        let v = g.view(t).unwrap();
        let other = g.column(v, "age").unwrap();
        let on = g.gt(other, mean).unwrap();
        assert!(matches!(
            g.join(JoinKind::Inner, t, v, vec![on]),
            Err(Error::Type(_))
        ));

        let count = g.reduction(ReductionFunc::Count, None, None).unwrap();
        let lit = g.literal(1i64).unwrap();
        let plain = g.gt(count, lit).unwrap();
        let adults = g.gt(age, lit).unwrap();
        assert!(g.filter(t, vec![adults]).is_ok());
        assert!(matches!(g.filter(t, vec![plain]), Err(Error::Type(_))));
    }

    #[test]
    fn test_column_out_of_scope() {
        let mut g = Graph::new();
        let t = users(&mut g);
        let other = g
            .table("other", Schema::from_pairs([("x", DataType::boolean())]).unwrap())
            .unwrap();
        let x = g.column(other, "x").unwrap();
        assert!(matches!(g.filter(t, vec![x]), Err(Error::Invariant(_))));
    }

    #[test]
    fn test_self_join_requires_view() {
        let mut g = Graph::new();
        let t = users(&mut g);
        assert!(matches!(
            g.join(JoinKind::Inner, t, t, vec![]),
            Err(Error::Invariant(_))
        ));

        let v = g.view(t).unwrap();
        let l = g.column(t, "id").unwrap();
        let r = g.column(v, "id").unwrap();
        let on = g.eq(l, r).unwrap();
        let j = g.join(JoinKind::Left, t, v, vec![on]).unwrap();
        let schema = g.schema(j).unwrap();
        assert_eq!(schema.len(), 6);
        assert_eq!(schema.fields[3].name, "id_right");
        assert!(schema.fields[3].data_type.nullable);
    }

    #[test]
    fn test_views_are_distinct() {
        let mut g = Graph::new();
        let t = users(&mut g);
        assert_ne!(g.view(t).unwrap(), g.view(t).unwrap());
    }

    #[test]
    fn test_view_tag_overflow_is_invariant_violation() {
        let ops = vec![
            Op::Table {
                name: "t".to_string(),
                schema: Schema::from_pairs([("a", DataType::int8())]).unwrap(),
            },
            Op::View {
                table: NodeId(0),
                tag: u32::MAX,
            },
        ];
        assert!(matches!(Graph::from_ops(ops), Err(Error::Invariant(_))));
    }

    #[test]
    fn test_binary_promotion() {
        let mut g = Graph::new();
        let a = g.literal(1).unwrap();
        let b = g.literal(100_000).unwrap();
        let sum = g.binary(BinaryOp::Add, a, b).unwrap();
        assert_eq!(g.dtype(sum).unwrap(), &DataType::int32());

        let div = g.binary(BinaryOp::Div, a, b).unwrap();
        assert_eq!(g.dtype(div).unwrap(), &DataType::float64());

        let s = g.literal("x").unwrap();
        assert!(g.binary(BinaryOp::Add, a, s).is_err());
    }

    #[test]
    fn test_reduction_types() {
        let mut g = Graph::new();
        let t = users(&mut g);
        let age = g.column(t, "age").unwrap();
        let sum = g.reduction(ReductionFunc::Sum, Some(age), None).unwrap();
        assert_eq!(g.dtype(sum).unwrap(), &DataType::int64());
        let count = g.reduction(ReductionFunc::Count, None, None).unwrap();
        assert_eq!(g.dtype(count).unwrap(), &DataType::int64().not_null());
        let name = g.column(t, "name").unwrap();
        assert!(g.reduction(ReductionFunc::Mean, Some(name), None).is_err());
    }

    #[test]
    fn test_window_rank_requires_order() {
        let mut g = Graph::new();
        let t = users(&mut g);
        let rank = g.analytic(AnalyticFunc::Rank, None).unwrap();
        assert!(g.window(rank, vec![], vec![], None).is_err());
        let age = g.column(t, "age").unwrap();
        let w = g.window(rank, vec![], vec![SortKey::desc(age)], None).unwrap();
        assert_eq!(g.dtype(w).unwrap(), &DataType::int64().not_null());
    }

    #[test]
    fn test_literal_typing() {
        let mut g = Graph::new();
        let big = g.literal(2147483648i64).unwrap();
        assert_eq!(g.dtype(big).unwrap(), &DataType::int64());
        assert!(g.literal_as(300, DataType::int8()).is_err());
        let wide = Value::Decimal {
            digits: 123456,
            scale: 0,
        };
        let narrow = DataType::decimal(3, 0).unwrap();
        assert!(matches!(g.literal_as(wide, narrow), Err(Error::Type(_))));
    }

    #[test]
    fn test_memtable_rows_checked() {
        let mut g = Graph::new();
        let schema = Schema::from_pairs([("a", DataType::int64())]).unwrap();
        assert!(g.memtable(schema.clone(), vec![vec![Value::from("x")]]).is_err());
        let t = g.memtable(schema, vec![vec![Value::Int(1)]]).unwrap();
        match g.op(t).unwrap() {
            Op::InMemory { name, .. } => assert!(name.starts_with("_memtable_")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_serde_round_trip_revalidates() {
        let mut g = Graph::new();
        let t = users(&mut g);
        let age = g.column(t, "age").unwrap();
        let lit = g.literal(18).unwrap();
        let pred = g.gt(age, lit).unwrap();
        let f = g.filter(t, vec![pred]).unwrap();

        let json = serde_json::to_string(&g).unwrap();
        let parsed: Graph = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), g.len());
        assert_eq!(parsed.fingerprint(f).unwrap(), g.fingerprint(f).unwrap());
    }

    #[test]
    fn test_forward_reference_is_invariant_violation() {
        let ops = vec![
            Op::Column {
                table: NodeId(1),
                name: "a".to_string(),
            },
            Op::Table {
                name: "t".to_string(),
                schema: Schema::from_pairs([("a", DataType::int8())]).unwrap(),
            },
        ];
        assert!(matches!(Graph::from_ops(ops), Err(Error::Invariant(_))));

        let cyclic = vec![Op::Limit {
            table: NodeId(0),
            n: 1,
            offset: 0,
        }];
        assert!(matches!(Graph::from_ops(cyclic), Err(Error::Invariant(_))));
    }

    #[test]
    fn test_fingerprint_ignores_arena_position() {
        let mut g1 = Graph::new();
        let t = users(&mut g1);
        let lit = g1.literal(5).unwrap();
        let age = g1.column(t, "age").unwrap();
        let p = g1.gt(age, lit).unwrap();
        let f1 = g1.filter(t, vec![p]).unwrap();

        let mut g2 = Graph::new();
        g2.literal("unrelated").unwrap();
        let t = users(&mut g2);
        let age = g2.column(t, "age").unwrap();
        let lit = g2.literal(5).unwrap();
        let p = g2.gt(age, lit).unwrap();
        let f2 = g2.filter(t, vec![p]).unwrap();

        assert_eq!(g1.fingerprint(f1).unwrap(), g2.fingerprint(f2).unwrap());
    }

    #[test]
    fn test_extract_compacts() {
        let mut g = Graph::new();
        g.literal("garbage").unwrap();
        let t = users(&mut g);
        let (small, root) = g.extract(t).unwrap();
        assert_eq!(small.len(), 1);
        assert_eq!(small.schema(root).unwrap(), g.schema(t).unwrap());
    }
}
