//! Memoized bottom-up translation of an operation graph

use crate::backend::{Backend, MemTable, NativeProgram, SharedFragment};
use crate::cache::{Handle, MaterializationCache};
use crate::policy::BackendPolicy;
use crate::scope::{Params, Scope};
use crate::session::SessionHandle;
use crate::time::TimeWindow;
use crate::types::TypeMapper;
use deferql_ir::{DataType, Error, Graph, NodeId, Op, Result, Schema, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Context handed to every translate function during one compilation.
pub struct Cx<B: Backend> {
    backend: Arc<B>,
    session: SessionHandle,
    params: Params,
    window: Option<TimeWindow>,
    shared: Vec<SharedFragment<B::Fragment>>,
    memtables: Vec<MemTable>,
    pub state: B::State,
}

impl<B: Backend> Cx<B> {
    pub fn new(backend: Arc<B>, session: SessionHandle, params: Params) -> Self {
        Self {
            backend,
            session,
            params,
            window: None,
            shared: Vec::new(),
            memtables: Vec::new(),
            state: B::State::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn policy(&self) -> &BackendPolicy {
        self.backend.policy()
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn window(&self) -> Option<&TimeWindow> {
        self.window.as_ref()
    }

    /// Bound value of the parameter node `id`, checked against its type.
    pub fn param(&self, graph: &Graph, id: NodeId) -> Result<Value> {
        let Op::Param { name, dtype } = graph.op(id)? else {
            return Err(Error::Invariant(format!("{id} is not a parameter")));
        };
        let value = self
            .params
            .get(name)
            .ok_or_else(|| Error::UnboundParameter(name.clone()))?;
        if !value.conforms_to(dtype) {
            return Err(Error::Type(format!(
                "parameter '{name}' is declared {dtype}, bound to {value:?}"
            )));
        }
        Ok(value.clone())
    }

    /// Native type for `dtype` under the backend's coercion policy.
    pub fn native_type(
        &self,
        dtype: &DataType,
    ) -> Result<<B::Types as TypeMapper>::Native> {
        let (native, _) = self.backend.types().coerce(dtype, self.backend.policy())?;
        Ok(native)
    }

    /// Stage in-memory rows for registration by the execution collaborator.
    pub fn register_memtable(&mut self, name: &str, schema: &Schema, rows: &[Vec<Value>]) {
        if self.memtables.iter().any(|m| m.name == name) {
            return;
        }
        tracing::debug!(name, rows = rows.len(), "Registering in-memory table");
        self.memtables.push(MemTable {
            name: name.to_string(),
            schema: schema.clone(),
            rows: rows.to_vec(),
        });
    }

    /// Append a hoisted relation; returns its position in the program.
    pub fn push_shared(&mut self, name: String, node: NodeId, fragment: B::Fragment) -> usize {
        self.shared.push(SharedFragment {
            name,
            node,
            fragment,
        });
        self.shared.len() - 1
    }

    pub fn shared(&self) -> &[SharedFragment<B::Fragment>] {
        &self.shared
    }
}

/// Per-call compilation over a graph that has already been rewritten.
pub(crate) struct Compiler<'a, B: Backend> {
    cx: Cx<B>,
    cache: &'a MaterializationCache<B::Fragment>,
    graph: &'a Graph,
    scope: Scope<B::Fragment>,
    /// Cache entries seen while planning; later steps consult only these.
    materialized: HashMap<NodeId, Handle<B::Fragment>>,
}

impl<'a, B: Backend> Compiler<'a, B> {
    pub(crate) fn new(
        cx: Cx<B>,
        cache: &'a MaterializationCache<B::Fragment>,
        graph: &'a Graph,
        window: Option<TimeWindow>,
    ) -> Self {
        let mut cx = cx;
        cx.window = window.clone();
        Self {
            cx,
            cache,
            graph,
            scope: Scope::new(window),
            materialized: HashMap::new(),
        }
    }

    pub(crate) fn compile(mut self, root: NodeId) -> Result<NativeProgram<B::Fragment>> {
        let order = self.plan(root)?;
        self.check_support(&order)?;
        let shared = self.shared_relations(&order, root)?;

        for id in &order {
            let fragment = self.translate(*id)?;
            let fragment = if shared.contains(id) {
                B::share(&mut self.cx, self.graph, *id, fragment)?
            } else {
                fragment
            };
            self.scope.insert(*id, fragment)?;
        }

        let root_fragment = self
            .scope
            .get(root)
            .cloned()
            .ok_or_else(|| Error::Invariant(format!("root {root} was not translated")))?;
        tracing::debug!(
            backend = self.cx.backend.name(),
            nodes = order.len(),
            shared = self.cx.shared.len(),
            memtables = self.cx.memtables.len(),
            materialized = self.materialized.len(),
            "Compiled graph"
        );
        Ok(NativeProgram {
            root: root_fragment,
            shared: self.cx.shared,
            memtables: self.cx.memtables,
            output: self.graph.get(root)?.output.clone(),
        })
    }

    /// Nodes to translate, children before parents. Each cache lookup
    /// happens here, once; the subtree under a materialized node is skipped.
    fn plan(&mut self, root: NodeId) -> Result<Vec<NodeId>> {
        let graph = self.graph;
        let mut seen = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let op = graph.op(id)?;
            if let Some(handle) = self.lookup(id, op)? {
                self.materialized.insert(id, handle);
                continue;
            }
            stack.extend(op.children());
        }
        Ok(seen.into_iter().collect())
    }

    /// Cached nodes, and scans naming a cached result, resolve to the
    /// registered handle.
    fn lookup(&self, id: NodeId, op: &Op) -> Result<Option<Handle<B::Fragment>>> {
        match op {
            Op::Cached { name, .. } => Ok(self.cache.lookup(name)),
            Op::Table { name, schema } => match self.cache.lookup(name) {
                Some(handle) if handle.schema != *schema => Err(Error::Schema(format!(
                    "scan {id} of '{name}' disagrees with the schema materialized under that name"
                ))),
                found => Ok(found),
            },
            _ => Ok(None),
        }
    }

    fn check_support(&self, order: &[NodeId]) -> Result<()> {
        let registry = self.cx.backend.registry();
        for id in order {
            if self.materialized.contains_key(id) {
                continue;
            }
            let op = self.graph.op(*id)?;
            if !registry.has_operation(op.kind()) {
                return Err(Error::unsupported(op.kind(), self.cx.backend.name()));
            }
        }
        Ok(())
    }

    /// Relations with more than one consumer among the planned nodes.
    fn shared_relations(&self, order: &[NodeId], root: NodeId) -> Result<BTreeSet<NodeId>> {
        let mut consumers: HashMap<NodeId, usize> = HashMap::new();
        for id in order {
            if self.materialized.contains_key(id) {
                continue;
            }
            for child in self.graph.op(*id)?.children() {
                *consumers.entry(child).or_default() += 1;
            }
        }
        let mut shared = BTreeSet::new();
        for (id, count) in consumers {
            if count > 1 && id != root && self.graph.get(id)?.is_table() {
                shared.insert(id);
            }
        }
        Ok(shared)
    }

    fn translate(&mut self, id: NodeId) -> Result<B::Fragment> {
        if let Some(handle) = self.materialized.get(&id) {
            tracing::trace!(%id, name = %handle.name, "Referencing materialized result");
            return B::materialized(&mut self.cx, self.graph, id, handle);
        }

        let op = self.graph.op(id)?;
        let children = op
            .children()
            .into_iter()
            .map(|child| {
                self.scope.get(child).cloned().ok_or_else(|| {
                    Error::Invariant(format!("{child} used by {id} was not translated first"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let kind = op.kind();
        let translate = self.cx.backend.registry().lookup(kind)?;
        tracing::trace!(%id, %kind, "Translating node");
        let fragment = translate(&mut self.cx, self.graph, id, children)?;

        match op {
            Op::Table { schema, .. } | Op::InMemory { schema, .. } => self.restrict(id, schema, fragment),
            _ => Ok(fragment),
        }
    }

    fn restrict(&mut self, id: NodeId, schema: &Schema, fragment: B::Fragment) -> Result<B::Fragment> {
        let Some(window) = self.cx.window.clone() else {
            return Ok(fragment);
        };
        match schema.find_field(&window.column) {
            Some(field) if window.applies_to(&field.data_type) => {
                let bounds = window.bounds_for(&field.data_type)?;
                tracing::trace!(%id, column = %window.column, "Restricting scan to time window");
                B::restrict_time(&mut self.cx, self.graph, id, fragment, &window.column, bounds)
            }
            _ => Ok(fragment),
        }
    }
}
