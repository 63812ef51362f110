//! Compilation entry point bound to one backend session

use crate::backend::{Backend, NativeProgram};
use crate::cache::{Handle, MaterializationCache, MaterializationHost};
use crate::rewrite::rewrite;
use crate::scope::Params;
use crate::time::TimeContext;
use crate::translator::{Compiler, Cx};
use deferql_ir::{Error, Graph, NodeId, OpKind, Result, SchemaProvider};
use std::sync::Arc;
use uuid::Uuid;

/// Opaque identity of the backend session, passed through to translate
/// functions so fragments can name session-scoped objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub id: Uuid,
    pub name: String,
}

impl SessionHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// A backend plus the session-wide state compilations share.
///
/// `Session` is `Sync`: independent `compile` calls may run on separate
/// threads, each with its own scope; only the materialization cache is
/// shared between them.
pub struct Session<B: Backend> {
    backend: Arc<B>,
    handle: SessionHandle,
    cache: MaterializationCache<B::Fragment>,
    provider: Option<Arc<dyn SchemaProvider>>,
}

impl<B: Backend> Session<B> {
    pub fn new(backend: B) -> Self {
        let handle = SessionHandle::new(backend.name());
        Self {
            backend: Arc::new(backend),
            handle,
            cache: MaterializationCache::new(),
            provider: None,
        }
    }

    pub fn with_host(mut self, host: impl MaterializationHost<B::Fragment> + 'static) -> Self {
        self.cache = MaterializationCache::with_host(host);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn SchemaProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_handle(mut self, handle: SessionHandle) -> Self {
        self.handle = handle;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn cache(&self) -> &MaterializationCache<B::Fragment> {
        &self.cache
    }

    pub fn has_operation(&self, kind: OpKind) -> bool {
        self.backend.has_operation(kind)
    }

    /// Rewrite and translate the graph under `root`.
    pub fn compile(
        &self,
        graph: &Graph,
        root: NodeId,
        params: &Params,
        time: Option<&TimeContext>,
    ) -> Result<NativeProgram<B::Fragment>> {
        let span = tracing::debug_span!("compile", backend = self.backend.name(), root = %root);
        let _enter = span.enter();

        // Localized once here, never per node.
        let window = time
            .map(|t| t.canonicalize(self.backend.policy()))
            .transpose()?;
        let (graph, root) = rewrite(graph, root)?;
        tracing::trace!(nodes = graph.len(), "Rewrote graph");

        let cx = Cx::new(self.backend.clone(), self.handle.clone(), params.clone());
        Compiler::new(cx, &self.cache, &graph, window).compile(root)
    }

    pub fn register_materialized(
        &self,
        name: &str,
        program: NativeProgram<B::Fragment>,
    ) -> Result<Handle<B::Fragment>> {
        self.cache.register(name, program)
    }

    pub fn evict_materialized(&self, name: &str) -> Result<()> {
        self.cache.evict(name)
    }

    pub fn lookup_materialized(&self, name: &str) -> Option<Handle<B::Fragment>> {
        self.cache.lookup(name)
    }

    /// Compile `table`, register it under `name`, and return the handle plus
    /// a `Cached` node that later compilations translate as a reference.
    pub fn cache_table(
        &self,
        graph: &mut Graph,
        table: NodeId,
        name: &str,
    ) -> Result<(Handle<B::Fragment>, NodeId)> {
        let program = self.compile(graph, table, &Params::new(), None)?;
        let handle = self.register_materialized(name, program)?;
        let cached = graph.cached(table, name)?;
        Ok((handle, cached))
    }

    /// Scan node for a named table: materialized results first, then the
    /// schema provider. A scan of a materialized name compiles to a reference
    /// to that result for as long as it stays cached.
    pub fn table(&self, graph: &mut Graph, name: &str) -> Result<NodeId> {
        if let Some(handle) = self.cache.lookup(name) {
            return graph.table(name, handle.schema);
        }
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| Error::NotFound(format!("table '{name}' (no schema provider)")))?;
        graph.table_from(provider.as_ref(), name)
    }
}
