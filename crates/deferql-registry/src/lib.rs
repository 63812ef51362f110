//! Operation registry
//!
//! Maps each [`OpKind`] to the function that translates it for one backend.
//! A dialect starts from a baseline registry and layers overrides and
//! removals on top; the layering is resolved when the registry is built, so
//! lookups during compilation are a single map lookup.

use deferql_ir::{Error, Graph, NodeId, OpKind, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Translates one node given its children's translations, in
/// [`deferql_ir::Op::children`] order.
pub type TranslateFn<C, F> = fn(&mut C, &Graph, NodeId, Vec<F>) -> Result<F>;

pub struct Registry<C, F> {
    backend: String,
    version: String,
    rules: BTreeMap<OpKind, TranslateFn<C, F>>,
}

impl<C, F> Registry<C, F> {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            rules: BTreeMap::new(),
        }
    }

    /// Copy of this registry under a new backend name, ready for overrides.
    pub fn layer(&self, backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            version: self.version.clone(),
            rules: self.rules.clone(),
        }
    }

    /// Register `f` for `kind`, returning the entry it replaces.
    pub fn register(&mut self, kind: OpKind, f: TranslateFn<C, F>) -> Option<TranslateFn<C, F>> {
        let previous = self.rules.insert(kind, f);
        if previous.is_some() {
            tracing::trace!(backend = %self.backend, %kind, "Overriding translation");
        }
        previous
    }

    pub fn with(mut self, kind: OpKind, f: TranslateFn<C, F>) -> Self {
        self.register(kind, f);
        self
    }

    pub fn without(mut self, kind: OpKind) -> Self {
        self.rules.remove(&kind);
        self
    }

    pub fn lookup(&self, kind: OpKind) -> Result<TranslateFn<C, F>> {
        self.rules
            .get(&kind)
            .copied()
            .ok_or_else(|| Error::unsupported(kind, &self.backend))
    }

    pub fn has_operation(&self, kind: OpKind) -> bool {
        self.rules.contains_key(&kind)
    }

    /// Supported kinds in a stable order.
    pub fn operations(&self) -> impl Iterator<Item = OpKind> + '_ {
        self.rules.keys().copied()
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl<C, F> Clone for Registry<C, F> {
    fn clone(&self) -> Self {
        self.layer(self.backend.clone())
    }
}

impl<C, F> fmt::Debug for Registry<C, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("backend", &self.backend)
            .field("version", &self.version)
            .field("operations", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deferql_ir::{DataType, Op};

    type Rule = TranslateFn<(), String>;

    fn kind_name(_: &mut (), graph: &Graph, id: NodeId, children: Vec<String>) -> Result<String> {
        Ok(format!("{}({})", graph.op(id)?.kind(), children.join(", ")))
    }

    fn shouting(_: &mut (), graph: &Graph, id: NodeId, _: Vec<String>) -> Result<String> {
        Ok(graph.op(id)?.kind().to_string().to_uppercase())
    }

    fn baseline() -> Registry<(), String> {
        Registry::new("base")
            .with(OpKind::Literal, kind_name as Rule)
            .with(OpKind::Param, kind_name)
            .with(OpKind::Cast, kind_name)
    }

    #[test]
    fn test_lookup_and_unsupported() {
        let registry = baseline();
        assert!(registry.has_operation(OpKind::Literal));
        assert!(!registry.has_operation(OpKind::Join));

        let err = registry.lookup(OpKind::Join).unwrap_err();
        assert_eq!(
            err,
            Error::UnsupportedOperation {
                kind: OpKind::Join,
                backend: "base".to_string()
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_layering_overrides_and_removes() {
        let base = baseline();
        let dialect = base.layer("dialect").with(OpKind::Literal, shouting).without(OpKind::Cast);

        let mut g = Graph::new();
        let lit = g.literal(1).unwrap();

        let f = dialect.lookup(OpKind::Literal).unwrap();
        assert_eq!(f(&mut (), &g, lit, vec![]).unwrap(), "LITERAL");
        assert!(!dialect.has_operation(OpKind::Cast));
        assert!(dialect.has_operation(OpKind::Param));

        // The baseline is untouched.
        let f = base.lookup(OpKind::Literal).unwrap();
        assert_eq!(f(&mut (), &g, lit, vec![]).unwrap(), "Literal()");
        assert!(base.has_operation(OpKind::Cast));
    }

    #[test]
    fn test_operations_are_ordered() {
        let ops: Vec<_> = baseline().operations().collect();
        assert_eq!(ops, vec![OpKind::Literal, OpKind::Param, OpKind::Cast]);
    }

    #[test]
    fn test_dispatch_uses_children() {
        let registry = baseline();
        let mut g = Graph::new();
        let lit = g.literal(1).unwrap();
        let cast = g.cast(lit, DataType::int64()).unwrap();
        let Op::Cast { arg, .. } = g.op(cast).unwrap().clone() else {
            panic!("expected cast");
        };
        let f = registry.lookup(OpKind::Literal).unwrap();
        let child = f(&mut (), &g, arg, vec![]).unwrap();
        let f = registry.lookup(OpKind::Cast).unwrap();
        assert_eq!(f(&mut (), &g, cast, vec![child]).unwrap(), "Cast(Literal())");
    }
}
