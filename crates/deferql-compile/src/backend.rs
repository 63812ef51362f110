//! Backend seam and compiled programs

use crate::cache::Handle;
use crate::policy::BackendPolicy;
use crate::translator::Cx;
use crate::types::TypeMapper;
use deferql_ir::{Graph, NodeId, OpKind, Output, Result, Schema, Value};
use deferql_registry::Registry;
use std::fmt;

/// One execution engine the compiler targets.
///
/// Translation of individual operations goes through [`Backend::registry`];
/// the associated functions cover the structural decisions the translator
/// makes around them.
pub trait Backend: Send + Sync + Sized + 'static {
    /// Native representation of one translated node.
    type Fragment: Clone + fmt::Debug + PartialEq + Send + Sync;
    type Types: TypeMapper;
    /// Per-compilation scratch state owned by [`Cx`].
    type State: Default;

    fn name(&self) -> &str;

    fn registry(&self) -> &Registry<Cx<Self>, Self::Fragment>;

    fn types(&self) -> &Self::Types;

    fn policy(&self) -> &BackendPolicy;

    /// Hoist a relation consumed by more than one parent and return the
    /// fragment every consumer uses to refer to it.
    fn share(
        cx: &mut Cx<Self>,
        graph: &Graph,
        id: NodeId,
        fragment: Self::Fragment,
    ) -> Result<Self::Fragment>;

    /// Reference to a previously materialized result.
    fn materialized(
        cx: &mut Cx<Self>,
        graph: &Graph,
        id: NodeId,
        handle: &Handle<Self::Fragment>,
    ) -> Result<Self::Fragment>;

    /// Restrict a scanned relation to `[start, end)` on `column`.
    fn restrict_time(
        cx: &mut Cx<Self>,
        graph: &Graph,
        id: NodeId,
        fragment: Self::Fragment,
        column: &str,
        bounds: (Value, Value),
    ) -> Result<Self::Fragment>;

    fn has_operation(&self, kind: OpKind) -> bool {
        self.registry().has_operation(kind)
    }
}

/// A relation hoisted out of the main fragment because several consumers
/// refer to it.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedFragment<F> {
    pub name: String,
    pub node: NodeId,
    pub fragment: F,
}

/// Staged rows the execution collaborator registers before running the
/// program, referenced from the fragment by name.
#[derive(Debug, Clone, PartialEq)]
pub struct MemTable {
    pub name: String,
    pub schema: Schema,
    pub rows: Vec<Vec<Value>>,
}

/// Result of one `compile` call.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeProgram<F> {
    pub root: F,
    /// In dependency order: an entry only refers to earlier entries.
    pub shared: Vec<SharedFragment<F>>,
    pub memtables: Vec<MemTable>,
    pub output: Output,
}

impl<F> NativeProgram<F> {
    pub fn schema(&self) -> Option<&Schema> {
        match &self.output {
            Output::Table(schema) => Some(schema),
            Output::Value(_) => None,
        }
    }
}
