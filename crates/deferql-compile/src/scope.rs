//! Per-compilation translation memo and parameter bindings

use crate::time::TimeWindow;
use deferql_ir::{Error, NodeId, Result, Value};
use std::collections::{BTreeMap, HashMap};

/// Parameter bindings by parameter name.
pub type Params = BTreeMap<String, Value>;

/// Translated fragments keyed by node and time context.
///
/// Built fresh for every compile call and never shared between calls.
#[derive(Debug)]
pub struct Scope<F> {
    window: Option<TimeWindow>,
    memo: HashMap<(NodeId, Option<TimeWindow>), F>,
}

impl<F> Scope<F> {
    pub fn new(window: Option<TimeWindow>) -> Self {
        Self {
            window,
            memo: HashMap::new(),
        }
    }

    pub fn window(&self) -> Option<&TimeWindow> {
        self.window.as_ref()
    }

    pub fn get(&self, id: NodeId) -> Option<&F> {
        self.memo.get(&(id, self.window.clone()))
    }

    /// Record the translation of `id`; a node is translated at most once.
    pub fn insert(&mut self, id: NodeId, fragment: F) -> Result<()> {
        let key = (id, self.window.clone());
        if self.memo.contains_key(&key) {
            return Err(Error::Invariant(format!("{id} translated twice in one scope")));
        }
        self.memo.insert(key, fragment);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }
}
