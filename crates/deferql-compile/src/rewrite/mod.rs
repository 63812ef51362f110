//! Normalizing rewrites applied before translation
//!
//! Nodes are rebuilt bottom-up into a fresh arena. Each rebuilt node is
//! handed to the rules for its kind until none fires, so every rule sees
//! children that are already normalized. A rule must return a node with the
//! same output type or schema as the one it replaces.

mod casts;
mod logical;
mod relations;
mod windows;

use deferql_ir::{Error, Graph, NodeId, Op, Result};
use std::collections::HashMap;

/// Upper bound on rule applications at a single node.
const MAX_STEPS: usize = 64;

pub struct Rewriter<'a> {
    graph: &'a mut Graph,
}

/// Rewrite the graph under `root` to normal form, returning a compacted
/// graph and the new root.
pub fn rewrite(graph: &Graph, root: NodeId) -> Result<(Graph, NodeId)> {
    let mut out = Graph::new();
    let mut remap: HashMap<NodeId, NodeId> = HashMap::new();
    for id in graph.reachable(root)? {
        let op = graph.op(id)?.map_ids(|old| remap[&old]);
        let rebuilt = out.intern(op)?;
        let normalized = Rewriter { graph: &mut out }.normalize(rebuilt)?;
        remap.insert(id, normalized);
    }
    let new_root = remap[&root];
    out.extract(new_root)
}

impl Rewriter<'_> {
    fn normalize(&mut self, mut id: NodeId) -> Result<NodeId> {
        for _ in 0..MAX_STEPS {
            let Some((rule, replacement)) = self.step(id)? else {
                return Ok(id);
            };
            let before = &self.graph.get(id)?.output;
            let after = &self.graph.get(replacement)?.output;
            if before != after {
                return Err(Error::Invariant(format!(
                    "rewrite rule {rule} changed the output of {id}"
                )));
            }
            tracing::trace!(rule, from = %id, to = %replacement, "Applied rewrite");
            id = replacement;
        }
        Err(Error::Invariant(format!(
            "rewriting {id} did not reach a fixed point"
        )))
    }

    /// First rule that fires at `id`, in rule order.
    fn step(&mut self, id: NodeId) -> Result<Option<(&'static str, NodeId)>> {
        let op = self.graph.op(id)?.clone();
        let fired = match &op {
            Op::Cast { arg, .. } => match self.cast_identity(id, *arg)? {
                Some(n) => Some(("cast-identity", n)),
                None => self.cast_roundtrip(id, *arg)?.map(|n| ("cast-roundtrip", n)),
            },
            Op::Unary { op, arg } => match self.double_negation(id, *op, *arg)? {
                Some(n) => Some(("double-negation", n)),
                None => self.fold_not(id, *op, *arg)?.map(|n| ("not-literal", n)),
            },
            Op::Filter { table, predicates } => self
                .filter_fusion(*table, predicates)?
                .map(|n| ("filter-fusion", n)),
            Op::Limit { table, n, offset } => self
                .limit_fusion(*table, *n, *offset)?
                .map(|n| ("limit-fusion", n)),
            Op::Project { table, columns } => match self.identity_projection(*table, columns)? {
                Some(n) => Some(("identity-projection", n)),
                None => self
                    .window_analytic(*table, columns)?
                    .map(|n| ("window-analytic", n)),
            },
            _ => None,
        };
        Ok(fired.filter(|(_, replacement)| *replacement != id))
    }
}

#[cfg(test)]
mod tests;
