use super::Rewriter;
use deferql_ir::{NodeId, Op, Result};
use std::collections::HashMap;

impl Rewriter<'_> {
    /// Bare analytic or reduction anywhere in a projected expression → the
    /// same function over a window spanning the whole relation
    pub(super) fn window_analytic(
        &mut self,
        table: NodeId,
        columns: &[(String, NodeId)],
    ) -> Result<Option<NodeId>> {
        let mut changed = false;
        let mut wrapped = Vec::with_capacity(columns.len());
        for (name, expr) in columns {
            let windowed = self.windowed(*expr)?;
            changed |= windowed != *expr;
            wrapped.push((name.clone(), windowed));
        }
        if !changed {
            return Ok(None);
        }
        Ok(Some(self.graph.project(table, wrapped)?))
    }

    /// `expr` with every bare reduction or order-free analytic wrapped.
    /// Existing windows are left alone, including the functions inside them.
    fn windowed(&mut self, expr: NodeId) -> Result<NodeId> {
        let op = self.graph.op(expr)?.clone();
        match &op {
            Op::Reduction { .. } => return self.graph.window(expr, vec![], vec![], None),
            Op::Analytic { func, .. } if !func.needs_order() => {
                return self.graph.window(expr, vec![], vec![], None)
            }
            Op::Analytic { .. } | Op::Window { .. } => return Ok(expr),
            _ => {}
        }
        let mut remap = HashMap::new();
        for child in op.children() {
            let windowed = self.windowed(child)?;
            if windowed != child {
                remap.insert(child, windowed);
            }
        }
        if remap.is_empty() {
            return Ok(expr);
        }
        self.graph
            .intern(op.map_ids(|old| remap.get(&old).copied().unwrap_or(old)))
    }
}
