use super::Rewriter;
use deferql_ir::{NodeId, Op, Result};
use std::collections::HashMap;

impl Rewriter<'_> {
    /// Filter fusion, `filter(filter(t, p), q)` → `filter(t, p ++ q)` with
    /// the columns of `q` re-pointed at `t`
    pub(super) fn filter_fusion(
        &mut self,
        table: NodeId,
        predicates: &[NodeId],
    ) -> Result<Option<NodeId>> {
        let Op::Filter {
            table: base,
            predicates: inner,
        } = self.graph.op(table)?.clone()
        else {
            return Ok(None);
        };
        let mut fused = inner;
        for predicate in predicates {
            let predicate = self.retarget(*predicate, table, base)?;
            if !fused.contains(&predicate) {
                fused.push(predicate);
            }
        }
        Ok(Some(self.graph.filter(base, fused)?))
    }

    /// Limit fusion, `limit(limit(t, n1, o1), n2, o2)` → one limit with the
    /// intersected row range
    pub(super) fn limit_fusion(&mut self, table: NodeId, n: u64, offset: u64) -> Result<Option<NodeId>> {
        let Op::Limit {
            table: base,
            n: inner_n,
            offset: inner_offset,
        } = *self.graph.op(table)?
        else {
            return Ok(None);
        };
        let n = n.min(inner_n.saturating_sub(offset));
        Ok(Some(self.graph.limit(base, n, inner_offset.saturating_add(offset))?))
    }

    /// Identity projection, selecting every column of `t` in order → `t`
    pub(super) fn identity_projection(
        &mut self,
        table: NodeId,
        columns: &[(String, NodeId)],
    ) -> Result<Option<NodeId>> {
        let schema = self.graph.schema(table)?;
        if columns.len() != schema.len() {
            return Ok(None);
        }
        for ((name, expr), field) in columns.iter().zip(&schema.fields) {
            if *name != field.name {
                return Ok(None);
            }
            match self.graph.op(*expr)? {
                Op::Column { table: t, name: c } if *t == table && *c == field.name => {}
                _ => return Ok(None),
            }
        }
        Ok(Some(table))
    }

    /// Copy of `expr` with every column of `from` replaced by the same
    /// column of `to`. Both relations must have the same schema.
    fn retarget(&mut self, expr: NodeId, from: NodeId, to: NodeId) -> Result<NodeId> {
        if !self.graph.free_tables(expr)?.contains(&from) {
            return Ok(expr);
        }
        let op = self.graph.op(expr)?.clone();
        if let Op::Column { table, name } = &op {
            return if *table == from {
                self.graph.column(to, name.clone())
            } else {
                Ok(expr)
            };
        }
        let mut mapped = HashMap::new();
        for child in op.children() {
            let new = self.retarget(child, from, to)?;
            mapped.insert(child, new);
        }
        self.graph
            .intern(op.map_ids(|c| mapped.get(&c).copied().unwrap_or(c)))
    }
}
