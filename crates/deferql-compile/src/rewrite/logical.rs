use super::Rewriter;
use deferql_ir::{NodeId, Op, Result, UnaryOp, Value};

impl Rewriter<'_> {
    /// Double negation elimination, `not(not(x))` → `x`
    pub(super) fn double_negation(
        &mut self,
        id: NodeId,
        op: UnaryOp,
        arg: NodeId,
    ) -> Result<Option<NodeId>> {
        if op != UnaryOp::Not {
            return Ok(None);
        }
        let Op::Unary {
            op: UnaryOp::Not,
            arg: inner,
        } = self.graph.op(arg)?
        else {
            return Ok(None);
        };
        // A null-typed `x` comes out of `not(not(x))` as boolean.
        Ok((self.graph.dtype(*inner)? == self.graph.dtype(id)?).then_some(*inner))
    }

    /// Constant folding, `not(true)` → `false` and `not(false)` → `true`
    pub(super) fn fold_not(&mut self, _id: NodeId, op: UnaryOp, arg: NodeId) -> Result<Option<NodeId>> {
        if op != UnaryOp::Not {
            return Ok(None);
        }
        let Op::Literal {
            value: Value::Bool(b),
            dtype,
        } = self.graph.op(arg)?
        else {
            return Ok(None);
        };
        let (negated, dtype) = (!*b, dtype.clone());
        Ok(Some(self.graph.literal_as(negated, dtype)?))
    }
}
