use super::Rewriter;
use deferql_ir::{NodeId, Op, Result};

impl Rewriter<'_> {
    /// Identity cast elimination, `cast(x, T)` where `x: T` → `x`
    pub(super) fn cast_identity(&mut self, id: NodeId, arg: NodeId) -> Result<Option<NodeId>> {
        Ok((self.graph.dtype(arg)? == self.graph.dtype(id)?).then_some(arg))
    }

    /// Round-trip elimination, `cast(cast(x, W), T)` where `x: T` and `W`
    /// holds every value of `T` → `x`
    pub(super) fn cast_roundtrip(&mut self, id: NodeId, arg: NodeId) -> Result<Option<NodeId>> {
        let Op::Cast { arg: inner, to: wide } = self.graph.op(arg)? else {
            return Ok(None);
        };
        let original = self.graph.dtype(*inner)?;
        if original == self.graph.dtype(id)? && original.widens_losslessly_to(wide) {
            Ok(Some(*inner))
        } else {
            Ok(None)
        }
    }
}
