//! Substrait backend

use crate::fragment::{Fragment, Layout, Rex};
use crate::functions::Function;
use crate::literal;
use crate::ops::{self, SubstraitRegistry};
use crate::types::{self, SubstraitTypes};
use deferql_compile::{Backend, BackendPolicy, Cx, Handle};
use deferql_ir::{Error, Graph, NodeId, Result, Value};
use substrait::proto::rel::RelType;
use substrait::proto::ReferenceRel;

#[derive(Debug, Clone)]
pub struct SubstraitBackend {
    registry: SubstraitRegistry,
    types: SubstraitTypes,
    policy: BackendPolicy,
}

impl SubstraitBackend {
    pub fn new() -> Self {
        Self {
            registry: ops::registry(),
            types: SubstraitTypes,
            policy: BackendPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: BackendPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for SubstraitBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for SubstraitBackend {
    type Fragment = Fragment;
    type Types = SubstraitTypes;
    type State = ();

    fn name(&self) -> &str {
        "substrait"
    }

    fn registry(&self) -> &SubstraitRegistry {
        &self.registry
    }

    fn types(&self) -> &SubstraitTypes {
        &self.types
    }

    fn policy(&self) -> &BackendPolicy {
        &self.policy
    }

    /// Moves the relation into its own plan relation; consumers refer to it
    /// by ordinal. Shared relations precede the root in the plan, so the
    /// ordinal is the position in the shared list.
    fn share(cx: &mut Cx<Self>, _: &Graph, id: NodeId, fragment: Fragment) -> Result<Fragment> {
        let rel = fragment.into_rel()?;
        let ordinal = cx.shared().len();
        let subtree_ordinal = i32::try_from(ordinal)
            .map_err(|_| Error::Invariant(format!("too many shared relations at {id}")))?;
        tracing::trace!(%id, ordinal, "Sharing relation");
        cx.push_shared(format!("s{ordinal}"), id, Fragment::Rel(rel));
        Ok(ops::wrap(RelType::Reference(ReferenceRel { subtree_ordinal })))
    }

    fn materialized(
        cx: &mut Cx<Self>,
        _: &Graph,
        _: NodeId,
        handle: &Handle<Fragment>,
    ) -> Result<Fragment> {
        ops::named_read(cx, &handle.name, &handle.schema)
    }

    fn restrict_time(
        cx: &mut Cx<Self>,
        graph: &Graph,
        id: NodeId,
        fragment: Fragment,
        column: &str,
        bounds: (Value, Value),
    ) -> Result<Fragment> {
        let schema = graph.schema(id)?;
        let index = schema
            .index_of(column)
            .ok_or_else(|| Error::Invariant(format!("{id} has no column '{column}'")))?;
        let native = cx.native_type(&schema.fields[index].data_type.clone().not_null())?;
        let (start, end) = bounds;
        let field = || Rex::Field { table: id, index };
        let bound = |value: &Value| -> Result<Rex> {
            Ok(Rex::Literal(literal::encode(value, &native)?))
        };
        let boolean = types::boolean(true);
        let condition = Rex::call(
            Function::And,
            vec![
                Rex::call(Function::Gte, vec![field(), bound(&start)?], boolean.clone()),
                Rex::call(Function::Lt, vec![field(), bound(&end)?], boolean.clone()),
            ],
            boolean,
        );
        Ok(ops::filter_rel(
            fragment.into_rel()?,
            condition.lower(&Layout::single(id))?,
        ))
    }
}
