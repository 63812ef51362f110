//! Plan assembly
//!
//! Shared relations become leading plan relations, referenced from the rest
//! of the plan by ordinal; the root comes last and carries the output
//! column names. Every plan declares the full function catalog.

use crate::fragment::{Fragment, Layout};
use crate::functions;
use deferql_compile::NativeProgram;
use deferql_ir::{Error, Output, Result};
use prost::Message;
use substrait::proto::expression::nested;
use substrait::proto::plan_rel::RelType as PlanRelType;
use substrait::proto::read_rel::{ReadType, VirtualTable};
use substrait::proto::rel::RelType;
use substrait::proto::rel_common::{Emit, EmitKind};
use substrait::proto::{
    r#type, NamedStruct, Plan, PlanRel, ProjectRel, ReadRel, Rel, RelCommon, RelRoot, Version,
};

pub const SUBSTRAIT_MINOR_VERSION: u32 = 53;

/// Column name of a scalar program's single output.
pub const VALUE_COLUMN: &str = "value";

pub fn to_plan(program: &NativeProgram<Fragment>) -> Result<Plan> {
    let mut relations = program
        .shared
        .iter()
        .map(|shared| {
            Ok(PlanRel {
                rel_type: Some(PlanRelType::Rel(shared.fragment.clone().into_rel()?)),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let (input, names) = match &program.output {
        Output::Table(schema) => (
            program.root.clone().into_rel()?,
            schema.names().map(str::to_string).collect(),
        ),
        Output::Value(_) => (scalar(&program.root)?, vec![VALUE_COLUMN.to_string()]),
    };
    relations.push(PlanRel {
        rel_type: Some(PlanRelType::Root(RelRoot {
            input: Some(input),
            names,
        })),
    });

    let (uris, urns, extensions) = functions::declarations();
    #[allow(deprecated)]
    let plan = Plan {
        version: Some(Version {
            minor_number: SUBSTRAIT_MINOR_VERSION,
            producer: "deferql".to_string(),
            ..Default::default()
        }),
        extension_uris: uris,
        extension_urns: urns,
        extensions,
        relations,
        ..Default::default()
    };
    tracing::debug!(
        relations = plan.relations.len(),
        memtables = program.memtables.len(),
        "Assembled Substrait plan"
    );
    Ok(plan)
}

/// Protobuf wire encoding of the assembled plan.
pub fn to_bytes(program: &NativeProgram<Fragment>) -> Result<Vec<u8>> {
    Ok(to_plan(program)?.encode_to_vec())
}

/// Proto3 JSON rendering of the assembled plan, for inspection.
pub fn to_json(program: &NativeProgram<Fragment>) -> Result<String> {
    serde_json::to_string_pretty(&to_plan(program)?)
        .map_err(|e| Error::Invariant(format!("Substrait plan does not serialize: {e}")))
}

/// A constant expression evaluated once over a single empty row.
fn scalar(root: &Fragment) -> Result<Rel> {
    let rex = root.clone().into_rex()?;
    if rex.references_fields() {
        return Err(Error::Invariant(
            "scalar program refers to columns outside any relation".to_string(),
        ));
    }
    let expression = rex.lower(&Layout::empty())?;
    let one_row = ReadRel {
        base_schema: Some(NamedStruct {
            names: vec![],
            r#struct: Some(r#type::Struct::default()),
        }),
        read_type: Some(ReadType::VirtualTable(VirtualTable {
            expressions: vec![nested::Struct { fields: vec![] }],
            ..Default::default()
        })),
        ..Default::default()
    };
    let project = ProjectRel {
        common: Some(RelCommon {
            emit_kind: Some(EmitKind::Emit(Emit {
                output_mapping: vec![0],
            })),
            ..Default::default()
        }),
        input: Some(Box::new(Rel {
            rel_type: Some(RelType::Read(Box::new(one_row))),
        })),
        expressions: vec![expression],
        ..Default::default()
    };
    Ok(Rel {
        rel_type: Some(RelType::Project(Box::new(project))),
    })
}
