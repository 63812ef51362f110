//! Function catalog drawn from the standard Substrait extension files
//!
//! Anchors are fixed: a function's anchor is its position in
//! [`Function::ALL`] plus one, and every plan declares the whole catalog.

use substrait::proto::extensions::simple_extension_declaration::{
    ExtensionFunction, MappingType,
};
use substrait::proto::extensions::{
    SimpleExtensionDeclaration, SimpleExtensionUri, SimpleExtensionUrn,
};

const EXTENSION_BASE: &str = "https://github.com/substrait-io/substrait/blob/main/extensions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Extension {
    Comparison,
    Boolean,
    Arithmetic,
    String,
    AggregateGeneric,
    AggregateApprox,
}

impl Extension {
    pub const ALL: [Extension; 6] = [
        Extension::Comparison,
        Extension::Boolean,
        Extension::Arithmetic,
        Extension::String,
        Extension::AggregateGeneric,
        Extension::AggregateApprox,
    ];

    fn file(self) -> &'static str {
        match self {
            Extension::Comparison => "functions_comparison",
            Extension::Boolean => "functions_boolean",
            Extension::Arithmetic => "functions_arithmetic",
            Extension::String => "functions_string",
            Extension::AggregateGeneric => "functions_aggregate_generic",
            Extension::AggregateApprox => "functions_aggregate_approx",
        }
    }

    pub fn uri(self) -> String {
        format!("{EXTENSION_BASE}/{}.yaml", self.file())
    }

    pub fn urn(self) -> String {
        format!("extension:io.substrait:{}", self.file())
    }

    pub fn anchor(self) -> u32 {
        position(&Self::ALL, self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Function {
    Equal,
    NotEqual,
    Lt,
    Lte,
    Gt,
    Gte,
    IsNull,
    IsNotNull,
    IsNan,
    And,
    Or,
    Not,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    Negate,
    Like,
    Sum,
    Avg,
    Min,
    Max,
    Count,
    ApproxCountDistinct,
}

impl Function {
    pub const ALL: [Function; 25] = [
        Function::Equal,
        Function::NotEqual,
        Function::Lt,
        Function::Lte,
        Function::Gt,
        Function::Gte,
        Function::IsNull,
        Function::IsNotNull,
        Function::IsNan,
        Function::And,
        Function::Or,
        Function::Not,
        Function::Add,
        Function::Subtract,
        Function::Multiply,
        Function::Divide,
        Function::Modulus,
        Function::Negate,
        Function::Like,
        Function::Sum,
        Function::Avg,
        Function::Min,
        Function::Max,
        Function::Count,
        Function::ApproxCountDistinct,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Function::Equal => "equal",
            Function::NotEqual => "not_equal",
            Function::Lt => "lt",
            Function::Lte => "lte",
            Function::Gt => "gt",
            Function::Gte => "gte",
            Function::IsNull => "is_null",
            Function::IsNotNull => "is_not_null",
            Function::IsNan => "is_nan",
            Function::And => "and",
            Function::Or => "or",
            Function::Not => "not",
            Function::Add => "add",
            Function::Subtract => "subtract",
            Function::Multiply => "multiply",
            Function::Divide => "divide",
            Function::Modulus => "modulus",
            Function::Negate => "negate",
            Function::Like => "like",
            Function::Sum => "sum",
            Function::Avg => "avg",
            Function::Min => "min",
            Function::Max => "max",
            Function::Count => "count",
            Function::ApproxCountDistinct => "approx_count_distinct",
        }
    }

    pub fn extension(self) -> Extension {
        match self {
            Function::Equal
            | Function::NotEqual
            | Function::Lt
            | Function::Lte
            | Function::Gt
            | Function::Gte
            | Function::IsNull
            | Function::IsNotNull
            | Function::IsNan => Extension::Comparison,
            Function::And | Function::Or | Function::Not => Extension::Boolean,
            Function::Add
            | Function::Subtract
            | Function::Multiply
            | Function::Divide
            | Function::Modulus
            | Function::Negate
            | Function::Sum
            | Function::Avg
            | Function::Min
            | Function::Max => Extension::Arithmetic,
            Function::Like => Extension::String,
            Function::Count => Extension::AggregateGeneric,
            Function::ApproxCountDistinct => Extension::AggregateApprox,
        }
    }

    pub fn anchor(self) -> u32 {
        position(&Self::ALL, self)
    }

    pub fn from_anchor(anchor: u32) -> Option<Function> {
        let index = usize::try_from(anchor).ok()?.checked_sub(1)?;
        Self::ALL.get(index).copied()
    }
}

fn position<T: PartialEq + Copy>(all: &[T], item: T) -> u32 {
    let index = all.iter().position(|x| *x == item).unwrap_or_default();
    u32::try_from(index + 1).unwrap_or(u32::MAX)
}

/// Extension URIs, URNs and function declarations for the whole catalog.
#[allow(deprecated)]
pub fn declarations() -> (
    Vec<SimpleExtensionUri>,
    Vec<SimpleExtensionUrn>,
    Vec<SimpleExtensionDeclaration>,
) {
    let uris = Extension::ALL
        .iter()
        .map(|ext| SimpleExtensionUri {
            extension_uri_anchor: ext.anchor(),
            uri: ext.uri(),
        })
        .collect();
    let urns = Extension::ALL
        .iter()
        .map(|ext| SimpleExtensionUrn {
            extension_urn_anchor: ext.anchor(),
            urn: ext.urn(),
        })
        .collect();
    let functions = Function::ALL
        .iter()
        .map(|function| SimpleExtensionDeclaration {
            mapping_type: Some(MappingType::ExtensionFunction(ExtensionFunction {
                extension_uri_reference: function.extension().anchor(),
                extension_urn_reference: function.extension().anchor(),
                function_anchor: function.anchor(),
                name: function.name().to_string(),
            })),
        })
        .collect();
    (uris, urns, functions)
}
