//! Translated fragments
//!
//! Substrait addresses columns by position in the input record, and a
//! column's position is only known once the consuming relation lays out its
//! inputs. Value fragments therefore stay symbolic ([`Rex`]) until a
//! relational rule lowers them against a [`Layout`].

use crate::functions::Function;
use deferql_ir::{Error, NodeId, Result};
use substrait::proto::aggregate_function::AggregationInvocation;
use substrait::proto::expression::field_reference::{ReferenceType, RootType};
use substrait::proto::expression::reference_segment::{self, StructField};
use substrait::proto::expression::{
    self as expr, FieldReference, Literal, ReferenceSegment, RexType, ScalarFunction,
};
use substrait::proto::function_argument::ArgType;
use substrait::proto::{
    AggregateFunction, AggregationPhase, Expression, FunctionArgument, FunctionOption, Rel, Type,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Rel(Rel),
    Expr(Rex),
}

impl Fragment {
    pub fn into_rel(self) -> Result<Rel> {
        match self {
            Fragment::Rel(rel) => Ok(rel),
            Fragment::Expr(rex) => Err(Error::Invariant(format!(
                "expected a relation, got expression {rex:?}"
            ))),
        }
    }

    pub fn into_rex(self) -> Result<Rex> {
        match self {
            Fragment::Expr(rex) => Ok(rex),
            Fragment::Rel(_) => Err(Error::Invariant(
                "expected an expression, got a relation".to_string(),
            )),
        }
    }
}

/// Expression whose column references are still symbolic.
#[derive(Debug, Clone, PartialEq)]
pub enum Rex {
    /// Column `index` of the relation produced by `table`.
    Field { table: NodeId, index: usize },
    Literal(Literal),
    Call {
        function: Function,
        args: Vec<Rex>,
        options: Vec<FunctionOption>,
        output: Type,
    },
    Cast { input: Box<Rex>, to: Type },
    /// Only meaningful as a measure of an aggregation.
    Aggregate {
        function: Function,
        args: Vec<Rex>,
        distinct: bool,
        filter: Option<Box<Rex>>,
        output: Type,
    },
}

impl Rex {
    pub fn call(function: Function, args: Vec<Rex>, output: Type) -> Self {
        Rex::Call {
            function,
            args,
            options: Vec::new(),
            output,
        }
    }

    /// Whether any field reference remains anywhere in the tree.
    pub fn references_fields(&self) -> bool {
        match self {
            Rex::Field { .. } => true,
            Rex::Literal(_) => false,
            Rex::Call { args, .. } => args.iter().any(Rex::references_fields),
            Rex::Cast { input, .. } => input.references_fields(),
            Rex::Aggregate { args, filter, .. } => {
                args.iter().any(Rex::references_fields)
                    || filter.as_ref().is_some_and(|f| f.references_fields())
            }
        }
    }

    /// Replace every aggregate in the tree with a reference to the
    /// aggregation output `table`, collecting the aggregates in `measures`.
    /// `base` is the position of the first measure in that output.
    pub fn extract_measures(self, table: NodeId, base: usize, measures: &mut Vec<Rex>) -> Rex {
        match self {
            Rex::Aggregate { .. } => {
                measures.push(self);
                Rex::Field {
                    table,
                    index: base + measures.len() - 1,
                }
            }
            Rex::Call {
                function,
                args,
                options,
                output,
            } => Rex::Call {
                function,
                args: args
                    .into_iter()
                    .map(|arg| arg.extract_measures(table, base, measures))
                    .collect(),
                options,
                output,
            },
            Rex::Cast { input, to } => Rex::Cast {
                input: Box::new(input.extract_measures(table, base, measures)),
                to,
            },
            other => other,
        }
    }

    pub fn lower(&self, layout: &Layout) -> Result<Expression> {
        let rex_type = match self {
            Rex::Field { table, index } => {
                RexType::Selection(Box::new(field(layout.offset(*table, *index)?)))
            }
            Rex::Literal(literal) => RexType::Literal(literal.clone()),
            Rex::Call {
                function,
                args,
                options,
                output,
            } => RexType::ScalarFunction(ScalarFunction {
                function_reference: function.anchor(),
                arguments: arguments(args, layout)?,
                options: options.clone(),
                output_type: Some(output.clone()),
                ..Default::default()
            }),
            Rex::Cast { input, to } => RexType::Cast(Box::new(expr::Cast {
                r#type: Some(to.clone()),
                input: Some(Box::new(input.lower(layout)?)),
                failure_behavior: expr::cast::FailureBehavior::ThrowException as i32,
                ..Default::default()
            })),
            Rex::Aggregate { function, .. } => {
                return Err(Error::Invariant(format!(
                    "aggregate {} outside of an aggregation",
                    function.name()
                )))
            }
        };
        Ok(Expression {
            rex_type: Some(rex_type),
        })
    }

    /// The aggregate call plus its lowered filter.
    pub fn lower_measure(&self, layout: &Layout) -> Result<(AggregateFunction, Option<Expression>)> {
        let Rex::Aggregate {
            function,
            args,
            distinct,
            filter,
            output,
        } = self
        else {
            return Err(Error::Invariant(format!("{self:?} is not an aggregate")));
        };
        let invocation = if *distinct {
            AggregationInvocation::Distinct
        } else {
            AggregationInvocation::All
        };
        let call = AggregateFunction {
            function_reference: function.anchor(),
            arguments: arguments(args, layout)?,
            output_type: Some(output.clone()),
            phase: AggregationPhase::InitialToResult as i32,
            invocation: invocation as i32,
            ..Default::default()
        };
        let filter = filter.as_ref().map(|f| f.lower(layout)).transpose()?;
        Ok((call, filter))
    }
}

fn arguments(args: &[Rex], layout: &Layout) -> Result<Vec<FunctionArgument>> {
    args.iter()
        .map(|arg| {
            Ok(FunctionArgument {
                arg_type: Some(ArgType::Value(arg.lower(layout)?)),
            })
        })
        .collect()
}

/// Direct reference to field `index` of the input record.
pub fn field(index: usize) -> FieldReference {
    FieldReference {
        reference_type: Some(ReferenceType::DirectReference(ReferenceSegment {
            reference_type: Some(reference_segment::ReferenceType::StructField(Box::new(
                StructField {
                    field: i32::try_from(index).unwrap_or(i32::MAX),
                    child: None,
                },
            ))),
        })),
        root_type: Some(RootType::RootReference(
            expr::field_reference::RootReference {},
        )),
    }
}

/// Where each input relation's columns start in the record a relational
/// operator sees.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    inputs: Vec<(NodeId, usize)>,
}

impl Layout {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(table: NodeId) -> Self {
        Self {
            inputs: vec![(table, 0)],
        }
    }

    /// `left` columns first, then `right` after `left_width` of them.
    pub fn pair(left: NodeId, right: NodeId, left_width: usize) -> Self {
        Self {
            inputs: vec![(left, 0), (right, left_width)],
        }
    }

    fn offset(&self, table: NodeId, index: usize) -> Result<usize> {
        self.inputs
            .iter()
            .find(|(id, _)| *id == table)
            .map(|(_, start)| start + index)
            .ok_or_else(|| Error::Invariant(format!("column of {table} is not an input here")))
    }
}
