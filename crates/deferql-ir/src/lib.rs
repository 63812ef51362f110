//! deferql intermediate representation
//!
//! Engine-neutral types, literal values, and the interned operation graph
//! that backends compile. Graphs serialize deterministically and carry a
//! SHA-256 fingerprint per root for caching.

pub mod error;
pub mod graph;
pub mod provider;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use graph::{
    AnalyticFunc, BinaryOp, FrameBound, FrameMode, FrameSpec, Graph, JoinKind, Node, NodeId, Op,
    OpKind, Output, ReductionFunc, SortKey, TimestampUnit, UnaryOp,
};
pub use provider::{MemorySchemaProvider, SchemaProvider};
pub use types::{DataType, Field, IntervalUnit, Schema, TypeKind, MAX_DECIMAL_PRECISION};
pub use value::Value;
