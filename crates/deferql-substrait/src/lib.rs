//! Substrait backend for deferql
//!
//! Compiles operation graphs into Substrait relations for dataframe and
//! plan engines. Relations are built directly as `substrait::proto`
//! messages; value expressions stay symbolic ([`Rex`]) until the relation
//! consuming them fixes their input layout. A finished program assembles
//! into a [`Plan`](substrait::proto::Plan) with [`to_plan`].
//!
//! ```ignore
//! let session = Session::new(SubstraitBackend::new());
//! let program = session.compile(&graph, root, &Params::new(), None)?;
//! let bytes = deferql_substrait::to_bytes(&program)?;
//! ```

pub mod backend;
pub mod fragment;
pub mod functions;
pub mod literal;
pub mod ops;
pub mod plan;
pub mod types;

pub use backend::SubstraitBackend;
pub use fragment::{Fragment, Layout, Rex};
pub use functions::{Extension, Function};
pub use plan::{to_bytes, to_json, to_plan};
pub use types::SubstraitTypes;
