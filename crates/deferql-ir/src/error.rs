//! Error taxonomy shared by every deferql crate

use crate::graph::OpKind;
use crate::types::DataType;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The backend registry has no translation for this operation kind.
    #[error("Unsupported operation: {kind} is not supported by the {backend} backend")]
    UnsupportedOperation { kind: OpKind, backend: String },

    #[error("Type error: {0}")]
    Type(String),

    #[error("Unbound parameter: {0}")]
    UnboundParameter(String),

    /// Malformed or cyclic graph, duplicate materialization, and other
    /// programming defects.
    #[error("Invariant violation: {0}")]
    Invariant(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid time context: {0}")]
    InvalidTimeContext(String),

    #[error("Schema error: {0}")]
    Schema(String),

    /// A collaborator owning backend-side resources failed.
    #[error("Host error: {0}")]
    Host(String),
}

impl Error {
    pub fn unrepresentable(dtype: &DataType, backend: &str) -> Self {
        Error::Type(format!("{dtype} cannot be represented by the {backend} backend"))
    }

    pub fn unsupported(kind: OpKind, backend: impl Into<String>) -> Self {
        Error::UnsupportedOperation {
            kind,
            backend: backend.into(),
        }
    }

    /// Whether the caller may retry the call with a rewritten expression.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::UnsupportedOperation { .. })
    }
}
