//! deferql compiler core
//!
//! Compiles an operation graph into one backend's native program:
//!
//! 1. the time context is canonicalized and localized once,
//! 2. the graph is rewritten to normal form ([`rewrite`]),
//! 3. the translator walks it bottom-up, translating every node exactly once
//!    through the backend's operation registry and threading a per-call
//!    [`Scope`] of parameters, time window and translated fragments,
//! 4. shared relations, staged in-memory tables and references to
//!    materialized results are collected into a [`NativeProgram`].
//!
//! [`Session`] ties a [`Backend`] to the session-wide
//! [`MaterializationCache`].

pub mod backend;
pub mod cache;
pub mod config;
pub mod logging;
pub mod policy;
pub mod rewrite;
pub mod scope;
pub mod session;
pub mod time;
pub mod translator;
pub mod types;

pub use backend::{Backend, MemTable, NativeProgram, SharedFragment};
pub use cache::{Handle, MaterializationCache, MaterializationHost, NoopHost};
pub use config::{Config, ConfigError, LoggingConfig};
pub use policy::{BackendPolicy, NaiveTimestamps};
pub use rewrite::rewrite;
pub use scope::{Params, Scope};
pub use session::{Session, SessionHandle};
pub use time::{TimeBound, TimeContext, TimeWindow, DEFAULT_TIME_COLUMN};
pub use translator::Cx;
pub use types::{FidelityNote, TypeMapper};
