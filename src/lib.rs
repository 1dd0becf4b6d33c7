//! pgsync: PostgreSQL schema synchronization and typed binding generation.
//!
//! Developer-authored SQL files are parsed into statement records, linked
//! into a dependency order, and reconciled against a live database through
//! a single-socket wire client. After reconciliation the database is
//! re-introspected and typed Rust bindings are emitted for every routine
//! and user-defined type.

pub mod bindings;
pub mod cancel;
pub mod config;
pub mod diff;
pub mod driver;
pub mod error;
pub mod generate;
pub mod ident;
pub mod introspect;
pub mod linker;
pub mod parser;
pub mod pipeline;
pub mod planner;
pub mod source;
pub mod template;
pub mod wire;

pub use cancel::{AbortHandle, AbortSignal};
pub use config::Config;
pub use error::{PgSyncError, ServerError};
pub use ident::{SqlId, TypeId};
pub use linker::TopologicalSet;
pub use pipeline::Pipeline;
