//! Query translation for cassandra-service
//!
//! Turns query objects into statements: normalization, predicate
//! compilation, view routing, statement rendering, plus the helpers that
//! evaluate and reconcile rows.

pub mod builder;
pub mod compiler;
pub mod filter;
pub mod normalize;
pub mod reconcile;
pub mod view;

pub use builder::{Statement, StatementKind};
pub use compiler::{apply_filters, compile, CompiledPredicate, NamedFilter};
pub use normalize::{normalize, Paginate};
pub use view::{resolve, MaterializedView};
