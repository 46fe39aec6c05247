//! cassandra-service - a wide-column store behind a CRUD service contract
//!
//! Query objects come in, CQL statements go out to a [`storage::Driver`],
//! rows come back. Writes do not return what they touched, so every write
//! is followed by a keyed re-read.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Service                               │
//! │   find · get · create · update · patch · remove · lifecycle hooks│
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌──────────────┐  ┌──────────────────────────┐ │
//! │  │   CQLQ      │  │  Validation  │  │  Composite-key codec     │ │
//! │  │   Parser    │  │  (Schema)    │  │  (ids <-> key columns)   │ │
//! │  └──────┬──────┘  └──────┬───────┘  └────────────┬─────────────┘ │
//! │         ▼                ▼                       ▼               │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │                     Query translation                      │  │
//! │  │  normalize · compile · named filters · view routing · CQL  │  │
//! │  └─────────────────────────────┬──────────────────────────────┘  │
//! │                                ▼                                 │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │            Driver (MemoryStore or a real cluster)          │  │
//! │  └─────────────────────────────┬──────────────────────────────┘  │
//! │                                ▼                                 │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │        Error classifier (native codes -> taxonomy)         │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod key;
pub mod lifecycle;
pub mod query;
pub mod schema;
pub mod service;
pub mod storage;
pub mod validation;

pub use error::{classify, Error, ErrorKind, Result};
pub use lifecycle::{HookContext, HookOutcome, HookStage, Hooks};
pub use query::{CompiledPredicate, MaterializedView, Paginate, Statement};
pub use schema::{FieldDef, FieldType, IdField, Schema};
pub use service::{FindResult, Page, Params, Service, ServiceBuilder, ServiceConfig};
pub use storage::{Driver, DriverError, MemoryStore, ResultSet, Row};
