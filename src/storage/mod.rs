//! Storage layer for cassandra-service
//!
//! The store is reached through the [`Driver`] trait: execute a statement,
//! get rows or a native error. [`memory::MemoryStore`] is an in-process
//! implementation used by the test suites.

pub mod memory;

use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::query::Statement;
use crate::{Error, Result};

pub use memory::MemoryStore;

/// A row as returned by the store
pub type Row = Map<String, Value>;

/// Column name carrying the outcome of a conditional write
pub const APPLIED: &str = "[applied]";

/// Rows returned for a statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Outcome of a conditional write; unconditional writes always apply
    pub fn applied(&self) -> bool {
        self.rows
            .first()
            .and_then(|row| row.get(APPLIED))
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }
}

/// Failure reported by a driver, before classification
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriverError {
    /// Native protocol error with its numeric code
    #[error("{message}")]
    Response { code: u32, message: String },

    /// A value could not be bound to its column
    #[error("{0}")]
    TypeMismatch(String),

    /// Already expressed in the service taxonomy
    #[error("{0}")]
    Classified(Error),

    #[error("{0}")]
    Other(String),
}

impl DriverError {
    pub fn response(code: u32, message: impl Into<String>) -> Self {
        DriverError::Response {
            code,
            message: message.into(),
        }
    }
}

/// Statement execution primitive
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Execute one statement
    async fn execute(&self, statement: &Statement) -> std::result::Result<ResultSet, DriverError>;

    /// Execute statements as one atomic batch
    async fn batch(&self, statements: &[Statement]) -> std::result::Result<ResultSet, DriverError> {
        let _ = statements;
        Err(DriverError::Classified(Error::NotImplemented(
            "Batch create requires a batch-capable driver".to_string(),
        )))
    }

    fn supports_batch(&self) -> bool {
        false
    }
}

/// Swappable slot holding the bound driver
#[derive(Default)]
pub struct DriverCell {
    inner: RwLock<Option<Arc<dyn Driver>>>,
}

impl fmt::Debug for DriverCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverCell").field("bound", &self.is_bound()).finish()
    }
}

impl DriverCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, driver: Arc<dyn Driver>) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Some(driver);
    }

    pub fn unbind(&self) -> Option<Arc<dyn Driver>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// The bound driver, or the wiring error when nothing is bound
    pub fn get(&self) -> Result<Arc<dyn Driver>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| {
                Error::GeneralError("You must bind CassandraService with an initialized Driver object".to_string())
            })
    }
}
