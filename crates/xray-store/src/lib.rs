//! Xray Store
//!
//! This crate provides the storage trait and implementations for
//! reconstructed execution traces ("backtraces"). Data is persisted to SQLite.
//!
//! The [`Store`] trait defines operations for:
//! - Replacing the stored trace of an execution (delete then insert, atomically)
//! - Reading a stored trace back
//! - Removing a stored trace

mod backtrace;
mod sqlite;
mod types;

pub use backtrace::Backtrace;
pub use sqlite::SqliteStore;
pub use types::BacktraceRow;

use async_trait::async_trait;
use tracing::{info, warn};
use xray_trace::{ExecutionFlow, IdentifierWarning, WorkflowDocument};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Schema migration failed.
  #[error("migration failed: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Storage trait for execution backtraces.
#[async_trait]
pub trait Store: Send + Sync {
  /// Replace every stored row of `execution_id` with `rows`.
  ///
  /// Implementations must make the delete and the inserts atomic so that
  /// two analyses of the same execution cannot interleave.
  async fn replace_trace(&self, execution_id: &str, rows: &[BacktraceRow]) -> Result<u64, Error>;

  /// Get the stored trace of an execution, ordered by step.
  async fn get_trace(&self, execution_id: &str) -> Result<Vec<BacktraceRow>, Error>;

  /// Delete the stored trace of an execution. Returns the number of rows removed.
  async fn delete_trace(&self, execution_id: &str) -> Result<u64, Error>;
}

/// Result of persisting one flow.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistOutcome {
  pub rows_written: u64,
  pub warnings: Vec<IdentifierWarning>,
}

/// Persist `flow`, replacing any trace previously stored for its execution.
///
/// Identifier problems are returned as warnings next to the row count.
pub async fn persist_flow(
  store: &dyn Store,
  flow: &ExecutionFlow,
  workflow: Option<&WorkflowDocument>,
) -> Result<PersistOutcome, Error> {
  let backtrace = Backtrace::from_flow(flow, workflow);

  for warning in &backtrace.warnings {
    warn!(execution_id = %backtrace.execution_id, %warning, "node id not resolved");
  }

  let rows_written = store
    .replace_trace(&backtrace.execution_id, &backtrace.rows)
    .await?;

  info!(execution_id = %backtrace.execution_id, rows = rows_written, "backtrace stored");

  Ok(PersistOutcome {
    rows_written,
    warnings: backtrace.warnings,
  })
}
