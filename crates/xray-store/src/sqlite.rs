use std::str::FromStr;

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::{BacktraceRow, Error, Store};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) the database at `url` and run migrations.
  pub async fn connect(url: &str) -> Result<Self, Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    // In-memory databases exist per connection; keep a single one.
    let max_connections = if url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
      .max_connections(max_connections)
      .connect_with(options)
      .await?;

    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(&self.pool).await
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn replace_trace(&self, execution_id: &str, rows: &[BacktraceRow]) -> Result<u64, Error> {
    let mut tx = self.pool.begin().await?;

    sqlx::query(
      r#"
            DELETE FROM execution_backtrace
            WHERE execution_id = ?
            "#,
    )
    .bind(execution_id)
    .execute(&mut *tx)
    .await?;

    for row in rows {
      sqlx::query(
            r#"
            INSERT INTO execution_backtrace (execution_id, step_index, node_uuid, node_name, input_json, output_json, next_node_uuid, next_node_name)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution_id)
        .bind(row.step_index)
        .bind(&row.node_uuid)
        .bind(&row.node_name)
        .bind(&row.input_json)
        .bind(&row.output_json)
        .bind(&row.next_node_uuid)
        .bind(&row.next_node_name)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(rows.len() as u64)
  }

  async fn get_trace(&self, execution_id: &str) -> Result<Vec<BacktraceRow>, Error> {
    let rows: Vec<BacktraceRow> = sqlx::query_as(
            r#"
            SELECT execution_id, step_index, node_uuid, node_name, input_json, output_json, next_node_uuid, next_node_name
            FROM execution_backtrace
            WHERE execution_id = ?
            ORDER BY step_index ASC
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

    Ok(rows)
  }

  async fn delete_trace(&self, execution_id: &str) -> Result<u64, Error> {
    let result = sqlx::query(
      r#"
            DELETE FROM execution_backtrace
            WHERE execution_id = ?
            "#,
    )
    .bind(execution_id)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected())
  }
}
