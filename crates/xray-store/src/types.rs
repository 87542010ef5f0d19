use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// One step of a persisted execution trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BacktraceRow {
  pub execution_id: String,
  /// 1-based step number.
  pub step_index: i64,
  pub node_uuid: Option<String>,
  pub node_name: String,
  pub input_json: Option<Json<serde_json::Value>>,
  pub output_json: Option<Json<serde_json::Value>>,
  pub next_node_uuid: Option<String>,
  pub next_node_name: String,
}
