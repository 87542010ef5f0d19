//! Execution and workflow documents as delivered by n8n.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::arena::Arena;

/// Final status of an execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
  Success,
  Error,
  Waiting,
  #[default]
  #[serde(other)]
  Unknown,
}

/// One run of a workflow, including its compressed execution data.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
  #[serde(deserialize_with = "identifier")]
  pub id: String,
  #[serde(default, deserialize_with = "optional_identifier")]
  pub workflow_id: Option<String>,
  #[serde(default, deserialize_with = "nullable_status")]
  pub status: ExecutionStatus,
  #[serde(default)]
  pub finished: bool,
  #[serde(default)]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub stopped_at: Option<DateTime<Utc>>,
  /// The arena. Absent when the execution was fetched without data.
  #[serde(rename = "data", default, deserialize_with = "nullable_arena")]
  pub raw_data: Arena,
  /// Snapshot of the workflow definition the execution ran with.
  #[serde(default)]
  pub workflow_data: Option<WorkflowDocument>,
}

impl ExecutionRecord {
  /// Build a record around an arena with no further metadata.
  pub fn new(id: impl Into<String>, raw_data: Arena) -> Self {
    Self {
      id: id.into(),
      workflow_id: None,
      status: ExecutionStatus::Unknown,
      finished: false,
      started_at: None,
      stopped_at: None,
      raw_data,
      workflow_data: None,
    }
  }

  /// Parse an execution document (`GET /executions/{id}?includeData=true`).
  pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(text)
  }
}

/// Workflow definition, used to map node names to stable node ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
  #[serde(default, deserialize_with = "optional_identifier")]
  pub id: Option<String>,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub nodes: Vec<WorkflowNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
  #[serde(default)]
  pub id: Option<String>,
  pub name: String,
  #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
  pub node_type: Option<String>,
}

impl WorkflowDocument {
  /// The node called `name`.
  pub fn node(&self, name: &str) -> Option<&WorkflowNode> {
    self.nodes.iter().find(|node| node.name == name)
  }

  /// Look up the id of the node called `name`.
  pub fn node_id(&self, name: &str) -> Option<&str> {
    self.node(name).and_then(|node| node.id.as_deref())
  }
}

/// Ids are strings on current n8n versions and integers on older ones.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawIdentifier {
  Text(String),
  Number(i64),
}

impl From<RawIdentifier> for String {
  fn from(raw: RawIdentifier) -> Self {
    match raw {
      RawIdentifier::Text(text) => text,
      RawIdentifier::Number(number) => number.to_string(),
    }
  }
}

fn identifier<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
  RawIdentifier::deserialize(deserializer).map(String::from)
}

fn optional_identifier<'de, D: Deserializer<'de>>(
  deserializer: D,
) -> Result<Option<String>, D::Error> {
  Ok(Option::<RawIdentifier>::deserialize(deserializer)?.map(String::from))
}

fn nullable_status<'de, D: Deserializer<'de>>(
  deserializer: D,
) -> Result<ExecutionStatus, D::Error> {
  Ok(Option::<ExecutionStatus>::deserialize(deserializer)?.unwrap_or_default())
}

fn nullable_arena<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Arena, D::Error> {
  Ok(Option::<Arena>::deserialize(deserializer)?.unwrap_or_default())
}
