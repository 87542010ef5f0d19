//! Trace error types.

use std::fmt;

use serde::Serialize;

/// Errors that abort the analysis of a single execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceError {
  /// The execution data carries no `runData` section at all (the workflow
  /// never started, or the record was stored without data).
  #[error("execution data has no runData section")]
  NoRunData,

  /// The arena is structurally invalid (pointer cycle, runaway nesting,
  /// runData pointing at something that is not a node map).
  #[error("malformed execution trace: {message}")]
  MalformedTrace { message: String },
}

impl TraceError {
  pub(crate) fn malformed(message: impl Into<String>) -> Self {
    Self::MalformedTrace {
      message: message.into(),
    }
  }

  /// Stable label for reports and logs.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::NoRunData => "no_run_data",
      Self::MalformedTrace { .. } => "malformed_trace",
    }
  }
}

/// Non-fatal problem encountered while mapping node names to node ids.
///
/// Warnings are accumulated next to a successful result; the affected rows
/// carry null identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentifierWarning {
  /// No workflow definition was available for the execution.
  MissingWorkflow,
  /// The workflow definition has no node with this name.
  UnknownNode { node_name: String },
  /// The workflow definition has the node but records no id for it.
  NodeWithoutId { node_name: String },
}

impl fmt::Display for IdentifierWarning {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::MissingWorkflow => write!(f, "workflow definition unavailable, node ids left empty"),
      Self::UnknownNode { node_name } => {
        write!(f, "node '{}' not found in workflow definition", node_name)
      }
      Self::NodeWithoutId { node_name } => {
        write!(f, "node '{}' has no id in workflow definition", node_name)
      }
    }
  }
}
