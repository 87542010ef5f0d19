//! Structured analysis reports.
//!
//! A report always states whether the analysis succeeded. A failed analysis
//! carries an error kind instead of an empty flow, so "no run data" never
//! looks like "no nodes ran".

use serde::Serialize;

use crate::error::TraceError;
use crate::flow::ExecutionFlow;

/// Why an analysis failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  NoRunData,
  MalformedTrace,
  UpstreamFetch,
  Storage,
}

impl From<&TraceError> for FailureKind {
  fn from(error: &TraceError) -> Self {
    match error {
      TraceError::NoRunData => Self::NoRunData,
      TraceError::MalformedTrace { .. } => Self::MalformedTrace,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportError {
  pub kind: FailureKind,
  pub message: String,
}

/// Outcome of analysing one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
  pub execution_id: String,
  pub success: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<ReportError>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub flow: Option<ExecutionFlow>,
  /// Set when the flow was written to storage.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub rows_written: Option<u64>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub warnings: Vec<String>,
}

impl AnalysisReport {
  pub fn succeeded(flow: ExecutionFlow) -> Self {
    Self {
      execution_id: flow.execution_info.execution_id.clone(),
      success: true,
      error: None,
      flow: Some(flow),
      rows_written: None,
      warnings: Vec::new(),
    }
  }

  pub fn failed(execution_id: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
    Self {
      execution_id: execution_id.into(),
      success: false,
      error: Some(ReportError {
        kind,
        message: message.into(),
      }),
      flow: None,
      rows_written: None,
      warnings: Vec::new(),
    }
  }

  /// Report the outcome of [`crate::reconstruct`].
  pub fn from_result(execution_id: &str, result: Result<ExecutionFlow, TraceError>) -> Self {
    match result {
      Ok(flow) => Self::succeeded(flow),
      Err(error) => Self::failed(execution_id, FailureKind::from(&error), error.to_string()),
    }
  }

  pub fn with_rows_written(mut self, rows_written: u64) -> Self {
    self.rows_written = Some(rows_written);
    self
  }

  pub fn with_warnings<I, W>(mut self, warnings: I) -> Self
  where
    I: IntoIterator<Item = W>,
    W: ToString,
  {
    self
      .warnings
      .extend(warnings.into_iter().map(|w| w.to_string()));
    self
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::arena::Arena;
  use crate::error::IdentifierWarning;
  use crate::record::ExecutionRecord;

  #[test]
  fn test_no_run_data_report_is_labeled() {
    let record = ExecutionRecord::new("77", Arena::new(vec![json!({"startData": {}})]));

    let report = AnalysisReport::from_result(&record.id, crate::reconstruct(&record));

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["success"], false);
    assert_eq!(value["error"]["kind"], "no_run_data");
    assert!(value.get("flow").is_none());
  }

  #[test]
  fn test_success_report_shape() {
    let record = ExecutionRecord::new(
      "78",
      Arena::new(vec![
        json!({"runData": "1"}),
        json!({"Start": [{"startTime": 1, "executionTime": 2, "data": {"main": [[]]}}]}),
      ]),
    );

    let report = AnalysisReport::from_result(&record.id, crate::reconstruct(&record))
      .with_rows_written(1)
      .with_warnings([IdentifierWarning::MissingWorkflow]);

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["success"], true);
    assert_eq!(value["execution_id"], "78");
    assert_eq!(value["rows_written"], 1);
    assert_eq!(value["flow"]["execution_info"]["total_nodes"], 1);
    assert_eq!(value["flow"]["data_flow"][0]["goes_to"], crate::END_OF_FLOW);
    assert_eq!(value["warnings"].as_array().map(Vec::len), Some(1));
  }
}
