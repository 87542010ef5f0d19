//! Flow reconstruction ("x-ray").
//!
//! Turns the run data of one execution into an ordered list of steps, each
//! carrying the node's resolved input and output and the node that ran next.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::arena::Resolver;
use crate::error::TraceError;
use crate::extract::{Extraction, Extractor, NodeRun, RunDataMap};
use crate::options::TraceOptions;
use crate::record::{ExecutionRecord, ExecutionStatus};

/// `goes_to` of the last step.
pub const END_OF_FLOW: &str = "END (final workflow output)";

/// The reconstructed data trace of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFlow {
  pub execution_info: ExecutionInfo,
  pub data_flow: Vec<FlowStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfo {
  pub execution_id: String,
  pub workflow_id: Option<String>,
  pub status: ExecutionStatus,
  pub finished: bool,
  pub started_at: Option<DateTime<Utc>>,
  pub stopped_at: Option<DateTime<Utc>>,
  pub total_nodes: usize,
  pub total_execution_time_ms: i64,
  pub node_status_counts: StatusCounts,
}

/// Per-step `execution_status` tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
  pub success: usize,
  pub error: usize,
  pub other: usize,
}

impl StatusCounts {
  fn record(&mut self, status: &str) {
    match status {
      "success" => self.success += 1,
      "error" => self.error += 1,
      _ => self.other += 1,
    }
  }
}

/// Where a step's `input` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
  /// The run recorded its own input data.
  RunData,
  /// Borrowed from the output of the node listed as the run's source.
  PreviousNode,
  /// Nothing available.
  None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
  /// 1-based position in the flow.
  pub step: usize,
  pub node_name: String,
  pub input: Option<Value>,
  pub output: Option<Value>,
  pub start_time_ms: i64,
  pub execution_time_ms: i64,
  pub execution_status: String,
  pub goes_to: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub previous_node: Option<String>,
  pub input_source: InputSource,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub notes: Vec<String>,
}

/// Reconstruct `record` with the default options.
pub fn reconstruct(record: &ExecutionRecord) -> Result<ExecutionFlow, TraceError> {
  Reconstructor::new(TraceOptions::default()).reconstruct(record)
}

/// Builds [`ExecutionFlow`]s. Holds no state between calls.
#[derive(Debug, Clone, Default)]
pub struct Reconstructor {
  options: TraceOptions,
}

impl Reconstructor {
  pub fn new(options: TraceOptions) -> Self {
    Self { options }
  }

  pub fn options(&self) -> &TraceOptions {
    &self.options
  }

  /// Reconstruct the flow of one execution.
  ///
  /// Nodes without a run are skipped, as are runs with no positive start
  /// time. Steps are ordered by start time, ties broken by node name.
  pub fn reconstruct(&self, record: &ExecutionRecord) -> Result<ExecutionFlow, TraceError> {
    let arena = &record.raw_data;
    let run_data = RunDataMap::locate(arena)?;
    let extractor = Extractor::new(Resolver::new(arena, &self.options), self.options.output_index);

    let mut runs = Vec::with_capacity(run_data.len());
    for node_name in run_data.node_names() {
      match extractor.extract(&run_data, node_name)? {
        Extraction::Found(run) if run.start_time > 0 => runs.push(run),
        Extraction::Found(run) => {
          debug!(
            execution_id = %record.id,
            node = %run.node_name,
            start_time = run.start_time,
            "dropping run without a start time"
          );
        }
        Extraction::NotFound { node_name, reason } => {
          debug!(execution_id = %record.id, node = %node_name, %reason, "node skipped");
        }
      }
    }

    runs.sort_by(|a, b| {
      a.start_time
        .cmp(&b.start_time)
        .then_with(|| a.node_name.cmp(&b.node_name))
    });

    // Runs without recorded input borrow the items their source node sent
    // on the port they were fed from.
    let in_flow: HashSet<&str> = runs.iter().map(|run| run.node_name.as_str()).collect();
    let mut inherited = Vec::with_capacity(runs.len());
    for run in &runs {
      let items = match (&run.input, &run.previous_node) {
        (None, Some(previous)) if in_flow.contains(previous.as_str()) => {
          extractor.port_output(&run_data, previous, run.previous_node_output)?
        }
        _ => None,
      };
      inherited.push(items);
    }

    let data_flow = build_steps(runs, inherited);

    let mut counts = StatusCounts::default();
    let mut total_execution_time_ms: i64 = 0;
    for step in &data_flow {
      counts.record(&step.execution_status);
      total_execution_time_ms = total_execution_time_ms
        .checked_add(step.execution_time_ms)
        .ok_or_else(|| {
          TraceError::malformed(format!(
            "total execution time overflows at node '{}' ({} ms)",
            step.node_name, step.execution_time_ms
          ))
        })?;
    }

    Ok(ExecutionFlow {
      execution_info: ExecutionInfo {
        execution_id: record.id.clone(),
        workflow_id: record.workflow_id.clone(),
        status: record.status,
        finished: record.finished,
        started_at: record.started_at,
        stopped_at: record.stopped_at,
        total_nodes: data_flow.len(),
        total_execution_time_ms,
        node_status_counts: counts,
      },
      data_flow,
    })
  }
}

/// Number ordered runs and link each to its successor. `inherited` holds,
/// per run, the upstream items used when the run recorded no input.
fn build_steps(runs: Vec<NodeRun>, inherited: Vec<Option<Value>>) -> Vec<FlowStep> {
  let next_names: Vec<String> = runs
    .iter()
    .skip(1)
    .map(|run| run.node_name.clone())
    .chain(std::iter::once(END_OF_FLOW.to_string()))
    .collect();

  runs
    .into_iter()
    .zip(next_names)
    .zip(inherited)
    .enumerate()
    .map(|(position, ((run, goes_to), inherited))| {
      let (input, input_source) = match (run.input, inherited) {
        (Some(input), _) => (Some(input), InputSource::RunData),
        (None, Some(items)) => (Some(items), InputSource::PreviousNode),
        (None, None) => (None, InputSource::None),
      };

      FlowStep {
        step: position + 1,
        node_name: run.node_name,
        input,
        output: run.output,
        start_time_ms: run.start_time,
        execution_time_ms: run.execution_time.max(0),
        execution_status: run.execution_status,
        goes_to,
        previous_node: run.previous_node,
        input_source,
        notes: run.notes,
      }
    })
    .collect()
}
