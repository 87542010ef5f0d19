//! Conversion of a reconstructed flow into backtrace rows.

use std::collections::BTreeSet;

use sqlx::types::Json;
use xray_trace::{END_OF_FLOW, ExecutionFlow, IdentifierWarning, WorkflowDocument};

use crate::types::BacktraceRow;

/// Rows for one execution plus the identifier problems met on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Backtrace {
  pub execution_id: String,
  pub rows: Vec<BacktraceRow>,
  pub warnings: Vec<IdentifierWarning>,
}

impl Backtrace {
  /// Build the rows for `flow`.
  ///
  /// Node ids are looked up by name in `workflow`. A missing workflow, an
  /// unknown name or a node without id leaves the id empty and adds a
  /// warning; it never fails.
  pub fn from_flow(flow: &ExecutionFlow, workflow: Option<&WorkflowDocument>) -> Self {
    let mut unresolved = BTreeSet::new();
    let mut lookup = |name: &str| -> Option<String> {
      let workflow = workflow?;
      let node = workflow.node(name);
      let id = node.and_then(|node| node.id.clone());
      if id.is_none() {
        let node_name = name.to_string();
        unresolved.insert(match node {
          Some(_) => IdentifierWarning::NodeWithoutId { node_name },
          None => IdentifierWarning::UnknownNode { node_name },
        });
      }
      id
    };

    let rows: Vec<BacktraceRow> = flow
      .data_flow
      .iter()
      .map(|step| BacktraceRow {
        execution_id: flow.execution_info.execution_id.clone(),
        step_index: step.step as i64,
        node_uuid: lookup(&step.node_name),
        node_name: step.node_name.clone(),
        input_json: step.input.clone().map(Json),
        output_json: step.output.clone().map(Json),
        next_node_uuid: if step.goes_to == END_OF_FLOW {
          None
        } else {
          lookup(&step.goes_to)
        },
        next_node_name: step.goes_to.clone(),
      })
      .collect();

    let warnings = if workflow.is_none() && !rows.is_empty() {
      vec![IdentifierWarning::MissingWorkflow]
    } else {
      unresolved.into_iter().collect()
    };

    Self {
      execution_id: flow.execution_info.execution_id.clone(),
      rows,
      warnings,
    }
  }
}
