//! Per-node extraction from the run data map.
//!
//! A node's entry in the run data map points at a list of runs. Each run
//! looks like this once dereferenced:
//!
//! ```json
//! {
//!   "startTime": 1717000000000,
//!   "executionTime": 12,
//!   "executionStatus": "success",
//!   "source": [{ "previousNode": "Start", "previousNodeOutput": 0 }],
//!   "data": { "main": [[ { "json": { ... } } ]] }
//! }
//! ```
//!
//! Only the first run is read: nodes that ran several times (loops, retries)
//! are reported with their first run.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::arena::{Arena, Resolver, pointer_index};
use crate::error::TraceError;
use crate::options::TraceOptions;

/// Status assumed for runs that do not record one.
pub const DEFAULT_EXECUTION_STATUS: &str = "success";

const RUN_DATA_KEY: &str = "runData";
const MAIN_CONNECTION: &str = "main";
const FIRST_RUN: usize = 0;
const INPUT_PORT: usize = 0;
const OUTPUT_FIELD: &str = "data";
const INPUT_FIELDS: [&str; 2] = ["inputData", "inputOverride"];

/// The node name → run list mapping of one execution.
#[derive(Debug, Clone, Copy)]
pub struct RunDataMap<'a> {
  entries: &'a Map<String, Value>,
}

impl<'a> RunDataMap<'a> {
  /// Locate the run data map in `arena`.
  ///
  /// The first object slot with a `runData` field holds the index of the
  /// map. Its absence means the execution never produced run data.
  pub fn locate(arena: &'a Arena) -> Result<Self, TraceError> {
    let (slot, entry) = arena.find_entry(RUN_DATA_KEY).ok_or(TraceError::NoRunData)?;
    let pointer = &entry[RUN_DATA_KEY];

    let index = match pointer {
      Value::String(text) => pointer_index(text),
      Value::Number(number) => number.as_u64().and_then(|n| usize::try_from(n).ok()),
      Value::Object(entries) => return Ok(Self { entries }),
      _ => None,
    }
    .ok_or_else(|| {
      TraceError::malformed(format!(
        "runData in slot {} is not a pointer: {}",
        slot, pointer
      ))
    })?;

    match arena.get(index) {
      Some(Value::Object(entries)) => Ok(Self { entries }),
      Some(other) => Err(TraceError::malformed(format!(
        "runData slot {} is not a node map: {}",
        index,
        type_name(other)
      ))),
      None => Err(TraceError::malformed(format!(
        "runData points past the end of the arena ({} >= {})",
        index,
        arena.len()
      ))),
    }
  }

  /// Node names in map order.
  pub fn node_names(&self) -> impl Iterator<Item = &'a str> + use<'a> {
    self.entries.keys().map(String::as_str)
  }

  pub fn get(&self, node_name: &str) -> Option<&'a Value> {
    self.entries.get(node_name)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// What could be read about one node's first run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRun {
  pub node_name: String,
  /// Epoch milliseconds.
  pub start_time: i64,
  /// Milliseconds.
  pub execution_time: i64,
  pub execution_status: String,
  /// Resolved input items, when the run recorded them.
  pub input: Option<Value>,
  /// Resolved output items of the selected output port.
  pub output: Option<Value>,
  /// The node that fed this run, from the run's `source` list.
  pub previous_node: Option<String>,
  /// Output port of `previous_node` the items arrived on.
  pub previous_node_output: usize,
  /// Why `input` or `output` is missing.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub notes: Vec<String>,
}

/// Outcome of extracting a single node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Extraction {
  Found(NodeRun),
  NotFound { node_name: String, reason: String },
}

impl Extraction {
  fn not_found(node_name: &str, reason: impl Into<String>) -> Self {
    Self::NotFound {
      node_name: node_name.to_string(),
      reason: reason.into(),
    }
  }
}

/// Items of one connection port, or why they could not be read.
enum Payload {
  Items(Value),
  Missing(String),
}

/// Extract `node_name` with the default options.
pub fn extract_node(
  node_name: &str,
  run_data: &RunDataMap<'_>,
  arena: &Arena,
) -> Result<Extraction, TraceError> {
  let options = TraceOptions::default();
  Extractor::new(Resolver::new(arena, &options), options.output_index).extract(run_data, node_name)
}

/// Reads node runs out of an arena.
#[derive(Debug, Clone, Copy)]
pub struct Extractor<'a> {
  resolver: Resolver<'a>,
  output_index: usize,
}

impl<'a> Extractor<'a> {
  pub fn new(resolver: Resolver<'a>, output_index: usize) -> Self {
    Self {
      resolver,
      output_index,
    }
  }

  /// Extract the first run of `node_name`.
  ///
  /// Missing runs are reported as [`Extraction::NotFound`]; missing
  /// input/output hops degrade to `None` with a note. Only resolver failures
  /// (cycles, runaway chains) are errors.
  pub fn extract(
    &self,
    run_data: &RunDataMap<'_>,
    node_name: &str,
  ) -> Result<Extraction, TraceError> {
    let (run, run_count) = match first_run(self.resolver.arena(), run_data, node_name) {
      Ok(found) => found,
      Err(reason) => return Ok(Extraction::not_found(node_name, reason)),
    };

    if run_count > 1 {
      debug!(node = %node_name, runs = run_count, "node ran more than once, reading first run");
    }

    let start_time = self.integer(run.get("startTime"))?;
    let execution_time = self.integer(run.get("executionTime"))?;
    let execution_status = self
      .text(run.get("executionStatus"))?
      .unwrap_or_else(|| DEFAULT_EXECUTION_STATUS.to_string());
    let (previous_node, previous_node_output) = self.source(run)?;

    let mut notes = Vec::new();

    let output = match self.port_items(run.get(OUTPUT_FIELD), self.output_index)? {
      Payload::Items(items) => Some(items),
      Payload::Missing(reason) => {
        notes.push(format!("output: {}", reason));
        None
      }
    };

    let input = match INPUT_FIELDS.iter().find_map(|field| run.get(*field)) {
      Some(field) => match self.port_items(Some(field), INPUT_PORT)? {
        Payload::Items(items) => Some(items),
        Payload::Missing(reason) => {
          notes.push(format!("input: {}", reason));
          None
        }
      },
      None => {
        notes.push("input: no input data recorded".to_string());
        None
      }
    };

    Ok(Extraction::Found(NodeRun {
      node_name: node_name.to_string(),
      start_time,
      execution_time,
      execution_status,
      input,
      output,
      previous_node,
      previous_node_output,
      notes,
    }))
  }

  /// Items the first run of `node_name` emitted on output `port`, if any.
  pub fn port_output(
    &self,
    run_data: &RunDataMap<'_>,
    node_name: &str,
    port: usize,
  ) -> Result<Option<Value>, TraceError> {
    let Ok((run, _)) = first_run(self.resolver.arena(), run_data, node_name) else {
      return Ok(None);
    };
    Ok(match self.port_items(run.get(OUTPUT_FIELD), port)? {
      Payload::Items(items) => Some(items),
      Payload::Missing(_) => None,
    })
  }

  /// Walk `connections → main → port → items` and resolve every item.
  fn port_items(&self, field: Option<&Value>, port: usize) -> Result<Payload, TraceError> {
    let arena = self.resolver.arena();

    let Some(field) = field else {
      return Ok(Payload::Missing("no data recorded".to_string()));
    };
    let Some(connections) = arena.follow(field).as_object() else {
      return Ok(Payload::Missing("connection data is not an object".to_string()));
    };
    let Some(main) = connections.get(MAIN_CONNECTION) else {
      return Ok(Payload::Missing("no main connection".to_string()));
    };
    let Some(ports) = arena.follow(main).as_array() else {
      return Ok(Payload::Missing("main connection is not an array".to_string()));
    };
    let Some(port_value) = ports.get(port) else {
      return Ok(Payload::Missing(format!("no port {}", port)));
    };
    let Some(items) = arena.follow(port_value).as_array() else {
      return Ok(Payload::Missing(format!("port {} carries no items", port)));
    };

    let mut resolved = Vec::with_capacity(items.len());
    for item in items {
      // An item slot holding a whole batch contributes its elements.
      match self.resolver.resolve(item)? {
        Value::Array(batch) => resolved.extend(batch),
        single => resolved.push(single),
      }
    }

    Ok(Payload::Items(Value::Array(resolved)))
  }

  /// The first entry of the run's `source` list: upstream node and the
  /// output port it sent on (0 when not recorded).
  fn source(&self, run: &Map<String, Value>) -> Result<(Option<String>, usize), TraceError> {
    let arena = self.resolver.arena();

    let Some(source) = run
      .get("source")
      .map(|source| arena.follow(source))
      .and_then(Value::as_array)
      .and_then(|sources| sources.first())
      .map(|first| arena.follow(first))
      .and_then(Value::as_object)
    else {
      return Ok((None, 0));
    };

    let previous_node = self.text(source.get("previousNode"))?;
    let port = self.integer(source.get("previousNodeOutput"))?;

    Ok((previous_node, usize::try_from(port).unwrap_or(0)))
  }

  fn integer(&self, value: Option<&Value>) -> Result<i64, TraceError> {
    let Some(value) = value else {
      return Ok(0);
    };
    Ok(match self.resolver.resolve(value)? {
      Value::Number(number) => number
        .as_i64()
        .or_else(|| number.as_f64().map(|f| f as i64))
        .unwrap_or(0),
      _ => 0,
    })
  }

  fn text(&self, value: Option<&Value>) -> Result<Option<String>, TraceError> {
    let Some(value) = value else {
      return Ok(None);
    };
    Ok(match self.resolver.resolve(value)? {
      Value::String(text) => Some(text),
      _ => None,
    })
  }
}

/// The first run record of `node_name` and the number of recorded runs, or
/// why there is none.
fn first_run<'r>(
  arena: &'r Arena,
  run_data: &RunDataMap<'r>,
  node_name: &str,
) -> Result<(&'r Map<String, Value>, usize), &'static str> {
  let entry = run_data.get(node_name).ok_or("node did not run")?;
  let runs = arena
    .follow(entry)
    .as_array()
    .ok_or("run list is not an array")?;
  let first = runs.get(FIRST_RUN).ok_or("no execution data")?;
  let run = arena
    .follow(first)
    .as_object()
    .ok_or("run record is not an object")?;
  Ok((run, runs.len()))
}

fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn arena(value: Value) -> Arena {
    Arena::new(value.as_array().cloned().unwrap_or_default())
  }

  fn found(extraction: Extraction) -> NodeRun {
    match extraction {
      Extraction::Found(run) => run,
      Extraction::NotFound { reason, .. } => panic!("expected a run, got not found: {}", reason),
    }
  }

  #[test]
  fn test_extract_compact_example() {
    let arena = arena(json!([
      {"runData": "1"},
      {"A": "2"},
      ["3"],
      {"startTime": 1000, "executionTime": 50, "data": "4"},
      {"main": "5"},
      ["6"],
      ["7"],
      [{"value": 42}]
    ]));
    let run_data = RunDataMap::locate(&arena).unwrap();

    let run = found(extract_node("A", &run_data, &arena).unwrap());

    assert_eq!(run.start_time, 1000);
    assert_eq!(run.execution_time, 50);
    assert_eq!(run.execution_status, DEFAULT_EXECUTION_STATUS);
    assert_eq!(run.output, Some(json!([{"value": 42}])));
    assert_eq!(run.input, None);
  }

  #[test]
  fn test_extract_flatted_run() {
    // Strings are stored out of line, as n8n's flatted encoding does.
    let arena = arena(json!([
      {"resultData": "1"},
      {"runData": "2"},
      {"Fetch": "3"},
      ["4"],
      {
        "startTime": 1717000000100_i64,
        "executionTime": 8,
        "executionStatus": "5",
        "source": "6",
        "data": "9"
      },
      "error",
      ["7"],
      {"previousNode": "8"},
      "Start",
      {"main": "10"},
      ["11"],
      ["12", "14"],
      {"json": "13"},
      {"id": 1},
      {"json": "15"},
      {"id": 2}
    ]));
    let run_data = RunDataMap::locate(&arena).unwrap();

    let run = found(extract_node("Fetch", &run_data, &arena).unwrap());

    assert_eq!(run.start_time, 1717000000100);
    assert_eq!(run.execution_status, "error");
    assert_eq!(run.previous_node.as_deref(), Some("Start"));
    assert_eq!(run.previous_node_output, 0);
    assert_eq!(
      run.output,
      Some(json!([{"json": {"id": 1}}, {"json": {"id": 2}}]))
    );
  }

  #[test]
  fn test_extract_input_data() {
    let arena = arena(json!([
      {"runData": "1"},
      {"Set": "2"},
      [{"startTime": 5, "inputData": {"main": [[{"json": {"in": true}}]]}, "data": {"main": [[]]}}]
    ]));
    let run_data = RunDataMap::locate(&arena).unwrap();

    let run = found(extract_node("Set", &run_data, &arena).unwrap());

    assert_eq!(run.input, Some(json!([{"json": {"in": true}}])));
    assert_eq!(run.output, Some(json!([])));
    assert!(run.notes.is_empty());
  }

  #[test]
  fn test_missing_node_and_empty_runs() {
    let arena = arena(json!([{"runData": "1"}, {"Empty": "2"}, []]));
    let run_data = RunDataMap::locate(&arena).unwrap();

    assert_eq!(
      extract_node("Ghost", &run_data, &arena).unwrap(),
      Extraction::NotFound {
        node_name: "Ghost".to_string(),
        reason: "node did not run".to_string()
      }
    );
    assert_eq!(
      extract_node("Empty", &run_data, &arena).unwrap(),
      Extraction::NotFound {
        node_name: "Empty".to_string(),
        reason: "no execution data".to_string()
      }
    );
  }

  #[test]
  fn test_missing_output_degrades() {
    let arena = arena(json!([
      {"runData": "1"},
      {"If": "2"},
      ["3"],
      {"startTime": 10, "executionTime": 1, "data": "4"},
      {"main": "5"},
      [null, "6"],
      [{"json": {"branch": "false"}}]
    ]));
    let run_data = RunDataMap::locate(&arena).unwrap();
    let options = TraceOptions::default();

    let first_port = found(
      Extractor::new(Resolver::new(&arena, &options), 0)
        .extract(&run_data, "If")
        .unwrap(),
    );
    let second_port = found(
      Extractor::new(Resolver::new(&arena, &options), 1)
        .extract(&run_data, "If")
        .unwrap(),
    );
    let third_port = found(
      Extractor::new(Resolver::new(&arena, &options), 2)
        .extract(&run_data, "If")
        .unwrap(),
    );

    assert_eq!(first_port.output, None);
    assert!(first_port.notes.iter().any(|n| n == "output: port 0 carries no items"));
    assert_eq!(second_port.output, Some(json!([{"json": {"branch": "false"}}])));
    assert_eq!(third_port.output, None);
    assert!(third_port.notes.iter().any(|n| n == "output: no port 2"));
  }

  #[test]
  fn test_source_port_and_port_output() {
    let arena = arena(json!([
      {"runData": "1"},
      {"If": "2", "OnFalse": "4"},
      ["3"],
      {"startTime": 10, "data": {"main": [[], [{"json": {"branch": "false"}}]]}},
      [{"startTime": 20, "source": [{"previousNode": "If", "previousNodeOutput": 1}], "data": {"main": [[]]}}]
    ]));
    let run_data = RunDataMap::locate(&arena).unwrap();
    let options = TraceOptions::default();
    let extractor = Extractor::new(Resolver::new(&arena, &options), 0);

    let on_false = found(extractor.extract(&run_data, "OnFalse").unwrap());

    assert_eq!(on_false.previous_node.as_deref(), Some("If"));
    assert_eq!(on_false.previous_node_output, 1);
    assert_eq!(
      extractor.port_output(&run_data, "If", 1).unwrap(),
      Some(json!([{"json": {"branch": "false"}}]))
    );
    assert_eq!(extractor.port_output(&run_data, "If", 0).unwrap(), Some(json!([])));
    assert_eq!(extractor.port_output(&run_data, "If", 5).unwrap(), None);
    assert_eq!(extractor.port_output(&run_data, "Ghost", 0).unwrap(), None);
  }

  #[test]
  fn test_locate_without_run_data() {
    let arena = arena(json!([{"startData": {}}, {"resultData": {}}]));

    assert_eq!(RunDataMap::locate(&arena).unwrap_err(), TraceError::NoRunData);
  }

  #[test]
  fn test_locate_rejects_bad_pointer() {
    let out_of_range = arena(json!([{"runData": "9"}]));
    let not_a_map = arena(json!([{"runData": "1"}, ["x"]]));

    assert_eq!(
      RunDataMap::locate(&out_of_range).unwrap_err().kind(),
      "malformed_trace"
    );
    assert_eq!(
      RunDataMap::locate(&not_a_map).unwrap_err().kind(),
      "malformed_trace"
    );
  }

  #[test]
  fn test_locate_numeric_pointer() {
    let arena = arena(json!([{"runData": 1}, {"Start": []}]));

    let run_data = RunDataMap::locate(&arena).unwrap();

    assert_eq!(run_data.node_names().collect::<Vec<_>>(), vec!["Start"]);
  }
}
