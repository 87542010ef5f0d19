//! End-to-end reconstruction of execution documents as the n8n API returns them.

use serde_json::{Value, json};
use xray_trace::{
  AnalysisReport, END_OF_FLOW, ExecutionRecord, ExecutionStatus, InputSource, TraceError,
  TraceOptions, Reconstructor, reconstruct,
};

/// Webhook -> HTTP Request -> Set, encoded the way n8n stores it: every
/// nested value and every string lives in its own slot.
fn flatted_slots() -> Value {
  json!([
    {"startData": "1", "resultData": "2", "executionData": "3"},
    {},
    {"runData": "4", "lastNodeExecuted": "5"},
    {"contextData": "1"},
    {"Webhook": "6", "HTTP Request": "7", "Set": "8"},
    "Set",
    ["9"],
    ["10"],
    ["11"],
    {"startTime": 1717000000000_i64, "executionTime": 2, "executionStatus": "12", "source": "13", "data": "14"},
    {"startTime": 1717000000005_i64, "executionTime": 120, "executionStatus": "12", "source": "15", "data": "17"},
    {"startTime": 1717000000130_i64, "executionTime": 1, "executionStatus": "12", "source": "23", "data": "25"},
    "success",
    [],
    {"main": "28"},
    ["16"],
    {"previousNode": "31"},
    {"main": "18"},
    ["19"],
    ["20"],
    {"json": "21"},
    {"statusCode": 200, "headers": "22", "body": "32"},
    {"content-length": "348", "x-request-id": "17"},
    ["24"],
    {"previousNode": "33"},
    {"main": "26"},
    ["27"],
    ["34"],
    ["29"],
    ["30"],
    {"json": "35"},
    "Webhook",
    {"ok": true},
    "HTTP Request",
    {"json": "36"},
    {"query": "1"},
    {"saved": true}
  ])
}

fn execution_document() -> Value {
  json!({
    "id": "901",
    "finished": true,
    "mode": "webhook",
    "startedAt": "2024-05-29T16:26:40.000Z",
    "stoppedAt": "2024-05-29T16:26:40.140Z",
    "workflowId": "wf-orders",
    "status": "success",
    "data": serde_json::to_string(&flatted_slots()).unwrap(),
    "workflowData": {
      "id": "wf-orders",
      "name": "Orders",
      "nodes": [
        {"id": "uuid-webhook", "name": "Webhook", "type": "n8n-nodes-base.webhook"},
        {"id": "uuid-http", "name": "HTTP Request", "type": "n8n-nodes-base.httpRequest"},
        {"id": "uuid-set", "name": "Set", "type": "n8n-nodes-base.set"}
      ]
    }
  })
}

fn load() -> ExecutionRecord {
  ExecutionRecord::from_json(&execution_document().to_string()).unwrap()
}

#[test]
fn test_reconstruct_flatted_execution() {
  let record = load();

  let flow = reconstruct(&record).unwrap();

  let info = &flow.execution_info;
  assert_eq!(info.execution_id, "901");
  assert_eq!(info.workflow_id.as_deref(), Some("wf-orders"));
  assert_eq!(info.status, ExecutionStatus::Success);
  assert!(info.finished);
  assert_eq!(info.total_nodes, 3);
  assert_eq!(info.total_execution_time_ms, 123);
  assert_eq!(info.node_status_counts.success, 3);

  let steps = &flow.data_flow;
  let order: Vec<(usize, &str, &str)> = steps
    .iter()
    .map(|s| (s.step, s.node_name.as_str(), s.goes_to.as_str()))
    .collect();
  assert_eq!(
    order,
    vec![
      (1, "Webhook", "HTTP Request"),
      (2, "HTTP Request", "Set"),
      (3, "Set", END_OF_FLOW),
    ]
  );

  assert_eq!(steps[0].output, Some(json!([{"json": {"query": {}}}])));
  assert_eq!(steps[0].input, None);
  assert_eq!(steps[0].input_source, InputSource::None);
  assert_eq!(steps[2].output, Some(json!([{"json": {"saved": true}}])));
}

#[test]
fn test_header_values_stay_literal() {
  let flow = reconstruct(&load()).unwrap();

  let http = &flow.data_flow[1];
  assert_eq!(
    http.output,
    Some(json!([{
      "json": {
        "statusCode": 200,
        "headers": {"content-length": "348", "x-request-id": "17"},
        "body": {"ok": true}
      }
    }]))
  );
}

#[test]
fn test_inputs_follow_sources() {
  let flow = reconstruct(&load()).unwrap();

  let http = &flow.data_flow[1];
  let set = &flow.data_flow[2];
  assert_eq!(http.previous_node.as_deref(), Some("Webhook"));
  assert_eq!(http.input, flow.data_flow[0].output);
  assert_eq!(http.input_source, InputSource::PreviousNode);
  assert_eq!(set.input, http.output);
}

#[test]
fn test_steps_are_sorted_and_linked() {
  let flow = reconstruct(&load()).unwrap();

  for pair in flow.data_flow.windows(2) {
    assert!(pair[0].start_time_ms < pair[1].start_time_ms);
    assert_eq!(pair[0].goes_to, pair[1].node_name);
  }
  assert!(flow.data_flow.iter().all(|s| s.execution_time_ms >= 0));
}

#[test]
fn test_execution_without_data_reports_failure() {
  let mut document = execution_document();
  document["data"] = Value::Null;
  let record = ExecutionRecord::from_json(&document.to_string()).unwrap();

  let result = reconstruct(&record);
  assert_eq!(result.clone().unwrap_err(), TraceError::NoRunData);

  let report = AnalysisReport::from_result(&record.id, result);
  assert!(!report.success);
  assert!(report.flow.is_none());
}

#[test]
fn test_second_output_port() {
  let record = ExecutionRecord::from_json(
    &json!({
      "id": "5",
      "data": [
        {"runData": "1"},
        {"IF": [{"startTime": 3, "executionTime": 1, "data": {"main": [[{"json": {"t": 1}}], [{"json": {"f": 1}}]]}}]}
      ]
    })
    .to_string(),
  )
  .unwrap();

  let flow = Reconstructor::new(TraceOptions::default().with_output_index(1))
    .reconstruct(&record)
    .unwrap();

  assert_eq!(flow.data_flow[0].output, Some(json!([{"json": {"f": 1}}])));
}

#[test]
fn test_json_shape() {
  let flow = reconstruct(&load()).unwrap();

  let value = serde_json::to_value(&flow).unwrap();
  for key in [
    "execution_id",
    "workflow_id",
    "status",
    "finished",
    "started_at",
    "stopped_at",
    "total_nodes",
    "total_execution_time_ms",
  ] {
    assert!(value["execution_info"].get(key).is_some(), "missing {}", key);
  }
  for key in [
    "step",
    "node_name",
    "input",
    "output",
    "execution_time_ms",
    "execution_status",
    "goes_to",
  ] {
    assert!(value["data_flow"][0].get(key).is_some(), "missing {}", key);
  }
  assert_eq!(value["execution_info"]["status"], "success");
}
