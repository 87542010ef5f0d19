//! Xray Trace
//!
//! This crate reconstructs what happened inside one n8n execution from the
//! compressed execution data n8n stores for it.
//!
//! The pipeline is:
//! - [`Resolver`]: dereferences pointers into the flat execution-data arena
//! - [`Extractor`]: reads one node's timing, status, input and output
//! - [`Reconstructor`]: orders every node's run into an [`ExecutionFlow`]
//! - [`AnalysisReport`]: the structured, success-labelled result
//!
//! Everything here is synchronous and pure: callers fetch the execution
//! record first and persist the result afterwards.

mod arena;
mod error;
mod extract;
mod flow;
mod options;
mod record;
mod report;

pub use arena::{Arena, Resolver, pointer_index, resolve};
pub use error::{IdentifierWarning, TraceError};
pub use extract::{DEFAULT_EXECUTION_STATUS, Extraction, Extractor, NodeRun, RunDataMap, extract_node};
pub use flow::{
  END_OF_FLOW, ExecutionFlow, ExecutionInfo, FlowStep, InputSource, Reconstructor, StatusCounts,
  reconstruct,
};
pub use options::{
  DEFAULT_LITERAL_KEYS, DEFAULT_MAX_DEPTH, DEFAULT_MAX_SLOT_VISITS, DEFAULT_OUTPUT_INDEX, TraceOptions,
};
pub use record::{ExecutionRecord, ExecutionStatus, WorkflowDocument, WorkflowNode};
pub use report::{AnalysisReport, FailureKind, ReportError};
