/// Keys whose subtrees hold literal values that only look like pointers.
pub const DEFAULT_LITERAL_KEYS: &[&str] = &["headers"];

/// Upper bound on pointer hops along a single resolution path.
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Upper bound on slot expansions within a single `resolve` call. Shared
/// slots count every time they are expanded.
pub const DEFAULT_MAX_SLOT_VISITS: usize = 1_000_000;

/// Output port read from a node's `main` connection when none is requested.
pub const DEFAULT_OUTPUT_INDEX: usize = 0;

/// Knobs for resolving and reconstructing a trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceOptions {
  /// Object keys below which strings are never dereferenced.
  pub literal_keys: Vec<String>,
  /// Maximum number of pointer hops on one path before the trace is
  /// considered malformed.
  pub max_depth: usize,
  /// Maximum number of slot expansions for one resolved value.
  pub max_slot_visits: usize,
  /// Output port to extract from each node.
  pub output_index: usize,
}

impl TraceOptions {
  /// Options for a plain recursive walk with no literal subtrees.
  pub fn context_free() -> Self {
    Self {
      literal_keys: Vec::new(),
      ..Self::default()
    }
  }

  pub fn with_output_index(mut self, output_index: usize) -> Self {
    self.output_index = output_index;
    self
  }
}

impl Default for TraceOptions {
  fn default() -> Self {
    Self {
      literal_keys: DEFAULT_LITERAL_KEYS.iter().map(|k| k.to_string()).collect(),
      max_depth: DEFAULT_MAX_DEPTH,
      max_slot_visits: DEFAULT_MAX_SLOT_VISITS,
      output_index: DEFAULT_OUTPUT_INDEX,
    }
  }
}
