use std::collections::HashSet;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use xray_client::ApiClient;
use xray_config::XrayConfig;
use xray_store::{SqliteStore, Store, persist_flow};
use xray_trace::{
  AnalysisReport, ExecutionRecord, Extractor, FailureKind, Reconstructor, Resolver, RunDataMap,
  TraceOptions, WorkflowDocument,
};

/// Xray - reconstructs what happened inside n8n workflow executions
#[derive(Parser)]
#[command(name = "xray")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.xray)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Reconstruct the data flow of one or more executions
  Analyze {
    /// Execution IDs to analyse
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    execution_ids: Vec<String>,

    /// Store the trace in the backtrace table instead of only reporting it
    #[arg(long)]
    persist: bool,

    /// Read a saved execution document instead of calling the API ("-" for stdin)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Number of executions analysed at once
    #[arg(long, default_value_t = 4)]
    concurrency: usize,
  },

  /// Show what a single node received and produced
  Node {
    /// Execution ID
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    execution_id: Option<String>,

    /// The node name as shown in the editor
    #[arg(long)]
    node: String,

    /// Output port to read (default from config)
    #[arg(long)]
    output_index: Option<usize>,

    /// Read a saved execution document instead of calling the API ("-" for stdin)
    #[arg(long)]
    file: Option<PathBuf>,
  },

  /// Print the stored trace of an execution
  Show {
    /// Execution ID
    execution_id: String,
  },
}

/// Where an execution document comes from.
enum Source {
  Api(String),
  File(PathBuf),
}

impl Source {
  fn label(&self) -> String {
    match self {
      Source::Api(id) => id.clone(),
      Source::File(path) => path.display().to_string(),
    }
  }
}

/// Everything one analysis needs, shared across concurrent analyses.
struct Analyzer {
  client: Option<ApiClient>,
  store: Option<SqliteStore>,
  reconstructor: Reconstructor,
}

fn main() -> Result<()> {
  init_tracing();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".xray"),
  };

  let config = XrayConfig::load(&data_dir).context("failed to load configuration")?;

  match cli.command {
    Some(Commands::Analyze {
      execution_ids,
      persist,
      file,
      concurrency,
    }) => {
      let sources = match file {
        Some(path) => vec![Source::File(path)],
        None => unique(execution_ids).into_iter().map(Source::Api).collect(),
      };
      run(analyze(sources, persist, concurrency, config, data_dir))?;
    }
    Some(Commands::Node {
      execution_id,
      node,
      output_index,
      file,
    }) => {
      let source = match (file, execution_id) {
        (Some(path), _) => Source::File(path),
        (None, Some(id)) => Source::Api(id),
        (None, None) => bail!("an execution ID or --file is required"),
      };
      run(inspect_node(source, node, output_index, config))?;
    }
    Some(Commands::Show { execution_id }) => {
      run(show(execution_id, config, data_dir))?;
    }
    None => {
      println!("xray - use --help to see available commands");
    }
  }

  Ok(())
}

fn init_tracing() {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new("xray=info,xray_trace=info,xray_store=info,xray_client=info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
}

fn run<F: Future<Output = Result<()>>>(future: F) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(future)
}

async fn analyze(
  sources: Vec<Source>,
  persist: bool,
  concurrency: usize,
  config: XrayConfig,
  data_dir: PathBuf,
) -> Result<()> {
  let needs_api = sources.iter().any(|s| matches!(s, Source::Api(_)));

  let analyzer = Analyzer {
    client: if needs_api || persist {
      Some(ApiClient::new(&config.api).context("failed to create API client")?)
    } else {
      None
    },
    store: if persist {
      Some(open_store(&config, &data_dir).await?)
    } else {
      None
    },
    reconstructor: Reconstructor::new(TraceOptions::from(&config.trace)),
  };

  let total = sources.len();
  let reports: Vec<AnalysisReport> = stream::iter(sources)
    .map(|source| analyzer.analyze(source))
    .buffered(concurrency.max(1))
    .collect()
    .await;

  let output = match reports.as_slice() {
    [single] => serde_json::to_string_pretty(single)?,
    all => serde_json::to_string_pretty(all)?,
  };
  println!("{}", output);

  let failed = reports.iter().filter(|r| !r.success).count();
  if failed > 0 {
    bail!("{} of {} analyses failed", failed, total);
  }

  Ok(())
}

impl Analyzer {
  /// Analyse one execution. Never fails: every problem ends up in the report.
  async fn analyze(&self, source: Source) -> AnalysisReport {
    let label = source.label();

    let record = match load_record(&source, self.client.as_ref()).await {
      Ok(record) => record,
      Err(e) => {
        let message = format!("{:#}", e);
        warn!(execution = %label, error = %message, "failed to load execution");
        return AnalysisReport::failed(label, FailureKind::UpstreamFetch, message);
      }
    };

    let flow = match self.reconstructor.reconstruct(&record) {
      Ok(flow) => flow,
      Err(e) => {
        warn!(execution_id = %record.id, kind = e.kind(), error = %e, "analysis failed");
        return AnalysisReport::from_result(&record.id, Err(e));
      }
    };

    info!(
      execution_id = %record.id,
      nodes = flow.execution_info.total_nodes,
      total_ms = flow.execution_info.total_execution_time_ms,
      "execution flow reconstructed"
    );

    let Some(store) = &self.store else {
      return AnalysisReport::succeeded(flow);
    };

    let workflow = self.companion_workflow(&record).await;
    match persist_flow(store, &flow, workflow.as_ref()).await {
      Ok(outcome) => AnalysisReport::succeeded(flow)
        .with_rows_written(outcome.rows_written)
        .with_warnings(outcome.warnings),
      Err(e) => {
        warn!(execution_id = %record.id, error = %e, "failed to store backtrace");
        AnalysisReport::failed(record.id.clone(), FailureKind::Storage, e.to_string())
      }
    }
  }

  /// The workflow definition used to resolve node ids: the snapshot carried
  /// by the execution, else the current definition from the API.
  async fn companion_workflow(&self, record: &ExecutionRecord) -> Option<WorkflowDocument> {
    if let Some(workflow) = &record.workflow_data {
      return Some(workflow.clone());
    }

    let (client, workflow_id) = (self.client.as_ref()?, record.workflow_id.as_deref()?);
    match client.fetch_workflow(workflow_id).await {
      Ok(workflow) => Some(workflow),
      Err(e) => {
        warn!(execution_id = %record.id, workflow_id = %workflow_id, error = %e, "workflow definition unavailable");
        None
      }
    }
  }
}

async fn inspect_node(
  source: Source,
  node: String,
  output_index: Option<usize>,
  config: XrayConfig,
) -> Result<()> {
  let client = match source {
    Source::Api(_) => Some(ApiClient::new(&config.api).context("failed to create API client")?),
    Source::File(_) => None,
  };
  let record = load_record(&source, client.as_ref()).await?;

  let mut options = TraceOptions::from(&config.trace);
  if let Some(output_index) = output_index {
    options.output_index = output_index;
  }

  let run_data = RunDataMap::locate(&record.raw_data)
    .with_context(|| format!("cannot inspect execution {}", record.id))?;
  let extraction = Extractor::new(Resolver::new(&record.raw_data, &options), options.output_index)
    .extract(&run_data, &node)
    .with_context(|| format!("failed to extract node '{}'", node))?;

  println!("{}", serde_json::to_string_pretty(&extraction)?);

  Ok(())
}

async fn show(execution_id: String, config: XrayConfig, data_dir: PathBuf) -> Result<()> {
  let store = open_store(&config, &data_dir).await?;

  let rows = store
    .get_trace(&execution_id)
    .await
    .with_context(|| format!("failed to read trace for execution {}", execution_id))?;

  if rows.is_empty() {
    warn!(execution_id = %execution_id, "no stored trace");
  }

  println!("{}", serde_json::to_string_pretty(&rows)?);

  Ok(())
}

async fn open_store(config: &XrayConfig, data_dir: &Path) -> Result<SqliteStore> {
  let url = config.store.database_url(data_dir);

  if url.starts_with("sqlite://") {
    tokio::fs::create_dir_all(data_dir)
      .await
      .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
  }

  SqliteStore::connect(&url)
    .await
    .with_context(|| format!("failed to open trace store: {}", url))
}

async fn load_record(source: &Source, client: Option<&ApiClient>) -> Result<ExecutionRecord> {
  match source {
    Source::Api(execution_id) => {
      let client = client.context("no API client configured")?;
      client
        .fetch_execution(execution_id)
        .await
        .with_context(|| format!("failed to fetch execution {}", execution_id))
    }
    Source::File(path) => {
      let content = read_document(path).await?;
      ExecutionRecord::from_json(&content)
        .with_context(|| format!("failed to parse execution file: {}", path.display()))
    }
  }
}

async fn read_document(path: &Path) -> Result<String> {
  if path == Path::new("-") {
    let mut input = String::new();
    io::stdin()
      .read_to_string(&mut input)
      .context("failed to read execution document from stdin")?;
    return Ok(input);
  }

  tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read execution file: {}", path.display()))
}

/// Drop repeated IDs, keeping first occurrences in order.
fn unique(ids: Vec<String>) -> Vec<String> {
  let mut seen = HashSet::new();
  ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_unique_keeps_first_occurrence_order() {
    let ids = ["3", "1", "3", "2", "1"].map(String::from).to_vec();

    assert_eq!(unique(ids), vec!["3", "1", "2"]);
  }

  #[test]
  fn test_analyze_args_collapse_duplicates() {
    let cli = Cli::try_parse_from(["xray", "analyze", "7", "7", "8"]).unwrap();

    match cli.command {
      Some(Commands::Analyze { execution_ids, .. }) => {
        assert_eq!(unique(execution_ids), vec!["7", "8"]);
      }
      _ => panic!("expected analyze command"),
    }
  }

  #[test]
  fn test_trace_options_from_config() {
    let mut config = XrayConfig::default();
    config.trace.output_index = 1;

    let reconstructor = Reconstructor::new(TraceOptions::from(&config.trace));

    assert_eq!(reconstructor.options().output_index, 1);
    assert_eq!(reconstructor.options().max_depth, xray_trace::DEFAULT_MAX_DEPTH);
  }
}
