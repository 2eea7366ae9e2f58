use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use futures::stream::{self, StreamExt};
use gcpgraph::config::Config;
use gcpgraph::gcp::client::GcpClient;
use gcpgraph::graph::memory::MemoryGraph;
use gcpgraph::graph::neo4j::{GraphConfig, Neo4jStore};
use gcpgraph::graph::{GraphStore, DEFAULT_CLEANUP_BATCH};
use gcpgraph::resource::{get_all_resource_keys, select_resources};
use gcpgraph::sync::{self, SyncOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Projects synced at the same time unless configured otherwise
const DEFAULT_CONCURRENCY: usize = 4;

/// Mirror GCP resources into a Neo4j graph
#[derive(Parser, Debug)]
#[command(name = "gcpgraph", version = gcpgraph::VERSION, about, long_about = None)]
struct Args {
    /// GCP project to sync (repeatable)
    #[arg(short, long)]
    project: Vec<String>,

    /// Resource type to sync (repeatable, default: all)
    #[arg(short, long)]
    resource: Vec<String>,

    /// Neo4j Bolt URI
    #[arg(long, env = "NEO4J_URI")]
    neo4j_uri: Option<String>,

    #[arg(long, env = "NEO4J_USER")]
    neo4j_user: Option<String>,

    #[arg(long, env = "NEO4J_PASSWORD", hide_env_values = true)]
    neo4j_password: Option<String>,

    /// Run tag stamped on every write (default: current epoch millis)
    #[arg(long)]
    update_tag: Option<i64>,

    /// Maximum nodes or relationships deleted per cleanup statement
    #[arg(long)]
    cleanup_batch_size: Option<i64>,

    /// Number of projects synced concurrently
    #[arg(long)]
    concurrency: Option<usize>,

    /// Write to an in-memory graph instead of Neo4j
    #[arg(long)]
    dry_run: bool,

    /// Persist the effective projects and connection settings, then sync
    #[arg(long)]
    save_config: bool,

    /// Log level (RUST_LOG takes precedence when set)
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn setup_logging(
    level: LogLevel,
    log_file: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    let Some(log_path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

/// Connection settings (CLI/env > config file > defaults)
fn graph_config(args: &Args, config: &Config) -> GraphConfig {
    let mut graph = config.neo4j.clone();
    if let Some(uri) = &args.neo4j_uri {
        graph.uri = uri.clone();
    }
    if let Some(user) = &args.neo4j_user {
        graph.user = user.clone();
    }
    if let Some(password) = &args.neo4j_password {
        graph.password = password.clone();
    }
    graph
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level, args.log_file.as_deref())?;
    tracing::info!("gcpgraph {} started", gcpgraph::VERSION);

    let config = Config::load();
    let projects = config.effective_projects(&args.project);
    if projects.is_empty() {
        return Err(anyhow::anyhow!(
            "No GCP project configured. Set GOOGLE_CLOUD_PROJECT or use --project flag"
        ));
    }

    let resource_keys = config.effective_resources(&args.resource);
    let defs = select_resources(&resource_keys).with_context(|| {
        format!("Known resource types: {}", get_all_resource_keys().join(", "))
    })?;

    let options = SyncOptions {
        update_tag: args.update_tag.unwrap_or_else(sync::current_update_tag),
        cleanup_batch_size: args
            .cleanup_batch_size
            .or(config.cleanup_batch_size)
            .unwrap_or(DEFAULT_CLEANUP_BATCH),
    };
    if options.cleanup_batch_size <= 0 {
        anyhow::bail!("--cleanup-batch-size must be positive");
    }
    let concurrency = args
        .concurrency
        .or(config.concurrency)
        .unwrap_or(DEFAULT_CONCURRENCY)
        .max(1);
    let graph = graph_config(&args, &config);

    if args.save_config {
        let saved = Config {
            projects: projects.clone(),
            resources: resource_keys.clone(),
            neo4j: GraphConfig {
                password: String::new(),
                ..graph.clone()
            },
            cleanup_batch_size: Some(options.cleanup_batch_size),
            concurrency: Some(concurrency),
        };
        saved.save().context("Failed to save config")?;
    }

    tracing::info!(
        "Syncing {} resource types in {} projects with update tag {}",
        defs.len(),
        projects.len(),
        options.update_tag
    );

    let client = match GcpClient::new().await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("No usable GCP credentials, nothing synced: {:#}", e);
            return Ok(ExitCode::SUCCESS);
        }
    };

    let memory = args.dry_run.then(|| Arc::new(MemoryGraph::new()));
    let store: Arc<dyn GraphStore> = match &memory {
        Some(memory) => Arc::clone(memory) as Arc<dyn GraphStore>,
        None => {
            let neo4j = Neo4jStore::connect(&graph)
                .await
                .with_context(|| format!("Failed to connect to {}", graph.uri))?;
            neo4j
                .ensure_indexes(defs.iter().flat_map(|d| d.schemas()))
                .await
                .context("Failed to create graph indexes")?;
            Arc::new(neo4j)
        }
    };

    let results: Vec<_> = stream::iter(&projects)
        .map(|project| {
            let store = Arc::clone(&store);
            let client = &client;
            let defs = &defs;
            let options = &options;
            async move {
                let result =
                    sync::sync_project(store.as_ref(), client, defs, project, options).await;
                (project, result)
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut failures = 0;
    for (project, result) in results {
        match result {
            Ok(report) => {
                failures += report.failed.len();
                for synced in &report.synced {
                    tracing::info!(
                        "{}/{}: {} records, {:?}",
                        project,
                        synced.resource,
                        synced.records,
                        synced.outcome
                    );
                }
            }
            Err(e) => {
                failures += defs.len();
                tracing::error!("Project {} failed: {}", project, e);
            }
        }
    }

    if let Some(memory) = memory {
        let counts = memory.counts().await;
        tracing::info!(
            "Dry run graph holds {} nodes and {} relationships",
            counts.nodes,
            counts.relationships
        );
    }

    if failures > 0 {
        tracing::error!("{} resource syncs failed", failures);
        return Ok(ExitCode::FAILURE);
    }

    tracing::info!("Sync complete");
    Ok(ExitCode::SUCCESS)
}
