//! testsync - test run reporting bridge
//!
//! The `testsync` command syncs a test run into a record store and reports
//! where failures happened.
//!
//! ## Commands
//!
//! - `sync`: reconcile a run into the store and write the report files
//! - `flatten`: print the leaf tests of a run
//! - `stacks`: print resolved failure locations of a run
//! - `check-store`: verify a Notion database has the expected columns

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn, Level};

use testsync_core::report::{file_snippets, render_markdown, DEFAULT_SNIPPET_CONTEXT};
use testsync_core::{
    flatten_tests, FrameSource, ReloadingFrames, RunResults, SnapshotFrames, StackResolver,
    SyncConfig, SyncPipeline, SyncReport,
};
use testsync_state::fakes::MemoryTestStore;
use testsync_state::{JsonFileStore, NotionConfig, NotionTestStore, TestStore};

#[derive(Parser)]
#[command(name = "testsync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sync test run results into a record store", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a run into the store and write changes, stacks and report
    Sync {
        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        store: StoreArgs,

        /// Directory receiving changes.json, stacks.json and report.md
        #[arg(short, long, default_value = "testsync-report")]
        out: PathBuf,

        /// Lines of source shown around each failure
        #[arg(long, default_value_t = DEFAULT_SNIPPET_CONTEXT)]
        snippet_context: usize,
    },

    /// Print the leaf tests of a run as JSON
    Flatten {
        /// Run results file (JSON)
        #[arg(short, long, env = "TESTSYNC_RESULTS")]
        results: PathBuf,
    },

    /// Print resolved failure locations of a run as JSON
    Stacks {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Verify the Notion tests database has every required column
    CheckStore {
        #[command(flatten)]
        notion: NotionArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Project namespace of the run
    #[arg(short, long, env = "VITEST_NAMESPACE")]
    namespace: String,

    /// Run results file (JSON)
    #[arg(short, long, env = "TESTSYNC_RESULTS")]
    results: PathBuf,

    /// Maximum waits for stack frames across the run
    #[arg(long, env = "TESTSYNC_POLL_ATTEMPTS", default_value_t = 5)]
    poll_attempts: u32,

    /// Pause between two waits, in milliseconds
    #[arg(long, env = "TESTSYNC_POLL_DELAY_MS", default_value_t = 1000)]
    poll_delay_ms: u64,

    /// Use the frames as loaded instead of re-reading the results file
    #[arg(long)]
    no_reload: bool,
}

impl RunArgs {
    fn config(&self) -> SyncConfig {
        SyncConfig::new(&self.namespace)
            .with_polling(self.poll_attempts, Duration::from_millis(self.poll_delay_ms))
    }

    fn frames(&self, run: &RunResults) -> Arc<dyn FrameSource> {
        if self.no_reload {
            Arc::new(SnapshotFrames::new(&run.files))
        } else {
            Arc::new(ReloadingFrames::new(&self.results))
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// Throwaway in-process store
    Memory,
    /// Single JSON file
    Json,
    /// Notion database
    Notion,
}

#[derive(Args, Debug, Clone)]
struct StoreArgs {
    /// Store backend; defaults to notion when credentials are set, else none
    #[arg(long, value_enum)]
    store: Option<StoreKind>,

    /// File backing the json store
    #[arg(long, env = "TESTSYNC_STORE", default_value = ".testsync/store.json")]
    store_path: PathBuf,

    #[command(flatten)]
    notion: NotionArgs,
}

#[derive(Args, Debug, Clone)]
struct NotionArgs {
    /// Notion integration token
    #[arg(long, env = "NOTION_KEY", hide_env_values = true)]
    notion_key: Option<String>,

    /// Notion tests database id
    #[arg(long, env = "NOTION_TESTS_DB")]
    notion_tests_db: Option<String>,

    /// Notion API root
    #[arg(long, env = "NOTION_API_BASE")]
    notion_api_base: Option<String>,
}

impl NotionArgs {
    fn config(&self) -> Option<NotionConfig> {
        let key = self.notion_key.as_deref().filter(|v| !v.is_empty())?;
        let db = self.notion_tests_db.as_deref().filter(|v| !v.is_empty())?;
        let config = NotionConfig::new(key, db);
        Some(match &self.notion_api_base {
            Some(base) => config.with_api_base(base),
            None => config,
        })
    }
}

/// Open the configured store. A Notion store is only returned once its
/// database schema checks out.
async fn open_store(args: &StoreArgs) -> Result<Option<Arc<dyn TestStore>>> {
    let kind = match args.store {
        Some(kind) => kind,
        None if args.notion.config().is_some() => StoreKind::Notion,
        None => {
            info!("No store configured");
            return Ok(None);
        }
    };

    let store: Arc<dyn TestStore> = match kind {
        StoreKind::Memory => Arc::new(MemoryTestStore::new()),
        StoreKind::Json => Arc::new(
            JsonFileStore::open(&args.store_path)
                .with_context(|| format!("Failed to open store {}", args.store_path.display()))?,
        ),
        StoreKind::Notion => {
            let Some(config) = args.notion.config() else {
                bail!("Notion store needs NOTION_KEY and NOTION_TESTS_DB");
            };
            Arc::new(
                NotionTestStore::connect(config)
                    .await
                    .context("Tests database schema check failed")?,
            )
        }
    };
    Ok(Some(store))
}

fn load_run(path: &Path) -> Result<RunResults> {
    RunResults::from_path(path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Write `contents` next to `path` and rename it into place.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, contents)?;
    tmp.persist(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &body)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Write `changes.json`, `stacks.json` and `report.md` into `out`.
fn write_outputs(out: &Path, report: &SyncReport, snippet_context: usize) -> Result<()> {
    let changes = report.changes_or_empty();
    write_json(&out.join("changes.json"), &changes)?;
    write_json(&out.join("stacks.json"), &report.stacks)?;

    let markdown = render_markdown(
        &report.namespace,
        &report.stacks,
        &changes,
        file_snippets(snippet_context),
    );
    write_atomic(&out.join("report.md"), markdown.as_bytes())?;
    Ok(())
}

async fn cmd_sync(
    run_args: &RunArgs,
    store_args: &StoreArgs,
    out: &Path,
    snippet_context: usize,
) -> Result<()> {
    let config = run_args.config();
    let run = load_run(&run_args.results)?;
    let store = open_store(store_args).await?;
    let frames = run_args.frames(&run);

    let report = SyncPipeline::run(store, frames, &config, &run)
        .await
        .context("Sync failed")?;

    write_outputs(out, &report, snippet_context)?;

    if let Some(stats) = &report.stats {
        println!("Store updated:");
        print!("{stats}");
    }
    if let Some(summary) = &report.summary {
        println!("Tracked: {}/{} passing", summary.passing, summary.total);
    }
    println!("Failures: {}", report.stacks.len());
    if report.has_new_results {
        println!("New results written to {}", out.display());
    } else {
        println!("No new results");
    }
    Ok(())
}

fn cmd_flatten(results: &Path) -> Result<()> {
    let run = load_run(results)?;
    print_json(&flatten_tests(&run.files))
}

async fn cmd_stacks(run_args: &RunArgs) -> Result<()> {
    let config = run_args.config();
    let run = load_run(&run_args.results)?;
    let mut resolver = StackResolver::new(run_args.frames(&run), config.poll_budget());
    let frames = resolver.resolve(&run.files).await;
    if frames.iter().any(|f| !f.has_location()) {
        warn!("Some failures have no location");
    }
    print_json(&frames)
}

async fn cmd_check_store(args: &NotionArgs) -> Result<()> {
    let Some(config) = args.config() else {
        bail!("check-store needs NOTION_KEY and NOTION_TESTS_DB");
    };
    NotionTestStore::connect(config)
        .await
        .context("Tests database schema check failed")?;
    println!("Tests database schema is valid");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    testsync_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Sync {
            run,
            store,
            out,
            snippet_context,
        } => cmd_sync(&run, &store, &out, snippet_context).await,
        Commands::Flatten { results } => cmd_flatten(&results),
        Commands::Stacks { run } => cmd_stacks(&run).await,
        Commands::CheckStore { notion } => cmd_check_store(&notion).await,
    }
}
