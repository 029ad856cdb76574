//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use skillsmith_core::{
    ProgressReporter, ReconcileConfig, ReconcileResult, load_knowledge_base, load_project_issues,
    load_router_index, record_run, reconcile, select_strategy, validate_output,
};
use skillsmith_router::{RouterIndex, build_index, hints_from_issues};
use skillsmith_shared::{
    AppConfig, ProjectConfig, SourceKind, StrategyKind, database_path, init_config, load_config,
    load_config_from, load_project,
};
use skillsmith_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Skillsmith: reconcile documentation, code and PDF extracts into one knowledge base.
#[derive(Parser)]
#[command(
    name = "skillsmith",
    version,
    about = "Reconcile documentation, code and PDF extracts into one conflict-aware knowledge base.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Use this config file instead of ~/.skillsmith/skillsmith.toml.
    #[arg(long, global = true, env = "SKILLSMITH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Reconcile a project's sources and write the knowledge base.
    Merge {
        /// Project file describing the sources.
        #[arg(short, long)]
        project: PathBuf,

        /// Output root (defaults to `[defaults].output_dir`).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Merge strategy: deterministic or assisted.
        #[arg(short, long)]
        strategy: Option<String>,
    },

    /// Show how an output directory is split into topics.
    Route {
        /// Output directory of a previous merge.
        #[arg(long)]
        kb: PathBuf,

        /// Recompute the index with the current router settings.
        #[arg(long)]
        rebuild: bool,

        /// Project file whose `[router]` overrides and issue-label hints apply
        /// to `--rebuild`. Without it the rebuilt index has no hints.
        #[arg(long)]
        project: Option<PathBuf>,
    },

    /// Rank topics for a free-text query.
    Query {
        /// Output directory of a routed merge.
        #[arg(long)]
        kb: PathBuf,

        /// The query text.
        text: String,

        /// Entries to list from the best topic.
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Validate a project file, an output directory, or both.
    Validate {
        #[arg(long)]
        project: Option<PathBuf>,

        #[arg(long)]
        kb: Option<PathBuf>,
    },

    /// List recorded merge runs.
    History {
        /// Only runs of this project.
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = "20")]
        limit: usize,

        /// Show the quality summary of one run.
        #[arg(long, conflicts_with_all = ["name", "limit"])]
        run: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
    /// Forget every cached collaborator resolution.
    ClearCache,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "skillsmith=info",
        1 => "skillsmith=debug",
        _ => "skillsmith=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Merge {
            project,
            out,
            strategy,
        } => cmd_merge(config_path, &project, out.as_deref(), strategy.as_deref()).await,
        Command::Route {
            kb,
            rebuild,
            project,
        } => cmd_route(config_path, &kb, rebuild, project.as_deref()),
        Command::Query { kb, text, limit } => cmd_query(&kb, &text, limit),
        Command::Validate { project, kb } => {
            cmd_validate(config_path, project.as_deref(), kb.as_deref())
        }
        Command::History { name, limit, run } => match run {
            Some(id) => cmd_history_run(config_path, &id).await,
            None => cmd_history(config_path, name.as_deref(), limit).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
            ConfigAction::ClearCache => cmd_config_clear_cache(config_path).await,
        },
    }
}

fn app_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

fn project_dir(project_path: &Path) -> PathBuf {
    project_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

// ---------------------------------------------------------------------------
// merge
// ---------------------------------------------------------------------------

async fn cmd_merge(
    config_path: Option<&Path>,
    project_path: &Path,
    out: Option<&Path>,
    strategy: Option<&str>,
) -> Result<()> {
    let app = app_config(config_path)?;
    let project: ProjectConfig = load_project(project_path)?;

    // CLI flag > project > user config > defaults
    let mut settings = project.settings(&app);
    if let Some(strategy) = strategy {
        settings.merge.strategy = strategy.parse::<StrategyKind>()?;
    }

    let output_root = match out {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir()
            .map_err(|e| eyre!("cannot determine working directory: {e}"))?
            .join(&app.defaults.output_dir),
    };

    // History is best effort; a broken database never blocks a merge.
    let storage = match database_path(&app) {
        Ok(path) => match Storage::open(&path).await {
            Ok(storage) => Some(Arc::new(storage)),
            Err(e) => {
                warn!(error = %e, "run history unavailable");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "run history unavailable");
            None
        }
    };

    let merger = select_strategy(&settings.merge, &app.bridge, storage.clone());

    let config = ReconcileConfig {
        project_dir: project_dir(project_path),
        project,
        settings,
        output_root,
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
    };

    info!(
        project = %project_path.display(),
        name = %config.project.name,
        strategy = merger.name(),
        "merging sources"
    );

    let reporter = CliProgress::new();
    let result = match reconcile(&config, merger.as_ref(), &reporter).await {
        Ok(result) => result,
        Err(e) => {
            reporter.spinner.finish_and_clear();
            return Err(e.into());
        }
    };

    if let Some(storage) = &storage {
        if let Err(e) = record_run(storage, &result).await {
            warn!(error = %e, "failed to record run");
        }
    }

    print_merge_summary(&result);
    Ok(())
}

fn print_merge_summary(result: &ReconcileResult) {
    let summary = &result.knowledge_base.quality_summary;

    println!();
    println!("  Knowledge base reconciled!");
    println!("  Run:        {}", result.run_id);
    println!("  Strategy:   {}", result.strategy);
    println!("  Entries:    {}", summary.total_entries);
    println!(
        "  Conflicts:  {} (high {}, medium {}, low {})",
        summary.total_conflicts,
        summary.by_severity.high,
        summary.by_severity.medium,
        summary.by_severity.low
    );
    println!(
        "  Dropped:    {} records, {} duplicates",
        summary.dropped_records, summary.duplicate_records
    );
    for source in summary.degraded_sources() {
        println!(
            "  Degraded:   {} ({})",
            source.kind,
            source.degraded.as_deref().unwrap_or("unknown")
        );
    }
    if let skillsmith_shared::DetectionStatus::Skipped { reason } = &summary.detection {
        println!("  Detection:  skipped, {reason}");
    }
    match &result.router {
        Some(router) => println!("  Topics:     {}", router.topics.len()),
        None => println!("  Topics:     not routed"),
    }
    println!("  Path:       {}", result.output_dir.display());
    println!("  Time:       {:.1}s", result.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn source_loaded(&self, kind: SourceKind, entries: usize, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Normalized [{current}/{total}] {kind}: {entries} entries"));
    }

    fn done(&self, _result: &ReconcileResult) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// route / query
// ---------------------------------------------------------------------------

fn cmd_route(
    config_path: Option<&Path>,
    kb_dir: &Path,
    rebuild: bool,
    project_path: Option<&Path>,
) -> Result<()> {
    let index = if rebuild {
        let app = app_config(config_path)?;
        let (router_settings, hints) = match project_path {
            Some(path) => {
                let project = load_project(path)?;
                let settings = project.settings(&app).router;
                let issues = load_project_issues(&project, &project_dir(path));
                let hints = hints_from_issues(&issues, &settings);
                (settings, hints)
            }
            None => {
                warn!("no --project given, rebuilding without issue-label hints");
                (app.router, BTreeMap::new())
            }
        };
        let kb = load_knowledge_base(kb_dir)?;
        // Explicit request, so the size threshold does not apply.
        build_index(&kb, &router_settings, &hints)?
    } else {
        load_router_index(kb_dir)?.ok_or_else(|| {
            eyre!(
                "'{}' was not routed (below the router threshold); use --rebuild to split it anyway",
                kb_dir.display()
            )
        })?
    };

    print_topics(&index);
    Ok(())
}

fn print_topics(index: &RouterIndex) {
    println!();
    println!("  {:<24} {:>8}  KEYWORDS", "TOPIC", "ENTRIES");
    for topic in &index.topics {
        let keywords: Vec<&str> = topic.keywords.iter().map(String::as_str).collect();
        println!(
            "  {:<24} {:>8}  {}",
            topic.name,
            topic.entry_ids.len(),
            keywords.join(", ")
        );
    }
    println!();
}

fn cmd_query(kb_dir: &Path, text: &str, limit: usize) -> Result<()> {
    let index = load_router_index(kb_dir)?
        .ok_or_else(|| eyre!("'{}' was not routed; nothing to query", kb_dir.display()))?;

    let matches = index.route(text);
    if matches.is_empty() {
        println!("No topic matches '{text}'.");
        return Ok(());
    }

    println!();
    for m in &matches {
        println!("  {:<24} score {}", m.topic, m.score);
    }

    if let Some(best) = matches.first().and_then(|m| index.topic(&m.topic)) {
        println!();
        println!("  Entries in '{}':", best.name);
        for id in best.entry_ids.iter().take(limit) {
            println!("    {id}");
        }
        if best.entry_ids.len() > limit {
            println!("    ... and {} more", best.entry_ids.len() - limit);
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// validate / history / config
// ---------------------------------------------------------------------------

fn cmd_validate(
    config_path: Option<&Path>,
    project_path: Option<&Path>,
    kb_dir: Option<&Path>,
) -> Result<()> {
    if project_path.is_none() && kb_dir.is_none() {
        return Err(eyre!("nothing to validate: pass --project and/or --kb"));
    }

    if let Some(path) = project_path {
        let app = app_config(config_path)?;
        let project = load_project(path)?;
        project.validate(&project.settings(&app))?;
        println!(
            "Project '{}' is valid ({} sources).",
            project.name,
            project.sources.len()
        );
    }

    if let Some(dir) = kb_dir {
        let manifest = validate_output(dir)?;
        println!(
            "Output '{}' is valid: run {}, {} entries, {} files verified.",
            dir.display(),
            manifest.run_id,
            manifest.entry_count,
            manifest.files.len()
        );
    }
    Ok(())
}

async fn cmd_history(config_path: Option<&Path>, name: Option<&str>, limit: usize) -> Result<()> {
    let app = app_config(config_path)?;
    let path = database_path(&app)?;
    if !path.exists() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    let storage = Storage::open_readonly(&path).await?;
    let runs = storage.list_runs(name, limit).await?;
    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }

    println!();
    println!(
        "  {:<36}  {:<20}  {:<13}  {:>7}  {:>9}  {:>8}  CREATED",
        "RUN", "NAME", "STRATEGY", "ENTRIES", "CONFLICTS", "DEGRADED"
    );
    for run in runs {
        println!(
            "  {:<36}  {:<20}  {:<13}  {:>7}  {:>9}  {:>8}  {}",
            run.id,
            run.name,
            run.strategy,
            run.entry_count,
            run.conflict_count,
            run.degraded_sources,
            run.created_at
        );
    }
    println!();
    Ok(())
}

async fn cmd_history_run(config_path: Option<&Path>, id: &str) -> Result<()> {
    let app = app_config(config_path)?;
    let storage = Storage::open_readonly(&database_path(&app)?).await?;
    let run = storage
        .get_run(id)
        .await?
        .ok_or_else(|| eyre!("no run with id '{id}'"))?;

    let summary: serde_json::Value = serde_json::from_str(&run.summary_json)?;
    println!();
    println!("  Run:        {}", run.id);
    println!("  Name:       {}", run.name);
    println!("  Strategy:   {}", run.strategy);
    println!("  Created:    {}", run.created_at);
    println!("  Path:       {}", run.output_dir);
    println!();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = app_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

async fn cmd_config_clear_cache(config_path: Option<&Path>) -> Result<()> {
    let app = app_config(config_path)?;
    let path = database_path(&app)?;
    if !path.exists() {
        println!("Nothing cached.");
        return Ok(());
    }
    let storage = Storage::open(&path).await?;
    let removed = storage.clear_resolutions().await?;
    println!("Removed {removed} cached resolutions.");
    Ok(())
}
