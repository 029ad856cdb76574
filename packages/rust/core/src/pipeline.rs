//! End-to-end reconciliation: extracts → normalize → detect → merge → route → assemble.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};
use uuid::Uuid;

use skillsmith_conflicts::detect;
use skillsmith_merge::{
    AssistConfig, AssistedMerger, BridgeCollaborator, DeterministicMerger, MergeInput,
    MergeStrategy, ReasoningCollaborator,
};
use skillsmith_router::{RouterIndex, build_index, hints_from_issues, should_route};
use skillsmith_shared::{
    BridgeConfig, MergeSettings, MergedKnowledgeBase, NormalizeReport, ProjectConfig, Result,
    RunSettings, SourceKind, StrategyKind,
};
use skillsmith_storage::{RunRecord, Storage};

use crate::assembler::{self, AssembleConfig, RunManifest};
use crate::cache::CachedCollaborator;
use crate::sources::{LoadedSource, load_source};

/// Configuration for one `reconcile` run.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub project: ProjectConfig,
    /// Directory that relative source paths resolve against.
    pub project_dir: PathBuf,
    /// Effective settings after layering project overrides on the user config.
    pub settings: RunSettings,
    /// Root directory for outputs; the run lands in `<output_root>/<name>/`.
    pub output_root: PathBuf,
    pub tool_version: String,
}

/// Result of a `reconcile` run.
#[derive(Debug)]
pub struct ReconcileResult {
    pub run_id: Uuid,
    pub output_dir: PathBuf,
    pub manifest: RunManifest,
    pub knowledge_base: MergedKnowledgeBase,
    /// Present only when the knowledge base was large enough to split.
    pub router: Option<RouterIndex>,
    pub strategy: String,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called as each source finishes normalizing.
    fn source_loaded(&self, kind: SourceKind, entries: usize, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, result: &ReconcileResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn source_loaded(&self, _kind: SourceKind, _entries: usize, _current: usize, _total: usize) {}
    fn done(&self, _result: &ReconcileResult) {}
}

/// Pick the merge strategy for a run.
///
/// The assisted strategy needs a configured bridge; without one the run
/// falls back to the deterministic strategy. With `storage`, collaborator
/// answers are cached across runs.
pub fn select_strategy(
    settings: &MergeSettings,
    bridge: &BridgeConfig,
    storage: Option<Arc<Storage>>,
) -> Box<dyn MergeStrategy> {
    match settings.strategy {
        StrategyKind::Deterministic => Box::new(DeterministicMerger),
        StrategyKind::Assisted if !bridge.is_configured() => {
            warn!("assisted strategy requested but no [bridge] command is configured, using deterministic");
            Box::new(DeterministicMerger)
        }
        StrategyKind::Assisted => {
            let bridge_collaborator: Arc<dyn ReasoningCollaborator> =
                Arc::new(BridgeCollaborator::new(bridge.clone()));
            let collaborator: Arc<dyn ReasoningCollaborator> = match storage {
                Some(storage) => Arc::new(CachedCollaborator::new(
                    bridge_collaborator,
                    storage,
                    bridge.model.clone(),
                )),
                None => bridge_collaborator,
            };
            Box::new(AssistedMerger::new(collaborator, AssistConfig::from(settings)))
        }
    }
}

/// Run the full reconciliation pipeline.
///
/// 1. Validate configuration (fatal, nothing is read before this)
/// 2. Load and normalize every source on its own blocking worker
/// 3. Wait for all of them, then detect conflicts
/// 4. Merge via `strategy`
/// 5. Route when the knowledge base exceeds the router threshold
/// 6. Assemble the output directory
#[instrument(skip_all, fields(name = %config.project.name, strategy = strategy.name()))]
pub async fn reconcile(
    config: &ReconcileConfig,
    strategy: &dyn MergeStrategy,
    progress: &dyn ProgressReporter,
) -> Result<ReconcileResult> {
    let start = Instant::now();
    let run_id = Uuid::now_v7();
    info!(%run_id, sources = config.project.sources.len(), "starting reconcile pipeline");

    // --- Phase 1: Validation ---
    progress.phase("Validating configuration");
    config.project.validate(&config.settings)?;

    // --- Phase 2: Normalization ---
    progress.phase("Normalizing sources");
    let total = config.project.sources.len();
    let handles: Vec<_> = config
        .project
        .sources
        .iter()
        .map(|source| {
            let source = source.clone();
            let base_dir = config.project_dir.clone();
            let kind = source.kind;
            (kind, tokio::task::spawn_blocking(move || load_source(&source, &base_dir)))
        })
        .collect();

    // Barrier: detection only starts once every source is in.
    let mut reports: Vec<NormalizeReport> = Vec::with_capacity(total);
    let mut issues = Vec::new();
    for (current, (kind, handle)) in handles.into_iter().enumerate() {
        let loaded = handle.await.unwrap_or_else(|e| {
            warn!(kind = %kind, error = %e, "normalizer worker failed, source degraded");
            LoadedSource {
                report: NormalizeReport::failed(kind, format!("normalizer worker failed: {e}")),
                issues: Vec::new(),
            }
        });
        progress.source_loaded(kind, loaded.report.entries.len(), current + 1, total);
        reports.push(loaded.report);
        issues.extend(loaded.issues);
    }

    // --- Phase 3: Conflict detection ---
    progress.phase("Detecting conflicts");
    let detection = detect(&reports, &config.settings.matching)?;

    // --- Phase 4: Merge ---
    progress.phase("Merging");
    let knowledge_base = strategy
        .merge(MergeInput {
            reports: &reports,
            detection: &detection,
        })
        .await?;

    // --- Phase 5: Routing ---
    let router = if should_route(&knowledge_base, &config.settings.router) {
        progress.phase("Routing topics");
        let hints = hints_from_issues(&issues, &config.settings.router);
        let index = build_index(&knowledge_base, &config.settings.router, &hints)?;
        index.check_partition(&knowledge_base)?;
        Some(index)
    } else {
        info!(
            entries = knowledge_base.len(),
            threshold = config.settings.router.threshold,
            "below router threshold, not routing"
        );
        None
    };

    // --- Phase 6: Assembly ---
    progress.phase("Assembling output");
    let assembled = assembler::assemble(
        &AssembleConfig {
            run_id,
            name: config.project.name.clone(),
            description: config.project.description.clone(),
            output_root: config.output_root.clone(),
            tool_version: config.tool_version.clone(),
            strategy: strategy.name().to_string(),
        },
        &knowledge_base,
        router.as_ref(),
    )?;

    let result = ReconcileResult {
        run_id,
        output_dir: assembled.output_dir,
        manifest: assembled.manifest,
        knowledge_base,
        router,
        strategy: strategy.name().to_string(),
        elapsed: start.elapsed(),
    };
    let summary = &result.knowledge_base.quality_summary;

    info!(
        %run_id,
        entries = result.knowledge_base.len(),
        conflicts = summary.total_conflicts,
        degraded = summary.degraded_sources().count(),
        routed = result.router.is_some(),
        elapsed_ms = result.elapsed.as_millis() as u64,
        "reconcile pipeline complete"
    );

    progress.done(&result);
    Ok(result)
}

/// Record a finished run in the history table.
pub async fn record_run(storage: &Storage, result: &ReconcileResult) -> Result<()> {
    let summary = &result.knowledge_base.quality_summary;
    let record = RunRecord {
        id: result.run_id.to_string(),
        name: result.manifest.name.clone(),
        strategy: result.strategy.clone(),
        created_at: result.manifest.created_at.to_rfc3339(),
        entry_count: result.manifest.entry_count as u64,
        conflict_count: result.manifest.conflict_count as u64,
        degraded_sources: result.manifest.degraded_sources as u64,
        output_dir: result.output_dir.display().to_string(),
        summary_json: serde_json::to_string(summary)?,
    };
    storage.record_run(&record).await
}
