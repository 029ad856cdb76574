//! Merge engine: normalized entries plus detected conflicts in, one
//! [`MergedKnowledgeBase`] out.
//!
//! Strategies are interchangeable behind [`MergeStrategy`]. The
//! [`DeterministicMerger`] is the pure default; the
//! [`AssistedMerger`](assisted::AssistedMerger) starts from its result and
//! only overrides what a reasoning collaborator confidently resolves.

pub mod assisted;
pub mod bridge;

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{info, instrument};

use skillsmith_conflicts::Detection;
use skillsmith_shared::{
    CURRENT_SCHEMA_VERSION, ConflictKind, ConflictRecord, DetectionStatus, Entry, KindCounts,
    Location, MergeStatus, MergedEntry, MergedKnowledgeBase, NormalizeReport, QualitySummary,
    Result, SeverityCounts, SourceKind, SourceSummary,
};

pub use assisted::{
    AssistConfig, AssistedMerger, CollaboratorError, ReasoningCollaborator, ResolutionRequest,
    ResolutionResponse,
};
pub use bridge::BridgeCollaborator;

// ---------------------------------------------------------------------------
// Strategy contract
// ---------------------------------------------------------------------------

/// Everything a strategy may read. Borrowed, so strategies cannot mutate
/// the snapshot they merge.
#[derive(Debug, Clone, Copy)]
pub struct MergeInput<'a> {
    pub reports: &'a [NormalizeReport],
    pub detection: &'a Detection,
}

#[async_trait]
pub trait MergeStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build the knowledge base. Either the whole result or an error; never
    /// a partially merged value.
    async fn merge(&self, input: MergeInput<'_>) -> Result<MergedKnowledgeBase>;
}

/// Rule-based strategy. Pure and deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicMerger;

#[async_trait]
impl MergeStrategy for DeterministicMerger {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    async fn merge(&self, input: MergeInput<'_>) -> Result<MergedKnowledgeBase> {
        merge_deterministic(input)
    }
}

// ---------------------------------------------------------------------------
// Deterministic merge
// ---------------------------------------------------------------------------

/// Per-identifier contributions, one slot per source kind.
#[derive(Default)]
struct Contributions<'a> {
    docs: Option<&'a Entry>,
    code: Option<&'a Entry>,
    pdf: Option<&'a Entry>,
    aliases: Vec<String>,
}

/// The rule-based merge, shared by both strategies.
#[instrument(skip_all, fields(sources = input.reports.len(), conflicts = input.detection.conflicts.len()))]
pub fn merge_deterministic(input: MergeInput<'_>) -> Result<MergedKnowledgeBase> {
    let detection = input.detection;
    let mut groups: BTreeMap<String, Contributions<'_>> = BTreeMap::new();

    for report in input.reports {
        for entry in &report.entries {
            // Fuzzy-matched documentation entries merge under the code name.
            let alias = match report.kind {
                SourceKind::Code => None,
                _ => detection.aliases.get(&entry.identifier),
            };
            let key = alias.unwrap_or(&entry.identifier).clone();
            let slot = groups.entry(key).or_default();
            if alias.is_some() && !slot.aliases.contains(&entry.identifier) {
                slot.aliases.push(entry.identifier.clone());
            }
            let target = match report.kind {
                SourceKind::Documentation => &mut slot.docs,
                SourceKind::Code => &mut slot.code,
                SourceKind::Pdf => &mut slot.pdf,
            };
            if target.is_none() {
                *target = Some(entry);
            }
        }
    }

    let conflicts = detection.by_identifier();
    let mut entries = BTreeMap::new();
    for (identifier, mut contributions) in groups {
        contributions.aliases.sort();
        let records: Vec<ConflictRecord> = conflicts
            .get(identifier.as_str())
            .map(|list| list.iter().map(|c| (*c).clone()).collect())
            .unwrap_or_default();
        let not_compared = match &detection.status {
            DetectionStatus::Skipped { reason } => Some(reason.as_str()),
            DetectionStatus::Completed { .. } => {
                detection.uncompared.get(&identifier).map(String::as_str)
            }
        };
        let merged = merge_one(&identifier, contributions, records, not_compared);
        entries.insert(identifier, merged);
    }

    let kb = MergedKnowledgeBase {
        schema_version: CURRENT_SCHEMA_VERSION,
        quality_summary: quality_summary(input, entries.len()),
        entries,
    };
    info!(
        entries = kb.len(),
        conflicts = kb.quality_summary.total_conflicts,
        "deterministic merge complete"
    );
    Ok(kb)
}

fn merge_one(
    identifier: &str,
    c: Contributions<'_>,
    conflicts: Vec<ConflictRecord>,
    not_compared: Option<&str>,
) -> MergedEntry {
    let doc_like = c.docs.or(c.pdf);
    let mut entry = match (c.code, doc_like) {
        (Some(code), _) => code.clone(),
        (None, Some(doc)) => doc.clone(),
        // Groups are only created from entries.
        (None, None) => Entry::new(identifier, SourceKind::Code, Location::Unknown),
    };
    entry.identifier = identifier.to_string();
    entry.signature = [c.code, c.docs, c.pdf]
        .into_iter()
        .flatten()
        .find_map(|e| e.signature.clone());
    entry.description = choose_description(c.docs, c.code, c.pdf);
    entry.low_confidence = c.code.is_none() && c.docs.is_none();

    let present: Vec<(SourceKind, &Entry)> = [
        (SourceKind::Documentation, c.docs),
        (SourceKind::Code, c.code),
        (SourceKind::Pdf, c.pdf),
    ]
    .into_iter()
    .filter_map(|(kind, e)| e.map(|e| (kind, e)))
    .collect();
    let sources: Vec<SourceKind> = present.iter().map(|(kind, _)| *kind).collect();
    let locations: Vec<Location> = present.iter().map(|(_, e)| e.location.clone()).collect();

    let (status, annotations) = status_for(&conflicts, c.code.is_some(), doc_like.is_some(), not_compared);

    MergedEntry {
        entry,
        status,
        sources,
        annotations,
        aliases: c.aliases,
        locations,
        conflicts,
    }
}

/// Documentation explains intent, so its text wins. PDF text is low
/// confidence and only fills in when code has no docstring.
fn choose_description(docs: Option<&Entry>, code: Option<&Entry>, pdf: Option<&Entry>) -> String {
    let non_empty = |e: Option<&Entry>| {
        e.map(|e| e.description.trim())
            .filter(|d| !d.is_empty())
            .map(str::to_string)
    };
    non_empty(docs)
        .or_else(|| non_empty(code))
        .or_else(|| non_empty(pdf))
        .unwrap_or_default()
}

fn status_for(
    conflicts: &[ConflictRecord],
    has_code: bool,
    has_docs: bool,
    not_compared: Option<&str>,
) -> (MergeStatus, Vec<String>) {
    if let Some(reason) = not_compared.filter(|_| conflicts.is_empty()) {
        let status = if has_code {
            MergeStatus::CodeOnly
        } else {
            MergeStatus::DocsOnly
        };
        return (status, vec![format!("not compared: {reason}")]);
    }

    let mut annotations = Vec::new();
    let mut status = None;
    for conflict in conflicts {
        let (next, note) = match conflict.kind {
            ConflictKind::MissingInDocs => (MergeStatus::Undocumented, "undocumented".to_string()),
            ConflictKind::MissingInCode => (
                MergeStatus::PossiblyStale,
                format!("possibly stale: {}", conflict.suggestion),
            ),
            ConflictKind::SignatureMismatch => (
                MergeStatus::Conflicted,
                "signature differs from the documentation; code signature kept".to_string(),
            ),
            ConflictKind::DescriptionMismatch => (
                MergeStatus::Conflicted,
                "description differs from the code docstring; documentation text kept".to_string(),
            ),
        };
        if status.is_none() {
            status = Some(next);
        }
        annotations.push(note);
    }

    let status = status.unwrap_or(match (has_code, has_docs) {
        (true, true) => MergeStatus::Agreed,
        (true, false) => MergeStatus::CodeOnly,
        _ => MergeStatus::DocsOnly,
    });
    (status, annotations)
}

fn quality_summary(input: MergeInput<'_>, total_entries: usize) -> QualitySummary {
    let mut by_kind = KindCounts::default();
    let mut by_severity = SeverityCounts::default();
    for conflict in &input.detection.conflicts {
        by_kind.record(conflict.kind);
        by_severity.record(conflict.severity);
    }

    let mut sources: Vec<SourceSummary> = input.reports.iter().map(SourceSummary::from).collect();
    sources.sort_by_key(|s| s.kind);

    QualitySummary {
        total_entries,
        total_conflicts: input.detection.conflicts.len(),
        by_kind,
        by_severity,
        dropped_records: input.reports.iter().map(|r| r.dropped).sum(),
        duplicate_records: input.reports.iter().map(|r| r.duplicates).sum(),
        sources,
        detection: input.detection.status.clone(),
    }
}
