//! Conflict detection between documentation-like sources and code.
//!
//! Detection is purely comparative: it reads normalized reports and returns
//! [`ConflictRecord`]s, never touching its inputs. Degraded sources are left
//! out, and when no meaningful comparison is possible the result says so
//! through [`DetectionStatus::Skipped`] rather than reporting zero conflicts.

pub mod matcher;

use std::collections::BTreeMap;

use tracing::{debug, info, instrument, warn};

use skillsmith_shared::{
    ConflictKind, ConflictRecord, DetectionStatus, Entry, MatchingConfig, NormalizeReport, Result,
    Signature, SourceKind,
};

use matcher::CandidateIndex;

/// Output of one detection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Sorted by identifier, then kind.
    pub conflicts: Vec<ConflictRecord>,
    /// Documentation identifier -> code identifier, for fuzzy pairs only.
    pub aliases: BTreeMap<String, String>,
    /// Identifiers only a degraded documentation-like source covers, with
    /// the reason they could not be compared.
    pub uncompared: BTreeMap<String, String>,
    pub status: DetectionStatus,
}

impl Detection {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            conflicts: Vec::new(),
            aliases: BTreeMap::new(),
            uncompared: BTreeMap::new(),
            status: DetectionStatus::Skipped {
                reason: reason.into(),
            },
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, DetectionStatus::Skipped { .. })
    }

    /// Conflicts grouped by identifier.
    pub fn by_identifier(&self) -> BTreeMap<&str, Vec<&ConflictRecord>> {
        let mut grouped: BTreeMap<&str, Vec<&ConflictRecord>> = BTreeMap::new();
        for conflict in &self.conflicts {
            grouped
                .entry(conflict.identifier.as_str())
                .or_default()
                .push(conflict);
        }
        grouped
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Compare every usable documentation-like source against the code source.
#[instrument(skip_all, fields(sources = reports.len(), threshold = config.threshold))]
pub fn detect(reports: &[NormalizeReport], config: &MatchingConfig) -> Result<Detection> {
    let usable = |kind: SourceKind| {
        reports
            .iter()
            .find(|r| r.kind == kind)
            .filter(|r| !r.is_degraded())
    };

    let Some(code) = usable(SourceKind::Code) else {
        let reason = match reports.iter().find(|r| r.kind == SourceKind::Code) {
            Some(_) => "code source is degraded",
            None => "no code source",
        };
        warn!(reason, "conflict detection skipped");
        return Ok(Detection::skipped(reason));
    };

    let doc_sources: Vec<&NormalizeReport> = [SourceKind::Documentation, SourceKind::Pdf]
        .into_iter()
        .filter_map(usable)
        .collect();
    if doc_sources.is_empty() {
        let reason = if reports.iter().any(|r| r.kind.is_documentation_like()) {
            "every documentation source is degraded"
        } else {
            "no documentation source"
        };
        warn!(reason, "conflict detection skipped");
        return Ok(Detection::skipped(reason));
    }

    // Documentation wins over PDF for the same identifier.
    let mut docs: BTreeMap<&str, &Entry> = BTreeMap::new();
    for source in &doc_sources {
        for entry in &source.entries {
            docs.entry(entry.identifier.as_str()).or_insert(entry);
        }
    }
    let code_entries: BTreeMap<&str, &Entry> = code
        .entries
        .iter()
        .map(|e| (e.identifier.as_str(), e))
        .collect();

    // A degraded source's entries are unreliable evidence of absence, so the
    // identifiers it covers are neither compared nor reported missing.
    let mut uncompared: BTreeMap<String, String> = BTreeMap::new();
    for source in reports
        .iter()
        .filter(|r| r.kind.is_documentation_like() && r.is_degraded())
    {
        let reason = format!("{} source is degraded", source.kind);
        for entry in &source.entries {
            if !docs.contains_key(entry.identifier.as_str()) {
                uncompared
                    .entry(entry.identifier.clone())
                    .or_insert_with(|| reason.clone());
            }
        }
    }

    let mut index = CandidateIndex::new(docs.keys().copied().collect(), config);

    // Phase 1 for everything first, so an exact pair is never stolen by a
    // fuzzy match on an earlier identifier.
    let mut pairs: BTreeMap<&str, (&Entry, Option<String>)> = BTreeMap::new();
    let mut unmatched: Vec<&str> = Vec::new();
    for &id in code_entries.keys() {
        if index.claim_exact(id) {
            pairs.insert(id, (docs[id], None));
        } else {
            unmatched.push(id);
        }
    }

    let mut conflicts = Vec::new();
    let mut aliases = BTreeMap::new();

    let unmatched: Vec<&str> = unmatched
        .into_iter()
        .filter(|id| !uncompared.contains_key(*id))
        .collect();
    let mut found = index.claim_fuzzy_all(&unmatched);
    for id in unmatched {
        match found.remove(id) {
            Some(m) => {
                debug!(code = id, docs = %m.identifier, similarity = m.similarity, "fuzzy match");
                aliases.insert(m.identifier.clone(), id.to_string());
                pairs.insert(id, (docs[m.identifier.as_str()], Some(m.identifier)));
            }
            None => {
                conflicts.push(ConflictRecord::between(
                    ConflictKind::MissingInDocs,
                    None,
                    Some(code_entries[id].clone()),
                )?);
            }
        }
    }

    for (id, (doc, alias)) in pairs {
        let code_entry = code_entries[id];
        let Some(kind) = compare(doc, code_entry) else {
            continue;
        };
        let mut left = doc.clone();
        left.identifier = id.to_string();
        let mut record = ConflictRecord::between(kind, Some(left), Some(code_entry.clone()))?;
        record.matched_alias = alias;
        conflicts.push(record);
    }

    for id in index.unclaimed() {
        conflicts.push(ConflictRecord::between(
            ConflictKind::MissingInCode,
            Some(docs[id].clone()),
            None,
        )?);
    }

    conflicts.sort_by(|a, b| (&a.identifier, a.kind).cmp(&(&b.identifier, b.kind)));

    let compared: Vec<SourceKind> = std::iter::once(SourceKind::Code)
        .chain(doc_sources.iter().map(|s| s.kind))
        .collect();
    info!(
        conflicts = conflicts.len(),
        aliases = aliases.len(),
        uncompared = uncompared.len(),
        "conflict detection complete"
    );

    Ok(Detection {
        conflicts,
        aliases,
        uncompared,
        status: DetectionStatus::Completed { compared },
    })
}

/// At most one disagreement per pair: a signature mismatch masks any
/// description difference.
fn compare(doc: &Entry, code: &Entry) -> Option<ConflictKind> {
    if let (Some(d), Some(c)) = (&doc.signature, &code.signature) {
        if !signatures_agree(d, c) {
            return Some(ConflictKind::SignatureMismatch);
        }
    }

    let (d, c) = (collapse(&doc.description), collapse(&code.description));
    (!d.is_empty() && !c.is_empty() && d != c).then_some(ConflictKind::DescriptionMismatch)
}

fn signatures_agree(doc: &Signature, code: &Signature) -> bool {
    doc.same_shape(code)
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
