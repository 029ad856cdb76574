//! Record normalization: heterogeneous raw extracts in, canonical entries out.
//!
//! Each source kind has its own rules (see [`docs`], [`code`], [`pdf`]).
//! Normalization is pure and never fails: records without a usable
//! identifier are dropped and counted, and same-identifier records are
//! collapsed onto the most specific one.

mod code;
mod docs;
mod issues;
mod pdf;
pub mod signature;

use std::collections::BTreeMap;

use tracing::{debug, info, instrument, warn};

use skillsmith_shared::{
    Entry, ExtractEnvelope, ExtractStatus, IssueRecord, NormalizeReport, RawRecord, SourceKind,
};

pub use issues::normalize_issues;

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Normalize one source's raw records.
#[instrument(skip_all, fields(kind = %kind, records = records.len()))]
pub fn normalize(kind: SourceKind, records: &[RawRecord]) -> NormalizeReport {
    let rule: fn(&RawRecord) -> Option<Entry> = match kind {
        SourceKind::Documentation => docs::normalize_record,
        SourceKind::Code => code::normalize_record,
        SourceKind::Pdf => pdf::normalize_record,
    };

    let mut report = NormalizeReport::empty(kind);
    let mut by_identifier: BTreeMap<String, Entry> = BTreeMap::new();

    for record in records {
        let Some(entry) = rule(record) else {
            report.dropped += 1;
            continue;
        };

        match by_identifier.get_mut(&entry.identifier) {
            Some(existing) => {
                report.duplicates += 1;
                // First seen wins ties.
                if entry.specificity() > existing.specificity() {
                    debug!(identifier = %entry.identifier, "replacing less specific duplicate");
                    *existing = entry;
                }
            }
            None => {
                by_identifier.insert(entry.identifier.clone(), entry);
            }
        }
    }

    report.entries = by_identifier.into_values().collect();

    if report.dropped > 0 {
        warn!(dropped = report.dropped, "records without a usable identifier were dropped");
    }
    info!(
        entries = report.entries.len(),
        dropped = report.dropped,
        duplicates = report.duplicates,
        "source normalized"
    );
    report
}

/// Normalize a whole extract file, honouring its upstream status.
///
/// A failed extract yields a degraded, empty report. A partial extract keeps
/// its entries but is still marked degraded. Issues are only read for code
/// sources.
pub fn normalize_extract(
    kind: SourceKind,
    envelope: &ExtractEnvelope,
) -> (NormalizeReport, Vec<IssueRecord>) {
    match envelope.status {
        ExtractStatus::Failed => {
            let reason = envelope
                .error
                .clone()
                .unwrap_or_else(|| "extraction failed upstream".to_string());
            warn!(kind = %kind, reason = %reason, "source degraded");
            (NormalizeReport::failed(kind, reason), Vec::new())
        }
        status => {
            let mut report = normalize(kind, &envelope.records);
            if status == ExtractStatus::Partial {
                let reason = envelope
                    .error
                    .clone()
                    .unwrap_or_else(|| "extraction was partial".to_string());
                warn!(kind = %kind, reason = %reason, "source degraded");
                report.degraded = Some(reason);
            }

            let issues = if kind == SourceKind::Code {
                normalize_issues(&envelope.issues).0
            } else {
                Vec::new()
            };
            (report, issues)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(values: Vec<serde_json::Value>) -> Vec<RawRecord> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().expect("object"))
            .collect()
    }

    #[test]
    fn drops_are_counted_not_raised() {
        let report = normalize(
            SourceKind::Documentation,
            &records(vec![
                json!({"heading": "rotate"}),
                json!({"heading": "Introduction"}),
                json!({}),
            ]),
        );
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.dropped, 2);
    }

    #[test]
    fn duplicates_keep_most_specific() {
        let report = normalize(
            SourceKind::Documentation,
            &records(vec![
                json!({"heading": "rotate", "body": "Short."}),
                json!({"heading": "rotate", "code_fence": "def rotate(angle)", "body": "x"}),
                json!({"heading": "rotate", "body": "A much longer description."}),
            ]),
        );
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.duplicates, 2);
        assert!(report.entries[0].signature.is_some());
    }

    #[test]
    fn entries_sorted_and_unique() {
        let report = normalize(
            SourceKind::Code,
            &records(vec![
                json!({"qualified_name": "b", "params": []}),
                json!({"qualified_name": "a"}),
                json!({"qualified_name": "B"}),
            ]),
        );
        let ids: Vec<&str> = report.entries.iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(ids, vec!["B", "a", "b"]);
    }

    #[test]
    fn failed_extract_is_degraded_and_empty() {
        let envelope = ExtractEnvelope {
            status: ExtractStatus::Failed,
            error: Some("404".into()),
            records: records(vec![json!({"qualified_name": "a"})]),
            issues: Vec::new(),
        };
        let (report, issues) = normalize_extract(SourceKind::Code, &envelope);
        assert!(report.entries.is_empty());
        assert_eq!(report.degraded.as_deref(), Some("404"));
        assert!(issues.is_empty());
    }

    #[test]
    fn partial_extract_keeps_entries() {
        let envelope = ExtractEnvelope {
            status: ExtractStatus::Partial,
            error: None,
            records: records(vec![json!({"qualified_name": "a"})]),
            issues: records(vec![json!({"id": 1, "labels": ["auth"]})]),
        };
        let (report, issues) = normalize_extract(SourceKind::Code, &envelope);
        assert_eq!(report.entries.len(), 1);
        assert!(report.is_degraded());
        assert_eq!(issues.len(), 1);
    }
}
