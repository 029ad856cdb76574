//! Community-signal records from the repository issue tracker.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, instrument};

use skillsmith_shared::raw::{field, field_str, field_u32};
use skillsmith_shared::{IssueRecord, RawRecord};

/// Normalize issue records. Returns the usable issues plus the number of
/// records dropped for lack of an id.
#[instrument(skip_all, fields(records = records.len()))]
pub fn normalize_issues(records: &[RawRecord]) -> (Vec<IssueRecord>, usize) {
    let mut issues = Vec::with_capacity(records.len());
    let mut dropped = 0;

    for record in records {
        match normalize_issue(record) {
            Some(issue) => issues.push(issue),
            None => dropped += 1,
        }
    }

    debug!(issues = issues.len(), dropped, "issues normalized");
    (issues, dropped)
}

fn normalize_issue(record: &RawRecord) -> Option<IssueRecord> {
    let issue_id = field_str(record, &["issue_id", "id", "number"])?;

    let labels: BTreeSet<String> = match field(record, &["labels"]) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.as_str()),
                Value::Object(obj) => obj.get("name").and_then(Value::as_str),
                _ => None,
            })
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => BTreeSet::new(),
    };

    Some(IssueRecord {
        issue_id,
        title: field_str(record, &["title"]).unwrap_or_default(),
        labels,
        comment_count: field_u32(record, &["comment_count", "comments"]).unwrap_or(0),
        state: field_str(record, &["state"])
            .map(|s| s.to_lowercase())
            .unwrap_or_else(|| "open".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn labels_accept_strings_and_objects() {
        let records: Vec<RawRecord> = vec![
            json!({"number": 7, "title": "Token expires", "labels": ["Auth", {"name": "bug"}], "comments": 4}),
            json!({"title": "no id"}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();

        let (issues, dropped) = normalize_issues(&records);
        assert_eq!(dropped, 1);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_id, "7");
        assert_eq!(issues[0].comment_count, 4);
        assert_eq!(issues[0].state, "open");
        assert!(issues[0].labels.contains("auth") && issues[0].labels.contains("bug"));
    }
}
