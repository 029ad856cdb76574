//! Topic candidates and weight hints derived from the data itself.

use std::collections::{BTreeMap, BTreeSet};

use skillsmith_shared::{
    IssueRecord, MergedKnowledgeBase, RouterSettings, TopicDefinition, UNCLASSIFIED_TOPIC,
};

/// Auto-derive topics from identifier path prefixes.
///
/// Qualified identifiers contribute their first path segment, plain ones
/// their first snake/camel word. A prefix becomes a topic once it is shared
/// by `min_topic_size` entries; most frequent first, capped at
/// `max_auto_topics`.
pub fn auto_topics(kb: &MergedKnowledgeBase, settings: &RouterSettings) -> Vec<TopicDefinition> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for identifier in kb.entries.keys() {
        if let Some(prefix) = leading_prefix(identifier) {
            *counts.entry(prefix).or_default() += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(prefix, count)| {
            *count >= settings.min_topic_size.max(1) && prefix != UNCLASSIFIED_TOPIC
        })
        .collect();
    ranked.sort_by(|(a, ca), (b, cb)| cb.cmp(ca).then_with(|| a.cmp(b)));

    ranked
        .into_iter()
        .take(settings.max_auto_topics)
        .map(|(prefix, _)| TopicDefinition {
            name: prefix.clone(),
            keywords: vec![prefix],
        })
        .collect()
}

fn leading_prefix(identifier: &str) -> Option<String> {
    let first = identifier
        .split(['.', ':', '#', '/'])
        .find(|s| !s.is_empty())?;
    let qualified = first.len() < identifier.len();

    let prefix = if qualified {
        first.to_string()
    } else {
        first_word(first)?
    };
    let prefix = prefix.to_lowercase();
    (prefix.chars().count() > 1).then_some(prefix)
}

/// First word of a multi-word snake, kebab or camel identifier.
fn first_word(identifier: &str) -> Option<String> {
    let trimmed = identifier.trim_start_matches(['_', '-']);
    if let Some((head, tail)) = trimmed.split_once(['_', '-']) {
        return (!head.is_empty() && !tail.is_empty()).then(|| head.to_string());
    }
    let boundary = trimmed
        .char_indices()
        .skip(1)
        .find(|(_, c)| c.is_uppercase())
        .map(|(i, _)| i)?;
    Some(trimmed[..boundary].to_string())
}

/// Turn the most frequent meaningful issue labels into weight hints.
pub fn hints_from_issues(issues: &[IssueRecord], settings: &RouterSettings) -> BTreeMap<String, u32> {
    let ignored: BTreeSet<String> = settings
        .ignored_labels
        .iter()
        .map(|l| l.trim().to_lowercase())
        .collect();

    let mut frequency: BTreeMap<&str, usize> = BTreeMap::new();
    for issue in issues {
        for label in &issue.labels {
            if !ignored.contains(label) {
                *frequency.entry(label.as_str()).or_default() += 1;
            }
        }
    }

    let mut ranked: Vec<(&str, usize)> = frequency.into_iter().collect();
    ranked.sort_by(|(a, ca), (b, cb)| cb.cmp(ca).then_with(|| a.cmp(b)));
    ranked
        .into_iter()
        .take(settings.max_label_hints)
        .map(|(label, _)| (label.to_string(), settings.hint_multiplier))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_from_paths_and_words() {
        assert_eq!(leading_prefix("auth.login").as_deref(), Some("auth"));
        assert_eq!(leading_prefix("std::fs::read").as_deref(), Some("std"));
        assert_eq!(leading_prefix("refresh_token").as_deref(), Some("refresh"));
        assert_eq!(leading_prefix("moveLocalX").as_deref(), Some("move"));
        assert_eq!(leading_prefix("rotate"), None);
    }

    #[test]
    fn hints_skip_generic_labels() {
        let issue = |labels: &[&str]| IssueRecord {
            issue_id: "1".into(),
            title: String::new(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            comment_count: 0,
            state: "open".into(),
        };
        let issues = vec![issue(&["bug", "token"]), issue(&["token", "billing"])];
        let settings = RouterSettings {
            max_label_hints: 1,
            ..RouterSettings::default()
        };
        let hints = hints_from_issues(&issues, &settings);
        assert_eq!(hints.len(), 1);
        assert_eq!(hints.get("token"), Some(&2));
    }
}
