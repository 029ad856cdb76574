//! Topic routing for large knowledge bases.
//!
//! Entries are partitioned into keyword-addressed [`Topic`]s: every entry
//! lands in exactly one topic, and entries no keyword reaches land in the
//! reserved `unclassified` topic, which is always last.

pub mod derive;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use skillsmith_shared::{
    CURRENT_SCHEMA_VERSION, MergedEntry, MergedKnowledgeBase, Result, RouterSettings,
    SkillsmithError, TopicDefinition, UNCLASSIFIED_TOPIC,
};

pub use derive::{auto_topics, hints_from_issues};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    /// Lower-cased.
    pub keywords: BTreeSet<String>,
    pub entry_ids: BTreeSet<String>,
    /// Keyword -> multiplier. Keywords without an external hint weigh 1.
    pub weight_hints: BTreeMap<String, u32>,
}

impl Topic {
    fn new(name: impl Into<String>, keywords: BTreeSet<String>, hints: &BTreeMap<String, u32>) -> Self {
        let weight_hints = keywords
            .iter()
            .map(|k| (k.clone(), hints.get(k).copied().unwrap_or(1)))
            .collect();
        Self {
            name: name.into(),
            keywords,
            entry_ids: BTreeSet::new(),
            weight_hints,
        }
    }

    fn weight(&self, keyword: &str) -> u32 {
        self.weight_hints.get(keyword).copied().unwrap_or(1)
    }

    /// Weighted count of non-overlapping keyword occurrences in `text`,
    /// which must already be lower-cased.
    pub fn score(&self, text: &str) -> u32 {
        self.keywords
            .iter()
            .map(|k| text.matches(k.as_str()).count() as u32 * self.weight(k))
            .sum()
    }
}

/// A topic ranked for a free-text query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteMatch {
    pub topic: String,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterIndex {
    pub schema_version: u32,
    /// Declaration order, `unclassified` last.
    pub topics: Vec<Topic>,
    /// Keyword -> topic name.
    pub lookup: BTreeMap<String, String>,
}

impl RouterIndex {
    pub fn topic(&self, name: &str) -> Option<&Topic> {
        self.topics.iter().find(|t| t.name == name)
    }

    /// The topic an entry was assigned to.
    pub fn topic_of(&self, identifier: &str) -> Option<&str> {
        self.topics
            .iter()
            .find(|t| t.entry_ids.contains(identifier))
            .map(|t| t.name.as_str())
    }

    /// Rank topics for a query through the keyword lookup. Best first,
    /// declaration order among equals; topics with no hit are omitted.
    pub fn route(&self, query: &str) -> Vec<RouteMatch> {
        let query = query.to_lowercase();
        let mut scores: BTreeMap<&str, u32> = BTreeMap::new();
        for (keyword, topic_name) in &self.lookup {
            let hits = query.matches(keyword.as_str()).count() as u32;
            if hits == 0 {
                continue;
            }
            let weight = self.topic(topic_name).map_or(1, |t| t.weight(keyword));
            *scores.entry(topic_name.as_str()).or_default() += hits * weight;
        }

        let mut ranked: Vec<(usize, RouteMatch)> = self
            .topics
            .iter()
            .enumerate()
            .filter_map(|(order, t)| {
                scores.get(t.name.as_str()).map(|&score| {
                    (
                        order,
                        RouteMatch {
                            topic: t.name.clone(),
                            score,
                        },
                    )
                })
            })
            .collect();
        ranked.sort_by(|(oa, a), (ob, b)| b.score.cmp(&a.score).then(oa.cmp(ob)));
        ranked.into_iter().map(|(_, m)| m).collect()
    }

    /// Every knowledge-base entry in exactly one topic, and nothing else.
    pub fn check_partition(&self, kb: &MergedKnowledgeBase) -> Result<()> {
        let mut seen = BTreeSet::new();
        for topic in &self.topics {
            for id in &topic.entry_ids {
                if !seen.insert(id.as_str()) {
                    return Err(SkillsmithError::validation(format!(
                        "entry '{id}' assigned to more than one topic"
                    )));
                }
                if !kb.entries.contains_key(id) {
                    return Err(SkillsmithError::validation(format!(
                        "topic '{}' references unknown entry '{id}'",
                        topic.name
                    )));
                }
            }
        }
        if seen.len() != kb.len() {
            return Err(SkillsmithError::validation(format!(
                "{} of {} entries are unassigned",
                kb.len() - seen.len(),
                kb.len()
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Whether the knowledge base is large enough to be split.
pub fn should_route(kb: &MergedKnowledgeBase, settings: &RouterSettings) -> bool {
    kb.len() > settings.threshold
}

/// Partition the knowledge base.
///
/// Topics come from `settings.topics` when declared, otherwise from
/// identifier prefixes. `hints` maps keywords to multipliers (see
/// [`hints_from_issues`]). Invalid topic definitions are a configuration
/// error and nothing is routed.
#[instrument(skip_all, fields(entries = kb.len(), hints = hints.len()))]
pub fn build_index(
    kb: &MergedKnowledgeBase,
    settings: &RouterSettings,
    hints: &BTreeMap<String, u32>,
) -> Result<RouterIndex> {
    settings.validate()?;

    let definitions: Vec<TopicDefinition> = if settings.topics.is_empty() {
        let derived = auto_topics(kb, settings);
        debug!(topics = derived.len(), "auto-derived topics");
        derived
    } else {
        settings.topics.clone()
    };

    let hints: BTreeMap<String, u32> = hints
        .iter()
        .map(|(k, v)| (k.trim().to_lowercase(), (*v).max(1)))
        .collect();

    let mut topics: Vec<Topic> = definitions
        .iter()
        .map(|d| {
            let keywords = d.keywords.iter().map(|k| k.trim().to_lowercase()).collect();
            Topic::new(d.name.trim(), keywords, &hints)
        })
        .collect();

    for (identifier, merged) in &kb.entries {
        let text = routing_text(merged);
        match best_topic(&topics, &text) {
            Some(slot) => {
                topics[slot].entry_ids.insert(identifier.clone());
            }
            None => debug!(identifier = %identifier, "no topic keyword matched"),
        }
    }

    let assigned: BTreeSet<&String> = topics.iter().flat_map(|t| &t.entry_ids).collect();
    let mut unclassified = Topic::new(UNCLASSIFIED_TOPIC, BTreeSet::new(), &hints);
    unclassified.entry_ids = kb
        .entries
        .keys()
        .filter(|id| !assigned.contains(id))
        .cloned()
        .collect();
    topics.push(unclassified);

    let lookup = topics
        .iter()
        .flat_map(|t| t.keywords.iter().map(|k| (k.clone(), t.name.clone())))
        .collect();

    let index = RouterIndex {
        schema_version: CURRENT_SCHEMA_VERSION,
        topics,
        lookup,
    };
    info!(
        topics = index.topics.len(),
        unclassified = index.topics.last().map_or(0, |t| t.entry_ids.len()),
        "router index built"
    );
    Ok(index)
}

fn routing_text(merged: &MergedEntry) -> String {
    format!(
        "{} {} {}",
        merged.entry.identifier, merged.entry.description, merged.entry.location
    )
    .to_lowercase()
}

/// Highest positive score wins; the first-declared topic wins ties.
fn best_topic(topics: &[Topic], text: &str) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (slot, topic) in topics.iter().enumerate() {
        let score = topic.score(text);
        if score > 0 && best.is_none_or(|(_, top)| score > top) {
            best = Some((slot, score));
        }
    }
    best.map(|(slot, _)| slot)
}
