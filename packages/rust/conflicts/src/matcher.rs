//! Cross-source identifier matching.
//!
//! An index over the documentation-side identifiers: exact lookups are hash
//! hits, and the similarity scan only visits candidates whose normalized
//! length can still reach the threshold. Fuzzy claims are assigned best pair
//! first, so a documentation entry goes to the code identifier that matches it
//! best rather than to whichever code identifier sorts first.

use std::collections::{BTreeMap, HashMap};

use skillsmith_shared::{MatchingConfig, TieBreak};

/// Similarity comparisons tolerate float rounding at the threshold.
const SCORE_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Normalization and similarity
// ---------------------------------------------------------------------------

fn strip_params(identifier: &str) -> &str {
    identifier.find('(').map_or(identifier, |open| &identifier[..open])
}

fn collapse_segment(segment: &str) -> String {
    segment
        .chars()
        .filter(|c| !matches!(c, '_' | '-') && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Reduce an identifier to its fuzzy-comparison key.
///
/// `pkg.Node2D.move_local_x()` and `moveLocalX` both become `movelocalx`.
pub fn normalize_identifier(identifier: &str, config: &MatchingConfig) -> String {
    let base = strip_params(identifier);
    let last = base
        .rsplit(['.', ':', '#', '/'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(base);

    let mut key = collapse_segment(last);

    for prefix in &config.strip_prefixes {
        let prefix = prefix.to_lowercase();
        if let Some(rest) = key.strip_prefix(prefix.as_str()).filter(|r| !r.is_empty()) {
            key = rest.to_string();
            break;
        }
    }
    for suffix in &config.strip_suffixes {
        let suffix = suffix.to_lowercase();
        if let Some(rest) = key.strip_suffix(suffix.as_str()).filter(|r| !r.is_empty()) {
            key = rest.to_string();
            break;
        }
    }
    key
}

/// Number of trailing qualified-path segments two identifiers share.
///
/// `Socket.close` agrees with `net.Socket.close` on two segments and with
/// `fs.File.close` on one.
pub fn qualified_agreement(a: &str, b: &str) -> usize {
    let segments = |id: &str| -> Vec<String> {
        strip_params(id)
            .split(['.', ':', '#', '/'])
            .filter(|s| !s.is_empty())
            .map(collapse_segment)
            .collect()
    };
    let (a, b) = (segments(a), segments(b));
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Levenshtein distance over chars, two rows.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Similarity of two normalized keys in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// A documentation-side identifier matched to a code identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub identifier: String,
    pub similarity: f64,
}

/// One qualifying (code, documentation) pairing.
#[derive(Debug, Clone, Copy)]
struct Pair {
    code: usize,
    slot: usize,
    similarity: f64,
    agreement: usize,
}

impl Pair {
    /// Higher is better. Similarity is quantized so rounding noise cannot
    /// split a tie.
    fn rank(&self) -> (u64, usize) {
        ((self.similarity / SCORE_TOLERANCE).round() as u64, self.agreement)
    }
}

/// Claimable index over documentation-side identifiers.
pub struct CandidateIndex<'a> {
    config: &'a MatchingConfig,
    identifiers: Vec<&'a str>,
    keys: Vec<String>,
    claimed: Vec<bool>,
    exact: HashMap<&'a str, usize>,
    by_len: BTreeMap<usize, Vec<usize>>,
}

impl<'a> CandidateIndex<'a> {
    /// Identifiers must be sorted and unique; slot order doubles as the
    /// lexicographic tie-break order.
    pub fn new(identifiers: Vec<&'a str>, config: &'a MatchingConfig) -> Self {
        let keys: Vec<String> = identifiers
            .iter()
            .map(|id| normalize_identifier(id, config))
            .collect();

        let mut exact = HashMap::with_capacity(identifiers.len());
        let mut by_len: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (slot, id) in identifiers.iter().enumerate() {
            exact.insert(*id, slot);
            by_len.entry(keys[slot].chars().count()).or_default().push(slot);
        }

        Self {
            config,
            claimed: vec![false; identifiers.len()],
            identifiers,
            keys,
            exact,
            by_len,
        }
    }

    /// Phase 1: claim an identical identifier.
    pub fn claim_exact(&mut self, identifier: &str) -> bool {
        match self.exact.get(identifier) {
            Some(&slot) if !self.claimed[slot] => {
                self.claimed[slot] = true;
                true
            }
            _ => false,
        }
    }

    /// Fuzzy-match a single code identifier.
    pub fn claim_fuzzy(&mut self, identifier: &str) -> Option<Match> {
        self.claim_fuzzy_all(&[identifier]).into_values().next()
    }

    /// Phases 2 and 3 for a batch of code identifiers (sorted, unique).
    ///
    /// Pairs are ranked by similarity, then by [`qualified_agreement`]. The
    /// best remaining pair is claimed first. Pairs tied on both are settled by
    /// the tie-break policy: [`TieBreak::Lexicographic`] takes the smallest
    /// code identifier and then the smallest documentation identifier, while
    /// [`TieBreak::Reject`] leaves both sides of an ambiguous pairing
    /// unmatched.
    pub fn claim_fuzzy_all<'c>(&mut self, identifiers: &[&'c str]) -> BTreeMap<&'c str, Match> {
        let mut pairs: Vec<Pair> = Vec::new();
        for (code, identifier) in identifiers.iter().enumerate() {
            let key = normalize_identifier(identifier, self.config);
            if key.is_empty() {
                continue;
            }
            for (slot, similarity) in self.scan(&key) {
                pairs.push(Pair {
                    code,
                    slot,
                    similarity,
                    agreement: qualified_agreement(identifier, self.identifiers[slot]),
                });
            }
        }
        pairs.sort_by(|a, b| {
            b.rank()
                .cmp(&a.rank())
                .then(a.code.cmp(&b.code))
                .then(a.slot.cmp(&b.slot))
        });

        let mut code_done = vec![false; identifiers.len()];
        let mut blocked = vec![false; self.identifiers.len()];
        let mut matches = BTreeMap::new();

        for group in pairs.chunk_by(|a, b| a.rank() == b.rank()) {
            for pair in group {
                let live = |p: &Pair, code_done: &[bool], claimed: &[bool], blocked: &[bool]| {
                    !code_done[p.code] && !claimed[p.slot] && !blocked[p.slot]
                };
                if !live(pair, &code_done, &self.claimed, &blocked) {
                    continue;
                }

                if self.config.tie_break == TieBreak::Reject {
                    let (mut code_rival, mut slot_rival) = (false, false);
                    for other in group
                        .iter()
                        .filter(|&p| live(p, &code_done, &self.claimed, &blocked))
                    {
                        code_rival |= other.code == pair.code && other.slot != pair.slot;
                        slot_rival |= other.slot == pair.slot && other.code != pair.code;
                    }
                    if code_rival || slot_rival {
                        code_done[pair.code] |= code_rival;
                        blocked[pair.slot] |= slot_rival;
                        continue;
                    }
                }

                code_done[pair.code] = true;
                self.claimed[pair.slot] = true;
                matches.insert(
                    identifiers[pair.code],
                    Match {
                        identifier: self.identifiers[pair.slot].to_string(),
                        similarity: pair.similarity,
                    },
                );
            }
        }
        matches
    }

    /// Bounded similarity scan over unclaimed slots. Returns every slot at or
    /// above the threshold.
    fn scan(&self, key: &str) -> Vec<(usize, f64)> {
        let len = key.chars().count() as f64;
        let threshold = self.config.threshold;
        // similarity <= min/max, so lengths outside this window cannot qualify.
        let lo = (len * threshold - SCORE_TOLERANCE).ceil() as usize;
        let hi = (len / threshold + SCORE_TOLERANCE).floor() as usize;

        self.by_len
            .range(lo..=hi)
            .flat_map(|(_, slots)| slots.iter().copied())
            .filter(|&slot| !self.claimed[slot])
            .filter_map(|slot| {
                let score = similarity(key, &self.keys[slot]);
                (score + SCORE_TOLERANCE >= threshold).then_some((slot, score))
            })
            .collect()
    }

    /// Identifiers never claimed, in sorted order.
    pub fn unclaimed(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.identifiers
            .iter()
            .zip(&self.claimed)
            .filter(|(_, claimed)| !**claimed)
            .map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_case_separators_and_paths() {
        let config = MatchingConfig::default();
        assert_eq!(normalize_identifier("moveLocalX", &config), "movelocalx");
        assert_eq!(normalize_identifier("move-local-x", &config), "movelocalx");
        assert_eq!(normalize_identifier("pkg.Node2D.move_local_x()", &config), "movelocalx");
        assert_eq!(normalize_identifier("std::fs::read", &config), "read");
    }

    #[test]
    fn configured_affixes_are_stripped() {
        let config = MatchingConfig {
            strip_prefixes: vec!["get".into()],
            strip_suffixes: vec!["Async".into()],
            ..MatchingConfig::default()
        };
        assert_eq!(normalize_identifier("getUserAsync", &config), "user");
        // Never strip down to nothing.
        assert_eq!(normalize_identifier("get", &config), "get");
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
        assert!((similarity("rotate", "rotates") - (1.0 - 1.0 / 7.0)).abs() < 1e-9);
    }

    #[test]
    fn exact_then_fuzzy_claims() {
        let config = MatchingConfig::default();
        let mut index = CandidateIndex::new(vec!["move-local-x", "rotate"], &config);
        assert!(index.claim_exact("rotate"));
        assert!(!index.claim_exact("rotate"));

        let m = index.claim_fuzzy("moveLocalX").expect("match");
        assert_eq!(m.identifier, "move-local-x");
        assert_eq!(m.similarity, 1.0);
        assert_eq!(index.unclaimed().count(), 0);
    }

    #[test]
    fn unrelated_identifiers_never_match() {
        let config = MatchingConfig::default();
        let mut index = CandidateIndex::new(vec!["scale", "translate"], &config);
        assert!(index.claim_fuzzy("rotate").is_none());
        assert_eq!(index.unclaimed().count(), 2);
    }

    #[test]
    fn near_miss_above_threshold_matches() {
        let config = MatchingConfig::default();
        let mut index = CandidateIndex::new(vec!["initialise_engine"], &config);
        let m = index.claim_fuzzy("initializeEngine").expect("match");
        assert!(m.similarity >= 0.85);
    }

    #[test]
    fn ties_follow_policy() {
        let lexicographic = MatchingConfig::default();
        let mut index = CandidateIndex::new(vec!["a.rotate", "b.rotate"], &lexicographic);
        assert_eq!(index.claim_fuzzy("rotate").expect("match").identifier, "a.rotate");

        let reject = MatchingConfig {
            tie_break: TieBreak::Reject,
            ..MatchingConfig::default()
        };
        let mut index = CandidateIndex::new(vec!["a.rotate", "b.rotate"], &reject);
        assert!(index.claim_fuzzy("rotate").is_none());
    }

    #[test]
    fn qualified_agreement_counts_trailing_segments() {
        assert_eq!(qualified_agreement("Socket.close", "net.Socket.close"), 2);
        assert_eq!(qualified_agreement("Socket.close", "fs.File.close"), 1);
        assert_eq!(qualified_agreement("std::fs::read()", "fs.read"), 2);
        assert_eq!(qualified_agreement("open", "close"), 0);
    }

    #[test]
    fn shared_key_goes_to_best_qualified_code_identifier() {
        let config = MatchingConfig::default();
        let mut index = CandidateIndex::new(vec!["Socket.close"], &config);
        let found = index.claim_fuzzy_all(&["fs.File.close", "net.Socket.close"]);
        assert_eq!(found.len(), 1);
        assert_eq!(found["net.Socket.close"].identifier, "Socket.close");
        assert!(!found.contains_key("fs.File.close"));
    }

    #[test]
    fn higher_similarity_wins_over_code_order() {
        let config = MatchingConfig::default();
        let mut index = CandidateIndex::new(vec!["initialize_engine"], &config);
        // `initialiseEngine` sorts first but is only a near miss.
        let found = index.claim_fuzzy_all(&["initialiseEngine", "initializeEngine"]);
        assert_eq!(found.len(), 1);
        assert_eq!(found["initializeEngine"].similarity, 1.0);
    }

    #[test]
    fn code_side_ties_follow_policy() {
        let lexicographic = MatchingConfig::default();
        let mut index = CandidateIndex::new(vec!["close"], &lexicographic);
        let found = index.claim_fuzzy_all(&["a.close", "b.close"]);
        assert_eq!(found.keys().copied().collect::<Vec<_>>(), vec!["a.close"]);

        let reject = MatchingConfig {
            tie_break: TieBreak::Reject,
            ..MatchingConfig::default()
        };
        let mut index = CandidateIndex::new(vec!["close"], &reject);
        assert!(index.claim_fuzzy_all(&["a.close", "b.close"]).is_empty());
        assert_eq!(index.unclaimed().collect::<Vec<_>>(), vec!["close"]);
    }

    #[test]
    fn similarity_exactly_at_threshold_matches() {
        let config = MatchingConfig::default();
        // 20 chars, 3 substitutions: 1 - 3/20 = 0.85.
        let mut index = CandidateIndex::new(vec!["abcdefghijklmnopqxyz"], &config);
        let m = index.claim_fuzzy("abcdefghijklmnopqrst").expect("match at threshold");
        assert!((m.similarity - 0.85).abs() < 1e-9);

        // 4 substitutions: 0.80, below the threshold.
        let mut index = CandidateIndex::new(vec!["abcdefghijklmnopwxyz"], &config);
        assert!(index.claim_fuzzy("abcdefghijklmnopqrst").is_none());
    }
}
