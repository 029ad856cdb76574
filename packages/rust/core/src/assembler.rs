//! Output directory assembler.
//!
//! Writes the merged knowledge base, and the router index with its topic
//! shards when the run was routed, into a staging directory, then renames
//! it into place. A failed run never leaves a half-built output behind.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use skillsmith_router::RouterIndex;
use skillsmith_shared::{
    CURRENT_SCHEMA_VERSION, MergedEntry, MergedKnowledgeBase, Result, SkillsmithError,
};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const KNOWLEDGE_BASE_FILE: &str = "knowledge_base.json";
pub const ROUTER_INDEX_FILE: &str = "router_index.json";
pub const TOPICS_DIR: &str = "topics";

/// Checksum of one written file, relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChecksum {
    pub path: String,
    pub sha256: String,
    pub size_bytes: usize,
}

/// `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tool_version: String,
    pub strategy: String,
    pub created_at: DateTime<Utc>,
    pub entry_count: usize,
    pub conflict_count: usize,
    pub degraded_sources: usize,
    pub routed: bool,
    pub topic_count: usize,
    pub files: Vec<FileChecksum>,
}

#[derive(Debug, Clone)]
pub struct AssembleConfig {
    pub run_id: Uuid,
    /// Project name, also the output directory name.
    pub name: String,
    pub description: String,
    pub output_root: PathBuf,
    pub tool_version: String,
    /// Name of the merge strategy that produced the knowledge base.
    pub strategy: String,
}

#[derive(Debug, Clone)]
pub struct AssembleResult {
    pub output_dir: PathBuf,
    pub manifest: RunManifest,
}

/// One topic shard (`topics/<topic>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicShard {
    pub topic: String,
    pub keywords: Vec<String>,
    pub entries: BTreeMap<String, MergedEntry>,
}

/// Assemble the output directory.
///
/// ```text
/// <output_root>/<name>/
/// ├── manifest.json
/// ├── knowledge_base.json
/// ├── router_index.json      (routed runs only)
/// └── topics/                (routed runs only)
///     ├── auth.json
///     └── unclassified.json
/// ```
#[instrument(skip_all, fields(run_id = %config.run_id, name = %config.name, entries = kb.len()))]
pub fn assemble(
    config: &AssembleConfig,
    kb: &MergedKnowledgeBase,
    router: Option<&RouterIndex>,
) -> Result<AssembleResult> {
    std::fs::create_dir_all(&config.output_root)
        .map_err(|e| SkillsmithError::io(&config.output_root, e))?;

    let staging = config
        .output_root
        .join(format!(".{}.staging-{}", config.name, config.run_id));
    let output_dir = config.output_root.join(&config.name);

    let manifest = match write_staging(&staging, config, kb, router) {
        Ok(manifest) => manifest,
        Err(e) => {
            remove_dir_best_effort(&staging);
            return Err(e);
        }
    };

    if let Err(e) = swap_into_place(&staging, &output_dir, config.run_id) {
        remove_dir_best_effort(&staging);
        return Err(e);
    }

    info!(
        path = %output_dir.display(),
        files = manifest.files.len(),
        routed = manifest.routed,
        "output assembled"
    );

    Ok(AssembleResult {
        output_dir,
        manifest,
    })
}

fn write_staging(
    staging: &Path,
    config: &AssembleConfig,
    kb: &MergedKnowledgeBase,
    router: Option<&RouterIndex>,
) -> Result<RunManifest> {
    std::fs::create_dir_all(staging).map_err(|e| SkillsmithError::io(staging, e))?;

    let mut files = vec![write_json(staging, KNOWLEDGE_BASE_FILE, kb)?];

    if let Some(index) = router {
        files.push(write_json(staging, ROUTER_INDEX_FILE, index)?);

        let topics_dir = staging.join(TOPICS_DIR);
        std::fs::create_dir_all(&topics_dir).map_err(|e| SkillsmithError::io(&topics_dir, e))?;
        let mut stems = BTreeSet::new();
        for topic in &index.topics {
            let shard = TopicShard {
                topic: topic.name.clone(),
                keywords: topic.keywords.iter().cloned().collect(),
                entries: topic
                    .entry_ids
                    .iter()
                    .filter_map(|id| kb.entries.get(id).map(|e| (id.clone(), e.clone())))
                    .collect(),
            };
            let stem = unique_stem(&mut stems, &topic.name);
            let relative = format!("{TOPICS_DIR}/{stem}.json");
            files.push(write_json(staging, &relative, &shard)?);
        }
    }

    let summary = &kb.quality_summary;
    let manifest = RunManifest {
        schema_version: CURRENT_SCHEMA_VERSION,
        run_id: config.run_id,
        name: config.name.clone(),
        description: config.description.clone(),
        tool_version: config.tool_version.clone(),
        strategy: config.strategy.clone(),
        created_at: Utc::now(),
        entry_count: kb.len(),
        conflict_count: summary.total_conflicts,
        degraded_sources: summary.degraded_sources().count(),
        routed: router.is_some(),
        topic_count: router.map_or(0, |r| r.topics.len()),
        files,
    };
    // Written last: its presence marks a complete directory.
    write_json(staging, MANIFEST_FILE, &manifest)?;
    Ok(manifest)
}

/// Replace `output_dir` with `staging`, keeping the previous output until
/// the new one is in place.
fn swap_into_place(staging: &Path, output_dir: &Path, run_id: Uuid) -> Result<()> {
    let previous = output_dir.exists().then(|| {
        output_dir.with_file_name(format!(
            ".{}.previous-{run_id}",
            output_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ))
    });

    if let Some(previous) = &previous {
        std::fs::rename(output_dir, previous).map_err(|e| SkillsmithError::io(output_dir, e))?;
    }

    if let Err(e) = std::fs::rename(staging, output_dir) {
        if let Some(previous) = &previous {
            // Put the old output back.
            if let Err(restore) = std::fs::rename(previous, output_dir) {
                warn!(error = %restore, "failed to restore previous output");
            }
        }
        return Err(SkillsmithError::io(output_dir, e));
    }

    if let Some(previous) = &previous {
        remove_dir_best_effort(previous);
    }
    Ok(())
}

fn remove_dir_best_effort(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        debug!(path = %dir.display(), error = %e, "cleanup failed");
    }
}

/// A shard stem not yet in `taken`. "Auth" and "auth" share a stem, and a
/// numbered suffix may itself be another topic's stem.
fn unique_stem(taken: &mut BTreeSet<String>, topic: &str) -> String {
    let base = shard_file_stem(topic);
    let mut stem = base.clone();
    let mut n = 2;
    while !taken.insert(stem.clone()) {
        stem = format!("{base}-{n}");
        n += 1;
    }
    stem
}

/// File name for a topic shard. Anything outside `[A-Za-z0-9_-]` becomes `_`.
pub fn shard_file_stem(topic: &str) -> String {
    topic
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Write pretty JSON to `dir/relative` and return its checksum.
fn write_json<T: Serialize>(dir: &Path, relative: &str, data: &T) -> Result<FileChecksum> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| SkillsmithError::Serialization(format!("{relative}: {e}")))?;
    let path = dir.join(relative);
    std::fs::write(&path, &json).map_err(|e| SkillsmithError::io(&path, e))?;
    debug!(path = %path.display(), size = json.len(), "wrote JSON file");

    Ok(FileChecksum {
        path: relative.to_string(),
        sha256: sha256_hex(json.as_bytes()),
        size_bytes: json.len(),
    })
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Reading outputs back
// ---------------------------------------------------------------------------

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| SkillsmithError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| {
        SkillsmithError::validation(format!("invalid {}: {e}", path.display()))
    })
}

/// Verify an output directory: manifest present, schema supported, every
/// listed file present with a matching checksum.
pub fn validate_output(output_dir: &Path) -> Result<RunManifest> {
    let manifest_path = output_dir.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        return Err(SkillsmithError::validation(format!(
            "missing {MANIFEST_FILE} in {}",
            output_dir.display()
        )));
    }
    let manifest: RunManifest = read_json(&manifest_path)?;

    if manifest.schema_version != CURRENT_SCHEMA_VERSION {
        return Err(SkillsmithError::validation(format!(
            "unsupported schema_version: {} (expected {CURRENT_SCHEMA_VERSION})",
            manifest.schema_version
        )));
    }

    for file in &manifest.files {
        let path = output_dir.join(&file.path);
        let bytes = std::fs::read(&path).map_err(|e| SkillsmithError::io(&path, e))?;
        if sha256_hex(&bytes) != file.sha256 {
            return Err(SkillsmithError::validation(format!(
                "checksum mismatch for {}",
                file.path
            )));
        }
    }

    Ok(manifest)
}

pub fn load_knowledge_base(output_dir: &Path) -> Result<MergedKnowledgeBase> {
    read_json(&output_dir.join(KNOWLEDGE_BASE_FILE))
}

/// The router index, or `None` for an unrouted run.
pub fn load_router_index(output_dir: &Path) -> Result<Option<RouterIndex>> {
    let path = output_dir.join(ROUTER_INDEX_FILE);
    if !path.exists() {
        return Ok(None);
    }
    read_json(&path).map(Some)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use skillsmith_shared::{
        DetectionStatus, Entry, KindCounts, Location, MergeStatus, QualitySummary,
        SeverityCounts, SourceKind,
    };

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("skillsmith-assembler-test-{}", Uuid::now_v7()))
    }

    fn make_config(output_root: &Path) -> AssembleConfig {
        AssembleConfig {
            run_id: Uuid::now_v7(),
            name: "godot".into(),
            description: "Godot engine API".into(),
            output_root: output_root.to_path_buf(),
            tool_version: "0.1.0".into(),
            strategy: "deterministic".into(),
        }
    }

    fn merged(id: &str) -> MergedEntry {
        MergedEntry {
            entry: Entry::new(id, SourceKind::Code, Location::Unknown),
            status: MergeStatus::CodeOnly,
            sources: vec![SourceKind::Code],
            annotations: Vec::new(),
            aliases: Vec::new(),
            locations: vec![Location::Unknown],
            conflicts: Vec::new(),
        }
    }

    fn make_kb(ids: &[&str]) -> MergedKnowledgeBase {
        MergedKnowledgeBase {
            schema_version: CURRENT_SCHEMA_VERSION,
            entries: ids.iter().map(|id| (id.to_string(), merged(id))).collect(),
            quality_summary: QualitySummary {
                total_entries: ids.len(),
                total_conflicts: 0,
                by_kind: KindCounts::default(),
                by_severity: SeverityCounts::default(),
                dropped_records: 0,
                duplicate_records: 0,
                sources: Vec::new(),
                detection: DetectionStatus::Skipped {
                    reason: "no documentation source".into(),
                },
            },
        }
    }

    fn make_router(kb: &MergedKnowledgeBase) -> RouterIndex {
        let settings = skillsmith_shared::RouterSettings {
            threshold: 0,
            topics: vec![skillsmith_shared::TopicDefinition {
                name: "Auth/Login".into(),
                keywords: vec!["login".into()],
            }],
            ..Default::default()
        };
        skillsmith_router::build_index(kb, &settings, &BTreeMap::new()).expect("router")
    }

    #[test]
    fn assemble_unrouted_run() {
        let root = temp_dir();
        let kb = make_kb(&["login", "rotate"]);
        let result = assemble(&make_config(&root), &kb, None).expect("assemble");

        assert_eq!(result.output_dir, root.join("godot"));
        assert!(result.output_dir.join(MANIFEST_FILE).exists());
        assert!(result.output_dir.join(KNOWLEDGE_BASE_FILE).exists());
        assert!(!result.output_dir.join(ROUTER_INDEX_FILE).exists());
        assert!(!result.manifest.routed);
        assert_eq!(result.manifest.entry_count, 2);
        assert_eq!(result.manifest.files.len(), 1);
        assert_eq!(result.manifest.files[0].sha256.len(), 64);

        assert_eq!(load_knowledge_base(&result.output_dir).expect("load"), kb);
        assert!(load_router_index(&result.output_dir).expect("load").is_none());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn assemble_routed_run_writes_shards() {
        let root = temp_dir();
        let kb = make_kb(&["login", "rotate"]);
        let router = make_router(&kb);
        let result = assemble(&make_config(&root), &kb, Some(&router)).expect("assemble");

        assert!(result.manifest.routed);
        assert_eq!(result.manifest.topic_count, 2);
        let shard_path = result.output_dir.join("topics/auth_login.json");
        let shard: TopicShard = read_json(&shard_path).expect("shard");
        assert_eq!(shard.topic, "Auth/Login");
        assert!(shard.entries.contains_key("login"));
        assert!(result.output_dir.join("topics/unclassified.json").exists());

        assert_eq!(
            load_router_index(&result.output_dir).expect("load"),
            Some(router)
        );
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn reassembly_replaces_previous_output() {
        let root = temp_dir();
        assemble(&make_config(&root), &make_kb(&["a", "b"]), None).expect("first");
        let second = assemble(&make_config(&root), &make_kb(&["c"]), None).expect("second");

        let kb = load_knowledge_base(&second.output_dir).expect("load");
        assert_eq!(kb.entries.keys().collect::<Vec<_>>(), vec!["c"]);

        // Only the final directory is left behind.
        let names: Vec<String> = std::fs::read_dir(&root)
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["godot".to_string()]);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn validate_output_checks_checksums() {
        let root = temp_dir();
        let result = assemble(&make_config(&root), &make_kb(&["a"]), None).expect("assemble");
        let manifest = validate_output(&result.output_dir).expect("valid");
        assert_eq!(manifest, result.manifest);

        std::fs::write(result.output_dir.join(KNOWLEDGE_BASE_FILE), "{}").expect("tamper");
        let err = validate_output(&result.output_dir).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn validate_output_missing_manifest() {
        let root = temp_dir();
        std::fs::create_dir_all(&root).expect("mkdir");
        assert!(validate_output(&root).is_err());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn shard_names_are_path_safe() {
        assert_eq!(shard_file_stem("auth"), "auth");
        assert_eq!(shard_file_stem("Auth/Login"), "auth_login");
        assert_eq!(shard_file_stem("../etc"), "___etc");
    }

    #[test]
    fn colliding_stems_never_reuse_a_name() {
        let mut taken = BTreeSet::new();
        let stems: Vec<String> = ["a-2", "a", "A", "a"]
            .iter()
            .map(|topic| unique_stem(&mut taken, topic))
            .collect();
        assert_eq!(stems, vec!["a-2", "a", "a-3", "a-4"]);
    }
}
