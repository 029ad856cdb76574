//! Application and project configuration for Skillsmith.
//!
//! User config lives at `~/.skillsmith/skillsmith.toml`. A project file
//! describes one reconciliation run (its sources plus optional overrides).
//! CLI flags override project values, which override the user config, which
//! overrides built-in defaults.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkillsmithError};
use crate::types::{Severity, SourceKind, UNCLASSIFIED_TOPIC};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "skillsmith.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".skillsmith";

/// Default database file name inside the config directory.
const DATABASE_FILE_NAME: &str = "skillsmith.db";

// ---------------------------------------------------------------------------
// Config structs (matching skillsmith.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub merge: MergeSettings,

    #[serde(default)]
    pub router: RouterSettings,

    /// External reasoning collaborator used by the assisted strategy.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory for reconciled outputs.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Run history / resolution cache database. Defaults to
    /// `~/.skillsmith/skillsmith.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            database: None,
        }
    }
}

fn default_output_dir() -> String {
    "skillsmith-out".into()
}

/// How ties between equally similar fuzzy candidates are broken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Smallest candidate identifier wins.
    #[default]
    Lexicographic,
    /// Ambiguous matches are treated as genuinely absent.
    Reject,
}

/// `[matching]` section: cross-source identifier matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Minimum similarity in (0, 1] for a fuzzy match.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default)]
    pub tie_break: TieBreak,

    /// Prefixes stripped from normalized identifiers before comparison.
    #[serde(default)]
    pub strip_prefixes: Vec<String>,

    /// Suffixes stripped from normalized identifiers before comparison.
    #[serde(default = "default_strip_suffixes")]
    pub strip_suffixes: Vec<String>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            tie_break: TieBreak::default(),
            strip_prefixes: Vec::new(),
            strip_suffixes: default_strip_suffixes(),
        }
    }
}

fn default_threshold() -> f64 {
    0.85
}
fn default_strip_suffixes() -> Vec<String> {
    vec!["()".into()]
}

impl MatchingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(SkillsmithError::config(format!(
                "matching.threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Which merge strategy a run uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Deterministic,
    Assisted,
}

impl std::str::FromStr for StrategyKind {
    type Err = SkillsmithError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "deterministic" | "rule-based" => Ok(Self::Deterministic),
            "assisted" => Ok(Self::Assisted),
            other => Err(SkillsmithError::config(format!(
                "unknown merge strategy '{other}': expected 'deterministic' or 'assisted'"
            ))),
        }
    }
}

/// `[merge]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeSettings {
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Per-call timeout for the reasoning collaborator.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after a transient collaborator failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Conflicts below this severity are never sent to the collaborator.
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,

    /// Collaborator answers below this confidence keep the rule-based result.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            min_severity: default_min_severity(),
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    1
}
fn default_min_severity() -> Severity {
    Severity::Low
}
fn default_min_confidence() -> f64 {
    0.5
}

impl MergeSettings {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(SkillsmithError::config("merge.timeout_secs must be positive"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(SkillsmithError::config(format!(
                "merge.min_confidence must be in [0, 1], got {}",
                self.min_confidence
            )));
        }
        Ok(())
    }
}

/// A named topic and the keywords that route entries to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDefinition {
    pub name: String,
    pub keywords: Vec<String>,
}

/// `[router]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterSettings {
    /// The router only runs when the knowledge base has more entries than this.
    #[serde(default = "default_router_threshold")]
    pub threshold: usize,

    #[serde(default = "default_max_auto_topics")]
    pub max_auto_topics: usize,

    /// An auto-derived prefix needs at least this many entries to become a topic.
    #[serde(default = "default_min_topic_size")]
    pub min_topic_size: usize,

    /// Multiplier applied to keywords that match a community-signal label.
    #[serde(default = "default_hint_multiplier")]
    pub hint_multiplier: u32,

    /// How many of the most frequent issue labels become hints.
    #[serde(default = "default_max_label_hints")]
    pub max_label_hints: usize,

    /// Generic labels that say nothing about topic.
    #[serde(default = "default_ignored_labels")]
    pub ignored_labels: Vec<String>,

    /// Explicit topics, in declaration order. Empty means auto-derive.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<TopicDefinition>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            threshold: default_router_threshold(),
            max_auto_topics: default_max_auto_topics(),
            min_topic_size: default_min_topic_size(),
            hint_multiplier: default_hint_multiplier(),
            max_label_hints: default_max_label_hints(),
            ignored_labels: default_ignored_labels(),
            topics: Vec::new(),
        }
    }
}

fn default_router_threshold() -> usize {
    100
}
fn default_max_auto_topics() -> usize {
    12
}
fn default_min_topic_size() -> usize {
    2
}
fn default_hint_multiplier() -> u32 {
    2
}
fn default_max_label_hints() -> usize {
    10
}
fn default_ignored_labels() -> Vec<String> {
    [
        "bug",
        "enhancement",
        "question",
        "duplicate",
        "invalid",
        "wontfix",
        "help wanted",
        "good first issue",
        "documentation",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl RouterSettings {
    /// Reject topic definitions that would leave the partition undefined.
    pub fn validate(&self) -> Result<()> {
        if self.hint_multiplier == 0 {
            return Err(SkillsmithError::config("router.hint_multiplier must be at least 1"));
        }

        let mut names = BTreeSet::new();
        let mut owners: BTreeMap<String, &str> = BTreeMap::new();

        for topic in &self.topics {
            let name = topic.name.trim();
            if name.is_empty() {
                return Err(SkillsmithError::config("router topic with an empty name"));
            }
            if name.eq_ignore_ascii_case(UNCLASSIFIED_TOPIC) {
                return Err(SkillsmithError::config(format!(
                    "topic name '{UNCLASSIFIED_TOPIC}' is reserved"
                )));
            }
            if !names.insert(name.to_string()) {
                return Err(SkillsmithError::config(format!("duplicate topic '{name}'")));
            }

            let keywords: Vec<String> = topic
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .collect();
            if keywords.is_empty() || keywords.iter().any(String::is_empty) {
                return Err(SkillsmithError::config(format!(
                    "topic '{name}' needs at least one non-blank keyword"
                )));
            }
            for keyword in keywords {
                if let Some(other) = owners.get(&keyword).filter(|o| **o != name) {
                    return Err(SkillsmithError::config(format!(
                        "keyword '{keyword}' is claimed by both '{other}' and '{name}'"
                    )));
                }
                owners.insert(keyword, name);
            }
        }
        Ok(())
    }
}

/// `[bridge]` section: command spawned per collaborator request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Executable to spawn. Empty disables the assisted strategy.
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Label for the model behind the bridge (part of the cache key).
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    "default".into()
}

impl BridgeConfig {
    pub fn is_configured(&self) -> bool {
        !self.command.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Project file
// ---------------------------------------------------------------------------

/// One source of a project: an extract file produced upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub kind: SourceKind,
    /// Path to the raw extract JSON (relative to the project file).
    pub path: String,
    /// Issue/label extract for code sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues: Option<String>,
}

/// A reconciliation project (`skillsmith.project.toml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub sources: Vec<SourceSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching: Option<MatchingConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterSettings>,
}

impl ProjectConfig {
    /// Validate the project together with the settings it resolves to.
    pub fn validate(&self, settings: &RunSettings) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SkillsmithError::config("project name is empty"));
        }
        if matches!(self.name.as_str(), "." | "..")
            || self
                .name
                .chars()
                .any(|c| matches!(c, '/' | '\\') || c.is_control())
        {
            return Err(SkillsmithError::config(format!(
                "project name '{}' must be usable as a directory name",
                self.name
            )));
        }
        if self.sources.is_empty() {
            return Err(SkillsmithError::config("project declares no sources"));
        }
        let mut seen = BTreeSet::new();
        for source in &self.sources {
            if !seen.insert(source.kind) {
                return Err(SkillsmithError::config(format!(
                    "source kind '{}' declared more than once",
                    source.kind
                )));
            }
            if source.issues.is_some() && source.kind != SourceKind::Code {
                return Err(SkillsmithError::config(format!(
                    "issues are only supported on code sources, not '{}'",
                    source.kind
                )));
            }
        }
        settings.validate()
    }

    /// Resolve project overrides on top of the user config.
    pub fn settings(&self, app: &AppConfig) -> RunSettings {
        RunSettings {
            matching: self.matching.clone().unwrap_or_else(|| app.matching.clone()),
            merge: self.merge.clone().unwrap_or_else(|| app.merge.clone()),
            router: self.router.clone().unwrap_or_else(|| app.router.clone()),
        }
    }
}

/// Effective per-run settings after layering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSettings {
    pub matching: MatchingConfig,
    pub merge: MergeSettings,
    pub router: RouterSettings,
}

impl RunSettings {
    pub fn validate(&self) -> Result<()> {
        self.matching.validate()?;
        self.merge.validate()?;
        self.router.validate()
    }
}

/// Load a project file.
pub fn load_project(path: &Path) -> Result<ProjectConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SkillsmithError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        SkillsmithError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.skillsmith/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SkillsmithError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.skillsmith/skillsmith.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the database path from config, falling back to the config dir.
pub fn database_path(config: &AppConfig) -> Result<PathBuf> {
    match &config.defaults.database {
        Some(p) => Ok(PathBuf::from(p)),
        None => Ok(config_dir()?.join(DATABASE_FILE_NAME)),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SkillsmithError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        SkillsmithError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SkillsmithError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SkillsmithError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SkillsmithError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(name: &str, keywords: &[&str]) -> TopicDefinition {
        TopicDefinition {
            name: name.into(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("threshold"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.matching.threshold, 0.85);
        assert_eq!(parsed.merge.max_retries, 1);
        assert_eq!(parsed.router.threshold, 100);
        assert_eq!(parsed.matching.tie_break, TieBreak::Lexicographic);
    }

    #[test]
    fn project_with_topics_parses() {
        let toml_str = r#"
name = "godot"
description = "Godot engine"

[[sources]]
kind = "documentation"
path = "docs.json"

[[sources]]
kind = "code"
path = "code.json"
issues = "issues.json"

[merge]
strategy = "assisted"
timeout_secs = 5

[router]
threshold = 10

[[router.topics]]
name = "auth"
keywords = ["login", "token"]
"#;
        let project: ProjectConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(project.sources.len(), 2);
        assert_eq!(project.sources[1].issues.as_deref(), Some("issues.json"));

        let settings = project.settings(&AppConfig::default());
        assert_eq!(settings.merge.strategy, StrategyKind::Assisted);
        assert_eq!(settings.merge.max_retries, 1);
        assert_eq!(settings.router.topics[0].name, "auth");
        assert!(project.validate(&settings).is_ok());
    }

    #[test]
    fn threshold_out_of_range_is_fatal() {
        let matching = MatchingConfig {
            threshold: 1.5,
            ..Default::default()
        };
        assert!(matching.validate().is_err());
    }

    #[test]
    fn malformed_topics_are_rejected() {
        let mut router = RouterSettings {
            topics: vec![topic("auth", &["login"]), topic("auth", &["token"])],
            ..Default::default()
        };
        assert!(router.validate().unwrap_err().to_string().contains("duplicate"));

        router.topics = vec![topic("unclassified", &["x"])];
        assert!(router.validate().unwrap_err().to_string().contains("reserved"));

        router.topics = vec![topic("auth", &[" "])];
        assert!(router.validate().is_err());

        router.topics = vec![topic("auth", &["token"]), topic("billing", &["Token"])];
        assert!(router.validate().unwrap_err().to_string().contains("claimed by both"));

        router.topics = vec![topic("auth", &["login", "token"]), topic("billing", &["invoice"])];
        assert!(router.validate().is_ok());
    }

    #[test]
    fn duplicate_source_kinds_are_rejected() {
        let project = ProjectConfig {
            name: "demo".into(),
            description: String::new(),
            sources: vec![
                SourceSpec {
                    kind: SourceKind::Code,
                    path: "a.json".into(),
                    issues: None,
                },
                SourceSpec {
                    kind: SourceKind::Code,
                    path: "b.json".into(),
                    issues: None,
                },
            ],
            matching: None,
            merge: None,
            router: None,
        };
        let settings = project.settings(&AppConfig::default());
        assert!(project.validate(&settings).is_err());
    }

    #[test]
    fn project_names_must_stay_inside_the_output_root() {
        let mut project = ProjectConfig {
            name: "engine".into(),
            description: String::new(),
            sources: vec![SourceSpec {
                kind: SourceKind::Code,
                path: "code.json".into(),
                issues: None,
            }],
            matching: None,
            merge: None,
            router: None,
        };
        let settings = project.settings(&AppConfig::default());
        assert!(project.validate(&settings).is_ok());

        for name in [".", "..", "../engine", "a/b", "a\\b"] {
            project.name = name.into();
            let err = project.validate(&settings).unwrap_err();
            assert!(matches!(err, SkillsmithError::Config { .. }), "{name}");
        }
        // Dots inside a name are fine.
        project.name = "engine.v2".into();
        assert!(project.validate(&settings).is_ok());
    }

    #[test]
    fn strategy_parses() {
        assert_eq!("assisted".parse::<StrategyKind>().unwrap(), StrategyKind::Assisted);
        assert!("magic".parse::<StrategyKind>().is_err());
    }
}
