//! Shared types, error model, and configuration for Skillsmith.
//!
//! This crate is the foundation depended on by all other Skillsmith crates.
//! It provides:
//! - [`SkillsmithError`]: the unified error type
//! - Domain types ([`Entry`], [`ConflictRecord`], [`MergedKnowledgeBase`], ...)
//! - Raw extractor records ([`RawRecord`], [`RawExtract`])
//! - Configuration ([`AppConfig`], [`ProjectConfig`], config loading)

pub mod config;
pub mod error;
pub mod raw;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BridgeConfig, DefaultsConfig, MatchingConfig, MergeSettings, ProjectConfig,
    RouterSettings, RunSettings, SourceSpec, StrategyKind, TieBreak, TopicDefinition,
    config_dir, config_file_path, database_path, init_config, load_config, load_config_from,
    load_project,
};
pub use error::{Result, SkillsmithError};
pub use raw::{ExtractEnvelope, ExtractStatus, RawExtract, RawRecord};
pub use types::{
    CURRENT_SCHEMA_VERSION, ConflictKind, ConflictRecord, DetectionStatus, Entry, IssueRecord,
    KindCounts, Location, MergeStatus, MergedEntry, MergedKnowledgeBase, NormalizeReport, Param,
    QualitySummary, Severity, SeverityCounts, Signature, SourceKind, SourceSummary,
    UNCLASSIFIED_TOPIC,
};
