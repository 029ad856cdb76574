//! Core pipeline orchestration for Skillsmith.
//!
//! This crate ties extract loading, normalization, conflict detection,
//! merging and routing into the end-to-end [`reconcile`](pipeline::reconcile)
//! workflow, and writes its output directory.

pub mod assembler;
pub mod cache;
pub mod pipeline;
pub mod sources;

pub use assembler::{
    AssembleConfig, AssembleResult, RunManifest, TopicShard, load_knowledge_base,
    load_router_index, validate_output,
};
pub use cache::CachedCollaborator;
pub use pipeline::{
    ProgressReporter, ReconcileConfig, ReconcileResult, SilentProgress, record_run, reconcile,
    select_strategy,
};
pub use sources::{LoadedSource, load_project_issues, load_source};
