//! Loading extract files from disk into normalized reports.
//!
//! A source that cannot be read or parsed is not fatal: it becomes a
//! degraded, empty report so the run continues with whatever else loaded.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use skillsmith_normalize::{normalize_extract, normalize_issues};
use skillsmith_shared::{
    IssueRecord, NormalizeReport, ProjectConfig, RawExtract, Result, SkillsmithError, SourceKind,
    SourceSpec,
};

/// One source after loading and normalization.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub report: NormalizeReport,
    /// Issue records, only ever populated for code sources.
    pub issues: Vec<IssueRecord>,
}

/// Resolve a project-relative path.
pub fn resolve_path(base_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn read_extract(path: &Path) -> Result<RawExtract> {
    let content = std::fs::read_to_string(path).map_err(|e| SkillsmithError::io(path, e))?;
    RawExtract::from_json(&content)
}

/// Load and normalize one source. Never fails.
#[instrument(skip_all, fields(kind = %source.kind, path = %source.path))]
pub fn load_source(source: &SourceSpec, base_dir: &Path) -> LoadedSource {
    let path = resolve_path(base_dir, &source.path);

    let envelope = match read_extract(&path) {
        Ok(extract) => extract.into_envelope(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "source degraded");
            return LoadedSource {
                report: NormalizeReport::failed(source.kind, e.to_string()),
                issues: Vec::new(),
            };
        }
    };

    let (report, mut issues) = normalize_extract(source.kind, &envelope);

    if let Some(issues_path) = &source.issues {
        let issues_path = resolve_path(base_dir, issues_path);
        match read_extract(&issues_path) {
            Ok(extract) => {
                let envelope = extract.into_envelope();
                // Issue files are either bare arrays or envelopes with `issues`.
                let records = if envelope.issues.is_empty() {
                    &envelope.records
                } else {
                    &envelope.issues
                };
                let (extra, dropped) = normalize_issues(records);
                debug!(issues = extra.len(), dropped, "issues loaded");
                issues.extend(extra);
            }
            // Hints are optional, so a broken issue file only costs hints.
            Err(e) => warn!(path = %issues_path.display(), error = %e, "issues skipped"),
        }
    }

    LoadedSource { report, issues }
}

/// Issue records from every code source of a project, as a merge run
/// collects them.
pub fn load_project_issues(project: &ProjectConfig, base_dir: &Path) -> Vec<IssueRecord> {
    project
        .sources
        .iter()
        .filter(|source| source.kind == SourceKind::Code)
        .flat_map(|source| load_source(source, base_dir).issues)
        .collect()
}
