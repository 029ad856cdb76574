//! Core domain types for reconciled knowledge bases.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkillsmithError};

/// Current schema version for every JSON record tree we emit.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Reserved topic name for entries that score zero against every topic.
pub const UNCLASSIFIED_TOPIC: &str = "unclassified";

// ---------------------------------------------------------------------------
// SourceKind
// ---------------------------------------------------------------------------

/// Where an entry was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Documentation,
    Code,
    Pdf,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Documentation => "documentation",
            Self::Code => "code",
            Self::Pdf => "pdf",
        }
    }

    /// Documentation and PDF manuals both describe intent; code is the
    /// call-contract ground truth.
    pub fn is_documentation_like(&self) -> bool {
        matches!(self, Self::Documentation | Self::Pdf)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = SkillsmithError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "documentation" | "docs" => Ok(Self::Documentation),
            "code" | "github" | "repository" => Ok(Self::Code),
            "pdf" => Ok(Self::Pdf),
            other => Err(SkillsmithError::config(format!("unknown source kind '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// A single typed parameter descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// True when the parameter declares a default value.
    #[serde(default)]
    pub optional: bool,
}

impl Param {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_hint: None,
            default: None,
            optional: false,
        }
    }

    pub fn typed(name: impl Into<String>, type_hint: impl Into<String>) -> Self {
        Self {
            type_hint: Some(type_hint.into()),
            ..Self::new(name)
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self.optional = true;
        self
    }
}

/// Ordered parameter list plus return descriptor of a callable entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<Param>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
}

impl Signature {
    pub fn new(params: Vec<Param>, returns: Option<String>) -> Self {
        Self { params, returns }
    }

    /// Positional comparison of parameter count and names.
    ///
    /// Type hints and defaults are deliberately ignored: documentation rarely
    /// spells them the same way the code declares them.
    pub fn same_shape(&self, other: &Signature) -> bool {
        self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|(a, b)| a.name == b.name)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&p.name)?;
            if let Some(t) = &p.type_hint {
                write!(f, ": {t}")?;
            }
            if let Some(d) = &p.default {
                write!(f, " = {d}")?;
            }
        }
        f.write_str(")")?;
        if let Some(r) = &self.returns {
            write!(f, " -> {r}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// Opaque reference back to the originating source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    Page {
        url: String,
    },
    File {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
    },
    PdfPage {
        page: u32,
    },
    Unknown,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page { url } => f.write_str(url),
            Self::File {
                path,
                line: Some(line),
            } => write!(f, "{path}:{line}"),
            Self::File { path, line: None } => f.write_str(path),
            Self::PdfPage { page } => write!(f, "pdf page {page}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// A single documentable unit extracted from exactly one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Case-sensitive, non-empty canonical name used for cross-source matching.
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    #[serde(default)]
    pub description: String,
    pub source_kind: SourceKind,
    pub location: Location,
    /// Heuristically extracted (PDF); never authoritative over code.
    #[serde(default)]
    pub low_confidence: bool,
}

impl Entry {
    pub fn new(identifier: impl Into<String>, source_kind: SourceKind, location: Location) -> Self {
        Self {
            identifier: identifier.into(),
            signature: None,
            description: String::new(),
            source_kind,
            location,
            low_confidence: source_kind == SourceKind::Pdf,
        }
    }

    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Ordering key used by de-duplication: signature present, then more
    /// parameters, then longer description.
    pub fn specificity(&self) -> (bool, usize, usize) {
        (
            self.signature.is_some(),
            self.signature.as_ref().map_or(0, |s| s.params.len()),
            self.description.trim().len(),
        )
    }
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// Kind of disagreement between documentation and code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    MissingInDocs,
    MissingInCode,
    SignatureMismatch,
    DescriptionMismatch,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingInDocs => "missing_in_docs",
            Self::MissingInCode => "missing_in_code",
            Self::SignatureMismatch => "signature_mismatch",
            Self::DescriptionMismatch => "description_mismatch",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::SignatureMismatch | Self::MissingInCode => Severity::High,
            Self::MissingInDocs => Severity::Medium,
            Self::DescriptionMismatch => Severity::Low,
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::MissingInDocs => "add documentation for this API",
            Self::MissingInCode => "verify against current codebase",
            Self::SignatureMismatch => "update the documented signature to match the code",
            Self::DescriptionMismatch => "review the documentation wording against the code docstring",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// A detected disagreement about one logical identifier.
///
/// `left` is the documentation side, `right` the code side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub identifier: String,
    pub kind: ConflictKind,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<Entry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<Entry>,
    pub suggestion: String,
    /// Original documentation identifier when the pair was fuzzy-matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_alias: Option<String>,
}

impl ConflictRecord {
    /// Build a record, enforcing that at least one side is present and that
    /// both sides talk about the same identifier.
    pub fn between(kind: ConflictKind, left: Option<Entry>, right: Option<Entry>) -> Result<Self> {
        let identifier = match (&left, &right) {
            (Some(l), Some(r)) if l.identifier != r.identifier => {
                return Err(SkillsmithError::validation(format!(
                    "conflict sides disagree on identifier: '{}' vs '{}'",
                    l.identifier, r.identifier
                )));
            }
            (Some(l), _) => l.identifier.clone(),
            (None, Some(r)) => r.identifier.clone(),
            (None, None) => {
                return Err(SkillsmithError::validation(format!(
                    "{kind} conflict references no entry"
                )));
            }
        };

        Ok(Self {
            identifier,
            kind,
            severity: kind.severity(),
            left,
            right,
            suggestion: kind.suggestion().to_string(),
            matched_alias: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Normalized sources
// ---------------------------------------------------------------------------

/// Output of normalizing one source, with its drop accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeReport {
    pub kind: SourceKind,
    pub entries: Vec<Entry>,
    /// Raw records that could not yield a usable identifier.
    pub dropped: usize,
    /// Records collapsed into a more specific entry with the same identifier.
    pub duplicates: usize,
    /// Set when extraction failed upstream (fully or partially).
    pub degraded: Option<String>,
}

impl NormalizeReport {
    pub fn empty(kind: SourceKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            dropped: 0,
            duplicates: 0,
            degraded: None,
        }
    }

    /// A source whose extraction failed outright.
    pub fn failed(kind: SourceKind, reason: impl Into<String>) -> Self {
        Self {
            degraded: Some(reason.into()),
            ..Self::empty(kind)
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// A repository issue, used only as a community signal for topic routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub issue_id: String,
    pub title: String,
    /// Lower-cased label names.
    pub labels: std::collections::BTreeSet<String>,
    pub comment_count: u32,
    pub state: String,
}

// ---------------------------------------------------------------------------
// Merged knowledge base
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    /// Documentation and code agree.
    Agreed,
    /// Signature or description disagreement, kept visible.
    Conflicted,
    /// A conflict was rewritten by the reasoning collaborator.
    Resolved,
    /// Present only in code and confirmed missing from the docs.
    Undocumented,
    /// Present only in docs and confirmed missing from the code.
    PossiblyStale,
    /// Only a documentation-like source was available to compare.
    DocsOnly,
    /// Only code was available to compare.
    CodeOnly,
}

/// One reconciled identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedEntry {
    pub entry: Entry,
    pub status: MergeStatus,
    /// Every source that contributed, sorted.
    pub sources: Vec<SourceKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,
    /// Documentation identifiers fuzzy-matched onto this entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    pub locations: Vec<Location>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    pub missing_in_docs: usize,
    pub missing_in_code: usize,
    pub signature_mismatch: usize,
    pub description_mismatch: usize,
}

impl KindCounts {
    pub fn record(&mut self, kind: ConflictKind) {
        match kind {
            ConflictKind::MissingInDocs => self.missing_in_docs += 1,
            ConflictKind::MissingInCode => self.missing_in_code += 1,
            ConflictKind::SignatureMismatch => self.signature_mismatch += 1,
            ConflictKind::DescriptionMismatch => self.description_mismatch += 1,
        }
    }

    pub fn get(&self, kind: ConflictKind) -> usize {
        match kind {
            ConflictKind::MissingInDocs => self.missing_in_docs,
            ConflictKind::MissingInCode => self.missing_in_code,
            ConflictKind::SignatureMismatch => self.signature_mismatch,
            ConflictKind::DescriptionMismatch => self.description_mismatch,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

impl SeverityCounts {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Low => self.low += 1,
            Severity::Medium => self.medium += 1,
            Severity::High => self.high += 1,
        }
    }
}

/// Per-source accounting carried into the quality summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub kind: SourceKind,
    pub entries: usize,
    pub dropped: usize,
    pub duplicates: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl From<&NormalizeReport> for SourceSummary {
    fn from(report: &NormalizeReport) -> Self {
        Self {
            kind: report.kind,
            entries: report.entries.len(),
            dropped: report.dropped,
            duplicates: report.duplicates,
            degraded: report.degraded.clone(),
        }
    }
}

/// Whether cross-source comparison actually ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DetectionStatus {
    Completed { compared: Vec<SourceKind> },
    Skipped { reason: String },
}

/// How much was recovered vs. how much is suspect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    pub total_entries: usize,
    pub total_conflicts: usize,
    pub by_kind: KindCounts,
    pub by_severity: SeverityCounts,
    pub dropped_records: usize,
    pub duplicate_records: usize,
    pub sources: Vec<SourceSummary>,
    pub detection: DetectionStatus,
}

impl QualitySummary {
    pub fn degraded_sources(&self) -> impl Iterator<Item = &SourceSummary> {
        self.sources.iter().filter(|s| s.degraded.is_some())
    }
}

/// The reconciled output of one merge run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedKnowledgeBase {
    pub schema_version: u32,
    pub entries: BTreeMap<String, MergedEntry>,
    pub quality_summary: QualitySummary,
}

impl MergedKnowledgeBase {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical JSON form; identical inputs produce identical bytes.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_entry(id: &str) -> Entry {
        Entry::new(
            id,
            SourceKind::Code,
            Location::File {
                path: "src/lib.py".into(),
                line: Some(10),
            },
        )
    }

    #[test]
    fn severity_is_a_function_of_kind() {
        assert_eq!(ConflictKind::SignatureMismatch.severity(), Severity::High);
        assert_eq!(ConflictKind::MissingInCode.severity(), Severity::High);
        assert_eq!(ConflictKind::MissingInDocs.severity(), Severity::Medium);
        assert_eq!(ConflictKind::DescriptionMismatch.severity(), Severity::Low);
        assert!(Severity::High > Severity::Medium && Severity::Medium > Severity::Low);
    }

    #[test]
    fn conflict_requires_an_entry() {
        let err = ConflictRecord::between(ConflictKind::MissingInDocs, None, None).unwrap_err();
        assert!(err.to_string().contains("references no entry"));
    }

    #[test]
    fn conflict_rejects_mismatched_identifiers() {
        let result = ConflictRecord::between(
            ConflictKind::SignatureMismatch,
            Some(code_entry("rotate")),
            Some(code_entry("scale")),
        );
        assert!(result.is_err());
    }

    #[test]
    fn conflict_takes_identifier_from_present_side() {
        let record =
            ConflictRecord::between(ConflictKind::MissingInDocs, None, Some(code_entry("flush")))
                .expect("valid conflict");
        assert_eq!(record.identifier, "flush");
        assert_eq!(record.severity, Severity::Medium);
        assert_eq!(record.suggestion, "add documentation for this API");
    }

    #[test]
    fn signature_display_and_shape() {
        let doc = Signature::new(vec![Param::typed("angle", "float")], None);
        let code = Signature::new(
            vec![
                Param::typed("angle", "float"),
                Param::typed("snap", "bool").with_default("false"),
            ],
            Some("None".into()),
        );
        assert_eq!(code.to_string(), "(angle: float, snap: bool = false) -> None");
        assert!(!doc.same_shape(&code));
        assert!(doc.same_shape(&Signature::new(vec![Param::new("angle")], None)));
    }

    #[test]
    fn pdf_entries_are_low_confidence() {
        let e = Entry::new("rotate", SourceKind::Pdf, Location::PdfPage { page: 3 });
        assert!(e.low_confidence);
        assert!(!code_entry("rotate").low_confidence);
    }

    #[test]
    fn location_serializes_tagged() {
        let json = serde_json::to_string(&Location::PdfPage { page: 4 }).expect("serialize");
        assert_eq!(json, r#"{"kind":"pdf_page","page":4}"#);
        assert_eq!(
            Location::File {
                path: "a.rs".into(),
                line: Some(3)
            }
            .to_string(),
            "a.rs:3"
        );
    }

    #[test]
    fn source_kind_parses_aliases() {
        assert_eq!("docs".parse::<SourceKind>().unwrap(), SourceKind::Documentation);
        assert_eq!("github".parse::<SourceKind>().unwrap(), SourceKind::Code);
        assert!("video".parse::<SourceKind>().is_err());
    }
}
