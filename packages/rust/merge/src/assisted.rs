//! Assisted merge: the deterministic result, selectively overridden by an
//! external reasoning collaborator.
//!
//! The collaborator is never needed for correctness. Every failure mode
//! (unavailable, timeout, unparsable answer, low confidence) keeps the
//! deterministic entry untouched, so a collaborator that always fails yields
//! exactly the deterministic knowledge base.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use skillsmith_normalize::signature::parse_signature;
use skillsmith_shared::{
    ConflictKind, ConflictRecord, MergeSettings, MergeStatus, MergedEntry, MergedKnowledgeBase,
    Result, Severity,
};

use crate::{MergeInput, MergeStrategy, merge_deterministic};

// ---------------------------------------------------------------------------
// Collaborator contract
// ---------------------------------------------------------------------------

/// What the collaborator is asked to resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRequest {
    pub identifier: String,
    pub kind: ConflictKind,
    /// Documentation text first, code docstring second.
    pub conflicting_descriptions: Vec<String>,
    /// Rendered signatures, documentation first.
    pub conflicting_signatures: Vec<String>,
}

impl ResolutionRequest {
    fn from_conflict(conflict: &ConflictRecord) -> Self {
        let sides = [conflict.left.as_ref(), conflict.right.as_ref()];
        Self {
            identifier: conflict.identifier.clone(),
            kind: conflict.kind,
            conflicting_descriptions: sides
                .iter()
                .flatten()
                .map(|e| e.description.clone())
                .collect(),
            conflicting_signatures: sides
                .iter()
                .flatten()
                .filter_map(|e| e.signature.as_ref().map(ToString::to_string))
                .collect(),
        }
    }
}

/// The collaborator's answer. Neither field set means "keep".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_signature: Option<String>,
    pub confidence: f64,
}

impl ResolutionResponse {
    pub fn keep(confidence: f64) -> Self {
        Self {
            resolved_description: None,
            resolved_signature: None,
            confidence,
        }
    }

    pub fn is_keep(&self) -> bool {
        self.resolved_description.is_none() && self.resolved_signature.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator timed out")]
    Timeout,

    #[error("transient collaborator failure: {0}")]
    Transient(String),

    #[error("malformed collaborator response: {0}")]
    Malformed(String),
}

impl CollaboratorError {
    /// Only transient failures and timeouts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transient(_))
    }
}

#[async_trait]
pub trait ReasoningCollaborator: Send + Sync {
    async fn resolve(
        &self,
        request: &ResolutionRequest,
    ) -> std::result::Result<ResolutionResponse, CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AssistConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub min_severity: Severity,
    pub min_confidence: f64,
}

impl Default for AssistConfig {
    fn default() -> Self {
        Self::from(&MergeSettings::default())
    }
}

impl From<&MergeSettings> for AssistConfig {
    fn from(settings: &MergeSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.timeout_secs),
            max_retries: settings.max_retries,
            min_severity: settings.min_severity,
            min_confidence: settings.min_confidence,
        }
    }
}

/// Per-run counters. Logged only, never written into the knowledge base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssistStats {
    pub attempted: usize,
    pub resolved: usize,
    pub kept: usize,
    pub fallbacks: usize,
}

pub struct AssistedMerger {
    collaborator: Arc<dyn ReasoningCollaborator>,
    config: AssistConfig,
}

impl AssistedMerger {
    pub fn new(collaborator: Arc<dyn ReasoningCollaborator>, config: AssistConfig) -> Self {
        Self {
            collaborator,
            config,
        }
    }

    /// Merge and also return the counters, for callers that report them.
    #[instrument(skip_all, fields(conflicts = input.detection.conflicts.len()))]
    pub async fn merge_with_stats(
        &self,
        input: MergeInput<'_>,
    ) -> Result<(MergedKnowledgeBase, AssistStats)> {
        let mut kb = merge_deterministic(input)?;
        let mut stats = AssistStats::default();

        for merged in kb.entries.values_mut() {
            if merged.status != MergeStatus::Conflicted {
                continue;
            }
            let eligible: Vec<ResolutionRequest> = merged
                .conflicts
                .iter()
                .filter(|c| self.eligible(c))
                .map(ResolutionRequest::from_conflict)
                .collect();

            for request in eligible {
                stats.attempted += 1;
                match self.consult(&request).await {
                    Ok(response) => {
                        if self.apply(merged, &response) {
                            stats.resolved += 1;
                        } else {
                            stats.kept += 1;
                        }
                    }
                    Err(e) => {
                        warn!(identifier = %request.identifier, error = %e, "collaborator failed, keeping rule-based result");
                        stats.fallbacks += 1;
                    }
                }
            }
        }

        info!(
            attempted = stats.attempted,
            resolved = stats.resolved,
            kept = stats.kept,
            fallbacks = stats.fallbacks,
            "assisted merge complete"
        );
        Ok((kb, stats))
    }

    fn eligible(&self, conflict: &ConflictRecord) -> bool {
        matches!(
            conflict.kind,
            ConflictKind::SignatureMismatch | ConflictKind::DescriptionMismatch
        ) && conflict.severity >= self.config.min_severity
    }

    /// One call plus bounded retries, each under the timeout.
    async fn consult(
        &self,
        request: &ResolutionRequest,
    ) -> std::result::Result<ResolutionResponse, CollaboratorError> {
        let mut attempt = 0;
        loop {
            let outcome =
                match tokio::time::timeout(self.config.timeout, self.collaborator.resolve(request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(CollaboratorError::Timeout),
                };

            match outcome {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    debug!(identifier = %request.identifier, attempt, error = %e, "retrying collaborator");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply a response. Returns whether anything changed.
    fn apply(&self, merged: &mut MergedEntry, response: &ResolutionResponse) -> bool {
        if response.is_keep() || response.confidence < self.config.min_confidence {
            return false;
        }

        let mut changed = false;
        if let Some(description) = response
            .resolved_description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
        {
            merged.entry.description = description.to_string();
            changed = true;
        }
        if let Some(text) = &response.resolved_signature {
            match parse_signature(text) {
                Some(signature) => {
                    merged.entry.signature = Some(signature);
                    changed = true;
                }
                None => {
                    warn!(identifier = %merged.entry.identifier, signature = %text, "unparsable resolved signature ignored");
                }
            }
        }

        if changed {
            merged.status = MergeStatus::Resolved;
            merged.annotations.push(format!(
                "resolved by reasoning collaborator (confidence {:.2})",
                response.confidence
            ));
        }
        changed
    }
}

#[async_trait]
impl MergeStrategy for AssistedMerger {
    fn name(&self) -> &'static str {
        "assisted"
    }

    async fn merge(&self, input: MergeInput<'_>) -> Result<MergedKnowledgeBase> {
        Ok(self.merge_with_stats(input).await?.0)
    }
}
