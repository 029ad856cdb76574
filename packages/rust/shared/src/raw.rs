//! Raw extractor output, before normalization.
//!
//! Extractors are outside this workspace and disagree on field names, so
//! records stay loosely typed JSON objects until the normalizer reads them
//! through [`field`] and friends.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SkillsmithError};

/// One loosely-typed record as produced by an extractor.
pub type RawRecord = Map<String, Value>;

/// Upstream extraction outcome for a whole source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractStatus {
    #[default]
    Ok,
    Partial,
    Failed,
}

/// Envelope form of an extract file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractEnvelope {
    #[serde(default)]
    pub status: ExtractStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub records: Vec<RawRecord>,
    /// Community-signal records (issues), only meaningful for code sources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<RawRecord>,
}

/// An extract file is either an envelope or a bare array of records.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawExtract {
    Envelope(ExtractEnvelope),
    Records(Vec<RawRecord>),
}

impl RawExtract {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| SkillsmithError::parse(format!("invalid extract file: {e}")))
    }

    pub fn into_envelope(self) -> ExtractEnvelope {
        match self {
            Self::Envelope(envelope) => envelope,
            Self::Records(records) => ExtractEnvelope {
                records,
                ..Default::default()
            },
        }
    }
}

/// First present, non-null value among `keys`.
pub fn field<'a>(record: &'a RawRecord, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .find(|v| !v.is_null())
}

/// First non-blank string among `keys`, trimmed. Numbers are stringified.
pub fn field_str(record: &RawRecord, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| record.get(*k)).find_map(|v| {
        let s = match v {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!s.is_empty()).then_some(s)
    })
}

/// First value among `keys` that reads as a non-negative integer.
pub fn field_u32(record: &RawRecord, keys: &[&str]) -> Option<u32> {
    keys.iter().filter_map(|k| record.get(*k)).find_map(|v| match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
