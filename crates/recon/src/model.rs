use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One source's view of one business, as handed over by a collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Source-local identifier, opaque to the engine.
    pub record_id: String,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub collected_at: Option<DateTime<Utc>>,
    /// Field name -> raw value. `None` means the source reported nothing.
    #[serde(default)]
    pub fields: BTreeMap<String, Option<String>>,
    /// Per-field confidence (1-10) a collaborator attached to its own output.
    #[serde(default)]
    pub confidence_hints: BTreeMap<String, u8>,
}

impl RawRecord {
    pub fn new(record_id: &str, source_id: &str, collected_at: Option<DateTime<Utc>>) -> Self {
        Self {
            record_id: record_id.into(),
            source_id: Some(source_id.into()),
            collected_at,
            fields: BTreeMap::new(),
            confidence_hints: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.into(), Some(value.into()));
        self
    }

    pub fn with_hint(mut self, name: &str, confidence: u8) -> Self {
        self.confidence_hints.insert(name.into(), confidence);
        self
    }

    /// Identity of the record as the collector named it: (source_id, record_id).
    pub fn key(&self) -> RecordKey {
        RecordKey {
            source_id: self.source_id.clone().unwrap_or_default(),
            record_id: self.record_id.clone(),
            fingerprint: None,
        }
    }

    /// 16 hex chars of SHA-256 over everything but the ids: timestamp, fields
    /// and hints. Equal fingerprints mean interchangeable content.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        if let Some(at) = self.collected_at {
            hasher.update(at.to_rfc3339().as_bytes());
        }
        hasher.update(b"\n");
        for (name, value) in &self.fields {
            hasher.update(name.as_bytes());
            match value {
                Some(v) => {
                    hasher.update(b"\x1f");
                    hasher.update(v.as_bytes());
                }
                None => hasher.update(b"\x00"),
            }
            hasher.update(b"\n");
        }
        for (name, hint) in &self.confidence_hints {
            hasher.update(name.as_bytes());
            hasher.update([0x1f, *hint, b'\n']);
        }
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }
}

/// Record identity inside a run. `fingerprint` is set only when a collector
/// reused a `(source_id, record_id)` pair for different records in one batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordKey {
    pub source_id: String,
    pub record_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source_id, self.record_id)?;
        if let Some(fp) = &self.fingerprint {
            write!(f, "~{fp}")?;
        }
        Ok(())
    }
}

/// One field's value as reported by one source.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldObservation {
    pub value: String,
    pub source_id: String,
    pub record_id: String,
    pub weight: u8,
    pub observed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Rejection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingSourceId,
    NoUsableFields,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingSourceId => write!(f, "record has no source_id"),
            Self::NoUsableFields => write!(f, "record has no usable field values"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedRecord {
    pub record_id: String,
    pub source_id: Option<String>,
    pub input_index: usize,
    pub reason: RejectReason,
}

// ---------------------------------------------------------------------------
// Reconciled output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementLevel {
    Exact,
    Close,
    Partial,
    Conflict,
    SingleSource,
}

impl std::fmt::Display for AgreementLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Close => write!(f, "close"),
            Self::Partial => write!(f, "partial"),
            Self::Conflict => write!(f, "conflict"),
            Self::SingleSource => write!(f, "single_source"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledField {
    /// `None` when sources conflict with no majority.
    pub value: Option<String>,
    pub agreement_level: AgreementLevel,
    pub contributing_sources: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub dissenting_sources: BTreeSet<String>,
    pub observation_count: usize,
    pub confidence_score: u8,
}

impl ReconciledField {
    pub fn is_resolved(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityBand {
    HighQuality,
    GoodQuality,
    AcceptableQuality,
    NeedsReview,
}

impl std::fmt::Display for QualityBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HighQuality => write!(f, "high_quality"),
            Self::GoodQuality => write!(f, "good_quality"),
            Self::AcceptableQuality => write!(f, "acceptable_quality"),
            Self::NeedsReview => write!(f, "needs_review"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReviewReason {
    /// No source reported the required field at all.
    MissingRequiredField { field: String },
    /// Sources reported the required field but could not agree.
    ConflictingRequiredField { field: String },
    UnresolvedConflict { field: String },
    BelowCompletenessGate { score: u8, gate: u8 },
    LowConfidence { score: u8, minimum: u8 },
}

impl ReviewReason {
    /// Whether this reason keeps the entity out of the normal output.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            Self::MissingRequiredField { .. } | Self::ConflictingRequiredField { .. }
        )
    }
}

impl std::fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequiredField { field } => write!(f, "required field '{field}' missing from every source"),
            Self::ConflictingRequiredField { field } => {
                write!(f, "required field '{field}' conflicts with no majority")
            }
            Self::UnresolvedConflict { field } => write!(f, "field '{field}' conflicts with no majority"),
            Self::BelowCompletenessGate { score, gate } => {
                write!(f, "completeness {score} below gate {gate}")
            }
            Self::LowConfidence { score, minimum } => {
                write!(f, "overall confidence {score} below minimum {minimum}")
            }
        }
    }
}

/// The merged, scored record for one real-world business.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalEntity {
    pub entity_id: String,
    pub fields: BTreeMap<String, ReconciledField>,
    /// Keys outside the field vocabulary, carried through with every distinct value seen.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub unscored_fields: BTreeMap<String, BTreeSet<String>>,
    pub completeness_score: u8,
    pub overall_confidence: u8,
    pub quality_band: QualityBand,
    /// Sales potential (5-10) from the resolved contact and firmographic fields.
    pub lead_score: u8,
    pub review_required: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub review_reasons: Vec<ReviewReason>,
    pub source_record_ids: Vec<RecordKey>,
}

impl CanonicalEntity {
    pub fn field(&self, name: &str) -> Option<&ReconciledField> {
        self.fields.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|f| f.value.as_deref())
    }
}

/// A cluster that failed the required-field gate.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewEntry {
    pub entity: CanonicalEntity,
    pub records: Vec<RawRecord>,
    pub reasons: Vec<ReviewReason>,
}

impl ReviewEntry {
    /// Human-readable reason line for the review sheet.
    pub fn reason(&self) -> String {
        self.reasons
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconSummary {
    pub input_records: usize,
    pub accepted_records: usize,
    pub rejected_records: usize,
    pub clusters: usize,
    pub entities: usize,
    pub review_queue: usize,
    pub flagged_entities: usize,
    pub agreement_counts: BTreeMap<String, usize>,
    pub mean_completeness: f64,
    /// Sources seen in the batch but absent from the registry (scored at the default weight).
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub unknown_sources: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconMeta {
    pub config_name: String,
    pub cluster_mode: String,
    pub similarity_threshold: f64,
    pub engine_version: String,
    pub run_at: String,
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconResult {
    pub meta: ReconMeta,
    pub summary: ReconSummary,
    pub entities: Vec<CanonicalEntity>,
    pub review_queue: Vec<ReviewEntry>,
    pub rejected: Vec<RejectedRecord>,
}

impl ReconResult {
    pub fn to_json_pretty(&self) -> Result<String, ReconError> {
        serde_json::to_string_pretty(self).map_err(|e| ReconError::Io(e.to_string()))
    }

    /// Emitted entities followed by the ones held in the review queue.
    pub fn all_entities(&self) -> impl Iterator<Item = &CanonicalEntity> {
        self.entities
            .iter()
            .chain(self.review_queue.iter().map(|r| &r.entity))
    }
}
