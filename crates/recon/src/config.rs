use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::ReconError;
use crate::normalize::{is_known_field, vocabulary_names};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Immutable run configuration. Every section has defaults, so an empty TOML
/// document is a valid config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    pub name: String,
    pub matching: MatchingConfig,
    pub tiers: TierConfig,
    pub scoring: ScoringConfig,
    pub recency: RecencyConfig,
    pub registry: RegistryConfig,
    pub workers: WorkerConfig,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            matching: MatchingConfig::default(),
            tiers: TierConfig::default(),
            scoring: ScoringConfig::default(),
            recency: RecencyConfig::default(),
            registry: RegistryConfig::default(),
            workers: WorkerConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Duplicate detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Records merge when their similarity is at or above this value.
    pub threshold: f64,
    pub mode: ClusterMode,
    /// Floor on the similarity denominator; a lone shared field cannot
    /// carry a merge on its own.
    pub min_compared_weight: f64,
    /// Only compare records sharing a zip + name-prefix key.
    pub blocking: bool,
    /// Score candidate pairs on the worker pool.
    pub parallel: bool,
    /// Identity fields and their share of the similarity score.
    pub weights: BTreeMap<String, f64>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            mode: ClusterMode::Transitive,
            min_compared_weight: 0.5,
            blocking: false,
            parallel: false,
            weights: BTreeMap::from([
                ("business_name".to_string(), 0.40),
                ("phone_number".to_string(), 0.25),
                ("address".to_string(), 0.20),
                ("website".to_string(), 0.15),
            ]),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    /// A~B and B~C put A, B, C in one cluster even when A~C falls short.
    #[default]
    Transitive,
    /// Clusters merge only when every cross pair is above threshold.
    Clique,
}

impl std::fmt::Display for ClusterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transitive => write!(f, "transitive"),
            Self::Clique => write!(f, "clique"),
        }
    }
}

// ---------------------------------------------------------------------------
// Field tiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    pub required: Vec<String>,
    pub high_value: Vec<String>,
    /// Defaults to the whole field vocabulary.
    pub all_fields: Option<Vec<String>>,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            required: vec!["business_name".into(), "phone_number".into()],
            high_value: vec![
                "address".into(),
                "website".into(),
                "general_email".into(),
                "ceo_name".into(),
                "industry_classification".into(),
            ],
            all_fields: None,
        }
    }
}

impl TierConfig {
    pub fn all_fields(&self) -> Vec<String> {
        match &self.all_fields {
            Some(fields) => fields.clone(),
            None => vocabulary_names().map(str::to_string).collect(),
        }
    }

    pub fn tier_of(&self, field: &str) -> FieldTier {
        if self.required.iter().any(|f| f == field) {
            FieldTier::Required
        } else if self.high_value.iter().any(|f| f == field) {
            FieldTier::HighValue
        } else {
            FieldTier::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTier {
    Required,
    HighValue,
    Other,
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// A group must hold strictly more than this share of total weight to win.
    pub majority_threshold: f64,
    /// String similarity at which two canonical values count as `close`.
    pub close_similarity: f64,
    pub single_source_cap: u8,
    /// Entities below this completeness are flagged for review.
    pub review_gate: u8,
    /// Entities below this overall confidence are flagged for review.
    pub min_overall_confidence: u8,
    pub components: ComponentWeights,
    pub importance: ImportanceWeights,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            majority_threshold: 0.6,
            close_similarity: 0.9,
            single_source_cap: 6,
            review_gate: 50,
            min_overall_confidence: 3,
            components: ComponentWeights::default(),
            importance: ImportanceWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ComponentWeights {
    pub quality_max: f64,
    pub diversity_per_source: f64,
    pub diversity_max: f64,
    pub exact: f64,
    pub close: f64,
    pub partial: f64,
    pub conflict: f64,
    pub single_source: f64,
    pub recency_max: f64,
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            quality_max: 4.0,
            diversity_per_source: 1.5,
            diversity_max: 5.0,
            exact: 4.0,
            close: 3.0,
            partial: 1.5,
            conflict: 0.0,
            single_source: 0.0,
            recency_max: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImportanceWeights {
    pub required: f64,
    pub high_value: f64,
    pub other: f64,
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            required: 3.0,
            high_value: 2.0,
            other: 1.0,
        }
    }
}

impl ImportanceWeights {
    pub fn for_tier(&self, tier: FieldTier) -> f64 {
        match tier {
            FieldTier::Required => self.required,
            FieldTier::HighValue => self.high_value,
            FieldTier::Other => self.other,
        }
    }
}

// ---------------------------------------------------------------------------
// Recency + registry + workers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecencyConfig {
    /// Observations younger than this earn full recency credit.
    pub fresh_days: u32,
    /// Observations older than this earn none.
    pub stale_days: u32,
    /// Reference instant for ages. Defaults to the newest `collected_at` in the batch.
    pub as_of: Option<DateTime<Utc>>,
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self {
            fresh_days: 90,
            stale_days: 365,
            as_of: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub default_weight: u8,
    /// Seed the registry with the shipped collector sources before applying `sources`.
    pub include_builtin: bool,
    pub sources: BTreeMap<String, SourceConfig>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_weight: 2,
            include_builtin: true,
            sources: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub weight: u8,
    #[serde(default)]
    pub fresh_days: Option<u32>,
    #[serde(default)]
    pub stale_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker pool size; 0 = available cores.
    pub threads: usize,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

fn in_unit_interval(value: f64) -> bool {
    value.is_finite() && value > 0.0 && value <= 1.0
}

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ReconError> {
        let input = std::fs::read_to_string(path)
            .map_err(|e| ReconError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml(&input)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let m = &self.matching;
        if !in_unit_interval(m.threshold) {
            return Err(ReconError::ConfigValidation(format!(
                "matching.threshold must be in (0, 1], got {}",
                m.threshold
            )));
        }
        if !(m.min_compared_weight.is_finite() && m.min_compared_weight > 0.0) {
            return Err(ReconError::ConfigValidation(
                "matching.min_compared_weight must be positive".into(),
            ));
        }
        if m.weights.is_empty() {
            return Err(ReconError::ConfigValidation(
                "matching.weights must name at least one identity field".into(),
            ));
        }
        for (field, weight) in &m.weights {
            if !is_known_field(field) {
                return Err(ReconError::UnknownField {
                    section: "matching.weights".into(),
                    field: field.clone(),
                });
            }
            if !(weight.is_finite() && *weight > 0.0) {
                return Err(ReconError::ConfigValidation(format!(
                    "matching.weights.{field} must be positive, got {weight}"
                )));
            }
        }

        let s = &self.scoring;
        if !in_unit_interval(s.majority_threshold) {
            return Err(ReconError::ConfigValidation(format!(
                "scoring.majority_threshold must be in (0, 1], got {}",
                s.majority_threshold
            )));
        }
        if !in_unit_interval(s.close_similarity) {
            return Err(ReconError::ConfigValidation(format!(
                "scoring.close_similarity must be in (0, 1], got {}",
                s.close_similarity
            )));
        }
        if !(1..=10).contains(&s.single_source_cap) {
            return Err(ReconError::ConfigValidation(
                "scoring.single_source_cap must be in 1..=10".into(),
            ));
        }
        if s.review_gate > 100 {
            return Err(ReconError::ConfigValidation(
                "scoring.review_gate must be in 0..=100".into(),
            ));
        }
        if s.min_overall_confidence > 10 {
            return Err(ReconError::ConfigValidation(
                "scoring.min_overall_confidence must be in 0..=10".into(),
            ));
        }
        let c = &s.components;
        let components = [
            c.quality_max,
            c.diversity_per_source,
            c.diversity_max,
            c.exact,
            c.close,
            c.partial,
            c.conflict,
            c.single_source,
            c.recency_max,
        ];
        if components.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ReconError::ConfigValidation(
                "scoring.components must be finite and non-negative".into(),
            ));
        }
        let imp = &s.importance;
        if [imp.required, imp.high_value, imp.other]
            .iter()
            .any(|v| !v.is_finite() || *v <= 0.0)
        {
            return Err(ReconError::ConfigValidation(
                "scoring.importance weights must be positive".into(),
            ));
        }

        if self.recency.fresh_days > self.recency.stale_days {
            return Err(ReconError::ConfigValidation(format!(
                "recency.fresh_days ({}) exceeds stale_days ({})",
                self.recency.fresh_days, self.recency.stale_days
            )));
        }

        if !(1..=10).contains(&self.registry.default_weight) {
            return Err(ReconError::ConfigValidation(
                "registry.default_weight must be in 1..=10".into(),
            ));
        }
        for (id, source) in &self.registry.sources {
            if !(1..=10).contains(&source.weight) {
                return Err(ReconError::ConfigValidation(format!(
                    "registry.sources.{id}.weight must be in 1..=10, got {}",
                    source.weight
                )));
            }
            let fresh = source.fresh_days.unwrap_or(self.recency.fresh_days);
            let stale = source.stale_days.unwrap_or(self.recency.stale_days);
            if fresh > stale {
                return Err(ReconError::ConfigValidation(format!(
                    "registry.sources.{id}: fresh_days ({fresh}) exceeds stale_days ({stale})"
                )));
            }
        }

        let tiers = [
            ("tiers.required", &self.tiers.required),
            ("tiers.high_value", &self.tiers.high_value),
        ];
        for (section, fields) in tiers {
            for field in fields {
                if !is_known_field(field) {
                    return Err(ReconError::UnknownField {
                        section: section.into(),
                        field: field.clone(),
                    });
                }
            }
        }
        if let Some(ref all) = self.tiers.all_fields {
            for field in all {
                if !is_known_field(field) {
                    return Err(ReconError::UnknownField {
                        section: "tiers.all_fields".into(),
                        field: field.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
