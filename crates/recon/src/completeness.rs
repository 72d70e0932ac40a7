use std::collections::BTreeMap;

use crate::config::TierConfig;
use crate::model::{QualityBand, ReconciledField, ReviewReason};

const REQUIRED_SHARE: f64 = 0.4;
const HIGH_VALUE_SHARE: f64 = 0.4;
const ALL_FIELDS_SHARE: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct Completeness {
    pub score: u8,
    pub required_ratio: f64,
    pub high_value_ratio: f64,
    pub all_fields_ratio: f64,
    /// Required fields no source reported.
    pub missing_required: Vec<String>,
    /// Required fields reported but left unresolved by a conflict.
    pub conflicting_required: Vec<String>,
}

impl Completeness {
    /// Any unresolved required field fails the entity outright.
    pub fn is_incomplete(&self) -> bool {
        !self.missing_required.is_empty() || !self.conflicting_required.is_empty()
    }

    pub fn blocking_reasons(&self) -> Vec<ReviewReason> {
        let missing = self
            .missing_required
            .iter()
            .map(|f| ReviewReason::MissingRequiredField { field: f.clone() });
        let conflicting = self
            .conflicting_required
            .iter()
            .map(|f| ReviewReason::ConflictingRequiredField { field: f.clone() });
        missing.chain(conflicting).collect()
    }
}

fn tier_ratio(fields: &BTreeMap<String, ReconciledField>, tier: &[String]) -> f64 {
    if tier.is_empty() {
        return 1.0;
    }
    let resolved = tier
        .iter()
        .filter(|name| fields.get(name.as_str()).map(|f| f.is_resolved()).unwrap_or(false))
        .count();
    resolved as f64 / tier.len() as f64
}

/// Score an assembled entity's fields against the configured tiers.
pub fn assess(fields: &BTreeMap<String, ReconciledField>, tiers: &TierConfig) -> Completeness {
    let mut missing_required = Vec::new();
    let mut conflicting_required = Vec::new();
    for name in &tiers.required {
        match fields.get(name) {
            None => missing_required.push(name.clone()),
            Some(f) if !f.is_resolved() => conflicting_required.push(name.clone()),
            Some(_) => {}
        }
    }

    let required_ratio = tier_ratio(fields, &tiers.required);
    let high_value_ratio = tier_ratio(fields, &tiers.high_value);
    let all_fields_ratio = tier_ratio(fields, &tiers.all_fields());

    let score = if missing_required.is_empty() && conflicting_required.is_empty() {
        let weighted = REQUIRED_SHARE * required_ratio + HIGH_VALUE_SHARE * high_value_ratio + ALL_FIELDS_SHARE * all_fields_ratio;
        (100.0 * weighted).round().clamp(0.0, 100.0) as u8
    } else {
        0
    };

    Completeness {
        score,
        required_ratio,
        high_value_ratio,
        all_fields_ratio,
        missing_required,
        conflicting_required,
    }
}

pub fn quality_band(completeness: u8) -> QualityBand {
    match completeness {
        80..=u8::MAX => QualityBand::HighQuality,
        60..=79 => QualityBand::GoodQuality,
        40..=59 => QualityBand::AcceptableQuality,
        _ => QualityBand::NeedsReview,
    }
}

// ---------------------------------------------------------------------------
// Lead score
// ---------------------------------------------------------------------------

const LEAD_BASE: u8 = 5;

fn resolved(fields: &BTreeMap<String, ReconciledField>, names: &[&str]) -> bool {
    names
        .iter()
        .any(|name| fields.get(*name).map(|f| f.is_resolved()).unwrap_or(false))
}

/// Sales-potential score in 5..=10 from resolved fields only: size indicators,
/// industry, best reachable contact, web presence.
pub fn lead_score(fields: &BTreeMap<String, ReconciledField>) -> u8 {
    let mut score = LEAD_BASE;
    if resolved(fields, &["employee_count", "annual_revenue"]) {
        score += 1;
    }
    if resolved(fields, &["industry_classification", "naics_code"]) {
        score += 1;
    }
    if resolved(fields, &["ceo_email"]) {
        score += 2;
    } else if resolved(fields, &["general_email", "sales_email"]) {
        score += 1;
    }
    if resolved(fields, &["website"]) {
        score += 1;
    }
    score.min(10)
}
