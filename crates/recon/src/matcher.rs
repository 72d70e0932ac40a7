use crate::config::MatchingConfig;
use crate::model::RawRecord;
use crate::normalize::{self, FieldRule};

/// Identity-bearing view of one record: canonical keys for each identity field
/// (in matcher order) plus the optional blocking key.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityProfile {
    pub keys: Vec<Option<String>>,
    pub block_key: Option<String>,
}

/// Weighted record similarity over the configured identity fields.
#[derive(Debug, Clone)]
pub struct Matcher {
    fields: Vec<IdentityField>,
    min_compared_weight: f64,
}

#[derive(Debug, Clone)]
struct IdentityField {
    name: String,
    rule: FieldRule,
    weight: f64,
}

const BLOCK_NAME_PREFIX: usize = 3;

fn canonical_field(record: &RawRecord, name: &str, rule: FieldRule) -> Option<String> {
    let raw = record.fields.get(name)?.as_deref()?;
    let cleaned = normalize::clean_value(Some(rule), raw)?;
    let key = normalize::canonical(Some(rule), &cleaned);
    (!key.is_empty()).then_some(key)
}

impl Matcher {
    pub fn new(config: &MatchingConfig) -> Self {
        // BTreeMap iteration keeps the summation order fixed.
        let fields = config
            .weights
            .iter()
            .filter_map(|(name, weight)| {
                normalize::field_rule(name).map(|rule| IdentityField {
                    name: name.clone(),
                    rule,
                    weight: *weight,
                })
            })
            .collect();
        Self {
            fields,
            min_compared_weight: config.min_compared_weight,
        }
    }

    pub fn profile(&self, record: &RawRecord) -> IdentityProfile {
        let keys = self
            .fields
            .iter()
            .map(|f| canonical_field(record, &f.name, f.rule))
            .collect();
        IdentityProfile {
            keys,
            block_key: block_key(record),
        }
    }

    /// Similarity in [0, 1]. Only fields present on both sides are compared;
    /// the denominator never drops below `min_compared_weight`.
    pub fn similarity(&self, a: &IdentityProfile, b: &IdentityProfile) -> f64 {
        let mut compared = 0.0;
        let mut matched = 0.0;
        for (i, field) in self.fields.iter().enumerate() {
            if let (Some(ka), Some(kb)) = (&a.keys[i], &b.keys[i]) {
                compared += field.weight;
                matched += field.weight * normalize::field_similarity(field.rule, ka, kb);
            }
        }
        if compared == 0.0 {
            return 0.0;
        }
        matched / compared.max(self.min_compared_weight)
    }

    pub fn record_similarity(&self, a: &RawRecord, b: &RawRecord) -> f64 {
        self.similarity(&self.profile(a), &self.profile(b))
    }
}

/// Cheap pre-bucketing key: 5-digit zip + first letters of the canonical name.
/// Records missing either part have no key and are compared against everyone.
pub fn block_key(record: &RawRecord) -> Option<String> {
    let zip = record
        .fields
        .get("zip")
        .and_then(|v| v.as_deref())
        .map(normalize::postal_code)
        .filter(|z| z.len() == 5 && z.chars().all(|c| c.is_ascii_digit()))
        .or_else(|| {
            record
                .fields
                .get("address")
                .and_then(|v| v.as_deref())
                .and_then(normalize::zip_from_address)
        })?;
    let name = record
        .fields
        .get("business_name")
        .and_then(|v| v.as_deref())
        .map(normalize::canonical_business_name)?;
    let prefix: String = name.chars().filter(|c| !c.is_whitespace()).take(BLOCK_NAME_PREFIX).collect();
    if prefix.is_empty() {
        return None;
    }
    Some(format!("{zip}|{prefix}"))
}
