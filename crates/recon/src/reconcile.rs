//! Field reconciliation: resolves one field across all records of a cluster.
//!
//! Agreement levels:
//! - `single_source`: one source reported the field
//! - `exact`: every observation has the same light key
//! - `close`: observations differ only in form (same canonical key, or
//!   canonical strings / numbers within the near-equal bound)
//! - `partial`: several groups, one holding more than the majority share of weight
//! - `conflict`: several groups, none with a majority; the value is left unresolved

use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::cluster::UnionFind;
use crate::config::ScoringConfig;
use crate::model::{AgreementLevel, FieldObservation, RawRecord};
use crate::normalize::{self, FieldRule};
use crate::registry::{SourceRegistry, MAX_WEIGHT, MIN_WEIGHT};

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub field: String,
    pub value: Option<String>,
    pub agreement: AgreementLevel,
    /// Observations backing the value; every observation for `conflict`.
    pub contributors: Vec<FieldObservation>,
    /// Observations outvoted by the majority group (`partial` only).
    pub dissenters: Vec<FieldObservation>,
}

impl Resolution {
    pub fn observation_count(&self) -> usize {
        self.contributors.len() + self.dissenters.len()
    }
}

/// Preference between two observations: higher weight, then more recent, then
/// smaller source_id. `Greater` means `a` wins.
pub fn precedence(a: &FieldObservation, b: &FieldObservation) -> Ordering {
    a.weight
        .cmp(&b.weight)
        .then_with(|| a.observed_at.cmp(&b.observed_at))
        .then_with(|| b.source_id.cmp(&a.source_id))
        .then_with(|| b.record_id.cmp(&a.record_id))
}

fn best<'a>(observations: &'a [FieldObservation]) -> Option<&'a FieldObservation> {
    observations.iter().max_by(|a, b| precedence(a, b))
}

type SameSourceRank<'a> = (Option<DateTime<Utc>>, Reverse<&'a str>, u8, Reverse<&'a str>);

fn same_source_rank(o: &FieldObservation) -> SameSourceRank<'_> {
    (o.observed_at, Reverse(o.record_id.as_str()), o.weight, Reverse(o.value.as_str()))
}

/// Gather one observation per source for `field` across the cluster's records.
/// When a source reported the field more than once, its most recent record wins
/// (then the smallest record_id, the higher weight, the smaller value).
pub fn observations_for(field: &str, records: &[&RawRecord], registry: &SourceRegistry) -> Vec<FieldObservation> {
    let rule = normalize::field_rule(field);
    let mut per_source: BTreeMap<&str, FieldObservation> = BTreeMap::new();

    for record in records {
        let Some(source_id) = record.source_id.as_deref() else {
            continue;
        };
        let Some(Some(raw)) = record.fields.get(field) else {
            continue;
        };
        let Some(value) = normalize::clean_value(rule, raw) else {
            continue;
        };

        let mut weight = registry.weight(source_id);
        if let Some(hint) = record.confidence_hints.get(field) {
            weight = weight.min((*hint).clamp(MIN_WEIGHT, MAX_WEIGHT));
        }
        let obs = FieldObservation {
            value,
            source_id: source_id.to_string(),
            record_id: record.record_id.clone(),
            weight,
            observed_at: record.collected_at,
        };

        match per_source.get(source_id) {
            Some(existing) if same_source_rank(existing) >= same_source_rank(&obs) => {}
            _ => {
                per_source.insert(source_id, obs);
            }
        }
    }

    per_source.into_values().collect()
}

/// Resolve one field. Returns `None` when nobody observed it.
pub fn reconcile_field(field: &str, observations: Vec<FieldObservation>, scoring: &ScoringConfig) -> Option<Resolution> {
    let rule = normalize::field_rule(field);
    let display = |obs: &FieldObservation| normalize::display(rule, &obs.value);

    match observations.len() {
        0 => return None,
        1 => {
            let value = Some(display(&observations[0]));
            return Some(Resolution {
                field: field.to_string(),
                value,
                agreement: AgreementLevel::SingleSource,
                contributors: observations,
                dissenters: Vec::new(),
            });
        }
        _ => {}
    }

    let light: Vec<String> = observations.iter().map(|o| normalize::light_key(&o.value)).collect();
    if light.iter().all(|k| *k == light[0]) {
        let value = best(&observations).map(display);
        return Some(Resolution {
            field: field.to_string(),
            value,
            agreement: AgreementLevel::Exact,
            contributors: observations,
            dissenters: Vec::new(),
        });
    }

    let groups = near_equal_groups(rule, &observations, scoring.close_similarity);
    if groups.len() == 1 {
        let value = best(&observations).map(display);
        return Some(Resolution {
            field: field.to_string(),
            value,
            agreement: AgreementLevel::Close,
            contributors: observations,
            dissenters: Vec::new(),
        });
    }

    let total: u32 = observations.iter().map(|o| o.weight as u32).sum();
    let group_weight = |g: &Vec<usize>| -> u32 { g.iter().map(|&i| observations[i].weight as u32).sum() };
    let newest = |g: &Vec<usize>| g.iter().map(|&i| observations[i].observed_at).max().flatten();
    let first_source = |g: &Vec<usize>| g.iter().map(|&i| observations[i].source_id.as_str()).min();

    let top = groups
        .iter()
        .max_by(|x, y| {
            group_weight(x)
                .cmp(&group_weight(y))
                .then_with(|| newest(x).cmp(&newest(y)))
                .then_with(|| first_source(y).cmp(&first_source(x)))
        })
        .cloned()
        .unwrap_or_default();

    let share = group_weight(&top) as f64 / total.max(1) as f64;
    if share > scoring.majority_threshold {
        let mut contributors = Vec::new();
        let mut dissenters = Vec::new();
        for (i, obs) in observations.into_iter().enumerate() {
            if top.contains(&i) {
                contributors.push(obs);
            } else {
                dissenters.push(obs);
            }
        }
        let value = best(&contributors).map(display);
        Some(Resolution {
            field: field.to_string(),
            value,
            agreement: AgreementLevel::Partial,
            contributors,
            dissenters,
        })
    } else {
        log::debug!(
            "reconcile: '{field}' unresolved, {} groups, top share {share:.2}",
            groups.len()
        );
        Some(Resolution {
            field: field.to_string(),
            value: None,
            agreement: AgreementLevel::Conflict,
            contributors: observations,
            dissenters: Vec::new(),
        })
    }
}

/// Partition observations into near-equal groups (transitively linked).
fn near_equal_groups(rule: Option<FieldRule>, observations: &[FieldObservation], close_similarity: f64) -> Vec<Vec<usize>> {
    let canon: Vec<String> = observations.iter().map(|o| normalize::canonical(rule, &o.value)).collect();
    let mut uf = UnionFind::new(observations.len());
    for i in 0..canon.len() {
        for j in i + 1..canon.len() {
            let linked = match rule {
                Some(rule) => normalize::values_close(rule, &canon[i], &canon[j], close_similarity),
                None => canon[i] == canon[j],
            };
            if linked {
                uf.union(i, j);
            }
        }
    }
    uf.groups()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn obs(source: &str, weight: u8, value: &str, day: u32) -> FieldObservation {
        FieldObservation {
            value: value.into(),
            source_id: source.into(),
            record_id: format!("{source}-1"),
            weight,
            observed_at: Some(Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap()),
        }
    }

    fn scoring() -> ScoringConfig {
        ScoringConfig::default()
    }

    #[test]
    fn nothing_observed() {
        assert!(reconcile_field("phone_number", vec![], &scoring()).is_none());
    }

    #[test]
    fn single_source() {
        let r = reconcile_field("ceo_name", vec![obs("company_website", 10, "Jane Doe", 1)], &scoring()).unwrap();
        assert_eq!(r.agreement, AgreementLevel::SingleSource);
        assert_eq!(r.value.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn exact_ignores_case_and_spacing() {
        let r = reconcile_field(
            "city",
            vec![obs("a", 5, "Raleigh", 1), obs("b", 7, "RALEIGH ", 2)],
            &scoring(),
        )
        .unwrap();
        assert_eq!(r.agreement, AgreementLevel::Exact);
        // b outweighs a
        assert_eq!(r.value.as_deref(), Some("RALEIGH"));
    }

    #[test]
    fn phone_formats_are_close() {
        let r = reconcile_field(
            "phone_number",
            vec![
                obs("yellow_pages", 7, "(555) 123-4567", 1),
                obs("company_website", 10, "555.123.4567", 1),
                obs("directory_aggregator", 5, "+1 555 123 4567", 1),
            ],
            &scoring(),
        )
        .unwrap();
        assert_eq!(r.agreement, AgreementLevel::Close);
        assert_eq!(r.value.as_deref(), Some("(555) 123-4567"));
        assert_eq!(r.contributors.len(), 3);
    }

    #[test]
    fn address_abbreviations_are_close() {
        let r = reconcile_field(
            "address",
            vec![
                obs("a", 5, "100 North Main Street", 1),
                obs("b", 9, "100 N Main St", 1),
            ],
            &scoring(),
        )
        .unwrap();
        assert_eq!(r.agreement, AgreementLevel::Close);
        assert_eq!(r.value.as_deref(), Some("100 N Main St"));
    }

    #[test]
    fn majority_group_wins_partial() {
        let r = reconcile_field(
            "website",
            vec![
                obs("company_website", 10, "acme.com", 1),
                obs("yellow_pages", 7, "https://www.acme.com", 1),
                obs("web_crawl", 4, "acme-internet.net", 1),
            ],
            &scoring(),
        )
        .unwrap();
        // 17 of 21 > 60%
        assert_eq!(r.agreement, AgreementLevel::Partial);
        assert_eq!(r.value.as_deref(), Some("https://acme.com"));
        assert_eq!(r.dissenters.len(), 1);
        assert_eq!(r.dissenters[0].source_id, "web_crawl");
        assert_eq!(r.observation_count(), 3);
    }

    #[test]
    fn no_majority_is_conflict() {
        let r = reconcile_field(
            "website",
            vec![obs("a", 5, "acme.com", 1), obs("b", 5, "acme.net", 1), obs("c", 4, "acme.org", 1)],
            &scoring(),
        )
        .unwrap();
        assert_eq!(r.agreement, AgreementLevel::Conflict);
        assert_eq!(r.value, None);
        assert_eq!(r.contributors.len(), 3);
    }

    #[test]
    fn majority_share_must_exceed_threshold() {
        // 6 of 10 is exactly 60%: not a majority
        let r = reconcile_field(
            "website",
            vec![obs("a", 6, "acme.com", 1), obs("b", 4, "acme.net", 1)],
            &scoring(),
        )
        .unwrap();
        assert_eq!(r.agreement, AgreementLevel::Conflict);
    }

    #[test]
    fn tie_break_prefers_recent_then_smallest_source() {
        let r = reconcile_field(
            "city",
            vec![obs("b", 5, "Cary", 3), obs("a", 5, "cary", 1)],
            &scoring(),
        )
        .unwrap();
        assert_eq!(r.value.as_deref(), Some("Cary"));

        let r = reconcile_field(
            "city",
            vec![obs("b", 5, "Cary", 1), obs("a", 5, "cary", 1)],
            &scoring(),
        )
        .unwrap();
        assert_eq!(r.value.as_deref(), Some("cary"));
    }

    #[test]
    fn newer_record_from_same_source_wins() {
        let reg = SourceRegistry::builtin();
        let old = RawRecord::new("r1", "yellow_pages", Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()))
            .with_field("city", "Durham");
        let new = RawRecord::new("r2", "yellow_pages", Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()))
            .with_field("city", "Raleigh");
        let observations = observations_for("city", &[&new, &old], &reg);
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].value, "Raleigh");
    }

    #[test]
    fn same_source_tie_does_not_depend_on_record_order() {
        let reg = SourceRegistry::builtin();
        let at = Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let a = RawRecord::new("r1", "yellow_pages", at).with_field("city", "Raleigh");
        let b = RawRecord::new("r1", "yellow_pages", at).with_field("city", "Durham");
        let forward = observations_for("city", &[&a, &b], &reg);
        let backward = observations_for("city", &[&b, &a], &reg);
        assert_eq!(forward, backward);
        assert_eq!(forward[0].value, "Durham");
    }

    #[test]
    fn confidence_hint_caps_weight() {
        let reg = SourceRegistry::builtin();
        let rec = RawRecord::new("r1", "ai_classifier", None)
            .with_field("industry_classification", "Internet Service Providers")
            .with_hint("industry_classification", 3);
        let observations = observations_for("industry_classification", &[&rec], &reg);
        assert_eq!(observations[0].weight, 3);
    }

    #[test]
    fn sentinel_values_are_not_observations() {
        let reg = SourceRegistry::builtin();
        let rec = RawRecord::new("r1", "yellow_pages", None).with_field("website", "NOT_FOUND");
        assert!(observations_for("website", &[&rec], &reg).is_empty());
    }
}
