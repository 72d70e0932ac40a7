//! Field confidence: four components summed, clamped to 1..=10, rounded.
//!
//! - quality: mean registry weight of the contributing sources
//! - diversity: distinct contributing sources, capped
//! - consistency: by agreement level
//! - recency: credit for the freshest contributing observation

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::config::{ComponentWeights, FieldTier, ImportanceWeights};
use crate::model::{AgreementLevel, FieldObservation};
use crate::reconcile::Resolution;
use crate::registry::{FreshnessPolicy, SourceRegistry};

/// Share of `quality_max` earned by a weight-1 source. Weight 10 earns all of it.
const QUALITY_FLOOR: f64 = 0.25;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Everything field scoring needs besides the resolution itself.
#[derive(Debug, Clone, Copy)]
pub struct ScoreContext<'a> {
    pub components: &'a ComponentWeights,
    pub single_source_cap: u8,
    pub registry: &'a SourceRegistry,
    pub as_of: Option<DateTime<Utc>>,
}

pub fn quality_component(contributors: &[FieldObservation], components: &ComponentWeights) -> f64 {
    if contributors.is_empty() {
        return 0.0;
    }
    let mean = contributors.iter().map(|o| o.weight as f64).sum::<f64>() / contributors.len() as f64;
    let scaled = QUALITY_FLOOR + (1.0 - QUALITY_FLOOR) * (mean - 1.0) / 9.0;
    components.quality_max * scaled.clamp(0.0, 1.0)
}

pub fn diversity_component(distinct_sources: usize, components: &ComponentWeights) -> f64 {
    (components.diversity_per_source * distinct_sources as f64).min(components.diversity_max)
}

pub fn consistency_component(level: AgreementLevel, components: &ComponentWeights) -> f64 {
    match level {
        AgreementLevel::Exact => components.exact,
        AgreementLevel::Close => components.close,
        AgreementLevel::Partial => components.partial,
        AgreementLevel::Conflict => components.conflict,
        AgreementLevel::SingleSource => components.single_source,
    }
}

/// Full credit inside the freshness window, linear decay to zero at the
/// staleness cutoff. Undated observations earn nothing.
pub fn recency_credit(
    observed_at: Option<DateTime<Utc>>,
    as_of: Option<DateTime<Utc>>,
    policy: FreshnessPolicy,
    recency_max: f64,
) -> f64 {
    let (Some(observed), Some(now)) = (observed_at, as_of) else {
        return 0.0;
    };
    let age_days = (now - observed).num_seconds() as f64 / SECONDS_PER_DAY;
    let fresh = policy.fresh_days as f64;
    let stale = policy.stale_days as f64;
    if age_days <= fresh {
        recency_max
    } else if age_days >= stale {
        0.0
    } else {
        recency_max * (stale - age_days) / (stale - fresh)
    }
}

pub fn recency_component(contributors: &[FieldObservation], ctx: &ScoreContext<'_>) -> f64 {
    contributors
        .iter()
        .map(|o| {
            recency_credit(
                o.observed_at,
                ctx.as_of,
                ctx.registry.freshness(&o.source_id),
                ctx.components.recency_max,
            )
        })
        .fold(0.0, f64::max)
}

/// Unrounded component sum, before clamping.
pub fn raw_score(resolution: &Resolution, ctx: &ScoreContext<'_>) -> f64 {
    let distinct: BTreeSet<&str> = resolution.contributors.iter().map(|o| o.source_id.as_str()).collect();
    quality_component(&resolution.contributors, ctx.components)
        + diversity_component(distinct.len(), ctx.components)
        + consistency_component(resolution.agreement, ctx.components)
        + recency_component(&resolution.contributors, ctx)
}

/// Field confidence in 1..=10. Single-source fields never exceed the cap.
pub fn score_field(resolution: &Resolution, ctx: &ScoreContext<'_>) -> u8 {
    let score = raw_score(resolution, ctx).clamp(1.0, 10.0).round() as u8;
    if resolution.agreement == AgreementLevel::SingleSource {
        score.min(ctx.single_source_cap)
    } else {
        score
    }
}

/// Importance-weighted mean of field confidences, in 1..=10.
pub fn overall_confidence<I>(fields: I, importance: &ImportanceWeights) -> u8
where
    I: IntoIterator<Item = (FieldTier, u8)>,
{
    let mut weighted = 0.0;
    let mut total = 0.0;
    for (tier, score) in fields {
        let w = importance.for_tier(tier);
        weighted += w * score as f64;
        total += w;
    }
    if total == 0.0 {
        return 1;
    }
    (weighted / total).clamp(1.0, 10.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap())
    }

    fn obs(source: &str, weight: u8, day: u32) -> FieldObservation {
        FieldObservation {
            value: "v".into(),
            source_id: source.into(),
            record_id: "r".into(),
            weight,
            observed_at: at(day),
        }
    }

    fn resolution(agreement: AgreementLevel, contributors: Vec<FieldObservation>) -> Resolution {
        Resolution {
            field: "phone_number".into(),
            value: Some("v".into()),
            agreement,
            contributors,
            dissenters: vec![],
        }
    }

    const POLICY: FreshnessPolicy = FreshnessPolicy {
        fresh_days: 10,
        stale_days: 20,
    };

    #[test]
    fn quality_scales_weight_range() {
        let c = ComponentWeights::default();
        assert_eq!(quality_component(&[obs("a", 10, 1)], &c), 4.0);
        assert_eq!(quality_component(&[obs("a", 1, 1)], &c), 1.0);
        assert_eq!(quality_component(&[], &c), 0.0);
    }

    #[test]
    fn diversity_caps() {
        let c = ComponentWeights::default();
        assert_eq!(diversity_component(1, &c), 1.5);
        assert_eq!(diversity_component(3, &c), 4.5);
        assert_eq!(diversity_component(7, &c), 5.0);
    }

    #[test]
    fn recency_decays_linearly() {
        let now = at(31);
        assert_eq!(recency_credit(at(25), now, POLICY, 1.0), 1.0);
        assert_eq!(recency_credit(at(16), now, POLICY, 1.0), 0.5);
        assert_eq!(recency_credit(at(1), now, POLICY, 1.0), 0.0);
        assert_eq!(recency_credit(None, now, POLICY, 1.0), 0.0);
        assert_eq!(recency_credit(at(1), None, POLICY, 1.0), 0.0);
    }

    #[test]
    fn scores_clamp_and_cap() {
        let registry = SourceRegistry::builtin();
        let components = ComponentWeights::default();
        let ctx = ScoreContext {
            components: &components,
            single_source_cap: 6,
            registry: &registry,
            as_of: at(2),
        };

        let strong = resolution(
            AgreementLevel::Exact,
            vec![obs("a", 10, 1), obs("b", 10, 1), obs("c", 10, 1)],
        );
        assert_eq!(score_field(&strong, &ctx), 10);

        let single = resolution(AgreementLevel::SingleSource, vec![obs("a", 10, 1)]);
        // 4 + 1.5 + 0 + 1 = 6.5 -> capped at 6
        assert_eq!(score_field(&single, &ctx), 6);

        let mut conflict = resolution(AgreementLevel::Conflict, vec![obs("a", 1, 1), obs("b", 1, 1)]);
        conflict.value = None;
        // 1 + 3 + 0 + 1 = 5
        assert_eq!(score_field(&conflict, &ctx), 5);
    }

    #[test]
    fn overall_is_importance_weighted() {
        let imp = ImportanceWeights::default();
        let score = overall_confidence(
            vec![(FieldTier::Required, 10), (FieldTier::Other, 4)],
            &imp,
        );
        // (30 + 4) / 4 = 8.5 -> 9
        assert_eq!(score, 9);
        assert_eq!(overall_confidence(Vec::new(), &imp), 1);
    }
}
