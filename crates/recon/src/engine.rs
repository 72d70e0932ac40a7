use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::cancel::Cancellation;
use crate::cluster::cluster_records;
use crate::completeness::{assess, lead_score, quality_band};
use crate::confidence::{overall_confidence, score_field, ScoreContext};
use crate::config::ReconConfig;
use crate::error::ReconError;
use crate::evidence::compute_summary;
use crate::matcher::Matcher;
use crate::model::{
    AgreementLevel, CanonicalEntity, RawRecord, ReconMeta, ReconResult, ReconciledField, RecordKey, RejectReason,
    RejectedRecord, ReviewEntry, ReviewReason,
};
use crate::normalize;
use crate::reconcile::{observations_for, reconcile_field, Resolution};
use crate::registry::SourceRegistry;

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Pipeline phases. A run moves through them strictly in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Ingesting,
    Clustering,
    Reconciling,
    Scoring,
    Emitting,
    Done,
}

impl RunState {
    pub fn next(self) -> Self {
        match self {
            Self::Ingesting => Self::Clustering,
            Self::Clustering => Self::Reconciling,
            Self::Reconciling => Self::Scoring,
            Self::Scoring => Self::Emitting,
            Self::Emitting | Self::Done => Self::Done,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingesting => write!(f, "ingesting"),
            Self::Clustering => write!(f, "clustering"),
            Self::Reconciling => write!(f, "reconciling"),
            Self::Scoring => write!(f, "scoring"),
            Self::Emitting => write!(f, "emitting"),
            Self::Done => write!(f, "done"),
        }
    }
}

fn advance(state: &mut RunState) {
    let next = state.next();
    log::debug!("pipeline: {state} -> {next}");
    *state = next;
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A validated configuration, a registry snapshot and a worker pool.
///
/// Both snapshots are immutable for the life of the pipeline; registry updates
/// between runs go through [`Pipeline::with_registry`].
pub struct Pipeline {
    config: Arc<ReconConfig>,
    registry: Arc<SourceRegistry>,
    matcher: Matcher,
    pool: rayon::ThreadPool,
}

/// One cluster after field reconciliation, before scoring.
struct ReconciledCluster<'a> {
    records: Vec<&'a RawRecord>,
    keys: Vec<RecordKey>,
    resolutions: Vec<Resolution>,
    unscored: BTreeMap<String, BTreeSet<String>>,
}

enum Outcome {
    Emit(CanonicalEntity),
    Review(ReviewEntry),
}

impl Pipeline {
    /// Validate `config` and build the registry from its `[registry]` section.
    pub fn new(config: ReconConfig) -> Result<Self, ReconError> {
        let registry = SourceRegistry::from_config(&config.registry, &config.recency);
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: ReconConfig, registry: SourceRegistry) -> Result<Self, ReconError> {
        config.validate()?;

        let threads = match config.workers.threads {
            0 => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            n => n,
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("recon-worker-{i}"))
            .build()
            .map_err(|e| ReconError::ConfigValidation(format!("worker pool: {e}")))?;

        log::info!(
            "pipeline '{}': {} sources, {} workers, threshold {} ({})",
            config.name,
            registry.len(),
            threads,
            config.matching.threshold,
            config.matching.mode
        );

        Ok(Self {
            matcher: Matcher::new(&config.matching),
            config: Arc::new(config),
            registry: Arc::new(registry),
            pool,
        })
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn run(&self, records: Vec<RawRecord>) -> Result<ReconResult, ReconError> {
        self.run_with_cancel(records, &Cancellation::new())
    }

    /// Run reconciliation. Cancellation is honored between clusters.
    pub fn run_with_cancel(&self, records: Vec<RawRecord>, cancel: &Cancellation) -> Result<ReconResult, ReconError> {
        let config = &*self.config;
        let mut state = RunState::Ingesting;
        log::debug!("pipeline: {state}");

        let input_records = records.len();
        let (accepted, rejected) = ingest(records);
        let unknown_sources: BTreeSet<String> = accepted
            .iter()
            .filter_map(|r| r.source_id.as_deref())
            .filter(|s| !self.registry.is_known(s))
            .map(str::to_string)
            .collect();
        if !rejected.is_empty() {
            log::warn!("ingest: rejected {} of {input_records} records", rejected.len());
        }
        check(cancel)?;

        advance(&mut state);
        let profiles: Vec<_> = accepted.iter().map(|r| self.matcher.profile(r)).collect();
        let keys = record_keys(&accepted);
        let pool = config.matching.parallel.then_some(&self.pool);
        let clusters = cluster_records(&profiles, &keys, &self.matcher, &config.matching, pool);
        log::info!("cluster: {} accepted records -> {} clusters", accepted.len(), clusters.len());
        check(cancel)?;

        advance(&mut state);
        let reconciled: Vec<ReconciledCluster<'_>> = self.pool.install(|| {
            clusters
                .par_iter()
                .map(|members| {
                    check(cancel)?;
                    Ok(self.reconcile_cluster(members, &accepted, &keys))
                })
                .collect::<Result<Vec<_>, ReconError>>()
        })?;

        advance(&mut state);
        let as_of = config
            .recency
            .as_of
            .or_else(|| accepted.iter().filter_map(|r| r.collected_at).max());
        let outcomes: Vec<Outcome> = self.pool.install(|| {
            reconciled
                .into_par_iter()
                .map(|cluster| {
                    check(cancel)?;
                    Ok(self.score_cluster(cluster, as_of))
                })
                .collect::<Result<Vec<_>, ReconError>>()
        })?;

        advance(&mut state);
        let mut entities = Vec::new();
        let mut review_queue = Vec::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Emit(entity) => entities.push(entity),
                Outcome::Review(entry) => review_queue.push(entry),
            }
        }

        let mut summary = compute_summary(input_records, clusters.len(), &entities, &review_queue, &rejected);
        summary.unknown_sources = unknown_sources;
        log::info!(
            "pipeline '{}': {} entities, {} for review, {} rejected",
            config.name,
            summary.entities,
            summary.review_queue,
            summary.rejected_records
        );

        advance(&mut state);
        Ok(ReconResult {
            meta: ReconMeta {
                config_name: config.name.clone(),
                cluster_mode: config.matching.mode.to_string(),
                similarity_threshold: config.matching.threshold,
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
                run_at: Utc::now().to_rfc3339(),
                as_of,
            },
            summary,
            entities,
            review_queue,
            rejected,
        })
    }

    fn reconcile_cluster<'a>(
        &self,
        members: &[usize],
        accepted: &'a [RawRecord],
        keys: &[RecordKey],
    ) -> ReconciledCluster<'a> {
        // Members in key order, so everything downstream is independent of input order.
        let mut members = members.to_vec();
        members.sort_by(|&a, &b| keys[a].cmp(&keys[b]));
        let records: Vec<&RawRecord> = members.iter().map(|&i| &accepted[i]).collect();
        let keys: Vec<RecordKey> = members.iter().map(|&i| keys[i].clone()).collect();

        let mut known: BTreeSet<&str> = BTreeSet::new();
        let mut unscored: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for record in &records {
            for (name, value) in &record.fields {
                if normalize::is_known_field(name) {
                    known.insert(name.as_str());
                } else if let Some(v) = value.as_deref().and_then(|raw| normalize::clean_value(None, raw)) {
                    unscored.entry(name.clone()).or_default().insert(v);
                }
            }
        }

        let resolutions = known
            .into_iter()
            .filter_map(|field| {
                let observations = observations_for(field, &records, &self.registry);
                reconcile_field(field, observations, &self.config.scoring)
            })
            .collect();

        ReconciledCluster {
            records,
            keys,
            resolutions,
            unscored,
        }
    }

    fn score_cluster(&self, cluster: ReconciledCluster<'_>, as_of: Option<DateTime<Utc>>) -> Outcome {
        let config = &*self.config;
        let ctx = ScoreContext {
            components: &config.scoring.components,
            single_source_cap: config.scoring.single_source_cap,
            registry: &self.registry,
            as_of,
        };

        let fields: BTreeMap<String, ReconciledField> = cluster
            .resolutions
            .iter()
            .map(|r| {
                let field = ReconciledField {
                    value: r.value.clone(),
                    agreement_level: r.agreement,
                    contributing_sources: r.contributors.iter().map(|o| o.source_id.clone()).collect(),
                    dissenting_sources: r.dissenters.iter().map(|o| o.source_id.clone()).collect(),
                    observation_count: r.observation_count(),
                    confidence_score: score_field(r, &ctx),
                };
                (r.field.clone(), field)
            })
            .collect();

        let completeness = assess(&fields, &config.tiers);
        let overall = overall_confidence(
            fields
                .iter()
                .map(|(name, f)| (config.tiers.tier_of(name), f.confidence_score)),
            &config.scoring.importance,
        );

        let mut reasons = completeness.blocking_reasons();
        for (name, field) in &fields {
            if field.agreement_level == AgreementLevel::Conflict && !completeness.conflicting_required.contains(name) {
                reasons.push(ReviewReason::UnresolvedConflict { field: name.clone() });
            }
        }
        if !completeness.is_incomplete() && completeness.score < config.scoring.review_gate {
            reasons.push(ReviewReason::BelowCompletenessGate {
                score: completeness.score,
                gate: config.scoring.review_gate,
            });
        }
        if overall < config.scoring.min_overall_confidence {
            reasons.push(ReviewReason::LowConfidence {
                score: overall,
                minimum: config.scoring.min_overall_confidence,
            });
        }

        let lead = lead_score(&fields);
        let entity = CanonicalEntity {
            entity_id: entity_id(&cluster.keys),
            fields,
            unscored_fields: cluster.unscored,
            completeness_score: completeness.score,
            overall_confidence: overall,
            quality_band: quality_band(completeness.score),
            lead_score: lead,
            review_required: !reasons.is_empty(),
            review_reasons: reasons.clone(),
            source_record_ids: cluster.keys,
        };

        if completeness.is_incomplete() {
            log::debug!("review queue: {} ({} reasons)", entity.entity_id, reasons.len());
            Outcome::Review(ReviewEntry {
                entity,
                records: cluster.records.into_iter().cloned().collect(),
                reasons,
            })
        } else {
            Outcome::Emit(entity)
        }
    }
}

/// Validate, build and run in one call.
pub fn run(config: &ReconConfig, records: Vec<RawRecord>) -> Result<ReconResult, ReconError> {
    Pipeline::new(config.clone())?.run(records)
}

fn check(cancel: &Cancellation) -> Result<(), ReconError> {
    if cancel.is_cancelled() {
        Err(ReconError::Cancelled)
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ingest + identity
// ---------------------------------------------------------------------------

/// A record is usable when any key, known or not, still has a value after
/// sentinel cleaning.
fn has_usable_field(record: &RawRecord) -> bool {
    record.fields.iter().any(|(name, value)| {
        value
            .as_deref()
            .and_then(|raw| normalize::clean_value(normalize::field_rule(name), raw))
            .is_some()
    })
}

/// Split input into accepted records (input order kept) and rejections.
///
/// Only a missing `source_id` or a record with nothing left after cleaning is
/// rejected. Repeated `(source_id, record_id)` pairs are all kept; see
/// [`record_keys`].
pub fn ingest(records: Vec<RawRecord>) -> (Vec<RawRecord>, Vec<RejectedRecord>) {
    let mut accepted = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();

    for (input_index, mut record) in records.into_iter().enumerate() {
        record.source_id = record
            .source_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let reason = if record.source_id.is_none() {
            Some(RejectReason::MissingSourceId)
        } else if !has_usable_field(&record) {
            Some(RejectReason::NoUsableFields)
        } else {
            None
        };
        match reason {
            Some(reason) => rejected.push(RejectedRecord {
                record_id: record.record_id,
                source_id: record.source_id,
                input_index,
                reason,
            }),
            None => accepted.push(record),
        }
    }

    (accepted, rejected)
}

/// Run-level keys for `records`. A `(source_id, record_id)` pair that occurs
/// more than once gets each record's content fingerprint attached, so keys
/// depend only on the batch contents and never on input order.
pub fn record_keys(records: &[RawRecord]) -> Vec<RecordKey> {
    let mut seen: BTreeMap<RecordKey, usize> = BTreeMap::new();
    for record in records {
        *seen.entry(record.key()).or_default() += 1;
    }

    records
        .iter()
        .map(|record| {
            let mut key = record.key();
            if seen.get(&key).copied().unwrap_or(0) > 1 {
                log::debug!("ingest: '{key}' repeats in this batch, keyed by content");
                key.fingerprint = Some(record.fingerprint());
            }
            key
        })
        .collect()
}

/// Content-derived id: `ent_` + 16 hex chars of SHA-256 over the sorted member keys.
pub fn entity_id(sorted_keys: &[RecordKey]) -> String {
    let mut hasher = Sha256::new();
    for key in sorted_keys {
        hasher.update(key.source_id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(key.record_id.as_bytes());
        if let Some(fp) = &key.fingerprint {
            hasher.update(b"\x1f");
            hasher.update(fp.as_bytes());
        }
        hasher.update(b"\n");
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("ent_{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2026, 2, d, 0, 0, 0).unwrap())
    }

    fn key(source: &str, id: &str) -> RecordKey {
        RecordKey {
            source_id: source.into(),
            record_id: id.into(),
            fingerprint: None,
        }
    }

    #[test]
    fn states_advance_in_order() {
        let mut state = RunState::Ingesting;
        let mut seen = vec![state];
        while state != RunState::Done {
            advance(&mut state);
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                RunState::Ingesting,
                RunState::Clustering,
                RunState::Reconciling,
                RunState::Scoring,
                RunState::Emitting,
                RunState::Done,
            ]
        );
        assert_eq!(RunState::Done.next(), RunState::Done);
    }

    #[test]
    fn ingest_rejects_with_reasons() {
        let mut no_source = RawRecord::new("a", "x", None).with_field("business_name", "Acme");
        no_source.source_id = Some("  ".into());
        let empty = RawRecord::new("b", "yellow_pages", None)
            .with_field("website", "N/A")
            .with_field("ceo_name", "NOT_FOUND");
        let ok = RawRecord::new("c", "yellow_pages", day(1)).with_field("business_name", "Acme");
        let only_unknown = RawRecord::new("d", "yellow_pages", day(1)).with_field("bbb_rating", "A+");

        let (accepted, rejected) = ingest(vec![no_source, empty, ok, only_unknown]);
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0].record_id, "c");
        assert_eq!(accepted[1].record_id, "d");
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].reason, RejectReason::MissingSourceId);
        assert_eq!(rejected[0].source_id, None);
        assert_eq!(rejected[1].reason, RejectReason::NoUsableFields);
        assert_eq!(rejected[1].input_index, 1);
    }

    #[test]
    fn record_with_only_unknown_fields_is_carried() {
        let records = vec![RawRecord::new("d", "yellow_pages", day(1)).with_field("bbb_rating", "A+")];
        let result = run(&ReconConfig::default(), records).unwrap();
        assert!(result.rejected.is_empty());
        let entity = result.all_entities().next().unwrap();
        assert!(entity.fields.is_empty());
        assert!(entity.unscored_fields["bbb_rating"].contains("A+"));
    }

    #[test]
    fn repeated_keys_are_kept_and_told_apart() {
        let a = RawRecord::new("1", "yellow_pages", day(1)).with_field("business_name", "Acme");
        let b = RawRecord::new("1", "yellow_pages", day(1)).with_field("business_name", "Zenith");
        let c = RawRecord::new("2", "yellow_pages", day(1)).with_field("business_name", "Acme");

        let (accepted, rejected) = ingest(vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(accepted.len(), 3);
        assert!(rejected.is_empty());

        let keys = record_keys(&accepted);
        assert_ne!(keys[0], keys[1]);
        assert!(keys[0].fingerprint.is_some());
        assert_eq!(keys[2], c.key());

        let reversed = record_keys(&[c, b, a]);
        assert_eq!(reversed[2], keys[0]);
        assert_eq!(reversed[1], keys[1]);
    }

    fn entity_summary(result: &ReconResult) -> Vec<(String, Option<String>, usize)> {
        let mut out: Vec<_> = result
            .all_entities()
            .map(|e| {
                (
                    e.entity_id.clone(),
                    e.value("business_name").map(str::to_string),
                    e.source_record_ids.len(),
                )
            })
            .collect();
        out.sort();
        out
    }

    #[test]
    fn repeated_key_does_not_make_output_order_dependent() {
        let a = RawRecord::new("1", "yellow_pages", day(1))
            .with_field("business_name", "Acme Internet")
            .with_field("phone_number", "555-123-4567");
        let b = RawRecord::new("1", "yellow_pages", day(1))
            .with_field("business_name", "Zenith Fiber")
            .with_field("phone_number", "555-999-0000");
        let c = RawRecord::new("7", "company_website", day(1))
            .with_field("business_name", "Acme Internet Inc")
            .with_field("phone_number", "(555) 123-4567");

        let config = ReconConfig::default();
        let forward = run(&config, vec![a.clone(), b.clone(), c.clone()]).unwrap();
        let swapped = run(&config, vec![b, a, c]).unwrap();
        assert!(forward.rejected.is_empty());

        let summary = entity_summary(&forward);
        assert_eq!(summary, entity_summary(&swapped));
        assert_eq!(summary.len(), 2);
        let sizes: Vec<_> = summary.iter().map(|(_, name, n)| (name.clone(), *n)).collect();
        assert!(sizes.contains(&(Some("Acme Internet Inc.".to_string()), 2)));
        assert!(sizes.contains(&(Some("Zenith Fiber".to_string()), 1)));
    }

    #[test]
    fn entity_id_is_content_hash() {
        let keys = vec![key("company_website", "1"), key("yellow_pages", "9")];
        let id = entity_id(&keys);
        assert!(id.starts_with("ent_"));
        assert_eq!(id.len(), 20);
        assert_eq!(id, entity_id(&keys));
        assert_ne!(id, entity_id(&keys[..1]));
        // Separator keeps ("ab", "c") apart from ("a", "bc")
        assert_ne!(entity_id(&[key("ab", "c")]), entity_id(&[key("a", "bc")]));
    }

    #[test]
    fn unknown_fields_are_carried_not_scored() {
        let records = vec![
            RawRecord::new("1", "yellow_pages", day(1))
                .with_field("business_name", "Acme Internet")
                .with_field("phone_number", "555-123-4567")
                .with_field("bbb_rating", "A+"),
            RawRecord::new("2", "company_website", day(2))
                .with_field("business_name", "Acme Internet")
                .with_field("phone_number", "(555) 123-4567")
                .with_field("bbb_rating", "A"),
        ];
        let result = run(&ReconConfig::default(), records).unwrap();
        assert_eq!(result.entities.len(), 1);
        let entity = &result.entities[0];
        assert!(entity.field("bbb_rating").is_none());
        assert_eq!(entity.unscored_fields["bbb_rating"].len(), 2);
    }

    #[test]
    fn unknown_sources_are_reported() {
        let records = vec![RawRecord::new("1", "chamber_of_commerce", day(1))
            .with_field("business_name", "Acme Internet")
            .with_field("phone_number", "555-123-4567")];
        let result = run(&ReconConfig::default(), records).unwrap();
        assert!(result.summary.unknown_sources.contains("chamber_of_commerce"));
        let entity = result.all_entities().next().unwrap();
        assert_eq!(entity.field("business_name").unwrap().agreement_level, AgreementLevel::SingleSource);
    }

    #[test]
    fn cancelled_run_stops() {
        let cancel = Cancellation::new();
        cancel.cancel();
        let pipeline = Pipeline::new(ReconConfig::default()).unwrap();
        let records = vec![RawRecord::new("1", "yellow_pages", day(1)).with_field("business_name", "Acme")];
        assert!(matches!(
            pipeline.run_with_cancel(records, &cancel),
            Err(ReconError::Cancelled)
        ));
    }

    #[test]
    fn invalid_config_fails_at_construction() {
        let mut config = ReconConfig::default();
        config.matching.threshold = 1.5;
        assert!(matches!(Pipeline::new(config), Err(ReconError::ConfigValidation(_))));
    }
}
