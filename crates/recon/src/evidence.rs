use std::collections::BTreeMap;

use crate::model::{CanonicalEntity, ReconSummary, RejectedRecord, ReviewEntry};

/// Compute run summary statistics from the emitted output.
pub fn compute_summary(
    input_records: usize,
    clusters: usize,
    entities: &[CanonicalEntity],
    review_queue: &[ReviewEntry],
    rejected: &[RejectedRecord],
) -> ReconSummary {
    let mut agreement_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut completeness_total = 0u64;

    let all = entities.iter().chain(review_queue.iter().map(|r| &r.entity));
    for entity in all.clone() {
        completeness_total += entity.completeness_score as u64;
        for field in entity.fields.values() {
            *agreement_counts.entry(field.agreement_level.to_string()).or_insert(0) += 1;
        }
    }
    let entity_count = all.count();

    ReconSummary {
        input_records,
        accepted_records: input_records - rejected.len(),
        rejected_records: rejected.len(),
        clusters,
        entities: entities.len(),
        review_queue: review_queue.len(),
        flagged_entities: entities.iter().filter(|e| e.review_required).count(),
        agreement_counts,
        mean_completeness: if entity_count == 0 {
            0.0
        } else {
            completeness_total as f64 / entity_count as f64
        },
        unknown_sources: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgreementLevel, QualityBand, ReconciledField, RejectReason};
    use std::collections::BTreeSet;

    fn entity(id: &str, completeness: u8, review: bool, levels: &[AgreementLevel]) -> CanonicalEntity {
        let fields = levels
            .iter()
            .enumerate()
            .map(|(i, level)| {
                (
                    format!("f{i}"),
                    ReconciledField {
                        value: Some("v".into()),
                        agreement_level: *level,
                        contributing_sources: BTreeSet::new(),
                        dissenting_sources: BTreeSet::new(),
                        observation_count: 1,
                        confidence_score: 5,
                    },
                )
            })
            .collect();
        CanonicalEntity {
            entity_id: id.into(),
            fields,
            unscored_fields: BTreeMap::new(),
            completeness_score: completeness,
            overall_confidence: 5,
            quality_band: QualityBand::AcceptableQuality,
            lead_score: 5,
            review_required: review,
            review_reasons: vec![],
            source_record_ids: vec![],
        }
    }

    #[test]
    fn summary_counts() {
        let entities = vec![
            entity("a", 80, false, &[AgreementLevel::Exact, AgreementLevel::Close]),
            entity("b", 40, true, &[AgreementLevel::Exact]),
        ];
        let queue = vec![ReviewEntry {
            entity: entity("c", 0, true, &[AgreementLevel::Conflict]),
            records: vec![],
            reasons: vec![],
        }];
        let rejected = vec![RejectedRecord {
            record_id: "x".into(),
            source_id: None,
            input_index: 4,
            reason: RejectReason::MissingSourceId,
        }];
        let summary = compute_summary(5, 3, &entities, &queue, &rejected);
        assert_eq!(summary.accepted_records, 4);
        assert_eq!(summary.rejected_records, 1);
        assert_eq!(summary.entities, 2);
        assert_eq!(summary.review_queue, 1);
        assert_eq!(summary.flagged_entities, 1);
        assert_eq!(summary.agreement_counts["exact"], 2);
        assert_eq!(summary.agreement_counts["conflict"], 1);
        assert_eq!(summary.mean_completeness, 40.0);
    }
}
