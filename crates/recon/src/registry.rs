//! Source registry: reliability weight and freshness policy per source.
//!
//! A registry is an immutable snapshot for the duration of a run. Adjustments
//! (e.g. demoting a source that has been returning stale listings) build a new
//! snapshot that the next run picks up.

use std::collections::BTreeMap;

use crate::config::{RecencyConfig, RegistryConfig};

pub const MIN_WEIGHT: u8 = 1;
pub const MAX_WEIGHT: u8 = 10;

const BUILTIN_SOURCES: &[(&str, u8)] = &[
    ("company_website", 10),
    ("state_registry", 9),
    ("yellow_pages", 7),
    ("ai_classifier", 6),
    ("directory_aggregator", 5),
    ("web_crawl", 4),
];

/// When an observation from a source stops earning full recency credit, and
/// when it stops earning any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub fresh_days: u32,
    pub stale_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub weight: u8,
    pub freshness: Option<FreshnessPolicy>,
}

#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: BTreeMap<String, SourceEntry>,
    default_weight: u8,
    default_freshness: FreshnessPolicy,
}

fn clamp_weight(weight: i32) -> u8 {
    weight.clamp(MIN_WEIGHT as i32, MAX_WEIGHT as i32) as u8
}

impl SourceRegistry {
    pub fn new(default_weight: u8, default_freshness: FreshnessPolicy) -> Self {
        Self {
            sources: BTreeMap::new(),
            default_weight: clamp_weight(default_weight as i32),
            default_freshness,
        }
    }

    /// The collectors shipped with the lead pipeline and their baseline trust.
    pub fn builtin() -> Self {
        Self::from_config(&RegistryConfig::default(), &RecencyConfig::default())
    }

    fn with_builtin_sources(mut self) -> Self {
        for (id, weight) in BUILTIN_SOURCES {
            self = self.with_source(id, *weight, None);
        }
        self
    }

    /// Build from the `[registry]` and `[recency]` config sections.
    pub fn from_config(registry: &RegistryConfig, recency: &RecencyConfig) -> Self {
        let default_freshness = FreshnessPolicy {
            fresh_days: recency.fresh_days,
            stale_days: recency.stale_days,
        };
        let mut out = Self::new(registry.default_weight, default_freshness);
        if registry.include_builtin {
            out = out.with_builtin_sources();
        }
        for (id, source) in &registry.sources {
            let freshness = match (source.fresh_days, source.stale_days) {
                (None, None) => None,
                (fresh, stale) => Some(FreshnessPolicy {
                    fresh_days: fresh.unwrap_or(default_freshness.fresh_days),
                    stale_days: stale.unwrap_or(default_freshness.stale_days),
                }),
            };
            out = out.with_source(id, source.weight, freshness);
        }
        out
    }

    /// Snapshot with `source_id` registered (or replaced).
    pub fn with_source(mut self, source_id: &str, weight: u8, freshness: Option<FreshnessPolicy>) -> Self {
        self.sources.insert(
            source_id.to_string(),
            SourceEntry {
                weight: clamp_weight(weight as i32),
                freshness,
            },
        );
        self
    }

    /// Snapshot with `source_id`'s weight shifted by `delta`, clamped to 1..=10.
    /// Unknown sources start from the default weight.
    pub fn adjust_weight(&self, source_id: &str, delta: i32) -> Self {
        let mut next = self.clone();
        let entry = next.sources.entry(source_id.to_string()).or_insert(SourceEntry {
            weight: self.default_weight,
            freshness: None,
        });
        entry.weight = clamp_weight(entry.weight as i32 + delta);
        log::info!("registry: '{source_id}' weight adjusted to {}", entry.weight);
        next
    }

    /// Reliability weight in 1..=10. Unknown sources get the default weight.
    pub fn weight(&self, source_id: &str) -> u8 {
        match self.sources.get(source_id) {
            Some(entry) => entry.weight,
            None => {
                log::debug!("registry: unknown source '{source_id}', using default weight {}", self.default_weight);
                self.default_weight
            }
        }
    }

    pub fn freshness(&self, source_id: &str) -> FreshnessPolicy {
        self.sources
            .get(source_id)
            .and_then(|e| e.freshness)
            .unwrap_or(self.default_freshness)
    }

    pub fn is_known(&self, source_id: &str) -> bool {
        self.sources.contains_key(source_id)
    }

    pub fn default_weight(&self) -> u8 {
        self.default_weight
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;

    fn policy() -> FreshnessPolicy {
        FreshnessPolicy {
            fresh_days: 30,
            stale_days: 365,
        }
    }

    #[test]
    fn unknown_source_gets_default_weight() {
        let reg = SourceRegistry::new(2, policy()).with_source("yellow_pages", 7, None);
        assert_eq!(reg.weight("yellow_pages"), 7);
        assert_eq!(reg.weight("some_new_scraper"), 2);
        assert!(!reg.is_known("some_new_scraper"));
    }

    #[test]
    fn weights_are_clamped() {
        let reg = SourceRegistry::new(0, policy()).with_source("loud", 42, None);
        assert_eq!(reg.default_weight(), 1);
        assert_eq!(reg.weight("loud"), 10);
    }

    #[test]
    fn adjust_builds_a_new_snapshot() {
        let reg = SourceRegistry::builtin();
        let demoted = reg.adjust_weight("yellow_pages", -3);
        assert_eq!(reg.weight("yellow_pages"), 7);
        assert_eq!(demoted.weight("yellow_pages"), 4);

        let floored = demoted.adjust_weight("yellow_pages", -20);
        assert_eq!(floored.weight("yellow_pages"), 1);

        let fresh = reg.adjust_weight("brand_new", 1);
        assert_eq!(fresh.weight("brand_new"), reg.default_weight() + 1);
    }

    #[test]
    fn per_source_freshness_overrides_default() {
        let mut cfg = RegistryConfig::default();
        cfg.sources.insert(
            "state_registry".into(),
            SourceConfig {
                weight: 9,
                fresh_days: Some(180),
                stale_days: None,
            },
        );
        let reg = SourceRegistry::from_config(&cfg, &RecencyConfig::default());
        let p = reg.freshness("state_registry");
        assert_eq!(p.fresh_days, 180);
        assert_eq!(p.stale_days, RecencyConfig::default().stale_days);
        assert_eq!(reg.freshness("other"), reg.freshness("another"));
    }

    #[test]
    fn builtin_has_expected_sources() {
        let reg = SourceRegistry::builtin();
        assert_eq!(reg.weight("company_website"), 10);
        assert_eq!(reg.weight("directory_aggregator"), 5);
        assert_eq!(reg.weight("ai_classifier"), 6);
        assert_eq!(reg.len(), 6);
    }

    #[test]
    fn config_overrides_and_opt_out() {
        let mut cfg = RegistryConfig::default();
        cfg.sources.insert(
            "web_crawl".into(),
            SourceConfig {
                weight: 2,
                fresh_days: None,
                stale_days: None,
            },
        );
        let reg = SourceRegistry::from_config(&cfg, &RecencyConfig::default());
        assert_eq!(reg.weight("web_crawl"), 2);
        assert_eq!(reg.weight("company_website"), 10);

        cfg.include_builtin = false;
        let bare = SourceRegistry::from_config(&cfg, &RecencyConfig::default());
        assert_eq!(bare.len(), 1);
        assert!(!bare.is_known("company_website"));
    }
}
