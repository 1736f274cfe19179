//! Live algorithm catalog, the system of record for [`AlgorithmConfig`].

use dashmap::DashMap;
use pf_types::{AlgorithmConfig, Parameters, PfResult};
use tracing::debug;

/// Trait for the catalog the pattern recognizer reads its live config from
pub trait AlgorithmCatalog: Send + Sync + std::fmt::Debug {
    fn get(&self, algorithm_key: &str) -> Option<AlgorithmConfig>;

    /// All entries, ordered by key
    fn list(&self) -> Vec<AlgorithmConfig>;

    fn list_active(&self) -> Vec<AlgorithmConfig> {
        self.list().into_iter().filter(|c| c.is_active).collect()
    }

    fn upsert(&self, config: AlgorithmConfig);

    fn remove(&self, algorithm_key: &str) -> Option<AlgorithmConfig>;

    /// Push an activated version's payload into the live config.
    fn apply_version(&self, algorithm_key: &str, code: &str, parameters: &Parameters) -> PfResult<()>;
}

/// Thread-safe in-process catalog
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    entries: DashMap<String, AlgorithmConfig>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog seeded with the built-in candlestick patterns
    pub fn with_defaults() -> Self {
        let catalog = Self::new();
        for config in default_algorithms() {
            catalog.upsert(config);
        }
        catalog
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AlgorithmCatalog for InMemoryCatalog {
    fn get(&self, algorithm_key: &str) -> Option<AlgorithmConfig> {
        self.entries.get(algorithm_key).map(|e| e.value().clone())
    }

    fn list(&self) -> Vec<AlgorithmConfig> {
        let mut all: Vec<AlgorithmConfig> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.english_name.cmp(&b.english_name));
        all
    }

    fn upsert(&self, config: AlgorithmConfig) {
        self.entries.insert(config.english_name.clone(), config);
    }

    fn remove(&self, algorithm_key: &str) -> Option<AlgorithmConfig> {
        self.entries.remove(algorithm_key).map(|(_, v)| v)
    }

    fn apply_version(&self, algorithm_key: &str, code: &str, parameters: &Parameters) -> PfResult<()> {
        let mut entry = self
            .entries
            .entry(algorithm_key.to_string())
            .or_insert_with(|| AlgorithmConfig::new(algorithm_key, algorithm_key, "custom", "neutral"));
        entry.code = code.to_string();
        entry.parameters = parameters.clone();
        debug!(algorithm = algorithm_key, "catalog updated from version");
        Ok(())
    }
}

/// Default configurations for the built-in candlestick patterns
pub fn default_algorithms() -> Vec<AlgorithmConfig> {
    vec![
        AlgorithmConfig::new("hammer", "Hammer", "reversal", "buy")
            .with_parameter("threshold", 0.5)
            .with_parameter("body_ratio", 0.35)
            .with_parameter("shadow_ratio", 2.0)
            .with_parameter("lookback", 5_i64)
            .with_parameter("require_trend", true),
        AlgorithmConfig::new("shooting_star", "Shooting Star", "reversal", "sell")
            .with_parameter("threshold", 0.5)
            .with_parameter("body_ratio", 0.35)
            .with_parameter("shadow_ratio", 2.0)
            .with_parameter("lookback", 5_i64)
            .with_parameter("require_trend", true),
        AlgorithmConfig::new("doji", "Doji", "indecision", "neutral")
            .with_parameter("threshold", 0.5)
            .with_parameter("body_ratio", 0.1),
        AlgorithmConfig::new("bullish_engulfing", "Bullish Engulfing", "reversal", "buy")
            .with_parameter("threshold", 0.5)
            .with_parameter("min_body_ratio", 1.0)
            .with_parameter("use_volume", false),
        AlgorithmConfig::new("bearish_engulfing", "Bearish Engulfing", "reversal", "sell")
            .with_parameter("threshold", 0.5)
            .with_parameter("min_body_ratio", 1.0)
            .with_parameter("use_volume", false),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::BUILTIN_PATTERNS;
    use pf_types::{parameters, ParamValue};

    #[test]
    fn defaults_cover_builtin_patterns() {
        let catalog = InMemoryCatalog::with_defaults();
        assert_eq!(catalog.len(), BUILTIN_PATTERNS.len());
        for key in BUILTIN_PATTERNS {
            assert!(catalog.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn list_is_sorted_and_filters_inactive() {
        let catalog = InMemoryCatalog::with_defaults();
        let mut doji = catalog.get("doji").unwrap();
        doji.is_active = false;
        catalog.upsert(doji);

        let keys: Vec<String> = catalog.list().into_iter().map(|c| c.english_name).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(catalog.list_active().len(), BUILTIN_PATTERNS.len() - 1);
    }

    #[test]
    fn apply_version_overwrites_live_parameters() {
        let catalog = InMemoryCatalog::with_defaults();
        let params = parameters([("threshold", 0.8)]);
        catalog.apply_version("hammer", "{\"threshold\":0.8}", &params).unwrap();

        let hammer = catalog.get("hammer").unwrap();
        assert_eq!(hammer.parameters.get("threshold"), Some(&ParamValue::Float(0.8)));
        assert_eq!(hammer.code, "{\"threshold\":0.8}");
    }

    #[test]
    fn apply_version_creates_unknown_entries() {
        let catalog = InMemoryCatalog::new();
        catalog.apply_version("custom_rule", "", &Parameters::new()).unwrap();
        assert!(catalog.get("custom_rule").is_some());
    }
}
