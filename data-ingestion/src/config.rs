//! Ingestion configuration: upstream location, cadences and timeouts

use common::{CadenceClass, SourceKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Base URL of the upstream API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Upper bound for a single upstream call (milliseconds)
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// `stale_after = interval * stale_multiplier` unless a registration says otherwise
    #[serde(default = "default_stale_multiplier")]
    pub stale_multiplier: f64,

    #[serde(default)]
    pub cadences: CadenceConfig,

    #[serde(default = "default_event_capacity")]
    pub event_bus_capacity: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            stale_multiplier: default_stale_multiplier(),
            cadences: CadenceConfig::default(),
            event_bus_capacity: default_event_capacity(),
        }
    }
}

impl IngestionConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Poll interval for a source, honouring per-source overrides
    pub fn interval_for(&self, source: SourceKind) -> Duration {
        self.cadences.interval_for(source)
    }

    pub fn stale_after_for(&self, interval: Duration) -> Duration {
        interval.mul_f64(self.stale_multiplier.max(1.0))
    }

    /// Timeout for a fetch scheduled at `interval`: always shorter than the
    /// interval so a hung call cannot overlap the next tick.
    pub fn timeout_for(&self, interval: Duration) -> Duration {
        self.fetch_timeout().min(interval.mul_f64(0.8))
    }
}

/// Refresh cadence per class, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default = "default_fast_secs")]
    pub fast_secs: u64,

    #[serde(default = "default_medium_secs")]
    pub medium_secs: u64,

    #[serde(default = "default_slow_secs")]
    pub slow_secs: u64,

    /// Per-source overrides in seconds
    #[serde(default)]
    pub overrides: HashMap<SourceKind, u64>,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            fast_secs: default_fast_secs(),
            medium_secs: default_medium_secs(),
            slow_secs: default_slow_secs(),
            overrides: HashMap::new(),
        }
    }
}

impl CadenceConfig {
    pub fn class_interval(&self, class: CadenceClass) -> Duration {
        let secs = match class {
            CadenceClass::Fast => self.fast_secs,
            CadenceClass::Medium => self.medium_secs,
            CadenceClass::Slow => self.slow_secs,
        };
        Duration::from_secs(secs.max(1))
    }

    pub fn interval_for(&self, source: SourceKind) -> Duration {
        match self.overrides.get(&source) {
            Some(secs) => Duration::from_secs((*secs).max(1)),
            None => self.class_interval(source.cadence_class()),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_stale_multiplier() -> f64 {
    2.0
}

fn default_event_capacity() -> usize {
    256
}

fn default_fast_secs() -> u64 {
    30
}

fn default_medium_secs() -> u64 {
    120
}

fn default_slow_secs() -> u64 {
    300
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<IngestionConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: IngestionConfig = toml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cadences() {
        let config = IngestionConfig::default();
        assert_eq!(config.interval_for(SourceKind::Quote), Duration::from_secs(30));
        assert_eq!(config.interval_for(SourceKind::SectorAggregates), Duration::from_secs(120));
        assert_eq!(config.interval_for(SourceKind::ReportPreview), Duration::from_secs(300));
    }

    #[test]
    fn test_timeout_shorter_than_interval() {
        let config = IngestionConfig::default();
        let fast = Duration::from_secs(5);
        assert_eq!(config.timeout_for(fast), Duration::from_secs(4));
        assert_eq!(config.timeout_for(Duration::from_secs(300)), Duration::from_secs(10));
    }

    #[test]
    fn test_overrides_from_toml() {
        let config: IngestionConfig = toml::from_str(
            r#"
            base_url = "http://upstream:8080"

            [cadences]
            fast_secs = 45

            [cadences.overrides]
            whale_flow = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url, "http://upstream:8080");
        assert_eq!(config.interval_for(SourceKind::BotStatus), Duration::from_secs(45));
        assert_eq!(config.interval_for(SourceKind::WhaleFlow), Duration::from_secs(60));
        assert_eq!(config.interval_for(SourceKind::InsiderFeed), Duration::from_secs(300));
        assert_eq!(config.stale_multiplier, 2.0);
    }
}
