//! Layered service settings: defaults, then `dashboard.toml`, then `DASHBOARD__*` env

use anyhow::Context;
use data_ingestion::IngestionConfig;
use serde::{Deserialize, Serialize};
use signal_generation::{ClassificationConfig, ViewKind};

use crate::views::ViewParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSettings {
    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub classification: ClassificationConfig,

    /// Optional TOML risk profile loaded at startup
    #[serde(default)]
    pub risk_profile_path: Option<String>,

    /// Bots whose status is polled
    #[serde(default = "default_bots")]
    pub bots: Vec<String>,

    /// Views subscribed at startup
    #[serde(default = "default_views")]
    pub views: Vec<ViewKind>,

    #[serde(default)]
    pub view_params: ViewParams,

    /// Seconds between classification summaries in the service log
    #[serde(default = "default_summary_interval")]
    pub summary_interval_secs: u64,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            ingestion: IngestionConfig::default(),
            classification: ClassificationConfig::default(),
            risk_profile_path: None,
            bots: default_bots(),
            views: default_views(),
            view_params: ViewParams::default(),
            summary_interval_secs: default_summary_interval(),
        }
    }
}

fn default_bots() -> Vec<String> {
    vec!["options".to_string(), "futures".to_string(), "crypto".to_string()]
}

fn default_views() -> Vec<ViewKind> {
    vec![ViewKind::SmartMoney, ViewKind::Watchlist, ViewKind::Positions]
}

fn default_summary_interval() -> u64 {
    60
}

/// Load settings from an optional file plus environment overrides.
///
/// `DASHBOARD__INGESTION__BASE_URL=http://...` overrides `ingestion.base_url`.
pub fn load_settings(path: &str) -> anyhow::Result<DashboardSettings> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("DASHBOARD")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to read settings from {}", path))?;

    let settings: DashboardSettings = settings
        .try_deserialize()
        .context("Invalid dashboard settings")?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = load_settings("/nonexistent/dashboard-settings").unwrap();
        assert_eq!(settings.bots.len(), 3);
        assert_eq!(settings.ingestion.base_url, "http://localhost:5000");
        assert_eq!(settings.views, default_views());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("dashboard-settings-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
            bots = ["crypto"]
            views = ["surge"]

            [ingestion]
            base_url = "http://upstream:9000"

            [ingestion.cadences]
            fast_secs = 15

            [classification.exit]
            immediate_probability = 90.0
            "#,
        )
        .unwrap();

        let settings = load_settings(&path.to_string_lossy()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.bots, vec!["crypto"]);
        assert_eq!(settings.views, vec![ViewKind::Surge]);
        assert_eq!(settings.ingestion.base_url, "http://upstream:9000");
        assert_eq!(settings.ingestion.cadences.fast_secs, 15);
        assert_eq!(settings.ingestion.cadences.slow_secs, 300);
        assert_eq!(settings.classification.exit.immediate_probability, 90.0);
    }
}
