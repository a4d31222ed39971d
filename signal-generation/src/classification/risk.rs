use common::CompositeSignal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::config::RiskBandConfig;

/// Risk label of a trade idea. Independent of the tier: a strong idea can
/// still be speculative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Speculative,
}

impl RiskLevel {
    /// Whether the idea must carry a "research only" disclaimer
    pub fn requires_disclaimer(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Speculative)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Speculative => "speculative",
        }
    }

    /// Lenient parse of upstream labels
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" | "conservative" => Some(RiskLevel::Low),
            "medium" | "moderate" => Some(RiskLevel::Medium),
            "high" | "aggressive" => Some(RiskLevel::High),
            "speculative" | "very_high" | "very high" | "extreme" => Some(RiskLevel::Speculative),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk level for a composite, plus the inputs that were missing.
///
/// A parseable upstream label wins when configured to. Otherwise price,
/// move size and relative volume are banded; with none of them present
/// the level is Medium.
pub fn assess_risk(
    signal: &CompositeSignal,
    composite_score: f64,
    config: &RiskBandConfig,
) -> (RiskLevel, Vec<String>) {
    if config.prefer_upstream_label {
        if let Some(level) = signal.upstream_risk.as_deref().and_then(RiskLevel::from_label) {
            return (level, Vec::new());
        }
    }

    let price = signal.price.filter(|p| p.is_finite());
    let move_pct = signal.change_percent.filter(|c| c.is_finite()).map(f64::abs);
    let relative_volume = signal.relative_volume.filter(|v| v.is_finite());

    if price.is_none() && move_pct.is_none() {
        return (RiskLevel::Medium, vec!["risk_inputs".to_string()]);
    }

    if price.map_or(false, |p| p < config.penny_price)
        || move_pct.map_or(false, |m| m >= config.speculative_move_pct)
    {
        return (RiskLevel::Speculative, Vec::new());
    }

    if move_pct.map_or(false, |m| m >= config.high_move_pct)
        || relative_volume.map_or(false, |v| v >= config.high_relative_volume)
    {
        return (RiskLevel::High, Vec::new());
    }

    if move_pct.map_or(false, |m| m <= config.low_move_pct) && composite_score >= config.low_min_score {
        return (RiskLevel::Low, Vec::new());
    }

    (RiskLevel::Medium, Vec::new())
}
