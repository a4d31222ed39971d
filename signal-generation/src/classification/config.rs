// Classification thresholds
// Every cutoff the engine applies lives here so it can be tuned from TOML

use serde::{Deserialize, Serialize};

use super::tier::Grade;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClassificationConfig {
    #[serde(default)]
    pub scores: ScoreConfig,

    #[serde(default)]
    pub tiers: TierConfig,

    #[serde(default)]
    pub risk: RiskBandConfig,

    #[serde(default)]
    pub exit: ExitConfig,

    #[serde(default)]
    pub recommendation: RecommendationConfig,
}

/// Composite score weighting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreConfig {
    /// Substituted for any missing sub-score
    #[serde(default = "default_neutral_score")]
    pub neutral_score: f64,

    #[serde(default = "default_weight")]
    pub technical_weight: f64,

    #[serde(default = "default_weight")]
    pub fundamental_weight: f64,

    #[serde(default = "default_weight")]
    pub quant_weight: f64,

    #[serde(default = "default_weight")]
    pub ml_weight: f64,

    #[serde(default = "default_weight")]
    pub flow_weight: f64,

    #[serde(default = "default_weight")]
    pub sentiment_weight: f64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            neutral_score: default_neutral_score(),
            technical_weight: default_weight(),
            fundamental_weight: default_weight(),
            quant_weight: default_weight(),
            ml_weight: default_weight(),
            flow_weight: default_weight(),
            sentiment_weight: default_weight(),
        }
    }
}

impl ScoreConfig {
    /// Weights in `SubScores::entries` order
    pub fn weights(&self) -> [f64; 6] {
        [
            self.technical_weight,
            self.fundamental_weight,
            self.quant_weight,
            self.ml_weight,
            self.flow_weight,
            self.sentiment_weight,
        ]
    }
}

/// Minimum composite score per grade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierBand {
    pub grade: Grade,
    pub min_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Checked highest `min_score` first; anything below every band is D
    #[serde(default = "default_tier_bands")]
    pub bands: Vec<TierBand>,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            bands: default_tier_bands(),
        }
    }
}

/// Cutoffs used when the upstream did not label the risk itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBandConfig {
    /// Trust a parseable upstream label over the derived one
    #[serde(default = "default_true")]
    pub prefer_upstream_label: bool,

    /// Below this price the idea is speculative
    #[serde(default = "default_penny_price")]
    pub penny_price: f64,

    /// Absolute daily move (%) at or above which the idea is speculative
    #[serde(default = "default_speculative_move")]
    pub speculative_move_pct: f64,

    /// Absolute daily move (%) at or above which the idea is high risk
    #[serde(default = "default_high_move")]
    pub high_move_pct: f64,

    /// Relative volume at or above which the idea is high risk
    #[serde(default = "default_high_relative_volume")]
    pub high_relative_volume: f64,

    /// Absolute move (%) at or below which a strong idea is low risk
    #[serde(default = "default_low_move")]
    pub low_move_pct: f64,

    /// Composite score needed for low risk
    #[serde(default = "default_low_min_score")]
    pub low_min_score: f64,
}

impl Default for RiskBandConfig {
    fn default() -> Self {
        Self {
            prefer_upstream_label: true,
            penny_price: default_penny_price(),
            speculative_move_pct: default_speculative_move(),
            high_move_pct: default_high_move(),
            high_relative_volume: default_high_relative_volume(),
            low_move_pct: default_low_move(),
            low_min_score: default_low_min_score(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitConfig {
    /// Exit probability strictly above this is immediate
    #[serde(default = "default_immediate_probability")]
    pub immediate_probability: f64,

    /// DTE at or below this is immediate
    #[serde(default = "default_critical_dte")]
    pub critical_dte: i64,

    #[serde(default = "default_soon_probability")]
    pub soon_probability: f64,

    #[serde(default = "default_watch_probability")]
    pub watch_probability: f64,

    /// Theta urgency buckets (DTE upper bounds, inclusive)
    #[serde(default = "default_theta_critical")]
    pub theta_critical_dte: i64,

    #[serde(default = "default_theta_high")]
    pub theta_high_dte: i64,

    #[serde(default = "default_theta_moderate")]
    pub theta_moderate_dte: i64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            immediate_probability: default_immediate_probability(),
            critical_dte: default_critical_dte(),
            soon_probability: default_soon_probability(),
            watch_probability: default_watch_probability(),
            theta_critical_dte: default_theta_critical(),
            theta_high_dte: default_theta_high(),
            theta_moderate_dte: default_theta_moderate(),
        }
    }
}

/// Composite score floors per recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationConfig {
    #[serde(default = "default_strong_buy")]
    pub strong_buy_min: f64,

    #[serde(default = "default_buy")]
    pub buy_min: f64,

    #[serde(default = "default_hold")]
    pub hold_min: f64,

    #[serde(default = "default_sell")]
    pub sell_min: f64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            strong_buy_min: default_strong_buy(),
            buy_min: default_buy(),
            hold_min: default_hold(),
            sell_min: default_sell(),
        }
    }
}

fn default_neutral_score() -> f64 {
    50.0
}

fn default_weight() -> f64 {
    1.0
}

fn default_tier_bands() -> Vec<TierBand> {
    [
        (Grade::S, 90.0),
        (Grade::APlus, 85.0),
        (Grade::A, 80.0),
        (Grade::AMinus, 75.0),
        (Grade::BPlus, 70.0),
        (Grade::B, 65.0),
        (Grade::BMinus, 60.0),
        (Grade::CPlus, 55.0),
        (Grade::C, 50.0),
        (Grade::CMinus, 45.0),
    ]
    .into_iter()
    .map(|(grade, min_score)| TierBand { grade, min_score })
    .collect()
}

fn default_true() -> bool {
    true
}

fn default_penny_price() -> f64 {
    5.0
}

fn default_speculative_move() -> f64 {
    20.0
}

fn default_high_move() -> f64 {
    8.0
}

fn default_high_relative_volume() -> f64 {
    3.0
}

fn default_low_move() -> f64 {
    2.0
}

fn default_low_min_score() -> f64 {
    70.0
}

fn default_immediate_probability() -> f64 {
    80.0
}

fn default_critical_dte() -> i64 {
    1
}

fn default_soon_probability() -> f64 {
    60.0
}

fn default_watch_probability() -> f64 {
    40.0
}

fn default_theta_critical() -> i64 {
    2
}

fn default_theta_high() -> i64 {
    7
}

fn default_theta_moderate() -> i64 {
    21
}

fn default_strong_buy() -> f64 {
    80.0
}

fn default_buy() -> f64 {
    65.0
}

fn default_hold() -> f64 {
    45.0
}

fn default_sell() -> f64 {
    30.0
}

/// Load classification thresholds from a TOML file
pub fn load_config(path: &str) -> anyhow::Result<ClassificationConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: ClassificationConfig = toml::from_str(&content)?;
    Ok(config)
}
