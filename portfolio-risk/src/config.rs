//! User risk profile: allocation, per-trade controls, sizing and circuit breaker

use serde::{Deserialize, Serialize};

use crate::sizing::KellyFraction;

/// User-configured risk parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    /// Capital split across strategies (percent, must total 100)
    #[serde(default)]
    pub allocation: StrategyAllocation,

    /// Stop loss per trade (percent of entry)
    #[serde(default = "default_stop_loss")]
    pub stop_loss_pct: f64,

    /// Take profit per trade (percent of entry)
    #[serde(default = "default_take_profit")]
    pub take_profit_pct: f64,

    /// Daily realised loss limit (USD)
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: f64,

    /// Maximum number of open positions
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: u32,

    /// Cap on a single position (USD)
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,

    /// Kelly fraction used for sizing (half by default)
    #[serde(default)]
    pub kelly_fraction: KellyFraction,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for RiskProfile {
    fn default() -> Self {
        Self {
            allocation: StrategyAllocation::default(),
            stop_loss_pct: default_stop_loss(),
            take_profit_pct: default_take_profit(),
            daily_loss_limit: default_daily_loss_limit(),
            max_concurrent_positions: default_max_concurrent_positions(),
            max_position_size: default_max_position_size(),
            kelly_fraction: KellyFraction::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Percent of capital per strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAllocation {
    #[serde(default = "default_options_pct")]
    pub options_pct: f64,

    #[serde(default = "default_futures_pct")]
    pub futures_pct: f64,

    #[serde(default = "default_crypto_pct")]
    pub crypto_pct: f64,
}

impl Default for StrategyAllocation {
    fn default() -> Self {
        Self {
            options_pct: default_options_pct(),
            futures_pct: default_futures_pct(),
            crypto_pct: default_crypto_pct(),
        }
    }
}

impl StrategyAllocation {
    pub fn new(options_pct: f64, futures_pct: f64, crypto_pct: f64) -> Self {
        Self {
            options_pct,
            futures_pct,
            crypto_pct,
        }
    }

    pub fn total(&self) -> f64 {
        self.options_pct + self.futures_pct + self.crypto_pct
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Whether circuit breakers are enabled
    #[serde(default = "default_circuit_breakers_enabled")]
    pub enabled: bool,

    /// Consecutive losing trades that trip the breaker
    #[serde(default = "default_consecutive_losses")]
    pub consecutive_losses: u32,

    /// Cooldown period after circuit breaker trigger (in minutes)
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            consecutive_losses: default_consecutive_losses(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

fn default_options_pct() -> f64 {
    40.0
}

fn default_futures_pct() -> f64 {
    30.0
}

fn default_crypto_pct() -> f64 {
    30.0
}

fn default_stop_loss() -> f64 {
    20.0
}

fn default_take_profit() -> f64 {
    50.0
}

fn default_daily_loss_limit() -> f64 {
    500.0
}

fn default_max_concurrent_positions() -> u32 {
    5
}

fn default_max_position_size() -> f64 {
    1000.0
}

fn default_circuit_breakers_enabled() -> bool {
    true
}

fn default_consecutive_losses() -> u32 {
    3
}

fn default_cooldown_minutes() -> u64 {
    30
}

/// Load a risk profile from a TOML file
pub fn load_config(path: &str) -> anyhow::Result<RiskProfile> {
    let content = std::fs::read_to_string(path)?;
    let profile: RiskProfile = toml::from_str(&content)?;
    Ok(profile)
}

/// Save a risk profile to a TOML file
pub fn save_config(profile: &RiskProfile, path: &str) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(profile)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Create a default risk profile file template
pub fn create_config_template(path: &str) -> anyhow::Result<()> {
    let template = "# Risk Profile
# Allocation, per-trade controls, position sizing and circuit breaker

# Stop loss per trade (percent of entry, 0 < x <= 100)
stop_loss_pct = 20.0

# Take profit per trade (percent of entry, 0 < x <= 100)
take_profit_pct = 50.0

# Daily realised loss limit (USD)
daily_loss_limit = 500.0

# Maximum number of open positions
max_concurrent_positions = 5

# Cap on a single position (USD)
max_position_size = 1000.0

# Kelly fraction: \"full\" (aggressive), \"half\" (default) or \"quarter\"
kelly_fraction = \"half\"

[allocation]
# Percent of capital per strategy; the three must total 100
options_pct = 40.0
futures_pct = 30.0
crypto_pct = 30.0

[circuit_breaker]
# Enable circuit breakers
enabled = true

# Consecutive losing trades that suspend trading
consecutive_losses = 3

# Suspension length after a trip (minutes)
cooldown_minutes = 30
";

    std::fs::write(path, template)?;
    Ok(())
}
