//! Portfolio & Risk Controls (Layer 3)
//!
//! This crate owns the user's risk profile: allocation validation, the
//! consecutive-loss circuit breaker and Kelly position sizing. Everything
//! here is pure; callers decide what to do with the answers.

mod config;
mod risk;
mod sizing;
mod validation;

pub use config::{
    create_config_template, load_config, save_config, CircuitBreakerConfig, RiskProfile,
    StrategyAllocation,
};
pub use risk::{BreakerStatus, CircuitBreaker, TradeOutcome};
pub use sizing::{KellyCalculator, KellyFraction, PositionSize, SizingInputs};
pub use validation::{validate_profile, ValidationIssue, ValidationResult};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Holds the applied risk profile. A candidate only replaces it after
/// passing validation, so the applied profile is always valid.
#[derive(Debug, Clone)]
pub struct PreferencesManager {
    profile: RiskProfile,
}

impl PreferencesManager {
    /// Create a manager with the default profile
    pub fn new() -> Self {
        Self {
            profile: RiskProfile::default(),
        }
    }

    /// Create a manager from a stored profile, rejecting it if invalid
    pub fn with_profile(profile: RiskProfile) -> Result<Self, ValidationResult> {
        let result = validate_profile(&profile);
        if !result.is_valid() {
            return Err(result);
        }
        Ok(Self { profile })
    }

    pub fn profile(&self) -> &RiskProfile {
        &self.profile
    }

    /// Check a candidate without applying it
    pub fn validate(&self, candidate: &RiskProfile) -> ValidationResult {
        validate_profile(candidate)
    }

    /// Apply `candidate` if valid; otherwise keep the current profile
    pub fn apply(&mut self, candidate: RiskProfile) -> ValidationResult {
        let result = validate_profile(&candidate);

        if result.is_valid() {
            self.profile = candidate;
            info!(
                options_pct = self.profile.allocation.options_pct,
                futures_pct = self.profile.allocation.futures_pct,
                crypto_pct = self.profile.allocation.crypto_pct,
                kelly = ?self.profile.kelly_fraction,
                "Risk profile applied"
            );
        } else {
            warn!(
                issues = result.issues.len(),
                allocation_delta = result.allocation_delta,
                "Risk profile rejected, keeping previous"
            );
        }

        result
    }

    pub fn circuit_breaker(&self) -> CircuitBreaker {
        CircuitBreaker::new(
            self.profile.circuit_breaker.clone(),
            self.profile.daily_loss_limit,
        )
    }

    pub fn breaker_status(&self, history: &[TradeOutcome], now: DateTime<Utc>) -> BreakerStatus {
        self.circuit_breaker().evaluate(history, now)
    }

    /// Position size under the profile's Kelly fraction and position cap
    pub fn position_size(&self, inputs: &SizingInputs) -> PositionSize {
        KellyCalculator::new(self.profile.max_position_size).size(self.profile.kelly_fraction, inputs)
    }
}

impl Default for PreferencesManager {
    fn default() -> Self {
        Self::new()
    }
}
