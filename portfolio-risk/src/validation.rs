//! Preference validation: allocation total and field ranges

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RiskProfile;

/// Allocations may differ from 100 by at most this much (float noise)
const ALLOCATION_TOLERANCE: f64 = 1e-9;

/// Why a risk profile was rejected
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ValidationIssue {
    #[error("strategy allocations total {total}% (off by {delta:+}%)")]
    AllocationSum { total: f64, delta: f64 },

    #[error("{field} = {value} is outside {range}")]
    OutOfRange {
        field: String,
        value: f64,
        range: String,
    },

    #[error("{field} is not a finite number")]
    NotFinite { field: String },

    #[error("{field} must be at least {min}")]
    BelowMinimum { field: String, value: f64, min: f64 },
}

/// Outcome of validating a candidate profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub allocation_total: f64,
    /// `total - 100`: positive means over-allocated
    pub allocation_delta: f64,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

enum Bound {
    /// [lo, hi]
    Closed(f64, f64),
    /// (lo, hi]
    LeftOpen(f64, f64),
}

impl Bound {
    fn contains(&self, value: f64) -> bool {
        match *self {
            Bound::Closed(lo, hi) => value >= lo && value <= hi,
            Bound::LeftOpen(lo, hi) => value > lo && value <= hi,
        }
    }

    fn describe(&self) -> String {
        match *self {
            Bound::Closed(lo, hi) => format!("[{}, {}]", lo, hi),
            Bound::LeftOpen(lo, hi) => format!("({}, {}]", lo, hi),
        }
    }
}

fn check(issues: &mut Vec<ValidationIssue>, field: &str, value: f64, bound: Bound) {
    if !value.is_finite() {
        issues.push(ValidationIssue::NotFinite {
            field: field.to_string(),
        });
    } else if !bound.contains(value) {
        issues.push(ValidationIssue::OutOfRange {
            field: field.to_string(),
            value,
            range: bound.describe(),
        });
    }
}

/// Validate a candidate profile without applying it
pub fn validate_profile(profile: &RiskProfile) -> ValidationResult {
    let mut issues = Vec::new();
    let allocation = &profile.allocation;

    check(&mut issues, "allocation.options_pct", allocation.options_pct, Bound::Closed(0.0, 100.0));
    check(&mut issues, "allocation.futures_pct", allocation.futures_pct, Bound::Closed(0.0, 100.0));
    check(&mut issues, "allocation.crypto_pct", allocation.crypto_pct, Bound::Closed(0.0, 100.0));

    let total = allocation.total();
    let delta = total - 100.0;
    if total.is_finite() && delta.abs() > ALLOCATION_TOLERANCE {
        issues.push(ValidationIssue::AllocationSum { total, delta });
    }

    check(&mut issues, "stop_loss_pct", profile.stop_loss_pct, Bound::LeftOpen(0.0, 100.0));
    check(&mut issues, "take_profit_pct", profile.take_profit_pct, Bound::LeftOpen(0.0, 100.0));

    for (field, value) in [
        ("daily_loss_limit", profile.daily_loss_limit),
        ("max_position_size", profile.max_position_size),
    ] {
        if !value.is_finite() {
            issues.push(ValidationIssue::NotFinite {
                field: field.to_string(),
            });
        } else if value < 0.0 {
            issues.push(ValidationIssue::BelowMinimum {
                field: field.to_string(),
                value,
                min: 0.0,
            });
        }
    }

    if profile.max_concurrent_positions < 1 {
        issues.push(ValidationIssue::BelowMinimum {
            field: "max_concurrent_positions".to_string(),
            value: profile.max_concurrent_positions as f64,
            min: 1.0,
        });
    }

    if profile.circuit_breaker.enabled && profile.circuit_breaker.consecutive_losses < 1 {
        issues.push(ValidationIssue::BelowMinimum {
            field: "circuit_breaker.consecutive_losses".to_string(),
            value: profile.circuit_breaker.consecutive_losses as f64,
            min: 1.0,
        });
    }

    ValidationResult {
        valid: issues.is_empty(),
        allocation_total: total,
        allocation_delta: delta,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyAllocation;

    fn with_allocation(options: f64, futures: f64, crypto: f64) -> RiskProfile {
        RiskProfile {
            allocation: StrategyAllocation::new(options, futures, crypto),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_profile_is_valid() {
        let result = validate_profile(&RiskProfile::default());
        assert!(result.is_valid());
        assert_eq!(result.allocation_delta, 0.0);
    }

    #[test]
    fn test_allocation_must_total_100() {
        let result = validate_profile(&with_allocation(50.0, 30.0, 30.0));
        assert!(!result.is_valid());
        assert_eq!(result.allocation_total, 110.0);
        assert_eq!(result.allocation_delta, 10.0);
        assert_eq!(
            result.issues,
            vec![ValidationIssue::AllocationSum {
                total: 110.0,
                delta: 10.0
            }]
        );

        let under = validate_profile(&with_allocation(20.0, 30.0, 30.0));
        assert_eq!(under.allocation_delta, -20.0);
        assert!(!under.is_valid());
    }

    #[test]
    fn test_allocation_tolerates_float_noise() {
        let result = validate_profile(&with_allocation(33.3, 33.3, 33.4));
        assert!(result.is_valid(), "{:?}", result.issues);
    }

    #[test]
    fn test_out_of_range_percentage_rejected_even_if_total_is_100() {
        let result = validate_profile(&with_allocation(120.0, -20.0, 0.0));
        assert!(!result.is_valid());
        assert_eq!(result.issues.len(), 2);
        assert!(matches!(
            &result.issues[0],
            ValidationIssue::OutOfRange { field, .. } if field == "allocation.options_pct"
        ));
    }

    #[test]
    fn test_per_trade_ranges() {
        let profile = RiskProfile {
            stop_loss_pct: 0.0,
            take_profit_pct: 150.0,
            daily_loss_limit: -1.0,
            max_concurrent_positions: 0,
            ..Default::default()
        };

        let result = validate_profile(&profile);
        assert_eq!(result.issues.len(), 4);
        assert_eq!(
            result.issues[0].to_string(),
            "stop_loss_pct = 0 is outside (0, 100]"
        );
    }

    #[test]
    fn test_nan_rejected() {
        let profile = RiskProfile {
            max_position_size: f64::NAN,
            ..Default::default()
        };
        let result = validate_profile(&profile);
        assert_eq!(
            result.issues,
            vec![ValidationIssue::NotFinite {
                field: "max_position_size".to_string()
            }]
        );
    }
}
