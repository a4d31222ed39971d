// Kelly Criterion Position Sizing
// Optimal bet sizing from win rate and payoff ratio, scaled by the selected fraction

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Share of the full Kelly bet actually placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KellyFraction {
    /// Full Kelly (most aggressive, highest volatility)
    Full,
    /// Half Kelly (recommended, good balance)
    Half,
    /// Quarter Kelly (conservative)
    Quarter,
}

impl Default for KellyFraction {
    fn default() -> Self {
        KellyFraction::Half
    }
}

impl KellyFraction {
    pub fn multiplier(&self) -> Decimal {
        match self {
            KellyFraction::Full => Decimal::ONE,
            KellyFraction::Half => dec!(0.5),
            KellyFraction::Quarter => dec!(0.25),
        }
    }

    pub fn is_aggressive(&self) -> bool {
        matches!(self, KellyFraction::Full)
    }
}

/// Historical performance feeding the Kelly formula
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingInputs {
    /// Capital available (USD)
    pub bankroll: f64,
    /// 0.0..=1.0
    pub win_rate: f64,
    /// Average winning trade (USD or percent, same unit as `avg_loss`)
    pub avg_win: f64,
    pub avg_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSize {
    pub fraction: KellyFraction,
    /// Unscaled Kelly fraction of bankroll, clamped to 0..=1
    pub full_kelly: Decimal,
    /// Fraction of bankroll after scaling
    pub applied_fraction: Decimal,
    /// Recommended size (USD), after the cap
    pub dollars: Decimal,
    /// Whether `max_position_size` bound the result
    pub capped: bool,
}

/// Kelly Criterion calculator
#[derive(Debug, Clone)]
pub struct KellyCalculator {
    /// Hard cap on any single position (USD)
    pub max_position_size: Decimal,
}

impl KellyCalculator {
    pub fn new(max_position_size: f64) -> Self {
        Self {
            max_position_size: Decimal::from_f64(max_position_size.max(0.0)).unwrap_or(Decimal::ZERO),
        }
    }

    /// Calculate Kelly fraction
    /// Kelly = (bp - q) / b = p - q / b
    /// where:
    ///   b = avg_win / avg_loss
    ///   p = probability of winning
    ///   q = probability of losing (1 - p)
    ///
    /// A payoff ratio beyond `Decimal` range takes the limit `p`.
    pub fn calculate(&self, win_probability: f64, avg_win: Decimal, avg_loss: Decimal) -> Decimal {
        if !(0.0..=1.0).contains(&win_probability) || avg_loss.is_zero() || avg_win <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let p = Decimal::from_f64(win_probability).unwrap_or(Decimal::ZERO);
        let q = Decimal::ONE - p;
        let kelly = match avg_win.checked_div(avg_loss.abs()) {
            Some(b) if b.is_zero() => return Decimal::ZERO,
            Some(b) => match q.checked_div(b) {
                Some(loss_term) => p - loss_term,
                None => return Decimal::ZERO,
            },
            None => p,
        };
        kelly.max(Decimal::ZERO).min(Decimal::ONE)
    }

    /// Recommended position for the given fraction, capped at `max_position_size`
    pub fn size(&self, fraction: KellyFraction, inputs: &SizingInputs) -> PositionSize {
        let to_decimal = |v: f64| {
            if v.is_finite() {
                Decimal::from_f64(v).unwrap_or(Decimal::ZERO)
            } else {
                Decimal::ZERO
            }
        };

        let bankroll = to_decimal(inputs.bankroll).max(Decimal::ZERO);
        let full_kelly = self
            .calculate(inputs.win_rate, to_decimal(inputs.avg_win), to_decimal(inputs.avg_loss))
            .round_dp(6);
        let applied_fraction = (full_kelly * fraction.multiplier()).round_dp(6);

        let uncapped = bankroll
            .checked_mul(applied_fraction)
            .unwrap_or(bankroll)
            .round_dp(2);
        let capped = uncapped > self.max_position_size;
        let dollars = if capped { self.max_position_size } else { uncapped };

        PositionSize {
            fraction,
            full_kelly,
            applied_fraction,
            dollars,
            capped,
        }
    }
}
