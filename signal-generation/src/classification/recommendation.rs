use serde::{Deserialize, Serialize};
use std::fmt;

use super::config::RecommendationConfig;
use super::exit::ExitWindow;
use super::risk::RiskLevel;

/// Action label, most bearish first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StrongSell,
    Sell,
    Hold,
    Buy,
    StrongBuy,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::StrongSell => "strong_sell",
            Recommendation::Sell => "sell",
            Recommendation::Hold => "hold",
            Recommendation::Buy => "buy",
            Recommendation::StrongBuy => "strong_buy",
        }
    }

    pub fn from_score(score: f64, config: &RecommendationConfig) -> Self {
        match score {
            s if s >= config.strong_buy_min => Recommendation::StrongBuy,
            s if s >= config.buy_min => Recommendation::Buy,
            s if s >= config.hold_min => Recommendation::Hold,
            s if s >= config.sell_min => Recommendation::Sell,
            _ => Recommendation::StrongSell,
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score band, then capped by exit urgency and risk:
/// an immediate exit is at most Sell, a soon exit at most Hold, and a
/// speculative idea is never a StrongBuy.
pub fn recommend(
    score: f64,
    exit: ExitWindow,
    risk: RiskLevel,
    config: &RecommendationConfig,
) -> Recommendation {
    let mut rec = Recommendation::from_score(score, config);

    let exit_cap = match exit {
        ExitWindow::Immediate => Recommendation::Sell,
        ExitWindow::Soon => Recommendation::Hold,
        ExitWindow::Watch | ExitWindow::Hold => Recommendation::StrongBuy,
    };
    rec = rec.min(exit_cap);

    if risk == RiskLevel::Speculative {
        rec = rec.min(Recommendation::Buy);
    }

    rec
}
