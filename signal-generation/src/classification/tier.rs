use common::SubScores;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::config::{ScoreConfig, TierConfig};

/// Letter tier, coarsest rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    S,
    A,
    B,
    C,
    D,
}

/// Tier with +/- refinement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    S,
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "B+")]
    BPlus,
    B,
    #[serde(rename = "B-")]
    BMinus,
    #[serde(rename = "C+")]
    CPlus,
    C,
    #[serde(rename = "C-")]
    CMinus,
    D,
}

impl Grade {
    pub fn tier(&self) -> Tier {
        match self {
            Grade::S => Tier::S,
            Grade::APlus | Grade::A | Grade::AMinus => Tier::A,
            Grade::BPlus | Grade::B | Grade::BMinus => Tier::B,
            Grade::CPlus | Grade::C | Grade::CMinus => Tier::C,
            Grade::D => Tier::D,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Grade::S => "S",
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::AMinus => "A-",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::BMinus => "B-",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::CMinus => "C-",
            Grade::D => "D",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Weighted composite of the six sub-scores.
///
/// Missing or non-finite sub-scores take the neutral score and are reported
/// by name. Present values are clamped to 0..=100.
pub fn composite_score(scores: &SubScores, config: &ScoreConfig) -> (f64, Vec<String>) {
    let mut degraded = Vec::new();
    let mut weighted = 0.0;
    let mut total_weight = 0.0;

    for ((name, value), weight) in scores.entries().into_iter().zip(config.weights()) {
        let weight = weight.max(0.0);
        let value = match value {
            Some(v) if v.is_finite() => v.clamp(0.0, 100.0),
            _ => {
                degraded.push(name.to_string());
                config.neutral_score
            }
        };
        weighted += value * weight;
        total_weight += weight;
    }

    if total_weight <= 0.0 {
        return (config.neutral_score, degraded);
    }

    (weighted / total_weight, degraded)
}

/// Highest band whose floor the score reaches
pub fn grade_for(score: f64, config: &TierConfig) -> Grade {
    config
        .bands
        .iter()
        .filter(|band| score >= band.min_score)
        .max_by(|a, b| a.min_score.total_cmp(&b.min_score))
        .map(|band| band.grade)
        .unwrap_or(Grade::D)
}
