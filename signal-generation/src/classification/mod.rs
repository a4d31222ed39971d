// Classification Engine
// Pure, deterministic mapping from composite signals to tiers, risk levels,
// exit windows and recommendations. No I/O; results are never cached.

pub mod config;
pub mod exit;
pub mod recommendation;
pub mod risk;
pub mod tier;

pub use config::{
    load_config, ClassificationConfig, ExitConfig, RecommendationConfig, RiskBandConfig,
    ScoreConfig, TierBand, TierConfig,
};
pub use exit::{
    assess_exit, evaluate_exit, ExitDecision, ExitInputs, ExitReason, ExitTransition, ExitWindow,
    ThetaUrgency,
};
pub use recommendation::{recommend, Recommendation};
pub use risk::{assess_risk, RiskLevel};
pub use tier::{composite_score, grade_for, Grade, Tier};

use common::CompositeSignal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Classification of one composite signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub symbol: String,
    pub composite_score: f64,
    pub grade: Grade,
    pub tier: Tier,
    pub risk_level: RiskLevel,
    pub exit_window: ExitWindow,
    pub theta_urgency: Option<ThetaUrgency>,
    pub exit_reasons: Vec<ExitReason>,
    /// Position that drove the exit window, when one is open
    pub exit_position_id: Option<String>,
    pub recommendation: Recommendation,
    /// Inputs that were missing and replaced by neutral defaults
    pub degraded_inputs: Vec<String>,
}

impl ClassificationResult {
    pub fn requires_disclaimer(&self) -> bool {
        self.risk_level.requires_disclaimer()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassificationEngine {
    config: ClassificationConfig,
}

impl ClassificationEngine {
    pub fn new(config: ClassificationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassificationConfig {
        &self.config
    }

    pub fn classify(&self, signal: &CompositeSignal) -> ClassificationResult {
        let (score, mut degraded) = composite_score(&signal.scores, &self.config.scores);
        let grade = grade_for(score, &self.config.tiers);

        let (risk_level, risk_degraded) = assess_risk(signal, score, &self.config.risk);
        degraded.extend(risk_degraded);

        // Every open position is evaluated; the most urgent one speaks for the symbol
        let mut exit = ExitDecision::no_position();
        let mut exit_position_id = None;
        let mut probability_missing = false;
        for position in &signal.positions {
            let decision = evaluate_exit(&ExitInputs::from(position), &self.config.exit);
            probability_missing |= decision.reasons.contains(&ExitReason::ExitProbabilityMissing);
            if exit_position_id.is_none()
                || (decision.window, decision.theta_urgency) > (exit.window, exit.theta_urgency)
            {
                exit = decision;
                exit_position_id = Some(position.position_id.clone());
            }
        }
        if probability_missing {
            degraded.push("exit_probability".to_string());
        }

        let recommendation = recommend(score, exit.window, risk_level, &self.config.recommendation);

        debug!(
            symbol = %signal.symbol,
            score = score,
            grade = %grade,
            risk = %risk_level,
            exit = %exit.window,
            "Classified signal"
        );

        ClassificationResult {
            symbol: signal.symbol.clone(),
            composite_score: score,
            grade,
            tier: grade.tier(),
            risk_level,
            exit_window: exit.window,
            theta_urgency: exit.theta_urgency,
            exit_reasons: exit.reasons,
            exit_position_id,
            recommendation,
            degraded_inputs: degraded,
        }
    }

    pub fn classify_all(&self, signals: &[CompositeSignal]) -> Vec<ClassificationResult> {
        signals.iter().map(|s| self.classify(s)).collect()
    }

    pub fn assess_exit(&self, previous: Option<ExitWindow>, inputs: &ExitInputs) -> ExitTransition {
        assess_exit(previous, inputs, &self.config.exit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Momentum, PositionSummary, SubScores};

    fn strong_signal() -> CompositeSignal {
        let mut signal = CompositeSignal::new("NVDA");
        signal.price = Some(120.0);
        signal.change_percent = Some(1.2);
        signal.scores = SubScores {
            technical: Some(92.0),
            fundamental: Some(88.0),
            quant: Some(90.0),
            ml: Some(86.0),
            flow: Some(95.0),
            sentiment: Some(89.0),
        };
        signal
    }

    #[test]
    fn test_identical_inputs_give_identical_results() {
        let engine = ClassificationEngine::default();
        let signal = strong_signal();

        let first = engine.classify(&signal);
        for _ in 0..100 {
            assert_eq!(engine.classify(&signal.clone()), first);
        }
        assert_eq!(
            serde_json::to_string(&engine.classify(&signal)).unwrap(),
            serde_json::to_string(&first).unwrap()
        );
    }

    #[test]
    fn test_strong_signal_without_position() {
        let result = ClassificationEngine::default().classify(&strong_signal());

        assert_eq!(result.grade, Grade::S);
        assert_eq!(result.tier, Tier::S);
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert_eq!(result.exit_window, ExitWindow::Hold);
        assert_eq!(result.exit_reasons, vec![ExitReason::NoOpenPosition]);
        assert_eq!(result.recommendation, Recommendation::StrongBuy);
        assert!(result.degraded_inputs.is_empty());
        assert!(!result.requires_disclaimer());
    }

    #[test]
    fn test_empty_signal_falls_back_to_neutral() {
        let result = ClassificationEngine::default().classify(&CompositeSignal::new("XYZ"));

        assert_eq!(result.composite_score, 50.0);
        assert_eq!(result.grade, Grade::C);
        assert_eq!(result.risk_level, RiskLevel::Medium);
        assert_eq!(result.recommendation, Recommendation::Hold);
        assert_eq!(result.degraded_inputs.len(), 7);
        assert!(result.degraded_inputs.contains(&"risk_inputs".to_string()));
    }

    #[test]
    fn test_urgent_position_overrides_strong_score() {
        let mut signal = strong_signal();
        signal.positions = vec![PositionSummary {
            position_id: "pos-1".to_string(),
            exit_probability: Some(85.0),
            dte_remaining: Some(1),
            momentum: Some(Momentum::Bearish),
            pnl_percent: Some(-12.0),
        }];

        let result = ClassificationEngine::default().classify(&signal);
        assert_eq!(result.exit_window, ExitWindow::Immediate);
        assert_eq!(result.theta_urgency, Some(ThetaUrgency::Critical));
        assert_eq!(result.recommendation, Recommendation::Sell);
        // Tier is independent of exit timing
        assert_eq!(result.tier, Tier::S);
    }

    #[test]
    fn test_most_urgent_position_wins_over_newer_calm_one() {
        let mut signal = strong_signal();
        signal.positions = vec![
            PositionSummary {
                position_id: "expiring".to_string(),
                exit_probability: Some(95.0),
                dte_remaining: Some(0),
                momentum: None,
                pnl_percent: None,
            },
            PositionSummary {
                position_id: "fresh".to_string(),
                exit_probability: Some(5.0),
                dte_remaining: Some(60),
                momentum: None,
                pnl_percent: None,
            },
        ];

        let result = ClassificationEngine::default().classify(&signal);
        assert_eq!(result.exit_window, ExitWindow::Immediate);
        assert_eq!(result.exit_position_id.as_deref(), Some("expiring"));
        assert!(result.exit_reasons.contains(&ExitReason::ExitProbabilityCritical));
        assert!(result.exit_reasons.contains(&ExitReason::ExpirationImminent));
        assert_eq!(result.recommendation, Recommendation::Sell);

        // Order of positions does not matter
        signal.positions.reverse();
        let reversed = ClassificationEngine::default().classify(&signal);
        assert_eq!(reversed.exit_window, ExitWindow::Immediate);
        assert_eq!(reversed.exit_position_id.as_deref(), Some("expiring"));
    }

    #[test]
    fn test_any_position_missing_probability_is_degraded() {
        let mut signal = strong_signal();
        signal.positions = vec![
            PositionSummary {
                position_id: "a".to_string(),
                exit_probability: Some(10.0),
                dte_remaining: None,
                momentum: None,
                pnl_percent: None,
            },
            PositionSummary {
                position_id: "b".to_string(),
                exit_probability: None,
                dte_remaining: None,
                momentum: None,
                pnl_percent: None,
            },
        ];

        let result = ClassificationEngine::default().classify(&signal);
        assert_eq!(result.exit_window, ExitWindow::Hold);
        assert!(result.degraded_inputs.contains(&"exit_probability".to_string()));
    }

    #[test]
    fn test_speculative_idea_carries_disclaimer() {
        let mut signal = strong_signal();
        signal.upstream_risk = Some("speculative".to_string());

        let result = ClassificationEngine::default().classify(&signal);
        assert!(result.requires_disclaimer());
        assert_eq!(result.grade, Grade::S);
        assert_eq!(result.recommendation, Recommendation::Buy);
    }

    #[test]
    fn test_custom_thresholds_change_outcome() {
        let mut config = ClassificationConfig::default();
        config.exit.immediate_probability = 90.0;
        let engine = ClassificationEngine::new(config);

        let transition = engine.assess_exit(
            None,
            &ExitInputs {
                exit_probability: Some(85.0),
                dte_remaining: Some(30),
                momentum: None,
            },
        );
        assert_eq!(transition.to, ExitWindow::Soon);
    }
}
