// Exit-window state machine
// Hold -> Watch -> Soon -> Immediate, driven by exit probability, DTE and momentum

use common::{Momentum, PositionSummary};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::config::ExitConfig;

/// How urgently a position should be exited, least urgent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitWindow {
    Hold,
    Watch,
    Soon,
    Immediate,
}

impl ExitWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitWindow::Hold => "hold",
            ExitWindow::Watch => "watch",
            ExitWindow::Soon => "soon",
            ExitWindow::Immediate => "immediate",
        }
    }
}

impl fmt::Display for ExitWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-decay pressure bucket, from days to expiration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThetaUrgency {
    Low,
    Moderate,
    High,
    Critical,
}

impl ThetaUrgency {
    pub fn from_dte(dte: i64, config: &ExitConfig) -> Self {
        if dte <= config.theta_critical_dte {
            ThetaUrgency::Critical
        } else if dte <= config.theta_high_dte {
            ThetaUrgency::High
        } else if dte <= config.theta_moderate_dte {
            ThetaUrgency::Moderate
        } else {
            ThetaUrgency::Low
        }
    }
}

/// Machine-readable explanation attached to every exit decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    ExitProbabilityCritical,
    ExpirationImminent,
    ExitProbabilityHigh,
    ThetaCritical,
    ThetaHighBearishMomentum,
    ExitProbabilityElevated,
    ThetaHigh,
    BearishMomentum,
    ExitProbabilityMissing,
    NoOpenPosition,
    NoTrigger,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::ExitProbabilityCritical => "exit_probability_critical",
            ExitReason::ExpirationImminent => "expiration_imminent",
            ExitReason::ExitProbabilityHigh => "exit_probability_high",
            ExitReason::ThetaCritical => "theta_critical",
            ExitReason::ThetaHighBearishMomentum => "theta_high_bearish_momentum",
            ExitReason::ExitProbabilityElevated => "exit_probability_elevated",
            ExitReason::ThetaHigh => "theta_high",
            ExitReason::BearishMomentum => "bearish_momentum",
            ExitReason::ExitProbabilityMissing => "exit_probability_missing",
            ExitReason::NoOpenPosition => "no_open_position",
            ExitReason::NoTrigger => "no_trigger",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition inputs for one position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExitInputs {
    /// 0..=100
    pub exit_probability: Option<f64>,
    /// Option positions only
    pub dte_remaining: Option<i64>,
    pub momentum: Option<Momentum>,
}

impl From<&PositionSummary> for ExitInputs {
    fn from(position: &PositionSummary) -> Self {
        Self {
            exit_probability: position.exit_probability,
            dte_remaining: position.dte_remaining,
            momentum: position.momentum,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitDecision {
    pub window: ExitWindow,
    pub theta_urgency: Option<ThetaUrgency>,
    pub reasons: Vec<ExitReason>,
}

impl ExitDecision {
    /// Decision for a symbol with no open position
    pub fn no_position() -> Self {
        Self {
            window: ExitWindow::Hold,
            theta_urgency: None,
            reasons: vec![ExitReason::NoOpenPosition],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitTransition {
    pub from: Option<ExitWindow>,
    pub to: ExitWindow,
    pub theta_urgency: Option<ThetaUrgency>,
    pub reasons: Vec<ExitReason>,
}

impl ExitTransition {
    pub fn changed(&self) -> bool {
        self.from != Some(self.to)
    }

    pub fn escalated(&self) -> bool {
        self.from.map_or(true, |from| self.to > from)
    }
}

/// Evaluate the exit window for one position.
///
/// The highest window with a firing rule wins; every firing rule at that
/// level is listed. A missing exit probability disables the probability
/// rules and is itself reported.
pub fn evaluate_exit(inputs: &ExitInputs, config: &ExitConfig) -> ExitDecision {
    let probability = inputs
        .exit_probability
        .filter(|p| p.is_finite())
        .map(|p| p.clamp(0.0, 100.0));
    let theta = inputs
        .dte_remaining
        .map(|dte| ThetaUrgency::from_dte(dte, config));
    let bearish = inputs.momentum == Some(Momentum::Bearish);

    let mut immediate = Vec::new();
    if probability.map_or(false, |p| p > config.immediate_probability) {
        immediate.push(ExitReason::ExitProbabilityCritical);
    }
    if inputs.dte_remaining.map_or(false, |dte| dte <= config.critical_dte) {
        immediate.push(ExitReason::ExpirationImminent);
    }

    let mut soon = Vec::new();
    if probability.map_or(false, |p| p >= config.soon_probability) {
        soon.push(ExitReason::ExitProbabilityHigh);
    }
    if theta == Some(ThetaUrgency::Critical) {
        soon.push(ExitReason::ThetaCritical);
    }
    if theta == Some(ThetaUrgency::High) && bearish {
        soon.push(ExitReason::ThetaHighBearishMomentum);
    }

    let mut watch = Vec::new();
    if probability.map_or(false, |p| p >= config.watch_probability) {
        watch.push(ExitReason::ExitProbabilityElevated);
    }
    if theta == Some(ThetaUrgency::High) && !bearish {
        watch.push(ExitReason::ThetaHigh);
    }
    if bearish {
        watch.push(ExitReason::BearishMomentum);
    }

    let (window, mut reasons) = if !immediate.is_empty() {
        (ExitWindow::Immediate, immediate)
    } else if !soon.is_empty() {
        (ExitWindow::Soon, soon)
    } else if !watch.is_empty() {
        (ExitWindow::Watch, watch)
    } else {
        (ExitWindow::Hold, vec![ExitReason::NoTrigger])
    };

    if probability.is_none() {
        reasons.push(ExitReason::ExitProbabilityMissing);
    }

    ExitDecision {
        window,
        theta_urgency: theta,
        reasons,
    }
}

/// Evaluate and compare against the previously reported window
pub fn assess_exit(previous: Option<ExitWindow>, inputs: &ExitInputs, config: &ExitConfig) -> ExitTransition {
    let decision = evaluate_exit(inputs, config);
    ExitTransition {
        from: previous,
        to: decision.window,
        theta_urgency: decision.theta_urgency,
        reasons: decision.reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(probability: Option<f64>, dte: Option<i64>, momentum: Option<Momentum>) -> ExitInputs {
        ExitInputs {
            exit_probability: probability,
            dte_remaining: dte,
            momentum,
        }
    }

    #[test]
    fn test_high_probability_near_expiry_is_immediate() {
        let decision = evaluate_exit(&inputs(Some(85.0), Some(1), None), &ExitConfig::default());
        assert_eq!(decision.window, ExitWindow::Immediate);
        assert_eq!(
            decision.reasons,
            vec![ExitReason::ExitProbabilityCritical, ExitReason::ExpirationImminent]
        );
        assert_eq!(decision.theta_urgency, Some(ThetaUrgency::Critical));
    }

    #[test]
    fn test_moderate_probability_is_not_actionable() {
        let decision = evaluate_exit(&inputs(Some(45.0), Some(10), None), &ExitConfig::default());
        assert!(matches!(decision.window, ExitWindow::Watch | ExitWindow::Hold));
        assert_eq!(decision.window, ExitWindow::Watch);
        assert_eq!(decision.theta_urgency, Some(ThetaUrgency::Moderate));
    }

    #[test]
    fn test_probability_threshold_is_strict() {
        let config = ExitConfig::default();
        assert_eq!(evaluate_exit(&inputs(Some(80.0), None, None), &config).window, ExitWindow::Soon);
        assert_eq!(evaluate_exit(&inputs(Some(80.1), None, None), &config).window, ExitWindow::Immediate);
    }

    #[test]
    fn test_dte_cutoff_alone_triggers_immediate() {
        let decision = evaluate_exit(&inputs(Some(10.0), Some(0), None), &ExitConfig::default());
        assert_eq!(decision.window, ExitWindow::Immediate);
        assert_eq!(decision.reasons, vec![ExitReason::ExpirationImminent]);
    }

    #[test]
    fn test_theta_and_momentum_rules() {
        let config = ExitConfig::default();

        let soon = evaluate_exit(&inputs(Some(10.0), Some(5), Some(Momentum::Bearish)), &config);
        assert_eq!(soon.window, ExitWindow::Soon);
        assert_eq!(soon.reasons, vec![ExitReason::ThetaHighBearishMomentum]);

        let watch = evaluate_exit(&inputs(Some(10.0), Some(5), Some(Momentum::Bullish)), &config);
        assert_eq!(watch.window, ExitWindow::Watch);
        assert_eq!(watch.reasons, vec![ExitReason::ThetaHigh]);

        let critical = evaluate_exit(&inputs(Some(10.0), Some(2), None), &config);
        assert_eq!(critical.window, ExitWindow::Soon);
        assert_eq!(critical.reasons, vec![ExitReason::ThetaCritical]);
    }

    #[test]
    fn test_default_is_hold_with_reason() {
        let decision = evaluate_exit(&inputs(Some(5.0), Some(60), Some(Momentum::Neutral)), &ExitConfig::default());
        assert_eq!(decision.window, ExitWindow::Hold);
        assert_eq!(decision.reasons, vec![ExitReason::NoTrigger]);
        assert_eq!(decision.theta_urgency, Some(ThetaUrgency::Low));
    }

    #[test]
    fn test_missing_probability_reported() {
        let decision = evaluate_exit(&inputs(None, None, None), &ExitConfig::default());
        assert_eq!(decision.window, ExitWindow::Hold);
        assert_eq!(
            decision.reasons,
            vec![ExitReason::NoTrigger, ExitReason::ExitProbabilityMissing]
        );
    }

    #[test]
    fn test_transition_tracking() {
        let config = ExitConfig::default();

        let first = assess_exit(None, &inputs(Some(45.0), Some(30), None), &config);
        assert!(first.changed());
        assert_eq!(first.to, ExitWindow::Watch);

        let same = assess_exit(Some(ExitWindow::Watch), &inputs(Some(50.0), Some(30), None), &config);
        assert!(!same.changed());

        let escalated = assess_exit(Some(ExitWindow::Watch), &inputs(Some(90.0), Some(30), None), &config);
        assert!(escalated.changed());
        assert!(escalated.escalated());

        let relaxed = assess_exit(Some(ExitWindow::Soon), &inputs(Some(10.0), Some(30), None), &config);
        assert_eq!(relaxed.to, ExitWindow::Hold);
        assert!(!relaxed.escalated());
    }

    #[test]
    fn test_reason_labels_serialize_snake_case() {
        let json = serde_json::to_string(&ExitReason::ThetaHighBearishMomentum).unwrap();
        assert_eq!(json, "\"theta_high_bearish_momentum\"");
        assert_eq!(ExitReason::NoOpenPosition.to_string(), "no_open_position");
    }
}
