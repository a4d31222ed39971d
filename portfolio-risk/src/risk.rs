use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CircuitBreakerConfig;

/// A closed trade as reported by the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub closed_at: DateTime<Utc>,
    /// Realised PnL in USD
    pub pnl: f64,
}

impl TradeOutcome {
    pub fn new(closed_at: DateTime<Utc>, pnl: f64) -> Self {
        Self { closed_at, pnl }
    }

    pub fn is_loss(&self) -> bool {
        self.pnl < 0.0
    }

    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

/// Breaker state derived from trade history at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStatus {
    /// Consecutive losses counted toward the next trip
    pub loss_streak: u32,
    /// End of the current suspension, if one is in force
    pub suspended_until: Option<DateTime<Utc>>,
    /// Whether the executor should stop opening trades now
    pub should_suspend: bool,
    /// Times the breaker tripped over the replayed history
    pub trips: u32,
    /// Realised PnL for trades closed today (UTC)
    pub daily_pnl: f64,
    /// Informational; suspension follows the loss streak only
    pub daily_limit_breached: bool,
}

/// Consecutive-loss circuit breaker.
///
/// Stateless: the status is recomputed from the full trade history on every
/// call. The breaker reports; acting on it is the executor's job.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    daily_loss_limit: f64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, daily_loss_limit: f64) -> Self {
        Self {
            config,
            daily_loss_limit,
        }
    }

    fn cooldown(&self) -> Duration {
        Duration::minutes(self.config.cooldown_minutes as i64)
    }

    /// Replay `history` (any order) and report the state at `now`
    pub fn evaluate(&self, history: &[TradeOutcome], now: DateTime<Utc>) -> BreakerStatus {
        let mut trades: Vec<&TradeOutcome> = history.iter().filter(|t| t.closed_at <= now).collect();
        trades.sort_by_key(|t| t.closed_at);

        let threshold = self.config.consecutive_losses.max(1);
        let mut streak = 0u32;
        let mut suspended_until: Option<DateTime<Utc>> = None;
        let mut trips = 0u32;

        for trade in &trades {
            if let Some(until) = suspended_until {
                if trade.closed_at < until {
                    // Trades closed during a suspension do not count
                    continue;
                }
                suspended_until = None;
                streak = 0;
            }

            if trade.is_loss() {
                streak += 1;
                if self.config.enabled && streak >= threshold {
                    suspended_until = Some(trade.closed_at + self.cooldown());
                    trips += 1;
                    tracing::warn!(
                        loss_streak = streak,
                        closed_at = %trade.closed_at,
                        "Circuit breaker tripped"
                    );
                }
            } else if trade.is_win() {
                streak = 0;
            }
        }

        if let Some(until) = suspended_until {
            if until <= now {
                suspended_until = None;
                streak = 0;
            }
        }

        let today = now.date_naive();
        let daily_pnl: f64 = trades
            .iter()
            .filter(|t| t.closed_at.date_naive() == today)
            .map(|t| t.pnl)
            .sum();
        let daily_limit_breached = self.daily_loss_limit > 0.0 && daily_pnl <= -self.daily_loss_limit;

        BreakerStatus {
            loss_streak: streak,
            suspended_until,
            should_suspend: suspended_until.is_some(),
            trips,
            daily_pnl,
            daily_limit_breached,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
    }

    fn breaker(losses: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig {
                enabled: true,
                consecutive_losses: losses,
                cooldown_minutes: 30,
            },
            500.0,
        )
    }

    #[test]
    fn test_three_losses_trip_breaker() {
        let history = vec![
            TradeOutcome::new(at(10, 0), -50.0),
            TradeOutcome::new(at(10, 5), -20.0),
            TradeOutcome::new(at(10, 10), -10.0),
        ];

        let status = breaker(3).evaluate(&history, at(10, 15));
        assert!(status.should_suspend);
        assert_eq!(status.loss_streak, 3);
        assert_eq!(status.suspended_until, Some(at(10, 40)));
        assert_eq!(status.trips, 1);
        assert_eq!(status.daily_pnl, -80.0);
        assert!(!status.daily_limit_breached);
    }

    #[test]
    fn test_win_before_threshold_resets_streak() {
        let history = vec![
            TradeOutcome::new(at(10, 0), -50.0),
            TradeOutcome::new(at(10, 5), -20.0),
            TradeOutcome::new(at(10, 10), 30.0),
        ];

        let status = breaker(3).evaluate(&history, at(10, 15));
        assert!(!status.should_suspend);
        assert_eq!(status.loss_streak, 0);
        assert_eq!(status.trips, 0);

        let mut more = history.clone();
        more.push(TradeOutcome::new(at(10, 20), -5.0));
        more.push(TradeOutcome::new(at(10, 25), -5.0));
        let status = breaker(3).evaluate(&more, at(10, 30));
        assert!(!status.should_suspend);
        assert_eq!(status.loss_streak, 2);
    }

    #[test]
    fn test_cooldown_expiry_resets_counter() {
        let history = vec![
            TradeOutcome::new(at(10, 0), -1.0),
            TradeOutcome::new(at(10, 1), -1.0),
            TradeOutcome::new(at(10, 2), -1.0),
        ];

        let status = breaker(3).evaluate(&history, at(10, 33));
        assert!(!status.should_suspend);
        assert_eq!(status.loss_streak, 0);
        assert_eq!(status.suspended_until, None);
        assert_eq!(status.trips, 1);
    }

    #[test]
    fn test_losses_after_cooldown_start_fresh_streak() {
        let history = vec![
            TradeOutcome::new(at(10, 0), -1.0),
            TradeOutcome::new(at(10, 1), -1.0),
            TradeOutcome::new(at(10, 2), -1.0),
            // inside the suspension window, ignored
            TradeOutcome::new(at(10, 10), -1.0),
            TradeOutcome::new(at(11, 0), -1.0),
        ];

        let status = breaker(3).evaluate(&history, at(11, 5));
        assert!(!status.should_suspend);
        assert_eq!(status.loss_streak, 1);
    }

    #[test]
    fn test_history_order_does_not_matter() {
        let history = vec![
            TradeOutcome::new(at(10, 10), -10.0),
            TradeOutcome::new(at(10, 0), -50.0),
            TradeOutcome::new(at(10, 5), -20.0),
        ];

        assert!(breaker(3).evaluate(&history, at(10, 15)).should_suspend);
    }

    #[test]
    fn test_breakeven_neither_counts_nor_resets() {
        let history = vec![
            TradeOutcome::new(at(10, 0), -1.0),
            TradeOutcome::new(at(10, 1), 0.0),
            TradeOutcome::new(at(10, 2), -1.0),
        ];

        assert_eq!(breaker(3).evaluate(&history, at(10, 5)).loss_streak, 2);
    }

    #[test]
    fn test_disabled_breaker_never_suspends() {
        let disabled = CircuitBreaker::new(
            CircuitBreakerConfig {
                enabled: false,
                ..Default::default()
            },
            500.0,
        );
        let history: Vec<_> = (0..5).map(|i| TradeOutcome::new(at(10, i), -1.0)).collect();

        let status = disabled.evaluate(&history, at(10, 10));
        assert!(!status.should_suspend);
        assert_eq!(status.loss_streak, 5);
    }

    #[test]
    fn test_daily_loss_limit_reported() {
        let history = vec![
            TradeOutcome::new(Utc.with_ymd_and_hms(2024, 4, 30, 23, 0, 0).unwrap(), -1000.0),
            TradeOutcome::new(at(9, 0), -300.0),
            TradeOutcome::new(at(9, 30), 100.0),
            TradeOutcome::new(at(10, 0), -350.0),
        ];

        let status = breaker(5).evaluate(&history, at(12, 0));
        assert_eq!(status.daily_pnl, -550.0);
        assert!(status.daily_limit_breached);
        assert!(!status.should_suspend);
    }
}
