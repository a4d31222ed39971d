//! Example usage of the risk profile, circuit breaker and position sizing

use chrono::{Duration, Utc};
use portfolio_risk::{
    KellyFraction, PreferencesManager, RiskProfile, SizingInputs, StrategyAllocation,
    TradeOutcome,
};

fn main() -> anyhow::Result<()> {
    println!("=== Portfolio & Risk Controls Example ===\n");

    // Example 1: Default profile
    println!("Example 1: Default Risk Profile");
    let mut manager = PreferencesManager::new();
    let profile = manager.profile();
    println!(
        "  Allocation: options {}% / futures {}% / crypto {}%",
        profile.allocation.options_pct, profile.allocation.futures_pct, profile.allocation.crypto_pct
    );
    println!("  Kelly: {:?}", profile.kelly_fraction);
    println!(
        "  Circuit breaker: {} losses, {} min cooldown\n",
        profile.circuit_breaker.consecutive_losses, profile.circuit_breaker.cooldown_minutes
    );

    // Example 2: Rejected allocation
    println!("Example 2: Allocation That Does Not Sum to 100");
    let result = manager.apply(RiskProfile {
        allocation: StrategyAllocation::new(50.0, 40.0, 20.0),
        ..Default::default()
    });
    println!("  Valid: {} (total {}%)", result.is_valid(), result.allocation_total);
    for issue in &result.issues {
        println!("  ✗ {}", issue);
    }
    println!();

    // Example 3: Accepted allocation
    println!("Example 3: Applying a Valid Profile");
    let result = manager.apply(RiskProfile {
        allocation: StrategyAllocation::new(60.0, 20.0, 20.0),
        kelly_fraction: KellyFraction::Quarter,
        max_position_size: 2_500.0,
        ..Default::default()
    });
    println!("  Valid: {}\n", result.is_valid());

    // Example 4: Position sizing
    println!("Example 4: Kelly Position Sizing");
    let size = manager.position_size(&SizingInputs {
        bankroll: 25_000.0,
        win_rate: 0.58,
        avg_win: 1.8,
        avg_loss: 1.0,
    });
    println!("  Full Kelly: {}", size.full_kelly);
    println!("  Applied ({:?}): {}", size.fraction, size.applied_fraction);
    println!("  Size: ${} (capped: {})\n", size.dollars, size.capped);

    // Example 5: Circuit breaker replay
    println!("Example 5: Circuit Breaker");
    let now = Utc::now();
    let history = vec![
        TradeOutcome::new(now - Duration::minutes(50), 120.0),
        TradeOutcome::new(now - Duration::minutes(20), -80.0),
        TradeOutcome::new(now - Duration::minutes(15), -60.0),
        TradeOutcome::new(now - Duration::minutes(10), -45.0),
    ];
    let status = manager.breaker_status(&history, now);
    println!("  Loss streak: {}", status.loss_streak);
    println!("  Suspended: {}", status.should_suspend);
    if let Some(until) = status.suspended_until {
        println!("  Resumes at: {}", until.format("%H:%M:%S"));
    }
    println!("  Today's PnL: ${:.2}\n", status.daily_pnl);

    // Example 6: Config template
    println!("Example 6: Profile Template");
    let path = std::env::temp_dir().join("risk_profile_example.toml");
    portfolio_risk::create_config_template(&path.to_string_lossy())?;
    let loaded = portfolio_risk::load_config(&path.to_string_lossy())?;
    println!("  ✓ Template written and reloaded from {}", path.display());
    println!("  Stop loss: {}%", loaded.stop_loss_pct);
    std::fs::remove_file(&path).ok();

    println!("\n=== Example Complete ===");
    Ok(())
}
