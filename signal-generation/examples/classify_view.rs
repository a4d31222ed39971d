// Example: Merge cached source snapshots into a view and classify it
// Snapshots are built by hand here; in the service they come from the cache

use chrono::Utc;
use common::{
    AssetType, ExitPosition, FetchKey, Momentum, Quote, SourceKind, SourcePayload,
    SourceSnapshot, SubScores, TradeIdea,
};
use signal_generation::{merge, ClassificationEngine, ExitInputs, ExitWindow, ViewKind, ViewSpec};
use std::sync::Arc;

fn snapshot(key: FetchKey, payload: SourcePayload) -> SourceSnapshot {
    let now = Utc::now();
    SourceSnapshot {
        key,
        payload: Some(Arc::new(payload)),
        fetched_at: Some(now),
        is_stale: false,
        last_error: None,
        in_flight: false,
        read_at: now,
    }
}

fn main() -> anyhow::Result<()> {
    println!("=== Signal Generation - Watchlist Classification Example ===\n");
    let now = Utc::now();

    let ideas = snapshot(
        FetchKey::new(SourceKind::TradeIdeas, ["smart"]),
        SourcePayload::TradeIdeas(vec![
            TradeIdea {
                symbol: "NVDA".to_string(),
                scores: SubScores {
                    technical: Some(92.0),
                    fundamental: Some(88.0),
                    quant: Some(90.0),
                    ml: Some(94.0),
                    flow: Some(89.0),
                    sentiment: Some(91.0),
                },
                risk_level: Some("low".to_string()),
                thesis: Some("Datacenter demand".to_string()),
                generated_at: now,
            },
            TradeIdea {
                symbol: "GME".to_string(),
                scores: SubScores {
                    technical: Some(70.0),
                    ..Default::default()
                },
                risk_level: Some("speculative".to_string()),
                thesis: None,
                generated_at: now,
            },
        ]),
    );
    let quote = snapshot(
        FetchKey::quote("NVDA"),
        SourcePayload::Quotes(vec![Quote {
            symbol: "NVDA".to_string(),
            price: 121.5,
            change_percent: Some(1.4),
            volume: Some(40_000_000.0),
            avg_volume: Some(35_000_000.0),
            timestamp: now,
        }]),
    );

    let view = ViewSpec::new(ViewKind::Watchlist);
    let signals = merge(&view, &[ideas, quote]);
    let engine = ClassificationEngine::default();

    for signal in &signals {
        let result = engine.classify(signal);
        println!("{}:", result.symbol);
        println!("  Score: {:.1} ({})", result.composite_score, result.grade);
        println!("  Risk: {}{}", result.risk_level, if result.requires_disclaimer() { " (research only)" } else { "" });
        println!("  Recommendation: {}", result.recommendation);
        if !result.degraded_inputs.is_empty() {
            println!("  Neutral defaults: {}", result.degraded_inputs.join(", "));
        }
        println!();
    }

    // Exit intelligence for an open option position
    println!("Exit tracking:");
    let positions = snapshot(
        FetchKey::bare(SourceKind::ExitPositions),
        SourcePayload::ExitPositions(vec![ExitPosition {
            position_id: "pos-1".to_string(),
            symbol: "SPY".to_string(),
            asset_type: AssetType::Option,
            entry_price: 4.2,
            current_price: Some(3.1),
            exit_probability: Some(65.0),
            dte_remaining: Some(5),
            momentum: Some(Momentum::Bearish),
            pnl_percent: Some(-26.0),
            updated_at: now,
        }]),
    );
    for signal in merge(&ViewSpec::new(ViewKind::Positions), &[positions]) {
        let result = engine.classify(&signal);
        println!("  {} -> {} ({:?})", result.symbol, result.exit_window, result.exit_reasons);
    }

    let transition = engine.assess_exit(
        Some(ExitWindow::Watch),
        &ExitInputs {
            exit_probability: Some(85.0),
            dte_remaining: Some(1),
            momentum: None,
        },
    );
    println!(
        "  Watch -> {} (escalated: {})",
        transition.to,
        transition.escalated()
    );

    Ok(())
}
