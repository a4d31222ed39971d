// Aggregation Merger
// Joins cached source snapshots into per-symbol composite signals

use chrono::{DateTime, Utc};
use common::{
    normalize_symbol, CatalystSummary, CompositeSignal, FlowSentiment, FlowSummary, InsiderSummary,
    MoverSummary, OptionSide, PositionSummary, SourceKind, SourcePayload, SourceProvenance,
    SourceSnapshot, SurgeSummary, TransactionType,
};
use common::{
    AssetType, Catalyst, ExitPosition, InsiderTrade, MarketMover, OptionsFlow, Quote, SocialSentiment,
    SurgeAlert, TradeIdea,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use tracing::debug;

/// Consumer views the merger knows how to assemble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    /// Insider trades + whale options flow + top movers
    SmartMoney,
    /// Trade ideas enriched with quotes, social sentiment and catalysts
    Watchlist,
    /// Surge scanner hits with live quotes
    Surge,
    /// Open positions with exit advisories and live quotes
    Positions,
    /// Every symbol-keyed source
    Full,
}

impl ViewKind {
    pub const ALL: [ViewKind; 5] = [
        ViewKind::SmartMoney,
        ViewKind::Watchlist,
        ViewKind::Surge,
        ViewKind::Positions,
        ViewKind::Full,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewKind::SmartMoney => "smart_money",
            ViewKind::Watchlist => "watchlist",
            ViewKind::Surge => "surge",
            ViewKind::Positions => "positions",
            ViewKind::Full => "full",
        }
    }

    /// Sources read by the view
    pub fn sources(&self) -> &'static [SourceKind] {
        match self {
            ViewKind::SmartMoney => &[
                SourceKind::InsiderFeed,
                SourceKind::WhaleFlow,
                SourceKind::MarketMovers,
            ],
            ViewKind::Watchlist => &[
                SourceKind::TradeIdeas,
                SourceKind::Quote,
                SourceKind::SocialSentiment,
                SourceKind::CatalystFeed,
            ],
            ViewKind::Surge => &[SourceKind::SurgeScanner, SourceKind::Quote],
            ViewKind::Positions => &[SourceKind::ExitPositions, SourceKind::Quote],
            ViewKind::Full => &[
                SourceKind::Quote,
                SourceKind::MarketMovers,
                SourceKind::TradeIdeas,
                SourceKind::InsiderFeed,
                SourceKind::CatalystFeed,
                SourceKind::WhaleFlow,
                SourceKind::SurgeScanner,
                SourceKind::SocialSentiment,
                SourceKind::ExitPositions,
            ],
        }
    }

    /// Sources whose symbols define view membership. The remaining sources
    /// only enrich symbols that are already in the view.
    pub fn anchors(&self) -> &'static [SourceKind] {
        match self {
            ViewKind::SmartMoney => &[
                SourceKind::InsiderFeed,
                SourceKind::WhaleFlow,
                SourceKind::MarketMovers,
            ],
            ViewKind::Watchlist => &[SourceKind::TradeIdeas],
            ViewKind::Surge => &[SourceKind::SurgeScanner],
            ViewKind::Positions => &[SourceKind::ExitPositions],
            ViewKind::Full => self.sources(),
        }
    }

    pub fn includes(&self, source: SourceKind) -> bool {
        self.sources().contains(&source)
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ViewKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ViewKind::ALL
            .iter()
            .copied()
            .find(|view| view.as_str() == s)
            .ok_or_else(|| format!("unknown view '{}'", s))
    }
}

/// What to merge: a view, optionally pinned to an explicit symbol list.
///
/// With `symbols` empty the view contains every symbol its anchor sources
/// report. Otherwise it contains exactly the listed symbols, each present
/// even if no source has data for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSpec {
    pub kind: ViewKind,
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl ViewSpec {
    pub fn new(kind: ViewKind) -> Self {
        Self {
            kind,
            symbols: Vec::new(),
        }
    }

    pub fn with_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.symbols = symbols
            .into_iter()
            .map(|s| normalize_symbol(s.as_ref()))
            .collect();
        self
    }
}

/// Natural identity of an upstream record. Overlapping windows of one source
/// (insider 7d and 30d, two flow thresholds) return the same record twice;
/// only the first arrival counts.
trait RecordIdentity {
    fn identity(&self) -> String;
}

impl RecordIdentity for Quote {
    fn identity(&self) -> String {
        format!("{}|{}|{}", self.symbol, self.timestamp.timestamp_millis(), self.price)
    }
}

impl RecordIdentity for MarketMover {
    fn identity(&self) -> String {
        format!(
            "{}|{:?}|{:?}|{}",
            self.symbol,
            self.category,
            self.as_of.map(|t| t.timestamp_millis()),
            self.change_percent
        )
    }
}

impl RecordIdentity for TradeIdea {
    fn identity(&self) -> String {
        format!("{}|{}", self.symbol, self.generated_at.timestamp_millis())
    }
}

impl RecordIdentity for InsiderTrade {
    fn identity(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.symbol,
            self.insider_name,
            self.filed_at.timestamp_millis(),
            self.shares
        )
    }
}

impl RecordIdentity for Catalyst {
    fn identity(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.symbol,
            self.kind,
            self.reported_at.timestamp_millis(),
            self.description
        )
    }
}

impl RecordIdentity for OptionsFlow {
    fn identity(&self) -> String {
        format!(
            "{}|{:?}|{}|{}",
            self.symbol,
            self.side,
            self.detected_at.timestamp_millis(),
            self.premium
        )
    }
}

impl RecordIdentity for SurgeAlert {
    fn identity(&self) -> String {
        format!("{}|{}", self.symbol, self.detected_at.timestamp_millis())
    }
}

impl RecordIdentity for SocialSentiment {
    fn identity(&self) -> String {
        format!("{}|{}", self.symbol, self.updated_at.timestamp_millis())
    }
}

impl RecordIdentity for ExitPosition {
    fn identity(&self) -> String {
        format!("{}|{}", self.position_id, self.updated_at.timestamp_millis())
    }
}

/// Records of one source grouped by symbol, in arrival order, deduplicated by identity
struct Grouped<'a, T> {
    by_symbol: BTreeMap<String, Vec<&'a T>>,
    identities: HashSet<String>,
}

impl<'a, T> Default for Grouped<'a, T> {
    fn default() -> Self {
        Self {
            by_symbol: BTreeMap::new(),
            identities: HashSet::new(),
        }
    }
}

impl<'a, T: RecordIdentity> Grouped<'a, T> {
    fn push(&mut self, symbol: &str, record: &'a T) {
        let symbol = normalize_symbol(symbol);
        if !self.identities.insert(format!("{}|{}", symbol, record.identity())) {
            return;
        }
        self.by_symbol.entry(symbol).or_default().push(record);
    }
}

impl<'a, T> Grouped<'a, T> {
    fn get(&self, symbol: &str) -> &[&'a T] {
        self.by_symbol.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    fn symbols(&self) -> impl Iterator<Item = &String> {
        self.by_symbol.keys()
    }
}

/// Most recent record by timestamp; ties go to the later arrival
fn latest<'a, T, K, F>(records: &[&'a T], stamp: F) -> Option<&'a T>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut best: Option<(&'a T, K)> = None;
    for &record in records {
        let ts = stamp(record);
        let replace = match &best {
            Some((_, best_ts)) => ts >= *best_ts,
            None => true,
        };
        if replace {
            best = Some((record, ts));
        }
    }
    best.map(|(record, _)| record)
}

#[derive(Default)]
struct Collected<'a> {
    quotes: Grouped<'a, Quote>,
    movers: Grouped<'a, MarketMover>,
    ideas: Grouped<'a, TradeIdea>,
    insider: Grouped<'a, InsiderTrade>,
    catalysts: Grouped<'a, Catalyst>,
    flow: Grouped<'a, OptionsFlow>,
    surge: Grouped<'a, SurgeAlert>,
    sentiment: Grouped<'a, SocialSentiment>,
    positions: Grouped<'a, ExitPosition>,
}

impl<'a> Collected<'a> {
    /// File a payload's records; returns the symbols it mentioned
    fn absorb(&mut self, payload: &'a SourcePayload) -> HashSet<String> {
        fn file<'r, T: RecordIdentity>(
            group: &mut Grouped<'r, T>,
            records: &'r [T],
            symbol: fn(&T) -> &str,
            seen: &mut HashSet<String>,
        ) {
            for record in records {
                group.push(symbol(record), record);
                seen.insert(normalize_symbol(symbol(record)));
            }
        }

        let mut seen = HashSet::new();
        match payload {
            SourcePayload::Quotes(v) => file(&mut self.quotes, v, |r| r.symbol.as_str(), &mut seen),
            SourcePayload::Movers(v) => file(&mut self.movers, v, |r| r.symbol.as_str(), &mut seen),
            SourcePayload::TradeIdeas(v) => file(&mut self.ideas, v, |r| r.symbol.as_str(), &mut seen),
            SourcePayload::InsiderTrades(v) => file(&mut self.insider, v, |r| r.symbol.as_str(), &mut seen),
            SourcePayload::Catalysts(v) => file(&mut self.catalysts, v, |r| r.symbol.as_str(), &mut seen),
            SourcePayload::WhaleFlow(v) => file(&mut self.flow, v, |r| r.symbol.as_str(), &mut seen),
            SourcePayload::SurgeAlerts(v) => file(&mut self.surge, v, |r| r.symbol.as_str(), &mut seen),
            SourcePayload::Sentiment(v) => file(&mut self.sentiment, v, |r| r.symbol.as_str(), &mut seen),
            SourcePayload::ExitPositions(v) => file(&mut self.positions, v, |r| r.symbol.as_str(), &mut seen),
            SourcePayload::Sectors(_) | SourcePayload::BotStatus(_) | SourcePayload::Report(_) => {}
        }
        seen
    }

    fn anchor_symbols(&self, source: SourceKind) -> Vec<&String> {
        match source {
            SourceKind::Quote => self.quotes.symbols().collect(),
            SourceKind::MarketMovers => self.movers.symbols().collect(),
            SourceKind::TradeIdeas => self.ideas.symbols().collect(),
            SourceKind::InsiderFeed => self.insider.symbols().collect(),
            SourceKind::CatalystFeed => self.catalysts.symbols().collect(),
            SourceKind::WhaleFlow => self.flow.symbols().collect(),
            SourceKind::SurgeScanner => self.surge.symbols().collect(),
            SourceKind::SocialSentiment => self.sentiment.symbols().collect(),
            SourceKind::ExitPositions => self.positions.symbols().collect(),
            SourceKind::SectorAggregates | SourceKind::BotStatus | SourceKind::ReportPreview => {
                Vec::new()
            }
        }
    }
}

/// Merge cached snapshots into one composite per symbol, ordered by symbol.
///
/// Snapshots of sources outside the view are ignored. A failed or empty
/// source only leaves its fields absent; it never removes a symbol.
pub fn merge(view: &ViewSpec, snapshots: &[SourceSnapshot]) -> Vec<CompositeSignal> {
    let relevant: Vec<&SourceSnapshot> = snapshots
        .iter()
        .filter(|s| view.kind.includes(s.key.source()))
        .collect();

    let mut collected = Collected::default();
    let mut contributed: Vec<HashSet<String>> = Vec::with_capacity(relevant.len());
    for snapshot in relevant.iter().copied() {
        let seen = match snapshot.payload.as_deref() {
            Some(payload) => collected.absorb(payload),
            None => HashSet::new(),
        };
        contributed.push(seen);
    }

    let symbols: BTreeSet<String> = if view.symbols.is_empty() {
        view.kind
            .anchors()
            .iter()
            .flat_map(|source| collected.anchor_symbols(*source))
            .cloned()
            .collect()
    } else {
        view.symbols.iter().map(|s| normalize_symbol(s)).collect()
    };

    let composites: Vec<CompositeSignal> = symbols
        .into_iter()
        .map(|symbol| {
            let mut composite = build(&symbol, &collected);
            composite.provenance = provenance(&symbol, &relevant, &contributed);
            composite
        })
        .collect();

    debug!(
        view = %view.kind,
        snapshots = relevant.len(),
        symbols = composites.len(),
        "Merged view"
    );

    composites
}

fn build(symbol: &str, c: &Collected<'_>) -> CompositeSignal {
    let mut composite = CompositeSignal::new(symbol);

    if let Some(idea) = latest(c.ideas.get(symbol), |r| r.generated_at) {
        composite.scores = idea.scores.clone();
        composite.upstream_risk = idea.risk_level.clone();
        composite.thesis = idea.thesis.clone();
    }

    composite.insider = summarize_insider(c.insider.get(symbol));
    composite.flow = summarize_flow(c.flow.get(symbol));
    composite.catalysts = summarize_catalysts(c.catalysts.get(symbol));
    composite.positions = summarize_positions(c.positions.get(symbol));

    let mover = latest(c.movers.get(symbol), |r| r.as_of);
    composite.mover = mover.map(|m| MoverSummary {
        change_percent: m.change_percent,
        category: m.category.clone(),
    });

    let surge = latest(c.surge.get(symbol), |r| r.detected_at);
    composite.surge = surge.map(|s| SurgeSummary {
        change_percent: s.change_percent,
        volume_ratio: s.volume_ratio,
        score: s.score,
        detected_at: s.detected_at,
    });

    // Price precedence: live quote, then scanner, then mover list, then stock position mark.
    // Option marks are contract premiums, not the underlying's price.
    if let Some(quote) = latest(c.quotes.get(symbol), |r| r.timestamp) {
        composite.price = Some(quote.price);
        composite.change_percent = quote.change_percent;
        composite.volume = quote.volume;
        composite.relative_volume = match (quote.volume, quote.avg_volume) {
            (Some(volume), Some(avg)) if avg > 0.0 => Some(volume / avg),
            _ => None,
        };
    }
    if composite.price.is_none() {
        composite.price = surge
            .map(|s| s.price)
            .or_else(|| mover.map(|m| m.price))
            .or_else(|| {
                let stocks: Vec<&ExitPosition> = c
                    .positions
                    .get(symbol)
                    .iter()
                    .copied()
                    .filter(|p| p.asset_type == AssetType::Stock)
                    .collect();
                latest(&stocks, |r| r.updated_at).and_then(|p| p.current_price)
            });
    }
    if composite.change_percent.is_none() {
        composite.change_percent = surge
            .map(|s| s.change_percent)
            .or_else(|| mover.map(|m| m.change_percent));
    }
    if composite.volume.is_none() {
        composite.volume = mover.and_then(|m| m.volume);
    }
    if composite.relative_volume.is_none() {
        composite.relative_volume = surge.and_then(|s| s.volume_ratio);
    }

    // Derived sub-scores fill gaps the idea left
    if composite.scores.flow.is_none() {
        composite.scores.flow = composite
            .flow
            .as_ref()
            .map(|f| (50.0 + 50.0 * f.direction).clamp(0.0, 100.0));
    }
    if composite.scores.sentiment.is_none() {
        composite.scores.sentiment = latest(c.sentiment.get(symbol), |r| r.updated_at)
            .map(|s| s.score.clamp(0.0, 100.0));
    }

    composite
}

fn summarize_insider(trades: &[&InsiderTrade]) -> Option<InsiderSummary> {
    let newest = latest(trades, |r| r.filed_at)?;

    let mut summary = InsiderSummary {
        filings: 0,
        buy_count: 0,
        sell_count: 0,
        total_shares: 0.0,
        net_shares: 0.0,
        total_value: 0.0,
        latest_insider: newest.insider_name.clone(),
        latest_title: newest.title.clone(),
        latest_filed_at: newest.filed_at,
    };

    for trade in trades {
        summary.filings += 1;
        summary.total_shares += trade.shares;
        summary.total_value += trade.dollar_value();
        match trade.transaction {
            TransactionType::Buy => {
                summary.buy_count += 1;
                summary.net_shares += trade.shares;
            }
            TransactionType::Sell => {
                summary.sell_count += 1;
                summary.net_shares -= trade.shares;
            }
        }
    }

    Some(summary)
}

fn summarize_flow(prints: &[&OptionsFlow]) -> Option<FlowSummary> {
    let newest = latest(prints, |r| r.detected_at)?;

    let mut summary = FlowSummary {
        prints: 0,
        total_premium: 0.0,
        call_premium: 0.0,
        put_premium: 0.0,
        direction: 0.0,
        latest_sentiment: newest.effective_sentiment(),
        latest_at: newest.detected_at,
    };

    let mut signed = 0.0;
    for print in prints {
        summary.prints += 1;
        summary.total_premium += print.premium;
        match print.side {
            OptionSide::Call => summary.call_premium += print.premium,
            OptionSide::Put => summary.put_premium += print.premium,
        }
        signed += match print.effective_sentiment() {
            FlowSentiment::Bullish => print.premium,
            FlowSentiment::Bearish => -print.premium,
            FlowSentiment::Neutral => 0.0,
        };
    }

    if summary.total_premium > 0.0 {
        summary.direction = (signed / summary.total_premium).clamp(-1.0, 1.0);
    }

    Some(summary)
}

fn summarize_catalysts(events: &[&Catalyst]) -> Option<CatalystSummary> {
    let newest = latest(events, |r| r.reported_at)?;
    let horizon = newest.reported_at;

    let next_event: Option<DateTime<Utc>> = events
        .iter()
        .filter_map(|e| e.event_date)
        .filter(|date| *date >= horizon)
        .min();

    Some(CatalystSummary {
        count: events.len() as u32,
        latest_kind: newest.kind.clone(),
        latest_description: newest.description.clone(),
        next_event,
    })
}

/// Latest update of each open position, ordered by position id
fn summarize_positions(positions: &[&ExitPosition]) -> Vec<PositionSummary> {
    let mut by_id: BTreeMap<&str, Vec<&ExitPosition>> = BTreeMap::new();
    for &position in positions {
        by_id.entry(position.position_id.as_str()).or_default().push(position);
    }

    by_id
        .values()
        .filter_map(|updates| latest(updates, |r| r.updated_at))
        .map(|p| PositionSummary {
            position_id: p.position_id.clone(),
            exit_probability: p.exit_probability,
            dte_remaining: p.dte_remaining,
            momentum: p.momentum,
            pnl_percent: p.pnl_percent,
        })
        .collect()
}

fn provenance(
    symbol: &str,
    relevant: &[&SourceSnapshot],
    contributed: &[HashSet<String>],
) -> Vec<SourceProvenance> {
    relevant
        .iter()
        .zip(contributed)
        .filter(|(snapshot, _)| match snapshot.key.symbol() {
            // Per-symbol keys only speak for their own symbol
            Some(key_symbol) => key_symbol == symbol,
            None => true,
        })
        .map(|(snapshot, seen)| SourceProvenance {
            key: snapshot.key.clone(),
            source: snapshot.key.source(),
            contributed: seen.contains(symbol),
            fetched_at: snapshot.fetched_at,
            age_secs: snapshot.age_secs(),
            is_stale: snapshot.is_stale,
            last_error: snapshot.last_error.as_ref().map(|e| e.to_string()),
        })
        .collect()
}
