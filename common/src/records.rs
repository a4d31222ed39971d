//! Upstream record shapes, as delivered by the source endpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::keys::SourceKind;

/// Latest quote for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub change_percent: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub avg_volume: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Entry in a top gainers/losers/actives list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketMover {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    pub price: f64,
    pub change_percent: f64,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorSnapshot {
    pub sector: String,
    pub change_percent: f64,
    #[serde(default)]
    pub advancers: Option<u32>,
    #[serde(default)]
    pub decliners: Option<u32>,
}

/// Upstream sub-scores on the 0..=100 scale; any of them may be missing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    #[serde(default)]
    pub technical: Option<f64>,
    #[serde(default)]
    pub fundamental: Option<f64>,
    #[serde(default)]
    pub quant: Option<f64>,
    #[serde(default)]
    pub ml: Option<f64>,
    #[serde(default)]
    pub flow: Option<f64>,
    #[serde(default)]
    pub sentiment: Option<f64>,
}

impl SubScores {
    /// (name, value) pairs in a fixed order
    pub fn entries(&self) -> [(&'static str, Option<f64>); 6] {
        [
            ("technical", self.technical),
            ("fundamental", self.fundamental),
            ("quant", self.quant),
            ("ml", self.ml),
            ("flow", self.flow),
            ("sentiment", self.sentiment),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.entries().iter().all(|(_, v)| v.is_none())
    }
}

/// Curated smart-watchlist idea
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeIdea {
    pub symbol: String,
    #[serde(default)]
    pub scores: SubScores,
    /// Upstream risk label ("low", "medium", "high", "speculative")
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub thesis: Option<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Buy,
    Sell,
}

/// Insider filing (Form 4 style)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsiderTrade {
    pub symbol: String,
    pub insider_name: String,
    #[serde(default)]
    pub title: Option<String>,
    pub transaction: TransactionType,
    pub shares: f64,
    pub price: f64,
    #[serde(default)]
    pub value: Option<f64>,
    pub filed_at: DateTime<Utc>,
}

impl InsiderTrade {
    /// Reported dollar value, falling back to shares x price
    pub fn dollar_value(&self) -> f64 {
        self.value.unwrap_or(self.shares * self.price)
    }
}

/// Filing, contract or scheduled event tied to a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalyst {
    pub symbol: String,
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub event_date: Option<DateTime<Utc>>,
    pub reported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionSide {
    Call,
    Put,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowSentiment {
    Bullish,
    Bearish,
    Neutral,
}

/// Unusual options activity print
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsFlow {
    pub symbol: String,
    pub side: OptionSide,
    #[serde(default)]
    pub sentiment: Option<FlowSentiment>,
    pub premium: f64,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub strike: Option<f64>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
}

impl OptionsFlow {
    /// Explicit sentiment, else implied by the side (calls bullish, puts bearish)
    pub fn effective_sentiment(&self) -> FlowSentiment {
        self.sentiment.unwrap_or(match self.side {
            OptionSide::Call => FlowSentiment::Bullish,
            OptionSide::Put => FlowSentiment::Bearish,
        })
    }
}

/// Surge / breakout scanner hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurgeAlert {
    pub symbol: String,
    pub price: f64,
    pub change_percent: f64,
    #[serde(default)]
    pub volume_ratio: Option<f64>,
    #[serde(default)]
    pub score: Option<f64>,
    pub detected_at: DateTime<Utc>,
}

/// Aggregated social sentiment for one symbol, 0..=100
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialSentiment {
    pub symbol: String,
    pub score: f64,
    #[serde(default)]
    pub mentions: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

/// Automation bot telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotStatus {
    pub bot: String,
    pub enabled: bool,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub last_scan_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub open_positions: u32,
    #[serde(default)]
    pub daily_pnl: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Stock,
    Option,
    Future,
    Crypto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Momentum {
    Bullish,
    Bearish,
    Neutral,
}

/// Open position with upstream exit advisories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitPosition {
    pub position_id: String,
    pub symbol: String,
    pub asset_type: AssetType,
    pub entry_price: f64,
    #[serde(default)]
    pub current_price: Option<f64>,
    /// 0..=100
    #[serde(default)]
    pub exit_probability: Option<f64>,
    /// Days to expiration, option positions only
    #[serde(default)]
    pub dte_remaining: Option<i64>,
    #[serde(default)]
    pub momentum: Option<Momentum>,
    #[serde(default)]
    pub pnl_percent: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPreview {
    pub report: String,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Decoded payload of one source fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SourcePayload {
    Quotes(Vec<Quote>),
    Movers(Vec<MarketMover>),
    Sectors(Vec<SectorSnapshot>),
    TradeIdeas(Vec<TradeIdea>),
    InsiderTrades(Vec<InsiderTrade>),
    Catalysts(Vec<Catalyst>),
    WhaleFlow(Vec<OptionsFlow>),
    SurgeAlerts(Vec<SurgeAlert>),
    Sentiment(Vec<SocialSentiment>),
    BotStatus(BotStatus),
    ExitPositions(Vec<ExitPosition>),
    Report(ReportPreview),
}

impl SourcePayload {
    /// Decode a raw JSON body for the given source.
    ///
    /// List sources accept either a bare array or `{ "data": [...] }`; quotes
    /// also accept a single object.
    pub fn decode(source: SourceKind, body: serde_json::Value) -> Result<Self, serde_json::Error> {
        let body = match body {
            serde_json::Value::Object(mut map) if map.contains_key("data") && source != SourceKind::BotStatus => {
                map.remove("data").unwrap_or(serde_json::Value::Null)
            }
            other => other,
        };

        Ok(match source {
            SourceKind::Quote => match body {
                serde_json::Value::Array(_) => SourcePayload::Quotes(serde_json::from_value(body)?),
                _ => SourcePayload::Quotes(vec![serde_json::from_value(body)?]),
            },
            SourceKind::MarketMovers => SourcePayload::Movers(serde_json::from_value(body)?),
            SourceKind::SectorAggregates => SourcePayload::Sectors(serde_json::from_value(body)?),
            SourceKind::TradeIdeas => SourcePayload::TradeIdeas(serde_json::from_value(body)?),
            SourceKind::InsiderFeed => SourcePayload::InsiderTrades(serde_json::from_value(body)?),
            SourceKind::CatalystFeed => SourcePayload::Catalysts(serde_json::from_value(body)?),
            SourceKind::WhaleFlow => SourcePayload::WhaleFlow(serde_json::from_value(body)?),
            SourceKind::SurgeScanner => SourcePayload::SurgeAlerts(serde_json::from_value(body)?),
            SourceKind::SocialSentiment => SourcePayload::Sentiment(serde_json::from_value(body)?),
            SourceKind::BotStatus => SourcePayload::BotStatus(serde_json::from_value(body)?),
            SourceKind::ExitPositions => SourcePayload::ExitPositions(serde_json::from_value(body)?),
            SourceKind::ReportPreview => SourcePayload::Report(serde_json::from_value(body)?),
        })
    }

    /// Number of records carried
    pub fn len(&self) -> usize {
        match self {
            SourcePayload::Quotes(v) => v.len(),
            SourcePayload::Movers(v) => v.len(),
            SourcePayload::Sectors(v) => v.len(),
            SourcePayload::TradeIdeas(v) => v.len(),
            SourcePayload::InsiderTrades(v) => v.len(),
            SourcePayload::Catalysts(v) => v.len(),
            SourcePayload::WhaleFlow(v) => v.len(),
            SourcePayload::SurgeAlerts(v) => v.len(),
            SourcePayload::Sentiment(v) => v.len(),
            SourcePayload::ExitPositions(v) => v.len(),
            SourcePayload::BotStatus(_) | SourcePayload::Report(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
