//! Per-symbol composite view assembled by the merger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::keys::{FetchKey, SourceKind};
use crate::records::{FlowSentiment, Momentum, SubScores};

/// Aggregate of one or more insider filings for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsiderSummary {
    pub filings: u32,
    pub buy_count: u32,
    pub sell_count: u32,
    pub total_shares: f64,
    /// Bought minus sold
    pub net_shares: f64,
    pub total_value: f64,
    pub latest_insider: String,
    pub latest_title: Option<String>,
    pub latest_filed_at: DateTime<Utc>,
}

/// Aggregate of whale options prints for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSummary {
    pub prints: u32,
    pub total_premium: f64,
    pub call_premium: f64,
    pub put_premium: f64,
    /// Premium-weighted direction in [-1, 1]; positive is bullish
    pub direction: f64,
    pub latest_sentiment: FlowSentiment,
    pub latest_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoverSummary {
    pub change_percent: f64,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurgeSummary {
    pub change_percent: f64,
    pub volume_ratio: Option<f64>,
    pub score: Option<f64>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalystSummary {
    pub count: u32,
    pub latest_kind: String,
    pub latest_description: String,
    pub next_event: Option<DateTime<Utc>>,
}

/// Exit-relevant fields of one open position, as of its latest update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSummary {
    pub position_id: String,
    pub exit_probability: Option<f64>,
    pub dte_remaining: Option<i64>,
    pub momentum: Option<Momentum>,
    pub pnl_percent: Option<f64>,
}

/// Where a composite's fields came from, and how fresh that source was
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProvenance {
    pub key: FetchKey,
    pub source: SourceKind,
    /// Whether this source had at least one record for the symbol
    pub contributed: bool,
    pub fetched_at: Option<DateTime<Utc>>,
    pub age_secs: Option<i64>,
    pub is_stale: bool,
    pub last_error: Option<String>,
}

/// Merged per-symbol record. Absent fields mean the source had no data
/// for the symbol (or failed); they are never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeSignal {
    pub symbol: String,
    pub price: Option<f64>,
    pub change_percent: Option<f64>,
    pub volume: Option<f64>,
    pub relative_volume: Option<f64>,
    pub scores: SubScores,
    /// Risk label as reported upstream, unparsed
    pub upstream_risk: Option<String>,
    pub thesis: Option<String>,
    pub insider: Option<InsiderSummary>,
    pub flow: Option<FlowSummary>,
    pub mover: Option<MoverSummary>,
    pub surge: Option<SurgeSummary>,
    pub catalysts: Option<CatalystSummary>,
    /// Every open position in the symbol, ordered by position id
    pub positions: Vec<PositionSummary>,
    pub provenance: Vec<SourceProvenance>,
}

impl CompositeSignal {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            price: None,
            change_percent: None,
            volume: None,
            relative_volume: None,
            scores: SubScores::default(),
            upstream_risk: None,
            thesis: None,
            insider: None,
            flow: None,
            mover: None,
            surge: None,
            catalysts: None,
            positions: Vec::new(),
            provenance: Vec::new(),
        }
    }

    /// Sources that actually supplied data for this symbol
    pub fn contributing_sources(&self) -> Vec<SourceKind> {
        self.provenance
            .iter()
            .filter(|p| p.contributed)
            .map(|p| p.source)
            .collect()
    }

    /// True if any contributing source is stale
    pub fn has_stale_inputs(&self) -> bool {
        self.provenance.iter().any(|p| p.contributed && p.is_stale)
    }
}
