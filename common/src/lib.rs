//! Shared data model for the market-intelligence workspace
//!
//! Fetch keys, upstream record shapes, cache snapshots and the composite
//! per-symbol signal consumed by the classification layer.

pub mod error;
pub mod keys;
pub mod records;
pub mod signal;
pub mod snapshot;

pub use error::FetchError;
pub use keys::{normalize_symbol, CadenceClass, FetchKey, SourceKind};
pub use records::{
    AssetType, BotStatus, Catalyst, FlowSentiment, InsiderTrade, MarketMover, Momentum,
    OptionSide, OptionsFlow, Quote, ReportPreview, SectorSnapshot, SocialSentiment,
    SourcePayload, SubScores, SurgeAlert, TradeIdea, TransactionType, ExitPosition,
};
pub use signal::{
    CatalystSummary, CompositeSignal, FlowSummary, InsiderSummary, MoverSummary,
    PositionSummary, SourceProvenance, SurgeSummary,
};
pub use snapshot::SourceSnapshot;

pub use chrono::{DateTime, Utc};
