//! Fetch keys and the catalogue of upstream sources

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Refresh cadence buckets shared by every upstream source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CadenceClass {
    /// Quotes, bot status, exit advisories, surge scanner
    Fast,
    /// Sector aggregates, options flow
    Medium,
    /// Curated lists, filings, reports
    Slow,
}

impl CadenceClass {
    /// Built-in interval for the class. Deployments override these through config.
    pub fn default_interval(&self) -> Duration {
        match self {
            CadenceClass::Fast => Duration::from_secs(30),
            CadenceClass::Medium => Duration::from_secs(120),
            CadenceClass::Slow => Duration::from_secs(300),
        }
    }
}

/// Logical upstream dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Quote,
    MarketMovers,
    SectorAggregates,
    TradeIdeas,
    InsiderFeed,
    CatalystFeed,
    WhaleFlow,
    SurgeScanner,
    SocialSentiment,
    BotStatus,
    ExitPositions,
    ReportPreview,
}

impl SourceKind {
    pub const ALL: [SourceKind; 12] = [
        SourceKind::Quote,
        SourceKind::MarketMovers,
        SourceKind::SectorAggregates,
        SourceKind::TradeIdeas,
        SourceKind::InsiderFeed,
        SourceKind::CatalystFeed,
        SourceKind::WhaleFlow,
        SourceKind::SurgeScanner,
        SourceKind::SocialSentiment,
        SourceKind::BotStatus,
        SourceKind::ExitPositions,
        SourceKind::ReportPreview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Quote => "quote",
            SourceKind::MarketMovers => "market_movers",
            SourceKind::SectorAggregates => "sector_aggregates",
            SourceKind::TradeIdeas => "trade_ideas",
            SourceKind::InsiderFeed => "insider_feed",
            SourceKind::CatalystFeed => "catalyst_feed",
            SourceKind::WhaleFlow => "whale_flow",
            SourceKind::SurgeScanner => "surge_scanner",
            SourceKind::SocialSentiment => "social_sentiment",
            SourceKind::BotStatus => "bot_status",
            SourceKind::ExitPositions => "exit_positions",
            SourceKind::ReportPreview => "report_preview",
        }
    }

    pub fn cadence_class(&self) -> CadenceClass {
        match self {
            SourceKind::Quote
            | SourceKind::SurgeScanner
            | SourceKind::BotStatus
            | SourceKind::ExitPositions => CadenceClass::Fast,
            SourceKind::MarketMovers | SourceKind::SectorAggregates | SourceKind::WhaleFlow => {
                CadenceClass::Medium
            }
            SourceKind::TradeIdeas
            | SourceKind::InsiderFeed
            | SourceKind::CatalystFeed
            | SourceKind::SocialSentiment
            | SourceKind::ReportPreview => CadenceClass::Slow,
        }
    }

    /// Ordered parameter names a key for this source carries
    pub fn param_names(&self) -> &'static [&'static str] {
        match self {
            SourceKind::Quote => &["symbol"],
            SourceKind::MarketMovers => &["category", "timeframe"],
            SourceKind::SectorAggregates => &["timeframe"],
            SourceKind::TradeIdeas => &["list"],
            SourceKind::InsiderFeed => &["window"],
            SourceKind::CatalystFeed => &["window"],
            SourceKind::WhaleFlow => &["min_premium"],
            SourceKind::SurgeScanner => &[],
            SourceKind::SocialSentiment => &["platform"],
            SourceKind::BotStatus => &["bot"],
            SourceKind::ExitPositions => &[],
            SourceKind::ReportPreview => &["report"],
        }
    }

    /// Whether records of this source are joined per symbol by the merger
    pub fn is_symbol_keyed(&self) -> bool {
        !matches!(
            self,
            SourceKind::SectorAggregates | SourceKind::BotStatus | SourceKind::ReportPreview
        )
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown source kind '{}'", s))
    }
}

/// Identity of one poll target: source plus ordered parameters.
///
/// Equal iff the source and every parameter match by value. Keys are the unit
/// of caching, deduplication and interval configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FetchKey {
    source: SourceKind,
    params: Vec<String>,
}

impl FetchKey {
    pub fn new<I, S>(source: SourceKind, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = source.param_names();
        let params = params
            .into_iter()
            .enumerate()
            .map(|(idx, p)| {
                let p: String = p.into();
                match names.get(idx) {
                    Some(&"symbol") => normalize_symbol(&p),
                    _ => p.trim().to_string(),
                }
            })
            .collect();
        Self { source, params }
    }

    /// Key with no parameters (e.g. the surge scanner)
    pub fn bare(source: SourceKind) -> Self {
        Self {
            source,
            params: Vec::new(),
        }
    }

    pub fn quote(symbol: &str) -> Self {
        Self::new(SourceKind::Quote, [symbol])
    }

    pub fn bot_status(bot: &str) -> Self {
        Self::new(SourceKind::BotStatus, [bot])
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Parameter value by its declared name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.source
            .param_names()
            .iter()
            .position(|n| *n == name)
            .and_then(|idx| self.params.get(idx))
            .map(String::as_str)
    }

    /// Symbol this key is scoped to, if any
    pub fn symbol(&self) -> Option<&str> {
        self.param("symbol")
    }
}

impl fmt::Display for FetchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)?;
        for p in &self.params {
            write!(f, ":{}", p)?;
        }
        Ok(())
    }
}

/// Canonical join form of a ticker symbol
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_equality_by_value() {
        let a = FetchKey::new(SourceKind::MarketMovers, ["gainers", "1d"]);
        let b = FetchKey::new(SourceKind::MarketMovers, vec!["gainers".to_string(), "1d".to_string()]);
        let c = FetchKey::new(SourceKind::MarketMovers, ["1d", "gainers"]);

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_quote_key_normalizes_symbol() {
        let key = FetchKey::quote(" aapl ");
        assert_eq!(key.symbol(), Some("AAPL"));
        assert_eq!(key.to_string(), "quote:AAPL");
    }

    #[test]
    fn test_named_params() {
        let key = FetchKey::new(SourceKind::MarketMovers, ["losers", "1w"]);
        assert_eq!(key.param("category"), Some("losers"));
        assert_eq!(key.param("timeframe"), Some("1w"));
        assert_eq!(key.symbol(), None);
    }

    #[test]
    fn test_source_kind_round_trip_str() {
        for kind in SourceKind::ALL {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        assert!("nope".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_cadence_classes() {
        assert_eq!(SourceKind::Quote.cadence_class(), CadenceClass::Fast);
        assert_eq!(SourceKind::WhaleFlow.cadence_class(), CadenceClass::Medium);
        assert_eq!(SourceKind::InsiderFeed.cadence_class(), CadenceClass::Slow);
        assert_eq!(CadenceClass::Medium.default_interval(), Duration::from_secs(120));
    }
}
