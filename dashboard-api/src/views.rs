//! Which fetch keys each consumer view needs

use common::{normalize_symbol, FetchKey, SourceKind};
use serde::{Deserialize, Serialize};
use signal_generation::ViewKind;

/// Parameters used to build a view's fetch keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewParams {
    /// Symbols to pin the view to and fetch quotes for
    #[serde(default)]
    pub symbols: Vec<String>,

    #[serde(default = "default_mover_category")]
    pub mover_category: String,

    #[serde(default = "default_timeframe")]
    pub timeframe: String,

    #[serde(default = "default_idea_list")]
    pub idea_list: String,

    #[serde(default = "default_window")]
    pub filing_window: String,

    #[serde(default = "default_min_premium")]
    pub min_premium: String,

    #[serde(default = "default_platform")]
    pub sentiment_platform: String,
}

impl Default for ViewParams {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            mover_category: default_mover_category(),
            timeframe: default_timeframe(),
            idea_list: default_idea_list(),
            filing_window: default_window(),
            min_premium: default_min_premium(),
            sentiment_platform: default_platform(),
        }
    }
}

impl ViewParams {
    pub fn for_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            symbols: symbols
                .into_iter()
                .map(|s| normalize_symbol(s.as_ref()))
                .collect(),
            ..Default::default()
        }
    }

    /// Key for one source under these parameters. Quotes need a symbol and
    /// are built per symbol instead.
    pub fn key_for(&self, source: SourceKind) -> Option<FetchKey> {
        let key = match source {
            SourceKind::Quote => return None,
            SourceKind::MarketMovers => {
                FetchKey::new(source, [self.mover_category.as_str(), self.timeframe.as_str()])
            }
            SourceKind::SectorAggregates => FetchKey::new(source, [self.timeframe.as_str()]),
            SourceKind::TradeIdeas => FetchKey::new(source, [self.idea_list.as_str()]),
            SourceKind::InsiderFeed | SourceKind::CatalystFeed => {
                FetchKey::new(source, [self.filing_window.as_str()])
            }
            SourceKind::WhaleFlow => FetchKey::new(source, [self.min_premium.as_str()]),
            SourceKind::SocialSentiment => FetchKey::new(source, [self.sentiment_platform.as_str()]),
            SourceKind::SurgeScanner | SourceKind::ExitPositions => FetchKey::bare(source),
            // Bot and report keys are named explicitly by the caller
            SourceKind::BotStatus | SourceKind::ReportPreview => return None,
        };
        Some(key)
    }
}

/// Every fetch key a view reads under `params`, ordered
pub fn view_keys(view: ViewKind, params: &ViewParams) -> Vec<FetchKey> {
    let mut keys: Vec<FetchKey> = Vec::new();

    for source in view.sources() {
        if *source == SourceKind::Quote {
            keys.extend(params.symbols.iter().map(|s| FetchKey::quote(s)));
        } else if let Some(key) = params.key_for(*source) {
            keys.push(key);
        }
    }

    keys.sort();
    keys.dedup();
    keys
}

fn default_mover_category() -> String {
    "gainers".to_string()
}

fn default_timeframe() -> String {
    "1d".to_string()
}

fn default_idea_list() -> String {
    "smart".to_string()
}

fn default_window() -> String {
    "7d".to_string()
}

fn default_min_premium() -> String {
    "100000".to_string()
}

fn default_platform() -> String {
    "all".to_string()
}
