use async_trait::async_trait;
use common::{FetchError, FetchKey, SourceKind, SourcePayload};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::SourceAdapter;

/// REST connector for the dashboard's upstream API
pub struct HttpSourceAdapter {
    base_url: String,
    client: Client,
    request_timeout: Duration,
}

impl HttpSourceAdapter {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("market-intel/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL and query pairs for a key
    pub fn request_parts(&self, key: &FetchKey) -> (String, Vec<(String, String)>) {
        let url = format!("{}/api/{}", self.base_url, endpoint_path(key.source()));

        let query = key
            .source()
            .param_names()
            .iter()
            .zip(key.params())
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();

        (url, query)
    }
}

/// Path segment under `/api/` for each source
pub fn endpoint_path(source: SourceKind) -> &'static str {
    match source {
        SourceKind::Quote => "market/quote",
        SourceKind::MarketMovers => "market/movers",
        SourceKind::SectorAggregates => "market/sectors",
        SourceKind::TradeIdeas => "watchlist/ideas",
        SourceKind::InsiderFeed => "insider/trades",
        SourceKind::CatalystFeed => "insider/catalysts",
        SourceKind::WhaleFlow => "options/whale-flow",
        SourceKind::SurgeScanner => "scanner/surge",
        SourceKind::SocialSentiment => "sentiment/social",
        SourceKind::BotStatus => "bots/status",
        SourceKind::ExitPositions => "exit-intel/positions",
        SourceKind::ReportPreview => "reports/preview",
    }
}

pub(crate) fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            after_ms: timeout.as_millis() as u64,
        }
    } else if err.is_decode() {
        FetchError::Decode(err.to_string())
    } else if let Some(status) = err.status() {
        FetchError::Status {
            status: status.as_u16(),
        }
    } else {
        FetchError::Transport(err.to_string())
    }
}

#[async_trait]
impl SourceAdapter for HttpSourceAdapter {
    async fn fetch(&self, key: &FetchKey) -> Result<SourcePayload, FetchError> {
        let (url, query) = self.request_parts(key);
        debug!(key = %key, url = %url, "Fetching upstream source");

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.request_timeout))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| map_reqwest_error(e, self.request_timeout))?;

        Ok(SourcePayload::decode(key.source(), body)?)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> HttpSourceAdapter {
        HttpSourceAdapter::new("http://localhost:5000/", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_request_parts_for_quote() {
        let (url, query) = adapter().request_parts(&FetchKey::quote("msft"));
        assert_eq!(url, "http://localhost:5000/api/market/quote");
        assert_eq!(query, vec![("symbol".to_string(), "MSFT".to_string())]);
    }

    #[test]
    fn test_request_parts_keep_param_order() {
        let key = FetchKey::new(SourceKind::MarketMovers, ["gainers", "1d"]);
        let (url, query) = adapter().request_parts(&key);
        assert!(url.ends_with("/api/market/movers"));
        assert_eq!(
            query,
            vec![
                ("category".to_string(), "gainers".to_string()),
                ("timeframe".to_string(), "1d".to_string()),
            ]
        );
    }

    #[test]
    fn test_request_parts_bare_key() {
        let (url, query) = adapter().request_parts(&FetchKey::bare(SourceKind::SurgeScanner));
        assert!(url.ends_with("/api/scanner/surge"));
        assert!(query.is_empty());
    }

    #[test]
    fn test_every_source_has_distinct_path() {
        let mut paths: Vec<_> = SourceKind::ALL.iter().map(|k| endpoint_path(*k)).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), SourceKind::ALL.len());
    }
}
