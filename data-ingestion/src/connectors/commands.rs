//! Mutation-style upstream calls, invoked on user action and never polled

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ReportPreview;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Acknowledgement of an on-demand scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanTrigger {
    pub bot: String,
    pub scan_id: String,
    #[serde(default)]
    pub queued_at: Option<DateTime<Utc>>,
}

/// Signal forwarded to a downstream channel (e.g. a surge alert)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalForward {
    pub id: Uuid,
    pub channel: String,
    pub symbol: String,
    pub headline: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SignalForward {
    pub fn new(
        channel: impl Into<String>,
        symbol: impl Into<String>,
        headline: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            symbol: symbol.into(),
            headline: headline.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub report: String,
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// Upstream mutations exposed to the consumer layer
#[async_trait]
pub trait UpstreamCommands: Send + Sync {
    async fn toggle_bot(&self, bot: &str, enabled: bool) -> Result<()>;

    async fn trigger_scan(&self, bot: &str) -> Result<ScanTrigger>;

    /// Persist already-validated preferences
    async fn save_preferences(&self, preferences: &serde_json::Value) -> Result<()>;

    async fn forward_signal(&self, signal: &SignalForward) -> Result<()>;

    async fn generate_report(&self, request: &ReportRequest) -> Result<ReportPreview>;
}

/// HTTP implementation of [`UpstreamCommands`]
pub struct HttpCommandClient {
    base_url: String,
    client: Client,
}

impl HttpCommandClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}/api/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        if !response.status().is_success() {
            return Err(anyhow!("POST {} returned {}", url, response.status()));
        }

        Ok(response)
    }
}

#[async_trait]
impl UpstreamCommands for HttpCommandClient {
    async fn toggle_bot(&self, bot: &str, enabled: bool) -> Result<()> {
        self.post(
            &format!("bots/{}/toggle", bot),
            &serde_json::json!({ "enabled": enabled }),
        )
        .await?;
        info!(bot = %bot, enabled, "Bot toggled");
        Ok(())
    }

    async fn trigger_scan(&self, bot: &str) -> Result<ScanTrigger> {
        let response = self
            .post(&format!("bots/{}/scan", bot), &serde_json::json!({}))
            .await?;
        let trigger: ScanTrigger = response
            .json()
            .await
            .context("Failed to decode scan trigger response")?;
        info!(bot = %bot, scan_id = %trigger.scan_id, "Scan triggered");
        Ok(trigger)
    }

    async fn save_preferences(&self, preferences: &serde_json::Value) -> Result<()> {
        self.post("preferences", preferences).await?;
        info!("Preferences saved upstream");
        Ok(())
    }

    async fn forward_signal(&self, signal: &SignalForward) -> Result<()> {
        self.post(&format!("signals/{}", signal.channel), signal).await?;
        info!(
            channel = %signal.channel,
            symbol = %signal.symbol,
            "Signal forwarded"
        );
        Ok(())
    }

    async fn generate_report(&self, request: &ReportRequest) -> Result<ReportPreview> {
        let response = self.post("reports/generate", request).await?;
        let report: ReportPreview = response
            .json()
            .await
            .context("Failed to decode generated report")?;
        info!(report = %report.report, "Report generated");
        Ok(report)
    }
}
