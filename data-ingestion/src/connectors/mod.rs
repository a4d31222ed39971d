pub mod commands;
pub mod http;

pub use commands::{HttpCommandClient, ReportRequest, ScanTrigger, SignalForward, UpstreamCommands};
pub use http::HttpSourceAdapter;

use async_trait::async_trait;
use common::{FetchError, FetchKey, SourcePayload};

/// Fetches one logical dataset for one key. Pure I/O boundary: no caching,
/// no retries, no scheduling.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(&self, key: &FetchKey) -> Result<SourcePayload, FetchError>;

    /// Short name for logs
    fn name(&self) -> &str {
        "source-adapter"
    }
}
