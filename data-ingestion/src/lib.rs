//! Upstream ingestion: source adapters, the staleness cache and the poll scheduler

pub mod cache;
pub mod config;
pub mod connectors;
pub mod event_bus;
pub mod scheduler;

pub use cache::{CacheConfig, RefreshHandle, RefreshOutcome, StalenessCache};
pub use config::{load_config, CadenceConfig, IngestionConfig};
pub use connectors::{
    HttpCommandClient, HttpSourceAdapter, ReportRequest, ScanTrigger, SignalForward, SourceAdapter,
    UpstreamCommands,
};
pub use event_bus::{CacheEvent, EventBus};
pub use scheduler::{EnabledFlag, PollGate, PollOptions, PollScheduler, RegistrationHandle, SchedulerConfig};
