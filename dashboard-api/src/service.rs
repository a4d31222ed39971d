//! Consumer Interface
//!
//! Read-only queries go through the cache and the classification engine and
//! never touch the network. Mutations go to the upstream command client and
//! then nudge the cache entries they affect.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use common::{BotStatus, CadenceClass, CompositeSignal, FetchKey, SourceKind, SourcePayload, SourceSnapshot};
use data_ingestion::{
    CacheConfig, CacheEvent, EnabledFlag, EventBus, HttpCommandClient, HttpSourceAdapter,
    IngestionConfig, PollGate, PollOptions, PollScheduler, RefreshOutcome, RegistrationHandle,
    ReportRequest, ScanTrigger, SchedulerConfig, SignalForward, SourceAdapter, StalenessCache,
    UpstreamCommands,
};
use portfolio_risk::{
    BreakerStatus, PositionSize, PreferencesManager, RiskProfile, SizingInputs, TradeOutcome,
    ValidationResult,
};
use serde::Serialize;
use signal_generation::{merge, ClassificationEngine, ClassificationResult, ViewKind, ViewSpec};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::settings::DashboardSettings;
use crate::views::{view_keys, ViewParams};

/// A composite with its classification, as shown side by side
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedSignal {
    pub signal: CompositeSignal,
    pub classification: ClassificationResult,
}

/// Registrations taken out for one view
#[derive(Debug)]
pub struct ViewSubscription {
    pub view: ViewKind,
    pub params: ViewParams,
    handles: Vec<RegistrationHandle>,
}

impl ViewSubscription {
    pub fn keys(&self) -> Vec<&FetchKey> {
        self.handles.iter().map(|h| h.key()).collect()
    }
}

#[derive(Clone)]
pub struct DashboardService {
    cache: StalenessCache,
    scheduler: PollScheduler,
    ingestion: IngestionConfig,
    engine: ClassificationEngine,
    commands: Arc<dyn UpstreamCommands>,
    preferences: Arc<RwLock<PreferencesManager>>,
}

impl DashboardService {
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        commands: Arc<dyn UpstreamCommands>,
        settings: &DashboardSettings,
    ) -> Self {
        let ingestion = settings.ingestion.clone();
        let fast = ingestion.cadences.class_interval(CadenceClass::Fast);
        let cache = StalenessCache::with_event_bus(
            adapter,
            CacheConfig {
                default_stale_after: ingestion.stale_after_for(fast),
                fetch_timeout: ingestion.fetch_timeout(),
            },
            EventBus::new(ingestion.event_bus_capacity),
        );
        let scheduler = PollScheduler::new(cache.clone(), SchedulerConfig::from(&ingestion));

        Self {
            cache,
            scheduler,
            ingestion,
            engine: ClassificationEngine::new(settings.classification.clone()),
            commands,
            preferences: Arc::new(RwLock::new(PreferencesManager::new())),
        }
    }

    /// Service wired to the HTTP upstream described by `settings`
    pub fn from_settings(settings: &DashboardSettings) -> Result<Self> {
        let timeout = settings.ingestion.fetch_timeout();
        let adapter = HttpSourceAdapter::new(settings.ingestion.base_url.clone(), timeout)
            .context("Failed to build source adapter")?;
        let commands = HttpCommandClient::new(settings.ingestion.base_url.clone(), timeout)
            .context("Failed to build command client")?;

        let service = Self::new(Arc::new(adapter), Arc::new(commands), settings);

        if let Some(path) = &settings.risk_profile_path {
            let profile = portfolio_risk::load_config(path)
                .with_context(|| format!("Failed to load risk profile from {}", path))?;
            let result = service.apply_preferences(profile);
            if !result.is_valid() {
                return Err(anyhow!(
                    "Risk profile {} is invalid: {} issue(s)",
                    path,
                    result.issues.len()
                ));
            }
        }

        Ok(service)
    }

    pub fn cache(&self) -> &StalenessCache {
        &self.cache
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    fn prefs(&self) -> RwLockReadGuard<'_, PreferencesManager> {
        self.preferences.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn prefs_mut(&self) -> RwLockWriteGuard<'_, PreferencesManager> {
        self.preferences.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ---- Reads ----

    /// Everything currently cached about one symbol
    pub fn get_composite(&self, symbol: &str) -> CompositeSignal {
        let snapshots: Vec<SourceSnapshot> = self
            .cache
            .snapshot_all()
            .into_iter()
            .filter(|s| s.key.source().is_symbol_keyed())
            .collect();

        let view_spec = ViewSpec::new(ViewKind::Full).with_symbols([symbol]);
        merge(&view_spec, &snapshots)
            .into_iter()
            .next()
            .unwrap_or_else(|| CompositeSignal::new(common::normalize_symbol(symbol)))
    }

    /// Recomputed on every call from the current composite
    pub fn get_classification(&self, symbol: &str) -> ClassificationResult {
        self.engine.classify(&self.get_composite(symbol))
    }

    /// Merge the view's keys plus every cached quote
    pub fn get_view(&self, view: ViewKind, params: &ViewParams) -> Vec<CompositeSignal> {
        let mut keys = view_keys(view, params);
        if view.includes(SourceKind::Quote) {
            keys.extend(
                self.cache
                    .keys()
                    .into_iter()
                    .filter(|k| k.source() == SourceKind::Quote),
            );
            keys.sort();
            keys.dedup();
        }

        let snapshots = self.cache.snapshots(keys.iter());
        let view_spec = ViewSpec::new(view).with_symbols(&params.symbols);
        merge(&view_spec, &snapshots)
    }

    pub fn classify_view(&self, view: ViewKind, params: &ViewParams) -> Vec<ClassifiedSignal> {
        self.get_view(view, params)
            .into_iter()
            .map(|signal| {
                let classification = self.engine.classify(&signal);
                ClassifiedSignal {
                    signal,
                    classification,
                }
            })
            .collect()
    }

    pub fn snapshot(&self, key: &FetchKey) -> SourceSnapshot {
        self.cache.get(key)
    }

    /// Last known status of a bot, stale or not
    pub fn bot_status(&self, bot: &str) -> Option<BotStatus> {
        let snapshot = self.cache.get(&FetchKey::bot_status(bot));
        match snapshot.payload.as_deref() {
            Some(SourcePayload::BotStatus(status)) => Some(status.clone()),
            _ => None,
        }
    }

    pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
        self.cache.events().subscribe()
    }

    // ---- Subscriptions ----

    /// Poll `key` every `interval`; staleness tolerance follows the configured multiplier
    pub fn subscribe(&self, key: FetchKey, interval: Duration) -> RegistrationHandle {
        let options = PollOptions::every(interval).stale_after(self.ingestion.stale_after_for(interval));
        self.scheduler.register(key, options)
    }

    /// Poll `key` at its source's configured cadence
    pub fn subscribe_default(&self, key: FetchKey) -> RegistrationHandle {
        let interval = self.ingestion.interval_for(key.source());
        self.subscribe(key, interval)
    }

    pub fn subscribe_with(&self, key: FetchKey, options: PollOptions) -> RegistrationHandle {
        self.scheduler.register(key, options)
    }

    pub fn unsubscribe(&self, handle: RegistrationHandle) -> bool {
        self.scheduler.unregister(handle)
    }

    /// Register every key the view reads, at each source's cadence, sharing one gate
    pub fn subscribe_view(&self, view: ViewKind, params: ViewParams, gate: PollGate) -> ViewSubscription {
        let handles = view_keys(view, &params)
            .into_iter()
            .map(|key| {
                let interval = self.ingestion.interval_for(key.source());
                let options = PollOptions::every(interval)
                    .stale_after(self.ingestion.stale_after_for(interval))
                    .gated(gate.clone());
                self.scheduler.register(key, options)
            })
            .collect::<Vec<_>>();

        info!(view = %view, keys = handles.len(), "View subscribed");
        ViewSubscription {
            view,
            params,
            handles,
        }
    }

    /// Convenience: subscribe a view behind a visibility flag
    pub fn subscribe_view_toggled(&self, view: ViewKind, params: ViewParams) -> (ViewSubscription, EnabledFlag) {
        let flag = EnabledFlag::new(true);
        let subscription = self.subscribe_view(view, params, PollGate::Flag(flag.clone()));
        (subscription, flag)
    }

    pub fn unsubscribe_view(&self, subscription: ViewSubscription) -> usize {
        let view = subscription.view;
        let removed = subscription
            .handles
            .into_iter()
            .map(|handle| self.scheduler.unregister(handle))
            .filter(|removed| *removed)
            .count();
        info!(view = %view, removed, "View unsubscribed");
        removed
    }

    // ---- Preferences and risk ----

    pub fn preferences(&self) -> RiskProfile {
        self.prefs().profile().clone()
    }

    /// Validate and apply locally; the previous profile stays on rejection
    pub fn apply_preferences(&self, profile: RiskProfile) -> ValidationResult {
        self.prefs_mut().apply(profile)
    }

    /// Validate, persist upstream, then apply. Invalid profiles never leave
    /// the process; an upstream failure leaves the applied profile unchanged.
    pub async fn save_preferences(&self, profile: RiskProfile) -> Result<ValidationResult> {
        let result = self.prefs().validate(&profile);
        if !result.is_valid() {
            warn!(issues = result.issues.len(), "Preferences rejected before save");
            return Ok(result);
        }

        let body = serde_json::to_value(&profile).context("Failed to encode preferences")?;
        self.commands.save_preferences(&body).await?;

        Ok(self.apply_preferences(profile))
    }

    pub fn position_size(&self, inputs: &SizingInputs) -> PositionSize {
        self.prefs().position_size(inputs)
    }

    pub fn breaker_status(&self, history: &[TradeOutcome], now: DateTime<Utc>) -> BreakerStatus {
        self.prefs().breaker_status(history, now)
    }

    // ---- Mutations ----

    /// Toggle a bot upstream, then refetch its status. Returns the refreshed
    /// snapshot (still the previous value if the refetch failed).
    pub async fn toggle_bot(&self, bot: &str, enabled: bool) -> Result<SourceSnapshot> {
        self.commands.toggle_bot(bot, enabled).await?;

        let key = FetchKey::bot_status(bot);
        self.cache.invalidate(&key);
        let outcome = self.cache.refresh(&key).await;
        if let RefreshOutcome::Failed(err) = &outcome {
            warn!(bot = %bot, error = %err, "Bot status refresh after toggle failed");
        }

        Ok(self.cache.get(&key))
    }

    pub async fn trigger_scan(&self, bot: &str) -> Result<ScanTrigger> {
        let trigger = self.commands.trigger_scan(bot).await?;

        let key = FetchKey::bot_status(bot);
        self.cache.invalidate(&key);
        // Status catches up in the background
        let _ = self.cache.refresh(&key);

        Ok(trigger)
    }

    pub async fn forward_signal(&self, signal: &SignalForward) -> Result<()> {
        self.commands.forward_signal(signal).await
    }

    /// Forward the cached surge alert for `symbol` to `channel`
    pub async fn forward_surge_alert(&self, channel: &str, symbol: &str) -> Result<SignalForward> {
        let composite = self.get_composite(symbol);
        let surge = composite
            .surge
            .as_ref()
            .ok_or_else(|| anyhow!("No surge data cached for {}", composite.symbol))?;

        let headline = format!(
            "{} surging {:+.2}%{}",
            composite.symbol,
            surge.change_percent,
            surge
                .volume_ratio
                .map(|r| format!(" on {:.1}x volume", r))
                .unwrap_or_default()
        );
        let payload = serde_json::to_value(surge).context("Failed to encode surge alert")?;
        let signal = SignalForward::new(channel, composite.symbol.clone(), headline, payload);

        self.commands.forward_signal(&signal).await?;
        Ok(signal)
    }

    pub async fn generate_report(&self, request: &ReportRequest) -> Result<common::ReportPreview> {
        let report = self.commands.generate_report(request).await?;
        self.cache
            .invalidate(&FetchKey::new(SourceKind::ReportPreview, [request.report.as_str()]));
        Ok(report)
    }

    /// Stop every poll loop; cached values stay readable
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}
