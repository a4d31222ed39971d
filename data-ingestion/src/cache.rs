//! Staleness-aware cache with stale-while-revalidate and fetch deduplication
//!
//! Every `FetchKey` owns its own entry lock, so unrelated sources never
//! serialize behind each other. Upstream calls run on spawned tasks; callers
//! only hold a shared handle to the result.

use chrono::{DateTime, Utc};
use common::{FetchError, FetchKey, SourcePayload, SourceSnapshot};
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::connectors::SourceAdapter;
use crate::event_bus::{CacheEvent, EventBus};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Used for entries nobody configured explicitly
    pub default_stale_after: Duration,
    /// Timeout for `refresh` calls that do not supply their own
    pub fetch_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_stale_after: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of one upstream refresh
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Updated { fetched_at: DateTime<Utc> },
    Failed(FetchError),
    /// A refresh issued later already landed; this result was discarded
    Superseded { issued_at: DateTime<Utc> },
}

impl RefreshOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, RefreshOutcome::Updated { .. })
    }
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Awaitable handle to an in-flight refresh. Cloning or dropping it never
/// affects the underlying fetch.
#[derive(Clone)]
pub struct RefreshHandle {
    inner: SharedRefresh,
    joined: bool,
}

impl RefreshHandle {
    /// True if this call attached to a fetch that was already running
    pub fn joined_existing(&self) -> bool {
        self.joined
    }
}

impl Future for RefreshHandle {
    type Output = RefreshOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

struct EntryState {
    value: Option<Arc<SourcePayload>>,
    fetched_at: Option<DateTime<Utc>>,
    stale_after: Duration,
    invalidated: bool,
    in_flight: Option<(u64, SharedRefresh)>,
    last_error: Option<FetchError>,
}

impl EntryState {
    fn new(stale_after: Duration) -> Self {
        Self {
            value: None,
            fetched_at: None,
            stale_after,
            invalidated: false,
            in_flight: None,
            last_error: None,
        }
    }

    /// Stale when never fetched, explicitly invalidated, the last revalidation
    /// failed, or older than `stale_after`.
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.fetched_at {
            None => true,
            Some(at) => {
                self.invalidated
                    || self.last_error.is_some()
                    || age(at, now) > self.stale_after
            }
        }
    }

    /// In-flight handle, unless its task already finished without clearing it
    fn live_in_flight(&self) -> Option<&SharedRefresh> {
        self.in_flight
            .as_ref()
            .map(|(_, fut)| fut)
            .filter(|fut| fut.peek().is_none())
    }

    fn snapshot(&self, key: &FetchKey, now: DateTime<Utc>) -> SourceSnapshot {
        SourceSnapshot {
            key: key.clone(),
            payload: self.value.clone(),
            fetched_at: self.fetched_at,
            is_stale: self.is_stale(now),
            last_error: self.last_error.clone(),
            in_flight: self.live_in_flight().is_some(),
            read_at: now,
        }
    }
}

fn age(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - at).to_std().unwrap_or(Duration::ZERO)
}

fn lock(entry: &Mutex<EntryState>) -> MutexGuard<'_, EntryState> {
    entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct CacheInner {
    entries: DashMap<FetchKey, Arc<Mutex<EntryState>>>,
    adapter: Arc<dyn SourceAdapter>,
    config: CacheConfig,
    bus: EventBus,
    next_seq: AtomicU64,
}

/// Keyed store of the last good value per `FetchKey`.
///
/// `get` never blocks on I/O. `refresh` starts at most one upstream call per
/// key; concurrent callers attach to it. A failed refresh keeps the previous
/// value and `fetched_at` and records `last_error`.
#[derive(Clone)]
pub struct StalenessCache {
    inner: Arc<CacheInner>,
}

impl StalenessCache {
    pub fn new(adapter: Arc<dyn SourceAdapter>, config: CacheConfig) -> Self {
        Self::with_event_bus(adapter, config, EventBus::default())
    }

    pub fn with_event_bus(adapter: Arc<dyn SourceAdapter>, config: CacheConfig, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: DashMap::new(),
                adapter,
                config,
                bus,
                next_seq: AtomicU64::new(1),
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    fn entry(&self, key: &FetchKey) -> Arc<Mutex<EntryState>> {
        if let Some(existing) = self.inner.entries.get(key).map(|e| e.value().clone()) {
            return existing;
        }
        self.inner
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(EntryState::new(self.inner.config.default_stale_after))))
            .value()
            .clone()
    }

    /// Set the staleness tolerance for a key, creating the entry if needed
    pub fn configure(&self, key: &FetchKey, stale_after: Duration) {
        let entry = self.entry(key);
        lock(&entry).stale_after = stale_after;
    }

    /// Best currently-held value, whether or not it is stale
    pub fn get(&self, key: &FetchKey) -> SourceSnapshot {
        let now = Utc::now();
        let entry = self.inner.entries.get(key).map(|e| e.value().clone());
        let Some(entry) = entry else {
            return SourceSnapshot::empty(key.clone(), now);
        };
        let state = lock(&entry);
        state.snapshot(key, now)
    }

    /// Snapshots for several keys, read independently
    pub fn snapshots<'a, I>(&self, keys: I) -> Vec<SourceSnapshot>
    where
        I: IntoIterator<Item = &'a FetchKey>,
    {
        keys.into_iter().map(|key| self.get(key)).collect()
    }

    /// Snapshot of every entry currently held, ordered by key
    pub fn snapshot_all(&self) -> Vec<SourceSnapshot> {
        let mut keys = self.keys();
        keys.sort();
        self.snapshots(keys.iter())
    }

    pub fn keys(&self) -> Vec<FetchKey> {
        self.inner.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Holds a value no older than `max_age` that has not been invalidated
    pub fn is_fresh(&self, key: &FetchKey, max_age: Duration) -> bool {
        let Some(entry) = self.inner.entries.get(key).map(|e| e.value().clone()) else {
            return false;
        };
        let state = lock(&entry);
        let fresh = match state.fetched_at {
            Some(at) => state.value.is_some() && !state.invalidated && age(at, Utc::now()) <= max_age,
            None => false,
        };
        fresh
    }

    /// Start (or join) a refresh using the default fetch timeout
    pub fn refresh(&self, key: &FetchKey) -> RefreshHandle {
        self.refresh_with_timeout(key, self.inner.config.fetch_timeout)
    }

    /// Start a refresh unless one is already in flight for `key`, in which
    /// case the returned handle resolves with that fetch's outcome.
    ///
    /// Must be called from within a tokio runtime.
    pub fn refresh_with_timeout(&self, key: &FetchKey, timeout: Duration) -> RefreshHandle {
        let entry = self.entry(key);
        let mut state = lock(&entry);

        if let Some(existing) = state.live_in_flight() {
            debug!(key = %key, "Joining in-flight refresh");
            return RefreshHandle {
                inner: existing.clone(),
                joined: true,
            };
        }

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let issued_at = Utc::now();
        let cache = self.clone();
        let task_key = key.clone();
        let task =
            tokio::spawn(async move { cache.run_fetch(task_key, seq, issued_at, timeout).await });

        // A cancelled task never reached `apply`; release the slot here
        let cache = self.clone();
        let task_key = key.clone();
        let shared = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => cache.apply(&task_key, seq, issued_at, Err(FetchError::Aborted(e.to_string()))),
            }
        }
        .boxed()
        .shared();

        state.in_flight = Some((seq, shared.clone()));
        RefreshHandle {
            inner: shared,
            joined: false,
        }
    }

    async fn run_fetch(
        &self,
        key: FetchKey,
        seq: u64,
        issued_at: DateTime<Utc>,
        timeout: Duration,
    ) -> RefreshOutcome {
        let started = Instant::now();
        debug!(key = %key, adapter = self.inner.adapter.name(), "Refreshing");

        // A panicking adapter still has to clear the in-flight slot
        let fetch = AssertUnwindSafe(self.inner.adapter.fetch(&key)).catch_unwind();
        let result = match tokio::time::timeout(timeout, fetch).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(FetchError::Aborted(panic_message(panic.as_ref()))),
            Err(_) => Err(FetchError::Timeout {
                after_ms: timeout.as_millis() as u64,
            }),
        };

        let outcome = self.apply(&key, seq, issued_at, result);
        match &outcome {
            RefreshOutcome::Updated { .. } => debug!(
                key = %key,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Refresh succeeded"
            ),
            RefreshOutcome::Failed(err) => warn!(
                key = %key,
                error = %err,
                kind = err.kind(),
                "Refresh failed, serving last good value"
            ),
            RefreshOutcome::Superseded { .. } => debug!(key = %key, "Refresh result superseded"),
        }
        outcome
    }

    /// Fold a finished fetch into the entry. Results are ordered by the time
    /// their request was issued, not by completion.
    fn apply(
        &self,
        key: &FetchKey,
        seq: u64,
        issued_at: DateTime<Utc>,
        result: Result<SourcePayload, FetchError>,
    ) -> RefreshOutcome {
        // Evicted mid-flight entries are recreated: the result is still useful
        let entry = self.entry(key);

        let (outcome, event) = {
            let mut state = lock(&entry);
            if matches!(state.in_flight, Some((current, _)) if current == seq) {
                state.in_flight = None;
            }

            let newer_landed = state.fetched_at.map_or(false, |at| at > issued_at);
            match result {
                _ if newer_landed => (RefreshOutcome::Superseded { issued_at }, None),
                Ok(payload) => {
                    let records = payload.len();
                    state.value = Some(Arc::new(payload));
                    state.fetched_at = Some(issued_at);
                    state.last_error = None;
                    state.invalidated = false;
                    (
                        RefreshOutcome::Updated { fetched_at: issued_at },
                        Some(CacheEvent::Updated {
                            key: key.clone(),
                            fetched_at: issued_at,
                            records,
                        }),
                    )
                }
                Err(err) => {
                    state.last_error = Some(err.clone());
                    (
                        RefreshOutcome::Failed(err.clone()),
                        Some(CacheEvent::RefreshFailed {
                            key: key.clone(),
                            error: err,
                        }),
                    )
                }
            }
        };

        if let Some(event) = event {
            self.inner.bus.publish(event);
        }
        outcome
    }

    /// Mark the entry stale without discarding its value. Returns false if
    /// the key is unknown.
    pub fn invalidate(&self, key: &FetchKey) -> bool {
        let Some(entry) = self.inner.entries.get(key).map(|e| e.value().clone()) else {
            return false;
        };
        lock(&entry).invalidated = true;
        self.inner.bus.publish(CacheEvent::Invalidated { key: key.clone() });
        true
    }

    /// Drop the entry entirely. An in-flight fetch still completes and
    /// repopulates it.
    pub fn evict(&self, key: &FetchKey) -> bool {
        let removed = self.inner.entries.remove(key).is_some();
        if removed {
            self.inner.bus.publish(CacheEvent::Evicted { key: key.clone() });
        }
        removed
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("adapter panicked: {}", detail)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{Quote, SourceKind};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Adapter returning scripted results after an optional delay
    pub(crate) struct ScriptedAdapter {
        pub calls: AtomicUsize,
        pub delay: Duration,
        script: Mutex<VecDeque<Result<SourcePayload, FetchError>>>,
    }

    impl ScriptedAdapter {
        pub(crate) fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                script: Mutex::new(VecDeque::new()),
            }
        }

        pub(crate) fn push(&self, result: Result<SourcePayload, FetchError>) {
            self.script.lock().unwrap().push_back(result);
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedAdapter {
        async fn fetch(&self, key: &FetchKey) -> Result<SourcePayload, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(quote_payload(key.symbol().unwrap_or("SPY"), 100.0)))
        }
    }

    pub(crate) fn quote_payload(symbol: &str, price: f64) -> SourcePayload {
        SourcePayload::Quotes(vec![Quote {
            symbol: symbol.to_string(),
            price,
            change_percent: Some(0.5),
            volume: Some(1_000_000.0),
            avg_volume: None,
            timestamp: Utc::now(),
        }])
    }

    fn price_of(snapshot: &SourceSnapshot) -> Option<f64> {
        match snapshot.payload.as_deref() {
            Some(SourcePayload::Quotes(q)) => q.first().map(|q| q.price),
            _ => None,
        }
    }

    fn cache_with(adapter: Arc<ScriptedAdapter>) -> StalenessCache {
        StalenessCache::new(adapter, CacheConfig::default())
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_fetch() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::from_millis(50)));
        let cache = cache_with(adapter.clone());
        let key = FetchKey::quote("AAPL");

        let handles: Vec<_> = (0..10).map(|_| cache.refresh(&key)).collect();
        assert!(!handles[0].joined_existing());
        assert!(handles[1..].iter().all(|h| h.joined_existing()));

        let outcomes = futures_util::future::join_all(handles).await;

        assert_eq!(adapter.calls(), 1);
        assert!(outcomes.iter().all(|o| o == &outcomes[0]));
        assert!(outcomes[0].is_updated());
    }

    #[tokio::test]
    async fn test_refresh_after_completion_fetches_again() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        let cache = cache_with(adapter.clone());
        let key = FetchKey::quote("AAPL");

        cache.refresh(&key).await;
        cache.refresh(&key).await;

        assert_eq!(adapter.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_good_value() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        adapter.push(Ok(quote_payload("AAPL", 190.0)));
        adapter.push(Err(FetchError::Status { status: 503 }));
        let cache = cache_with(adapter.clone());
        let key = FetchKey::quote("AAPL");

        let first = cache.refresh(&key).await;
        let fetched_at = match first {
            RefreshOutcome::Updated { fetched_at } => fetched_at,
            other => panic!("Expected update, got {:?}", other),
        };
        assert!(!cache.get(&key).is_stale);

        let second = cache.refresh(&key).await;
        assert_eq!(second, RefreshOutcome::Failed(FetchError::Status { status: 503 }));

        let snapshot = cache.get(&key);
        assert_eq!(price_of(&snapshot), Some(190.0));
        assert!(snapshot.is_stale);
        assert_eq!(snapshot.last_error, Some(FetchError::Status { status: 503 }));
        assert_eq!(snapshot.fetched_at, Some(fetched_at));
    }

    #[tokio::test]
    async fn test_success_clears_last_error() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        adapter.push(Err(FetchError::Transport("reset".to_string())));
        adapter.push(Ok(quote_payload("AAPL", 191.0)));
        let cache = cache_with(adapter);
        let key = FetchKey::quote("AAPL");

        cache.refresh(&key).await;
        let snapshot = cache.get(&key);
        assert!(snapshot.payload.is_none());
        assert!(snapshot.last_error.is_some());

        cache.refresh(&key).await;
        let snapshot = cache.get(&key);
        assert_eq!(price_of(&snapshot), Some(191.0));
        assert!(snapshot.last_error.is_none());
        assert!(!snapshot.is_stale);
    }

    struct PanickingAdapter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceAdapter for PanickingAdapter {
        async fn fetch(&self, _key: &FetchKey) -> Result<SourcePayload, FetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("malformed upstream row");
            }
            Ok(quote_payload("AAPL", 192.0))
        }
    }

    #[tokio::test]
    async fn test_panicking_adapter_releases_in_flight_slot() {
        let adapter = Arc::new(PanickingAdapter {
            calls: AtomicUsize::new(0),
        });
        let cache = StalenessCache::new(adapter.clone(), CacheConfig::default());
        let key = FetchKey::quote("AAPL");

        // Nobody polls this handle; the slot must still clear
        drop(cache.refresh(&key));
        for _ in 0..100 {
            if !cache.get(&key).in_flight {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let snapshot = cache.get(&key);
        assert!(!snapshot.in_flight);
        match &snapshot.last_error {
            Some(FetchError::Aborted(msg)) => assert!(msg.contains("malformed upstream row")),
            other => panic!("Expected aborted fetch, got {:?}", other),
        }

        let retry = cache.refresh(&key);
        assert!(!retry.joined_existing());
        assert!(retry.await.is_updated());
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
        assert_eq!(price_of(&cache.get(&key)), Some(192.0));
    }

    #[tokio::test]
    async fn test_hung_upstream_times_out() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::from_millis(500)));
        let cache = cache_with(adapter);
        let key = FetchKey::quote("AAPL");

        let outcome = cache.refresh_with_timeout(&key, Duration::from_millis(20)).await;
        assert_eq!(outcome, RefreshOutcome::Failed(FetchError::Timeout { after_ms: 20 }));
        assert!(!cache.get(&key).in_flight);
    }

    #[tokio::test]
    async fn test_older_result_does_not_overwrite_newer() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        let cache = cache_with(adapter);
        let key = FetchKey::quote("AAPL");

        let newer = Utc::now();
        let older = newer - chrono::Duration::seconds(5);

        let applied = cache.apply(&key, 10, newer, Ok(quote_payload("AAPL", 200.0)));
        assert!(applied.is_updated());

        let late = cache.apply(&key, 9, older, Ok(quote_payload("AAPL", 150.0)));
        assert_eq!(late, RefreshOutcome::Superseded { issued_at: older });

        let stale_failure = cache.apply(&key, 8, older, Err(FetchError::Status { status: 500 }));
        assert_eq!(stale_failure, RefreshOutcome::Superseded { issued_at: older });

        let snapshot = cache.get(&key);
        assert_eq!(price_of(&snapshot), Some(200.0));
        assert_eq!(snapshot.fetched_at, Some(newer));
        assert!(snapshot.last_error.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_keeps_value_but_marks_stale() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        let cache = cache_with(adapter);
        let key = FetchKey::quote("AAPL");

        assert!(!cache.invalidate(&key));
        cache.refresh(&key).await;
        assert!(cache.is_fresh(&key, Duration::from_secs(60)));

        assert!(cache.invalidate(&key));
        let snapshot = cache.get(&key);
        assert!(snapshot.has_value());
        assert!(snapshot.is_stale);
        assert!(!cache.is_fresh(&key, Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_staleness_follows_configured_tolerance() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        let cache = cache_with(adapter);
        let key = FetchKey::quote("AAPL");
        cache.configure(&key, Duration::from_millis(30));

        cache.refresh(&key).await;
        assert!(!cache.get(&key).is_stale);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let snapshot = cache.get(&key);
        assert!(snapshot.is_stale);
        assert!(snapshot.has_value());
    }

    #[tokio::test]
    async fn test_evict_removes_entry() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        let cache = cache_with(adapter);
        let key = FetchKey::quote("AAPL");

        cache.refresh(&key).await;
        assert_eq!(cache.len(), 1);

        assert!(cache.evict(&key));
        assert!(cache.is_empty());
        assert!(!cache.get(&key).has_value());
    }

    #[tokio::test]
    async fn test_dropped_handle_does_not_cancel_fetch() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::from_millis(20)));
        let cache = cache_with(adapter.clone());
        let key = FetchKey::quote("AAPL");

        drop(cache.refresh(&key));
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(adapter.calls(), 1);
        assert!(cache.get(&key).has_value());
    }

    #[tokio::test]
    async fn test_events_published() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        adapter.push(Ok(quote_payload("AAPL", 1.0)));
        adapter.push(Err(FetchError::Decode("bad".to_string())));
        let cache = cache_with(adapter);
        let mut events = cache.events().subscribe();
        let key = FetchKey::quote("AAPL");

        cache.refresh(&key).await;
        cache.refresh(&key).await;

        assert!(matches!(events.recv().await.unwrap(), CacheEvent::Updated { records: 1, .. }));
        assert!(matches!(events.recv().await.unwrap(), CacheEvent::RefreshFailed { .. }));
    }

    #[tokio::test]
    async fn test_unknown_key_reads_empty() {
        let cache = cache_with(Arc::new(ScriptedAdapter::new(Duration::ZERO)));
        let snapshot = cache.get(&FetchKey::bare(SourceKind::SurgeScanner));
        assert!(!snapshot.has_value());
        assert!(snapshot.is_stale);
        assert!(snapshot.last_error.is_none());
    }
}
