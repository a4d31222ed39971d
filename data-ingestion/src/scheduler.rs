//! Poll scheduler: reference-counted registrations driving cache refreshes
//!
//! Each distinct effective cadence gets one background task that fans out
//! `refresh` calls to every key polled at that cadence. A key's cadence is the
//! shortest interval among its registrations.

use common::FetchKey;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::StalenessCache;
use crate::config::IngestionConfig;

/// Shared on/off switch for a registration (e.g. panel visibility)
#[derive(Debug, Clone)]
pub struct EnabledFlag(Arc<AtomicBool>);

impl EnabledFlag {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Decides, per tick, whether a registration currently wants polling
#[derive(Clone)]
pub enum PollGate {
    Always,
    Flag(EnabledFlag),
    Predicate(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl PollGate {
    pub fn is_open(&self) -> bool {
        match self {
            PollGate::Always => true,
            PollGate::Flag(flag) => flag.is_enabled(),
            PollGate::Predicate(pred) => pred(),
        }
    }
}

impl fmt::Debug for PollGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollGate::Always => f.write_str("Always"),
            PollGate::Flag(flag) => write!(f, "Flag({})", flag.is_enabled()),
            PollGate::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    /// Defaults to `interval * stale_multiplier`
    pub stale_after: Option<Duration>,
    pub gate: PollGate,
}

impl PollOptions {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            stale_after: None,
            gate: PollGate::Always,
        }
    }

    pub fn stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    pub fn gated(mut self, gate: PollGate) -> Self {
        self.gate = gate;
        self
    }
}

/// Proof of one registration; pass it back to `unregister`
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct RegistrationHandle {
    id: Uuid,
    key: FetchKey,
}

impl RegistrationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &FetchKey {
        &self.key
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub fetch_timeout: Duration,
    pub stale_multiplier: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            stale_multiplier: 2.0,
        }
    }
}

impl From<&IngestionConfig> for SchedulerConfig {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            fetch_timeout: config.fetch_timeout(),
            stale_multiplier: config.stale_multiplier,
        }
    }
}

impl SchedulerConfig {
    fn timeout_for(&self, cadence: Duration) -> Duration {
        self.fetch_timeout.min(cadence.mul_f64(0.8))
    }
}

struct Registration {
    key: FetchKey,
    interval: Duration,
    stale_after: Duration,
    gate: PollGate,
}

struct KeySchedule {
    registrations: BTreeSet<Uuid>,
    cadence: Duration,
    last_polled: Option<Instant>,
}

#[derive(Default)]
struct SchedulerState {
    registrations: HashMap<Uuid, Registration>,
    keys: HashMap<FetchKey, KeySchedule>,
    loops: HashMap<Duration, JoinHandle<()>>,
}

impl SchedulerState {
    fn registrations_for<'a>(&'a self, schedule: &'a KeySchedule) -> impl Iterator<Item = &'a Registration> + 'a {
        schedule
            .registrations
            .iter()
            .filter_map(move |id| self.registrations.get(id))
    }

    /// Shortest interval and strictest staleness tolerance across a key's registrations
    fn effective(&self, schedule: &KeySchedule) -> Option<(Duration, Duration)> {
        let cadence = self.registrations_for(schedule).map(|r| r.interval).min()?;
        let stale_after = self.registrations_for(schedule).map(|r| r.stale_after).min()?;
        Some((cadence, stale_after))
    }

    fn cadence_in_use(&self, cadence: Duration) -> bool {
        self.keys.values().any(|s| s.cadence == cadence)
    }
}

struct SchedulerInner {
    cache: StalenessCache,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
}

impl SchedulerInner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Keys on `cadence` with at least one open registration whose own
    /// interval has (roughly) elapsed since the key was last polled.
    fn due_keys(&self, cadence: Duration) -> Vec<FetchKey> {
        let now = Instant::now();
        let slack = cadence / 2;
        let mut state = self.lock();

        let mut due = Vec::new();
        for (key, schedule) in state.keys.iter().filter(|(_, s)| s.cadence == cadence) {
            let elapsed = schedule.last_polled.map(|at| now.duration_since(at));
            let wants_poll = state.registrations_for(schedule).any(|r| {
                r.gate.is_open() && elapsed.map_or(true, |e| e + slack >= r.interval)
            });
            if wants_poll {
                due.push(key.clone());
            } else {
                debug!(key = %key, "Poll skipped: paused or not yet due");
            }
        }

        for key in &due {
            if let Some(schedule) = state.keys.get_mut(key) {
                schedule.last_polled = Some(now);
            }
        }
        due
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, handle) in state.loops.drain() {
            handle.abort();
        }
    }
}

async fn run_cadence(inner: Weak<SchedulerInner>, cadence: Duration) {
    let mut ticker = interval_at(Instant::now() + cadence, cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };

        let due = inner.due_keys(cadence);
        if due.is_empty() {
            continue;
        }

        let timeout = inner.config.timeout_for(cadence);
        debug!(cadence_ms = cadence.as_millis() as u64, keys = due.len(), "Poll tick");
        for key in &due {
            // The cache spawns the fetch; failures are recorded there and the
            // next tick simply tries again.
            let _ = inner.cache.refresh_with_timeout(key, timeout);
        }
    }
}

/// Owns poll registrations and the background tasks that honour them.
///
/// Registrations for the same key share one cache entry and one timer. The
/// timer stops when the last registration goes away; the cached value stays.
#[derive(Clone)]
pub struct PollScheduler {
    inner: Arc<SchedulerInner>,
}

impl PollScheduler {
    pub fn new(cache: StalenessCache, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                cache,
                config,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    pub fn cache(&self) -> &StalenessCache {
        &self.inner.cache
    }

    /// Register interest in `key`. The first registration for a key triggers
    /// an immediate refresh (if its gate is open).
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(&self, key: FetchKey, options: PollOptions) -> RegistrationHandle {
        let id = Uuid::new_v4();
        let interval = options.interval.max(Duration::from_millis(1));
        let stale_after = options
            .stale_after
            .unwrap_or_else(|| interval.mul_f64(self.inner.config.stale_multiplier.max(1.0)));
        let gate_open = options.gate.is_open();

        let (first, cadence) = {
            let mut state = self.inner.lock();
            state.registrations.insert(
                id,
                Registration {
                    key: key.clone(),
                    interval,
                    stale_after,
                    gate: options.gate,
                },
            );

            let first = !state.keys.contains_key(&key);
            let schedule = state.keys.entry(key.clone()).or_insert_with(|| KeySchedule {
                registrations: BTreeSet::new(),
                cadence: interval,
                last_polled: None,
            });
            schedule.registrations.insert(id);

            let cadence = self.reschedule(&mut state, &key);
            if first && gate_open {
                if let Some(schedule) = state.keys.get_mut(&key) {
                    schedule.last_polled = Some(Instant::now());
                }
            }
            (first, cadence)
        };

        info!(
            key = %key,
            registration = %id,
            interval_ms = interval.as_millis() as u64,
            cadence_ms = cadence.as_millis() as u64,
            "Poll registered"
        );

        if first && gate_open {
            let _ = self
                .inner
                .cache
                .refresh_with_timeout(&key, self.inner.config.timeout_for(cadence));
        }

        RegistrationHandle { id, key }
    }

    /// Drop a registration. Returns false if it was already gone.
    pub fn unregister(&self, handle: RegistrationHandle) -> bool {
        let mut state = self.inner.lock();
        let Some(registration) = state.registrations.remove(&handle.id) else {
            return false;
        };
        let key = registration.key;

        let remaining = match state.keys.get_mut(&key) {
            Some(schedule) => {
                schedule.registrations.remove(&handle.id);
                schedule.registrations.len()
            }
            None => 0,
        };

        if remaining == 0 {
            state.keys.remove(&key);
            self.collect_idle_loops(&mut state);
            info!(key = %key, "Last registration removed, polling stopped");
        } else {
            let cadence = self.reschedule(&mut state, &key);
            info!(
                key = %key,
                remaining,
                cadence_ms = cadence.as_millis() as u64,
                "Poll unregistered"
            );
        }
        true
    }

    /// Recompute a key's cadence and staleness after its registrations changed
    fn reschedule(&self, state: &mut SchedulerState, key: &FetchKey) -> Duration {
        let Some((cadence, stale_after)) = state.keys.get(key).and_then(|s| state.effective(s)) else {
            return Duration::ZERO;
        };
        self.inner.cache.configure(key, stale_after);

        if let Some(schedule) = state.keys.get_mut(key) {
            if schedule.cadence != cadence {
                debug!(
                    key = %key,
                    from_ms = schedule.cadence.as_millis() as u64,
                    to_ms = cadence.as_millis() as u64,
                    "Cadence changed"
                );
                schedule.cadence = cadence;
            }
        }

        if !state.loops.contains_key(&cadence) {
            let weak = Arc::downgrade(&self.inner);
            state
                .loops
                .insert(cadence, tokio::spawn(run_cadence(weak, cadence)));
            info!(cadence_ms = cadence.as_millis() as u64, "Cadence loop started");
        }

        self.collect_idle_loops(state);
        cadence
    }

    fn collect_idle_loops(&self, state: &mut SchedulerState) {
        let idle: Vec<Duration> = state
            .loops
            .keys()
            .copied()
            .filter(|cadence| !state.cadence_in_use(*cadence))
            .collect();

        for cadence in idle {
            if let Some(handle) = state.loops.remove(&cadence) {
                // In-flight fetches run on their own tasks and are unaffected
                handle.abort();
                info!(cadence_ms = cadence.as_millis() as u64, "Cadence loop stopped");
            }
        }
    }

    /// Current polling interval for a key, if anything still polls it
    pub fn effective_interval(&self, key: &FetchKey) -> Option<Duration> {
        self.inner.lock().keys.get(key).map(|s| s.cadence)
    }

    pub fn is_scheduled(&self, key: &FetchKey) -> bool {
        self.inner.lock().keys.contains_key(key)
    }

    pub fn registration_count(&self, key: &FetchKey) -> usize {
        self.inner
            .lock()
            .keys
            .get(key)
            .map_or(0, |s| s.registrations.len())
    }

    /// Distinct cadences with a running loop, shortest first
    pub fn active_cadences(&self) -> Vec<Duration> {
        let mut cadences: Vec<Duration> = self.inner.lock().loops.keys().copied().collect();
        cadences.sort();
        cadences
    }

    /// Every key with at least one registration
    pub fn scheduled_keys(&self) -> Vec<FetchKey> {
        let mut keys: Vec<FetchKey> = self.inner.lock().keys.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Stop every loop and drop all registrations. Cached values stay.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock();
        state.registrations.clear();
        state.keys.clear();
        for (_, handle) in state.loops.drain() {
            handle.abort();
        }
        info!("Poll scheduler shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::ScriptedAdapter;
    use crate::cache::CacheConfig;
    use common::{FetchError, SourceKind};

    fn scheduler_with(adapter: Arc<ScriptedAdapter>) -> PollScheduler {
        let cache = StalenessCache::new(adapter, CacheConfig::default());
        PollScheduler::new(cache, SchedulerConfig::default())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test]
    async fn test_first_registration_fetches_immediately() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        let scheduler = scheduler_with(adapter.clone());
        let key = FetchKey::quote("AAPL");

        let _handle = scheduler.register(key.clone(), PollOptions::every(Duration::from_secs(30)));
        tokio::time::sleep(ms(20)).await;

        assert_eq!(adapter.calls(), 1);
        assert!(scheduler.cache().get(&key).has_value());
    }

    #[tokio::test]
    async fn test_polls_on_cadence() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        let scheduler = scheduler_with(adapter.clone());

        let _handle = scheduler.register(FetchKey::quote("AAPL"), PollOptions::every(ms(30)));
        tokio::time::sleep(ms(140)).await;

        assert!(adapter.calls() >= 3, "calls = {}", adapter.calls());
    }

    #[tokio::test]
    async fn test_shared_key_is_reference_counted() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        let scheduler = scheduler_with(adapter.clone());
        let key = FetchKey::quote("AAPL");

        let fast = scheduler.register(key.clone(), PollOptions::every(ms(40)));
        let slow = scheduler.register(key.clone(), PollOptions::every(ms(200)));

        assert_eq!(scheduler.registration_count(&key), 2);
        assert_eq!(scheduler.effective_interval(&key), Some(ms(40)));
        assert_eq!(scheduler.active_cadences(), vec![ms(40)]);

        // Only the first registration fetched immediately
        tokio::time::sleep(ms(10)).await;
        assert_eq!(adapter.calls(), 1);

        assert!(scheduler.unregister(fast));
        assert!(scheduler.is_scheduled(&key));
        assert_eq!(scheduler.effective_interval(&key), Some(ms(200)));
        assert_eq!(scheduler.active_cadences(), vec![ms(200)]);

        assert!(scheduler.unregister(slow));
        assert!(!scheduler.is_scheduled(&key));
        assert!(scheduler.active_cadences().is_empty());

        let calls_after_stop = adapter.calls();
        tokio::time::sleep(ms(250)).await;
        assert_eq!(adapter.calls(), calls_after_stop);

        // Last value remains readable until evicted
        assert!(scheduler.cache().get(&key).has_value());
    }

    #[tokio::test]
    async fn test_unregister_twice_is_noop() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        let scheduler = scheduler_with(adapter);
        let key = FetchKey::quote("AAPL");

        let handle = scheduler.register(key.clone(), PollOptions::every(ms(50)));
        let duplicate = RegistrationHandle {
            id: handle.id(),
            key: key.clone(),
        };

        assert!(scheduler.unregister(handle));
        assert!(!scheduler.unregister(duplicate));
    }

    #[tokio::test]
    async fn test_closed_gate_pauses_without_dropping_entry() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        let scheduler = scheduler_with(adapter.clone());
        let key = FetchKey::bare(SourceKind::SurgeScanner);
        let visible = EnabledFlag::new(false);

        let _handle = scheduler.register(
            key.clone(),
            PollOptions::every(ms(25)).gated(PollGate::Flag(visible.clone())),
        );

        tokio::time::sleep(ms(80)).await;
        assert_eq!(adapter.calls(), 0);
        assert!(scheduler.is_scheduled(&key));

        visible.set(true);
        tokio::time::sleep(ms(80)).await;
        assert!(adapter.calls() >= 1);

        visible.set(false);
        tokio::time::sleep(ms(30)).await;
        let paused_at = adapter.calls();
        tokio::time::sleep(ms(80)).await;
        assert_eq!(adapter.calls(), paused_at);
        assert!(scheduler.cache().get(&key).has_value());
    }

    #[tokio::test]
    async fn test_failures_do_not_cancel_schedule() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        for _ in 0..20 {
            adapter.push(Err(FetchError::Status { status: 502 }));
        }
        let scheduler = scheduler_with(adapter.clone());
        let key = FetchKey::quote("AAPL");

        let _handle = scheduler.register(key.clone(), PollOptions::every(ms(25)));
        tokio::time::sleep(ms(120)).await;

        assert!(adapter.calls() >= 3, "calls = {}", adapter.calls());
        assert!(scheduler.is_scheduled(&key));
        assert!(scheduler.cache().get(&key).last_error.is_some());
    }

    #[tokio::test]
    async fn test_independent_keys_get_own_cadence() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        let scheduler = scheduler_with(adapter);

        let _a = scheduler.register(FetchKey::quote("AAPL"), PollOptions::every(ms(30)));
        let _b = scheduler.register(FetchKey::quote("MSFT"), PollOptions::every(ms(30)));
        let _c = scheduler.register(FetchKey::bare(SourceKind::ExitPositions), PollOptions::every(ms(90)));

        assert_eq!(scheduler.active_cadences(), vec![ms(30), ms(90)]);
        assert_eq!(scheduler.scheduled_keys().len(), 3);
    }

    #[tokio::test]
    async fn test_registration_sets_stale_tolerance() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        let scheduler = scheduler_with(adapter);
        let key = FetchKey::quote("AAPL");

        let _handle = scheduler.register(
            key.clone(),
            PollOptions::every(Duration::from_secs(60)).stale_after(ms(20)),
        );
        tokio::time::sleep(ms(60)).await;

        let snapshot = scheduler.cache().get(&key);
        assert!(snapshot.has_value());
        assert!(snapshot.is_stale);
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_loops() {
        let adapter = Arc::new(ScriptedAdapter::new(Duration::ZERO));
        let scheduler = scheduler_with(adapter);

        let _a = scheduler.register(FetchKey::quote("AAPL"), PollOptions::every(ms(30)));
        scheduler.shutdown();

        assert!(scheduler.active_cadences().is_empty());
        assert!(scheduler.scheduled_keys().is_empty());
    }
}
