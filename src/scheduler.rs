//! The polling state machine.
//!
//! One worker thread owns the watch registry, the scheduler phase, and the
//! single pending fetch timer. Watch mutations and queries arrive over a
//! bounded control channel and are serialized by that thread, so an add
//! arriving while a fetch is in flight is never lost and a remove arriving
//! mid-fetch is reflected in the next dispatch, not the in-flight one.
//! At-most-one in-flight fetch and at-most-one pending timer hold by
//! construction, not by locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{after, bounded, never, select, Receiver, Sender};

use crate::date::WatchDate;
use crate::dispatch::dispatch;
use crate::error::{WatchError, WatchResult};
use crate::fetch::SnapshotFetcher;
use crate::notify::Notifier;
use crate::persist::{PersistError, WatchStore};
use crate::registry::{SubscriberId, WatchRegistry};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Steady-state delay between successful fetch cycles.
    pub poll_interval: Duration,
    /// Delay before retrying after a failed fetch.
    pub retry_interval: Duration,
    /// Max queued control messages (watch/unwatch/queries).
    pub control_queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10 * 60),
            retry_interval: Duration::from_secs(5 * 60),
            control_queue_capacity: 1024,
        }
    }
}

/// Lifecycle of the shared poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    /// No subscribers, no timer.
    Idle,
    /// A fetch timer is pending.
    Armed,
    /// A fetch is in flight.
    Fetching,
}

#[derive(Debug)]
enum ControlMsg {
    Watch {
        subscriber: SubscriberId,
        date: WatchDate,
        reply: Sender<bool>,
    },
    Unwatch {
        subscriber: SubscriberId,
        date: WatchDate,
        reply: Sender<bool>,
    },
    Clear {
        subscriber: SubscriberId,
        reply: Sender<Vec<WatchDate>>,
    },
    Watched {
        subscriber: SubscriberId,
        reply: Sender<Vec<WatchDate>>,
    },
    AllWatches {
        reply: Sender<Vec<(SubscriberId, Vec<WatchDate>)>>,
    },
    Phase {
        reply: Sender<SchedulerPhase>,
    },
}

#[derive(Debug, Default)]
struct Counters {
    fetch_cycles: AtomicU64,
    failed_fetches: AtomicU64,
    notify_failures: AtomicU64,
    persist_failures: AtomicU64,
}

/// Worker-owned scheduler state: the phase and the single pending timer.
///
/// The timer receiver is owned exclusively here. Re-arming replaces it,
/// which cancels the previous timer, so at most one is ever pending.
#[derive(Debug)]
struct SchedulerState {
    phase: SchedulerPhase,
    timer: Option<Receiver<Instant>>,
}

impl SchedulerState {
    fn idle() -> Self {
        Self {
            phase: SchedulerPhase::Idle,
            timer: None,
        }
    }

    fn arm(&mut self, delay: Duration) {
        self.timer = Some(after(delay));
        self.phase = SchedulerPhase::Armed;
    }

    fn deactivate(&mut self) {
        self.timer = None;
        self.phase = SchedulerPhase::Idle;
    }
}

/// Handle to the shared poll loop.
///
/// Cheap to share behind an `Arc`; dropping the last handle closes the
/// control channel, which stops the worker and cancels any pending timer.
#[derive(Debug)]
pub struct PollScheduler {
    control_tx: Sender<ControlMsg>,
    counters: Arc<Counters>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl PollScheduler {
    /// Spawn the scheduler worker.
    ///
    /// The worker rehydrates the registry from `store` before its first
    /// loop iteration; a non-empty rehydrated watch set is fetched
    /// immediately. Load errors are logged and the scheduler starts empty.
    pub fn new(
        cfg: SchedulerConfig,
        fetcher: Arc<dyn SnapshotFetcher>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn WatchStore>,
    ) -> Self {
        let (control_tx, control_rx) = bounded::<ControlMsg>(cfg.control_queue_capacity.max(1));
        let counters = Arc::new(Counters::default());

        let worker_counters = Arc::clone(&counters);
        let join = thread::Builder::new()
            .name("hutwatch-scheduler".to_string())
            .spawn(move || worker_loop(cfg, fetcher, notifier, store, worker_counters, control_rx))
            .expect("failed to spawn hutwatch scheduler worker");

        Self {
            control_tx,
            counters,
            join: Mutex::new(Some(join)),
        }
    }

    /// Start watching a date for a subscriber, activating the poll loop if
    /// it was idle (a newly added watch is checked right away). Activation
    /// is idempotent: an already armed or fetching loop is left alone.
    /// Returns whether the date was newly added.
    pub fn watch(&self, subscriber: SubscriberId, date: WatchDate) -> WatchResult<bool> {
        self.request(|reply| ControlMsg::Watch {
            subscriber,
            date,
            reply,
        })
    }

    /// Stop watching a date. Returns whether it was being watched.
    pub fn unwatch(&self, subscriber: SubscriberId, date: WatchDate) -> WatchResult<bool> {
        self.request(|reply| ControlMsg::Unwatch {
            subscriber,
            date,
            reply,
        })
    }

    /// Stop watching everything for a subscriber, returning the dates that
    /// were being watched (sorted; possibly empty).
    pub fn clear(&self, subscriber: SubscriberId) -> WatchResult<Vec<WatchDate>> {
        self.request(|reply| ControlMsg::Clear { subscriber, reply })
    }

    /// The subscriber's current watch set, sorted.
    pub fn watched(&self, subscriber: SubscriberId) -> WatchResult<Vec<WatchDate>> {
        self.request(|reply| ControlMsg::Watched { subscriber, reply })
    }

    /// Every subscriber with their watch set, for status reporting.
    pub fn all_watches(&self) -> WatchResult<Vec<(SubscriberId, Vec<WatchDate>)>> {
        self.request(|reply| ControlMsg::AllWatches { reply })
    }

    /// Current phase of the poll loop.
    ///
    /// The query is answered by the worker between cycles, so an external
    /// observer sees `Idle` or `Armed`; `Fetching` exists only inside a
    /// cycle.
    pub fn phase(&self) -> WatchResult<SchedulerPhase> {
        self.request(|reply| ControlMsg::Phase { reply })
    }

    /// Completed fetch attempts, successes and failures both.
    #[must_use]
    pub fn fetch_cycles(&self) -> u64 {
        self.counters.fetch_cycles.load(Ordering::Relaxed)
    }

    /// Fetch attempts that failed and were re-armed for retry.
    #[must_use]
    pub fn failed_fetches(&self) -> u64 {
        self.counters.failed_fetches.load(Ordering::Relaxed)
    }

    /// Notification deliveries that failed.
    #[must_use]
    pub fn notify_failures(&self) -> u64 {
        self.counters.notify_failures.load(Ordering::Relaxed)
    }

    /// Watch store operations that failed.
    #[must_use]
    pub fn persist_failures(&self) -> u64 {
        self.counters.persist_failures.load(Ordering::Relaxed)
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> ControlMsg) -> WatchResult<T> {
        let (reply_tx, reply_rx) = bounded::<T>(1);
        self.control_tx
            .send(make(reply_tx))
            .map_err(|_| WatchError::SchedulerGone)?;
        reply_rx.recv().map_err(|_| WatchError::SchedulerGone)
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        // Close the control channel so the worker observes the disconnect,
        // drops its pending timer, and exits.
        let (dummy_tx, _) = bounded::<ControlMsg>(1);
        drop(std::mem::replace(&mut self.control_tx, dummy_tx));

        if let Ok(mut guard) = self.join.lock() {
            if let Some(handle) = guard.take() {
                // Do not join: the worker may be mid-fetch, bounded only by
                // the fetcher's timeout. Detaching is safe; the worker exits
                // once the control channel is closed.
                drop(handle);
            }
        }
    }
}

fn worker_loop(
    cfg: SchedulerConfig,
    fetcher: Arc<dyn SnapshotFetcher>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn WatchStore>,
    counters: Arc<Counters>,
    control_rx: Receiver<ControlMsg>,
) {
    let mut registry = WatchRegistry::new();
    let mut state = SchedulerState::idle();

    match store.load() {
        Ok(watches) => {
            for (subscriber, date) in watches {
                registry.add(subscriber, date);
            }
        }
        Err(err) => {
            counters.persist_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %err, "failed to rehydrate watches, starting empty");
        }
    }
    if !registry.is_empty() {
        tracing::info!(
            subscribers = registry.len(),
            "rehydrated watches, fetching immediately"
        );
        state.arm(Duration::ZERO);
    }

    loop {
        let timer = state.timer.clone().unwrap_or_else(never);
        select! {
            recv(control_rx) -> msg => match msg {
                Ok(msg) => handle_control(msg, &mut registry, &mut state, &store, &counters),
                Err(_) => break,
            },
            recv(timer) -> _ => {
                run_cycle(
                    &cfg,
                    &fetcher,
                    &notifier,
                    &store,
                    &counters,
                    &mut registry,
                    &mut state,
                );
            }
        }
    }
}

fn handle_control(
    msg: ControlMsg,
    registry: &mut WatchRegistry,
    state: &mut SchedulerState,
    store: &Arc<dyn WatchStore>,
    counters: &Counters,
) {
    match msg {
        ControlMsg::Watch {
            subscriber,
            date,
            reply,
        } => {
            let added = registry.add(subscriber, date);
            if added {
                record(counters, store.record_add(subscriber, date), "add");
            }
            if state.phase == SchedulerPhase::Idle {
                tracing::info!(%subscriber, %date, "first watch registered, starting poll loop");
                state.arm(Duration::ZERO);
            }
            let _ = reply.send(added);
        }
        ControlMsg::Unwatch {
            subscriber,
            date,
            reply,
        } => {
            let removed = registry.remove(subscriber, date);
            if removed {
                record(counters, store.record_remove(subscriber, date), "remove");
            }
            deactivate_if_empty(registry, state);
            let _ = reply.send(removed);
        }
        ControlMsg::Clear { subscriber, reply } => {
            let dates = registry.clear(subscriber);
            if !dates.is_empty() {
                record(counters, store.record_clear(subscriber), "clear");
            }
            deactivate_if_empty(registry, state);
            let _ = reply.send(dates);
        }
        ControlMsg::Watched { subscriber, reply } => {
            let _ = reply.send(registry.dates_of(subscriber));
        }
        ControlMsg::AllWatches { reply } => {
            let _ = reply.send(registry.snapshot_all());
        }
        ControlMsg::Phase { reply } => {
            let _ = reply.send(state.phase);
        }
    }
}

fn deactivate_if_empty(registry: &WatchRegistry, state: &mut SchedulerState) {
    if registry.is_empty() && state.phase != SchedulerPhase::Idle {
        tracing::info!("last watch removed, poll loop going idle");
        state.deactivate();
    }
}

fn run_cycle(
    cfg: &SchedulerConfig,
    fetcher: &Arc<dyn SnapshotFetcher>,
    notifier: &Arc<dyn Notifier>,
    store: &Arc<dyn WatchStore>,
    counters: &Counters,
    registry: &mut WatchRegistry,
    state: &mut SchedulerState,
) {
    state.phase = SchedulerPhase::Fetching;
    state.timer = None;

    let outcome = fetcher.fetch_snapshot();
    counters.fetch_cycles.fetch_add(1, Ordering::Relaxed);

    match outcome {
        Ok(snapshot) => {
            let intents = dispatch(&snapshot, registry);
            tracing::debug!(
                dates = snapshot.len(),
                intents = intents.len(),
                "fetched availability snapshot"
            );

            for intent in &intents {
                for date in &intent.dates {
                    record(
                        counters,
                        store.record_remove(intent.subscriber, *date),
                        "remove",
                    );
                }
                if let Err(err) = notifier.notify(intent.subscriber, &intent.render()) {
                    counters.notify_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        subscriber = %intent.subscriber,
                        error = %err,
                        "notification delivery failed"
                    );
                }
            }

            if registry.is_empty() {
                tracing::info!("all watches resolved, poll loop going idle");
                state.deactivate();
            } else {
                state.arm(cfg.poll_interval);
            }
        }
        Err(err) => {
            counters.failed_fetches.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                error = %err,
                retry_in = ?cfg.retry_interval,
                "availability fetch failed"
            );
            state.arm(cfg.retry_interval);
        }
    }
}

fn record(counters: &Counters, result: Result<(), PersistError>, what: &'static str) {
    if let Err(err) = result {
        counters.persist_failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(error = %err, "failed to persist watch {}", what);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, NotifyError};
    use crate::persist::NoopWatchStore;
    use crate::snapshot::Snapshot;

    fn date(s: &str) -> WatchDate {
        s.parse().unwrap()
    }

    struct ScriptedFetcher {
        script: Mutex<Vec<Result<Snapshot, FetchError>>>,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<Snapshot, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
            })
        }
    }

    impl SnapshotFetcher for ScriptedFetcher {
        fn fetch_snapshot(&self) -> Result<Snapshot, FetchError> {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Err(FetchError::Request {
                    message: "script exhausted".to_string(),
                })
            } else {
                script.remove(0)
            }
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(SubscriberId, String)>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn sent(&self) -> Vec<(SubscriberId, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, subscriber: SubscriberId, text: &str) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push((subscriber, text.to_string()));
            if self.fail {
                return Err(NotifyError::Transport {
                    message: "delivery down".to_string(),
                });
            }
            Ok(())
        }
    }

    fn store() -> Arc<dyn WatchStore> {
        Arc::new(NoopWatchStore)
    }

    fn send_watch(
        registry: &mut WatchRegistry,
        state: &mut SchedulerState,
        counters: &Counters,
        subscriber: SubscriberId,
        date: WatchDate,
    ) -> bool {
        let (reply_tx, reply_rx) = bounded(1);
        handle_control(
            ControlMsg::Watch {
                subscriber,
                date,
                reply: reply_tx,
            },
            registry,
            state,
            &store(),
            counters,
        );
        reply_rx.recv().unwrap()
    }

    #[test]
    fn first_watch_arms_an_immediate_timer() {
        let mut registry = WatchRegistry::new();
        let mut state = SchedulerState::idle();
        let counters = Counters::default();

        let added = send_watch(
            &mut registry,
            &mut state,
            &counters,
            SubscriberId::new(1),
            date("2024-07-10"),
        );

        assert!(added);
        assert_eq!(state.phase, SchedulerPhase::Armed);
        let timer = state.timer.clone().unwrap();
        // Zero-delay timer: the first check happens right away.
        assert!(timer.recv_timeout(Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn activation_is_idempotent_while_armed() {
        let mut registry = WatchRegistry::new();
        let mut state = SchedulerState::idle();
        let counters = Counters::default();

        send_watch(
            &mut registry,
            &mut state,
            &counters,
            SubscriberId::new(1),
            date("2024-07-10"),
        );
        let first_timer = state.timer.clone().unwrap();

        send_watch(
            &mut registry,
            &mut state,
            &counters,
            SubscriberId::new(2),
            date("2024-07-11"),
        );

        // The second watch did not schedule a second fetch.
        assert_eq!(state.phase, SchedulerPhase::Armed);
        assert!(state.timer.as_ref().unwrap().same_channel(&first_timer));
    }

    #[test]
    fn successful_cycle_emptying_registry_goes_idle() {
        let mut registry = WatchRegistry::new();
        let mut state = SchedulerState::idle();
        let counters = Counters::default();
        let chat = SubscriberId::new(1);
        registry.add(chat, date("2024-07-11"));
        state.arm(Duration::ZERO);

        let fetcher = ScriptedFetcher::new(vec![Ok([(date("2024-07-11"), 3)]
            .into_iter()
            .collect())]);
        let notifier = Arc::new(RecordingNotifier::default());

        run_cycle(
            &SchedulerConfig::default(),
            &(fetcher as Arc<dyn SnapshotFetcher>),
            &(Arc::clone(&notifier) as Arc<dyn Notifier>),
            &store(),
            &counters,
            &mut registry,
            &mut state,
        );

        assert!(registry.is_empty());
        assert_eq!(state.phase, SchedulerPhase::Idle);
        assert!(state.timer.is_none());
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, chat);
        assert!(sent[0].1.contains("3 places"));
    }

    #[test]
    fn failed_cycle_keeps_registry_and_arms_retry() {
        let mut registry = WatchRegistry::new();
        let mut state = SchedulerState::idle();
        let counters = Counters::default();
        let chat = SubscriberId::new(1);
        registry.add(chat, date("2024-07-11"));
        state.arm(Duration::ZERO);

        let fetcher = ScriptedFetcher::new(vec![Err(FetchError::Status { status: 503 })]);
        let notifier = Arc::new(RecordingNotifier::default());

        run_cycle(
            &SchedulerConfig::default(),
            &(fetcher as Arc<dyn SnapshotFetcher>),
            &(notifier as Arc<dyn Notifier>),
            &store(),
            &counters,
            &mut registry,
            &mut state,
        );

        assert_eq!(registry.dates_of(chat), vec![date("2024-07-11")]);
        assert_eq!(state.phase, SchedulerPhase::Armed);
        assert!(state.timer.is_some());
        assert_eq!(counters.failed_fetches.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn pending_dates_keep_the_loop_armed_silently() {
        let mut registry = WatchRegistry::new();
        let mut state = SchedulerState::idle();
        let counters = Counters::default();
        let chat = SubscriberId::new(1);
        registry.add(chat, date("2024-07-10"));
        state.arm(Duration::ZERO);

        let fetcher = ScriptedFetcher::new(vec![Ok([(date("2024-07-10"), 0)]
            .into_iter()
            .collect())]);
        let notifier = Arc::new(RecordingNotifier::default());

        run_cycle(
            &SchedulerConfig::default(),
            &(fetcher as Arc<dyn SnapshotFetcher>),
            &(Arc::clone(&notifier) as Arc<dyn Notifier>),
            &store(),
            &counters,
            &mut registry,
            &mut state,
        );

        assert!(notifier.sent().is_empty());
        assert_eq!(registry.dates_of(chat), vec![date("2024-07-10")]);
        assert_eq!(state.phase, SchedulerPhase::Armed);
    }

    #[test]
    fn unwatching_the_last_date_deactivates() {
        let mut registry = WatchRegistry::new();
        let mut state = SchedulerState::idle();
        let counters = Counters::default();
        let chat = SubscriberId::new(1);

        send_watch(&mut registry, &mut state, &counters, chat, date("2024-07-10"));

        let (reply_tx, reply_rx) = bounded(1);
        handle_control(
            ControlMsg::Unwatch {
                subscriber: chat,
                date: date("2024-07-10"),
                reply: reply_tx,
            },
            &mut registry,
            &mut state,
            &store(),
            &counters,
        );

        assert!(reply_rx.recv().unwrap());
        assert!(registry.is_empty());
        assert_eq!(state.phase, SchedulerPhase::Idle);
        assert!(state.timer.is_none());
    }

    #[test]
    fn clear_reports_dates_and_deactivates() {
        let mut registry = WatchRegistry::new();
        let mut state = SchedulerState::idle();
        let counters = Counters::default();
        let chat = SubscriberId::new(1);

        send_watch(&mut registry, &mut state, &counters, chat, date("2024-08-01"));

        let (reply_tx, reply_rx) = bounded(1);
        handle_control(
            ControlMsg::Clear {
                subscriber: chat,
                reply: reply_tx,
            },
            &mut registry,
            &mut state,
            &store(),
            &counters,
        );

        assert_eq!(reply_rx.recv().unwrap(), vec![date("2024-08-01")]);
        assert_eq!(state.phase, SchedulerPhase::Idle);
        assert!(state.timer.is_none());
    }

    #[test]
    fn notify_failure_does_not_roll_back_the_registry() {
        let mut registry = WatchRegistry::new();
        let mut state = SchedulerState::idle();
        let counters = Counters::default();
        let chat = SubscriberId::new(1);
        registry.add(chat, date("2024-07-11"));
        state.arm(Duration::ZERO);

        let fetcher = ScriptedFetcher::new(vec![Ok([(date("2024-07-11"), 2)]
            .into_iter()
            .collect())]);
        let notifier = Arc::new(RecordingNotifier::failing());

        run_cycle(
            &SchedulerConfig::default(),
            &(fetcher as Arc<dyn SnapshotFetcher>),
            &(notifier as Arc<dyn Notifier>),
            &store(),
            &counters,
            &mut registry,
            &mut state,
        );

        assert!(registry.is_empty());
        assert_eq!(state.phase, SchedulerPhase::Idle);
        assert_eq!(counters.notify_failures.load(Ordering::Relaxed), 1);
    }
}
