//! The scheduler - drives the pipeline cycle after cycle.
//!
//! ```text
//! Idle ──start()──▶ Running ──stop()──▶ Stopping ──(cycle done)──▶ Stopped
//!   └──────────────────stop()─────────────────────────────────────▶ Stopped
//! ```
//!
//! Each cycle reads a snapshot from the store, runs the pipeline under the
//! configured timeout, publishes the successor on success and hands a
//! [`CycleResult`] to the sink either way. A corrupted store or a version
//! that cannot be advanced are the only things that end the loop on their own.

use crate::config::SchedulerConfig;
use crate::dispatch;
use crate::error::{CycleError, SchedulerError, TimeoutError};
use crate::pipeline::Pipeline;
use cycler_core::{CycleId, CycleOutcome, CycleResult, SystemState};
use cycler_sink::ResultSink;
use cycler_storage::StateStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle of the cycle loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    /// Created, not started
    Idle,
    /// Cycling
    Running,
    /// Stop requested, in-flight cycle finishing
    Stopping,
    /// Loop exited
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => write!(f, "idle"),
            LoopState::Running => write!(f, "running"),
            LoopState::Stopping => write!(f, "stopping"),
            LoopState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Loop state
    pub state: LoopState,
    /// Most recent cycle, if any ran
    pub last_result: Option<CycleResult>,
    /// Cycles attempted so far
    pub cycles_run: u64,
    /// Cycles that ended in failure
    pub failures: u64,
    /// Results dropped because the sink queue was full
    pub dropped_results: u64,
    /// Version currently held by the store
    pub current_version: Option<u64>,
    /// Set when the loop stopped on an unrecoverable error
    pub fatal: Option<String>,
}

impl StatusReport {
    fn new() -> Self {
        Self {
            state: LoopState::Idle,
            last_result: None,
            cycles_run: 0,
            failures: 0,
            dropped_results: 0,
            current_version: None,
            fatal: None,
        }
    }
}

/// Drives a [`Pipeline`] over the state held by a [`StateStore`].
pub struct Scheduler {
    inner: Arc<Inner>,
    stop_tx: watch::Sender<bool>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    pipeline: Pipeline,
    store: Arc<dyn StateStore>,
    config: SchedulerConfig,
    status: RwLock<StatusReport>,
    results: Mutex<Option<mpsc::Sender<CycleResult>>>,
}

/// A failed cycle with whatever stages completed before it broke.
struct Failed {
    error: CycleError,
    stages_applied: Vec<String>,
}

impl From<CycleError> for Failed {
    fn from(error: CycleError) -> Self {
        let stages_applied = error.stages_applied().to_vec();
        Self { error, stages_applied }
    }
}

impl Scheduler {
    /// Create a scheduler in the `Idle` state.
    ///
    /// Spawns the result dispatcher, so this must be called inside a tokio
    /// runtime.
    pub fn new(
        pipeline: Pipeline,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn ResultSink>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let (results, dispatcher) = dispatch::spawn(sink, config.result_capacity);
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                pipeline,
                store,
                config,
                status: RwLock::new(StatusReport::new()),
                results: Mutex::new(Some(results)),
            }),
            stop_tx,
            loop_task: Mutex::new(None),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// The pipeline being driven.
    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Begin cycling on a background task. Only valid from `Idle`.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        {
            let mut status = self.inner.status.write().await;
            if status.state != LoopState::Idle {
                return Err(SchedulerError::InvalidTransition {
                    from: status.state,
                    action: "start",
                });
            }
            status.state = LoopState::Running;
        }

        info!("Starting pipeline {}", self.inner.pipeline.id());

        let inner = self.inner.clone();
        let stop_rx = self.stop_tx.subscribe();
        let handle = tokio::spawn(async move { inner.run_loop(stop_rx).await });
        *self.loop_task.lock().await = Some(handle);
        Ok(())
    }

    /// Request the loop to stop.
    ///
    /// An in-flight cycle is allowed to finish; no new cycle starts
    /// afterwards. Calling this more than once is harmless.
    pub async fn stop(&self) {
        let mut status = self.inner.status.write().await;
        match status.state {
            LoopState::Idle => {
                status.state = LoopState::Stopped;
                info!("Scheduler stopped before it was started");
            }
            LoopState::Running => {
                status.state = LoopState::Stopping;
                info!("Stop requested, finishing current cycle");
            }
            LoopState::Stopping | LoopState::Stopped => {}
        }
        // Signalled under the status lock so the loop never sees
        // `Stopping` without the flag.
        self.stop_tx.send_replace(true);
    }

    /// Wait for the loop to exit and for every queued result to reach the
    /// sink. The sink is closed afterwards.
    ///
    /// Safe to cancel: dropping the future leaves the tasks in place for a
    /// later call.
    pub async fn join(&self) {
        {
            let mut task = self.loop_task.lock().await;
            if let Some(handle) = task.as_mut() {
                let outcome = handle.await;
                *task = None;
                if let Err(e) = outcome {
                    error!("Cycle loop task ended abnormally: {}", e);
                    self.inner.status.write().await.state = LoopState::Stopped;
                }
            }
        }

        self.inner.results.lock().await.take();
        let mut dispatcher = self.dispatcher.lock().await;
        if let Some(handle) = dispatcher.as_mut() {
            let outcome = handle.await;
            *dispatcher = None;
            if let Err(e) = outcome {
                error!("Result dispatcher ended abnormally: {}", e);
            }
        }
    }

    /// Stop and wait.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.join().await;
    }

    /// Current status.
    pub async fn status(&self) -> StatusReport {
        let mut report = self.inner.status.read().await.clone();
        if let Ok(state) = self.inner.store.get().await {
            report.current_version = Some(state.version);
        }
        report
    }

    /// Run exactly one cycle on the caller's task. Only valid from `Idle`.
    pub async fn run_cycle(&self) -> Result<CycleResult, SchedulerError> {
        let state = self.inner.status.read().await.state;
        if state != LoopState::Idle {
            return Err(SchedulerError::InvalidTransition {
                from: state,
                action: "run a single cycle",
            });
        }

        match self.inner.cycle().await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.inner.mark_fatal(&e).await;
                Err(SchedulerError::Fatal(e))
            }
        }
    }
}

impl Inner {
    async fn run_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        loop {
            // `stop()` flips the state under the write lock, so this check
            // and a concurrent stop are ordered.
            if self.status.read().await.state != LoopState::Running {
                debug!("Stop seen at cycle boundary");
                break;
            }
            if self.reached_max_cycles().await {
                break;
            }

            if let Err(e) = self.cycle().await {
                self.mark_fatal(&e).await;
                break;
            }

            if self.reached_max_cycles().await {
                break;
            }
            if !self.pause(&mut stop_rx).await {
                warn!("Scheduler handle dropped, leaving loop");
                break;
            }
        }

        let mut status = self.status.write().await;
        status.state = LoopState::Stopped;
        info!(
            "Scheduler stopped after {} cycles ({} failed)",
            status.cycles_run, status.failures
        );
    }

    async fn reached_max_cycles(&self) -> bool {
        let Some(max) = self.config.max_cycles else {
            return false;
        };
        let reached = self.status.read().await.cycles_run >= max;
        if reached {
            info!("Reached max cycles ({})", max);
        }
        reached
    }

    /// Wait out the cycle interval unless a stop arrives first.
    /// Returns false if the stop sender is gone.
    async fn pause(&self, stop_rx: &mut watch::Receiver<bool>) -> bool {
        if self.config.cycle_interval.is_zero() {
            tokio::task::yield_now().await;
            return true;
        }

        tokio::select! {
            _ = tokio::time::sleep(self.config.cycle_interval) => true,
            changed = stop_rx.changed() => changed.is_ok(),
        }
    }

    /// One full cycle. `Err` only when the loop cannot go on.
    async fn cycle(&self) -> Result<CycleResult, CycleError> {
        let cycle_id = CycleId::new();
        let started_at = chrono::Utc::now();
        let start = Instant::now();

        let (input_version, outcome) = match self.store.get().await {
            Ok(snapshot) => (snapshot.version, self.execute(&snapshot).await),
            Err(e) => (self.last_known_version().await, Err(Failed::from(CycleError::Store(e)))),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let (result, fatal) = match outcome {
            Ok((output_version, stages_applied)) => {
                debug!("Cycle {} published v{} in {}ms", cycle_id, output_version, duration_ms);
                let result = CycleResult {
                    cycle_id,
                    input_version,
                    output_version,
                    stages_applied,
                    failed_stage: None,
                    duration_ms,
                    started_at,
                    outcome: CycleOutcome::Success,
                };
                (result, None)
            }
            Err(Failed { error, stages_applied }) => {
                warn!("Cycle {} on v{} failed: {}", cycle_id, input_version, error);
                let result = CycleResult {
                    cycle_id,
                    input_version,
                    output_version: input_version,
                    stages_applied,
                    failed_stage: error.failed_stage().map(str::to_string),
                    duration_ms,
                    started_at,
                    outcome: CycleOutcome::Failure {
                        reason: error.failure_reason(),
                    },
                };
                let fatal = error.is_fatal().then_some(error);
                (result, fatal)
            }
        };

        self.record(&result).await;
        match fatal {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }

    /// Run the pipeline under the timeout and publish on success.
    async fn execute(&self, snapshot: &SystemState) -> Result<(u64, Vec<String>), Failed> {
        let mut stages_applied = Vec::new();
        let run = tokio::time::timeout(
            self.config.cycle_timeout,
            self.pipeline.run_tracked(snapshot, &mut stages_applied),
        )
        .await;

        let state = match run {
            Ok(result) => result?,
            Err(_) => {
                let error = TimeoutError {
                    timeout_ms: self.config.timeout_ms(),
                };
                return Err(Failed {
                    error: error.into(),
                    stages_applied,
                });
            }
        };

        match self.store.set(state).await {
            Ok(published) => Ok((published.version, stages_applied)),
            Err(e) => Err(Failed {
                error: CycleError::Store(e),
                stages_applied,
            }),
        }
    }

    async fn last_known_version(&self) -> u64 {
        self.status
            .read()
            .await
            .last_result
            .as_ref()
            .map(|r| r.output_version)
            .unwrap_or(0)
    }

    async fn record(&self, result: &CycleResult) {
        let dropped = match self.results.lock().await.as_ref() {
            Some(tx) => match tx.try_send(result.clone()) {
                Ok(()) => false,
                Err(TrySendError::Full(_)) => {
                    warn!("Result queue full, dropping cycle {}", result.cycle_id);
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("Result dispatcher is gone, dropping cycle {}", result.cycle_id);
                    true
                }
            },
            None => false,
        };

        let mut status = self.status.write().await;
        status.cycles_run += 1;
        if !result.is_success() {
            status.failures += 1;
        }
        if dropped {
            status.dropped_results += 1;
        }
        status.last_result = Some(result.clone());
    }

    async fn mark_fatal(&self, e: &CycleError) {
        error!("Unrecoverable cycle failure, stopping scheduler: {}", e);
        let mut status = self.status.write().await;
        status.fatal = Some(e.to_string());
        status.state = LoopState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cycler_core::FailureReason;
    use cycler_sink::{CallbackSink, ChannelSink, SinkError};
    use cycler_stages::{DelayStage, FnStage, MeasureStage, Stage, StageError, TallyStage};
    use cycler_storage::{InMemoryStateStore, StaleVersionError, StoreError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};

    fn seed_store() -> Arc<InMemoryStateStore> {
        Arc::new(InMemoryStateStore::new(SystemState::seed("init")))
    }

    fn builtin_pipeline() -> Pipeline {
        Pipeline::from_stages(vec![
            Arc::new(TallyStage::optimize()),
            Arc::new(TallyStage::evolve()),
            Arc::new(MeasureStage),
        ])
        .unwrap()
    }

    fn fast() -> SchedulerConfig {
        SchedulerConfig::new().with_interval(Duration::ZERO)
    }

    /// Stage that counts calls.
    fn counting(name: &'static str, calls: &Arc<AtomicUsize>) -> Arc<dyn Stage> {
        let calls = calls.clone();
        Arc::new(FnStage::new(name, move |state| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(state)
        }))
    }

    /// Stage that parks until released.
    struct GateStage {
        entered: Arc<Notify>,
        release: Arc<Notify>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Stage for GateStage {
        fn name(&self) -> &str {
            "gate"
        }

        async fn apply(&self, state: SystemState) -> Result<SystemState, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(state)
        }
    }

    /// Store that delegates reads and fails every write in a fixed way.
    struct BrokenStore {
        inner: InMemoryStateStore,
        corrupted: bool,
    }

    #[async_trait]
    impl StateStore for BrokenStore {
        async fn get(&self) -> cycler_storage::Result<Arc<SystemState>> {
            self.inner.get().await
        }

        async fn set(&self, state: SystemState) -> cycler_storage::Result<Arc<SystemState>> {
            if self.corrupted {
                Err(StoreError::Corrupted("checksum mismatch".to_string()))
            } else {
                Err(StaleVersionError { attempted: state.version, current: 42 }.into())
            }
        }
    }

    #[tokio::test]
    async fn test_successful_cycle_publishes_next_version() {
        let store = seed_store();
        let (sink, mut rx) = ChannelSink::new();
        let scheduler = Scheduler::new(builtin_pipeline(), store.clone(), Arc::new(sink), fast()).unwrap();

        let result = scheduler.run_cycle().await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.input_version, 0);
        assert_eq!(result.output_version, 1);
        assert_eq!(result.stages_applied, vec!["optimize", "evolve", "measure"]);
        assert_eq!(store.get().await.unwrap().version, 1);

        let published = rx.recv().await.unwrap();
        assert_eq!(published.cycle_id, result.cycle_id);
    }

    #[tokio::test]
    async fn test_failing_stage_keeps_previous_state() {
        let store = seed_store();
        let measured = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::from_stages(vec![
            Arc::new(TallyStage::optimize()),
            Arc::new(FnStage::new("evolve", |_| Err(StageError::new("evolve", "diverged")))),
            counting("measure", &measured),
        ])
        .unwrap();
        let (sink, mut rx) = ChannelSink::new();
        let scheduler = Scheduler::new(pipeline, store.clone(), Arc::new(sink), fast()).unwrap();

        let result = scheduler.run_cycle().await.unwrap();

        assert_eq!(result.stages_applied, vec!["optimize"]);
        assert_eq!(result.failed_stage.as_deref(), Some("evolve"));
        assert_eq!(result.output_version, 0);
        assert_eq!(
            result.outcome,
            CycleOutcome::Failure {
                reason: FailureReason::Stage {
                    stage: "evolve".to_string(),
                    cause: "diverged".to_string(),
                },
            }
        );
        assert_eq!(measured.load(Ordering::SeqCst), 0);

        let state = store.get().await.unwrap();
        assert_eq!(state.version, 0);
        assert_eq!(state.payload, json!("init"));

        assert!(!rx.recv().await.unwrap().is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_stage_times_out() {
        let store = seed_store();
        let slow: Arc<dyn Stage> = Arc::new(DelayStage::new(
            Arc::new(TallyStage::evolve()),
            Duration::from_millis(100),
        ));
        let pipeline = Pipeline::from_stages(vec![Arc::new(TallyStage::optimize()), slow]).unwrap();
        let (sink, _rx) = ChannelSink::new();
        let config = fast().with_timeout(Duration::from_millis(10));
        let scheduler = Scheduler::new(pipeline, store.clone(), Arc::new(sink), config).unwrap();

        let result = scheduler.run_cycle().await.unwrap();

        assert_eq!(
            result.outcome,
            CycleOutcome::Failure {
                reason: FailureReason::Timeout { timeout_ms: 10 },
            }
        );
        assert_eq!(result.stages_applied, vec!["optimize"]);
        assert_eq!(result.failed_stage, None);
        assert_eq!(store.get().await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_loop_bumps_version_once_per_cycle() {
        let store = seed_store();
        let (sink, mut rx) = ChannelSink::new();
        let config = fast().with_max_cycles(5);
        let scheduler = Scheduler::new(builtin_pipeline(), store.clone(), Arc::new(sink), config).unwrap();

        scheduler.start().await.unwrap();
        scheduler.join().await;

        let mut versions = Vec::new();
        while let Some(result) = rx.recv().await {
            assert_eq!(result.output_version, result.input_version + 1);
            versions.push(result.output_version);
        }
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);

        let status = scheduler.status().await;
        assert_eq!(status.state, LoopState::Stopped);
        assert_eq!(status.cycles_run, 5);
        assert_eq!(status.current_version, Some(5));
        assert_eq!(store.get().await.unwrap().payload["tally"]["optimize"], 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_separates_cycles() {
        let (sink, _rx) = ChannelSink::new();
        let config = SchedulerConfig::new()
            .with_interval(Duration::from_secs(1))
            .with_max_cycles(3);
        let scheduler = Scheduler::new(builtin_pipeline(), seed_store(), Arc::new(sink), config).unwrap();

        let start = tokio::time::Instant::now();
        scheduler.start().await.unwrap();
        scheduler.join().await;

        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(scheduler.status().await.cycles_run, 3);
    }

    #[tokio::test]
    async fn test_stop_lets_inflight_cycle_finish() {
        let store = seed_store();
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = GateStage {
            entered: entered.clone(),
            release: release.clone(),
            calls: calls.clone(),
        };
        let pipeline = Pipeline::from_stages(vec![Arc::new(gate)]).unwrap();
        let (sink, _rx) = ChannelSink::new();
        let scheduler = Scheduler::new(pipeline, store.clone(), Arc::new(sink), fast()).unwrap();

        scheduler.start().await.unwrap();
        entered.notified().await;

        scheduler.stop().await;
        assert_eq!(scheduler.status().await.state, LoopState::Stopping);

        release.notify_one();
        scheduler.join().await;

        let status = scheduler.status().await;
        assert_eq!(status.state, LoopState::Stopped);
        assert_eq!(status.cycles_run, 1);
        assert!(status.last_result.unwrap().is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get().await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_stop_interrupts_interval_wait() {
        let (sink, _rx) = ChannelSink::new();
        let config = SchedulerConfig::new().with_interval(Duration::from_secs(3600));
        let scheduler = Scheduler::new(builtin_pipeline(), seed_store(), Arc::new(sink), config).unwrap();

        scheduler.start().await.unwrap();
        while scheduler.status().await.cycles_run == 0 {
            tokio::task::yield_now().await;
        }

        tokio::time::timeout(Duration::from_secs(5), scheduler.shutdown())
            .await
            .expect("stop should cut the interval short");

        let status = scheduler.status().await;
        assert_eq!(status.state, LoopState::Stopped);
        assert_eq!(status.cycles_run, 1);
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let (sink, _rx) = ChannelSink::new();
        let config = SchedulerConfig::new().with_interval(Duration::from_secs(3600));
        let scheduler = Scheduler::new(builtin_pipeline(), seed_store(), Arc::new(sink), config).unwrap();

        scheduler.start().await.unwrap();
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::InvalidTransition { from: LoopState::Running, .. })
        ));
        assert!(scheduler.run_cycle().await.is_err());

        scheduler.shutdown().await;
        assert!(scheduler.start().await.is_err());
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let (sink, _rx) = ChannelSink::new();
        let scheduler = Scheduler::new(builtin_pipeline(), seed_store(), Arc::new(sink), fast()).unwrap();

        scheduler.stop().await;
        assert_eq!(scheduler.status().await.state, LoopState::Stopped);
        assert!(scheduler.start().await.is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let (sink, _rx) = ChannelSink::new();
        let config = SchedulerConfig::new().with_timeout(Duration::ZERO);

        let err = Scheduler::new(builtin_pipeline(), seed_store(), Arc::new(sink), config).err().unwrap();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_sink_failures_do_not_stop_loop() {
        let sink = CallbackSink::new("flaky", |_| Err(SinkError::Other("offline".to_string())));
        let config = fast().with_max_cycles(3);
        let scheduler = Scheduler::new(builtin_pipeline(), seed_store(), Arc::new(sink), config).unwrap();

        scheduler.start().await.unwrap();
        scheduler.join().await;

        let status = scheduler.status().await;
        assert_eq!(status.cycles_run, 3);
        assert_eq!(status.failures, 0);
        assert_eq!(status.current_version, Some(3));
    }

    #[tokio::test]
    async fn test_stage_failures_do_not_stop_loop() {
        let pipeline = Pipeline::from_stages(vec![Arc::new(FnStage::new("wild", |_| {
            panic!("backend exploded")
        }))])
        .unwrap();
        let (sink, _rx) = ChannelSink::new();
        let config = fast().with_max_cycles(2);
        let scheduler = Scheduler::new(pipeline, seed_store(), Arc::new(sink), config).unwrap();

        scheduler.start().await.unwrap();
        scheduler.join().await;

        let status = scheduler.status().await;
        assert_eq!(status.state, LoopState::Stopped);
        assert_eq!(status.cycles_run, 2);
        assert_eq!(status.failures, 2);
        assert!(status.fatal.is_none());
    }

    #[tokio::test]
    async fn test_stale_write_is_reported_not_fatal() {
        let store = Arc::new(BrokenStore {
            inner: InMemoryStateStore::new(SystemState::seed("init")),
            corrupted: false,
        });
        let (sink, _rx) = ChannelSink::new();
        let config = fast().with_max_cycles(2);
        let scheduler = Scheduler::new(builtin_pipeline(), store, Arc::new(sink), config).unwrap();

        scheduler.start().await.unwrap();
        scheduler.join().await;

        let status = scheduler.status().await;
        assert_eq!(status.failures, 2);
        assert!(status.fatal.is_none());
        let last = status.last_result.unwrap();
        assert_eq!(last.stages_applied, vec!["optimize", "evolve", "measure"]);
        assert_eq!(
            last.outcome,
            CycleOutcome::Failure {
                reason: FailureReason::StaleVersion { attempted: 1, current: 42 },
            }
        );
    }

    #[tokio::test]
    async fn test_corrupted_store_stops_loop() {
        let store = Arc::new(BrokenStore {
            inner: InMemoryStateStore::new(SystemState::seed("init")),
            corrupted: true,
        });
        let (sink, mut rx) = ChannelSink::new();
        let scheduler = Scheduler::new(builtin_pipeline(), store, Arc::new(sink), fast()).unwrap();

        scheduler.start().await.unwrap();
        scheduler.join().await;

        let status = scheduler.status().await;
        assert_eq!(status.state, LoopState::Stopped);
        assert_eq!(status.cycles_run, 1);
        assert!(status.fatal.unwrap().contains("checksum mismatch"));

        // The failing cycle is still reported
        assert!(!rx.recv().await.unwrap().is_success());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_exhausted_version_stops_loop() {
        let store = Arc::new(InMemoryStateStore::new(SystemState::new(u64::MAX, "init")));
        let (sink, mut rx) = ChannelSink::new();
        let scheduler = Scheduler::new(builtin_pipeline(), store.clone(), Arc::new(sink), fast()).unwrap();

        scheduler.start().await.unwrap();
        scheduler.join().await;

        let status = scheduler.status().await;
        assert_eq!(status.state, LoopState::Stopped);
        assert_eq!(status.cycles_run, 1);
        assert_eq!(status.failures, 1);
        assert!(status.fatal.unwrap().contains("cannot be advanced"));

        let result = rx.recv().await.unwrap();
        assert_eq!(result.output_version, u64::MAX);
        assert_eq!(
            result.outcome,
            CycleOutcome::Failure {
                reason: FailureReason::VersionExhausted { version: u64::MAX },
            }
        );
        assert_eq!(store.get().await.unwrap().version, u64::MAX);
    }

    #[tokio::test]
    async fn test_run_cycle_reports_exhausted_version() {
        let store = Arc::new(InMemoryStateStore::new(SystemState::new(u64::MAX, "init")));
        let (sink, _rx) = ChannelSink::new();
        let scheduler = Scheduler::new(builtin_pipeline(), store, Arc::new(sink), fast()).unwrap();

        let err = scheduler.run_cycle().await.unwrap_err();
        assert!(matches!(err, SchedulerError::Fatal(CycleError::VersionExhausted { .. })));
    }

    /// Sink that waits for a permit before every publish.
    struct BlockedSink {
        gate: Arc<Semaphore>,
        delivered: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ResultSink for BlockedSink {
        fn name(&self) -> &str {
            "blocked"
        }

        async fn publish(&self, _result: &CycleResult) -> Result<(), SinkError> {
            let permit = self.gate.acquire().await.map_err(|e| SinkError::Other(e.to_string()))?;
            permit.forget();
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_result_queue_drops_instead_of_growing() {
        let gate = Arc::new(Semaphore::new(0));
        let delivered = Arc::new(AtomicUsize::new(0));
        let sink = BlockedSink {
            gate: gate.clone(),
            delivered: delivered.clone(),
        };
        let config = fast().with_max_cycles(10).with_result_capacity(2);
        let scheduler = Scheduler::new(builtin_pipeline(), seed_store(), Arc::new(sink), config).unwrap();

        scheduler.start().await.unwrap();
        while scheduler.status().await.state != LoopState::Stopped {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let status = scheduler.status().await;
        assert_eq!(status.cycles_run, 10);
        assert_eq!(status.failures, 0);
        // Two queued plus at most one held by the dispatcher
        assert!((7..=8).contains(&status.dropped_results), "dropped {}", status.dropped_results);

        gate.add_permits(10);
        scheduler.join().await;
        assert_eq!(delivered.load(Ordering::SeqCst) as u64 + status.dropped_results, 10);
    }
}
