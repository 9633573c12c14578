//! Timer-driven sync loop.
//!
//! One loop task per scheduler, owned through a [`CancellationToken`] and a
//! [`JoinHandle`]. The first attempt runs after a warm-up delay, then one per
//! interval tick. Attempts never raise: every failure ends up in the recorded
//! [`SyncAttempt`] and the log.
//!
//! Results are written under the same lock `stop_loop` takes to cancel the
//! token, so once `stop_loop` returns the stopped loop can no longer record
//! anything. A delivery already in flight is left to finish; its result is
//! dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use farmwatch_core::{SyncAttempt, SyncConfig, SyncOutcome};

use crate::connectivity::Connectivity;
use crate::sensor::SensorSource;
use crate::transport::CovertTransport;

#[derive(Debug, Clone, Copy)]
struct Settings {
    interval: Duration,
    warmup: Duration,
    enabled: bool,
}

struct LoopHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl LoopHandle {
    fn cancel(self) {
        self.token.cancel();
        self.task.abort();
    }
}

#[derive(Default)]
struct State {
    last_attempt: Option<SyncAttempt>,
    last_success_at: Option<DateTime<Utc>>,
    active: Option<LoopHandle>,
}

struct Inner {
    settings: Mutex<Settings>,
    source: Arc<dyn SensorSource>,
    transport: CovertTransport,
    connectivity: Connectivity,
    state: Mutex<State>,
}

/// Point-in-time view of the scheduler for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub interval_secs: u64,
    pub online: bool,
    pub loop_running: bool,
    pub last_attempt: Option<SyncAttempt>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Periodically exports the latest sensor snapshot through the pixel transport.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    pub fn new(
        config: &SyncConfig,
        source: Arc<dyn SensorSource>,
        transport: CovertTransport,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings: Mutex::new(Settings {
                    interval: tick_period(config.interval_secs),
                    warmup: config.warmup(),
                    enabled: config.enabled,
                }),
                source,
                transport,
                connectivity,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Reconfigure the tick period and enablement without starting the loop.
    ///
    /// `enabled` applies to the very next attempt; a new period applies from
    /// the next `start_loop`.
    pub fn init(&self, interval_secs: u64, enabled: bool) {
        let mut settings = lock(&self.inner.settings);
        settings.interval = tick_period(interval_secs);
        settings.enabled = enabled;
        tracing::info!(interval_secs, enabled, "sync scheduler configured");
    }

    /// Install the loop: first attempt after the warm-up, then every interval.
    ///
    /// Calling it again replaces the running loop. Must be called from within
    /// a tokio runtime.
    pub fn start_loop(&self) {
        let settings = *lock(&self.inner.settings);
        let mut state = lock(&self.inner.state);
        if let Some(previous) = state.active.take() {
            previous.cancel();
            tracing::debug!("replaced running sync loop");
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(run_loop(self.inner.clone(), settings, token.clone()));
        state.active = Some(LoopHandle { token, task });
        tracing::info!(
            interval_secs = settings.interval.as_secs(),
            warmup_ms = settings.warmup.as_millis() as u64,
            "sync loop started",
        );
    }

    /// Cancel the loop. Safe to call when no loop is running.
    pub fn stop_loop(&self) {
        let mut state = lock(&self.inner.state);
        if let Some(active) = state.active.take() {
            active.cancel();
            tracing::info!("sync loop stopped");
        }
    }

    pub fn is_looping(&self) -> bool {
        lock(&self.inner.state).active.is_some()
    }

    /// Run one attempt and record it.
    ///
    /// Returns `None` when the attempt was skipped (disabled, offline, or no
    /// reading available); nothing is recorded in that case.
    pub async fn sync_once(&self) -> Option<SyncAttempt> {
        let attempt = self.inner.attempt().await?;
        self.inner.record(attempt.clone(), None);
        Some(attempt)
    }

    /// Operator-triggered attempt outside the timer.
    pub async fn sync_now(&self) -> Option<SyncAttempt> {
        tracing::info!("manual sync triggered");
        self.sync_once().await
    }

    pub fn last_attempt(&self) -> Option<SyncAttempt> {
        lock(&self.inner.state).last_attempt.clone()
    }

    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner.state).last_success_at
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    pub fn status(&self) -> SchedulerStatus {
        let settings = *lock(&self.inner.settings);
        let state = lock(&self.inner.state);
        SchedulerStatus {
            enabled: settings.enabled,
            interval_secs: settings.interval.as_secs(),
            online: self.inner.connectivity.is_online(),
            loop_running: state.active.is_some(),
            last_attempt: state.last_attempt.clone(),
            last_success_at: state.last_success_at,
        }
    }
}

impl Inner {
    async fn attempt(&self) -> Option<SyncAttempt> {
        let enabled = lock(&self.settings).enabled;
        if !enabled {
            tracing::debug!("sync disabled, skipping attempt");
            return None;
        }
        if !self.connectivity.is_online() {
            tracing::debug!("offline, skipping attempt");
            return None;
        }

        let snapshot = match self.source.latest().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                tracing::info!("no sensor data available, skipping attempt");
                return None;
            }
            Err(err) => {
                return Some(SyncAttempt::now(
                    SyncOutcome::Failed,
                    format!("sensor source failed: {err}"),
                ));
            }
        };

        let delivery = self.transport.push(&snapshot).await;
        Some(SyncAttempt::now(delivery.outcome, delivery.message))
    }

    /// Store `attempt` unless it belongs to a loop that has been stopped.
    fn record(&self, attempt: SyncAttempt, owner: Option<&CancellationToken>) -> bool {
        let mut state = lock(&self.state);
        if owner.is_some_and(CancellationToken::is_cancelled) {
            tracing::debug!(outcome = %attempt.outcome, "discarding result of stopped sync loop");
            return false;
        }

        match attempt.outcome {
            SyncOutcome::Success => {
                tracing::info!(message = %attempt.message, "sensor data synced");
                state.last_success_at = Some(attempt.attempted_at);
            }
            SyncOutcome::Ambiguous(reason) => {
                tracing::warn!(%reason, message = %attempt.message, "sync outcome ambiguous");
            }
            SyncOutcome::Failed => {
                tracing::warn!(message = %attempt.message, "sync attempt failed");
            }
        }
        state.last_attempt = Some(attempt);
        true
    }
}

async fn run_loop(inner: Arc<Inner>, settings: Settings, token: CancellationToken) {
    let warmup = tokio::time::sleep(settings.warmup);
    tokio::pin!(warmup);
    let mut warmed_up = false;

    let mut ticker = tokio::time::interval_at(Instant::now() + settings.interval, settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = &mut warmup, if !warmed_up => warmed_up = true,
            _ = ticker.tick() => {}
        }

        if let Some(attempt) = inner.attempt().await {
            inner.record(attempt, Some(&token));
        }
    }
}

fn tick_period(interval_secs: u64) -> Duration {
    Duration::from_secs(interval_secs.max(1))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
