//! Liveness watchdog for the companion detection service.
//!
//! Shared state is one [`AtomicBool`] (`start_in_flight`) and one mutex-guarded
//! session (retry count, phase, manual-only latch). The flag is only taken
//! through [`ServiceWatchdog::try_acquire_start`], a compare-and-swap that hands
//! out a [`StartPermit`]; dropping the permit clears the flag, so a cancelled
//! start never leaves it stuck or the phase at `Starting`.
//!
//! Retries are an explicit loop bounded by `max_retries`, with a constant
//! backoff that a shutdown interrupts. A retry is charged while holding the
//! permit, so concurrent callers never spend more than the budget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use farmwatch_core::{Notice, ServiceState, WatchdogConfig, WatchdogPhase};

use crate::notify::NotificationSink;
use crate::probe::{ServiceProbe, StartReply};

#[derive(Debug, Default)]
struct Session {
    retry_count: u32,
    phase: WatchdogPhase,
    manual_only: bool,
    instructions_shown: bool,
    exhaustion_reported: bool,
}

impl Session {
    fn gave_up(&self, max_retries: u32) -> bool {
        self.manual_only || self.retry_count >= max_retries
    }
}

/// Outcome of asking for the next start attempt in [`ServiceWatchdog::auto_start`].
enum Claim<'a> {
    Start { permit: StartPermit<'a>, attempt: u32 },
    Busy,
    Exhausted { first: bool },
}

struct MonitorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    fn cancel(self) {
        self.token.cancel();
        self.task.abort();
    }
}

struct Inner {
    probe: Arc<dyn ServiceProbe>,
    notifier: Arc<dyn NotificationSink>,
    max_retries: u32,
    backoff: Duration,
    start_wait: Duration,
    start_in_flight: AtomicBool,
    session: Mutex<Session>,
    monitor: Mutex<Option<MonitorHandle>>,
    shutdown: CancellationToken,
}

/// Exclusive right to issue a start request.
///
/// Dropping it clears the in-flight flag. A start abandoned mid-request
/// leaves the phase `Unknown` rather than `Starting`.
pub struct StartPermit<'a> {
    inner: &'a Inner,
}

impl std::fmt::Debug for StartPermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartPermit").finish_non_exhaustive()
    }
}

impl Drop for StartPermit<'_> {
    fn drop(&mut self) {
        {
            let mut session = lock(&self.inner.session);
            if session.phase == WatchdogPhase::Starting {
                session.phase = WatchdogPhase::Unknown;
            }
        }
        self.inner.start_in_flight.store(false, Ordering::Release);
    }
}

/// Point-in-time view of the watchdog session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogStatus {
    pub phase: WatchdogPhase,
    pub retry_count: u32,
    pub max_retries: u32,
    pub start_in_flight: bool,
    pub manual_only: bool,
    pub monitoring: bool,
}

/// Polls the service, starts it when down, and escalates when it cannot.
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct ServiceWatchdog {
    inner: Arc<Inner>,
}

impl ServiceWatchdog {
    pub fn new(
        config: &WatchdogConfig,
        probe: Arc<dyn ServiceProbe>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                probe,
                notifier,
                max_retries: config.max_retries,
                backoff: config.backoff(),
                start_wait: config.start_wait(),
                start_in_flight: AtomicBool::new(false),
                session: Mutex::new(Session::default()),
                monitor: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Take the start flag if nobody holds it.
    pub fn try_acquire_start(&self) -> Option<StartPermit<'_>> {
        self.inner
            .start_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| StartPermit { inner: &self.inner })
    }

    /// Probe once. No retries at this layer.
    pub async fn is_running(&self) -> bool {
        let state = self.inner.probe.status().await;
        self.observe(state);
        state == ServiceState::Running
    }

    /// Make sure the service runs, issuing at most one start request
    /// system-wide at a time.
    ///
    /// A caller that finds a start already in flight waits `start_wait` and
    /// reports a fresh probe instead of starting the service itself.
    pub async fn ensure_running(&self) -> bool {
        if self.is_running().await {
            tracing::debug!("detection service already running");
            return true;
        }
        self.start_service().await
    }

    /// Start with bounded retries.
    ///
    /// Each round probes first; only a service that is still down consumes
    /// one of the `max_retries` start attempts, and only the caller that
    /// actually sends the start request is charged. A caller that finds a
    /// start in flight waits `start_wait` and probes again.
    ///
    /// Once the budget is spent the terminal notice is emitted once and
    /// `false` returned without contacting the control endpoint again;
    /// [`restart`](Self::restart) resets the budget.
    pub async fn auto_start(&self) -> bool {
        loop {
            if self.inner.shutdown.is_cancelled() {
                return false;
            }
            if self.session().manual_only {
                tracing::info!("manual start required, skipping auto-start");
                return false;
            }
            if self.is_running().await {
                return true;
            }

            let (permit, attempt) = match self.claim_start() {
                Claim::Start { permit, attempt } => (permit, attempt),
                Claim::Busy => {
                    tracing::info!("another caller is starting the detection service, waiting");
                    if !self.pause(self.inner.start_wait).await {
                        return false;
                    }
                    continue;
                }
                Claim::Exhausted { first } => {
                    if first {
                        tracing::error!(
                            max_retries = self.inner.max_retries,
                            "detection service start attempts exhausted",
                        );
                        self.inner.notifier.notify(Notice::error(
                            "Unable to start the detection service after multiple attempts. \
                             Check the service manager, then run `farmwatch restart`.",
                        ));
                    } else {
                        tracing::debug!("start attempts already exhausted");
                    }
                    return false;
                }
            };

            tracing::info!(attempt, max_retries = self.inner.max_retries, "starting service");
            if self.run_start(permit).await {
                return true;
            }
            if self.session().manual_only {
                return false;
            }
            if !self.pause(self.inner.backoff).await {
                return false;
            }
        }
    }

    /// Operator-triggered recovery: clear the retry budget and the manual-only
    /// latch, then run [`auto_start`](Self::auto_start).
    pub async fn restart(&self) -> bool {
        self.reset_retries();
        self.inner
            .notifier
            .notify(Notice::info("Restart requested, checking detection service..."));
        self.auto_start().await
    }

    pub fn reset_retries(&self) {
        let mut session = self.session();
        session.retry_count = 0;
        session.manual_only = false;
        session.instructions_shown = false;
        session.exhaustion_reported = false;
    }

    /// Probe every `interval`; a probe that finds the service down triggers
    /// [`auto_start`](Self::auto_start). Replaces a running monitor. Must be
    /// called from within a tokio runtime.
    pub fn monitor(&self, interval: Duration) {
        let interval = interval.max(Duration::from_millis(1));
        let mut slot = lock(&self.inner.monitor);
        if let Some(previous) = slot.take() {
            previous.cancel();
        }

        let token = self.inner.shutdown.child_token();
        let task = tokio::spawn(monitor_loop(self.clone(), interval, token.clone()));
        *slot = Some(MonitorHandle { token, task });
        tracing::info!(interval_ms = interval.as_millis() as u64, "service monitor started");
    }

    /// Cancel the monitor. Safe to call when not monitoring.
    pub fn stop_monitoring(&self) {
        if let Some(active) = lock(&self.inner.monitor).take() {
            active.cancel();
            tracing::info!("service monitor stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.inner.monitor).is_some()
    }

    /// Stop monitoring and interrupt any retry backoff or start wait.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.stop_monitoring();
    }

    pub fn status(&self) -> WatchdogStatus {
        let monitoring = self.is_monitoring();
        let session = self.session();
        WatchdogStatus {
            phase: session.phase,
            retry_count: session.retry_count,
            max_retries: self.inner.max_retries,
            start_in_flight: self.inner.start_in_flight.load(Ordering::Acquire),
            manual_only: session.manual_only,
            monitoring,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.session().retry_count
    }

    pub fn phase(&self) -> WatchdogPhase {
        self.session().phase
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Single-flight start. Assumes the caller has just seen the service down.
    async fn start_service(&self) -> bool {
        let Some(permit) = self.try_acquire_start() else {
            tracing::info!("another caller is starting the detection service, waiting");
            if !self.pause(self.inner.start_wait).await {
                return false;
            }
            return self.is_running().await;
        };
        self.run_start(permit).await
    }

    /// Take the start flag and charge one retry, both or neither. The budget
    /// is read and bumped while holding the permit, so no two callers can
    /// pass the check together.
    fn claim_start(&self) -> Claim<'_> {
        let Some(permit) = self.try_acquire_start() else {
            return Claim::Busy;
        };
        let mut session = self.session();
        if session.retry_count >= self.inner.max_retries {
            let first = !std::mem::replace(&mut session.exhaustion_reported, true);
            // The permit's drop takes the session lock.
            drop(session);
            drop(permit);
            return Claim::Exhausted { first };
        }
        session.retry_count += 1;
        let attempt = session.retry_count;
        drop(session);
        Claim::Start { permit, attempt }
    }

    /// Send one start request and settle the phase before releasing the flag.
    async fn run_start(&self, permit: StartPermit<'_>) -> bool {
        self.session().phase = WatchdogPhase::Starting;
        tracing::warn!("detection service is not running, attempting to start");
        self.inner
            .notifier
            .notify(Notice::info("Starting detection service..."));

        let confirmed = match self.inner.probe.request_start().await {
            StartReply::Started => {
                let state = self.inner.probe.status().await;
                if state != ServiceState::Running {
                    tracing::warn!(%state, "start accepted but service not confirmed running");
                }
                state == ServiceState::Running
            }
            StartReply::Refused(reason) => {
                tracing::warn!(%reason, "start request refused");
                false
            }
            StartReply::ManualStartRequired { instructions } => {
                self.latch_manual_only(&instructions);
                false
            }
        };

        if confirmed {
            self.mark_running();
            drop(permit);
            tracing::info!("detection service started");
            self.inner
                .notifier
                .notify(Notice::success("Detection service started successfully."));
            return true;
        }

        let manual_only = {
            let mut session = self.session();
            session.phase = WatchdogPhase::Stopped;
            session.manual_only
        };
        drop(permit);
        if !manual_only {
            self.inner.notifier.notify(Notice::error(
                "Failed to start the detection service. Please start it manually.",
            ));
        }
        false
    }

    fn observe(&self, state: ServiceState) {
        if state == ServiceState::Running {
            self.mark_running();
            return;
        }
        // A probe must not overwrite `Starting` while another caller's start
        // is still in flight.
        if !self.inner.start_in_flight.load(Ordering::Acquire) {
            self.session().phase = state.into();
        }
    }

    fn mark_running(&self) {
        let mut session = self.session();
        session.phase = WatchdogPhase::Running;
        session.retry_count = 0;
        session.exhaustion_reported = false;
    }

    fn latch_manual_only(&self, instructions: &[String]) {
        let first_time = {
            let mut session = self.session();
            session.manual_only = true;
            !std::mem::replace(&mut session.instructions_shown, true)
        };
        tracing::info!("detection service must be started manually");
        if first_time {
            let mut message =
                String::from("The detection service must be started manually on the host:");
            for step in instructions {
                message.push_str("\n  ");
                message.push_str(step);
            }
            self.inner.notifier.notify(Notice::warning(message));
        }
    }

    /// Budget spent or manual start latched; only `restart` or a service
    /// that comes back on its own clears this.
    fn gave_up(&self) -> bool {
        self.session().gave_up(self.inner.max_retries)
    }

    /// Sleep unless shut down first; `false` means shutdown.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        lock(&self.inner.session)
    }
}

async fn monitor_loop(watchdog: ServiceWatchdog, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if watchdog.is_running().await {
            continue;
        }
        if watchdog.gave_up() {
            tracing::debug!("detection service down, waiting for an operator restart");
            continue;
        }
        tracing::warn!("detection service stopped unexpectedly");
        watchdog.inner.notifier.notify(Notice::warning(
            "Detection service stopped. Attempting to restart...",
        ));
        watchdog.auto_start().await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
