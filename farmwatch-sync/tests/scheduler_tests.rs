//! Scheduler behaviour under paused tokio time: warm-up, ticks, offline
//! suspension, ambiguous outcomes, and loop cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use farmwatch_core::{Ambiguity, SensorSnapshot, SharedKey, SyncConfig, SyncOutcome};
use farmwatch_sync::{
    ChannelSignal, Connectivity, CovertTransport, DeliveryChannel, SensorSource, SyncError,
    SyncScheduler,
};
use tokio::time::sleep;
use url::Url;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

enum Reading {
    Present,
    Absent,
    Broken,
}

struct FixedSource {
    reading: Reading,
    calls: AtomicUsize,
}

impl FixedSource {
    fn new(reading: Reading) -> Arc<Self> {
        Arc::new(Self {
            reading,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SensorSource for FixedSource {
    async fn latest(&self) -> Result<Option<SensorSnapshot>, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reading {
            Reading::Present => Ok(Some(SensorSnapshot::new(24.5, 68.0, 45.8))),
            Reading::Absent => Ok(None),
            Reading::Broken => Err(SyncError::InvalidUrl {
                url: "bridge".to_string(),
                source: url::ParseError::EmptyHost,
            }),
        }
    }
}

/// Counts loads; optionally waits before answering or never answers.
struct CountingChannel {
    loads: AtomicUsize,
    delay: Option<Duration>,
    hang: bool,
}

impl CountingChannel {
    fn instant() -> Arc<Self> {
        Arc::new(Self {
            loads: AtomicUsize::new(0),
            delay: None,
            hang: false,
        })
    }

    fn delayed(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            loads: AtomicUsize::new(0),
            delay: Some(delay),
            hang: false,
        })
    }

    fn silent() -> Arc<Self> {
        Arc::new(Self {
            loads: AtomicUsize::new(0),
            delay: None,
            hang: true,
        })
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryChannel for CountingChannel {
    async fn load(&self, _url: Url) -> ChannelSignal {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        ChannelSignal::Loaded
    }
}

fn config() -> SyncConfig {
    SyncConfig {
        interval_secs: 60,
        warmup_ms: 5_000,
        shared_key: SharedKey::from("farm-key"),
        ..SyncConfig::default()
    }
}

fn scheduler(
    source: Arc<FixedSource>,
    channel: Arc<CountingChannel>,
    connectivity: Connectivity,
) -> SyncScheduler {
    let cfg = config();
    let transport = CovertTransport::new(
        &cfg.endpoint,
        cfg.shared_key.clone(),
        channel,
        cfg.delivery_timeout(),
    )
    .expect("transport");
    SyncScheduler::new(&cfg, source, transport, connectivity)
}

// ---------------------------------------------------------------------------
// sync_once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sync_once_records_success() {
    let channel = CountingChannel::instant();
    let s = scheduler(
        FixedSource::new(Reading::Present),
        channel.clone(),
        Connectivity::default(),
    );

    let attempt = s.sync_once().await.expect("attempt");
    assert_eq!(attempt.outcome, SyncOutcome::Success);
    assert_eq!(s.last_attempt(), Some(attempt.clone()));
    assert_eq!(s.last_success_at(), Some(attempt.attempted_at));
    assert_eq!(channel.loads(), 1);
}

#[tokio::test]
async fn disabled_scheduler_records_nothing() {
    let source = FixedSource::new(Reading::Present);
    let channel = CountingChannel::instant();
    let s = scheduler(source.clone(), channel.clone(), Connectivity::default());
    s.init(60, false);

    assert!(s.sync_once().await.is_none());
    assert!(s.last_attempt().is_none());
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    assert_eq!(channel.loads(), 0);
}

#[tokio::test]
async fn offline_sync_once_never_reaches_transport() {
    let channel = CountingChannel::instant();
    let s = scheduler(
        FixedSource::new(Reading::Present),
        channel.clone(),
        Connectivity::new(false),
    );

    assert!(s.sync_once().await.is_none());
    assert_eq!(channel.loads(), 0);
    assert!(s.last_attempt().is_none());
}

#[tokio::test]
async fn missing_reading_is_a_silent_skip() {
    let channel = CountingChannel::instant();
    let s = scheduler(
        FixedSource::new(Reading::Absent),
        channel.clone(),
        Connectivity::default(),
    );

    assert!(s.sync_once().await.is_none());
    assert!(s.last_attempt().is_none());
    assert_eq!(channel.loads(), 0);
}

#[tokio::test]
async fn source_error_is_recorded_as_failed() {
    let channel = CountingChannel::instant();
    let s = scheduler(
        FixedSource::new(Reading::Broken),
        channel.clone(),
        Connectivity::default(),
    );

    let attempt = s.sync_once().await.expect("attempt");
    assert_eq!(attempt.outcome, SyncOutcome::Failed);
    assert!(attempt.message.contains("sensor source failed"));
    assert!(s.last_success_at().is_none());
    assert_eq!(channel.loads(), 0);
}

// ---------------------------------------------------------------------------
// Loop timing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn loop_waits_for_warmup_then_ticks_every_interval() {
    let channel = CountingChannel::instant();
    let s = scheduler(
        FixedSource::new(Reading::Present),
        channel.clone(),
        Connectivity::default(),
    );
    s.start_loop();

    sleep(Duration::from_millis(4_900)).await;
    assert_eq!(channel.loads(), 0, "nothing before warm-up");

    sleep(Duration::from_millis(200)).await;
    assert_eq!(channel.loads(), 1, "warm-up attempt at 5s");

    sleep(Duration::from_secs(55)).await;
    assert_eq!(channel.loads(), 2, "first tick at 60s");

    sleep(Duration::from_secs(60)).await;
    assert_eq!(channel.loads(), 3, "second tick at 120s");

    s.stop_loop();
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn offline_ticks_are_noops_and_reconnect_waits_for_next_tick() {
    let channel = CountingChannel::instant();
    let connectivity = Connectivity::new(false);
    let s = scheduler(
        FixedSource::new(Reading::Present),
        channel.clone(),
        connectivity.clone(),
    );
    s.start_loop();

    sleep(Duration::from_secs(61)).await;
    assert_eq!(channel.loads(), 0, "warm-up and first tick skipped while offline");

    connectivity.set_online(true);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(channel.loads(), 0, "reconnecting must not trigger a catch-up sync");

    sleep(Duration::from_secs(59)).await;
    assert_eq!(channel.loads(), 1, "next scheduled tick resumes delivery");

    s.stop_loop();
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn timeout_is_recorded_as_ambiguous_without_extra_retry() {
    let channel = CountingChannel::silent();
    let s = scheduler(
        FixedSource::new(Reading::Present),
        channel.clone(),
        Connectivity::default(),
    );
    s.start_loop();

    // warm-up at 5s, delivery gives up at 15s
    sleep(Duration::from_secs(16)).await;
    let attempt = s.last_attempt().expect("attempt recorded");
    assert_eq!(attempt.outcome, SyncOutcome::Ambiguous(Ambiguity::Timeout));
    assert!(!attempt.outcome.is_hard_failure());
    assert_eq!(channel.loads(), 1);

    sleep(Duration::from_secs(40)).await;
    assert_eq!(channel.loads(), 1, "no retry before the next tick");

    sleep(Duration::from_secs(5)).await;
    assert_eq!(channel.loads(), 2, "next tick at 60s delivers again");

    s.stop_loop();
}

// ---------------------------------------------------------------------------
// Loop lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn start_loop_twice_keeps_a_single_loop() {
    let channel = CountingChannel::instant();
    let s = scheduler(
        FixedSource::new(Reading::Present),
        channel.clone(),
        Connectivity::default(),
    );
    s.start_loop();
    s.start_loop();
    assert!(s.is_looping());

    sleep(Duration::from_millis(5_100)).await;
    assert_eq!(channel.loads(), 1, "only one warm-up attempt");

    s.stop_loop();
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn stop_loop_prevents_further_attempts() {
    let channel = CountingChannel::instant();
    let s = scheduler(
        FixedSource::new(Reading::Present),
        channel.clone(),
        Connectivity::default(),
    );
    s.start_loop();
    sleep(Duration::from_millis(5_100)).await;
    assert_eq!(channel.loads(), 1);

    s.stop_loop();
    assert!(!s.is_looping());
    sleep(Duration::from_secs(300)).await;
    assert_eq!(channel.loads(), 1);

    // Stopping again is harmless.
    s.stop_loop();
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn result_of_in_flight_delivery_is_discarded_after_stop() {
    let channel = CountingChannel::delayed(Duration::from_secs(3));
    let s = scheduler(
        FixedSource::new(Reading::Present),
        channel.clone(),
        Connectivity::default(),
    );
    s.start_loop();

    sleep(Duration::from_secs(6)).await;
    assert_eq!(channel.loads(), 1, "delivery in flight");
    s.stop_loop();

    sleep(Duration::from_secs(10)).await;
    assert!(
        s.last_attempt().is_none(),
        "stopped loop must not record its late result"
    );
}

#[tokio::test]
async fn status_reflects_settings_and_last_attempt() {
    let s = scheduler(
        FixedSource::new(Reading::Present),
        CountingChannel::instant(),
        Connectivity::default(),
    );
    s.init(30, true);
    s.sync_now().await;

    let status = s.status();
    assert!(status.enabled);
    assert!(status.online);
    assert!(!status.loop_running);
    assert_eq!(status.interval_secs, 30);
    assert_eq!(
        status.last_attempt.map(|a| a.outcome),
        Some(SyncOutcome::Success)
    );
    assert!(status.last_success_at.is_some());
}
