//! Pixel delivery of sensor snapshots.
//!
//! A snapshot is encoded as query parameters on a `GET` to the pixel endpoint
//! (a path distinct from the canonical upload API):
//!
//! | param | value |
//! |-------|-------|
//! | `k`   | shared key |
//! | `t`   | temperature |
//! | `h`   | humidity |
//! | `s`   | soil moisture |
//! | `_`   | cache-busting nonce |
//!
//! The request is issued through a [`DeliveryChannel`] that only reports
//! "loaded" or "errored", the way an image element does. Resolution races
//! three signals:
//!
//! 1. loaded → [`SyncOutcome::Success`]
//! 2. errored → [`SyncOutcome::Ambiguous`] with [`Ambiguity::LoadError`]; the
//!    endpoint may have stored the reading and still answered with something
//!    that is not an image
//! 3. nothing within the delivery timeout → [`Ambiguity::Timeout`]
//!
//! [`CovertTransport::push`] always resolves to a [`Delivery`]; it has no error path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use url::Url;

use farmwatch_core::{Ambiguity, SensorSnapshot, SharedKey, SyncOutcome};

use crate::error::{url_err, SyncError};

/// What the delivery modality reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    Loaded,
    Errored(String),
}

/// A request modality with load/error signalling and no readable body.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Issue the request. May never return; the transport bounds it with
    /// its own timeout.
    async fn load(&self, url: Url) -> ChannelSignal;
}

/// The resolved result of one [`CovertTransport::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub outcome: SyncOutcome,
    pub message: String,
}

impl Delivery {
    fn new(outcome: SyncOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
        }
    }
}

/// Encodes snapshots into pixel requests and resolves their outcome.
#[derive(Clone)]
pub struct CovertTransport {
    endpoint: Url,
    key: SharedKey,
    channel: Arc<dyn DeliveryChannel>,
    timeout: Duration,
    sequence: Arc<AtomicU64>,
}

impl std::fmt::Debug for CovertTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CovertTransport")
            .field("endpoint", &self.endpoint.as_str())
            .field("key", &self.key)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CovertTransport {
    pub fn new(
        endpoint: &str,
        key: SharedKey,
        channel: Arc<dyn DeliveryChannel>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let endpoint = Url::parse(endpoint).map_err(|e| url_err(endpoint, e))?;
        Ok(Self {
            endpoint,
            key,
            channel,
            timeout,
            sequence: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Build the pixel URL for `snapshot` with a fresh nonce.
    ///
    /// `None` if any metric is not finite; such a reading is never sent.
    pub fn encode(&self, snapshot: &SensorSnapshot) -> Option<Url> {
        let metrics = [
            snapshot.temperature,
            snapshot.humidity,
            snapshot.soil_moisture,
        ];
        if metrics.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("k", self.key.expose())
            .append_pair("t", &snapshot.temperature.to_string())
            .append_pair("h", &snapshot.humidity.to_string())
            .append_pair("s", &snapshot.soil_moisture.to_string())
            .append_pair("_", &self.next_nonce());
        Some(url)
    }

    /// Deliver `snapshot` and resolve the outcome. Never fails.
    pub async fn push(&self, snapshot: &SensorSnapshot) -> Delivery {
        let Some(url) = self.encode(snapshot) else {
            return Delivery::new(
                SyncOutcome::Failed,
                "reading contains a non-finite value; nothing sent",
            );
        };

        tracing::debug!(endpoint = %self.endpoint, "dispatching pixel delivery");
        match tokio::time::timeout(self.timeout, self.channel.load(url)).await {
            Ok(ChannelSignal::Loaded) => Delivery::new(SyncOutcome::Success, "pixel loaded"),
            Ok(ChannelSignal::Errored(detail)) => Delivery::new(
                SyncOutcome::Ambiguous(Ambiguity::LoadError),
                format!("pixel load error, data may still have been stored: {detail}"),
            ),
            Err(_) => Delivery::new(
                SyncOutcome::Ambiguous(Ambiguity::Timeout),
                format!(
                    "no load signal within {}s, data may still have been stored",
                    self.timeout.as_secs()
                ),
            ),
        }
    }

    /// Millisecond clock plus a per-transport sequence, so two pushes in the
    /// same millisecond still differ.
    fn next_nonce(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{millis}{seq:04}")
    }
}

// ---------------------------------------------------------------------------
// HTTP pixel channel
// ---------------------------------------------------------------------------

/// Loads the pixel over HTTP and reports it the way an image element would:
/// only a 2xx response with an `image/*` content type counts as loaded.
#[derive(Debug, Clone)]
pub struct HttpPixelChannel {
    agent: ureq::Agent,
}

impl HttpPixelChannel {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn load_blocking(agent: &ureq::Agent, url: &Url) -> ChannelSignal {
        match agent
            .get(url.as_str())
            .set("Accept", "image/avif,image/webp,image/*,*/*;q=0.8")
            .set("Cache-Control", "no-cache")
            .call()
        {
            Ok(response) => {
                let content_type = response.content_type().to_string();
                if content_type.starts_with("image/") {
                    ChannelSignal::Loaded
                } else {
                    ChannelSignal::Errored(format!("non-image response ({content_type})"))
                }
            }
            Err(ureq::Error::Status(code, _)) => ChannelSignal::Errored(format!("HTTP {code}")),
            Err(ureq::Error::Transport(transport)) => ChannelSignal::Errored(transport.to_string()),
        }
    }
}

#[async_trait]
impl DeliveryChannel for HttpPixelChannel {
    async fn load(&self, url: Url) -> ChannelSignal {
        let agent = self.agent.clone();
        // The blocking request keeps running if the transport times out; its
        // result is simply dropped.
        match tokio::task::spawn_blocking(move || Self::load_blocking(&agent, &url)).await {
            Ok(signal) => signal,
            Err(err) => ChannelSignal::Errored(format!("delivery task failed: {err}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use tokio_test::{assert_pending, assert_ready, task};

    enum Behaviour {
        Load,
        Error,
        Hang,
    }

    struct ScriptedChannel {
        behaviour: Behaviour,
        seen: Mutex<Vec<Url>>,
    }

    impl ScriptedChannel {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<Url> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeliveryChannel for ScriptedChannel {
        async fn load(&self, url: Url) -> ChannelSignal {
            self.seen.lock().unwrap().push(url);
            match self.behaviour {
                Behaviour::Load => ChannelSignal::Loaded,
                Behaviour::Error => ChannelSignal::Errored("HTTP 403".to_string()),
                Behaviour::Hang => std::future::pending::<ChannelSignal>().await,
            }
        }
    }

    fn transport(channel: Arc<ScriptedChannel>) -> CovertTransport {
        CovertTransport::new(
            "https://farm.example/api/pixel_upload.php",
            SharedKey::from("farm-key"),
            channel,
            Duration::from_secs(10),
        )
        .expect("transport")
    }

    fn params(url: &Url) -> BTreeMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[tokio::test]
    async fn loaded_signal_resolves_success() {
        let channel = ScriptedChannel::new(Behaviour::Load);
        let delivery = transport(channel.clone())
            .push(&SensorSnapshot::new(24.5, 68.0, 45.8))
            .await;
        assert_eq!(delivery.outcome, SyncOutcome::Success);
        assert_eq!(channel.seen().len(), 1);
    }

    #[tokio::test]
    async fn error_signal_resolves_ambiguous_not_failed() {
        let channel = ScriptedChannel::new(Behaviour::Error);
        let delivery = transport(channel)
            .push(&SensorSnapshot::new(24.5, 68.0, 45.8))
            .await;
        assert_eq!(
            delivery.outcome,
            SyncOutcome::Ambiguous(Ambiguity::LoadError)
        );
        assert!(delivery.message.contains("HTTP 403"));
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn silent_channel_resolves_ambiguous_timeout_after_ten_seconds() {
        let channel = ScriptedChannel::new(Behaviour::Hang);
        let transport = transport(channel);
        let snapshot = SensorSnapshot::new(24.5, 68.0, 45.8);

        let mut pending = task::spawn(transport.push(&snapshot));
        assert_pending!(pending.poll());

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert_pending!(pending.poll());

        tokio::time::advance(Duration::from_millis(1)).await;
        let delivery = assert_ready!(pending.poll());
        assert_eq!(delivery.outcome, SyncOutcome::Ambiguous(Ambiguity::Timeout));
    }

    #[tokio::test]
    async fn url_carries_key_metrics_and_nonce() {
        let channel = ScriptedChannel::new(Behaviour::Load);
        transport(channel.clone())
            .push(&SensorSnapshot::new(24.5, 68.0, 45.8))
            .await;

        let url = &channel.seen()[0];
        assert_eq!(url.path(), "/api/pixel_upload.php");
        let p = params(url);
        assert_eq!(p["k"], "farm-key");
        assert_eq!(p["t"], "24.5");
        assert_eq!(p["h"], "68");
        assert_eq!(p["s"], "45.8");
        assert!(!p["_"].is_empty());
    }

    #[tokio::test]
    async fn same_snapshot_twice_differs_only_in_nonce() {
        let channel = ScriptedChannel::new(Behaviour::Load);
        let transport = transport(channel.clone());
        let snapshot = SensorSnapshot::new(24.5, 68.0, 45.8);

        let first = transport.push(&snapshot).await;
        let second = transport.push(&snapshot).await;
        assert_eq!(first.outcome, SyncOutcome::Success);
        assert_eq!(second.outcome, SyncOutcome::Success);

        let seen = channel.seen();
        assert_eq!(seen.len(), 2);
        let mut a = params(&seen[0]);
        let mut b = params(&seen[1]);
        let nonce_a = a.remove("_").expect("nonce a");
        let nonce_b = b.remove("_").expect("nonce b");
        assert_ne!(nonce_a, nonce_b);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn non_finite_reading_is_failed_and_never_sent() {
        let channel = ScriptedChannel::new(Behaviour::Load);
        let delivery = transport(channel.clone())
            .push(&SensorSnapshot::new(f64::NAN, 68.0, 45.8))
            .await;
        assert_eq!(delivery.outcome, SyncOutcome::Failed);
        assert!(channel.seen().is_empty());
    }

    #[test]
    fn invalid_endpoint_is_rejected_at_construction() {
        let err = CovertTransport::new(
            "not a url",
            SharedKey::from("k"),
            ScriptedChannel::new(Behaviour::Load),
            Duration::from_secs(10),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::InvalidUrl { .. }));
    }
}
