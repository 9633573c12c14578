//! Sensor source: where the scheduler gets the latest snapshot from.
//!
//! The local bridge answers `GET` with
//!
//! ```json
//! {"success": true, "data": {"temperature": {"value": 24.5}, "humidity": 68, "soil_moisture": 45.8}}
//! ```
//!
//! Each metric is either a bare number or an object carrying a `value` field;
//! both forms are accepted. Numeric strings are accepted too, since the bridge
//! passes some readings through untouched.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use farmwatch_core::SensorSnapshot;

use crate::error::{http_err, SyncError};

/// Provides the latest sensor snapshot on demand.
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// `Ok(None)` means no reading is available right now; the caller treats
    /// it as transient and skips the attempt.
    async fn latest(&self) -> Result<Option<SensorSnapshot>, SyncError>;
}

// ---------------------------------------------------------------------------
// Bridge payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<BridgeData>,
}

#[derive(Debug, Deserialize)]
struct BridgeData {
    temperature: Option<Metric>,
    humidity: Option<Metric>,
    soil_moisture: Option<Metric>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Metric {
    Wrapped { value: Scalar },
    Bare(Scalar),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(f64),
    Text(String),
}

impl Metric {
    fn value(&self) -> Option<f64> {
        let scalar = match self {
            Metric::Wrapped { value } | Metric::Bare(value) => value,
        };
        match scalar {
            Scalar::Number(n) => Some(*n),
            Scalar::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Turn a bridge response into a snapshot stamped with the current time.
///
/// Returns `None` when the bridge reports `success: false`, carries no `data`,
/// or any of the three metrics is missing or unreadable.
pub fn parse_bridge_payload(payload: &Value) -> Option<SensorSnapshot> {
    let response: BridgeResponse = serde_json::from_value(payload.clone()).ok()?;
    if !response.success {
        return None;
    }
    let data = response.data?;
    let temperature = data.temperature.as_ref()?.value()?;
    let humidity = data.humidity.as_ref()?.value()?;
    let soil_moisture = data.soil_moisture.as_ref()?.value()?;
    Some(SensorSnapshot::new(temperature, humidity, soil_moisture))
}

// ---------------------------------------------------------------------------
// HTTP source
// ---------------------------------------------------------------------------

/// Reads the local sensor bridge over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSensorSource {
    agent: ureq::Agent,
    url: String,
}

impl HttpSensorSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            url: url.into(),
        }
    }

    fn fetch_blocking(agent: &ureq::Agent, url: &str) -> Result<Value, SyncError> {
        let response = agent
            .get(url)
            .set("Accept", "application/json")
            .call()
            .map_err(|e| http_err(url, e))?;
        response.into_json::<Value>().map_err(|e| SyncError::Io {
            url: url.to_string(),
            source: e,
        })
    }
}

#[async_trait]
impl SensorSource for HttpSensorSource {
    async fn latest(&self) -> Result<Option<SensorSnapshot>, SyncError> {
        let agent = self.agent.clone();
        let url = self.url.clone();
        let payload =
            tokio::task::spawn_blocking(move || Self::fetch_blocking(&agent, &url)).await??;

        let snapshot = parse_bridge_payload(&payload);
        if snapshot.is_none() {
            tracing::debug!(url = %self.url, "sensor bridge returned no usable reading");
        }
        Ok(snapshot)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
