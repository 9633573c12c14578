//! Thin layer over the service control endpoint.
//!
//! Both exchanges are a form-encoded `POST` (`action=status` / `action=start`)
//! answered with a small JSON object:
//!
//! ```json
//! {"success": true, "running": true}
//! {"success": false, "is_tunnel": true, "instructions": ["Start Flask on the laptop"]}
//! ```
//!
//! Both fail closed: any transport or decode error reads as `Stopped` or a
//! refused start.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use farmwatch_core::ServiceState;

use crate::error::WatchdogError;

/// What the control endpoint said about a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartReply {
    Started,
    Refused(String),
    /// The service sits behind a tunnel and must be started by hand on the
    /// host machine. Retrying cannot help.
    ManualStartRequired { instructions: Vec<String> },
}

impl StartReply {
    pub fn is_started(&self) -> bool {
        matches!(self, StartReply::Started)
    }
}

/// Reports whether the companion service runs and can request a start.
#[async_trait]
pub trait ServiceProbe: Send + Sync {
    async fn status(&self) -> ServiceState;
    async fn request_start(&self) -> StartReply;
}

// ---------------------------------------------------------------------------
// Control response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ControlResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    running: bool,
    #[serde(default)]
    is_tunnel: bool,
    #[serde(default)]
    instructions: Option<Vec<String>>,
    #[serde(default)]
    message: Option<String>,
}

const DEFAULT_INSTRUCTIONS: &[&str] = &["Start the detection service on the host machine"];

fn default_instructions() -> Vec<String> {
    DEFAULT_INSTRUCTIONS.iter().map(|s| s.to_string()).collect()
}

pub(crate) fn interpret_status(response: &ControlResponse) -> ServiceState {
    if response.is_tunnel {
        tracing::info!("control endpoint reports tunnel mode");
        return ServiceState::Stopped;
    }
    if response.success && response.running {
        ServiceState::Running
    } else {
        ServiceState::Stopped
    }
}

pub(crate) fn interpret_start(response: ControlResponse) -> StartReply {
    if !response.success && (response.is_tunnel || response.instructions.is_some()) {
        return StartReply::ManualStartRequired {
            instructions: response.instructions.unwrap_or_else(default_instructions),
        };
    }
    if response.success {
        StartReply::Started
    } else {
        StartReply::Refused(
            response
                .message
                .unwrap_or_else(|| "control endpoint refused the start request".to_string()),
        )
    }
}

// ---------------------------------------------------------------------------
// HTTP probe
// ---------------------------------------------------------------------------

/// Talks to the control endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpServiceProbe {
    agent: ureq::Agent,
    url: Url,
}

impl HttpServiceProbe {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, WatchdogError> {
        let parsed = Url::parse(url).map_err(|source| WatchdogError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        Ok(Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            url: parsed,
        })
    }

    /// One blocking exchange. HTTP status errors are returned as `Err` so the
    /// caller can tell a 500 apart from a transport failure.
    fn exchange(
        agent: &ureq::Agent,
        url: &Url,
        action: &str,
    ) -> Result<ControlResponse, WatchdogError> {
        let response = agent
            .post(url.as_str())
            .set("Accept", "application/json")
            .send_form(&[("action", action)])?;
        Ok(response.into_json::<ControlResponse>()?)
    }

    async fn exchange_async(&self, action: &'static str) -> Result<ControlResponse, WatchdogError> {
        let agent = self.agent.clone();
        let url = self.url.clone();
        tokio::task::spawn_blocking(move || Self::exchange(&agent, &url, action)).await?
    }
}

fn is_server_error(err: &WatchdogError) -> bool {
    matches!(err, WatchdogError::Http(inner) if matches!(**inner, ureq::Error::Status(500, _)))
}

#[async_trait]
impl ServiceProbe for HttpServiceProbe {
    async fn status(&self) -> ServiceState {
        match self.exchange_async("status").await {
            Ok(response) => interpret_status(&response),
            Err(err) => {
                if is_server_error(&err) {
                    tracing::info!("control endpoint answered 500, assuming tunnel setup");
                } else {
                    tracing::warn!(error = %err, "service status check failed");
                }
                ServiceState::Stopped
            }
        }
    }

    async fn request_start(&self) -> StartReply {
        match self.exchange_async("start").await {
            Ok(response) => interpret_start(response),
            Err(err) if is_server_error(&err) => {
                tracing::info!("control endpoint answered 500 to start, manual start required");
                StartReply::ManualStartRequired {
                    instructions: vec![
                        "Deploy the service control script to the dashboard host".to_string(),
                        "Make sure the detection service and its tunnel are running".to_string(),
                        "Then run `farmwatch restart`".to_string(),
                    ],
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "service start request failed");
                StartReply::Refused(err.to_string())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
