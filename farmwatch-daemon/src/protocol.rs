//! Newline-delimited JSON over the daemon's Unix socket.
//!
//! One request per line, one response per line:
//!
//! ```text
//! → {"cmd":"status"}
//! ← {"ok":true,"data":{...}}
//! ```

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// Operator commands understood by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    Status,
    /// Run one sync attempt now.
    Sync,
    /// Reset the watchdog budget and start the service.
    Restart,
    Online,
    Offline,
    Stop,
}

/// JSON newline-delimited request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: ControlCommand,
}

impl From<ControlCommand> for DaemonRequest {
    fn from(cmd: ControlCommand) -> Self {
        Self { cmd }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Query status, retrying briefly while a freshly started daemon binds its
/// socket.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::from(ControlCommand::Status);

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    request(home, ControlCommand::Stop).map(|_| ())
}

pub fn request_sync(home: &Path) -> Result<Value, DaemonError> {
    request(home, ControlCommand::Sync)
}

pub fn request_restart(home: &Path) -> Result<Value, DaemonError> {
    request(home, ControlCommand::Restart)
}

pub fn request_online(home: &Path) -> Result<Value, DaemonError> {
    request(home, ControlCommand::Online)
}

pub fn request_offline(home: &Path) -> Result<Value, DaemonError> {
    request(home, ControlCommand::Offline)
}

fn request(home: &Path, cmd: ControlCommand) -> Result<Value, DaemonError> {
    let response = send_request(home, &DaemonRequest::from(cmd))?;
    response_into_data(response)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_are_snake_case_on_the_wire() {
        let encoded = serde_json::to_string(&DaemonRequest::from(ControlCommand::Restart))
            .expect("encode");
        assert_eq!(encoded, r#"{"cmd":"restart"}"#);

        let decoded: DaemonRequest = serde_json::from_str(r#"{"cmd":"offline"}"#).expect("decode");
        assert_eq!(decoded.cmd, ControlCommand::Offline);
        assert!(serde_json::from_str::<DaemonRequest>(r#"{"cmd":"reboot"}"#).is_err());
    }

    #[test]
    fn error_response_becomes_protocol_error() {
        let err = response_into_data(DaemonResponse::error("boom")).unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(message) if message == "boom"));

        let data = response_into_data(DaemonResponse::ok(json!({"online": true}))).expect("ok");
        assert_eq!(data["online"], json!(true));
    }

    #[test]
    fn missing_socket_means_not_running() {
        let home = tempfile::TempDir::new().expect("home");
        let err = send_request(home.path(), &ControlCommand::Status.into()).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }
}
