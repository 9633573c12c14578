use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use farmwatch_core::{FarmwatchConfig, Notice};
use farmwatch_sync::{
    Connectivity, CovertTransport, HttpPixelChannel, HttpSensorSource, SchedulerStatus,
    SyncScheduler,
};
use farmwatch_watchdog::{HttpServiceProbe, RecentNotices, ServiceWatchdog, WatchdogStatus};

use crate::error::{io_err, DaemonError};
use crate::paths::{run_dir, socket_path, RECENT_NOTICES};
use crate::protocol::{ControlCommand, DaemonRequest, DaemonResponse};

/// Everything the daemon drives. Cheap to clone.
#[derive(Clone)]
pub struct Components {
    pub config: FarmwatchConfig,
    pub scheduler: SyncScheduler,
    pub watchdog: ServiceWatchdog,
    pub notices: Arc<RecentNotices>,
}

impl Components {
    /// Wire the HTTP-backed sensor source, pixel transport and service probe.
    pub fn from_config(config: FarmwatchConfig) -> Result<Self, DaemonError> {
        config.validate()?;
        let sync = &config.sync;

        let source = Arc::new(HttpSensorSource::new(
            sync.sensor_url.clone(),
            sync.delivery_timeout(),
        ));
        let channel = Arc::new(HttpPixelChannel::new(sync.delivery_timeout()));
        let transport = CovertTransport::new(
            &sync.endpoint,
            sync.shared_key.clone(),
            channel,
            sync.delivery_timeout(),
        )?;
        let scheduler = SyncScheduler::new(sync, source, transport, Connectivity::default());

        let notices = Arc::new(RecentNotices::new(RECENT_NOTICES));
        let probe = Arc::new(HttpServiceProbe::new(
            &config.watchdog.control_url,
            config.watchdog.request_timeout(),
        )?);
        let watchdog = ServiceWatchdog::new(&config.watchdog, probe, notices.clone());

        Ok(Self {
            config,
            scheduler,
            watchdog,
            notices,
        })
    }
}

/// JSON payload of the `status` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub running: bool,
    pub pid: u32,
    pub started_at_unix: u64,
    pub sync: SchedulerStatus,
    pub watchdog_enabled: bool,
    pub watchdog: WatchdogStatus,
    pub notices: Vec<Notice>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Load `~/.farmwatch/config.yaml` and run until stopped.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = farmwatch_core::config::load_at(&home)?;
    let components = Components::from_config(config)?;
    run_with(home, components).await
}

/// Run the sync loop, the service watchdog and the socket server until a
/// `stop` command or ctrl-c.
pub async fn run_with(home: PathBuf, components: Components) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let started_at_unix = unix_seconds_now();
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    if components.config.sync.enabled {
        components.scheduler.start_loop();
    } else {
        tracing::info!("sync disabled in config, loop not started");
    }

    let startup_handle = {
        let shutdown = shutdown_tx.clone();
        let components = components.clone();
        tokio::spawn(async move { startup_task(components, shutdown.subscribe()).await })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let components = components.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                components,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);

    components.scheduler.stop_loop();
    components.watchdog.shutdown();
    startup_handle.abort();
    tracing::info!("daemon stopped");

    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Auto-start the detection service shortly after launch and, once it runs,
/// keep it under the monitor.
async fn startup_task(components: Components, mut shutdown_rx: broadcast::Receiver<()>) {
    let watchdog_cfg = &components.config.watchdog;
    if !watchdog_cfg.enabled {
        tracing::info!("watchdog disabled in config");
        return;
    }

    tokio::select! {
        _ = shutdown_rx.recv() => return,
        _ = tokio::time::sleep(watchdog_cfg.page_load_delay()) => {}
    }

    if components.watchdog.auto_start().await {
        components.watchdog.monitor(watchdog_cfg.monitor_interval());
    } else {
        tracing::warn!("detection service not running after auto-start, monitor not started");
    }
}

async fn socket_server_task(
    home: PathBuf,
    components: Components,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let run = run_dir(&home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }

    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let components = components.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        components,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    components: Components,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = dispatch(request.cmd, &components, &shutdown_tx, started_at_unix).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == ControlCommand::Stop {
            break;
        }
    }

    Ok(())
}

async fn dispatch(
    cmd: ControlCommand,
    components: &Components,
    shutdown_tx: &broadcast::Sender<()>,
    started_at_unix: u64,
) -> DaemonResponse {
    tracing::debug!(?cmd, "daemon command");
    match cmd {
        ControlCommand::Status => json_response(&build_status_report(components, started_at_unix)),
        ControlCommand::Sync => match components.scheduler.sync_now().await {
            Some(attempt) => DaemonResponse::ok(json!({ "skipped": false, "attempt": attempt })),
            None => DaemonResponse::ok(json!({
                "skipped": true,
                "online": components.scheduler.connectivity().is_online(),
            })),
        },
        ControlCommand::Restart => {
            let watchdog = &components.watchdog;
            let running = watchdog.restart().await;
            if running && !watchdog.is_monitoring() {
                watchdog.monitor(components.config.watchdog.monitor_interval());
            }
            DaemonResponse::ok(json!({ "running": running, "watchdog": watchdog.status() }))
        }
        ControlCommand::Online | ControlCommand::Offline => {
            let online = cmd == ControlCommand::Online;
            let changed = components.scheduler.connectivity().set_online(online);
            DaemonResponse::ok(json!({ "online": online, "changed": changed }))
        }
        ControlCommand::Stop => {
            let _ = shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
    }
}

fn build_status_report(components: &Components, started_at_unix: u64) -> StatusReport {
    StatusReport {
        running: true,
        pid: std::process::id(),
        started_at_unix,
        sync: components.scheduler.status(),
        watchdog_enabled: components.config.watchdog.enabled,
        watchdog: components.watchdog.status(),
        notices: components.notices.snapshot(),
    }
}

fn json_response<T: Serialize>(payload: &T) -> DaemonResponse {
    match serde_json::to_value(payload) {
        Ok(value) => DaemonResponse::ok(value),
        Err(err) => DaemonResponse::error(format!("failed to encode response: {err}")),
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let run = run_dir(home);
    if !run.exists() {
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
