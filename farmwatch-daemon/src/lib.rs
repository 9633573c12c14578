//! Long-running farmwatch process: sync loop + service watchdog + socket server.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_offline, request_online, request_restart, request_status, request_stop, request_sync,
    send_request, ControlCommand, DaemonRequest, DaemonResponse,
};
pub use runtime::{run, run_with, start_blocking, Components, StatusReport};
