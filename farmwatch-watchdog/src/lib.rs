//! # farmwatch-watchdog
//!
//! Keeps the companion detection service alive.
//!
//! [`ServiceWatchdog`] polls a [`ServiceProbe`], starts the service when it is
//! down (at most one start request in flight across all callers), retries a
//! bounded number of times with a constant backoff, and reports progress and
//! exhaustion through a [`NotificationSink`].

pub mod error;
pub mod notify;
pub mod probe;
pub mod watchdog;

pub use error::WatchdogError;
pub use notify::{NotificationSink, RecentNotices};
pub use probe::{HttpServiceProbe, ServiceProbe, StartReply};
pub use watchdog::{ServiceWatchdog, StartPermit, WatchdogStatus};
