//! # farmwatch-sync
//!
//! Periodic export of farm sensor readings to a remote store.
//!
//! A [`SyncScheduler`] tick asks a [`SensorSource`] for the latest
//! [`SensorSnapshot`](farmwatch_core::SensorSnapshot), then hands it to the
//! [`CovertTransport`], which encodes it into a pixel request and races the
//! load signal against a fixed timeout. Outcomes are advisory: the scheduler
//! records them and never retries outside its own ticks.

pub mod connectivity;
pub mod error;
pub mod scheduler;
pub mod sensor;
pub mod transport;

pub use connectivity::Connectivity;
pub use error::SyncError;
pub use scheduler::{SchedulerStatus, SyncScheduler};
pub use sensor::{parse_bridge_payload, HttpSensorSource, SensorSource};
pub use transport::{ChannelSignal, CovertTransport, Delivery, DeliveryChannel, HttpPixelChannel};
