//! Telemetry relay and in-memory metrics.

pub mod bridge;
pub mod error;
pub mod metrics;

pub use bridge::{TelemetryBridge, TelemetryEvent, TelemetrySubscriber};
pub use error::{Result, TelemetryError};
pub use metrics::{AggregateMetrics, MetricsAggregator, MetricsSubscriber, SessionMetrics};
