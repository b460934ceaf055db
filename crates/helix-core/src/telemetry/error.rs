//! Telemetry error types.

use thiserror::Error;

/// Errors raised by telemetry subscribers.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The subscriber could not handle the event.
    #[error("Subscriber {subscriber} failed: {message}")]
    SubscriberFailed {
        /// Subscriber name.
        subscriber: String,
        /// Failure detail.
        message: String,
    },

    /// Event payload could not be (de)serialized.
    #[error("Telemetry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;
