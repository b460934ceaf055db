//! In-memory aggregation of telemetry events per session.
//!
//! Sessions are never evicted automatically; call
//! [`MetricsAggregator::end_session`] and drop the aggregator, or accept
//! unbounded growth for long-lived processes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::telemetry::bridge::{TelemetryEvent, TelemetrySubscriber};
use crate::telemetry::error::Result;

/// Running totals for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    /// Session identifier.
    pub session_id: String,
    /// First event time.
    pub start_time: DateTime<Utc>,
    /// Most recent event time.
    pub last_event_time: DateTime<Utc>,
    /// Number of events recorded.
    pub total_events: u64,
    /// Events per type.
    pub event_counts: BTreeMap<String, u64>,
    /// Milliseconds from the first event to the last event, or to `end_session`.
    pub duration_ms: u64,
    /// Whether `end_session` was called.
    pub ended: bool,
}

/// Snapshot across all sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateMetrics {
    /// Number of known sessions.
    pub total_sessions: usize,
    /// Number of events across sessions.
    pub total_events: u64,
    /// Events per type, summed across sessions.
    pub event_distribution: BTreeMap<String, u64>,
}

/// Per-session event counters.
#[derive(Debug, Default, Clone)]
pub struct MetricsAggregator {
    sessions: Arc<Mutex<HashMap<String, SessionMetrics>>>,
}

impl MetricsAggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one event of `event_type` for the session.
    pub fn record_event(&self, session_id: &str, event_type: &str) {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.entry(session_id.to_string()).or_insert_with(|| SessionMetrics {
            session_id: session_id.to_string(),
            start_time: now,
            last_event_time: now,
            total_events: 0,
            event_counts: BTreeMap::new(),
            duration_ms: 0,
            ended: false,
        });
        session.total_events += 1;
        *session.event_counts.entry(event_type.to_string()).or_insert(0) += 1;
        session.last_event_time = now;
        session.duration_ms = millis_between(session.start_time, now);
    }

    /// Running totals for a session, `None` if it is unknown.
    pub fn get_session_metrics(&self, session_id: &str) -> Option<SessionMetrics> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).get(session_id).cloned()
    }

    /// Snapshot of every session.
    pub fn get_all_metrics(&self) -> AggregateMetrics {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut aggregate =
            AggregateMetrics { total_sessions: sessions.len(), ..AggregateMetrics::default() };
        for session in sessions.values() {
            aggregate.total_events += session.total_events;
            for (event_type, count) in &session.event_counts {
                *aggregate.event_distribution.entry(event_type.clone()).or_insert(0) += count;
            }
        }
        aggregate
    }

    /// Finalizes the session duration as now minus its start time.
    ///
    /// Returns the final metrics, or `None` for an unknown session.
    pub fn end_session(&self, session_id: &str) -> Option<SessionMetrics> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.get_mut(session_id)?;
        session.duration_ms = millis_between(session.start_time, Utc::now());
        session.ended = true;
        Some(session.clone())
    }
}

fn millis_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from(end.signed_duration_since(start).num_milliseconds()).unwrap_or(0)
}

/// Feeds bridge events into a [`MetricsAggregator`].
///
/// Sessions are keyed by the event's `executionId`, then `optimizationId`,
/// falling back to `"global"`.
#[derive(Debug, Clone)]
pub struct MetricsSubscriber {
    aggregator: MetricsAggregator,
}

impl MetricsSubscriber {
    /// Wraps an aggregator; clones of the aggregator observe the same counters.
    pub fn new(aggregator: MetricsAggregator) -> Self {
        Self { aggregator }
    }
}

impl TelemetrySubscriber for MetricsSubscriber {
    fn name(&self) -> &str {
        "metrics"
    }

    fn on_event(&self, event: &TelemetryEvent) -> Result<()> {
        let session_id = ["executionId", "optimizationId"]
            .iter()
            .find_map(|key| event.data.get(*key).and_then(|v| v.as_str()))
            .unwrap_or("global");
        self.aggregator.record_event(session_id, &event.event_name);
        Ok(())
    }
}
