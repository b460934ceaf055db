//! Telemetry subscribers never affect workflow results.

mod common;

use std::sync::Arc;

use common::{ScriptedExecutor, step};
use helix_core::telemetry::{
    MetricsAggregator, MetricsSubscriber, TelemetryBridge, TelemetryError, TelemetryEvent,
    TelemetrySubscriber,
};
use helix_core::workflow::{RetryPolicy, WorkflowDefinition, WorkflowEngine, WorkflowStep};
use serde_json::json;

struct Broken;

impl TelemetrySubscriber for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn on_event(&self, event: &TelemetryEvent) -> helix_core::telemetry::Result<()> {
        if event.event_name.ends_with("complete") {
            panic!("cannot handle {}", event.event_name);
        }
        Err(TelemetryError::SubscriberFailed {
            subscriber: "broken".to_string(),
            message: "sink offline".to_string(),
        })
    }
}

fn workflow() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "wf",
        "observed",
        vec![
            step("a"),
            WorkflowStep::parallel("fan", vec![step("x"), step("y").with_skip_if("true")]),
            step("b")
                .with_config("alwaysFail", json!(true))
                .with_retry(RetryPolicy::new(2, 0))
                .with_on_error("c"),
            step("c"),
        ],
    )
}

fn engine(telemetry: TelemetryBridge) -> WorkflowEngine {
    WorkflowEngine::builder()
        .executor(Arc::new(ScriptedExecutor::new()))
        .telemetry(telemetry)
        .build()
}

#[tokio::test]
async fn test_broken_subscribers_do_not_change_results() {
    let quiet = engine(TelemetryBridge::default()).execute(&workflow()).await;

    let telemetry = TelemetryBridge::default();
    telemetry.add_subscriber(Arc::new(Broken));
    let noisy = engine(telemetry).execute(&workflow()).await;

    assert_eq!(noisy.status, quiet.status);
    assert_eq!(noisy.step_statuses, quiet.step_statuses);
    assert_eq!(noisy.error, quiet.error);
    assert_eq!(noisy.node_results.len(), quiet.node_results.len());
}

#[tokio::test]
async fn test_events_for_one_run_arrive_in_order() {
    let telemetry = TelemetryBridge::default();
    let mut rx = telemetry.subscribe();
    let result = engine(telemetry).execute(&workflow()).await;
    assert!(result.is_success());

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.event_name);
    }
    assert_eq!(names.first().map(String::as_str), Some("workflow:start"));
    assert_eq!(names.last().map(String::as_str), Some("workflow:complete"));
    let position = |name: &str| names.iter().position(|n| n == name).unwrap();
    assert!(position("workflow:step:skipped") < position("workflow:step:failed"));
    assert_eq!(names.iter().filter(|n| *n == "workflow:step:failed").count(), 1);
}

#[tokio::test]
async fn test_metrics_distribution_matches_total_events() {
    let aggregator = MetricsAggregator::new();
    let telemetry = TelemetryBridge::default();
    telemetry.add_subscriber(Arc::new(MetricsSubscriber::new(aggregator.clone())));
    telemetry.add_subscriber(Arc::new(Broken));
    let engine = engine(telemetry);

    let first = engine.execute(&workflow()).await;
    let second = engine.execute(&workflow()).await;

    let all = aggregator.get_all_metrics();
    assert_eq!(all.total_sessions, 2);
    assert_eq!(all.event_distribution.values().sum::<u64>(), all.total_events);
    assert_eq!(all.event_distribution["workflow:start"], 2);

    let session = aggregator.get_session_metrics(&first.execution_id).unwrap();
    assert_eq!(session.event_counts["workflow:complete"], 1);
    let ended = aggregator.end_session(&second.execution_id).unwrap();
    assert!(ended.ended);
}
