//! Core types for the hooks system.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::hooks::error::HookError;

/// Priority for hook execution order.
///
/// Hooks with higher priority values execute first.
/// Default priority is 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HookPriority(pub u32);

impl Default for HookPriority {
    fn default() -> Self {
        Self(100)
    }
}

impl HookPriority {
    /// Create a new hook priority.
    pub fn new(priority: u32) -> Self {
        Self(priority)
    }

    /// Get the priority value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Lifecycle points a hook can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HookEvent {
    /// Before a workflow starts.
    BeforeWorkflow,
    /// After a workflow finished, whatever the outcome.
    AfterWorkflow,
    /// A workflow failed.
    WorkflowError,
    /// Before a step runs.
    BeforeStep,
    /// After a step settled (completed or failed).
    AfterStep,
    /// A step exhausted its retries.
    StepError,
    /// Before a tool call.
    BeforeTool,
    /// After a tool call.
    AfterTool,
    /// A tool call failed.
    ToolError,
    /// Before an agent (sampling) call.
    BeforeAgent,
    /// After an agent (sampling) call.
    AfterAgent,
    /// An agent call failed.
    AgentError,
}

impl HookEvent {
    /// Every known event, in declaration order.
    pub const ALL: [Self; 12] = [
        Self::BeforeWorkflow,
        Self::AfterWorkflow,
        Self::WorkflowError,
        Self::BeforeStep,
        Self::AfterStep,
        Self::StepError,
        Self::BeforeTool,
        Self::AfterTool,
        Self::ToolError,
        Self::BeforeAgent,
        Self::AfterAgent,
        Self::AgentError,
    ];

    /// Get the string representation of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeWorkflow => "workflow:before",
            Self::AfterWorkflow => "workflow:after",
            Self::WorkflowError => "workflow:error",
            Self::BeforeStep => "workflow:step:before",
            Self::AfterStep => "workflow:step:after",
            Self::StepError => "workflow:step:error",
            Self::BeforeTool => "tool:before",
            Self::AfterTool => "tool:after",
            Self::ToolError => "tool:error",
            Self::BeforeAgent => "agent:before",
            Self::AfterAgent => "agent:after",
            Self::AgentError => "agent:error",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| HookError::UnknownEvent(s.to_string()))
    }
}

impl TryFrom<String> for HookEvent {
    type Error = HookError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HookEvent> for String {
    fn from(event: HookEvent) -> Self {
        event.as_str().to_string()
    }
}

/// Context passed to hooks during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookContext {
    /// The event being dispatched.
    pub event: HookEvent,
    /// Event input (workflow definition summary, step, result, ...).
    pub input: serde_json::Value,
    /// Metadata about the execution context.
    pub metadata: serde_json::Value,
}

impl HookContext {
    /// Create a new hook context.
    pub fn new(event: HookEvent, input: serde_json::Value) -> Self {
        Self { event, input, metadata: serde_json::json!({}) }
    }

    /// Create a new hook context with metadata.
    pub fn with_metadata(
        event: HookEvent,
        input: serde_json::Value,
        metadata: serde_json::Value,
    ) -> Self {
        Self { event, input, metadata }
    }
}

/// Result of hook execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookResult {
    /// Whether the hook execution was successful.
    pub success: bool,
    /// Optional message from the hook.
    pub message: Option<String>,
    /// Whether the remaining hooks for this event should run.
    #[serde(rename = "continue")]
    pub should_continue: bool,
}

impl Default for HookResult {
    fn default() -> Self {
        Self { success: true, message: None, should_continue: true }
    }
}

impl HookResult {
    /// Create a successful hook result.
    pub fn success() -> Self {
        Self::default()
    }

    /// Create a hook result that stops the remaining hooks for this event.
    pub fn stop(message: impl Into<String>) -> Self {
        Self { success: true, message: Some(message.into()), should_continue: false }
    }

    /// Create a hook result with an error message but continue execution.
    pub fn error(message: impl Into<String>) -> Self {
        Self { success: false, message: Some(message.into()), should_continue: true }
    }
}
