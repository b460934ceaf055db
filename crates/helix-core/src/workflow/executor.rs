//! Step executors.
//!
//! The engine knows nothing about what a step does; it looks up the
//! [`StepExecutor`] registered for the step's `type` and awaits it. Group
//! types (`parallel`, `sequential`) are handled by the engine itself.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::context::ExecutionContext;
use super::control_flow::resolve_path;
use super::definition::WorkflowStep;
use super::error::StepError;
use crate::hooks::integration::WorkflowHooks;

/// What a successful step produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    /// Stored as the step's `output` in `nodeResults`.
    pub value: Value,
    /// Merged into the context variables after the step succeeds.
    pub variables: HashMap<String, Value>,
}

impl StepOutput {
    /// Output with no variable updates.
    pub fn new(value: Value) -> Self {
        Self { value, variables: HashMap::new() }
    }

    /// Adds a variable to set on success.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}

/// Performs the work for one step type.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Step type this executor handles, e.g. `agent`.
    fn step_type(&self) -> &str;

    /// Runs one attempt of the step.
    ///
    /// The context is a read-only view; return variable updates in
    /// [`StepOutput::variables`].
    async fn execute(
        &self,
        step: &WorkflowStep,
        context: &ExecutionContext,
    ) -> Result<StepOutput, StepError>;
}

/// Executors keyed by step type.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry").field("types", &self.types()).finish()
    }
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor, replacing any previous one for the same type.
    pub fn register(&mut self, executor: Arc<dyn StepExecutor>) -> Option<Arc<dyn StepExecutor>> {
        let step_type = executor.step_type().to_string();
        debug!(step_type = %step_type, "Registering step executor");
        self.executors.insert(step_type, executor)
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.register(executor);
        self
    }

    /// Executor for a step type.
    pub fn get(&self, step_type: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(step_type).cloned()
    }

    /// Registered step types, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }
}

/// Token accounting reported by a sampling call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Prompt tokens.
    pub prompt_tokens: u64,
    /// Completion tokens.
    pub completion_tokens: u64,
    /// Prompt plus completion.
    pub total_tokens: u64,
}

/// Request handed to a [`SamplingClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingRequest {
    /// Fully interpolated prompt.
    pub prompt: String,
    /// Optional system prompt.
    pub system_prompt: Option<String>,
    /// Model hint.
    pub model: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Completion token cap.
    pub max_tokens: Option<u32>,
}

/// Text and usage returned by a [`SamplingClient`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingResponse {
    /// Generated text.
    pub text: String,
    /// Token usage.
    pub usage: TokenUsage,
}

/// The LLM call behind `agent` steps.
#[async_trait]
pub trait SamplingClient: Send + Sync {
    /// Samples a completion.
    async fn sample(&self, request: SamplingRequest) -> Result<SamplingResponse, String>;
}

/// Config accepted by `agent` steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStepConfig {
    /// Prompt template; `{{name}}` placeholders are filled from the context.
    pub prompt: String,
    /// Optional system prompt template.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Model hint.
    #[serde(default)]
    pub model: Option<String>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Completion token cap.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Variable that receives the generated text.
    #[serde(default)]
    pub output_variable: Option<String>,
}

/// Step type handled by [`AgentStepExecutor`].
pub const AGENT_STEP_TYPE: &str = "agent";

/// Runs `agent` steps through a [`SamplingClient`].
pub struct AgentStepExecutor {
    client: Arc<dyn SamplingClient>,
    hooks: WorkflowHooks,
}

impl AgentStepExecutor {
    /// Creates an executor that fires agent hooks on `hooks`.
    pub fn new(client: Arc<dyn SamplingClient>, hooks: WorkflowHooks) -> Self {
        Self { client, hooks }
    }
}

#[async_trait]
impl StepExecutor for AgentStepExecutor {
    fn step_type(&self) -> &str {
        AGENT_STEP_TYPE
    }

    async fn execute(
        &self,
        step: &WorkflowStep,
        context: &ExecutionContext,
    ) -> Result<StepOutput, StepError> {
        let config: AgentStepConfig = step.typed_config()?;
        let prompt = interpolate(&config.prompt, context);
        let system_prompt = config.system_prompt.as_deref().map(|s| interpolate(s, context));

        self.hooks
            .execute_before_agent_hooks(&step.id, &prompt, config.model.as_deref(), context)
            .await;

        let request = SamplingRequest {
            prompt,
            system_prompt,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };
        let response = match self.client.sample(request).await {
            Ok(response) => response,
            Err(e) => {
                self.hooks.execute_agent_error_hooks(&step.id, &e, context).await;
                return Err(StepError::Sampling(e));
            }
        };

        let value = json!({ "text": response.text, "usage": response.usage });
        self.hooks.execute_after_agent_hooks(&step.id, &value, context).await;

        let mut output = StepOutput::new(value);
        if let Some(name) = config.output_variable {
            output = output.with_variable(name, Value::String(response.text));
        }
        Ok(output)
    }
}

/// Replaces `{{path}}` placeholders with context values.
///
/// Paths resolve like condition expressions (`topic`, `variables.user.name`,
/// `steps.fetch.output.text`). Unresolved placeholders are left untouched.
pub fn interpolate(template: &str, context: &ExecutionContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let path = after[..end].trim();
        match resolve_path(path, context) {
            Value::Null => out.push_str(&rest[start..start + 2 + end + 2]),
            Value::String(s) => out.push_str(&s),
            other => out.push_str(&other.to_string()),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::builtin::FnHook;
    use crate::hooks::registry::HookRegistry;
    use crate::hooks::types::{HookEvent, HookResult};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoClient {
        requests: Mutex<Vec<SamplingRequest>>,
    }

    #[async_trait]
    impl SamplingClient for EchoClient {
        async fn sample(&self, request: SamplingRequest) -> Result<SamplingResponse, String> {
            let text = format!("echo: {}", request.prompt);
            self.requests.lock().unwrap().push(request);
            Ok(SamplingResponse {
                text,
                usage: TokenUsage { prompt_tokens: 4, completion_tokens: 6, total_tokens: 10 },
            })
        }
    }

    struct DownClient;

    #[async_trait]
    impl SamplingClient for DownClient {
        async fn sample(&self, _request: SamplingRequest) -> Result<SamplingResponse, String> {
            Err("service unavailable".to_string())
        }
    }

    #[test]
    fn test_interpolate() {
        let mut ctx = ExecutionContext::new("wf");
        ctx.set_variable("topic", json!("rust"));
        ctx.set_variable("n", json!(3));
        assert_eq!(interpolate("Write {{ n }} notes on {{topic}}.", &ctx), "Write 3 notes on rust.");
        assert_eq!(interpolate("keep {{missing}}", &ctx), "keep {{missing}}");
        assert_eq!(interpolate("open {{topic", &ctx), "open {{topic");
    }

    #[test]
    fn test_registry_replaces_by_type() {
        let client: Arc<dyn SamplingClient> = Arc::new(DownClient);
        let mut registry = ExecutorRegistry::new();
        assert!(
            registry
                .register(Arc::new(AgentStepExecutor::new(client.clone(), WorkflowHooks::default())))
                .is_none()
        );
        assert!(
            registry
                .register(Arc::new(AgentStepExecutor::new(client, WorkflowHooks::default())))
                .is_some()
        );
        assert_eq!(registry.types(), vec!["agent".to_string()]);
        assert!(registry.get("api").is_none());
    }

    #[tokio::test]
    async fn test_agent_step_samples_and_sets_variable() {
        let client = Arc::new(EchoClient { requests: Mutex::new(Vec::new()) });
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let registry = HookRegistry::new();
        for event in [HookEvent::BeforeAgent, HookEvent::AfterAgent] {
            let calls = Arc::clone(&hook_calls);
            registry
                .register(Arc::new(FnHook::new("count", event, move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(HookResult::success())
                })))
                .await;
        }
        let executor = AgentStepExecutor::new(client.clone(), WorkflowHooks::new(registry));

        let mut ctx = ExecutionContext::new("wf");
        ctx.set_variable("topic", json!("caching"));
        let step = WorkflowStep::new("draft", "agent")
            .with_config("prompt", json!("Summarize {{topic}}"))
            .with_config("temperature", json!(0.2))
            .with_config("outputVariable", json!("summary"));

        let output = executor.execute(&step, &ctx).await.unwrap();
        assert_eq!(output.value["text"], "echo: Summarize caching");
        assert_eq!(output.value["usage"]["totalTokens"], 10);
        assert_eq!(output.variables["summary"], json!("echo: Summarize caching"));
        assert_eq!(hook_calls.load(Ordering::SeqCst), 2);

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[0].temperature, Some(0.2));
    }

    #[tokio::test]
    async fn test_agent_step_errors() {
        let executor = AgentStepExecutor::new(Arc::new(DownClient), WorkflowHooks::default());
        let ctx = ExecutionContext::new("wf");

        let missing_prompt = WorkflowStep::new("s", "agent");
        let err = executor.execute(&missing_prompt, &ctx).await.unwrap_err();
        assert!(matches!(err, StepError::InvalidConfig(_)));
        assert!(!err.is_retryable());

        let step = WorkflowStep::new("s", "agent").with_config("prompt", json!("hi"));
        let err = executor.execute(&step, &ctx).await.unwrap_err();
        assert_eq!(err, StepError::Sampling("service unavailable".to_string()));
        assert!(err.is_retryable());
    }
}
