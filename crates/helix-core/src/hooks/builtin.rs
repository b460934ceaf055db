//! Ready-made hook implementations.

use std::sync::Arc;

use async_trait::async_trait;

use crate::hooks::error::Result;
use crate::hooks::registry::Hook;
use crate::hooks::types::{HookContext, HookEvent, HookPriority, HookResult};

type HandlerFn = dyn Fn(&HookContext) -> Result<HookResult> + Send + Sync;

/// Hook backed by a closure.
///
/// ```
/// use helix_core::hooks::{FnHook, HookEvent, HookResult};
///
/// let hook = FnHook::new("audit", HookEvent::BeforeStep, |ctx| {
///     println!("step starting: {}", ctx.input["stepId"]);
///     Ok(HookResult::success())
/// });
/// ```
pub struct FnHook {
    name: String,
    event: HookEvent,
    priority: HookPriority,
    handler: Arc<HandlerFn>,
}

impl FnHook {
    /// Create a closure hook with the default priority.
    pub fn new<F>(name: impl Into<String>, event: HookEvent, handler: F) -> Self
    where
        F: Fn(&HookContext) -> Result<HookResult> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            event,
            priority: HookPriority::default(),
            handler: Arc::new(handler),
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = HookPriority::new(priority);
        self
    }
}

#[async_trait]
impl Hook for FnHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> HookPriority {
        self.priority
    }

    fn event(&self) -> HookEvent {
        self.event
    }

    async fn execute(&self, context: &HookContext) -> Result<HookResult> {
        (self.handler)(context)
    }
}

/// Traces every event it is attached to at debug level.
pub struct LoggingHook {
    event: HookEvent,
    name: String,
}

impl LoggingHook {
    /// Create a logging hook for one event.
    pub fn new(event: HookEvent) -> Self {
        Self { event, name: format!("logging:{}", event.as_str()) }
    }

    /// One logging hook per known event, ready to register.
    pub fn for_all_events() -> Vec<Arc<dyn Hook>> {
        HookEvent::ALL.iter().map(|event| Arc::new(Self::new(*event)) as Arc<dyn Hook>).collect()
    }
}

#[async_trait]
impl Hook for LoggingHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> HookPriority {
        // Log before anything else gets a chance to short-circuit.
        HookPriority::new(u32::MAX)
    }

    fn event(&self) -> HookEvent {
        self.event
    }

    async fn execute(&self, context: &HookContext) -> Result<HookResult> {
        tracing::debug!(
            event = %context.event,
            input = %context.input,
            metadata = %context.metadata,
            "Lifecycle hook"
        );
        Ok(HookResult::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::registry::HookRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fn_hook_runs_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hook = FnHook::new("count", HookEvent::AfterStep, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(HookResult::success())
        })
        .with_priority(5);
        assert_eq!(hook.priority().value(), 5);

        let registry = HookRegistry::new();
        registry.register(Arc::new(hook)).await;
        let ctx = HookContext::new(HookEvent::AfterStep, serde_json::json!({}));
        registry.execute_hooks(HookEvent::AfterStep, &ctx).await;
        registry.execute_hooks(HookEvent::AfterStep, &ctx).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_logging_hooks_cover_all_events() {
        let registry = HookRegistry::new();
        for hook in LoggingHook::for_all_events() {
            registry.register(hook).await;
        }
        assert_eq!(registry.count().await, HookEvent::ALL.len());

        let ctx = HookContext::new(HookEvent::WorkflowError, serde_json::json!({"error": "x"}));
        let results = registry.execute_hooks(HookEvent::WorkflowError, &ctx).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
    }
}
