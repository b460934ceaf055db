//! Hook registry for managing and executing hooks.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::RwLock;

use crate::hooks::error::Result;
use crate::hooks::types::{HookContext, HookEvent, HookPriority, HookResult};

/// Trait for hook implementations.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Get the name of the hook.
    fn name(&self) -> &str;

    /// Get the priority of the hook.
    fn priority(&self) -> HookPriority;

    /// Get the event this hook is attached to.
    fn event(&self) -> HookEvent;

    /// Execute the hook with the given context.
    async fn execute(&self, context: &HookContext) -> Result<HookResult>;
}

/// Registry for managing hooks.
///
/// Cloning the registry shares the underlying hook table.
#[derive(Clone)]
pub struct HookRegistry {
    /// Registered hooks, sorted by priority (highest first).
    hooks: Arc<RwLock<Vec<Arc<dyn Hook>>>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry").finish_non_exhaustive()
    }
}

impl HookRegistry {
    /// Create a new hook registry.
    pub fn new() -> Self {
        Self { hooks: Arc::new(RwLock::new(Vec::new())) }
    }

    /// Register a hook.
    pub async fn register(&self, hook: Arc<dyn Hook>) {
        let mut hooks = self.hooks.write().await;
        tracing::debug!(
            hook_name = %hook.name(),
            event = %hook.event(),
            priority = hook.priority().value(),
            "Registering hook"
        );
        hooks.push(hook);
        // Stable sort: equal priorities keep registration order
        hooks.sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    /// Unregister every hook with the given name. Returns how many were removed.
    pub async fn unregister(&self, name: &str) -> usize {
        let mut hooks = self.hooks.write().await;
        let before = hooks.len();
        hooks.retain(|h| h.name() != name);
        before - hooks.len()
    }

    /// Get all hooks attached to an event, in execution order.
    pub async fn get_hooks(&self, event: HookEvent) -> Vec<Arc<dyn Hook>> {
        let hooks = self.hooks.read().await;
        hooks.iter().filter(|h| h.event() == event).cloned().collect()
    }

    /// Execute all hooks attached to an event.
    ///
    /// Hooks run sequentially in priority order. A hook returning
    /// `should_continue = false` stops the remaining hooks for this event.
    /// Hook errors and panics are logged and recorded as error results; they
    /// never propagate to the caller.
    pub async fn execute_hooks(&self, event: HookEvent, context: &HookContext) -> Vec<HookResult> {
        // Snapshot so a hook registering another hook cannot deadlock or
        // observe a half-updated table.
        let hooks = self.get_hooks(event).await;
        let mut results = Vec::with_capacity(hooks.len());

        for hook in hooks {
            match AssertUnwindSafe(hook.execute(context)).catch_unwind().await {
                Ok(Ok(result)) => {
                    let should_continue = result.should_continue;
                    results.push(result);
                    if !should_continue {
                        tracing::debug!(
                            hook_name = %hook.name(),
                            event = %event,
                            "Hook short-circuited remaining hooks"
                        );
                        break;
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        hook_name = %hook.name(),
                        event = %event,
                        error = %e,
                        "Hook execution failed"
                    );
                    results.push(HookResult::error(format!("Hook {} failed: {}", hook.name(), e)));
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::warn!(
                        hook_name = %hook.name(),
                        event = %event,
                        panic = %message,
                        "Hook panicked"
                    );
                    results.push(HookResult::error(format!(
                        "Hook {} panicked: {}",
                        hook.name(),
                        message
                    )));
                }
            }
        }

        results
    }

    /// Clear all hooks.
    pub async fn clear(&self) {
        let mut hooks = self.hooks.write().await;
        hooks.clear();
    }

    /// Get the number of registered hooks.
    pub async fn count(&self) -> usize {
        let hooks = self.hooks.read().await;
        hooks.len()
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::error::HookError;
    use std::sync::Mutex;

    struct RecordingHook {
        name: String,
        priority: HookPriority,
        event: HookEvent,
        log: Arc<Mutex<Vec<String>>>,
        outcome: Outcome,
    }

    #[derive(Clone, Copy)]
    enum Outcome {
        Continue,
        Stop,
        Fail,
        Panic,
    }

    impl RecordingHook {
        fn new(
            name: &str,
            priority: u32,
            log: &Arc<Mutex<Vec<String>>>,
            outcome: Outcome,
        ) -> Arc<dyn Hook> {
            Arc::new(Self {
                name: name.to_string(),
                priority: HookPriority::new(priority),
                event: HookEvent::BeforeStep,
                log: Arc::clone(log),
                outcome,
            })
        }
    }

    #[async_trait]
    impl Hook for RecordingHook {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> HookPriority {
            self.priority
        }

        fn event(&self) -> HookEvent {
            self.event
        }

        async fn execute(&self, _context: &HookContext) -> Result<HookResult> {
            self.log.lock().unwrap().push(self.name.clone());
            match self.outcome {
                Outcome::Continue => Ok(HookResult::success()),
                Outcome::Stop => Ok(HookResult::stop("stop here")),
                Outcome::Fail => Err(HookError::ExecutionFailed("boom".to_string())),
                Outcome::Panic => panic!("hook blew up"),
            }
        }
    }

    fn context() -> HookContext {
        HookContext::new(HookEvent::BeforeStep, serde_json::json!({}))
    }

    #[tokio::test]
    async fn test_hooks_run_in_priority_order() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(RecordingHook::new("low", 10, &log, Outcome::Continue)).await;
        registry.register(RecordingHook::new("high", 300, &log, Outcome::Continue)).await;
        registry.register(RecordingHook::new("mid", 100, &log, Outcome::Continue)).await;

        let results = registry.execute_hooks(HookEvent::BeforeStep, &context()).await;
        assert_eq!(results.len(), 3);
        assert_eq!(*log.lock().unwrap(), vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_equal_priority_keeps_registration_order() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(RecordingHook::new("first", 100, &log, Outcome::Continue)).await;
        registry.register(RecordingHook::new("second", 100, &log, Outcome::Continue)).await;

        registry.execute_hooks(HookEvent::BeforeStep, &context()).await;
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_stop_short_circuits_remaining_hooks() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(RecordingHook::new("gate", 200, &log, Outcome::Stop)).await;
        registry.register(RecordingHook::new("after-gate", 100, &log, Outcome::Continue)).await;

        let results = registry.execute_hooks(HookEvent::BeforeStep, &context()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["gate"]);
    }

    #[tokio::test]
    async fn test_failing_and_panicking_hooks_are_isolated() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(RecordingHook::new("fails", 300, &log, Outcome::Fail)).await;
        registry.register(RecordingHook::new("panics", 200, &log, Outcome::Panic)).await;
        registry.register(RecordingHook::new("fine", 100, &log, Outcome::Continue)).await;

        let results = registry.execute_hooks(HookEvent::BeforeStep, &context()).await;
        assert_eq!(results.len(), 3);
        assert!(!results[0].success);
        assert!(!results[1].success);
        assert!(results[1].message.as_deref().unwrap().contains("panicked"));
        assert!(results[2].success);
        assert_eq!(*log.lock().unwrap(), vec!["fails", "panics", "fine"]);
    }

    #[tokio::test]
    async fn test_hooks_filtered_by_event() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(RecordingHook::new("step", 100, &log, Outcome::Continue)).await;

        let results = registry
            .execute_hooks(
                HookEvent::AfterWorkflow,
                &HookContext::new(HookEvent::AfterWorkflow, serde_json::json!({})),
            )
            .await;
        assert!(results.is_empty());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_and_clear() {
        let registry = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(RecordingHook::new("a", 100, &log, Outcome::Continue)).await;
        registry.register(RecordingHook::new("b", 100, &log, Outcome::Continue)).await;
        assert_eq!(registry.count().await, 2);

        assert_eq!(registry.unregister("a").await, 1);
        assert_eq!(registry.unregister("missing").await, 0);
        assert_eq!(registry.count().await, 1);

        registry.clear().await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_clone_shares_hook_table() {
        let registry = HookRegistry::new();
        let shared = registry.clone();
        let log = Arc::new(Mutex::new(Vec::new()));
        shared.register(RecordingHook::new("a", 100, &log, Outcome::Continue)).await;
        assert_eq!(registry.count().await, 1);
    }
}
