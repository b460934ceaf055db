//! Lifecycle hooks.
//!
//! Hooks are named handlers attached to a [`HookEvent`] (`workflow:before`,
//! `workflow:step:after`, `agent:error`, ...). They run sequentially in
//! priority order and are isolated: a failing or panicking hook is logged and
//! never breaks the workflow it instruments.

pub mod builtin;
pub mod error;
pub mod integration;
pub mod registry;
pub mod types;

pub use builtin::{FnHook, LoggingHook};
pub use error::{HookError, Result};
pub use integration::WorkflowHooks;
pub use registry::{Hook, HookRegistry};
pub use types::{HookContext, HookEvent, HookPriority, HookResult};
