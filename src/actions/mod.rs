//! Step actions and the registry that resolves them.
//!
//! The engine never implements what a step does. It looks the step's action
//! up in an [`ActionRegistry`] and drives it through the executor, which
//! applies the retry, timeout and event rules.

pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{Blueprint, Context, Event, Step};
use crate::errors::{Severity, TracedError};

pub use builtin::{FailAction, LogAction, NoopAction, SleepAction, StampAction};

/// Action used when a step names none
pub const DEFAULT_ACTION: &str = "noop";

/// Everything an action may look at or change during one attempt
pub struct ActionContext<'a> {
    pub routine: &'a str,
    pub step: &'a Step,

    /// 1-based attempt number
    pub attempt: u32,

    /// The routine's shared context
    pub context: &'a mut Context,

    /// Events that released the step's subscription
    pub received: &'a [Event],

    /// Fires on engine shutdown
    pub cancellation: CancellationToken,
}

/// One kind of work a step can perform
#[async_trait]
pub trait StepAction: Send + Sync {
    /// Name the action is registered under
    fn name(&self) -> &str;

    /// Run one attempt. An `Err` consumes the attempt and may be retried.
    async fn execute(&self, ctx: ActionContext<'_>) -> Result<()>;
}

/// Maps action names to implementations.
///
/// Resolution order for a step: an explicit binding for the
/// `(routine, step)` pair, then the step's own `action`, then the default.
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn StepAction>>,
    bindings: HashMap<(String, String), String>,
    default_action: String,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ActionRegistry {
    /// An empty registry with `noop` as default name
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
            bindings: HashMap::new(),
            default_action: DEFAULT_ACTION.to_string(),
        }
    }

    /// A registry holding every built-in action
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NoopAction));
        registry.register(Arc::new(FailAction));
        registry.register(Arc::new(SleepAction));
        registry.register(Arc::new(LogAction));
        registry.register(Arc::new(StampAction));
        registry
    }

    /// Register an action under its own name, replacing any previous one
    pub fn register(&mut self, action: Arc<dyn StepAction>) -> &mut Self {
        self.actions.insert(action.name().to_string(), action);
        self
    }

    /// Run `action` for one step of one routine, regardless of what the step names
    pub fn bind(
        &mut self,
        routine: impl Into<String>,
        step: impl Into<String>,
        action: impl Into<String>,
    ) -> &mut Self {
        self.bindings
            .insert((routine.into(), step.into()), action.into());
        self
    }

    pub fn set_default(&mut self, action: impl Into<String>) -> &mut Self {
        self.default_action = action.into();
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Name of the action that would run for `step`
    pub fn action_name<'a>(&'a self, routine: &str, step: &'a Step) -> &'a str {
        self.bindings
            .get(&(routine.to_string(), step.name.clone()))
            .map(String::as_str)
            .or(step.action.as_deref())
            .unwrap_or(self.default_action.as_str())
    }

    pub fn resolve(&self, routine: &str, step: &Step) -> Option<Arc<dyn StepAction>> {
        self.actions.get(self.action_name(routine, step)).cloned()
    }

    /// Ensure every step of `blueprint` resolves to a registered action
    pub fn check(&self, blueprint: &Blueprint) -> Result<(), TracedError> {
        for routine in &blueprint.routines {
            for step in &routine.steps {
                let name = self.action_name(&routine.name, step);
                if !self.contains(name) {
                    let message = format!(
                        "Step {:?} in {:?} routine uses unknown action {:?}, registered: {}",
                        step.name,
                        routine.name,
                        name,
                        self.names().join(", ")
                    );
                    return Err(TracedError::new(
                        Severity::Critical,
                        message,
                        "ActionRegistry::check",
                    ));
                }
            }
        }
        Ok(())
    }
}
