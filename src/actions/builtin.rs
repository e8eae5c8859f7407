//! Built-in step actions.
//!
//! Small utilities for wiring and trying out blueprints; real work is
//! registered by the embedding application.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use super::{ActionContext, StepAction};
use crate::domain::ContextValue;

/// Context key read by [`SleepAction`]
pub const SLEEP_MS_KEY: &str = "sleep_ms";

const DEFAULT_SLEEP_MS: u64 = 1000;

/// Succeeds immediately
pub struct NoopAction;

#[async_trait]
impl StepAction for NoopAction {
    fn name(&self) -> &str {
        "noop"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<()> {
        debug!(step = %ctx.step.name, description = %ctx.step.description, "noop");
        Ok(())
    }
}

/// Always fails
pub struct FailAction;

#[async_trait]
impl StepAction for FailAction {
    fn name(&self) -> &str {
        "fail"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<()> {
        bail!("step '{}' is configured to fail", ctx.step.name)
    }
}

/// Sleeps for `sleep_ms` from the routine context (default 1s), stopping
/// early on cancellation
pub struct SleepAction;

#[async_trait]
impl StepAction for SleepAction {
    fn name(&self) -> &str {
        "sleep"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<()> {
        let millis = match ctx.context.get(SLEEP_MS_KEY) {
            None => DEFAULT_SLEEP_MS,
            Some(value) => match value.as_i64() {
                Some(ms) if ms >= 0 => ms as u64,
                _ => bail!("context key '{}' must be a non-negative integer", SLEEP_MS_KEY),
            },
        };

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(millis)) => Ok(()),
            _ = ctx.cancellation.cancelled() => bail!("sleep interrupted by shutdown"),
        }
    }
}

/// Logs the step and a summary of the routine context
pub struct LogAction;

#[async_trait]
impl StepAction for LogAction {
    fn name(&self) -> &str {
        "log"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<()> {
        let mut keys: Vec<&str> = ctx.context.keys().map(String::as_str).collect();
        keys.sort_unstable();
        info!(
            routine = %ctx.routine,
            step = %ctx.step.name,
            attempt = ctx.attempt,
            received = ctx.received.len(),
            context_keys = ?keys,
            "{}",
            ctx.step.description
        );
        Ok(())
    }
}

/// Records completion in the context: `<step>.completed_at` and a running
/// `steps_completed` counter
pub struct StampAction;

#[async_trait]
impl StepAction for StampAction {
    fn name(&self) -> &str {
        "stamp"
    }

    async fn execute(&self, ctx: ActionContext<'_>) -> Result<()> {
        let context = ctx.context;
        let completed = context
            .get("steps_completed")
            .and_then(ContextValue::as_i64)
            .unwrap_or(0);

        context.insert("steps_completed".to_string(), ContextValue::Integer(completed + 1));
        context.insert(
            format!("{}.completed_at", ctx.step.name),
            ContextValue::String(Utc::now().to_rfc3339()),
        );
        Ok(())
    }
}
