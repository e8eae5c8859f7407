//! Per-step execution: event gating, timed attempts, bounded retries.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::actions::{ActionContext, StepAction};
use crate::domain::{Context, ContextValue, Event, Step, StepRun, StepStatus};
use crate::errors::StepError;

use super::event_bus::EventBus;

/// Prefix of the context keys holding payloads of received events
pub const EVENT_KEY_PREFIX: &str = "event.";

/// Executor tuning shared by all steps of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Upper bound on waiting for subscribed events; unbounded when `None`
    /// (shutdown still releases the wait)
    pub subscribe_timeout: Option<Duration>,
}

/// Called with the step record whenever its status or attempt count changes
pub type StepObserver<'a> = &'a (dyn Fn(&StepRun) + Send + Sync);

/// Runs single steps against the shared event bus
#[derive(Clone)]
pub struct StepExecutor {
    bus: EventBus,
    cancel: CancellationToken,
    settings: ExecutorSettings,
}

impl StepExecutor {
    pub fn new(bus: EventBus, cancel: CancellationToken, settings: ExecutorSettings) -> Self {
        Self {
            bus,
            cancel,
            settings,
        }
    }

    /// Drive `step` to a terminal state.
    ///
    /// Timeouts and action errors are retried until `step.attempts` is used
    /// up. The step's `post` events are published, in order, only after a
    /// successful attempt.
    pub async fn execute(
        &self,
        routine: &str,
        step: &Step,
        action: &dyn StepAction,
        context: &mut Context,
    ) -> StepRun {
        self.execute_observed(routine, step, action, context, &|_: &StepRun| {})
            .await
    }

    /// [`StepExecutor::execute`], reporting intermediate states to `observe`
    #[instrument(skip_all, fields(routine = %routine, step = %step.name))]
    pub async fn execute_observed(
        &self,
        routine: &str,
        step: &Step,
        action: &dyn StepAction,
        context: &mut Context,
        observe: StepObserver<'_>,
    ) -> StepRun {
        let mut run = StepRun::pending(&step.name);
        run.start();

        let received = match self.await_prerequisites(step, &mut run, observe).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Step released without its events");
                run.fail(e);
                return run;
            }
        };

        for event in &received {
            context.insert(
                format!("{}{}", EVENT_KEY_PREFIX, event.name),
                ContextValue::from(event.payload.clone()),
            );
        }

        let timeout = step.timeout();
        let mut last_error = None;

        for attempt in 1..=step.attempts {
            if self.cancel.is_cancelled() {
                break;
            }

            run.attempts = attempt;
            run.status = StepStatus::Running;
            observe(&run);
            debug!(attempt, max_attempts = step.attempts, "Starting attempt");

            let attempt_token = self.cancel.child_token();
            let ctx = ActionContext {
                routine,
                step,
                attempt,
                context: &mut *context,
                received: &received,
                cancellation: attempt_token.clone(),
            };

            match tokio::time::timeout(timeout, action.execute(ctx)).await {
                Ok(Ok(())) => {
                    self.publish_post_events(step);
                    run.succeed();
                    info!(attempt, "Step succeeded");
                    return run;
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "Step attempt failed");
                    last_error = Some(StepError::Action {
                        attempt,
                        message: format!("{:#}", e),
                    });
                }
                Err(_) => {
                    // Release work the abandoned attempt left behind
                    attempt_token.cancel();
                    warn!(attempt, timeout_seconds = step.timeout_seconds, "Step attempt timed out");
                    run.status = StepStatus::TimedOut;
                    last_error = Some(StepError::Timeout {
                        attempt,
                        limit_seconds: step.timeout_seconds,
                    });
                }
            }
            run.last_error = last_error.clone();
        }

        let failure = if self.cancel.is_cancelled() {
            StepError::Cancelled {
                attempts: run.attempts,
            }
        } else {
            StepError::Exhausted {
                attempts: run.attempts,
                last: Box::new(last_error.unwrap_or(StepError::Cancelled { attempts: 0 })),
            }
        };

        error!(attempts = run.attempts, error = %failure, "Step failed permanently");
        run.fail(failure);
        run
    }

    /// Block until every subscribed event occurred
    async fn await_prerequisites(
        &self,
        step: &Step,
        run: &mut StepRun,
        observe: StepObserver<'_>,
    ) -> Result<Vec<Event>, StepError> {
        if step.subscribe.is_empty() {
            return Ok(Vec::new());
        }

        run.status = StepStatus::WaitingOnEvents;
        observe(run);
        info!(events = ?step.subscribe, "Waiting on events");

        let subscription = self
            .bus
            .subscribe(step.subscribe.iter().cloned(), self.cancel.clone());

        let outcome = match self.settings.subscribe_timeout {
            Some(limit) => match tokio::time::timeout(limit, subscription.wait()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(StepError::WaitTimedOut {
                        events: step.subscribe.clone(),
                        limit_ms: limit.as_millis() as u64,
                    })
                }
            },
            None => subscription.wait().await,
        };

        outcome.map_err(|reason| {
            debug!(%reason, "Subscription released");
            StepError::WaitCancelled {
                events: step.subscribe.clone(),
            }
        })
    }

    fn publish_post_events(&self, step: &Step) {
        for post in &step.post {
            if !self.bus.publish(post.event.clone(), post.payload.clone()) {
                warn!(event = %post.event, "Event bus is shut down, event dropped");
            }
        }
    }
}
