//! Top-level lifecycle: fan-out of routines and graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::actions::ActionRegistry;
use crate::domain::{Blueprint, EngineRun, RoutineRun};
use crate::errors::{EngineError, TraceExt};

use super::event_bus::EventBus;
use super::executor::{ExecutorSettings, StepExecutor};
use super::scheduler::RoutineScheduler;

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Extra time `shutdown` waits beyond the grace period for aborted tasks
const ABORT_MARGIN: Duration = Duration::from_millis(500);

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// How long routine tasks get to wind down after shutdown before they
    /// are aborted
    pub shutdown_grace: Duration,

    /// Optional bound on each step's wait for subscribed events
    pub subscribe_timeout: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            subscribe_timeout: None,
        }
    }
}

/// Generic start/stop lifecycle
#[async_trait]
pub trait Application: Send + Sync {
    type Outcome: Send;

    /// Run until done; usually awaited on its own task
    async fn run(&self) -> Self::Outcome;

    /// Ask a running application to stop and wait for it, best effort
    async fn shutdown(&self);
}

type TaskResult = (usize, RoutineRun);

/// Runs every routine of a blueprint concurrently over one event bus
pub struct Engine {
    blueprint: Arc<Blueprint>,
    registry: Arc<ActionRegistry>,
    settings: EngineSettings,
    bus: EventBus,
    cancel: CancellationToken,
    started: AtomicBool,
    stopping: AtomicBool,
    finished: watch::Sender<bool>,
}

impl Engine {
    /// Fails when a step refers to an action the registry does not know
    pub fn new(
        blueprint: Blueprint,
        registry: ActionRegistry,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        registry
            .check(&blueprint)
            .trace("Engine::new")
            .map_err(EngineError::Configuration)?;

        let (finished, _) = watch::channel(false);
        Ok(Self {
            blueprint: Arc::new(blueprint),
            registry: Arc::new(registry),
            settings,
            bus: EventBus::new(),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            finished,
        })
    }

    pub fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Token cancelled by [`Engine::shutdown`]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run every routine on its own task and wait for all of them.
    ///
    /// Step and routine failures are reported in the returned [`EngineRun`];
    /// an `Err` means the engine itself could not run.
    #[instrument(skip(self), fields(project = %self.blueprint.project.name))]
    pub async fn run(&self) -> Result<EngineRun, EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::ShutDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }

        let mut engine_run = EngineRun::new(&self.blueprint.project);
        let routine_count = self.blueprint.routines.len();
        info!(run_id = %engine_run.id, routines = routine_count, "Engine run started");

        let executor_settings = ExecutorSettings {
            subscribe_timeout: self.settings.subscribe_timeout,
        };

        let mut tasks: JoinSet<TaskResult> = JoinSet::new();
        let mut watchers = Vec::with_capacity(routine_count);
        for index in 0..routine_count {
            let executor = StepExecutor::new(
                self.bus.clone(),
                self.cancel.clone(),
                executor_settings.clone(),
            );
            let scheduler = RoutineScheduler::new(executor, Arc::clone(&self.registry));
            let blueprint = Arc::clone(&self.blueprint);
            let (progress, watcher) =
                watch::channel(RoutineRun::new(&self.blueprint.routines[index]));
            watchers.push(watcher);

            tasks.spawn(async move {
                let routine = &blueprint.routines[index];
                (index, scheduler.run_with_progress(routine, &progress).await)
            });
        }

        let mut outcomes: Vec<Option<RoutineRun>> = vec![None; routine_count];
        self.collect(&mut tasks, &mut outcomes).await;

        for (outcome, watcher) in outcomes.into_iter().zip(&watchers) {
            let routine_run = outcome.unwrap_or_else(|| {
                // Task was aborted; report what it got through
                let mut last = watcher.borrow().clone();
                last.interrupt();
                last
            });
            engine_run.routines.push(routine_run);
        }
        engine_run.finish();

        info!(
            run_id = %engine_run.id,
            status = ?engine_run.status,
            failed = engine_run.failed_routines().count(),
            "Engine run finished"
        );
        self.finished.send_replace(true);
        Ok(engine_run)
    }

    /// Join routine tasks until all are done, or until shutdown plus the
    /// grace period, after which the rest are aborted
    async fn collect(
        &self,
        tasks: &mut JoinSet<TaskResult>,
        outcomes: &mut [Option<RoutineRun>],
    ) {
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(joined) => record(outcomes, joined),
                    None => return,
                },
                _ = self.cancel.cancelled() => break,
            }
        }

        debug!(remaining = tasks.len(), "Shutdown requested, draining routine tasks");
        let drained = tokio::time::timeout(self.settings.shutdown_grace, async {
            while let Some(joined) = tasks.join_next().await {
                record(outcomes, joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = tasks.len(),
                grace_ms = self.settings.shutdown_grace.as_millis() as u64,
                "Aborting routine tasks after shutdown grace period"
            );
            tasks.abort_all();
            while let Some(joined) = tasks.join_next().await {
                record(outcomes, joined);
            }
        }
    }

    /// Cancel running steps, release event waits and wait (bounded) for
    /// [`Engine::run`] to return. Calling it again has no effect.
    pub async fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already requested");
            return;
        }

        info!("Engine shutting down");
        self.cancel.cancel();
        self.bus.shutdown();

        if !self.started.load(Ordering::SeqCst) {
            return;
        }

        let mut finished = self.finished.subscribe();
        let limit = self.settings.shutdown_grace + ABORT_MARGIN;
        let stopped = tokio::time::timeout(limit, finished.wait_for(|done| *done))
            .await
            .is_ok();

        if stopped {
            info!("Engine stopped");
        } else {
            warn!(limit_ms = limit.as_millis() as u64, "Engine did not stop in time");
        }
    }
}

fn record(outcomes: &mut [Option<RoutineRun>], joined: Result<TaskResult, JoinError>) {
    match joined {
        Ok((index, routine_run)) => outcomes[index] = Some(routine_run),
        Err(e) if e.is_cancelled() => debug!("Routine task aborted"),
        Err(e) => error!(error = %e, "Routine task panicked"),
    }
}

#[async_trait]
impl Application for Engine {
    type Outcome = Result<EngineRun, EngineError>;

    async fn run(&self) -> Self::Outcome {
        Engine::run(self).await
    }

    async fn shutdown(&self) {
        Engine::shutdown(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Project, Routine, Step};

    fn blueprint(routines: Vec<Routine>) -> Blueprint {
        Blueprint::new(Project::new("demo", "0.1.0"), routines)
    }

    #[tokio::test]
    async fn test_unknown_action_is_configuration_error() {
        let result = Engine::new(
            blueprint(vec![Routine::new("r", vec![Step::new("s", "d").with_action("nope")])]),
            ActionRegistry::with_builtins(),
            EngineSettings::default(),
        );

        match result {
            Err(EngineError::Configuration(e)) => {
                assert_eq!(e.trace(), ["ActionRegistry::check", "Engine::new"]);
            }
            _ => panic!("expected configuration error"),
        }
    }

    #[tokio::test]
    async fn test_run_only_once() {
        let engine = Engine::new(
            blueprint(vec![Routine::new("r", vec![Step::new("s", "d")])]),
            ActionRegistry::with_builtins(),
            EngineSettings::default(),
        )
        .unwrap();

        let run = engine.run().await.unwrap();
        assert!(run.is_success());
        assert!(matches!(engine.run().await, Err(EngineError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_run_after_shutdown_is_refused() {
        let engine = Engine::new(
            blueprint(vec![Routine::new("r", vec![Step::new("s", "d")])]),
            ActionRegistry::with_builtins(),
            EngineSettings::default(),
        )
        .unwrap();

        engine.shutdown().await;
        assert!(engine.bus().is_shut_down());
        assert!(matches!(engine.run().await, Err(EngineError::ShutDown)));
    }

    #[tokio::test]
    async fn test_application_trait_delegates() {
        async fn drive<A: Application>(app: &A) -> A::Outcome {
            app.run().await
        }

        let engine = Engine::new(
            blueprint(vec![Routine::new("r", vec![Step::new("s", "d")])]),
            ActionRegistry::with_builtins(),
            EngineSettings::default(),
        )
        .unwrap();

        assert!(drive(&engine).await.unwrap().is_success());
    }
}
