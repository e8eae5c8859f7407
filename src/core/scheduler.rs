//! Sequential execution of one routine.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::actions::ActionRegistry;
use crate::domain::{Routine, RoutineRun, StepRun};
use crate::errors::{RoutineAborted, StepError};

use super::executor::{StepExecutor, StepObserver};

/// Runs the steps of a routine strictly in declared order, stopping at the
/// first failure.
///
/// The routine context is cloned when the run starts and handed to each step
/// by `&mut`; only one step runs at a time, so it needs no lock.
///
/// Progress can be followed through a `watch` channel, which keeps the last
/// known state even if the routine task is aborted.
pub struct RoutineScheduler {
    executor: StepExecutor,
    registry: Arc<ActionRegistry>,
}

impl RoutineScheduler {
    pub fn new(executor: StepExecutor, registry: Arc<ActionRegistry>) -> Self {
        Self { executor, registry }
    }

    pub async fn run(&self, routine: &Routine) -> RoutineRun {
        let (progress, _) = watch::channel(RoutineRun::new(routine));
        self.run_with_progress(routine, &progress).await
    }

    /// Run `routine`, publishing its record to `progress` as steps advance
    #[instrument(skip_all, fields(routine = %routine.name))]
    pub async fn run_with_progress(
        &self,
        routine: &Routine,
        progress: &watch::Sender<RoutineRun>,
    ) -> RoutineRun {
        let mut run = RoutineRun::new(routine);
        let mut context = routine.context.clone();
        run.start();
        progress.send_replace(run.clone());
        info!(steps = routine.steps.len(), "Routine started");

        for (index, step) in routine.steps.iter().enumerate() {
            let observe: StepObserver<'_> = &|step_run: &StepRun| {
                progress.send_modify(|last| last.steps[index] = step_run.clone());
            };

            let step_run = match self.registry.resolve(&routine.name, step) {
                Some(action) => {
                    self.executor
                        .execute_observed(
                            &routine.name,
                            step,
                            action.as_ref(),
                            &mut context,
                            observe,
                        )
                        .await
                }
                None => {
                    let mut step_run = run.steps[index].clone();
                    step_run.fail(StepError::UnknownAction {
                        action: self.registry.action_name(&routine.name, step).to_string(),
                    });
                    step_run
                }
            };

            let failure = if step_run.is_failed() {
                step_run.last_error.clone()
            } else {
                None
            };
            run.steps[index] = step_run;
            run.context = context.clone();

            if let Some(error) = failure {
                error!(step = %step.name, error = %error, "Routine aborted");
                run.fail(RoutineAborted {
                    step: Some(step.name.clone()),
                    error,
                });
                progress.send_replace(run.clone());
                return run;
            }
            progress.send_replace(run.clone());
        }

        run.succeed();
        progress.send_replace(run.clone());
        info!("Routine succeeded");
        run
    }
}
