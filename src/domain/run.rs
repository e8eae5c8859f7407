//! Runtime state of one engine execution.
//!
//! An [`EngineRun`] holds one [`RoutineRun`] per routine, each holding one
//! [`StepRun`] per step. Nothing here is persisted; the aggregate is handed
//! back to the caller of [`crate::core::Engine::run`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::blueprint::{Context, Project, Routine};
use crate::errors::{ErrorRenderer, RoutineAborted, StepError, TracedError};

/// Status of a single step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not started
    #[default]
    Pending,

    /// Blocked on subscribed events
    WaitingOnEvents,

    /// An attempt is in flight
    Running,

    /// Finished successfully
    Succeeded,

    /// Finished unsuccessfully
    Failed,

    /// The last attempt hit its deadline and another attempt follows
    TimedOut,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Failed)
    }
}

/// Execution record of one step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRun {
    pub step: String,
    pub status: StepStatus,

    /// Attempts made so far
    pub attempts: u32,

    pub last_error: Option<StepError>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepRun {
    pub fn pending(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            status: StepStatus::Pending,
            attempts: 0,
            last_error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
    }

    pub fn succeed(&mut self) {
        self.status = StepStatus::Succeeded;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: StepError) {
        self.status = StepStatus::Failed;
        self.last_error = Some(error);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

/// Status of a routine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Execution record of one routine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutineRun {
    pub routine: String,
    pub status: RoutineStatus,

    /// One entry per step, in declared order
    pub steps: Vec<StepRun>,

    /// Set when the routine did not succeed
    pub failure: Option<RoutineAborted>,

    /// Context as the last executed step left it
    pub context: Context,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RoutineRun {
    /// Fresh record with every step pending
    pub fn new(routine: &Routine) -> Self {
        Self {
            routine: routine.name.clone(),
            status: RoutineStatus::Pending,
            steps: routine.steps.iter().map(|s| StepRun::pending(&s.name)).collect(),
            failure: None,
            context: routine.context.clone(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Close a record whose task never reported back. Finished steps keep
    /// their outcome; the step that was in flight fails as cancelled.
    pub fn interrupt(&mut self) {
        let in_flight = self
            .steps
            .iter_mut()
            .rev()
            .find(|s| s.status != StepStatus::Pending)
            .filter(|s| !s.status.is_terminal());

        let failure = match in_flight {
            Some(step) => {
                let error = StepError::Cancelled {
                    attempts: step.attempts,
                };
                step.fail(error.clone());
                RoutineAborted {
                    step: Some(step.step.clone()),
                    error,
                }
            }
            None => RoutineAborted {
                step: None,
                error: StepError::Cancelled { attempts: 0 },
            },
        };
        self.fail(failure);
    }

    pub fn start(&mut self) {
        self.status = RoutineStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn succeed(&mut self) {
        self.status = RoutineStatus::Succeeded;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, failure: RoutineAborted) {
        self.status = RoutineStatus::Failed;
        self.failure = Some(failure);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == RoutineStatus::Succeeded
    }

    pub fn step(&self, name: &str) -> Option<&StepRun> {
        self.steps.iter().find(|s| s.step == name)
    }

    /// The failure as a user-facing error traced `step -> routine`
    pub fn error(&self) -> Option<TracedError> {
        let failure = self.failure.as_ref()?;
        let attempts = failure
            .step
            .as_deref()
            .and_then(|name| self.step(name))
            .map(|s| s.attempts)
            .unwrap_or(0);

        let message = match &failure.step {
            Some(step) => format!(
                "routine '{}' failed at step '{}' after {} attempt(s) ({}): {}",
                self.routine,
                step,
                attempts,
                failure.error.classification(),
                failure.error
            ),
            None => format!("routine '{}' {}", self.routine, failure),
        };

        let severity = failure.error.severity();
        let error = match &failure.step {
            Some(step) => {
                TracedError::new(severity, message, step.clone()).with_frame(self.routine.clone())
            }
            None => TracedError::new(severity, message, self.routine.clone()),
        };
        Some(error)
    }
}

/// Overall status of an engine execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Running,
    Succeeded,
    Failed,
}

/// Aggregate outcome of every routine in one execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineRun {
    pub id: Uuid,
    pub project: String,
    pub version: String,
    pub status: RunStatus,

    /// One entry per routine, in blueprint order
    pub routines: Vec<RoutineRun>,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl EngineRun {
    pub fn new(project: &Project) -> Self {
        Self {
            id: Uuid::new_v4(),
            project: project.name.clone(),
            version: project.version.clone(),
            status: RunStatus::Running,
            routines: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Derive the overall status from the routines collected so far
    pub fn finish(&mut self) {
        self.status = if self.routines.iter().all(RoutineRun::is_succeeded) {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        self.finished_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn routine(&self, name: &str) -> Option<&RoutineRun> {
        self.routines.iter().find(|r| r.routine == name)
    }

    pub fn failed_routines(&self) -> impl Iterator<Item = &RoutineRun> {
        self.routines.iter().filter(|r| !r.is_succeeded())
    }

    /// One traced error per failed routine, traced `step -> routine -> project`
    pub fn errors(&self) -> Vec<TracedError> {
        self.failed_routines()
            .filter_map(RoutineRun::error)
            .map(|e| e.with_frame(self.project.clone()))
            .collect()
    }

    /// Human-readable summary naming every failed routine and step
    pub fn report(&self, renderer: &ErrorRenderer) -> String {
        let total = self.routines.len();
        let failed = self.failed_routines().count();

        let mut lines = vec![format!(
            "Project '{}' ({}) run {}: {} of {} routine(s) succeeded",
            self.project,
            self.version,
            self.id,
            total - failed,
            total
        )];

        for routine in &self.routines {
            let status = match routine.status {
                RoutineStatus::Succeeded => "succeeded",
                RoutineStatus::Failed => "failed",
                RoutineStatus::Running => "running",
                RoutineStatus::Pending => "pending",
            };
            lines.push(format!("  {:<24} {}", routine.routine, status));
        }

        for error in self.errors() {
            lines.push(renderer.render(&error));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::blueprint::Step;
    use crate::errors::Verbosity;

    fn routine() -> Routine {
        Routine::new("build", vec![Step::new("fetch", "d"), Step::new("compile", "d")])
    }

    #[test]
    fn test_new_routine_run_is_pending() {
        let run = RoutineRun::new(&routine());

        assert_eq!(run.status, RoutineStatus::Pending);
        assert_eq!(run.steps.len(), 2);
        assert!(run.steps.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn test_engine_status_requires_every_routine() {
        let mut engine_run = EngineRun::new(&Project::new("demo", "1"));

        let mut ok = RoutineRun::new(&routine());
        ok.succeed();
        engine_run.routines.push(ok.clone());
        engine_run.finish();
        assert!(engine_run.is_success());

        let mut interrupted = RoutineRun::new(&routine());
        interrupted.interrupt();
        assert_eq!(interrupted.failure.as_ref().unwrap().step, None);
        engine_run.routines.push(interrupted);
        engine_run.finish();
        assert_eq!(engine_run.status, RunStatus::Failed);
        assert_eq!(engine_run.failed_routines().count(), 1);
    }

    #[test]
    fn test_interrupt_keeps_finished_steps() {
        let mut run = RoutineRun::new(&routine());
        run.start();
        run.steps[0].attempts = 1;
        run.steps[0].succeed();
        run.steps[1].start();
        run.steps[1].status = StepStatus::Running;
        run.steps[1].attempts = 1;

        run.interrupt();

        assert_eq!(run.status, RoutineStatus::Failed);
        assert!(run.steps[0].is_succeeded());
        assert!(run.steps[1].is_failed());
        assert_eq!(
            run.steps[1].last_error,
            Some(StepError::Cancelled { attempts: 1 })
        );

        let failure = run.failure.as_ref().unwrap();
        assert_eq!(failure.step.as_deref(), Some("compile"));
        assert_eq!(run.error().unwrap().trace(), ["compile", "build"]);
    }

    #[test]
    fn test_report_names_failed_step_and_classification() {
        let mut engine_run = EngineRun::new(&Project::new("demo", "1"));
        let mut run = RoutineRun::new(&routine());
        run.steps[1].attempts = 3;
        let error = StepError::Exhausted {
            attempts: 3,
            last: Box::new(StepError::Action {
                attempt: 3,
                message: "exit 1".to_string(),
            }),
        };
        run.steps[1].fail(error.clone());
        run.fail(RoutineAborted {
            step: Some("compile".to_string()),
            error,
        });
        engine_run.routines.push(run);
        engine_run.finish();

        let errors = engine_run.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].trace(), ["compile", "build", "demo"]);
        assert!(errors[0]
            .message()
            .contains("failed at step 'compile' after 3 attempt(s) (error)"));

        let report = engine_run.report(&ErrorRenderer::new(Verbosity::Full));
        assert!(report.contains("0 of 1 routine(s) succeeded"));
        assert!(report.contains("[StackTrace] : compile -> build -> demo"));
    }
}
