//! Error types shared by the loader, the engine and the CLI.
//!
//! Two families live here:
//! - [`TracedError`]: a severity-classified error carrying an ordered list of
//!   the calling contexts it passed through. It is what gets shown to users,
//!   rendered by an explicit [`ErrorRenderer`].
//! - Typed failure kinds of the execution core ([`StepError`],
//!   [`RoutineAborted`], [`EngineError`]), each convertible into a
//!   [`TracedError`].

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How serious an error is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// How much of an error gets rendered
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    /// Only the message
    #[default]
    Message,

    /// Only the trace of calling contexts
    Trace,

    /// Message followed by the trace
    Full,
}

impl FromStr for Verbosity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "message" => Ok(Self::Message),
            "trace" => Ok(Self::Trace),
            "full" => Ok(Self::Full),
            other => Err(format!(
                "unknown verbosity '{}', expected one of: message, trace, full",
                other
            )),
        }
    }
}

/// An error with a severity and the ordered trace of contexts it crossed.
///
/// The first frame is where the error was raised; every caller that passes
/// it on appends its own frame with [`TracedError::push_frame`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct TracedError {
    severity: Severity,
    message: String,
    trace: Vec<String>,
}

impl TracedError {
    /// Create an error raised at `origin`
    pub fn new(severity: Severity, message: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            trace: vec![origin.into()],
        }
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Frames in the order they were appended
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    /// Append a calling context to the trace
    pub fn push_frame(&mut self, frame: impl Into<String>) {
        let frame = frame.into();
        if !frame.is_empty() {
            self.trace.push(frame);
        }
    }

    /// Builder form of [`TracedError::push_frame`]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.push_frame(frame);
        self
    }

    fn trace_line(&self) -> String {
        self.trace.join(" -> ")
    }
}

/// Appends frames to the error side of a `Result` while propagating it
pub trait TraceExt<T> {
    fn trace(self, frame: &str) -> Result<T, TracedError>;
}

impl<T> TraceExt<T> for Result<T, TracedError> {
    fn trace(self, frame: &str) -> Result<T, TracedError> {
        self.map_err(|e| e.with_frame(frame))
    }
}

/// Formats [`TracedError`]s at a fixed verbosity.
///
/// Passed explicitly to whatever reports errors, so concurrent callers never
/// share mutable rendering state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorRenderer {
    verbosity: Verbosity,
}

impl ErrorRenderer {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn render(&self, error: &TracedError) -> String {
        match self.verbosity {
            Verbosity::Message => format!("[Error] : {}", error.message),
            Verbosity::Trace => format!("[StackTrace] : {}", error.trace_line()),
            Verbosity::Full => format!(
                "[Error] : {}\n[StackTrace] : {}",
                error.message,
                error.trace_line()
            ),
        }
    }
}

/// Why a step did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepError {
    /// One attempt exceeded its deadline (retried)
    #[error("attempt {attempt} timed out after {limit_seconds}s")]
    Timeout { attempt: u32, limit_seconds: u64 },

    /// The action reported a failure (retried)
    #[error("attempt {attempt} failed: {message}")]
    Action { attempt: u32, message: String },

    /// Every attempt was consumed
    #[error("gave up after {attempts} attempt(s), last: {last}")]
    Exhausted { attempts: u32, last: Box<StepError> },

    /// The subscription was released by shutdown or cancellation
    #[error("wait for events [{}] was cancelled", .events.join(", "))]
    WaitCancelled { events: Vec<String> },

    /// The subscription exceeded the configured wait limit
    #[error("events [{}] did not arrive within {limit_ms}ms", .events.join(", "))]
    WaitTimedOut { events: Vec<String>, limit_ms: u64 },

    /// Engine cancellation was observed between attempts
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    /// No action is registered under the step's action name
    #[error("no action registered as '{action}'")]
    UnknownAction { action: String },
}

impl StepError {
    pub fn severity(&self) -> Severity {
        match self {
            StepError::Timeout { .. } | StepError::Action { .. } => Severity::Low,
            StepError::WaitCancelled { .. } | StepError::Cancelled { .. } => Severity::Medium,
            StepError::Exhausted { .. } | StepError::WaitTimedOut { .. } => Severity::High,
            StepError::UnknownAction { .. } => Severity::Critical,
        }
    }

    /// Short label separating timeouts from action errors
    pub fn classification(&self) -> &'static str {
        match self {
            StepError::Timeout { .. } => "timeout",
            StepError::Action { .. } => "error",
            StepError::Exhausted { last, .. } => last.classification(),
            StepError::WaitCancelled { .. } => "wait cancelled",
            StepError::WaitTimedOut { .. } => "wait timeout",
            StepError::Cancelled { .. } => "cancelled",
            StepError::UnknownAction { .. } => "unknown action",
        }
    }
}

/// A routine stopped before all of its steps succeeded
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{}: {}", stopped_at(.step), .error)]
pub struct RoutineAborted {
    /// Failing step, `None` when the routine task was interrupted from outside
    pub step: Option<String>,
    pub error: StepError,
}

fn stopped_at(step: &Option<String>) -> String {
    match step {
        Some(step) => format!("aborted at step '{}'", step),
        None => "interrupted".to_string(),
    }
}

/// Errors surfaced by [`crate::core::Engine`] itself
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(TracedError),

    #[error("engine run already started")]
    AlreadyStarted,

    #[error("engine has been shut down")]
    ShutDown,
}

impl From<EngineError> for TracedError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Configuration(inner) => inner.with_frame("Engine"),
            other => TracedError::new(Severity::High, other.to_string(), "Engine"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_levels() {
        let error = TracedError::new(Severity::Critical, "boom", "validate")
            .with_frame("load")
            .with_frame("main");

        assert_eq!(
            ErrorRenderer::new(Verbosity::Message).render(&error),
            "[Error] : boom"
        );
        assert_eq!(
            ErrorRenderer::new(Verbosity::Trace).render(&error),
            "[StackTrace] : validate -> load -> main"
        );
        assert_eq!(
            ErrorRenderer::new(Verbosity::Full).render(&error),
            "[Error] : boom\n[StackTrace] : validate -> load -> main"
        );
    }

    #[test]
    fn test_trace_ext_appends_in_order() {
        let failing: Result<(), TracedError> =
            Err(TracedError::new(Severity::Low, "nope", "inner"));

        let err = failing.trace("middle").trace("outer").unwrap_err();
        assert_eq!(err.trace(), ["inner", "middle", "outer"]);
        assert_eq!(err.severity(), Severity::Low);
    }

    #[test]
    fn test_empty_frames_are_skipped() {
        let err = TracedError::new(Severity::Medium, "x", "a").with_frame("");
        assert_eq!(err.trace(), ["a"]);
    }

    #[test]
    fn test_verbosity_from_str() {
        assert_eq!("FULL".parse::<Verbosity>().unwrap(), Verbosity::Full);
        assert_eq!(" trace ".parse::<Verbosity>().unwrap(), Verbosity::Trace);
        assert!("loud".parse::<Verbosity>().is_err());
    }

    #[test]
    fn test_exhausted_classification_follows_last_error() {
        let timed_out = StepError::Exhausted {
            attempts: 2,
            last: Box::new(StepError::Timeout {
                attempt: 2,
                limit_seconds: 1,
            }),
        };
        assert_eq!(timed_out.classification(), "timeout");
        assert_eq!(timed_out.severity(), Severity::High);
        assert_eq!(
            timed_out.to_string(),
            "gave up after 2 attempt(s), last: attempt 2 timed out after 1s"
        );
    }

    #[test]
    fn test_routine_aborted_display() {
        let at_step = RoutineAborted {
            step: Some("compile".to_string()),
            error: StepError::Cancelled { attempts: 1 },
        };
        assert_eq!(
            at_step.to_string(),
            "aborted at step 'compile': cancelled after 1 attempt(s)"
        );

        let interrupted = RoutineAborted {
            step: None,
            error: StepError::Cancelled { attempts: 0 },
        };
        assert_eq!(interrupted.to_string(), "interrupted: cancelled after 0 attempt(s)");

        let boxed: Box<dyn std::error::Error> = Box::new(at_step);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn test_wait_error_lists_events() {
        let err = StepError::WaitCancelled {
            events: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "wait for events [a, b] was cancelled");
    }
}
