//! Domain types for the abdtool orchestrator.
//!
//! This module contains the core data structures:
//! - Blueprint: Project, routines and steps to execute
//! - Events: Named occurrences exchanged between steps
//! - Run: Execution state of steps, routines and the whole engine

pub mod blueprint;
pub mod events;
pub mod run;

// Re-export commonly used types
pub use blueprint::{Blueprint, Context, ContextValue, PostEvent, Project, Routine, Step};
pub use events::Event;
pub use run::{EngineRun, RoutineRun, RoutineStatus, RunStatus, StepRun, StepStatus};
