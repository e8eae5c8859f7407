//! Core execution engine.
//!
//! This module contains:
//! - EventBus: in-memory publish/subscribe between steps
//! - StepExecutor: event gating, per-attempt timeout and retries for one step
//! - RoutineScheduler: ordered, fail-fast execution of one routine
//! - Engine: concurrent routines, run/shutdown lifecycle

pub mod engine;
pub mod event_bus;
pub mod executor;
pub mod scheduler;

pub use engine::{Application, Engine, EngineSettings};
pub use event_bus::{EventBus, Subscription, WaitError};
pub use executor::{ExecutorSettings, StepExecutor, StepObserver, EVENT_KEY_PREFIX};
pub use scheduler::RoutineScheduler;
