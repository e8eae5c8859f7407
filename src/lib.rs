//! abdtool - Blueprint-driven step orchestrator
//!
//! A blueprint declares named routines, each an ordered list of steps. The
//! engine runs all routines concurrently; inside a routine, steps run one at
//! a time with per-attempt timeouts and bounded retries. Steps coordinate
//! across routines through named events: a step may publish events once it
//! succeeds and may wait for events before it starts.
//!
//! # Modules
//!
//! - `core`: EventBus, StepExecutor, RoutineScheduler, Engine
//! - `domain`: Blueprint model and run reports
//! - `blueprint`: File formats, loading and validation
//! - `actions`: Step action trait, registry and built-ins
//! - `errors`: Traced errors and failure kinds
//! - `config`: Layered configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Check a blueprint
//! abdtool validate deploy.yaml
//!
//! # Run it, printing full error traces on failure
//! abdtool run deploy.yaml --verbosity full
//! ```

pub mod actions;
pub mod blueprint;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod errors;

// Re-export main types at crate root for convenience
pub use crate::actions::{ActionContext, ActionRegistry, StepAction};
pub use crate::core::{Application, Engine, EngineSettings, EventBus};
pub use crate::domain::{Blueprint, EngineRun, Event, RoutineRun, Step, StepRun};
pub use crate::errors::{EngineError, ErrorRenderer, StepError, TracedError, Verbosity};
