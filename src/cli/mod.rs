//! Command-line interface for abdtool.
//!
//! Provides commands for running a blueprint, validating one without running
//! it, and showing the resolved configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};

use crate::actions::ActionRegistry;
use crate::blueprint;
use crate::config::ResolvedConfig;
use crate::core::Engine;
use crate::domain::{EngineRun, StepStatus};
use crate::errors::{ErrorRenderer, TracedError, Verbosity};

/// abdtool - Blueprint-driven step orchestrator
#[derive(Parser, Debug)]
#[command(name = "abdtool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every routine of a blueprint
    Run {
        /// Blueprint file (.yaml, .yml or .json)
        blueprint: PathBuf,

        /// How much of each error to print
        #[arg(short, long, value_enum)]
        verbosity: Option<Verbosity>,

        /// Print the run as JSON instead of a summary
        #[arg(long)]
        json: bool,

        /// Give up waiting for subscribed events after this many seconds
        #[arg(long, value_name = "SECONDS")]
        subscribe_timeout: Option<u64>,

        /// Time routines get to stop after Ctrl-C before being aborted
        #[arg(long, value_name = "MS")]
        shutdown_grace_ms: Option<u64>,
    },

    /// Load and validate a blueprint without running it
    Validate {
        /// Blueprint file (.yaml, .yml or .json)
        blueprint: PathBuf,

        /// How much of each error to print
        #[arg(short, long, value_enum)]
        verbosity: Option<Verbosity>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command against an already resolved configuration
    pub async fn execute(self, mut config: ResolvedConfig) -> Result<()> {
        match self.command {
            Commands::Run {
                blueprint,
                verbosity,
                json,
                subscribe_timeout,
                shutdown_grace_ms,
            } => {
                if let Some(verbosity) = verbosity {
                    config.verbosity = verbosity;
                }
                if let Some(secs) = subscribe_timeout {
                    config.engine.subscribe_timeout = Some(Duration::from_secs(secs));
                }
                if let Some(ms) = shutdown_grace_ms {
                    config.engine.shutdown_grace = Duration::from_millis(ms);
                }
                run_blueprint(&blueprint, &config, json).await
            }
            Commands::Validate {
                blueprint,
                verbosity,
            } => {
                if let Some(verbosity) = verbosity {
                    config.verbosity = verbosity;
                }
                validate_blueprint(&blueprint, &config)
            }
            Commands::Config => show_config(&config),
        }
    }
}

/// Turn a traced error into the rendered CLI failure
fn rendered(renderer: &ErrorRenderer, error: impl Into<TracedError>) -> anyhow::Error {
    anyhow!(renderer.render(&error.into().with_frame("main")))
}

async fn run_blueprint(path: &Path, config: &ResolvedConfig, json: bool) -> Result<()> {
    let renderer = ErrorRenderer::new(config.verbosity);

    let blueprint = blueprint::load(path).map_err(|e| rendered(&renderer, e))?;
    let engine = Engine::new(blueprint, ActionRegistry::with_builtins(), config.engine.clone())
        .map_err(|e| rendered(&renderer, e))?;
    let engine = Arc::new(engine);

    let signal_engine = Arc::clone(&engine);
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n[Interrupted, shutting down]");
            signal_engine.shutdown().await;
        }
    });

    let outcome = engine.run().await;
    signal_task.abort();
    let run = outcome.map_err(|e| rendered(&renderer, e))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_steps(&run);
    }

    if run.is_success() {
        eprintln!("\n[Run {} completed successfully]", run.id);
        Ok(())
    } else {
        eprintln!("\n{}", run.report(&renderer));
        bail!("Run {} failed", run.id)
    }
}

fn print_steps(run: &EngineRun) {
    println!("{:<24} {:<24} {:<18} {:>8}", "ROUTINE", "STEP", "STATUS", "ATTEMPTS");
    println!("{}", "-".repeat(77));

    for routine in &run.routines {
        for step in &routine.steps {
            let status = match step.status {
                StepStatus::Pending => "pending",
                StepStatus::WaitingOnEvents => "waiting",
                StepStatus::Running => "running",
                StepStatus::Succeeded => "succeeded",
                StepStatus::Failed => "failed",
                StepStatus::TimedOut => "timed out",
            };
            println!(
                "{:<24} {:<24} {:<18} {:>8}",
                routine.routine, step.step, status, step.attempts
            );
        }
    }
}

fn validate_blueprint(path: &Path, config: &ResolvedConfig) -> Result<()> {
    let renderer = ErrorRenderer::new(config.verbosity);
    let blueprint = blueprint::load(path).map_err(|e| rendered(&renderer, e))?;

    let registry = ActionRegistry::with_builtins();
    registry
        .check(&blueprint)
        .map_err(|e| rendered(&renderer, e))?;

    println!(
        "Blueprint OK: project '{}' ({}), {} routine(s), {} step(s)",
        blueprint.project.name,
        blueprint.project.version,
        blueprint.routines.len(),
        blueprint.step_count()
    );
    Ok(())
}

fn show_config(config: &ResolvedConfig) -> Result<()> {
    println!("abdtool configuration:");
    match &config.config_file {
        Some(path) => println!("  Config file:       {}", path.display()),
        None => println!("  Config file:       (none, using defaults)"),
    }
    println!("  Verbosity:         {:?}", config.verbosity);
    println!(
        "  Shutdown grace:    {} ms",
        config.engine.shutdown_grace.as_millis()
    );
    match config.engine.subscribe_timeout {
        Some(limit) => println!("  Subscribe timeout: {} s", limit.as_secs()),
        None => println!("  Subscribe timeout: (unbounded)"),
    }
    println!("  Log filter:        {}", config.log_filter);
    Ok(())
}
