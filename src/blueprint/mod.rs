//! Blueprint loading and validation.
//!
//! A blueprint file is picked up by extension, parsed by the matching
//! [`BlueprintParser`] and then validated. The engine only ever receives a
//! blueprint that passed [`validate`].

pub mod parser;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::domain::Blueprint;
use crate::errors::{Severity, TraceExt, TracedError};

pub use parser::{BlueprintParser, JsonParser, YamlParser};

/// Why a blueprint could not be loaded
#[derive(Debug, Error)]
pub enum BlueprintError {
    #[error("Blueprint file doesn't exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid blueprint file extension, {0:?} is not implemented")]
    UnsupportedFormat(String),

    #[error("Failed to read blueprint file, {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {format} blueprint: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    #[error("{0}")]
    Invalid(String),
}

impl BlueprintError {
    /// Every loading problem is fatal at startup
    pub fn traced(self, origin: &str) -> TracedError {
        TracedError::new(Severity::Critical, self.to_string(), origin)
    }
}

/// Maps file extensions (without the dot, lower case) to parsers
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn BlueprintParser>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// `yaml`, `yml` and `json`
    pub fn with_builtins() -> Self {
        let yaml: Arc<dyn BlueprintParser> = Arc::new(YamlParser);
        let mut registry = Self::new();
        registry.register("yaml", Arc::clone(&yaml));
        registry.register("yml", yaml);
        registry.register("json", Arc::new(JsonParser));
        registry
    }

    pub fn register(&mut self, extension: &str, parser: Arc<dyn BlueprintParser>) -> &mut Self {
        self.parsers.insert(
            extension.trim_start_matches('.').to_ascii_lowercase(),
            parser,
        );
        self
    }

    /// Supported extensions, sorted
    pub fn extensions(&self) -> Vec<&str> {
        let mut extensions: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        extensions.sort_unstable();
        extensions
    }

    /// Parser for the extension of `path`
    pub fn for_path(&self, path: &Path) -> Result<Arc<dyn BlueprintParser>, BlueprintError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        self.parsers
            .get(&extension.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| {
                let shown = if extension.is_empty() {
                    String::new()
                } else {
                    format!(".{}", extension)
                };
                BlueprintError::UnsupportedFormat(shown)
            })
    }

    /// Read, parse and validate the blueprint at `path`
    pub fn load(&self, path: &Path) -> Result<Blueprint, TracedError> {
        const FRAME: &str = "ParserRegistry::load";

        let parser = self
            .for_path(path)
            .map_err(|e| e.traced("ParserRegistry::for_path"))
            .trace(FRAME)?;

        if !path.exists() {
            return Err(BlueprintError::NotFound(path.to_path_buf()).traced(FRAME));
        }

        let bytes = std::fs::read(path).map_err(|source| {
            BlueprintError::Read {
                path: path.to_path_buf(),
                source,
            }
            .traced(FRAME)
        })?;

        let blueprint = parser
            .parse(&bytes)
            .map_err(|e| e.traced(&format!("{}Parser::parse", capitalize(parser.format()))))
            .trace(FRAME)?;

        validate(&blueprint)
            .map_err(|e| e.traced("validate"))
            .trace(FRAME)?;

        debug!(
            path = %path.display(),
            project = %blueprint.project.name,
            routines = blueprint.routines.len(),
            steps = blueprint.step_count(),
            "Blueprint loaded"
        );
        Ok(blueprint)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Load a blueprint with the built-in parsers
pub fn load(path: impl AsRef<Path>) -> Result<Blueprint, TracedError> {
    ParserRegistry::with_builtins().load(path.as_ref())
}

/// Check the invariants the engine relies on. Stops at the first problem.
pub fn validate(blueprint: &Blueprint) -> Result<(), BlueprintError> {
    let invalid = |message: String| Err(BlueprintError::Invalid(message));

    if blueprint.project.name.is_empty() {
        return invalid(format!("{:?} must be provided", "project.name"));
    }
    if blueprint.project.version.is_empty() {
        return invalid(format!("{:?} must be provided", "project.version"));
    }
    if blueprint.routines.is_empty() {
        return invalid(format!("{:?} must be provided", "routines"));
    }

    let mut seen = HashSet::new();
    for routine in &blueprint.routines {
        if routine.name.is_empty() {
            return invalid(format!("{:?} must be provided", "routine.name"));
        }
        if !seen.insert(routine.name.as_str()) {
            return invalid(format!(
                "{:?} must be unique, {:?} routine is declared more than once",
                "routine.name", routine.name
            ));
        }
        if routine.steps.is_empty() {
            return invalid(format!(
                "{:?} must be provided for {:?} routine",
                "routine.steps", routine.name
            ));
        }

        for step in &routine.steps {
            if step.name.is_empty() {
                return invalid(format!(
                    "{:?} must be provided in {:?} routine",
                    "step.name", routine.name
                ));
            }
            if step.description.is_empty() {
                return invalid(format!(
                    "{:?} must be provided for {:?} step",
                    "step.description", step.name
                ));
            }
            if step.timeout_seconds == 0 {
                return invalid(format!(
                    "{:?} must be >= 1 in {:?} step",
                    "step.timeout_s", step.name
                ));
            }
            if step.attempts == 0 {
                return invalid(format!(
                    "{:?} must be >= 1 in {:?} step",
                    "step.attempts", step.name
                ));
            }
        }
    }

    Ok(())
}
