//! Blueprint data model.
//!
//! A blueprint is produced by the loader in [`crate::blueprint`] and is
//! treated as immutable and already valid by the engine.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Values a routine context can hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<ContextValue>),
    Map(BTreeMap<String, ContextValue>),
}

impl ContextValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ContextValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ContextValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ContextValue]> {
        match self {
            ContextValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Vec<String>> for ContextValue {
    fn from(values: Vec<String>) -> Self {
        Self::List(values.into_iter().map(ContextValue::String).collect())
    }
}

/// Key/value state shared by the steps of one routine
pub type Context = HashMap<String, ContextValue>;

/// A validated blueprint
#[derive(Debug, Clone, PartialEq)]
pub struct Blueprint {
    pub project: Project,

    /// Routines in declared order
    pub routines: Vec<Routine>,
}

impl Blueprint {
    pub fn new(project: Project, routines: Vec<Routine>) -> Self {
        Self { project, routines }
    }

    pub fn routine(&self, name: &str) -> Option<&Routine> {
        self.routines.iter().find(|r| r.name == name)
    }

    /// Total number of steps across all routines
    pub fn step_count(&self) -> usize {
        self.routines.iter().map(|r| r.steps.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    pub version: String,
}

impl Project {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Named, ordered sequence of steps sharing one context
#[derive(Debug, Clone, PartialEq)]
pub struct Routine {
    pub name: String,
    pub steps: Vec<Step>,

    /// Initial context, copied into the routine task when it starts
    pub context: Context,
}

impl Routine {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
            context: Context::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// An event a step publishes after it succeeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostEvent {
    pub event: String,
    pub payload: Vec<String>,
}

/// A unit of work with retry, timeout and event conditions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub description: String,

    /// Number of tries before the step is considered failed
    pub attempts: u32,

    /// Deadline applied to each attempt
    pub timeout_seconds: u64,

    /// Published in order once the action succeeds
    pub post: Vec<PostEvent>,

    /// Events that must all occur before the action starts
    pub subscribe: Vec<String>,

    /// Registered action to run; the registry default when unset
    pub action: Option<String>,
}

impl Step {
    /// A step with one attempt and a one second timeout
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            attempts: 1,
            timeout_seconds: 1,
            post: Vec::new(),
            subscribe: Vec::new(),
            action: None,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn posting<I, S>(mut self, event: impl Into<String>, payload: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.post.push(PostEvent {
            event: event.into(),
            payload: payload.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn subscribing(mut self, event: impl Into<String>) -> Self {
        self.subscribe.push(event.into());
        self
    }

    /// Per-attempt deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
