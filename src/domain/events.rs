//! Events broadcast between steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named occurrence with a string payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub payload: Vec<String>,

    /// When the event was published
    pub published_at: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current time
    pub fn new(name: impl Into<String>, payload: Vec<String>) -> Self {
        Self {
            name: name.into(),
            payload,
            published_at: Utc::now(),
        }
    }
}
