//! Blueprint file formats.
//!
//! YAML and JSON share one wire shape: every routine and step sits under a
//! `routine:` / `step:` key of its list item.

use serde::Deserialize;

use super::BlueprintError;
use crate::domain::{Blueprint, Context, PostEvent, Project, Routine, Step};

/// Turns raw file content into an unvalidated [`Blueprint`]
pub trait BlueprintParser: Send + Sync {
    /// Human-readable format name, used in error messages
    fn format(&self) -> &'static str;

    fn parse(&self, bytes: &[u8]) -> Result<Blueprint, BlueprintError>;
}

pub struct YamlParser;

impl BlueprintParser for YamlParser {
    fn format(&self) -> &'static str {
        "yaml"
    }

    fn parse(&self, bytes: &[u8]) -> Result<Blueprint, BlueprintError> {
        let wire: WireBlueprint =
            serde_yaml::from_slice(bytes).map_err(|e| BlueprintError::Parse {
                format: self.format(),
                message: e.to_string(),
            })?;
        wire.into_blueprint()
    }
}

pub struct JsonParser;

impl BlueprintParser for JsonParser {
    fn format(&self) -> &'static str {
        "json"
    }

    fn parse(&self, bytes: &[u8]) -> Result<Blueprint, BlueprintError> {
        let wire: WireBlueprint =
            serde_json::from_slice(bytes).map_err(|e| BlueprintError::Parse {
                format: self.format(),
                message: e.to_string(),
            })?;
        wire.into_blueprint()
    }
}

// Missing fields default to empty/zero so that the validator, not the
// parser, reports them.

#[derive(Debug, Default, Deserialize)]
struct WireBlueprint {
    #[serde(default)]
    project: WireProject,
    #[serde(default)]
    routines: Vec<WireRoutineEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct WireProject {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: Option<Version>,
}

/// An unquoted `version: 1.10` reaches us as the float 1.1, so the text as
/// written is already lost; only strings and integers are kept.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Version {
    Text(String),
    Integer(i64),
    Decimal(f64),
}

impl Version {
    fn into_text(self) -> Result<String, BlueprintError> {
        match self {
            Version::Text(s) => Ok(s),
            Version::Integer(i) => Ok(i.to_string()),
            Version::Decimal(_) => Err(BlueprintError::Invalid(format!(
                "{:?} must be a string, quote decimal versions such as \"1.10\"",
                "project.version"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireRoutineEntry {
    routine: WireRoutine,
}

#[derive(Debug, Deserialize)]
struct WireRoutine {
    #[serde(default)]
    name: String,
    #[serde(default)]
    steps: Vec<WireStepEntry>,
    #[serde(default)]
    context: Option<Context>,
}

#[derive(Debug, Deserialize)]
struct WireStepEntry {
    step: WireStep,
}

#[derive(Debug, Deserialize)]
struct WireStep {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    attempts: i64,
    #[serde(default)]
    timeout_s: i64,
    #[serde(default)]
    post: Vec<WirePost>,
    #[serde(default)]
    subscribe: Vec<String>,
    #[serde(default)]
    action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePost {
    event: String,
    #[serde(default)]
    payload: Vec<String>,
}

impl WireBlueprint {
    fn into_blueprint(self) -> Result<Blueprint, BlueprintError> {
        let version = match self.project.version {
            Some(version) => version.into_text()?,
            None => String::new(),
        };
        let project = Project::new(self.project.name, version);
        let routines = self
            .routines
            .into_iter()
            .map(|entry| entry.routine.into_routine())
            .collect();
        Ok(Blueprint::new(project, routines))
    }
}

impl WireRoutine {
    fn into_routine(self) -> Routine {
        let steps = self
            .steps
            .into_iter()
            .map(|entry| entry.step.into_step())
            .collect();
        let mut routine = Routine::new(self.name, steps);
        routine.context = self.context.unwrap_or_default();
        routine
    }
}

impl WireStep {
    fn into_step(self) -> Step {
        // Out-of-range numbers become 0, which validation rejects
        let attempts = u32::try_from(self.attempts).unwrap_or(0);
        let timeout_seconds = u64::try_from(self.timeout_s).unwrap_or(0);

        Step {
            name: self.name,
            description: self.description,
            attempts,
            timeout_seconds,
            post: self
                .post
                .into_iter()
                .map(|p| PostEvent {
                    event: p.event,
                    payload: p.payload,
                })
                .collect(),
            subscribe: self.subscribe,
            action: self.action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContextValue;

    const YAML: &str = r#"
project:
  name: demo
  version: "1.10"
routines:
  - routine:
      name: build
      context:
        target: release
        jobs: 4
      steps:
        - step:
            name: compile
            description: Compile sources
            attempts: 3
            timeout_s: 10
            action: stamp
            post:
              - event: compiled
                payload: [app, lib]
        - step:
            name: package
            description: Package binaries
            attempts: 1
            timeout_s: 5
            subscribe: [compiled]
"#;

    #[test]
    fn test_yaml_wire_shape() {
        let blueprint = YamlParser.parse(YAML.as_bytes()).unwrap();

        assert_eq!(blueprint.project, Project::new("demo", "1.10"));
        let routine = &blueprint.routines[0];
        assert_eq!(routine.name, "build");
        assert_eq!(routine.context["target"].as_str(), Some("release"));
        assert_eq!(routine.context["jobs"], ContextValue::Integer(4));

        let compile = &routine.steps[0];
        assert_eq!(compile.attempts, 3);
        assert_eq!(compile.timeout_seconds, 10);
        assert_eq!(compile.action.as_deref(), Some("stamp"));
        assert_eq!(compile.post[0].event, "compiled");
        assert_eq!(compile.post[0].payload, ["app", "lib"]);

        let package = &routine.steps[1];
        assert_eq!(package.subscribe, ["compiled"]);
        assert!(package.action.is_none());
    }

    #[test]
    fn test_decimal_versions_are_rejected() {
        for version in ["1.0", "1.10"] {
            let yaml = format!(
                "project: {{ name: p, version: {} }}\nroutines: []\n",
                version
            );
            let err = YamlParser.parse(yaml.as_bytes()).unwrap_err();
            assert!(
                matches!(&err, BlueprintError::Invalid(m) if m.contains("\"project.version\" must be a string")),
                "{} was accepted: {:?}",
                version,
                err
            );
        }

        let quoted = YamlParser
            .parse(b"project: { name: p, version: \"1.0\" }\nroutines: []\n")
            .unwrap();
        assert_eq!(quoted.project.version, "1.0");

        let integer = YamlParser
            .parse(b"project: { name: p, version: 2 }\nroutines: []\n")
            .unwrap();
        assert_eq!(integer.project.version, "2");
    }

    #[test]
    fn test_negative_numbers_become_zero() {
        let yaml = r#"
project: { name: p, version: "1" }
routines:
  - routine:
      name: r
      steps:
        - step: { name: s, description: d, attempts: -2, timeout_s: -1 }
"#;
        let blueprint = YamlParser.parse(yaml.as_bytes()).unwrap();
        let step = &blueprint.routines[0].steps[0];
        assert_eq!(step.attempts, 0);
        assert_eq!(step.timeout_seconds, 0);
    }

    #[test]
    fn test_json_shares_shape() {
        let json = r#"{
            "project": { "name": "p", "version": "2.1.0" },
            "routines": [
                { "routine": { "name": "r", "steps": [
                    { "step": { "name": "s", "description": "d", "attempts": 2, "timeout_s": 3 } }
                ] } }
            ]
        }"#;
        let blueprint = JsonParser.parse(json.as_bytes()).unwrap();
        assert_eq!(blueprint.project.version, "2.1.0");
        assert_eq!(blueprint.routines[0].steps[0].attempts, 2);
    }

    #[test]
    fn test_malformed_input() {
        let err = YamlParser.parse(b"routines: [unclosed").unwrap_err();
        assert!(matches!(err, BlueprintError::Parse { format: "yaml", .. }));
    }
}
