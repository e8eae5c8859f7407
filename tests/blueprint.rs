//! Blueprint Loading Integration Tests
//!
//! Files on disk through the parser registry, validation and into a run.

use std::io::Write;
use std::path::PathBuf;

use tempfile::TempDir;

use abdtool::actions::ActionRegistry;
use abdtool::blueprint::{self, ParserRegistry};
use abdtool::core::{Engine, EngineSettings};
use abdtool::domain::RoutineStatus;
use abdtool::errors::{ErrorRenderer, Severity, Verbosity};

fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    write!(file, "{}", body).unwrap();
    path
}

const PIPELINE: &str = r#"
project:
  name: release
  version: "2.0"
routines:
  - routine:
      name: build
      context:
        channel: stable
        sleep_ms: 100
      steps:
        - step:
            name: compile
            description: Compile sources
            attempts: 2
            timeout_s: 5
            action: sleep
            post:
              - event: compiled
                payload: [bin/app]
  - routine:
      name: publish
      steps:
        - step:
            name: upload
            description: Upload binaries
            attempts: 1
            timeout_s: 5
            action: stamp
            subscribe: [compiled]
"#;

// The compile step sleeps so that the upload step is already waiting when
// `compiled` is published; events are not replayed.
#[tokio::test(start_paused = true)]
async fn test_yaml_blueprint_runs_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "release.yaml", PIPELINE);

    let blueprint = blueprint::load(&path).unwrap();
    assert_eq!(blueprint.project.name, "release");
    assert_eq!(blueprint.step_count(), 2);

    let engine = Engine::new(
        blueprint,
        ActionRegistry::with_builtins(),
        EngineSettings::default(),
    )
    .unwrap();
    let run = engine.run().await.unwrap();

    assert!(run.is_success());
    let publish = run.routine("publish").unwrap();
    assert_eq!(publish.status, RoutineStatus::Succeeded);
    assert!(publish.context.contains_key("event.compiled"));
    assert_eq!(
        run.routine("build").unwrap().context["channel"].as_str(),
        Some("stable")
    );
}

#[test]
fn test_json_blueprint_loads() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "tiny.json",
        r#"{"project": {"name": "tiny", "version": "1"},
            "routines": [{"routine": {"name": "r", "steps": [
                {"step": {"name": "s", "description": "d", "attempts": 1, "timeout_s": 1}}
            ]}}]}"#,
    );

    let blueprint = blueprint::load(&path).unwrap();
    assert_eq!(blueprint.routines[0].steps[0].name, "s");
}

#[test]
fn test_unknown_extension_is_critical() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "blueprint.toml", "project = {}");

    let err = blueprint::load(&path).unwrap_err();
    assert_eq!(err.severity(), Severity::Critical);
    assert_eq!(
        err.message(),
        r#"Invalid blueprint file extension, ".toml" is not implemented"#
    );
    assert_eq!(err.trace(), ["ParserRegistry::for_path", "ParserRegistry::load"]);
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = ParserRegistry::with_builtins()
        .load(&dir.path().join("absent.yaml"))
        .unwrap_err();
    assert!(err.message().starts_with("Blueprint file doesn't exist"));
}

#[test]
fn test_validation_error_is_traced() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "bad.yml",
        r#"
project: { name: p, version: "1" }
routines:
  - routine:
      name: r
      steps:
        - step: { name: s, description: d, attempts: 0, timeout_s: 1 }
"#,
    );

    let err = blueprint::load(&path).unwrap_err();
    assert_eq!(err.trace(), ["validate", "ParserRegistry::load"]);

    let rendered = ErrorRenderer::new(Verbosity::Full).render(&err);
    assert_eq!(
        rendered,
        "[Error] : \"step.attempts\" must be >= 1 in \"s\" step\n\
         [StackTrace] : validate -> ParserRegistry::load"
    );
}

#[test]
fn test_parse_error_names_format() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "broken.yaml", "routines: [unclosed");

    let err = blueprint::load(&path).unwrap_err();
    assert!(err.message().starts_with("Failed to parse yaml blueprint"));
    assert_eq!(err.trace()[0], "YamlParser::parse");
}
