//! Workflow definition parsing and validation.
//!
//! Definitions load from YAML or JSON. Validation rejects structurally
//! broken definitions up front; dependencies on ids that do not exist are
//! reported as warnings only, because the engine resolves them to "unmet"
//! and skips the dependent step instead of failing the whole run.

use std::collections::HashSet;
use std::path::Path;

use conductor_types::workflow::WorkflowDefinition;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The dependency graph has a cycle; lists the steps on it.
    #[error("cyclic dependency between steps: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    #[error("workflow not found: {0}")]
    NotFound(String),

    #[error("workflow '{0}' is already running")]
    AlreadyRunning(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse and validate a YAML definition.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Parse and validate a JSON definition.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_json::from_str(json).map_err(|e| WorkflowError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Load a definition file, picking the format from the extension
/// (`.json` is JSON, everything else YAML).
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        parse_workflow_json(&content)
    } else {
        parse_workflow_yaml(&content)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check structural constraints:
/// - name non-empty, at least one step
/// - unique, non-empty step ids and non-empty commands
/// - no step depends on itself
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.name.trim().is_empty() {
        return Err(WorkflowError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }
    if def.steps.is_empty() {
        return Err(WorkflowError::Validation(
            "workflow must have at least one step".to_string(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for step in &def.steps {
        if step.id.trim().is_empty() {
            return Err(WorkflowError::Validation("step id must not be empty".to_string()));
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(WorkflowError::Validation(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
        if step.command.trim().is_empty() {
            return Err(WorkflowError::Validation(format!(
                "step '{}' has an empty command",
                step.id
            )));
        }
        if step.depends_on.iter().any(|d| d == &step.id) {
            return Err(WorkflowError::Validation(format!(
                "step '{}' depends on itself",
                step.id
            )));
        }
    }

    Ok(())
}

/// Non-fatal findings: dependencies on ids that are not in the workflow.
/// Such steps will be skipped with "dependencies not met" at run time.
pub fn definition_warnings(def: &WorkflowDefinition) -> Vec<String> {
    let ids: HashSet<&str> = def.steps.iter().map(|s| s.id.as_str()).collect();
    def.steps
        .iter()
        .flat_map(|step| {
            step.depends_on
                .iter()
                .filter(|dep| !ids.contains(dep.as_str()))
                .map(move |dep| format!("step '{}' depends on unknown step '{}'", step.id, dep))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID: &str = r#"
name: nightly
steps:
  - id: fetch
    command: download export
  - id: report
    command: build report
    depends_on: [fetch]
"#;

    #[test]
    fn parses_valid_yaml() {
        let def = parse_workflow_yaml(VALID).unwrap();
        assert_eq!(def.name, "nightly");
        assert_eq!(def.steps.len(), 2);
        assert!(definition_warnings(&def).is_empty());
    }

    #[test]
    fn parses_json() {
        let def = parse_workflow_json(
            r#"{"id":"wf-1","name":"j","parallel":true,"steps":[{"id":"a","command":"x"}]}"#,
        )
        .unwrap();
        assert_eq!(def.id, "wf-1");
        assert!(def.parallel);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let yaml = r#"
name: dup
steps:
  - id: a
    command: x
  - id: a
    command: y
"#;
        let err = parse_workflow_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate step ID"));
    }

    #[test]
    fn rejects_empty_steps_and_self_dependency() {
        assert!(matches!(
            parse_workflow_yaml("name: empty\nsteps: []\n"),
            Err(WorkflowError::Validation(_))
        ));
        let yaml = r#"
name: loop
steps:
  - id: a
    command: x
    depends_on: [a]
"#;
        assert!(parse_workflow_yaml(yaml).unwrap_err().to_string().contains("itself"));
    }

    #[test]
    fn missing_dependency_is_only_a_warning() {
        let yaml = r#"
name: dangling
steps:
  - id: a
    command: x
    depends_on: [ghost]
"#;
        let def = parse_workflow_yaml(yaml).unwrap();
        let warnings = definition_warnings(&def);
        assert_eq!(warnings, vec!["step 'a' depends on unknown step 'ghost'"]);
    }

    #[test]
    fn malformed_yaml_is_parse_error() {
        assert!(matches!(
            parse_workflow_yaml("name: [unclosed"),
            Err(WorkflowError::Parse(_))
        ));
    }

    #[test]
    fn load_file_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml_path = dir.path().join("wf.yaml");
        std::fs::File::create(&yaml_path)
            .unwrap()
            .write_all(VALID.as_bytes())
            .unwrap();
        assert_eq!(load_workflow_file(&yaml_path).unwrap().name, "nightly");

        let json_path = dir.path().join("wf.json");
        std::fs::write(&json_path, r#"{"name":"j","steps":[{"id":"a","command":"x"}]}"#).unwrap();
        assert_eq!(load_workflow_file(&json_path).unwrap().name, "j");

        assert!(matches!(
            load_workflow_file(&dir.path().join("missing.yaml")),
            Err(WorkflowError::Io(_))
        ));
    }
}
