//! PRD parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::error::ConfigError;
use crate::graph::DependencyGraph;
use crate::scope::Scope;

use super::schema::validate_prd_schema;

/// Errors that can occur when loading a PRD.
#[derive(Error, Debug)]
pub enum PrdError {
    #[error("Failed to read PRD file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("PRD does not match schema: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// How a story's gate treats a preflight ASK decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Authority {
    /// ASK is logged and the run proceeds
    #[default]
    Autonomous,

    /// ASK is treated as DENY
    Supervised,
}

/// One named, dependency-aware unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    /// Unique within the PRD
    pub id: String,

    pub title: String,

    /// Gate definition backing this story
    pub gate_file: String,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub scope: Option<Scope>,

    #[serde(default)]
    pub authority: Option<Authority>,

    /// Fail a "successful" gate that produced no action or stage evidence
    #[serde(default)]
    pub require_evidence: bool,

    /// Nested stories; emptied by flattening
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Story>,

    /// Set by flattening for stories that were nested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl Story {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        gate_file: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            gate_file: gate_file.into(),
            depends_on: Vec::new(),
            scope: None,
            authority: None,
            require_evidence: false,
            children: Vec::new(),
            parent: None,
        }
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }
}

/// A dependency graph of stories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Prd {
    #[serde(default)]
    pub name: Option<String>,

    pub stories: Vec<Story>,

    #[serde(default)]
    pub default_authority: Option<Authority>,
}

impl Prd {
    /// Build a PRD from stories, flattening any nesting.
    pub fn new(stories: Vec<Story>) -> Self {
        let mut prd = Self {
            name: None,
            stories,
            default_authority: None,
        };
        prd.flatten();
        prd
    }

    /// Parse a PRD from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, PrdError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a PRD from JSON string.
    pub fn from_json(json: &str) -> Result<Self, PrdError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a PRD file, choosing the format by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PrdError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    fn from_value(value: serde_json::Value) -> Result<Self, PrdError> {
        validate_prd_schema(&value).map_err(PrdError::SchemaError)?;
        let mut prd: Prd = serde_json::from_value(value)?;
        prd.flatten();
        prd.validate()?;
        Ok(prd)
    }

    /// Flatten nested stories into siblings with parent links.
    ///
    /// Order is depth-first: a parent precedes its children.
    pub fn flatten(&mut self) {
        fn walk(story: Story, parent: Option<&str>, out: &mut Vec<Story>) {
            let mut story = story;
            let children = std::mem::take(&mut story.children);
            if story.parent.is_none() {
                story.parent = parent.map(str::to_string);
            }
            let id = story.id.clone();
            out.push(story);
            for child in children {
                walk(child, Some(&id), out);
            }
        }

        let stories = std::mem::take(&mut self.stories);
        let mut flat = Vec::with_capacity(stories.len());
        for story in stories {
            walk(story, None, &mut flat);
        }
        self.stories = flat;
    }

    /// Static checks: ids, dependencies, cycles and scope contradictions.
    ///
    /// Returns the dependency graph so callers do not rebuild it.
    pub fn validate(&self) -> Result<DependencyGraph, ConfigError> {
        for story in &self.stories {
            if let Some(scope) = &story.scope {
                scope.check_contradictions(&story.id)?;
            }
        }
        let graph = DependencyGraph::new(&self.stories)?;
        debug!(
            stories = graph.len(),
            levels = graph.levels().len(),
            "PRD validated"
        );
        Ok(graph)
    }

    /// Look up a story by id.
    pub fn story(&self, id: &str) -> Option<&Story> {
        self.stories.iter().find(|s| s.id == id)
    }

    /// The authority that applies to a story.
    pub fn authority_for(&self, story: &Story) -> Option<Authority> {
        story.authority.or(self.default_authority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_PRD: &str = r#"
name: "Checkout"
defaultAuthority: supervised
stories:
  - id: "A"
    title: "Login emits session"
    gateFile: "gates/login.yaml"
  - id: "B"
    title: "Cart"
    gateFile: "gates/cart.yaml"
    dependsOn: ["A"]
    requireEvidence: true
    children:
      - id: "B1"
        title: "Cart add"
        gateFile: "gates/cart-add.yaml"
        authority: autonomous
"#;

    #[test]
    fn test_parse_valid_prd() {
        let prd = Prd::from_yaml(VALID_PRD).unwrap();
        assert_eq!(prd.name.as_deref(), Some("Checkout"));
        let ids: Vec<_> = prd.stories.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "B1"]);
        assert_eq!(prd.story("B1").unwrap().parent.as_deref(), Some("B"));
        assert!(prd.story("B").unwrap().children.is_empty());
        assert!(prd.story("B").unwrap().require_evidence);
    }

    #[test]
    fn test_authority_resolution() {
        let prd = Prd::from_yaml(VALID_PRD).unwrap();
        let a = prd.story("A").unwrap();
        let b1 = prd.story("B1").unwrap();
        assert_eq!(prd.authority_for(a), Some(Authority::Supervised));
        assert_eq!(prd.authority_for(b1), Some(Authority::Autonomous));
    }

    #[test]
    fn test_unknown_dependency_is_config_error() {
        let yaml = r#"
stories:
  - id: "A"
    title: "t"
    gateFile: "g"
    dependsOn: ["Z"]
"#;
        assert!(matches!(
            Prd::from_yaml(yaml),
            Err(PrdError::Config(ConfigError::UnknownDependency { .. }))
        ));
    }

    #[test]
    fn test_contradictory_scope_rejected_on_load() {
        let yaml = r#"
stories:
  - id: "A"
    title: "t"
    gateFile: "g"
    scope:
      allowedPaths: ["src/**"]
      forbiddenPaths: ["src/**"]
"#;
        assert!(matches!(
            Prd::from_yaml(yaml),
            Err(PrdError::Config(ConfigError::ContradictoryScope { .. }))
        ));
    }

    #[test]
    fn test_schema_error_reported() {
        let result = Prd::from_yaml("stories: 3\n");
        assert!(matches!(result, Err(PrdError::SchemaError(_))));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prd.json");
        std::fs::write(
            &path,
            r#"{"stories":[{"id":"A","title":"t","gateFile":"g.yaml"}]}"#,
        )
        .unwrap();
        let prd = Prd::from_file(&path).unwrap();
        assert_eq!(prd.stories.len(), 1);
    }
}
