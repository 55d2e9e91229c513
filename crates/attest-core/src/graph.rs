//! Dependency graph over stories.
//!
//! Construction validates the graph (unique ids, known dependencies, no
//! cycles) and groups stories into levels. Stories within a level have no
//! dependency relationship and may run concurrently; levels run in order.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::ConfigError;
use crate::prd::Story;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Resolved,
}

/// Validated dependency graph with precomputed levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Story ids in declaration order
    order: Vec<String>,
    dependencies: BTreeMap<String, Vec<String>>,
    levels: Vec<Vec<String>>,
}

impl DependencyGraph {
    /// Validate `stories` and build their levels.
    pub fn new(stories: &[Story]) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for story in stories {
            if !seen.insert(story.id.as_str()) {
                return Err(ConfigError::DuplicateStoryId(story.id.clone()));
            }
        }

        for story in stories {
            if let Some(missing) = story.depends_on.iter().find(|d| !seen.contains(d.as_str())) {
                return Err(ConfigError::UnknownDependency {
                    story: story.id.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        let order: Vec<String> = stories.iter().map(|s| s.id.clone()).collect();
        let dependencies: BTreeMap<String, Vec<String>> = stories
            .iter()
            .map(|s| (s.id.clone(), s.depends_on.clone()))
            .collect();

        detect_cycles(&order, &dependencies)?;
        let levels = build_levels(&order, &dependencies);

        Ok(Self {
            order,
            dependencies,
            levels,
        })
    }

    /// Levels in execution order; ids within a level keep declaration order.
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    /// Direct dependencies of a story.
    pub fn dependencies(&self, id: &str) -> &[String] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Story ids in declaration order.
    pub fn story_ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn detect_cycles(
    order: &[String],
    dependencies: &BTreeMap<String, Vec<String>>,
) -> Result<(), ConfigError> {
    fn visit<'a>(
        id: &'a str,
        dependencies: &'a BTreeMap<String, Vec<String>>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), ConfigError> {
        match marks.get(id) {
            Some(Mark::Resolved) => return Ok(()),
            Some(Mark::Visiting) => {
                // Report the cycle itself, not the path that led to it.
                let start = path.iter().position(|p| *p == id).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|p| (*p).to_string()).collect();
                cycle.push(id.to_string());
                return Err(ConfigError::Cycle { path: cycle });
            }
            None => {}
        }

        marks.insert(id, Mark::Visiting);
        path.push(id);
        if let Some(deps) = dependencies.get(id) {
            for dep in deps {
                visit(dep, dependencies, marks, path)?;
            }
        }
        path.pop();
        marks.insert(id, Mark::Resolved);
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut path = Vec::new();
    for id in order {
        visit(id, dependencies, &mut marks, &mut path)?;
    }
    Ok(())
}

/// Group an acyclic graph into levels by repeated scanning.
fn build_levels(
    order: &[String],
    dependencies: &BTreeMap<String, Vec<String>>,
) -> Vec<Vec<String>> {
    let mut resolved: HashSet<&str> = HashSet::new();
    let mut levels = Vec::new();

    while resolved.len() < order.len() {
        let level: Vec<&str> = order
            .iter()
            .map(String::as_str)
            .filter(|id| !resolved.contains(id))
            .filter(|id| {
                dependencies
                    .get(*id)
                    .map(|deps| deps.iter().all(|d| resolved.contains(d.as_str())))
                    .unwrap_or(true)
            })
            .collect();

        // Unreachable for a validated graph; guards against looping forever.
        if level.is_empty() {
            break;
        }
        resolved.extend(level.iter().copied());
        levels.push(level.into_iter().map(str::to_string).collect());
    }

    levels
}
