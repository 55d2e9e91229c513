//! Scope rules: which files a story may touch, and how much.
//!
//! Pattern matching is intentionally simple and is NOT full glob syntax:
//! - `dir/**` matches anything under `dir/`
//! - `*suffix` matches paths ending in `suffix`
//! - `prefix*` matches paths starting with `prefix`
//! - anything else is a plain prefix match

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Paths no story may touch unless it explicitly allow-lists them.
pub const DEFAULT_FORBIDDEN_PATHS: &[&str] = &[
    ".git/",
    "node_modules/",
    "target/",
    "dist/",
    "build/",
    ".env",
    "*.lock",
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
];

/// File and size constraints for a story.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    #[serde(default)]
    pub allowed_paths: Vec<String>,

    #[serde(default)]
    pub forbidden_paths: Vec<String>,

    #[serde(default)]
    pub max_changed_files: Option<usize>,

    #[serde(default)]
    pub max_changed_lines: Option<u64>,
}

/// One changed file in a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub added: u64,
    pub removed: u64,
}

impl FileChange {
    pub fn new(path: impl Into<String>, added: u64, removed: u64) -> Self {
        Self {
            path: path.into(),
            added,
            removed,
        }
    }
}

/// Files and line counts changed since a base reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub files: Vec<FileChange>,
}

impl DiffStats {
    pub fn total_lines(&self) -> u64 {
        self.files.iter().map(|f| f.added + f.removed).sum()
    }
}

/// A single scope breach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScopeViolation {
    /// File matches a forbidden pattern (explicit or default)
    Forbidden { path: String, pattern: String },

    /// File is outside a declared allow-list
    OutsideAllowed { path: String },

    TooManyFiles { changed: usize, max: usize },

    TooManyLines { changed: u64, max: u64 },
}

impl fmt::Display for ScopeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeViolation::Forbidden { path, pattern } => {
                write!(f, "{} matches forbidden pattern '{}'", path, pattern)
            }
            ScopeViolation::OutsideAllowed { path } => {
                write!(f, "{} is outside the allowed paths", path)
            }
            ScopeViolation::TooManyFiles { changed, max } => {
                write!(f, "{} files changed (max {})", changed, max)
            }
            ScopeViolation::TooManyLines { changed, max } => {
                write!(f, "{} lines changed (max {})", changed, max)
            }
        }
    }
}

/// Check whether `path` matches a scope pattern.
pub fn matches_pattern(path: &str, pattern: &str) -> bool {
    let path = path.trim_start_matches("./");
    let pattern = pattern.trim_start_matches("./");

    if let Some(dir) = pattern.strip_suffix("/**") {
        return path == dir || path.starts_with(&format!("{}/", dir));
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return path.ends_with(suffix);
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return path.starts_with(prefix);
    }
    path.starts_with(pattern)
}

/// Normalized form used to compare patterns literally.
fn normalize_pattern(pattern: &str) -> &str {
    let pattern = pattern.trim().trim_start_matches("./");
    let pattern = pattern
        .strip_suffix("/**")
        .or_else(|| pattern.strip_suffix("/*"))
        .unwrap_or(pattern);
    pattern.trim_end_matches('/')
}

impl Scope {
    /// Reject patterns present in both allowed and forbidden sets.
    pub fn check_contradictions(&self, story: &str) -> Result<(), ConfigError> {
        for forbidden in &self.forbidden_paths {
            let normalized = normalize_pattern(forbidden);
            if self
                .allowed_paths
                .iter()
                .any(|allowed| normalize_pattern(allowed) == normalized)
            {
                return Err(ConfigError::ContradictoryScope {
                    story: story.to_string(),
                    pattern: forbidden.clone(),
                });
            }
        }
        Ok(())
    }

    fn is_allowed(&self, path: &str) -> bool {
        self.allowed_paths.iter().any(|p| matches_pattern(path, p))
    }

    fn forbidden_match(&self, path: &str) -> Option<String> {
        if let Some(p) = self
            .forbidden_paths
            .iter()
            .find(|p| matches_pattern(path, p))
        {
            return Some(p.clone());
        }
        if self.is_allowed(path) {
            return None;
        }
        DEFAULT_FORBIDDEN_PATHS
            .iter()
            .find(|p| matches_pattern(path, p))
            .map(|p| (*p).to_string())
    }

    /// Validate a diff against this scope, returning every violation.
    ///
    /// Each file yields at most one path violation. The file and line
    /// budgets count only files that passed the path checks; files already
    /// flagged are not charged against them.
    pub fn validate(&self, diff: &DiffStats) -> Vec<ScopeViolation> {
        let mut violations = Vec::new();
        let mut in_scope_files = 0usize;
        let mut in_scope_lines = 0u64;

        for file in &diff.files {
            if let Some(pattern) = self.forbidden_match(&file.path) {
                violations.push(ScopeViolation::Forbidden {
                    path: file.path.clone(),
                    pattern,
                });
            } else if !self.allowed_paths.is_empty() && !self.is_allowed(&file.path) {
                violations.push(ScopeViolation::OutsideAllowed {
                    path: file.path.clone(),
                });
            } else {
                in_scope_files += 1;
                in_scope_lines += file.added + file.removed;
            }
        }

        if let Some(max) = self.max_changed_files {
            if in_scope_files > max {
                violations.push(ScopeViolation::TooManyFiles {
                    changed: in_scope_files,
                    max,
                });
            }
        }

        if let Some(max) = self.max_changed_lines {
            if in_scope_lines > max {
                violations.push(ScopeViolation::TooManyLines {
                    changed: in_scope_lines,
                    max,
                });
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(paths: &[&str]) -> DiffStats {
        DiffStats {
            files: paths.iter().map(|p| FileChange::new(*p, 1, 0)).collect(),
        }
    }

    #[test]
    fn test_pattern_forms() {
        assert!(matches_pattern("src/lib/a.rs", "src/**"));
        assert!(!matches_pattern("srcx/a.rs", "src/**"));
        assert!(matches_pattern("Cargo.lock", "*.lock"));
        assert!(matches_pattern("docs/readme.md", "docs*"));
        assert!(matches_pattern(".env.local", ".env"));
        assert!(matches_pattern("./src/a.rs", "src/"));
    }

    #[test]
    fn test_outside_allow_list_within_file_limit() {
        let scope = Scope {
            allowed_paths: vec!["src/**".to_string()],
            max_changed_files: Some(2),
            ..Default::default()
        };
        let violations = scope.validate(&diff(&["src/a.ts", "src/b.ts", "package.json"]));

        assert_eq!(
            violations,
            vec![ScopeViolation::OutsideAllowed {
                path: "package.json".to_string()
            }]
        );
    }

    #[test]
    fn test_file_limit_exceeded() {
        let scope = Scope {
            max_changed_files: Some(1),
            ..Default::default()
        };
        let violations = scope.validate(&diff(&["a.rs", "b.rs"]));
        assert_eq!(
            violations,
            vec![ScopeViolation::TooManyFiles { changed: 2, max: 1 }]
        );
    }

    #[test]
    fn test_default_forbidden_paths() {
        let scope = Scope::default();
        let violations =
            scope.validate(&diff(&["src/main.rs", "node_modules/x/index.js", "yarn.lock"]));
        assert_eq!(violations.len(), 2);
        assert!(matches!(
            &violations[0],
            ScopeViolation::Forbidden { pattern, .. } if pattern == "node_modules/"
        ));
    }

    #[test]
    fn test_allow_list_overrides_default_deny() {
        let scope = Scope {
            allowed_paths: vec!["dist/public/**".to_string()],
            ..Default::default()
        };
        assert!(scope.validate(&diff(&["dist/public/app.js"])).is_empty());
        assert_eq!(scope.validate(&diff(&["dist/private/app.js"])).len(), 1);
    }

    #[test]
    fn test_explicit_forbidden_wins_over_allowed() {
        let scope = Scope {
            allowed_paths: vec!["src/**".to_string()],
            forbidden_paths: vec!["src/generated/".to_string()],
            ..Default::default()
        };
        let violations = scope.validate(&diff(&["src/generated/api.rs"]));
        assert_eq!(violations.len(), 1);
        assert!(matches!(violations[0], ScopeViolation::Forbidden { .. }));
    }

    #[test]
    fn test_line_limit() {
        let scope = Scope {
            max_changed_lines: Some(10),
            ..Default::default()
        };
        let stats = DiffStats {
            files: vec![FileChange::new("a.rs", 8, 4)],
        };
        assert_eq!(
            scope.validate(&stats),
            vec![ScopeViolation::TooManyLines { changed: 12, max: 10 }]
        );
    }

    #[test]
    fn test_contradictory_patterns() {
        let scope = Scope {
            allowed_paths: vec!["src/**".to_string()],
            forbidden_paths: vec!["src/".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            scope.check_contradictions("S1"),
            Err(ConfigError::ContradictoryScope { .. })
        ));

        let fine = Scope {
            allowed_paths: vec!["src/**".to_string()],
            forbidden_paths: vec!["src/secrets/".to_string()],
            ..Default::default()
        };
        assert!(fine.check_contradictions("S1").is_ok());
    }
}
