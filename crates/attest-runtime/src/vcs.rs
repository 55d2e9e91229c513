//! Diff statistics for scope checks.

use async_trait::async_trait;
use moka::future::Cache;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use attest_core::{DiffStats, FileChange};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VcsError {
    #[error("Failed to run git: {0}")]
    Spawn(String),

    #[error("git {args} failed: {stderr}")]
    Command { args: String, stderr: String },

    #[error("Unparseable numstat line: {0}")]
    Parse(String),
}

/// Reports which files changed since a base reference.
#[async_trait]
pub trait DiffSource: Send + Sync {
    async fn diff_stats(&self, base_ref: &str) -> Result<DiffStats, VcsError>;
}

/// Diff source backed by the `git` CLI.
///
/// Results are cached per base ref, so concurrent stories checking the same
/// base share one pair of git invocations.
pub struct GitDiffSource {
    repo: PathBuf,
    cache: Cache<String, DiffStats>,
}

impl GitDiffSource {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            cache: Cache::builder()
                .max_capacity(64)
                .time_to_live(Duration::from_secs(600))
                .build(),
        }
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    async fn git(&self, args: &[&str]) -> Result<String, VcsError> {
        let out = Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .output()
            .await
            .map_err(|e| VcsError::Spawn(e.to_string()))?;
        if !out.status.success() {
            return Err(VcsError::Command {
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    async fn compute(&self, base_ref: &str) -> Result<DiffStats, VcsError> {
        let numstat = self.git(&["diff", "--numstat", base_ref]).await?;
        let mut stats = parse_numstat(&numstat)?;

        // Untracked files are changes too; count their lines as added.
        let untracked = self
            .git(&["ls-files", "--others", "--exclude-standard"])
            .await?;
        for path in untracked.lines().map(str::trim).filter(|p| !p.is_empty()) {
            let added = tokio::fs::read_to_string(self.repo.join(path))
                .await
                .map(|content| content.lines().count() as u64)
                .unwrap_or(0);
            stats.files.push(FileChange::new(path, added, 0));
        }

        debug!(
            base_ref,
            files = stats.files.len(),
            lines = stats.total_lines(),
            "Computed diff stats"
        );
        Ok(stats)
    }
}

#[async_trait]
impl DiffSource for GitDiffSource {
    async fn diff_stats(&self, base_ref: &str) -> Result<DiffStats, VcsError> {
        self.cache
            .try_get_with(base_ref.to_string(), self.compute(base_ref))
            .await
            .map_err(|e: Arc<VcsError>| (*e).clone())
    }
}

/// Parse `git diff --numstat` output.
///
/// Binary files report `-` for both counts and count as zero lines.
pub fn parse_numstat(output: &str) -> Result<DiffStats, VcsError> {
    let mut files = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let mut parts = line.splitn(3, '\t');
        let (Some(added), Some(removed), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(VcsError::Parse(line.to_string()));
        };
        let count = |field: &str| -> Result<u64, VcsError> {
            if field == "-" {
                Ok(0)
            } else {
                field.parse().map_err(|_| VcsError::Parse(line.to_string()))
            }
        };
        files.push(FileChange::new(rename_target(path), count(added)?, count(removed)?));
    }
    Ok(DiffStats { files })
}

/// `src/{old => new}.rs` and `old => new` collapse to the new path.
fn rename_target(path: &str) -> String {
    if let Some(open) = path.find('{') {
        if let Some(len) = path[open..].find('}') {
            let close = open + len;
            if let Some((_, new)) = path[open + 1..close].split_once(" => ") {
                let joined = format!("{}{}{}", &path[..open], new, &path[close + 1..]);
                return joined.replace("//", "/");
            }
        }
    }
    match path.split_once(" => ") {
        Some((_, new)) => new.to_string(),
        None => path.to_string(),
    }
}
