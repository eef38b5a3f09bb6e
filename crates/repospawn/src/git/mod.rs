//! Remote repository ref resolution.
//!
//! Resolves a mutable branch or tag name against a remote's ref listing to
//! a commit hash. Resolution is best-effort by design: an unreachable
//! remote or an unknown ref degrades to documented fallbacks instead of
//! failing the request.

use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Result type for remote ref operations.
pub type GitResult<T> = Result<T, GitError>;

/// Errors that can occur while querying a remote repository.
#[derive(Debug, Error)]
pub enum GitError {
    /// The git process could not be started at all. A process that runs
    /// and exits non-zero is not an error; see [`RemoteRefs::ls_remote`].
    #[error("git {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single entry from a remote ref listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    /// Commit hash.
    pub hash: String,
    /// Fully-qualified ref name, e.g. `refs/heads/main`.
    pub name: String,
}

/// Remote ref listing collaborator.
#[async_trait]
pub trait RemoteRefs: Send + Sync {
    /// Return the raw `<hash>\t<fully-qualified-ref>` listing for a
    /// repository.
    ///
    /// A query that exits non-zero yields whatever partial output was
    /// captured rather than an error; callers must treat the listing as
    /// best-effort. Only failure to run the query at all is an error.
    async fn ls_remote(&self, url: &str) -> GitResult<String>;
}

/// `git` CLI implementation of [`RemoteRefs`].
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Create a client using the `git` binary from PATH.
    pub fn new() -> Self {
        Self {
            binary: "git".to_string(),
        }
    }

    /// Create a client with a custom git binary path.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl RemoteRefs for GitCli {
    async fn ls_remote(&self, url: &str) -> GitResult<String> {
        let output = Command::new(&self.binary)
            .args(["ls-remote", url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| GitError::CommandFailed {
                command: "ls-remote".to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "git ls-remote {} exited non-zero, using partial output: {}",
                url,
                stderr.trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Parse a raw listing into (hash, fully-qualified ref) entries.
///
/// Lines without a tab separator are skipped.
fn parse_listing(raw: &str) -> Vec<RemoteRef> {
    raw.lines()
        .filter_map(|line| {
            let (hash, name) = line.split_once('\t')?;
            if hash.is_empty() || name.is_empty() {
                return None;
            }
            Some(RemoteRef {
                hash: hash.to_string(),
                name: name.trim().to_string(),
            })
        })
        .collect()
}

/// Resolve a branch or tag name to a commit hash.
///
/// A listing entry matches if its fully-qualified name equals
/// `refs/heads/<reference>` or `refs/tags/<reference>`. When nothing
/// matches but the listing is non-empty, the hash of the first listed
/// entry is returned; the listing's ordering is not a contract, so this is
/// a weak heuristic, not a guarantee. An empty listing (unreachable remote
/// or repository without refs) returns `reference` unchanged. The result
/// is therefore best-effort, not guaranteed immutable.
pub async fn resolve_ref(
    remote: &dyn RemoteRefs,
    url: &str,
    reference: &str,
) -> GitResult<String> {
    let raw = remote.ls_remote(url).await?;

    let branch = format!("refs/heads/{reference}");
    let tag = format!("refs/tags/{reference}");

    for entry in parse_listing(&raw) {
        if entry.name == branch || entry.name == tag {
            debug!("resolved {} {} -> {}", url, reference, entry.hash);
            return Ok(entry.hash);
        }
    }

    if let Some(first) = raw.split_whitespace().next() {
        debug!(
            "ref {} not found for {}, falling back to first listed entry {}",
            reference, url, first
        );
        return Ok(first.to_string());
    }

    debug!("empty listing for {}, returning {} unresolved", url, reference);
    Ok(reference.to_string())
}
