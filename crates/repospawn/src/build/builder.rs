//! External builder collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

use super::{BuildError, BuildJob, BuildResult};

/// Builder collaborator: produces an image under `job.tag`.
///
/// Builds may take an unbounded amount of time; failure is surfaced with
/// builder-specific detail and no partial-image cleanup is attempted.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, job: &BuildJob) -> BuildResult<()>;
}

/// Configuration for the external builder binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// repo2docker-compatible binary to invoke.
    pub binary: String,
    /// Extra arguments appended before the repository URL.
    pub extra_args: Vec<String>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            binary: "repo2docker".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// CLI implementation of [`ImageBuilder`].
pub struct BuilderCli {
    config: BuilderConfig,
}

impl BuilderCli {
    pub fn new(config: BuilderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ImageBuilder for BuilderCli {
    async fn build(&self, job: &BuildJob) -> BuildResult<()> {
        info!(
            "Building image {} from {} at {}",
            job.tag, job.repo_url, job.commit
        );

        let mut cmd = Command::new(&self.config.binary);
        cmd.args(["--ref", &job.commit])
            .args(["--user-id", &job.owner.uid.to_string()])
            .args(["--user-name", &job.owner.name])
            .args(["--image-name", &job.tag])
            .arg("--no-run");
        for arg in &self.config.extra_args {
            cmd.arg(arg);
        }
        cmd.arg(&job.repo_url);

        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BuildError::BuilderFailed {
                command: self.config.binary.clone(),
                tag: job.tag.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildError::BuilderFailed {
                command: self.config.binary.clone(),
                tag: job.tag.clone(),
                message: stderr.trim().to_string(),
            });
        }

        info!("Built image {}", job.tag);
        Ok(())
    }
}
