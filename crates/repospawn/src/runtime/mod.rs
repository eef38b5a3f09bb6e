//! Container runtime access.
//!
//! Async interface to the local image store and container start via the
//! Docker or Podman CLI. The runtime is auto-detected or can be configured
//! explicitly.

mod error;
pub mod launcher;

pub use error::{ContainerError, ContainerResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Docker runtime.
    #[default]
    Docker,
    /// Podman runtime.
    Podman,
}

impl RuntimeType {
    /// Get the default binary name for this runtime.
    pub fn default_binary(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "docker"),
            RuntimeType::Podman => write!(f, "podman"),
        }
    }
}

/// Image metadata returned by `image inspect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageInfo {
    /// Image ID.
    #[serde(alias = "Id")]
    pub id: String,

    /// Tags pointing at this image.
    #[serde(default)]
    pub repo_tags: Vec<String>,

    /// Creation timestamp.
    #[serde(default)]
    pub created: String,
}

/// Read-only image store probe.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Look up an image in the local store.
    ///
    /// `Ok(None)` strictly means the runtime reported the image as not
    /// found; daemon or CLI failures are propagated as errors, never
    /// masked as absence.
    async fn inspect_image(&self, tag: &str) -> ContainerResult<Option<ImageInfo>>;
}

/// Container runtime client.
///
/// Supports both Docker and Podman with automatic detection.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    runtime_type: RuntimeType,
    binary: String,
}

impl Default for ContainerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime {
    /// Create a new container runtime with auto-detection.
    ///
    /// Tries Docker first, then falls back to Podman.
    pub fn new() -> Self {
        if Self::is_binary_available("docker") {
            Self {
                runtime_type: RuntimeType::Docker,
                binary: "docker".to_string(),
            }
        } else if Self::is_binary_available("podman") {
            Self {
                runtime_type: RuntimeType::Podman,
                binary: "podman".to_string(),
            }
        } else {
            // Fall back to docker, will fail at runtime
            Self {
                runtime_type: RuntimeType::Docker,
                binary: "docker".to_string(),
            }
        }
    }

    /// Create a container runtime with a specific type.
    pub fn with_type(runtime_type: RuntimeType) -> Self {
        Self {
            binary: runtime_type.default_binary().to_string(),
            runtime_type,
        }
    }

    /// Create a container runtime with a custom binary path.
    pub fn with_binary(runtime_type: RuntimeType, binary: impl Into<String>) -> Self {
        Self {
            runtime_type,
            binary: binary.into(),
        }
    }

    /// Get the runtime type.
    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    /// Check if a binary is available in PATH.
    fn is_binary_available(name: &str) -> bool {
        std::process::Command::new("which")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Start a detached, auto-removed container and return its id.
    ///
    /// A non-empty `command` replaces the image's default command.
    pub async fn run_detached(
        &self,
        image: &str,
        user: &str,
        name: Option<&str>,
        command: &[String],
    ) -> ContainerResult<String> {
        validate_image_name(image)?;

        let mut args: Vec<String> = vec![
            "run".to_string(),
            "-d".to_string(),
            "--rm".to_string(),
            "--user".to_string(),
            user.to_string(),
        ];

        if let Some(name) = name {
            args.push("--name".to_string());
            args.push(name.to_string());
        }

        args.push(image.to_string());
        args.extend(command.iter().cloned());

        let output = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: "run".to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::CommandFailed {
                command: "run".to_string(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ImageStore for ContainerRuntime {
    async fn inspect_image(&self, tag: &str) -> ContainerResult<Option<ImageInfo>> {
        validate_image_name(tag)?;

        let output = Command::new(&self.binary)
            .args(["image", "inspect", "--format", "json", tag])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: "image inspect".to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_image_not_found(&stderr) {
                debug!("image {} not present in local store", tag);
                return Ok(None);
            }
            return Err(ContainerError::CommandFailed {
                command: "image inspect".to_string(),
                message: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let infos: Vec<ImageInfo> = serde_json::from_str(&stdout)
            .map_err(|e| ContainerError::ParseError(e.to_string()))?;

        Ok(infos.into_iter().next())
    }
}

/// Not-found markers emitted by docker and podman `image inspect`.
fn is_image_not_found(stderr: &str) -> bool {
    let msg = stderr.to_ascii_lowercase();
    msg.contains("no such image")
        || msg.contains("image not known")
        || msg.contains("failed to find image")
}

/// Validate a Docker/OCI image name.
///
/// Image names follow the pattern: `[registry/][namespace/]name[:tag][@digest]`
/// Valid characters: alphanumeric, `.`, `-`, `_`, `/`, `:`, `@`
pub fn validate_image_name(image: &str) -> ContainerResult<()> {
    if image.is_empty() {
        return Err(ContainerError::InvalidInput(
            "image name cannot be empty".to_string(),
        ));
    }

    if image.len() > 256 {
        return Err(ContainerError::InvalidInput(
            "image name exceeds maximum length of 256 characters".to_string(),
        ));
    }

    let valid_chars = |c: char| {
        c.is_ascii_alphanumeric()
            || c == '.'
            || c == '-'
            || c == '_'
            || c == '/'
            || c == ':'
            || c == '@'
    };

    if !image.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "image name '{}' contains invalid characters; only alphanumeric, '.', '-', '_', '/', ':', '@' are allowed",
            image
        )));
    }

    if image.contains("..") {
        return Err(ContainerError::InvalidInput(
            "image name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::derive_tag;

    #[test]
    fn validate_image_name_valid() {
        assert!(validate_image_name("ubuntu").is_ok());
        assert!(validate_image_name("ubuntu:latest").is_ok());
        assert!(validate_image_name("myregistry.io/myimage:v1.0").is_ok());
        assert!(validate_image_name("gcr.io/project/image@sha256:abc123").is_ok());
        assert!(validate_image_name("my-image_v1").is_ok());
    }

    #[test]
    fn validate_image_name_invalid() {
        assert!(validate_image_name("").is_err());
        assert!(validate_image_name("image with spaces").is_err());
        assert!(validate_image_name("image;rm -rf /").is_err());
        assert!(validate_image_name("image$(whoami)").is_err());
        assert!(validate_image_name("../../../etc/passwd").is_err());
    }

    #[test]
    fn derived_tags_pass_image_name_validation() {
        let tag = derive_tag("git@github.com:Owner/Repo.git", "abc123");
        assert!(validate_image_name(&tag).is_ok());
    }

    #[test]
    fn not_found_markers_cover_docker_and_podman() {
        assert!(is_image_not_found("Error: No such image: repospawn-x:abc"));
        assert!(is_image_not_found(
            "Error: repospawn-x:abc: image not known"
        ));
        assert!(is_image_not_found(
            "Error: failed to find image repospawn-x:abc"
        ));
        assert!(!is_image_not_found(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock"
        ));
    }

    #[test]
    fn runtime_type_binaries() {
        assert_eq!(RuntimeType::Docker.default_binary(), "docker");
        assert_eq!(RuntimeType::Podman.default_binary(), "podman");
    }
}
