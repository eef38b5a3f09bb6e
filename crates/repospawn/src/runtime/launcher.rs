//! Session launch adapter.
//!
//! The launcher is the last step of a start request: it consumes a
//! [`LaunchContext`] exactly once and starts a container session from the
//! already-present image.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ContainerResult, ContainerRuntime};

/// Identity the session runs under inside the container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnerIdentity {
    /// Numeric user id.
    pub uid: u32,
    /// User name the builder bakes into the image.
    pub name: String,
}

impl Default for OwnerIdentity {
    fn default() -> Self {
        Self {
            uid: 1000,
            name: "dev".to_string(),
        }
    }
}

/// Everything needed to start one session.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    /// Image to start the session from.
    pub image_tag: String,
    /// Identity the session runs under.
    pub owner: OwnerIdentity,
    /// Replaces the image's default command when non-empty.
    pub command: Vec<String>,
    /// Optional container name.
    pub name: Option<String>,
}

/// A started container session.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchedSession {
    /// Container id reported by the runtime.
    pub container_id: String,
    /// Image the session was started from.
    pub image_tag: String,
}

/// Launch collaborator surface.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    /// Start a container session. Consumes the context.
    async fn launch(&self, ctx: LaunchContext) -> ContainerResult<LaunchedSession>;
}

/// Docker/Podman-backed launcher.
///
/// Sessions are ephemeral: containers are started detached with `--rm` so
/// stopped containers never accumulate.
pub struct ContainerLauncher {
    runtime: ContainerRuntime,
}

impl ContainerLauncher {
    pub fn new(runtime: ContainerRuntime) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl SessionLauncher for ContainerLauncher {
    async fn launch(&self, ctx: LaunchContext) -> ContainerResult<LaunchedSession> {
        info!(
            "Launching session with image {} for {}",
            ctx.image_tag, ctx.owner.name
        );

        let container_id = self
            .runtime
            .run_detached(
                &ctx.image_tag,
                &ctx.owner.uid.to_string(),
                ctx.name.as_deref(),
                &ctx.command,
            )
            .await?;

        Ok(LaunchedSession {
            container_id,
            image_tag: ctx.image_tag,
        })
    }
}
