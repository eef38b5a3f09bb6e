//! Image building.
//!
//! The builder itself is an external collaborator (a repo2docker-compatible
//! CLI); this module wraps it behind a trait and serializes every build
//! onto a single worker lane.

mod builder;
mod lane;

pub use builder::{BuilderCli, BuilderConfig, ImageBuilder};
pub use lane::BuildLane;

use thiserror::Error;

use crate::runtime::launcher::OwnerIdentity;

/// Result type for build operations.
pub type BuildResult<T> = Result<T, BuildError>;

/// Errors that can occur while building an image.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The builder collaborator failed; carries its own detail verbatim.
    #[error("builder {command} failed for {tag}: {message}")]
    BuilderFailed {
        command: String,
        tag: String,
        message: String,
    },

    /// The build lane worker is gone; no further builds can run.
    #[error("build lane closed")]
    LaneClosed,

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One image build, created on a probe miss. Lives only until the build
/// completes or fails; never persisted.
#[derive(Debug, Clone)]
pub struct BuildJob {
    /// Output image tag.
    pub tag: String,
    /// Repository URL to build from.
    pub repo_url: String,
    /// Resolved commit to check out.
    pub commit: String,
    /// Identity baked into the image.
    pub owner: OwnerIdentity,
}
