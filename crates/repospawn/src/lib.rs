//! Repository-to-container launch library.
//!
//! Given a repository URL and a mutable ref (branch or tag), this crate
//! resolves the ref to a commit, derives a deterministic image tag for that
//! repository state, checks the local image store for it, builds the image
//! through an external builder if it is missing, and starts a container
//! session from it. Builds are serialized onto a single worker lane so a
//! long build never blocks the rest of the process.

pub mod build;
pub mod git;
pub mod image;
pub mod profiles;
pub mod runtime;
pub mod spawner;
