//! Build-and-launch orchestration.
//!
//! One start request flows through five strictly sequential steps:
//! resolve the ref, derive the image tag, probe the image store, build on
//! a miss, launch. Resolution and probing for different requests may
//! interleave freely; builds are totally ordered by the shared
//! [`BuildLane`]. No step retries and no timeout is imposed here.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::build::{BuildError, BuildJob, BuildLane};
use crate::git::{self, GitError, RemoteRefs};
use crate::image;
use crate::runtime::launcher::{
    LaunchContext, LaunchedSession, OwnerIdentity, SessionLauncher,
};
use crate::runtime::{ContainerError, ImageStore};

/// Result type for start requests.
pub type SpawnResult<T> = Result<T, SpawnError>;

/// Terminal failure of a start request, tagged with the step that failed.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// Required repository URL missing; raised before any remote call.
    #[error("repository URL is not configured")]
    MissingRepository,

    /// Ref resolution failed outright (the query could not run at all).
    #[error("resolving ref {reference} for {url}: {source}")]
    Resolve {
        url: String,
        reference: String,
        source: GitError,
    },

    /// The image-store probe failed for a reason other than not-found.
    #[error("probing image {tag}: {source}")]
    Probe {
        tag: String,
        source: ContainerError,
    },

    /// The builder collaborator failed; surfaced verbatim, no cleanup.
    #[error("building image {tag}: {source}")]
    Build { tag: String, source: BuildError },

    /// The launch collaborator failed.
    #[error("launching image {tag}: {source}")]
    Launch {
        tag: String,
        source: ContainerError,
    },
}

/// One start request. Immutable once submitted.
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// Repository URL. Must be non-empty.
    pub repo_url: String,
    /// Mutable ref (branch or tag name) to resolve.
    pub reference: String,
    /// Identity the session runs under.
    pub owner: OwnerIdentity,
    /// Replaces the image's default command when non-empty.
    pub command: Vec<String>,
    /// Optional container name for the session.
    pub container_name: Option<String>,
}

/// Build-and-launch orchestrator.
///
/// All collaborators are injected; the [`BuildLane`] in particular is
/// constructed once at process start and shared, which is what guarantees
/// one build at a time system-wide.
pub struct Spawner {
    remote: Arc<dyn RemoteRefs>,
    images: Arc<dyn ImageStore>,
    lane: BuildLane,
    launcher: Arc<dyn SessionLauncher>,
}

impl Spawner {
    pub fn new(
        remote: Arc<dyn RemoteRefs>,
        images: Arc<dyn ImageStore>,
        lane: BuildLane,
        launcher: Arc<dyn SessionLauncher>,
    ) -> Self {
        Self {
            remote,
            images,
            lane,
            launcher,
        }
    }

    /// Ensure an image exists for the requested repository state and start
    /// a session from it.
    pub async fn start(&self, request: &StartRequest) -> SpawnResult<LaunchedSession> {
        if request.repo_url.trim().is_empty() {
            return Err(SpawnError::MissingRepository);
        }

        let commit = git::resolve_ref(
            self.remote.as_ref(),
            &request.repo_url,
            &request.reference,
        )
        .await
        .map_err(|source| SpawnError::Resolve {
            url: request.repo_url.clone(),
            reference: request.reference.clone(),
            source,
        })?;

        let tag = image::derive_tag(&request.repo_url, &commit);

        let existing = self
            .images
            .inspect_image(&tag)
            .await
            .map_err(|source| SpawnError::Probe {
                tag: tag.clone(),
                source,
            })?;

        if existing.is_none() {
            info!("Image {} not present, building", tag);
            let job = BuildJob {
                tag: tag.clone(),
                repo_url: request.repo_url.clone(),
                commit,
                owner: request.owner.clone(),
            };
            self.lane
                .submit(job)
                .await
                .map_err(|source| SpawnError::Build {
                    tag: tag.clone(),
                    source,
                })?;
        }

        let ctx = LaunchContext {
            image_tag: tag.clone(),
            owner: request.owner.clone(),
            command: request.command.clone(),
            name: request.container_name.clone(),
        };

        self.launcher
            .launch(ctx)
            .await
            .map_err(|source| SpawnError::Launch { tag, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildResult, ImageBuilder};
    use crate::git::GitResult;
    use crate::runtime::{ContainerResult, ImageInfo};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeRemote {
        listing: String,
        calls: AtomicUsize,
    }

    impl FakeRemote {
        fn new(listing: &str) -> Self {
            Self {
                listing: listing.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteRefs for FakeRemote {
        async fn ls_remote(&self, _url: &str) -> GitResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.listing.clone())
        }
    }

    enum StoreBehavior {
        Hit,
        Miss,
        Fail,
    }

    struct FakeStore {
        behavior: StoreBehavior,
    }

    #[async_trait]
    impl ImageStore for FakeStore {
        async fn inspect_image(&self, tag: &str) -> ContainerResult<Option<ImageInfo>> {
            match self.behavior {
                StoreBehavior::Hit => Ok(Some(ImageInfo {
                    id: "sha256:feedbeef".to_string(),
                    repo_tags: vec![tag.to_string()],
                    created: String::new(),
                })),
                StoreBehavior::Miss => Ok(None),
                StoreBehavior::Fail => Err(ContainerError::CommandFailed {
                    command: "image inspect".to_string(),
                    message: "cannot connect to the daemon".to_string(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct FakeBuilder {
        built: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ImageBuilder for FakeBuilder {
        async fn build(&self, job: &BuildJob) -> BuildResult<()> {
            self.built.lock().unwrap().push(job.tag.clone());
            if self.fail {
                return Err(BuildError::BuilderFailed {
                    command: "fake-builder".to_string(),
                    tag: job.tag.clone(),
                    message: "builder exploded".to_string(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        launched: Mutex<Vec<LaunchContext>>,
    }

    #[async_trait]
    impl SessionLauncher for FakeLauncher {
        async fn launch(&self, ctx: LaunchContext) -> ContainerResult<LaunchedSession> {
            let tag = ctx.image_tag.clone();
            self.launched.lock().unwrap().push(ctx);
            Ok(LaunchedSession {
                container_id: "fake-container-id".to_string(),
                image_tag: tag,
            })
        }
    }

    fn request() -> StartRequest {
        StartRequest {
            repo_url: "https://example.com/r.git".to_string(),
            reference: "main".to_string(),
            owner: OwnerIdentity::default(),
            command: vec!["session-shell".to_string()],
            container_name: None,
        }
    }

    fn spawner(
        remote: Arc<FakeRemote>,
        store: StoreBehavior,
        builder: Arc<FakeBuilder>,
        launcher: Arc<FakeLauncher>,
    ) -> Spawner {
        Spawner::new(
            remote,
            Arc::new(FakeStore { behavior: store }),
            BuildLane::new(builder),
            launcher,
        )
    }

    const LISTING: &str = "abc123\trefs/heads/main\ndef456\trefs/heads/dev\n";

    #[tokio::test]
    async fn probe_hit_skips_the_build_lane() {
        let builder = Arc::new(FakeBuilder::default());
        let launcher = Arc::new(FakeLauncher::default());
        let s = spawner(
            Arc::new(FakeRemote::new(LISTING)),
            StoreBehavior::Hit,
            builder.clone(),
            launcher.clone(),
        );

        let session = s.start(&request()).await.unwrap();

        assert!(builder.built.lock().unwrap().is_empty());
        assert_eq!(launcher.launched.lock().unwrap().len(), 1);
        assert_eq!(
            session.image_tag,
            "repospawn-https-3a-2f-2fexample-2ecom-2fr-2egit:abc123"
        );
    }

    #[tokio::test]
    async fn probe_miss_builds_exactly_once_before_launch() {
        let builder = Arc::new(FakeBuilder::default());
        let launcher = Arc::new(FakeLauncher::default());
        let s = spawner(
            Arc::new(FakeRemote::new(LISTING)),
            StoreBehavior::Miss,
            builder.clone(),
            launcher.clone(),
        );

        s.start(&request()).await.unwrap();

        let built = builder.built.lock().unwrap();
        let launched = launcher.launched.lock().unwrap();
        assert_eq!(built.len(), 1);
        assert_eq!(launched.len(), 1);
        assert_eq!(built[0], launched[0].image_tag);
    }

    #[tokio::test]
    async fn build_failure_is_surfaced_and_launch_never_happens() {
        let builder = Arc::new(FakeBuilder {
            fail: true,
            ..Default::default()
        });
        let launcher = Arc::new(FakeLauncher::default());
        let s = spawner(
            Arc::new(FakeRemote::new(LISTING)),
            StoreBehavior::Miss,
            builder,
            launcher.clone(),
        );

        let err = s.start(&request()).await.unwrap_err();

        assert!(matches!(err, SpawnError::Build { .. }));
        assert!(launcher.launched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn probe_failure_other_than_not_found_is_fatal() {
        let launcher = Arc::new(FakeLauncher::default());
        let s = spawner(
            Arc::new(FakeRemote::new(LISTING)),
            StoreBehavior::Fail,
            Arc::new(FakeBuilder::default()),
            launcher.clone(),
        );

        let err = s.start(&request()).await.unwrap_err();

        assert!(matches!(err, SpawnError::Probe { .. }));
        assert!(launcher.launched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_repo_url_fails_before_any_remote_call() {
        let remote = Arc::new(FakeRemote::new(LISTING));
        let s = spawner(
            remote.clone(),
            StoreBehavior::Hit,
            Arc::new(FakeBuilder::default()),
            Arc::new(FakeLauncher::default()),
        );

        let mut req = request();
        req.repo_url = "  ".to_string();
        let err = s.start(&req).await.unwrap_err();

        assert!(matches!(err, SpawnError::MissingRepository));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_listing_builds_under_the_literal_ref() {
        let builder = Arc::new(FakeBuilder::default());
        let s = spawner(
            Arc::new(FakeRemote::new("")),
            StoreBehavior::Miss,
            builder.clone(),
            Arc::new(FakeLauncher::default()),
        );

        s.start(&request()).await.unwrap();

        let built = builder.built.lock().unwrap();
        assert!(built[0].ends_with(":main"));
    }

    #[tokio::test]
    async fn repeated_starts_derive_the_identical_tag() {
        let launcher = Arc::new(FakeLauncher::default());
        let s = spawner(
            Arc::new(FakeRemote::new(LISTING)),
            StoreBehavior::Hit,
            Arc::new(FakeBuilder::default()),
            launcher.clone(),
        );

        s.start(&request()).await.unwrap();
        s.start(&request()).await.unwrap();

        let launched = launcher.launched.lock().unwrap();
        assert_eq!(launched[0].image_tag, launched[1].image_tag);
    }
}
