//! Single-worker build lane.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::error;

use super::{BuildError, BuildJob, BuildResult, ImageBuilder};

type Reply = oneshot::Sender<BuildResult<()>>;

/// Serializes all image builds onto one worker task.
///
/// Builds are CPU/IO-heavy and the build backend is not safe to run
/// concurrently, so the lane admits at most one build at a time
/// process-wide, in submission order. Submitting suspends only the
/// awaiting task; the rest of the scheduler keeps serving other requests.
/// A queued or running job cannot be revoked.
///
/// Construct once at startup and pass by clone; cloning shares the same
/// lane.
#[derive(Clone)]
pub struct BuildLane {
    tx: mpsc::UnboundedSender<(BuildJob, Reply)>,
}

impl BuildLane {
    /// Spawn the worker task for the given builder.
    pub fn new(builder: Arc<dyn ImageBuilder>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(BuildJob, Reply)>();

        tokio::spawn(async move {
            while let Some((job, reply)) = rx.recv().await {
                let result = builder.build(&job).await;
                if let Err(ref err) = result {
                    error!("build failed for {}: {}", job.tag, err);
                }
                // The submitter may have gone away; the build result is
                // simply dropped then.
                let _ = reply.send(result);
            }
        });

        Self { tx }
    }

    /// Queue a build and wait for it to finish.
    pub async fn submit(&self, job: BuildJob) -> BuildResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((job, reply_tx))
            .map_err(|_| BuildError::LaneClosed)?;
        reply_rx.await.map_err(|_| BuildError::LaneClosed)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::launcher::OwnerIdentity;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn job(tag: &str) -> BuildJob {
        BuildJob {
            tag: tag.to_string(),
            repo_url: "https://example.com/r.git".to_string(),
            commit: "abc123".to_string(),
            owner: OwnerIdentity::default(),
        }
    }

    #[derive(Default)]
    struct TrackingBuilder {
        active: AtomicUsize,
        max_active: AtomicUsize,
        order: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ImageBuilder for TrackingBuilder {
        async fn build(&self, job: &BuildJob) -> BuildResult<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(20)).await;
            self.order.lock().unwrap().push(job.tag.clone());

            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(BuildError::BuilderFailed {
                    command: "fake".to_string(),
                    tag: job.tag.clone(),
                    message: "boom".to_string(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_submissions_never_overlap() {
        let builder = Arc::new(TrackingBuilder::default());
        let lane = BuildLane::new(builder.clone());

        let (a, b, c) = tokio::join!(
            lane.submit(job("tag-a")),
            lane.submit(job("tag-b")),
            lane.submit(job("tag-c")),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(builder.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(builder.order.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn submissions_run_in_order() {
        let builder = Arc::new(TrackingBuilder::default());
        let lane = BuildLane::new(builder.clone());

        // Sequential submits from one task must complete FIFO.
        lane.submit(job("first")).await.unwrap();
        lane.submit(job("second")).await.unwrap();

        let order = builder.order.lock().unwrap();
        assert_eq!(order.as_slice(), ["first", "second"]);
    }

    #[tokio::test]
    async fn builder_failure_reaches_the_submitter() {
        let builder = Arc::new(TrackingBuilder {
            fail: true,
            ..Default::default()
        });
        let lane = BuildLane::new(builder);

        let err = lane.submit(job("tag-x")).await.unwrap_err();
        assert!(matches!(err, BuildError::BuilderFailed { .. }));
    }
}
