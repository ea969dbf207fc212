#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, ThreadId};
use std::time::Duration;

use jobqueue::{Job, JobManager, ManagerConfig};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time;

/// Counts how often each hook ran, and where the cancellation hook ran.
#[derive(Clone, Default)]
pub struct DummyJob {
    pub counts: Arc<Counts>,
}

#[derive(Default)]
pub struct Counts {
    pub added: AtomicUsize,
    pub runs: AtomicUsize,
    pub cancels: AtomicUsize,
    pub cancelled_on: Mutex<Option<ThreadId>>,
}

impl Counts {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl Job for DummyJob {
    fn on_added(&self) {
        self.counts.added.fetch_add(1, Ordering::SeqCst);
    }

    fn on_run(&self) -> anyhow::Result<()> {
        self.counts.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_cancel(&self) {
        *self.counts.cancelled_on.lock() = Some(thread::current().id());
        self.counts.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// A job that reports when it starts running, then blocks until released.
pub struct BlockingJob {
    pub inner: DummyJob,
    started: Mutex<Option<oneshot::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
}

pub struct BlockingJobHandles {
    pub started: oneshot::Receiver<()>,
    pub release: mpsc::Sender<()>,
}

impl BlockingJob {
    pub fn new() -> (Self, BlockingJobHandles) {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let job = Self {
            inner: DummyJob::default(),
            started: Mutex::new(Some(started_tx)),
            release: Mutex::new(release_rx),
        };
        (
            job,
            BlockingJobHandles {
                started: started_rx,
                release: release_tx,
            },
        )
    }
}

impl Job for BlockingJob {
    fn on_run(&self) -> anyhow::Result<()> {
        self.inner.on_run()?;
        if let Some(started) = self.started.lock().take() {
            let _ = started.send(());
        }
        let _ = self.release.lock().recv();
        Ok(())
    }

    fn on_cancel(&self) {
        self.inner.on_cancel();
    }
}

pub fn create_job_manager() -> JobManager {
    JobManager::new(ManagerConfig {
        idle_recheck_ms: 20,
        ..Default::default()
    })
    .unwrap()
}

/// A manager whose consumers never claimed anything, so every job added stays
/// queued until `start`.
pub fn create_stopped_job_manager() -> JobManager {
    JobManager::new(ManagerConfig {
        idle_recheck_ms: 20,
        start_stopped: true,
        ..Default::default()
    })
    .unwrap()
}

/// Polls `condition` until it holds, failing the test after a few seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    time::timeout(Duration::from_secs(5), async {
        while !condition() {
            time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}
