use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use crate::background::BackgroundContext;
use crate::cancel::{CancelCallback, CancelOutcome, CancellationCoordinator};
use crate::config::ManagerConfig;
use crate::consumer::{ConsumerPool, PoolSettings};
use crate::error::{Error, Result};
use crate::queue::{JobQueue, Queues};
use crate::timer::{create_timer, DispatchTimer, TimerDispatcher};
use crate::types::{
    ClaimMarker, IdAllocator, Job, JobHolder, JobId, JobSnapshot, Params,
    SequentialIds,
};

/// Accepts jobs, runs them on a pool of consumers, and cancels them on
/// request.
pub struct JobManager {
    queues: Queues,
    ids: Arc<dyn IdAllocator>,
    coordinator: CancellationCoordinator,
    background: Arc<BackgroundContext>,
    consumers: ConsumerPool,
    timer: Arc<dyn DispatchTimer>,
}

impl JobManager {
    /// Builds a manager with in-memory queues on the current tokio runtime.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        Self::with_parts(
            config,
            Queues::default(),
            Arc::new(SequentialIds::default()),
            &runtime,
        )
    }

    pub fn with_parts(
        config: ManagerConfig,
        queues: Queues,
        ids: Arc<dyn IdAllocator>,
        runtime: &Handle,
    ) -> Result<Self> {
        config.validate()?;

        let background = Arc::new(BackgroundContext::spawn("jobqueue-cancel")?);
        let coordinator =
            CancellationCoordinator::new(queues.clone(), background.clone());
        let consumers = ConsumerPool::spawn(
            queues.clone(),
            PoolSettings {
                consumers: config.consumers,
                idle_recheck: config.idle_recheck(),
                default_retry_limit: config.default_retry_limit,
                start_running: !config.start_stopped,
            },
            runtime,
        );

        let wake: Arc<dyn TimerDispatcher> = Arc::new(consumers.waker());
        let timer = create_timer(
            config.flush_interval(),
            Some(wake),
            config.flush_loop,
            runtime,
        );
        if config.flush_loop {
            timer.start();
        }

        info!(
            consumers = config.consumers,
            flush_interval_ms = config.flush_interval_ms,
            flush_loop = config.flush_loop,
            "job manager ready"
        );

        Ok(Self {
            queues,
            ids,
            coordinator,
            background,
            consumers,
            timer,
        })
    }

    /// Queues a job and returns its id.
    pub fn add_job(&self, params: Params, job: impl Job) -> JobId {
        let id = self.ids.allocate_id();
        let persistent = params.persistent;
        let holder = JobHolder::new(id, params, Arc::new(job));
        let job = holder.job().clone();

        self.queues.select(persistent).insert(holder);
        debug!(job_id = id, persistent, "job added");
        job.on_added();

        // An armed timer already has a flush coming.
        self.timer.start_if_idle();

        id
    }

    /// Cancels a job that no consumer has claimed yet. Returns false if the
    /// job is running or unknown.
    pub fn cancel_job(&self, id: JobId, persistent: bool) -> bool {
        self.coordinator.cancel_synchronously(id, persistent)
    }

    pub fn cancel_job_with_outcome(
        &self,
        id: JobId,
        persistent: bool,
    ) -> CancelOutcome {
        self.coordinator.cancel(id, persistent)
    }

    /// Cancels a job off the calling thread. The callback, if given, runs on
    /// the manager's background thread; it's dropped without being called if
    /// the manager shuts down first.
    pub fn cancel_job_in_background(
        &self,
        id: JobId,
        persistent: bool,
        callback: Option<CancelCallback>,
    ) {
        self.coordinator.cancel_asynchronously(id, persistent, callback);
    }

    /// Lets consumers claim jobs again.
    pub fn start(&self) {
        debug!("starting consumers");
        self.consumers.start();
    }

    /// Stops consumers from claiming jobs. Running jobs finish, and queued
    /// jobs can still be cancelled.
    pub fn stop(&self) {
        debug!("stopping consumers");
        self.consumers.stop();
    }

    pub fn is_running(&self) -> bool {
        self.consumers.is_running()
    }

    /// Jobs in both queues, claimed or not.
    pub fn count(&self) -> usize {
        self.queues.in_order().iter().map(|q| q.count()).sum()
    }

    pub fn queue(&self, persistent: bool) -> &Arc<dyn JobQueue> {
        self.queues.select(persistent)
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            running: self.is_running(),
            timer_running: self.timer.is_running(),
            in_memory: QueueStats::from(self.queues.select(false).snapshot()),
            durable: QueueStats::from(self.queues.select(true).snapshot()),
        }
    }

    /// Stops the timer and consumers and waits for running jobs to finish.
    /// Background cancellations still pending are dropped.
    pub async fn shutdown(&self) {
        info!("shutting down job manager");
        self.timer.cancel();
        self.consumers.shutdown().await;

        let background = self.background.clone();
        if let Err(error) =
            tokio::task::spawn_blocking(move || background.shutdown()).await
        {
            error!(%error, "failed to stop background context");
        }
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.timer.cancel();
        self.background.close();
    }
}

#[derive(Debug, Serialize)]
pub struct ManagerStats {
    /// whether consumers are claiming jobs
    pub running: bool,
    /// whether a deferred flush is pending
    #[serde(rename = "timer-running")]
    pub timer_running: bool,
    #[serde(rename = "in-memory")]
    pub in_memory: QueueStats,
    pub durable: QueueStats,
}

#[derive(Debug, Serialize)]
pub struct QueueStats {
    /// number of jobs no consumer has claimed
    #[serde(rename = "current-jobs-unclaimed")]
    pub current_jobs_unclaimed: u64,
    /// number of unclaimed jobs still waiting out a delay
    #[serde(rename = "current-jobs-delayed")]
    pub current_jobs_delayed: u64,
    /// number of jobs claimed by consumers
    #[serde(rename = "current-jobs-claimed")]
    pub current_jobs_claimed: u64,
    pub jobs: Vec<JobSnapshot>,
}

impl From<Vec<JobSnapshot>> for QueueStats {
    fn from(jobs: Vec<JobSnapshot>) -> Self {
        let count = |f: &dyn Fn(&JobSnapshot) -> bool| {
            jobs.iter().filter(|j| f(j)).count() as u64
        };

        Self {
            current_jobs_unclaimed: count(&|j| j.state == ClaimMarker::Unclaimed),
            current_jobs_delayed: count(&|j| {
                j.state == ClaimMarker::Unclaimed && j.delay_left > 0
            }),
            current_jobs_claimed: count(&|j| j.state.is_claimed()),
            jobs,
        }
    }
}
