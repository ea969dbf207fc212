use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::job::{Job, JobId, Params};
use super::states::ClaimMarker;

/// The queue-resident wrapper around a job.
#[derive(Clone)]
pub struct JobHolder {
    pub(crate) id: JobId,
    pub(crate) params: Params,
    pub(crate) marker: ClaimMarker,
    pub(crate) inserted: Instant,
    /// Earliest instant a consumer may claim the job; `None` when undelayed.
    pub(crate) run_after: Option<Instant>,
    /// Number of times the job has been claimed.
    pub(crate) run_count: u32,
    pub(crate) job: Arc<dyn Job>,
}

impl JobHolder {
    pub fn new(id: JobId, params: Params, job: Arc<dyn Job>) -> Self {
        let inserted = Instant::now();
        let run_after = match params.delay {
            delay if delay.is_zero() => None,
            delay => Some(inserted + delay),
        };

        Self {
            id,
            params,
            marker: ClaimMarker::Unclaimed,
            inserted,
            run_after,
            run_count: 0,
            job,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn marker(&self) -> ClaimMarker {
        self.marker
    }

    pub fn run_count(&self) -> u32 {
        self.run_count
    }

    pub fn inserted(&self) -> Instant {
        self.inserted
    }

    pub fn job(&self) -> &Arc<dyn Job> {
        &self.job
    }

    /// Whether a consumer may claim this holder at `now`.
    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.run_after.map_or(true, |at| at <= now)
    }

    pub fn snapshot(&self, now: Instant) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            priority: self.params.priority,
            persistent: self.params.persistent,
            group: self.params.group_id.clone(),
            state: self.marker,
            age: now.saturating_duration_since(self.inserted).as_secs(),
            delay_left: saturating_millis(
                self.run_after
                    .map_or(Duration::ZERO, |at| at.saturating_duration_since(now)),
            ),
            runs: self.run_count,
        }
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl fmt::Debug for JobHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHolder")
            .field("id", &self.id)
            .field("params", &self.params)
            .field("marker", &self.marker)
            .field("run_count", &self.run_count)
            .finish_non_exhaustive()
    }
}

/// A point-in-time view of a holder, for stats output.
#[derive(Clone, Debug, Serialize)]
pub struct JobSnapshot {
    /// job ID
    pub id: JobId,
    /// priority set at enqueue
    pub priority: i32,
    /// whether the job lives in the durable queue
    pub persistent: bool,
    /// serialisation group, if any
    pub group: Option<String>,
    /// claim marker
    pub state: ClaimMarker,
    /// time in seconds since insertion
    pub age: u64,
    /// milliseconds remaining until the job may be claimed
    #[serde(rename = "delay-left")]
    pub delay_left: u64,
    /// number of times the job was claimed
    pub runs: u32,
}
