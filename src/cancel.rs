//! Cancelling queued jobs.
//!
//! A job can only be cancelled while no consumer has claimed it. The check
//! and the removal happen in one step under the queue's lock, so for any job
//! exactly one of {claim, cancellation} succeeds.
use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::background::BackgroundExecutor;
use crate::queue::{Queues, Removal};
use crate::types::JobId;

/// Receives the result of a background cancellation: the job id and whether
/// the job was cancelled.
///
/// The coordinator holds on to the callback until the request resolves. If it
/// closes over something short-lived, hold that through a `Weak`.
pub type CancelCallback = Box<dyn FnOnce(JobId, bool) + Send + 'static>;

/// How a cancellation attempt resolved.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CancelOutcome {
    /// The job was unclaimed; it's gone and its cancellation hook has run.
    Cancelled,
    /// No such job in the selected queue, including jobs already completed,
    /// failed for good, or cancelled earlier.
    NotFound,
    /// A consumer has claimed the job, which will run to completion.
    AlreadyRunning,
}

impl CancelOutcome {
    pub fn is_cancelled(self) -> bool {
        self == CancelOutcome::Cancelled
    }
}

/// A pending background cancellation.
pub struct CancellationRequest {
    pub job_id: JobId,
    pub persistent: bool,
    callback: Option<CancelCallback>,
}

impl CancellationRequest {
    pub fn new(
        job_id: JobId,
        persistent: bool,
        callback: Option<CancelCallback>,
    ) -> Self {
        Self {
            job_id,
            persistent,
            callback,
        }
    }

    /// Resolves the request against `queues` and reports to the callback, if
    /// there is one.
    fn resolve(self, queues: &Queues) -> CancelOutcome {
        let outcome = cancel(queues, self.job_id, self.persistent);
        if let Some(callback) = self.callback {
            callback(self.job_id, outcome.is_cancelled());
        }
        outcome
    }
}

impl fmt::Debug for CancellationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationRequest")
            .field("job_id", &self.job_id)
            .field("persistent", &self.persistent)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Cancels jobs in a pair of queues, either on the caller's thread or on a
/// background executor.
#[derive(Clone)]
pub struct CancellationCoordinator {
    queues: Queues,
    background: Arc<dyn BackgroundExecutor>,
}

impl CancellationCoordinator {
    pub fn new(queues: Queues, background: Arc<dyn BackgroundExecutor>) -> Self {
        Self { queues, background }
    }

    /// Cancels the job on the calling thread. Returns true only if the job
    /// was still unclaimed; its cancellation hook has run by the time this
    /// returns.
    pub fn cancel_synchronously(&self, job_id: JobId, persistent: bool) -> bool {
        self.cancel(job_id, persistent).is_cancelled()
    }

    /// As [`Self::cancel_synchronously`], reporting why a cancellation failed.
    pub fn cancel(&self, job_id: JobId, persistent: bool) -> CancelOutcome {
        cancel(&self.queues, job_id, persistent)
    }

    /// Hands the cancellation to the background executor and returns at once.
    /// The callback, if any, runs on the background executor once the request
    /// resolves.
    pub fn cancel_asynchronously(
        &self,
        job_id: JobId,
        persistent: bool,
        callback: Option<CancelCallback>,
    ) {
        let request = CancellationRequest::new(job_id, persistent, callback);
        debug!(?request, "submitting background cancellation");

        let queues = self.queues.clone();
        self.background.submit(Box::new(move || {
            request.resolve(&queues);
        }));
    }
}

#[instrument(level = "debug", skip(queues))]
fn cancel(queues: &Queues, job_id: JobId, persistent: bool) -> CancelOutcome {
    let outcome = match queues.select(persistent).remove_if_unclaimed(job_id) {
        Removal::Removed(holder) => {
            // The holder is out of the queue and marked removed, so nothing
            // else can reach this hook.
            holder.job().on_cancel();
            CancelOutcome::Cancelled
        },
        Removal::Claimed => CancelOutcome::AlreadyRunning,
        Removal::NotFound => CancelOutcome::NotFound,
    };

    debug!(?outcome, "resolved cancellation");
    outcome
}
