use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Identifies a job for as long as it lives in a queue. Ids are never reused.
pub type JobId = u64;

/// How many runs a failing job gets before it's dropped, unless overridden
/// per job or in the manager configuration.
pub const DEFAULT_RETRY_LIMIT: u32 = 20;

/// Metadata fixed at enqueue time.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Params {
    pub(crate) priority: i32,
    pub(crate) persistent: bool,
    pub(crate) group_id: Option<String>,
    pub(crate) delay: Duration,
    pub(crate) retry_limit: Option<u32>,
}

impl Params {
    /// Higher priorities are claimed first.
    pub fn new(priority: i32) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    /// Routes the job to the durable queue instead of the in-memory one.
    pub fn persist(self) -> Self {
        self.set_persistent(true)
    }

    pub fn set_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Jobs sharing a group never run concurrently.
    pub fn group_by(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Holds the job back from consumers until `delay` has elapsed.
    pub fn delay_by(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = Some(limit);
        self
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// A unit of background work.
///
/// `on_run` is executed on a consumer's blocking thread. `on_cancel` is the
/// cancellation hook: it's called at most once, and only if the job was
/// removed from its queue before any consumer claimed it.
pub trait Job: Send + Sync + 'static {
    /// Called once the job has been placed in its queue.
    fn on_added(&self) {}

    fn on_run(&self) -> anyhow::Result<()>;

    fn on_cancel(&self) {}

    /// Decides whether a failed run should be retried. Retries are still
    /// bounded by the job's retry limit.
    fn should_retry(&self, _error: &anyhow::Error) -> bool {
        true
    }
}

/// Hands out job ids. Implementations must never return the same id twice.
pub trait IdAllocator: Send + Sync {
    fn allocate_id(&self) -> JobId;
}

/// Allocates monotonically increasing ids from an atomic counter.
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn starting_at(first: JobId) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdAllocator for SequentialIds {
    fn allocate_id(&self) -> JobId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_builder() {
        let params = Params::new(3)
            .persist()
            .group_by("uploads")
            .delay_by(Duration::from_secs(2))
            .retry_limit(4);

        assert_eq!(params.priority(), 3);
        assert!(params.is_persistent());
        assert_eq!(params.group_id(), Some("uploads"));
        assert_eq!(params.delay(), Duration::from_secs(2));
        assert_eq!(params.retry_limit, Some(4));

        let params = Params::default();
        assert_eq!(params.priority(), 0);
        assert!(!params.is_persistent());
        assert_eq!(params.group_id(), None);
        assert_eq!(params.retry_limit, None);
    }

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialIds::default();
        assert_eq!(ids.allocate_id(), 1);
        assert_eq!(ids.allocate_id(), 2);

        let ids = SequentialIds::starting_at(0xDEAD);
        assert_eq!(ids.allocate_id(), 0xDEAD);
        assert_eq!(ids.allocate_id(), 0xDEAE);
    }
}
