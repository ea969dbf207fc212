use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use jobqueue::Job;
use tracing::info;

/// A job that pretends to work by sleeping, and fails its first run when
/// asked to.
pub(crate) struct SleepJob {
    pub(crate) label: String,
    pub(crate) work: Duration,
    pub(crate) flaky: bool,
    pub(crate) failed_once: AtomicBool,
}

impl SleepJob {
    pub(crate) fn new(label: String, work: Duration, flaky: bool) -> Self {
        Self {
            label,
            work,
            flaky,
            failed_once: Default::default(),
        }
    }
}

impl Job for SleepJob {
    fn on_added(&self) {
        info!(label = %self.label, "queued");
    }

    fn on_run(&self) -> anyhow::Result<()> {
        thread::sleep(self.work);
        if self.flaky && !self.failed_once.swap(true, Ordering::SeqCst) {
            anyhow::bail!("{} flaked", self.label);
        }
        info!(label = %self.label, "done");
        Ok(())
    }

    fn on_cancel(&self) {
        info!(label = %self.label, "cancelled");
    }
}
