//! Consumer workers: claim jobs from the queues and run them.
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::{pin, select, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

use crate::queue::{JobQueue, Queues};
use crate::types::JobHolder;

pub(crate) struct ConsumerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared {
    queues: Queues,
    /// Whether consumers may claim jobs. Stopping never interrupts a job that
    /// is already running.
    running: watch::Sender<bool>,
    wake: Notify,
    shutdown: CancellationToken,
    idle_recheck: Duration,
    default_retry_limit: u32,
}

pub(crate) struct PoolSettings {
    pub(crate) consumers: usize,
    pub(crate) idle_recheck: Duration,
    pub(crate) default_retry_limit: u32,
    pub(crate) start_running: bool,
}

impl ConsumerPool {
    pub(crate) fn spawn(
        queues: Queues,
        settings: PoolSettings,
        runtime: &Handle,
    ) -> Self {
        let (running, _) = watch::channel(settings.start_running);
        let shared = Arc::new(Shared {
            queues,
            running,
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
            idle_recheck: settings.idle_recheck,
            default_retry_limit: settings.default_retry_limit,
        });

        let workers = (0..settings.consumers)
            .map(|worker| runtime.spawn(consume(worker, shared.clone())))
            .collect();

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    pub(crate) fn start(&self) {
        self.shared.running.send_replace(true);
        self.wake();
    }

    pub(crate) fn stop(&self) {
        self.shared.running.send_replace(false);
    }

    pub(crate) fn is_running(&self) -> bool {
        *self.shared.running.borrow()
    }

    /// Nudges idle consumers to look at the queues again.
    pub(crate) fn wake(&self) {
        self.shared.wake.notify_waiters();
    }

    /// A handle that wakes consumers without keeping the pool alive.
    pub(crate) fn waker(&self) -> impl Fn() + Send + Sync + 'static {
        let shared = Arc::downgrade(&self.shared);
        move || {
            if let Some(shared) = shared.upgrade() {
                shared.wake.notify_waiters();
            }
        }
    }

    /// Stops every consumer and waits for them, letting running jobs finish.
    pub(crate) async fn shutdown(&self) {
        self.shared.shutdown.cancel();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(error) = worker.await {
                error!(%error, "consumer exited abnormally");
            }
        }
    }
}

impl Drop for ConsumerPool {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

#[instrument(name = "consumer", skip(shared))]
async fn consume(worker: usize, shared: Arc<Shared>) {
    let mut running = shared.running.subscribe();
    debug!("consumer started");

    loop {
        let started = select! {
            _ = shared.shutdown.cancelled() => false,
            result = running.wait_for(|running| *running) => result.is_ok(),
        };
        if !started {
            break;
        }

        // Register for wake-ups before looking, so a job added between the
        // look and the wait isn't missed.
        let notified = shared.wake.notified();
        pin!(notified);
        notified.as_mut().enable();

        if let Some((queue, holder)) = shared.claim_next() {
            shared.execute(queue, holder).await;
            continue;
        }

        trace!("queues empty, waiting");
        select! {
            _ = shared.shutdown.cancelled() => break,
            _ = &mut notified => {},
            _ = running.changed() => {},
            _ = time::sleep(shared.idle_recheck) => {},
        }
    }

    debug!("consumer stopped");
}

impl Shared {
    fn claim_next(&self) -> Option<(Arc<dyn JobQueue>, JobHolder)> {
        self.queues.in_order().into_iter().find_map(|queue| {
            queue.claim_next().map(|holder| (queue.clone(), holder))
        })
    }

    async fn execute(&self, queue: Arc<dyn JobQueue>, holder: JobHolder) {
        let id = holder.id();
        debug!(job_id = id, run = holder.run_count(), "running job");

        let job = holder.job().clone();
        let result = match tokio::task::spawn_blocking(move || job.on_run()).await
        {
            Ok(result) => result,
            Err(error) => Err(anyhow!("job panicked: {error}")),
        };

        let error = match result {
            Ok(()) => {
                queue.remove(id);
                debug!(job_id = id, "job completed");
                return;
            },
            Err(error) => error,
        };

        let limit = holder
            .params()
            .retry_limit
            .unwrap_or(self.default_retry_limit);
        if holder.run_count() < limit && holder.job().should_retry(&error) {
            warn!(job_id = id, error = %format!("{error:#}"), "job failed, retrying");
            queue.release(id);
            self.wake.notify_waiters();
        } else {
            error!(
                job_id = id,
                runs = holder.run_count(),
                error = %format!("{error:#}"),
                "job failed permanently"
            );
            queue.remove(id);
        }
    }
}
