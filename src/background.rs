//! A dedicated execution context for work that must leave the caller's
//! thread without competing with consumers for a worker.
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::Result;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Somewhere to run tasks off the submitting thread.
pub trait BackgroundExecutor: Send + Sync {
    /// Queues `task`. It never runs on the submitter's thread; it may never run
    /// at all if the executor shuts down first.
    fn submit(&self, task: Task);
}

/// Runs submitted tasks one at a time, in submission order, on its own thread.
///
/// Tasks still queued at shutdown are dropped without running.
pub struct BackgroundContext {
    tx: mpsc::UnboundedSender<Task>,
    shutdown: CancellationToken,
    thread_id: ThreadId,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundContext {
    pub fn spawn(name: &str) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let runtime = tokio::runtime::Builder::new_current_thread().build()?;
        let thread = thread::Builder::new().name(name.into()).spawn({
            let shutdown = shutdown.clone();
            move || runtime.block_on(drain(rx, shutdown))
        })?;

        Ok(Self {
            tx,
            shutdown,
            thread_id: thread.thread().id(),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// The thread every task runs on.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Stops taking tasks without waiting for the current one to finish.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Closes the context and waits for its thread to exit.
    pub fn shutdown(&self) {
        self.close();

        // Joining ourselves would never return.
        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                error!("background context thread panicked");
            }
        }
    }
}

impl BackgroundExecutor for BackgroundContext {
    fn submit(&self, task: Task) {
        if self.shutdown.is_cancelled() || self.tx.send(task).is_err() {
            warn!("background context is shut down, dropping task");
        }
    }
}

impl Drop for BackgroundContext {
    fn drop(&mut self) {
        self.close();
    }
}

async fn drain(mut rx: mpsc::UnboundedReceiver<Task>, shutdown: CancellationToken) {
    loop {
        let task = select! {
            biased;
            _ = shutdown.cancelled() => break,
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("background task panicked");
        }
    }

    rx.close();
    let mut dropped = 0usize;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    debug!(dropped, "background context stopped");
}
