mod common;

use std::thread;

use jobqueue::Params;
use tokio::sync::mpsc;
use tracing_test::traced_test;

use crate::common::{
    create_job_manager, create_stopped_job_manager, eventually, BlockingJob,
    DummyJob,
};

async fn cancel_in_background(use_callback: bool) {
    let caller = thread::current().id();
    let manager = create_stopped_job_manager();

    let job = DummyJob::default();
    let counts = job.counts.clone();
    let id = manager.add_job(Params::new(1), job);
    assert!(manager.queue(false).find_by_id(id).is_some());

    if use_callback {
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.cancel_job_in_background(
            id,
            false,
            Some(Box::new(move |job_id, cancelled| {
                let _ = tx.send((job_id, cancelled, thread::current().id()));
            })),
        );

        let (job_id, cancelled, ran_on) = rx.recv().await.unwrap();
        assert_eq!(job_id, id, "job id should be passed to callback");
        assert!(cancelled, "job should be cancelled");
        assert_ne!(ran_on, caller);
        assert!(manager.queue(false).find_by_id(id).is_none());
    } else {
        manager.cancel_job_in_background(id, false, None);
        eventually(|| counts.cancels() == 1).await;
    }

    assert_eq!(counts.cancels(), 1);
    let cancelled_on = counts.cancelled_on.lock().unwrap();
    assert_ne!(cancelled_on, caller, "thread ids should be different");

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[traced_test]
async fn test_cancel_in_background() {
    cancel_in_background(true).await;
    cancel_in_background(false).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[traced_test]
async fn test_cancel_unknown_job_in_background() {
    let manager = create_job_manager();
    let (tx, mut rx) = mpsc::unbounded_channel();

    manager.cancel_job_in_background(
        999,
        false,
        Some(Box::new(move |job_id, cancelled| {
            let _ = tx.send((job_id, cancelled));
        })),
    );

    assert_eq!(rx.recv().await, Some((999, false)));
    // The callback is gone after its only call.
    assert_eq!(rx.recv().await, None);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[traced_test]
async fn test_cancel_running_job_in_background() {
    let manager = create_job_manager();

    let (job, handles) = BlockingJob::new();
    let counts = job.inner.counts.clone();
    let id = manager.add_job(Params::new(0), job);
    handles.started.await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    manager.cancel_job_in_background(
        id,
        false,
        Some(Box::new(move |job_id, cancelled| {
            let _ = tx.send((job_id, cancelled));
        })),
    );
    assert_eq!(rx.recv().await, Some((id, false)));

    handles.release.send(()).unwrap();
    eventually(|| manager.count() == 0).await;
    assert_eq!(counts.runs(), 1);
    assert_eq!(counts.cancels(), 0);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[traced_test]
async fn test_returns_before_callback() {
    let manager = create_stopped_job_manager();
    let id = manager.add_job(Params::new(0), DummyJob::default());

    // Block the background thread so the request can't resolve yet.
    let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
    manager.cancel_job_in_background(
        0,
        false,
        Some(Box::new(move |_, _| {
            let _ = gate_rx.recv();
        })),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    manager.cancel_job_in_background(
        id,
        false,
        Some(Box::new(move |_, cancelled| {
            let _ = tx.send(cancelled);
        })),
    );

    // We got here without the callback having run.
    assert!(rx.try_recv().is_err());
    gate_tx.send(()).unwrap();
    assert_eq!(rx.recv().await, Some(true));

    manager.shutdown().await;
}
