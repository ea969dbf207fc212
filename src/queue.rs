//! Queues of job holders.
//!
//! Every queue guards claim markers and membership with one lock, so a
//! consumer claiming a job and a caller cancelling it can never both win.
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::types::{ClaimMarker, JobHolder, JobId, JobSnapshot};

/// The result of trying to take an unclaimed job out of a queue.
#[derive(Debug)]
pub enum Removal {
    /// The holder was unclaimed and is now gone from the queue. Its marker is
    /// `Removed`.
    Removed(JobHolder),
    /// A consumer owns the job; it was left untouched.
    Claimed,
    NotFound,
}

impl Removal {
    pub fn is_removed(&self) -> bool {
        matches!(self, Removal::Removed(_))
    }
}

/// Storage for queued job holders.
///
/// `claim_next` and `remove_if_unclaimed` must be atomic with respect to each
/// other.
pub trait JobQueue: Send + Sync {
    fn insert(&self, holder: JobHolder);

    /// Returns a copy of the holder as it is now.
    fn find_by_id(&self, id: JobId) -> Option<JobHolder>;

    /// Moves the best eligible holder from `Unclaimed` to `Claimed` and
    /// returns a copy of it.
    fn claim_next(&self) -> Option<JobHolder>;

    fn remove_if_unclaimed(&self, id: JobId) -> Removal;

    /// Hands a claimed holder back to the queue after a failed run. Returns
    /// false if the holder isn't claimed.
    fn release(&self, id: JobId) -> bool;

    /// Drops a claimed holder once its run is over for good.
    fn remove(&self, id: JobId) -> Option<JobHolder>;

    fn count(&self) -> usize;

    fn snapshot(&self) -> Vec<JobSnapshot>;
}

/// An in-memory queue. Also stands in for the durable queue when no other
/// backend is configured.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    // Keyed by id, so iteration order is insertion order for monotonic ids.
    holders: Mutex<BTreeMap<JobId, JobHolder>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobQueue for MemoryJobQueue {
    fn insert(&self, holder: JobHolder) {
        let previous = self.holders.lock().insert(holder.id, holder);
        assert!(previous.is_none(), "job id allocated twice");
    }

    fn find_by_id(&self, id: JobId) -> Option<JobHolder> {
        self.holders.lock().get(&id).cloned()
    }

    fn claim_next(&self) -> Option<JobHolder> {
        let now = Instant::now();
        let mut holders = self.holders.lock();

        let busy_groups: HashSet<String> = holders
            .values()
            .filter(|h| h.marker.is_claimed())
            .filter_map(|h| h.params.group_id.clone())
            .collect();

        // min_by_key keeps the first of equal keys: FIFO within a priority.
        let id = holders
            .values()
            .filter(|h| h.marker.is_unclaimed() && h.is_due(now))
            .filter(|h| {
                h.params
                    .group_id
                    .as_ref()
                    .map_or(true, |g| !busy_groups.contains(g))
            })
            .min_by_key(|h| Reverse(h.params.priority))?
            .id;

        let holder = holders.get_mut(&id)?;
        holder.marker = ClaimMarker::Claimed { at: now };
        holder.run_count += 1;

        Some(holder.clone())
    }

    fn remove_if_unclaimed(&self, id: JobId) -> Removal {
        let mut holders = self.holders.lock();

        match holders.get(&id).map(|h| h.marker) {
            None => Removal::NotFound,
            Some(ClaimMarker::Unclaimed) => match holders.remove(&id) {
                Some(mut holder) => {
                    holder.marker = ClaimMarker::Removed;
                    Removal::Removed(holder)
                },
                None => Removal::NotFound,
            },
            Some(ClaimMarker::Claimed { .. }) => Removal::Claimed,
            // Removed holders never stay in the map.
            Some(ClaimMarker::Removed) => Removal::NotFound,
        }
    }

    fn release(&self, id: JobId) -> bool {
        match self.holders.lock().get_mut(&id) {
            Some(holder) if holder.marker.is_claimed() => {
                holder.marker = ClaimMarker::Unclaimed;
                true
            },
            _ => false,
        }
    }

    fn remove(&self, id: JobId) -> Option<JobHolder> {
        let mut holder = self.holders.lock().remove(&id)?;
        holder.marker = ClaimMarker::Removed;
        Some(holder)
    }

    fn count(&self) -> usize {
        self.holders.lock().len()
    }

    fn snapshot(&self) -> Vec<JobSnapshot> {
        let now = Instant::now();
        self.holders
            .lock()
            .values()
            .map(|h| h.snapshot(now))
            .collect()
    }
}

/// The two queues a manager routes jobs to, picked by the persistence flag.
#[derive(Clone)]
pub struct Queues {
    durable: Arc<dyn JobQueue>,
    in_memory: Arc<dyn JobQueue>,
}

impl Queues {
    pub fn new(durable: Arc<dyn JobQueue>, in_memory: Arc<dyn JobQueue>) -> Self {
        Self { durable, in_memory }
    }

    pub fn select(&self, persistent: bool) -> &Arc<dyn JobQueue> {
        if persistent {
            &self.durable
        } else {
            &self.in_memory
        }
    }

    /// Both queues, in the order consumers poll them.
    pub fn in_order(&self) -> [&Arc<dyn JobQueue>; 2] {
        [&self.in_memory, &self.durable]
    }
}

impl Default for Queues {
    fn default() -> Self {
        Self::new(Arc::new(MemoryJobQueue::new()), Arc::new(MemoryJobQueue::new()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::types::{Job, Params};

    struct Noop;

    impl Job for Noop {
        fn on_run(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn holder(id: JobId, params: Params) -> JobHolder {
        JobHolder::new(id, params, Arc::new(Noop))
    }

    #[test]
    fn test_claim_order() {
        let queue = MemoryJobQueue::new();
        queue.insert(holder(1, Params::new(0)));
        queue.insert(holder(2, Params::new(5)));
        queue.insert(holder(3, Params::new(5)));
        queue.insert(holder(4, Params::new(1)));

        let order: Vec<JobId> =
            std::iter::from_fn(|| queue.claim_next().map(|h| h.id())).collect();
        assert_eq!(order, [2, 3, 4, 1]);

        // Everything is claimed now, but nothing was removed.
        assert_eq!(queue.count(), 4);
        assert!(queue.claim_next().is_none());
    }

    #[test]
    fn test_claim_marks_and_counts_runs() {
        let queue = MemoryJobQueue::new();
        queue.insert(holder(1, Params::default()));

        let claimed = queue.claim_next().unwrap();
        assert!(claimed.marker().is_claimed());
        assert_eq!(claimed.run_count(), 1);
        assert!(queue.find_by_id(1).unwrap().marker().is_claimed());

        assert!(queue.release(1));
        assert!(!queue.release(1));
        assert!(queue.find_by_id(1).unwrap().marker().is_unclaimed());

        let claimed = queue.claim_next().unwrap();
        assert_eq!(claimed.run_count(), 2);

        let removed = queue.remove(1).unwrap();
        assert_eq!(removed.marker(), ClaimMarker::Removed);
        assert!(queue.find_by_id(1).is_none());
        assert_eq!(queue.count(), 0);
    }

    #[test]
    fn test_groups_run_one_at_a_time() {
        let queue = MemoryJobQueue::new();
        queue.insert(holder(1, Params::new(0).group_by("a")));
        queue.insert(holder(2, Params::new(0).group_by("a")));
        queue.insert(holder(3, Params::new(0).group_by("b")));

        assert_eq!(queue.claim_next().unwrap().id(), 1);
        assert_eq!(queue.claim_next().unwrap().id(), 3);
        assert!(queue.claim_next().is_none());

        queue.remove(1);
        assert_eq!(queue.claim_next().unwrap().id(), 2);
    }

    #[test]
    fn test_delayed_jobs_are_skipped() {
        let queue = MemoryJobQueue::new();
        queue.insert(holder(1, Params::new(9).delay_by(Duration::from_secs(60))));
        queue.insert(holder(2, Params::new(0)));

        assert_eq!(queue.claim_next().unwrap().id(), 2);
        assert!(queue.claim_next().is_none());
    }

    #[test]
    fn test_remove_if_unclaimed() {
        let queue = MemoryJobQueue::new();
        queue.insert(holder(1, Params::default()));
        queue.insert(holder(2, Params::default()));

        assert!(matches!(queue.remove_if_unclaimed(99), Removal::NotFound));

        match queue.remove_if_unclaimed(1) {
            Removal::Removed(h) => {
                assert_eq!(h.id(), 1);
                assert_eq!(h.marker(), ClaimMarker::Removed);
            },
            other => panic!("unexpected removal outcome: {other:?}"),
        }
        assert!(queue.find_by_id(1).is_none());
        assert!(matches!(queue.remove_if_unclaimed(1), Removal::NotFound));

        assert_eq!(queue.claim_next().unwrap().id(), 2);
        assert!(matches!(queue.remove_if_unclaimed(2), Removal::Claimed));
        assert!(queue.find_by_id(2).unwrap().marker().is_claimed());
    }

    #[test]
    fn test_claim_and_remove_race() {
        for _ in 0..200 {
            let queue = Arc::new(MemoryJobQueue::new());
            queue.insert(holder(1, Params::default()));

            let barrier = Arc::new(Barrier::new(2));
            let wins = Arc::new(AtomicUsize::new(0));

            let claimer = {
                let (queue, barrier, wins) =
                    (queue.clone(), barrier.clone(), wins.clone());
                thread::spawn(move || {
                    barrier.wait();
                    if queue.claim_next().is_some() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            };

            barrier.wait();
            let removed = queue.remove_if_unclaimed(1);
            if removed.is_removed() {
                wins.fetch_add(1, Ordering::SeqCst);
            }
            claimer.join().unwrap();

            assert_eq!(wins.load(Ordering::SeqCst), 1);
            // The loser saw the winner's outcome.
            match removed {
                Removal::Removed(_) => assert!(queue.find_by_id(1).is_none()),
                Removal::Claimed => {
                    assert!(queue.find_by_id(1).unwrap().marker().is_claimed())
                },
                Removal::NotFound => panic!("job vanished"),
            }
        }
    }

    #[test]
    fn test_queue_selection() {
        let queues = Queues::default();
        queues.select(true).insert(holder(1, Params::default().persist()));
        queues.select(false).insert(holder(2, Params::default()));

        assert!(queues.select(true).find_by_id(1).is_some());
        assert!(queues.select(true).find_by_id(2).is_none());
        assert!(queues.select(false).find_by_id(2).is_some());

        let [first, second] = queues.in_order();
        assert_eq!(first.claim_next().unwrap().id(), 2);
        assert_eq!(second.claim_next().unwrap().id(), 1);
    }
}
