//! Resettable dispatch timers.
//!
//! A timer fires its listener once after an interval, and optionally re-arms
//! itself after every expiry until cancelled. Unlike a ticking clock there is
//! only ever one deferred wake-up outstanding per timer.
//!
//! [`create_timer`] picks the implementation: [`IntervalTimer`] for a
//! positive interval, [`ImmediateTimer`] otherwise. Callers only see the
//! [`DispatchTimer`] capability set.
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

/// Receives time-up notifications.
pub trait TimerDispatcher: Send + Sync {
    fn on_time_up(&self);
}

impl<F> TimerDispatcher for F
where
    F: Fn() + Send + Sync,
{
    fn on_time_up(&self) {
        self()
    }
}

/// The operations shared by every timer variant.
pub trait DispatchTimer: Send + Sync {
    fn set_listener(&self, listener: Arc<dyn TimerDispatcher>);

    /// Arms the timer. Starting an armed timer restarts the countdown.
    fn start(&self);

    /// Arms the timer unless a countdown is already pending, in which case
    /// its deadline is left alone.
    fn start_if_idle(&self) {
        if !self.is_running() {
            self.start();
        }
    }

    /// Suppresses any pending expiry. Safe to call at any time.
    fn cancel(&self);

    /// Cancels then starts again, without notifying the listener.
    fn reset(&self);

    fn is_running(&self) -> bool;

    /// Notifies the listener that time is up.
    fn on_finish(&self);
}

/// Builds a timer for `interval`: an [`IntervalTimer`] driven by `runtime` if
/// the interval is positive, else an [`ImmediateTimer`].
pub fn create_timer(
    interval: Duration,
    listener: Option<Arc<dyn TimerDispatcher>>,
    reset_after_complete: bool,
    runtime: &Handle,
) -> Arc<dyn DispatchTimer> {
    let timer: Arc<dyn DispatchTimer> = if interval.is_zero() {
        Arc::new(ImmediateTimer::default())
    } else {
        Arc::new(IntervalTimer::new(
            interval,
            reset_after_complete,
            runtime.clone(),
        ))
    };

    if let Some(listener) = listener {
        timer.set_listener(listener);
    }

    timer
}

fn dispatch(listener: Option<Arc<dyn TimerDispatcher>>) {
    debug!("dispatching flush");
    match listener {
        Some(listener) => listener.on_time_up(),
        None => trace!("timer expired with no listener"),
    }
}

/// A timer that never keeps time: starting or resetting it notifies the
/// listener straight away, on the caller's thread.
#[derive(Default)]
pub struct ImmediateTimer {
    listener: Mutex<Option<Arc<dyn TimerDispatcher>>>,
}

impl DispatchTimer for ImmediateTimer {
    fn set_listener(&self, listener: Arc<dyn TimerDispatcher>) {
        *self.listener.lock() = Some(listener);
    }

    fn start(&self) {
        self.on_finish();
    }

    fn cancel(&self) {}

    fn reset(&self) {
        self.on_finish();
    }

    fn is_running(&self) -> bool {
        false
    }

    fn on_finish(&self) {
        let listener = self.listener.lock().clone();
        dispatch(listener);
    }
}

/// A countdown timer scheduled on a tokio runtime. The listener runs on that
/// runtime, never on the thread that called [`DispatchTimer::start`].
pub struct IntervalTimer {
    shared: Arc<Shared>,
}

struct Shared {
    interval: Duration,
    reset_after_complete: bool,
    runtime: Handle,
    state: Mutex<TimerState>,
}

#[derive(Default)]
struct TimerState {
    listener: Option<Arc<dyn TimerDispatcher>>,
    deadline: Option<Instant>,
    running: bool,
    wake_up: Option<AbortHandle>,
    /// Bumped on every arm and cancel. A wake-up only acts if the generation
    /// it was scheduled under is still current.
    generation: u64,
}

impl IntervalTimer {
    pub fn new(
        interval: Duration,
        reset_after_complete: bool,
        runtime: Handle,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                interval,
                reset_after_complete,
                runtime,
                state: Mutex::new(TimerState::default()),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }
}

impl Shared {
    fn arm(self: &Arc<Self>, state: &mut TimerState) {
        state.generation += 1;
        state.deadline = Some(Instant::now() + self.interval);
        state.running = true;
        self.schedule(state, self.interval);
    }

    fn disarm(state: &mut TimerState) {
        if let Some(wake_up) = state.wake_up.take() {
            wake_up.abort();
        }
        state.generation += 1;
        state.deadline = None;
        state.running = false;
    }

    /// Replaces the outstanding wake-up with one due after `after`.
    fn schedule(self: &Arc<Self>, state: &mut TimerState, after: Duration) {
        if let Some(wake_up) = state.wake_up.take() {
            wake_up.abort();
        }

        let generation = state.generation;
        let shared = Arc::downgrade(self);
        let task = self.runtime.spawn(async move {
            time::sleep(after).await;
            Shared::wake(shared, generation);
        });

        state.wake_up = Some(task.abort_handle());
    }

    fn wake(shared: Weak<Self>, generation: u64) {
        // The timer was dropped while we slept.
        let Some(shared) = shared.upgrade() else {
            return;
        };

        // Validating the expiry and taking the listener happen under one
        // lock, so a cancel that returns before this point always wins.
        let listener = {
            let mut state = shared.state.lock();
            if state.generation != generation {
                return;
            }
            state.wake_up = None;

            let Some(deadline) = state.deadline else {
                return;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                trace!(?remaining, "woke early, rescheduling");
                shared.schedule(&mut state, remaining);
                return;
            }

            state.listener.clone()
        };

        shared.complete(listener, generation);
    }

    /// Expires the countdown armed under `generation`, unless it has since
    /// been cancelled or restarted.
    fn finish(self: &Arc<Self>, generation: u64) {
        let listener = {
            let state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.listener.clone()
        };

        self.complete(listener, generation);
    }

    fn complete(
        self: &Arc<Self>,
        listener: Option<Arc<dyn TimerDispatcher>>,
        generation: u64,
    ) {
        // The listener runs outside the lock so it may call back into the
        // timer.
        dispatch(listener);

        let mut state = self.state.lock();
        // Cancelled or restarted while the listener ran.
        if state.generation != generation {
            return;
        }
        state.running = false;
        state.deadline = None;

        // A zero interval would loop forever without yielding.
        if self.reset_after_complete && !self.interval.is_zero() {
            self.arm(&mut state);
        }
    }
}

impl DispatchTimer for IntervalTimer {
    fn set_listener(&self, listener: Arc<dyn TimerDispatcher>) {
        self.shared.state.lock().listener = Some(listener);
    }

    fn start(&self) {
        if self.shared.interval.is_zero() {
            return self.on_finish();
        }

        let mut state = self.shared.state.lock();
        self.shared.arm(&mut state);
    }

    fn cancel(&self) {
        Shared::disarm(&mut self.shared.state.lock());
    }

    fn reset(&self) {
        if self.shared.interval.is_zero() {
            return self.on_finish();
        }

        let mut state = self.shared.state.lock();
        Shared::disarm(&mut state);
        self.shared.arm(&mut state);
    }

    fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    fn start_if_idle(&self) {
        if self.shared.interval.is_zero() {
            return self.on_finish();
        }

        let mut state = self.shared.state.lock();
        if !state.running {
            self.shared.arm(&mut state);
        }
    }

    fn on_finish(&self) {
        let generation = self.shared.state.lock().generation;
        self.shared.finish(generation);
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        Shared::disarm(&mut self.shared.state.lock());
    }
}
