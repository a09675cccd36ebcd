//! Cooperative re-entrant timer (spec §3.6, §4.4), grounded on
//! `webrtc-rs-turn::client::periodic_timer::PeriodicTimer`: a tokio task
//! sleeping in a loop, torn down through a channel rather than an abort
//! handle. The teacher's two-state running/stopped flag is generalized here
//! into the five-state machine the task's re-entrancy requires: the task
//! itself calls back into `start`/`stop` through its own return value and
//! must observe a consistent state even though it runs without the mutex
//! held. The sleeping task only holds a `Weak` handle to `Inner`, upgraded
//! once the delay elapses, so a timer owned by the thing it fires into
//! (an endpoint's reconnect debounce, say) doesn't keep that owner alive
//! through its own sleep.

#[cfg(test)]
mod timer_test;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;

/// A re-armable task: returns `true` to restart with the same interval,
/// `false` to stop (spec §4.4, "task contract").
pub type Task = Box<dyn Fn() -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stopped,
    Started,
    InTask,
    InTaskStarted,
    InTaskStopped,
}

struct Inner {
    state: State,
    interval: Duration,
    task: Option<Task>,
    generation: u64,
}

/// Shared handle to a timer. Cloning shares the same underlying state, the
/// way a caller in the teacher's code holds the same `PeriodicTimer` across
/// `start`/`stop` calls from different tasks.
#[derive(Clone)]
pub struct Timer {
    inner: Arc<Mutex<Inner>>,
}

impl Timer {
    pub fn new(interval: Duration, task: Task) -> Self {
        Timer {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Stopped,
                interval,
                task: Some(task),
                generation: 0,
            })),
        }
    }

    /// `set_interval` succeeds only in `STOPPED` (spec §4.4).
    pub async fn set_interval(&self, interval: Duration) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state != State::Stopped {
            return false;
        }
        inner.interval = interval;
        true
    }

    /// `set_task` succeeds only in `STOPPED` (spec §4.4).
    pub async fn set_task(&self, task: Task) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state != State::Stopped {
            return false;
        }
        inner.task = Some(task);
        true
    }

    /// `is_running` is true in any state other than `STOPPED`/`IN_TASK_STOPPED`.
    pub async fn is_running(&self) -> bool {
        let inner = self.inner.lock().await;
        !matches!(inner.state, State::Stopped | State::InTaskStopped)
    }

    /// `STOPPED -> STARTED` arms a delay; `STARTED -> STARTED` cancels and
    /// re-arms; `IN_TASK -> IN_TASK_STARTED` just records that the task
    /// should re-arm on return (spec §4.4 state table).
    pub async fn start(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            State::Stopped => {
                inner.state = State::Started;
                inner.generation += 1;
                let generation = inner.generation;
                let interval = inner.interval;
                drop(inner);
                self.arm(generation, interval);
            }
            State::Started => {
                inner.generation += 1;
                let generation = inner.generation;
                let interval = inner.interval;
                drop(inner);
                self.arm(generation, interval);
            }
            State::InTask => {
                inner.state = State::InTaskStarted;
            }
            State::InTaskStarted | State::InTaskStopped => {}
        }
    }

    /// `stop()` cancels a pending delay immediately; during `IN_TASK` it only
    /// records that the task's return value should be ignored (spec §4.4:
    /// "task return is ignored").
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            State::Started => {
                inner.state = State::Stopped;
                inner.generation += 1;
            }
            State::InTask => {
                inner.state = State::InTaskStopped;
            }
            State::InTaskStarted => {
                inner.state = State::InTaskStopped;
            }
            State::Stopped | State::InTaskStopped => {}
        }
    }

    fn arm(&self, generation: u64, interval: Duration) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            Timer::fire(weak, generation).await;
        });
    }

    /// Delay callback. Takes only a `Weak` handle: if the timer itself has
    /// been dropped while this task slept, there's nothing left to fire
    /// into and the callback simply does nothing. A stale `generation` means
    /// the delay was cancelled and re-armed since this sleep started (spec
    /// §4.4, "delay fires with aborted: no state change").
    async fn fire(weak: Weak<Mutex<Inner>>, generation: u64) {
        let Some(inner_arc) = weak.upgrade() else {
            return;
        };
        let this = Timer { inner: inner_arc };

        let task = {
            let mut inner = this.inner.lock().await;
            if inner.generation != generation || inner.state != State::Started {
                return;
            }
            inner.state = State::InTask;
            inner.task.take()
        };
        let Some(task) = task else { return };

        let restart_requested = task().await;

        let mut inner = this.inner.lock().await;
        inner.task = Some(task);
        match inner.state {
            State::InTask => {
                if restart_requested {
                    inner.state = State::Started;
                    inner.generation += 1;
                    let generation = inner.generation;
                    let interval = inner.interval;
                    drop(inner);
                    this.arm(generation, interval);
                } else {
                    inner.state = State::Stopped;
                }
            }
            State::InTaskStarted => {
                inner.state = State::Started;
                inner.generation += 1;
                let generation = inner.generation;
                let interval = inner.interval;
                drop(inner);
                this.arm(generation, interval);
            }
            State::InTaskStopped => {
                inner.state = State::Stopped;
            }
            State::Started | State::Stopped => {}
        }
    }
}
