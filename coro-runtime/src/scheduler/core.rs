/*
 *   Copyright (c) 2022 R3BL LLC
 *   All rights reserved.
 *
 *   Licensed under the Apache License, Version 2.0 (the "License");
 *   you may not use this file except in compliance with the License.
 *   You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 *   Unless required by applicable law or agreed to in writing, software
 *   distributed under the License is distributed on an "AS IS" BASIS,
 *   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *   See the License for the specific language governing permissions and
 *   limitations under the License.
 */

//! The single-threaded scheduler: a dedicated OS thread running a closure/runnable run
//! loop, backed by the [`TimeQueue`](crate::timer::TimeQueue).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::error::RuntimeError;
use crate::timer::{TimeQueue, TimerNode};

/// A unit of work the scheduler polls from its runnable FIFO, always through `wake_up` —
/// never resumed inline from inside another poll, to keep stack depth bounded.
///
/// Implemented by the task state backing [`spawn`](crate::coro::spawn) and
/// [`spawn_detached`](crate::coro::spawn_detached); `self: Arc<Self>` lets the scheduler
/// hold a runnable without knowing its concrete future type.
pub trait Runnable: Send + Sync {
    fn run(self: Arc<Self>);
}

/// Knobs for [`Scheduler::start_with_config`]. No original analogue — the C++ runtime's
/// dedicated thread is unnamed; this exists purely for the embedding application's own
/// diagnostics (a named thread shows up in `top`/panics/`tracing` spans).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name: "coro-scheduler".to_owned(),
        }
    }
}

struct Queues {
    closures: VecDeque<Box<dyn FnOnce() + Send>>,
    runnables: VecDeque<Arc<dyn Runnable>>,
    stopping: bool,
}

impl Default for Queues {
    fn default() -> Self {
        Self {
            closures: VecDeque::new(),
            runnables: VecDeque::new(),
            stopping: false,
        }
    }
}

struct Inner {
    queues: Mutex<Queues>,
    cv: Condvar,
    timers: Mutex<TimeQueue>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the scheduler. Cheap to clone — every clone shares the same dedicated
/// thread and queues.
///
/// There is no hidden process-wide singleton: callers construct one `Scheduler` (usually
/// exactly one, since the run loop is single-threaded) and pass clones to
/// whatever needs to post work onto it. [`Scheduler::current`] is the thread-local escape
/// hatch awaiters use to reach *a* scheduler without one being threaded through every
/// `poll` call.
#[derive(Clone)]
pub struct Scheduler(Arc<Inner>);

thread_local! {
    static CURRENT: RefCell<Option<Scheduler>> = const { RefCell::new(None) };
}

impl Scheduler {
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            queues: Mutex::new(Queues::default()),
            cv: Condvar::new(),
            timers: Mutex::new(TimeQueue::new()),
            thread: Mutex::new(None),
        }))
    }

    /// The scheduler running on the calling thread, if any. `None` on a thread that
    /// isn't a scheduler's dedicated thread (e.g. a worker-pool thread, or the thread
    /// that called [`Scheduler::start`]).
    pub fn current() -> Option<Scheduler> {
        CURRENT.with(|cell| cell.borrow().clone())
    }

    /// Spawns the dedicated thread and starts the run loop, using [`SchedulerConfig::default`].
    /// Calling `start` twice on the same handle without an intervening `join` panics —
    /// that's a programmer bug, not a recoverable runtime condition.
    pub fn start(&self) -> Result<(), RuntimeError> {
        self.start_with_config(SchedulerConfig::default())
    }

    /// Same as [`Scheduler::start`], naming the dedicated thread per `config`.
    pub fn start_with_config(&self, config: SchedulerConfig) -> Result<(), RuntimeError> {
        let mut thread_guard = self.0.thread.lock().expect("scheduler mutex poisoned");
        assert!(thread_guard.is_none(), "scheduler already started");

        let inner = Arc::clone(&self.0);
        let handle = std::thread::Builder::new()
            .name(config.thread_name)
            .spawn(move || run_loop(Scheduler(inner)))
            .map_err(RuntimeError::SchedulerThreadSpawn)?;
        *thread_guard = Some(handle);
        tracing::info!("scheduler thread started");
        Ok(())
    }

    /// Enqueues `f` from any thread and wakes the run loop.
    pub fn post(&self, f: impl FnOnce() + Send + 'static) {
        let mut guard = self.0.queues.lock().expect("scheduler mutex poisoned");
        guard.closures.push_back(Box::new(f));
        self.0.cv.notify_one();
    }

    /// Runs `f` inline if called from this scheduler's own thread; otherwise behaves
    /// exactly like [`Scheduler::post`].
    pub fn post_immediate(&self, f: impl FnOnce() + Send + 'static) {
        if self.is_current() {
            f();
        } else {
            self.post(f);
        }
    }

    /// Whether the calling thread is this scheduler's dedicated thread.
    pub fn is_current(&self) -> bool {
        Self::current().is_some_and(|current| Arc::ptr_eq(&current.0, &self.0))
    }

    /// Enqueues a runnable task for polling. Always goes through the FIFO, even from
    /// inside another poll on this scheduler's own thread.
    pub fn wake_up(&self, runnable: Arc<dyn Runnable>) {
        let mut guard = self.0.queues.lock().expect("scheduler mutex poisoned");
        guard.runnables.push_back(runnable);
        self.0.cv.notify_one();
    }

    /// Requests the run loop to exit once its current queues drain. Any timer-driven
    /// awaiter still pending at that point is woken with `Canceled` rather than waiting
    /// out its real deadline, via the timer queue's `drain_all`. Idempotent.
    pub fn stop(&self) {
        let mut guard = self.0.queues.lock().expect("scheduler mutex poisoned");
        guard.stopping = true;
        self.0.cv.notify_all();
    }

    /// Blocks until the dedicated thread exits. A no-op if the scheduler was never
    /// started, or has already been joined.
    pub fn join(&self) {
        let handle = self.0.thread.lock().expect("scheduler mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    pub(crate) fn enqueue_timer(&self, node: Arc<TimerNode>) {
        self.0
            .timers
            .lock()
            .expect("timer queue mutex poisoned")
            .enqueue(node);
        self.0.cv.notify_one();
    }

    pub(crate) fn remove_timer(&self, node: &Arc<TimerNode>) -> bool {
        self.0
            .timers
            .lock()
            .expect("timer queue mutex poisoned")
            .remove(node)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn run_loop(scheduler: Scheduler) {
    CURRENT.with(|cell| *cell.borrow_mut() = Some(scheduler.clone()));
    let inner = &scheduler.0;

    loop {
        let (closures, runnables) = {
            let mut guard = inner.queues.lock().expect("scheduler mutex poisoned");
            loop {
                if !guard.closures.is_empty() || !guard.runnables.is_empty() {
                    break;
                }
                // Shutting down: drain remaining timers below instead of waiting out
                // their real deadlines.
                if guard.stopping {
                    break;
                }
                let wait = inner
                    .timers
                    .lock()
                    .expect("timer queue mutex poisoned")
                    .wait_duration(Instant::now());
                match wait {
                    Some(duration) if duration.is_zero() => break,
                    Some(duration) => {
                        guard = inner
                            .cv
                            .wait_timeout(guard, duration)
                            .expect("scheduler mutex poisoned")
                            .0;
                    }
                    None => guard = inner.cv.wait(guard).expect("scheduler mutex poisoned"),
                }
            }
            (
                guard.closures.drain(..).collect::<Vec<_>>(),
                guard.runnables.drain(..).collect::<Vec<_>>(),
            )
        };

        for closure in closures {
            closure();
        }
        for runnable in runnables {
            runnable.run();
        }

        let ready = inner
            .timers
            .lock()
            .expect("timer queue mutex poisoned")
            .drain_ready(Instant::now());
        for node in ready {
            node.fire();
        }

        if inner.queues.lock().expect("scheduler mutex poisoned").stopping {
            inner.timers.lock().expect("timer queue mutex poisoned").drain_all();
        }

        let should_exit = {
            let guard = inner.queues.lock().expect("scheduler mutex poisoned");
            guard.stopping && guard.closures.is_empty() && guard.runnables.is_empty()
        };
        if should_exit {
            break;
        }
    }

    CURRENT.with(|cell| *cell.borrow_mut() = None);
    tracing::info!("scheduler thread exiting");
}
