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

//! A fixed-size pool of OS threads for blocking work (file I/O, DNS, CPU-bound
//! helpers) that must not run on the scheduler's own thread.
//!
//! The pool never polls a task directly — callers post a plain closure and, if they
//! need to resume a coroutine afterwards, post the result back onto a [`Scheduler`]
//! themselves from inside that closure.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::error::RuntimeError;

/// Knobs for [`WorkerPool::start_with_config`]. Grounded on `thread_pool.h`'s constructor
/// parameter (a plain thread count); `Default` picks the available parallelism, falling
/// back to 4 if it can't be queried.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub num_threads: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
        }
    }
}

type Job = Box<dyn FnOnce() + Send>;

struct Queue {
    jobs: VecDeque<Job>,
    stopping: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    cv: Condvar,
}

/// A pool of `num_threads` worker threads, each pulling from one shared FIFO.
pub struct WorkerPool {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `num_threads` worker threads immediately.
    pub fn start(num_threads: usize) -> Result<Self, RuntimeError> {
        Self::start_with_config(WorkerPoolConfig { num_threads })
    }

    /// Same as [`WorkerPool::start`], reading the thread count from `config`.
    pub fn start_with_config(config: WorkerPoolConfig) -> Result<Self, RuntimeError> {
        let num_threads = config.num_threads;
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                stopping: false,
            }),
            cv: Condvar::new(),
        });

        let mut threads = Vec::with_capacity(num_threads);
        for index in 0..num_threads {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("coro-worker-{index}"))
                .spawn(move || worker_loop(shared))
                .map_err(RuntimeError::SchedulerThreadSpawn)?;
            threads.push(handle);
        }

        tracing::info!(num_threads, "worker pool started");
        Ok(Self {
            shared,
            threads: Mutex::new(threads),
        })
    }

    /// Enqueues a blocking closure for some worker thread to run.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) {
        self.shared.queue.lock().expect("worker pool mutex poisoned").jobs.push_back(Box::new(job));
        self.shared.cv.notify_one();
    }

    /// Requests every worker thread to exit once its queue drains. Idempotent.
    pub fn stop(&self) {
        self.shared.queue.lock().expect("worker pool mutex poisoned").stopping = true;
        self.shared.cv.notify_all();
    }

    /// Blocks until every worker thread has exited.
    pub fn join(&self) {
        let handles = std::mem::take(&mut *self.threads.lock().expect("worker pool mutex poisoned"));
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock().expect("worker pool mutex poisoned");
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break Some(job);
                }
                if queue.stopping {
                    break None;
                }
                queue = shared.cv.wait(queue).expect("worker pool mutex poisoned");
            }
        };
        match job {
            Some(job) => job(),
            None => break,
        }
    }
}
