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

//! Brings up the scheduler and a worker pool, runs a couple of coroutines against the
//! primitives in `coro_runtime`, then shuts everything down. The idiomatic-Rust analogue
//! of the original's `executor/main.cpp`, which starts its scheduler/thread-pool/shm
//! singletons, runs the application, and tears them down on exit.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use coro_runtime::cancellation::CancellationToken;
use coro_runtime::coro::{spawn, sync_wait, AsyncMutex, AsyncSessionTable};
use coro_runtime::log::{self, LogLevel};
use coro_runtime::scheduler::{Scheduler, WorkerPool};
use coro_runtime::shm::ShmChannel;

fn main() {
    log::init(LogLevel::Info);

    let scheduler = Scheduler::new();
    scheduler.start().expect("failed to start scheduler");

    let worker_pool = Arc::new(WorkerPool::start(2).expect("failed to start worker pool"));

    let mutex = AsyncMutex::new();
    let scheduler_clone = scheduler.clone();
    let mutex_clone = mutex.clone();
    let counter_task = spawn(&scheduler, CancellationToken::none(), async move {
        let mut total = 0u32;
        for _ in 0..3 {
            let _guard = mutex_clone.lock().await.expect("mutex lock cancelled");
            total += 1;
            coro_runtime::coro::sleep_for(&scheduler_clone, Duration::from_millis(5))
                .await
                .ok();
        }
        tracing::info!(total, "counter task finished");
        total
    });

    let sessions = Arc::new(AsyncSessionTable::new(&scheduler));
    let scheduler_clone2 = scheduler.clone();
    let worker_pool_clone = Arc::clone(&worker_pool);
    let sessions_clone = Arc::clone(&sessions);
    let worker_task = spawn(&scheduler, CancellationToken::none(), async move {
        // Round-trips through the worker pool without blocking the scheduler thread:
        // the session table suspends this task and resumes it once the worker's
        // result has been posted back.
        let session = sessions_clone.create_session();
        let result_slot = Arc::new(Mutex::new(None));
        let result_slot_clone = Arc::clone(&result_slot);
        let sessions_for_worker = Arc::clone(&sessions_clone);
        worker_pool_clone.post(move || {
            let sum: u64 = (1..=1000u64).sum();
            *result_slot_clone.lock().expect("result slot mutex poisoned") = Some(sum);
            sessions_for_worker.wake_up_session(session);
        });
        sessions_clone.wait(session).await;
        let sum = result_slot.lock().expect("result slot mutex poisoned").expect("worker posted no result");
        tracing::info!(sum, "worker pool computed a sum");
        sleep_until_scheduler_quiet(&scheduler_clone2).await;
        sum
    });

    let channel_task = spawn(&scheduler, CancellationToken::none(), async move {
        let a_to_b = ShmChannel::create("coro-demo-a", "coro-demo-b", 256)
            .expect("failed to create shared-memory channel");
        let wrote = a_to_b.write(b"hello from coro-runtime").await.is_ok();
        tracing::info!(wrote, "wrote a demo message to the shared-memory channel");
    });

    let total = sync_wait(counter_task).expect("counter task failed");
    let sum = sync_wait(worker_task).expect("worker task failed");
    sync_wait(channel_task).expect("channel task failed");

    tracing::info!(total, sum, "demo finished");

    scheduler.stop();
    scheduler.join();
    worker_pool.stop();
    worker_pool.join();
}

/// A tiny helper that just yields the task once via a short sleep, giving the demo a
/// deterministic point to log from after the worker pool round-trip.
async fn sleep_until_scheduler_quiet(scheduler: &Scheduler) {
    coro_runtime::coro::sleep_for(scheduler, Duration::from_millis(1))
        .await
        .ok();
}
