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

//! `spawn_detached`: fire-and-forget tasks with no `Task<T>` handle.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::task::{waker_ref, ArcWake};

use crate::cancellation::CancellationToken;
use crate::scheduler::{Runnable, Scheduler};

use super::context::with_task;

/// A detached task's shared state. Unlike [`super::task::Shared`] there is no slot and
/// no outer waker — nothing ever awaits this, so there is nothing to resume on
/// completion.
struct Shared<F> {
    future: Mutex<Option<Pin<Box<F>>>>,
    token: CancellationToken,
    scheduler: Scheduler,
}

impl<F> ArcWake for Shared<F>
where
    F: Future + Send + 'static,
{
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.scheduler.wake_up(Arc::clone(arc_self) as Arc<dyn Runnable>);
    }
}

impl<F, E> Runnable for Shared<F>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display,
{
    fn run(self: Arc<Self>) {
        let mut future_slot = self.future.lock().expect("detached task future mutex poisoned");
        let Some(mut future) = future_slot.take() else {
            // Two wakes coalesced onto the same FIFO entry before the first run; the
            // second is a no-op (the first already consumed or completed the future).
            return;
        };

        let waker = waker_ref(&self);
        let mut cx = Context::from_waker(&waker);
        let token = self.token.clone();
        let task_id = Arc::as_ptr(&self) as usize;
        let poll_result = with_task(token, task_id, || future.as_mut().poll(&mut cx));

        match poll_result {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(error)) => {
                tracing::warn!(%error, "detached task failed");
            }
            Poll::Pending => {
                *future_slot = Some(future);
            }
        }
    }
}

/// Spawns `future` and immediately starts driving it; its result is never observable by
/// the caller. `Ok(())` is silent, `Err(_)` is logged via `tracing::warn!` and
/// swallowed — by design, so a failing background task never takes the process down.
pub fn spawn_detached<F, E>(scheduler: &Scheduler, token: CancellationToken, future: F)
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display,
{
    let shared = Arc::new(Shared {
        future: Mutex::new(Some(Box::pin(future))),
        token,
        scheduler: scheduler.clone(),
    });

    scheduler.wake_up(shared as Arc<dyn Runnable>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coro::sleep_for;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn detached_ok_task_runs_silently_to_completion() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        spawn_detached(&scheduler, CancellationToken::none(), async move {
            ran2.store(true, Ordering::SeqCst);
            Ok::<(), String>(())
        });

        // Give the detached task's first (and only) poll a chance to run, then drain.
        let scheduler2 = scheduler.clone();
        scheduler.post(move || scheduler2.stop());
        scheduler.join();

        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn detached_err_task_is_logged_and_swallowed() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let scheduler_clone = scheduler.clone();
        spawn_detached(&scheduler, CancellationToken::none(), async move {
            sleep_for(&scheduler_clone, Duration::from_millis(1)).await.ok();
            Err::<(), _>("boom")
        });

        std::thread::sleep(Duration::from_millis(30));
        scheduler.stop();
        scheduler.join();
        // No panic, no observable handle — the assertion is simply that we got here.
    }
}
