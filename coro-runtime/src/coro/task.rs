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

//! `Task<T>`: an awaitable handle to a future running on a [`Scheduler`].

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use futures_util::task::{waker_ref, ArcWake};

use crate::cancellation::CancellationToken;
use crate::error::CoroError;
use crate::scheduler::{Runnable, Scheduler};

use super::context::with_task;

enum Slot<T> {
    Pending,
    Done(Result<T, CoroError>),
    Taken,
}

struct Shared<T> {
    future: Mutex<Option<Pin<Box<dyn Future<Output = T> + Send>>>>,
    slot: Mutex<Slot<T>>,
    /// Woken when the future completes; read by [`Task::poll`].
    outer_waker: Mutex<Option<Waker>>,
    token: CancellationToken,
    scheduler: Scheduler,
}

impl<T: Send + 'static> ArcWake for Shared<T> {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.scheduler.wake_up(Arc::clone(arc_self) as Arc<dyn Runnable>);
    }
}

impl<T: Send + 'static> Runnable for Shared<T> {
    fn run(self: Arc<Self>) {
        let mut future_slot = self.future.lock().expect("task future mutex poisoned");
        let Some(mut future) = future_slot.take() else {
            // Already completed (e.g. two wakes coalesced onto one FIFO entry — see
            // `DetachedTask` for the identical race) and run twice.
            return;
        };

        let waker = waker_ref(&self);
        let mut cx = Context::from_waker(&waker);
        let token = self.token.clone();
        let task_id = Arc::as_ptr(&self) as usize;
        let poll_result = with_task(token, task_id, || future.as_mut().poll(&mut cx));

        match poll_result {
            Poll::Ready(value) => {
                *self.slot.lock().expect("task slot mutex poisoned") = Slot::Done(Ok(value));
                if let Some(waker) = self
                    .outer_waker
                    .lock()
                    .expect("task outer waker mutex poisoned")
                    .take()
                {
                    waker.wake();
                }
            }
            Poll::Pending => {
                *future_slot = Some(future);
            }
        }
    }
}

/// A spawned future's handle. Starts lazily — nothing runs until the scheduler first
/// polls it, which happens the moment `spawn` hands it to [`Scheduler::wake_up`].
///
/// Awaiting a `Task` after it has already yielded its result once returns
/// `Err(CoroError::InvalidAction)` on the second and subsequent polls, rather than
/// panicking or hanging.
pub struct Task<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Future for Task<T> {
    type Output = Result<T, CoroError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock().expect("task slot mutex poisoned");
        match &*slot {
            Slot::Pending => {
                *self
                    .shared
                    .outer_waker
                    .lock()
                    .expect("task outer waker mutex poisoned") = Some(cx.waker().clone());
                Poll::Pending
            }
            Slot::Done(_) => {
                let Slot::Done(result) = std::mem::replace(&mut *slot, Slot::Taken) else {
                    unreachable!("matched Done above")
                };
                Poll::Ready(result)
            }
            Slot::Taken => Poll::Ready(Err(CoroError::InvalidAction)),
        }
    }
}

/// Spawns `future` on `scheduler` under `token`, returning a handle to await its result.
///
/// `token` is explicit — there is no ambient inheritance from a parent task. Callers that
/// want a child task to share its parent's cancellation scope clone the parent's token
/// into this call.
pub fn spawn<F, T>(scheduler: &Scheduler, token: CancellationToken, future: F) -> Task<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let shared = Arc::new(Shared {
        future: Mutex::new(Some(Box::pin(future))),
        slot: Mutex::new(Slot::Pending),
        outer_waker: Mutex::new(None),
        token,
        scheduler: scheduler.clone(),
    });

    scheduler.wake_up(Arc::clone(&shared) as Arc<dyn Runnable>);
    Task { shared }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coro::sleep_for;
    use crate::coro::sync_wait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn spawned_task_runs_to_completion_and_returns_value() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let task = spawn(&scheduler, CancellationToken::none(), async { 7 });
        let result = sync_wait(task);

        scheduler.stop();
        scheduler.join();
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn awaiting_task_twice_yields_invalid_action() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let mut task = Box::pin(spawn(&scheduler, CancellationToken::none(), async { 1 }));
        let waker = crate::scheduler::test_support::counting_waker(Arc::new(AtomicUsize::new(0)));
        let mut cx = Context::from_waker(&waker);

        let first = loop {
            match task.as_mut().poll(&mut cx) {
                Poll::Ready(value) => break value,
                Poll::Pending => std::thread::sleep(Duration::from_millis(1)),
            }
        };
        assert_eq!(first.unwrap(), 1);

        let second = match task.as_mut().poll(&mut cx) {
            Poll::Ready(value) => value,
            Poll::Pending => panic!("second poll of a completed task must resolve immediately"),
        };
        assert!(matches!(second, Err(CoroError::InvalidAction)));

        scheduler.stop();
        scheduler.join();
    }

    #[test]
    fn task_can_itself_await_a_timer() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let scheduler_clone = scheduler.clone();
        let task = spawn(&scheduler, CancellationToken::none(), async move {
            sleep_for(&scheduler_clone, Duration::from_millis(5)).await.ok();
            42
        });
        let result = sync_wait(task);

        scheduler.stop();
        scheduler.join();
        assert_eq!(result.unwrap(), 42);
    }
}
