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

//! `sleep_for` / `sleep_until`: the timed awaiter. Grounded on the original's
//! `timed_awaiter.h`/`.cpp`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use crate::cancellation::{CancellationRegistration, CancellationToken};
use crate::error::CoroError;
use crate::scheduler::Scheduler;
use crate::timer::TimerNode;

use super::context::current_token;

/// Suspends the calling task until `deadline`, or until its ambient cancellation token
/// (see [`current_token`]) is tripped, whichever comes first.
pub fn sleep_until(scheduler: &Scheduler, deadline: Instant) -> Sleep {
    Sleep {
        scheduler: scheduler.clone(),
        deadline,
        token: current_token(),
        node: None,
        registration: None,
    }
}

/// `sleep_until(scheduler, Instant::now() + duration)`.
pub fn sleep_for(scheduler: &Scheduler, duration: Duration) -> Sleep {
    sleep_until(scheduler, Instant::now() + duration)
}

pub struct Sleep {
    scheduler: Scheduler,
    deadline: Instant,
    token: CancellationToken,
    node: Option<Arc<TimerNode>>,
    registration: Option<CancellationRegistration>,
}

impl Sleep {
    /// Overrides the token read ambiently from the current task context. Must be called
    /// before the first `poll` (i.e. before `.await`).
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }
}

impl Future for Sleep {
    type Output = Result<(), CoroError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.node.is_none() {
            // The original checks both conditions before ever touching the timer
            // queue (`timed_awaiter.h::await_suspend`); resume-time always rechecks
            // cancellation first regardless of why the wait ended (`await_resume`).
            if self.token.is_cancellation_requested() {
                return Poll::Ready(Err(CoroError::Canceled));
            }
            if Instant::now() >= self.deadline {
                return Poll::Ready(Ok(()));
            }

            let node = TimerNode::new(self.deadline, cx.waker().clone());
            if self.token.can_be_cancelled() {
                let scheduler = self.scheduler.clone();
                let node_for_callback = Arc::clone(&node);
                self.registration = Some(CancellationRegistration::new(
                    self.token.clone(),
                    move || {
                        scheduler.remove_timer(&node_for_callback);
                        node_for_callback.fire();
                    },
                ));
            }
            self.scheduler.enqueue_timer(Arc::clone(&node));
            self.node = Some(node);
            return Poll::Pending;
        }

        if self.token.is_cancellation_requested() {
            self.registration = None;
            return Poll::Ready(Err(CoroError::Canceled));
        }
        let node = Arc::clone(self.node.as_ref().expect("checked above"));
        if node.is_shutdown_canceled() {
            // The scheduler is shutting down and drained this node before its real
            // deadline arrived (shutdown discipline — see the timer queue's `drain_all`).
            self.registration = None;
            return Poll::Ready(Err(CoroError::Canceled));
        }
        if Instant::now() >= self.deadline {
            self.registration = None;
            return Poll::Ready(Ok(()));
        }
        // Spurious wake before the deadline and without cancellation: keep the waker
        // current and keep waiting.
        node.set_waker(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(node) = &self.node {
            self.scheduler.remove_timer(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationSource;
    use crate::coro::{spawn, sync_wait};

    #[test]
    fn sleep_for_completes_after_its_duration() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let start = Instant::now();
        let scheduler_clone = scheduler.clone();
        let task = spawn(&scheduler, CancellationToken::none(), async move {
            sleep_for(&scheduler_clone, Duration::from_millis(20)).await
        });
        let result = sync_wait(task).unwrap();

        scheduler.stop();
        scheduler.join();
        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancelling_the_token_wakes_the_sleeper_early_with_canceled() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let source = CancellationSource::new();
        let token = source.token();
        let scheduler_clone = scheduler.clone();
        let task = spawn(&scheduler, CancellationToken::none(), async move {
            sleep_until(&scheduler_clone, Instant::now() + Duration::from_secs(3600))
                .with_token(token)
                .await
        });

        // Give the task a moment to register with the timer queue, then cancel.
        std::thread::sleep(Duration::from_millis(10));
        source.request_cancellation();

        let result = sync_wait(task).unwrap();
        scheduler.stop();
        scheduler.join();
        assert!(matches!(result, Err(CoroError::Canceled)));
    }
}
