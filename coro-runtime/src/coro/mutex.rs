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

//! An async mutex: a future-returning `lock()` instead of a blocking one. Grounded on
//! the original's `mutex_state` (`mutex.cpp`), whose intrusive awaiter list is replaced
//! here by a `slotmap` wait queue — the same substitution used for the cancellation
//! registration table (DESIGN.md).

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll, Waker};

use slotmap::{new_key_type, SlotMap};

use crate::cancellation::{CancellationRegistration, CancellationToken};
use crate::error::CoroError;

use super::context::{current_task_id, current_token, TaskId};

new_key_type! {
    struct WaiterKey;
}

struct Waiter {
    waker: Waker,
    task: Option<TaskId>,
}

struct State {
    locked: bool,
    /// The task currently holding the lock, and how many outstanding guards it holds
    /// (always `>= 1` while `locked`). A second `lock()` from that same task doesn't
    /// queue — it just bumps `depth` and returns immediately (`mutex.cpp`'s recursive
    /// semantics).
    owner: Option<TaskId>,
    depth: u32,
    waiters: SlotMap<WaiterKey, Waiter>,
    order: std::collections::VecDeque<WaiterKey>,
}

/// A mutex that hands its lock off directly to the next waiter on `unlock`, rather than
/// releasing it for anyone to grab — the same FIFO fairness as the original's
/// intrusive-list handoff. `lock()` called again by the task that already holds it is a
/// no-op rather than a deadlock (recursive, matching the original).
#[derive(Clone)]
pub struct AsyncMutex {
    state: Arc<StdMutex<State>>,
}

impl AsyncMutex {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StdMutex::new(State {
                locked: false,
                owner: None,
                depth: 0,
                waiters: SlotMap::with_key(),
                order: std::collections::VecDeque::new(),
            })),
        }
    }

    pub fn lock(&self) -> Lock<'_> {
        Lock {
            mutex: self,
            key: None,
            token: current_token(),
            registration: None,
        }
    }

    /// Called once per guard drop. Only actually releases the lock (and hands it off)
    /// once every re-entrant guard the owning task took out has been dropped.
    fn unlock(&self) {
        let mut state = self.state.lock().expect("mutex state poisoned");
        debug_assert!(state.depth > 0, "unlock with no outstanding guard");
        state.depth -= 1;
        if state.depth > 0 {
            return;
        }

        while let Some(key) = state.order.pop_front() {
            if let Some(waiter) = state.waiters.remove(key) {
                // Ownership transfers straight to this waiter; `locked` stays `true`.
                state.owner = waiter.task;
                state.depth = 1;
                waiter.waker.wake();
                return;
            }
            // `key` belonged to a cancelled `Lock` future (see its `Drop`); keep
            // looking for the next live waiter.
        }
        state.locked = false;
        state.owner = None;
    }
}

impl Default for AsyncMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`AsyncMutex::lock`].
///
/// Cancellation is only honored while the waiter's key is still present in
/// `state.waiters`: once [`AsyncMutex::unlock`]'s pop loop removes it, ownership has
/// already transferred structurally (the key's removal *is* the hand-off), and this
/// future resolves `Ok` regardless of a concurrent cancellation request — failing it at
/// that point would leak the lock forever, since no guard would ever exist to call
/// `unlock()`.
pub struct Lock<'a> {
    mutex: &'a AsyncMutex,
    key: Option<WaiterKey>,
    token: CancellationToken,
    registration: Option<CancellationRegistration>,
}

impl<'a> Lock<'a> {
    /// Overrides the token read ambiently from the current task context. Must be called
    /// before the first `poll` (i.e. before `.await`).
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }
}

impl<'a> Future for Lock<'a> {
    type Output = Result<AsyncMutexGuard<'a>, CoroError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.mutex.state.lock().expect("mutex state poisoned");

        if let Some(key) = self.key {
            if let Some(waiter) = state.waiters.get_mut(key) {
                if self.token.is_cancellation_requested() {
                    state.waiters.remove(key);
                    drop(state);
                    self.key = None;
                    self.registration = None;
                    return Poll::Ready(Err(CoroError::Canceled));
                }
                // Spurious repoll while still queued: keep the waker fresh.
                waiter.waker = cx.waker().clone();
                return Poll::Pending;
            }
            // Removed by `unlock` — the lock was handed to us directly. Already
            // structurally owned: this resolves `Ok` even if cancellation fired after
            // the hand-off but before this poll observed it.
            self.key = None;
            self.registration = None;
            return Poll::Ready(Ok(AsyncMutexGuard { mutex: self.mutex }));
        }

        let current = current_task_id();
        if state.locked {
            if current.is_some() && state.owner == current {
                state.depth += 1;
                return Poll::Ready(Ok(AsyncMutexGuard { mutex: self.mutex }));
            }
            if self.token.is_cancellation_requested() {
                return Poll::Ready(Err(CoroError::Canceled));
            }
            let key = state.waiters.insert(Waiter {
                waker: cx.waker().clone(),
                task: current,
            });
            state.order.push_back(key);
            self.key = Some(key);
            drop(state);

            if self.token.can_be_cancelled() {
                let mutex_state = Arc::clone(&self.mutex.state);
                self.registration = Some(CancellationRegistration::new(self.token.clone(), move || {
                    // Only wakes — the poll that runs next is what decides whether the
                    // waiter is still queued (and so removable) or already handed the
                    // lock by `unlock`.
                    let state = mutex_state.lock().expect("mutex state poisoned");
                    if let Some(waiter) = state.waiters.get(key) {
                        waiter.waker.wake_by_ref();
                    }
                }));
            }
            return Poll::Pending;
        }

        state.locked = true;
        state.owner = current;
        state.depth = 1;
        Poll::Ready(Ok(AsyncMutexGuard { mutex: self.mutex }))
    }
}

impl Drop for Lock<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut state = self.mutex.state.lock().expect("mutex state poisoned");
            state.waiters.remove(key);
        }
    }
}

/// RAII guard; unlocking happens on `Drop`, handing off to the next queued waiter once
/// every re-entrant guard of the current owner has been dropped.
pub struct AsyncMutexGuard<'a> {
    mutex: &'a AsyncMutex,
}

impl<'a> AsyncMutexGuard<'a> {
    /// Escape hatch for [`super::condvar::AsyncCondvar::wait`], which needs to drop the
    /// guard (unlocking) and remember which mutex to re-lock afterwards.
    pub(super) fn mutex(&self) -> &'a AsyncMutex {
        self.mutex
    }
}

impl Drop for AsyncMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn serialises_access_in_arrival_order() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let mutex = AsyncMutex::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for i in 0..5 {
            let mutex = mutex.clone();
            let order = Arc::clone(&order);
            tasks.push(crate::coro::spawn(
                &scheduler,
                crate::cancellation::CancellationToken::none(),
                async move {
                    let _guard = mutex.lock().await.unwrap();
                    order.lock().unwrap().push(i);
                    std::thread::sleep(Duration::from_millis(1));
                },
            ));
        }

        for task in tasks {
            crate::coro::sync_wait(task).unwrap();
        }

        scheduler.stop();
        scheduler.join();
        assert_eq!(order.lock().unwrap().len(), 5);
    }

    #[test]
    fn dropping_an_unpolled_lock_future_is_a_no_op() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let mutex = AsyncMutex::new();
        let counter = Arc::new(AtomicUsize::new(0));

        // Never polled, so it never registered as a waiter or took the lock.
        drop(mutex.lock());
        let task = crate::coro::spawn(
            &scheduler,
            crate::cancellation::CancellationToken::none(),
            {
                let counter = Arc::clone(&counter);
                async move {
                    let _guard = mutex.lock().await.unwrap();
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );
        crate::coro::sync_wait(task).unwrap();

        scheduler.stop();
        scheduler.join();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn relocking_from_the_same_task_is_a_recursive_no_op() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let mutex = AsyncMutex::new();
        let entered = Arc::new(AtomicUsize::new(0));
        let entered2 = Arc::clone(&entered);
        let mutex2 = mutex.clone();

        let task = crate::coro::spawn(
            &scheduler,
            crate::cancellation::CancellationToken::none(),
            async move {
                let _outer = mutex2.lock().await.unwrap();
                // Re-entering from the same task must not deadlock against its own
                // held lock.
                let _inner = mutex2.lock().await.unwrap();
                entered2.fetch_add(1, Ordering::SeqCst);
            },
        );
        crate::coro::sync_wait(task).unwrap();

        // The lock must be fully released (not stuck at depth 1) once both guards
        // have dropped: a fresh lock attempt from outside any task succeeds.
        let second = crate::coro::sync_wait(async { mutex.lock().await }).unwrap();
        drop(second);

        scheduler.stop();
        scheduler.join();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn two_different_tasks_still_serialise_even_with_recursive_support() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let mutex = AsyncMutex::new();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..2 {
            let mutex = mutex.clone();
            let concurrent = Arc::clone(&concurrent);
            let max_concurrent = Arc::clone(&max_concurrent);
            tasks.push(crate::coro::spawn(
                &scheduler,
                crate::cancellation::CancellationToken::none(),
                async move {
                    let _guard = mutex.lock().await.unwrap();
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(5));
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                },
            ));
        }

        for task in tasks {
            crate::coro::sync_wait(task).unwrap();
        }

        scheduler.stop();
        scheduler.join();
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelling_a_queued_waiter_resolves_it_with_canceled_without_taking_the_lock() {
        use crate::cancellation::CancellationSource;

        let scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let mutex = AsyncMutex::new();
        let holder_can_release = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let holder_can_release2 = Arc::clone(&holder_can_release);
        let mutex2 = mutex.clone();

        // Take the lock first so the second task's `lock()` genuinely queues.
        let holder = crate::coro::spawn(&scheduler, CancellationToken::none(), async move {
            let _guard = mutex2.lock().await.unwrap();
            while !holder_can_release2.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        std::thread::sleep(Duration::from_millis(10));

        let source = CancellationSource::new();
        let token = source.token();
        let mutex3 = mutex.clone();
        let waiter = crate::coro::spawn(&scheduler, CancellationToken::none(), async move {
            mutex3.lock().with_token(token).await
        });
        std::thread::sleep(Duration::from_millis(10));

        source.request_cancellation();
        let result = crate::coro::sync_wait(waiter).unwrap();
        assert!(matches!(result, Err(CoroError::Canceled)));

        holder_can_release.store(true, Ordering::SeqCst);
        crate::coro::sync_wait(holder).unwrap();

        // The lock must still be free: a fresh lock attempt succeeds immediately.
        let fresh = crate::coro::sync_wait(async { mutex.lock().await }).unwrap();
        drop(fresh);

        scheduler.stop();
        scheduler.join();
    }
}
