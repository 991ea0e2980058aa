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

//! An async condition variable paired with [`AsyncMutex`]. Not present as a distinct
//! type in the original (the C++ runtime only ever rendezvous'd through
//! `async_session`'s session table), but every other primitive in §4.4 needs the usual
//! "wait releases the lock, re-acquires it on wake" shape, so it's built here the same
//! way the mutex is: a `slotmap` waiter table instead of an intrusive list.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};

use slotmap::{new_key_type, SlotMap};

use crate::cancellation::{CancellationRegistration, CancellationToken};
use crate::error::CoroError;

use super::context::current_token;
use super::mutex::{AsyncMutex, AsyncMutexGuard, Lock};

new_key_type! {
    struct WaiterKey;
}

pub struct AsyncCondvar {
    waiters: Arc<StdMutex<SlotMap<WaiterKey, std::task::Waker>>>,
}

impl AsyncCondvar {
    pub fn new() -> Self {
        Self {
            waiters: Arc::new(StdMutex::new(SlotMap::with_key())),
        }
    }

    /// Wakes one waiter, if any.
    pub fn notify_one(&self) {
        let mut waiters = self.waiters.lock().expect("condvar waiters mutex poisoned");
        if let Some((key, _)) = waiters.iter().next().map(|(k, w)| (k, w.clone())) {
            if let Some(waker) = waiters.remove(key) {
                waker.wake();
            }
        }
    }

    /// Wakes every current waiter.
    pub fn notify_all(&self) {
        let mut waiters = self.waiters.lock().expect("condvar waiters mutex poisoned");
        for (_, waker) in std::mem::take(&mut *waiters) {
            waker.wake();
        }
    }

    /// Releases `guard`'s lock, waits to be notified, then re-acquires the same mutex
    /// and returns a fresh guard — mirroring `std::sync::Condvar::wait`'s shape for the
    /// async world.
    pub fn wait<'a>(&'a self, guard: AsyncMutexGuard<'a>) -> Wait<'a> {
        let mutex = guard.mutex();
        drop(guard);
        Wait {
            condvar: self,
            state: WaitState::Registering { mutex },
            token: current_token(),
            registration: None,
        }
    }
}

impl Default for AsyncCondvar {
    fn default() -> Self {
        Self::new()
    }
}

enum WaitState<'a> {
    Registering { mutex: &'a AsyncMutex },
    Waiting { key: WaiterKey, mutex: &'a AsyncMutex },
    Relocking(Lock<'a>),
}

pub struct Wait<'a> {
    condvar: &'a AsyncCondvar,
    state: WaitState<'a>,
    token: CancellationToken,
    registration: Option<CancellationRegistration>,
}

impl<'a> Wait<'a> {
    /// Overrides the token read ambiently from the current task context. Must be called
    /// before the first `poll` (i.e. before `.await`).
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }
}

impl<'a> Future for Wait<'a> {
    type Output = Result<AsyncMutexGuard<'a>, CoroError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                WaitState::Registering { mutex } => {
                    let mutex = *mutex;
                    if this.token.is_cancellation_requested() {
                        return Poll::Ready(Err(CoroError::Canceled));
                    }
                    let key = this
                        .condvar
                        .waiters
                        .lock()
                        .expect("condvar waiters mutex poisoned")
                        .insert(cx.waker().clone());

                    if this.token.can_be_cancelled() {
                        let waiters = Arc::clone(&this.condvar.waiters);
                        this.registration = Some(CancellationRegistration::new(this.token.clone(), move || {
                            let waiters = waiters.lock().expect("condvar waiters mutex poisoned");
                            if let Some(waker) = waiters.get(key) {
                                waker.wake_by_ref();
                            }
                        }));
                    }
                    this.state = WaitState::Waiting { key, mutex };
                    return Poll::Pending;
                }
                WaitState::Waiting { key, mutex } => {
                    let key = *key;
                    let mutex = *mutex;
                    if this.token.is_cancellation_requested() {
                        this.condvar.waiters.lock().expect("condvar waiters mutex poisoned").remove(key);
                        this.registration = None;
                        return Poll::Ready(Err(CoroError::Canceled));
                    }
                    let mut waiters = this.condvar.waiters.lock().expect("condvar waiters mutex poisoned");
                    if waiters.contains_key(key) {
                        waiters[key] = cx.waker().clone();
                        return Poll::Pending;
                    }
                    drop(waiters);
                    this.registration = None;
                    this.state = WaitState::Relocking(mutex.lock().with_token(this.token.clone()));
                }
                WaitState::Relocking(lock) => match Pin::new(lock).poll(cx) {
                    Poll::Ready(result) => return Poll::Ready(result),
                    Poll::Pending => return Poll::Pending,
                },
            }
        }
    }
}

impl Drop for Wait<'_> {
    fn drop(&mut self) {
        if let WaitState::Waiting { key, .. } = &self.state {
            self.condvar
                .waiters
                .lock()
                .expect("condvar waiters mutex poisoned")
                .remove(*key);
        }
    }
}
