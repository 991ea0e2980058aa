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

//! Session rendezvous: hand out a session id before an external request goes out, wake
//! the waiting task when its response arrives. Grounded on the original's
//! `async_session.cpp`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::scheduler::Scheduler;

/// A table mapping session ids to the waker of whichever task is awaiting that
/// session's response.
///
/// Invariant: at most one waiting task per session. `wake_up_session` looks up and
/// erases atomically so a session can only ever be woken once.
pub struct AsyncSessionTable {
    scheduler: Scheduler,
    next_session: AtomicU64,
    waiters: Mutex<HashMap<u64, Waker>>,
}

impl AsyncSessionTable {
    pub fn new(scheduler: &Scheduler) -> Self {
        Self {
            scheduler: scheduler.clone(),
            next_session: AtomicU64::new(0),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates a fresh session id. `0` is reserved as "no session", so the sequence
    /// wraps past it rather than ever handing it out.
    pub fn create_session(&self) -> u64 {
        loop {
            let session = self.next_session.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if session != 0 {
                return session;
            }
        }
    }

    /// Looks up and wakes `session`'s waiter, if still pending. Runs inline if called
    /// from the owning scheduler's own thread (the fast path the original takes for
    /// same-thread completions); otherwise posts the lookup-and-wake onto the
    /// scheduler so the erase-and-wake always happens from that one thread. The
    /// `Arc<Self>` receiver is what makes the cross-thread `post` possible — the
    /// closure needs owned, `'static` access to the table.
    pub fn wake_up_session(self: &Arc<Self>, session: u64) {
        if self.scheduler.is_current() {
            self.wake_now(session);
            return;
        }
        let this = Arc::clone(self);
        self.scheduler.post(move || this.wake_now(session));
    }

    fn wake_now(&self, session: u64) {
        let waker = self.waiters.lock().expect("session table mutex poisoned").remove(&session);
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Suspends the calling task until `wake_up_session(session)` is called.
    pub fn wait(&self, session: u64) -> Wait<'_> {
        Wait {
            table: self,
            session,
            registered: false,
        }
    }
}

pub struct Wait<'a> {
    table: &'a AsyncSessionTable,
    session: u64,
    registered: bool,
}

impl<'a> Future for Wait<'a> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut waiters = self.table.waiters.lock().expect("session table mutex poisoned");
        if self.registered {
            // `wake_up_session` erases the entry before waking, so its absence here
            // means the response arrived; its presence means this poll was spurious
            // (e.g. a shared waker woken by an unrelated future) and the wait continues.
            if !waiters.contains_key(&self.session) {
                return Poll::Ready(());
            }
            waiters.insert(self.session, cx.waker().clone());
            return Poll::Pending;
        }
        waiters.insert(self.session, cx.waker().clone());
        drop(waiters);
        self.registered = true;
        Poll::Pending
    }
}

impl Drop for Wait<'_> {
    fn drop(&mut self) {
        if self.registered {
            self.table
                .waiters
                .lock()
                .expect("session table mutex poisoned")
                .remove(&self.session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::coro::{spawn, sync_wait};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn wake_up_session_resumes_the_waiting_task() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();
        let table = Arc::new(AsyncSessionTable::new(&scheduler));

        let table_clone = Arc::clone(&table);
        let task = spawn(&scheduler, CancellationToken::none(), async move {
            let session = table_clone.create_session();
            table_clone.wait(session).await;
            session
        });

        std::thread::sleep(Duration::from_millis(10));
        // Simulate an external responder: it knows the session id out of band here
        // since this is a single-session test.
        table.wake_up_session(1);

        let result = sync_wait(task).unwrap();
        scheduler.stop();
        scheduler.join();
        assert_eq!(result, 1);
    }

    #[test]
    fn session_ids_never_reuse_the_reserved_zero() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();
        let table = AsyncSessionTable::new(&scheduler);
        for _ in 0..10 {
            assert_ne!(table.create_session(), 0);
        }
        scheduler.stop();
        scheduler.join();
    }

    #[test]
    fn dropping_a_registered_wait_removes_its_table_entry() {
        let scheduler = Scheduler::new();
        scheduler.start().unwrap();
        let table = AsyncSessionTable::new(&scheduler);
        let session = table.create_session();

        let waker = crate::scheduler::test_support::counting_waker(Arc::new(std::sync::atomic::AtomicUsize::new(0)));
        let mut cx = Context::from_waker(&waker);
        let mut wait = Box::pin(table.wait(session));
        assert!(matches!(wait.as_mut().poll(&mut cx), Poll::Pending));
        assert!(table.waiters.lock().unwrap().contains_key(&session));

        drop(wait);
        assert!(!table.waiters.lock().unwrap().contains_key(&session));

        scheduler.stop();
        scheduler.join();
    }
}
