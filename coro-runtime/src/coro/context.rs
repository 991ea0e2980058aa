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

//! Ambient "current task" context.
//!
//! The original attaches a [`CancellationToken`] to every coroutine's promise object and
//! awaiters read it straight back out (`handle.promise().get_cancellation_token()`); its
//! mutex also recognises a re-entrant `lock()` by comparing the calling coroutine frame's
//! raw pointer against the owner it already recorded (`mutex.cpp`). Rust's `Future` has
//! no promise object to hang either of those off of, so both the token and a task
//! identity instead live in a thread-local slot that [`Task`](super::Task)'s and
//! [`spawn_detached`](super::spawn_detached)'s `run` set for the duration of each `poll`
//! call — any awaiter constructed and polled from inside that future's body
//! (`sleep_for`, `with_cancellation`, `AsyncMutex::lock`, ...) can read them back without
//! the caller threading them through every `.await`.

use std::cell::RefCell;

use crate::cancellation::CancellationToken;

/// Opaque per-task identity, derived from the address of the task's shared state (see
/// `task.rs`/`detached_task.rs`). Stable for the task's lifetime and unique among
/// concurrently-live tasks on a process, the same role the original's raw coroutine-frame
/// pointer plays when `mutex.cpp` compares "is the caller already the owner".
pub type TaskId = usize;

thread_local! {
    static CURRENT: RefCell<Option<(CancellationToken, TaskId)>> = const { RefCell::new(None) };
}

/// The token attached to the task currently being polled on this thread, or the empty
/// token if called outside of one (e.g. from `sync_wait`'s driver before the first
/// `poll`, or from plain non-task code).
pub fn current_token() -> CancellationToken {
    CURRENT.with(|cell| cell.borrow().as_ref().map(|(token, _)| token.clone()).unwrap_or_default())
}

/// The identity of the task currently being polled on this thread, or `None` outside of
/// one. `AsyncMutex::lock` uses this to recognise a re-entrant call from the task that
/// already holds the lock.
pub fn current_task_id() -> Option<TaskId> {
    CURRENT.with(|cell| cell.borrow().as_ref().map(|(_, id)| *id))
}

/// Installs `token`/`task_id` as the current task context for the duration of `f`,
/// restoring whatever was there before on return (so nested `run()` calls — a task
/// polling a sub-task's future inline — nest correctly).
pub(super) fn with_task<R>(token: CancellationToken, task_id: TaskId, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT.with(|cell| cell.borrow_mut().replace((token, task_id)));
    let result = f();
    CURRENT.with(|cell| *cell.borrow_mut() = previous);
    result
}
