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

//! Coroutine primitives built on top of [`Task`]/[`Runnable`] polling.

mod async_session;
mod condvar;
mod context;
mod detached_task;
mod mutex;
mod sync_wait;
mod task;
mod timed_awaiter;
mod with_cancellation;

pub use async_session::AsyncSessionTable;
pub use condvar::AsyncCondvar;
pub use context::current_token;
pub use detached_task::spawn_detached;
pub use mutex::{AsyncMutex, AsyncMutexGuard};
pub use sync_wait::sync_wait;
pub use task::{spawn, Task};
pub use timed_awaiter::{sleep_for, sleep_until, Sleep};
pub use with_cancellation::{with_cancellation, WithCancellation};
