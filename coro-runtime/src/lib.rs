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

//! A cooperative, single-threaded coroutine runtime: a dedicated-thread scheduler, a
//! binary-heap timer queue, a cancellation graph, async mutex/condvar/session
//! primitives built on native `Future`/async-await, and a cross-process shared-memory
//! channel with its own readiness multiplexer.
//!
//! See each module's doc comment for its component design and the original C++
//! translation unit it's grounded on.

pub mod cancellation;
pub mod coro;
pub mod error;
pub mod log;
pub mod scheduler;
pub mod shm;
pub mod timer;

pub use error::{CoroError, RuntimeError, SocketError};
