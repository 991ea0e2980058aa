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

//! Stable error surfaces for the runtime.
//!
//! Mirrors the original `simple::socket_errors` / `simple::coro_errors` pair: two flat
//! enums with stable names (numeric discriminants are an implementation detail, not a
//! wire contract).

use thiserror::Error;

/// Transport-layer failures surfaced by socket-backed peers.
///
/// The runtime core never raises these itself (sockets are an external collaborator,
/// §6) but the error type lives here because higher layers share the same `CoroError` /
/// `SocketError` taxonomy when they bubble failures through a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SocketError {
    #[error("kcp check failed")]
    KcpCheckFailed,
    #[error("kcp heartbeat timeout")]
    KcpHeartbeatTimeout,
    #[error("kcp protocol error")]
    KcpProtocolError,
    #[error("application initiative to disconnect")]
    InitiativeDisconnect,
}

/// Coroutine-runtime failures. The only two the scheduler, primitives, and awaiters in
/// this crate ever raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoroError {
    /// The awaiter's cancellation token was tripped before or during the wait.
    #[error("cancellation requested")]
    Canceled,
    /// Misuse of a primitive: e.g. awaiting an already-consumed task.
    #[error("coro invalid action")]
    InvalidAction,
}

/// Umbrella error returned by fallible runtime setup paths (spawning the scheduler
/// thread, opening a shared-memory region, ...).
///
/// Carries a [`miette::Diagnostic`] the way the teacher's `SubscribeError` does, so a
/// caller who bubbles this up through `miette` gets actionable help text.
#[derive(Debug, Error, miette::Diagnostic)]
pub enum RuntimeError {
    #[error(transparent)]
    Coro(#[from] CoroError),

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error("failed to spawn dedicated scheduler thread")]
    #[diagnostic(
        code(coro_runtime::scheduler::thread_spawn),
        help("the system may have reached its thread limit")
    )]
    SchedulerThreadSpawn(#[source] std::io::Error),

    #[error("internal scheduler mutex poisoned")]
    #[diagnostic(
        code(coro_runtime::scheduler::mutex_poisoned),
        help("a prior panic on the scheduler thread left shared state inconsistent")
    )]
    MutexPoisoned,

    #[error("shared memory region {name:?} failed to open")]
    #[diagnostic(code(coro_runtime::shm::open_failed))]
    ShmOpen {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "shared memory region {name:?} already exists with size {existing}, requested {requested}"
    )]
    #[diagnostic(
        code(coro_runtime::shm::size_mismatch),
        help("creators and openers of a shared region must agree on its size")
    )]
    ShmSizeMismatch {
        name: String,
        existing: usize,
        requested: usize,
    },
}

pub type Result<T> = std::result::Result<T, CoroError>;
