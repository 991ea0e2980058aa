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

//! The process-global shared-memory channel multiplexer. The original has no direct
//! analogue (its channel awaiters are driven by the same event loop as everything
//! else); this dedicated polling thread is the idiomatic substitute for watching raw
//! shared-memory cursors, which carry no OS-level readiness notification the way a
//! socket or pipe would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Knobs for the channel multiplexer. No original analogue (its channel awaiters ride the
/// same event loop as everything else); `poll_interval` trades wakeup latency for the CPU
/// cost of spinning over every registered channel once per tick.
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    pub poll_interval: Duration,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

struct Registration {
    condition: Box<dyn Fn() -> bool + Send>,
    wake: Box<dyn Fn() + Send>,
}

struct Inner {
    registrations: Mutex<HashMap<u64, Registration>>,
    next_id: AtomicU64,
    stopping: AtomicBool,
}

/// A live registration. Dropping it without calling [`Multiplexer::unregister`] leaks
/// the entry until its condition happens to become true; channel awaiters always
/// unregister explicitly (on resume or on cancellation), so this is only a handle, not
/// a guard.
pub struct MultiplexerHandle(u64);

pub struct Multiplexer {
    inner: Arc<Inner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Multiplexer {
    fn start() -> Self {
        Self::start_with_config(MultiplexerConfig::default())
    }

    fn start_with_config(config: MultiplexerConfig) -> Self {
        let inner = Arc::new(Inner {
            registrations: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stopping: AtomicBool::new(false),
        });

        let inner_for_thread = Arc::clone(&inner);
        let poll_interval = config.poll_interval;
        let thread = std::thread::Builder::new()
            .name("coro-shm-multiplexer".to_owned())
            .spawn(move || poll_loop(inner_for_thread, poll_interval))
            .expect("failed to spawn shared-memory multiplexer thread");

        tracing::info!("shared-memory channel multiplexer started");
        Self {
            inner,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Registers `condition`; once it returns `true` the multiplexer thread calls
    /// `wake` and drops the registration. `condition` and `wake` are polled/invoked on
    /// the multiplexer's own thread, never the caller's.
    pub fn register(
        &self,
        condition: impl Fn() -> bool + Send + 'static,
        wake: impl Fn() + Send + 'static,
    ) -> MultiplexerHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .registrations
            .lock()
            .expect("multiplexer registrations mutex poisoned")
            .insert(
                id,
                Registration {
                    condition: Box::new(condition),
                    wake: Box::new(wake),
                },
            );
        MultiplexerHandle(id)
    }

    /// Removes a registration before it fires, e.g. when its awaiter is cancelled.
    /// A no-op if it already fired.
    pub fn unregister(&self, handle: &MultiplexerHandle) {
        self.inner
            .registrations
            .lock()
            .expect("multiplexer registrations mutex poisoned")
            .remove(&handle.0);
    }
}

fn poll_loop(inner: Arc<Inner>, poll_interval: Duration) {
    while !inner.stopping.load(Ordering::Acquire) {
        let ready: Vec<Box<dyn Fn() + Send>> = {
            let mut registrations = inner
                .registrations
                .lock()
                .expect("multiplexer registrations mutex poisoned");
            let ready_ids: Vec<u64> = registrations
                .iter()
                .filter(|(_, reg)| (reg.condition)())
                .map(|(&id, _)| id)
                .collect();
            ready_ids
                .into_iter()
                .filter_map(|id| registrations.remove(&id))
                .map(|reg| reg.wake)
                .collect()
        };
        for wake in ready {
            wake();
        }
        std::thread::sleep(poll_interval);
    }
}

static GLOBAL: OnceLock<Multiplexer> = OnceLock::new();

/// The process-wide multiplexer, started lazily on first registration.
pub fn global() -> &'static Multiplexer {
    GLOBAL.get_or_init(Multiplexer::start)
}

/// Same as [`global`], but lets the first caller pick the poll interval. A no-op on the
/// `config` passed in if some earlier call (to this or to [`global`]) already started it.
pub fn global_with_config(config: MultiplexerConfig) -> &'static Multiplexer {
    GLOBAL.get_or_init(|| Multiplexer::start_with_config(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn fires_once_the_condition_becomes_true() {
        let multiplexer = Multiplexer::start();
        let ready = Arc::new(AtomicBool::new(false));
        let woken = Arc::new(AtomicBool::new(false));

        let ready_for_condition = Arc::clone(&ready);
        let woken_for_wake = Arc::clone(&woken);
        let _handle = multiplexer.register(
            move || ready_for_condition.load(Ordering::SeqCst),
            move || woken_for_wake.store(true, Ordering::SeqCst),
        );

        std::thread::sleep(Duration::from_millis(5));
        assert!(!woken.load(Ordering::SeqCst));

        ready.store(true, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(10));
        assert!(woken.load(Ordering::SeqCst));
    }

    #[test]
    fn default_config_matches_the_one_millisecond_poll_interval() {
        assert_eq!(MultiplexerConfig::default().poll_interval, Duration::from_millis(1));
    }

    #[test]
    fn unregister_prevents_a_later_fire() {
        let multiplexer = Multiplexer::start();
        let woken = Arc::new(AtomicBool::new(false));
        let woken_for_wake = Arc::clone(&woken);

        let handle = multiplexer.register(|| true, move || woken_for_wake.store(true, Ordering::SeqCst));
        multiplexer.unregister(&handle);

        std::thread::sleep(Duration::from_millis(10));
        assert!(!woken.load(Ordering::SeqCst));
    }
}
