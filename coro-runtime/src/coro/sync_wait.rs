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

//! `sync_wait`: blocks the calling thread until a future completes. Grounded in the
//! original's `sync_wait.hpp`, used throughout its test suite (`test_task.cpp`) to
//! bridge a `gtest` thread into the coroutine world; the calling thread here isn't the
//! scheduler's own, so a condvar-backed waker takes the place of the coroutine handle
//! the original resumes directly.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Wake, Waker};

struct ThreadWaker {
    mutex: Mutex<bool>,
    condvar: Condvar,
}

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        *self.mutex.lock().expect("sync_wait waker mutex poisoned") = true;
        self.condvar.notify_one();
    }
}

/// Drives `future` to completion on the calling thread, parking between wakes instead
/// of busy-polling.
///
/// Unlike [`spawn`](super::spawn), this does not hand the future to any `Scheduler` —
/// it's a minimal, single-future executor for bridging blocking call sites (tests, a
/// `fn main`) into the async world. A future that itself depends on a `Scheduler`
/// making progress (e.g. `sleep_for`) still works as long as that scheduler is running
/// on its own dedicated thread.
pub fn sync_wait<F: Future>(future: F) -> F::Output {
    let mut future = std::pin::pin!(future);
    let thread_waker = Arc::new(ThreadWaker {
        mutex: Mutex::new(false),
        condvar: Condvar::new(),
    });
    let waker: Waker = Waker::from(Arc::clone(&thread_waker));
    let mut cx = Context::from_waker(&waker);

    loop {
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return output;
        }
        let mut woken = thread_waker.mutex.lock().expect("sync_wait waker mutex poisoned");
        while !*woken {
            woken = thread_waker.condvar.wait(woken).expect("sync_wait waker mutex poisoned");
        }
        *woken = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn resolves_an_already_ready_future_without_blocking() {
        assert_eq!(sync_wait(async { 5 }), 5);
    }

    #[test]
    fn resolves_a_future_woken_from_another_thread() {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            tx.send(()).unwrap();
        });

        struct RecvOnce(std::sync::mpsc::Receiver<()>);
        impl Future for RecvOnce {
            type Output = ();
            fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
                match self.0.try_recv() {
                    Ok(()) => Poll::Ready(()),
                    Err(_) => {
                        cx.waker().wake_by_ref();
                        Poll::Pending
                    }
                }
            }
        }

        sync_wait(RecvOnce(rx));
    }
}
