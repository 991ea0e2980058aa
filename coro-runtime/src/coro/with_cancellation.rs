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

//! `with_cancellation`: race an arbitrary future against the ambient cancellation token.
//! Grounded on the original's `get_cancellation_token_awaiter`/
//! `set_cancellation_token_awaiter` (`cancellation_token.h`), which read and install a
//! token on the coroutine's promise; Rust's `Future` has no promise to hang that off of,
//! so this wraps the future itself instead.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::cancellation::{CancellationRegistration, CancellationToken};
use crate::error::CoroError;

use super::context::current_token;

/// Wraps `future` so that, in addition to its own result, a tripped cancellation token
/// fails it with `Canceled` the next time it's polled — even if `future` itself never
/// checks any token. Defaults to [`current_token`]; override with
/// [`WithCancellation::with_token`] before the first `.await`.
pub fn with_cancellation<F>(future: F) -> WithCancellation<F::Output>
where
    F: Future + Send + 'static,
{
    WithCancellation {
        future: Box::pin(future),
        token: current_token(),
        registration: None,
    }
}

pub struct WithCancellation<T> {
    future: Pin<Box<dyn Future<Output = T> + Send>>,
    token: CancellationToken,
    registration: Option<CancellationRegistration>,
}

impl<T> WithCancellation<T> {
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }
}

impl<T> Future for WithCancellation<T> {
    type Output = Result<T, CoroError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.registration.is_none() {
            if self.token.is_cancellation_requested() {
                return Poll::Ready(Err(CoroError::Canceled));
            }
            if self.token.can_be_cancelled() {
                let waker = cx.waker().clone();
                self.registration = Some(CancellationRegistration::new(self.token.clone(), move || {
                    waker.wake();
                }));
            }
        } else if self.token.is_cancellation_requested() {
            self.registration = None;
            return Poll::Ready(Err(CoroError::Canceled));
        }

        match self.future.as_mut().poll(cx) {
            Poll::Ready(value) => {
                self.registration = None;
                Poll::Ready(Ok(value))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationSource;
    use crate::coro::sync_wait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::task::Waker;

    #[test]
    fn passes_through_the_value_of_an_uncancelled_future() {
        let result = sync_wait(with_cancellation(async { 5 }));
        assert_eq!(result.unwrap(), 5);
    }

    #[test]
    fn a_token_already_cancelled_at_poll_time_short_circuits_before_the_inner_future() {
        let source = CancellationSource::new();
        source.request_cancellation();
        let polled_inner = Arc::new(AtomicBool::new(false));
        let polled_inner_clone = Arc::clone(&polled_inner);

        let result = sync_wait(with_cancellation(async move {
            polled_inner_clone.store(true, Ordering::SeqCst);
        }).with_token(source.token()));

        assert!(matches!(result, Err(CoroError::Canceled)));
        assert!(!polled_inner.load(Ordering::SeqCst));
    }

    #[test]
    fn cancelling_mid_flight_actively_wakes_a_suspended_future() {
        struct Forever;
        impl Future for Forever {
            type Output = ();
            fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
                Poll::Pending
            }
        }

        fn flag_waker(flag: Arc<AtomicBool>) -> Waker {
            use std::task::{RawWaker, RawWakerVTable};

            fn clone(data: *const ()) -> RawWaker {
                unsafe { Arc::increment_strong_count(data as *const AtomicBool) };
                RawWaker::new(data, &VTABLE)
            }
            fn wake(data: *const ()) {
                let flag = unsafe { Arc::from_raw(data as *const AtomicBool) };
                flag.store(true, Ordering::SeqCst);
            }
            fn wake_by_ref(data: *const ()) {
                let flag = unsafe { &*(data as *const AtomicBool) };
                flag.store(true, Ordering::SeqCst);
            }
            fn drop_fn(data: *const ()) {
                unsafe { drop(Arc::from_raw(data as *const AtomicBool)) };
            }

            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop_fn);
            let raw = RawWaker::new(Arc::into_raw(flag) as *const (), &VTABLE);
            unsafe { Waker::from_raw(raw) }
        }

        let source = CancellationSource::new();
        let token = source.token();
        let mut future = Box::pin(with_cancellation(Forever).with_token(token));

        let woken = Arc::new(AtomicBool::new(false));
        let waker = flag_waker(Arc::clone(&woken));
        let mut cx = Context::from_waker(&waker);
        assert!(matches!(future.as_mut().poll(&mut cx), Poll::Pending));
        assert!(!woken.load(Ordering::SeqCst));

        // Nothing re-polls this future between here and the assertion below — if the
        // flag flips, cancellation itself woke it, not an incidental re-poll.
        source.request_cancellation();
        assert!(woken.load(Ordering::SeqCst));

        assert!(matches!(future.as_mut().poll(&mut cx), Poll::Ready(Err(CoroError::Canceled))));
    }
}
