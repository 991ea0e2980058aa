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

//! A bidirectional-capable shared-memory channel: one [`ShmBuffer`] this side writes
//! to, one the peer writes to (and this side reads from). Grounded on the original's
//! `shm_channel.h`.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::cancellation::{CancellationRegistration, CancellationToken};
use crate::coro::current_token;
use crate::error::CoroError;

use super::buffer::ShmBuffer;
use super::multiplexer::{self, MultiplexerHandle};

/// Idempotent single-fire waker, shared between a multiplexer registration and a
/// cancellation callback racing to resume the same awaiter.
struct WaitSlot(Mutex<Option<Waker>>);

impl WaitSlot {
    fn new(waker: Waker) -> Arc<Self> {
        Arc::new(Self(Mutex::new(Some(waker))))
    }

    fn fire(&self) {
        if let Some(waker) = self.0.lock().expect("wait slot mutex poisoned").take() {
            waker.wake();
        }
    }

    fn set(&self, waker: Waker) {
        *self.0.lock().expect("wait slot mutex poisoned") = Some(waker);
    }
}

/// One named full-duplex endpoint: writes go to `own_name`'s region, reads come from
/// `peer_name`'s region. The peer constructs the mirror-image channel (its own name is
/// this side's peer name) so the two sides' write/read buffers line up.
pub struct ShmChannel {
    write_buffer: Arc<ShmBuffer>,
    read_buffer: Arc<ShmBuffer>,
}

impl ShmChannel {
    pub fn create(own_name: &str, peer_name: &str, capacity: usize) -> Result<Self, crate::error::RuntimeError> {
        Ok(Self {
            write_buffer: Arc::new(ShmBuffer::create_or_open(own_name, capacity)?),
            read_buffer: Arc::new(ShmBuffer::create_or_open(peer_name, capacity)?),
        })
    }

    /// Awaits until `data` has been fully written, suspending if the buffer doesn't
    /// currently have room.
    pub fn write<'a>(&'a self, data: &'a [u8]) -> Write<'a> {
        Write {
            buffer: Arc::clone(&self.write_buffer),
            data,
            token: current_token(),
            handle: None,
            slot: None,
            registration: None,
        }
    }

    /// Awaits at least one byte, appending whatever is available to `out` (up to
    /// `out`'s remaining capacity) and returning the number of bytes read.
    pub fn read<'a>(&'a self, out: &'a mut Vec<u8>) -> Read<'a> {
        Read {
            buffer: Arc::clone(&self.read_buffer),
            out,
            token: current_token(),
            handle: None,
            slot: None,
            registration: None,
        }
    }
}

pub struct Write<'a> {
    buffer: Arc<ShmBuffer>,
    data: &'a [u8],
    token: CancellationToken,
    handle: Option<MultiplexerHandle>,
    slot: Option<Arc<WaitSlot>>,
    registration: Option<CancellationRegistration>,
}

impl<'a> Write<'a> {
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }
}

impl<'a> Future for Write<'a> {
    type Output = Result<(), CoroError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.token.is_cancellation_requested() {
            if let Some(handle) = self.handle.take() {
                multiplexer::global().unregister(&handle);
            }
            self.registration = None;
            return Poll::Ready(Err(CoroError::Canceled));
        }

        if self.buffer.writable() >= self.data.len() {
            if let Some(handle) = self.handle.take() {
                multiplexer::global().unregister(&handle);
            }
            self.registration = None;
            self.buffer.write(self.data);
            return Poll::Ready(Ok(()));
        }

        if let Some(slot) = &self.slot {
            slot.set(cx.waker().clone());
            return Poll::Pending;
        }

        let slot = WaitSlot::new(cx.waker().clone());
        let buffer_for_condition = Arc::clone(&self.buffer);
        let len = self.data.len();
        let slot_for_wake = Arc::clone(&slot);
        let handle = multiplexer::global().register(
            move || buffer_for_condition.writable() >= len,
            move || slot_for_wake.fire(),
        );

        if self.token.can_be_cancelled() {
            let slot_for_cancel = Arc::clone(&slot);
            self.registration = Some(CancellationRegistration::new(self.token.clone(), move || {
                slot_for_cancel.fire();
            }));
        }

        self.handle = Some(handle);
        self.slot = Some(slot);
        Poll::Pending
    }
}

impl<'a> Drop for Write<'a> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            multiplexer::global().unregister(&handle);
        }
    }
}

pub struct Read<'a> {
    buffer: Arc<ShmBuffer>,
    out: &'a mut Vec<u8>,
    token: CancellationToken,
    handle: Option<MultiplexerHandle>,
    slot: Option<Arc<WaitSlot>>,
    registration: Option<CancellationRegistration>,
}

impl<'a> Read<'a> {
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }
}

impl<'a> Future for Read<'a> {
    type Output = Result<usize, CoroError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.token.is_cancellation_requested() {
            if let Some(handle) = self.handle.take() {
                multiplexer::global().unregister(&handle);
            }
            self.registration = None;
            return Poll::Ready(Err(CoroError::Canceled));
        }

        let readable = self.buffer.readable();
        if readable > 0 {
            if let Some(handle) = self.handle.take() {
                multiplexer::global().unregister(&handle);
            }
            self.registration = None;
            let mut chunk = vec![0u8; readable];
            let read = self.buffer.read(&mut chunk);
            chunk.truncate(read);
            self.out.extend_from_slice(&chunk);
            return Poll::Ready(Ok(read));
        }

        if let Some(slot) = &self.slot {
            slot.set(cx.waker().clone());
            return Poll::Pending;
        }

        let slot = WaitSlot::new(cx.waker().clone());
        let buffer_for_condition = Arc::clone(&self.buffer);
        let slot_for_wake = Arc::clone(&slot);
        let handle = multiplexer::global().register(
            move || buffer_for_condition.readable() > 0,
            move || slot_for_wake.fire(),
        );

        if self.token.can_be_cancelled() {
            let slot_for_cancel = Arc::clone(&slot);
            self.registration = Some(CancellationRegistration::new(self.token.clone(), move || {
                slot_for_cancel.fire();
            }));
        }

        self.handle = Some(handle);
        self.slot = Some(slot);
        Poll::Pending
    }
}

impl<'a> Drop for Read<'a> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            multiplexer::global().unregister(&handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coro::sync_wait;
    use crate::shm::region::unique_test_name;

    #[test]
    fn write_then_read_round_trips_without_suspending() {
        let a = unique_test_name("chan-a");
        let b = unique_test_name("chan-b");
        let writer = ShmChannel::create(&a, &b, 64).unwrap();
        let reader = ShmChannel::create(&b, &a, 64).unwrap();

        sync_wait(writer.write(b"hello world")).unwrap();
        let mut out = Vec::new();
        let read = sync_wait(reader.read(&mut out)).unwrap();

        assert_eq!(read, 11);
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn read_suspends_until_data_arrives_from_another_thread() {
        let a = unique_test_name("chan-wait-a");
        let b = unique_test_name("chan-wait-b");
        let writer = ShmChannel::create(&a, &b, 64).unwrap();
        let reader = ShmChannel::create(&b, &a, 64).unwrap();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            sync_wait(writer.write(b"late")).unwrap();
        });

        let mut out = Vec::new();
        let read = sync_wait(reader.read(&mut out)).unwrap();
        handle.join().unwrap();

        assert_eq!(read, 4);
        assert_eq!(out, b"late");
    }

    #[test]
    fn cancelling_a_pending_read_fails_with_canceled() {
        use crate::cancellation::CancellationSource;

        let a = unique_test_name("chan-cancel-a");
        let b = unique_test_name("chan-cancel-b");
        let reader = ShmChannel::create(&b, &a, 64).unwrap();

        let source = CancellationSource::new();
        let token = source.token();

        let mut out = Vec::new();
        let read_future = reader.read(&mut out).with_token(token);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            source.request_cancellation();
        });

        let result = sync_wait(read_future);
        handle.join().unwrap();

        assert!(matches!(result, Err(CoroError::Canceled)));
    }
}
