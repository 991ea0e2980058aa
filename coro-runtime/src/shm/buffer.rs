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

//! The ring buffer layered over a [`ShmRegion`]. Grounded on the original's
//! `shm_buffer.h`/`.cpp`.
//!
//! Layout: a fixed [`Header`] of four `u64` cursors followed by `capacity` bytes of
//! ring data. `read`/`write` are monotonically increasing totals (never wrap);
//! `read_index`/`write_index` are those totals modulo `capacity`, cached so every
//! access doesn't recompute a division. The writer only ever advances
//! `write`/`write_index`; the reader only ever advances `read`/`read_index` — this
//! single-producer/single-consumer discipline is what makes the unsynchronized
//! cross-process access safe.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::RuntimeError;

use super::region::ShmRegion;

#[repr(C)]
struct Header {
    read: AtomicU64,
    write: AtomicU64,
    read_index: AtomicU64,
    write_index: AtomicU64,
}

const HEADER_SIZE: usize = std::mem::size_of::<Header>();

/// A single-producer/single-consumer byte ring buffer over shared memory.
pub struct ShmBuffer {
    region: ShmRegion,
    capacity: usize,
}

impl ShmBuffer {
    pub fn create_or_open(name: &str, capacity: usize) -> Result<Self, RuntimeError> {
        let region = ShmRegion::create_or_open(name, HEADER_SIZE + capacity)?;
        let buffer = Self { region, capacity };
        if buffer.region.is_create() {
            let header = buffer.header();
            header.read.store(0, Ordering::Relaxed);
            header.write.store(0, Ordering::Relaxed);
            header.read_index.store(0, Ordering::Relaxed);
            header.write_index.store(0, Ordering::Relaxed);
        }
        Ok(buffer)
    }

    fn header(&self) -> &Header {
        // SAFETY: `region` is at least `HEADER_SIZE + capacity` bytes (enforced at
        // construction) and `Header` is `repr(C)` with `AtomicU64` fields, which share
        // `u64`'s layout and alignment.
        unsafe { &*(self.region.as_slice().as_ptr() as *const Header) }
    }

    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: shared-memory mutation is the entire point of this type; the
        // single-writer/single-consumer discipline above is what keeps it race-free
        // despite the shared `&self`.
        unsafe { (self.region.as_slice().as_ptr() as *mut u8).add(HEADER_SIZE) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn readable(&self) -> usize {
        let header = self.header();
        (header.write.load(Ordering::Acquire) - header.read.load(Ordering::Relaxed)) as usize
    }

    pub fn writable(&self) -> usize {
        self.capacity - self.readable()
    }

    /// Writes `buf` and advances the write cursor. Fails (without partial writes) if
    /// there isn't enough room.
    pub fn write(&self, buf: &[u8]) -> bool {
        if !self.fill(buf, 0) {
            return false;
        }
        self.advance_write(buf.len());
        true
    }

    /// Copies `buf` into the ring `offset` bytes past the current write cursor,
    /// without advancing it — lets a caller stage a header before the payload it
    /// describes, then advance once for both.
    pub fn fill(&self, buf: &[u8], offset: usize) -> bool {
        if buf.len() + offset > self.writable() {
            return false;
        }
        let header = self.header();
        let start = (header.write_index.load(Ordering::Relaxed) as usize + offset) % self.capacity;
        self.copy_in(start, buf);
        true
    }

    /// Advances the write cursor by `len` bytes already staged via `fill`/`write`.
    pub fn advance_write(&self, len: usize) {
        let header = self.header();
        let index = header.write_index.load(Ordering::Relaxed);
        header.write_index.store((index + len as u64) % self.capacity as u64, Ordering::Relaxed);
        let total = header.write.load(Ordering::Relaxed);
        header.write.store(total + len as u64, Ordering::Release);
    }

    /// Reads up to `buf.len()` bytes and advances the read cursor by the amount read.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let read = self.peek(buf, 0);
        self.advance_read(read);
        read
    }

    /// Reads up to `buf.len()` bytes starting `offset` bytes past the read cursor,
    /// without advancing it or the total-read counter.
    pub fn peek(&self, buf: &mut [u8], offset: usize) -> usize {
        let readable = self.readable();
        if offset >= readable {
            return 0;
        }
        let len = buf.len().min(readable - offset);
        let header = self.header();
        let start = (header.read_index.load(Ordering::Relaxed) as usize + offset) % self.capacity;
        self.copy_out(start, &mut buf[..len]);
        len
    }

    /// Advances the read cursor by `len` bytes already consumed via `peek`/`read`.
    pub fn advance_read(&self, len: usize) {
        let header = self.header();
        let index = header.read_index.load(Ordering::Relaxed);
        header.read_index.store((index + len as u64) % self.capacity as u64, Ordering::Relaxed);
        let total = header.read.load(Ordering::Relaxed);
        header.read.store(total + len as u64, Ordering::Release);
    }

    fn copy_in(&self, start: usize, buf: &[u8]) {
        let data = self.data_ptr();
        let first = buf.len().min(self.capacity - start);
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr(), data.add(start), first);
            if first < buf.len() {
                std::ptr::copy_nonoverlapping(buf.as_ptr().add(first), data, buf.len() - first);
            }
        }
    }

    fn copy_out(&self, start: usize, buf: &mut [u8]) {
        let data = self.data_ptr();
        let first = buf.len().min(self.capacity - start);
        unsafe {
            std::ptr::copy_nonoverlapping(data.add(start), buf.as_mut_ptr(), first);
            if first < buf.len() {
                std::ptr::copy_nonoverlapping(data, buf.as_mut_ptr().add(first), buf.len() - first);
            }
        }
    }
}
