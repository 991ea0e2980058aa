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

//! Binary min-heap of deadlines, ported from the original `timer_queue` (itself adapted
//! from asio's `timer_queue`). Each node tracks its own heap index so removal is
//! `O(log n)` instead of a linear scan.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Waker;
use std::time::{Duration, Instant};

/// Sentinel stored in [`TimerNode::index`] when the node is not currently in the heap.
const NOT_PRESENT: usize = usize::MAX;

/// A timer entry, shared between the awaiter that owns it and the [`TimeQueue`] it is
/// enqueued on.
///
/// The original holds a raw, non-owning pointer from the heap into the awaiter's stack
/// frame; the awaiter's destructor removes the node before releasing that memory. Rust
/// can't express a non-owning borrow into a `Future`'s frame safely, so the heap instead
/// holds a clone of an `Arc<TimerNode>` — ownership is shared rather than borrowed, but
/// the same invariant holds: once the awaiter drops its handle and the node has also
/// been removed from the heap, nothing still references it.
///
/// The original's heap stores a pointer straight at the awaiter, which it resumes
/// directly on firing. A [`Waker`] is the Rust equivalent of that resume handle, so it
/// travels with the node rather than living in a side table the scheduler would have to
/// look up on every fire.
pub struct TimerNode {
    deadline: Instant,
    index: AtomicUsize,
    waker: Mutex<Option<Waker>>,
    canceled: std::sync::atomic::AtomicBool,
}

impl TimerNode {
    pub fn new(deadline: Instant, waker: Waker) -> Arc<Self> {
        Arc::new(Self {
            deadline,
            index: AtomicUsize::new(NOT_PRESENT),
            waker: Mutex::new(Some(waker)),
            canceled: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    fn index(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    fn set_index(&self, index: usize) {
        self.index.store(index, Ordering::Relaxed);
    }

    pub fn is_enqueued(&self) -> bool {
        self.index() != NOT_PRESENT
    }

    /// Replaces the stored waker, e.g. when a later `poll` hands the awaiter a fresh one.
    pub fn set_waker(&self, waker: Waker) {
        *self.waker.lock().expect("timer node waker mutex poisoned") = Some(waker);
    }

    /// Wakes the associated task, if it hasn't already been woken. Idempotent: firing a
    /// node twice (timeout racing cancellation) only ever wakes its task once.
    pub fn fire(&self) {
        if let Some(waker) = self.waker.lock().expect("timer node waker mutex poisoned").take() {
            waker.wake();
        }
    }

    /// Whether this node was fired by [`TimeQueue::drain_all`] rather than reaching its
    /// deadline naturally — checked by the timed awaiter's resuming poll so a scheduler
    /// shutdown resolves the sleeper with `Canceled` instead of `Ok(())` even though its
    /// real deadline hasn't passed yet.
    pub fn is_shutdown_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Marks the node as cancelled by shutdown, then fires it.
    fn fire_shutdown_canceled(&self) {
        self.canceled.store(true, Ordering::Release);
        self.fire();
    }
}

/// The min-heap itself. Accessed only from the scheduler thread, so no internal
/// locking.
#[derive(Default)]
pub struct TimeQueue {
    heap: Vec<Arc<TimerNode>>,
}

impl TimeQueue {
    pub fn new() -> Self {
        Self { heap: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Inserts `node` at the end and sifts it up. Panics if the node is already
    /// enqueued — double-enqueue is a programmer bug, not a recoverable error.
    pub fn enqueue(&mut self, node: Arc<TimerNode>) {
        assert!(!node.is_enqueued(), "timer node already enqueued");
        let index = self.heap.len();
        node.set_index(index);
        self.heap.push(node);
        self.up_heap(index);
    }

    /// Removes `node` if present. Returns `true` iff it was found.
    pub fn remove(&mut self, node: &Arc<TimerNode>) -> bool {
        let index = node.index();
        if index == NOT_PRESENT || index >= self.heap.len() {
            return false;
        }
        if !Arc::ptr_eq(&self.heap[index], node) {
            return false;
        }

        let last = self.heap.len() - 1;
        if index != last {
            self.swap_heap(index, last);
        }
        let removed = self.heap.pop().expect("heap non-empty");
        removed.set_index(NOT_PRESENT);

        if index < self.heap.len() {
            // The node swapped into `index` may need to move either direction.
            self.down_heap(index);
            self.up_heap(index);
        }
        true
    }

    /// Duration to wait until the earliest deadline; `None` if the heap is empty (the
    /// scheduler interprets this as "block until woken").
    pub fn wait_duration(&self, now: Instant) -> Option<Duration> {
        self.heap.first().map(|top| {
            let deadline = top.deadline();
            if deadline <= now {
                Duration::ZERO
            } else {
                deadline - now
            }
        })
    }

    /// Drains every node whose deadline is `<= now`, earliest first.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<Arc<TimerNode>> {
        let mut ready = Vec::new();
        while let Some(top) = self.heap.first() {
            if top.deadline() > now {
                break;
            }
            ready.push(self.pop_root());
        }
        ready
    }

    /// Drains and fires every remaining node, marking each cancelled-by-shutdown first
    /// so its awaiter resolves with `Canceled` rather than observing a bare spurious
    /// wake. Used by the scheduler's shutdown path.
    pub fn drain_all(&mut self) {
        while !self.heap.is_empty() {
            self.pop_root().fire_shutdown_canceled();
        }
    }

    fn pop_root(&mut self) -> Arc<TimerNode> {
        let last = self.heap.len() - 1;
        self.swap_heap(0, last);
        let root = self.heap.pop().expect("heap non-empty");
        root.set_index(NOT_PRESENT);
        if !self.heap.is_empty() {
            self.down_heap(0);
        }
        root
    }

    fn swap_heap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.heap[a].set_index(a);
        self.heap[b].set_index(b);
    }

    fn up_heap(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.heap[index].deadline() < self.heap[parent].deadline() {
                self.swap_heap(index, parent);
                index = parent;
            } else {
                break;
            }
        }
    }

    fn down_heap(&mut self, mut index: usize) {
        let len = self.heap.len();
        loop {
            let left = index * 2 + 1;
            let right = index * 2 + 2;
            let mut smallest = index;
            if left < len && self.heap[left].deadline() < self.heap[smallest].deadline() {
                smallest = left;
            }
            if right < len && self.heap[right].deadline() < self.heap[smallest].deadline() {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.swap_heap(index, smallest);
            index = smallest;
        }
    }

    #[cfg(test)]
    fn check_heap_invariant(&self) {
        for (i, node) in self.heap.iter().enumerate() {
            assert_eq!(node.index(), i);
            let left = i * 2 + 1;
            let right = i * 2 + 2;
            if left < self.heap.len() {
                assert!(self.heap[i].deadline() <= self.heap[left].deadline());
            }
            if right < self.heap.len() {
                assert!(self.heap[i].deadline() <= self.heap[right].deadline());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::{RawWaker, RawWakerVTable, Waker};

    fn noop_waker() -> Waker {
        const VTABLE: RawWakerVTable = RawWakerVTable::new(
            |_| RawWaker::new(std::ptr::null(), &VTABLE),
            |_| {},
            |_| {},
            |_| {},
        );
        unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
    }

    #[test]
    fn enqueue_and_drain_in_deadline_order() {
        let base = Instant::now();
        let mut queue = TimeQueue::new();
        let deadlines = [5u64, 1, 4, 2, 3];
        let nodes: Vec<_> = deadlines
            .iter()
            .map(|&ms| TimerNode::new(base + Duration::from_millis(ms), noop_waker()))
            .collect();
        for node in &nodes {
            queue.enqueue(node.clone());
            queue.check_heap_invariant();
        }

        let ready = queue.drain_ready(base + Duration::from_millis(100));
        let got: Vec<u64> = ready
            .iter()
            .map(|n| (n.deadline() - base).as_millis() as u64)
            .collect();
        assert_eq!(got, vec![1, 2, 3, 4, 5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn remove_reports_presence_and_preserves_invariant() {
        let base = Instant::now();
        let mut queue = TimeQueue::new();
        let nodes: Vec<_> = (0..10)
            .map(|ms| TimerNode::new(base + Duration::from_millis(ms), noop_waker()))
            .collect();
        for node in &nodes {
            queue.enqueue(node.clone());
        }
        queue.check_heap_invariant();

        assert!(queue.remove(&nodes[3]));
        queue.check_heap_invariant();
        assert!(!queue.remove(&nodes[3]), "double remove must report false");

        assert!(queue.remove(&nodes[0]));
        queue.check_heap_invariant();
        assert_eq!(queue.len(), 8);
    }

    #[test]
    fn remove_then_reenqueue_same_deadline_preserves_firing_time() {
        let base = Instant::now();
        let mut queue = TimeQueue::new();
        let deadline = base + Duration::from_millis(42);
        let node = TimerNode::new(deadline, noop_waker());
        queue.enqueue(node.clone());
        assert!(queue.remove(&node));

        let node2 = TimerNode::new(deadline, noop_waker());
        queue.enqueue(node2.clone());
        assert_eq!(node2.deadline(), deadline);
        let ready = queue.drain_ready(deadline);
        assert_eq!(ready.len(), 1);
        assert!(Arc::ptr_eq(&ready[0], &node2));
    }

    #[test]
    fn wait_duration_is_none_when_empty_and_zero_when_due() {
        let base = Instant::now();
        let mut queue = TimeQueue::new();
        assert_eq!(queue.wait_duration(base), None);

        let node = TimerNode::new(base - Duration::from_millis(1), noop_waker());
        queue.enqueue(node);
        assert_eq!(queue.wait_duration(base), Some(Duration::ZERO));
    }

    #[test]
    fn drain_all_empties_heap_and_marks_every_node_shutdown_canceled() {
        let base = Instant::now();
        let mut queue = TimeQueue::new();
        let nodes: Vec<_> = [1000u64, 2000, 3000]
            .iter()
            .map(|&ms| TimerNode::new(base + Duration::from_millis(ms), noop_waker()))
            .collect();
        for node in &nodes {
            queue.enqueue(node.clone());
        }

        queue.drain_all();

        assert!(queue.is_empty());
        for node in &nodes {
            assert!(node.is_shutdown_canceled());
        }
    }
}
