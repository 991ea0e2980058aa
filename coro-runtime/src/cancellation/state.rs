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

//! Shared cancellation state. See [`super::registration::CancellationRegistration`] for
//! the public scoped-callback API built on top of this.

use std::sync::Mutex;

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Handle into the registration table, returned to a [`super::CancellationRegistration`]
    /// so it can remove itself on `Drop`.
    ///
    /// The original used an intrusive doubly linked list for O(1) unlink without
    /// allocation churn; a `slotmap` gives the same O(1) insert/remove with a stable key
    /// instead of raw pointers, which is the idiomatic safe-Rust substitute (see
    /// DESIGN.md).
    pub struct RegistrationKey;
}

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Inner {
    requested: bool,
    registrations: SlotMap<RegistrationKey, Callback>,
}

/// Shared state behind a [`CancellationSource`](super::CancellationSource) /
/// [`CancellationToken`](super::CancellationToken) pair.
pub struct CancellationState {
    inner: Mutex<Inner>,
}

impl CancellationState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn is_requested(&self) -> bool {
        self.inner.lock().expect("cancellation mutex poisoned").requested
    }

    /// Flips `requested` false→true and takes every registered callback out of the table,
    /// both under the lock, then releases the lock before firing them. Idempotent: a
    /// second call is a no-op. Callbacks never capture this state, so there is no
    /// supported way for one to call back into it.
    pub fn request_cancellation(&self) {
        let callbacks = {
            let mut inner = self.inner.lock().expect("cancellation mutex poisoned");
            if inner.requested {
                return;
            }
            inner.requested = true;
            std::mem::take(&mut inner.registrations)
        };
        for (_, callback) in callbacks {
            callback();
        }
    }

    /// Registers `callback` unless cancellation has already been requested, in which
    /// case `callback` is handed back so the caller can run it synchronously instead
    /// (see [`CancellationRegistration::new`](super::CancellationRegistration::new)).
    pub fn try_register(&self, callback: Callback) -> Result<RegistrationKey, Callback> {
        let mut inner = self.inner.lock().expect("cancellation mutex poisoned");
        if inner.requested {
            return Err(callback);
        }
        Ok(inner.registrations.insert(callback))
    }

    pub fn unregister(&self, key: RegistrationKey) {
        let mut inner = self.inner.lock().expect("cancellation mutex poisoned");
        inner.registrations.remove(key);
    }
}

impl Default for CancellationState {
    fn default() -> Self {
        Self::new()
    }
}
