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

use super::state::RegistrationKey;
use super::token::CancellationToken;

/// A scoped callback fired when its token's cancellation is requested.
///
/// - If the token is already tripped at construction time, `callback` runs synchronously
///   before `new` returns, and the registration is never linked (dropping it is then a
///   no-op).
/// - Otherwise the callback fires the first time `request_cancellation` is called on the
///   backing source, and is guaranteed to fire *exactly once* — unless this registration
///   is dropped first, in which case it never fires.
///
/// Not `Clone`: a registration owns exactly one linked slot (or none).
pub struct CancellationRegistration {
    token: CancellationToken,
    key: Option<RegistrationKey>,
}

impl CancellationRegistration {
    pub fn new(token: CancellationToken, callback: impl FnOnce() + Send + 'static) -> Self {
        let Some(state) = token.state.as_ref() else {
            // An empty token can never be cancelled; nothing to link.
            return Self { token, key: None };
        };

        match state.try_register(Box::new(callback)) {
            Ok(key) => Self {
                token,
                key: Some(key),
            },
            Err(callback) => {
                callback();
                Self { token, key: None }
            }
        }
    }
}

impl Drop for CancellationRegistration {
    fn drop(&mut self) {
        if let (Some(state), Some(key)) = (self.token.state.as_ref(), self.key.take()) {
            state.unregister(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::CancellationSource;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fires_exactly_once_on_request() {
        let source = CancellationSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let reg = CancellationRegistration::new(source.token(), move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        source.request_cancellation();
        source.request_cancellation(); // idempotent
        assert_eq!(count.load(Ordering::SeqCst), 1);
        drop(reg);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fires_synchronously_if_already_requested() {
        let source = CancellationSource::new();
        source.request_cancellation();

        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let _reg = CancellationRegistration::new(source.token(), move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_registration_never_fires() {
        let source = CancellationSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let reg = CancellationRegistration::new(source.token(), move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        drop(reg);
        source.request_cancellation();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_token_short_circuits() {
        let token = CancellationToken::none();
        assert!(!token.can_be_cancelled());
        assert!(!token.is_cancellation_requested());
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let _reg = CancellationRegistration::new(token, move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
