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

use std::sync::Arc;

use super::state::CancellationState;
use super::token::CancellationToken;

/// The only handle authorised to flip a cancellation flag from false to true.
///
/// Cheap to clone — clones share the same underlying state, so cancelling through any
/// clone cancels them all.
#[derive(Clone)]
pub struct CancellationSource {
    state: Arc<CancellationState>,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self {
            state: Arc::new(CancellationState::new()),
        }
    }

    /// A read-only token for this source's state.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            state: Some(Arc::clone(&self.state)),
        }
    }

    /// Flips the flag and fires every registered callback. Idempotent.
    pub fn request_cancellation(&self) {
        self.state.request_cancellation();
    }

    /// A source backed by real state always *can* be cancelled — this exists for
    /// symmetry with [`CancellationToken::can_be_cancelled`].
    pub fn can_be_cancelled(&self) -> bool {
        true
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.state.is_requested()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}
