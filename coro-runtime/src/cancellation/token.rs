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

/// A read-only view onto a [`CancellationSource`](super::CancellationSource)'s shared
/// state. `None` inner state means "no cancellation possible" — every check
/// short-circuits to `false` without touching a lock.
#[derive(Clone, Default)]
pub struct CancellationToken {
    pub(super) state: Option<Arc<CancellationState>>,
}

impl CancellationToken {
    /// The empty token: `can_be_cancelled()` is always `false`.
    pub fn none() -> Self {
        Self { state: None }
    }

    pub fn can_be_cancelled(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_cancellation_requested(&self) -> bool {
        match &self.state {
            Some(state) => state.is_requested(),
            None => false,
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("can_be_cancelled", &self.can_be_cancelled())
            .field("is_cancellation_requested", &self.is_cancellation_requested())
            .finish()
    }
}
