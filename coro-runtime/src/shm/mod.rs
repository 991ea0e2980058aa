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

//! Shared-memory channel: a named ring-buffer region, a full-duplex channel pairing two
//! of them, and a process-global multiplexer that wakes suspended readers/writers.

mod buffer;
mod channel;
mod multiplexer;
mod region;

pub use buffer::ShmBuffer;
pub use channel::{Read, ShmChannel, Write};
pub use multiplexer::{
    global as multiplexer, global_with_config as multiplexer_with_config, Multiplexer, MultiplexerConfig,
    MultiplexerHandle,
};
pub use region::ShmRegion;
