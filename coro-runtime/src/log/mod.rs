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

//! Tracing setup for embedding applications. Grounded in the teacher's
//! `tui/src/core/log/tracing_init.rs` — this crate has no TUI-shaped writer
//! abstraction to carry over, so it keeps just the piece that matters for a library:
//! a level filter plus stdout/stderr layer construction, returned uninstalled so an
//! embedding binary composes it with its own layers before calling `.init()`.

mod tracing_init;

pub use tracing_init::{init, try_create_stdout_layer, LogLevel};
