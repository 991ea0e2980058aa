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

use tracing_core::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Mirrors the level names a caller would otherwise spell out via `tracing::Level`,
/// kept separate so configuration code doesn't need a `tracing` dependency of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn into_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// A boxed layer over the default registry, the same erasure the teacher's
/// `DynLayer` alias performs, so a caller composing several layers doesn't need to name
/// the concrete formatter type.
pub type DynLayer = dyn Layer<tracing_subscriber::Registry> + Send + Sync + 'static;

/// Builds a stderr-writing fmt layer at `level`, honoring `RUST_LOG` as an override.
/// Returned uninstalled — call `.with(layer).init()` (or pass it to
/// [`init`]) to actually wire it into the global subscriber.
pub fn try_create_stdout_layer(level: LogLevel) -> Box<DynLayer> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into_filter().into())
        .from_env_lossy();
    Box::new(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(filter),
    )
}

/// Installs a stderr subscriber at `level` as the process-global default. Intended for
/// demos and tests; a host application embedding this crate as a library should
/// instead compose [`try_create_stdout_layer`] with its own layers.
pub fn init(level: LogLevel) {
    let _ = tracing_subscriber::registry()
        .with(try_create_stdout_layer(level))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent_across_multiple_test_threads() {
        // try_init (rather than init) swallows the "already set" error so concurrent
        // test binaries calling this don't panic.
        init(LogLevel::Debug);
        init(LogLevel::Trace);
    }
}
