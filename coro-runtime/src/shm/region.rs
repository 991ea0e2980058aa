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

//! A named, persistent shared-memory region backed by `memmap2`. See the original's
//! `shm.h`/`shm_impl` (POSIX `shm_open`/`mmap` on Linux, a named file mapping on
//! Windows) — `memmap2` is the cross-platform idiomatic substitute for both.

use std::fs::OpenOptions;
use std::path::PathBuf;

use memmap2::MmapMut;

use crate::error::RuntimeError;

fn region_path(name: &str) -> PathBuf {
    if cfg!(target_os = "linux") {
        PathBuf::from("/dev/shm").join(format!("coro-runtime-{name}"))
    } else {
        std::env::temp_dir().join(format!("coro-runtime-shm-{name}"))
    }
}

/// A memory-mapped region of exactly `size` bytes, identified by `name` across
/// processes. The first process to create it sizes the backing file; later openers
/// must request the same size.
pub struct ShmRegion {
    mmap: MmapMut,
    created: bool,
}

impl ShmRegion {
    pub fn create_or_open(name: &str, size: usize) -> Result<Self, RuntimeError> {
        let path = region_path(name);
        let open = |path: &PathBuf| {
            OpenOptions::new().read(true).write(true).create(true).open(path)
        };
        let file = open(&path).map_err(|source| RuntimeError::ShmOpen {
            name: name.to_owned(),
            source,
        })?;

        let existing_len = file
            .metadata()
            .map_err(|source| RuntimeError::ShmOpen {
                name: name.to_owned(),
                source,
            })?
            .len() as usize;

        let created = existing_len == 0;
        if created {
            file.set_len(size as u64).map_err(|source| RuntimeError::ShmOpen {
                name: name.to_owned(),
                source,
            })?;
        } else if existing_len != size {
            return Err(RuntimeError::ShmSizeMismatch {
                name: name.to_owned(),
                existing: existing_len,
                requested: size,
            });
        }

        // SAFETY: the file is exclusively ours for the duration of the mapping in the
        // sense that we never truncate it elsewhere; concurrent mutation from another
        // process mapping the same file is the entire point of this type.
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|source| RuntimeError::ShmOpen {
            name: name.to_owned(),
            source,
        })?;

        Ok(Self { mmap, created })
    }

    pub fn is_create(&self) -> bool {
        self.created
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }
}

#[cfg(test)]
pub(crate) fn unique_test_name(tag: &str) -> String {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    format!(
        "{tag}-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
