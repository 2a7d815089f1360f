// Copyright 2024 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A scripted [`Filesystem`] for tests that records every call, so rename and
//! remove cascades can be asserted in exact order without touching a disk.

use std::ffi::OsString;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use jiff::Timestamp;

use crate::Error;
use crate::FileStat;
use crate::Filesystem;

#[derive(Debug, Default)]
pub(crate) struct RecordingFs {
    listing: Mutex<Vec<String>>,
    existing: Mutex<Vec<PathBuf>>,
    fail_remove: Mutex<Option<PathBuf>>,
    fail_rename: Mutex<Option<PathBuf>>,
    ops: Mutex<Vec<String>>,
}

impl RecordingFs {
    pub(crate) fn new() -> Self {
        RecordingFs::default()
    }

    /// A filesystem whose single directory lists exactly `names`.
    pub(crate) fn with_listing(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let fs = RecordingFs::new();
        *fs.listing.lock().unwrap() = names.into_iter().map(Into::into).collect();
        fs
    }

    /// Make `stat` succeed for the given path.
    pub(crate) fn mark_existing(&self, path: impl Into<PathBuf>) {
        self.existing.lock().unwrap().push(path.into());
    }

    /// Make every `remove` of the given path fail.
    pub(crate) fn fail_remove_of(&self, path: impl Into<PathBuf>) {
        *self.fail_remove.lock().unwrap() = Some(path.into());
    }

    /// Make every `rename` of the given path fail.
    pub(crate) fn fail_rename_of(&self, path: impl Into<PathBuf>) {
        *self.fail_rename.lock().unwrap() = Some(path.into());
    }

    /// Every mutating call recorded so far, in order.
    pub(crate) fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub(crate) fn count_ops(&self, prefix: &str) -> usize {
        self.ops()
            .iter()
            .filter(|op| op.starts_with(prefix))
            .count()
    }

    fn record(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }

    fn injected(&self, operation: &'static str, path: &Path) -> Error {
        Error::from_fs_error(
            operation,
            path,
            io::Error::new(io::ErrorKind::PermissionDenied, "injected failure"),
        )
    }
}

impl Filesystem for RecordingFs {
    fn remove(&self, path: &Path) -> Result<(), Error> {
        self.record(format!("remove {}", path.display()));
        if self.fail_remove.lock().unwrap().as_deref() == Some(path) {
            return Err(self.injected("remove", path));
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), Error> {
        self.record(format!("rename {} -> {}", from.display(), to.display()));
        if self.fail_rename.lock().unwrap().as_deref() == Some(from) {
            return Err(self.injected("rename", from));
        }
        Ok(())
    }

    fn read_dir(&self, dir: &Path) -> Result<Vec<OsString>, Error> {
        self.record(format!("read_dir {}", dir.display()));
        Ok(self
            .listing
            .lock()
            .unwrap()
            .iter()
            .map(OsString::from)
            .collect())
    }

    fn mkdir_all(&self, path: &Path, _mode: u32) -> Result<(), Error> {
        self.record(format!("mkdir {}", path.display()));
        Ok(())
    }

    fn open_file(&self, path: &Path, _opts: &OpenOptions, _mode: u32) -> Result<File, Error> {
        self.record(format!("open {}", path.display()));
        Err(self.injected("open", path))
    }

    fn stat(&self, path: &Path) -> Result<FileStat, Error> {
        if self.existing.lock().unwrap().iter().any(|p| p == path) {
            let now = Timestamp::now();
            return Ok(FileStat {
                size: 0,
                mode: 0,
                created: now,
                modified: now,
            });
        }
        Err(Error::from_fs_error(
            "stat",
            path,
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        ))
    }
}
