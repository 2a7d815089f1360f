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

//! The capability interface between the writer and the host filesystem.
//!
//! The writer and its naming policies never touch `std::fs` directly; every
//! stat, open, rename, remove and directory listing goes through a
//! [`Filesystem`]. Hosts may substitute their own implementation to intercept
//! renames, redirect writes, or run on a virtual filesystem. The default,
//! [`OsFilesystem`], delegates to the host OS.

use std::ffi::OsString;
use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::time::SystemTime;

use jiff::Timestamp;

use crate::Error;

/// File metadata as reported by [`Filesystem::stat`].
///
/// `created` is best-effort: on filesystems without a birth time it falls back
/// to the modification instant.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    /// File size in bytes.
    pub size: u64,
    /// POSIX permission bits; zero on platforms without them.
    pub mode: u32,
    /// The instant the file was created.
    pub created: Timestamp,
    /// The instant the file was last modified.
    pub modified: Timestamp,
}

/// Overridable file-managing procedures.
///
/// All operations fail with an [`Error`] of kind [`Io`](crate::ErrorKind::Io)
/// carrying the originating operation and path as context.
pub trait Filesystem: Send + Sync {
    /// Remove a file.
    fn remove(&self, path: &Path) -> Result<(), Error>;

    /// Rename a file.
    fn rename(&self, from: &Path, to: &Path) -> Result<(), Error>;

    /// List the names of the plain files in a directory.
    fn read_dir(&self, dir: &Path) -> Result<Vec<OsString>, Error>;

    /// Create a directory and all of its parents.
    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<(), Error>;

    /// Open a file with the given options, creating it with `mode` where the
    /// platform supports permission bits.
    fn open_file(&self, path: &Path, opts: &OpenOptions, mode: u32) -> Result<File, Error>;

    /// Stat a file, augmenting the usual metadata with its creation instant.
    fn stat(&self, path: &Path) -> Result<FileStat, Error>;
}

/// The default [`Filesystem`], backed by the host OS.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct OsFilesystem {}

impl Filesystem for OsFilesystem {
    fn remove(&self, path: &Path) -> Result<(), Error> {
        fs::remove_file(path).map_err(|err| Error::from_fs_error("remove", path, err))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), Error> {
        fs::rename(from, to).map_err(|err| {
            Error::from_fs_error("rename", from, err).with_context("to", to.display())
        })
    }

    fn read_dir(&self, dir: &Path) -> Result<Vec<OsString>, Error> {
        let entries = fs::read_dir(dir).map_err(|err| Error::from_fs_error("read_dir", dir, err))?;

        // Backups are always plain files; directories and symlinks can never
        // match a backup name pattern.
        let names = entries
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let file_type = entry.file_type().ok()?;
                if !file_type.is_file() {
                    return None;
                }
                Some(entry.file_name())
            })
            .collect();

        Ok(names)
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<(), Error> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        builder
            .create(path)
            .map_err(|err| Error::from_fs_error("mkdir", path, err))
    }

    fn open_file(&self, path: &Path, opts: &OpenOptions, mode: u32) -> Result<File, Error> {
        let opts = opts.clone();
        #[cfg(unix)]
        let opts = {
            use std::os::unix::fs::OpenOptionsExt;
            let mut opts = opts;
            opts.mode(mode);
            opts
        };
        #[cfg(not(unix))]
        let _ = mode;
        opts.open(path)
            .map_err(|err| Error::from_fs_error("open", path, err))
    }

    fn stat(&self, path: &Path) -> Result<FileStat, Error> {
        let meta = fs::metadata(path).map_err(|err| Error::from_fs_error("stat", path, err))?;

        let to_timestamp = |time: SystemTime| Timestamp::try_from(time).ok();
        let modified = meta
            .modified()
            .ok()
            .and_then(to_timestamp)
            .unwrap_or_else(Timestamp::now);
        let created = meta
            .created()
            .ok()
            .and_then(to_timestamp)
            .unwrap_or(modified);

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode()
        };
        #[cfg(not(unix))]
        let mode = 0;

        Ok(FileStat {
            size: meta.len(),
            mode,
            created,
            modified,
        })
    }
}
