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

use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use crate::Error;
use crate::ErrorKind;
use crate::Filesystem;
use crate::OsFilesystem;
use crate::policy::GZ_EXT;
use crate::policy::LOG_EXT;
use crate::policy::NamingPolicy;
use crate::policy::PostRotateFn;
use crate::policy::RotateError;
use crate::policy::file_prefix;
use crate::policy::index::BackupSet;
use crate::policy::parent_dir;
use crate::policy::rotation_dirs;

/// The joiner between the backup name prefix and its integer.
const JOINER: &str = ".";

/// Which direction integer backups are numbered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileOrder {
    /// The just-retired file is always `.1`; every existing backup shifts up
    /// to make room, so higher integers are older.
    #[default]
    Ascending,
    /// The just-retired file takes the next highest integer; `.1` is the
    /// oldest backup and pruning removes the smallest integers.
    Descending,
}

/// A naming policy that numbers its backups, `service.1.log` style.
///
/// In the default ascending order every backup is renamed on every rotation;
/// prefer a modest `file_count` to keep that cascade short. A `.gz` suffix
/// left behind by a compression hook survives the renames.
///
/// # Examples
///
/// ```
/// use logroll::FileOrder;
/// use logroll::IntegerPolicy;
///
/// let policy = IntegerPolicy::new()
///     .file_count(5)
///     .order(FileOrder::Descending);
/// ```
pub struct IntegerPolicy {
    archive_dir: Option<PathBuf>,
    file_count: usize,
    order: FileOrder,
    post_rotate: Option<PostRotateFn>,
    filer: Arc<dyn Filesystem>,
}

impl Default for IntegerPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IntegerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegerPolicy")
            .field("archive_dir", &self.archive_dir)
            .field("file_count", &self.file_count)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl IntegerPolicy {
    /// Creates a policy with unlimited backups, ascending order, and backups
    /// kept next to the active file.
    pub fn new() -> Self {
        IntegerPolicy {
            archive_dir: None,
            file_count: 0,
            order: FileOrder::default(),
            post_rotate: None,
            filer: Arc::new(OsFilesystem::default()),
        }
    }

    /// Set the directory rotated backups are moved to.
    ///
    /// Defaults to the active file's directory.
    #[must_use]
    pub fn archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    /// Set the maximum number of backups to keep. Zero keeps them all.
    #[must_use]
    pub fn file_count(mut self, count: usize) -> Self {
        self.file_count = count;
        self
    }

    /// Set the numbering order.
    #[must_use]
    pub fn order(mut self, order: FileOrder) -> Self {
        self.order = order;
        self
    }

    /// Set a hook invoked after every successful rotation with the active
    /// file path and the new backup path.
    #[must_use]
    pub fn post_rotate(mut self, hook: impl Fn(&Path, &Path) + Send + 'static) -> Self {
        self.post_rotate = Some(Box::new(hook));
        self
    }

    /// Override the filesystem the policy operates on.
    #[must_use]
    pub fn filesystem(mut self, filer: Arc<dyn Filesystem>) -> Self {
        self.filer = filer;
        self
    }

    fn archive_dir_for(&self, active: &Path) -> PathBuf {
        match &self.archive_dir {
            Some(dir) => dir.clone(),
            None => parent_dir(active),
        }
    }

    fn numbered_path(&self, dir: &Path, prefix: &str, key: u64, gzipped: bool) -> PathBuf {
        let ext = if gzipped {
            format!("{LOG_EXT}{GZ_EXT}")
        } else {
            LOG_EXT.to_string()
        };
        dir.join(format!("{prefix}{key}{ext}"))
    }

    /// Find every backup in the archive directory whose name is the prefix
    /// plus a bare integer, with optional `.log` and `.gz` suffixes.
    fn scan(&self, active: &Path) -> BackupSet<u64> {
        let dir = self.archive_dir_for(active);
        let prefix = file_prefix(active, JOINER);

        let mut set = BackupSet::new();
        let Ok(names) = self.filer.read_dir(&dir) else {
            return set;
        };

        for name in names {
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(rest) = name.strip_prefix(prefix.as_str()) else {
                continue;
            };
            let rest = rest.strip_suffix(GZ_EXT).unwrap_or(rest);
            let rest = rest.strip_suffix(LOG_EXT).unwrap_or(rest);
            if let Ok(key) = rest.parse::<u64>() {
                set.push(dir.join(name), key);
            }
        }

        set
    }

    fn is_gzipped(path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "gz")
    }

    /// Shift every backup up one integer, then retire the active file to `.1`.
    ///
    /// Walking from the largest key down, an entry only needs a rename when
    /// its successor slot is occupied; a gap below it in the walk means the
    /// slot above it is vacant and the entry can stay put.
    fn rotate_ascending(
        &self,
        mut set: BackupSet<u64>,
        active: &Path,
    ) -> Result<PathBuf, RotateError> {
        let dir = self.archive_dir_for(active);
        let prefix = file_prefix(active, JOINER);

        set.sort_descending();
        for idx in 0..set.len() {
            if idx + 1 != set.len() && Some(set.key(idx + 1)) != set.key(idx).checked_sub(1) {
                continue;
            }

            let key = set.key(idx) + 1;
            let target = self.numbered_path(&dir, &prefix, key, Self::is_gzipped(set.path(idx)));
            self.filer.rename(set.path(idx), &target).map_err(|err| {
                Error::new(ErrorKind::Io, "failed to rotate backup file").with_source(err)
            })?;
            set.set(idx, target, key);
        }

        let new_path = self.numbered_path(&dir, &prefix, 1, false);
        self.filer.rename(active, &new_path).map_err(|err| {
            Error::new(ErrorKind::Io, "failed to rotate active file").with_source(err)
        })?;
        set.push(new_path.clone(), 1);

        self.prune_ascending(&set).map_err(|source| RotateError {
            renamed: Some(new_path.clone()),
            source,
        })?;

        Ok(new_path)
    }

    /// Remove the highest integers (the oldest backups) until the count fits.
    fn prune_ascending(&self, set: &BackupSet<u64>) -> Result<(), Error> {
        if self.file_count == 0 {
            return Ok(());
        }

        let mut count = set.len();
        for (path, _) in set.iter() {
            if count <= self.file_count {
                break;
            }
            self.filer.remove(path).map_err(|err| {
                Error::new(ErrorKind::Io, "failed to remove old backup").with_source(err)
            })?;
            count -= 1;
        }

        Ok(())
    }

    /// Prune the oldest backups, renumber the survivors densely from 1, then
    /// retire the active file to the next highest integer.
    fn rotate_descending(
        &self,
        mut set: BackupSet<u64>,
        active: &Path,
    ) -> Result<PathBuf, RotateError> {
        let dir = self.archive_dir_for(active);
        let prefix = file_prefix(active, JOINER);

        set.sort_ascending();
        let mut kept = self.prune_descending(set)?;

        for idx in 0..kept.len() {
            let key = idx as u64 + 1;
            if kept.key(idx) == key {
                continue;
            }
            let target = self.numbered_path(&dir, &prefix, key, Self::is_gzipped(kept.path(idx)));
            self.filer.rename(kept.path(idx), &target).map_err(|err| {
                Error::new(ErrorKind::Io, "failed to rotate backup file").with_source(err)
            })?;
            kept.set(idx, target, key);
        }

        let new_path = self.numbered_path(&dir, &prefix, kept.len() as u64 + 1, false);
        self.filer.rename(active, &new_path).map_err(|err| {
            Error::new(ErrorKind::Io, "failed to rotate active file").with_source(err)
        })?;

        Ok(new_path)
    }

    /// Remove the lowest integers until one slot fewer than `file_count`
    /// remains, leaving room for the incoming backup. Zero keeps everything.
    fn prune_descending(&self, set: BackupSet<u64>) -> Result<BackupSet<u64>, Error> {
        if self.file_count == 0 {
            return Ok(set);
        }

        let mut kept = BackupSet::new();
        let mut count = set.len();
        for (path, key) in set.iter() {
            if count < self.file_count {
                kept.push(path.to_path_buf(), key);
                continue;
            }
            self.filer.remove(path).map_err(|err| {
                Error::new(ErrorKind::Io, "failed to remove old backup").with_source(err)
            })?;
            count -= 1;
        }

        Ok(kept)
    }
}

impl NamingPolicy for IntegerPolicy {
    fn rotate(&self, active: &Path) -> Result<PathBuf, RotateError> {
        let set = self.scan(active);
        match self.order {
            FileOrder::Ascending => self.rotate_ascending(set, active),
            FileOrder::Descending => self.rotate_descending(set, active),
        }
    }

    fn post(&self, active: &Path, new_path: &Path) {
        if let Some(hook) = &self.post_rotate {
            hook(active, new_path);
        }
    }

    fn dirs(&mut self, active: &Path) -> Result<Vec<PathBuf>, Error> {
        Ok(rotation_dirs(active, self.archive_dir.as_deref()))
    }
}
