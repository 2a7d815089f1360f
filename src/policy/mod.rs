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

//! Naming policies decide what a retired log file is called and which old
//! backups to throw away.
//!
//! Two policies ship with the crate: [`IntegerPolicy`](crate::IntegerPolicy)
//! numbers its backups (`service.1.log`, `service.2.log`, ...) and
//! [`TimestampPolicy`](crate::TimestampPolicy) stamps them with the rotation
//! time. Implement [`NamingPolicy`] to plug in your own scheme.

use std::path::Path;
use std::path::PathBuf;

use crate::Error;

pub(crate) mod index;
pub(crate) mod integer;
pub(crate) mod timestamp;

/// The extension shared by active files and backups.
pub(crate) const LOG_EXT: &str = ".log";

/// Trimmed off (and preserved on) backups that a post-rotate hook compressed.
pub(crate) const GZ_EXT: &str = ".gz";

/// A post-rotate hook, invoked with the active file path and the path the
/// retired file was renamed to.
pub(crate) type PostRotateFn = Box<dyn Fn(&Path, &Path) + Send>;

/// A failed rotation.
///
/// `renamed` carries the path the active file was already renamed to when the
/// failure struck after the rename (a pruning failure, for instance), so the
/// caller can still dispatch the post-rotate hook for the new backup.
#[derive(Debug)]
pub struct RotateError {
    /// Where the active file ended up, if the rename itself succeeded.
    pub renamed: Option<PathBuf>,
    /// What went wrong.
    pub source: Error,
}

impl From<Error> for RotateError {
    fn from(source: Error) -> Self {
        RotateError {
            renamed: None,
            source,
        }
    }
}

/// A strategy for renaming retired log files and pruning old backups.
///
/// The writer calls [`dirs`](NamingPolicy::dirs) once at construction,
/// [`rotate`](NamingPolicy::rotate) whenever a threshold trips or a rotation
/// is forced, and [`post`](NamingPolicy::post) after the new active file has
/// been opened.
pub trait NamingPolicy: Send {
    /// Rename the active file out of the way and prune old backups.
    ///
    /// Returns the path the active file was renamed to. Rotation runs in the
    /// writer's serialized context; the active file handle is closed while
    /// this executes.
    fn rotate(&self, active: &Path) -> Result<PathBuf, RotateError>;

    /// Invoked after rotation finishes and the new active file is open.
    ///
    /// This blocks the writer, so hooks doing non-trivial work (compression)
    /// should hand off to a background thread. Hooks must not write back into
    /// the writer: the writer is still inside the rotation that invoked them.
    fn post(&self, active: &Path, new_path: &Path);

    /// Validate the configuration and return the directories the writer must
    /// create before the first rotation.
    fn dirs(&mut self, active: &Path) -> Result<Vec<PathBuf>, Error>;
}

/// The directory holding `path`, with the current directory standing in for a
/// bare file name.
pub(crate) fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// The backup name prefix for an active file: its base name minus any
/// trailing ".log", plus the joiner.
pub(crate) fn file_prefix(path: &Path, joiner: &str) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(LOG_EXT).unwrap_or(&name);
    format!("{stem}{joiner}")
}

/// The directories a policy needs: the active file's parent and, when
/// distinct, the archive directory.
pub(crate) fn rotation_dirs(active: &Path, archive_dir: Option<&Path>) -> Vec<PathBuf> {
    let parent = parent_dir(active);
    match archive_dir {
        Some(dir) if dir != parent => vec![parent, dir.to_path_buf()],
        _ => vec![parent],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_prefix_strips_log_extension() {
        assert_eq!(file_prefix(Path::new("/var/log/service.log"), "."), "service.");
        assert_eq!(file_prefix(Path::new("/var/log/service.log"), "-"), "service-");
        assert_eq!(file_prefix(Path::new("service.txt"), "."), "service.txt.");
        assert_eq!(file_prefix(Path::new("service"), "-"), "service-");
    }

    #[test]
    fn test_parent_dir_of_bare_name_is_cwd() {
        assert_eq!(parent_dir(Path::new("service.log")), PathBuf::from("."));
        assert_eq!(
            parent_dir(Path::new("/var/log/service.log")),
            PathBuf::from("/var/log")
        );
    }

    #[test]
    fn test_rotation_dirs_deduplicates_archive_dir() {
        let active = Path::new("/var/log/service.log");
        assert_eq!(rotation_dirs(active, None), vec![PathBuf::from("/var/log")]);
        assert_eq!(
            rotation_dirs(active, Some(Path::new("/var/log"))),
            vec![PathBuf::from("/var/log")]
        );
        assert_eq!(
            rotation_dirs(active, Some(Path::new("/var/log/archive"))),
            vec![PathBuf::from("/var/log"), PathBuf::from("/var/log/archive")]
        );
    }
}
