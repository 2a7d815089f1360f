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
use std::time::Duration;

use jiff::SignedDuration;
use jiff::Timestamp;
use jiff::civil::DateTime;
use jiff::fmt::strtime;
use jiff::tz::TimeZone;

use crate::Error;
use crate::ErrorKind;
use crate::Filesystem;
use crate::OsFilesystem;
use crate::clock::Clock;
use crate::policy::GZ_EXT;
use crate::policy::LOG_EXT;
use crate::policy::NamingPolicy;
use crate::policy::PostRotateFn;
use crate::policy::RotateError;
use crate::policy::file_prefix;
use crate::policy::index::BackupSet;
use crate::policy::parent_dir;
use crate::policy::rotation_dirs;

/// A naming policy that stamps its backups with the rotation time,
/// `service-2024-08-10T17-30-00.123.log` style.
///
/// Backups can be limited by count and by age. The default format has
/// millisecond resolution; when two rotations land on the same formatted
/// instant anyway, the second refuses to rotate rather than silently
/// overwrite the first backup.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use logroll::TimestampPolicy;
///
/// let policy = TimestampPolicy::new()
///     .file_count(10)
///     .max_file_age(Duration::from_secs(7 * 24 * 60 * 60))
///     .use_utc(true);
/// ```
pub struct TimestampPolicy {
    archive_dir: Option<PathBuf>,
    file_count: usize,
    max_age: Option<SignedDuration>,
    use_utc: bool,
    format: String,
    joiner: String,
    post_rotate: Option<PostRotateFn>,
    filer: Arc<dyn Filesystem>,
    clock: Clock,
}

impl Default for TimestampPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimestampPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimestampPolicy")
            .field("archive_dir", &self.archive_dir)
            .field("file_count", &self.file_count)
            .field("max_age", &self.max_age)
            .field("use_utc", &self.use_utc)
            .field("format", &self.format)
            .field("joiner", &self.joiner)
            .finish_non_exhaustive()
    }
}

impl TimestampPolicy {
    /// The strftime format used when none is configured. Millisecond
    /// resolution keeps rapid consecutive rotations from colliding.
    pub const DEFAULT_FORMAT: &'static str = "%Y-%m-%dT%H-%M-%S.%3f";

    /// The string between the file name prefix and the time stamp.
    pub const DEFAULT_JOINER: &'static str = "-";

    /// Creates a policy with unlimited backups kept next to the active file,
    /// named in local time with [`DEFAULT_FORMAT`](Self::DEFAULT_FORMAT).
    pub fn new() -> Self {
        TimestampPolicy {
            archive_dir: None,
            file_count: 0,
            max_age: None,
            use_utc: false,
            format: Self::DEFAULT_FORMAT.to_string(),
            joiner: Self::DEFAULT_JOINER.to_string(),
            post_rotate: None,
            filer: Arc::new(OsFilesystem::default()),
            clock: Clock::DefaultClock,
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

    /// Set the maximum age of backups. A zero duration keeps them forever.
    #[must_use]
    pub fn max_file_age(mut self, age: Duration) -> Self {
        self.max_age = (!age.is_zero())
            .then(|| SignedDuration::try_from(age).unwrap_or(SignedDuration::MAX));
        self
    }

    /// Stamp backups in UTC instead of local time.
    #[must_use]
    pub fn use_utc(mut self, use_utc: bool) -> Self {
        self.use_utc = use_utc;
        self
    }

    /// Set the strftime format for backup time stamps.
    ///
    /// Low-resolution formats invite collisions between rapid rotations; the
    /// policy refuses to overwrite when that happens.
    #[must_use]
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Set the string between the file name prefix and the time stamp.
    #[must_use]
    pub fn joiner(mut self, joiner: impl Into<String>) -> Self {
        self.joiner = joiner.into();
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

    #[cfg(test)]
    pub(crate) fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn time_zone(&self) -> TimeZone {
        if self.use_utc {
            TimeZone::UTC
        } else {
            TimeZone::system()
        }
    }

    fn archive_dir_for(&self, active: &Path) -> PathBuf {
        match &self.archive_dir {
            Some(dir) => dir.clone(),
            None => parent_dir(active),
        }
    }

    /// Find every backup whose name is the prefix plus a stamp in the
    /// configured format, with optional `.log` and `.gz` suffixes.
    fn scan(&self, active: &Path) -> BackupSet<Timestamp> {
        let dir = self.archive_dir_for(active);
        let prefix = file_prefix(active, &self.joiner);
        let time_zone = self.time_zone();

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

            // Anything that does not parse as a stamp is not our file.
            let Ok(datetime) = DateTime::strptime(&self.format, rest) else {
                continue;
            };
            let Ok(stamp) = datetime.to_zoned(time_zone.clone()) else {
                continue;
            };
            set.push(dir.join(name), stamp.timestamp());
        }

        set
    }

    /// Delete backups older than the age limit, then enough of the oldest
    /// survivors to satisfy the count limit.
    fn prune(&self, now: Timestamp, mut set: BackupSet<Timestamp>) -> Result<(), Error> {
        set.sort_ascending();
        let mut gone = vec![false; set.len()];

        if let Some(max_age) = self.max_age {
            for idx in 0..set.len() {
                if now.duration_since(set.key(idx)) < max_age {
                    continue;
                }
                self.filer.remove(set.path(idx)).map_err(|err| {
                    Error::new(ErrorKind::Io, "failed to remove expired backup").with_source(err)
                })?;
                gone[idx] = true;
            }
        }

        let mut count = set.len() - gone.iter().filter(|flag| **flag).count();
        if self.file_count > 0 {
            for idx in 0..set.len() {
                if count <= self.file_count {
                    break;
                }
                if gone[idx] {
                    continue;
                }
                self.filer.remove(set.path(idx)).map_err(|err| {
                    Error::new(ErrorKind::Io, "failed to remove old backup").with_source(err)
                })?;
                count -= 1;
            }
        }

        Ok(())
    }
}

impl NamingPolicy for TimestampPolicy {
    fn rotate(&self, active: &Path) -> Result<PathBuf, RotateError> {
        let now = self.clock.now();
        let stamp = strtime::format(&self.format, &now.to_zoned(self.time_zone()))
            .map_err(|err| {
                Error::new(ErrorKind::InvalidConfig, "failed to format backup time stamp")
                    .with_context("format", &self.format)
                    .with_source(err)
            })?;

        let dir = self.archive_dir_for(active);
        let prefix = file_prefix(active, &self.joiner);
        let new_path = dir.join(format!("{prefix}{stamp}{LOG_EXT}"));

        // Two rotations within the format's resolution would land on the same
        // name; surface that instead of clobbering the earlier backup.
        if self.filer.stat(&new_path).is_ok() {
            return Err(Error::new(ErrorKind::Io, "backup target already exists")
                .with_context("path", new_path.display())
                .into());
        }

        self.filer.rename(active, &new_path).map_err(|err| {
            Error::new(ErrorKind::Io, "failed to rotate active file").with_source(err)
        })?;

        self.prune(now, self.scan(active))
            .map_err(|source| RotateError {
                renamed: Some(new_path.clone()),
                source,
            })?;

        Ok(new_path)
    }

    fn post(&self, active: &Path, new_path: &Path) {
        if let Some(hook) = &self.post_rotate {
            hook(active, new_path);
        }
    }

    fn dirs(&mut self, active: &Path) -> Result<Vec<PathBuf>, Error> {
        if self.format.is_empty() {
            self.format = Self::DEFAULT_FORMAT.to_string();
        }
        if self.joiner.is_empty() {
            self.joiner = Self::DEFAULT_JOINER.to_string();
        }
        Ok(rotation_dirs(active, self.archive_dir.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::RecordingFs;

    fn utc_stamp(ts: Timestamp) -> String {
        strtime::format(TimestampPolicy::DEFAULT_FORMAT, &ts.to_zoned(TimeZone::UTC)).unwrap()
    }

    fn manual(now: Timestamp) -> Clock {
        Clock::ManualClock(ManualClock::new(now))
    }

    #[test]
    fn test_rotate_names_backup_from_the_clock() {
        let now = "2024-08-10T12:00:00Z".parse::<Timestamp>().unwrap();
        let filer = Arc::new(RecordingFs::new());
        let policy = TimestampPolicy::new()
            .use_utc(true)
            .filesystem(filer.clone())
            .clock(manual(now));

        let new_path = policy.rotate(Path::new("/var/log/service.log")).unwrap();
        assert_eq!(
            new_path,
            PathBuf::from("/var/log/service-2024-08-10T12-00-00.000.log")
        );
        assert_eq!(
            filer.ops(),
            vec![
                "rename /var/log/service.log -> /var/log/service-2024-08-10T12-00-00.000.log"
                    .to_string(),
                "read_dir /var/log".to_string(),
            ]
        );
    }

    #[test]
    fn test_generated_name_parses_back_to_its_instant() {
        let now = "2024-08-10T12:00:00.123Z".parse::<Timestamp>().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let active = temp_dir.path().join("service.log");
        fs::write(&active, b"active").unwrap();

        let policy = TimestampPolicy::new().use_utc(true).clock(manual(now));
        let new_path = policy.rotate(&active).unwrap();

        let name = new_path.file_name().unwrap().to_str().unwrap();
        let rest = name
            .strip_prefix("service-")
            .and_then(|rest| rest.strip_suffix(".log"))
            .unwrap();
        let parsed = DateTime::strptime(TimestampPolicy::DEFAULT_FORMAT, rest)
            .unwrap()
            .to_zoned(TimeZone::UTC)
            .unwrap()
            .timestamp();
        assert_eq!(parsed, now);
    }

    #[test]
    fn test_prune_by_age_then_count() {
        let now = "2024-08-10T12:00:00Z".parse::<Timestamp>().unwrap();
        let archive = "/var/log/archives";

        // Ten backups, each ten seconds older than the one before it.
        let ages: Vec<i64> = (0..10).map(|i| i * 10).collect();
        let names: Vec<String> = ages
            .iter()
            .map(|secs| {
                format!(
                    "service-{}.log",
                    utc_stamp(now - SignedDuration::from_secs(*secs))
                )
            })
            .collect();

        let filer = Arc::new(RecordingFs::with_listing(names.clone()));
        let policy = TimestampPolicy::new()
            .archive_dir(archive)
            .use_utc(true)
            .max_file_age(Duration::from_secs(60))
            .file_count(2)
            .filesystem(filer.clone())
            .clock(manual(now));

        let new_path = policy.rotate(Path::new("/var/log/service.log")).unwrap();
        assert_eq!(
            new_path,
            PathBuf::from(format!("/var/log/archives/service-{}.log", utc_stamp(now)))
        );

        let mut expected = vec![
            format!(
                "rename /var/log/service.log -> /var/log/archives/service-{}.log",
                utc_stamp(now)
            ),
            format!("read_dir {archive}"),
        ];
        // The age pass walks oldest first and takes everything older than a
        // minute; the count pass keeps walking until two backups remain.
        for secs in [90, 80, 70, 60] {
            expected.push(format!("remove {archive}/{}", names[secs / 10]));
        }
        for secs in [50, 40, 30, 20] {
            expected.push(format!("remove {archive}/{}", names[secs / 10]));
        }
        assert_eq!(filer.ops(), expected);
    }

    #[test]
    fn test_rotate_refuses_to_overwrite_same_stamp_backup() {
        let now = "2024-08-10T12:00:00Z".parse::<Timestamp>().unwrap();
        let filer = Arc::new(RecordingFs::new());
        filer.mark_existing(format!("/var/log/service-{}.log", utc_stamp(now)));

        let policy = TimestampPolicy::new()
            .use_utc(true)
            .filesystem(filer.clone())
            .clock(manual(now));

        let err = policy.rotate(Path::new("/var/log/service.log")).unwrap_err();
        assert!(err.renamed.is_none());
        assert_eq!(err.source.kind(), ErrorKind::Io);
        assert!(filer.ops().is_empty(), "nothing may be renamed or removed");
    }

    #[test]
    fn test_scan_ignores_foreign_names() {
        let now = "2024-08-10T12:00:00Z".parse::<Timestamp>().unwrap();
        let stamped = format!("service-{}.log", utc_stamp(now - SignedDuration::from_secs(60)));
        let filer = Arc::new(RecordingFs::with_listing([
            stamped.as_str(),
            "service-not-a-stamp.log",
            "other-2024-08-10T11-00-00.000.log",
            "service.log",
        ]));

        let policy = TimestampPolicy::new()
            .use_utc(true)
            .max_file_age(Duration::from_secs(30))
            .filesystem(filer.clone())
            .clock(manual(now));

        policy.rotate(Path::new("/var/log/service.log")).unwrap();

        let removes: Vec<String> = filer
            .ops()
            .into_iter()
            .filter(|op| op.starts_with("remove"))
            .collect();
        assert_eq!(removes, vec![format!("remove /var/log/{stamped}")]);
    }

    #[test]
    fn test_gzipped_backups_participate_in_pruning() {
        let now = "2024-08-10T12:00:00Z".parse::<Timestamp>().unwrap();
        let old = format!(
            "service-{}.log.gz",
            utc_stamp(now - SignedDuration::from_secs(120))
        );
        let filer = Arc::new(RecordingFs::with_listing([old.as_str()]));

        let policy = TimestampPolicy::new()
            .use_utc(true)
            .max_file_age(Duration::from_secs(60))
            .filesystem(filer.clone())
            .clock(manual(now));

        policy.rotate(Path::new("/var/log/service.log")).unwrap();
        assert_eq!(filer.count_ops(&format!("remove /var/log/{old}")), 1);
    }

    #[test]
    fn test_dirs_restores_default_format_and_joiner() {
        let mut policy = TimestampPolicy::new()
            .format("")
            .joiner("")
            .archive_dir("/var/log/archives");

        let dirs = policy.dirs(Path::new("/var/log/service.log")).unwrap();
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/var/log"),
                PathBuf::from("/var/log/archives")
            ]
        );
        assert_eq!(policy.format, TimestampPolicy::DEFAULT_FORMAT);
        assert_eq!(policy.joiner, TimestampPolicy::DEFAULT_JOINER);
    }

    #[test]
    fn test_prune_failure_still_reports_new_path() {
        let now = "2024-08-10T12:00:00Z".parse::<Timestamp>().unwrap();
        let old = format!(
            "service-{}.log",
            utc_stamp(now - SignedDuration::from_secs(120))
        );
        let filer = Arc::new(RecordingFs::with_listing([old.as_str()]));
        filer.fail_remove_of(format!("/var/log/{old}"));

        let policy = TimestampPolicy::new()
            .use_utc(true)
            .max_file_age(Duration::from_secs(60))
            .filesystem(filer.clone())
            .clock(manual(now));

        let err = policy.rotate(Path::new("/var/log/service.log")).unwrap_err();
        let expected = format!("/var/log/service-{}.log", utc_stamp(now));
        assert_eq!(err.renamed, Some(PathBuf::from(expected)));
        assert_eq!(err.source.kind(), ErrorKind::Io);
    }
}
