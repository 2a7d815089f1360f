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

//! Gzip compression for rotated backups, packaged as post-rotate hooks.
//!
//! [`post_rotate`] compresses the fresh backup before rotation returns, which
//! is the safe choice for the ascending [`IntegerPolicy`](crate::IntegerPolicy)
//! where the next rotation renames that very file.
//! [`post_rotate_in_background`] hands the work to a thread and is meant for
//! the [`TimestampPolicy`](crate::TimestampPolicy), whose backups are never
//! renamed again. Errors never reach the writer's caller; they land on the
//! `log` facade.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::Error;
use crate::ErrorKind;
use crate::Filesystem;
use crate::OsFilesystem;

/// Appended to a file name to form the compressed file name.
pub const GZ_SUFFIX: &str = ".gz";

/// What one compression run did.
#[derive(Debug, Clone)]
pub struct Report {
    /// The file that was compressed (and then deleted).
    pub old_file: PathBuf,
    /// The compressed file that replaced it.
    pub new_file: PathBuf,
    /// Size of the source in bytes.
    pub old_size: u64,
    /// Size of the compressed result in bytes.
    pub new_size: u64,
    /// How long the run took.
    pub elapsed: Duration,
}

/// Gzip `path` into `path.gz`, removing the source. Blocks until finished.
///
/// On failure the partial `.gz` file is removed and the source is left alone.
pub fn compress(path: &Path) -> Result<Report, Error> {
    compress_with(&OsFilesystem::default(), path)
}

/// [`compress`] against a caller-supplied [`Filesystem`].
pub fn compress_with(filer: &dyn Filesystem, path: &Path) -> Result<Report, Error> {
    let mut new_file = path.as_os_str().to_os_string();
    new_file.push(GZ_SUFFIX);
    let new_file = PathBuf::from(new_file);

    let info = filer
        .stat(path)
        .map_err(|err| hook_error("failed to stat source file", err))?;

    let start = Instant::now();
    let new_size = match gzip(filer, path, &new_file, info.mode) {
        Ok(size) => size,
        Err(err) => {
            let _ = filer.remove(&new_file);
            return Err(err);
        }
    };

    filer
        .remove(path)
        .map_err(|err| hook_error("failed to delete source file", err))?;

    Ok(Report {
        old_file: path.to_path_buf(),
        new_file,
        old_size: info.size,
        new_size,
        elapsed: start.elapsed(),
    })
}

/// Run [`compress`] on its own thread and hand the outcome to `callback`.
///
/// Avoid this on files another thread may rename; the ascending integer
/// policy renames its freshest backup on every rotation.
pub fn compress_in_background(
    path: PathBuf,
    callback: impl FnOnce(Result<Report, Error>) + Send + 'static,
) {
    std::thread::Builder::new()
        .name("logroll-compress".to_string())
        .spawn(move || callback(compress(&path)))
        .expect("failed to spawn the log compression thread");
}

/// A post-rotate hook that compresses the new backup before rotation
/// returns, reporting through the `log` facade.
pub fn post_rotate() -> impl Fn(&Path, &Path) + Send {
    |_active: &Path, new_path: &Path| log_outcome(compress(new_path))
}

/// A post-rotate hook that compresses the new backup on a background thread,
/// reporting through the `log` facade.
pub fn post_rotate_in_background() -> impl Fn(&Path, &Path) + Send {
    |_active: &Path, new_path: &Path| {
        compress_in_background(new_path.to_path_buf(), log_outcome)
    }
}

fn log_outcome(outcome: Result<Report, Error>) {
    match outcome {
        Ok(report) => log::info!(
            "compressed {} ({} B) into {} ({} B) in {:?}",
            report.old_file.display(),
            report.old_size,
            report.new_file.display(),
            report.new_size,
            report.elapsed,
        ),
        Err(err) => log::error!("failed to compress rotated log: {err}"),
    }
}

fn hook_error(message: &'static str, err: Error) -> Error {
    Error::new(ErrorKind::PostRotateFailure, message).with_source(err)
}

/// Open the source and target, stream one into the other through a gzip
/// encoder, and report the compressed size.
fn gzip(filer: &dyn Filesystem, old: &Path, new: &Path, mode: u32) -> Result<u64, Error> {
    let mut read_opts = OpenOptions::new();
    read_opts.read(true);
    let mut source = filer
        .open_file(old, &read_opts, 0)
        .map_err(|err| hook_error("failed to open source file", err))?;

    let mut write_opts = OpenOptions::new();
    write_opts.write(true).create(true).truncate(true);
    let target = filer
        .open_file(new, &write_opts, mode)
        .map_err(|err| hook_error("failed to open gz file", err))?;

    let mut encoder = GzEncoder::new(target, Compression::default());
    io::copy(&mut source, &mut encoder).map_err(|err| {
        Error::new(ErrorKind::PostRotateFailure, "failed to compress file")
            .with_context("from", old.display())
            .with_context("to", new.display())
            .with_source(err)
    })?;
    let target = encoder.finish().map_err(|err| {
        Error::new(ErrorKind::PostRotateFailure, "failed to finish gz stream").with_source(err)
    })?;
    drop(target);

    let info = filer
        .stat(new)
        .map_err(|err| hook_error("failed to stat gz file", err))?;
    Ok(info.size)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Read;

    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_compress_round_trips_and_removes_source() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("service.1.log");
        let payload = b"a log line\n".repeat(100);
        fs::write(&path, &payload).unwrap();

        let report = compress(&path).unwrap();
        assert_eq!(report.old_file, path);
        assert_eq!(report.new_file, temp_dir.path().join("service.1.log.gz"));
        assert_eq!(report.old_size, payload.len() as u64);
        assert!(report.new_size > 0);
        assert!(!path.exists(), "the source must be deleted");

        let mut decoder = GzDecoder::new(fs::File::open(&report.new_file).unwrap());
        let mut restored = Vec::new();
        decoder.read_to_end(&mut restored).unwrap();
        assert_eq!(restored, payload);
    }

    #[cfg(unix)]
    #[test]
    fn test_compress_preserves_source_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("service.1.log");
        fs::write(&path, b"payload").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        let report = compress(&path).unwrap();
        let mode = fs::metadata(&report.new_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn test_compress_missing_source_is_post_rotate_failure() {
        let temp_dir = TempDir::new().unwrap();
        let err = compress(&temp_dir.path().join("nope.log")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PostRotateFailure);
    }

    #[test]
    fn test_background_compression_delivers_a_report() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("service.1.log");
        fs::write(&path, b"payload").unwrap();

        let (sender, receiver) = crossbeam_channel::bounded(1);
        compress_in_background(path.clone(), move |outcome| {
            let _ = sender.send(outcome);
        });

        let report = receiver
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert_eq!(report.old_file, path);
        assert!(report.new_file.exists());
    }
}
