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

use std::env;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use crossbeam_channel::bounded;
use crossbeam_channel::unbounded;
use jiff::SignedDuration;
use jiff::Timestamp;

use crate::Error;
use crate::ErrorKind;
use crate::Filesystem;
use crate::OsFilesystem;
use crate::clock::Clock;
use crate::policy::NamingPolicy;
use crate::policy::parent_dir;

/// The maximum file size used when neither a size nor an interval is
/// configured.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// The POSIX mode for newly created log files.
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// The POSIX mode for newly created log directories.
pub const DEFAULT_DIR_MODE: u32 = 0o750;

/// How long to sit on a cached open failure before issuing another open
/// syscall. Keeps a persistently broken filesystem from turning every log
/// line into a syscall storm.
const OPEN_RETRY_BACKOFF: SignedDuration = SignedDuration::from_secs(10);

/// A builder for configuring [`LogWriter`].
pub struct LogWriterBuilder {
    filepath: Option<PathBuf>,
    max_size: u64,
    every: Duration,
    file_mode: u32,
    dir_mode: u32,
    policy: Option<Box<dyn NamingPolicy>>,
    filer: Arc<dyn Filesystem>,
    clock: Clock,
}

impl Default for LogWriterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LogWriterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriterBuilder")
            .field("filepath", &self.filepath)
            .field("max_size", &self.max_size)
            .field("every", &self.every)
            .field("file_mode", &self.file_mode)
            .field("dir_mode", &self.dir_mode)
            .finish_non_exhaustive()
    }
}

impl LogWriterBuilder {
    /// Creates a new [`LogWriterBuilder`].
    #[must_use]
    pub fn new() -> Self {
        LogWriterBuilder {
            filepath: None,
            max_size: 0,
            every: Duration::ZERO,
            file_mode: DEFAULT_FILE_MODE,
            dir_mode: DEFAULT_DIR_MODE,
            policy: None,
            filer: Arc::new(OsFilesystem::default()),
            clock: Clock::DefaultClock,
        }
    }

    /// Set the full path of the active log file.
    ///
    /// Defaults to a process-derived name under the system temp directory;
    /// set this, the default is lousy.
    #[must_use]
    pub fn filepath(mut self, filepath: impl Into<PathBuf>) -> Self {
        self.filepath = Some(filepath.into());
        self
    }

    /// Set the maximum size of the active file in bytes. Zero disables
    /// size-triggered rotation, unless the interval is also unset, in which
    /// case [`DEFAULT_MAX_FILE_SIZE`] applies.
    #[must_use]
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }

    /// Rotate whenever the active file grows older than `every`. A zero
    /// duration disables age-triggered rotation.
    #[must_use]
    pub fn rotate_every(mut self, every: Duration) -> Self {
        self.every = every;
        self
    }

    /// Set the POSIX mode for newly created log files.
    #[must_use]
    pub fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    /// Set the POSIX mode for newly created log directories.
    #[must_use]
    pub fn dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = mode;
        self
    }

    /// Set the naming policy deciding backup names and prune candidates.
    ///
    /// Required; building without one fails.
    #[must_use]
    pub fn naming_policy(mut self, policy: impl NamingPolicy + 'static) -> Self {
        self.policy = Some(Box::new(policy));
        self
    }

    /// Override the filesystem the writer operates on.
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

    /// Builds the [`LogWriter`], surfacing every initialization error.
    ///
    /// # Errors
    ///
    /// Return an error if either:
    ///
    /// * No naming policy was configured.
    /// * The naming policy rejects the log file path.
    /// * The log directories cannot be created.
    /// * The active file cannot be opened or an overdue rotation fails.
    pub fn build(self) -> Result<LogWriter, Error> {
        self.init(false)
    }

    /// Builds the [`LogWriter`], deferring initialization errors.
    ///
    /// Anything short of a missing naming policy is logged and retried on the
    /// first write.
    ///
    /// # Panics
    ///
    /// Panics if no naming policy was configured.
    #[must_use]
    pub fn must_build(self) -> LogWriter {
        match self.init(true) {
            Ok(writer) => writer,
            Err(err) => panic!("{err}"),
        }
    }

    fn init(self, lenient: bool) -> Result<LogWriter, Error> {
        let Some(policy) = self.policy else {
            return Err(Error::new(
                ErrorKind::NilNamingPolicy,
                "no naming policy provided",
            ));
        };

        let filepath = self.filepath.unwrap_or_else(default_filepath);
        let max_size = if self.max_size == 0 && self.every.is_zero() {
            DEFAULT_MAX_FILE_SIZE
        } else {
            self.max_size
        };
        let every = (!self.every.is_zero())
            .then(|| SignedDuration::try_from(self.every).unwrap_or(SignedDuration::MAX));

        let created = self.clock.now();
        let mut engine = Engine {
            filepath: filepath.clone(),
            max_size,
            every,
            file_mode: self.file_mode,
            dir_mode: self.dir_mode,
            policy,
            filer: self.filer,
            clock: self.clock,
            file: None,
            size: 0,
            created,
            open_failure: None,
        };

        match engine.setup() {
            Ok(()) => {}
            Err(err) if lenient => {
                log::warn!("deferring log writer initialization error: {err}");
                // Leave the backoff cache clear so the first write retries
                // immediately instead of replaying this error for 10 seconds.
                engine.open_failure = None;
            }
            Err(err) => return Err(err),
        }

        let (sender, receiver) = unbounded();
        let worker = std::thread::Builder::new()
            .name("logroll-writer".to_string())
            .spawn(move || engine.run(receiver))
            .expect("failed to spawn the log writer thread");

        Ok(LogWriter {
            sender,
            worker: Some(worker),
            filepath,
        })
    }
}

/// A process-and-package-derived fallback under the system temp directory.
fn default_filepath() -> PathBuf {
    let program = env::current_exe()
        .ok()
        .and_then(|exe| exe.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "log".to_string());
    env::temp_dir().join(format!("{program}-{}.log", env!("CARGO_PKG_NAME")))
}

enum Request {
    Write {
        buf: Vec<u8>,
        reply: Sender<Result<usize, Error>>,
    },
    Rotate {
        reply: Sender<Result<u64, Error>>,
    },
    Close {
        reply: Sender<Result<(), Error>>,
    },
}

/// A writer that appends to one active file and rotates it through the
/// configured naming policy when a size or age threshold trips.
///
/// All operations are serialized through a dedicated worker thread that owns
/// the file handle, so a writer can be driven from `log` or any other
/// framework expecting an [`io::Write`] sink. Each call blocks until the
/// worker has finished it.
pub struct LogWriter {
    sender: Sender<Request>,
    worker: Option<JoinHandle<()>>,
    filepath: PathBuf,
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("filepath", &self.filepath)
            .finish_non_exhaustive()
    }
}

impl LogWriter {
    /// Creates a new [`LogWriterBuilder`].
    #[must_use]
    pub fn builder() -> LogWriterBuilder {
        LogWriterBuilder::new()
    }

    /// The path of the active log file.
    #[must_use]
    pub fn filepath(&self) -> &Path {
        &self.filepath
    }

    /// Force a rotation regardless of thresholds.
    ///
    /// Returns the size the active file had when rotation began.
    pub fn rotate(&self) -> Result<u64, Error> {
        let (reply, response) = bounded(1);
        self.sender
            .send(Request::Rotate { reply })
            .map_err(|_| closed_error())?;
        match response.recv() {
            Ok(result) => result,
            Err(_) => Err(closed_error()),
        }
    }

    /// Close the active file and stop the worker thread.
    ///
    /// Every subsequent operation fails with
    /// [`Closed`](crate::ErrorKind::Closed).
    pub fn close(&mut self) -> Result<(), Error> {
        let result = self.request_close();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        result
    }

    fn request_close(&self) -> Result<(), Error> {
        let (reply, response) = bounded(1);
        self.sender
            .send(Request::Close { reply })
            .map_err(|_| closed_error())?;
        match response.recv() {
            Ok(result) => result,
            Err(_) => Err(closed_error()),
        }
    }

    fn write_bytes(&self, buf: &[u8]) -> Result<usize, Error> {
        let (reply, response) = bounded(1);
        self.sender
            .send(Request::Write {
                buf: buf.to_vec(),
                reply,
            })
            .map_err(|_| closed_error())?;
        match response.recv() {
            Ok(result) => result,
            Err(_) => Err(closed_error()),
        }
    }
}

impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf).map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.request_close();
            let _ = worker.join();
        }
    }
}

fn closed_error() -> Error {
    Error::new(ErrorKind::Closed, "log writer is closed")
}

/// The single owner of the active file handle and every piece of mutable
/// writer state. Lives on the worker thread; requests reach it one at a time.
struct Engine {
    filepath: PathBuf,
    max_size: u64,
    every: Option<SignedDuration>,
    file_mode: u32,
    dir_mode: u32,
    policy: Box<dyn NamingPolicy>,
    filer: Arc<dyn Filesystem>,
    clock: Clock,
    file: Option<File>,
    size: u64,
    created: Timestamp,
    open_failure: Option<(Timestamp, String)>,
}

impl Engine {
    /// Startup: validate the policy, create its directories, open the active
    /// file, and rotate right away if the existing file is already over a
    /// threshold.
    fn setup(&mut self) -> Result<(), Error> {
        let dirs = self.policy.dirs(&self.filepath).map_err(|err| {
            Error::new(ErrorKind::InvalidConfig, "naming policy rejected the configuration")
                .with_source(err)
        })?;
        for dir in dirs {
            self.filer.mkdir_all(&dir, self.dir_mode).map_err(|err| {
                Error::new(ErrorKind::Io, "failed to create log directories").with_source(err)
            })?;
        }

        self.check_and_rotate(0)
    }

    fn run(mut self, requests: Receiver<Request>) {
        while let Ok(request) = requests.recv() {
            match request {
                Request::Write { buf, reply } => {
                    let _ = reply.send(self.write(&buf));
                }
                Request::Rotate { reply } => {
                    let _ = reply.send(self.rotate());
                }
                Request::Close { reply } => {
                    let _ = reply.send(self.close_file());
                    return;
                }
            }
        }

        // Every handle is gone without an explicit close.
        let _ = self.close_file();
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        self.check_and_rotate(buf.len() as u64)?;

        let Some(file) = self.file.as_mut() else {
            return Err(Error::new(ErrorKind::Io, "log file is not open"));
        };
        let written = file.write(buf).map_err(|err| {
            Error::new(ErrorKind::Io, "failed to write log message")
                .with_context("path", self.filepath.display())
                .with_source(err)
        })?;
        self.size += written as u64;

        Ok(written)
    }

    /// Make sure the active file is open and roomy enough for `incoming`
    /// bytes, rotating first when a threshold would be crossed.
    fn check_and_rotate(&mut self, incoming: u64) -> Result<(), Error> {
        if self.file.is_none() {
            self.open_log()?;
        }

        if self.max_size > 0 && incoming > self.max_size {
            return Err(Error::new(
                ErrorKind::WriteTooLarge,
                "log msg length exceeds max file size",
            )
            .with_context("length", incoming)
            .with_context("max", self.max_size));
        }

        let over_size = self.max_size > 0 && self.size + incoming > self.max_size;
        let expired = self
            .every
            .is_some_and(|every| self.clock.now().duration_since(self.created) > every);
        if over_size || expired {
            self.rotate()?;
        }

        Ok(())
    }

    /// Open the active file, short-circuiting on a recent cached failure.
    fn open_log(&mut self) -> Result<(), Error> {
        let now = self.clock.now();
        if let Some((attempted, message)) = &self.open_failure {
            if now.duration_since(*attempted) < OPEN_RETRY_BACKOFF {
                return Err(Error::new(ErrorKind::Io, message.clone()));
            }
        }

        match self.try_open(now) {
            Ok(file) => {
                self.file = Some(file);
                self.open_failure = None;
                Ok(())
            }
            Err(err) => {
                self.open_failure = Some((now, err.to_string()));
                Err(err)
            }
        }
    }

    /// Open for appending when the file exists, otherwise create it
    /// truncated. Seeds the recorded size and creation instant either way.
    fn try_open(&mut self, now: Timestamp) -> Result<File, Error> {
        self.filer
            .mkdir_all(&parent_dir(&self.filepath), self.dir_mode)
            .map_err(|err| {
                Error::new(ErrorKind::Io, "failed to create log directories").with_source(err)
            })?;

        let mut opts = OpenOptions::new();
        match self.filer.stat(&self.filepath) {
            Ok(info) => {
                opts.append(true);
                self.size = info.size;
                self.created = info.created;
            }
            Err(_) => {
                opts.write(true).create(true).truncate(true);
                self.size = 0;
                self.created = now;
            }
        }

        self.filer
            .open_file(&self.filepath, &opts, self.file_mode)
            .map_err(|err| Error::new(ErrorKind::Io, "failed to open log file").with_source(err))
    }

    /// Close the active file, hand it to the naming policy, reopen, and
    /// dispatch the post-rotate hook.
    fn rotate(&mut self) -> Result<u64, Error> {
        let size = self.size;
        self.file = None;

        let (renamed, rotated) = match self.policy.rotate(&self.filepath) {
            Ok(new_path) => (Some(new_path), Ok(())),
            Err(err) => (err.renamed, Err(err.source)),
        };

        let result = match rotated {
            Ok(()) => self.open_log(),
            Err(err) => {
                Err(Error::new(err.kind(), "failed to rotate log file").with_source(err))
            }
        };

        // The hook fires whenever a new backup exists, even if pruning or the
        // reopen failed; the backup itself is already in place.
        if let Some(new_path) = &renamed {
            self.policy.post(&self.filepath, new_path);
        }

        result.map(|()| size)
    }

    fn close_file(&mut self) -> Result<(), Error> {
        self.file = None;
        Ok(())
    }
}
