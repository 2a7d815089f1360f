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

//! A rotating log-file writer.
//!
//! [`LogWriter`] is an [`io::Write`](std::io::Write) sink that appends to one
//! active file and transparently rotates it when a size or age threshold is
//! crossed. What a retired file is called, and which old backups get pruned,
//! is decided by a pluggable [`NamingPolicy`]: [`IntegerPolicy`] numbers its
//! backups (`service.1.log`), [`TimestampPolicy`] stamps them with the
//! rotation time (`service-2024-08-10T17-30-00.123.log`). Rotated files can
//! be gzipped out of band through the hooks in [`compress`].
//!
//! All writer operations are serialized through a dedicated worker thread
//! that owns the file handle, so the writer can be handed to any logging
//! framework that expects a byte sink.
//!
//! # Example
//!
//! ```
//! use std::io::Write;
//!
//! use logroll::IntegerPolicy;
//! use logroll::LogWriter;
//!
//! let dir = std::env::temp_dir().join("logroll-doc");
//! let mut writer = LogWriter::builder()
//!     .filepath(dir.join("service.log"))
//!     .max_file_size(1024 * 1024)
//!     .naming_policy(IntegerPolicy::new().file_count(5))
//!     .build()
//!     .unwrap();
//!
//! writer.write_all(b"hello world\n").unwrap();
//! writer.close().unwrap();
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use self::error::Error;
pub use self::error::ErrorKind;
pub use self::filesystem::FileStat;
pub use self::filesystem::Filesystem;
pub use self::filesystem::OsFilesystem;
pub use self::policy::NamingPolicy;
pub use self::policy::RotateError;
pub use self::policy::integer::FileOrder;
pub use self::policy::integer::IntegerPolicy;
pub use self::policy::timestamp::TimestampPolicy;
pub use self::writer::DEFAULT_DIR_MODE;
pub use self::writer::DEFAULT_FILE_MODE;
pub use self::writer::DEFAULT_MAX_FILE_SIZE;
pub use self::writer::LogWriter;
pub use self::writer::LogWriterBuilder;

pub mod compress;

mod clock;
mod error;
mod filesystem;
mod policy;
#[cfg(test)]
mod testing;
mod writer;
