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

use std::path::Path;
use std::path::PathBuf;

/// One discovered backup: where it lives and the key parsed from its name.
#[derive(Debug)]
struct Backup<K> {
    path: PathBuf,
    key: K,
}

/// The backups a policy found in the archive directory, ordered by key.
///
/// Paths and keys move together; the key of an entry always describes the
/// path stored beside it. Sorting is stable in either direction.
#[derive(Debug)]
pub(crate) struct BackupSet<K> {
    entries: Vec<Backup<K>>,
}

impl<K: Ord + Copy> BackupSet<K> {
    pub(crate) fn new() -> Self {
        BackupSet { entries: vec![] }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn push(&mut self, path: PathBuf, key: K) {
        self.entries.push(Backup { path, key });
    }

    pub(crate) fn path(&self, idx: usize) -> &Path {
        &self.entries[idx].path
    }

    pub(crate) fn key(&self, idx: usize) -> K {
        self.entries[idx].key
    }

    /// Replace an entry after its file was renamed.
    pub(crate) fn set(&mut self, idx: usize, path: PathBuf, key: K) {
        self.entries[idx] = Backup { path, key };
    }

    pub(crate) fn sort_ascending(&mut self) {
        self.entries.sort_by(|a, b| a.key.cmp(&b.key));
    }

    pub(crate) fn sort_descending(&mut self) {
        self.entries.sort_by(|a, b| b.key.cmp(&a.key));
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Path, K)> + '_ {
        self.entries.iter().map(|b| (b.path.as_path(), b.key))
    }
}
