// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Output file pool
//!
//! Keeps at most `capacity` output handles open. A lookup that misses on a
//! full pool first closes the handle that was used least recently. Handles
//! are keyed by `(database, table)`; `table` is empty in per-database mode
//! and for database-level statements.
//!
//! Recency is a logical clock bumped on every lookup, so the eviction
//! order is fully deterministic.

use log::{debug, info, warn};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::ast::quote_ident;
use crate::config::{Options, DEFAULT_FILE_MODE};
use crate::error::{CloseFailure, Error, Result};

/// Written to the data sink right after it is opened.
pub const OPENING_FRAMING: &[u8] = b"SET FOREIGN_KEY_CHECKS=0;\nSET UNIQUE_CHECKS=0;\n";
/// Written to the data sink right before it is closed.
pub const CLOSING_FRAMING: &[u8] = b"SET UNIQUE_CHECKS=1;\nSET FOREIGN_KEY_CHECKS=1;\n";

const SINK_BUFFER: usize = 64 * 1024;

/// A writable destination that can report failures when it is closed.
pub trait Sink: Write + Send {
    /// Flush everything and release the destination.
    fn close(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl Sink for BufWriter<File> {
    /// Flush, then wait for the data to reach the disk so write-back
    /// errors are reported here and not lost on drop.
    fn close(&mut self) -> io::Result<()> {
        self.flush()?;
        self.get_ref().sync_data()
    }
}

/// Opens sinks for the pool. Files in production, doubles in tests.
pub trait SinkOpener: Send {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Sink>>;
}

/// Opens (create, append, write-only) buffered files, creating parent
/// directories as needed.
#[derive(Debug, Clone, Copy)]
pub struct FileOpener {
    pub mode: u32,
}

impl Default for FileOpener {
    fn default() -> Self {
        FileOpener {
            mode: DEFAULT_FILE_MODE,
        }
    }
}

impl SinkOpener for FileOpener {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Sink>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(self.mode);
        }
        let file = options.open(path)?;
        Ok(Box::new(BufWriter::with_capacity(SINK_BUFFER, file)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub database: String,
    pub table: String,
}

impl PoolKey {
    pub fn new(database: &str, table: &str) -> Self {
        PoolKey {
            database: database.to_string(),
            table: table.to_string(),
        }
    }

    fn matches(&self, database: &str, table: &str) -> bool {
        self.database == database && self.table == table
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", quote_ident(&self.database))?;
        if !self.table.is_empty() {
            write!(f, ".{}", quote_ident(&self.table))?;
        }
        Ok(())
    }
}

/// One open destination: a data sink and, when requested, a schema sink.
pub struct OutputHandle {
    key: PoolKey,
    data: Box<dyn Sink>,
    data_path: PathBuf,
    schema: Option<(Box<dyn Sink>, PathBuf)>,
    options: Options,
    last_access: u64,
}

impl fmt::Debug for OutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OutputHandle")
            .field("key", &self.key)
            .field("data_path", &self.data_path)
            .field("schema_path", &self.schema_path())
            .field("options", &self.options)
            .field("last_access", &self.last_access)
            .finish()
    }
}

impl OutputHandle {
    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn database(&self) -> &str {
        &self.key.database
    }

    pub fn table(&self) -> &str {
        &self.key.table
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn last_access(&self) -> u64 {
        self.last_access
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn schema_path(&self) -> Option<&Path> {
        self.schema.as_ref().map(|(_, path)| path.as_path())
    }

    pub fn has_schema_sink(&self) -> bool {
        self.schema.is_some()
    }

    pub fn write_data(&mut self, bytes: &[u8]) -> Result<()> {
        let path = &self.data_path;
        self.data.write_all(bytes).map_err(|source| Error::Write {
            path: path.clone(),
            source,
        })
    }

    /// Write to the schema sink, or the data sink when there is none.
    pub fn write_schema(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.schema {
            Some((sink, path)) => sink.write_all(bytes).map_err(|source| Error::Write {
                path: path.clone(),
                source,
            }),
            None => self.write_data(bytes),
        }
    }

    /// Write the closing framing and close both sinks.
    ///
    /// Every step is attempted; all failures are returned together.
    pub fn close(mut self) -> Result<()> {
        debug!("closing {}", self.key);
        let mut failures = vec![];
        if let Err(e) = self.data.write_all(CLOSING_FRAMING) {
            failures.push(CloseFailure::Framing(e));
        }
        if let Err(e) = self.data.close() {
            failures.push(CloseFailure::Data(e));
        }
        if let Some((sink, _)) = self.schema.as_mut() {
            if let Err(e) = sink.close() {
                failures.push(CloseFailure::Schema(e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Close {
                path: self.data_path,
                failures,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub opened: u64,
    pub evicted: u64,
}

/// Bounded set of open output handles with least-recently-used eviction.
pub struct OutputFilePool {
    root: PathBuf,
    options: Options,
    capacity: usize,
    opener: Box<dyn SinkOpener>,
    handles: Vec<OutputHandle>,
    clock: u64,
    stats: PoolStats,
}

impl fmt::Debug for OutputFilePool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OutputFilePool")
            .field("root", &self.root)
            .field("options", &self.options)
            .field("capacity", &self.capacity)
            .field("handles", &self.handles)
            .field("stats", &self.stats)
            .finish()
    }
}

impl OutputFilePool {
    pub fn new<P: Into<PathBuf>>(root: P, options: Options, capacity: usize) -> Result<Self> {
        Self::with_opener(root, options, capacity, Box::new(FileOpener::default()))
    }

    pub fn with_opener<P: Into<PathBuf>>(
        root: P,
        options: Options,
        capacity: usize,
        opener: Box<dyn SinkOpener>,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config(
                "pool capacity must be at least 1".to_string(),
            ));
        }
        Ok(OutputFilePool {
            root: root.into(),
            options,
            capacity,
            opener,
            handles: Vec::with_capacity(capacity),
            clock: 0,
            stats: PoolStats::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    pub fn contains(&self, database: &str, table: &str) -> bool {
        self.position(database, table).is_some()
    }

    /// Keys of the open handles, least recently used first.
    pub fn keys(&self) -> Vec<&PoolKey> {
        let mut handles: Vec<&OutputHandle> = self.handles.iter().collect();
        handles.sort_by_key(|h| h.last_access);
        handles.into_iter().map(|h| &h.key).collect()
    }

    /// Get the handle for `(database, table)`, opening it if needed.
    pub fn get(&mut self, database: &str, table: &str) -> Result<&mut OutputHandle> {
        self.clock += 1;
        let now = self.clock;

        if let Some(pos) = self.position(database, table) {
            let handle = &mut self.handles[pos];
            handle.last_access = now;
            return Ok(handle);
        }

        if self.handles.len() >= self.capacity {
            self.evict()?;
        }

        let handle = self.open(PoolKey::new(database, table), now)?;
        self.handles.push(handle);
        let last = self.handles.len() - 1;
        Ok(&mut self.handles[last])
    }

    /// Close and forget the handle for `(database, table)`.
    pub fn close(&mut self, database: &str, table: &str) -> Result<()> {
        let pos = self
            .position(database, table)
            .ok_or_else(|| Error::HandleNotFound(PoolKey::new(database, table).to_string()))?;
        self.handles.remove(pos).close()
    }

    /// Close every handle, reporting all failures.
    pub fn close_all(&mut self) -> Result<()> {
        let errors: Vec<Error> = self
            .handles
            .drain(..)
            .filter_map(|handle| handle.close().err())
            .collect();
        Error::from_many(errors)
    }

    /// Where the data for `(database, table)` goes.
    pub fn data_path(&self, database: &str, table: &str) -> PathBuf {
        self.paths(database, table).0
    }

    fn paths(&self, database: &str, table: &str) -> (PathBuf, PathBuf) {
        let database = path_component(database);
        if self.options.contains(Options::PER_TABLE) && !table.is_empty() {
            let dir = self.root.join(&database);
            let table = path_component(table);
            (
                dir.join(format!("{}.sql", table)),
                dir.join(format!("{}-schema.sql", table)),
            )
        } else {
            (
                self.root.join(format!("{}.sql", database)),
                self.root.join(format!("{}-schema.sql", database)),
            )
        }
    }

    fn position(&self, database: &str, table: &str) -> Option<usize> {
        self.handles
            .iter()
            .position(|h| h.key.matches(database, table))
    }

    /// Close the least recently used handle to free one slot.
    fn evict(&mut self) -> Result<()> {
        let victim = self
            .handles
            .iter()
            .enumerate()
            .min_by_key(|(_, h)| h.last_access)
            .map(|(pos, _)| pos);
        if let Some(pos) = victim {
            let handle = self.handles.remove(pos);
            info!("evicting {} (last access {})", handle.key, handle.last_access);
            self.stats.evicted += 1;
            handle.close()?;
        }
        Ok(())
    }

    fn open(&mut self, key: PoolKey, now: u64) -> Result<OutputHandle> {
        let (data_path, schema_path) = self.paths(&key.database, &key.table);
        let data = self.opener.open(&data_path).map_err(|source| Error::Open {
            path: data_path.clone(),
            source,
        })?;

        let schema = if self.options.wants_schema_sink() {
            match self.opener.open(&schema_path) {
                Ok(sink) => Some((sink, schema_path)),
                Err(source) => {
                    let mut data = data;
                    if let Err(e) = data.close() {
                        warn!("closing {} after failed open: {}", data_path.display(), e);
                    }
                    return Err(Error::Open {
                        path: schema_path,
                        source,
                    });
                }
            }
        } else {
            None
        };

        let mut handle = OutputHandle {
            key,
            data,
            data_path,
            schema,
            options: self.options,
            last_access: now,
        };

        if let Err(e) = handle.write_data(OPENING_FRAMING) {
            if let Err(close) = handle.close() {
                warn!("{}", close);
            }
            return Err(e);
        }

        info!("opened {}", handle.data_path.display());
        self.stats.opened += 1;
        Ok(handle)
    }
}

impl Drop for OutputFilePool {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        if let Err(e) = self.close_all() {
            warn!("closing output files: {}", e);
        }
    }
}

/// Make a name safe to use as a single path component.
fn path_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => format!("_{}", cleaned),
        _ => cleaned,
    }
}
