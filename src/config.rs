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

//! Run configuration
//!
//! [`Options`] is the process-wide flag set; it is chosen once and copied
//! into every output handle. [`Config`] carries it together with the
//! output root and the resource limits.

use crate::error::{Error, Result};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::PathBuf;

pub const DEFAULT_MAX_OPEN_FILES: usize = 256;
pub const DEFAULT_PIPE_CAPACITY: usize = 16 * 1024 * 1024;
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Output formatting flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Options(u32);

impl Options {
    /// One file per table instead of one per database.
    pub const PER_TABLE: Options = Options(1);
    pub const DROP_DATABASE: Options = Options(1 << 1);
    pub const CREATE_DATABASE: Options = Options(1 << 2);
    pub const DROP_TABLE: Options = Options(1 << 3);
    /// `DROP TABLE IF EXISTS`
    pub const DROP_TABLE_IF_EXISTS: Options = Options(1 << 4);
    pub const CREATE_TABLE: Options = Options(1 << 5);
    /// `CREATE TABLE IF NOT EXISTS`
    pub const CREATE_TABLE_IF_NOT_EXISTS: Options = Options(1 << 6);
    /// Render inserts as `REPLACE INTO`.
    pub const INSERT_OVERWRITE: Options = Options(1 << 7);
    pub const INSERT_IGNORE: Options = Options(1 << 8);
    /// Qualify every table as `` `db`.`table` ``.
    pub const STATIC_DATABASE: Options = Options(1 << 9);

    const ALL_BITS: u32 = (1 << 10) - 1;

    const NAMES: [(Options, &'static str); 10] = [
        (Options::PER_TABLE, "per-table"),
        (Options::DROP_DATABASE, "drop-database"),
        (Options::CREATE_DATABASE, "create-database"),
        (Options::DROP_TABLE, "drop-table"),
        (Options::DROP_TABLE_IF_EXISTS, "drop-table-if-exists"),
        (Options::CREATE_TABLE, "create-table"),
        (Options::CREATE_TABLE_IF_NOT_EXISTS, "create-table-if-not-exists"),
        (Options::INSERT_OVERWRITE, "insert-overwrite"),
        (Options::INSERT_IGNORE, "insert-ignore"),
        (Options::STATIC_DATABASE, "static-database"),
    ];

    pub const fn empty() -> Options {
        Options(0)
    }

    pub fn from_bits(bits: u32) -> Result<Options> {
        if bits & !Options::ALL_BITS != 0 {
            return Err(Error::Config(format!(
                "unknown option bits {:#x}",
                bits & !Options::ALL_BITS
            )));
        }
        Ok(Options(bits))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Options) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: Options, enabled: bool) {
        if enabled {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    /// Handles get a separate schema sink only in this combination.
    pub fn wants_schema_sink(self) -> bool {
        self.contains(Options::PER_TABLE) && self.contains(Options::CREATE_TABLE)
    }
}

impl BitOr for Options {
    type Output = Options;

    fn bitor(self, rhs: Options) -> Options {
        Options(self.0 | rhs.0)
    }
}

impl BitOrAssign for Options {
    fn bitor_assign(&mut self, rhs: Options) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut delim = "";
        for (flag, name) in Options::NAMES.iter() {
            if self.contains(*flag) {
                write!(f, "{}{}", delim, name)?;
                delim = "|";
            }
        }
        if delim.is_empty() {
            f.write_str("none")?;
        }
        Ok(())
    }
}

/// Which flag decides whether `CREATE TABLE ... LIKE` is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateLikeGate {
    DropTable,
    CreateTable,
}

impl CreateLikeGate {
    pub fn flag(self) -> Options {
        match self {
            CreateLikeGate::DropTable => Options::DROP_TABLE,
            CreateLikeGate::CreateTable => Options::CREATE_TABLE,
        }
    }
}

impl Default for CreateLikeGate {
    fn default() -> Self {
        CreateLikeGate::DropTable
    }
}

/// What the driver does with a statement it cannot parse or route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    Abort,
    Skip,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        ErrorPolicy::Abort
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub output_root: PathBuf,
    pub options: Options,
    /// Ceiling on simultaneously open output handles.
    pub max_open_files: usize,
    /// Statement terminators, earlier entries win ties.
    pub terminators: Vec<Vec<u8>>,
    /// Bytes staged between the input reader thread and the splitter, 0 = unbounded.
    pub pipe_capacity: usize,
    /// Database for unqualified statements seen before any `USE`.
    pub default_database: Option<String>,
    pub file_mode: u32,
    pub create_like_gate: CreateLikeGate,
    pub on_error: ErrorPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            output_root: PathBuf::from("./"),
            options: Options::empty(),
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            terminators: vec![b";\n".to_vec(), b";\r\n".to_vec()],
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            default_database: None,
            file_mode: DEFAULT_FILE_MODE,
            create_like_gate: CreateLikeGate::default(),
            on_error: ErrorPolicy::default(),
        }
    }
}

impl Config {
    pub fn new<P: Into<PathBuf>>(output_root: P, options: Options) -> Self {
        Config {
            output_root: output_root.into(),
            options,
            ..Config::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_open_files == 0 {
            return Err(Error::Config(
                "max open files must be at least 1".to_string(),
            ));
        }
        if self.terminators.is_empty() {
            return Err(Error::Config(
                "at least one statement terminator is required".to_string(),
            ));
        }
        if self.terminators.iter().any(|t| t.is_empty()) {
            return Err(Error::Config(
                "statement terminators cannot be empty".to_string(),
            ));
        }
        if let Some(db) = &self.default_database {
            if db.is_empty() {
                return Err(Error::Config(
                    "default database cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
