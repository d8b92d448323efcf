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

//! MySQL mysqldump stream splitter in Rust
//!
//! This crate reads a mysqldump stream and writes its statements into one
//! SQL file per database, or one per table. DDL can be kept, dropped or
//! moved to separate schema files, and INSERTs are rewritten one row per
//! statement so that every output file can be restored on its own.
//!
//! ```rust,no_run
//! use mysqldump_splitter::{split_dump, Config, Options};
//! # use std::fs::File;
//! # use std::io::BufReader;
//! # fn main() -> mysqldump_splitter::Result<()> {
//! # let file: String = std::env::args().collect::<Vec<String>>()[1].clone();
//!
//! let config = Config::new(
//!     "out/",
//!     Options::PER_TABLE | Options::DROP_TABLE | Options::CREATE_TABLE,
//! );
//! let input = File::open(&file).map_err(mysqldump_splitter::Error::Read)?;
//! let stats = split_dump(config, BufReader::new(input))?;
//! println!("{} statements written", stats.statements);
//! # Ok(())
//! # }
//! ```
//!
//! The pieces can also be used on their own: [`StatementSplitter`] cuts a
//! stream at terminators, [`parse`] turns a fragment into a [`Statement`],
//! [`OutputFilePool`] keeps a bounded number of output files open and
//! [`Pipe`] decouples reading the input from processing it.

#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod ast;
mod config;
mod dump;
mod error;
pub mod parser;
mod pipe;
mod pool;
mod splitter;
mod writer;

pub use crate::ast::{ObjectName, Statement, StatementKind};
pub use crate::config::{
    Config, CreateLikeGate, ErrorPolicy, Options, DEFAULT_FILE_MODE, DEFAULT_MAX_OPEN_FILES,
    DEFAULT_PIPE_CAPACITY,
};
pub use crate::dump::{split_dump, DumpSplitter, RunStats};
pub use crate::error::{CloseFailure, Error, Result};
pub use crate::parser::{parse, ParseError};
pub use crate::pipe::{file_pipeline, reader_pipeline, Pipe, PipeReader};
pub use crate::pool::{
    FileOpener, OutputFilePool, OutputHandle, PoolKey, PoolStats, Sink, SinkOpener,
    CLOSING_FRAMING, OPENING_FRAMING,
};
pub use crate::splitter::{earliest_terminator, StatementSplitter, TerminatorMatch};
pub use crate::writer::{Rendered, StatementWriter, Target};
