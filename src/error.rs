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

//! Error types
//!
//! Parse failures live in [`crate::parser::ParseError`]; everything that
//! touches a reader, a sink or the pipe ends up here.

use crate::parser::ParseError;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read input: {0}")]
    Read(#[source] io::Error),

    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Every failure hit while closing a handle, in the order they happened.
    #[error("failed to close {}: {}", .path.display(), CloseFailures(.failures))]
    Close {
        path: PathBuf,
        failures: Vec<CloseFailure>,
    },

    #[error("no open output for {0}")]
    HandleNotFound(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("no database known for {0}: no USE statement and no default database")]
    UnknownDatabase(String),

    #[error("cannot write to closed pipe")]
    PipeClosed,

    #[error("timed out waiting for pipe capacity")]
    PipeTimeout,

    #[error("write of {len} bytes can never fit a pipe of {max} bytes")]
    PipeOverflow { len: usize, max: usize },

    #[error("statement {index} ({destination}): {source}")]
    Statement {
        index: u64,
        destination: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{} errors: {}", .0.len(), ErrorList(.0))]
    Multiple(Vec<Error>),
}

impl Error {
    /// Fold a list of errors: none is Ok, one stays itself.
    pub fn from_many(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }

    pub fn is_parse(&self) -> bool {
        match self {
            Error::Parse(_) | Error::UnknownDatabase(_) => true,
            Error::Statement { source, .. } => source.is_parse(),
            _ => false,
        }
    }
}

/// One step of closing a handle that went wrong.
#[derive(Debug)]
pub enum CloseFailure {
    /// Writing the closing framing to the data sink.
    Framing(io::Error),
    /// Flushing/closing the data sink.
    Data(io::Error),
    /// Flushing/closing the schema sink.
    Schema(io::Error),
}

impl CloseFailure {
    pub fn io_error(&self) -> &io::Error {
        match self {
            CloseFailure::Framing(e) | CloseFailure::Data(e) | CloseFailure::Schema(e) => e,
        }
    }
}

impl fmt::Display for CloseFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CloseFailure::Framing(e) => write!(f, "writing closing framing: {}", e),
            CloseFailure::Data(e) => write!(f, "closing table data: {}", e),
            CloseFailure::Schema(e) => write!(f, "closing table schema: {}", e),
        }
    }
}

struct CloseFailures<'a>(&'a [CloseFailure]);

impl<'a> fmt::Display for CloseFailures<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut delim = "";
        for failure in self.0 {
            write!(f, "{}{}", delim, failure)?;
            delim = "; ";
        }
        Ok(())
    }
}

struct ErrorList<'a>(&'a [Error]);

impl<'a> fmt::Display for ErrorList<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut delim = "";
        for error in self.0 {
            write!(f, "{}{}", delim, error)?;
            delim = "; ";
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_error_lists_every_failure() {
        let err = Error::Close {
            path: PathBuf::from("out/db/t.sql"),
            failures: vec![
                CloseFailure::Framing(io::Error::new(io::ErrorKind::Other, "disk full")),
                CloseFailure::Data(io::Error::new(io::ErrorKind::Other, "bad descriptor")),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("writing closing framing: disk full"));
        assert!(msg.contains("closing table data: bad descriptor"));
    }

    #[test]
    fn from_many_folds() {
        assert!(Error::from_many(vec![]).is_ok());
        match Error::from_many(vec![Error::PipeClosed]) {
            Err(Error::PipeClosed) => {}
            other => panic!("unexpected {:?}", other),
        }
        match Error::from_many(vec![Error::PipeClosed, Error::PipeTimeout]) {
            Err(Error::Multiple(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }
}
