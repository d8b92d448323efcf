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

//! Statement splitter
//!
//! Cuts a byte stream into fragments at a set of terminator tokens. When
//! several terminators match, the one whose match *ends* first wins; if two
//! end at the same offset the one listed first wins. Whatever is left when
//! the stream runs out is yielded as a last, unterminated fragment.

use log::debug;
use memchr::memmem::Finder;
use std::io::{self, Read};

use crate::error::{Error, Result};

const READ_CHUNK: usize = 64 * 1024;

/// A terminator match inside a buffer: `start..end` are the terminator bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminatorMatch {
    pub start: usize,
    pub end: usize,
    /// Index of the winning terminator in the list.
    pub terminator: usize,
}

/// Find the earliest-ending terminator in `haystack`.
pub fn earliest_terminator<T: AsRef<[u8]>>(
    haystack: &[u8],
    terminators: &[T],
) -> Option<TerminatorMatch> {
    let finders: Vec<Finder> = terminators
        .iter()
        .map(|t| Finder::new(t.as_ref()))
        .collect();
    earliest_match(haystack, 0, &finders)
}

fn earliest_match(haystack: &[u8], from: usize, finders: &[Finder]) -> Option<TerminatorMatch> {
    let mut best: Option<TerminatorMatch> = None;
    for (index, finder) in finders.iter().enumerate() {
        if finder.needle().is_empty() {
            continue;
        }
        if let Some(pos) = finder.find(&haystack[from..]) {
            let start = from + pos;
            let end = start + finder.needle().len();
            // strict comparison keeps the earlier-listed terminator on ties
            if best.map_or(true, |b| end < b.end) {
                best = Some(TerminatorMatch {
                    start,
                    end,
                    terminator: index,
                });
            }
        }
    }
    best
}

/// Lazy iterator of statement fragments read from `R`.
///
/// Fragments exclude the terminator and are not trimmed.
pub struct StatementSplitter<R> {
    reader: R,
    finders: Vec<Finder<'static>>,
    longest: usize,
    buf: Vec<u8>,
    /// Start of the unconsumed part of `buf`.
    pos: usize,
    /// Offset from which no terminator has been searched yet.
    scanned: usize,
    eof: bool,
    failed: bool,
    fragments: u64,
}

impl<R: Read> StatementSplitter<R> {
    pub fn new<T: AsRef<[u8]>>(reader: R, terminators: &[T]) -> Result<Self> {
        if terminators.is_empty() {
            return Err(Error::Config(
                "at least one statement terminator is required".to_string(),
            ));
        }
        let mut finders = Vec::with_capacity(terminators.len());
        for terminator in terminators {
            let terminator = terminator.as_ref();
            if terminator.is_empty() {
                return Err(Error::Config(
                    "statement terminators cannot be empty".to_string(),
                ));
            }
            finders.push(Finder::new(terminator).into_owned());
        }
        let longest = finders.iter().map(|f| f.needle().len()).max().unwrap_or(1);
        Ok(StatementSplitter {
            reader,
            finders,
            longest,
            buf: Vec::with_capacity(READ_CHUNK),
            pos: 0,
            scanned: 0,
            eof: false,
            failed: false,
            fragments: 0,
        })
    }

    /// Number of fragments yielded so far.
    pub fn fragments(&self) -> u64 {
        self.fragments
    }

    fn take(&mut self, end: usize) -> Vec<u8> {
        let fragment = self.buf[self.pos..end].to_vec();
        self.fragments += 1;
        fragment
    }

    /// Read one more chunk. Returns false at end of stream.
    fn fill(&mut self) -> io::Result<bool> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.scanned -= self.pos;
            self.pos = 0;
        }
        let len = self.buf.len();
        self.buf.resize(len + READ_CHUNK, 0);
        loop {
            match self.reader.read(&mut self.buf[len..]) {
                Ok(n) => {
                    self.buf.truncate(len + n);
                    return Ok(n > 0);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(len);
                    return Err(e);
                }
            }
        }
    }
}

impl<R: Read> Iterator for StatementSplitter<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            // a terminator not found before `scanned` can only start in the
            // last `longest - 1` bytes of the already searched region
            let from = self
                .scanned
                .saturating_sub(self.longest - 1)
                .max(self.pos);
            if let Some(m) = earliest_match(&self.buf, from, &self.finders) {
                let fragment = self.take(m.start);
                self.pos = m.end;
                self.scanned = m.end;
                return Some(Ok(fragment));
            }
            self.scanned = self.buf.len();

            if self.eof {
                if self.pos == self.buf.len() {
                    return None;
                }
                let end = self.buf.len();
                let fragment = self.take(end);
                self.pos = end;
                debug!("unterminated fragment of {} bytes at end of input", fragment.len());
                return Some(Ok(fragment));
            }

            match self.fill() {
                Ok(more) => self.eof = !more,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(Error::Read(e)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    fn split(input: &[u8], terminators: &[&str]) -> Vec<String> {
        StatementSplitter::new(input, terminators)
            .unwrap()
            .map(|f| String::from_utf8(f.unwrap()).unwrap())
            .collect()
    }

    /// Hands out at most `step` bytes per read.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl<'a> Read for Trickle<'a> {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(out.len()).min(self.data.len());
            out[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device gone"))
        }
    }

    #[test]
    fn splits_on_single_terminator() {
        assert_eq!(split(b"a;\nb;\nc;\n", &[";\n"]), vec!["a", "b", "c"]);
    }

    #[test]
    fn trailing_unterminated_fragment() {
        assert_eq!(split(b"a;\nb", &[";\n"]), vec!["a", "b"]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(split(b"", &[";\n"]).is_empty());
    }

    #[test]
    fn earliest_end_wins() {
        // ";\n" ends at 3, "\n\n" would end at 4
        assert_eq!(split(b"a;\n\nb", &["\n\n", ";\n"]), vec!["a", "\nb"]);
    }

    #[test]
    fn tie_goes_to_first_listed() {
        assert_eq!(split(b"a;\n", &["\n", ";\n"]), vec!["a;"]);
        assert_eq!(split(b"a;\n", &[";\n", "\n"]), vec!["a"]);

        let m = earliest_terminator(b"a;\n", &["\n", ";\n"]).unwrap();
        assert_eq!(m, TerminatorMatch { start: 2, end: 3, terminator: 0 });
    }

    #[test]
    fn terminator_across_reads() {
        let input = b"insert into t values (1);\ninsert into t values (2);\n";
        let splitter = StatementSplitter::new(Trickle { data: input, step: 1 }, &[";\n"]).unwrap();
        let fragments: Vec<Vec<u8>> = splitter.map(|f| f.unwrap()).collect();
        assert_eq!(
            fragments,
            vec![b"insert into t values (1)".to_vec(), b"insert into t values (2)".to_vec()]
        );
    }

    #[test]
    fn long_terminator_across_reads() {
        let input = b"one<END>two<END>";
        for step in 1..input.len() {
            let splitter =
                StatementSplitter::new(Trickle { data: input, step }, &["\n", "<END>"]).unwrap();
            let fragments: Vec<Vec<u8>> = splitter.map(|f| f.unwrap()).collect();
            assert_eq!(fragments, vec![b"one".to_vec(), b"two".to_vec()], "step {}", step);
        }
    }

    #[test]
    fn rejoining_restores_content() {
        let input = "drop table t;\ncreate table t like u;\ninsert into t values (1)";
        let joined = split(input.as_bytes(), &[";\n"]).join(";\n");
        assert_eq!(joined, input);
    }

    #[test]
    fn read_error_ends_sequence() {
        let mut splitter = StatementSplitter::new(Broken, &[";\n"]).unwrap();
        assert_matches!(splitter.next(), Some(Err(Error::Read(_))));
        assert!(splitter.next().is_none());
    }

    #[test]
    fn rejects_empty_terminators() {
        assert_matches!(
            StatementSplitter::new(&b""[..], &[""]).err(),
            Some(Error::Config(_))
        );
        let none: [&str; 0] = [];
        assert_matches!(
            StatementSplitter::new(&b""[..], &none).err(),
            Some(Error::Config(_))
        );
    }

    #[test]
    fn counts_fragments() {
        let mut splitter = StatementSplitter::new(&b"a;\nb"[..], &[";\n"]).unwrap();
        while let Some(f) = splitter.next() {
            f.unwrap();
        }
        assert_eq!(splitter.fragments(), 2);
    }
}
