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

//! Bounded in-memory pipe
//!
//! Decouples reading the dump from processing it. Writers block while the
//! buffer is full, readers drain it. A `max_size` of zero means unbounded.
//!
//! A single write larger than `max_size` could never complete and is
//! rejected up front.

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

const READ_CHUNK: usize = 64 * 1024;

struct State {
    buf: VecDeque<u8>,
    closed: bool,
    /// Set when the producer failed, reported to the reader after the data.
    error: Option<io::Error>,
}

struct Shared {
    state: Mutex<State>,
    readable: Condvar,
    writable: Condvar,
    max_size: usize,
}

/// Cloneable handle to a shared bounded byte buffer.
#[derive(Clone)]
pub struct Pipe {
    shared: Arc<Shared>,
}

impl Pipe {
    pub fn new(max_size: usize) -> Self {
        Pipe {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    buf: VecDeque::new(),
                    closed: false,
                    error: None,
                }),
                readable: Condvar::new(),
                writable: Condvar::new(),
                max_size,
            }),
        }
    }

    pub fn max_size(&self) -> usize {
        self.shared.max_size
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.shared.state.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    fn fits(&self, state: &State, n: usize) -> bool {
        let max = self.shared.max_size;
        max == 0 || state.buf.len() + n <= max
    }

    fn check_len(&self, len: usize) -> Result<()> {
        let max = self.shared.max_size;
        if max > 0 && len > max {
            return Err(Error::PipeOverflow { len, max });
        }
        Ok(())
    }

    /// Append all of `bytes`, blocking while there is no room.
    pub fn write(&self, bytes: &[u8]) -> Result<usize> {
        self.check_len(bytes.len())?;
        let mut state = self.shared.state.lock();
        while !state.closed && !self.fits(&state, bytes.len()) {
            self.shared.writable.wait(&mut state);
        }
        if state.closed {
            return Err(Error::PipeClosed);
        }
        state.buf.extend(bytes);
        self.shared.readable.notify_all();
        Ok(bytes.len())
    }

    /// Like [`Pipe::write`] but gives up after `timeout`.
    pub fn write_timeout(&self, bytes: &[u8], timeout: Duration) -> Result<usize> {
        self.check_len(bytes.len())?;
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.closed && !self.fits(&state, bytes.len()) {
            if self
                .shared
                .writable
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                if state.closed {
                    break;
                }
                if !self.fits(&state, bytes.len()) {
                    return Err(Error::PipeTimeout);
                }
            }
        }
        if state.closed {
            return Err(Error::PipeClosed);
        }
        state.buf.extend(bytes);
        self.shared.readable.notify_all();
        Ok(bytes.len())
    }

    /// Drain up to `out.len()` bytes without blocking.
    ///
    /// `Some(0)` means nothing is buffered yet; `None` means the pipe is
    /// closed and fully drained.
    pub fn read(&self, out: &mut [u8]) -> Option<usize> {
        let mut state = self.shared.state.lock();
        self.drain(&mut state, out)
    }

    /// Like [`Pipe::read`] but waits for data instead of returning `Some(0)`.
    pub fn read_blocking(&self, out: &mut [u8]) -> Option<usize> {
        let mut state = self.shared.state.lock();
        while state.buf.is_empty() && !state.closed && !out.is_empty() {
            self.shared.readable.wait(&mut state);
        }
        self.drain(&mut state, out)
    }

    fn drain(&self, state: &mut State, out: &mut [u8]) -> Option<usize> {
        if state.buf.is_empty() {
            return if state.closed { None } else { Some(0) };
        }
        let n = out.len().min(state.buf.len());
        for (slot, byte) in out.iter_mut().zip(state.buf.drain(..n)) {
            *slot = byte;
        }
        self.shared.writable.notify_all();
        Some(n)
    }

    /// Stop accepting writes and wake everyone up. Buffered data can still
    /// be read.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        self.shared.readable.notify_all();
        self.shared.writable.notify_all();
    }

    /// Record a producer failure and close.
    pub fn fail(&self, error: io::Error) {
        {
            let mut state = self.shared.state.lock();
            if state.error.is_none() {
                state.error = Some(error);
            }
        }
        self.close();
    }

    /// Take the recorded producer failure, if any.
    pub fn take_error(&self) -> Option<io::Error> {
        self.shared.state.lock().error.take()
    }

    /// Copy `reader` into the pipe until end of stream, then close it.
    /// Returns the number of bytes copied.
    pub fn consume<R: Read>(&self, mut reader: R) -> Result<u64> {
        let mut chunk = vec![0u8; READ_CHUNK];
        let piece = match self.shared.max_size {
            0 => READ_CHUNK,
            max => max.min(READ_CHUNK),
        };
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let message = e.to_string();
                    self.fail(e);
                    return Err(Error::Read(io::Error::new(io::ErrorKind::Other, message)));
                }
            };
            for part in chunk[..n].chunks(piece) {
                self.write(part)?;
            }
            total += n as u64;
        }
        self.close();
        debug!("pipe producer done after {} bytes", total);
        Ok(total)
    }

    /// A blocking [`Read`] over this pipe.
    pub fn reader(&self) -> PipeReader {
        PipeReader { pipe: self.clone() }
    }
}

/// Reading end of a [`Pipe`]. Dropping it closes the pipe so that a
/// blocked producer gives up.
pub struct PipeReader {
    pipe: Pipe,
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match self.pipe.read_blocking(out) {
            Some(n) => Ok(n),
            None => match self.pipe.take_error() {
                Some(e) => Err(e),
                None => Ok(0),
            },
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.pipe.close();
    }
}

/// Read `path` on a background thread through a pipe of `max_size` bytes.
pub fn file_pipeline<P: AsRef<Path>>(
    path: P,
    max_size: usize,
) -> Result<(PipeReader, JoinHandle<Result<u64>>)> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    reader_pipeline(file, max_size)
}

/// Same as [`file_pipeline`] for any reader that can be sent to a thread.
pub fn reader_pipeline<R: Read + Send + 'static>(
    reader: R,
    max_size: usize,
) -> Result<(PipeReader, JoinHandle<Result<u64>>)> {
    let pipe = Pipe::new(max_size);
    let producer = pipe.clone();
    let handle = thread::Builder::new()
        .name("dump-reader".to_string())
        .spawn(move || {
            let result = producer.consume(reader);
            if let Err(e) = &result {
                warn!("dump reader stopped: {}", e);
            }
            result
        })
        .map_err(Error::Read)?;
    Ok((pipe.reader(), handle))
}
