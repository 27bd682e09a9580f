// The MIT License (MIT)

// Copyright (c) 2015 Rustcc developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Buffered, non-blocking socket stream.
//!
//! Wraps a raw fd that the scheduler's poller already knows how to wait on:
//! every blocking point here is a `wait_fd` call, so a `BufferedSocketStream`
//! only ever makes forward progress from inside a coroutine.

use std::os::unix::io::RawFd;

use log::trace;

use crate::error::Error;
use crate::poller::Direction;
use crate::scheduler::with_current;

/// Default write-buffer flush threshold; only the trigger ("buffer >=
/// bufsize") matters, not the exact number.
const DEFAULT_BUFSIZE: usize = 8 * 1024;

/// A buffered, non-blocking stream over a single fd.
///
/// `read_limit` bounds the read buffer — buffered content never exceeds it —
/// and `bufsize` is the write buffer's flush threshold. Both halves share
/// one `timeout_s` applied to every `wait_fd` call this stream makes.
pub struct BufferedSocketStream {
    fd: RawFd,
    timeout_s: f64,
    read_limit: usize,
    bufsize: usize,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    eof: bool,
    closed: bool,
}

impl BufferedSocketStream {
    pub fn from_raw_fd(fd: RawFd, timeout_s: f64, read_limit: usize) -> BufferedSocketStream {
        BufferedSocketStream {
            fd,
            timeout_s,
            read_limit: read_limit.max(1),
            bufsize: DEFAULT_BUFSIZE,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
            eof: false,
            closed: false,
        }
    }

    pub fn with_bufsize(mut self, bufsize: usize) -> Self {
        self.bufsize = bufsize.max(1);
        self
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Returns up to `n` bytes, or an empty vector on EOF. Raises
    /// `Error::Timeout` if `timeout_s` elapses first.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        self.ensure_open()?;
        loop {
            if !self.read_buf.is_empty() {
                let take = n.min(self.read_buf.len());
                return Ok(self.read_buf.drain(..take).collect());
            }
            if self.eof {
                return Ok(Vec::new());
            }
            match self.fill_buffer()? {
                FillOutcome::GotData => continue,
                FillOutcome::Eof => {
                    self.eof = true;
                    return Ok(Vec::new());
                }
                FillOutcome::WouldBlock => self.wait(Direction::Read)?,
            }
        }
    }

    /// Returns the bytes through the first `\n` (inclusive), or up to
    /// `max` bytes if no newline ever arrives, or whatever is buffered
    /// (possibly empty) once EOF is reached first.
    pub fn readline(&mut self, max: usize) -> Result<Vec<u8>, Error> {
        self.ensure_open()?;
        loop {
            if let Some(pos) = self.read_buf.iter().position(|&b| b == b'\n') {
                let take = (pos + 1).min(max);
                return Ok(self.read_buf.drain(..take).collect());
            }
            if self.read_buf.len() >= max.min(self.read_limit) {
                let take = max.min(self.read_buf.len());
                return Ok(self.read_buf.drain(..take).collect());
            }
            if self.eof {
                return Ok(std::mem::take(&mut self.read_buf));
            }
            match self.fill_buffer()? {
                FillOutcome::GotData => continue,
                FillOutcome::Eof => self.eof = true,
                FillOutcome::WouldBlock => self.wait(Direction::Read)?,
            }
        }
    }

    /// One non-blocking `recv`, filling the read buffer up to
    /// `read_limit`. Does not itself wait; callers loop on
    /// `FillOutcome::WouldBlock`.
    fn fill_buffer(&mut self) -> Result<FillOutcome, Error> {
        let space = self.read_limit.saturating_sub(self.read_buf.len());
        if space == 0 {
            // Buffer is already at capacity with no newline/enough bytes
            // found; the caller (readline) handles this by returning what
            // it has rather than looping forever.
            return Ok(FillOutcome::Eof);
        }
        let mut chunk = vec![0u8; space];
        // SAFETY: `chunk` is a valid, uniquely-owned buffer of `space`
        // bytes; `recv` writes at most that many.
        let n = unsafe { libc::recv(self.fd, chunk.as_mut_ptr().cast(), space, 0) };
        if n > 0 {
            chunk.truncate(n as usize);
            self.read_buf.extend_from_slice(&chunk);
            Ok(FillOutcome::GotData)
        } else if n == 0 {
            Ok(FillOutcome::Eof)
        } else {
            let err = std::io::Error::last_os_error();
            if Error::io_would_block(&err) {
                Ok(FillOutcome::WouldBlock)
            } else {
                Err(Error::from_io(&err))
            }
        }
    }

    /// Appends to the write buffer, flushing once it reaches `bufsize`.
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        self.ensure_open()?;
        self.write_buf.extend_from_slice(data);
        if self.write_buf.len() >= self.bufsize {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// Drains the write buffer unconditionally.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        while !self.write_buf.is_empty() {
            // SAFETY: `write_buf` is a valid, non-empty, uniquely-owned
            // buffer; `send` reads at most its length.
            let n = unsafe {
                libc::send(self.fd, self.write_buf.as_ptr().cast(), self.write_buf.len(), 0)
            };
            if n >= 0 {
                self.write_buf.drain(..n as usize);
                continue;
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EPIPE) {
                trace!("coev: EPIPE writing fd {}, closing stream", self.fd);
                self.write_buf.clear();
                self.close_fd();
                return Ok(());
            }
            if Error::io_would_block(&err) {
                self.wait(Direction::Write)?;
                continue;
            }
            return Err(Error::from_io(&err));
        }
        Ok(())
    }

    /// Marks the stream closed and closes the underlying fd. Idempotent —
    /// closing an already-closed stream is a no-op, not a double-close.
    pub fn close(&mut self) {
        self.close_fd();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn close_fd(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // SAFETY: `fd` is owned by this stream and not used again after
        // `closed` is set.
        unsafe {
            libc::close(self.fd);
        }
    }

    fn wait(&self, dir: Direction) -> Result<(), Error> {
        with_current(|s| s.wait_fd(self.fd, dir, self.timeout_s))
    }
}

enum FillOutcome {
    GotData,
    Eof,
    WouldBlock,
}

impl Drop for BufferedSocketStream {
    fn drop(&mut self) {
        self.close_fd();
    }
}
