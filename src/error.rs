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

//! Crate-wide error type.
//!
//! Every fallible runtime operation returns `Result<T, Error>`. The variants
//! mirror the error kinds named in the external interface: `Timeout`,
//! `WaitAbort`, `SocketError`, `Exit`, `Busy`, `NoEndpointsConnectable`,
//! `TooManyConnections`, plus `PollerError` for failures that are fatal to
//! the scheduler itself.

use std::fmt;
use std::io;

use thiserror::Error;

/// Errors surfaced across the runtime boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// A wait expired before its condition fired. Recoverable; callers
    /// typically retry or escalate.
    #[error("operation timed out")]
    Timeout,

    /// The wait was invalidated: the fd was closed, or the scheduler is
    /// shutting down. Not recoverable for this operation.
    #[error("wait aborted")]
    WaitAbort,

    /// A transport error, carrying the OS errno when one is available.
    #[error("socket error: {message} (errno {errno:?})")]
    SocketError {
        message: String,
        errno: Option<i32>,
    },

    /// Cooperative cancellation sentinel injected via `throw_into`.
    #[error("coroutine was cancelled")]
    Exit,

    /// A second waiter was registered on an fd direction that already has
    /// one. Indicates a programmer error, not a transient condition.
    #[error("a waiter is already registered for this fd and direction")]
    Busy,

    /// A connection pool tried every endpoint and none connected.
    #[error("no endpoints were connectable")]
    NoEndpointsConnectable,

    /// A connection pool waited `busy_wait` seconds without a connection
    /// becoming available.
    #[error("too many connections: waited for a free slot and gave up")]
    TooManyConnections,

    /// The readiness poller (epoll/kqueue) reported an error. Fatal to the
    /// scheduler: `run_forever`/`run_until_idle` return this and stop.
    #[error("poller error: {0}")]
    PollerError(#[source] io::Error),

    /// A read/write/flush was attempted on a stream that `close` (or an
    /// `EPIPE` while flushing) already marked closed.
    #[error("stream is closed")]
    Closed,
}

impl Error {
    /// Build a `SocketError` from the last OS error, matching the source
    /// project's habit of attaching `errno` to every transport failure.
    pub fn from_io(err: &io::Error) -> Error {
        Error::SocketError {
            message: err.to_string(),
            errno: err.raw_os_error(),
        }
    }

    /// True if this is the `EAGAIN`/`EWOULDBLOCK` condition that the wait
    /// primitives translate into a suspend-and-retry rather than an error.
    pub fn io_would_block(err: &io::Error) -> bool {
        err.kind() == io::ErrorKind::WouldBlock
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::from_io(&err)
    }
}

/// Debug-formats a panic payload the way `catch_unwind` hands it back,
/// for the "unhandled error from a coroutine" failure path.
pub(crate) struct PanicMessage<'a>(pub &'a (dyn std::any::Any + Send + 'static));

impl fmt::Display for PanicMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<&'static str>() {
            write!(f, "{s}")
        } else if let Some(s) = self.0.downcast_ref::<String>() {
            write!(f, "{s}")
        } else {
            write!(f, "Box<dyn Any>")
        }
    }
}
