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

//! Readiness poller: a thin wrapper over epoll/kqueue plus the fd interest
//! table.
//!
//! Level-triggered semantics are used throughout: a coroutine that doesn't
//! fully drain a readable/writable fd in one op will simply be told it's
//! ready again next time the poller is polled, with no explicit re-arm
//! needed.

mod backend;

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::coroutine::CoroId;
use crate::error::Error;

/// Which half of a full-duplex fd a waiter cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Debug, Default, Clone, Copy)]
struct FdInterest {
    read: Option<CoroId>,
    write: Option<CoroId>,
}

impl FdInterest {
    fn is_empty(&self) -> bool {
        self.read.is_none() && self.write.is_none()
    }

    fn slot_mut(&mut self, dir: Direction) -> &mut Option<CoroId> {
        match dir {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        }
    }
}

/// Owns the OS-level readiness primitive plus the fd → (reader, writer)
/// interest table.
pub(crate) struct Poller {
    backend: backend::Backend,
    interest: HashMap<RawFd, FdInterest>,
}

impl Poller {
    pub fn new() -> Result<Poller, Error> {
        Ok(Poller {
            backend: backend::Backend::new().map_err(Error::PollerError)?,
            interest: HashMap::new(),
        })
    }

    /// Register `coro` as waiting on `fd` becoming ready for `dir`.
    /// Fails with `Error::Busy` if another waiter already holds that
    /// (fd, direction) slot — at most one reader and one writer per fd.
    pub fn register(&mut self, fd: RawFd, dir: Direction, coro: CoroId) -> Result<(), Error> {
        let entry = self.interest.entry(fd).or_default();
        if entry.slot_mut(dir).is_some() {
            return Err(Error::Busy);
        }
        let was_empty = entry.is_empty();
        *entry.slot_mut(dir) = Some(coro);
        let want_read = entry.read.is_some();
        let want_write = entry.write.is_some();

        let result = if was_empty {
            self.backend.add(fd, want_read, want_write)
        } else {
            self.backend.modify(fd, want_read, want_write)
        };
        result.map_err(Error::PollerError)
    }

    /// Cancel a previously registered waiter, regardless of whether the
    /// fd ever became ready. No-op if nothing was registered.
    pub fn unregister(&mut self, fd: RawFd, dir: Direction) -> Result<(), Error> {
        let Some(entry) = self.interest.get_mut(&fd) else { return Ok(()) };
        *entry.slot_mut(dir) = None;
        let want_read = entry.read.is_some();
        let want_write = entry.write.is_some();
        if entry.is_empty() {
            self.interest.remove(&fd);
            self.backend.delete(fd).map_err(Error::PollerError)
        } else {
            self.backend.modify(fd, want_read, want_write).map_err(Error::PollerError)
        }
    }

    /// True if nothing is currently registered (the scheduler uses this to
    /// decide whether polling would simply block forever with no waiters).
    pub fn is_empty(&self) -> bool {
        self.interest.is_empty()
    }

    /// Block for up to `timeout` (None = forever, Some(ZERO) = don't
    /// block) and return the fds that became ready, consuming their
    /// waiter registrations from the interest table as we go (the waiter
    /// itself still owns the `CoroId`; the caller looks it up before
    /// calling this a second time).
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<(RawFd, Direction, CoroId)>, Error> {
        let raw_events = self.backend.wait(timeout).map_err(Error::PollerError)?;
        let mut woken = Vec::new();
        for ev in raw_events {
            let Some(entry) = self.interest.get(&ev.fd).copied() else { continue };
            if ev.readable {
                if let Some(coro) = entry.read {
                    woken.push((ev.fd, Direction::Read, coro));
                }
            }
            if ev.writable {
                if let Some(coro) = entry.write {
                    woken.push((ev.fd, Direction::Write, coro));
                }
            }
        }
        for &(fd, dir, _) in &woken {
            // Consumed lazily: the caller re-registers if it wants to wait
            // again.
            let _ = self.unregister(fd, dir);
        }
        Ok(woken)
    }
}
