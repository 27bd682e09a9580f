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

//! Connection pool.
//!
//! Shared between coroutines as `Rc<RefCell<PoolInner>>`: a pool is a
//! resource several independent coroutines reach for concurrently, the
//! same way a channel or a mutex would be in a threaded runtime, but
//! cooperative scheduling means the borrow can never be held across a
//! suspension point — every method here drops its `RefCell` borrow before
//! doing anything that might call `wait_fd`/`sleep`/`park`.
//!
//! `release` wakes the oldest parked waiter directly (marking it runnable
//! without suspending the releaser) rather than having every waiter
//! `sleep()` in a loop and re-check the pool on every wake, so a freed
//! connection is handed off in the same scheduler iteration it was
//! released in (see DESIGN.md).

use std::cell::RefCell;
use std::os::unix::io::{AsRawFd, IntoRawFd};
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::debug;
use rand::seq::SliceRandom;
use socket2::{Socket, Type};

use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::poller::Direction;
use crate::scheduler::with_current;
use crate::stream::BufferedSocketStream;

/// Construction parameters for a [`ConnectionPool`]: capacity, how long a
/// `get()` is willing to wait for a free slot, connect/op timeouts for the
/// connections it dials, the read buffer limit each stream gets, and the
/// equivalent endpoints it dials in random order.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub capacity: usize,
    pub busy_wait_s: f64,
    pub connect_timeout_s: f64,
    pub op_timeout_s: f64,
    pub read_limit: usize,
    pub endpoints: Vec<Endpoint>,
}

/// A snapshot of pool usage, including the running `gets` counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub gets: u64,
    pub busy: usize,
    pub available: usize,
    pub waiting: usize,
}

struct Connection {
    endpoint: Endpoint,
    stream: BufferedSocketStream,
    dead: bool,
}

struct PoolInner {
    config: PoolConfig,
    busy_count: usize,
    available: Vec<Connection>,
    waiters: std::collections::VecDeque<crate::coroutine::CoroId>,
    gets: u64,
}

/// A pool of pooled stream connections to a set of equivalent endpoints.
///
/// Cheap to clone (an `Rc` bump): every clone refers to the same
/// underlying pool, which is the intended way to hand a pool to several
/// coroutines.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Rc<RefCell<PoolInner>>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> ConnectionPool {
        assert!(config.capacity > 0, "a connection pool needs capacity > 0");
        assert!(!config.endpoints.is_empty(), "a connection pool needs at least one endpoint");
        ConnectionPool {
            inner: Rc::new(RefCell::new(PoolInner {
                config,
                busy_count: 0,
                available: Vec::new(),
                waiters: std::collections::VecDeque::new(),
                gets: 0,
            })),
        }
    }

    /// Acquisition: take an idle connection, dial a new one if there's
    /// room, or park on the FIFO wait queue until one frees up or
    /// `busy_wait_s` elapses (see DESIGN.md for why waiters are woken
    /// explicitly instead of polling).
    pub fn get(&self) -> Result<PoolHandle, Error> {
        let deadline = {
            let mut inner = self.inner.borrow_mut();
            inner.gets += 1;
            Instant::now() + Duration::from_secs_f64(inner.config.busy_wait_s.max(0.0))
        };

        loop {
            // Step 1: an idle connection is sitting in `available`.
            {
                let mut inner = self.inner.borrow_mut();
                if inner.busy_count < inner.config.capacity {
                    if let Some(conn) = inner.available.pop() {
                        inner.busy_count += 1;
                        return Ok(PoolHandle::new(self.inner.clone(), conn));
                    }
                }
            }

            // Step 2: room for a new connection; dial one. Done with the
            // borrow released, since dialing suspends on `wait_fd`.
            let has_room = {
                let inner = self.inner.borrow();
                inner.busy_count < inner.config.capacity
            };
            if has_room {
                let conn = self.dial_any()?;
                let mut inner = self.inner.borrow_mut();
                inner.busy_count += 1;
                return Ok(PoolHandle::new(self.inner.clone(), conn));
            }

            // Step 3: at capacity; park on the FIFO wait queue.
            let me = with_current(|s| s.current().id());
            self.inner.borrow_mut().waiters.push_back(me);
            let remaining = deadline.saturating_duration_since(Instant::now()).as_secs_f64();
            let woken = with_current(|s| s.park(remaining));
            match woken {
                Ok(_) => continue, // a release() woke us; retry from the top
                Err(Error::Timeout) => {
                    self.inner.borrow_mut().waiters.retain(|&id| id != me);
                    if Instant::now() >= deadline {
                        return Err(Error::TooManyConnections);
                    }
                    continue;
                }
                Err(e) => {
                    self.inner.borrow_mut().waiters.retain(|&id| id != me);
                    return Err(e);
                }
            }
        }
    }

    fn dial_any(&self) -> Result<Connection, Error> {
        let (endpoints, connect_timeout, op_timeout, read_limit) = {
            let inner = self.inner.borrow();
            (
                inner.config.endpoints.clone(),
                inner.config.connect_timeout_s,
                inner.config.op_timeout_s,
                inner.config.read_limit,
            )
        };
        let mut order: Vec<usize> = (0..endpoints.len()).collect();
        order.shuffle(&mut rand::thread_rng());

        for idx in order {
            let ep = &endpoints[idx];
            match dial_one(ep, connect_timeout) {
                Ok(fd) => {
                    let stream = BufferedSocketStream::from_raw_fd(fd, op_timeout, read_limit);
                    return Ok(Connection { endpoint: ep.clone(), stream, dead: false });
                }
                Err(DialError::Retryable(reason)) => {
                    debug!("coev: pool dial to {ep} failed, trying next endpoint: {reason}");
                }
                Err(DialError::Fatal(e)) => return Err(e),
            }
        }
        Err(Error::NoEndpointsConnectable)
    }

    pub fn drop_idle(&self) {
        let mut inner = self.inner.borrow_mut();
        let closed = inner.available.len();
        inner.available.clear();
        if closed > 0 {
            debug!("coev: dropped {closed} idle pool connection(s)");
        }
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.borrow();
        PoolStats {
            gets: inner.gets,
            busy: inner.busy_count,
            available: inner.available.len(),
            waiting: inner.waiters.len(),
        }
    }

    fn release(&self, mut conn: Connection) {
        let waiter = {
            let mut inner = self.inner.borrow_mut();
            inner.busy_count = inner.busy_count.saturating_sub(1);
            if conn.dead {
                conn.stream.close();
            } else {
                inner.available.push(conn);
            }
            inner.waiters.pop_front()
        };
        if let Some(waiter_id) = waiter {
            // `wake_peer`, not `switch_to`: a releaser has its own work to
            // get back to and must not suspend itself waiting for the
            // waiter to switch back to it.
            with_current(|s| s.wake_peer(waiter_id, Box::new(())));
        }
    }
}

enum DialError {
    Retryable(Error),
    Fatal(Error),
}

/// Attempts a single non-blocking connect: create a non-blocking socket,
/// `connect`, wait on `EINPROGRESS`, and classify the result as "try the
/// next endpoint" or "propagate".
fn dial_one(ep: &Endpoint, connect_timeout_s: f64) -> Result<std::os::unix::io::RawFd, DialError> {
    let (domain, _ty) = ep.socket_domain_type();
    let socket = Socket::new(domain, Type::STREAM, None)
        .map_err(|e| DialError::Fatal(Error::from_io(&e)))?;
    socket.set_nonblocking(true).map_err(|e| DialError::Fatal(Error::from_io(&e)))?;
    let addr = ep.socket_addr().map_err(|e| DialError::Fatal(Error::from_io(&e)))?;

    match socket.connect(&addr) {
        Ok(()) => {}
        Err(e) if Error::io_would_block(&e) || e.raw_os_error() == Some(libc::EINPROGRESS) => {
            let fd = socket.as_raw_fd();
            match with_current(|s| s.wait_fd(fd, Direction::Write, connect_timeout_s)) {
                Ok(()) => match socket.take_error() {
                    Ok(None) => {}
                    Ok(Some(err)) => return Err(DialError::Retryable(Error::from_io(&err))),
                    Err(err) => return Err(DialError::Retryable(Error::from_io(&err))),
                },
                Err(Error::Timeout) => return Err(DialError::Retryable(Error::Timeout)),
                Err(e) => return Err(DialError::Fatal(e)),
            }
        }
        Err(e) if e.raw_os_error() == Some(libc::ECONNREFUSED) => {
            return Err(DialError::Retryable(Error::from_io(&e)));
        }
        Err(e) => return Err(DialError::Fatal(Error::from_io(&e))),
    }
    Ok(socket.into_raw_fd())
}

/// An owned, checked-out connection. Released back to its pool (or closed,
/// if flagged dead) when dropped, or explicitly via [`PoolHandle::release`].
pub struct PoolHandle {
    pool: Rc<RefCell<PoolInner>>,
    connection: Option<Connection>,
}

impl PoolHandle {
    fn new(pool: Rc<RefCell<PoolInner>>, connection: Connection) -> PoolHandle {
        PoolHandle { pool, connection: Some(connection) }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.connection.as_ref().expect("handle already released").endpoint
    }

    /// Marks the underlying connection dead: on release, it is closed
    /// rather than returned to the pool. Any I/O error on the underlying
    /// stream does this automatically (see `io`, below).
    pub fn mark_dead(&mut self) {
        if let Some(conn) = self.connection.as_mut() {
            conn.dead = true;
        }
    }

    pub fn read(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        self.io(|s| s.read(n))
    }

    pub fn readline(&mut self, max: usize) -> Result<Vec<u8>, Error> {
        self.io(|s| s.readline(max))
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        self.io(|s| s.write(data))
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.io(|s| s.flush())
    }

    fn io<T>(&mut self, f: impl FnOnce(&mut BufferedSocketStream) -> Result<T, Error>) -> Result<T, Error> {
        let conn = self.connection.as_mut().expect("handle already released");
        let result = f(&mut conn.stream);
        if result.is_err() {
            conn.dead = true;
        }
        result
    }

    /// Explicitly returns the connection to the pool. Equivalent to
    /// dropping the handle; provided for callers that want the release to
    /// be visible at the call site.
    pub fn release(mut self) {
        self.release_internal();
    }

    fn release_internal(&mut self) {
        let pool = ConnectionPool { inner: self.pool.clone() };
        if let Some(conn) = self.connection.take() {
            pool.release(conn);
        }
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        if self.connection.is_some() {
            self.release_internal();
        }
    }
}

