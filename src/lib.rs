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

//! `coev`: a cooperative, single-threaded coroutine runtime with an
//! epoll/kqueue-backed I/O substrate and a connection pool.
//!
//! A [`Runtime`] owns a scheduler, a run queue, a timer heap, and a
//! readiness poller; coroutines are stackful (via [`corosensei`]) and
//! suspend only at explicit wait points — [`wait_fd`], [`sleep`],
//! [`switch_to_scheduler`], [`switch_to`] — or inside [`stream`] and
//! [`pool`] operations that call those internally. Nothing here uses
//! threads, atomics, or locks: exactly one coroutine runs at a time, so
//! the only synchronization primitive the crate needs is the scheduler's
//! own bookkeeping.
//!
//! ```no_run
//! use coev::{Runtime, RuntimeConfig};
//!
//! let mut rt = Runtime::new(RuntimeConfig::default()).unwrap();
//! rt.spawn(|| {
//!     coev::sleep(0.01).unwrap();
//!     println!("woke up");
//! });
//! rt.run_until_idle().unwrap();
//! ```

mod coroutine;
mod debug;
mod endpoint;
mod error;
mod poller;
mod scheduler;
mod stats;
mod stream;
mod timer;

pub mod pool;

pub use coroutine::{CoroHandle, Options};
pub use debug::DebugFlags;
pub use endpoint::Endpoint;
pub use error::Error;
pub use poller::Direction;
pub use scheduler::{Runtime, RuntimeConfig};
pub use stats::Stats;
pub use stream::BufferedSocketStream;

use std::any::Any;
use std::os::unix::io::RawFd;

/// Spawns a coroutine on whichever [`Runtime`] is currently driving its
/// loop on this thread. Prefer [`Runtime::spawn`] for the coroutines a
/// program seeds before its first `run_forever`/`run_until_idle` call;
/// this free function is for a coroutine spawning a child of its own.
pub fn spawn<F>(f: F) -> CoroHandle
where
    F: FnOnce() + Send + 'static,
{
    scheduler::with_current(|s| s.spawn_opts(f, Options::default()))
}

/// Like [`spawn`], with explicit [`Options`] (stack size, name).
pub fn spawn_opts<F>(f: F, opts: Options) -> CoroHandle
where
    F: FnOnce() + Send + 'static,
{
    scheduler::with_current(|s| s.spawn_opts(f, opts))
}

/// The handle of the coroutine calling this function.
///
/// # Panics
/// Panics if called outside of a coroutine.
pub fn current() -> CoroHandle {
    scheduler::with_current(|s| s.current())
}

/// Suspends the current coroutine until `fd` becomes ready for `dir`, or
/// `timeout_s` elapses (`f64::INFINITY` for no deadline).
///
/// # Errors
/// `Error::Timeout` if the deadline elapses first; `Error::Busy` if
/// another waiter already holds this `(fd, dir)` slot; `Error::Exit` or
/// another injected error if `throw_into` targeted this coroutine while it
/// waited.
///
/// # Panics
/// Panics if called outside of a coroutine.
pub fn wait_fd(fd: RawFd, dir: Direction, timeout_s: f64) -> Result<(), Error> {
    scheduler::with_current(|s| s.wait_fd(fd, dir, timeout_s))
}

/// Suspends the current coroutine for `seconds`. Unlike [`wait_fd`], a
/// plain sleep cannot time out early on its own — it returns `Ok(())`
/// once the duration elapses. It is still a suspension point, though, so
/// `throw_into` can still cancel it; that surfaces as `Err`.
///
/// # Panics
/// Panics if called outside of a coroutine.
pub fn sleep(seconds: f64) -> Result<(), Error> {
    scheduler::with_current(|s| s.sleep(seconds))
}

/// Suspends the current coroutine until some peer resumes it via
/// [`switch_to`], returning whatever value that peer handed over.
///
/// # Panics
/// Panics if called outside of a coroutine.
pub fn switch_to_scheduler() -> Option<Box<dyn Any + Send>> {
    scheduler::with_current(|s| s.switch_to_scheduler())
}

/// Hands `value` to `target`, resuming it immediately (ordering guarantee
/// (ii): `target` runs before the scheduler reclaims control), then
/// suspends the caller until it is in turn resumed by someone else.
/// Returns whatever value the caller is eventually resumed with.
///
/// # Panics
/// Panics if called outside of a coroutine, or if `target` is the calling
/// coroutine itself.
pub fn switch_to(target: CoroHandle, value: Box<dyn Any + Send>) -> Result<Option<Box<dyn Any + Send>>, Error> {
    scheduler::with_current(|s| s.switch_to(target.id(), value))
}

/// Injects `err` at `target`'s current (or next) suspension point,
/// marking it runnable. No-op if `target` has already died.
///
/// # Panics
/// Panics if `target` is currently `Running` — a coroutine cannot be
/// thrown into while it is on the call stack.
pub fn throw_into(target: CoroHandle, err: Error) {
    scheduler::with_current(|s| s.throw_into(target.id(), err))
}

/// Wraps `fd` in a buffered, non-blocking stream. Usable from inside any
/// coroutine, on any runtime — construction needs no scheduler access;
/// only the stream's `read`/`write`/`readline`/`flush` calls do, via
/// [`wait_fd`] internally.
pub fn socketfile(fd: RawFd, timeout_s: f64, read_limit: usize) -> BufferedSocketStream {
    BufferedSocketStream::from_raw_fd(fd, timeout_s, read_limit)
}

/// Blocks the calling coroutine until `target` has finished running,
/// returning its panic message (if it panicked) as `Err`.
///
/// # Panics
/// Panics if called outside of a coroutine.
pub fn join(target: CoroHandle) -> Result<(), String> {
    scheduler::Runtime::join_from_within(target.id())
}
