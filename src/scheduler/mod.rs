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

//! The scheduler: run queue, blocked set, timer heap, and poller, driven
//! by a single `run_once` iteration.
//!
//! `Scheduler` is a plain value owned by [`Runtime`]; nothing here is
//! global. The only concession to ergonomics is a thread-local pointer to
//! the scheduler that is *currently* driving its loop, set for the
//! duration of `run_forever`/`run_until_idle` so that free functions like
//! `crate::wait_fd` — called from inside a spawned coroutine, which has no
//! other way to reach "its" runtime — can find it. This is the same
//! `thread_local!(static SCHEDULER: ...)` / `Scheduler::current()` idiom
//! `coio-rs` and `coroutine-rs` use; it does not reintroduce global state
//! for the `Runtime` value itself, which tests are free to construct many
//! independent copies of.

use std::any::Any;
use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use log::{debug, error, trace, warn};

use crate::coroutine::{
    wake_into_result, CoroHandle, CoroId, CoroOutcome, CoroSlot, CoroYielder, Options, State,
    WakeReason, WakeValue,
};
use crate::debug::DebugFlags;
use crate::error::{Error, PanicMessage};
use crate::poller::{Direction, Poller};
use crate::stats::{Counters, Stats};
use crate::stream::BufferedSocketStream;
use crate::timer::{deadline_from, TimerHeap};

thread_local! {
    static CURRENT_SCHEDULER: Cell<*mut Scheduler> = const { Cell::new(std::ptr::null_mut()) };
}

/// Runs `body` with `scheduler` installed as the thread's current
/// scheduler, restoring whatever was installed before on the way out
/// (including on unwind, via the guard's `Drop`).
struct CurrentGuard {
    previous: *mut Scheduler,
}

impl CurrentGuard {
    fn install(scheduler: &mut Scheduler) -> CurrentGuard {
        let previous = CURRENT_SCHEDULER.with(|c| c.replace(scheduler as *mut Scheduler));
        CurrentGuard { previous }
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT_SCHEDULER.with(|c| c.set(self.previous));
    }
}

/// Runs `f` with a `&mut Scheduler` borrowed from the thread-local slot.
///
/// # Panics
/// Panics if called outside of `Runtime::run_forever`/`run_until_idle` —
/// i.e. outside of a coroutine. There is deliberately no `Result` for this
/// case: calling a wait primitive with no runtime running is a programming
/// error, not a recoverable condition.
pub(crate) fn with_current<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    let ptr = CURRENT_SCHEDULER.with(|c| c.get());
    assert!(
        !ptr.is_null(),
        "coev runtime function called with no Runtime currently driving its loop on this thread"
    );
    // SAFETY: `ptr` was installed by `CurrentGuard::install` from a live
    // `&mut Scheduler` and is cleared before that borrow ends; the
    // single-threaded cooperative model guarantees no concurrent access.
    f(unsafe { &mut *ptr })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitKind {
    Io,
    Timer,
    Peer,
}

#[derive(Debug, Clone, Copy)]
struct WaiterInfo {
    kind: WaitKind,
    fd: Option<(RawFd, Direction)>,
}

/// Configuration for a [`Runtime`] / its `Scheduler`.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub stack_size: usize,
    pub debug: DebugFlags,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            stack_size: 64 * 1024,
            debug: DebugFlags::empty(),
        }
    }
}

/// The scheduler proper. Almost always accessed through [`Runtime`]; the
/// split exists so the thread-local in this module can hand out a
/// `&mut Scheduler` without also exposing `Runtime`'s constructor/ownership
/// concerns.
pub struct Scheduler {
    coroutines: HashMap<CoroId, CoroSlot>,
    run_queue: VecDeque<CoroId>,
    pending: HashMap<CoroId, WakeReason>,
    waiters: HashMap<CoroId, WaiterInfo>,
    timers: TimerHeap,
    poller: Poller,
    next_id: u64,
    running: Option<CoroId>,
    shutdown_requested: bool,
    counters: Counters,
    debug: DebugFlags,
    dead: HashMap<CoroId, Result<(), String>>,
    joiners: HashMap<CoroId, Vec<CoroId>>,
    default_stack_size: usize,
}

impl Scheduler {
    fn new(config: &RuntimeConfig) -> Result<Scheduler, Error> {
        Ok(Scheduler {
            coroutines: HashMap::new(),
            run_queue: VecDeque::new(),
            pending: HashMap::new(),
            waiters: HashMap::new(),
            timers: TimerHeap::new(),
            poller: Poller::new()?,
            next_id: 0,
            running: None,
            shutdown_requested: false,
            counters: Counters::default(),
            debug: config.debug,
            dead: HashMap::new(),
            joiners: HashMap::new(),
            default_stack_size: config.stack_size,
        })
    }

    // ---- spawn ---------------------------------------------------------

    pub(crate) fn spawn_opts<F>(&mut self, f: F, mut opts: Options) -> CoroHandle
    where
        F: FnOnce() + Send + 'static,
    {
        if opts.stack_size == 0 {
            opts.stack_size = self.default_stack_size;
        }
        let id = CoroId(self.next_id);
        self.next_id += 1;
        let slot = CoroSlot::spawn(id, &opts, f);
        debug!("coev: spawned {:?} name={:?}", id, slot.name);
        self.coroutines.insert(id, slot);
        self.pending.insert(id, WakeReason::Start);
        self.run_queue.push_back(id);
        Counters::inc(&self.counters.coroutines_alive);
        Counters::inc(&self.counters.coroutines_total_spawned);
        CoroHandle::new(id)
    }

    pub(crate) fn current_id(&self) -> CoroId {
        self.running.expect("coev runtime function called outside a coroutine")
    }

    pub fn current(&self) -> CoroHandle {
        CoroHandle::new(self.current_id())
    }

    // ---- waking ----------------------------------------------------------

    /// Cancel `coro`'s waiter (poller registration, if any) and make it
    /// `Runnable` with the given resumption value. Idempotent: if `coro`
    /// is already runnable this just overwrites the pending value, rather
    /// than double-queuing it — used when a timer and an external
    /// cancellation race.
    fn wake_with(&mut self, coro: CoroId, reason: WakeReason) {
        if let Some(w) = self.waiters.remove(&coro) {
            if let Some((fd, dir)) = w.fd {
                if let Err(e) = self.poller.unregister(fd, dir) {
                    warn!("coev: failed to unregister fd {fd} while waking {coro:?}: {e}");
                }
            }
        }
        let Some(slot) = self.coroutines.get_mut(&coro) else {
            return;
        };
        // Bumping the generation invalidates any timer-heap entry still
        // pointing at this waiter.
        slot.wait_generation = slot.wait_generation.wrapping_add(1);
        let already_runnable = slot.state == State::Runnable;
        slot.state = State::Runnable;
        self.pending.insert(coro, reason);
        if !already_runnable {
            self.run_queue.push_back(coro);
        }
    }

    // ---- wait primitives (called from inside a running coroutine) -------

    pub(crate) fn wait_fd(&mut self, fd: RawFd, dir: Direction, timeout_s: f64) -> Result<(), Error> {
        let me = self.current_id();
        self.poller.register(fd, dir, me)?;

        let has_deadline = timeout_s.is_finite();
        if has_deadline {
            let now = Instant::now();
            let deadline = deadline_from(now, timeout_s);
            let gen = self.coroutines[&me].wait_generation;
            self.timers.insert(deadline, me, gen);
        }
        self.waiters.insert(me, WaiterInfo { kind: WaitKind::Io, fd: Some((fd, dir)) });
        self.set_state(me, State::WaitingIo);

        let reason = self.suspend_current();
        match wake_into_result(reason) {
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Sleeps for `duration_s`, returning normally once the deadline
    /// elapses. Can still return early with `Err` if `throw_into`
    /// injects an exception (e.g. `Error::Exit`) while suspended — a
    /// plain sleep cannot itself time out, but it is still a suspension
    /// point and thus still cancellable.
    pub(crate) fn sleep(&mut self, duration_s: f64) -> Result<(), Error> {
        let me = self.current_id();
        let now = Instant::now();
        let deadline = deadline_from(now, duration_s.max(0.0));
        let gen = self.coroutines[&me].wait_generation;
        self.timers.insert(deadline, me, gen);
        self.waiters.insert(me, WaiterInfo { kind: WaitKind::Timer, fd: None });
        self.set_state(me, State::WaitingTimer);
        wake_into_result(self.suspend_current()).map(|_| ())
    }

    pub(crate) fn switch_to_scheduler(&mut self) -> Option<Box<dyn Any + Send>> {
        match self.park(f64::INFINITY) {
            Ok(WakeValue::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Suspend the current coroutine with no fd registration, optionally
    /// bounded by a deadline (`f64::INFINITY` for none). Used directly by
    /// `switch_to_scheduler` and by callers like the connection pool that
    /// park on their own FIFO queue and expect an explicit `switch_to`
    /// (not a run-queue wake) to resume them.
    pub(crate) fn park(&mut self, timeout_s: f64) -> Result<WakeValue, Error> {
        let me = self.current_id();
        if timeout_s.is_finite() {
            let now = Instant::now();
            let deadline = deadline_from(now, timeout_s);
            let gen = self.coroutines[&me].wait_generation;
            self.timers.insert(deadline, me, gen);
        }
        self.waiters.insert(me, WaiterInfo { kind: WaitKind::Peer, fd: None });
        self.set_state(me, State::WaitingPeer);
        wake_into_result(self.suspend_current())
    }

    pub(crate) fn switch_to(&mut self, target: CoroId, value: Box<dyn Any + Send>) -> Result<Option<Box<dyn Any + Send>>, Error> {
        let me = self.current_id();
        assert!(target != me, "a coroutine cannot switch_to itself");
        if !self.coroutines.contains_key(&target) {
            return Err(Error::WaitAbort);
        }
        self.waiters.insert(me, WaiterInfo { kind: WaitKind::Peer, fd: None });
        self.set_state(me, State::WaitingPeer);

        // Ordering guarantee (ii): run `target` to its next suspension or
        // completion *now*, before the scheduler reclaims control — a
        // direct, synchronous hand-off rather than a run-queue enqueue.
        self.direct_resume(target, WakeReason::Value(value));

        match wake_into_result(self.suspend_current()) {
            Ok(WakeValue::Value(v)) => Ok(Some(v)),
            Ok(WakeValue::Ready) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Hands `value` to `target`, marking it runnable and enqueuing it,
    /// without suspending the caller. Unlike `switch_to`, this is for a
    /// caller that has its own reason to keep running (e.g. a pool
    /// release notifying the next waiter) rather than handing off control.
    /// No-op if `target` has already died.
    pub(crate) fn wake_peer(&mut self, target: CoroId, value: Box<dyn Any + Send>) {
        if !self.coroutines.contains_key(&target) {
            return;
        }
        self.wake_with(target, WakeReason::Value(value));
    }

    pub(crate) fn throw_into(&mut self, target: CoroId, err: Error) {
        let Some(slot) = self.coroutines.get(&target) else {
            return;
        };
        assert!(
            slot.state != State::Running,
            "cannot throw_into a coroutine that is currently Running ({target:?})"
        );
        if slot.state == State::Dead {
            return;
        }
        debug!("coev: throw_into {:?}: {:?}", target, err);
        self.wake_with(target, WakeReason::Exception(err));
    }

    pub fn shutdown(&mut self) {
        info_shutdown(self);
    }

    fn set_state(&mut self, coro: CoroId, state: State) {
        if let Some(slot) = self.coroutines.get_mut(&coro) {
            slot.state = state;
        }
    }

    /// Suspend the currently running coroutine and return whatever it was
    /// resumed with.
    fn suspend_current(&mut self) -> WakeReason {
        let me = self.current_id();
        let yielder = self.coroutines[&me].yielder_ptr();
        debug_assert!(!yielder.is_null(), "coroutine {me:?} has no yielder yet");
        // SAFETY: `yielder` points at the `Yielder` captured by `me`'s own
        // entry closure, which lives on `me`'s stack for `me`'s entire
        // lifetime; `me` is the coroutine currently executing this code,
        // so the pointer is valid and uniquely owned at this call site.
        let yielder: &CoroYielder = unsafe { &*yielder };
        yielder.suspend(())
    }

    /// Resume `target` directly (not through the run queue), saving and
    /// restoring `self.running` around the call so nested `switch_to`
    /// chains report the right "current" coroutine.
    fn direct_resume(&mut self, target: CoroId, reason: WakeReason) {
        // A direct resume cancels whatever `target` was otherwise parked
        // on, exactly like a run-queue wake.
        if let Some(w) = self.waiters.remove(&target) {
            if let Some((fd, dir)) = w.fd {
                let _ = self.poller.unregister(fd, dir);
            }
        }
        if let Some(slot) = self.coroutines.get_mut(&target) {
            slot.wait_generation = slot.wait_generation.wrapping_add(1);
        }
        // If `target` was sitting in the run queue with a pending wake of
        // its own, this direct hand-off supersedes it; it'll simply be
        // skipped as a no-op when the run queue gets to it (it is no
        // longer `Runnable` once it suspends or dies below... unless it
        // re-suspends as `Runnable` again, in which case the stale queue
        // entry is harmless: `run_once` re-checks `pending` each time).
        self.run_resume(target, reason);
    }

    fn run_resume(&mut self, coro: CoroId, reason: WakeReason) {
        let previous = self.running;
        self.running = Some(coro);
        Counters::inc(&self.counters.switches);
        let outcome = self.coroutines.get_mut(&coro).and_then(|slot| slot.resume(reason));
        self.running = previous;
        if let Some(outcome) = outcome {
            self.finalize(coro, outcome);
        }
    }

    fn finalize(&mut self, coro: CoroId, outcome: CoroOutcome) {
        self.coroutines.remove(&coro);
        let counter = &self.counters.coroutines_alive;
        counter.set(counter.get().saturating_sub(1));
        let result = match outcome {
            Ok(()) => {
                debug!("coev: {:?} finished", coro);
                Ok(())
            }
            Err(panic) => {
                let msg = PanicMessage(panic.as_ref()).to_string();
                error!("coev: {:?} panicked: {}", coro, msg);
                Err(msg)
            }
        };
        self.dead.insert(coro, result);
        if let Some(joiners) = self.joiners.remove(&coro) {
            for j in joiners {
                self.wake_with(j, WakeReason::Ready);
            }
        }
    }

    // ---- the loop ----------------------------------------------------

    /// One scheduler iteration: expire timers, poll for
    /// I/O (bounded by the next deadline or zero if the run queue is
    /// already non-empty), then resume exactly one runnable coroutine.
    /// Returns `true` if it resumed something (the caller keeps calling
    /// this until it returns `false` and the termination condition
    /// holds).
    fn run_once(&mut self) -> Result<bool, Error> {
        if self.debug.contains(DebugFlags::RUNQ_DUMP) {
            trace!("coev: run_queue = {:?}", self.run_queue);
        }

        let now = Instant::now();
        let fired: Vec<CoroId> = {
            let coroutines = &self.coroutines;
            self.timers.drain_expired(now, |id| coroutines.get(&id).map(|c| c.wait_generation))
        };
        for coro in fired {
            let kind = self.waiters.get(&coro).map(|w| w.kind);
            let reason = match kind {
                Some(WaitKind::Timer) => WakeReason::Ready,
                _ => WakeReason::TimedOut,
            };
            Counters::inc(&self.counters.timer_fires);
            self.wake_with(coro, reason);
        }

        let timeout = if !self.run_queue.is_empty() {
            Some(Duration::ZERO)
        } else {
            self.timers.peek_deadline().map(|d| d.saturating_duration_since(Instant::now()))
        };

        if timeout.is_some() || !self.poller.is_empty() {
            let ready = self.poller.wait(timeout)?;
            Counters::inc(&self.counters.poller_waits);
            for (_, _, coro) in ready {
                Counters::inc(&self.counters.io_readies);
                self.wake_with(coro, WakeReason::Ready);
            }
        } else if timeout.is_none() && self.run_queue.is_empty() {
            // Nothing runnable, no timers, no fds registered: there is
            // nothing this loop can ever wait for again.
            return Ok(false);
        }

        match self.run_queue.pop_front() {
            Some(coro) => {
                let reason = self.pending.remove(&coro).unwrap_or(WakeReason::Ready);
                self.run_resume(coro, reason);
                Ok(true)
            }
            None => Ok(true),
        }
    }

    fn is_idle(&self) -> bool {
        self.run_queue.is_empty() && self.waiters.is_empty() && self.coroutines.is_empty()
    }

    fn should_stop(&self) -> bool {
        self.run_queue.is_empty()
            && self.waiters.is_empty()
            && (self.shutdown_requested || self.coroutines.is_empty())
    }

    // ---- misc -----------------------------------------------------------

    pub fn setdebug(&mut self, debug: DebugFlags) {
        self.debug = debug;
    }

    pub fn stats(&self) -> Stats {
        self.counters.snapshot()
    }
}

fn info_shutdown(scheduler: &mut Scheduler) {
    debug!("coev: shutdown requested");
    scheduler.shutdown_requested = true;
}

/// A first-class runtime value: owns a [`Scheduler`] and its coroutines.
/// Construct one per program (or one per test — runtimes are fully
/// independent, nothing here is process-global).
pub struct Runtime {
    scheduler: Box<Scheduler>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Result<Runtime, Error> {
        Ok(Runtime { scheduler: Box::new(Scheduler::new(&config)?) })
    }

    pub fn spawn<F>(&mut self, f: F) -> CoroHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.spawn_opts(f, Options::default())
    }

    pub fn spawn_opts<F>(&mut self, f: F, opts: Options) -> CoroHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.spawn_opts(f, opts)
    }

    /// Runs the event loop until `shutdown()` has been called and no
    /// coroutines or waiters remain. Also stops early, with a warning, if
    /// nothing is left in the run queue, timer heap, or poller while
    /// coroutines are still parked — that can only mean they are waiting
    /// on a peer (`switch_to`/`join`) that will never arrive.
    pub fn run_forever(&mut self) -> Result<(), Error> {
        let _guard = CurrentGuard::install(&mut self.scheduler);
        loop {
            if self.scheduler.should_stop() {
                return Ok(());
            }
            if !self.scheduler.run_once()? {
                if !self.scheduler.is_idle() {
                    warn!("coev: scheduler has nothing left to wait on but coroutines are still parked; stopping");
                }
                return Ok(());
            }
        }
    }

    /// Runs until every coroutine has died and no waiters remain,
    /// ignoring `shutdown()` — useful in tests that don't want to manage
    /// an explicit shutdown handshake.
    pub fn run_until_idle(&mut self) -> Result<(), Error> {
        let _guard = CurrentGuard::install(&mut self.scheduler);
        while !self.scheduler.is_idle() {
            if !self.scheduler.run_once()? {
                break;
            }
        }
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
    }

    pub fn setdebug(&mut self, flags: DebugFlags) {
        self.scheduler.setdebug(flags);
    }

    pub fn stats(&self) -> Stats {
        self.scheduler.stats()
    }

    /// Wraps `fd` in a buffered, non-blocking stream that coroutines
    /// spawned on this runtime can read/write through.
    pub fn socketfile(&self, fd: RawFd, timeout_s: f64, read_limit: usize) -> BufferedSocketStream {
        BufferedSocketStream::from_raw_fd(fd, timeout_s, read_limit)
    }

    /// Blocks the calling coroutine until `target` has died, returning its
    /// panic message (if it panicked) as `Err`.
    pub(crate) fn join_from_within(target: CoroId) -> Result<(), String> {
        with_current(|s| loop {
            if let Some(result) = s.dead.get(&target) {
                return result.clone();
            }
            if !s.coroutines.contains_key(&target) {
                return Err(format!("{target:?} was never spawned on this runtime"));
            }
            let me = s.current_id();
            s.joiners.entry(target).or_default().push(me);
            s.waiters.insert(me, WaiterInfo { kind: WaitKind::Peer, fd: None });
            s.set_state(me, State::WaitingPeer);
            let _ = s.suspend_current();
        })
    }
}
