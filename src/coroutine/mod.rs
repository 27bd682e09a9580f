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

//! A suspendable execution context with its own stack.
//!
//! This module owns the representation of a single coroutine: its
//! lifecycle state, its stack-switching primitive, and the slots used to
//! deliver an injected exception or a peer's resume value. The scheduler
//! (`crate::scheduler`) is the only code that resumes a `CoroSlot`; user
//! code only ever sees a [`CoroHandle`].

pub mod clonable;

pub use clonable::{CoroHandle, Options};

use std::any::Any;
use std::cell::Cell;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine as RawCoroutine, CoroutineResult, Yielder};

use crate::error::Error;

/// Stable identity of a coroutine, valid for its whole lifetime including
/// after it has died (so a stale `CoroHandle` can still be compared, even
/// though operating on it will fail).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoroId(pub(crate) u64);

impl std::fmt::Display for CoroId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "coro#{}", self.0)
    }
}

/// Lifecycle state. Exactly one coroutine is `Running` at any
/// instant; the scheduler's own call stack counts as `Running` for its
/// distinguished pseudo-coroutine while a user coroutine is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Nascent,
    Running,
    Runnable,
    WaitingIo,
    WaitingTimer,
    WaitingPeer,
    Dead,
}

impl State {
    pub fn is_waiting(self) -> bool {
        matches!(self, State::WaitingIo | State::WaitingTimer | State::WaitingPeer)
    }

    pub fn is_suspended_or_runnable(self) -> bool {
        matches!(self, State::Runnable | State::WaitingIo | State::WaitingTimer | State::WaitingPeer)
    }
}

/// The value handed back into a coroutine's current suspension point when
/// it is resumed. This doubles as an inbox/outbox: an `Exception` wake is
/// the inbox, a `Value` wake is the outbox of whichever peer performed
/// `switch_to`.
pub(crate) enum WakeReason {
    /// First resume after `spawn`; the entry function ignores this.
    Start,
    /// The waited-for fd became ready.
    Ready,
    /// The wait's deadline elapsed first.
    TimedOut,
    /// A peer coroutine delivered a value via `switch_to`.
    Value(Box<dyn Any + Send>),
    /// An exception was injected via `throw_into`, or the wait was
    /// otherwise invalidated.
    Exception(Error),
}

/// What a suspension point gets back, translated into the ordinary
/// `Result` idiom instead of raising at the call site.
pub(crate) fn wake_into_result(reason: WakeReason) -> Result<WakeValue, Error> {
    match reason {
        WakeReason::Start | WakeReason::Ready => Ok(WakeValue::Ready),
        WakeReason::TimedOut => Err(Error::Timeout),
        WakeReason::Value(v) => Ok(WakeValue::Value(v)),
        WakeReason::Exception(e) => Err(e),
    }
}

pub(crate) enum WakeValue {
    Ready,
    Value(Box<dyn Any + Send>),
}

/// What the coroutine's entry function produced: either it ran to
/// completion, or it unwound with a panic that `catch_unwind` caught at
/// the coroutine/scheduler boundary.
pub(crate) type CoroOutcome = Result<(), Box<dyn Any + Send>>;

type Inner = RawCoroutine<WakeReason, (), CoroOutcome>;

/// The yielder a running coroutine suspends through. Stashed in a
/// thread-local by the scheduler for the duration of a single `resume()`
/// call so that free functions like `crate::wait_fd` can find it without
/// the caller threading a context object through every call — the same
/// "current runtime" idiom `coio-rs`'s `thread_local!(static SCHEDULER...)`
/// uses, scoped here to a single suspend point instead of a whole thread.
pub(crate) type CoroYielder = Yielder<WakeReason, ()>;

/// A single coroutine as the scheduler sees it: identity, stack-switch
/// primitive, lifecycle state, and name.
pub(crate) struct CoroSlot {
    pub id: CoroId,
    pub name: Option<String>,
    pub state: State,
    pub inner: Inner,
    /// Bumped whenever a waiter for this coroutine is cancelled, so a
    /// stale timer-heap entry can be told apart from a live one on pop.
    pub wait_generation: u64,
    /// Set once, by the coroutine's own entry closure, the first time it
    /// runs. Valid for the coroutine's entire lifetime afterward (it just
    /// points into a local on its own stack, which `corosensei` keeps
    /// alive across every suspend), so the scheduler can read it any time
    /// this slot is the one currently running.
    yielder: Rc<Cell<*const CoroYielder>>,
}

impl CoroSlot {
    pub fn spawn<F>(id: CoroId, opts: &Options, f: F) -> CoroSlot
    where
        F: FnOnce() + Send + 'static,
    {
        let stack = DefaultStack::new(opts.stack_size)
            .unwrap_or_else(|e| panic!("failed to allocate a {}-byte coroutine stack: {e}", opts.stack_size));
        let yielder: Rc<Cell<*const CoroYielder>> = Rc::new(Cell::new(std::ptr::null()));
        let yielder_for_closure = yielder.clone();
        let inner = RawCoroutine::with_stack(stack, move |y: &CoroYielder, first: WakeReason| {
            debug_assert!(matches!(first, WakeReason::Start));
            yielder_for_closure.set(y as *const CoroYielder);
            std::panic::catch_unwind(AssertUnwindSafe(f))
        });
        CoroSlot {
            id,
            name: opts.name.clone(),
            state: State::Nascent,
            inner,
            wait_generation: 0,
            yielder,
        }
    }

    /// The yielder this coroutine's entry closure captured, or null if it
    /// hasn't run for the first time yet.
    pub fn yielder_ptr(&self) -> *const CoroYielder {
        self.yielder.get()
    }

    /// Resume this coroutine with `reason`, returning `Some(outcome)` once
    /// it has run to completion (or panicked) and `None` if it suspended
    /// again.
    pub fn resume(&mut self, reason: WakeReason) -> Option<CoroOutcome> {
        debug_assert!(!matches!(self.state, State::Dead), "resumed a dead coroutine {}", self.id);
        self.state = State::Running;
        match self.inner.resume(reason) {
            CoroutineResult::Yield(()) => None,
            CoroutineResult::Return(outcome) => {
                self.state = State::Dead;
                Some(outcome)
            }
        }
    }

    pub fn done(&self) -> bool {
        self.inner.done()
    }
}
