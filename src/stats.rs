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

//! Runtime statistics surface (`Runtime::stats`).
//!
//! A concrete struct rather than a loose map. Counters live as `Cell<u64>`
//! on the scheduler: the runtime is single-threaded, so there is no need
//! for atomics.

use std::cell::Cell;

/// A snapshot of runtime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub coroutines_alive: u64,
    pub coroutines_total_spawned: u64,
    pub poller_waits: u64,
    pub timer_fires: u64,
    pub io_readies: u64,
    pub switches: u64,
}

/// Mutable counters owned by the scheduler, snapshotted into `Stats`.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub coroutines_alive: Cell<u64>,
    pub coroutines_total_spawned: Cell<u64>,
    pub poller_waits: Cell<u64>,
    pub timer_fires: Cell<u64>,
    pub io_readies: Cell<u64>,
    pub switches: Cell<u64>,
}

impl Counters {
    pub fn snapshot(&self) -> Stats {
        Stats {
            coroutines_alive: self.coroutines_alive.get(),
            coroutines_total_spawned: self.coroutines_total_spawned.get(),
            poller_waits: self.poller_waits.get(),
            timer_fires: self.timer_fires.get(),
            io_readies: self.io_readies.get(),
            switches: self.switches.get(),
        }
    }

    #[inline]
    pub fn inc(counter: &Cell<u64>) {
        counter.set(counter.get() + 1);
    }
}
