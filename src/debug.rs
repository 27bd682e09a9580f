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

//! Debug flag bitmask passed to `Runtime::setdebug`.
//!
//! Names are part of the stable external surface: they mirror the
//! category names a CPython C-extension sibling of this runtime uses for
//! the same subsystems. `*_DUMP` bits additionally emit a `log::trace!`
//! snapshot once per scheduler iteration.

use bitflags::bitflags;

bitflags! {
    /// OR-able debug categories.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugFlags: u32 {
        /// Coroutine lifecycle transitions (spawn, resume, suspend, death).
        const COEV = 1 << 0;
        /// Dump the run queue and waiter set alongside `COEV` traces.
        const COEV_DUMP = 1 << 1;
        /// Poller/timer-heap contention (registration, cancellation).
        const COLOCK = 1 << 2;
        /// Dump poller interest table and timer heap contents.
        const COLOCK_DUMP = 1 << 3;
        /// Buffered stream read/write buffer sizes.
        const NBUF = 1 << 4;
        /// Dump buffered stream contents (as lossy UTF-8) on every op.
        const NBUF_DUMP = 1 << 5;
        /// Dump the run queue at the top of every scheduler iteration.
        const RUNQ_DUMP = 1 << 6;
        /// Coroutine stack high-water mark checks.
        const STACK = 1 << 7;
        /// Dump stack high-water marks for every live coroutine.
        const STACK_DUMP = 1 << 8;
    }
}

impl Default for DebugFlags {
    fn default() -> Self {
        DebugFlags::empty()
    }
}
