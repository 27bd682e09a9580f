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

//! A cloneable, `Runtime`-scoped handle to a spawned coroutine.
//!
//! Unlike the stack-switch primitive in `super::CoroSlot`, which the
//! scheduler owns exclusively and resumes directly, a `CoroHandle` is just
//! an identity token: cheap to copy, safe to stash in a waiter record or a
//! join list, and meaningless once handed to a different `Runtime` than the
//! one that spawned it.

use std::fmt;

use super::CoroId;

/// Stack size and name for a spawned coroutine.
///
/// A struct rather than positional arguments: there is exactly one place
/// a caller names these two knobs, rather than threading them through
/// call sites by position.
#[derive(Debug, Clone)]
pub struct Options {
    /// Size in bytes of the coroutine's stack. Default 64 KiB.
    pub stack_size: usize,
    /// Optional name, surfaced in debug logs and panic messages.
    pub name: Option<String>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            stack_size: 64 * 1024,
            name: None,
        }
    }
}

impl Options {
    pub fn new() -> Options {
        Options::default()
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A handle to a spawned coroutine, returned by `Runtime::spawn`.
///
/// `CoroHandle` is `Copy`: holding one does not keep the coroutine alive
/// (there is no refcounting here) and does not grant exclusive access to
/// it. All of its methods take the owning `Runtime` explicitly, since the
/// runtime is a first-class value rather than ambient global state.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoroHandle {
    pub(crate) id: CoroId,
}

impl CoroHandle {
    pub(crate) fn new(id: CoroId) -> CoroHandle {
        CoroHandle { id }
    }

    /// The stable identity of the coroutine this handle refers to.
    pub fn id(&self) -> CoroId {
        self.id
    }
}

impl fmt::Debug for CoroHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoroHandle({})", self.id)
    }
}
