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

//! Raw OS readiness primitive: epoll on Linux/Android, kqueue on the BSDs
//! and macOS. Selected at compile time; which one is in use is an
//! implementation detail hidden behind `register`/`wait`.

use std::os::unix::io::RawFd;

/// A single ready fd, as reported by the OS primitive.
pub(super) struct RawEvent {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        pub(super) use epoll::Backend;
        mod epoll;
    } else if #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly",
    ))] {
        pub(super) use kqueue::Backend;
        mod kqueue;
    } else {
        compile_error!("coev's poller supports Linux/Android (epoll) and the BSD family/macOS (kqueue) only");
    }
}

// Each platform module below defines its own `pub(super) struct Backend`
// with the same inherent methods (`new`, `add`, `modify`, `delete`,
// `wait`); only one of them is ever compiled in, so there is no trait
// dispatch to pay for.
