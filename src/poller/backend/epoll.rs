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

//! epoll backend, level-triggered (no `EPOLLET`), keyed by raw fd rather
//! than a slab token — the interest table in `super::super` already maps
//! fd → waiter, so `epoll_event.data` just carries the fd back.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::RawEvent;

pub(in crate::poller) struct Backend {
    epfd: RawFd,
}

impl Backend {
    pub fn new() -> io::Result<Backend> {
        // SAFETY: epoll_create1 takes no pointers; EPOLL_CLOEXEC avoids
        // leaking the epoll fd across an exec.
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Backend { epfd })
    }

    fn ctl(&mut self, op: libc::c_int, fd: RawFd, readable: bool, writable: bool) -> io::Result<()> {
        let mut events: u32 = 0;
        if readable {
            events |= libc::EPOLLIN as u32;
        }
        if writable {
            events |= libc::EPOLLOUT as u32;
        }
        let mut ev = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        // SAFETY: `ev` is a valid, stack-owned epoll_event; epoll_ctl does
        // not retain the pointer past the call.
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev as *mut _) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn add(&mut self, fd: RawFd, readable: bool, writable: bool) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, readable, writable)
    }

    pub fn modify(&mut self, fd: RawFd, readable: bool, writable: bool) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, readable, writable)
    }

    pub fn delete(&mut self, fd: RawFd) -> io::Result<()> {
        // SAFETY: the last two arguments are ignored by the kernel for
        // EPOLL_CTL_DEL but epoll_ctl's signature still requires a valid
        // pointer pre-2.6.9; pass a zeroed event for portability.
        let mut ev = libc::epoll_event { events: 0, u64: 0 };
        let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut ev as *mut _) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // The fd may already have been closed (e.g. stream close
            // raced with unregister); that's not fatal to the scheduler.
            if err.raw_os_error() == Some(libc::EBADF) || err.raw_os_error() == Some(libc::ENOENT) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<RawEvent>> {
        let timeout_ms: libc::c_int = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        };
        let mut raw = [libc::epoll_event { events: 0, u64: 0 }; 256];
        // SAFETY: `raw` is a valid buffer of the declared capacity;
        // epoll_wait writes at most that many entries.
        let n = unsafe {
            libc::epoll_wait(self.epfd, raw.as_mut_ptr(), raw.len() as libc::c_int, timeout_ms)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }
        let mut out = Vec::with_capacity(n as usize);
        for ev in &raw[..n as usize] {
            let events = ev.events as libc::c_int;
            out.push(RawEvent {
                fd: ev.u64 as RawFd,
                readable: events & (libc::EPOLLIN | libc::EPOLLERR | libc::EPOLLHUP) != 0,
                writable: events & (libc::EPOLLOUT | libc::EPOLLERR | libc::EPOLLHUP) != 0,
            });
        }
        Ok(out)
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}
