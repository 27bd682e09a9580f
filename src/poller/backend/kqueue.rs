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

//! kqueue backend for macOS/the BSDs. Without `EV_CLEAR` a kqueue filter
//! stays level-triggered (it keeps reporting the fd each time `kevent` is
//! called until the condition clears), matching the poller's contract.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::RawEvent;

pub(in crate::poller) struct Backend {
    kq: RawFd,
}

fn kevent_change(ident: RawFd, filter: i16, flags: u16) -> libc::kevent {
    libc::kevent {
        ident: ident as libc::uintptr_t,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: std::ptr::null_mut(),
    }
}

impl Backend {
    pub fn new() -> io::Result<Backend> {
        // SAFETY: kqueue() takes no arguments.
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Backend { kq })
    }

    fn apply(&mut self, changes: &[libc::kevent]) -> io::Result<()> {
        // SAFETY: `changes` is a valid slice for its declared length and
        // we pass no output event list (nevents = 0, eventlist = null).
        let rc = unsafe {
            libc::kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as libc::c_int,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn set(&mut self, fd: RawFd, readable: bool, writable: bool) -> io::Result<()> {
        let read_flags = if readable { libc::EV_ADD | libc::EV_ENABLE } else { libc::EV_DELETE };
        let write_flags = if writable { libc::EV_ADD | libc::EV_ENABLE } else { libc::EV_DELETE };
        let changes = [
            kevent_change(fd, libc::EVFILT_READ, read_flags),
            kevent_change(fd, libc::EVFILT_WRITE, write_flags),
        ];
        // EV_DELETE on a filter that was never added returns ENOENT; that
        // is not an error here (it just means that half wasn't watched).
        for change in changes {
            if let Err(err) = self.apply(&[change]) {
                if !(change.flags == libc::EV_DELETE && err.raw_os_error() == Some(libc::ENOENT)) {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    pub fn add(&mut self, fd: RawFd, readable: bool, writable: bool) -> io::Result<()> {
        self.set(fd, readable, writable)
    }

    pub fn modify(&mut self, fd: RawFd, readable: bool, writable: bool) -> io::Result<()> {
        self.set(fd, readable, writable)
    }

    pub fn delete(&mut self, fd: RawFd) -> io::Result<()> {
        self.set(fd, false, false)
    }

    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<RawEvent>> {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts.as_ref().map_or(std::ptr::null(), |t| t as *const _);

        let mut raw: [libc::kevent; 256] = unsafe { std::mem::zeroed() };
        // SAFETY: `raw` is a valid buffer of the declared capacity;
        // `ts_ptr` is either null (block forever) or points at a live,
        // stack-owned `timespec`.
        let n = unsafe {
            libc::kevent(self.kq, std::ptr::null(), 0, raw.as_mut_ptr(), raw.len() as libc::c_int, ts_ptr)
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
            let fd = ev.ident as RawFd;
            let err_flag = ev.flags & libc::EV_ERROR != 0;
            out.push(RawEvent {
                fd,
                readable: ev.filter == libc::EVFILT_READ || err_flag,
                writable: ev.filter == libc::EVFILT_WRITE || err_flag,
            });
        }
        Ok(out)
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}
