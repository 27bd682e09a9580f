//! End-to-end scheduler scenarios, one test per literal scenario.
//!
//! Each test builds its own `Runtime` — runtimes are cheap, independent
//! values, never global state, so tests never interfere with each other.

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use coev::pool::{ConnectionPool, PoolConfig};
use coev::{Direction, Endpoint, Error, Runtime, RuntimeConfig};

/// A connected, non-blocking pipe pair for tests that need a real fd
/// without going over the network.
fn pipe_pair() -> (RawFd, RawFd) {
    let mut fds = [0; 2];
    // SAFETY: `fds` is a valid, uniquely-owned 2-element buffer.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe(2) failed: {}", std::io::Error::last_os_error());
    for fd in fds {
        // SAFETY: `fd` was just created by `pipe` above and is still open.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    }
    (fds[0], fds[1])
}

/// Spawns a background thread that accepts (and immediately drops) every
/// connection to a fresh loopback listener, returning the port to dial.
/// Good enough for pool tests that only exercise connect/park/release,
/// not application-level I/O over the pooled stream.
fn spawn_accepting_listener() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    std::thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            std::mem::forget(stream); // stay connected for the test's duration
        }
    });
    port
}

fn loopback_pool_config(port: u16, capacity: usize, busy_wait_s: f64) -> PoolConfig {
    PoolConfig {
        capacity,
        busy_wait_s,
        connect_timeout_s: 1.0,
        op_timeout_s: 1.0,
        read_limit: 4096,
        endpoints: vec![Endpoint::Inet("127.0.0.1".parse().unwrap(), port)],
    }
}

#[test]
fn sleep_ordering() {
    let mut rt = Runtime::new(RuntimeConfig::default()).unwrap();
    let log = Rc::new(RefCell::new(String::new()));

    let log_a = log.clone();
    rt.spawn(move || {
        coev::sleep(0.10).unwrap();
        log_a.borrow_mut().push('A');
    });
    let log_b = log.clone();
    rt.spawn(move || {
        coev::sleep(0.05).unwrap();
        log_b.borrow_mut().push('B');
    });

    rt.run_until_idle().unwrap();
    assert_eq!(&*log.borrow(), "BA");
}

#[test]
fn wait_fd_times_out() {
    let mut rt = Runtime::new(RuntimeConfig::default()).unwrap();
    let (read_fd, _write_fd) = pipe_pair();
    let elapsed = Rc::new(RefCell::new(Duration::ZERO));
    let elapsed_inner = elapsed.clone();

    rt.spawn(move || {
        let start = Instant::now();
        let result = coev::wait_fd(read_fd, Direction::Read, 0.05);
        *elapsed_inner.borrow_mut() = start.elapsed();
        assert!(matches!(result, Err(Error::Timeout)));
    });
    rt.run_until_idle().unwrap();

    let elapsed = *elapsed.borrow();
    assert!(elapsed >= Duration::from_millis(50), "fired too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(200), "fired too late: {elapsed:?}");
}

#[test]
fn cancellation_via_throw_into() {
    let mut rt = Runtime::new(RuntimeConfig::default()).unwrap();
    let observed = Rc::new(RefCell::new(None));
    let observed_inner = observed.clone();

    let handle = rt.spawn(move || {
        let result = coev::sleep(10.0);
        *observed_inner.borrow_mut() = Some(result.is_err());
    });

    rt.spawn(move || {
        coev::throw_into(handle, Error::Exit);
    });

    let start = Instant::now();
    rt.run_until_idle().unwrap();
    let elapsed = start.elapsed();

    assert_eq!(*observed.borrow(), Some(true), "sleep should have observed the injected Exit");
    assert!(elapsed < Duration::from_millis(500), "cancellation should not wait out the 10s sleep: {elapsed:?}");
}

#[test]
fn pool_capacity_parks_the_third_waiter() {
    let port = spawn_accepting_listener();
    let mut rt = Runtime::new(RuntimeConfig::default()).unwrap();
    let pool = ConnectionPool::new(loopback_pool_config(port, 2, 5.0));
    let order = Rc::new(RefCell::new(Vec::new()));

    for id in 1..=3 {
        let pool = pool.clone();
        let order = order.clone();
        rt.spawn(move || {
            let handle = pool.get().expect("pool.get should eventually succeed");
            coev::sleep(0.1).unwrap();
            drop(handle);
            order.borrow_mut().push(id);
        });
    }

    let start = Instant::now();
    rt.run_until_idle().unwrap();
    let elapsed = start.elapsed();

    assert_eq!(&*order.borrow(), &[1, 2, 3]);
    assert!(elapsed >= Duration::from_millis(190), "finished too fast: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "finished too slow: {elapsed:?}");
}

#[test]
fn pool_exhaustion_raises_too_many_connections() {
    let port = spawn_accepting_listener();
    let mut rt = Runtime::new(RuntimeConfig::default()).unwrap();
    let pool = ConnectionPool::new(loopback_pool_config(port, 1, 0.05));
    let order = Rc::new(RefCell::new(Vec::new()));

    let pool1 = pool.clone();
    let order1 = order.clone();
    rt.spawn(move || {
        let _handle = pool1.get().expect("first get should succeed");
        coev::sleep(0.2).unwrap();
        order1.borrow_mut().push("released");
    });

    let pool2 = pool.clone();
    let order2 = order.clone();
    rt.spawn(move || {
        coev::sleep(0.01).unwrap(); // let the first coroutine grab the only slot first
        let start = Instant::now();
        let result = pool2.get();
        let elapsed = start.elapsed();
        assert!(result.is_err(), "expected exhaustion, got a connection");
        assert!(matches!(result, Err(Error::TooManyConnections)), "wrong error kind");
        assert!(elapsed < Duration::from_millis(200), "waited too long: {elapsed:?}");
        order2.borrow_mut().push("exhausted");
    });

    rt.run_until_idle().unwrap();
    assert_eq!(&*order.borrow(), &["exhausted", "released"]);
}

#[test]
fn stream_readline_splits_on_newline() {
    let mut rt = Runtime::new(RuntimeConfig::default()).unwrap();
    let (read_fd, write_fd) = pipe_pair();

    rt.spawn(move || {
        let mut write_side = coev::socketfile(write_fd, 1.0, 4096);
        write_side.write(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        write_side.flush().unwrap();
        write_side.close();
    });

    let lines = Rc::new(RefCell::new(Vec::new()));
    let lines_inner = lines.clone();
    rt.spawn(move || {
        let mut read_side = coev::socketfile(read_fd, 1.0, 4096);
        let first = read_side.readline(8192).unwrap();
        let second = read_side.readline(8192).unwrap();
        lines_inner.borrow_mut().push(first);
        lines_inner.borrow_mut().push(second);
    });

    rt.run_until_idle().unwrap();
    let lines = lines.borrow();
    assert_eq!(lines[0], b"GET / HTTP/1.0\r\n");
    assert_eq!(lines[1], b"\r\n");
}
