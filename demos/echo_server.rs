//! Minimal line-echo server exercising the runtime end to end: one
//! coroutine accepts connections, spawning a fresh coroutine per client
//! that reads lines via [`coev::BufferedSocketStream::readline`] and
//! echoes them back. No protocol beyond "echo a line" lives here — this
//! is a demo of the scheduler and stream, not a protocol implementation.

use std::net::TcpListener;
use std::os::unix::io::{AsRawFd, IntoRawFd};

use coev::{Direction, Runtime, RuntimeConfig};

fn main() {
    env_logger::init();

    let addr = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:7070".to_string());
    let listener = TcpListener::bind(&addr).expect("failed to bind listener");
    listener.set_nonblocking(true).expect("failed to set listener non-blocking");
    println!("coev echo demo listening on {addr}");

    let listener_fd = listener.as_raw_fd();
    let mut rt = Runtime::new(RuntimeConfig::default()).expect("failed to start runtime");

    rt.spawn(move || {
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true).expect("failed to set client non-blocking");
                    let fd = stream.into_raw_fd();
                    println!("accepted {peer}");
                    coev::spawn(move || handle_client(fd));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if let Err(e) = coev::wait_fd(listener_fd, Direction::Read, f64::INFINITY) {
                        eprintln!("accept loop: wait_fd failed: {e}");
                        break;
                    }
                }
                Err(e) => {
                    eprintln!("accept failed: {e}");
                    break;
                }
            }
        }
    });

    rt.run_forever().expect("scheduler loop failed");
}

fn handle_client(fd: std::os::unix::io::RawFd) {
    let mut stream = coev::socketfile(fd, 30.0, 64 * 1024);
    loop {
        match stream.readline(8192) {
            Ok(line) if line.is_empty() => break, // EOF
            Ok(line) => {
                if let Err(e) = stream.write(&line) {
                    eprintln!("client write failed: {e}");
                    break;
                }
                if let Err(e) = stream.flush() {
                    eprintln!("client flush failed: {e}");
                    break;
                }
            }
            Err(e) => {
                eprintln!("client read failed: {e}");
                break;
            }
        }
    }
}
