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

//! Endpoint encoding: a tagged union over the address families a
//! `ConnectionPool` can dial.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

use socket2::{Domain, Type};

/// A dial target. Address family and stream socket type are implied by the
/// variant rather than passed alongside it as a separate tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Inet(Ipv4Addr, u16),
    Inet6(Ipv6Addr, u16),
    Unix(PathBuf),
}

impl Endpoint {
    /// `socket2` domain/type pair needed to open the connecting socket.
    pub(crate) fn socket_domain_type(&self) -> (Domain, Type) {
        match self {
            Endpoint::Inet(..) => (Domain::IPV4, Type::STREAM),
            Endpoint::Inet6(..) => (Domain::IPV6, Type::STREAM),
            #[cfg(unix)]
            Endpoint::Unix(..) => (Domain::UNIX, Type::STREAM),
            #[cfg(not(unix))]
            Endpoint::Unix(..) => unreachable!("unix endpoints require a POSIX target"),
        }
    }

    /// Build the `socket2::SockAddr` used for `connect(2)`.
    pub(crate) fn socket_addr(&self) -> std::io::Result<socket2::SockAddr> {
        match self {
            Endpoint::Inet(addr, port) => {
                Ok(SocketAddr::new(IpAddr::V4(*addr), *port).into())
            }
            Endpoint::Inet6(addr, port) => {
                Ok(SocketAddr::new(IpAddr::V6(*addr), *port).into())
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => socket2::SockAddr::unix(path),
            #[cfg(not(unix))]
            Endpoint::Unix(_) => unreachable!("unix endpoints require a POSIX target"),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Inet(addr, port) => write!(f, "{addr}:{port}"),
            Endpoint::Inet6(addr, port) => write!(f, "[{addr}]:{port}"),
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Shorthand 2-tuple `(host, port)` that auto-detects IPv6 by the presence
/// of `:` in the host.
impl From<(&str, u16)> for Endpoint {
    fn from((host, port): (&str, u16)) -> Self {
        if let Ok(v4) = host.parse::<Ipv4Addr>() {
            Endpoint::Inet(v4, port)
        } else if let Ok(v6) = host.parse::<Ipv6Addr>() {
            Endpoint::Inet6(v6, port)
        } else if host.contains(':') {
            // Not a literal we could parse but shaped like IPv6 — resolve
            // greedily to unspecified rather than silently dropping it.
            Endpoint::Inet6(host.parse().unwrap_or(Ipv6Addr::UNSPECIFIED), port)
        } else {
            Endpoint::Inet(host.parse().unwrap_or(Ipv4Addr::UNSPECIFIED), port)
        }
    }
}

impl From<PathBuf> for Endpoint {
    fn from(path: PathBuf) -> Self {
        Endpoint::Unix(path)
    }
}
