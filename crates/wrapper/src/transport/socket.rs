//! Loopback TCP backend: the wrapper binds a port, the child connects back
//! to it on startup. `port_min..=port_max` lets several wrapper instances
//! share a conf file without colliding (spec.md §6 `wrapper.port.min/max`).

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use super::RawChannel;

pub struct SocketListener {
    listener: TcpListener,
    pub(super) port: u16,
    pub(super) addr: std::net::IpAddr,
}

impl SocketListener {
    /// Poll for the child's connection, bounded by `timeout` so a child that
    /// never connects (wrong binary, crashes instantly) doesn't hang the
    /// wrapper forever on `accept()`.
    pub fn accept(self, timeout: Duration) -> io::Result<SocketTransport> {
        self.listener.set_nonblocking(true)?;
        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, _peer)) => {
                    stream.set_nonblocking(true)?;
                    stream.set_nodelay(true).ok();
                    return Ok(SocketTransport { stream });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out waiting for child to connect"));
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

pub struct SocketTransport {
    stream: TcpStream,
}

impl SocketTransport {
    pub fn listen_v4(port_min: u16, port_max: u16) -> io::Result<SocketListener> {
        Self::listen_on(Ipv4Addr::LOCALHOST.into(), port_min, port_max)
    }

    pub fn listen_v6(port_min: u16, port_max: u16) -> io::Result<SocketListener> {
        Self::listen_on(Ipv6Addr::LOCALHOST.into(), port_min, port_max)
    }

    fn listen_on(addr: std::net::IpAddr, port_min: u16, port_max: u16) -> io::Result<SocketListener> {
        let listener = bind_in_range(addr, port_min, port_max)?;
        let port = listener.local_addr()?.port();
        log::debug!("control channel listening on {}:{}", addr, port);
        Ok(SocketListener { listener, port, addr })
    }
}

fn bind_in_range(addr: std::net::IpAddr, port_min: u16, port_max: u16) -> io::Result<TcpListener> {
    let (lo, hi) = if port_min <= port_max { (port_min, port_max) } else { (port_max, port_min) };
    let mut last_err = None;
    for port in lo..=hi {
        match TcpListener::bind(SocketAddr::new(addr, port)) {
            Ok(listener) => return Ok(listener),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "empty port range")))
}

impl RawChannel for SocketTransport {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::Read;
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        use std::io::Write;
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}
