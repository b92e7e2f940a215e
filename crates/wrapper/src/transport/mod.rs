//! Control-channel transport: binds one of socket-v4, socket-v6, or a named
//! pipe, and exposes the bounded read/write loops spec.md §4.2 describes
//! ("the wrapper never blocks the event loop on I/O for longer than its
//! configured deadline").
//!
//! Grounded on `components/launcher/src/server/mod.rs`'s `IpcOneShotServer`
//! handshake (bind first, then accept, then exchange an initial message) for
//! the overall shape, generalised across three concrete backends since the
//! original only ever used one (`ipc-channel`, which itself falls back to a
//! Windows named pipe or a Unix domain socket depending on platform).

mod pipe;
mod socket;

use std::io;
use std::time::{Duration, Instant};

use wrapper_protocol::{Decoder, Message};

pub use pipe::{PipeOneShot, PipeTransport};
pub use socket::{SocketListener, SocketTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Auto,
    SocketIpv4,
    SocketIpv6,
    Pipe,
}

/// How long a single bounded read attempt will poll for more data before
/// returning control to the event loop (spec.md §4.2).
pub const READ_POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// Deadline for a single outbound write, after which it is abandoned
/// (spec.md §4.2).
pub const WRITE_DEADLINE: Duration = Duration::from_secs(2);

/// A bound, connected control channel. Implementors provide raw byte
/// send/receive with non-blocking semantics; framing and the bounded
/// read/write loops live in `Transport` itself.
pub trait RawChannel {
    /// Non-blocking: `Ok(0)` or `WouldBlock` both mean "nothing available
    /// right now", not EOF. Only a non-`WouldBlock` error or an explicit
    /// closed-channel condition should be treated as fatal.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// A listener bound before the child is spawned. `child_env()` yields the
/// `WRAPPER_*` variables that tell the child how to connect back; `accept()`
/// then blocks (briefly) for that connection once the child is running.
pub enum Listener {
    Socket(SocketListener),
    Pipe(PipeOneShot),
}

impl Listener {
    /// Try each backend in turn: socket-v4, then socket-v6, then pipe,
    /// stopping at the first one that binds successfully (spec.md §4.2's
    /// `AUTO` mode).
    pub fn bind(preferred: BackendType, port_min: u16, port_max: u16) -> crate::error::Result<Self> {
        let order: &[BackendType] = match preferred {
            BackendType::Auto => &[BackendType::SocketIpv4, BackendType::SocketIpv6, BackendType::Pipe],
            BackendType::SocketIpv4 => &[BackendType::SocketIpv4],
            BackendType::SocketIpv6 => &[BackendType::SocketIpv6],
            BackendType::Pipe => &[BackendType::Pipe],
        };

        let mut last_err = None;
        for backend in order {
            let attempt = match backend {
                BackendType::SocketIpv4 => SocketTransport::listen_v4(port_min, port_max).map(Listener::Socket),
                BackendType::SocketIpv6 => SocketTransport::listen_v6(port_min, port_max).map(Listener::Socket),
                BackendType::Pipe => PipeOneShot::listen().map(Listener::Pipe),
                BackendType::Auto => unreachable!("AUTO never appears inside the resolved order"),
            };
            match attempt {
                Ok(listener) => return Ok(listener),
                Err(e) => {
                    log::debug!("control channel backend {:?} unavailable: {}", backend, e);
                    last_err = Some(e);
                }
            }
        }
        log::warn!("no control channel transport could be bound: {:?}", last_err);
        Err(crate::error::Error::NoTransportAvailable)
    }

    /// Environment entries to set on the child so it can connect back.
    pub fn child_env(&self) -> Vec<(String, String)> {
        match self {
            Listener::Socket(s) => vec![
                ("WRAPPER_PORT".to_string(), s.port.to_string()),
                ("WRAPPER_HOST".to_string(), s.addr.to_string()),
            ],
            Listener::Pipe(p) => vec![(pipe::PIPE_NAME_ENV.to_string(), p.name.clone())],
        }
    }

    /// Wait up to `timeout` for the child's connection and return a framed
    /// `Transport`.
    pub fn accept(self, timeout: Duration) -> crate::error::Result<Transport> {
        let channel: Box<dyn RawChannel> = match self {
            Listener::Socket(s) => Box::new(s.accept(timeout).map_err(crate::error::Error::Transport)?),
            Listener::Pipe(p) => Box::new(p.accept(timeout).map_err(crate::error::Error::Transport)?),
        };
        Ok(Transport::new(channel))
    }
}

/// Framing and bounded-loop wrapper around any `RawChannel`.
pub struct Transport {
    channel: Box<dyn RawChannel>,
    decoder: Decoder,
}

impl Transport {
    pub fn new(channel: Box<dyn RawChannel>) -> Self {
        Transport { channel, decoder: Decoder::default() }
    }

    /// Poll for at most `READ_POLL_TIMEOUT`, returning every complete frame
    /// received in that window. Never blocks past the deadline even if a
    /// frame is mid-flight; a partial frame is buffered in `self.decoder`
    /// for the next call.
    pub fn read_messages(&mut self) -> crate::error::Result<Vec<Message>> {
        let deadline = Instant::now() + READ_POLL_TIMEOUT;
        let mut buf = [0u8; 4096];
        let mut out = Vec::new();
        loop {
            match self.channel.try_read(&mut buf) {
                Ok(0) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(n) => {
                    self.decoder.push(&buf[..n]);
                    out.extend(self.decoder.drain());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(crate::error::Error::Transport(e)),
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        Ok(out)
    }

    /// Write a single message, retrying short writes with a shrinking chunk
    /// size until `WRITE_DEADLINE` elapses (spec.md §4.2).
    pub fn write_message(&mut self, message: &Message) -> crate::error::Result<()> {
        let encoded = message.encode();
        let mut offset = 0;
        let mut chunk = encoded.len().max(1);
        let deadline = Instant::now() + WRITE_DEADLINE;

        while offset < encoded.len() {
            if Instant::now() >= deadline {
                return Err(crate::error::Error::WriteTimedOut);
            }
            let end = (offset + chunk).min(encoded.len());
            let attempted = end - offset;
            match self.channel.try_write(&encoded[offset..end]) {
                Ok(0) => {
                    chunk = (chunk / 2).max(1);
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(n) => {
                    offset += n;
                    if n < attempted {
                        // short write: shrink the next attempt
                        chunk = (chunk / 2).max(1);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(crate::error::Error::Transport(e)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct MemChannel {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
    }

    impl RawChannel for MemChannel {
        fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inbound.len().min(buf.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap();
            }
            Ok(n)
        }

        fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[test]
    fn write_then_read_round_trips_a_message() {
        let msg = Message::new(wrapper_protocol::Code::Ping, "1000".to_string());
        let encoded = msg.encode();

        let mut writer = Transport::new(Box::new(MemChannel { inbound: VecDeque::new(), outbound: Vec::new() }));
        writer.write_message(&msg).unwrap();

        let mut reader = Transport::new(Box::new(MemChannel {
            inbound: encoded.into_iter().collect(),
            outbound: Vec::new(),
        }));
        let messages = reader.read_messages().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].code, wrapper_protocol::Code::Ping);
    }

    #[test]
    fn read_returns_empty_when_nothing_arrives_within_the_poll_window() {
        let mut reader = Transport::new(Box::new(MemChannel { inbound: VecDeque::new(), outbound: Vec::new() }));
        let messages = reader.read_messages().unwrap();
        assert!(messages.is_empty());
    }
}
