//! Named-pipe backend, used when neither loopback socket could be bound
//! (firewall software, IPv6-disabled hosts, sandboxed containers).
//!
//! Grounded directly on `components/launcher/src/server/mod.rs`'s
//! `IpcOneShotServer`/`IpcSender::connect` handshake: bind a one-shot
//! server, publish its name to the child via the environment, then wait for
//! the child to connect back and hand over its own sender name as its first
//! message.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use ipc_channel::ipc::{IpcOneShotServer, IpcReceiver, IpcSender};

use super::RawChannel;

/// Environment variable the child reads to find the pipe name (mirrors
/// `protocol::LAUNCHER_PIPE_ENV` in the teacher).
pub const PIPE_NAME_ENV: &str = "WRAPPER_PIPE_NAME";

pub struct PipeOneShot {
    server: IpcOneShotServer<Vec<u8>>,
    pub(super) name: String,
}

impl PipeOneShot {
    pub fn listen() -> io::Result<Self> {
        let (server, name) =
            IpcOneShotServer::new().map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(PipeOneShot { server, name })
    }

    /// `IpcOneShotServer::accept` has no timeout knob; `_timeout` is accepted
    /// only to keep the signature uniform with the socket backend.
    pub fn accept(self, _timeout: Duration) -> io::Result<PipeTransport> {
        let (rx, raw) = self.server.accept().map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let child_channel_name = String::from_utf8(raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let tx = IpcSender::connect(child_channel_name)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(PipeTransport { rx, tx, pending: VecDeque::new() })
    }
}

pub struct PipeTransport {
    rx: IpcReceiver<Vec<u8>>,
    tx: IpcSender<Vec<u8>>,
    pending: VecDeque<u8>,
}

impl RawChannel for PipeTransport {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.try_recv() {
                Ok(bytes) => self.pending.extend(bytes),
                Err(_) => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.pending.pop_front().unwrap();
        }
        Ok(n)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map(|_| buf.len())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}
