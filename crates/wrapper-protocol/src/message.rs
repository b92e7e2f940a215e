//! Wire framing for the control channel: `<code:1 byte><UTF-8 payload><NUL>`.
//!
//! The codec never prepends a length; a reader consumes bytes until it sees
//! a NUL terminator. There is no endianness concern because no multi-byte
//! integers travel on the wire — ticks and PIDs are sent as decimal/hex ASCII
//! inside the payload.

use std::fmt;

use crate::error::{Error, Result};

/// Severity carried by a `LOG` message. The JSW-style wire protocol folds the
/// level into the message code itself rather than into the payload, so we
/// reserve one code per level (see `Code::to_byte`/`Code::from_byte`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Status,
    Warn,
    Error,
    Fatal,
    Advice,
}

impl LogLevel {
    const ALL: [LogLevel; 7] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Status,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Fatal,
        LogLevel::Advice,
    ];

    fn offset(self) -> u8 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Status => 2,
            LogLevel::Warn => 3,
            LogLevel::Error => 4,
            LogLevel::Fatal => 5,
            LogLevel::Advice => 6,
        }
    }

    fn from_offset(n: u8) -> Option<LogLevel> {
        Self::ALL.get(n as usize).copied()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Status => "STATUS",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
            LogLevel::Advice => "ADVICE",
        };
        f.write_str(s)
    }
}

/// The base code for `LOG`; the seven levels occupy `LOG_BASE..LOG_BASE+7`.
const LOG_BASE: u8 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Prestart,
    Start,
    Stop,
    Restart,
    Ping,
    StopPending,
    StartPending,
    Started,
    Stopped,
    ChildPid,
    Key,
    BadKey,
    LowLogLevel,
    ServiceControlCode,
    Properties,
    AppProperties,
    AppParameters,
    Log(LogLevel),
    LogFile,
    Pause,
    Resume,
    Gc,
    FireCtrlEvent,
}

impl Code {
    pub fn to_byte(self) -> u8 {
        match self {
            Code::Prestart => 1,
            Code::Start => 2,
            Code::Stop => 3,
            Code::Restart => 4,
            Code::Ping => 5,
            Code::StopPending => 6,
            Code::StartPending => 7,
            Code::Started => 8,
            Code::Stopped => 9,
            Code::ChildPid => 10,
            Code::Key => 11,
            Code::BadKey => 12,
            Code::LowLogLevel => 13,
            Code::ServiceControlCode => 14,
            Code::Properties => 15,
            Code::AppProperties => 16,
            Code::AppParameters => 17,
            Code::Log(level) => LOG_BASE + level.offset(),
            Code::LogFile => 19,
            Code::Pause => 20,
            Code::Resume => 21,
            Code::Gc => 22,
            Code::FireCtrlEvent => 23,
        }
    }

    pub fn from_byte(b: u8) -> Result<Code> {
        if b >= LOG_BASE && b < LOG_BASE + 7 {
            let level = LogLevel::from_offset(b - LOG_BASE).ok_or(Error::UnknownCode(b))?;
            return Ok(Code::Log(level));
        }
        Ok(match b {
            1 => Code::Prestart,
            2 => Code::Start,
            3 => Code::Stop,
            4 => Code::Restart,
            5 => Code::Ping,
            6 => Code::StopPending,
            7 => Code::StartPending,
            8 => Code::Started,
            9 => Code::Stopped,
            10 => Code::ChildPid,
            11 => Code::Key,
            12 => Code::BadKey,
            13 => Code::LowLogLevel,
            14 => Code::ServiceControlCode,
            15 => Code::Properties,
            16 => Code::AppProperties,
            17 => Code::AppParameters,
            19 => Code::LogFile,
            20 => Code::Pause,
            21 => Code::Resume,
            22 => Code::Gc,
            23 => Code::FireCtrlEvent,
            other => return Err(Error::UnknownCode(other)),
        })
    }
}

/// A single decoded (or to-be-encoded) control-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub code: Code,
    pub payload: String,
}

impl Message {
    pub fn new<S: Into<String>>(code: Code, payload: S) -> Self {
        Message {
            code,
            payload: payload.into(),
        }
    }

    /// Encode onto the wire: one code byte, the UTF-8 payload, one NUL.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload.len() + 2);
        buf.push(self.code.to_byte());
        buf.extend_from_slice(self.payload.as_bytes());
        buf.push(0u8);
        buf
    }

    /// Decode a single complete frame (code + payload, NUL already stripped).
    pub fn decode(frame: &[u8]) -> Result<Message> {
        let (&code_byte, payload_bytes) = frame.split_first().ok_or(Error::UnterminatedFrame)?;
        let code = Code::from_byte(code_byte)?;
        let payload = std::str::from_utf8(payload_bytes)?.to_string();
        Ok(Message { code, payload })
    }

    /// Ping responses carry `"<label> <hex-tick>"`; parse out the tick.
    pub fn ping_response_tick(&self) -> Result<Option<u32>> {
        match self.payload.rsplit(' ').next() {
            Some(hex) if !hex.is_empty() => match u32::from_str_radix(hex.trim_start_matches("0x"), 16) {
                Ok(tick) => Ok(Some(tick)),
                Err(_) => Ok(None),
            },
            _ => Ok(None),
        }
    }
}

/// Incremental decoder: feed raw bytes as they arrive off the transport,
/// drain complete frames as they become available. Bytes belonging to a
/// partial trailing frame are retained across calls.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Decoder { buf: Vec::new() }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pull every complete (NUL-terminated) frame currently buffered.
    /// Malformed frames are logged and skipped rather than stopping the
    /// stream, matching the "unknown message code: log at debug, ignore"
    /// error-kind from the protocol design.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        loop {
            let nul_pos = match self.buf.iter().position(|&b| b == 0) {
                Some(p) => p,
                None => break,
            };
            let frame: Vec<u8> = self.buf.drain(..=nul_pos).collect();
            let frame = &frame[..frame.len() - 1];
            match Message::decode(frame) {
                Ok(msg) => out.push(msg),
                Err(err) => log::debug!("dropping malformed control frame: {}", err),
            }
        }
        out
    }
}

pub fn encode(code: Code, payload: &str) -> Vec<u8> {
    Message::new(code, payload).encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_all_codes() {
        let samples = [
            Code::Prestart,
            Code::Start,
            Code::Stop,
            Code::Restart,
            Code::Ping,
            Code::StopPending,
            Code::StartPending,
            Code::Started,
            Code::Stopped,
            Code::ChildPid,
            Code::Key,
            Code::BadKey,
            Code::LowLogLevel,
            Code::ServiceControlCode,
            Code::Properties,
            Code::AppProperties,
            Code::AppParameters,
            Code::Log(LogLevel::Debug),
            Code::Log(LogLevel::Advice),
            Code::LogFile,
            Code::Pause,
            Code::Resume,
            Code::Gc,
            Code::FireCtrlEvent,
        ];
        for code in samples {
            let msg = Message::new(code, "hello there");
            let encoded = msg.encode();
            assert_eq!(encoded.last(), Some(&0u8));
            let decoded = Message::decode(&encoded[..encoded.len() - 1]).unwrap();
            assert_eq!(decoded.code, code);
            assert_eq!(decoded.payload, "hello there");
        }
    }

    #[test]
    fn round_trip_empty_payload() {
        let msg = Message::new(Code::Ping, "");
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded[..encoded.len() - 1]).unwrap();
        assert_eq!(decoded.payload, "");
    }

    #[test]
    fn unknown_code_is_rejected() {
        let frame = [250u8, b'x'];
        assert!(matches!(Message::decode(&frame), Err(Error::UnknownCode(250))));
    }

    #[test]
    fn decoder_splits_multiple_frames_and_retains_partial() {
        let mut dec = Decoder::new();
        let mut bytes = Message::new(Code::Ping, "one").encode();
        bytes.extend(Message::new(Code::Gc, "two").encode());
        bytes.extend_from_slice(&[Code::Stop.to_byte(), b'p', b'a']); // partial, no NUL yet
        dec.push(&bytes);
        let msgs = dec.drain();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].payload, "one");
        assert_eq!(msgs[1].payload, "two");
        assert!(dec.drain().is_empty());
        dec.push(&[b'r', 0u8]);
        let msgs = dec.drain();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].payload, "par");
    }

    #[test]
    fn ping_response_tick_parses_hex_suffix() {
        let msg = Message::new(Code::Ping, "silent 0000000a");
        assert_eq!(msg.ping_response_tick().unwrap(), Some(0x0a));
    }
}
