use std::fmt;
use std::result;

#[derive(Debug)]
pub enum Error {
    /// The first byte of a frame did not correspond to a known message code.
    UnknownCode(u8),
    /// The payload was not valid UTF-8.
    InvalidPayload(std::str::Utf8Error),
    /// A frame was missing its terminating NUL byte.
    UnterminatedFrame,
    /// A payload that must carry a hex tick (e.g. a ping response) did not.
    MissingTick,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::UnknownCode(b) => write!(f, "unknown message code: {}", b),
            Error::InvalidPayload(ref e) => write!(f, "invalid UTF-8 payload: {}", e),
            Error::UnterminatedFrame => write!(f, "frame missing NUL terminator"),
            Error::MissingTick => write!(f, "payload missing expected hex tick"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::InvalidPayload(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(e: std::str::Utf8Error) -> Error {
        Error::InvalidPayload(e)
    }
}

pub type Result<T> = result::Result<T, Error>;
