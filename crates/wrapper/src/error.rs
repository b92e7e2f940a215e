use std::fmt;
use std::io;
use std::path::PathBuf;
use std::result;

use wrapper_core::pidfile;

#[derive(Debug)]
pub enum Error {
    /// A required configuration property was missing or failed validation.
    Config(String),
    /// The property file could not be read.
    ConfigFile(PathBuf, io::Error),
    /// A `set.XXX`-style override referenced a name this wrapper reserves.
    ReservedProperty(String),

    /// Spawning the child process failed outright.
    Spawn(io::Error),
    /// `waitpid`/equivalent failed.
    Wait(io::Error),
    /// Delivering a signal to the child failed (anything but `ESRCH`, which
    /// `wrapper_core::process::signal` already treats as success).
    Signal(io::Error),
    /// The wrapper's own PID/anchor/lock file could not be written.
    PidFile(pidfile::Error),
    /// The configured user/group for the child does not exist.
    UserNotFound(String),
    GroupNotFound(String),

    /// No transport could be bound (all of IPv4/IPv6/pipe failed).
    NoTransportAvailable,
    /// A transport-level I/O error other than `WouldBlock`.
    Transport(io::Error),
    /// The outbound write loop exhausted its deadline without finishing.
    WriteTimedOut,

    /// A fatal error forces the wrapper to exit with a non-zero code.
    Fatal(String),

    /// A CLI subcommand has no implementation on this platform (e.g. OS
    /// service registration on Windows, where there is no SCM crate in the
    /// dependency graph to ground an implementation on).
    Unsupported(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::ConfigFile(path, e) => write!(f, "could not read {}: {}", path.display(), e),
            Error::ReservedProperty(name) => {
                write!(f, "'{}' is a reserved wrapper-controlled environment variable", name)
            }
            Error::Spawn(e) => write!(f, "failed to spawn child: {}", e),
            Error::Wait(e) => write!(f, "failed waiting on child: {}", e),
            Error::Signal(e) => write!(f, "failed to signal child: {}", e),
            Error::PidFile(e) => write!(f, "{}", e),
            Error::UserNotFound(u) => write!(f, "user not found: {}", u),
            Error::GroupNotFound(g) => write!(f, "group not found: {}", g),
            Error::NoTransportAvailable => write!(f, "no control-channel transport could be bound"),
            Error::Transport(e) => write!(f, "transport error: {}", e),
            Error::WriteTimedOut => write!(f, "write to control channel timed out"),
            Error::Fatal(msg) => write!(f, "fatal error: {}", msg),
            Error::Unsupported(what) => write!(f, "{} is not supported on this platform", what),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ConfigFile(_, e) | Error::Spawn(e) | Error::Wait(e) | Error::Signal(e) | Error::Transport(e) => Some(e),
            Error::PidFile(e) => Some(e),
            _ => None,
        }
    }
}

impl From<pidfile::Error> for Error {
    fn from(e: pidfile::Error) -> Self {
        Error::PidFile(e)
    }
}

pub type Result<T> = result::Result<T, Error>;
