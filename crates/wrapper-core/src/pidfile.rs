//! PID / anchor / lock file handling.
//!
//! Grounded on `components/sup/src/manager/service/supervisor.rs`'s
//! `create_pidfile`/`cleanup_pidfile`/`read_pid` trio, generalised to cover
//! the wrapper's PID file, anchor file, and lock file (spec.md §6 Files) —
//! all three are "decimal PID text, written with configured umask/group,
//! deleted on exit", so one type serves all three roles.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::process::Pid;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Corrupt(PathBuf),
    AlreadyExists(PathBuf),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "i/o error: {}", e),
            Error::Corrupt(p) => write!(f, "pid file corrupt: {}", p.display()),
            Error::AlreadyExists(p) => write!(f, "pid file already exists: {}", p.display()),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A PID file (or anchor/lock file, which share the same "decimal PID text"
/// shape) at a fixed path.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        PidFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write `pid` to the file. If `strict` is set and the file already
    /// exists, this is refused (spec.md §4.7: "if the PID file already
    /// exists and the strict flag is set, abort").
    pub fn write(&self, pid: Pid, strict: bool) -> Result<()> {
        if strict && self.path.exists() {
            return Err(Error::AlreadyExists(self.path.clone()));
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = File::create(&self.path)?;
        write!(f, "{}", pid)?;
        Ok(())
    }

    pub fn read(&self) -> Result<Pid> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        match reader.lines().next() {
            Some(Ok(line)) => line
                .trim()
                .parse::<Pid>()
                .map_err(|_| Error::Corrupt(self.path.clone())),
            _ => Err(Error::Corrupt(self.path.clone())),
        }
    }

    /// Remove the file if present. Never fails the caller's operation —
    /// matching the teacher's "do NOT fail if there is an error removing the
    /// PIDFILE" contract.
    pub fn remove(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("removed {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::debug!("error removing {}: {}, continuing", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = std::env::temp_dir().join(format!("wrapperd-pidfile-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let pf = PidFile::new(dir.join("wrapper.pid"));
        pf.write(4242, false).unwrap();
        assert_eq!(pf.read().unwrap(), 4242);
        pf.remove();
        assert!(!pf.exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn strict_mode_refuses_to_clobber() {
        let dir = std::env::temp_dir().join(format!("wrapperd-pidfile-test-strict-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let pf = PidFile::new(dir.join("wrapper.pid"));
        pf.write(1, false).unwrap();
        assert!(matches!(pf.write(2, true), Err(Error::AlreadyExists(_))));
        pf.remove();
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = std::env::temp_dir().join(format!("wrapperd-pidfile-test-corrupt-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("wrapper.pid");
        fs::write(&path, b"not-a-pid\n").unwrap();
        let pf = PidFile::new(&path);
        assert!(matches!(pf.read(), Err(Error::Corrupt(_))));
        fs::remove_dir_all(&dir).ok();
    }
}
