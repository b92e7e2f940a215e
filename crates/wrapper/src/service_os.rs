//! OS service registration: `install`/`remove`/`query` write, delete, and
//! check for a systemd unit file on Unix. Windows SCM registration is not
//! implemented — there is no Windows service crate in this wrapper's
//! dependency graph to ground it on, so the subcommands return
//! `Error::Unsupported` there instead of a half-built integration.
//!
//! Grounded on `components/launcher/src/sys/unix/service.rs` and
//! `components/launcher/src/sys/windows/service.rs`'s platform split: one
//! `service_os` surface, two bodies selected by `cfg(unix)`/`cfg(windows)`.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Where a registered unit lives and what it's named, resolved once from
/// the binary path and a service name the caller supplies (normally the
/// wrapper's configured `wrapper.name` property).
pub struct ServiceSpec {
    pub name: String,
    pub binary: PathBuf,
    pub config_path: PathBuf,
}

#[cfg(unix)]
mod unix {
    use std::fs;
    use std::path::PathBuf;

    use super::ServiceSpec;
    use crate::error::{Error, Result};

    fn unit_path(name: &str) -> PathBuf {
        PathBuf::from(format!("/etc/systemd/system/{}.service", name))
    }

    pub(super) fn unit_contents(spec: &ServiceSpec) -> String {
        format!(
            "[Unit]\n\
             Description={name}\n\
             After=network.target\n\
             \n\
             [Service]\n\
             Type=simple\n\
             ExecStart={binary} console {config}\n\
             Restart=no\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            name = spec.name,
            binary = spec.binary.display(),
            config = spec.config_path.display(),
        )
    }

    /// Write the unit file. Does not reload systemd or enable the unit —
    /// the operator runs `systemctl daemon-reload`/`enable` themselves, the
    /// same hand-off the teacher's install scripts leave to the caller.
    pub fn install(spec: &ServiceSpec) -> Result<PathBuf> {
        let path = unit_path(&spec.name);
        fs::write(&path, unit_contents(spec)).map_err(Error::Spawn)?;
        Ok(path)
    }

    pub fn remove(name: &str) -> Result<()> {
        let path = unit_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Spawn(e)),
        }
    }

    /// Whether a unit file is currently installed for `name`.
    pub fn query(name: &str) -> bool {
        unit_path(name).exists()
    }
}

#[cfg(windows)]
mod windows {
    use super::ServiceSpec;
    use crate::error::{Error, Result};

    pub fn install(_spec: &ServiceSpec) -> Result<std::path::PathBuf> {
        Err(Error::Unsupported("service install"))
    }

    pub fn remove(_name: &str) -> Result<()> {
        Err(Error::Unsupported("service remove"))
    }

    pub fn query(_name: &str) -> bool {
        false
    }
}

#[cfg(unix)]
pub use unix::{install, query, remove};

#[cfg(windows)]
pub use windows::{install, query, remove};

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn unit_contents_name_the_console_invocation() {
        let spec = ServiceSpec {
            name: "myapp".to_string(),
            binary: PathBuf::from("/usr/bin/wrapperd"),
            config_path: PathBuf::from("/etc/myapp/wrapper.conf"),
        };
        let contents = unix::unit_contents(&spec);
        assert!(contents.contains("ExecStart=/usr/bin/wrapperd console /etc/myapp/wrapper.conf"));
        assert!(contents.contains("Description=myapp"));
    }
}
