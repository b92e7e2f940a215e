//! Thin OS-process primitives used by the child lifecycle: liveness checks,
//! signal delivery, and the process-group trick that keeps a child's own
//! `SIGTERM` broadcast from taking down the wrapper.
//!
//! Grounded on `components/launcher/src/sys/unix/service.rs`.

use std::io;
use std::ops::Neg;

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
#[cfg(unix)]
use std::process::ExitStatus;

pub type Pid = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
    Interrupt,
    Hup,
    /// Requests a diagnostic dump from a child that handles it (e.g. a JVM's
    /// thread dump on `SIGQUIT`). Unlike the others, this is advisory: most
    /// children ignore it rather than exiting.
    Quit,
}

#[cfg(unix)]
fn to_libc_signal(sig: Signal) -> libc::c_int {
    match sig {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
        Signal::Interrupt => libc::SIGINT,
        Signal::Hup => libc::SIGHUP,
        Signal::Quit => libc::SIGQUIT,
    }
}

/// Send `sig` to `pid`. `ESRCH` (process already gone) is treated as success,
/// matching spec.md's "if the OS reports the process already gone, the kill
/// is considered successful".
#[cfg(unix)]
pub fn signal(pid: Pid, sig: Signal) -> io::Result<()> {
    let rc = unsafe { libc::kill(pid, to_libc_signal(sig)) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err)
}

#[cfg(windows)]
pub fn signal(_pid: Pid, _sig: Signal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Other,
        "signal delivery is not implemented for this platform",
    ))
}

/// True if a process with this PID currently exists.
#[cfg(unix)]
pub fn is_alive(pid: Pid) -> bool {
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(windows)]
pub fn is_alive(_pid: Pid) -> bool {
    false
}

pub fn current_pid() -> Pid {
    std::process::id() as Pid
}

/// Non-blocking reap of `pid`: `Ok(None)` if still running, `Ok(Some(status))`
/// once it has exited.
#[cfg(unix)]
pub fn try_wait(pid: Pid) -> io::Result<Option<ExitStatus>> {
    let mut status: libc::c_int = 0;
    match unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) } {
        0 => Ok(None),
        n if n == pid => Ok(Some(ExitStatus::from_raw(status))),
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(None),
    }
}

/// Choose which PID to signal when shutting a child down: if the child is
/// the root of its own process group, signal the *group* (negative PID) so
/// grandchildren die with it; otherwise signal the PID directly.
///
/// We always launch children in their own process group (see
/// `child::spawn`) specifically so this is the common case, avoiding
/// orphaned descendants.
#[cfg(unix)]
pub fn pid_to_signal(pid: Pid) -> Pid {
    let pgid = unsafe { libc::getpgid(pid) };
    if pgid == pid {
        pid.neg()
    } else {
        pid
    }
}

#[cfg(windows)]
pub fn pid_to_signal(pid: Pid) -> Pid {
    pid
}

/// Put the calling (about-to-be-exec'd) process into its own process group.
/// Installed as a `pre_exec` hook on the `Command` used to launch the child.
#[cfg(unix)]
pub fn own_process_group() -> io::Result<()> {
    unsafe {
        if libc::setpgid(0, 0) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(current_pid()));
    }

    #[cfg(unix)]
    #[test]
    fn bogus_pid_is_not_alive() {
        // PID 2^30-ish is exceedingly unlikely to be a live process in test
        // sandboxes; this is a best-effort smoke test, not a guarantee.
        assert!(!is_alive(1_073_741_823));
    }
}
