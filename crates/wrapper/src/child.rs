//! Child process lifecycle: argv assembly, spawn, PID/anchor/lock file
//! bookkeeping, and the graceful-stop → forced-kill escalation ladder.
//!
//! Grounded on `components/launcher/src/server/mod.rs::spawn_supervisor`
//! (env-var handshake before spawn) and
//! `components/launcher/src/sys/unix/service.rs::Process` (PID tracking,
//! `pid_to_signal`, kill escalation), generalised to the full scope-aware
//! argv assembly and anchor/lock-file handling spec.md §4.7 describes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use wrapper_core::pidfile::PidFile;
use wrapper_core::process::{self, Pid};

use crate::error::{Error, Result};

/// Put a child's stdio pipe into non-blocking mode so the event loop can
/// poll it the same way it polls the control channel, instead of needing a
/// dedicated blocking reader thread.
#[cfg(unix)]
fn set_nonblocking(fd: std::os::unix::io::RawFd) -> std::io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Which invocation this argv assembly is for. A bootstrap/dry-run probe
/// must not see arguments that would confuse it (spec.md §4.7, §9 "Option
/// scope").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Bootstrap,
    DryRun,
    App,
}

/// One user-configured additional argument, tagged with the scopes it
/// applies to.
#[derive(Debug, Clone)]
pub struct ScopedArg {
    pub value: String,
    pub scopes: Vec<Scope>,
}

impl ScopedArg {
    pub fn always<S: Into<String>>(value: S) -> Self {
        ScopedArg { value: value.into(), scopes: vec![Scope::Bootstrap, Scope::DryRun, Scope::App] }
    }

    pub fn app_only<S: Into<String>>(value: S) -> Self {
        ScopedArg { value: value.into(), scopes: vec![Scope::App] }
    }
}

/// Build the argument vector for a given invocation scope, filtering out
/// anything not tagged for it.
pub fn build_argv(binary: &str, extra_args: &[ScopedArg], scope: Scope) -> Vec<String> {
    let mut argv = vec![binary.to_string()];
    for arg in extra_args {
        if arg.scopes.contains(&scope) {
            argv.push(arg.value.clone());
        }
    }
    argv
}

pub struct SpawnRequest {
    pub binary: String,
    pub extra_args: Vec<ScopedArg>,
    pub scope: Scope,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    pub pid_file: Option<PathBuf>,
    pub pid_file_strict: bool,
    pub anchor_file: Option<PathBuf>,
    pub lock_file: Option<PathBuf>,
    pub child_pid_file: Option<PathBuf>,
}

/// A launched child: its reported PID (possibly re-exec'd, see
/// `reconcile_pid`) and the handle used to reap it.
pub struct LaunchedChild {
    pub pid: Pid,
    handle: Child,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    stdin: Option<ChildStdin>,
}

impl LaunchedChild {
    pub fn try_wait(&mut self) -> Result<Option<i32>> {
        match self.handle.try_wait() {
            Ok(Some(status)) => Ok(Some(status.code().unwrap_or(-1))),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::Wait(e)),
        }
    }

    /// Close the child's stdin, the `DOWN_FLUSH_STDIN` step of the cleanup
    /// ladder (spec.md §4.8).
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }
}

/// Write the wrapper's PID/anchor/lock files, refusing to clobber an
/// existing strict PID file, then spawn the child with its own process
/// group (so a later group-signal kill doesn't also hit the wrapper).
pub fn spawn(request: &SpawnRequest) -> Result<LaunchedChild> {
    if let Some(path) = &request.pid_file {
        let pidfile = PidFile::new(path.clone());
        pidfile.write(process::current_pid(), request.pid_file_strict)?;
    }
    for path in [&request.anchor_file, &request.lock_file].into_iter().flatten() {
        PidFile::new(path.clone()).write(process::current_pid(), false)?;
    }

    let argv = build_argv(&request.binary, &request.extra_args, request.scope);
    let mut command = Command::new(&argv[0]);
    command
        .args(&argv[1..])
        .current_dir(&request.working_dir)
        .envs(&request.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    unsafe {
        use std::os::unix::process::CommandExt;
        command.pre_exec(|| process::own_process_group());
    }

    let mut handle = command.spawn().map_err(Error::Spawn)?;
    let pid = handle.id() as Pid;

    if let Some(path) = &request.child_pid_file {
        PidFile::new(path.clone()).write(pid, false)?;
    }

    let stdout = handle.stdout.take();
    let stderr = handle.stderr.take();
    let stdin = handle.stdin.take();

    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        if let Some(out) = &stdout {
            set_nonblocking(out.as_raw_fd()).map_err(Error::Spawn)?;
        }
        if let Some(err) = &stderr {
            set_nonblocking(err.as_raw_fd()).map_err(Error::Spawn)?;
        }
    }

    Ok(LaunchedChild { pid, handle, stdout, stderr, stdin })
}

/// If the backend reports a different PID than the one we launched (some
/// platforms re-exec through a redirector), switch to monitoring that PID;
/// otherwise keep watching the one we have (spec.md §4.7 "Monitor").
pub fn reconcile_pid(launched_pid: Pid, reported_pid: Option<Pid>) -> Pid {
    match reported_pid {
        Some(reported) if reported != launched_pid => {
            log::warn!("child re-exec'd: launched pid {} but backend reports {}", launched_pid, reported);
            reported
        }
        _ => launched_pid,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStage {
    WaitForStopped,
    WaitForExit,
    RequestDump,
    ForceKill,
    Done,
}

/// Drives the graceful-stop escalation ladder: `STOP` sent → wait
/// `shutdownTimeout` for a `STOPPED` message → wait `jvmExitTimeout` for
/// process exit → request a dump → wait `jvmTerminateTimeout` → forced kill
/// (spec.md §4.7).
pub struct ShutdownLadder {
    stage: StopStage,
    stage_entered: Instant,
    shutdown_timeout: Duration,
    jvm_exit_timeout: Duration,
    jvm_terminate_timeout: Duration,
}

impl ShutdownLadder {
    pub fn new(shutdown_timeout: Duration, jvm_exit_timeout: Duration, jvm_terminate_timeout: Duration) -> Self {
        ShutdownLadder {
            stage: StopStage::WaitForStopped,
            stage_entered: Instant::now(),
            shutdown_timeout,
            jvm_exit_timeout,
            jvm_terminate_timeout,
        }
    }

    pub fn stage(&self) -> StopStage {
        self.stage
    }

    pub fn on_stopped_message(&mut self) {
        if self.stage == StopStage::WaitForStopped {
            self.advance(StopStage::WaitForExit);
        }
    }

    pub fn on_process_exit(&mut self) {
        self.stage = StopStage::Done;
    }

    fn advance(&mut self, next: StopStage) {
        self.stage = next;
        self.stage_entered = Instant::now();
    }

    /// Advance the ladder based on elapsed time; returns the (possibly new)
    /// stage for the caller to act on.
    pub fn tick(&mut self) -> StopStage {
        let elapsed = self.stage_entered.elapsed();
        match self.stage {
            StopStage::WaitForStopped if elapsed >= self.shutdown_timeout => {
                self.advance(StopStage::WaitForExit);
            }
            StopStage::WaitForExit if elapsed >= self.jvm_exit_timeout => {
                self.advance(StopStage::RequestDump);
            }
            StopStage::RequestDump if elapsed >= self.jvm_terminate_timeout => {
                self.advance(StopStage::ForceKill);
            }
            _ => {}
        }
        self.stage
    }
}

/// Send `TERM` (or the group-targeted equivalent); `ESRCH` is already
/// treated as success by `wrapper_core::process::signal`.
pub fn request_graceful_stop(pid: Pid) -> Result<()> {
    process::signal(process::pid_to_signal(pid), process::Signal::Term).map_err(Error::Signal)
}

/// Final escalation: `KILL`, unconditionally.
pub fn force_kill(pid: Pid) -> Result<()> {
    process::signal(process::pid_to_signal(pid), process::Signal::Kill).map_err(Error::Signal)
}

/// Ask the child to dump its internal diagnostics (spec.md §4.6 `DUMP`):
/// a platform signal, not a control-channel message.
pub fn request_dump(pid: Pid) -> Result<()> {
    process::signal(process::pid_to_signal(pid), process::Signal::Quit).map_err(Error::Signal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_argv_filters_by_scope() {
        let args = vec![
            ScopedArg::always("--conf=app.conf"),
            ScopedArg { value: "--dry-run".to_string(), scopes: vec![Scope::DryRun] },
            ScopedArg::app_only("--serve"),
        ];
        let bootstrap = build_argv("/usr/bin/app", &args, Scope::Bootstrap);
        assert_eq!(bootstrap, vec!["/usr/bin/app", "--conf=app.conf"]);

        let app = build_argv("/usr/bin/app", &args, Scope::App);
        assert_eq!(app, vec!["/usr/bin/app", "--conf=app.conf", "--serve"]);
    }

    #[test]
    fn reconcile_pid_switches_when_backend_reports_a_different_pid() {
        assert_eq!(reconcile_pid(100, Some(200)), 200);
        assert_eq!(reconcile_pid(100, Some(100)), 100);
        assert_eq!(reconcile_pid(100, None), 100);
    }

    #[test]
    fn shutdown_ladder_starts_waiting_for_stopped_message() {
        let ladder = ShutdownLadder::new(Duration::from_secs(30), Duration::from_secs(15), Duration::from_secs(5));
        assert_eq!(ladder.stage(), StopStage::WaitForStopped);
    }

    #[test]
    fn stopped_message_advances_past_the_first_wait() {
        let mut ladder = ShutdownLadder::new(Duration::from_secs(30), Duration::from_secs(15), Duration::from_secs(5));
        ladder.on_stopped_message();
        assert_eq!(ladder.stage(), StopStage::WaitForExit);
    }

    #[test]
    fn timeouts_escalate_through_every_stage() {
        let mut ladder = ShutdownLadder::new(Duration::from_millis(1), Duration::from_millis(1), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(ladder.tick(), StopStage::WaitForExit);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(ladder.tick(), StopStage::RequestDump);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(ladder.tick(), StopStage::ForceKill);
    }

    #[test]
    fn process_exit_short_circuits_to_done_from_any_stage() {
        let mut ladder = ShutdownLadder::new(Duration::from_secs(30), Duration::from_secs(15), Duration::from_secs(5));
        ladder.on_process_exit();
        assert_eq!(ladder.stage(), StopStage::Done);
    }
}
