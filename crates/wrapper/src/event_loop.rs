//! The single-threaded cooperative event loop: one iteration advances the
//! tick clock, reaps the child if it exited, drains the control channel and
//! the child's stdout/stderr, polls the anchor/command files, advances the
//! state machine, then sleeps for an adaptively-growing interval.
//!
//! Grounded on `components/launcher/src/server/mod.rs`'s top-level
//! `run_launcher` loop (bind, spawn, accept, then loop: read control
//! messages, check the child, react) for the overall shape, generalised
//! from the teacher's async/channel-select loop to the poll-everything-once-
//! per-iteration cooperative loop spec.md §4.9 and §5 describe — the
//! teacher can afford to block on a channel select because it runs under a
//! multi-threaded tokio runtime; this supervisor may not spawn threads for
//! anything but the narrow exceptions §5 names.

use std::time::Duration;

use wrapper_core::{Tick, TickClock};
use wrapper_protocol::{Code, Message, SessionKey};

use crate::action::Effect;
use crate::child::{self, LaunchedChild, ScopedArg, ShutdownLadder, SpawnRequest, StopStage};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::file_polling::{AnchorPoller, CommandFilePoller};
use crate::line_assembler::{LineAssembler, Utf8OrLatin1};
use crate::supervisor::{ExitDecision, Supervisor};
use crate::transport::{Listener, Transport};

/// `Error::Transport`/`Error::WriteTimedOut` mean the control channel itself
/// is broken, not that the wrapper is broken. spec.md §4.2/§7: close the
/// session and let the child fall through to `STOPPED`/`AUTOMATIC` restart
/// rather than tearing down the whole process.
fn is_transport_error(e: &Error) -> bool {
    matches!(e, Error::Transport(_) | Error::WriteTimedOut)
}

/// Grows `wrapper.main_loop.sleep_step_ms` toward
/// `wrapper.main_loop.max_sleep_ms` after `wrapper.main_loop.step_cycles`
/// consecutive idle iterations, and resets to the minimum the moment any
/// I/O activity is observed (spec.md §4.9).
struct AdaptiveSleep {
    step_ms: u64,
    max_ms: u64,
    step_cycles: u32,
    idle_cycles: u32,
    current_ms: u64,
}

impl AdaptiveSleep {
    fn new(step_ms: u64, step_cycles: u32, max_ms: u64) -> Self {
        AdaptiveSleep {
            step_ms: step_ms.max(1),
            max_ms: max_ms.max(step_ms.max(1)),
            step_cycles: step_cycles.max(1),
            idle_cycles: 0,
            current_ms: step_ms.max(1),
        }
    }

    fn on_activity(&mut self) {
        self.idle_cycles = 0;
        self.current_ms = self.step_ms;
    }

    fn idle(&mut self) -> Duration {
        self.idle_cycles += 1;
        if self.idle_cycles >= self.step_cycles {
            self.idle_cycles = 0;
            self.current_ms = (self.current_ms + self.step_ms).min(self.max_ms);
        }
        Duration::from_millis(self.current_ms)
    }
}

/// Runs one child's full life (launch through exit/restart decision) and
/// returns the process exit code the wrapper should itself exit with, once
/// the caller decides no further restart will happen.
pub struct EventLoop {
    config: Config,
    tick: TickClock,
    sleep: AdaptiveSleep,
    stdout_assembler: LineAssembler<Utf8OrLatin1>,
    stderr_assembler: LineAssembler<Utf8OrLatin1>,
    /// Arguments forwarded verbatim after `--` on the wrapper's own command
    /// line (spec.md §6: "any positional argument after `--` is passed
    /// verbatim to the child").
    extra_args: Vec<ScopedArg>,
}

impl EventLoop {
    pub fn new(config: Config, extra_args: Vec<ScopedArg>) -> Self {
        let tick = if config.use_system_time() {
            TickClock::system_time()
        } else {
            TickClock::tick_thread()
        };
        let sleep = AdaptiveSleep::new(
            config.main_loop_sleep_step_ms(),
            config.main_loop_step_cycles(),
            config.main_loop_max_sleep_ms(),
        );
        EventLoop {
            config,
            tick,
            sleep,
            stdout_assembler: LineAssembler::new(Utf8OrLatin1, 4096, Duration::from_millis(250)),
            stderr_assembler: LineAssembler::new(Utf8OrLatin1, 4096, Duration::from_millis(250)),
            extra_args,
        }
    }

    /// Drive launches end to end: run one, and if it asks for a relaunch
    /// and restarts aren't disabled, sleep `wrapper.restart.delay` and go
    /// again. Returns the exit code the wrapper process itself should use.
    pub fn run(&mut self) -> Result<i32> {
        loop {
            match self.run_one_launch()? {
                Some(code) => return Ok(code),
                None => {
                    if self.config.disable_restarts() {
                        return Ok(self.config.exit_code_error() as i32);
                    }
                    std::thread::sleep(self.config.restart_delay());
                }
            }
        }
    }

    /// Bind the control channel, launch the child, and run until a restart
    /// decision (or permanent stop) is reached. `Ok(None)` means "relaunch
    /// me"; `Ok(Some(code))` means the wrapper should exit with `code`.
    pub fn run_one_launch(&mut self) -> Result<Option<i32>> {
        let listener = Listener::bind(self.config.backend_type(), self.config.port_min(), self.config.port_max())?;
        let mut env: std::collections::HashMap<String, String> = self.config.additional_env()?;
        for (k, v) in listener.child_env() {
            env.insert(k, v);
        }

        let binary = self.config.binary().ok_or_else(|| Error::Config("wrapper.java.command is required".to_string()))?;
        let request = SpawnRequest {
            binary,
            extra_args: self.extra_args.clone(),
            scope: child::Scope::App,
            working_dir: self.config.working_dir().into(),
            env,
            pid_file: self.config.pid_file(),
            pid_file_strict: self.config.pid_file_strict(),
            anchor_file: self.config.anchor_file(),
            lock_file: self.config.lock_file(),
            child_pid_file: self.config.child_pid_file(),
        };

        let mut launched = child::spawn(&request)?;
        let launch_tick = self.tick.now();

        let session_key = SessionKey::generate();
        let mut supervisor = Supervisor::new(
            session_key,
            self.config.ping_queue_capacity(),
            crate::state::RestartBudget::new(self.config.max_failed_invocations(), self.config.successful_invocation_time()),
            self.config.triggers(),
            self.config.ping_timeout_action(),
        );
        supervisor.record_launch(launch_tick);

        let accept_timeout = self.config.startup_timeout().unwrap_or(Duration::from_secs(30));
        let mut transport = match listener.accept(accept_timeout) {
            Ok(transport) => transport,
            Err(e) => {
                child::force_kill(launched.pid)?;
                return Err(e);
            }
        };

        let mut shutdown_ladder: Option<ShutdownLadder> = None;
        let startup_deadline = self.config.startup_timeout().map(|d| self.tick.add_seconds(d.as_secs() as i32));
        let mut next_ping_tick = self.tick.now();
        let mut ping_deadline: Option<Tick> = None;
        // Once the control channel errors out, stop touching it for the
        // rest of this launch: the session is closed and the child is on
        // its way to `STOPPED` via the shutdown ladder below.
        let mut transport_closed = false;

        let mut anchor_poller = self
            .config
            .anchor_file()
            .map(|path| AnchorPoller::new(path, self.config.anchorfile_poll_interval(), launch_tick));
        let mut command_poller = self.config.command_file().map(|path| {
            CommandFilePoller::new(path, self.config.commandfile_poll_interval(), self.config.commandfile_enable_tests(), launch_tick)
        });

        loop {
            if let Some(code) = self.reap_if_exited(&mut launched)? {
                return self.finish_launch(&mut supervisor, code);
            }

            let mut activity = false;

            let now = self.tick.now();

            if !transport_closed {
                match transport.read_messages() {
                    Ok(messages) => {
                        if !messages.is_empty() {
                            activity = true;
                        }
                        for message in messages {
                            if message.code == Code::Ping {
                                ping_deadline = None;
                            }
                            if let Err(e) = self.dispatch(&mut supervisor, &mut transport, &message, now) {
                                self.close_session_on_transport_error(e, &mut supervisor, &mut transport_closed)?;
                                break;
                            }
                        }
                    }
                    Err(e) => self.close_session_on_transport_error(e, &mut supervisor, &mut transport_closed)?,
                }
            }

            if !transport_closed && supervisor.session.is_authenticated() && wrapper_core::tick::expired(now, next_ping_tick) {
                let ping = Message::new(Code::Ping, format!("{:08x}", now));
                match transport.write_message(&ping) {
                    Ok(()) => {
                        supervisor.ping_queue.record_send(now);
                        next_ping_tick = now
                            .wrapping_add(self.config.ping_interval().as_secs() as u32 * wrapper_core::tick::TICKS_PER_SECOND);
                        if let Some(timeout) = self.config.ping_timeout() {
                            ping_deadline = Some(self.tick.add_seconds(timeout.as_secs() as i32));
                        }
                    }
                    Err(e) => self.close_session_on_transport_error(e, &mut supervisor, &mut transport_closed)?,
                }
            }

            if let Some(deadline) = ping_deadline {
                if wrapper_core::tick::expired(self.tick.now(), deadline) {
                    ping_deadline = None;
                    let outcome = supervisor.on_ping_timeout();
                    for (level, line) in outcome.log_lines {
                        log::log!(level, "{}", line);
                    }
                    if !transport_closed {
                        if let Err(e) = self.act_on_effects(&outcome.effects, &mut transport, launched.pid) {
                            self.close_session_on_transport_error(e, &mut supervisor, &mut transport_closed)?;
                        }
                    }
                    activity = true;
                }
            }

            if self.pump_child_output(&mut launched, &mut supervisor, &mut transport, &mut transport_closed)? {
                activity = true;
            }

            if let Some(poller) = anchor_poller.as_mut() {
                if poller.poll_missing(self.tick.now()) {
                    log::warn!("anchor file missing; requesting stop");
                    supervisor.request_stop();
                    activity = true;
                }
            }

            if let Some(poller) = command_poller.as_mut() {
                for action in poller.poll(self.tick.now()) {
                    let outcome = supervisor.on_command(action);
                    for (level, line) in outcome.log_lines {
                        log::log!(level, "{}", line);
                    }
                    if !transport_closed {
                        if let Err(e) = self.act_on_effects(&outcome.effects, &mut transport, launched.pid) {
                            self.close_session_on_transport_error(e, &mut supervisor, &mut transport_closed)?;
                        }
                    }
                    activity = true;
                }
            }

            if let Some(deadline) = startup_deadline {
                if !supervisor.session.is_authenticated() && wrapper_core::tick::expired(self.tick.now(), deadline) {
                    supervisor.on_startup_timeout();
                }
            }

            if supervisor.child.state == crate::state::ChildState::Stop && shutdown_ladder.is_none() {
                shutdown_ladder = Some(ShutdownLadder::new(
                    self.config.shutdown_timeout(),
                    self.config.jvm_exit_timeout(),
                    self.config.jvm_terminate_timeout(),
                ));
                child::request_graceful_stop(launched.pid)?;
            }

            if let Some(ladder) = shutdown_ladder.as_mut() {
                match ladder.tick() {
                    StopStage::WaitForStopped | StopStage::WaitForExit => {}
                    StopStage::RequestDump => {
                        log::warn!("shutdown timed out waiting for STOPPED; requesting a thread dump before killing");
                        child::request_dump(launched.pid)?;
                    }
                    StopStage::ForceKill => {
                        launched.close_stdin();
                        child::force_kill(launched.pid)?;
                    }
                    StopStage::Done => {}
                }
            }

            if activity {
                self.sleep.on_activity();
            } else {
                std::thread::sleep(self.sleep.idle());
            }
        }
    }

    fn dispatch(&self, supervisor: &mut Supervisor, transport: &mut Transport, message: &Message, now: Tick) -> Result<()> {
        match message.code {
            Code::Key => {
                let (_, outcome) = supervisor.on_key(&message.payload);
                for (level, line) in outcome.log_lines {
                    log::log!(level, "{}", line);
                }
                if supervisor.session.is_authenticated() {
                    let burst = crate::session::Session::post_auth_burst(
                        &self.config.low_log_level(),
                        &self.config.log_file().unwrap_or_default(),
                        &self.config.serialized_properties(),
                        &self.config.serialized_app_properties(),
                        &self.config.app_parameters(),
                    );
                    for message in burst {
                        transport.write_message(&message)?;
                    }
                } else {
                    transport.write_message(&Message::new(Code::BadKey, ""))?;
                }
            }
            Code::Started => {
                supervisor.on_started_message(now);
            }
            Code::Stopped => {
                supervisor.on_stopped_message();
            }
            Code::Ping => {
                let tick = message.ping_response_tick().unwrap_or(None);
                supervisor.on_ping_response(tick, now, self.config.ping_alert_threshold().as_secs() as i32 * wrapper_core::tick::TICKS_PER_SECOND as i32);
            }
            Code::Log(_) | Code::LogFile => {}
            other => {
                log::debug!("ignoring unexpected control message: {:?}", other);
            }
        }
        Ok(())
    }

    /// Carries out the I/O side of `Outcome::effects` that `Supervisor`
    /// itself only turns into a state change (spec.md §4.6): `PAUSE`/
    /// `RESUME` either stop the child (`wrapper.pausable.stopjvm`) or send
    /// the matching control message; `GC` always sends `Code::Gc`; `DUMP`
    /// signals the child directly, since there is no wire message for it.
    fn act_on_effects(&self, effects: &[Effect], transport: &mut Transport, child_pid: wrapper_core::Pid) -> Result<()> {
        for effect in effects {
            match effect {
                Effect::RequestPause => {
                    if self.config.pausable() {
                        if self.config.pausable_stop_jvm() {
                            child::request_graceful_stop(child_pid)?;
                        } else {
                            transport.write_message(&Message::new(Code::Pause, ""))?;
                        }
                    }
                }
                Effect::RequestResume => {
                    if self.config.pausable() && !self.config.pausable_stop_jvm() {
                        transport.write_message(&Message::new(Code::Resume, ""))?;
                    }
                }
                Effect::RequestGc => {
                    transport.write_message(&Message::new(Code::Gc, ""))?;
                }
                Effect::RequestDump => {
                    child::request_dump(child_pid)?;
                }
                Effect::None | Effect::RequestRestart | Effect::RequestShutdown | Effect::ResetFailedInvocationCount => {}
            }
        }
        Ok(())
    }

    /// Classifies an error from a transport read/write: a broken channel
    /// closes the session and drives the child toward `STOPPED` (so the
    /// ordinary restart-budget path relaunches it); anything else is a real
    /// failure and still propagates.
    fn close_session_on_transport_error(&self, e: Error, supervisor: &mut Supervisor, transport_closed: &mut bool) -> Result<()> {
        if is_transport_error(&e) {
            log::warn!("control channel error; closing session: {}", e);
            *transport_closed = true;
            supervisor.request_stop();
            Ok(())
        } else {
            Err(e)
        }
    }

    /// Non-blocking drain of whatever is currently available on stdout and
    /// stderr, routed through each stream's `LineAssembler`. Returns whether
    /// any bytes were read (counts as activity for the adaptive sleep).
    fn pump_child_output(
        &mut self,
        launched: &mut LaunchedChild,
        supervisor: &mut Supervisor,
        transport: &mut Transport,
        transport_closed: &mut bool,
    ) -> Result<bool> {
        let mut saw_activity = false;
        let mut buf = [0u8; 4096];

        if let Some(stdout) = launched.stdout.as_mut() {
            if let Ok(n) = try_read(stdout, &mut buf) {
                if n > 0 {
                    saw_activity = true;
                    let lines: Vec<String> = self.stdout_assembler.feed(&buf[..n]);
                    for line in lines {
                        let outcome = supervisor.on_child_line(&line);
                        for (level, msg) in outcome.log_lines {
                            log::log!(level, "{}", msg);
                        }
                        if !*transport_closed {
                            if let Err(e) = self.act_on_effects(&outcome.effects, transport, launched.pid) {
                                self.close_session_on_transport_error(e, supervisor, transport_closed)?;
                            }
                        }
                    }
                }
            }
        }

        if let Some(stderr) = launched.stderr.as_mut() {
            if let Ok(n) = try_read(stderr, &mut buf) {
                if n > 0 {
                    saw_activity = true;
                    let lines: Vec<String> = self.stderr_assembler.feed(&buf[..n]);
                    for line in lines {
                        let outcome = supervisor.on_child_line(&line);
                        for (level, msg) in outcome.log_lines {
                            log::log!(level, "{}", msg);
                        }
                        if !*transport_closed {
                            if let Err(e) = self.act_on_effects(&outcome.effects, transport, launched.pid) {
                                self.close_session_on_transport_error(e, supervisor, transport_closed)?;
                            }
                        }
                    }
                }
            }
        }

        Ok(saw_activity)
    }

    fn reap_if_exited(&mut self, launched: &mut LaunchedChild) -> Result<Option<i32>> {
        launched.try_wait()
    }

    fn finish_launch(&mut self, supervisor: &mut Supervisor, _exit_code: i32) -> Result<Option<i32>> {
        let now = self.tick.now();
        match supervisor.on_child_exit(now) {
            ExitDecision::Relaunch => Ok(None),
            ExitDecision::BudgetExhausted => Ok(Some(self.config.exit_code_error() as i32)),
            ExitDecision::Stop => Ok(Some(0)),
        }
    }
}

/// Treat `WouldBlock` (no data available right now) the same as "read
/// zero bytes", mirroring `transport::RawChannel`'s contract.
fn try_read<R: std::io::Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    match reader.read(buf) {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptive_sleep_grows_after_enough_idle_cycles_then_caps() {
        let mut sleep = AdaptiveSleep::new(50, 2, 200);
        assert_eq!(sleep.idle(), Duration::from_millis(50));
        assert_eq!(sleep.idle(), Duration::from_millis(100));
        assert_eq!(sleep.idle(), Duration::from_millis(100));
        assert_eq!(sleep.idle(), Duration::from_millis(150));
        for _ in 0..20 {
            sleep.idle();
        }
        assert_eq!(sleep.idle(), Duration::from_millis(200));
    }

    #[test]
    fn activity_resets_sleep_to_the_minimum_step() {
        let mut sleep = AdaptiveSleep::new(50, 1, 200);
        sleep.idle();
        sleep.idle();
        assert!(sleep.current_ms > 50);
        sleep.on_activity();
        assert_eq!(sleep.current_ms, 50);
    }
}
