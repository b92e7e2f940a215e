//! The `Supervisor` aggregate: owns every piece of per-child-launch state
//! and exposes the decisions the event loop acts on. No I/O lives here —
//! transport reads/writes and process spawning stay in `event_loop.rs` and
//! `child.rs` so this module can be driven and tested without a real child.
//!
//! Grounded on `components/sup/src/manager/service/supervisor.rs`'s
//! `Supervisor` struct (one aggregate per supervised thing, holding its own
//! state + state_entered timestamp), generalised from a single
//! `ProcessState::{Up,Down}` to the full `WrapperState`/`ChildState`
//! vocabulary and from "one service" to "one JVM-style child with a control
//! channel" (spec.md §9 "Global state": "a `Supervisor` aggregate owned by
//! the event-loop driver and threaded explicitly through operations").

use wrapper_core::tick::Tick;
use wrapper_protocol::SessionKey;

use crate::action::{self, Action, Effect};
use crate::ping::{MatchResult, PingQueue};
use crate::session::{AuthOutcome, Session};
use crate::state::{ChildState, RestartBudget, TimedState, WrapperState};
use crate::trigger::{self, Trigger};

/// What the event loop should do as a result of feeding the supervisor an
/// event. Kept as plain data so `event_loop.rs` stays the only place that
/// touches the transport/process handles.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub effects: Vec<Effect>,
    pub log_lines: Vec<(log::Level, String)>,
}

impl Outcome {
    fn log(level: log::Level, msg: impl Into<String>) -> Self {
        Outcome { effects: Vec::new(), log_lines: vec![(level, msg.into())] }
    }

    fn none() -> Self {
        Outcome::default()
    }

    fn merge(mut self, other: Outcome) -> Self {
        self.effects.extend(other.effects);
        self.log_lines.extend(other.log_lines);
        self
    }
}

pub struct Supervisor {
    pub wrapper_state: WrapperState,
    pub child: TimedState,
    pub session: Session,
    pub ping_queue: PingQueue,
    pub restart_budget: RestartBudget,
    pub triggers: Vec<Trigger>,
    pub ping_timeout_action: Vec<Action>,
    pub shutdown_requested: bool,
    pub launch_tick: Option<Tick>,
}

impl Supervisor {
    pub fn new(
        session_key: SessionKey,
        ping_queue_capacity: usize,
        restart_budget: RestartBudget,
        triggers: Vec<Trigger>,
        ping_timeout_action: Vec<Action>,
    ) -> Self {
        Supervisor {
            wrapper_state: WrapperState::Starting,
            child: TimedState::new(ChildState::DownClean),
            session: Session::new(session_key),
            ping_queue: PingQueue::new(ping_queue_capacity),
            restart_budget,
            triggers,
            ping_timeout_action,
            shutdown_requested: false,
            launch_tick: None,
        }
    }

    /// The single state-transition function every write to `self.child`
    /// goes through: recomputes nothing on its own (callers supply the
    /// deadline) but always logs (spec.md §4.8: "all writes to state go
    /// through a single function that recomputes the timeout tick and
    /// logs the transition").
    fn set_child_state(&mut self, next: TimedState) -> Outcome {
        let previous = self.child.state;
        self.child = next;
        if previous == next.state {
            return Outcome::none();
        }
        Outcome::log(log::Level::Debug, format!("child state {} -> {}", previous, next.state))
    }

    pub fn record_launch(&mut self, now: Tick) {
        self.launch_tick = Some(now);
    }

    /// Handle an incoming `KEY` message.
    pub fn on_key(&mut self, candidate: &str) -> (AuthOutcome, Outcome) {
        let outcome = self.session.authenticate(candidate);
        match outcome {
            AuthOutcome::Authenticated => {
                let log = self.set_child_state(TimedState::new(ChildState::Launched));
                (outcome, log)
            }
            AuthOutcome::Rejected => (outcome, Outcome::log(log::Level::Warn, "rejected KEY from connecting peer")),
        }
    }

    pub fn on_started_message(&mut self, now: Tick) -> Outcome {
        self.wrapper_state = WrapperState::Started;
        self.set_child_state(TimedState::new(ChildState::Started)).merge(self.maybe_start_pinging(now))
    }

    fn maybe_start_pinging(&self, _now: Tick) -> Outcome {
        Outcome::none()
    }

    pub fn on_stopped_message(&mut self) -> Outcome {
        self.set_child_state(TimedState::new(ChildState::Stopped))
    }

    /// A startup/ping timeout fired. Transitions toward `STOP` and, if the
    /// restart budget allows it, marks `AUTOMATIC` restart (spec.md §4.8
    /// scenario 3).
    pub fn on_startup_timeout(&mut self) -> Outcome {
        self.set_child_state(TimedState::new(ChildState::Stop))
            .merge(Outcome::log(log::Level::Error, "startup timeout: child never sent STARTED"))
    }

    /// Process a ping response (or a malformed one with no tick, modelled
    /// as `None`). Returns the effects to dispatch (normally empty unless
    /// the response reveals the ping has timed out).
    pub fn on_ping_response(&mut self, response: Option<Tick>, now: Tick, alert_threshold_ticks: i32) -> Outcome {
        let head = self.ping_queue.pending_head();
        match self.ping_queue.match_response(response) {
            MatchResult::Expected => {
                if let Some(sent) = head {
                    let age = wrapper_core::tick::age_ticks(sent, now);
                    if age >= alert_threshold_ticks {
                        return Outcome::log(log::Level::Warn, format!("slow ping response: {} ticks", age));
                    }
                }
                Outcome::none()
            }
            MatchResult::Lost => Outcome::log(log::Level::Debug, "a pending ping was never answered"),
            MatchResult::Unexpected => {
                if self.ping_queue.overflow_emptied() {
                    Outcome::none()
                } else {
                    Outcome::log(log::Level::Debug, "unexpected ping response")
                }
            }
        }
    }

    /// No ping response arrived within `pingTimeout`: dispatch the
    /// configured action list (default `RESTART`).
    pub fn on_ping_timeout(&mut self) -> Outcome {
        let effects = action::dispatch(&self.ping_timeout_action, self.shutdown_requested);
        self.apply_effects(&effects);
        Outcome { effects, log_lines: vec![(log::Level::Warn, "ping timeout".to_string())] }
    }

    /// A command-file directive: reuses the same action-dispatch path as
    /// ping-timeout actions and trigger matches.
    pub fn on_command(&mut self, action: Action) -> Outcome {
        let effects = action::dispatch(&[action], self.shutdown_requested);
        self.apply_effects(&effects);
        let mut out = Outcome { effects, log_lines: vec![(log::Level::Info, format!("command file directive: {}", action))] };
        if action == Action::Restart || action == Action::Shutdown {
            out = out.merge(self.request_stop());
        }
        out
    }

    /// Feed one line of child output through the trigger engine.
    pub fn on_child_line(&mut self, line: &str) -> Outcome {
        match trigger::first_match(&self.triggers, line) {
            Some(t) => {
                let effects = action::dispatch(&t.actions, self.shutdown_requested);
                self.apply_effects(&effects);
                let mut out = Outcome { effects, log_lines: Vec::new() };
                if let Some(msg) = &t.message {
                    out.log_lines.push((log::Level::Info, msg.clone()));
                }
                out
            }
            None => Outcome::none(),
        }
    }

    /// Applies the parts of `effects` that are pure state transitions.
    /// `RequestDump`/`RequestGc` carry no wrapper-state change of their own
    /// (spec.md §4.6: they're signal/message sends) — `event_loop.rs` acts
    /// on those, and on `RequestPause`/`RequestResume`, against the live
    /// transport and child process.
    fn apply_effects(&mut self, effects: &[Effect]) {
        for effect in effects {
            match effect {
                Effect::RequestShutdown => self.shutdown_requested = true,
                Effect::RequestRestart => {
                    if !self.child.state.stop_request_is_noop() {
                        self.child = TimedState::new(ChildState::Stop);
                    }
                }
                Effect::ResetFailedInvocationCount => self.restart_budget.reset(),
                Effect::RequestPause => self.wrapper_state = WrapperState::Pausing,
                Effect::RequestResume => self.wrapper_state = WrapperState::Resuming,
                Effect::RequestDump | Effect::RequestGc | Effect::None => {}
            }
        }
    }

    /// `requestStop()`: idempotent on every state already on the path to
    /// `DOWN_CLEAN` (spec.md §8).
    pub fn request_stop(&mut self) -> Outcome {
        if self.child.state.stop_request_is_noop() {
            return Outcome::none();
        }
        self.set_child_state(TimedState::new(ChildState::Stop))
    }

    /// The child process exited. Updates the restart budget and reports
    /// whether the wrapper should relaunch.
    pub fn on_child_exit(&mut self, now: Tick) -> ExitDecision {
        let age_seconds = self.launch_tick.map(|t| wrapper_core::tick::age_seconds(t, now).max(0) as u32).unwrap_or(0);
        let exhausted = self.restart_budget.record_exit(age_seconds);
        self.set_child_state(TimedState::new(ChildState::DownCheck));
        if self.shutdown_requested {
            ExitDecision::Stop
        } else if exhausted {
            ExitDecision::BudgetExhausted
        } else {
            ExitDecision::Relaunch
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    Relaunch,
    BudgetExhausted,
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RestartBudget;
    use wrapper_protocol::SessionKey;

    fn sup() -> Supervisor {
        Supervisor::new(
            SessionKey::from("abcd1234abcd1234".to_string()),
            16,
            RestartBudget::new(3, 300),
            Vec::new(),
            Action::default_ping_timeout_action(),
        )
    }

    #[test]
    fn correct_key_moves_child_to_launched() {
        let mut s = sup();
        let (outcome, _) = s.on_key("abcd1234abcd1234");
        assert_eq!(outcome, AuthOutcome::Authenticated);
        assert_eq!(s.child.state, ChildState::Launched);
    }

    #[test]
    fn wrong_key_leaves_state_unchanged() {
        let mut s = sup();
        let before = s.child.state;
        let (outcome, _) = s.on_key("nope");
        assert_eq!(outcome, AuthOutcome::Rejected);
        assert_eq!(s.child.state, before);
    }

    #[test]
    fn started_message_moves_wrapper_and_child_to_started() {
        let mut s = sup();
        s.on_started_message(0);
        assert_eq!(s.wrapper_state, WrapperState::Started);
        assert_eq!(s.child.state, ChildState::Started);
    }

    #[test]
    fn shutdown_trigger_latches_and_suppresses_restart() {
        let mut s = sup();
        s.triggers = vec![Trigger::new("OutOfMemoryError".to_string(), false, vec![Action::Shutdown], None)];
        s.on_child_line("java.lang.OutOfMemoryError: heap space");
        assert!(s.shutdown_requested);

        let decision = s.on_child_exit(100);
        assert_eq!(decision, ExitDecision::Stop);
    }

    #[test]
    fn restart_budget_exhaustion_is_reported() {
        let mut s = sup();
        s.record_launch(0);
        assert_eq!(s.on_child_exit(1), ExitDecision::Relaunch);
        s.record_launch(1);
        assert_eq!(s.on_child_exit(2), ExitDecision::Relaunch);
        s.record_launch(2);
        assert_eq!(s.on_child_exit(3), ExitDecision::BudgetExhausted);
    }

    #[test]
    fn request_stop_is_a_noop_once_already_stopping() {
        let mut s = sup();
        s.child = TimedState::new(ChildState::Stopping);
        let outcome = s.request_stop();
        assert!(outcome.effects.is_empty());
        assert!(outcome.log_lines.is_empty());
        assert_eq!(s.child.state, ChildState::Stopping);
    }

    #[test]
    fn pause_and_resume_commands_move_wrapper_state() {
        let mut s = sup();
        s.on_command(Action::Pause);
        assert_eq!(s.wrapper_state, WrapperState::Pausing);
        s.on_command(Action::Resume);
        assert_eq!(s.wrapper_state, WrapperState::Resuming);
    }

    #[test]
    fn dump_and_gc_commands_report_their_effect_without_changing_wrapper_state() {
        let mut s = sup();
        let before = s.wrapper_state;
        let dump = s.on_command(Action::Dump);
        assert!(dump.effects.contains(&Effect::RequestDump));
        let gc = s.on_command(Action::Gc);
        assert!(gc.effects.contains(&Effect::RequestGc));
        assert_eq!(s.wrapper_state, before);
    }
}
