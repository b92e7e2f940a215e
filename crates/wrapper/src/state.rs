//! The two state machines that make up the supervisor: `WrapperState` (the
//! wrapper's own lifecycle) and `ChildState` (what the launched process is
//! doing right now), plus the restart budget that gates automatic relaunch.
//!
//! Grounded on `components/sup/src/manager/service/supervisor.rs`'s
//! `Supervisor::change_state` (a single function that updates state and
//! records when it was entered), generalised from the teacher's two-state
//! `ProcessState::{Up,Down}` to the full vocabulary spec.md §3 requires.

use std::fmt;

use wrapper_core::tick::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperState {
    Starting,
    Started,
    Pausing,
    Paused,
    Resuming,
    Stopping,
    Stopped,
}

impl fmt::Display for WrapperState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            WrapperState::Starting => "STARTING",
            WrapperState::Started => "STARTED",
            WrapperState::Pausing => "PAUSING",
            WrapperState::Paused => "PAUSED",
            WrapperState::Resuming => "RESUMING",
            WrapperState::Stopping => "STOPPING",
            WrapperState::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    DownClean,
    LaunchDelay,
    Restart,
    Launch,
    Launching,
    Launched,
    Starting,
    Started,
    Stop,
    Stopping,
    Stopped,
    Killing,
    Kill,
    Killed,
    DownCheck,
    DownFlushStdin,
    DownFlush,
}

impl fmt::Display for ChildState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ChildState::DownClean => "DOWN_CLEAN",
            ChildState::LaunchDelay => "LAUNCH_DELAY",
            ChildState::Restart => "RESTART",
            ChildState::Launch => "LAUNCH",
            ChildState::Launching => "LAUNCHING",
            ChildState::Launched => "LAUNCHED",
            ChildState::Starting => "STARTING",
            ChildState::Started => "STARTED",
            ChildState::Stop => "STOP",
            ChildState::Stopping => "STOPPING",
            ChildState::Stopped => "STOPPED",
            ChildState::Killing => "KILLING",
            ChildState::Kill => "KILL",
            ChildState::Killed => "KILLED",
            ChildState::DownCheck => "DOWN_CHECK",
            ChildState::DownFlushStdin => "DOWN_FLUSH_STDIN",
            ChildState::DownFlush => "DOWN_FLUSH",
        };
        f.write_str(s)
    }
}

impl ChildState {
    /// `requestStop()` while already on a path toward `DOWN_CLEAN` is a
    /// no-op (spec.md §8's idempotence law).
    pub fn stop_request_is_noop(self) -> bool {
        matches!(
            self,
            ChildState::Stop
                | ChildState::Stopping
                | ChildState::Stopped
                | ChildState::Killing
                | ChildState::Kill
                | ChildState::Killed
                | ChildState::DownCheck
                | ChildState::DownFlushStdin
                | ChildState::DownFlush
                | ChildState::DownClean
        )
    }

    /// §4.2's session gating table: is a read permitted in this state.
    pub fn read_allowed(self) -> bool {
        matches!(
            self,
            ChildState::Launching
                | ChildState::Launched
                | ChildState::Starting
                | ChildState::Started
                | ChildState::Stop
                | ChildState::Stopping
        )
    }

    /// Whether a write is permitted at all (the `BADKEY`-only carve-out for
    /// pre-`KEY` `LAUNCHING` is handled by the caller, not here).
    pub fn write_allowed(self) -> bool {
        matches!(
            self,
            ChildState::Launched | ChildState::Starting | ChildState::Started | ChildState::Stopping
        )
    }
}

/// A `ChildState` plus the absolute tick at which it times out (`None`
/// disables the timeout).
#[derive(Debug, Clone, Copy)]
pub struct TimedState {
    pub state: ChildState,
    pub timeout_tick: Option<Tick>,
}

impl TimedState {
    pub fn new(state: ChildState) -> Self {
        TimedState { state, timeout_tick: None }
    }

    pub fn with_timeout(state: ChildState, deadline: Tick) -> Self {
        TimedState { state, timeout_tick: Some(deadline) }
    }

    pub fn is_expired(&self, now: Tick) -> bool {
        match self.timeout_tick {
            Some(deadline) => wrapper_core::tick::expired(now, deadline),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartMode {
    Initial,
    No,
    Automatic,
    Configured,
}

/// Tracks consecutive "failed" invocations (exits within
/// `successful_invocation_time` of their own launch) and disables further
/// automatic restarts once `max_failed_invocations` is reached (spec.md
/// §4.8).
#[derive(Debug, Clone, Copy)]
pub struct RestartBudget {
    pub failed_invocation_count: u32,
    pub max_failed_invocations: u32,
    pub successful_invocation_time: u32,
}

impl RestartBudget {
    pub fn new(max_failed_invocations: u32, successful_invocation_time: u32) -> Self {
        RestartBudget {
            failed_invocation_count: 0,
            max_failed_invocations,
            successful_invocation_time,
        }
    }

    /// Record an exit that happened `age_seconds` after launch. Returns
    /// `true` if the restart budget is now exhausted.
    pub fn record_exit(&mut self, age_seconds: u32) -> bool {
        if age_seconds < self.successful_invocation_time {
            self.failed_invocation_count += 1;
        } else {
            self.failed_invocation_count = 0;
        }
        self.exhausted()
    }

    pub fn exhausted(&self) -> bool {
        self.max_failed_invocations != 0 && self.failed_invocation_count >= self.max_failed_invocations
    }

    /// `SUCCESS` action or a sufficiently long uptime resets the counter.
    pub fn reset(&mut self) {
        self.failed_invocation_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_request_is_idempotent_on_the_shutdown_path() {
        for state in [
            ChildState::Stop,
            ChildState::Stopping,
            ChildState::Stopped,
            ChildState::Killing,
            ChildState::Kill,
            ChildState::Killed,
            ChildState::DownCheck,
            ChildState::DownFlushStdin,
            ChildState::DownFlush,
            ChildState::DownClean,
        ] {
            assert!(state.stop_request_is_noop(), "{:?} should be a no-op stop target", state);
        }
        assert!(!ChildState::Started.stop_request_is_noop());
    }

    #[test]
    fn session_gating_matches_spec_table() {
        assert!(ChildState::Launching.read_allowed());
        assert!(!ChildState::Launching.write_allowed());
        assert!(ChildState::Started.read_allowed());
        assert!(ChildState::Started.write_allowed());
        assert!(!ChildState::DownClean.read_allowed());
        assert!(!ChildState::Killed.write_allowed());
    }

    #[test]
    fn restart_budget_trips_after_max_failed_invocations() {
        let mut budget = RestartBudget::new(3, 300);
        assert!(!budget.record_exit(10));
        assert!(!budget.record_exit(10));
        assert!(budget.record_exit(10));
        assert!(budget.exhausted());
    }

    #[test]
    fn a_long_lived_exit_does_not_count_against_the_budget() {
        let mut budget = RestartBudget::new(3, 300);
        budget.record_exit(10);
        budget.record_exit(10);
        assert!(!budget.record_exit(400));
        assert_eq!(budget.failed_invocation_count, 0);
    }

    #[test]
    fn success_action_resets_the_budget() {
        let mut budget = RestartBudget::new(3, 300);
        budget.record_exit(10);
        budget.record_exit(10);
        budget.reset();
        assert_eq!(budget.failed_invocation_count, 0);
        assert!(!budget.exhausted());
    }

    #[test]
    fn zero_max_failed_invocations_means_unbounded_restarts() {
        let mut budget = RestartBudget::new(0, 300);
        for _ in 0..10 {
            budget.record_exit(1);
        }
        assert!(!budget.exhausted());
    }
}
