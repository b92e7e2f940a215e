//! Anchor-file and command-file polling: step 5 of the event loop
//! (spec.md §4.9). Both are plain files on a fixed poll interval, so they
//! share the "has the interval elapsed" bookkeeping; what they do with the
//! file differs.
//!
//! Grounded on `wrapper_core::pidfile::PidFile`'s "a file on disk is the
//! whole piece of state" shape, generalised from "holds a PID" to "holds a
//! liveness anchor" and "holds queued command words".

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use wrapper_core::tick::{expired, Tick, TICKS_PER_SECOND};

use crate::action::Action;

fn interval_ticks(interval: Duration) -> u32 {
    (interval.as_secs() as u32 * TICKS_PER_SECOND).max(1)
}

/// Polls for the continued existence of the anchor file spec.md §6
/// describes. Its disappearance is an external signal to stop, the same
/// role the teacher's PID file plays in reverse (presence means "running";
/// here, presence means "keep running").
pub struct AnchorPoller {
    path: PathBuf,
    interval_ticks: u32,
    next_poll: Tick,
}

impl AnchorPoller {
    pub fn new(path: PathBuf, poll_interval: Duration, now: Tick) -> Self {
        AnchorPoller { path, interval_ticks: interval_ticks(poll_interval), next_poll: now }
    }

    /// `true` the first (and every subsequent) poll after the file is found
    /// missing; the caller is expected to request a stop in response, which
    /// is idempotent once already underway.
    pub fn poll_missing(&mut self, now: Tick) -> bool {
        if !expired(now, self.next_poll) {
            return false;
        }
        self.next_poll = now.wrapping_add(self.interval_ticks);
        !self.path.exists()
    }
}

/// Polls the command file and, once its interval elapses, consumes
/// (truncates) whatever directives it holds. Command-file lines share the
/// same action vocabulary as trigger and ping-timeout-action lists
/// (spec.md §6: "lines direct runtime actions").
pub struct CommandFilePoller {
    path: PathBuf,
    interval_ticks: u32,
    next_poll: Tick,
    enable_tests: bool,
}

impl CommandFilePoller {
    pub fn new(path: PathBuf, poll_interval: Duration, enable_tests: bool, now: Tick) -> Self {
        CommandFilePoller { path, interval_ticks: interval_ticks(poll_interval), next_poll: now, enable_tests }
    }

    /// Read and clear the file if the interval has elapsed. Unknown
    /// directives are logged and dropped rather than treated as fatal
    /// (spec.md §7's "unknown directive: log + ignore" error-kind).
    pub fn poll(&mut self, now: Tick) -> Vec<Action> {
        if !expired(now, self.next_poll) {
            return Vec::new();
        }
        self.next_poll = now.wrapping_add(self.interval_ticks);

        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(_) => return Vec::new(),
        };
        if text.trim().is_empty() {
            return Vec::new();
        }
        fs::write(&self.path, "").ok();

        text.lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    return None;
                }
                if line.eq_ignore_ascii_case("TEST") {
                    if self.enable_tests {
                        log::info!("command file test directive received");
                    }
                    return None;
                }
                match line.parse::<Action>() {
                    Ok(action) => Some(action),
                    Err(e) => {
                        log::debug!("ignoring unknown command-file directive: {}", e);
                        None
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_poller_only_reports_missing_after_the_interval_elapses() {
        let dir = std::env::temp_dir().join(format!("wrapperd-anchor-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("anchor");
        std::fs::write(&path, "1").unwrap();

        let mut poller = AnchorPoller::new(path.clone(), Duration::from_secs(1), 0);
        assert!(!poller.poll_missing(0), "interval hasn't elapsed yet");

        let later = TICKS_PER_SECOND + 1;
        assert!(!poller.poll_missing(later), "file still exists");

        std::fs::remove_file(&path).unwrap();
        let even_later = later + TICKS_PER_SECOND + 1;
        assert!(poller.poll_missing(even_later));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn command_poller_parses_and_clears_recognised_directives() {
        let dir = std::env::temp_dir().join(format!("wrapperd-cmdfile-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("commands");
        std::fs::write(&path, "restart\nbogus\n").unwrap();

        let mut poller = CommandFilePoller::new(path.clone(), Duration::from_secs(1), false, 0);
        let actions = poller.poll(TICKS_PER_SECOND + 1);
        assert_eq!(actions, vec![Action::Restart]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn command_poller_ignores_test_directive_when_disabled() {
        let dir = std::env::temp_dir().join(format!("wrapperd-cmdfile-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("commands");
        std::fs::write(&path, "TEST\n").unwrap();

        let mut poller = CommandFilePoller::new(path.clone(), Duration::from_secs(1), false, 0);
        let actions = poller.poll(TICKS_PER_SECOND + 1);
        assert!(actions.is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }
}
