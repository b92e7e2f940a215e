//! Action dispatcher: ordered action lists executed in response to a ping
//! timeout, a trigger match, or a command-file directive.
//!
//! Grounded on `components/launcher/src/server/handlers/{restart,terminate}.rs`
//! for the shape of "take an action against the running child and report
//! what happened", generalised to the full action vocabulary in spec.md §4.6.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Masks lower-priority triggers later in the *same* action list.
    /// Processing continues to the next action in the list.
    None,
    Restart,
    Shutdown,
    Dump,
    Debug,
    Pause,
    Resume,
    Success,
    Gc,
    AdviceRestart,
    AdviceStop,
    AdviceStart,
}

impl Action {
    pub fn default_ping_timeout_action() -> Vec<Action> {
        vec![Action::Restart]
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Action::None => "NONE",
            Action::Restart => "RESTART",
            Action::Shutdown => "SHUTDOWN",
            Action::Dump => "DUMP",
            Action::Debug => "DEBUG",
            Action::Pause => "PAUSE",
            Action::Resume => "RESUME",
            Action::Success => "SUCCESS",
            Action::Gc => "GC",
            Action::AdviceRestart => "ADVICE_RESTART",
            Action::AdviceStop => "ADVICE_STOP",
            Action::AdviceStart => "ADVICE_START",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct UnknownAction(pub String);

impl fmt::Display for UnknownAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown action: {}", self.0)
    }
}

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Action::None,
            "RESTART" => Action::Restart,
            "SHUTDOWN" => Action::Shutdown,
            "DUMP" => Action::Dump,
            "DEBUG" => Action::Debug,
            "PAUSE" => Action::Pause,
            "RESUME" => Action::Resume,
            "SUCCESS" => Action::Success,
            "GC" => Action::Gc,
            "ADVICE_RESTART" => Action::AdviceRestart,
            "ADVICE_STOP" => Action::AdviceStop,
            "ADVICE_START" => Action::AdviceStart,
            other => return Err(UnknownAction(other.to_string())),
        })
    }
}

/// Parse a `|`-delimited (JSW-style) or `,`-delimited action list, e.g.
/// `"DEBUG,RESTART"`. Unknown entries are reported, never silently dropped.
pub fn parse_action_list(s: &str) -> Result<Vec<Action>, UnknownAction> {
    s.split(|c| c == ',' || c == '|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Action::from_str)
        .collect()
}

/// What the event loop should do after executing an action list, reported
/// back up to the supervisor so it can update `WrapperState`/`ChildState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Nothing the supervisor needs to act on beyond logging.
    None,
    RequestRestart,
    RequestShutdown,
    RequestDump,
    RequestPause,
    RequestResume,
    RequestGc,
    ResetFailedInvocationCount,
}

/// Execute an action list in order. `NONE` masks every action that follows
/// it in *this* list (spec.md §4.6); it does not affect later lists. A
/// `shutdown_requested` latch (owned by the caller) suppresses `RESTART`
/// once `SHUTDOWN` has fired, for the remaining lifetime of the wrapper.
pub fn dispatch(actions: &[Action], shutdown_requested: bool) -> Vec<Effect> {
    let mut effects = Vec::new();
    let mut masked = false;
    for action in actions {
        if masked {
            break;
        }
        match action {
            Action::None => masked = true,
            Action::Restart => {
                if !shutdown_requested {
                    effects.push(Effect::RequestRestart);
                }
            }
            Action::Shutdown => effects.push(Effect::RequestShutdown),
            Action::Dump => effects.push(Effect::RequestDump),
            Action::Debug => log::debug!("action list reached DEBUG marker"),
            Action::Pause => effects.push(Effect::RequestPause),
            Action::Resume => effects.push(Effect::RequestResume),
            Action::Success => effects.push(Effect::ResetFailedInvocationCount),
            Action::Gc => effects.push(Effect::RequestGc),
            Action::AdviceRestart => log::info!("ADVICE: a restart is recommended"),
            Action::AdviceStop => log::info!("ADVICE: a stop is recommended"),
            Action::AdviceStart => log::info!("ADVICE: a start is recommended"),
        }
    }
    effects
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_masks_the_rest_of_the_list() {
        let effects = dispatch(&[Action::Debug, Action::None, Action::Restart], false);
        assert!(!effects.contains(&Effect::RequestRestart));
    }

    #[test]
    fn shutdown_suppresses_restart_in_same_list() {
        let effects = dispatch(&[Action::Restart, Action::Shutdown], false);
        assert!(effects.contains(&Effect::RequestRestart));
        assert!(effects.contains(&Effect::RequestShutdown));
    }

    #[test]
    fn restart_is_suppressed_once_shutdown_is_latched() {
        let effects = dispatch(&[Action::Restart], true);
        assert!(!effects.contains(&Effect::RequestRestart));
    }

    #[test]
    fn parse_action_list_accepts_comma_and_pipe() {
        assert_eq!(
            parse_action_list("RESTART,DUMP").unwrap(),
            vec![Action::Restart, Action::Dump]
        );
        assert_eq!(
            parse_action_list("RESTART|DUMP").unwrap(),
            vec![Action::Restart, Action::Dump]
        );
    }

    #[test]
    fn parse_action_list_rejects_unknown() {
        assert!(parse_action_list("RESTART,BOGUS").is_err());
    }
}
