//! Session gating and the authentication handshake: wraps a
//! `wrapper_protocol::SessionKey` with the read/write permission table from
//! spec.md §4.2 and the post-`KEY` burst-send sequencing.
//!
//! Grounded on `components/launcher/src/server/mod.rs`'s `setup_connection`
//! (bind, accept, exchange exactly one handshake message, then proceed) for
//! the "authenticate once, then gate everything else on state" shape.

use wrapper_protocol::{Code, Message, SessionKey};

use crate::state::ChildState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// `KEY` matched: the caller should transition `ChildState` to
    /// `Launched` and send the post-auth burst.
    Authenticated,
    /// `KEY` did not match: send `BADKEY` and close, but do *not* change
    /// state (spec.md §4.2: a legitimate peer may still be connecting).
    Rejected,
}

/// One live control-channel session: the key generated for this child
/// launch, and whether authentication has completed.
pub struct Session {
    key: SessionKey,
    authenticated: bool,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        Session { key, authenticated: false }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Handle an incoming `KEY` message. Idempotent: re-sending `KEY` after
    /// authentication just re-confirms it.
    pub fn authenticate(&mut self, candidate: &str) -> AuthOutcome {
        if self.key.matches(candidate) {
            self.authenticated = true;
            AuthOutcome::Authenticated
        } else {
            AuthOutcome::Rejected
        }
    }

    /// Whether a read is permitted right now, per the §4.2 gating table.
    pub fn read_allowed(&self, state: ChildState) -> bool {
        state.read_allowed()
    }

    /// Whether a write of `code` is permitted right now. Before
    /// authentication (`LAUNCHING`), only `BADKEY` may be sent; afterward,
    /// the ordinary per-state table applies.
    pub fn write_allowed(&self, state: ChildState, code: Code) -> bool {
        if !self.authenticated {
            return state == ChildState::Launching && code == Code::BadKey;
        }
        state.write_allowed()
    }

    /// The fixed burst sent immediately after successful authentication,
    /// before `PING` begins (spec.md §3 invariant, §4.2 handshake order).
    pub fn post_auth_burst(
        low_log_level: &str,
        log_file: &str,
        properties: &str,
        app_properties: &str,
        app_parameters: &str,
    ) -> Vec<Message> {
        vec![
            Message::new(Code::LowLogLevel, low_log_level.to_string()),
            Message::new(Code::LogFile, log_file.to_string()),
            Message::new(Code::Properties, properties.to_string()),
            Message::new(Code::AppProperties, app_properties.to_string()),
            Message::new(Code::AppParameters, app_parameters.to_string()),
            Message::new(Code::Prestart, "prestart".to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(SessionKey::from("abcd1234abcd1234".to_string()))
    }

    #[test]
    fn correct_key_authenticates() {
        let mut s = session();
        assert_eq!(s.authenticate("abcd1234abcd1234"), AuthOutcome::Authenticated);
        assert!(s.is_authenticated());
    }

    #[test]
    fn wrong_key_is_rejected_without_state_change() {
        let mut s = session();
        assert_eq!(s.authenticate("wrong"), AuthOutcome::Rejected);
        assert!(!s.is_authenticated());
    }

    #[test]
    fn only_badkey_may_be_written_before_authentication() {
        let s = session();
        assert!(s.write_allowed(ChildState::Launching, Code::BadKey));
        assert!(!s.write_allowed(ChildState::Launching, Code::Ping));
    }

    #[test]
    fn post_authentication_write_follows_child_state_table() {
        let mut s = session();
        s.authenticate("abcd1234abcd1234");
        assert!(s.write_allowed(ChildState::Started, Code::Ping));
        assert!(!s.write_allowed(ChildState::Killed, Code::Ping));
    }

    #[test]
    fn post_auth_burst_is_sent_in_spec_order() {
        let burst = Session::post_auth_burst("1", "/var/log/app.log", "k=v", "", "");
        let codes: Vec<Code> = burst.iter().map(|m| m.code).collect();
        assert_eq!(
            codes,
            vec![Code::LowLogLevel, Code::LogFile, Code::Properties, Code::AppProperties, Code::AppParameters, Code::Prestart]
        );
    }
}
