//! Trigger engine: ordered (pattern, action-list) pairs evaluated against
//! every line of child output. At most one trigger fires per line — the
//! first match in configured order.
//!
//! Grounded on the dispatch-by-first-match shape of
//! `components/launcher/src/server/mod.rs::dispatch`, generalised from
//! "first matching message code wins" to "first matching pattern wins".

use crate::action::Action;

#[derive(Debug, Clone)]
pub struct Trigger {
    pub pattern: String,
    pub allow_wildcards: bool,
    pub actions: Vec<Action>,
    pub message: Option<String>,
    min_text_length: usize,
}

impl Trigger {
    pub fn new(pattern: String, allow_wildcards: bool, actions: Vec<Action>, message: Option<String>) -> Self {
        let min_text_length = if allow_wildcards {
            pattern.chars().filter(|&c| c != '*').count()
        } else {
            pattern.chars().count()
        };
        Trigger {
            pattern,
            allow_wildcards,
            actions,
            message,
            min_text_length,
        }
    }

    /// `minLen(pattern) > len(text) => match = false` (spec.md §8).
    pub fn min_text_length(&self) -> usize {
        self.min_text_length
    }

    pub fn matches(&self, line: &str) -> bool {
        if line.chars().count() < self.min_text_length {
            return false;
        }
        if self.allow_wildcards {
            wildcard_match(&self.pattern, line)
        } else {
            line.contains(self.pattern.as_str())
        }
    }
}

/// `?` matches exactly one character, `*` matches zero or more. Classic
/// recursive two-pointer glob matcher; a literal substring match would not
/// do, since `*ERROR*` must match anywhere in the line, not just a prefix.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    // Anchoring: unlike a filesystem glob, a trigger pattern is not implicitly
    // anchored to the start of the line, so a bare (non-wildcarded) pattern is
    // still a substring search. We achieve this by trying the match at every
    // starting offset in `text` when the pattern doesn't begin with `*`.
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    if p.first() == Some(&'*') {
        return glob_match(&p, &t);
    }
    for start in 0..=t.len() {
        if glob_match(&p, &t[start..]) {
            return true;
        }
    }
    false
}

fn glob_match(p: &[char], t: &[char]) -> bool {
    match (p.first(), t.first()) {
        (None, None) => true,
        (Some('*'), _) => {
            // Zero-or-more: try consuming zero chars of `t`, or one and recurse.
            glob_match(&p[1..], t) || (!t.is_empty() && glob_match(p, &t[1..]))
        }
        (Some('?'), Some(_)) => glob_match(&p[1..], &t[1..]),
        (Some(pc), Some(tc)) if pc == tc => glob_match(&p[1..], &t[1..]),
        _ => false,
    }
}

/// Evaluate triggers in configured order; return the first match (if any).
pub fn first_match<'a>(triggers: &'a [Trigger], line: &str) -> Option<&'a Trigger> {
    triggers.iter().find(|t| t.matches(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_match_is_substring_and_case_sensitive() {
        let t = Trigger::new("OutOfMemoryError".to_string(), false, vec![Action::Shutdown], None);
        assert!(t.matches("java.lang.OutOfMemoryError: heap space"));
        assert!(!t.matches("java.lang.outofmemoryerror"));
    }

    #[test]
    fn wildcard_question_mark_matches_exactly_one_char() {
        let t = Trigger::new("port=?".to_string(), true, vec![], None);
        assert!(t.matches("listening on port=8"));
        assert!(!t.matches("listening on port=80"));
    }

    #[test]
    fn wildcard_star_matches_zero_or_more() {
        let t = Trigger::new("*ERROR*".to_string(), true, vec![], None);
        assert!(t.matches("fatal ERROR occurred"));
        assert!(t.matches("ERROR"));
        assert!(!t.matches("all clear"));
    }

    #[test]
    fn min_text_length_prefilters_short_text() {
        let t = Trigger::new("hello*world".to_string(), true, vec![], None);
        assert_eq!(t.min_text_length(), 10);
        assert!(!t.matches("hi")); // shorter than minLen, must not match
    }

    #[test]
    fn first_match_wins_in_configured_order() {
        let triggers = vec![
            Trigger::new("ERROR".to_string(), false, vec![Action::Restart], None),
            Trigger::new("ERROR: fatal".to_string(), false, vec![Action::Shutdown], None),
        ];
        let hit = first_match(&triggers, "ERROR: fatal condition").unwrap();
        assert_eq!(hit.actions, vec![Action::Restart]);
    }

    #[test]
    fn no_trigger_matches_unrelated_line() {
        let triggers = vec![Trigger::new("ERROR".to_string(), false, vec![], None)];
        assert!(first_match(&triggers, "all systems nominal").is_none());
    }
}
