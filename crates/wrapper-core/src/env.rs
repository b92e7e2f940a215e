//! Environment-as-configuration: the process environment is folded into a
//! property map so `${VAR}` expansion can see inherited variables, and a
//! fixed set of `WRAPPER_*` variables is computed for the launched child.
//!
//! Per spec.md §9 Design Notes ("Environment as configuration"), folding the
//! environment in is a protocol, not a convenience: it must happen after
//! property-file parsing and before child argv assembly.

use std::collections::HashMap;
use std::env;

/// Snapshot the current process environment as a plain map, for merging
/// into a property map ahead of `${VAR}` expansion.
pub fn snapshot() -> HashMap<String, String> {
    env::vars().collect()
}

/// The run mode under which the wrapper was invoked; mirrors `WRAPPER_RUN_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Console,
    Service,
}

impl RunMode {
    fn as_str(self) -> &'static str {
        match self {
            RunMode::Console => "CONSOLE",
            RunMode::Service => "SERVICE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WrapperIdentity {
    pub base_name: String,
    pub version: String,
    pub edition: String,
    pub conf_dir: String,
    pub working_dir: String,
    pub init_dir: String,
}

/// Not user-overridable via `set.XXX` properties (spec.md §6 Environment).
pub fn child_environment(
    identity: &WrapperIdentity,
    run_mode: RunMode,
    pid: i32,
) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("WRAPPER_CONF_DIR".into(), identity.conf_dir.clone());
    vars.insert("WRAPPER_WORKING_DIR".into(), identity.working_dir.clone());
    vars.insert("WRAPPER_INIT_DIR".into(), identity.init_dir.clone());
    vars.insert("WRAPPER_PID".into(), pid.to_string());
    vars.insert("WRAPPER_BASE_NAME".into(), identity.base_name.clone());
    vars.insert("WRAPPER_BITS".into(), bits().to_string());
    vars.insert("WRAPPER_ARCH".into(), std::env::consts::ARCH.to_string());
    vars.insert("WRAPPER_OS".into(), std::env::consts::OS.to_string());
    vars.insert("WRAPPER_VERSION".into(), identity.version.clone());
    vars.insert("WRAPPER_EDITION".into(), identity.edition.clone());
    vars.insert(
        "WRAPPER_HOSTNAME".into(),
        hostname().unwrap_or_else(|| "localhost".to_string()),
    );
    vars.insert("WRAPPER_RUN_MODE".into(), run_mode.as_str().to_string());
    vars.insert(
        "WRAPPER_FILE_SEPARATOR".into(),
        std::path::MAIN_SEPARATOR.to_string(),
    );
    vars.insert(
        "WRAPPER_PATH_SEPARATOR".into(),
        if cfg!(windows) { ";" } else { ":" }.to_string(),
    );
    vars.insert("WRAPPER_LANG".into(), env::var("LANG").unwrap_or_default());
    vars
}

fn bits() -> u32 {
    if cfg!(target_pointer_width = "64") {
        64
    } else {
        32
    }
}

pub fn hostname() -> Option<String> {
    env::var("HOSTNAME").ok().or_else(|| {
        // Portable fallback without pulling in a `hostname` crate.
        std::process::Command::new("hostname")
            .output()
            .ok()
            .and_then(|out| String::from_utf8(out.stdout).ok())
            .map(|s| s.trim().to_string())
    })
}

/// Expand `${VAR}` references in `value` against `scope`, falling back to
/// the process environment. Unresolved references are left verbatim, since
/// the config reader's contract is "best-effort expansion", not strict
/// substitution.
pub fn expand(value: &str, scope: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match scope.get(name).cloned().or_else(|| env::var(name).ok()) {
                    Some(v) => out.push_str(&v),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_resolves_from_scope() {
        let mut scope = HashMap::new();
        scope.insert("FOO".to_string(), "bar".to_string());
        assert_eq!(expand("x=${FOO}y", &scope), "x=bary");
    }

    #[test]
    fn expand_leaves_unresolved_refs_verbatim() {
        let scope = HashMap::new();
        assert_eq!(expand("x=${NOT_A_REAL_VAR_XYZ}y", &scope), "x=${NOT_A_REAL_VAR_XYZ}y");
    }

    #[test]
    fn expand_falls_back_to_process_env() {
        std::env::set_var("WRAPPERD_TEST_EXPAND_VAR", "hello");
        let scope = HashMap::new();
        assert_eq!(expand("${WRAPPERD_TEST_EXPAND_VAR}", &scope), "hello");
        std::env::remove_var("WRAPPERD_TEST_EXPAND_VAR");
    }
}
