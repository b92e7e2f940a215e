//! Configuration surface: a `PropertyFile` (the ambient stand-in for the
//! "collaborator that yields a key->value mapping" spec.md §1 treats as
//! external) plus a typed `Config` accessor layer with validation/clamping
//! and sticky-on-reload handling.
//!
//! Grounded on the split between parsing and use in
//! `components/sup/src/main.rs`'s `ManagerConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::action::{self, Action};
use crate::error::{Error, Result};
use crate::trigger::Trigger;
use crate::transport::BackendType;
use wrapper_core::env as core_env;

/// Property names the wrapper computes itself and refuses to let a
/// `set.XXX`/file override clobber (spec.md §6 Environment).
pub const RESERVED_ENV_VARS: &[&str] = &[
    "WRAPPER_CONF_DIR",
    "WRAPPER_WORKING_DIR",
    "WRAPPER_INIT_DIR",
    "WRAPPER_PID",
    "WRAPPER_BASE_NAME",
    "WRAPPER_BITS",
    "WRAPPER_ARCH",
    "WRAPPER_OS",
    "WRAPPER_VERSION",
    "WRAPPER_EDITION",
    "WRAPPER_HOSTNAME",
    "WRAPPER_RUN_MODE",
    "WRAPPER_FILE_SEPARATOR",
    "WRAPPER_PATH_SEPARATOR",
    "WRAPPER_LANG",
];

/// A property whose value is locked in at first load and ignored on
/// subsequent reloads (spec.md Glossary: "sticky property"). Modelled as a
/// schema attribute rather than a parallel list of names, per spec.md §9's
/// resolution of the corresponding Open Question.
struct SchemaEntry {
    name: &'static str,
    sticky: bool,
}

const SCHEMA: &[SchemaEntry] = &[
    SchemaEntry { name: "wrapper.port", sticky: true },
    SchemaEntry { name: "wrapper.port.min", sticky: true },
    SchemaEntry { name: "wrapper.port.max", sticky: true },
    SchemaEntry { name: "wrapper.backend.type", sticky: true },
    SchemaEntry { name: "wrapper.use_system_time", sticky: true },
    SchemaEntry { name: "wrapper.use_tick_mutex", sticky: true },
];

fn is_sticky(name: &str) -> bool {
    SCHEMA.iter().any(|e| e.name == name && e.sticky)
}

/// The ambient property-map reader: `key=value` lines, `#`/`!` comments,
/// numbered-sequence collection, and `${VAR}` expansion.
#[derive(Debug, Clone, Default)]
pub struct PropertyFile {
    values: HashMap<String, String>,
}

impl PropertyFile {
    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            if let Some(eq) = line.find('=') {
                let key = line[..eq].trim().to_string();
                let value = line[eq + 1..].trim().to_string();
                values.insert(key, value);
            }
        }
        PropertyFile { values }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::ConfigFile(path.to_path_buf(), e))?;
        Ok(Self::parse(&text))
    }

    /// Fold the process environment in, then expand `${VAR}` references
    /// against the merged scope. Must run after parsing and before any
    /// typed accessor is consulted (spec.md §9 "Environment as
    /// configuration").
    pub fn expand_environment(&mut self) {
        let mut scope = core_env::snapshot();
        for (k, v) in &self.values {
            scope.insert(k.clone(), v.clone());
        }
        for value in self.values.values_mut() {
            *value = core_env::expand(value, &scope);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set<S: Into<String>>(&mut self, key: S, value: S) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    fn get_parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    /// Collect `prefix.1`, `prefix.2`, ... in order. If `ignore_gaps` is
    /// false (the default), the scan stops at the first missing index;
    /// otherwise it keeps scanning up to `prefix.256` looking for further
    /// entries (spec.md §6 `wrapper.ignore_sequence_gaps`).
    pub fn numbered_sequence(&self, prefix: &str, ignore_gaps: bool) -> Vec<(u32, String)> {
        let mut out = Vec::new();
        let mut misses = 0;
        for n in 1..=256u32 {
            let key = format!("{}.{}", prefix, n);
            match self.get(&key) {
                Some(v) => {
                    out.push((n, v.to_string()));
                    misses = 0;
                }
                None => {
                    if !ignore_gaps {
                        break;
                    }
                    misses += 1;
                    if misses > 8 {
                        break;
                    }
                }
            }
        }
        out
    }

    /// `key=value` lines, one per entry matching `keep`, sorted by key so
    /// the serialized form is stable across runs.
    fn serialize_filtered(&self, keep: impl Fn(&str) -> bool) -> String {
        let mut keys: Vec<&String> = self.values.keys().filter(|k| keep(k)).collect();
        keys.sort();
        keys.into_iter().map(|k| format!("{}={}", k, self.values[k])).collect::<Vec<_>>().join("\n")
    }

    pub fn serialize(&self) -> String {
        self.serialize_filtered(|_| true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreSignals {
    True,
    Wrapper,
    Java,
    False,
}

impl IgnoreSignals {
    fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "TRUE" => IgnoreSignals::True,
            "WRAPPER" => IgnoreSignals::Wrapper,
            "JAVA" => IgnoreSignals::Java,
            _ => IgnoreSignals::False,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TriggerSpec {
    pub pattern: String,
    pub allow_wildcards: bool,
    pub actions: Vec<Action>,
    pub message: Option<String>,
}

/// Typed accessor surface over a `PropertyFile`, with validation/clamping
/// and sticky-on-reload behaviour.
pub struct Config {
    props: PropertyFile,
    sticky_values: HashMap<String, String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut props = PropertyFile::load(path)?;
        props.expand_environment();
        let sticky_values = Self::snapshot_sticky(&props);
        Ok(Config { props, sticky_values })
    }

    pub fn from_property_file(mut props: PropertyFile) -> Self {
        props.expand_environment();
        let sticky_values = Self::snapshot_sticky(&props);
        Config { props, sticky_values }
    }

    fn snapshot_sticky(props: &PropertyFile) -> HashMap<String, String> {
        let mut sticky = HashMap::new();
        for entry in SCHEMA {
            if entry.sticky {
                if let Some(v) = props.get(entry.name) {
                    sticky.insert(entry.name.to_string(), v.to_string());
                }
            }
        }
        sticky
    }

    /// Swap in a freshly-loaded property file, but pin every sticky
    /// property back to its first-loaded value (spec.md §5: "a reload
    /// swaps the underlying map atomically at the start of an event-loop
    /// iteration").
    pub fn reload(&mut self, path: &Path) -> Result<()> {
        let mut fresh = PropertyFile::load(path)?;
        fresh.expand_environment();
        for (name, value) in &self.sticky_values {
            fresh.set(name.clone(), value.clone());
        }
        self.props = fresh;
        Ok(())
    }

    pub fn is_sticky(&self, name: &str) -> bool {
        is_sticky(name)
    }

    pub fn port(&self) -> u16 {
        self.props.get_parsed("wrapper.port", 32000)
    }

    pub fn port_min(&self) -> u16 {
        self.props.get_parsed("wrapper.port.min", self.port())
    }

    pub fn port_max(&self) -> u16 {
        self.props.get_parsed("wrapper.port.max", self.port().saturating_add(1000))
    }

    pub fn backend_type(&self) -> BackendType {
        match self.props.get_or("wrapper.backend.type", "AUTO").to_ascii_uppercase().as_str() {
            "SOCKET" | "SOCKET_IPV4" => BackendType::SocketIpv4,
            "SOCKET_IPV6" => BackendType::SocketIpv6,
            "PIPE" => BackendType::Pipe,
            _ => BackendType::Auto,
        }
    }

    /// `0` disables the timeout (`None`); otherwise seconds.
    pub fn startup_timeout(&self) -> Option<Duration> {
        seconds_or_disabled(self.props.get_parsed("wrapper.startup.timeout", 30))
    }

    pub fn ping_timeout(&self) -> Option<Duration> {
        seconds_or_disabled(self.props.get_parsed("wrapper.ping.timeout", 30))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.props.get_parsed::<u64>("wrapper.ping.interval", 5).max(1))
    }

    pub fn ping_interval_logged(&self) -> u32 {
        self.props.get_parsed("wrapper.ping.interval.logged", 1)
    }

    pub fn ping_alert_threshold(&self) -> Duration {
        Duration::from_secs(self.props.get_parsed("wrapper.ping.alert.threshold", 3))
    }

    pub fn ping_timeout_action(&self) -> Vec<Action> {
        match self.props.get("wrapper.ping.timeout.action") {
            Some(raw) => action::parse_action_list(raw).unwrap_or_else(|e| {
                log::warn!("ignoring invalid wrapper.ping.timeout.action: {}", e);
                Action::default_ping_timeout_action()
            }),
            None => Action::default_ping_timeout_action(),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.props.get_parsed("wrapper.shutdown.timeout", 30))
    }

    pub fn jvm_exit_timeout(&self) -> Duration {
        Duration::from_secs(self.props.get_parsed("wrapper.jvm_exit.timeout", 15))
    }

    pub fn jvm_terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.props.get_parsed("wrapper.jvm_terminate.timeout", 5))
    }

    pub fn jvm_cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.props.get_parsed("wrapper.jvm_cleanup.timeout", 10))
    }

    pub fn max_failed_invocations(&self) -> u32 {
        self.props.get_parsed("wrapper.max_failed_invocations", 5)
    }

    pub fn successful_invocation_time(&self) -> u32 {
        self.props.get_parsed("wrapper.successful_invocation_time", 300)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.props.get_parsed("wrapper.restart.delay", 5))
    }

    pub fn reload_configuration(&self) -> bool {
        self.props.get_parsed("wrapper.restart.reload_configuration", true)
    }

    pub fn disable_restarts(&self) -> bool {
        self.props.get_parsed("wrapper.disable_restarts", false)
    }

    pub fn disable_restarts_automatic(&self) -> bool {
        self.props.get_parsed("wrapper.disable_restarts.automatic", false)
    }

    /// Clamped to `1..=255` (spec.md §6), default 1.
    pub fn exit_code_error(&self) -> u8 {
        let raw: i32 = self.props.get_parsed("wrapper.exit_code.error", 1);
        raw.clamp(1, 255) as u8
    }

    pub fn commandfile_poll_interval(&self) -> Duration {
        Duration::from_secs(self.props.get_parsed("wrapper.commandfile.poll_interval", 5))
    }

    pub fn commandfile_enable_tests(&self) -> bool {
        self.props.get_parsed("wrapper.commandfile.enable_tests", false)
    }

    pub fn anchorfile_poll_interval(&self) -> Duration {
        Duration::from_secs(self.props.get_parsed("wrapper.anchorfile.poll_interval", 5))
    }

    pub fn ignore_sequence_gaps(&self) -> bool {
        self.props.get_parsed("wrapper.ignore_sequence_gaps", false)
    }

    pub fn ignore_signals(&self) -> IgnoreSignals {
        IgnoreSignals::parse(&self.props.get_or("wrapper.ignore_signals", "FALSE"))
    }

    pub fn pausable(&self) -> bool {
        self.props.get_parsed("wrapper.pausable", false)
    }

    pub fn pausable_stop_jvm(&self) -> bool {
        self.props.get_parsed("wrapper.pausable.stop_jvm", false)
    }

    pub fn pause_on_startup(&self) -> bool {
        self.props.get_parsed("wrapper.pause_on_startup", false)
    }

    pub fn use_system_time(&self) -> bool {
        self.props.get_parsed("wrapper.use_system_time", false)
    }

    pub fn use_tick_mutex(&self) -> bool {
        self.props.get_parsed("wrapper.use_tick_mutex", true)
    }

    pub fn main_loop_sleep_step_ms(&self) -> u64 {
        self.props.get_parsed("wrapper.main_loop.sleep_step_ms", 50)
    }

    pub fn main_loop_step_cycles(&self) -> u32 {
        self.props.get_parsed("wrapper.main_loop.step_cycles", 10)
    }

    pub fn main_loop_max_sleep_ms(&self) -> u64 {
        self.props.get_parsed("wrapper.main_loop.max_sleep_ms", 1000)
    }

    pub fn pid_file(&self) -> Option<PathBuf> {
        self.props.get("wrapper.pidfile").map(PathBuf::from)
    }

    pub fn pid_file_strict(&self) -> bool {
        self.props.get_parsed("wrapper.pidfile.strict", false)
    }

    pub fn anchor_file(&self) -> Option<PathBuf> {
        self.props.get("wrapper.anchorfile").map(PathBuf::from)
    }

    pub fn lock_file(&self) -> Option<PathBuf> {
        self.props.get("wrapper.lockfile").map(PathBuf::from)
    }

    pub fn command_file(&self) -> Option<PathBuf> {
        self.props.get("wrapper.commandfile").map(PathBuf::from)
    }

    pub fn child_pid_file(&self) -> Option<PathBuf> {
        self.props.get("wrapper.java.pidfile").map(PathBuf::from)
    }

    /// `None` means logging to file is disabled; spec.md §6 "Log file".
    pub fn log_file(&self) -> Option<String> {
        self.props.get("wrapper.logfile").map(String::from)
    }

    pub fn log_roll_mode(&self) -> crate::log_roller::RollMode {
        use crate::log_roller::RollMode;
        match self.props.get_or("wrapper.logfile.rollmode", "NONE").to_ascii_uppercase().as_str() {
            "SIZE" => RollMode::Size,
            "DATE" => RollMode::Date,
            "WRAPPER" => RollMode::WrapperStart,
            "JVM" => RollMode::JvmRestart,
            _ => RollMode::None,
        }
    }

    /// Bytes, default 10 MiB (spec.md §6 `wrapper.logfile.maxsize`).
    pub fn log_file_max_size(&self) -> u64 {
        self.props.get_parsed("wrapper.logfile.maxsize", 10 * 1024 * 1024)
    }

    pub fn ping_queue_capacity(&self) -> usize {
        self.props.get_parsed("wrapper.ping.queue_capacity", 16)
    }

    /// The threshold sent as `LOW_LOG_LEVEL` in the post-auth burst: the
    /// lowest level the child should bother emitting to the wrapper
    /// (spec.md §4.2).
    pub fn low_log_level(&self) -> String {
        self.props.get_or("wrapper.low_log_level", "1")
    }

    /// The full property set, serialized for the `PROPERTIES` burst
    /// message so the child can read wrapper configuration without parsing
    /// the file itself.
    pub fn serialized_properties(&self) -> String {
        self.props.serialize()
    }

    /// The subset of properties meant for the application rather than the
    /// wrapper itself (anything outside the `wrapper.` namespace), sent as
    /// `APP_PROPERTIES`.
    pub fn serialized_app_properties(&self) -> String {
        self.props.serialize_filtered(|k| !k.starts_with("wrapper."))
    }

    /// `wrapper.app.parameter.N`, space-joined in order, sent as
    /// `APP_PARAMETERS`.
    pub fn app_parameters(&self) -> String {
        self.props
            .numbered_sequence("wrapper.app.parameter", self.ignore_sequence_gaps())
            .into_iter()
            .map(|(_, v)| v)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn triggers(&self) -> Vec<Trigger> {
        let patterns = self.props.numbered_sequence("wrapper.filter.trigger", self.ignore_sequence_gaps());
        let mut out = Vec::with_capacity(patterns.len());
        for (n, pattern) in patterns {
            let allow_wildcards = self
                .props
                .get(&format!("wrapper.filter.allow_wildcards.{}", n))
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            let actions = self
                .props
                .get(&format!("wrapper.filter.action.{}", n))
                .and_then(|raw| action::parse_action_list(raw).ok())
                .unwrap_or_else(|| vec![Action::Restart]);
            let message = self.props.get(&format!("wrapper.filter.message.{}", n)).map(String::from);
            out.push(Trigger::new(pattern, allow_wildcards, actions, message));
        }
        out
    }

    /// Name this wrapper instance identifies itself by — the systemd unit
    /// name under `install`/`remove`/`query`, and `WRAPPER_BASE_NAME`.
    pub fn service_name(&self) -> String {
        self.props.get_or("wrapper.name", "wrapperd")
    }

    /// Apply a `name=value` CLI override in-process (spec.md §6: `name=value`
    /// pairs before `--` override the corresponding configuration property).
    pub fn set_override(&mut self, name: &str, value: &str) {
        self.props.set(name, value);
    }

    pub fn conf_dir(&self) -> String {
        self.props.get_or("wrapper.conf_dir", ".")
    }

    pub fn working_dir(&self) -> String {
        self.props.get_or("wrapper.working.dir", ".")
    }

    pub fn binary(&self) -> Option<String> {
        self.props.get("wrapper.java.command").map(String::from)
    }

    /// `set.XXX=value` additional environment entries for the child.
    /// Reserved `WRAPPER_*` names are rejected (spec.md §6).
    pub fn additional_env(&self) -> Result<HashMap<String, String>> {
        let mut out = HashMap::new();
        for n in 1.. {
            let key = format!("wrapper.app.parameter.{}", n);
            match self.props.get(&key) {
                Some(_) => continue,
                None => break,
            }
        }
        for (k, v) in &self.props.values {
            if let Some(name) = k.strip_prefix("set.") {
                if RESERVED_ENV_VARS.contains(&name) {
                    return Err(Error::ReservedProperty(name.to_string()));
                }
                out.insert(name.to_string(), v.clone());
            }
        }
        Ok(out)
    }
}

fn seconds_or_disabled(seconds: u64) -> Option<Duration> {
    if seconds == 0 {
        None
    } else {
        Some(Duration::from_secs(seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines_and_skips_comments() {
        let pf = PropertyFile::parse(
            "# comment\n! also comment\n\nwrapper.port=9000\nwrapper.java.command=/usr/bin/app\n",
        );
        assert_eq!(pf.get("wrapper.port"), Some("9000"));
        assert_eq!(pf.get("wrapper.java.command"), Some("/usr/bin/app"));
    }

    #[test]
    fn numbered_sequence_stops_at_gap_by_default() {
        let pf = PropertyFile::parse(
            "wrapper.filter.trigger.1=OutOfMemoryError\nwrapper.filter.trigger.3=Foo\n",
        );
        let seq = pf.numbered_sequence("wrapper.filter.trigger", false);
        assert_eq!(seq, vec![(1, "OutOfMemoryError".to_string())]);
    }

    #[test]
    fn numbered_sequence_can_ignore_gaps() {
        let pf = PropertyFile::parse(
            "wrapper.filter.trigger.1=A\nwrapper.filter.trigger.3=B\n",
        );
        let seq = pf.numbered_sequence("wrapper.filter.trigger", true);
        assert_eq!(seq, vec![(1, "A".to_string()), (3, "B".to_string())]);
    }

    #[test]
    fn environment_expansion_runs_before_accessors() {
        std::env::set_var("WRAPPERD_TEST_HOME", "/opt/app");
        let mut pf = PropertyFile::parse("wrapper.java.command=${WRAPPERD_TEST_HOME}/bin/run\n");
        pf.expand_environment();
        assert_eq!(pf.get("wrapper.java.command"), Some("/opt/app/bin/run"));
        std::env::remove_var("WRAPPERD_TEST_HOME");
    }

    #[test]
    fn exit_code_error_is_clamped_into_range() {
        let pf = PropertyFile::parse("wrapper.exit_code.error=999\n");
        let cfg = Config::from_property_file(pf);
        assert_eq!(cfg.exit_code_error(), 255);

        let pf = PropertyFile::parse("wrapper.exit_code.error=0\n");
        let cfg = Config::from_property_file(pf);
        assert_eq!(cfg.exit_code_error(), 1);
    }

    #[test]
    fn zero_startup_timeout_disables_it() {
        let pf = PropertyFile::parse("wrapper.startup.timeout=0\n");
        let cfg = Config::from_property_file(pf);
        assert_eq!(cfg.startup_timeout(), None);
    }

    #[test]
    fn sticky_property_survives_reload_with_different_file() {
        let dir = std::env::temp_dir().join(format!("wrapperd-cfg-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("wrapper.conf");
        std::fs::write(&path, "wrapper.port=9000\n").unwrap();
        let mut cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.port(), 9000);

        std::fs::write(&path, "wrapper.port=9999\n").unwrap();
        cfg.reload(&path).unwrap();
        assert_eq!(cfg.port(), 9000, "wrapper.port is sticky: must not change on reload");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn non_sticky_property_picks_up_reload() {
        let dir = std::env::temp_dir().join(format!("wrapperd-cfg-test-nonsticky-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("wrapper.conf");
        std::fs::write(&path, "wrapper.ping.interval=5\n").unwrap();
        let mut cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.ping_interval(), Duration::from_secs(5));

        std::fs::write(&path, "wrapper.ping.interval=9\n").unwrap();
        cfg.reload(&path).unwrap();
        assert_eq!(cfg.ping_interval(), Duration::from_secs(9));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn additional_env_rejects_reserved_names() {
        let pf = PropertyFile::parse("set.WRAPPER_PID=1234\n");
        let cfg = Config::from_property_file(pf);
        assert!(matches!(cfg.additional_env(), Err(Error::ReservedProperty(_))));
    }

    #[test]
    fn additional_env_passes_through_other_names() {
        let pf = PropertyFile::parse("set.MY_APP_HOME=/srv/app\n");
        let cfg = Config::from_property_file(pf);
        let env = cfg.additional_env().unwrap();
        assert_eq!(env.get("MY_APP_HOME"), Some(&"/srv/app".to_string()));
    }

    #[test]
    fn serialized_app_properties_excludes_the_wrapper_namespace() {
        let pf = PropertyFile::parse("wrapper.port=9000\napp.timeout=30\n");
        let cfg = Config::from_property_file(pf);
        assert_eq!(cfg.serialized_app_properties(), "app.timeout=30");
        assert!(cfg.serialized_properties().contains("wrapper.port=9000"));
        assert!(cfg.serialized_properties().contains("app.timeout=30"));
    }

    #[test]
    fn app_parameters_are_joined_in_order() {
        let pf = PropertyFile::parse("wrapper.app.parameter.1=--verbose\nwrapper.app.parameter.2=--port=8080\n");
        let cfg = Config::from_property_file(pf);
        assert_eq!(cfg.app_parameters(), "--verbose --port=8080");
    }
}
