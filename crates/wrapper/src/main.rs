//! CLI entry point: resolves the command word, loads configuration, and
//! dispatches to the console event loop or one of the administrative
//! subcommands (service registration, command-file directives, diagnostics).
//!
//! Grounded on `components/sup/src/main.rs`'s `main`/`boot`/`start`/`cli`
//! split (catch `start()`'s `Result` in `main`, build the `clap::App` once in
//! `cli()`, match `subcommand()` in `start()`), adapted from clap's
//! subcommand dispatch to a manually-resolved leading command word, since
//! this wrapper's command line is `wrapperd [command] <configfile> [overrides...] [-- child-args...]`
//! rather than `app <subcommand> [flags]`.

use std::path::{Path, PathBuf};

use clap::{App, Arg};

use wrapperd::child::ScopedArg;
use wrapperd::config::Config;
use wrapperd::error::{Error, Result};
use wrapperd::event_loop::EventLoop;
use wrapperd::log_roller::LogRoller;
use wrapperd::service_os::{self, ServiceSpec};

const KNOWN_COMMANDS: &[&str] = &[
    "console",
    "start",
    "stop",
    "pause",
    "resume",
    "install",
    "remove",
    "query",
    "dump",
    "setup",
    "teardown",
    "hostid",
    "help",
    "version",
    "translate",
    "jvm_bits",
    "request_log_file",
    "request_default_log_file",
    "request_delta_binary_bits",
];

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, rest) = split_command(&args);

    match run(&command, &rest) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

/// The first bare positional is the command; anything absent, or starting
/// with `-`, or not in `KNOWN_COMMANDS` falls back to `console` (spec.md §6:
/// "invoked with no command word, the wrapper runs as a console process").
fn split_command(args: &[String]) -> (String, Vec<String>) {
    match args.first() {
        Some(first) if !first.starts_with('-') && KNOWN_COMMANDS.contains(&first.as_str()) => {
            (first.clone(), args[1..].to_vec())
        }
        _ => ("console".to_string(), args.to_vec()),
    }
}

fn cli() -> App<'static, 'static> {
    App::new("wrapperd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Launches, monitors, and restarts a child process as a managed service")
        .arg(
            Arg::with_name("CONFIG")
                .help("Path to the wrapper configuration (property) file")
                .index(1)
                .default_value("wrapper.conf"),
        )
        .arg(
            Arg::with_name("OVERRIDES")
                .help("name=value configuration overrides, applied after the config file is loaded")
                .index(2)
                .multiple(true),
        )
        .arg(
            Arg::with_name("CHILD_ARGS")
                .help("Arguments forwarded verbatim to the child process")
                .multiple(true)
                .last(true),
        )
}

fn run(command: &str, rest: &[String]) -> Result<i32> {
    if command == "help" {
        cli().print_help().ok();
        println!();
        return Ok(0);
    }
    if command == "version" {
        println!("wrapperd {}", env!("CARGO_PKG_VERSION"));
        return Ok(0);
    }

    let matches = cli().get_matches_from_safe(rest).map_err(|e| Error::Config(e.message))?;

    let config_path = PathBuf::from(matches.value_of("CONFIG").unwrap_or("wrapper.conf"));
    let mut config = Config::load(&config_path)?;

    if let Some(overrides) = matches.values_of("OVERRIDES") {
        for pair in overrides {
            match pair.find('=') {
                Some(eq) => config.set_override(&pair[..eq], &pair[eq + 1..]),
                None => log::warn!("ignoring malformed override (expected name=value): {}", pair),
            }
        }
    }

    let extra_args: Vec<ScopedArg> = matches
        .values_of("CHILD_ARGS")
        .map(|vals| vals.map(ScopedArg::app_only).collect())
        .unwrap_or_default();

    // Once the config has loaded, a failure from here down exits with the
    // user-configured `wrapper.exit_code.error` rather than a hardcoded 1.
    let exit_code_error = config.exit_code_error();

    let outcome = match command {
        "console" => run_console(config, extra_args),
        "start" | "stop" => run_systemctl(command, &config),
        "install" => run_install(&config, &config_path),
        "remove" => run_remove(&config),
        "query" => run_query(&config),
        "pause" | "resume" | "dump" => write_command_word(&config, command),
        "setup" => run_install(&config, &config_path).and_then(|_| run_systemctl("start", &config)),
        "teardown" => run_systemctl("stop", &config).and_then(|_| run_remove(&config)),
        "hostid" => {
            println!("{}", wrapper_core::env::hostname().unwrap_or_else(|| "localhost".to_string()));
            Ok(0)
        }
        "translate" => run_translate(&config),
        "jvm_bits" | "request_delta_binary_bits" => {
            println!("{}", std::mem::size_of::<usize>() * 8);
            Ok(0)
        }
        "request_log_file" | "request_default_log_file" => run_request_log_file(&config),
        other => Err(Error::Config(format!("unknown command: {}", other))),
    };

    Ok(outcome.unwrap_or_else(|e| {
        eprintln!("{}", e);
        exit_code_error as i32
    }))
}

fn run_console(config: Config, extra_args: Vec<ScopedArg>) -> Result<i32> {
    EventLoop::new(config, extra_args).run()
}

fn run_install(config: &Config, config_path: &Path) -> Result<i32> {
    let binary = std::env::current_exe().map_err(Error::Spawn)?;
    let spec = ServiceSpec { name: config.service_name(), binary, config_path: config_path.to_path_buf() };
    let path = service_os::install(&spec)?;
    println!("installed service unit at {}", path.display());
    Ok(0)
}

fn run_remove(config: &Config) -> Result<i32> {
    service_os::remove(&config.service_name())?;
    println!("removed service {}", config.service_name());
    Ok(0)
}

fn run_query(config: &Config) -> Result<i32> {
    if service_os::query(&config.service_name()) {
        println!("{} is installed", config.service_name());
        Ok(0)
    } else {
        println!("{} is not installed", config.service_name());
        Ok(1)
    }
}

fn run_systemctl(action: &str, config: &Config) -> Result<i32> {
    let status = std::process::Command::new("systemctl")
        .arg(action)
        .arg(config.service_name())
        .status()
        .map_err(Error::Spawn)?;
    Ok(status.code().unwrap_or(1))
}

/// `pause`/`resume`/`dump` against an already-running console instance: the
/// same mechanism the running instance itself polls via `CommandFilePoller`.
fn write_command_word(config: &Config, word: &str) -> Result<i32> {
    let path = config
        .command_file()
        .ok_or_else(|| Error::Config("wrapper.commandfile must be set to use this command".to_string()))?;
    std::fs::write(&path, format!("{}\n", word.to_ascii_uppercase())).map_err(Error::Spawn)?;
    Ok(0)
}

fn run_translate(config: &Config) -> Result<i32> {
    println!("wrapper.port={}", config.port());
    println!("wrapper.java.command={}", config.binary().unwrap_or_default());
    println!("wrapper.ping.interval={}", config.ping_interval().as_secs());
    println!("wrapper.startup.timeout={}", config.startup_timeout().map(|d| d.as_secs()).unwrap_or(0));
    println!("wrapper.shutdown.timeout={}", config.shutdown_timeout().as_secs());
    println!("wrapper.max_failed_invocations={}", config.max_failed_invocations());
    Ok(0)
}

fn run_request_log_file(config: &Config) -> Result<i32> {
    match config.log_file() {
        Some(template) => {
            let roller = LogRoller::new(template, config.log_roll_mode(), config.log_file_max_size());
            println!("{}", roller.current_path().display());
        }
        None => println!("(no log file configured)"),
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_leading_word_falls_back_to_console() {
        let (command, rest) = split_command(&["--foo".to_string(), "wrapper.conf".to_string()]);
        assert_eq!(command, "console");
        assert_eq!(rest, vec!["--foo".to_string(), "wrapper.conf".to_string()]);
    }

    #[test]
    fn recognised_command_word_is_consumed() {
        let (command, rest) = split_command(&["install".to_string(), "wrapper.conf".to_string()]);
        assert_eq!(command, "install");
        assert_eq!(rest, vec!["wrapper.conf".to_string()]);
    }

    #[test]
    fn empty_args_default_to_console_with_no_rest() {
        let (command, rest) = split_command(&[]);
        assert_eq!(command, "console");
        assert!(rest.is_empty());
    }
}
