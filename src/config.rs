//! The environment the default availability policy looks at.

use std::env;
use std::io::{self, IsTerminal};

use signal_registry::{baseline_signal, SignalRegistry};

/// Overrides whether the process counts as interactive.
pub const INTERACTIVE_VAR: &str = "SIGNALS_INTERACTIVE";
/// Overrides whether the process counts as running automated tests.
pub const TESTING_VAR: &str = "SIGNALS_TESTING";
/// Application environment name; `testing` means automated tests.
pub const APP_ENV_VAR: &str = "APP_ENV";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Environment {
    /// Attached to a console a person is typing into.
    pub interactive: bool,
    /// Running under an automated test harness.
    pub running_tests: bool,
}

impl Environment {
    /// Reads the environment of the current process.
    pub fn detect() -> Self {
        let interactive = flag(INTERACTIVE_VAR).unwrap_or_else(|| io::stdin().is_terminal());
        let running_tests = flag(TESTING_VAR).unwrap_or_else(|| {
            env::var(APP_ENV_VAR).map_or(false, |name| name.eq_ignore_ascii_case("testing"))
        });
        Self {
            interactive,
            running_tests,
        }
    }

    /// Whether signal handling should be used in this environment on this
    /// platform: an interactive console, not under tests, with the signal
    /// backend compiled in, the baseline signal defined and the platform
    /// letting the registry take signals over.
    pub fn signals_available(&self) -> bool {
        self.interactive
            && !self.running_tests
            && cfg!(unix)
            && baseline_signal().is_some()
            && SignalRegistry::is_supported()
    }

    /// A resolver answering for this environment rather than the detected one.
    pub fn resolver(self) -> impl Fn() -> bool + Send + Sync + 'static {
        move || self.signals_available()
    }
}

fn flag(name: &str) -> Option<bool> {
    let value = env::var(name).ok()?;
    match parse_flag(&value) {
        Some(flag) => Some(flag),
        None => {
            log::warn!("ignoring unrecognised value {:?} for `{}`", value, name);
            None
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
