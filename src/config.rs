//! # Debug Configuration
//!
//! Process-wide switches for the diagnostic machinery. Everything here
//! defaults to off; production builds pay nothing unless a flag is turned
//! on programmatically or through the environment.
//!
//! ## Environment Variables
//!
//! All environment variables use the `STRAND_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `STRAND_LOG` | Lifecycle logging to the configured stream | false |
//! | `STRAND_TRACK` | Allocation ledger tracking | false |
//! | `STRAND_LEAK_FATAL` | Panic when a leak check finds outstanding allocations | false |
//! | `STRAND_CYCLE_DETECT` | Arm cycle detection passes | false |
//!
//! Boolean variables accept `true`/`false`, `1`/`0`, `yes`/`no`, and
//! `on`/`off` in any case.
//!
//! ## Example
//!
//! ```rust,ignore
//! // Honor the environment once at startup.
//! let config = strand::init_from_env();
//! if config.track_allocations {
//!     eprintln!("allocation tracking is on");
//! }
//! ```

use std::env;

use crate::{cycle, ledger, log};

/// Snapshot of the diagnostic switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Config {
    /// Emit lifecycle events to the log stream.
    /// Default: false.
    pub lifecycle_log: bool,

    /// Record allocations in the ledger.
    /// Default: false.
    pub track_allocations: bool,

    /// Panic when a leak check finds outstanding allocations.
    /// Default: false.
    pub leak_fatal: bool,

    /// Arm cycle detection passes.
    /// Default: false.
    pub cycle_detection: bool,
}

impl Config {
    /// Load the switches from environment variables.
    ///
    /// Unset or unparsable variables fall back to the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = parse_env_bool("STRAND_LOG") {
            config.lifecycle_log = val;
        }
        if let Some(val) = parse_env_bool("STRAND_TRACK") {
            config.track_allocations = val;
        }
        if let Some(val) = parse_env_bool("STRAND_LEAK_FATAL") {
            config.leak_fatal = val;
        }
        if let Some(val) = parse_env_bool("STRAND_CYCLE_DETECT") {
            config.cycle_detection = val;
        }

        config
    }

    /// Push the switches into the live subsystems.
    pub fn apply(&self) {
        log::set_enabled(self.lifecycle_log);
        ledger::set_tracking(self.track_allocations);
        ledger::set_leak_fatal(self.leak_fatal);
        cycle::set_detection(self.cycle_detection);
    }
}

/// Load the switches from the environment and apply them, returning the
/// snapshot that was applied. Meant to run once at startup.
pub fn init_from_env() -> Config {
    let config = Config::from_env();
    config.apply();
    config
}

/// Parse an environment variable as bool.
fn parse_env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|s| {
        match s.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.lifecycle_log);
        assert!(!config.track_allocations);
        assert!(!config.leak_fatal);
        assert!(!config.cycle_detection);
    }

    #[test]
    fn test_parse_env_bool_spellings() {
        // Unique variable names keep this independent of other tests.
        env::set_var("STRAND_TEST_BOOL_A", "YES");
        env::set_var("STRAND_TEST_BOOL_B", "off");
        env::set_var("STRAND_TEST_BOOL_C", "maybe");

        assert_eq!(parse_env_bool("STRAND_TEST_BOOL_A"), Some(true));
        assert_eq!(parse_env_bool("STRAND_TEST_BOOL_B"), Some(false));
        assert_eq!(parse_env_bool("STRAND_TEST_BOOL_C"), None);
        assert_eq!(parse_env_bool("STRAND_TEST_BOOL_UNSET"), None);

        env::remove_var("STRAND_TEST_BOOL_A");
        env::remove_var("STRAND_TEST_BOOL_B");
        env::remove_var("STRAND_TEST_BOOL_C");
    }

    // The STRAND_* variables are process-global, so the whole
    // set/read/remove round trip lives in one test.
    #[test]
    fn test_from_env_round_trip() {
        env::set_var("STRAND_LOG", "1");
        env::set_var("STRAND_TRACK", "true");
        env::set_var("STRAND_LEAK_FATAL", "on");
        env::set_var("STRAND_CYCLE_DETECT", "no");

        let config = Config::from_env();
        assert!(config.lifecycle_log);
        assert!(config.track_allocations);
        assert!(config.leak_fatal);
        assert!(!config.cycle_detection);

        env::remove_var("STRAND_LOG");
        env::remove_var("STRAND_TRACK");
        env::remove_var("STRAND_LEAK_FATAL");
        env::remove_var("STRAND_CYCLE_DETECT");

        assert_eq!(Config::from_env(), Config::default());
    }
}
