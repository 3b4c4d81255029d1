//! Config for the arena behaviors
//!
//! This module provides configuration options for controlling how teams are built and how
//! battles are executed. Resource limits live in [`constraints`](crate::constraints).
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! All values are optional. Boolean flags are case-insensitive, set the value to `"true"` to
//! enable a flag.
//!
//! - `BATTLE_VERBOSE` — Print build and battle progress to stdout (default: `true`)
//! - `BATTLE_LOG` — Enable logging to a file (default: `false`)
//! - `BATTLE_ALLOW_UNCONTAINED` — Run programs without cgroup limits if cgroups are unavailable (default: `false`)
//! - `BATTLE_COMPILE_PROGRAMS` — Compile program crates instead of collecting prebuilt binaries (default: `true`)
//! - `BATTLE_SAFE_BUILD` — Archive each team's programs before building the next team (default: `false`)
//! - `BATTLE_DEBUG_PROGRAM_STDERR` — Forward program stderr for debugging (default: `false`)
//! - `BATTLE_PARALLEL_BATTLES` — Maximum number of matchups fought at the same time (default: `1`)

/// Configuration for arena behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) allow_uncontained: bool,
    pub(crate) compile_programs: bool,
    pub(crate) safe_build: bool,
    pub(crate) debug_program_stderr: bool,
    pub(crate) parallel_battles: usize,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - The arena will print build and battle progress to stdout.
    /// - Logging to file is disabled.
    /// - Unsafe fallbacks (running programs outside of a cgroup) are not allowed.
    /// - Programs are compiled before the match.
    /// - Teams are built back-to-back, without archiving.
    /// - Program stderr output is discarded.
    /// - Matchups are fought one after the other.
    pub fn new() -> Self {
        Self {
            verbose: true,
            log: false,
            allow_uncontained: false,
            compile_programs: true,
            safe_build: false,
            debug_program_stderr: false,
            parallel_battles: 1,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the [module documentation](self) for the list of recognized variables. Any other
    /// value (including unset) will result in using the default value for each field.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        let parallel_battles = std::env::var("BATTLE_PARALLEL_BATTLES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(1);

        Self {
            verbose: get_env_flag("BATTLE_VERBOSE", true),
            log: get_env_flag("BATTLE_LOG", false),
            allow_uncontained: get_env_flag("BATTLE_ALLOW_UNCONTAINED", false),
            compile_programs: get_env_flag("BATTLE_COMPILE_PROGRAMS", true),
            safe_build: get_env_flag("BATTLE_SAFE_BUILD", false),
            debug_program_stderr: get_env_flag("BATTLE_DEBUG_PROGRAM_STDERR", false),
            parallel_battles,
        }
    }

    /// Enable or disable progress output.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Enable or disable unsafe fallbacks.
    pub fn with_allow_uncontained(mut self, value: bool) -> Self {
        self.allow_uncontained = value;
        self
    }

    /// Enable or disable program compilation.
    ///
    /// When disabled, each program folder must contain exactly one executable.
    pub fn with_compile_programs(mut self, value: bool) -> Self {
        self.compile_programs = value;
        self
    }

    /// Enable or disable safe build (isolation) mode.
    ///
    /// When enabled, each team's built programs are archived right after that team's build
    /// finishes, and only restored once every team has been built. No team can observe another
    /// team's build artifacts while it is being built.
    pub fn with_safe_build(mut self, value: bool) -> Self {
        self.safe_build = value;
        self
    }

    /// Enable or disable program stderr output (debug purposes only).
    pub fn with_debug_program_stderr(mut self, value: bool) -> Self {
        self.debug_program_stderr = value;
        self
    }

    /// Maximum number of matchups fought concurrently. Values below one are treated as one.
    pub fn with_parallel_battles(mut self, value: usize) -> Self {
        self.parallel_battles = value.max(1);
        self
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod configuration_tests {
    use super::*;

    #[test]
    fn parallel_battles_is_at_least_one() {
        let config = Configuration::new().with_parallel_battles(0);
        assert_eq!(config.parallel_battles, 1);
    }

    #[test]
    fn defaults_are_sequential_and_unsafe_build() {
        let config = Configuration::default();
        assert!(config.compile_programs);
        assert!(!config.safe_build);
        assert_eq!(config.parallel_battles, 1);
    }
}
