//! Defines resource constraints for building and running team programs.
//!
//! This module provides tools to configure the limits applied to generators and solvers
//! during a match: wall-clock timeouts, base memory budgets (scaled per instance size by the
//! [`Problem`](crate::problem::Problem)), the CPUs programs may run on, and the build timeout.
//!
//! # Overview
//!
//! The main entry point is the [`ConstraintsBuilder`] struct, which uses a builder pattern
//! to configure limits. These include:
//!
//! - **Time constraints**: build timeout, generator timeout, solver timeout
//! - **Memory constraints**: base memory for generators and solvers, total RAM
//! - **CPU constraints**: CPU list or count, CPUs per program
//!
//! The CPU set doubles as the pool that concurrent battles draw from: every running battle
//! owns `cpus_per_program` CPUs for its whole duration.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use algo_battle::constraints::ConstraintsBuilder;
//!
//! let constraints = ConstraintsBuilder::new()
//!     .with_max_total_ram(16_000)
//!     .with_generator_memory(2_000)
//!     .with_solver_memory(2_000)
//!     .with_cpu_list("0-3")
//!     .with_cpus_per_program(1)
//!     .with_generator_timeout(Duration::from_secs(30))
//!     .with_solver_timeout(Duration::from_secs(30))
//!     .build()
//!     .unwrap();
//! ```

use std::{collections::HashSet, env, time::Duration};

use anyhow::{bail, Context};
use tracing::warn;

const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Default)]
enum AutoCpus {
    #[default]
    Auto,
    Count(usize),
    List(String),
}

/// Limits applied to every run of one program role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramLimits {
    /// Wall-clock timeout of a single run.
    pub timeout: Duration,
    /// Base memory budget in MB, before problem-specific scaling. `None` means unlimited.
    pub memory_mb: Option<u64>,
}

/// A builder for the resource constraints of a match.
///
/// By default, programs get 30 seconds per run and unlimited memory, builds get 10 minutes,
/// and every physical CPU of the host is available with one CPU per program.
#[derive(Debug, Default)]
pub struct ConstraintsBuilder {
    total_ram: Option<usize>,
    generator_memory: Option<u64>,
    solver_memory: Option<u64>,
    cpus: AutoCpus,
    cpus_per_program: Option<usize>,
    build_timeout: Option<Duration>,
    generator_timeout: Option<Duration>,
    solver_timeout: Option<Duration>,
}

impl ConstraintsBuilder {
    /// Creates a new `ConstraintsBuilder` with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `ConstraintsBuilder` configured from environment variables.
    ///
    /// Read environment variables are:
    /// - `MAX_TOTAL_RAM` (usize): maximum total RAM in MB
    /// - `GENERATOR_MEMORY` (u64): generator base memory in MB
    /// - `SOLVER_MEMORY` (u64): solver base memory in MB
    /// - `CPU_LIST` (string): comma-separated list or ranges of CPUs, e.g. "0-3,6"
    /// - `TOTAL_CPU_COUNT` (usize): total number of CPUs allowed, overridden by `CPU_LIST`
    /// - `CPUS_PER_PROGRAM` (usize): number of CPUs allowed per program run
    /// - `BUILD_TIMEOUT_SECS` (u64): build timeout in seconds
    /// - `GENERATOR_TIMEOUT_MS` (u64): generator timeout in milliseconds
    /// - `SOLVER_TIMEOUT_MS` (u64): solver timeout in milliseconds
    #[must_use]
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(var: &str) -> Option<T> {
            env::var(var).ok()?.parse().ok()
        }

        let cpus = if let Some(cpus_str) = env::var("CPU_LIST").ok() {
            AutoCpus::List(cpus_str)
        } else if let Some(count) = parse::<usize>("TOTAL_CPU_COUNT") {
            AutoCpus::Count(count)
        } else {
            AutoCpus::Auto
        };

        ConstraintsBuilder {
            total_ram: parse("MAX_TOTAL_RAM"),
            generator_memory: parse("GENERATOR_MEMORY"),
            solver_memory: parse("SOLVER_MEMORY"),
            cpus,
            cpus_per_program: parse("CPUS_PER_PROGRAM"),
            build_timeout: parse::<u64>("BUILD_TIMEOUT_SECS").map(Duration::from_secs),
            generator_timeout: parse::<u64>("GENERATOR_TIMEOUT_MS").map(Duration::from_millis),
            solver_timeout: parse::<u64>("SOLVER_TIMEOUT_MS").map(Duration::from_millis),
        }
    }

    /// Sets the maximum total RAM available to programs (in MB).
    #[must_use]
    pub fn with_max_total_ram(self, max: usize) -> Self {
        Self {
            total_ram: Some(max),
            ..self
        }
    }

    /// Sets the generator base memory (in MB).
    #[must_use]
    pub fn with_generator_memory(self, max: u64) -> Self {
        Self {
            generator_memory: Some(max),
            ..self
        }
    }

    /// Sets the solver base memory (in MB).
    #[must_use]
    pub fn with_solver_memory(self, max: u64) -> Self {
        Self {
            solver_memory: Some(max),
            ..self
        }
    }

    /// Sets the specific CPUs available for programs using a CPU list string.
    ///
    /// Format follows the pattern: `"0-3,6,8"` (inclusive ranges and individual IDs).
    #[must_use]
    pub fn with_cpu_list(self, cpus: &str) -> Self {
        Self {
            cpus: AutoCpus::List(cpus.to_string()),
            ..self
        }
    }

    /// Sets the total number of logical CPUs available.
    ///
    /// This will be ignored if `with_cpu_list` is also specified.
    #[must_use]
    pub fn with_total_cpu_count(self, max: usize) -> Self {
        if let AutoCpus::List(_) = self.cpus {
            warn!("`with_total_cpu_count` is ignored if `with_cpu_list` is used!");
            self
        } else {
            Self {
                cpus: AutoCpus::Count(max),
                ..self
            }
        }
    }

    /// Sets the number of logical CPUs available per program run. Default is one.
    #[must_use]
    pub fn with_cpus_per_program(self, max: usize) -> Self {
        Self {
            cpus_per_program: Some(max),
            ..self
        }
    }

    /// Sets the timeout for building one program.
    #[must_use]
    pub fn with_build_timeout(self, duration: Duration) -> Self {
        Self {
            build_timeout: Some(duration),
            ..self
        }
    }

    /// Sets the wall-clock timeout of one generator run.
    #[must_use]
    pub fn with_generator_timeout(self, duration: Duration) -> Self {
        Self {
            generator_timeout: Some(duration),
            ..self
        }
    }

    /// Sets the wall-clock timeout of one solver run.
    #[must_use]
    pub fn with_solver_timeout(self, duration: Duration) -> Self {
        Self {
            solver_timeout: Some(duration),
            ..self
        }
    }

    /// Consumes the builder and returns the constructed `Constraints`.
    ///
    /// # Errors
    ///
    /// Returns an error when the constraints are impossible, e.g. total RAM < program memory,
    /// or fewer CPUs than `cpus_per_program`.
    pub fn build(self) -> anyhow::Result<Constraints> {
        let mut sys = sysinfo::System::new();

        let total_ram = self.total_ram.unwrap_or_else(|| {
            sys.refresh_memory();
            (sys.available_memory() / 1_000_000) as usize
        });

        for (role, memory) in [
            ("Generator", self.generator_memory),
            ("Solver", self.solver_memory),
        ] {
            if let Some(memory) = memory {
                if memory as usize > total_ram {
                    bail!("{role} memory ({memory}MB) is greater than total RAM ({total_ram}MB)");
                }
            }
        }

        // By default, we use the physical CPU count because using all logical CPUs
        // cuts program performance in half.
        let cpus = match self.cpus {
            AutoCpus::Auto => {
                let num_cpus = num_cpus::get_physical().min(u8::MAX as usize) as u8;
                (0..num_cpus).collect::<HashSet<u8>>()
            }
            AutoCpus::Count(num_cpus) => (0..(num_cpus.min(u8::MAX as usize) as u8)).collect(),
            AutoCpus::List(s) => {
                cpu_list_to_hashset(&s).map_err(|e| e.context("error parsing cpu list"))?
            }
        };
        let cpus_per_program = self.cpus_per_program.unwrap_or(1);
        if cpus_per_program == 0 {
            bail!("programs need at least one CPU");
        }
        if cpus.len() < cpus_per_program {
            bail!(
                "{cpus_per_program} CPUs per program requested but only {} available",
                cpus.len()
            );
        }

        Ok(Constraints {
            total_ram,
            cpus,
            cpus_per_program,
            build_timeout: self.build_timeout.unwrap_or(DEFAULT_BUILD_TIMEOUT),
            generator: ProgramLimits {
                timeout: self.generator_timeout.unwrap_or(DEFAULT_RUN_TIMEOUT),
                memory_mb: self.generator_memory,
            },
            solver: ProgramLimits {
                timeout: self.solver_timeout.unwrap_or(DEFAULT_RUN_TIMEOUT),
                memory_mb: self.solver_memory,
            },
        })
    }
}

fn cpu_list_to_hashset(s: &str) -> anyhow::Result<HashSet<u8>> {
    if s.is_empty() {
        bail!("Empty string");
    }
    let mut set: HashSet<u8> = HashSet::new();
    for item in s.split(',') {
        let bounds = item.split('-').collect::<Vec<_>>();
        match bounds.as_slice() {
            [value] => {
                let value: u8 = value
                    .trim()
                    .parse()
                    .with_context(|| format!("could not parse {value}"))?;
                set.insert(value);
            }
            [start, end] => {
                let start: u8 = start
                    .trim()
                    .parse()
                    .with_context(|| format!("could not parse {start}"))?;
                let end: u8 = end
                    .trim()
                    .parse()
                    .with_context(|| format!("could not parse {end}"))?;
                let range = if start <= end {
                    start..=end
                } else {
                    end..=start
                };
                set.extend(range);
            }
            _ => bail!(
                "each comma-separated item must be a number or a range (e.g. '0-3'), got '{item}'"
            ),
        }
    }
    Ok(set)
}

/// Obtained using `ConstraintsBuilder`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constraints {
    pub(crate) total_ram: usize,
    pub(crate) cpus: HashSet<u8>,
    pub(crate) cpus_per_program: usize,
    pub(crate) build_timeout: Duration,
    pub(crate) generator: ProgramLimits,
    pub(crate) solver: ProgramLimits,
}

impl Constraints {
    /// create a ConstraintsBuilder
    pub fn builder() -> ConstraintsBuilder {
        ConstraintsBuilder::new()
    }

    /// Limits of generator runs.
    pub fn generator(&self) -> ProgramLimits {
        self.generator
    }

    /// Limits of solver runs.
    pub fn solver(&self) -> ProgramLimits {
        self.solver
    }

    /// RAM (MB) available to programs.
    pub fn total_ram(&self) -> usize {
        self.total_ram
    }

    /// Timeout of a single program build.
    pub fn build_timeout(&self) -> Duration {
        self.build_timeout
    }

    /// The CPUs owned by these constraints, as a sorted cgroup cpu list ("0,1,4").
    pub fn cpu_list(&self) -> String {
        let mut cpus = self.cpus.iter().copied().collect::<Vec<_>>();
        cpus.sort_unstable();
        cpus.iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub(crate) fn add(&mut self, res: Constraints) {
        self.cpus.extend(res.cpus);
    }

    /// Take the CPUs needed by one battle out of the pool, if enough are left.
    pub(crate) fn try_take_battle(&mut self) -> Option<Constraints> {
        let num_cpus = self.cpus_per_program;
        if self.cpus.len() < num_cpus {
            return None;
        }
        let mut sorted = self.cpus.iter().copied().collect::<Vec<_>>();
        sorted.sort_unstable();
        let cpus = sorted.into_iter().take(num_cpus).collect::<HashSet<u8>>();
        for cpu in &cpus {
            self.cpus.remove(cpu);
        }
        Some(Constraints {
            cpus,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod constraints_tests {
    use super::*;

    #[test]
    fn parses_ranges_and_single_cpus() {
        let set = cpu_list_to_hashset("0-2,5,7-6").unwrap();
        let mut cpus = set.into_iter().collect::<Vec<_>>();
        cpus.sort_unstable();
        assert_eq!(cpus, vec![0, 1, 2, 5, 6, 7]);
    }

    #[test]
    fn rejects_malformed_cpu_list() {
        assert!(cpu_list_to_hashset("").is_err());
        assert!(cpu_list_to_hashset("1-2-3").is_err());
        assert!(cpu_list_to_hashset("a").is_err());
    }

    #[test]
    fn program_memory_cannot_exceed_total_ram() {
        let res = ConstraintsBuilder::new()
            .with_max_total_ram(1_000)
            .with_solver_memory(2_000)
            .with_total_cpu_count(1)
            .build();
        assert!(res.is_err());
    }

    #[test]
    fn battle_pool_hands_out_disjoint_cpus() {
        let mut pool = ConstraintsBuilder::new()
            .with_max_total_ram(1_000)
            .with_cpu_list("0-3")
            .with_cpus_per_program(2)
            .build()
            .unwrap();

        let first = pool.try_take_battle().unwrap();
        let second = pool.try_take_battle().unwrap();
        assert!(pool.try_take_battle().is_none());
        assert!(first.cpus.is_disjoint(&second.cpus));
        assert_eq!(first.cpu_list(), "0,1");

        pool.add(first);
        assert_eq!(pool.cpus.len(), 2);
    }

    #[test]
    fn defaults_apply_to_both_roles() {
        let constraints = ConstraintsBuilder::new()
            .with_max_total_ram(1_000)
            .with_total_cpu_count(2)
            .build()
            .unwrap();
        assert_eq!(constraints.generator().timeout, DEFAULT_RUN_TIMEOUT);
        assert_eq!(constraints.solver().memory_mb, None);
        assert_eq!(constraints.build_timeout(), DEFAULT_BUILD_TIMEOUT);
    }
}
