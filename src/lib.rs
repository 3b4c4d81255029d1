//! # Algo Battle
//!
//! An engine running algorithmic battles between teams. Every team provides two programs:
//! a *generator* that builds an instance of a problem for a given size (along with a certificate
//! solution), and a *solver* that solves instances produced by other teams.
//!
//! It provides:
//! - Team program builds, with optional isolation between teams (`TeamManager`)
//! - Sandboxed fights between a generator and a solver (`FightExecutor`)
//! - Two battle algorithms: `Iterated` (largest solved size) and `Averaged` (mean score)
//! - Match orchestration and point allocation (`Arena`)
//! - Resource constraints enforced through Linux cgroups v2
//!
//! Each program runs as a separate OS process, reading its input on stdin and writing its
//! output on stdout. Process-level isolation applies constraints such as CPU affinity, memory
//! limits, and timeouts.
//!
//! # Documentation Overview
//!
//! - For the match lifecycle (build, battles, points), see the [`arena`] module.
//! - For configuring engine behavior and resource limits, see
//!   [`Configuration`](crate::configuration::Configuration) and [`constraints`].
//! - For defining problems, see the [`Problem`](crate::problem::Problem) trait and the
//!   [`pair_sum`](crate::problems::pair_sum) reference problem.
//! - For running programs somewhere else than local processes, implement
//!   [`Sandbox`](crate::sandbox::Sandbox).
//!
//! # Usage Example
//!
//! ```no_run
//! use algo_battle::prelude::*;
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     let constraints = ConstraintsBuilder::new()
//!         .with_solver_memory(1000) // in MB
//!         .with_solver_timeout(Duration::from_secs(10))
//!         .build()?;
//!
//!     // Allow uncontained execution if cgroup v2 is not available
//!     let config = Configuration::new().with_allow_uncontained(true);
//!     let sandbox = ProcessSandbox::new("/tmp/battle", config)?;
//!
//!     let arena = Arena::new(PairSum, sandbox, config, constraints);
//!     let teams = collect_teams("path_to_teams_directory".as_ref())?;
//!     let outcome = arena.run(teams, Battle::Iterated(Iterated::new()), 5, 100)?;
//!
//!     println!("{}", outcome.result);
//!     println!("{}", outcome.points);
//!     Ok(())
//! }
//! ```
//!
//! # Program Requirements
//!
//! When programs are compiled, each program folder is a Rust crate with a binary named
//! `generator` or `solver`. Otherwise each program folder contains exactly one executable.
//!
//! - The generator reads the instance size on stdin and writes the instance, then the
//!   certificate, on stdout.
//! - The solver reads the instance on stdin and writes its solution on stdout.
//! - Both must exit successfully within their timeout.
#![warn(missing_docs)]

pub use anyhow;

pub mod arena;
pub mod battle;
mod cgroup_manager;
pub mod configuration;
pub mod constraints;
pub mod error;
pub mod fight;
mod logger;
pub mod match_result;
pub mod observer;
pub mod points;
pub mod problem;
pub mod problems;
pub mod sandbox;
mod scheduler;
pub mod team;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use algo_battle::prelude::*;
/// ```
pub mod prelude {
    pub use crate::arena::{Arena, MatchOutcome};
    pub use crate::battle::{Averaged, Battle, BattleKind, Iterated, RoundResult};
    pub use crate::configuration::Configuration;
    pub use crate::constraints::ConstraintsBuilder;
    pub use crate::error::EngineError;
    pub use crate::observer::{ConsoleObserver, NoopObserver, Observer};
    pub use crate::problem::Problem;
    pub use crate::problems::pair_sum::PairSum;
    pub use crate::sandbox::{Interrupt, ProcessSandbox, Sandbox};
    pub use crate::team::{collect_teams, TeamSpec};
}
