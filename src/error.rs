//! Error types shared by the sandbox, the team manager and the arena.
//!
//! Only [`EngineError`] ever escapes [`Arena::run`](crate::arena::Arena::run). Build and run
//! failures of individual programs are mapped to team exclusions and fight outcomes instead.

use std::time::Duration;

/// Why a program could not be built.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The build did not finish within the build timeout and was killed.
    #[error("build timed out after {0:?}")]
    Timeout(Duration),

    /// The build tool exited unsuccessfully.
    #[error("build failed: {0}")]
    Failed(String),

    /// Another team already uses this (normalized) name.
    #[error("team name '{0}' is already in use")]
    DuplicateName(String),

    /// The build was aborted by an interrupt.
    #[error("build interrupted")]
    Interrupted,

    /// Anything else that went wrong around the build (missing folder, archive error, ...).
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Why a sandboxed program run did not produce usable output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    /// The program exceeded its wall-clock timeout and was killed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The program exited with a non-zero status (`None` when killed by a signal).
    #[error("exited with status {0:?}")]
    NonZeroExit(Option<i32>),

    /// The program exited cleanly but wrote nothing.
    #[error("produced no output")]
    NoOutput,

    /// The run was aborted by an interrupt.
    #[error("interrupted")]
    Interrupted,

    /// The program output could not be read.
    #[error("could not read program output: {0}")]
    Output(String),

    /// The program could not be started at all.
    #[error("could not launch program: {0}")]
    Launch(String),
}

/// Fatal errors that abort a whole match.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Inconsistent settings, detected before any team is built.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every team failed to build.
    #[error("no team could be built")]
    NoTeams,

    /// The match was interrupted; built programs have been released.
    #[error("match interrupted")]
    Interrupted,

    /// A battle worker panicked.
    #[error("battle worker panicked: {0}")]
    WorkerPanicked(String),

    /// Unexpected sandbox failure outside of a fight (e.g. restoring an archive).
    #[error(transparent)]
    Sandbox(#[from] anyhow::Error),
}
