//! Battle algorithms.
//!
//! A battle algorithm decides which fights to run for one round of a matchup and reduces their
//! outcomes to a [`RoundResult`]. There are exactly two of them, see [`Battle`].
//!
//! Algorithms never talk to the sandbox themselves: they drive a [`Fighter`], which the arena
//! backs with a [`FightExecutor`] bound to one matchup.

use std::{fmt::Display, str::FromStr};

use serde::Serialize;

use crate::{
    error::EngineError,
    fight::{FightExecutor, FightOutcome},
    match_result::MatchupId,
    problem::Problem,
    team::Matchup,
};

mod averaged;
mod iterated;

pub use averaged::Averaged;
pub use iterated::Iterated;

/// Runs fights for a battle algorithm.
pub trait Fighter {
    /// Smallest instance size that may be fought.
    fn min_size(&self) -> u64;

    /// Run one fight at instance size `size`.
    fn fight(&mut self, size: u64) -> Result<FightOutcome, EngineError>;

    /// Publish algorithm progress.
    fn progress(&self, _data: &[(&str, String)]) {}
}

/// A [`Fighter`] running the fights of one matchup.
pub struct MatchupFighter<'e, 'a, P: Problem> {
    executor: &'e FightExecutor<'a, P>,
    matchup: &'e Matchup,
    id: MatchupId,
}

impl<'e, 'a, P: Problem> MatchupFighter<'e, 'a, P> {
    /// Fight `matchup` with `executor`.
    pub fn new(executor: &'e FightExecutor<'a, P>, matchup: &'e Matchup) -> Self {
        Self {
            executor,
            matchup,
            id: matchup.id(),
        }
    }
}

impl<P: Problem> Fighter for MatchupFighter<'_, '_, P> {
    fn min_size(&self) -> u64 {
        self.executor.problem().min_size()
    }

    fn fight(&mut self, size: u64) -> Result<FightOutcome, EngineError> {
        self.executor.fight(self.matchup, size)
    }

    fn progress(&self, data: &[(&str, String)]) {
        self.executor.observer().battle_progress(&self.id, data);
    }
}

/// Result of one round of a matchup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundResult {
    /// Largest instance size the solver handled ([`Iterated`]).
    Solved(u64),
    /// Score of every fight, in order ([`Averaged`]).
    Scores(Vec<f64>),
}

impl RoundResult {
    /// The round as a single number: the solved size, or the mean score (`0` without fights).
    pub fn value(&self) -> f64 {
        match self {
            RoundResult::Solved(size) => *size as f64,
            RoundResult::Scores(scores) if scores.is_empty() => 0.0,
            RoundResult::Scores(scores) => scores.iter().sum::<f64>() / scores.len() as f64,
        }
    }
}

impl Display for RoundResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundResult::Solved(size) => write!(f, "{size}"),
            RoundResult::Scores(_) => write!(f, "{:.3}", self.value()),
        }
    }
}

/// Name of a battle algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BattleKind {
    /// See [`Iterated`].
    Iterated,
    /// See [`Averaged`].
    Averaged,
}

impl FromStr for BattleKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "iterated" => Ok(BattleKind::Iterated),
            "averaged" => Ok(BattleKind::Averaged),
            other => Err(EngineError::Configuration(format!(
                "unknown battle type '{other}'"
            ))),
        }
    }
}

impl Display for BattleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BattleKind::Iterated => f.write_str("iterated"),
            BattleKind::Averaged => f.write_str("averaged"),
        }
    }
}

/// A battle algorithm with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Battle {
    /// Search for the largest instance size the solver handles.
    Iterated(Iterated),
    /// Average scores over fights at a fixed size.
    Averaged(Averaged),
}

impl Battle {
    /// The algorithm called `kind`, with default parameters.
    pub fn from_kind(kind: BattleKind) -> Self {
        match kind {
            BattleKind::Iterated => Battle::Iterated(Iterated::default()),
            BattleKind::Averaged => Battle::Averaged(Averaged::default()),
        }
    }

    /// Which algorithm this is.
    pub fn kind(&self) -> BattleKind {
        match self {
            Battle::Iterated(_) => BattleKind::Iterated,
            Battle::Averaged(_) => BattleKind::Averaged,
        }
    }

    /// Check the parameters against `problem`.
    ///
    /// # Errors
    /// [`EngineError::Configuration`] when the parameters cannot work with `problem`.
    pub fn validate<P: Problem>(&self, problem: &P) -> Result<(), EngineError> {
        match self {
            Battle::Iterated(iterated) => iterated.validate(problem),
            Battle::Averaged(averaged) => averaged.validate(problem),
        }
    }

    /// Run one round with `fighter`.
    ///
    /// # Errors
    /// Only [`EngineError::Interrupted`], when a fight was interrupted.
    pub fn run(&self, fighter: &mut impl Fighter) -> Result<RoundResult, EngineError> {
        match self {
            Battle::Iterated(iterated) => iterated.run(fighter).map(RoundResult::Solved),
            Battle::Averaged(averaged) => averaged.run(fighter).map(RoundResult::Scores),
        }
    }
}

impl FromStr for Battle {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Battle::from_kind)
    }
}
