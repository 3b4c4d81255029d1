//! Progress notifications.
//!
//! The arena notifies an [`Observer`] of everything it does: program builds, battles, fights
//! and algorithm progress. Observers are called synchronously from the build loop and from
//! battle workers, so they must be cheap and must never block.

use std::{
    collections::BTreeMap,
    io::Write,
    sync::Mutex,
    time::Duration,
};

use crate::{
    battle::RoundResult, error::BuildError, fight::FightOutcome, match_result::MatchupId,
    sandbox::Role,
};

/// Receives match events. Every method defaults to doing nothing.
pub trait Observer: Send + Sync {
    /// A program build started.
    fn build_started(&self, _team: &str, _role: Role, _timeout: Duration) {}

    /// A program build finished, successfully when `error` is `None`.
    fn build_finished(&self, _team: &str, _role: Role, _error: Option<&BuildError>) {}

    /// Every team has been built (and restored in safe build mode).
    fn teams_ready(&self, _active: &[String], _excluded: &[String]) {}

    /// The first round of a matchup is about to start.
    fn battle_started(&self, _matchup: &MatchupId, _rounds: usize) {}

    /// One round of a matchup finished and was recorded.
    fn round_completed(&self, _matchup: &MatchupId, _round: usize, _result: &RoundResult) {}

    /// Every round of a matchup was recorded.
    fn battle_completed(&self, _matchup: &MatchupId) {}

    /// A fight started. Its generator and solver run with the given timeouts, one after the other.
    fn fight_started(
        &self,
        _matchup: &MatchupId,
        _size: u64,
        _generator_timeout: Duration,
        _solver_timeout: Duration,
    ) {
    }

    /// A fight ended after `elapsed`.
    fn fight_ended(&self, _matchup: &MatchupId, _outcome: &FightOutcome, _elapsed: Duration) {}

    /// Free-form progress data published by a battle algorithm.
    fn battle_progress(&self, _matchup: &MatchupId, _data: &[(&str, String)]) {}
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Prints builds and running battles to stdout, rewriting the current line as battles progress.
#[derive(Debug, Default)]
pub struct ConsoleObserver {
    running: Mutex<BTreeMap<MatchupId, String>>,
}

impl ConsoleObserver {
    /// A console observer with no running battle.
    pub fn new() -> Self {
        Self::default()
    }

    fn print_running(&self) {
        let Ok(running) = self.running.lock() else {
            return;
        };
        // clear, green, default, start of line
        print!(
            "\x1b[2K\x1b[32mRunning...:\x1b[39m {}\x1b[0G",
            running
                .iter()
                .map(|(matchup, status)| format!("{matchup} {status}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let _ = std::io::stdout().flush();
    }

    fn set_status(&self, matchup: &MatchupId, status: String) {
        if let Ok(mut running) = self.running.lock() {
            running.insert(matchup.clone(), status);
        }
        self.print_running();
    }
}

impl Observer for ConsoleObserver {
    fn build_started(&self, team: &str, role: Role, _timeout: Duration) {
        print!("Building {role} of {team}... ");
        let _ = std::io::stdout().flush();
    }

    fn build_finished(&self, _team: &str, _role: Role, error: Option<&BuildError>) {
        match error {
            None => println!("\x1b[32mOk\x1b[0m"),
            Some(e) => println!("\x1b[31m{e}\x1b[0m"),
        }
    }

    fn teams_ready(&self, active: &[String], excluded: &[String]) {
        println!("Teams: {}", active.join(", "));
        if !excluded.is_empty() {
            println!("\x1b[33mExcluded: {}\x1b[0m", excluded.join(", "));
        }
    }

    fn battle_started(&self, matchup: &MatchupId, rounds: usize) {
        if self.running.lock().is_ok_and(|running| running.is_empty()) {
            // long status lines are rewritten in place
            print!("\x1b[?7l");
        }
        self.set_status(matchup, format!("{rounds} rounds"));
    }

    fn round_completed(&self, matchup: &MatchupId, round: usize, result: &RoundResult) {
        // clear line, green matchup, result, start of line
        println!("\x1b[2K\x1b[32m{matchup} round {}: \x1b[39m{result}\x1b[0G", round + 1);
        self.print_running();
    }

    fn battle_completed(&self, matchup: &MatchupId) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(matchup);
            if running.is_empty() {
                print!("\x1b[2K\x1b[?7h");
            }
        }
        self.print_running();
    }

    fn fight_started(&self, matchup: &MatchupId, size: u64, _: Duration, _: Duration) {
        self.set_status(matchup, format!("n={size}"));
    }

    fn battle_progress(&self, matchup: &MatchupId, data: &[(&str, String)]) {
        let status = data
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        self.set_status(matchup, status);
    }
}
