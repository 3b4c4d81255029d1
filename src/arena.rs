//! Match orchestration.
//!
//! The [`Arena`] runs a whole match:
//!
//! 1. Battle parameters are checked against the problem, before anything is built.
//! 2. Every team is built by a [`TeamManager`] (see [`team`](crate::team)).
//! 3. Every matchup gets a battle of `rounds` rounds. Battles run on worker threads, at most
//!    [`Configuration::with_parallel_battles`] at once and only while the CPU pool of the
//!    [`Constraints`] has CPUs left. Rounds of one battle run one after the other.
//! 4. Points are allocated from the [`MatchResult`] (see [`points`](crate::points)).
//!
//! Built programs are released when the match ends, whether it succeeded or not.
//!
//! # Interrupts
//!
//! [`Arena::interrupt_handle`] returns an [`Interrupt`] that can be triggered from any thread
//! (e.g. a signal handler). Running programs are killed, rounds in progress are discarded and
//! [`Arena::run`] returns [`EngineError::Interrupted`] once every program has been released.

use std::{
    panic::AssertUnwindSafe,
    sync::{
        mpsc::{self, Sender},
        Arc,
    },
};

use tracing::{error, info, instrument, trace, warn};

use crate::{
    battle::{Battle, MatchupFighter, RoundResult},
    configuration::Configuration,
    constraints::Constraints,
    error::{BuildError, EngineError},
    fight::FightExecutor,
    logger::init_logger,
    match_result::{MatchResult, MatchupId},
    observer::{ConsoleObserver, NoopObserver, Observer},
    points::{allocate, Points},
    problem::Problem,
    sandbox::{Interrupt, Sandbox},
    scheduler::{BattleJob, BattleScheduler},
    team::{Matchup, TeamManager, TeamSpec},
};

/// Everything a finished match produced.
#[derive(Debug)]
pub struct MatchOutcome {
    /// Round results of every matchup.
    pub result: MatchResult,
    /// Points of every team that took part.
    pub points: Points,
    /// Teams that took part, in build order.
    pub teams: Vec<String>,
    /// Teams that could not be built, with the reason.
    pub excluded: Vec<(TeamSpec, BuildError)>,
}

enum BattleMessage {
    Round {
        matchup: MatchupId,
        round: usize,
        result: RoundResult,
    },
    Finished {
        matchup: MatchupId,
        resources: Constraints,
        error: Option<EngineError>,
    },
}

/// Runs matches of a problem between teams.
pub struct Arena<P: Problem> {
    problem: P,
    sandbox: Arc<dyn Sandbox>,
    config: Configuration,
    constraints: Constraints,
    observer: Arc<dyn Observer>,
    interrupt: Interrupt,
}

impl<P: Problem> Arena<P> {
    /// Create an arena running `problem` in `sandbox`.
    ///
    /// Installs the file logger when `config` asks for it, and prints progress to the console in
    /// verbose mode.
    #[instrument(skip_all)]
    pub fn new(
        problem: P,
        sandbox: impl Sandbox + 'static,
        config: Configuration,
        constraints: Constraints,
    ) -> Self {
        if config.log {
            if let Err(e) = init_logger() {
                eprintln!("could not start battle log: {e:#}");
            }
        }
        trace!(?config, ?constraints);

        let observer: Arc<dyn Observer> = if config.verbose {
            Arc::new(ConsoleObserver::new())
        } else {
            Arc::new(NoopObserver)
        };
        Arena {
            problem,
            sandbox: Arc::new(sandbox),
            config,
            constraints,
            observer,
            interrupt: Interrupt::new(),
        }
    }

    /// Replace the observer notified of the match progress.
    #[must_use]
    pub fn with_observer(mut self, observer: impl Observer + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// A handle aborting the running match when triggered.
    pub fn interrupt_handle(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// The problem of this arena.
    pub fn problem(&self) -> &P {
        &self.problem
    }

    /// Run a match of `rounds` rounds of `battle` between `teams`, sharing `achievable_points`.
    ///
    /// # Errors
    /// - [`EngineError::Configuration`] when `battle` does not fit the problem. Nothing is built.
    /// - [`EngineError::NoTeams`] when no team could be built.
    /// - [`EngineError::Interrupted`] when the interrupt handle was triggered.
    /// - [`EngineError::WorkerPanicked`] when a battle worker panicked.
    #[instrument(skip_all, fields(battle = %battle.kind(), rounds = rounds))]
    pub fn run(
        &self,
        teams: Vec<TeamSpec>,
        battle: Battle,
        rounds: usize,
        achievable_points: u32,
    ) -> Result<MatchOutcome, EngineError> {
        battle.validate(&self.problem)?;
        info!(problem = self.problem.name(), teams = teams.len(), "starting match");

        let mut manager = TeamManager::build(
            teams,
            self.sandbox.clone(),
            &self.constraints,
            &self.config,
            self.observer.as_ref(),
            &self.interrupt,
        )?;

        let matchups = manager.matchups();
        let mut result = MatchResult::new(matchups.iter().map(Matchup::id));
        if rounds > 0 {
            self.run_battles(matchups, battle, rounds, &mut result)?;
        }

        let teams = manager
            .active()
            .iter()
            .map(|team| team.name().to_string())
            .collect::<Vec<_>>();
        let points = allocate(&result, &teams, battle.kind(), rounds, achievable_points);
        info!(%points, "match finished");
        Ok(MatchOutcome {
            result,
            points,
            teams,
            excluded: manager.take_excluded(),
        })
    }

    fn run_battles(
        &self,
        matchups: Vec<Matchup>,
        battle: Battle,
        rounds: usize,
        result: &mut MatchResult,
    ) -> Result<(), EngineError> {
        let mut scheduler = BattleScheduler::new(
            matchups,
            self.constraints.clone(),
            self.config.parallel_battles,
        );
        let (tx_result, rx_result) = mpsc::channel();
        let mut failure = None;

        std::thread::scope(|scope| {
            let launch = |job: BattleJob| {
                let tx_result = tx_result.clone();
                scope.spawn(move || self.battle_worker(job, battle, rounds, tx_result));
            };
            scheduler.advance().into_iter().for_each(&launch);

            while !scheduler.is_finished() {
                if scheduler.is_stalled() {
                    failure.get_or_insert(EngineError::Configuration(
                        "not enough CPUs to run a single battle".into(),
                    ));
                    scheduler.cancel();
                    break;
                }
                // a battle is running, so a message will come
                let Ok(message) = rx_result.recv() else {
                    break;
                };
                match message {
                    BattleMessage::Round {
                        matchup,
                        round,
                        result: round_result,
                    } => {
                        self.observer.round_completed(&matchup, round, &round_result);
                        if !result.push_round(&matchup, round_result) {
                            warn!("result of unknown matchup {matchup}");
                        }
                    }
                    BattleMessage::Finished {
                        matchup,
                        resources,
                        error,
                    } => {
                        self.observer.battle_completed(&matchup);
                        if let Some(e) = error {
                            error!("battle {matchup} failed: {e}");
                            failure.get_or_insert(e);
                            scheduler.cancel();
                        }
                        if self.interrupt.is_triggered() {
                            scheduler.cancel();
                        }
                        scheduler.on_finished(resources).into_iter().for_each(&launch);
                    }
                }
            }
        });

        if self.interrupt.is_triggered() {
            return Err(EngineError::Interrupted);
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn battle_worker(
        &self,
        job: BattleJob,
        battle: Battle,
        rounds: usize,
        tx_result: Sender<BattleMessage>,
    ) {
        let matchup = job.matchup.id();
        let res = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_rounds(&job, battle, rounds, &tx_result)
        }));
        let error = match res {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(panic) => Some(EngineError::WorkerPanicked(panic_message(panic.as_ref()))),
        };
        // The receiver only goes away once every battle finished.
        let _ = tx_result.send(BattleMessage::Finished {
            matchup,
            resources: job.resources,
            error,
        });
    }

    fn run_rounds(
        &self,
        job: &BattleJob,
        battle: Battle,
        rounds: usize,
        tx_result: &Sender<BattleMessage>,
    ) -> Result<(), EngineError> {
        let matchup = job.matchup.id();
        self.observer.battle_started(&matchup, rounds);
        let executor = FightExecutor::new(
            &self.problem,
            self.sandbox.as_ref(),
            &job.resources,
            &self.interrupt,
            self.observer.as_ref(),
        );

        for round in 0..rounds {
            let mut fighter = MatchupFighter::new(&executor, &job.matchup);
            let result = battle.run(&mut fighter)?;
            info!(%matchup, round, %result, "round finished");
            tx_result
                .send(BattleMessage::Round {
                    matchup: matchup.clone(),
                    round,
                    result,
                })
                .map_err(|_| EngineError::Interrupted)?;
        }
        Ok(())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
