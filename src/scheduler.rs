use std::collections::VecDeque;

use tracing::trace;

use crate::{constraints::Constraints, team::Matchup};

/// One matchup to battle, with the CPUs reserved for it.
pub(crate) struct BattleJob {
    pub matchup: Matchup,
    pub resources: Constraints,
}

/// Hands out matchups as long as there are CPUs left and fewer than `max_running` battles run.
pub(crate) struct BattleScheduler {
    pending: VecDeque<Matchup>,
    resources: Constraints,
    running: usize,
    max_running: usize,
}

impl BattleScheduler {
    pub fn new(matchups: Vec<Matchup>, resources: Constraints, max_running: usize) -> Self {
        BattleScheduler {
            pending: matchups.into(),
            resources,
            running: 0,
            max_running: max_running.max(1),
        }
    }

    /// Battles that can start now.
    pub fn advance(&mut self) -> Vec<BattleJob> {
        let mut jobs = vec![];
        while self.running < self.max_running && !self.pending.is_empty() {
            let Some(resources) = self.resources.try_take_battle() else {
                break;
            };
            let Some(matchup) = self.pending.pop_front() else {
                self.resources.add(resources);
                break;
            };
            trace!(%matchup, cpus = resources.cpu_list(), "scheduling");
            self.running += 1;
            jobs.push(BattleJob { matchup, resources });
        }
        jobs
    }

    /// A battle ended and gave its CPUs back. Returns the battles that can start now.
    pub fn on_finished(&mut self, freed: Constraints) -> Vec<BattleJob> {
        self.resources.add(freed);
        self.running = self.running.saturating_sub(1);
        self.advance()
    }

    /// Drop every battle that did not start yet.
    pub fn cancel(&mut self) {
        self.pending.clear();
    }

    /// Nothing is running and nothing is left to run.
    pub fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.running == 0
    }

    /// Nothing is running but pending battles cannot get resources.
    pub fn is_stalled(&self) -> bool {
        self.running == 0 && !self.pending.is_empty()
    }
}

#[cfg(test)]
mod scheduler_tests {
    use std::{path::Path, sync::Arc, time::Duration};

    use super::*;
    use crate::{
        configuration::Configuration,
        error::{BuildError, RunError},
        observer::NoopObserver,
        sandbox::{ArchiveToken, Interrupt, ProgramHandle, Role, RunLimits, Sandbox},
        team::{TeamManager, TeamSpec},
    };

    struct Builder;

    impl Sandbox for Builder {
        fn build(&self, dir: &Path, team: &str, role: Role, _: Duration, _: &Interrupt) -> Result<ProgramHandle, BuildError> {
            Ok(ProgramHandle::new(team, role, dir))
        }
        fn run(&self, _: &ProgramHandle, _: &[u8], _: &RunLimits, _: &Interrupt) -> Result<Vec<u8>, RunError> {
            Err(RunError::NoOutput)
        }
        fn archive(&self, program: ProgramHandle) -> anyhow::Result<ArchiveToken> {
            Ok(ArchiveToken::new(program, "/archive"))
        }
        fn restore(&self, token: ArchiveToken) -> anyhow::Result<ProgramHandle> {
            Ok(token.program().clone())
        }
        fn release(&self, _: ProgramHandle) {}
    }

    fn scheduler(cpus: &str, max_running: usize) -> (TeamManager, BattleScheduler) {
        let constraints = Constraints::builder().with_cpu_list(cpus).build().unwrap();
        let manager = TeamManager::build(
            ["a", "b", "c"].iter().map(|t| TeamSpec::new(*t, "/g", "/s")).collect(),
            Arc::new(Builder),
            &constraints,
            &Configuration::new(),
            &NoopObserver,
            &Interrupt::new(),
        )
        .unwrap();
        let scheduler = BattleScheduler::new(manager.matchups(), constraints, max_running);
        (manager, scheduler)
    }

    #[test]
    fn parallelism_is_bounded() {
        let (_manager, mut scheduler) = scheduler("0-7", 2);
        let jobs = scheduler.advance();
        assert_eq!(jobs.len(), 2);
        assert!(scheduler.advance().is_empty());
        assert_ne!(jobs[0].resources.cpu_list(), jobs[1].resources.cpu_list());
    }

    #[test]
    fn cpus_are_recycled() {
        let (_manager, mut scheduler) = scheduler("3", 6);
        let mut jobs = scheduler.advance();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].resources.cpu_list(), "3");

        let mut ran = vec![];
        while let Some(job) = jobs.pop() {
            ran.push(job.matchup.id().to_string());
            jobs.extend(scheduler.on_finished(job.resources));
        }
        assert!(scheduler.is_finished());
        assert_eq!(ran, ["a vs b", "b vs a", "a vs c", "c vs a", "b vs c", "c vs b"]);
    }

    #[test]
    fn cancel_drops_pending_battles() {
        let (_manager, mut scheduler) = scheduler("0", 1);
        let job = scheduler.advance().pop().unwrap();
        scheduler.cancel();
        assert!(!scheduler.is_finished());
        assert!(scheduler.on_finished(job.resources).is_empty());
        assert!(scheduler.is_finished());
    }
}
