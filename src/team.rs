//! Teams, matchups and the team manager.
//!
//! [`TeamManager::build`] turns [`TeamSpec`]s into built [`Team`]s. A team whose build fails is
//! excluded from the match; the match only stops when no team is left. In safe build mode each
//! team's programs are archived right after its build and restored once every team is built,
//! so no build ever sees the artifacts of another team.
//!
//! The manager owns the built programs and releases them when dropped.

use std::{
    collections::HashSet,
    fmt::Display,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use tracing::{info, instrument, warn};

use crate::{
    configuration::Configuration,
    constraints::Constraints,
    error::{BuildError, EngineError},
    match_result::MatchupId,
    observer::Observer,
    sandbox::{ArchiveToken, Interrupt, ProgramHandle, Role, Sandbox},
};

/// Where to find the programs of a team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamSpec {
    /// Team name, normalized before use.
    pub name: String,
    /// Generator program folder.
    pub generator: PathBuf,
    /// Solver program folder.
    pub solver: PathBuf,
}

impl TeamSpec {
    /// Create a spec from a name and two program folders.
    pub fn new(name: impl Into<String>, generator: impl Into<PathBuf>, solver: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            generator: generator.into(),
            solver: solver.into(),
        }
    }
}

/// Normalize a team name: trimmed, spaces replaced by `_`, lowercase.
pub fn normalize_name(name: &str) -> String {
    name.trim().replace(' ', "_").to_lowercase()
}

/// Collect every team found in `dir`.
///
/// Each subdirectory holding a `generator/` and a `solver/` folder is a team named after the
/// subdirectory. Other entries are skipped. Teams are returned sorted by folder name.
///
/// # Errors
/// Returned when `dir` cannot be read.
#[instrument]
pub fn collect_teams(dir: &Path) -> anyhow::Result<Vec<TeamSpec>> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("error reading '{}'", dir.display()))?
        .collect::<Result<Vec<_>, _>>()
        .context("one entry cannot be read in directory")?;
    entries.sort_by_key(|e| e.file_name());

    let mut teams = vec![];
    for entry in entries {
        let path = entry.path();
        let generator = path.join("generator");
        let solver = path.join("solver");
        if !generator.is_dir() || !solver.is_dir() {
            warn!("skipping {}: no generator/ and solver/ folders", path.display());
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        teams.push(TeamSpec::new(name, generator, solver));
    }
    info!("found {} teams in {}", teams.len(), dir.display());
    Ok(teams)
}

/// A team with both of its programs built.
#[derive(Debug, PartialEq, Eq)]
pub struct Team {
    name: String,
    generator: ProgramHandle,
    solver: ProgramHandle,
}

impl Team {
    /// Normalized team name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Built generator.
    pub fn generator(&self) -> &ProgramHandle {
        &self.generator
    }

    /// Built solver.
    pub fn solver(&self) -> &ProgramHandle {
        &self.solver
    }
}

/// Who generates and who solves.
#[derive(Debug, Clone)]
pub enum Matchup {
    /// The only team plays against itself.
    Solo(Arc<Team>),
    /// Two distinct teams.
    Versus {
        /// Team whose generator runs.
        generator: Arc<Team>,
        /// Team whose solver runs.
        solver: Arc<Team>,
    },
}

impl Matchup {
    /// Team whose generator runs.
    pub fn generator(&self) -> &Team {
        match self {
            Matchup::Solo(team) => team,
            Matchup::Versus { generator, .. } => generator,
        }
    }

    /// Team whose solver runs.
    pub fn solver(&self) -> &Team {
        match self {
            Matchup::Solo(team) => team,
            Matchup::Versus { solver, .. } => solver,
        }
    }

    /// Key of this matchup in a [`MatchResult`](crate::match_result::MatchResult).
    pub fn id(&self) -> MatchupId {
        MatchupId::new(self.generator().name(), self.solver().name())
    }
}

impl Display for Matchup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Matchup::Solo(team) => write!(f, "{} (solo)", team.name()),
            Matchup::Versus { generator, solver } => {
                write!(f, "{} vs {}", generator.name(), solver.name())
            }
        }
    }
}

/// A team whose programs were moved out of the live store.
///
/// Dropping it without [`restore`](Self::restore) restores then releases both programs.
struct ArchivedTeam {
    sandbox: Arc<dyn Sandbox>,
    name: String,
    generator: Option<ArchiveToken>,
    solver: Option<ArchiveToken>,
}

impl ArchivedTeam {
    fn archive(team: Team, sandbox: &Arc<dyn Sandbox>) -> anyhow::Result<Self> {
        let Team {
            name,
            generator,
            solver,
        } = team;
        let kept = generator.clone();
        let generator = match sandbox.archive(generator) {
            Ok(token) => token,
            Err(e) => {
                sandbox.release(kept);
                sandbox.release(solver);
                return Err(e);
            }
        };
        let mut archived = Self {
            sandbox: sandbox.clone(),
            name,
            generator: Some(generator),
            solver: None,
        };
        let kept = solver.clone();
        match sandbox.archive(solver) {
            Ok(token) => archived.solver = Some(token),
            Err(e) => {
                sandbox.release(kept);
                return Err(e);
            }
        }
        Ok(archived)
    }

    /// Restore one program, discarding its archive when that fails.
    fn restore_program(&self, token: ArchiveToken) -> anyhow::Result<ProgramHandle> {
        let kept = token.clone();
        self.sandbox.restore(token).inspect_err(|_| self.sandbox.discard(kept))
    }

    fn restore(mut self) -> anyhow::Result<Team> {
        // Tokens stay in `self` until used, so an early return still cleans up the other one.
        let Some(generator) = self.generator.take() else {
            anyhow::bail!("team {} was only partially archived", self.name);
        };
        let generator = self.restore_program(generator)?;
        let Some(solver) = self.solver.take() else {
            self.sandbox.release(generator);
            anyhow::bail!("team {} was only partially archived", self.name);
        };
        let solver = match self.restore_program(solver) {
            Ok(solver) => solver,
            Err(e) => {
                self.sandbox.release(generator);
                return Err(e);
            }
        };
        Ok(Team {
            name: std::mem::take(&mut self.name),
            generator,
            solver,
        })
    }
}

impl Drop for ArchivedTeam {
    fn drop(&mut self) {
        for token in [self.generator.take(), self.solver.take()].into_iter().flatten() {
            match self.restore_program(token) {
                Ok(program) => self.sandbox.release(program),
                Err(e) => warn!("could not restore archived program of {}: {e:#}", self.name),
            }
        }
    }
}

/// Builds teams and owns their programs for the whole match.
pub struct TeamManager {
    sandbox: Arc<dyn Sandbox>,
    active: Vec<Arc<Team>>,
    excluded: Vec<(TeamSpec, BuildError)>,
}

impl std::fmt::Debug for TeamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamManager")
            .field("active", &self.active)
            .field("excluded", &self.excluded)
            .finish_non_exhaustive()
    }
}

impl TeamManager {
    /// Build every team of `specs`, generator then solver, one team after the other.
    ///
    /// # Errors
    /// [`EngineError::NoTeams`] when every build failed, [`EngineError::Interrupted`] when
    /// `interrupt` triggered. Programs built so far are released in both cases.
    #[instrument(skip_all, fields(teams = specs.len()))]
    pub fn build(
        specs: Vec<TeamSpec>,
        sandbox: Arc<dyn Sandbox>,
        constraints: &Constraints,
        config: &Configuration,
        observer: &dyn Observer,
        interrupt: &Interrupt,
    ) -> Result<TeamManager, EngineError> {
        let mut manager = TeamManager {
            sandbox,
            active: vec![],
            excluded: vec![],
        };
        let mut names = HashSet::new();
        let mut archived = vec![];

        for spec in specs {
            if interrupt.is_triggered() {
                return Err(EngineError::Interrupted);
            }
            let name = normalize_name(&spec.name);
            if names.contains(&name) {
                warn!("excluding {}: duplicate name", spec.name);
                manager.excluded.push((spec, BuildError::DuplicateName(name)));
                continue;
            }

            let team = match manager.build_team(&name, &spec, constraints, observer, interrupt) {
                Ok(team) => team,
                Err(BuildError::Interrupted) => return Err(EngineError::Interrupted),
                Err(e) => {
                    warn!("excluding {name}: {e}");
                    manager.excluded.push((spec, e));
                    continue;
                }
            };
            names.insert(name);

            if config.safe_build {
                match ArchivedTeam::archive(team, &manager.sandbox) {
                    Ok(team) => archived.push((spec, team)),
                    Err(e) => {
                        warn!("excluding {}: could not archive: {e:#}", spec.name);
                        manager.excluded.push((spec, BuildError::Io(e)));
                    }
                }
            } else {
                manager.active.push(Arc::new(team));
            }
        }

        for (spec, team) in archived {
            match team.restore() {
                Ok(team) => manager.active.push(Arc::new(team)),
                Err(e) => {
                    warn!("excluding {}: could not restore: {e:#}", spec.name);
                    manager.excluded.push((spec, BuildError::Io(e)));
                }
            }
        }

        observer.teams_ready(&manager.active_names(), &manager.excluded_names());
        if manager.active.is_empty() {
            return Err(EngineError::NoTeams);
        }
        info!(active = ?manager.active_names(), excluded = ?manager.excluded_names());
        Ok(manager)
    }

    fn build_team(
        &self,
        name: &str,
        spec: &TeamSpec,
        constraints: &Constraints,
        observer: &dyn Observer,
        interrupt: &Interrupt,
    ) -> Result<Team, BuildError> {
        let generator = self.build_program(name, &spec.generator, Role::Generator, constraints, observer, interrupt)?;
        let solver = match self.build_program(name, &spec.solver, Role::Solver, constraints, observer, interrupt) {
            Ok(solver) => solver,
            Err(e) => {
                self.sandbox.release(generator);
                return Err(e);
            }
        };
        Ok(Team {
            name: name.to_string(),
            generator,
            solver,
        })
    }

    fn build_program(
        &self,
        name: &str,
        dir: &Path,
        role: Role,
        constraints: &Constraints,
        observer: &dyn Observer,
        interrupt: &Interrupt,
    ) -> Result<ProgramHandle, BuildError> {
        let timeout = constraints.build_timeout();
        observer.build_started(name, role, timeout);
        let res = self.sandbox.build(dir, name, role, timeout, interrupt);
        observer.build_finished(name, role, res.as_ref().err());
        res
    }

    /// Teams whose programs are built.
    pub fn active(&self) -> &[Arc<Team>] {
        &self.active
    }

    /// Teams that could not take part, with the reason.
    pub fn excluded(&self) -> &[(TeamSpec, BuildError)] {
        &self.excluded
    }

    pub(crate) fn take_excluded(&mut self) -> Vec<(TeamSpec, BuildError)> {
        std::mem::take(&mut self.excluded)
    }

    fn active_names(&self) -> Vec<String> {
        self.active.iter().map(|t| t.name.clone()).collect()
    }

    fn excluded_names(&self) -> Vec<String> {
        self.excluded.iter().map(|(spec, _)| spec.name.clone()).collect()
    }

    /// Every matchup of the match: the solo matchup of the only team, or every ordered pair
    /// of distinct teams.
    pub fn matchups(&self) -> Vec<Matchup> {
        if let [team] = self.active.as_slice() {
            return vec![Matchup::Solo(team.clone())];
        }
        let mut matchups = vec![];
        for (i, first) in self.active.iter().enumerate() {
            for second in &self.active[i + 1..] {
                matchups.push(Matchup::Versus {
                    generator: first.clone(),
                    solver: second.clone(),
                });
                matchups.push(Matchup::Versus {
                    generator: second.clone(),
                    solver: first.clone(),
                });
            }
        }
        matchups
    }
}

impl Drop for TeamManager {
    fn drop(&mut self) {
        for team in self.active.drain(..) {
            self.sandbox.release(team.generator.clone());
            self.sandbox.release(team.solver.clone());
        }
    }
}
