//! One generator/solver exchange at a given instance size.
//!
//! The generator reads the instance size on stdin and prints an instance (and a certificate when
//! the problem asks for one). The solver reads the encoded instance and prints its solution.
//! Whichever side misbehaves loses the fight: a failing generator gives the solver a score of
//! `1.0` without running it, a failing solver scores `0.0`.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::{
    constraints::{Constraints, ProgramLimits},
    error::{EngineError, RunError},
    observer::Observer,
    problem::Problem,
    sandbox::{Interrupt, ProgramHandle, Role, RunLimits, Sandbox},
    team::Matchup,
};

/// Why a side lost a fight.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FailureReason {
    /// The program did not produce usable output.
    #[error("run failed: {0}")]
    Run(RunError),
    /// The output could not be decoded or parsed.
    #[error("undecodable output: {0}")]
    Decode(String),
    /// The generated instance is not well-formed.
    #[error("invalid instance")]
    InvalidInstance,
    /// The solution (or certificate) is not well-formed.
    #[error("malformed solution")]
    MalformedSolution,
    /// The solution (or certificate) does not solve the instance.
    #[error("wrong solution")]
    WrongSolution,
}

/// The side that failed a fight and why.
#[derive(Debug, Clone, PartialEq)]
pub struct FightFailure {
    /// The program that failed.
    pub side: Role,
    /// What went wrong.
    pub reason: FailureReason,
}

/// Result of one fight.
#[derive(Debug, Clone, PartialEq)]
pub struct FightOutcome {
    /// Instance size the generator was asked for.
    pub size: u64,
    /// Solver score in `[0, 1]`.
    pub score: f64,
    /// Wall-clock time of the generator run.
    pub generator_runtime: Duration,
    /// Wall-clock time of the solver run, `None` when the solver never ran.
    pub solver_runtime: Option<Duration>,
    /// Set when one side failed.
    pub failure: Option<FightFailure>,
}

impl FightOutcome {
    fn failed(mut self, side: Role, reason: FailureReason) -> Self {
        debug!("{side} failed at size {}: {reason}", self.size);
        self.score = match side {
            Role::Generator => 1.0,
            Role::Solver => 0.0,
        };
        self.failure = Some(FightFailure { side, reason });
        self
    }
}

/// Runs fights of one battle, on the CPUs reserved for it.
pub struct FightExecutor<'a, P: Problem> {
    problem: &'a P,
    sandbox: &'a dyn Sandbox,
    constraints: &'a Constraints,
    interrupt: &'a Interrupt,
    observer: &'a dyn Observer,
}

impl<'a, P: Problem> FightExecutor<'a, P> {
    /// Fights use `constraints` for limits and CPUs and stop when `interrupt` triggers.
    pub fn new(
        problem: &'a P,
        sandbox: &'a dyn Sandbox,
        constraints: &'a Constraints,
        interrupt: &'a Interrupt,
        observer: &'a dyn Observer,
    ) -> Self {
        Self {
            problem,
            sandbox,
            constraints,
            interrupt,
            observer,
        }
    }

    /// The problem fights are about.
    pub fn problem(&self) -> &P {
        self.problem
    }

    /// The observer notified of every fight.
    pub fn observer(&self) -> &dyn Observer {
        self.observer
    }

    /// Run one fight of `matchup` at instance size `size`.
    ///
    /// # Errors
    /// Only [`EngineError::Interrupted`]: every program failure is part of the outcome.
    pub fn fight(&self, matchup: &Matchup, size: u64) -> Result<FightOutcome, EngineError> {
        let id = matchup.id();
        self.observer.fight_started(
            &id,
            size,
            self.constraints.generator().timeout,
            self.constraints.solver().timeout,
        );
        let start = Instant::now();
        let outcome = self.run_fight(matchup, size)?;
        trace!(%id, size, score = outcome.score);
        self.observer.fight_ended(&id, &outcome, start.elapsed());
        Ok(outcome)
    }

    fn run_fight(&self, matchup: &Matchup, size: u64) -> Result<FightOutcome, EngineError> {
        let outcome = FightOutcome {
            size,
            score: 1.0,
            generator_runtime: Duration::ZERO,
            solver_runtime: None,
            failure: None,
        };

        let limits = self.limits(self.constraints.generator(), |base| {
            self.problem.generator_memory(base, size)
        });
        let (output, runtime) =
            self.run(matchup.generator().generator(), format!("{size}\n").as_bytes(), &limits)?;
        let mut outcome = FightOutcome {
            generator_runtime: runtime,
            ..outcome
        };
        let generated = match output {
            Ok(output) => output,
            Err(e) => return Ok(outcome.failed(Role::Generator, FailureReason::Run(e))),
        };
        let (instance, certificate) = match self.read_instance(&generated, size) {
            Ok(generated) => generated,
            Err(reason) => return Ok(outcome.failed(Role::Generator, reason)),
        };

        let limits = self.limits(self.constraints.solver(), |base| {
            self.problem.solver_memory(base, size)
        });
        let input = self.problem.encode(&instance);
        let (output, runtime) = self.run(matchup.solver().solver(), &input, &limits)?;
        outcome.solver_runtime = Some(runtime);
        let solved = match output {
            Ok(output) => output,
            Err(e) => return Ok(outcome.failed(Role::Solver, FailureReason::Run(e))),
        };
        let solution = match self.read_solution(&solved, &instance, size) {
            Ok(solution) => solution,
            Err(reason) => return Ok(outcome.failed(Role::Solver, reason)),
        };

        let score = self
            .problem
            .score(&instance, &solution, certificate.as_ref());
        outcome.score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Ok(outcome)
    }

    fn limits(&self, limits: ProgramLimits, scale: impl Fn(u64) -> u64) -> RunLimits {
        RunLimits {
            timeout: limits.timeout,
            memory_mb: limits.memory_mb.map(scale),
            cpus: self.constraints.cpu_list(),
        }
    }

    /// Run a program. The outer error is an interrupt, the inner one a program failure.
    #[allow(clippy::type_complexity)]
    fn run(
        &self,
        program: &ProgramHandle,
        input: &[u8],
        limits: &RunLimits,
    ) -> Result<(Result<Vec<u8>, RunError>, Duration), EngineError> {
        let start = Instant::now();
        let output = self.sandbox.run(program, input, limits, self.interrupt);
        let runtime = start.elapsed();
        if matches!(output, Err(RunError::Interrupted)) || self.interrupt.is_triggered() {
            return Err(EngineError::Interrupted);
        }
        Ok((output, runtime))
    }

    fn read_instance(
        &self,
        bytes: &[u8],
        size: u64,
    ) -> Result<(P::Instance, Option<P::Solution>), FailureReason> {
        let raw = self.problem.decode(bytes).map_err(decode_error)?;
        let (instance, certificate) = self.problem.split(raw);
        let instance = self
            .problem
            .parse_instance(&instance, size)
            .map_err(decode_error)?;
        if !self.problem.validate_instance(&instance, size) {
            return Err(FailureReason::InvalidInstance);
        }
        if !self.problem.with_solution() {
            return Ok((instance, None));
        }

        let certificate = self
            .problem
            .parse_solution(&certificate, size)
            .map_err(decode_error)?;
        if !self
            .problem
            .validate_solution_format(&certificate, size, true)
        {
            return Err(FailureReason::MalformedSolution);
        }
        if !self
            .problem
            .validate_solution(&certificate, &instance, size, true)
        {
            return Err(FailureReason::WrongSolution);
        }
        Ok((instance, Some(certificate)))
    }

    fn read_solution(
        &self,
        bytes: &[u8],
        instance: &P::Instance,
        size: u64,
    ) -> Result<P::Solution, FailureReason> {
        let raw = self.problem.decode(bytes).map_err(decode_error)?;
        let solution = self
            .problem
            .parse_solution(&raw, size)
            .map_err(decode_error)?;
        if !self
            .problem
            .validate_solution_format(&solution, size, false)
        {
            return Err(FailureReason::MalformedSolution);
        }
        if !self
            .problem
            .validate_solution(&solution, instance, size, false)
        {
            return Err(FailureReason::WrongSolution);
        }
        Ok(solution)
    }
}

fn decode_error(e: anyhow::Error) -> FailureReason {
    FailureReason::Decode(format!("{e:#}"))
}
