use serde::Serialize;

use super::Fighter;
use crate::{error::EngineError, problem::Problem};

/// Runs `iterations` fights at a fixed `instance_size` and keeps every score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Averaged {
    /// Size of every instance.
    pub instance_size: u64,
    /// Number of fights per round.
    pub iterations: u32,
}

impl Default for Averaged {
    fn default() -> Self {
        Self {
            instance_size: 10,
            iterations: 25,
        }
    }
}

impl Averaged {
    /// Default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the size of every instance.
    #[must_use]
    pub fn with_instance_size(mut self, size: u64) -> Self {
        self.instance_size = size;
        self
    }

    /// Set the number of fights per round.
    #[must_use]
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub(super) fn validate<P: Problem>(&self, problem: &P) -> Result<(), EngineError> {
        if self.iterations == 0 {
            return Err(EngineError::Configuration(
                "averaged battles need at least one iteration".into(),
            ));
        }
        if self.instance_size < problem.min_size() {
            return Err(EngineError::Configuration(format!(
                "instance size {} is below the minimal size of {} ({})",
                self.instance_size,
                problem.name(),
                problem.min_size()
            )));
        }
        Ok(())
    }

    /// Run one round and return the score of every fight.
    ///
    /// # Errors
    /// Only [`EngineError::Interrupted`].
    pub fn run(&self, fighter: &mut impl Fighter) -> Result<Vec<f64>, EngineError> {
        let mut scores = Vec::with_capacity(self.iterations as usize);
        for iteration in 0..self.iterations {
            scores.push(fighter.fight(self.instance_size)?.score);
            let average = scores.iter().sum::<f64>() / scores.len() as f64;
            fighter.progress(&[
                ("iteration", format!("{}/{}", iteration + 1, self.iterations)),
                ("average", format!("{average:.3}")),
            ]);
        }
        Ok(scores)
    }
}
