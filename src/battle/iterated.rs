use serde::Serialize;
use tracing::trace;

use super::Fighter;
use crate::{error::EngineError, problem::Problem};

/// Searches for the largest instance size the solver handles.
///
/// Starting at the problem's minimal size, sizes grow by a step multiplied by `exponent` after
/// every solved fight, up to `cap`. The first failure starts a bisection between the last solved
/// size and the failed one. Solvability is assumed to decrease with size; the search does not
/// detect solvers that break this assumption.
///
/// A fight counts as solved when its score is positive and at least `approximation_ratio`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Iterated {
    /// Largest size ever fought.
    pub cap: u64,
    /// Step growth factor.
    pub exponent: u32,
    /// Minimal score for a fight to count as solved.
    pub approximation_ratio: f64,
}

impl Default for Iterated {
    fn default() -> Self {
        Self {
            cap: 50_000,
            exponent: 2,
            approximation_ratio: 1.0,
        }
    }
}

impl Iterated {
    /// Default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the largest size ever fought.
    #[must_use]
    pub fn with_cap(mut self, cap: u64) -> Self {
        self.cap = cap;
        self
    }

    /// Set the step growth factor.
    #[must_use]
    pub fn with_exponent(mut self, exponent: u32) -> Self {
        self.exponent = exponent;
        self
    }

    /// Set the minimal score of a solved fight.
    #[must_use]
    pub fn with_approximation_ratio(mut self, ratio: f64) -> Self {
        self.approximation_ratio = ratio;
        self
    }

    pub(super) fn validate<P: Problem>(&self, problem: &P) -> Result<(), EngineError> {
        if self.exponent == 0 {
            return Err(EngineError::Configuration(
                "iterated battles need an exponent of at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.approximation_ratio) {
            return Err(EngineError::Configuration(format!(
                "approximation ratio {} is outside [0, 1]",
                self.approximation_ratio
            )));
        }
        if self.approximation_ratio != 1.0 && !problem.approximable() {
            return Err(EngineError::Configuration(format!(
                "{} is not approximable, the approximation ratio must be 1",
                problem.name()
            )));
        }
        Ok(())
    }

    fn solved(&self, score: f64) -> bool {
        score > 0.0 && score >= self.approximation_ratio
    }

    /// Run one round and return the largest solved size, `0` when nothing was solved.
    ///
    /// # Errors
    /// Only [`EngineError::Interrupted`].
    pub fn run(&self, fighter: &mut impl Fighter) -> Result<u64, EngineError> {
        let min_size = fighter.min_size();
        if min_size > self.cap {
            return Ok(0);
        }

        let mut size = min_size;
        let mut step: u64 = 1;
        let mut solved = None;
        let failed = loop {
            fighter.progress(&[("size", size.to_string()), ("cap", self.cap.to_string())]);
            let outcome = fighter.fight(size)?;
            if !self.solved(outcome.score) {
                break size;
            }
            solved = Some(size);
            if size >= self.cap {
                trace!("solved up to the cap");
                return Ok(self.cap);
            }
            step = step.saturating_mul(u64::from(self.exponent));
            size = size.saturating_add(step).min(self.cap);
        };

        let mut low = solved.unwrap_or(min_size.saturating_sub(1));
        let mut high = failed;
        trace!(low, high, "bisecting");
        while high - low > 1 {
            let mid = low + (high - low) / 2;
            fighter.progress(&[("size", mid.to_string()), ("solved", low.to_string())]);
            if self.solved(fighter.fight(mid)?.score) {
                low = mid;
                solved = Some(mid);
            } else {
                high = mid;
            }
        }
        Ok(solved.map_or(0, |_| low))
    }
}

#[cfg(test)]
mod iterated_tests {
    use super::*;
    use crate::{
        battle::battle_tests::Threshold,
        problems::pair_sum::PairSum,
    };

    #[test]
    fn solver_failing_everything_scores_zero() {
        let mut fighter = Threshold::up_to(0);
        assert_eq!(Iterated::new().run(&mut fighter).unwrap(), 0);
        assert_eq!(fighter.sizes, [1]);
    }

    #[test]
    fn solver_never_failing_reaches_the_cap() {
        let mut fighter = Threshold::never_fails();
        assert_eq!(Iterated::new().with_cap(100).run(&mut fighter).unwrap(), 100);
        assert_eq!(fighter.sizes, [1, 3, 7, 15, 31, 63, 100]);
    }

    #[test]
    fn converges_to_the_true_maximum() {
        for max in [1, 2, 5, 16, 17, 99, 1_000, 49_999] {
            let mut fighter = Threshold::up_to(max);
            assert_eq!(Iterated::new().run(&mut fighter).unwrap(), max, "max = {max}");
        }
    }

    #[test]
    fn failure_at_cap_bisects_below_it() {
        let mut fighter = Threshold::up_to(80);
        assert_eq!(Iterated::new().with_cap(100).run(&mut fighter).unwrap(), 80);
    }

    #[test]
    fn min_size_above_cap_fights_nothing() {
        let mut fighter = Threshold {
            min: 10,
            ..Threshold::never_fails()
        };
        assert_eq!(Iterated::new().with_cap(5).run(&mut fighter).unwrap(), 0);
        assert!(fighter.sizes.is_empty());
    }

    #[test]
    fn starts_at_min_size() {
        let mut fighter = Threshold {
            min: 4,
            ..Threshold::up_to(3)
        };
        assert_eq!(Iterated::new().run(&mut fighter).unwrap(), 0);
        assert_eq!(fighter.sizes, [4]);
    }

    #[test]
    fn scores_below_the_ratio_are_failures() {
        let mut fighter = Threshold {
            score: 0.5,
            ..Threshold::never_fails()
        };
        assert_eq!(Iterated::new().run(&mut fighter).unwrap(), 0);

        let mut fighter = Threshold {
            score: 0.5,
            ..Threshold::up_to(20)
        };
        let iterated = Iterated::new().with_approximation_ratio(0.5);
        assert_eq!(iterated.run(&mut fighter).unwrap(), 20);
    }

    #[test]
    fn ratio_needs_an_approximable_problem() {
        assert!(Iterated::new().validate(&PairSum).is_ok());
        assert!(matches!(
            Iterated::new().with_approximation_ratio(0.9).validate(&PairSum),
            Err(EngineError::Configuration(_))
        ));
        assert!(Iterated::new().with_exponent(0).validate(&PairSum).is_err());
    }
}
