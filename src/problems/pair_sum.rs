//! Pair sum: find four distinct positions `a, b, c, d` with `x[a] + x[b] = x[c] + x[d]`.
//!
//! Generators print the `size` numbers of the instance on the first line and, on the second
//! line, the four indices of a valid quadruple. Solvers receive the first line and answer with
//! four indices.

use anyhow::{bail, Context};

use crate::problem::{Problem, RawLines};

/// The pair sum problem.
#[derive(Debug, Default, Clone, Copy)]
pub struct PairSum;

impl PairSum {
    fn parse_numbers<T: std::str::FromStr>(line: Option<&Vec<String>>) -> anyhow::Result<Vec<T>>
    where
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        let line = line.context("missing line")?;
        line.iter()
            .map(|token| token.parse::<T>().with_context(|| format!("invalid number '{token}'")))
            .collect()
    }
}

impl Problem for PairSum {
    type Instance = Vec<u64>;
    type Solution = [usize; 4];

    fn name(&self) -> &str {
        "pair sum"
    }

    fn min_size(&self) -> u64 {
        4
    }

    fn split(&self, mut raw: RawLines) -> (RawLines, RawLines) {
        let solution = if raw.len() > 1 { raw.split_off(1) } else { vec![] };
        (raw, solution)
    }

    fn parse_instance(&self, raw: &RawLines, _size: u64) -> anyhow::Result<Vec<u64>> {
        Self::parse_numbers(raw.first())
    }

    fn parse_solution(&self, raw: &RawLines, _size: u64) -> anyhow::Result<[usize; 4]> {
        let indices = Self::parse_numbers::<usize>(raw.first())?;
        match indices.as_slice() {
            [a, b, c, d] => Ok([*a, *b, *c, *d]),
            _ => bail!("expected 4 indices, got {}", indices.len()),
        }
    }

    fn validate_instance(&self, instance: &Vec<u64>, size: u64) -> bool {
        instance.len() as u64 == size && size >= self.min_size()
    }

    fn validate_solution_format(&self, solution: &[usize; 4], size: u64, _is_certificate: bool) -> bool {
        let distinct = (0..4).all(|i| (i + 1..4).all(|j| solution[i] != solution[j]));
        distinct && solution.iter().all(|&index| (index as u64) < size)
    }

    fn validate_solution(&self, solution: &[usize; 4], instance: &Vec<u64>, _size: u64, _is_certificate: bool) -> bool {
        let value = |i: usize| instance.get(solution[i]).map(|&v| v as u128);
        match (value(0), value(1), value(2), value(3)) {
            (Some(a), Some(b), Some(c), Some(d)) => a + b == c + d,
            _ => false,
        }
    }

    fn score(&self, _instance: &Vec<u64>, _solver: &[usize; 4], _generator: Option<&[usize; 4]>) -> f64 {
        1.0
    }

    fn encode(&self, instance: &Vec<u64>) -> Vec<u8> {
        instance
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(" ")
            .into_bytes()
    }
}

#[cfg(test)]
mod pair_sum_tests {
    use super::*;

    #[test]
    fn accepts_valid_certificate() {
        let raw = PairSum.decode(b"1 2 3 4 5\n0 3 1 2\n").unwrap();
        let (instance, solution) = PairSum.split(raw);
        let instance = PairSum.parse_instance(&instance, 5).unwrap();
        let solution = PairSum.parse_solution(&solution, 5).unwrap();
        assert!(PairSum.validate_instance(&instance, 5));
        assert!(PairSum.validate_solution_format(&solution, 5, true));
        assert!(PairSum.validate_solution(&solution, &instance, 5, true));
    }

    #[test]
    fn rejects_repeated_indices() {
        assert!(!PairSum.validate_solution_format(&[0, 0, 1, 2], 5, false));
        assert!(!PairSum.validate_solution_format(&[0, 1, 2, 9], 5, false));
    }

    #[test]
    fn rejects_wrong_sum_and_wrong_length() {
        let instance = vec![1, 2, 3, 10];
        assert!(!PairSum.validate_solution(&[0, 1, 2, 3], &instance, 4, false));
        assert!(!PairSum.validate_instance(&instance, 5));
        assert!(PairSum.parse_solution(&vec![vec!["1".into(), "2".into()]], 4).is_err());
    }

    #[test]
    fn large_values_do_not_overflow() {
        let instance = vec![u64::MAX, u64::MAX, u64::MAX - 1, u64::MAX];
        assert!(!PairSum.validate_solution(&[0, 1, 2, 3], &instance, 4, false));
    }
}
