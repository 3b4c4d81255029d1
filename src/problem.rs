//! The capability a problem definition gives to the arena.
//!
//! The arena never interprets instances or solutions itself: it hands the raw bytes produced by
//! generators and solvers to a [`Problem`], which decodes, validates and scores them.
//!
//! Programs exchange whitespace separated, line based text by default. [`Problem::decode`]
//! turns program output into [`RawLines`] (one `Vec<String>` of tokens per non-empty line), and
//! [`encode_lines`] does the reverse for problems that keep that format.

/// Program output after decoding: one token list per non-empty line.
pub type RawLines = Vec<Vec<String>>;

/// What a problem definition has to implement.
///
/// Implementations must be shareable between battle workers, hence the `Send + Sync` bound.
pub trait Problem: Send + Sync {
    /// A validated problem instance.
    type Instance: Send;
    /// A validated solution (certificate or solver answer).
    type Solution: Send;

    /// Human-readable problem name.
    fn name(&self) -> &str;

    /// Smallest instance size generators can be asked for.
    fn min_size(&self) -> u64 {
        1
    }

    /// Whether generators must output a certificate solution along with their instance.
    fn with_solution(&self) -> bool {
        true
    }

    /// Whether solutions may be scored below 1.0 and still count, see
    /// [`Iterated::approximation_ratio`](crate::battle::Iterated).
    fn approximable(&self) -> bool {
        false
    }

    /// Decode raw program output.
    ///
    /// # Errors
    /// Returned when the output is not valid UTF-8.
    fn decode(&self, bytes: &[u8]) -> anyhow::Result<RawLines> {
        let text = std::str::from_utf8(bytes)?;
        Ok(text
            .lines()
            .map(|line| line.split_whitespace().map(String::from).collect::<Vec<_>>())
            .filter(|tokens| !tokens.is_empty())
            .collect())
    }

    /// Split decoded generator output into its instance part and its solution part.
    ///
    /// The default groups lines by their first token: lines starting with `s` belong to the
    /// solution, every other line to the instance.
    fn split(&self, raw: RawLines) -> (RawLines, RawLines) {
        raw.into_iter()
            .partition(|line| line.first().map(String::as_str) != Some("s"))
    }

    /// Parse an instance of the given size.
    fn parse_instance(&self, raw: &RawLines, size: u64) -> anyhow::Result<Self::Instance>;

    /// Parse a solution for an instance of the given size.
    fn parse_solution(&self, raw: &RawLines, size: u64) -> anyhow::Result<Self::Solution>;

    /// Whether `instance` is well-formed for `size`.
    fn validate_instance(&self, instance: &Self::Instance, size: u64) -> bool;

    /// Whether `solution` is well-formed on its own. `is_certificate` is set for generator
    /// solutions.
    fn validate_solution_format(&self, _solution: &Self::Solution, _size: u64, _is_certificate: bool) -> bool {
        true
    }

    /// Whether `solution` correctly solves `instance`.
    fn validate_solution(
        &self,
        solution: &Self::Solution,
        instance: &Self::Instance,
        size: u64,
        is_certificate: bool,
    ) -> bool;

    /// Quality of a solver's solution, expected in `[0, 1]` (the arena clamps it anyway).
    ///
    /// `generator_solution` is `Some` whenever [`with_solution`](Self::with_solution) is set.
    fn score(
        &self,
        instance: &Self::Instance,
        solver_solution: &Self::Solution,
        generator_solution: Option<&Self::Solution>,
    ) -> f64;

    /// Memory (MB) granted to a generator asked for an instance of `size`.
    fn generator_memory(&self, base_mb: u64, _size: u64) -> u64 {
        base_mb
    }

    /// Memory (MB) granted to a solver facing an instance of `size`.
    fn solver_memory(&self, base_mb: u64, _size: u64) -> u64 {
        base_mb
    }

    /// Encode an instance for the solver's stdin.
    fn encode(&self, instance: &Self::Instance) -> Vec<u8>;
}

/// Join token lines back into program input.
pub fn encode_lines(lines: &[Vec<String>]) -> Vec<u8> {
    lines
        .iter()
        .map(|line| line.join(" "))
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes()
}

#[cfg(test)]
mod problem_tests {
    use super::*;

    struct LinesOnly;

    impl Problem for LinesOnly {
        type Instance = RawLines;
        type Solution = RawLines;

        fn name(&self) -> &str {
            "lines"
        }

        fn parse_instance(&self, raw: &RawLines, _size: u64) -> anyhow::Result<RawLines> {
            Ok(raw.clone())
        }

        fn parse_solution(&self, raw: &RawLines, _size: u64) -> anyhow::Result<RawLines> {
            Ok(raw.clone())
        }

        fn validate_instance(&self, instance: &RawLines, _size: u64) -> bool {
            !instance.is_empty()
        }

        fn validate_solution(&self, _: &RawLines, _: &RawLines, _: u64, _: bool) -> bool {
            true
        }

        fn score(&self, _: &RawLines, _: &RawLines, _: Option<&RawLines>) -> f64 {
            1.0
        }

        fn encode(&self, instance: &RawLines) -> Vec<u8> {
            encode_lines(instance)
        }
    }

    #[test]
    fn decode_skips_blank_lines() {
        let raw = LinesOnly.decode(b"e 1 2\n\n  \ns 3\n").unwrap();
        assert_eq!(raw, vec![vec!["e", "1", "2"], vec!["s", "3"]]);
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        assert!(LinesOnly.decode(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn default_split_groups_by_first_token() {
        let raw = LinesOnly.decode(b"e 1 2\ns 3\ne 4 5").unwrap();
        let (instance, solution) = LinesOnly.split(raw);
        assert_eq!(instance.len(), 2);
        assert_eq!(solution, vec![vec!["s", "3"]]);
    }

    #[test]
    fn encode_roundtrips_lines() {
        let raw = LinesOnly.decode(b"e 1 2\ne 3 4").unwrap();
        assert_eq!(LinesOnly.encode(&raw), b"e 1 2\ne 3 4".to_vec());
    }
}
