//! Results of a whole match, keyed by matchup.

use std::fmt::Display;

use serde::Serialize;

use crate::battle::RoundResult;

/// Names of the two teams of a matchup. Both are the same team in solo play.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MatchupId {
    /// Team running its generator.
    pub generator: String,
    /// Team running its solver.
    pub solver: String,
}

impl MatchupId {
    /// Create an id from the generating and solving team names.
    pub fn new(generator: impl Into<String>, solver: impl Into<String>) -> Self {
        Self {
            generator: generator.into(),
            solver: solver.into(),
        }
    }
}

impl Display for MatchupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} vs {}", self.generator, self.solver)
    }
}

/// Every round of one matchup, in round order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BattleRecord {
    /// The matchup these rounds belong to.
    pub matchup: MatchupId,
    /// Completed rounds, in the order they were run.
    pub rounds: Vec<RoundResult>,
}

/// Round results of every matchup of a match.
///
/// Matchups keep the order they were registered in, which is the order they are displayed in.
/// Rounds are only ever appended once complete.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchResult {
    battles: Vec<BattleRecord>,
}

impl MatchResult {
    /// An empty result for the given matchups.
    pub fn new(matchups: impl IntoIterator<Item = MatchupId>) -> Self {
        Self {
            battles: matchups
                .into_iter()
                .map(|matchup| BattleRecord {
                    matchup,
                    rounds: vec![],
                })
                .collect(),
        }
    }

    /// Append a completed round to `matchup`. Returns `false` when the matchup is unknown.
    pub(crate) fn push_round(&mut self, matchup: &MatchupId, round: RoundResult) -> bool {
        match self.battles.iter_mut().find(|b| &b.matchup == matchup) {
            Some(battle) => {
                battle.rounds.push(round);
                true
            }
            None => false,
        }
    }

    /// Rounds recorded for `matchup`.
    pub fn rounds(&self, matchup: &MatchupId) -> Option<&[RoundResult]> {
        self.battles
            .iter()
            .find(|b| &b.matchup == matchup)
            .map(|b| b.rounds.as_slice())
    }

    /// Every matchup with its rounds, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&MatchupId, &[RoundResult])> {
        self.battles
            .iter()
            .map(|b| (&b.matchup, b.rounds.as_slice()))
    }

    /// Number of matchups.
    pub fn len(&self) -> usize {
        self.battles.len()
    }

    /// Whether no matchup was registered.
    pub fn is_empty(&self) -> bool {
        self.battles.is_empty()
    }

    /// Whether every matchup has exactly `rounds` rounds.
    pub fn is_complete(&self, rounds: usize) -> bool {
        self.battles.iter().all(|b| b.rounds.len() == rounds)
    }
}

impl Display for MatchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name_width = self
            .battles
            .iter()
            .flat_map(|b| [b.matchup.generator.len(), b.matchup.solver.len()])
            .max()
            .unwrap_or(0)
            .max(3);
        let rounds = self.battles.iter().map(|b| b.rounds.len()).max().unwrap_or(0);

        write!(f, "{:<name_width$} {:<name_width$}", "GEN", "SOL")?;
        for round in 1..=rounds {
            write!(f, " {:>9}", format!("R{round}"))?;
        }
        writeln!(f, " {:>9}", "AVG")?;

        for battle in &self.battles {
            write!(
                f,
                "{:<name_width$} {:<name_width$}",
                battle.matchup.generator, battle.matchup.solver
            )?;
            for round in 0..rounds {
                match battle.rounds.get(round) {
                    Some(result) => write!(f, " {:>9}", result.to_string())?,
                    None => write!(f, " {:>9}", "-")?,
                }
            }
            let values = battle.rounds.iter().map(RoundResult::value).collect::<Vec<_>>();
            if values.is_empty() {
                writeln!(f, " {:>9}", "-")?;
            } else {
                let average = values.iter().sum::<f64>() / values.len() as f64;
                writeln!(f, " {average:>9.3}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod match_result_tests {
    use super::*;

    fn ab() -> MatchupId {
        MatchupId::new("a", "b")
    }

    #[test]
    fn rounds_are_appended_in_order() {
        let mut result = MatchResult::new([ab(), MatchupId::new("b", "a")]);
        assert!(result.push_round(&ab(), RoundResult::Solved(3)));
        assert!(result.push_round(&ab(), RoundResult::Solved(7)));
        assert_eq!(
            result.rounds(&ab()).unwrap(),
            &[RoundResult::Solved(3), RoundResult::Solved(7)]
        );
        assert!(!result.is_complete(2));
        assert!(result.push_round(&MatchupId::new("b", "a"), RoundResult::Solved(1)));
        assert!(result.push_round(&MatchupId::new("b", "a"), RoundResult::Solved(1)));
        assert!(result.is_complete(2));
    }

    #[test]
    fn unknown_matchup_is_rejected() {
        let mut result = MatchResult::new([ab()]);
        assert!(!result.push_round(&MatchupId::new("x", "y"), RoundResult::Solved(1)));
        assert_eq!(result.rounds(&MatchupId::new("x", "y")), None);
    }

    #[test]
    fn table_lists_every_matchup() {
        let mut result = MatchResult::new([ab(), MatchupId::new("b", "a")]);
        result.push_round(&ab(), RoundResult::Solved(10));
        result.push_round(&ab(), RoundResult::Solved(20));
        let table = result.to_string();
        let lines = table.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("GEN"));
        assert!(lines[0].contains("R2"));
        assert!(lines[1].contains("15.000"));
        assert!(lines[2].trim_end().ends_with('-'));
    }

    #[test]
    fn serializes_rounds() {
        let mut result = MatchResult::new([ab()]);
        result.push_round(&ab(), RoundResult::Scores(vec![1.0, 0.5]));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["battles"][0]["matchup"]["generator"], "a");
        assert_eq!(json["battles"][0]["rounds"][0]["scores"][1], 0.5);
    }
}
