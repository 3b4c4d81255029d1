//! Turning a match result into points.
//!
//! The achievable points are shared between teams proportionally to a weight computed from the
//! rounds each team played as solver:
//! - [`Iterated`](BattleKind::Iterated): the sum of the sizes it solved.
//! - [`Averaged`](BattleKind::Averaged): the inverse of the mean of its per-round mean scores,
//!   `0` for a mean of `0`.
//!
//! When every weight is `0` the points are split evenly. Points are kept in tenths and always
//! add up to the achievable points: each team gets the rounded-down share. With two teams the
//! last one by name takes the tenths left over. With more, they go to the largest remainders,
//! ties going to the team name that sorts first.

use std::{collections::BTreeMap, fmt::Display};

use serde::{ser::SerializeMap, Serialize};

use crate::{battle::BattleKind, match_result::MatchResult};

/// Points of every team, with one decimal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Points {
    tenths: BTreeMap<String, u64>,
}

impl Points {
    /// Points of `team`.
    pub fn get(&self, team: &str) -> Option<f64> {
        self.tenths.get(team).map(|&t| t as f64 / 10.0)
    }

    /// Points of `team` in tenths of a point.
    pub fn tenths(&self, team: &str) -> Option<u64> {
        self.tenths.get(team).copied()
    }

    /// Every team with its points, by team name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.tenths
            .iter()
            .map(|(team, &t)| (team.as_str(), t as f64 / 10.0))
    }

    /// Sum of all points.
    pub fn total(&self) -> f64 {
        self.tenths.values().sum::<u64>() as f64 / 10.0
    }
}

impl Serialize for Points {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.tenths.len()))?;
        for (team, points) in self.iter() {
            map.serialize_entry(team, &points)?;
        }
        map.end()
    }
}

impl Display for Points {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (team, points) in self.iter() {
            writeln!(f, "{team}: {points:.1}")?;
        }
        Ok(())
    }
}

/// Share `achievable` points between `teams` according to `result`.
///
/// With `rounds == 0` every team gets nothing.
pub fn allocate(
    result: &MatchResult,
    teams: &[String],
    kind: BattleKind,
    rounds: usize,
    achievable: u32,
) -> Points {
    if rounds == 0 {
        return Points {
            tenths: teams.iter().map(|team| (team.clone(), 0)).collect(),
        };
    }

    let weights = teams
        .iter()
        .map(|team| {
            let values = result
                .iter()
                .filter(|(matchup, _)| &matchup.solver == team)
                .flat_map(|(_, rounds)| rounds.iter().map(|round| round.value()))
                .collect::<Vec<_>>();
            let weight = match kind {
                BattleKind::Iterated => values.iter().sum::<f64>(),
                BattleKind::Averaged => {
                    let ratio = if values.is_empty() {
                        0.0
                    } else {
                        values.iter().sum::<f64>() / values.len() as f64
                    };
                    if ratio > 0.0 {
                        1.0 / ratio
                    } else {
                        0.0
                    }
                }
            };
            (team.clone(), weight)
        })
        .collect::<BTreeMap<_, _>>();

    Points {
        tenths: share_tenths(weights, u64::from(achievable) * 10),
    }
}

/// Share of `total` proportional to `weights`, even split without weight.
///
/// Up to two teams, every team but the last (in name order) is rounded down and the last one
/// takes the rest. With more teams the rest goes out by largest remainder.
fn share_tenths(weights: BTreeMap<String, f64>, total: u64) -> BTreeMap<String, u64> {
    let sum = weights.values().sum::<f64>();
    let even = !(sum.is_finite() && sum > 0.0);

    let mut shares = weights
        .into_iter()
        .map(|(team, weight)| {
            let weight = if even { 1.0 } else { weight.max(0.0) };
            (team, weight)
        })
        .collect::<Vec<_>>();
    let sum = shares.iter().map(|(_, w)| w).sum::<f64>();
    if shares.is_empty() || sum <= 0.0 {
        return shares.into_iter().map(|(team, _)| (team, 0)).collect();
    }

    let exact = shares
        .iter()
        .map(|(_, weight)| total as f64 * weight / sum)
        .collect::<Vec<_>>();
    let mut tenths = exact
        .iter()
        .map(|share| ((share + 1e-9).floor() as u64).min(total))
        .collect::<Vec<_>>();

    if shares.len() <= 2 {
        let last = tenths.len() - 1;
        tenths[last] = total.saturating_sub(tenths[..last].iter().sum());
    } else {
        let left = total.saturating_sub(tenths.iter().sum());

        // Team names are sorted already, so a stable sort keeps name order between equal remainders.
        let mut order = (0..shares.len()).collect::<Vec<_>>();
        order.sort_by(|&a, &b| {
            let rem_a = exact[a] - tenths[a] as f64;
            let rem_b = exact[b] - tenths[b] as f64;
            rem_b.total_cmp(&rem_a)
        });
        for &i in order.iter().cycle().take(left as usize) {
            tenths[i] += 1;
        }
    }

    shares
        .drain(..)
        .zip(tenths)
        .map(|((team, _), tenths)| (team, tenths))
        .collect()
}

#[cfg(test)]
mod points_tests {
    use super::*;
    use crate::{battle::RoundResult, match_result::MatchupId};

    fn teams(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    /// `a_solves` are the rounds of b vs a, `b_solves` those of a vs b.
    fn two_teams(a_solves: Vec<RoundResult>, b_solves: Vec<RoundResult>) -> MatchResult {
        let mut result = MatchResult::new([MatchupId::new("a", "b"), MatchupId::new("b", "a")]);
        for round in b_solves {
            result.push_round(&MatchupId::new("a", "b"), round);
        }
        for round in a_solves {
            result.push_round(&MatchupId::new("b", "a"), round);
        }
        result
    }

    fn solved(sizes: &[u64]) -> Vec<RoundResult> {
        sizes.iter().map(|&s| RoundResult::Solved(s)).collect()
    }

    #[test]
    fn equal_iterated_scores_split_evenly() {
        let result = two_teams(solved(&[20, 10]), solved(&[10, 20]));
        let points = allocate(&result, &teams(&["a", "b"]), BattleKind::Iterated, 2, 100);
        assert_eq!(points.get("a"), Some(50.0));
        assert_eq!(points.get("b"), Some(50.0));
    }

    #[test]
    fn solver_that_never_solves_gets_nothing() {
        let result = two_teams(solved(&[0, 0]), solved(&[10, 10]));
        let points = allocate(&result, &teams(&["a", "b"]), BattleKind::Iterated, 2, 100);
        assert_eq!(points.get("a"), Some(0.0));
        assert_eq!(points.get("b"), Some(100.0));
    }

    #[test]
    fn averaged_weights_are_inverse_ratios() {
        let mut result = MatchResult::new([MatchupId::new("b", "a"), MatchupId::new("a", "b")]);
        result.push_round(&MatchupId::new("b", "a"), RoundResult::Scores(vec![1.0, 1.0]));
        result.push_round(&MatchupId::new("a", "b"), RoundResult::Scores(vec![1.0, 2.0]));
        let points = allocate(&result, &teams(&["a", "b"]), BattleKind::Averaged, 1, 100);
        assert_eq!(points.get("a"), Some(60.0));
        assert_eq!(points.get("b"), Some(40.0));
    }

    #[test]
    fn averaged_zero_ratio_has_no_weight() {
        let mut result = MatchResult::new([MatchupId::new("b", "a"), MatchupId::new("a", "b")]);
        result.push_round(&MatchupId::new("b", "a"), RoundResult::Scores(vec![0.0]));
        result.push_round(&MatchupId::new("a", "b"), RoundResult::Scores(vec![0.5]));
        let points = allocate(&result, &teams(&["a", "b"]), BattleKind::Averaged, 1, 100);
        assert_eq!(points.get("a"), Some(0.0));
        assert_eq!(points.get("b"), Some(100.0));
    }

    #[test]
    fn all_zero_scores_split_evenly() {
        let result = two_teams(solved(&[0]), solved(&[0]));
        let points = allocate(&result, &teams(&["a", "b"]), BattleKind::Iterated, 1, 100);
        assert_eq!(points.get("a"), Some(50.0));
        assert_eq!(points.get("b"), Some(50.0));
    }

    #[test]
    fn no_rounds_no_points() {
        let result = MatchResult::new([MatchupId::new("a", "b"), MatchupId::new("b", "a")]);
        let points = allocate(&result, &teams(&["a", "b"]), BattleKind::Iterated, 0, 100);
        assert_eq!(points.total(), 0.0);
        assert_eq!(points.get("b"), Some(0.0));
    }

    #[test]
    fn two_teams_round_down_and_the_last_takes_the_rest() {
        let weights = [("a", 2.0), ("b", 1.0)]
            .into_iter()
            .map(|(t, w)| (t.to_string(), w))
            .collect();
        let shares = share_tenths(weights, 1000);
        assert_eq!(shares["a"], 666);
        assert_eq!(shares["b"], 334);

        let result = two_teams(solved(&[20]), solved(&[10]));
        let points = allocate(&result, &teams(&["a", "b"]), BattleKind::Iterated, 1, 100);
        assert_eq!(points.get("a"), Some(66.6));
        assert_eq!(points.get("b"), Some(33.4));
    }

    #[test]
    fn remainders_go_to_largest_fractions_then_names() {
        let weights = [("c", 1.0), ("a", 1.0), ("b", 1.0)]
            .into_iter()
            .map(|(t, w)| (t.to_string(), w))
            .collect();
        let shares = share_tenths(weights, 1000);
        assert_eq!(shares["a"], 334);
        assert_eq!(shares["b"], 333);
        assert_eq!(shares["c"], 333);

        let weights = [("a", 1.0), ("b", 2.0), ("c", 4.0)]
            .into_iter()
            .map(|(t, w)| (t.to_string(), w))
            .collect();
        let shares = share_tenths(weights, 1000);
        // 142.857, 285.714, 571.428
        assert_eq!(shares["a"], 143);
        assert_eq!(shares["b"], 286);
        assert_eq!(shares["c"], 571);
    }

    #[test]
    fn points_always_sum_to_the_budget() {
        let weight_sets: [&[f64]; 5] = [
            &[0.0, 0.0, 0.0],
            &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
            &[3.0, 0.0, 7.5],
            &[1e-9, 1e9],
            &[0.1, 0.2, 0.3, 0.4],
        ];
        for weights in weight_sets {
            let weights: BTreeMap<String, f64> = weights
                .iter()
                .enumerate()
                .map(|(i, &w)| (format!("t{i}"), w))
                .collect();
            for total in [0, 10, 1000, 999] {
                let shares = share_tenths(weights.clone(), total);
                assert_eq!(shares.values().sum::<u64>(), total);
            }
        }
    }

    #[test]
    fn serializes_as_a_map() {
        let result = two_teams(solved(&[30]), solved(&[10]));
        let points = allocate(&result, &teams(&["a", "b"]), BattleKind::Iterated, 1, 100);
        let json = serde_json::to_value(&points).unwrap();
        assert_eq!(json["a"], 75.0);
        assert_eq!(json["b"], 25.0);
        assert_eq!(points.to_string(), "a: 75.0\nb: 25.0\n");
    }
}
