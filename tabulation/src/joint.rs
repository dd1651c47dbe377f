//! Cross-contest aggregation: joint vote distributions over several
//! contests per ballot, pairwise conditional-probability matrices, and the
//! numeric grid backing the heatmap report.

use log::debug;

use std::collections::HashMap;

use crate::model::*;
use crate::classify_vote;

/// Key of a joint tally: one vote outcome per requested contest, in request
/// order, or the single Incomplete bucket when coalescing.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub enum JointKey {
    Votes(Vec<VoteOutcome>),
    Incomplete,
}

/// Tallies the joint vote distribution over the requested contests.
///
/// Every card is classified in every requested contest it carries; a
/// requested contest missing from the card counts as Abstain. With
/// `coalesce_incomplete` set, any Abstain or Invalid outcome sends the whole
/// card to the Incomplete bucket; otherwise the outcome tokens stay in the
/// combination. Cards carrying none of the requested contests are excluded
/// entirely, not even counted as Incomplete.
pub fn joint_tally(
    cards: &[Card],
    election: &Election,
    contest_ids: &[ContestId],
    coalesce_incomplete: bool,
    diag: &mut Diagnostics,
) -> Result<HashMap<JointKey, u64>, TabulationError> {
    let rosters: Vec<&ContestRoster> = contest_ids
        .iter()
        .map(|id| election.roster(*id))
        .collect::<Result<_, _>>()?;
    let index: HashMap<ContestId, usize> = contest_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, i))
        .collect();

    let mut results: HashMap<JointKey, u64> = HashMap::new();
    let mut incomplete: u64 = 0;
    for card in cards {
        let mut votes: Vec<VoteOutcome> = vec![VoteOutcome::Abstain; contest_ids.len()];
        let mut matched: usize = 0;
        for instance in &card.contests {
            let i = match index.get(&instance.contest) {
                Some(i) => *i,
                None => continue,
            };
            let outcome = classify_vote(instance, rosters[i], diag);
            if coalesce_incomplete && !matches!(outcome, VoteOutcome::Candidate(_)) {
                incomplete += 1;
                matched = 0;
                break;
            }
            votes[i] = outcome;
            matched += 1;
        }
        if matched == 0 {
            continue;
        }
        *results.entry(JointKey::Votes(votes)).or_insert(0) += 1;
    }
    if coalesce_incomplete {
        results.insert(JointKey::Incomplete, incomplete);
    }
    debug!(
        "joint tally over {:?}: {} combinations",
        contest_ids,
        results.len()
    );
    Ok(results)
}

/// Conditional-probability matrix for one contest pair. Each cell holds the
/// fraction of the pair's counted ballots that produced that (row, column)
/// outcome combination, in [0, 1].
#[derive(PartialEq, Debug, Clone)]
pub struct ConditionalMatrix {
    pub rows: Vec<VoteOutcome>,
    pub cols: Vec<VoteOutcome>,
    pub cells: Vec<Vec<f64>>,
}

pub fn pairwise_conditional(
    cards: &[Card],
    election: &Election,
    row_contest: ContestId,
    col_contest: ContestId,
    coalesce_incomplete: bool,
    diag: &mut Diagnostics,
) -> Result<ConditionalMatrix, TabulationError> {
    let results = joint_tally(
        cards,
        election,
        &[row_contest, col_contest],
        coalesce_incomplete,
        diag,
    )?;
    let total: u64 = results.values().sum();
    let rows = outcome_axis(election, row_contest, coalesce_incomplete)?;
    let cols = outcome_axis(election, col_contest, coalesce_incomplete)?;

    let mut cells: Vec<Vec<f64>> = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut line: Vec<f64> = Vec::with_capacity(cols.len());
        for col in &cols {
            let key = JointKey::Votes(vec![row.clone(), col.clone()]);
            let count = results.get(&key).copied().unwrap_or(0);
            line.push(if total == 0 {
                0.0
            } else {
                count as f64 / total as f64
            });
        }
        cells.push(line);
    }
    Ok(ConditionalMatrix { rows, cols, cells })
}

/// The outcome values a contest can take on a report axis, in presentation
/// order. The Abstain/Invalid tokens only appear when they are kept as
/// distinct values, i.e. when incomplete ballots are not coalesced.
pub fn outcome_axis(
    election: &Election,
    contest_id: ContestId,
    coalesce_incomplete: bool,
) -> Result<Vec<VoteOutcome>, TabulationError> {
    let roster = election.roster(contest_id)?;
    let mut axis: Vec<VoteOutcome> = roster
        .ids()
        .iter()
        .filter_map(|id| roster.name(*id))
        .map(|name| VoteOutcome::Candidate(name.to_string()))
        .collect();
    if !coalesce_incomplete {
        axis.push(VoteOutcome::Abstain);
        axis.push(VoteOutcome::Invalid);
    }
    axis.sort_by(|a, b| a.presentation_cmp(b));
    Ok(axis)
}

/// One cell of the cross-contest grid. The rendering collaborator decides
/// how headers, probabilities and padding cells are drawn.
#[derive(PartialEq, Debug, Clone)]
pub enum GridCell {
    Empty,
    Header(String),
    Probability(f64),
}

/// Builds the cross-contest grid: for every ordered contest pair (i, j)
/// with j earlier in the request than i, a block of conditional
/// probabilities with contest i's outcomes as rows and contest j's as
/// columns. The first two rows and columns label the blocks. At least two
/// contests are required.
pub fn grid_chart(
    cards: &[Card],
    election: &Election,
    contest_ids: &[ContestId],
    coalesce_incomplete: bool,
    diag: &mut Diagnostics,
) -> Result<Vec<Vec<GridCell>>, TabulationError> {
    if contest_ids.len() < 2 {
        return Err(TabulationError::TooFewContests(contest_ids.len()));
    }
    let axes: Vec<Vec<VoteOutcome>> = contest_ids
        .iter()
        .map(|id| outcome_axis(election, *id, coalesce_incomplete))
        .collect::<Result<_, _>>()?;
    let names: Vec<String> = contest_ids
        .iter()
        .map(|id| election.contest(*id).map(|c| c.name.clone()))
        .collect::<Result<_, _>>()?;
    let ns: Vec<usize> = axes.iter().map(|axis| axis.len()).collect();

    let height: usize = ns[1..].iter().sum();
    let width: usize = ns[..ns.len() - 1].iter().sum();
    let mut grid: Vec<Vec<GridCell>> = vec![vec![GridCell::Empty; width + 2]; height + 2];

    // Column headers: contest name over each block, outcome labels below.
    let mut c = 2;
    for j in 0..contest_ids.len() - 1 {
        for m in 0..ns[j] {
            grid[0][c + m] = GridCell::Header(names[j].clone());
            grid[1][c + m] = GridCell::Header(axes[j][m].label().to_string());
        }
        c += ns[j];
    }

    let mut r = 2;
    for i in 1..contest_ids.len() {
        for (k, outcome) in axes[i].iter().enumerate() {
            grid[r + k][0] = GridCell::Header(names[i].clone());
            grid[r + k][1] = GridCell::Header(outcome.label().to_string());
        }
        let mut c = 2;
        for j in 0..i {
            let block = pairwise_conditional(
                cards,
                election,
                contest_ids[i],
                contest_ids[j],
                coalesce_incomplete,
                diag,
            )?;
            for (k, row) in block.cells.iter().enumerate() {
                for (m, &p) in row.iter().enumerate() {
                    grid[r + k][c + m] = GridCell::Probability(p);
                }
            }
            c += ns[j];
        }
        r += ns[i];
    }
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn election() -> Election {
        let contests = vec![
            Contest {
                id: ContestId(1),
                name: "Mayor".to_string(),
                ranks: 0,
                vote_for: 1,
            },
            Contest {
                id: ContestId(2),
                name: "Measure Q".to_string(),
                ranks: 0,
                vote_for: 1,
            },
        ];
        let candidates = vec![
            Candidate {
                id: CandidateId(10),
                contest: ContestId(1),
                name: "Lopez".to_string(),
            },
            Candidate {
                id: CandidateId(11),
                contest: ContestId(1),
                name: "Grant".to_string(),
            },
            Candidate {
                id: CandidateId(20),
                contest: ContestId(2),
                name: "Yes".to_string(),
            },
            Candidate {
                id: CandidateId(21),
                contest: ContestId(2),
                name: "No".to_string(),
            },
        ];
        Election::new(contests, candidates).unwrap()
    }

    fn vote_instance(contest: u32, candidate: u32) -> ContestInstance {
        ContestInstance {
            contest: ContestId(contest),
            undervotes: 0,
            overvotes: 0,
            outstack_conditions: vec![],
            marks: vec![Mark {
                candidate: CandidateId(candidate),
                rank: 1,
                is_vote: true,
                is_ambiguous: false,
            }],
        }
    }

    fn abstain_instance(contest: u32) -> ContestInstance {
        ContestInstance {
            contest: ContestId(contest),
            undervotes: 1,
            overvotes: 0,
            outstack_conditions: vec![],
            marks: vec![],
        }
    }

    fn cards() -> Vec<Card> {
        vec![
            // Lopez + Yes, twice.
            Card {
                contests: vec![vote_instance(1, 10), vote_instance(2, 20)],
            },
            Card {
                contests: vec![vote_instance(1, 10), vote_instance(2, 20)],
            },
            // Grant + No.
            Card {
                contests: vec![vote_instance(1, 11), vote_instance(2, 21)],
            },
            // Lopez, abstaining on the measure.
            Card {
                contests: vec![vote_instance(1, 10), abstain_instance(2)],
            },
            // A card carrying neither requested contest.
            Card {
                contests: vec![vote_instance(3, 99)],
            },
        ]
    }

    fn combo(names: &[&str]) -> JointKey {
        JointKey::Votes(
            names
                .iter()
                .map(|n| match *n {
                    "Abstain" => VoteOutcome::Abstain,
                    "Invalid" => VoteOutcome::Invalid,
                    name => VoteOutcome::Candidate(name.to_string()),
                })
                .collect(),
        )
    }

    #[test]
    fn joint_tally_keeps_tokens_without_coalescing() {
        let e = election();
        let mut diag = Diagnostics::default();
        let results =
            joint_tally(&cards(), &e, &[ContestId(1), ContestId(2)], false, &mut diag).unwrap();
        assert_eq!(results[&combo(&["Lopez", "Yes"])], 2);
        assert_eq!(results[&combo(&["Grant", "No"])], 1);
        assert_eq!(results[&combo(&["Lopez", "Abstain"])], 1);
        assert_eq!(results.len(), 3);

        // Conservation: counted combinations plus the unmatched card cover
        // every ballot.
        let counted: u64 = results.values().sum();
        assert_eq!(counted + 1, cards().len() as u64);
    }

    #[test]
    fn joint_tally_coalesces_incomplete_cards() {
        let e = election();
        let mut diag = Diagnostics::default();
        let results =
            joint_tally(&cards(), &e, &[ContestId(1), ContestId(2)], true, &mut diag).unwrap();
        assert_eq!(results[&combo(&["Lopez", "Yes"])], 2);
        assert_eq!(results[&combo(&["Grant", "No"])], 1);
        assert_eq!(results[&JointKey::Incomplete], 1);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn joint_tally_missing_contest_counts_as_abstain() {
        let e = election();
        let mut diag = Diagnostics::default();
        let lone = vec![Card {
            contests: vec![vote_instance(1, 10)],
        }];
        let results =
            joint_tally(&lone, &e, &[ContestId(1), ContestId(2)], false, &mut diag).unwrap();
        assert_eq!(results[&combo(&["Lopez", "Abstain"])], 1);
    }

    #[test]
    fn conditional_matrix_is_normalized() {
        let e = election();
        let mut diag = Diagnostics::default();
        let m = pairwise_conditional(&cards(), &e, ContestId(2), ContestId(1), false, &mut diag)
            .unwrap();
        // Rows: Yes, No, Abstain, Invalid. Cols: Grant, Lopez, Abstain, Invalid.
        assert_eq!(m.rows.len(), 4);
        assert_eq!(m.cols.len(), 4);
        assert_eq!(m.rows[0], VoteOutcome::Candidate("Yes".to_string()));
        assert_eq!(m.rows[1], VoteOutcome::Candidate("No".to_string()));
        assert_eq!(m.cols[0], VoteOutcome::Candidate("Grant".to_string()));

        let total: f64 = m.cells.iter().flatten().sum();
        assert!((total - 1.0).abs() < 1e-9);

        // P(Yes, Lopez) = 2/4 over the counted pair ballots.
        let yes_lopez = m.cells[0][1];
        assert!((yes_lopez - 0.5).abs() < 1e-9);
        assert!(m.cells.iter().flatten().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn grid_chart_layout() {
        let e = election();
        let mut diag = Diagnostics::default();
        let grid = grid_chart(
            &cards(),
            &e,
            &[ContestId(1), ContestId(2)],
            false,
            &mut diag,
        )
        .unwrap();
        // 4 outcome rows + 2 header rows, 4 outcome cols + 2 header cols.
        assert_eq!(grid.len(), 6);
        assert_eq!(grid[0].len(), 6);
        assert_eq!(grid[0][2], GridCell::Header("Mayor".to_string()));
        assert_eq!(grid[1][2], GridCell::Header("Grant".to_string()));
        assert_eq!(grid[2][0], GridCell::Header("Measure Q".to_string()));
        assert_eq!(grid[2][1], GridCell::Header("Yes".to_string()));
        assert_eq!(grid[0][0], GridCell::Empty);
        assert!(matches!(grid[2][2], GridCell::Probability(_)));

        let sum: f64 = grid
            .iter()
            .flatten()
            .filter_map(|cell| match cell {
                GridCell::Probability(p) => Some(*p),
                _ => None,
            })
            .sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn grid_chart_needs_two_contests() {
        let e = election();
        let mut diag = Diagnostics::default();
        assert_eq!(
            grid_chart(&cards(), &e, &[], false, &mut diag),
            Err(TabulationError::TooFewContests(0))
        );
        assert_eq!(
            grid_chart(&cards(), &e, &[ContestId(1)], false, &mut diag),
            Err(TabulationError::TooFewContests(1))
        );
    }
}
