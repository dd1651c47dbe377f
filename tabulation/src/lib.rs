//! Ballot scoring and tabulation for cast-vote-record data.
//!
//! The entry points are [classify_vote] and [extract_ranking], which turn a
//! single contest's raw marks into a [VoteOutcome] or a [Ranking], and the
//! tabulators that consume them: [run_irv], [positional_scores],
//! [run_pairwise] and the cross-contest aggregation in [joint].
//!
//! Everything here is a pure function of already-loaded, immutable data.
//! Per-ballot inconsistencies are recovered as Invalid and counted in
//! [Diagnostics]; structural problems and API misuse are fatal
//! [TabulationError]s.

mod model;

pub mod joint;

pub use crate::model::*;

use log::{debug, warn};

use std::collections::{HashMap, HashSet};
use std::ops::AddAssign;

/// Scores one contest's raw marks on one ballot into Abstain, Invalid or a
/// single candidate.
///
/// Priority order: an undervote counter means Abstain; an overvote counter
/// or any outstack condition means Invalid; otherwise exactly one countable
/// mark names the candidate. Anything else is inconsistent scan data and is
/// classified Invalid with a diagnostics counter bumped, since one malformed
/// ballot must not abort the tabulation.
pub fn classify_vote(
    instance: &ContestInstance,
    roster: &ContestRoster,
    diag: &mut Diagnostics,
) -> VoteOutcome {
    if instance.undervotes > 0 {
        return VoteOutcome::Abstain;
    }
    if instance.overvotes > 0 || !instance.outstack_conditions.is_empty() {
        return VoteOutcome::Invalid;
    }

    let mut chosen: Option<&str> = None;
    let mut countable: u32 = 0;
    for mark in instance.marks.iter().filter(|m| m.is_vote) {
        countable += 1;
        match roster.name(mark.candidate) {
            Some(name) => chosen = Some(name),
            None => {
                warn!(
                    "contest {}: mark references unknown candidate id {}",
                    instance.contest.0, mark.candidate.0
                );
                diag.unknown_candidates += 1;
                return VoteOutcome::Invalid;
            }
        }
    }
    match (countable, chosen) {
        (1, Some(name)) => VoteOutcome::Candidate(name.to_string()),
        _ => {
            // The mark count disagrees with the contest's own
            // undervote/overvote counters.
            warn!(
                "contest {}: {} countable marks but no under/overvote flagged",
                instance.contest.0, countable
            );
            diag.mark_count_mismatches += 1;
            VoteOutcome::Invalid
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
enum Slot {
    Empty,
    Filled(CandidateId),
    /// More than one non-ambiguous mark landed on this rank.
    Contested,
}

/// Extracts a deduplicated, order-preserving ranking from one ranked
/// contest's marks.
///
/// An overvote counter invalidates the ballot outright. Undervotes do not:
/// a voter who skips the first choice but marks later ranks still casts a
/// valid ranking. Outstack conditions are ignored here as well, because the
/// common "unused ranking" condition is benign.
///
/// Two candidates marked at the same rank contest that slot: if the first
/// filled slot is contested the whole ballot is Invalid, otherwise the
/// ranks collected so far stand and everything after the contested slot is
/// discarded. A repeated candidate at a later rank is skipped, so the marks
/// "A B A B" normalize to the ranking A, B.
pub fn extract_ranking(
    instance: &ContestInstance,
    roster: &ContestRoster,
    max_ranks: u32,
    diag: &mut Diagnostics,
) -> Ranking {
    if instance.overvotes > 0 {
        return Ranking::Invalid;
    }

    let mut slots = vec![Slot::Empty; max_ranks as usize];
    for mark in &instance.marks {
        if mark.is_ambiguous {
            continue;
        }
        if mark.rank == 0 || mark.rank > max_ranks {
            warn!(
                "contest {}: mark for candidate {} has rank {} outside 1..={}",
                instance.contest.0, mark.candidate.0, mark.rank, max_ranks
            );
            diag.out_of_range_ranks += 1;
            return Ranking::Invalid;
        }
        let slot = &mut slots[(mark.rank - 1) as usize];
        *slot = match *slot {
            Slot::Empty => Slot::Filled(mark.candidate),
            _ => Slot::Contested,
        };
    }

    let mut ranked: Vec<CandidateId> = Vec::new();
    let mut seen: HashSet<CandidateId> = HashSet::new();
    for slot in slots {
        match slot {
            Slot::Empty => continue,
            Slot::Filled(cid) => {
                if seen.insert(cid) {
                    ranked.push(cid);
                }
            }
            Slot::Contested => {
                if ranked.is_empty() {
                    // Overvote at the first effective choice.
                    return Ranking::Invalid;
                }
                break;
            }
        }
    }

    if ranked.is_empty() {
        return Ranking::Abstain;
    }
    for cid in &ranked {
        if roster.name(*cid).is_none() {
            warn!(
                "contest {}: ranking references unknown candidate id {}",
                instance.contest.0, cid.0
            );
            diag.unknown_candidates += 1;
            return Ranking::Invalid;
        }
    }
    Ranking::Ranked(ranked)
}

/// Collects the valid rankings of one ranked contest across all cards.
/// Abstain and Invalid ballots are excluded entirely: they contribute to no
/// tabulation method, not even as exhausted ballots.
pub fn ranked_ballots(
    cards: &[Card],
    election: &Election,
    contest_id: ContestId,
    diag: &mut Diagnostics,
) -> Result<Vec<Vec<CandidateId>>, TabulationError> {
    let contest = election.contest(contest_id)?;
    if contest.ranks == 0 {
        return Err(TabulationError::NotRanked(contest_id));
    }
    let roster = election.roster(contest_id)?;

    let mut rankings: Vec<Vec<CandidateId>> = Vec::new();
    for card in cards {
        for instance in card.contests.iter().filter(|i| i.contest == contest_id) {
            if let Ranking::Ranked(seq) = extract_ranking(instance, roster, contest.ranks, diag) {
                rankings.push(seq);
            }
        }
    }
    Ok(rankings)
}

/// Runs instant-runoff voting over the extracted rankings.
///
/// Every roster candidate starts in the running. Each round tallies the
/// first not-yet-eliminated choice of every ballot (or the Exhausted
/// sentinel) and eliminates the candidate with the fewest top-choice votes;
/// a tie for fewest is broken toward the smallest candidate id so that
/// rounds are reproducible. The terminal round tallies exactly the winner
/// and the Exhausted sentinel and eliminates no one.
pub fn run_irv(
    rankings: &[Vec<CandidateId>],
    roster: &ContestRoster,
) -> Result<IrvResult, TabulationError> {
    // Sorted ascending: the elimination tie-break below leans on this order.
    let mut remaining: Vec<CandidateId> = roster.ids();
    if remaining.is_empty() {
        return Err(TabulationError::EmptyContest(roster.contest()));
    }

    let mut rounds: Vec<IrvRound> = Vec::new();
    loop {
        let mut tally: HashMap<CandidateId, u64> =
            remaining.iter().map(|cid| (*cid, 0)).collect();
        let mut exhausted: u64 = 0;
        for ranking in rankings {
            match ranking.iter().find(|cid| tally.contains_key(cid)) {
                Some(cid) => {
                    if let Some(count) = tally.get_mut(cid) {
                        *count += 1;
                    }
                }
                None => exhausted += 1,
            }
        }
        debug!(
            "irv round {}: tally {:?}, exhausted {}",
            rounds.len() + 1,
            tally,
            exhausted
        );

        let mut round_tally: Vec<(TallyBucket, u64)> = remaining
            .iter()
            .map(|cid| {
                let name = roster.name(*cid).unwrap_or_default().to_string();
                (TallyBucket::Candidate(name), tally[cid])
            })
            .collect();
        round_tally.push((TallyBucket::Exhausted, exhausted));

        if remaining.len() == 1 {
            let winner = roster.name(remaining[0]).unwrap_or_default().to_string();
            rounds.push(IrvRound {
                tally: round_tally,
                eliminated: None,
            });
            return Ok(IrvResult { winner, rounds });
        }

        // `remaining` is sorted, so the first minimum is the smallest id.
        let worst: CandidateId = remaining
            .iter()
            .copied()
            .min_by_key(|cid| tally[cid])
            .ok_or(TabulationError::EmptyContest(roster.contest()))?;
        remaining.retain(|cid| *cid != worst);
        rounds.push(IrvRound {
            tally: round_tally,
            eliminated: Some(roster.name(worst).unwrap_or_default().to_string()),
        });
    }
}

/// Positional scoring: each ranking position contributes `weight(position)`
/// (0-based) to the candidate ranked there. Use [borda_weights] or
/// [dowdall_weight] for the classic methods.
pub fn positional_scores<T>(
    rankings: &[Vec<CandidateId>],
    roster: &ContestRoster,
    weight: impl Fn(usize) -> T,
) -> HashMap<String, T>
where
    T: Copy + Default + AddAssign,
{
    let mut totals: HashMap<String, T> = HashMap::new();
    for ranking in rankings {
        for (position, cid) in ranking.iter().enumerate() {
            if let Some(name) = roster.name(*cid) {
                *totals.entry(name.to_string()).or_default() += weight(position);
            }
        }
    }
    totals
}

/// Borda weights for a contest with `max_ranks` rank positions: the first
/// preference is worth `max_ranks`, the next one less, and so on.
pub fn borda_weights(max_ranks: u32) -> impl Fn(usize) -> u64 {
    move |position| (max_ranks as u64).saturating_sub(position as u64)
}

/// Dowdall (Nauru) weight: 1/(position+1).
pub fn dowdall_weight(position: usize) -> f64 {
    1.0 / (position as f64 + 1.0)
}

/// Runs the Condorcet check and, when no Condorcet winner exists, the
/// Schulze beatpath method.
///
/// The pairwise preference matrix counts, for every ordered candidate pair
/// (A, B), the ballots ranking A strictly before B. A candidate left
/// unranked on a ballot counts as ranked after every candidate that ballot
/// did rank, for the contest's full roster. Ballots ranking neither A nor B
/// contribute to neither cell, so (A,B) + (B,A) need not equal the ballot
/// count.
pub fn run_pairwise(
    rankings: &[Vec<CandidateId>],
    roster: &ContestRoster,
) -> Result<PairwiseOutcome, TabulationError> {
    let cands: Vec<CandidateId> = roster.ids();
    if cands.is_empty() {
        return Err(TabulationError::EmptyContest(roster.contest()));
    }

    let mut prefs: HashMap<(CandidateId, CandidateId), u64> = HashMap::new();
    for pair in ordered_pairs(&cands) {
        prefs.insert(pair, 0);
    }
    for ranking in rankings {
        for (i, &above) in ranking.iter().enumerate() {
            for &below in &ranking[i + 1..] {
                if let Some(count) = prefs.get_mut(&(above, below)) {
                    *count += 1;
                }
            }
        }
        let ranked: HashSet<CandidateId> = ranking.iter().copied().collect();
        for &unranked in cands.iter().filter(|cid| !ranked.contains(cid)) {
            for &above in ranking {
                if let Some(count) = prefs.get_mut(&(above, unranked)) {
                    *count += 1;
                }
            }
        }
    }

    // Condorcet: a candidate preferred head-to-head over every other.
    let condorcet = cands.iter().copied().find(|&c1| {
        cands
            .iter()
            .all(|&c2| c1 == c2 || prefs[&(c1, c2)] > prefs[&(c2, c1)])
    });
    if let Some(winner) = condorcet {
        debug!("contest {}: condorcet winner {:?}", roster.contest().0, winner);
        return Ok(PairwiseOutcome {
            winner: roster.name(winner).unwrap_or_default().to_string(),
            preferences: named_matrix(&prefs, roster),
            beatpaths: None,
        });
    }

    // Widest-path beatpath strengths, in the standard formulation: seed with
    // the winning preferences, then widen through every intermediate
    // candidate in a fixed order.
    let mut paths: HashMap<(CandidateId, CandidateId), u64> = HashMap::new();
    for (i, j) in ordered_pairs(&cands) {
        let strength = if prefs[&(i, j)] > prefs[&(j, i)] {
            prefs[&(i, j)]
        } else {
            0
        };
        paths.insert((i, j), strength);
    }
    for &k in &cands {
        for &i in &cands {
            if i == k {
                continue;
            }
            for &j in &cands {
                if j == i || j == k {
                    continue;
                }
                let widened = paths[&(i, k)].min(paths[&(k, j)]);
                if widened > paths[&(i, j)] {
                    paths.insert((i, j), widened);
                }
            }
        }
    }

    let winner = cands.iter().copied().find(|&c1| {
        cands
            .iter()
            .all(|&c2| c1 == c2 || paths[&(c1, c2)] > paths[&(c2, c1)])
    });
    match winner {
        Some(w) => Ok(PairwiseOutcome {
            winner: roster.name(w).unwrap_or_default().to_string(),
            preferences: named_matrix(&prefs, roster),
            beatpaths: Some(named_matrix(&paths, roster)),
        }),
        None => Err(TabulationError::NoSchulzeWinner(roster.contest())),
    }
}

fn ordered_pairs(cands: &[CandidateId]) -> Vec<(CandidateId, CandidateId)> {
    let mut pairs = Vec::with_capacity(cands.len() * cands.len());
    for &a in cands {
        for &b in cands {
            if a != b {
                pairs.push((a, b));
            }
        }
    }
    pairs
}

fn named_matrix(
    matrix: &HashMap<(CandidateId, CandidateId), u64>,
    roster: &ContestRoster,
) -> HashMap<(String, String), u64> {
    matrix
        .iter()
        .map(|(&(a, b), &count)| {
            (
                (
                    roster.name(a).unwrap_or_default().to_string(),
                    roster.name(b).unwrap_or_default().to_string(),
                ),
                count,
            )
        })
        .collect()
}
