use log::{info, warn};

use snafu::{prelude::*, Snafu};

use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use tabulation::joint::{grid_chart, joint_tally};
use tabulation::*;

use crate::args::Args;
use crate::cvr::io_dominion::{read_export, RawCard, RawExport};

pub mod io_dominion;
pub mod report;

// Joint distributions are enumerated over the powerset of the requested
// contests, so the request size has to stay small.
const MAX_JOINT_CONTESTS: usize = 16;

#[derive(Debug, Snafu)]
pub enum CvrError {
    #[snafu(display("Error reading file {path}"))]
    ReadingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing JSON file {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error opening archive {path}"))]
    OpeningArchive {
        source: zip::result::ZipError,
        path: String,
    },
    #[snafu(display("Error writing report {path}"))]
    WritingReport {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error writing CSV report {path}"))]
    WritingCsv { source: csv::Error, path: String },
    #[snafu(display("{source}"))]
    Tabulation { source: TabulationError },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error + Send + Sync>, Some)))]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

pub type CvrResult<T> = Result<T, CvrError>;

/// The loaded dataset: the election context plus every ballot card, ready
/// for tabulation.
pub struct BallotData {
    pub election: Election,
    pub cards: Vec<Card>,
    pub precinct_names: HashMap<u32, String>,
    /// Scanning sessions per precinct portion id.
    pub precinct_counts: HashMap<u32, u64>,
}

impl BallotData {
    pub fn build(raw: &RawExport) -> CvrResult<BallotData> {
        let contests: Vec<Contest> = raw
            .contests
            .iter()
            .map(|c| Contest {
                id: ContestId(c.id),
                name: c.name.clone(),
                ranks: c.num_of_ranks,
                vote_for: c.vote_for,
            })
            .collect();
        let candidates: Vec<Candidate> = raw
            .candidates
            .iter()
            .map(|c| Candidate {
                id: CandidateId(c.id),
                contest: ContestId(c.contest_id),
                name: short_name(&c.name),
            })
            .collect();
        let election = Election::new(contests, candidates).context(TabulationSnafu)?;

        let mut cards: Vec<Card> = Vec::new();
        let mut precinct_counts: HashMap<u32, u64> = HashMap::new();
        for cvr in &raw.cvrs {
            for session in &cvr.sessions {
                let record = session.record();
                *precinct_counts
                    .entry(record.precinct_portion_id)
                    .or_insert(0) += 1;
                for card in &record.cards {
                    cards.push(convert_card(card));
                }
            }
        }

        let precinct_names: HashMap<u32, String> = raw
            .precinct_portions
            .iter()
            .map(|p| (p.id, p.name.clone()))
            .collect();

        info!(
            "loaded {} cards over {} sessions",
            cards.len(),
            precinct_counts.values().sum::<u64>()
        );
        Ok(BallotData {
            election,
            cards,
            precinct_names,
            precinct_counts,
        })
    }
}

impl Display for BallotData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<ballot data, {} candidates in {} contests, {} cards>",
            self.election.num_candidates(),
            self.election.num_contests(),
            self.cards.len()
        )
    }
}

fn convert_card(raw: &RawCard) -> Card {
    Card {
        contests: raw
            .contests
            .iter()
            .map(|c| ContestInstance {
                contest: ContestId(c.id),
                undervotes: c.undervotes,
                overvotes: c.overvotes,
                outstack_conditions: c.outstack_condition_ids.clone(),
                marks: c
                    .marks
                    .iter()
                    .map(|m| Mark {
                        candidate: CandidateId(m.candidate_id),
                        rank: m.rank,
                        is_vote: m.is_vote,
                        is_ambiguous: m.is_ambiguous,
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Shortens a manifest candidate name to a display name.
///
/// Two conventions appear in the wild: "Last, First M. \"Nick\" Jr." (take
/// everything up to the comma) and "FIRST M. \"NICK\" LAST JR." (guess the
/// last name, skipping generational suffixes, and title-case it).
pub fn short_name(name: &str) -> String {
    if let Some(i) = name.find(',') {
        return name[..i].to_string();
    }

    let mut name = name;
    loop {
        let i = match name.rfind(' ') {
            Some(i) => i,
            None => return name.to_string(),
        };
        let last = &name[i + 1..];
        match last {
            "" | "II" | "III" | "JR" | "JR." | "SR" | "SR." => name = &name[..i],
            _ => return title_case(last.trim_end_matches(',')),
        }
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// All subsets of the requested contest ids, largest mask first so the full
/// combination is handled before its projections.
fn subsets(ids: &[ContestId]) -> Vec<Vec<ContestId>> {
    let n = ids.len();
    let mut out: Vec<Vec<ContestId>> = Vec::with_capacity(1 << n);
    for mask in (0..(1u32 << n)).rev() {
        let subset: Vec<ContestId> = ids
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, id)| *id)
            .collect();
        out.push(subset);
    }
    out
}

fn output_dir(args: &Args) -> PathBuf {
    if let Some(out) = &args.out {
        return PathBuf::from(out);
    }
    let export = Path::new(&args.export);
    if export.is_dir() {
        export.to_path_buf()
    } else {
        export.parent().unwrap_or_else(|| Path::new(".")).to_path_buf()
    }
}

pub fn run(args: &Args) -> CvrResult<()> {
    let raw = read_export(Path::new(&args.export))?;
    let data = BallotData::build(&raw)?;

    println!("{}", data);

    report::contests_by_card(&data);

    let ids: Vec<ContestId> = args.contests.iter().map(|id| ContestId(*id)).collect();

    if ids.is_empty() {
        for contest in data.election.contests() {
            println!("{} {}", contest.id.0, contest.name);
        }
    }

    let mut diag = Diagnostics::default();

    for id in &ids {
        let contest = data.election.contest(*id).context(TabulationSnafu)?;
        if contest.ranks > 0 {
            show_rcv_contest(&data, *id, &mut diag)?;
        } else {
            show_contest(&data, *id, &mut diag)?;
        }
    }

    let out_dir = output_dir(args);

    if ids.len() > 1 {
        if ids.len() > MAX_JOINT_CONTESTS {
            whatever!(
                "joint analysis supports at most {} contests, got {}",
                MAX_JOINT_CONTESTS,
                ids.len()
            );
        }
        for subset in subsets(&ids) {
            if subset.len() > 1 {
                write_joint(&data, &out_dir, &subset, subset.len() == ids.len(), &mut diag)?;
            }
        }
        write_grid(&data, &out_dir, &ids, &mut diag)?;
    }

    if args.precincts {
        report::precinct_report(&data);
    }

    if !diag.is_clean() {
        warn!(
            "data inconsistencies recovered as Invalid: {} unknown candidates, \
             {} mark count mismatches, {} out-of-range ranks",
            diag.unknown_candidates, diag.mark_count_mismatches, diag.out_of_range_ranks
        );
    }
    Ok(())
}

fn show_contest(data: &BallotData, id: ContestId, diag: &mut Diagnostics) -> CvrResult<()> {
    let contest = data.election.contest(id).context(TabulationSnafu)?;
    let roster = data.election.roster(id).context(TabulationSnafu)?;

    let mut results: HashMap<String, u64> = HashMap::new();
    for card in &data.cards {
        for instance in card.contests.iter().filter(|i| i.contest == id) {
            let outcome = classify_vote(instance, roster, diag);
            *results.entry(outcome.label().to_string()).or_insert(0) += 1;
        }
    }

    println!("{}", contest.name);
    print!("{}", report::format_counts(&results));
    println!();
    Ok(())
}

fn show_rcv_contest(data: &BallotData, id: ContestId, diag: &mut Diagnostics) -> CvrResult<()> {
    let contest = data.election.contest(id).context(TabulationSnafu)?;
    let roster = data.election.roster(id).context(TabulationSnafu)?;

    // One extraction pass feeds both the raw combination tally and the
    // ranked-choice tabulations.
    let mut string_results: HashMap<String, u64> = HashMap::new();
    let mut rankings: Vec<Vec<CandidateId>> = Vec::new();
    for card in &data.cards {
        for instance in card.contests.iter().filter(|i| i.contest == id) {
            match extract_ranking(instance, roster, contest.ranks, diag) {
                Ranking::Abstain => {
                    *string_results.entry("Abstain".to_string()).or_insert(0) += 1
                }
                Ranking::Invalid => {
                    *string_results.entry("Invalid".to_string()).or_insert(0) += 1
                }
                Ranking::Ranked(seq) => {
                    let label = seq
                        .iter()
                        .filter_map(|cid| roster.name(*cid))
                        .collect::<Vec<&str>>()
                        .join(" > ");
                    *string_results.entry(label).or_insert(0) += 1;
                    rankings.push(seq);
                }
            }
        }
    }

    println!("{} (RCV, rank up to {})", contest.name, contest.ranks);
    print!("{}", report::format_counts(&string_results));
    println!();

    println!("Ballot summary");
    print!("{}", report::ballot_summary(&rankings, roster));
    println!();

    let irv = run_irv(&rankings, roster).context(TabulationSnafu)?;
    for (i, round) in irv.rounds.iter().enumerate() {
        println!("IRV Round {}", i + 1);
        let counts: HashMap<String, u64> = round
            .tally
            .iter()
            .map(|(bucket, count)| (bucket.label().to_string(), *count))
            .collect();
        print!("{}", report::format_counts(&counts));
        match &round.eliminated {
            Some(name) => println!("{} is eliminated", name),
            None => println!("{} wins", irv.winner),
        }
        println!();
    }

    println!("Borda count");
    print!(
        "{}",
        report::format_counts(&positional_scores(
            &rankings,
            roster,
            borda_weights(contest.ranks)
        ))
    );
    println!();

    println!("Nauru/Dowdall method");
    print!(
        "{}",
        report::format_counts(&positional_scores(&rankings, roster, dowdall_weight))
    );
    println!();

    println!("Schulze method");
    let pairwise = run_pairwise(&rankings, roster).context(TabulationSnafu)?;
    if pairwise.beatpaths.is_none() {
        println!("{} (condorcet winner)", pairwise.winner);
    } else {
        println!("{}", pairwise.winner);
    }
    println!("Preferences:");
    print!(
        "{}",
        report::format_counts(&report::matrix_counts(&pairwise.preferences))
    );
    if let Some(paths) = &pairwise.beatpaths {
        println!("Strongest paths:");
        print!("{}", report::format_counts(&report::matrix_counts(paths)));
    }
    println!();
    Ok(())
}

fn write_joint(
    data: &BallotData,
    out_dir: &Path,
    subset: &[ContestId],
    show: bool,
    diag: &mut Diagnostics,
) -> CvrResult<()> {
    let coalesce = subset.len() > 2;
    let results = joint_tally(&data.cards, &data.election, subset, coalesce, diag)
        .context(TabulationSnafu)?;
    if show {
        let counts: HashMap<String, u64> = results
            .iter()
            .map(|(key, count)| (report::joint_label(key), *count))
            .collect();
        print!("{}", report::format_counts(&counts));
    }
    let name = format!(
        "results_{}.csv",
        subset
            .iter()
            .map(|id| id.0.to_string())
            .collect::<Vec<String>>()
            .join("_")
    );
    let path = out_dir.join(name);
    report::joint_csv(&path, &results)?;
    println!("wrote {}", path.display());
    Ok(())
}

fn write_grid(
    data: &BallotData,
    out_dir: &Path,
    ids: &[ContestId],
    diag: &mut Diagnostics,
) -> CvrResult<()> {
    let coalesce = ids.len() > 2;
    let grid =
        grid_chart(&data.cards, &data.election, ids, coalesce, diag).context(TabulationSnafu)?;
    let base = format!(
        "results_grid_{}",
        ids.iter()
            .map(|id| id.0.to_string())
            .collect::<Vec<String>>()
            .join("_")
    );

    let csv_path = out_dir.join(format!("{}.csv", base));
    report::grid_csv(&csv_path, &grid)?;
    println!("wrote {}", csv_path.display());

    let html_path = out_dir.join(format!("{}.html", base));
    let html = report::render_grid_html(&grid);
    fs::write(&html_path, html).context(WritingReportSnafu {
        path: html_path.display().to_string(),
    })?;
    println!("wrote {}", html_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_takes_prefix_up_to_comma() {
        assert_eq!(short_name("DWYER, MICHAEL J."), "DWYER");
        assert_eq!(
            short_name("Begich, Nicholas \"Nick\" III"),
            "Begich"
        );
    }

    #[test]
    fn short_name_guesses_last_name() {
        assert_eq!(short_name("MARY SMITH"), "Smith");
        assert_eq!(short_name("JOHN A. DOE JR."), "Doe");
        assert_eq!(short_name("JAMES BROWN III"), "Brown");
    }

    #[test]
    fn short_name_keeps_single_words() {
        assert_eq!(short_name("PRINCE"), "PRINCE");
    }

    #[test]
    fn short_name_strips_stacked_suffixes() {
        assert_eq!(short_name("ROBERT WHITE JR. SR."), "White");
    }

    #[test]
    fn subsets_enumerates_full_set_first() {
        let ids = vec![ContestId(1), ContestId(2), ContestId(3)];
        let all = subsets(&ids);
        assert_eq!(all.len(), 8);
        assert_eq!(all[0], ids);
        assert!(all.contains(&vec![ContestId(1), ContestId(3)]));
        assert!(all.contains(&vec![]));
    }
}
