//! Text, CSV and HTML rendering of tabulation results.

use snafu::prelude::*;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

use tabulation::joint::{GridCell, JointKey};
use tabulation::{CandidateId, ContestId, ContestRoster};

use crate::cvr::{BallotData, CvrResult, WritingCsvSnafu, WritingReportSnafu};

/// Count types the aligned tally formatter accepts. Fractional totals (the
/// Dowdall scores) are displayed truncated, like the integer ones.
pub trait TallyValue: Copy {
    fn as_f64(self) -> f64;
}

impl TallyValue for u64 {
    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl TallyValue for f64 {
    fn as_f64(self) -> f64 {
        self
    }
}

fn token_rank(token: &str) -> u8 {
    match token {
        "Yes" => 0,
        "No" => 1,
        "Write-in" => 3,
        "Exhausted" => 4,
        "Abs" | "Abstain" => 5,
        "Inv" | "Invalid" => 6,
        "Incomplete" => 7,
        _ => 2,
    }
}

fn cmp_tokens(x: &str, y: &str) -> Ordering {
    if x == y {
        return Ordering::Equal;
    }
    (token_rank(x), x).cmp(&(token_rank(y), y))
}

/// Presentation order of result labels. Labels are compared componentwise
/// on their '|'-separated tokens: Yes sorts first, No second, candidate
/// names alphabetically, and the non-candidate tokens (Write-in, Exhausted,
/// Abstain, Invalid, Incomplete) after all of them.
pub fn cmp_labels(x: &str, y: &str) -> Ordering {
    if x == y {
        return Ordering::Equal;
    }
    let mut xs = x.split('|').filter(|t| !t.is_empty());
    let mut ys = y.split('|').filter(|t| !t.is_empty());
    loop {
        match (xs.next(), ys.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => match cmp_tokens(a, b) {
                Ordering::Equal => continue,
                ord => return ord,
            },
        }
    }
}

/// Formats a label → count map as aligned lines with percentages and a
/// Total row.
pub fn format_counts<T: TallyValue>(results: &HashMap<String, T>) -> String {
    let mut keys: Vec<&String> = results.keys().collect();
    keys.sort_by(|a, b| cmp_labels(a, b));
    let total: f64 = results.values().map(|v| v.as_f64()).sum();
    let width = keys
        .iter()
        .map(|k| k.len())
        .max()
        .unwrap_or(0)
        .max("Total".len());

    let mut out = String::new();
    for key in keys {
        let value = results[key.as_str()].as_f64();
        let percent = if total > 0.0 { 100.0 * value / total } else { 0.0 };
        out.push_str(&format!(
            "{:>w$}: {:7} ({:4.1}%)\n",
            key,
            value as i64,
            percent,
            w = width
        ));
    }
    out.push_str(&format!("{:>w$}: {:7}\n", "Total", total as i64, w = width));
    out
}

/// Flattens a pairwise matrix into "A > B" labels for the tally formatter.
pub fn matrix_counts(matrix: &HashMap<(String, String), u64>) -> HashMap<String, u64> {
    matrix
        .iter()
        .map(|((a, b), count)| (format!("{} > {}", a, b), *count))
        .collect()
}

pub fn joint_label(key: &JointKey) -> String {
    match key {
        JointKey::Votes(votes) => votes
            .iter()
            .map(|o| o.label())
            .collect::<Vec<&str>>()
            .join("|"),
        JointKey::Incomplete => "Incomplete".to_string(),
    }
}

fn sorted_joint_rows(results: &HashMap<JointKey, u64>) -> Vec<(Vec<String>, u64)> {
    let mut rows: Vec<(Vec<String>, u64)> = results
        .iter()
        .map(|(key, count)| {
            let cells = match key {
                JointKey::Votes(votes) => {
                    votes.iter().map(|o| o.label().to_string()).collect()
                }
                JointKey::Incomplete => vec!["Incomplete".to_string()],
            };
            (cells, *count)
        })
        .collect();
    rows.sort_by(|(a, _), (b, _)| cmp_labels(&a.join("|"), &b.join("|")));
    rows
}

/// Writes a joint distribution as CSV: one outcome token per column, the
/// count last. The Incomplete row leaves the remaining outcome columns
/// blank.
pub fn joint_csv(path: &Path, results: &HashMap<JointKey, u64>) -> CvrResult<()> {
    let width = results
        .keys()
        .map(|key| match key {
            JointKey::Votes(votes) => votes.len(),
            JointKey::Incomplete => 1,
        })
        .max()
        .unwrap_or(1);

    let mut writer = csv::Writer::from_path(path).context(WritingCsvSnafu {
        path: path.display().to_string(),
    })?;
    for (mut cells, count) in sorted_joint_rows(results) {
        cells.resize(width, String::new());
        cells.push(count.to_string());
        writer.write_record(&cells).context(WritingCsvSnafu {
            path: path.display().to_string(),
        })?;
    }
    writer.flush().context(WritingReportSnafu {
        path: path.display().to_string(),
    })?;
    Ok(())
}

pub fn grid_csv(path: &Path, grid: &[Vec<GridCell>]) -> CvrResult<()> {
    let mut writer = csv::Writer::from_path(path).context(WritingCsvSnafu {
        path: path.display().to_string(),
    })?;
    for row in grid {
        let record: Vec<String> = row
            .iter()
            .map(|cell| match cell {
                GridCell::Empty => String::new(),
                GridCell::Header(label) => label.clone(),
                GridCell::Probability(p) => p.to_string(),
            })
            .collect();
        writer.write_record(&record).context(WritingCsvSnafu {
            path: path.display().to_string(),
        })?;
    }
    writer.flush().context(WritingReportSnafu {
        path: path.display().to_string(),
    })?;
    Ok(())
}

const GREEN: [u8; 3] = [87, 187, 138];
const WHITE: [u8; 3] = [255, 255, 255];

/// Merge widths for a run of header cells: the first cell of each run gets
/// the run length, the cells it swallows get -1, everything else 1.
fn header_spans(cells: &[&GridCell]) -> Vec<i32> {
    let mut spans = vec![0i32; cells.len()];
    let mut i = 0;
    while i < cells.len() {
        match cells[i] {
            GridCell::Header(label) => {
                let mut run = 1;
                while i + run < cells.len()
                    && matches!(cells[i + run], GridCell::Header(l) if l == label)
                {
                    spans[i + run] = -1;
                    run += 1;
                }
                spans[i] = run as i32;
                i += run;
            }
            _ => {
                spans[i] = 1;
                i += 1;
            }
        }
    }
    spans
}

/// Renders the grid as an HTML table: merged header cells, probability
/// cells shaded white-to-green by relative magnitude.
pub fn render_grid_html(grid: &[Vec<GridCell>]) -> String {
    let mut max_val = 0.0f64;
    for row in grid {
        for cell in row {
            if let GridCell::Probability(p) = cell {
                if *p > max_val {
                    max_val = *p;
                }
            }
        }
    }

    let top_row: Vec<&GridCell> = grid.first().map(|row| row.iter().collect()).unwrap_or_default();
    let col_spans = header_spans(&top_row);
    let left_col: Vec<&GridCell> = grid.iter().filter_map(|row| row.first()).collect();
    let row_spans = header_spans(&left_col);

    let mut b = String::new();
    b.push_str("<table>\n<thead>\n");
    let mut in_head = true;
    for (i, row) in grid.iter().enumerate() {
        if in_head && !matches!(row.last(), Some(GridCell::Header(_))) {
            b.push_str("</thead>\n<tbody>\n");
            in_head = false;
        }
        b.push_str("<tr>");
        for (j, cell) in row.iter().enumerate() {
            match cell {
                GridCell::Empty => b.push_str("<td/>"),
                GridCell::Header(label) => {
                    if i == 0 && col_spans[j] < 0 || j == 0 && row_spans[i] < 0 {
                        continue;
                    }
                    b.push_str("<th");
                    if i == 0 && col_spans[j] > 1 {
                        b.push_str(&format!(" colspan={}", col_spans[j]));
                    }
                    if j == 0 && row_spans[i] > 1 {
                        b.push_str(&format!(" rowspan={}", row_spans[i]));
                    }
                    b.push_str(&format!(">{}</th>", label));
                }
                GridCell::Probability(p) => {
                    let f = if max_val > 0.0 { p / max_val } else { 0.0 };
                    let mut c = [0u8; 3];
                    for (k, channel) in c.iter_mut().enumerate() {
                        *channel =
                            (f * GREEN[k] as f64 + (1.0 - f) * WHITE[k] as f64) as u8;
                    }
                    b.push_str(&format!(
                        "<td style=\"background-color: #{:02x}{:02x}{:02x};\">{:.2}%</td>",
                        c[0],
                        c[1],
                        c[2],
                        100.0 * p
                    ));
                }
            }
        }
        b.push_str("</tr>\n");
    }
    b.push_str("</tbody>\n</table>\n");
    b
}

/// Prints which contests appear on which cards: the contest ids vertically
/// as column headers, then one line per distinct presence signature with
/// its card count.
pub fn contests_by_card(data: &BallotData) {
    let ids: Vec<ContestId> = data.election.contests().map(|c| c.id).collect();
    let index: HashMap<ContestId, usize> =
        ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut counts: HashMap<String, u64> = HashMap::new();
    for card in &data.cards {
        let mut sig = vec![b' '; ids.len()];
        for instance in &card.contests {
            if let Some(i) = index.get(&instance.contest) {
                sig[*i] = b'X';
            }
        }
        *counts
            .entry(String::from_utf8_lossy(&sig).to_string())
            .or_insert(0) += 1;
    }

    let digits = ids
        .iter()
        .map(|id| id.0.to_string().len())
        .max()
        .unwrap_or(0);
    for row in 0..digits {
        let line: String = ids
            .iter()
            .map(|id| {
                let padded = format!("{:0w$}", id.0, w = digits);
                padded.as_bytes()[row] as char
            })
            .collect();
        println!("{}", line);
    }

    let mut keys: Vec<&String> = counts.keys().collect();
    keys.sort();
    for key in keys {
        println!("{} {}", key, counts[key.as_str()]);
    }
    println!();
}

/// Ballot count per precinct portion, flagging the thinnest ones.
pub fn precinct_report(data: &BallotData) {
    let min = data.precinct_counts.values().copied().min().unwrap_or(0);
    let mut ids: Vec<u32> = data.precinct_counts.keys().copied().collect();
    ids.sort_unstable();
    for id in ids {
        let count = data.precinct_counts[&id];
        let name = data
            .precinct_names
            .get(&id)
            .map(|s| s.as_str())
            .unwrap_or("(unknown precinct portion)");
        let flag = if count <= min {
            " **********"
        } else if count <= 100 {
            " ***"
        } else {
            ""
        };
        println!("{} - {} votes{}", name, count, flag);
    }
}

/// Histogram of ranking lengths plus, for each candidate, how many ballots
/// ranked them alone and how many ranked them first.
pub fn ballot_summary(rankings: &[Vec<CandidateId>], roster: &ContestRoster) -> String {
    let mut length_counts: HashMap<usize, u64> = HashMap::new();
    let mut singles: HashMap<CandidateId, u64> = HashMap::new();
    let mut firsts: HashMap<CandidateId, u64> = HashMap::new();
    for ranking in rankings {
        *length_counts.entry(ranking.len()).or_insert(0) += 1;
        if let Some(first) = ranking.first() {
            *firsts.entry(*first).or_insert(0) += 1;
            if ranking.len() == 1 {
                *singles.entry(*first).or_insert(0) += 1;
            }
        }
    }

    let mut out = String::new();
    for n in 1..=roster.len() {
        if let Some(count) = length_counts.get(&n) {
            out.push_str(&format!("{} candidates: {}\n", n, count));
        }
    }
    for id in roster.ids() {
        if let Some(name) = roster.name(id) {
            out.push_str(&format!(
                "{}: {} only, {} first\n",
                name,
                singles.get(&id).copied().unwrap_or(0),
                firsts.get(&id).copied().unwrap_or(0)
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabulation::{Candidate, VoteOutcome};

    #[test]
    fn label_order_puts_sentinels_last() {
        let mut labels = vec![
            "Incomplete",
            "Invalid",
            "Abstain",
            "Exhausted",
            "Write-in",
            "Lopez",
            "Grant",
            "No",
            "Yes",
        ];
        labels.sort_by(|a, b| cmp_labels(a, b));
        assert_eq!(
            labels,
            vec![
                "Yes",
                "No",
                "Grant",
                "Lopez",
                "Write-in",
                "Exhausted",
                "Abstain",
                "Invalid",
                "Incomplete"
            ]
        );
    }

    #[test]
    fn label_order_is_componentwise() {
        let mut labels = vec!["No|Lopez", "Yes|Abstain", "Yes|Grant", "Incomplete"];
        labels.sort_by(|a, b| cmp_labels(a, b));
        assert_eq!(
            labels,
            vec!["Yes|Grant", "Yes|Abstain", "No|Lopez", "Incomplete"]
        );
    }

    #[test]
    fn format_counts_aligns_and_totals() {
        let mut results: HashMap<String, u64> = HashMap::new();
        results.insert("Yes".to_string(), 3);
        results.insert("No".to_string(), 1);
        let text = format_counts(&results);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "  Yes:       3 (75.0%)");
        assert_eq!(lines[1], "   No:       1 (25.0%)");
        assert_eq!(lines[2], "Total:       4");
    }

    #[test]
    fn format_counts_truncates_fractional_scores() {
        let mut results: HashMap<String, f64> = HashMap::new();
        results.insert("Grant".to_string(), 2.5);
        let text = format_counts(&results);
        assert!(text.starts_with("Grant:       2 "));
    }

    #[test]
    fn matrix_counts_builds_arrow_labels() {
        let mut matrix: HashMap<(String, String), u64> = HashMap::new();
        matrix.insert(("Grant".to_string(), "Lopez".to_string()), 8);
        let counts = matrix_counts(&matrix);
        assert_eq!(counts.get("Grant > Lopez"), Some(&8));
    }

    #[test]
    fn joint_rows_sorted_with_incomplete_last() {
        let mut results: HashMap<JointKey, u64> = HashMap::new();
        results.insert(
            JointKey::Votes(vec![
                VoteOutcome::Candidate("Lopez".to_string()),
                VoteOutcome::Candidate("Yes".to_string()),
            ]),
            5,
        );
        results.insert(JointKey::Incomplete, 2);
        let rows = sorted_joint_rows(&results);
        assert_eq!(rows[0].0, vec!["Lopez".to_string(), "Yes".to_string()]);
        assert_eq!(rows[1], (vec!["Incomplete".to_string()], 2));
    }

    #[test]
    fn grid_html_merges_headers_and_shades_cells() {
        let grid = vec![
            vec![
                GridCell::Empty,
                GridCell::Empty,
                GridCell::Header("Measure Q".to_string()),
                GridCell::Header("Measure Q".to_string()),
            ],
            vec![
                GridCell::Empty,
                GridCell::Empty,
                GridCell::Header("Yes".to_string()),
                GridCell::Header("No".to_string()),
            ],
            vec![
                GridCell::Header("Mayor".to_string()),
                GridCell::Header("Grant".to_string()),
                GridCell::Probability(0.5),
                GridCell::Probability(0.25),
            ],
        ];
        let html = render_grid_html(&grid);
        assert!(html.contains("<th colspan=2>Measure Q</th>"));
        assert!(html.contains("<th>Grant</th>"));
        // The largest probability renders as pure green.
        assert!(html.contains("background-color: #57bb8a;\">50.00%"));
        assert!(html.contains("25.00%"));
        assert!(html.contains("<thead>"));
        assert!(html.contains("<tbody>"));
    }

    #[test]
    fn ballot_summary_counts_lengths_and_firsts() {
        let roster = ContestRoster::new(
            ContestId(1),
            &[
                Candidate {
                    id: CandidateId(1),
                    contest: ContestId(1),
                    name: "Grant".to_string(),
                },
                Candidate {
                    id: CandidateId(2),
                    contest: ContestId(1),
                    name: "Lopez".to_string(),
                },
            ],
        )
        .unwrap();
        let rankings = vec![
            vec![CandidateId(1)],
            vec![CandidateId(1), CandidateId(2)],
            vec![CandidateId(2), CandidateId(1)],
        ];
        let text = ballot_summary(&rankings, &roster);
        assert!(text.contains("1 candidates: 1\n"));
        assert!(text.contains("2 candidates: 2\n"));
        assert!(text.contains("Grant: 1 only, 2 first\n"));
        assert!(text.contains("Lopez: 0 only, 1 first\n"));
    }
}
