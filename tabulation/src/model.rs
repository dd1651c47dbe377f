// ********* Input data structures ***********

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::Display;

/// Identifier of a candidate. Unique within its contest.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct CandidateId(pub u32);

/// Identifier of a contest (a race or a ballot question).
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct ContestId(pub u32);

/// A registered candidate, as provided by the ingestion layer.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Candidate {
    pub id: CandidateId,
    pub contest: ContestId,
    pub name: String,
}

/// A contest appearing on some of the ballots.
///
/// `ranks` is the maximum number of rank positions a voter may mark.
/// Zero means a plain (non-ranked) contest.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Contest {
    pub id: ContestId,
    pub name: String,
    pub ranks: u32,
    pub vote_for: u32,
}

/// One physical mark within one contest on one ballot.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Mark {
    pub candidate: CandidateId,
    /// 1-based rank position. Only meaningful for ranked contests.
    pub rank: u32,
    /// Marks that do not count as a vote (write-in placeholders and the
    /// like) are kept in the record but skipped by the classifier.
    pub is_vote: bool,
    /// Ambiguous marks are excluded from ranking extraction.
    pub is_ambiguous: bool,
}

/// One contest as it appears on one ballot card.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ContestInstance {
    pub contest: ContestId,
    pub undervotes: u32,
    pub overvotes: u32,
    /// Adjudication flags raised by the scanner or a reviewer.
    pub outstack_conditions: Vec<u32>,
    pub marks: Vec<Mark>,
}

/// One ballot sheet. A card need not contain every contest in the dataset.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Card {
    pub contests: Vec<ContestInstance>,
}

// ******** Output data structures *********

/// The classifier's verdict for one contest on one ballot.
///
/// Abstain and Invalid live in the same closed type as candidate names so
/// they can never collide with a real candidate, no matter what the
/// candidate manifest contains.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub enum VoteOutcome {
    Abstain,
    Invalid,
    Candidate(String),
}

impl VoteOutcome {
    pub fn label(&self) -> &str {
        match self {
            VoteOutcome::Abstain => "Abstain",
            VoteOutcome::Invalid => "Invalid",
            VoteOutcome::Candidate(name) => name,
        }
    }

    /// Presentation order used for report axes: Yes before No before the
    /// other candidates (alphabetically), with Abstain and Invalid last.
    pub fn presentation_cmp(&self, other: &VoteOutcome) -> Ordering {
        fn key(o: &VoteOutcome) -> (u8, &str) {
            match o {
                VoteOutcome::Candidate(name) if name == "Yes" => (0, ""),
                VoteOutcome::Candidate(name) if name == "No" => (1, ""),
                VoteOutcome::Candidate(name) => (2, name.as_str()),
                VoteOutcome::Abstain => (3, ""),
                VoteOutcome::Invalid => (4, ""),
            }
        }
        key(self).cmp(&key(other))
    }
}

/// The ranking extractor's verdict for one ranked contest on one ballot.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Ranking {
    Abstain,
    Invalid,
    /// First preference first. Non-empty, no candidate repeats, and the
    /// length never exceeds the contest's rank count.
    Ranked(Vec<CandidateId>),
}

/// A bucket in an IRV round tally. The Exhausted sentinel counts ballots
/// whose every ranked candidate has been eliminated.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub enum TallyBucket {
    Candidate(String),
    Exhausted,
}

impl TallyBucket {
    pub fn label(&self) -> &str {
        match self {
            TallyBucket::Candidate(name) => name,
            TallyBucket::Exhausted => "Exhausted",
        }
    }
}

/// Tally of one IRV round. `eliminated` is None only for the terminal
/// round, which tallies the winner and the Exhausted sentinel.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct IrvRound {
    pub tally: Vec<(TallyBucket, u64)>,
    pub eliminated: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct IrvResult {
    pub winner: String,
    pub rounds: Vec<IrvRound>,
}

/// Winner and matrices of a Condorcet/Schulze tabulation.
///
/// `beatpaths` is None when the winner was a straight Condorcet winner and
/// no beatpath computation was needed.
#[derive(PartialEq, Debug, Clone)]
pub struct PairwiseOutcome {
    pub winner: String,
    /// (A, B) → number of ballots ranking A strictly before B.
    pub preferences: HashMap<(String, String), u64>,
    /// (A, B) → strength of the strongest beatpath from A to B.
    pub beatpaths: Option<HashMap<(String, String), u64>>,
}

// ******** Errors and diagnostics *********

/// Fatal conditions: structural invariant violations in the input data, or
/// misuse of the tabulation API. Recoverable per-ballot inconsistencies are
/// counted in [Diagnostics] instead.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum TabulationError {
    DuplicateCandidateId {
        contest: ContestId,
        candidate: CandidateId,
    },
    DuplicateCandidateName {
        contest: ContestId,
        name: String,
    },
    DuplicateContest(ContestId),
    UnknownContest(ContestId),
    /// A ranked-choice operation was requested for a non-ranked contest.
    NotRanked(ContestId),
    EmptyContest(ContestId),
    /// A cross-contest grid was requested for fewer than two contests.
    TooFewContests(usize),
    /// The Schulze search did not converge on a winner. This indicates a
    /// bug or pathologically tied data, never a recoverable condition.
    NoSchulzeWinner(ContestId),
}

impl Error for TabulationError {}

impl Display for TabulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TabulationError::DuplicateCandidateId { contest, candidate } => {
                write!(
                    f,
                    "duplicate candidate id {} in contest {}",
                    candidate.0, contest.0
                )
            }
            TabulationError::DuplicateCandidateName { contest, name } => {
                write!(
                    f,
                    "duplicate candidate name {:?} in contest {}",
                    name, contest.0
                )
            }
            TabulationError::DuplicateContest(id) => write!(f, "duplicate contest id {}", id.0),
            TabulationError::UnknownContest(id) => write!(f, "unknown contest id {}", id.0),
            TabulationError::NotRanked(id) => {
                write!(f, "contest {} is not a ranked-choice contest", id.0)
            }
            TabulationError::EmptyContest(id) => {
                write!(f, "contest {} has no candidates", id.0)
            }
            TabulationError::TooFewContests(n) => {
                write!(f, "cross-contest grid requires at least 2 contests, got {}", n)
            }
            TabulationError::NoSchulzeWinner(id) => {
                write!(f, "no Schulze winner found for contest {}", id.0)
            }
        }
    }
}

/// Counters for per-ballot data inconsistencies that were recovered by
/// classifying the affected contest as Invalid. A non-zero counter points
/// at a systematic scanning problem and should be reported to the operator.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct Diagnostics {
    /// Marks referencing a candidate id absent from the contest roster.
    pub unknown_candidates: u64,
    /// Countable marks disagreeing with the undervote/overvote counters.
    pub mark_count_mismatches: u64,
    /// Marks with a rank position of 0 or beyond the contest's rank count.
    pub out_of_range_ranks: u64,
}

impl Diagnostics {
    pub fn is_clean(&self) -> bool {
        *self == Diagnostics::default()
    }
}

// ******** Contest index *********

/// Candidate-id → display-name map for one contest.
pub struct ContestRoster {
    contest: ContestId,
    names: HashMap<CandidateId, String>,
}

impl ContestRoster {
    /// Builds the roster, rejecting duplicate ids and duplicate display
    /// names. Candidate names may have been normalized upstream; two
    /// candidates collapsing to the same name must surface here rather
    /// than silently merge their tallies.
    pub fn new(contest: ContestId, candidates: &[Candidate]) -> Result<Self, TabulationError> {
        let mut names: HashMap<CandidateId, String> = HashMap::with_capacity(candidates.len());
        for c in candidates {
            if names.insert(c.id, c.name.clone()).is_some() {
                return Err(TabulationError::DuplicateCandidateId {
                    contest,
                    candidate: c.id,
                });
            }
        }
        let mut seen: HashMap<&str, CandidateId> = HashMap::with_capacity(names.len());
        for (id, name) in names.iter() {
            if seen.insert(name.as_str(), *id).is_some() {
                return Err(TabulationError::DuplicateCandidateName {
                    contest,
                    name: name.clone(),
                });
            }
        }
        Ok(ContestRoster { contest, names })
    }

    pub fn contest(&self) -> ContestId {
        self.contest
    }

    pub fn name(&self, id: CandidateId) -> Option<&str> {
        self.names.get(&id).map(|s| s.as_str())
    }

    /// Candidate ids in ascending order. This is the total order used for
    /// deterministic tie-breaking.
    pub fn ids(&self) -> Vec<CandidateId> {
        let mut ids: Vec<CandidateId> = self.names.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// The immutable election context: contests and their rosters, built once
/// from the ingestion output and shared by every tabulation stage.
pub struct Election {
    contests: BTreeMap<ContestId, Contest>,
    rosters: HashMap<ContestId, ContestRoster>,
}

impl Election {
    pub fn new(contests: Vec<Contest>, candidates: Vec<Candidate>) -> Result<Self, TabulationError> {
        let mut by_contest: HashMap<ContestId, Vec<Candidate>> = HashMap::new();
        for c in candidates {
            by_contest.entry(c.contest).or_default().push(c);
        }
        let mut contest_map: BTreeMap<ContestId, Contest> = BTreeMap::new();
        let mut rosters: HashMap<ContestId, ContestRoster> = HashMap::new();
        for contest in contests {
            let id = contest.id;
            if contest_map.insert(id, contest).is_some() {
                return Err(TabulationError::DuplicateContest(id));
            }
            let cands = by_contest.remove(&id).unwrap_or_default();
            rosters.insert(id, ContestRoster::new(id, &cands)?);
        }
        Ok(Election {
            contests: contest_map,
            rosters,
        })
    }

    pub fn contest(&self, id: ContestId) -> Result<&Contest, TabulationError> {
        self.contests
            .get(&id)
            .ok_or(TabulationError::UnknownContest(id))
    }

    pub fn roster(&self, id: ContestId) -> Result<&ContestRoster, TabulationError> {
        self.rosters
            .get(&id)
            .ok_or(TabulationError::UnknownContest(id))
    }

    /// Contests in ascending id order.
    pub fn contests(&self) -> impl Iterator<Item = &Contest> {
        self.contests.values()
    }

    pub fn num_contests(&self) -> usize {
        self.contests.len()
    }

    pub fn num_candidates(&self) -> usize {
        self.rosters.values().map(|r| r.len()).sum()
    }
}
