//! Reader for Dominion CVR exports: the JSON manifests plus the CvrExport
//! record files, from a directory or from a zip archive of one.

use log::{debug, info};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::cvr::{
    CvrResult, OpeningArchiveSnafu, ParsingJsonSnafu, ReadingFileSnafu,
};

// Record files are split per tabulator batch and there can be thousands of
// them, so they are parsed on a small pool of worker threads.
const MAX_LOADER_THREADS: usize = 8;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Manifest<T> {
    #[serde(rename = "Version", default)]
    pub version: Option<String>,
    #[serde(rename = "List")]
    pub list: Vec<T>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawContest {
    #[serde(rename = "Description")]
    pub name: String,
    #[serde(rename = "Id")]
    pub id: u32,
    #[serde(rename = "VoteFor", default)]
    pub vote_for: u32,
    /// Zero for plain contests, the number of rank positions otherwise.
    #[serde(rename = "NumOfRanks", default)]
    pub num_of_ranks: u32,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawCandidate {
    #[serde(rename = "Description")]
    pub name: String,
    #[serde(rename = "Id")]
    pub id: u32,
    #[serde(rename = "ContestId")]
    pub contest_id: u32,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawPrecinctPortion {
    #[serde(rename = "Description")]
    pub name: String,
    #[serde(rename = "Id")]
    pub id: u32,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct CvrExport {
    #[serde(rename = "Sessions")]
    pub sessions: Vec<RawSession>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawSession {
    #[serde(rename = "TabulatorId", default)]
    pub tabulator_id: u32,
    #[serde(rename = "BatchId", default)]
    pub batch_id: u32,
    #[serde(rename = "Original")]
    pub original: RawSessionRecord,
    /// Present when the session was adjudicated after scanning.
    #[serde(rename = "Modified", default)]
    pub modified: Option<RawSessionRecord>,
}

impl RawSession {
    /// The record to tabulate: the adjudicated one when it supersedes the
    /// original scan, the original otherwise.
    pub fn record(&self) -> &RawSessionRecord {
        match &self.modified {
            Some(modified) if modified.is_current => modified,
            _ => &self.original,
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawSessionRecord {
    #[serde(rename = "PrecinctPortionId", default)]
    pub precinct_portion_id: u32,
    #[serde(rename = "IsCurrent", default)]
    pub is_current: bool,
    #[serde(rename = "Cards")]
    pub cards: Vec<RawCard>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawCard {
    #[serde(rename = "Id", default)]
    pub id: u32,
    #[serde(rename = "Contests")]
    pub contests: Vec<RawCardContest>,
    #[serde(rename = "OutstackConditionIds", default)]
    pub outstack_condition_ids: Vec<u32>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawCardContest {
    #[serde(rename = "Id")]
    pub id: u32,
    #[serde(rename = "Undervotes", default)]
    pub undervotes: u32,
    #[serde(rename = "Overvotes", default)]
    pub overvotes: u32,
    #[serde(rename = "OutstackConditionIds", default)]
    pub outstack_condition_ids: Vec<u32>,
    #[serde(rename = "Marks", default)]
    pub marks: Vec<RawMark>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RawMark {
    #[serde(rename = "CandidateId")]
    pub candidate_id: u32,
    #[serde(rename = "Rank", default)]
    pub rank: u32,
    #[serde(rename = "IsAmbiguous", default)]
    pub is_ambiguous: bool,
    #[serde(rename = "IsVote", default)]
    pub is_vote: bool,
}

/// The parsed export, manifests and record files, before any tabulation
/// model is built on top of it.
pub struct RawExport {
    pub contests: Vec<RawContest>,
    pub candidates: Vec<RawCandidate>,
    pub precinct_portions: Vec<RawPrecinctPortion>,
    pub cvrs: Vec<CvrExport>,
}

#[derive(Debug, Clone)]
enum Source {
    Dir(PathBuf),
    Archive(PathBuf),
}

impl Source {
    fn new(path: &Path) -> CvrResult<Source> {
        let meta = fs::metadata(path).context(ReadingFileSnafu {
            path: path.display().to_string(),
        })?;
        if meta.is_dir() {
            Ok(Source::Dir(path.to_path_buf()))
        } else {
            Ok(Source::Archive(path.to_path_buf()))
        }
    }

    fn open(&self) -> CvrResult<Reader> {
        match self {
            Source::Dir(dir) => Ok(Reader::Dir(dir.clone())),
            Source::Archive(path) => {
                let file = fs::File::open(path).context(ReadingFileSnafu {
                    path: path.display().to_string(),
                })?;
                let archive = zip::ZipArchive::new(file).context(OpeningArchiveSnafu {
                    path: path.display().to_string(),
                })?;
                Ok(Reader::Archive(path.clone(), archive))
            }
        }
    }
}

enum Reader {
    Dir(PathBuf),
    Archive(PathBuf, zip::ZipArchive<fs::File>),
}

impl Reader {
    fn read_to_string(&mut self, name: &str) -> CvrResult<String> {
        match self {
            Reader::Dir(dir) => {
                let p = dir.join(name);
                fs::read_to_string(&p).context(ReadingFileSnafu {
                    path: p.display().to_string(),
                })
            }
            Reader::Archive(path, archive) => {
                let mut entry = archive.by_name(name).context(OpeningArchiveSnafu {
                    path: path.display().to_string(),
                })?;
                let mut contents = String::new();
                entry
                    .read_to_string(&mut contents)
                    .context(ReadingFileSnafu { path: name })?;
                Ok(contents)
            }
        }
    }

    /// Names of the CVR record files in the export, sorted for reproducible
    /// card order.
    fn cvr_file_names(&mut self) -> CvrResult<Vec<String>> {
        let mut names: Vec<String> = match self {
            Reader::Dir(dir) => {
                let entries = fs::read_dir(&*dir).context(ReadingFileSnafu {
                    path: dir.display().to_string(),
                })?;
                let mut names: Vec<String> = Vec::new();
                for entry in entries {
                    let entry = entry.context(ReadingFileSnafu {
                        path: dir.display().to_string(),
                    })?;
                    names.push(entry.file_name().to_string_lossy().to_string());
                }
                names
            }
            Reader::Archive(_, archive) => archive.file_names().map(String::from).collect(),
        };
        names.retain(|name| name.starts_with("CvrExport"));
        names.sort();
        Ok(names)
    }
}

fn parse_manifest<T: DeserializeOwned>(reader: &mut Reader, name: &str) -> CvrResult<Vec<T>> {
    let contents = reader.read_to_string(name)?;
    let manifest: Manifest<T> =
        serde_json::from_str(&contents).context(ParsingJsonSnafu { path: name })?;
    Ok(manifest.list)
}

pub fn read_export(path: &Path) -> CvrResult<RawExport> {
    let source = Source::new(path)?;
    let mut reader = source.open()?;

    info!("reading manifests from {}", path.display());
    let contests: Vec<RawContest> = parse_manifest(&mut reader, "ContestManifest.json")?;
    let candidates: Vec<RawCandidate> = parse_manifest(&mut reader, "CandidateManifest.json")?;
    let precinct_portions: Vec<RawPrecinctPortion> =
        parse_manifest(&mut reader, "PrecinctPortionManifest.json")?;

    let names = reader.cvr_file_names()?;
    info!("found {} CVR record files", names.len());
    let cvrs = read_cvr_files(&source, &names)?;

    Ok(RawExport {
        contests,
        candidates,
        precinct_portions,
        cvrs,
    })
}

fn read_cvr_files(source: &Source, names: &[String]) -> CvrResult<Vec<CvrExport>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let chunk_size = (names.len() + MAX_LOADER_THREADS - 1) / MAX_LOADER_THREADS;

    let results: Vec<CvrResult<Vec<CvrExport>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = names
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move || -> CvrResult<Vec<CvrExport>> {
                    // Each worker holds its own file or archive handle.
                    let mut reader = source.open()?;
                    let mut out: Vec<CvrExport> = Vec::with_capacity(chunk.len());
                    for name in chunk {
                        let contents = reader.read_to_string(name)?;
                        let export: CvrExport = serde_json::from_str(&contents)
                            .context(ParsingJsonSnafu { path: name.clone() })?;
                        debug!("{}: {} sessions", name, export.sessions.len());
                        out.push(export);
                    }
                    Ok(out)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(_) => whatever!("CVR loader thread panicked"),
            })
            .collect()
    });

    let mut cvrs: Vec<CvrExport> = Vec::with_capacity(names.len());
    for result in results {
        cvrs.extend(result?);
    }
    Ok(cvrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cvr_export_records() {
        let raw = r#"{
            "Sessions": [{
                "TabulatorId": 10,
                "BatchId": 3,
                "Original": {
                    "PrecinctPortionId": 42,
                    "IsCurrent": true,
                    "Cards": [{
                        "Id": 7,
                        "Contests": [{
                            "Id": 1,
                            "Undervotes": 0,
                            "Overvotes": 0,
                            "Marks": [
                                {"CandidateId": 5, "Rank": 1, "IsAmbiguous": false, "IsVote": true}
                            ]
                        }]
                    }]
                }
            }]
        }"#;
        let export: CvrExport = serde_json::from_str(raw).unwrap();
        assert_eq!(export.sessions.len(), 1);
        let record = export.sessions[0].record();
        assert_eq!(record.precinct_portion_id, 42);
        assert_eq!(record.cards[0].contests[0].marks[0].candidate_id, 5);
        assert!(record.cards[0].contests[0].marks[0].is_vote);
    }

    #[test]
    fn adjudicated_session_supersedes_original() {
        let raw = r#"{
            "Sessions": [{
                "Original": {
                    "PrecinctPortionId": 1,
                    "IsCurrent": false,
                    "Cards": []
                },
                "Modified": {
                    "PrecinctPortionId": 1,
                    "IsCurrent": true,
                    "Cards": [{"Id": 9, "Contests": []}]
                }
            }]
        }"#;
        let export: CvrExport = serde_json::from_str(raw).unwrap();
        let record = export.sessions[0].record();
        assert_eq!(record.cards.len(), 1);
        assert_eq!(record.cards[0].id, 9);
    }

    #[test]
    fn stale_adjudication_falls_back_to_original() {
        let raw = r#"{
            "Sessions": [{
                "Original": {
                    "PrecinctPortionId": 1,
                    "IsCurrent": true,
                    "Cards": [{"Id": 2, "Contests": []}]
                },
                "Modified": {
                    "PrecinctPortionId": 1,
                    "IsCurrent": false,
                    "Cards": []
                }
            }]
        }"#;
        let export: CvrExport = serde_json::from_str(raw).unwrap();
        let record = export.sessions[0].record();
        assert_eq!(record.cards[0].id, 2);
    }

    #[test]
    fn parses_manifest_lists() {
        let raw = r#"{
            "Version": "5.10.50.85",
            "List": [
                {"Description": "Mayor", "Id": 1, "VoteFor": 1, "NumOfRanks": 3},
                {"Description": "Measure Q", "Id": 2, "VoteFor": 1}
            ]
        }"#;
        let manifest: Manifest<RawContest> = serde_json::from_str(raw).unwrap();
        assert_eq!(manifest.list.len(), 2);
        assert_eq!(manifest.list[0].num_of_ranks, 3);
        assert_eq!(manifest.list[1].num_of_ranks, 0);
    }
}
