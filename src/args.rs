use clap::Parser;

/// Tabulates contests from a Dominion cast-vote-record export.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (directory or zip archive) The CVR export to analyze: the manifest
    /// files plus the CvrExport record files.
    #[clap(value_parser)]
    pub export: String,

    /// Contest ids to tabulate. Ranked contests get the full ranked-choice
    /// treatment, everything else a plain tally. With no ids, the available
    /// contests are listed.
    #[clap(value_parser)]
    pub contests: Vec<u32>,

    /// (directory) Where the CSV/HTML reports are written. Defaults to the
    /// export directory, or the archive's parent directory.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// Also report the ballot count per precinct portion.
    #[clap(long, takes_value = false)]
    pub precincts: bool,

    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
