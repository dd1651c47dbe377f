mod args;
mod cvr;

use clap::Parser;
use log::LevelFilter;

fn main() {
    let args = args::Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    if let Err(e) = cvr::run(&args) {
        eprintln!("cvrtally: {}", e);
        std::process::exit(1);
    }
}
