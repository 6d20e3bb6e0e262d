use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;

use drawly::cli::{self, CliArgs};
use drawly::settings::EngineSettings;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    drawly::logger::init(level, args.verbose);

    let settings = EngineSettings::load();
    log::info!("Drawly {} starting ({} input pattern(s))", env!("CARGO_PKG_VERSION"), args.input.len());
    cli::run(args, &settings)
}
