#[macro_use]
extern crate log;

mod error;
mod extract;
mod format;
mod manifest;
mod parser;
#[cfg(test)]
mod testutil;
mod util;

use clap::{arg, command, value_parser, ArgMatches, Command};
use extract::{Options, Overwrite};
use log::LevelFilter;
use parser::DirectoryBoundary;
use simple_logger::SimpleLogger;
use std::{path::PathBuf, process::ExitCode};

fn parse_log_level(matches: &ArgMatches) -> LevelFilter {
    let log_level = matches
        .get_one::<String>("log_level")
        .map(String::as_str)
        .unwrap_or("WARN");

    match log_level {
        "NONE" | "none" => LevelFilter::Off,
        "TRACE" | "trace" => LevelFilter::Trace,
        "DEBUG" | "debug" => LevelFilter::Debug,
        "INFO" | "info" => LevelFilter::Info,
        "WARN" | "warn" => LevelFilter::Warn,
        "ERROR" | "error" => LevelFilter::Error,
        _ => LevelFilter::Warn,
    }
}

fn parse_options(matches: &ArgMatches) -> Options {
    let overwrite = match (
        matches.get_flag("no_overwrite"),
        matches.get_flag("silent"),
    ) {
        (false, _) => Overwrite::Always,
        (true, false) => Overwrite::Ask,
        (true, true) => Overwrite::Never,
    };
    let boundary = if matches.get_flag("include_boundary_entry") {
        DirectoryBoundary::Inclusive
    } else {
        DirectoryBoundary::Exclusive
    };

    let mut options = Options {
        overwrite,
        boundary,
        print_header: matches.get_flag("print_header"),
        write_manifest: matches.get_flag("manifest"),
        ..Options::default()
    };
    if let Some(out_dir) = matches.get_one::<PathBuf>("out_dir") {
        options.out_dir = out_dir.clone();
    }

    options
}

fn cli() -> Command {
    command!()
        .arg(
            arg!(in_file: <FIRMWARE>)
                .value_parser(value_parser!(PathBuf))
                .help("Path to the rkosftab firmware image to be extracted."),
        )
        .arg(
            arg!(out_dir: -o --out_dir <DIR>)
                .value_parser(value_parser!(PathBuf))
                .default_value("extracted")
                .help("Directory the ticket and the segments are written to."),
        )
        .arg(arg!(print_header: -H --print_header).help(
            "Prints fields of the firmware header after it has been validated (most of them are \
                unknown and ignored).",
        ))
        .arg(
            arg!(log_level: -l --log_level <LEVEL>)
                .default_value("WARN")
                .help(
                    "Configures the log level for the tool. Available log levels are: NONE \
                    (disables logging entirely), TRACE, DEBUG, INFO, WARN and ERROR.",
                ),
        )
        .arg(arg!(no_overwrite: -n --no_overwrite).help(
            "Ask before overwriting files that already exist in the output directory instead of \
                overwriting them.",
        ))
        .arg(
            arg!(silent: -s --silent)
                .help("Together with --no_overwrite, fail on existing files without asking."),
        )
        .arg(
            arg!(manifest: -m --manifest)
                .help("Also write a manifest.toml describing the extracted files."),
        )
        .arg(arg!(include_boundary_entry: --include_boundary_entry).help(
            "Also read the tag directory entry located exactly at the end of the directory.",
        ))
}

/// Exit status for a command line that couldn't be parsed. Usage errors exit with 1, help and
/// version output with 0.
fn usage_status(error: &clap::Error) -> u8 {
    if error.use_stderr() {
        1
    } else {
        0
    }
}

fn main() -> ExitCode {
    let matches = match cli().try_get_matches() {
        Ok(matches) => matches,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(usage_status(&e));
        }
    };

    if let Err(e) = SimpleLogger::new()
        .with_level(parse_log_level(&matches))
        .init()
    {
        eprintln!("Couldn't initialize logging: {}", e);
    }

    let Some(in_file) = matches.get_one::<PathBuf>("in_file") else {
        error!("No firmware image was specified.");
        return ExitCode::FAILURE;
    };
    let options = parse_options(&matches);

    match extract::run(in_file, &options) {
        Ok(summary) => {
            info!(
                "Done, extracted {} segments{} ({} bytes).",
                summary.segments,
                if summary.ticket_len.is_some() {
                    " and the ticket"
                } else {
                    ""
                },
                summary.bytes
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
