//! Replay a recorded simulator log against a TOML run config.
//!
//! Usage: `motelab-replay <config.toml> [log-file]`
//!
//! Reads the log from stdin when no file is given, prints the verdict as
//! JSON and exits with the verdict's status code (4 on harness errors).

use std::fs::File;
use std::io::{self, BufReader};
use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use motelab_harness::{replay, HarnessResult, RunConfig, TestRun, Verdict};

const USAGE: &str = "usage: motelab-replay <config.toml> [log-file]";
const HARNESS_ERROR_EXIT: u8 = 4;

fn run(config_path: &str, log_path: Option<&str>) -> HarnessResult<Verdict> {
    let mut config = RunConfig::load_from_file(config_path)?;
    config.apply_env()?;
    let mut run = TestRun::from_config(&config)?;

    match log_path {
        Some(path) => replay(&mut run, BufReader::new(File::open(path)?)),
        None => replay(&mut run, io::stdin().lock()),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config_path, log_path) = match args.as_slice() {
        [config] => (config.as_str(), None),
        [config, log] => (config.as_str(), Some(log.as_str())),
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::from(HARNESS_ERROR_EXIT);
        }
    };

    let verdict = match run(config_path, log_path) {
        Ok(verdict) => verdict,
        Err(err) => {
            error!(%err, "replay failed");
            return ExitCode::from(HARNESS_ERROR_EXIT);
        }
    };

    match verdict.to_json() {
        Ok(json) => println!("{json}"),
        Err(err) => error!(%err, "could not serialize verdict"),
    }
    ExitCode::from(verdict.status.exit_code() as u8)
}
