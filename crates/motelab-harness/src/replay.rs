//! Offline log replay
//!
//! Feeds an exported simulator log (one `<time> <node> <text>` line per
//! event, see [`motelab_core::parse_log_line`]) through a run. Blank lines
//! and `#` comments are skipped; any other unparsable line is an error
//! carrying its line number.

use std::io::BufRead;

use tracing::{debug, info};

use motelab_core::parse_log_line;

use crate::error::{HarnessError, HarnessResult};
use crate::run::TestRun;
use crate::verdict::Verdict;

/// Replay every line from `reader`, then finish the run
pub fn replay<R: BufRead>(run: &mut TestRun, reader: R) -> HarnessResult<Verdict> {
    if !run.is_started() {
        run.start()?;
    }

    let mut fed = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if run.is_terminal() {
            debug!(line = index + 1, "run concluded, ignoring rest of log");
            break;
        }
        let event = parse_log_line(&line).map_err(|source| HarnessError::Replay {
            line: index + 1,
            source,
        })?;
        run.feed(event).map_err(|err| match err {
            HarnessError::Core(source) => HarnessError::Replay {
                line: index + 1,
                source,
            },
            other => other,
        })?;
        fed += 1;
    }

    info!(run = %run.name(), lines = fed, "log replayed");
    run.finish()
}
