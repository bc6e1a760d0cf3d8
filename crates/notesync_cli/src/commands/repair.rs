//! Fill-sync-rows command: reconciles the change log with the tables.

use super::{open_replica, CliResult};
use std::path::Path;

/// Runs the repair pass and prints what it changed.
pub fn run(path: &Path) -> CliResult<()> {
    let replica = open_replica(path)?;
    let report = replica.repair()?;

    if report.is_clean() {
        println!("Change log is consistent, nothing to repair.");
    } else {
        println!("Removed {} stale record(s).", report.removed);
        println!("Created {} missing record(s).", report.created);
    }
    Ok(())
}
