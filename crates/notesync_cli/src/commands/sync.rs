//! Sync and force-full-sync commands.
//!
//! The remote replica is another directory on this machine, served in-process
//! through the same endpoints a networked peer would expose.

use super::{open_replica, CliResult, Format};
use notesync_engine::{HttpTransport, LoopbackClient, SyncCycleResult, SyncEngine};
use notesync_server::{ServerConfig, SyncServer, DEFAULT_BASE_PATH};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Runs one cycle of the replica at `path` against the one at `remote`.
pub fn sync_dirs(
    path: &Path,
    remote: &Path,
    force_full: bool,
    retry: bool,
) -> CliResult<SyncCycleResult> {
    let local = open_replica(path)?;
    let peer = open_replica(remote)?;
    let server = Arc::new(SyncServer::new(ServerConfig::default(), peer));
    let engine = SyncEngine::new(
        local,
        HttpTransport::new(DEFAULT_BASE_PATH, LoopbackClient::new(server)),
    );

    let result = if force_full {
        engine.sync_full()?
    } else if retry {
        engine.sync_with_retry()?
    } else {
        engine.sync()?
    };
    Ok(result)
}

/// Runs the sync command.
pub fn run(path: &Path, remote: &Path, retry: bool, format: Format) -> CliResult<()> {
    let result = sync_dirs(path, remote, false, retry)?;
    print_result(&result, format)
}

/// Runs the force-full-sync command.
///
/// Without a remote only the watermarks are reset; the next sync then
/// exchanges both full change logs.
pub fn run_force_full(path: &Path, remote: Option<&Path>, format: Format) -> CliResult<()> {
    match remote {
        Some(remote) => {
            let result = sync_dirs(path, remote, true, false)?;
            print_result(&result, format)
        }
        None => {
            open_replica(path)?.reset_watermark()?;
            info!(path = %path.display(), "sync watermarks reset");
            println!("Watermarks reset; the next sync exchanges the full change logs.");
            Ok(())
        }
    }
}

fn print_result(result: &SyncCycleResult, format: Format) -> CliResult<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(result)?),
        Format::Text => {
            println!("Outcome:  {:?}", result.outcome);
            println!("Pulled:   {}", result.pulled);
            println!("Pushed:   {}", result.pushed);
            println!("Skipped:  {}", result.skipped);
            println!("Rejected: {}", result.rejected);
            println!(
                "Watermark: pull {} / push {}",
                result.watermark.last_synced_pull, result.watermark.last_synced_push
            );
            println!("Duration: {} ms", result.duration.as_millis());
        }
    }
    Ok(())
}
