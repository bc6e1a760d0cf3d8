//! Check command: what a peer would see from `/check`.

use super::{open_replica, CliResult, Format};
use std::path::Path;

/// Runs the check command.
pub fn run(path: &Path, format: Format) -> CliResult<()> {
    let replica = open_replica(path)?;
    let check = replica.check()?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&check)?),
        Format::Text => {
            println!("Source id:   {}", check.source_id);
            println!("Max sync id: {}", check.max_sync_id);
            for (entity_type, hash) in &check.hashes {
                println!("  {:<14} {}", entity_type.as_str(), hash);
            }
        }
    }
    Ok(())
}
