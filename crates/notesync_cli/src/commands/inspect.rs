//! Inspect command implementation.

use super::{open_replica, CliResult, Format};
use notesync_engine::Replica;
use notesync_protocol::EntityType;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Replica inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Replica path.
    pub path: String,
    /// Replica identity.
    pub source_id: String,
    /// Rows per synced table.
    pub rows: BTreeMap<EntityType, usize>,
    /// Number of change records.
    pub change_count: usize,
    /// Highest change id.
    pub max_sync_id: u64,
    /// Last peer change id pulled.
    pub last_synced_pull: u64,
    /// Last local change id pushed.
    pub last_synced_push: u64,
    /// Content hashes (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<BTreeMap<EntityType, String>>,
}

/// Collects the inspection result for an open replica.
pub fn inspect(path: &Path, replica: &Replica, with_hashes: bool) -> CliResult<InspectResult> {
    let rows: BTreeMap<EntityType, usize> = replica.store().read(|tables| {
        EntityType::HASHED
            .iter()
            .map(|t| (*t, tables.entity_ids(*t).len()))
            .collect()
    });
    let watermark = replica.watermark();

    Ok(InspectResult {
        path: path.display().to_string(),
        source_id: replica.source_id().to_string(),
        rows,
        change_count: replica.change_log().len(),
        max_sync_id: replica.change_log().max_id(),
        last_synced_pull: watermark.last_synced_pull,
        last_synced_push: watermark.last_synced_push,
        hashes: if with_hashes {
            Some(replica.hashes()?)
        } else {
            None
        },
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, with_hashes: bool, format: Format) -> CliResult<()> {
    let replica = open_replica(path)?;
    let result = inspect(path, &replica, with_hashes)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("NoteSync Replica Inspection");
    println!("===========================");
    println!();
    println!("Path:      {}", result.path);
    println!("Source id: {}", result.source_id);
    println!();
    println!("Tables:");
    for (entity_type, count) in &result.rows {
        println!("  {:<14} {}", entity_type.as_str(), count);
    }
    println!();
    println!("Change log:");
    println!("  Records:     {}", result.change_count);
    println!("  Max sync id: {}", result.max_sync_id);
    println!();
    println!("Watermark:");
    println!("  Last pulled: {}", result.last_synced_pull);
    println!("  Last pushed: {}", result.last_synced_push);

    if let Some(hashes) = &result.hashes {
        println!();
        println!("Content hashes:");
        for (entity_type, hash) in hashes {
            println!("  {:<14} {}", entity_type.as_str(), hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::replica_with_notes;

    #[test]
    fn counts_rows_and_records() {
        let dir = tempfile::tempdir().unwrap();
        replica_with_notes(dir.path(), &["1", "2", "3"]);
        let replica = open_replica(dir.path()).unwrap();

        let result = inspect(dir.path(), &replica, true).unwrap();
        assert_eq!(result.rows[&EntityType::Note], 3);
        assert_eq!(result.change_count, 3);
        assert_eq!(result.max_sync_id, 3);
        assert_eq!(result.last_synced_pull, 0);
        assert_eq!(result.hashes.unwrap().len(), EntityType::HASHED.len());
    }
}
