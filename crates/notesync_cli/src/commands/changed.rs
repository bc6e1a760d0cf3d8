//! Changed command: dumps change records for debugging.

use super::{open_replica, CliResult, Format};
use notesync_protocol::ChangeRecord;
use std::path::Path;

/// Keeps at most `limit` records.
pub fn collect(records: Vec<ChangeRecord>, limit: Option<usize>) -> Vec<ChangeRecord> {
    match limit {
        Some(limit) => records.into_iter().take(limit).collect(),
        None => records,
    }
}

/// Runs the changed command.
pub fn run(path: &Path, after: u64, limit: Option<usize>, format: Format) -> CliResult<()> {
    let replica = open_replica(path)?;
    let records = collect(replica.changed(after), limit);

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        Format::Text => {
            for record in &records {
                println!(
                    "{:>8}  {:<16} {:<36} {:<32} {}",
                    record.id,
                    record.entity_type.as_str(),
                    record.entity_id,
                    record.source_id,
                    record.sync_date.to_rfc3339()
                );
            }
            println!("{} record(s) after {}", records.len(), after);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::replica_with_notes;

    #[test]
    fn records_after_id_with_limit() {
        let dir = tempfile::tempdir().unwrap();
        replica_with_notes(dir.path(), &["a", "b", "c", "d"]);
        let replica = open_replica(dir.path()).unwrap();

        let records = collect(replica.changed(1), Some(2));
        let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(collect(replica.changed(1), None).len(), 3);
    }
}
