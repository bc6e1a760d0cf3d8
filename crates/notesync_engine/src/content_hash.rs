//! Content hash index.
//!
//! One digest per hashed collection, computed from the table contents only.
//! Two replicas whose tables hold the same rows produce the same digests no
//! matter in which order the rows were written or how their change logs look.

use crate::error::SyncResult;
use notesync_protocol::{EntityType, ProtocolError};
use notesync_store::Tables;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Computes the digest of every hashed collection.
///
/// Options contribute only when their name is in `synced_options`; local
/// options (watermarks, the replica id) differ between replicas by nature.
pub fn current_hashes(
    tables: &Tables,
    synced_options: &BTreeSet<String>,
) -> SyncResult<BTreeMap<EntityType, String>> {
    let mut hashes = BTreeMap::new();
    for entity_type in EntityType::HASHED {
        let digest = match entity_type {
            EntityType::Note => digest_rows(tables.notes.iter())?,
            EntityType::NoteTree => digest_rows(tables.notes_tree.iter())?,
            EntityType::NoteHistory => digest_rows(tables.notes_history.iter())?,
            EntityType::Option => digest_rows(
                tables
                    .options
                    .iter()
                    .filter(|(name, _)| synced_options.contains(name.as_str())),
            )?,
            EntityType::RecentNote => digest_rows(tables.recent_notes.iter())?,
            EntityType::NoteReordering => continue,
        };
        hashes.insert(entity_type, digest);
    }
    Ok(hashes)
}

/// Hashes `(key, row)` pairs in the iterator's order (key order for a
/// `BTreeMap`).
fn digest_rows<'a, T, I>(rows: I) -> SyncResult<String>
where
    T: Serialize + 'a,
    I: Iterator<Item = (&'a String, &'a T)>,
{
    let mut hasher = Sha256::new();
    for (key, row) in rows {
        let encoded = serde_json::to_vec(row).map_err(ProtocolError::from)?;
        hasher.update((key.len() as u64).to_le_bytes());
        hasher.update(key.as_bytes());
        hasher.update((encoded.len() as u64).to_le_bytes());
        hasher.update(&encoded);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SYNCED_OPTIONS;
    use chrono::{TimeZone, Utc};
    use notesync_protocol::{Entity, Note};
    use proptest::prelude::*;

    fn allow_list() -> BTreeSet<String> {
        DEFAULT_SYNCED_OPTIONS.iter().map(|s| s.to_string()).collect()
    }

    fn note(id: &str, title: &str) -> Note {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Note {
            note_id: id.into(),
            note_title: title.into(),
            note_text: String::new(),
            is_protected: false,
            is_deleted: false,
            date_created: at,
            date_modified: at,
        }
    }

    #[test]
    fn every_hashed_type_present() {
        let hashes = current_hashes(&Tables::default(), &allow_list()).unwrap();
        assert_eq!(hashes.len(), EntityType::HASHED.len());
        assert!(!hashes.contains_key(&EntityType::NoteReordering));
        assert_eq!(hashes[&EntityType::Note].len(), 64);
    }

    #[test]
    fn empty_table_digest_is_lowercase_hex() {
        let hashes = current_hashes(&Tables::default(), &allow_list()).unwrap();
        assert_eq!(
            hashes[&EntityType::NoteHistory],
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn content_changes_digest() {
        let mut a = Tables::default();
        a.upsert(Entity::Note(note("n1", "one")));
        let mut b = a.clone();
        b.upsert(Entity::Note(note("n1", "uno")));

        let ha = current_hashes(&a, &allow_list()).unwrap();
        let hb = current_hashes(&b, &allow_list()).unwrap();
        assert_ne!(ha[&EntityType::Note], hb[&EntityType::Note]);
        assert_eq!(ha[&EntityType::NoteTree], hb[&EntityType::NoteTree]);
    }

    #[test]
    fn local_options_do_not_contribute() {
        let at = Utc::now();
        let mut a = Tables::default();
        a.set_option("username", "alice", at);
        let mut b = a.clone();

        a.set_option("last_synced_pull", "10", at);
        b.set_option("last_synced_pull", "99", at);
        b.set_option("source_id", "other", at);

        let ha = current_hashes(&a, &allow_list()).unwrap();
        let hb = current_hashes(&b, &allow_list()).unwrap();
        assert_eq!(ha, hb);
    }

    #[test]
    fn change_log_does_not_contribute() {
        let mut a = Tables::default();
        a.upsert(Entity::Note(note("n1", "one")));
        let mut b = a.clone();
        crate::change_log::append_in(
            &mut b,
            EntityType::Note,
            "n1",
            &notesync_protocol::SourceId::new("x"),
            Utc::now(),
        );

        assert_eq!(
            current_hashes(&a, &allow_list()).unwrap(),
            current_hashes(&b, &allow_list()).unwrap()
        );
    }

    proptest! {
        #[test]
        fn insertion_order_independent(
            (rows, shuffled) in prop::collection::btree_map("[a-z]{1,6}", "[a-z ]{0,12}", 0..20)
                .prop_flat_map(|rows| {
                    let list: Vec<(String, String)> = rows.into_iter().collect();
                    (Just(list.clone()), Just(list).prop_shuffle())
                })
        ) {
            let mut a = Tables::default();
            for (id, title) in &rows {
                a.upsert(Entity::Note(note(id, title)));
            }
            let mut b = Tables::default();
            for (id, title) in &shuffled {
                b.upsert(Entity::Note(note(id, title)));
            }

            prop_assert_eq!(
                current_hashes(&a, &allow_list()).unwrap(),
                current_hashes(&b, &allow_list()).unwrap()
            );
        }
    }
}
