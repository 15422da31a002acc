//! Pairwise file-overlap detection between enabled mods.
//!
//! Every enabled pair is intersected on `affected_files`, so the cost is
//! O(E²·F) for E enabled mods of F files each. Fine for hand-curated mod
//! lists; an inverted file index is the next step if that stops holding.

use crate::registry::ModRecord;
use std::collections::{BTreeMap, BTreeSet};

/// Folder name to that mod's `other display name -> representative file` map.
pub type ConflictMap = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDetail {
    pub other_folder: String,
    pub other_display_name: String,
    pub files: Vec<String>,
}

/// Clears and rebuilds the `conflicts` of every record.
pub fn recompute(records: &mut [ModRecord]) {
    for record in records.iter_mut() {
        record.conflicts.clear();
    }

    let enabled: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| record.enabled)
        .map(|(index, _)| index)
        .collect();

    let mut found: Vec<(usize, usize, String)> = Vec::new();
    for (pos, &left) in enabled.iter().enumerate() {
        for &right in &enabled[pos + 1..] {
            let shared = records[left]
                .metadata
                .affected_files
                .intersection(&records[right].metadata.affected_files)
                .next();
            if let Some(file) = shared {
                found.push((left, right, file.clone()));
            }
        }
    }

    for (left, right, file) in found {
        let left_name = records[left].metadata.display_name.clone();
        let right_name = records[right].metadata.display_name.clone();
        record_conflict(&mut records[left].conflicts, right_name, &file);
        record_conflict(&mut records[right].conflicts, left_name, &file);
    }
}

fn record_conflict(conflicts: &mut BTreeMap<String, String>, other: String, file: &str) {
    match conflicts.get_mut(&other) {
        Some(existing) if existing.as_str() <= file => {}
        Some(existing) => *existing = file.to_string(),
        None => {
            conflicts.insert(other, file.to_string());
        }
    }
}

pub fn has_conflicts(record: &ModRecord) -> bool {
    record.enabled && !record.conflicts.is_empty()
}

pub fn conflict_map(records: &[ModRecord]) -> ConflictMap {
    records
        .iter()
        .filter(|record| !record.conflicts.is_empty())
        .map(|record| (record.folder_name.clone(), record.conflicts.clone()))
        .collect()
}

/// Every file `folder` shares with each other enabled mod.
///
/// The subject itself may be disabled; the result then previews what
/// enabling it would cause. Returns `None` for an unknown folder.
pub fn report(records: &[ModRecord], folder: &str) -> Option<Vec<ConflictDetail>> {
    let subject = records.iter().find(|record| record.folder_name == folder)?;
    let details = records
        .iter()
        .filter(|other| other.enabled && other.folder_name != subject.folder_name)
        .filter_map(|other| {
            let files: BTreeSet<&String> = subject
                .metadata
                .affected_files
                .intersection(&other.metadata.affected_files)
                .collect();
            if files.is_empty() {
                return None;
            }
            Some(ConflictDetail {
                other_folder: other.folder_name.clone(),
                other_display_name: other.metadata.display_name.clone(),
                files: files.into_iter().cloned().collect(),
            })
        })
        .collect();
    Some(details)
}
