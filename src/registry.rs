use crate::{
    conflicts::{self, ConflictMap},
    error::{ModError, Result},
    fsops,
    logging::Logger,
    manifest::{self, Metadata},
};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

/// One installed mod in storage, keyed by its folder name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModRecord {
    pub folder_name: String,
    pub location: PathBuf,
    pub metadata: Metadata,
    pub enabled: bool,
    /// Other mod's display name to one file both touch. Derived state.
    pub conflicts: BTreeMap<String, String>,
}

impl ModRecord {
    pub fn has_conflicts(&self) -> bool {
        conflicts::has_conflicts(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Name,
    Id,
    Version,
    AffectsSaves,
    HasConflicts,
    Author,
}

impl SortColumn {
    pub fn label(self) -> &'static str {
        match self {
            SortColumn::Name => "Name",
            SortColumn::Id => "Mod ID",
            SortColumn::Version => "Version",
            SortColumn::AffectsSaves => "Affects Saves",
            SortColumn::HasConflicts => "Has Conflicts",
            SortColumn::Author => "Author",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Owned view of the storage directory.
#[derive(Debug)]
pub struct Registry {
    storage_root: PathBuf,
    records: Vec<ModRecord>,
}

impl Registry {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            records: Vec::new(),
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Rebuilds the record list from storage.
    ///
    /// A folder whose manifest fails to parse is logged and left out; the
    /// rest of the scan carries on. Enabled flags survive for folders that
    /// were already known.
    pub fn rescan(&mut self, logger: &Logger) -> Result<()> {
        if !self.storage_root.is_dir() {
            logger.warn(format!(
                "Mod storage directory not found: {}",
                self.storage_root.display()
            ));
            self.records.clear();
            return Ok(());
        }

        let previous: HashMap<String, bool> = self
            .records
            .iter()
            .map(|record| (record.folder_name.clone(), record.enabled))
            .collect();

        let entries = fs::read_dir(&self.storage_root).map_err(|err| ModError::Environment {
            message: "unable to list mod storage".to_string(),
            path: self.storage_root.clone(),
            source: Some(err),
        })?;

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let folder_name = entry.file_name().to_string_lossy().to_string();
            if fsops::is_hidden_name(&folder_name) {
                continue;
            }
            let location = entry.path();
            match manifest::parse(&location) {
                Ok(metadata) => {
                    let enabled = previous.get(&folder_name).copied().unwrap_or(true);
                    records.push(ModRecord {
                        folder_name,
                        location,
                        metadata,
                        enabled,
                        conflicts: BTreeMap::new(),
                    });
                }
                Err(err) => logger.error(format!("Skipping {folder_name}: {err}")),
            }
        }

        records.sort_by(|a, b| compare_folder(&a.folder_name, &b.folder_name));
        self.records = records;
        conflicts::recompute(&mut self.records);
        logger.info(format!("Loaded {} mods", self.records.len()));
        Ok(())
    }

    pub fn get(&self, folder: &str) -> Option<&ModRecord> {
        self.records.iter().find(|record| record.folder_name == folder)
    }

    pub fn records(&self) -> &[ModRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn enabled_records(&self) -> Vec<&ModRecord> {
        self.records.iter().filter(|record| record.enabled).collect()
    }

    pub fn enabled_map(&self) -> BTreeMap<String, bool> {
        self.records
            .iter()
            .map(|record| (record.folder_name.clone(), record.enabled))
            .collect()
    }

    /// `(total, enabled)`.
    pub fn counts(&self) -> (usize, usize) {
        let enabled = self.records.iter().filter(|record| record.enabled).count();
        (self.records.len(), enabled)
    }

    pub fn conflict_map(&self) -> ConflictMap {
        conflicts::conflict_map(&self.records)
    }

    pub fn set_enabled(&mut self, folder: &str, enabled: bool) -> Result<()> {
        let record = self
            .records
            .iter_mut()
            .find(|record| record.folder_name == folder)
            .ok_or_else(|| ModError::NotFound(folder.to_string()))?;
        record.enabled = enabled;
        conflicts::recompute(&mut self.records);
        Ok(())
    }

    pub fn set_all_enabled(&mut self, enabled: bool) {
        for record in &mut self.records {
            record.enabled = enabled;
        }
        conflicts::recompute(&mut self.records);
    }

    /// Applies the flags for folders present in both; returns how many matched.
    pub fn apply_profile(&mut self, flags: &BTreeMap<String, bool>) -> usize {
        let mut applied = 0usize;
        for record in &mut self.records {
            if let Some(enabled) = flags.get(&record.folder_name) {
                record.enabled = *enabled;
                applied += 1;
            }
        }
        conflicts::recompute(&mut self.records);
        applied
    }

    /// Deletes the folder from storage. The game mod directory is untouched.
    pub fn uninstall(&mut self, folder: &str) -> Result<ModRecord> {
        let index = self
            .records
            .iter()
            .position(|record| record.folder_name == folder)
            .ok_or_else(|| ModError::NotFound(folder.to_string()))?;
        let location = self.records[index].location.clone();
        if location.exists() {
            fs::remove_dir_all(&location).map_err(|err| ModError::Environment {
                message: format!("unable to remove mod folder {folder}"),
                path: location.clone(),
                source: Some(err),
            })?;
        }
        let removed = self.records.remove(index);
        conflicts::recompute(&mut self.records);
        Ok(removed)
    }

    /// Presentation re-sort; folder name breaks ties.
    pub fn sort_by(&mut self, column: SortColumn, direction: SortDirection) {
        self.records.sort_by(|a, b| {
            let ordering = compare_column(a, b, column);
            let ordering = match direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            ordering.then_with(|| compare_folder(&a.folder_name, &b.folder_name))
        });
    }
}

fn compare_column(a: &ModRecord, b: &ModRecord, column: SortColumn) -> Ordering {
    match column {
        SortColumn::Name => compare_text(&a.metadata.display_name, &b.metadata.display_name),
        SortColumn::Id => compare_text(&a.metadata.id, &b.metadata.id),
        SortColumn::Version => compare_text(&a.metadata.version, &b.metadata.version),
        SortColumn::AffectsSaves => a
            .metadata
            .affects_saved_games
            .cmp(&b.metadata.affects_saved_games),
        SortColumn::HasConflicts => a.has_conflicts().cmp(&b.has_conflicts()),
        SortColumn::Author => compare_text(&a.metadata.authors, &b.metadata.authors),
    }
}

fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

fn compare_folder(a: &str, b: &str) -> Ordering {
    compare_text(a, b).then_with(|| a.cmp(b))
}
