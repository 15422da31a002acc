use crate::error::{ModError, Result};
use std::{
    collections::{BTreeMap, BTreeSet},
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

const PROFILE_EXTENSION: &str = "json";
const FORBIDDEN_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Named snapshots of enabled flags, one JSON file each.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{PROFILE_EXTENSION}"))
    }

    /// Writes the whole profile, replacing any previous one of that name.
    pub fn save(&self, name: &str, flags: &BTreeMap<String, bool>) -> Result<PathBuf> {
        validate_name(name)?;
        fs::create_dir_all(&self.root)
            .map_err(|err| ModError::profile_source(name, "create profiles dir", err))?;
        let raw = serde_json::to_string_pretty(flags)
            .map_err(|err| ModError::profile_source(name, "serialize profile", err))?;
        let path = self.path_for(name);
        write_atomic(&path, &raw)
            .map_err(|err| ModError::profile_source(name, "write profile", err))?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<BTreeMap<String, bool>> {
        validate_name(name)?;
        let path = self.path_for(name);
        let raw = fs::read_to_string(&path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                ModError::profile(name, "profile does not exist")
            } else {
                ModError::profile_source(name, "read profile", err)
            }
        })?;
        serde_json::from_str(&raw)
            .map_err(|err| ModError::profile_source(name, "profile is not a valid flag map", err))
    }

    /// Profile names on disk. A missing directory means no profiles.
    pub fn list(&self) -> Result<BTreeSet<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(err) => return Err(ModError::profile_source("*", "list profiles", err)),
        };
        let mut names = BTreeSet::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_profile = path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case(PROFILE_EXTENSION))
                    .unwrap_or(false);
            if !is_profile {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.insert(stem.to_string());
            }
        }
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        fs::remove_file(self.path_for(name)).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                ModError::profile(name, "profile does not exist")
            } else {
                ModError::profile_source(name, "delete profile", err)
            }
        })
    }
}

/// Rejects names that cannot be used as a single file name on any platform.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ModError::profile(name, "profile name is empty"));
    }
    if name.trim() != name {
        return Err(ModError::profile(
            name,
            "profile name has leading or trailing whitespace",
        ));
    }
    if name == "." || name == ".." {
        return Err(ModError::profile(name, "profile name is reserved"));
    }
    if let Some(bad) = name
        .chars()
        .find(|ch| FORBIDDEN_CHARS.contains(ch) || ch.is_control())
    {
        return Err(ModError::profile(
            name,
            format!("profile name contains forbidden character {bad:?}"),
        ));
    }
    Ok(())
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "profile path has no parent"))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "profile path has no name"))?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut temp_name = OsString::from(".");
    temp_name.push(file_name);
    temp_name.push(format!(".{stamp}.tmp"));
    let temp_path = parent.join(temp_name);
    fs::write(&temp_path, contents)?;
    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }
    Ok(())
}
