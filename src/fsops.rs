use filetime::{set_file_mtime, FileTime};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use walkdir::WalkDir;

/// Removes `path` on drop.
pub(crate) struct StagingGuard {
    path: PathBuf,
}

impl StagingGuard {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Creates a fresh, uniquely named directory under `parent`.
pub(crate) fn make_temp_dir(parent: &Path, prefix: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(parent)?;
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = parent.join(format!("{prefix}-{nanos}-{counter}"));
    fs::create_dir(&dir)?;
    Ok(dir)
}

/// Archive junk and VCS folders that never belong to a mod.
pub(crate) fn is_ignored_path(path: &Path) -> bool {
    path.components().any(|component| {
        let part = component.as_os_str().to_string_lossy();
        part.eq_ignore_ascii_case("__MACOSX")
            || part.eq_ignore_ascii_case(".ds_store")
            || part.eq_ignore_ascii_case("thumbs.db")
            || part == ".git"
            || part == ".svn"
    })
}

pub(crate) fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

/// Recursive copy of `source` into `dest`, keeping file mtimes.
pub(crate) fn copy_dir(source: &Path, dest: &Path) -> io::Result<usize> {
    let mut copied = 0usize;
    fs::create_dir_all(dest)?;
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            preserve_mtime(entry.path(), &target);
            copied += 1;
        }
    }
    Ok(copied)
}

/// Deletes every entry inside `dir`, leaving `dir` itself in place.
pub(crate) fn clear_dir(dir: &Path) -> io::Result<usize> {
    let mut removed = 0usize;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}

fn preserve_mtime(source: &Path, dest: &Path) {
    let Ok(meta) = fs::metadata(source) else {
        return;
    };
    let mtime = FileTime::from_last_modification_time(&meta);
    let _ = set_file_mtime(dest, mtime);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn staging_guard_removes_dir_on_drop() {
        let dir = TempDir::new().unwrap();
        let doomed = make_temp_dir(dir.path(), "extract").unwrap();
        let other = make_temp_dir(dir.path(), "extract").unwrap();
        assert_ne!(doomed, other);
        fs::write(doomed.join("partial.xml"), "x").unwrap();
        {
            let guard = StagingGuard::new(doomed.clone());
            assert_eq!(guard.path(), doomed.as_path());
        }
        assert!(!doomed.exists());
        assert!(other.exists());
    }

    #[test]
    fn copy_dir_is_recursive_and_keeps_mtime() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src");
        fs::create_dir_all(source.join("ui/deep")).unwrap();
        fs::write(source.join("mod.modinfo"), "<Mod/>").unwrap();
        fs::write(source.join("ui/deep/panel.js"), "js").unwrap();
        let old = FileTime::from_unix_time(1_600_000_000, 0);
        set_file_mtime(source.join("mod.modinfo"), old).unwrap();

        let dest = dir.path().join("dest");
        assert_eq!(copy_dir(&source, &dest).unwrap(), 2);
        assert_eq!(fs::read_to_string(dest.join("ui/deep/panel.js")).unwrap(), "js");
        let meta = fs::metadata(dest.join("mod.modinfo")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), old);
    }

    #[test]
    fn clear_dir_removes_files_and_dirs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("loose.txt"), "x").unwrap();
        assert_eq!(clear_dir(dir.path()).unwrap(), 2);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn ignored_paths() {
        assert!(is_ignored_path(Path::new("x/__MACOSX/y")));
        assert!(is_ignored_path(Path::new("x/.git/config")));
        assert!(!is_ignored_path(Path::new("x/ui/panel.js")));
        assert!(is_hidden_name(".staging"));
        assert!(!is_hidden_name("mod_a"));
    }
}
