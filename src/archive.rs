use crate::{
    error::{ModError, Result},
    fsops::{self, StagingGuard},
    game,
    logging::Logger,
    progress::{Progress, UnitCounter},
};
use std::{
    env,
    ffi::OsStr,
    fmt, fs,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use walkdir::WalkDir;

const STAGING_DIR: &str = ".staging";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    Zip,
    SevenZip,
    Rar,
    SplitRar,
}

impl ArchiveKind {
    /// Classifies by extension, falling back to the file signature.
    pub fn classify(path: &Path) -> Option<Self> {
        Self::from_extension(path).or_else(|| Self::from_signature(path))
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "zip" => Some(ArchiveKind::Zip),
            "7z" => Some(ArchiveKind::SevenZip),
            "rar" if volume_number(path).is_some() => Some(ArchiveKind::SplitRar),
            "rar" => Some(ArchiveKind::Rar),
            _ if is_numbered_rar_volume(&ext) => Some(ArchiveKind::SplitRar),
            _ => None,
        }
    }

    pub fn from_signature(path: &Path) -> Option<Self> {
        let mut header = [0u8; 8];
        let mut file = fs::File::open(path).ok()?;
        let read = file.read(&mut header).ok()?;
        let header = &header[..read];
        if header.starts_with(b"PK\x03\x04") {
            Some(ArchiveKind::Zip)
        } else if header.starts_with(b"7z\xBC\xAF\x27\x1C") {
            Some(ArchiveKind::SevenZip)
        } else if header.starts_with(b"Rar!\x1A\x07") {
            Some(ArchiveKind::Rar)
        } else {
            None
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::SevenZip => "7z",
            ArchiveKind::Rar => "rar",
            ArchiveKind::SplitRar => "split rar",
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Zip and 7z are built in; rar needs `unrar` or `7z` on `PATH`.
pub fn is_supported(kind: ArchiveKind) -> bool {
    match kind {
        ArchiveKind::Zip | ArchiveKind::SevenZip => true,
        ArchiveKind::Rar | ArchiveKind::SplitRar => find_rar_tool().is_some(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RarTool {
    Unrar(PathBuf),
    SevenZip(PathBuf),
}

fn find_rar_tool() -> Option<RarTool> {
    let path_var = env::var_os("PATH")?;
    let dirs: Vec<PathBuf> = env::split_paths(&path_var).collect();
    let lookup = |names: &[&str]| {
        dirs.iter()
            .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
            .find(|candidate| candidate.is_file())
    };
    if let Some(path) = lookup(&["unrar", "unrar.exe", "UnRAR.exe"]) {
        return Some(RarTool::Unrar(path));
    }
    lookup(&["7z", "7z.exe", "7zz"]).map(RarTool::SevenZip)
}

/// Unpacks `archive` and moves the mod folder it holds into `storage_root`.
///
/// Extraction happens in `storage_root/.staging`; the staging directory is
/// removed on every exit path, so a failure never leaves a partial mod behind.
pub fn extract_mod_folder(archive: &Path, storage_root: &Path, progress: &Progress) -> Result<String> {
    let kind = ArchiveKind::classify(archive)
        .ok_or_else(|| ModError::extraction(archive, "unrecognised archive format"))?;
    if !is_supported(kind) {
        return Err(ModError::extraction(
            archive,
            format!("{kind} archives need unrar or 7z installed"),
        ));
    }

    let staging_root = storage_root.join(STAGING_DIR);
    let scratch = fsops::make_temp_dir(&staging_root, "extract")
        .map_err(|err| ModError::extraction_source(archive, "create staging dir", err))?;
    let guard = StagingGuard::new(scratch);

    let result = extract_into(kind, archive, guard.path(), progress)
        .and_then(|()| install_from_scratch(archive, guard.path(), storage_root));
    drop(guard);
    let _ = fs::remove_dir(&staging_root);
    result
}

fn extract_into(kind: ArchiveKind, archive: &Path, scratch: &Path, progress: &Progress) -> Result<()> {
    match kind {
        ArchiveKind::Zip => extract_zip(archive, scratch, progress),
        ArchiveKind::SevenZip => extract_7z(archive, scratch, progress),
        ArchiveKind::Rar | ArchiveKind::SplitRar => extract_rar(archive, scratch, progress),
    }
}

fn install_from_scratch(archive: &Path, scratch: &Path, storage_root: &Path) -> Result<String> {
    let manifest = locate_manifest(scratch).ok_or_else(|| {
        ModError::extraction(
            archive,
            "no .modinfo file found; the archive does not look like a mod",
        )
    })?;
    let manifest_dir = manifest.parent().unwrap_or(scratch);

    let (mod_root, folder_name) = if manifest_dir == scratch {
        let name = archive_base_name(archive)
            .ok_or_else(|| ModError::extraction(archive, "cannot derive a folder name"))?;
        (scratch.to_path_buf(), name)
    } else {
        let name = manifest_dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| ModError::extraction(archive, "cannot derive a folder name"))?;
        (manifest_dir.to_path_buf(), name)
    };

    if fsops::is_hidden_name(&folder_name) {
        return Err(ModError::extraction(
            archive,
            format!("mod folder name '{folder_name}' is not allowed"),
        ));
    }
    let dest = storage_root.join(&folder_name);
    if dest.exists() {
        return Err(ModError::extraction(
            archive,
            format!("a mod folder named '{folder_name}' is already installed"),
        ));
    }
    fs::rename(&mod_root, &dest)
        .map_err(|err| ModError::extraction_source(archive, "move mod into storage", err))?;
    Ok(folder_name)
}

/// Shallowest manifest under `root`, ties broken by path order.
fn locate_manifest(root: &Path) -> Option<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            !fsops::is_ignored_path(rel)
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && game::is_manifest_file(entry.path()))
        .map(|entry| (entry.depth(), entry.into_path()))
        .min()
        .map(|(_, path)| path)
}

fn archive_base_name(archive: &Path) -> Option<String> {
    let stem = match split_volume_stem(archive) {
        Some((base, _)) => base,
        None => archive.file_stem()?.to_str()?,
    };
    let trimmed = stem.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn extract_zip(archive: &Path, dest: &Path, progress: &Progress) -> Result<()> {
    let file = fs::File::open(archive)
        .map_err(|err| ModError::extraction_source(archive, "open zip", err))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|err| ModError::extraction_source(archive, "invalid or corrupt zip", err))?;

    let mut counter = UnitCounter::new(progress, zip.len());
    for index in 0..zip.len() {
        progress.checkpoint("extracting")?;
        let mut entry = zip
            .by_index(index)
            .map_err(|err| ModError::extraction_source(archive, "read zip entry", err))?;
        let Some(rel) = entry.enclosed_name() else {
            counter.bump();
            continue;
        };
        let out_path = dest.join(rel);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|err| ModError::extraction_source(archive, "create zip dir", err))?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| ModError::extraction_source(archive, "create zip dir", err))?;
            }
            let mut out_file = fs::File::create(&out_path)
                .map_err(|err| ModError::extraction_source(archive, "write zip entry", err))?;
            io::copy(&mut entry, &mut out_file)
                .map_err(|err| ModError::extraction_source(archive, "extract zip entry", err))?;
        }
        counter.bump();
    }
    Ok(())
}

fn extract_7z(archive: &Path, dest: &Path, progress: &Progress) -> Result<()> {
    let mut total = 0usize;
    sevenz_rust::decompress_file_with_extract_fn(archive, dest, |_, _, _| {
        total += 1;
        Ok(true)
    })
    .map_err(|err| ModError::extraction(archive, format!("invalid or corrupt 7z: {err}")))?;

    let mut counter = UnitCounter::new(progress, total);
    sevenz_rust::decompress_file_with_extract_fn(archive, dest, |entry, reader, path| {
        if progress.is_cancelled() {
            return Ok(false);
        }
        let keep_going = sevenz_rust::default_entry_extract_fn(entry, reader, path)?;
        counter.bump();
        Ok(keep_going)
    })
    .map_err(|err| ModError::extraction(archive, format!("extract 7z: {err}")))?;
    progress.checkpoint("extracting")
}

fn extract_rar(archive: &Path, dest: &Path, progress: &Progress) -> Result<()> {
    let tool = find_rar_tool()
        .ok_or_else(|| ModError::extraction(archive, "no unrar or 7z executable found"))?;
    progress.checkpoint("extracting")?;
    let first = first_volume(archive);

    let mut command = match &tool {
        RarTool::Unrar(bin) => {
            let mut command = Command::new(bin);
            command.arg("x").arg("-y").arg("-idq").arg(&first).arg(dest_arg(dest));
            command
        }
        RarTool::SevenZip(bin) => {
            let mut command = Command::new(bin);
            command
                .arg("x")
                .arg("-y")
                .arg(format!("-o{}", dest.display()))
                .arg(&first);
            command
        }
    };
    let output = command
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|err| ModError::extraction_source(archive, "launch rar extractor", err))?;

    // unrar exits with 1 for non-fatal warnings.
    let code = output.status.code();
    let acceptable = output.status.success() || (matches!(tool, RarTool::Unrar(_)) && code == Some(1));
    if !acceptable {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ModError::extraction(
            archive,
            format!("{}: {}", rar_failure_label(code), stderr.trim()),
        ));
    }
    progress.report(1, 1);
    Ok(())
}

fn dest_arg(dest: &Path) -> String {
    let mut value = dest.display().to_string();
    if !value.ends_with(std::path::MAIN_SEPARATOR) {
        value.push(std::path::MAIN_SEPARATOR);
    }
    value
}

fn rar_failure_label(code: Option<i32>) -> String {
    match code {
        Some(2) => "fatal error in archive".to_string(),
        Some(3) => "invalid archive or CRC error".to_string(),
        Some(4) => "archive is locked or encrypted".to_string(),
        Some(5) => "write error".to_string(),
        Some(6) => "file open error".to_string(),
        Some(8) => "not enough memory".to_string(),
        Some(9) => "file create error".to_string(),
        Some(10) => "no files to extract".to_string(),
        Some(code) => format!("extractor failed with code {code}"),
        None => "extractor terminated by signal".to_string(),
    }
}

/// `name.partN.rar` volume number, if any.
fn volume_number(path: &Path) -> Option<u32> {
    split_volume_stem(path).map(|(_, number)| number)
}

/// Splits `name.partN.rar` into `name` and `N`. Other extensions never match.
fn split_volume_stem(path: &Path) -> Option<(&str, u32)> {
    let ext = path.extension()?.to_str()?;
    if !ext.eq_ignore_ascii_case("rar") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let pos = stem.to_ascii_lowercase().rfind(".part")?;
    let digits = &stem[pos + 5..];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((&stem[..pos], digits.parse().ok()?))
}

fn is_numbered_rar_volume(ext: &str) -> bool {
    ext.len() == 3 && ext.starts_with('r') && ext[1..].chars().all(|c| c.is_ascii_digit())
}

/// Volumes after the first are pulled in by the extractor, never installed alone.
fn is_secondary_volume(path: &Path) -> bool {
    if let Some(number) = volume_number(path) {
        return number > 1;
    }
    let Some(ext) = path.extension().and_then(OsStr::to_str) else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    if !is_numbered_rar_volume(&ext) {
        return false;
    }
    ext != "r00" || path.with_extension("rar").exists()
}

/// First volume of a split set; other archives are returned unchanged.
fn first_volume(path: &Path) -> PathBuf {
    if let Some((base, number)) = split_volume_stem(path) {
        if number > 1 {
            let stem_len = path.file_stem().and_then(OsStr::to_str).map_or(0, str::len);
            let width = stem_len.saturating_sub(base.len() + 5);
            let candidate = path.with_file_name(format!("{base}.part{:0width$}.rar", 1));
            if candidate.exists() {
                return candidate;
            }
        }
        return path.to_path_buf();
    }
    let is_numbered = path
        .extension()
        .and_then(OsStr::to_str)
        .map(|ext| is_numbered_rar_volume(&ext.to_ascii_lowercase()))
        .unwrap_or(false);
    if is_numbered {
        let candidate = path.with_extension("rar");
        if candidate.exists() {
            return candidate;
        }
    }
    path.to_path_buf()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub archive: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub installed: Vec<String>,
    pub failures: Vec<BatchFailure>,
    pub cancelled: bool,
}

/// Archives directly inside `dir`, secondary split volumes excluded.
pub fn find_archives(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if ArchiveKind::from_extension(&path).is_some() && !is_secondary_volume(&path) {
            archives.push(path);
        }
    }
    archives.sort();
    Ok(archives)
}

/// Installs every archive in `dir`; one failing archive never stops the batch.
pub fn install_batch(
    dir: &Path,
    storage_root: &Path,
    progress: &Progress,
    logger: &Logger,
) -> Result<BatchReport> {
    if !dir.is_dir() {
        return Err(ModError::extraction(dir, "not a directory"));
    }
    let archives = find_archives(dir)
        .map_err(|err| ModError::extraction_source(dir, "list archives", err))?;
    let mut report = BatchReport::default();
    let inner = Progress::new(None, progress.cancel_token().clone());
    let mut counter = UnitCounter::new(progress, archives.len());

    for archive in archives {
        if progress.is_cancelled() {
            logger.warn("Batch install cancelled");
            report.cancelled = true;
            break;
        }
        let label = archive
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| archive.display().to_string());
        logger.info(format!("Installing mod from: {}", archive.display()));
        match extract_mod_folder(&archive, storage_root, &inner) {
            Ok(folder) => {
                logger.info(format!("Successfully installed: {folder}"));
                report.installed.push(folder);
            }
            Err(ModError::Cancelled { .. }) => {
                logger.warn(format!("Batch install cancelled during {label}"));
                report.cancelled = true;
                break;
            }
            Err(err) => {
                logger.error(format!("Failed to install {label}: {err}"));
                report.failures.push(BatchFailure {
                    archive: archive.clone(),
                    error: err.to_string(),
                });
            }
        }
        counter.bump();
    }
    Ok(report)
}
