use crate::{
    archive::{self, ArchiveKind, BatchReport},
    config::Config,
    conflicts::{self, ConflictDetail, ConflictMap},
    deploy::{self, DeployOptions, DeployReport},
    error::{ModError, Result},
    logging::{LogCallback, Logger},
    profiles::{self, ProfileStore},
    progress::{CancelToken, Progress, ProgressCallback},
    registry::{ModRecord, Registry, SortColumn, SortDirection},
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Write as _,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Enabled flags from the last run, kept beside the mod folders.
const SESSION_FILE: &str = ".enabled.json";

pub type ConflictsCallback = Arc<dyn Fn(&ConflictMap) + Send + Sync>;
pub type RegistryCallback = Arc<dyn Fn(&[ModRecord]) + Send + Sync>;

/// Hooks for a presentation layer. Every field is optional.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_progress: Option<ProgressCallback>,
    pub on_log: Option<LogCallback>,
    pub on_conflicts_changed: Option<ConflictsCallback>,
    pub on_registry_changed: Option<RegistryCallback>,
}

/// Ties storage, registry, profiles and deployment together.
pub struct ModManager {
    config: Config,
    registry: Registry,
    profiles: ProfileStore,
    logger: Logger,
    callbacks: Callbacks,
    cancel: CancelToken,
}

impl ModManager {
    pub fn open(config: Config, callbacks: Callbacks) -> Result<Self> {
        config.ensure_dirs()?;
        let logger = Logger::for_session(&config.logs_dir, callbacks.on_log.clone());
        logger.info("Starting mod manager");
        logger.info(format!("Mod storage: {}", config.storage_dir.display()));
        logger.info(format!("Game mods directory: {}", config.game_mods_dir.display()));

        let mut manager = Self {
            registry: Registry::new(&config.storage_dir),
            profiles: ProfileStore::new(&config.profiles_dir),
            config,
            logger,
            callbacks,
            cancel: CancelToken::new(),
        };
        manager.registry.rescan(&manager.logger)?;
        manager.restore_session();
        manager.notify_registry();
        Ok(manager)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn records(&self) -> &[ModRecord] {
        self.registry.records()
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Token checked by extraction, batch install and deploy.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn refresh(&mut self) -> Result<()> {
        self.logger.info("Refreshing mod list");
        self.registry.rescan(&self.logger)?;
        self.notify_registry();
        Ok(())
    }

    pub fn install_archive(&mut self, archive: &Path) -> Result<String> {
        if !archive.is_file() {
            return Err(ModError::extraction(archive, "file not found"));
        }
        let kind = ArchiveKind::classify(archive)
            .ok_or_else(|| ModError::extraction(archive, "unrecognised archive format"))?;
        if !archive::is_supported(kind) {
            let err = ModError::extraction(
                archive,
                format!("{kind} archives need unrar or 7z installed"),
            );
            self.logger.error(err.to_string());
            return Err(err);
        }

        self.logger
            .info(format!("Installing mod from: {} ({kind})", archive.display()));
        let progress = self.begin_long_operation();
        match archive::extract_mod_folder(archive, &self.config.storage_dir, &progress) {
            Ok(folder) => {
                self.logger.info(format!("Successfully installed: {folder}"));
                self.refresh()?;
                Ok(folder)
            }
            Err(err) => {
                self.logger.error(format!("Failed to install mod: {err}"));
                Err(err)
            }
        }
    }

    /// Installs every archive directly inside `dir`.
    pub fn install_folder(&mut self, dir: &Path) -> Result<BatchReport> {
        self.logger
            .info(format!("Installing mods from folder: {}", dir.display()));
        let progress = self.begin_long_operation();
        let report = archive::install_batch(dir, &self.config.storage_dir, &progress, &self.logger)?;
        self.logger.info(format!(
            "Batch install finished: {} installed, {} failed",
            report.installed.len(),
            report.failures.len()
        ));
        if !report.installed.is_empty() {
            self.refresh()?;
        }
        Ok(report)
    }

    pub fn set_enabled(&mut self, folder: &str, enabled: bool) -> Result<()> {
        self.registry.set_enabled(folder, enabled)?;
        let state = if enabled { "Enabled" } else { "Disabled" };
        self.logger.info(format!("{state} mod: {folder}"));
        self.persist_session();
        self.notify_registry();
        Ok(())
    }

    pub fn enable_all(&mut self) {
        self.registry.set_all_enabled(true);
        self.logger.info("Enabled all mods");
        self.persist_session();
        self.notify_registry();
    }

    pub fn disable_all(&mut self) {
        self.registry.set_all_enabled(false);
        self.logger.info("Disabled all mods");
        self.persist_session();
        self.notify_registry();
    }

    /// Removes the mod from storage. Deployed copies stay until the next deploy.
    pub fn uninstall(&mut self, folder: &str) -> Result<()> {
        self.logger.info(format!("Uninstalling mod: {folder}"));
        match self.registry.uninstall(folder) {
            Ok(record) => {
                self.logger.info(format!(
                    "Mod '{}' uninstalled successfully",
                    record.metadata.display_name
                ));
                self.persist_session();
                self.notify_registry();
                Ok(())
            }
            Err(err) => {
                self.logger.error(format!("Failed to uninstall mod: {err}"));
                Err(err)
            }
        }
    }

    pub fn sort_by(&mut self, column: SortColumn, direction: SortDirection) {
        self.registry.sort_by(column, direction);
        self.notify_registry();
    }

    /// Replaces the game mod directory with the enabled mods, in display order.
    pub fn deploy(&mut self) -> Result<DeployReport> {
        let options = DeployOptions {
            mode: self.config.deploy_mode,
        };
        let progress = self.begin_long_operation();
        let enabled = self.registry.enabled_records();
        self.logger.info(format!(
            "Deploying {} mods to {} ({})",
            enabled.len(),
            self.config.game_mods_dir.display(),
            options.mode.label()
        ));
        match deploy::deploy(&enabled, &self.config.game_mods_dir, options, &progress) {
            Ok(report) => {
                self.logger.info(format!(
                    "Deployed {} mods, removed {} old entries",
                    report.deployed.len(),
                    report.removed
                ));
                Ok(report)
            }
            Err(err) => {
                self.logger.error(format!("Failed to deploy mods: {err}"));
                Err(err)
            }
        }
    }

    pub fn save_profile(&mut self, name: &str) -> Result<PathBuf> {
        if self.registry.is_empty() {
            return Err(ModError::profile(name, "no mods to save"));
        }
        let path = self.profiles.save(name, &self.registry.enabled_map())?;
        self.logger.info(format!("Saved profile: {name}"));
        Ok(path)
    }

    /// Returns how many installed mods the profile mentioned.
    pub fn load_profile(&mut self, name: &str) -> Result<usize> {
        let flags = self.profiles.load(name)?;
        let applied = self.registry.apply_profile(&flags);
        self.logger.info(format!(
            "Loaded profile: {name} ({applied} of {} entries matched)",
            flags.len()
        ));
        self.persist_session();
        self.notify_registry();
        Ok(applied)
    }

    pub fn list_profiles(&self) -> Result<BTreeSet<String>> {
        self.profiles.list()
    }

    pub fn delete_profile(&mut self, name: &str) -> Result<()> {
        self.profiles.delete(name)?;
        self.logger.info(format!("Deleted profile: {name}"));
        Ok(())
    }

    /// Plain-text info block for one mod.
    pub fn mod_info(&self, folder: &str) -> Result<String> {
        let record = self
            .registry
            .get(folder)
            .ok_or_else(|| ModError::NotFound(folder.to_string()))?;
        Ok(format_mod_info(record))
    }

    pub fn check_conflicts(&self, folder: &str) -> Result<Vec<ConflictDetail>> {
        conflicts::report(self.registry.records(), folder)
            .ok_or_else(|| ModError::NotFound(folder.to_string()))
    }

    fn session_path(&self) -> PathBuf {
        self.config.storage_dir.join(SESSION_FILE)
    }

    /// Reapplies the flags saved by the previous run. Unknown folders are ignored.
    fn restore_session(&mut self) {
        let path = self.session_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return,
            Err(err) => {
                self.logger
                    .warn(format!("Unable to read saved mod state {}: {err}", path.display()));
                return;
            }
        };
        match serde_json::from_str::<BTreeMap<String, bool>>(&raw) {
            Ok(flags) => {
                let applied = self.registry.apply_profile(&flags);
                self.logger
                    .info(format!("Restored enabled state for {applied} mods"));
            }
            Err(err) => self
                .logger
                .warn(format!("Ignoring corrupt mod state {}: {err}", path.display())),
        }
    }

    fn persist_session(&self) {
        let path = self.session_path();
        let result = serde_json::to_string_pretty(&self.registry.enabled_map())
            .map_err(io::Error::from)
            .and_then(|raw| profiles::write_atomic(&path, &raw));
        if let Err(err) = result {
            self.logger
                .warn(format!("Unable to save mod state {}: {err}", path.display()));
        }
    }

    fn begin_long_operation(&self) -> Progress {
        self.cancel.reset();
        Progress::new(self.callbacks.on_progress.clone(), self.cancel.clone())
    }

    fn notify_registry(&self) {
        if let Some(callback) = &self.callbacks.on_registry_changed {
            callback(self.registry.records());
        }
        if let Some(callback) = &self.callbacks.on_conflicts_changed {
            callback(&self.registry.conflict_map());
        }
    }
}

const RULE_WIDTH: usize = 50;

fn section(out: &mut String, title: &str) {
    if !out.is_empty() {
        out.push('\n');
    }
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
}

pub fn format_mod_info(record: &ModRecord) -> String {
    let meta = &record.metadata;
    let mut out = String::new();
    section(&mut out, "Basic Information");
    let fields = [
        ("Mod Name", meta.display_name.clone()),
        ("Folder", record.folder_name.clone()),
        ("ID", meta.id.clone()),
        ("Version", meta.version.clone()),
        ("Authors", meta.authors.clone()),
        (
            "Status",
            if record.enabled { "Enabled" } else { "Disabled" }.to_string(),
        ),
        ("Location", record.location.display().to_string()),
        (
            "Affects Saved Games",
            if meta.affects_saved_games { "Yes" } else { "No" }.to_string(),
        ),
    ];
    for (key, value) in fields {
        let _ = writeln!(out, "{key}: {value}");
    }
    if !meta.description.is_empty() {
        let _ = writeln!(out, "Description: {}", meta.description);
    }

    if !meta.dependencies.is_empty() {
        section(&mut out, "Dependencies");
        for dep in &meta.dependencies {
            let _ = writeln!(out, "• {} ({})", dep.title, dep.id);
        }
    }
    if !meta.affected_files.is_empty() {
        section(&mut out, "Affected Files");
        for file in &meta.affected_files {
            let _ = writeln!(out, "• {file}");
        }
    }
    out
}

pub fn format_conflict_report(record: &ModRecord, details: &[ConflictDetail]) -> String {
    let name = &record.metadata.display_name;
    if record.metadata.affected_files.is_empty() {
        return format!("{name} has no affected files listed");
    }
    if details.is_empty() {
        return format!("No conflicts found for {name} with enabled mods");
    }
    let mut out = format!("Conflicts found for {name} with enabled mods:\n");
    for detail in details {
        let _ = writeln!(out, "\n{}:", detail.other_display_name);
        for file in &detail.files {
            let _ = writeln!(out, "  - {file}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::BTreeMap, fs};
    use tempfile::TempDir;

    fn write_mod(root: &Path, folder: &str, files: &[&str]) {
        let dir = root.join(folder);
        fs::create_dir_all(&dir).unwrap();
        let items: String = files
            .iter()
            .map(|file| format!("<Item>{file}</Item>"))
            .collect();
        let xml = format!(
            "<Mod id=\"{folder}-id\" version=\"2\"><Properties><Name>{folder} name</Name>\
             <Authors>Tester</Authors></Properties>\
             <Dependencies><Mod id=\"core\" title=\"Core\"/></Dependencies>\
             <ActionGroups><ActionGroup><Actions><UIScripts>{items}</UIScripts></Actions>\
             </ActionGroup></ActionGroups></Mod>"
        );
        fs::write(dir.join(format!("{folder}.modinfo")), xml).unwrap();
    }

    #[test]
    fn open_creates_layout_and_scans() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(dir.path());
        fs::create_dir_all(&config.storage_dir).unwrap();
        write_mod(&config.storage_dir, "mod_a", &[]);

        let manager = ModManager::open(config.clone(), Callbacks::default()).unwrap();
        assert!(config.game_mods_dir.is_dir());
        assert!(config.profiles_dir.is_dir());
        assert_eq!(manager.records().len(), 1);
        assert!(manager.logger().path().unwrap().exists());
    }

    #[test]
    fn save_profile_requires_mods() {
        let dir = TempDir::new().unwrap();
        let mut manager =
            ModManager::open(Config::with_root(dir.path()), Callbacks::default()).unwrap();
        let err = manager.save_profile("empty").unwrap_err();
        assert!(err.to_string().contains("no mods to save"));
    }

    #[test]
    fn callbacks_fire_on_toggle() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(dir.path());
        fs::create_dir_all(&config.storage_dir).unwrap();
        write_mod(&config.storage_dir, "mod_a", &["shared.xml"]);
        write_mod(&config.storage_dir, "mod_b", &["shared.xml"]);

        let conflicts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = conflicts.clone();
        let callbacks = Callbacks {
            on_conflicts_changed: Some(Arc::new(move |map: &ConflictMap| {
                sink.lock().unwrap().push(map.len());
            })),
            ..Callbacks::default()
        };
        let mut manager = ModManager::open(config, callbacks).unwrap();
        manager.set_enabled("mod_b", false).unwrap();
        assert_eq!(*conflicts.lock().unwrap(), vec![2, 0]);
    }

    #[test]
    fn mod_info_lists_sections() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(dir.path());
        fs::create_dir_all(&config.storage_dir).unwrap();
        write_mod(&config.storage_dir, "mod_a", &["ui/b.js", "ui/a.js"]);
        let manager = ModManager::open(config, Callbacks::default()).unwrap();

        let info = manager.mod_info("mod_a").unwrap();
        assert!(info.starts_with("Basic Information\n"));
        assert!(info.contains("Mod Name: mod_a name"));
        assert!(info.contains("ID: mod_a-id"));
        assert!(info.contains("Status: Enabled"));
        assert!(info.contains("Affects Saved Games: No"));
        assert!(info.contains("• Core (core)"));
        let a = info.find("• ui/a.js").unwrap();
        let b = info.find("• ui/b.js").unwrap();
        assert!(a < b);
        assert!(manager.mod_info("ghost").unwrap_err().is_not_found());
    }

    #[test]
    fn conflict_report_text() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(dir.path());
        fs::create_dir_all(&config.storage_dir).unwrap();
        write_mod(&config.storage_dir, "mod_a", &["shared.xml"]);
        write_mod(&config.storage_dir, "mod_b", &["shared.xml"]);
        write_mod(&config.storage_dir, "mod_c", &[]);
        let manager = ModManager::open(config, Callbacks::default()).unwrap();

        let details = manager.check_conflicts("mod_a").unwrap();
        let record = manager.registry().get("mod_a").unwrap();
        let text = format_conflict_report(record, &details);
        assert!(text.contains("mod_b name:\n  - shared.xml"));

        let lonely = manager.registry().get("mod_c").unwrap();
        let text = format_conflict_report(lonely, &manager.check_conflicts("mod_c").unwrap());
        assert!(text.contains("no affected files"));
        assert!(manager.check_conflicts("ghost").unwrap_err().is_not_found());
    }

    #[test]
    fn load_profile_applies_flags() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(dir.path());
        fs::create_dir_all(&config.storage_dir).unwrap();
        write_mod(&config.storage_dir, "mod_a", &[]);
        write_mod(&config.storage_dir, "mod_b", &[]);
        let mut manager = ModManager::open(config, Callbacks::default()).unwrap();

        manager.set_enabled("mod_b", false).unwrap();
        manager.save_profile("half").unwrap();
        manager.enable_all();
        assert_eq!(manager.load_profile("half").unwrap(), 2);
        let flags: BTreeMap<String, bool> = manager.registry().enabled_map();
        assert_eq!(flags.get("mod_b"), Some(&false));
        assert_eq!(
            manager.list_profiles().unwrap().into_iter().collect::<Vec<_>>(),
            vec!["half".to_string()]
        );
        manager.delete_profile("half").unwrap();
        assert!(manager.list_profiles().unwrap().is_empty());
    }

    #[test]
    fn enabled_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(dir.path());
        fs::create_dir_all(&config.storage_dir).unwrap();
        write_mod(&config.storage_dir, "mod_a", &[]);
        write_mod(&config.storage_dir, "mod_b", &[]);

        let mut manager = ModManager::open(config.clone(), Callbacks::default()).unwrap();
        manager.set_enabled("mod_b", false).unwrap();
        drop(manager);

        write_mod(&config.storage_dir, "mod_c", &[]);
        let reopened = ModManager::open(config, Callbacks::default()).unwrap();
        let flags = reopened.registry().enabled_map();
        assert_eq!(flags.get("mod_a"), Some(&true));
        assert_eq!(flags.get("mod_b"), Some(&false));
        assert_eq!(flags.get("mod_c"), Some(&true));
        assert_eq!(reopened.records().len(), 3);
    }

    #[test]
    fn corrupt_saved_state_is_ignored() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(dir.path());
        fs::create_dir_all(&config.storage_dir).unwrap();
        write_mod(&config.storage_dir, "mod_a", &[]);
        fs::write(config.storage_dir.join(SESSION_FILE), "{ not json").unwrap();

        let warnings = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = warnings.clone();
        let callbacks = Callbacks {
            on_log: Some(Arc::new(move |level: crate::logging::LogLevel, message: &str| {
                if level == crate::logging::LogLevel::Warn {
                    sink.lock().unwrap().push(message.to_string());
                }
            })),
            ..Callbacks::default()
        };
        let manager = ModManager::open(config, callbacks).unwrap();
        assert_eq!(manager.registry().counts(), (1, 1));
        assert!(warnings
            .lock()
            .unwrap()
            .iter()
            .any(|message| message.contains("corrupt mod state")));
    }
}
