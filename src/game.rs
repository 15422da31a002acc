use directories::BaseDirs;
use std::path::{Path, PathBuf};

pub const GAME_NAME: &str = "Sid Meier's Civilization VII";
pub const PUBLISHER_DIR: &str = "Firaxis Games";
pub const MANIFEST_EXTENSION: &str = "modinfo";
pub const TOOL_DIR: &str = "Civ7ModManager";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamePaths {
    pub game_mods_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl GamePaths {
    /// Layout rooted at `local_data`, the platform's local app data directory.
    pub fn under(local_data: &Path) -> Self {
        let tool_root = local_data.join(TOOL_DIR);
        Self {
            game_mods_dir: local_data.join(PUBLISHER_DIR).join(GAME_NAME).join("Mods"),
            storage_dir: tool_root.join("ModStorage"),
            profiles_dir: tool_root.join("Profiles"),
            logs_dir: tool_root.join("Logs"),
        }
    }
}

/// Default layout, or `None` when no home directory can be resolved.
pub fn detect_paths() -> Option<GamePaths> {
    let base = BaseDirs::new()?;
    Some(GamePaths::under(base.data_local_dir()))
}

pub fn is_manifest_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(MANIFEST_EXTENSION))
        .unwrap_or(false)
}
