use crate::{
    deploy::DeployMode,
    error::{ModError, Result},
    game::{self, GamePaths},
};
use anyhow::Context;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub storage_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub game_mods_dir: PathBuf,
    #[serde(default)]
    pub deploy_mode: DeployMode,
    #[serde(default = "default_true")]
    pub confirm_deploy: bool,
    #[serde(default = "default_true")]
    pub confirm_uninstall: bool,
}

impl Config {
    pub fn from_paths(paths: GamePaths) -> Self {
        Self {
            storage_dir: paths.storage_dir,
            profiles_dir: paths.profiles_dir,
            logs_dir: paths.logs_dir,
            game_mods_dir: paths.game_mods_dir,
            deploy_mode: DeployMode::default(),
            confirm_deploy: true,
            confirm_uninstall: true,
        }
    }

    /// Self-contained layout under `root`, used for portable installs and tests.
    pub fn with_root(root: &Path) -> Self {
        Self::from_paths(GamePaths::under(root))
    }

    /// Reads `config.json` from the app data dir, writing defaults on first run.
    pub fn load_or_create() -> anyhow::Result<Self> {
        let base_dir = base_data_dir()?;
        fs::create_dir_all(&base_dir).context("create app data dir")?;
        let path = base_dir.join(CONFIG_FILE);
        if path.exists() {
            return Self::load(&path);
        }

        let paths = game::detect_paths().context("resolve local app data dir")?;
        let config = Self::from_paths(paths);
        config.save(&path)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path).context("read app config")?;
        let config: Config = serde_json::from_str(&raw).context("parse app config")?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create config dir")?;
        }
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }

    /// Creates every directory the tool needs.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.game_mods_dir,
            &self.storage_dir,
            &self.profiles_dir,
            &self.logs_dir,
        ] {
            fs::create_dir_all(dir).map_err(|err| ModError::Environment {
                message: "unable to create required directory".to_string(),
                path: dir.clone(),
                source: Some(err),
            })?;
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn base_data_dir() -> anyhow::Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("civsmith"))
}
