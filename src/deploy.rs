use crate::{
    error::{ModError, Result},
    fsops::{self, StagingGuard},
    progress::Progress,
    registry::ModRecord,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployPhase {
    Idle,
    Clearing,
    Copying { current: usize, total: usize },
    Complete,
    Failed,
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployPhase::Idle => f.write_str("preparing"),
            DeployPhase::Clearing => f.write_str("clearing target"),
            DeployPhase::Copying { current, total } => {
                write!(f, "copying mod {current} of {total}")
            }
            DeployPhase::Complete => f.write_str("complete"),
            DeployPhase::Failed => f.write_str("failed"),
        }
    }
}

/// How the game mod directory is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMode {
    /// Wipe the target, then copy mod by mod. A failure leaves a partial set.
    Direct,
    /// Copy everything to a sibling staging dir first, then swap in.
    #[default]
    Staged,
}

impl DeployMode {
    pub fn label(self) -> &'static str {
        match self {
            DeployMode::Direct => "direct",
            DeployMode::Staged => "staged",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeployOptions {
    pub mode: DeployMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub deployed: Vec<String>,
    pub removed: usize,
    pub mode: DeployMode,
}

/// Replaces the contents of `target` with one folder per mod in `mods`.
///
/// Progress runs over `mods.len() + 1` units: one for clearing the target
/// and one per copied mod.
pub fn deploy(
    mods: &[&ModRecord],
    target: &Path,
    options: DeployOptions,
    progress: &Progress,
) -> Result<DeployReport> {
    if !target.is_dir() {
        return Err(ModError::Deployment {
            phase: DeployPhase::Idle,
            message: format!("game mod directory missing: {}", target.display()),
            deployed: Vec::new(),
            source: None,
        });
    }
    match options.mode {
        DeployMode::Direct => deploy_direct(mods, target, progress),
        DeployMode::Staged => deploy_staged(mods, target, progress),
    }
}

fn deploy_direct(mods: &[&ModRecord], target: &Path, progress: &Progress) -> Result<DeployReport> {
    let total = mods.len() + 1;
    let mut deployed = Vec::new();

    cancel_point(progress, "clearing target", &deployed)?;
    let removed = fsops::clear_dir(target)
        .map_err(|err| deploy_error(DeployPhase::Clearing, "unable to clear target", &deployed, err))?;
    progress.report(1, total);

    for (index, record) in mods.iter().enumerate() {
        cancel_point(progress, "copying mods", &deployed)?;
        let phase = DeployPhase::Copying {
            current: index + 1,
            total: mods.len(),
        };
        fsops::copy_dir(&record.location, &target.join(&record.folder_name)).map_err(|err| {
            deploy_error(
                phase,
                &format!("unable to copy {}", record.folder_name),
                &deployed,
                err,
            )
        })?;
        deployed.push(record.folder_name.clone());
        progress.report(index + 2, total);
    }

    Ok(DeployReport {
        deployed,
        removed,
        mode: DeployMode::Direct,
    })
}

fn deploy_staged(mods: &[&ModRecord], target: &Path, progress: &Progress) -> Result<DeployReport> {
    let total = mods.len() + 1;
    // A symlinked Mods dir must be staged next to the real directory.
    let resolved = fs::canonicalize(target).map_err(|err| {
        deploy_error(DeployPhase::Idle, "unable to resolve game mod directory", &[], err)
    })?;
    let target = resolved.as_path();
    let staging = staging_dir_for(target)?;
    let guard = StagingGuard::new(staging);

    for (index, record) in mods.iter().enumerate() {
        cancel_point(progress, "staging mods", &[])?;
        let phase = DeployPhase::Copying {
            current: index + 1,
            total: mods.len(),
        };
        fsops::copy_dir(&record.location, &guard.path().join(&record.folder_name)).map_err(
            |err| deploy_error(phase, &format!("unable to stage {}", record.folder_name), &[], err),
        )?;
        progress.report(index + 1, total);
    }

    check_swap(guard.path(), target)?;

    // Past this point the swap is committed; cancellation is no longer honoured.
    let removed = fsops::clear_dir(target)
        .map_err(|err| deploy_error(DeployPhase::Clearing, "unable to clear target", &[], err))?;

    let mut deployed = Vec::new();
    for (index, record) in mods.iter().enumerate() {
        let phase = DeployPhase::Copying {
            current: index + 1,
            total: mods.len(),
        };
        let staged = guard.path().join(&record.folder_name);
        let dest = target.join(&record.folder_name);
        fs::rename(&staged, &dest)
            .or_else(|_| fsops::copy_dir(&staged, &dest).map(|_| ()))
            .map_err(|err| {
                deploy_error(
                    phase,
                    &format!("unable to move {} into place", record.folder_name),
                    &deployed,
                    err,
                )
            })?;
        deployed.push(record.folder_name.clone());
    }
    progress.report(total, total);
    drop(guard);

    Ok(DeployReport {
        deployed,
        removed,
        mode: DeployMode::Staged,
    })
}

/// Moves an empty marker dir from staging into `target` and back out.
///
/// Runs before the target is cleared so a rename that cannot succeed fails
/// while the old mods are still in place.
fn check_swap(staging: &Path, target: &Path) -> Result<()> {
    let failed = |err: io::Error| {
        deploy_error(
            DeployPhase::Idle,
            "staged mods cannot be moved into the game mod directory",
            &[],
            err,
        )
    };
    let marker = fsops::make_temp_dir(staging, ".swap-check").map_err(failed)?;
    let name = marker.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    let landed = target.join(name);
    fs::rename(&marker, &landed).map_err(failed)?;
    fs::remove_dir(&landed).map_err(failed)
}

/// `<parent>/.<target name>.staging-*`, on the same filesystem as `target`.
fn staging_dir_for(target: &Path) -> Result<PathBuf> {
    let failed = |message: &str, source: Option<io::Error>| ModError::Deployment {
        phase: DeployPhase::Idle,
        message: message.to_string(),
        deployed: Vec::new(),
        source,
    };
    let parent = target
        .parent()
        .ok_or_else(|| failed("game mod directory has no parent", None))?;
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| failed("game mod directory has no name", None))?;
    fsops::make_temp_dir(parent, &format!(".{name}.staging"))
        .map_err(|err| failed("unable to create staging directory", Some(err)))
}

fn cancel_point(progress: &Progress, phase: &str, deployed: &[String]) -> Result<()> {
    if progress.is_cancelled() {
        return Err(ModError::Cancelled {
            phase: phase.to_string(),
            deployed: deployed.to_vec(),
        });
    }
    Ok(())
}

fn deploy_error(phase: DeployPhase, message: &str, deployed: &[String], err: io::Error) -> ModError {
    ModError::Deployment {
        phase,
        message: message.to_string(),
        deployed: deployed.to_vec(),
        source: Some(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{manifest::Metadata, progress::CancelToken};
    use std::{
        collections::BTreeMap,
        sync::{Arc, Mutex},
    };
    use tempfile::TempDir;

    fn stored_mod(storage: &Path, folder: &str, enabled: bool) -> ModRecord {
        let location = storage.join(folder);
        fs::create_dir_all(location.join("ui")).unwrap();
        fs::write(location.join(format!("{folder}.modinfo")), "<Mod/>").unwrap();
        fs::write(location.join("ui/panel.js"), folder).unwrap();
        ModRecord {
            folder_name: folder.to_string(),
            location,
            metadata: Metadata::default(),
            enabled,
            conflicts: BTreeMap::new(),
        }
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    struct Fixture {
        _dir: TempDir,
        records: Vec<ModRecord>,
        target: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = dir.path().join("storage");
        let records = vec![
            stored_mod(&storage, "mod_a", true),
            stored_mod(&storage, "mod_b", false),
            stored_mod(&storage, "mod_c", true),
        ];
        let target = dir.path().join("game").join("Mods");
        fs::create_dir_all(target.join("stale_mod")).unwrap();
        fs::write(target.join("loose.txt"), "old").unwrap();
        Fixture {
            _dir: dir,
            records,
            target,
        }
    }

    fn enabled(records: &[ModRecord]) -> Vec<&ModRecord> {
        records.iter().filter(|record| record.enabled).collect()
    }

    #[test]
    fn target_holds_exactly_enabled_mods_in_both_modes() {
        for mode in [DeployMode::Direct, DeployMode::Staged] {
            let fx = fixture();
            let report = deploy(
                &enabled(&fx.records),
                &fx.target,
                DeployOptions { mode },
                &Progress::silent(),
            )
            .unwrap();
            assert_eq!(report.deployed, vec!["mod_a", "mod_c"]);
            assert_eq!(report.removed, 2);
            assert_eq!(report.mode, mode);
            assert_eq!(listing(&fx.target), vec!["mod_a", "mod_c"]);
            assert_eq!(
                fs::read_to_string(fx.target.join("mod_c/ui/panel.js")).unwrap(),
                "mod_c"
            );
            assert_eq!(listing(fx.target.parent().unwrap()), vec!["Mods"]);
        }
    }

    #[test]
    fn missing_target_fails_before_touching_anything() {
        let fx = fixture();
        let missing = fx.target.join("nope");
        let err = deploy(
            &enabled(&fx.records),
            &missing,
            DeployOptions::default(),
            &Progress::silent(),
        )
        .unwrap_err();
        assert!(matches!(err, ModError::Deployment { phase: DeployPhase::Idle, .. }));
        assert!(fx.target.join("stale_mod").exists());
    }

    #[test]
    fn progress_counts_clear_plus_each_mod() {
        let fx = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress = Progress::new(
            Some(Arc::new(move |current: usize, total: usize| {
                sink.lock().unwrap().push((current, total));
            })),
            CancelToken::new(),
        );
        deploy(
            &enabled(&fx.records),
            &fx.target,
            DeployOptions {
                mode: DeployMode::Direct,
            },
            &progress,
        )
        .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn direct_failure_reports_partial_deploy() {
        let mut fx = fixture();
        fs::remove_dir_all(&fx.records[2].location).unwrap();
        fx.records[2].location = fx.records[2].location.with_file_name("vanished");

        let err = deploy(
            &enabled(&fx.records),
            &fx.target,
            DeployOptions {
                mode: DeployMode::Direct,
            },
            &Progress::silent(),
        )
        .unwrap_err();
        match err {
            ModError::Deployment {
                phase, deployed, ..
            } => {
                assert_eq!(phase, DeployPhase::Copying { current: 2, total: 2 });
                assert_eq!(deployed, vec!["mod_a".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!fx.target.join("stale_mod").exists());
    }

    #[test]
    fn staged_failure_leaves_target_untouched() {
        let mut fx = fixture();
        fs::remove_dir_all(&fx.records[2].location).unwrap();
        fx.records[2].location = fx.records[2].location.with_file_name("vanished");

        let err = deploy(
            &enabled(&fx.records),
            &fx.target,
            DeployOptions::default(),
            &Progress::silent(),
        )
        .unwrap_err();
        assert!(matches!(err, ModError::Deployment { .. }));
        assert_eq!(listing(&fx.target), vec!["loose.txt", "stale_mod"]);
        assert_eq!(listing(fx.target.parent().unwrap()), vec!["Mods"]);
    }

    #[test]
    fn cancelled_deploy_keeps_target() {
        for mode in [DeployMode::Direct, DeployMode::Staged] {
            let fx = fixture();
            let token = CancelToken::new();
            token.cancel();
            let err = deploy(
                &enabled(&fx.records),
                &fx.target,
                DeployOptions { mode },
                &Progress::new(None, token),
            )
            .unwrap_err();
            assert!(matches!(err, ModError::Cancelled { .. }));
            assert_eq!(listing(&fx.target), vec!["loose.txt", "stale_mod"]);
        }
    }

    #[test]
    fn empty_selection_clears_target() {
        let fx = fixture();
        let report = deploy(&[], &fx.target, DeployOptions::default(), &Progress::silent()).unwrap();
        assert!(report.deployed.is_empty());
        assert!(listing(&fx.target).is_empty());
    }

    #[cfg(unix)]
    fn link_target(real: &Path, link: &Path) {
        fs::create_dir_all(real.join("previous_mod")).unwrap();
        fs::create_dir_all(link.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(real, link).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn staged_deploy_through_symlinked_target() {
        let fx = fixture();
        let real = fx._dir.path().join("elsewhere").join("RealMods");
        let link = fx._dir.path().join("linked_game").join("Mods");
        link_target(&real, &link);

        let report =
            deploy(&enabled(&fx.records), &link, DeployOptions::default(), &Progress::silent())
                .unwrap();
        assert_eq!(report.deployed, vec!["mod_a", "mod_c"]);
        assert_eq!(report.removed, 1);
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(listing(&real), vec!["mod_a", "mod_c"]);
        assert_eq!(listing(link.parent().unwrap()), vec!["Mods"]);
        assert_eq!(listing(real.parent().unwrap()), vec!["RealMods"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn staged_deploy_into_target_on_another_filesystem() {
        let Ok(other_fs) = tempfile::TempDir::new_in("/dev/shm") else {
            return;
        };
        let fx = fixture();
        let real = other_fs.path().join("Mods");
        let link = fx._dir.path().join("linked_game").join("Mods");
        link_target(&real, &link);

        let report =
            deploy(&enabled(&fx.records), &link, DeployOptions::default(), &Progress::silent())
                .unwrap();
        assert_eq!(report.deployed, vec!["mod_a", "mod_c"]);
        assert_eq!(listing(&real), vec!["mod_a", "mod_c"]);
        assert_eq!(
            fs::read_to_string(real.join("mod_a/ui/panel.js")).unwrap(),
            "mod_a"
        );
        assert_eq!(listing(other_fs.path()), vec!["Mods"]);
    }

    #[test]
    fn failed_swap_check_reports_before_clearing() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir_all(&staging).unwrap();
        let err = check_swap(&staging, &dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, ModError::Deployment { phase: DeployPhase::Idle, .. }));

        let target = dir.path().join("Mods");
        fs::create_dir_all(target.join("keep")).unwrap();
        check_swap(&staging, &target).unwrap();
        assert_eq!(listing(&target), vec!["keep"]);
    }

    #[test]
    fn phase_display() {
        assert_eq!(DeployPhase::Clearing.to_string(), "clearing target");
        assert_eq!(
            DeployPhase::Copying { current: 1, total: 4 }.to_string(),
            "copying mod 1 of 4"
        );
    }
}
