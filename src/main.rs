use anyhow::{bail, Context, Result};
use civsmith::{
    deploy::DeployMode,
    logging::LogLevel,
    manager::format_conflict_report,
    Callbacks, Config, ModManager,
};
use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

enum Action {
    List,
    Install(PathBuf),
    InstallDir(PathBuf),
    Enable(String),
    Disable(String),
    EnableAll,
    DisableAll,
    Uninstall(String),
    Info(String),
    Conflicts(String),
    SaveProfile(String),
    LoadProfile(String),
    DeleteProfile(String),
    Profiles,
    Deploy,
}

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mut actions = Vec::new();
    let mut root: Option<PathBuf> = None;
    let mut direct = false;
    let mut assume_yes = false;

    while let Some(arg) = args.next() {
        let mut value = |flag: &str| -> Result<String> {
            args.next()
                .with_context(|| format!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--list" | "-l" => actions.push(Action::List),
            "--install" | "-i" => actions.push(Action::Install(value("--install")?.into())),
            "--install-dir" => actions.push(Action::InstallDir(value("--install-dir")?.into())),
            "--enable" => actions.push(Action::Enable(value("--enable")?)),
            "--disable" => actions.push(Action::Disable(value("--disable")?)),
            "--enable-all" => actions.push(Action::EnableAll),
            "--disable-all" => actions.push(Action::DisableAll),
            "--uninstall" => actions.push(Action::Uninstall(value("--uninstall")?)),
            "--info" => actions.push(Action::Info(value("--info")?)),
            "--conflicts" => actions.push(Action::Conflicts(value("--conflicts")?)),
            "--save-profile" => actions.push(Action::SaveProfile(value("--save-profile")?)),
            "--load-profile" => actions.push(Action::LoadProfile(value("--load-profile")?)),
            "--delete-profile" => {
                actions.push(Action::DeleteProfile(value("--delete-profile")?))
            }
            "--profiles" => actions.push(Action::Profiles),
            "--deploy" | "-d" => actions.push(Action::Deploy),
            "--direct" => direct = true,
            "--yes" | "-y" => assume_yes = true,
            "--root" => root = Some(value("--root")?.into()),
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => bail!("unknown argument: {other} (see --help)"),
        }
    }

    let mut config = match &root {
        Some(root) => Config::with_root(root),
        None => Config::load_or_create()?,
    };
    if direct {
        config.deploy_mode = DeployMode::Direct;
    }
    if actions.is_empty() {
        actions.push(Action::List);
    }

    let mut manager = ModManager::open(config, cli_callbacks()).context("open mod manager")?;
    for action in actions {
        run_action(&mut manager, action, assume_yes)?;
    }
    Ok(())
}

fn run_action(manager: &mut ModManager, action: Action, assume_yes: bool) -> Result<()> {
    match action {
        Action::List => print_list(manager),
        Action::Install(path) => {
            let folder = manager
                .install_archive(&path)
                .with_context(|| format!("install {}", path.display()))?;
            println!("Installed {folder}");
        }
        Action::InstallDir(dir) => {
            let report = manager
                .install_folder(&dir)
                .with_context(|| format!("install from {}", dir.display()))?;
            for folder in &report.installed {
                println!("Installed {folder}");
            }
            for failure in &report.failures {
                println!("Failed {}: {}", display_name(&failure.archive), failure.error);
            }
            if report.cancelled {
                println!("Batch install cancelled");
            }
        }
        Action::Enable(folder) => manager.set_enabled(&folder, true)?,
        Action::Disable(folder) => manager.set_enabled(&folder, false)?,
        Action::EnableAll => manager.enable_all(),
        Action::DisableAll => manager.disable_all(),
        Action::Uninstall(folder) => {
            let prompt = format!("Remove {folder} from mod storage?");
            if manager.config().confirm_uninstall && !assume_yes && !ask(&prompt)? {
                println!("Skipped uninstall of {folder}");
                return Ok(());
            }
            manager.uninstall(&folder)?;
            println!("Uninstalled {folder}");
        }
        Action::Info(folder) => print!("{}", manager.mod_info(&folder)?),
        Action::Conflicts(folder) => {
            let details = manager.check_conflicts(&folder)?;
            if let Some(record) = manager.registry().get(&folder) {
                println!("{}", format_conflict_report(record, &details));
            }
        }
        Action::SaveProfile(name) => {
            let path = manager.save_profile(&name)?;
            println!("Saved profile {name} to {}", path.display());
        }
        Action::LoadProfile(name) => {
            let applied = manager.load_profile(&name)?;
            println!("Loaded profile {name} ({applied} mod(s) updated)");
        }
        Action::DeleteProfile(name) => {
            manager.delete_profile(&name)?;
            println!("Deleted profile {name}");
        }
        Action::Profiles => {
            for name in manager.list_profiles()? {
                println!("{name}");
            }
        }
        Action::Deploy => {
            let config = manager.config();
            let (_, enabled) = manager.registry().counts();
            if config.deploy_mode == DeployMode::Direct {
                eprintln!("{DIRECT_WARNING}");
            }
            let prompt = deploy_prompt(enabled, &config.game_mods_dir, config.deploy_mode);
            if config.confirm_deploy && !assume_yes && !ask(&prompt)? {
                println!("Skipped deploy");
                return Ok(());
            }
            let report = manager.deploy().context("deploy mods")?;
            println!(
                "Deployed {} mod(s) to {} ({} mode)",
                report.deployed.len(),
                manager.config().game_mods_dir.display(),
                report.mode.label()
            );
        }
    }
    Ok(())
}

const DIRECT_WARNING: &str =
    "Warning: direct mode clears the game mod directory first; a failure part-way leaves a partial mod set.";

fn deploy_prompt(enabled: usize, target: &Path, mode: DeployMode) -> String {
    format!(
        "Replace everything in {} with {enabled} enabled mod(s) ({} mode)?",
        target.display(),
        mode.label()
    )
}

/// Reads one answer line. Only `y` or `yes` count as consent; EOF is a no.
fn confirm(prompt: &str, input: &mut impl BufRead, output: &mut impl Write) -> io::Result<bool> {
    write!(output, "{prompt} [y/N] ")?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn ask(prompt: &str) -> Result<bool> {
    let stdin = io::stdin();
    confirm(prompt, &mut stdin.lock(), &mut io::stdout()).context("read confirmation")
}

fn print_list(manager: &ModManager) {
    for record in manager.records() {
        let mark = if record.enabled { "x" } else { " " };
        let mut line = format!(
            "[{mark}] {:<32} {} {}",
            record.folder_name, record.metadata.display_name, record.metadata.version
        );
        if record.has_conflicts() {
            let others: Vec<&str> = record.conflicts.keys().map(String::as_str).collect();
            line.push_str(&format!("  (conflicts: {})", others.join(", ")));
        }
        println!("{line}");
    }
    let (total, enabled) = manager.registry().counts();
    println!("Mods: {total} total, {enabled} enabled");
}

fn cli_callbacks() -> Callbacks {
    Callbacks {
        on_progress: Some(Arc::new(|current: usize, total: usize| {
            eprint!("\r  {current}/{total}");
            if current >= total {
                eprintln!();
            }
            let _ = io::stderr().flush();
        })),
        on_log: Some(Arc::new(|level: LogLevel, message: &str| {
            if level != LogLevel::Info {
                eprintln!("[{level}] {message}");
            }
        })),
        ..Callbacks::default()
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_help() {
    println!("civsmith: Civilization VII mod manager");
    println!("  --list                  List installed mods (default)");
    println!("  --install <archive>     Install a mod from a zip/7z/rar archive");
    println!("  --install-dir <dir>     Install every archive in a folder");
    println!("  --enable <folder>       Enable a mod");
    println!("  --disable <folder>      Disable a mod");
    println!("  --enable-all            Enable every mod");
    println!("  --disable-all           Disable every mod");
    println!("  --uninstall <folder>    Remove a mod from storage");
    println!("  --info <folder>         Show mod details");
    println!("  --conflicts <folder>    Show files shared with enabled mods");
    println!("  --save-profile <name>   Save enabled flags as a profile");
    println!("  --load-profile <name>   Apply a saved profile");
    println!("  --delete-profile <name> Delete a saved profile");
    println!("  --profiles              List saved profiles");
    println!("  --deploy                Copy enabled mods into the game mod directory");
    println!("  --direct                Deploy without staging");
    println!("  --yes, -y               Skip deploy and uninstall confirmations");
    println!("  --root <dir>            Keep all data under <dir>");
    println!("Actions run in the order given. Enabled state is kept between runs;");
    println!("profiles save named snapshots of it.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn answer(reply: &str) -> (bool, String) {
        let mut output = Vec::new();
        let agreed = confirm("Deploy?", &mut Cursor::new(reply), &mut output).unwrap();
        (agreed, String::from_utf8(output).unwrap())
    }

    #[test]
    fn confirm_accepts_only_yes() {
        assert_eq!(answer("y\n"), (true, "Deploy? [y/N] ".to_string()));
        assert!(answer("  YES \n").0);
        assert!(!answer("n\n").0);
        assert!(!answer("\n").0);
        assert!(!answer("yep\n").0);
    }

    #[test]
    fn confirm_treats_eof_as_no() {
        assert!(!answer("").0);
    }

    #[test]
    fn deploy_prompt_names_target_and_mode() {
        let prompt = deploy_prompt(3, Path::new("/games/Mods"), DeployMode::Direct);
        assert_eq!(
            prompt,
            "Replace everything in /games/Mods with 3 enabled mod(s) (direct mode)?"
        );
    }
}
