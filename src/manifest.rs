use crate::{
    error::{ModError, Result},
    game,
};
use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependency {
    pub id: String,
    pub title: String,
}

/// Parsed `.modinfo` contents. Missing optional fields stay empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub display_name: String,
    pub id: String,
    pub version: String,
    pub description: String,
    pub authors: String,
    pub affects_saved_games: bool,
    pub dependencies: Vec<Dependency>,
    pub affected_files: BTreeSet<String>,
}

/// Action lists whose items name files the mod overrides.
const FILE_ACTIONS: &[(&str, &str)] = &[("UIScripts", "Item"), ("LocalizedText", "File")];

pub fn find_manifest(folder: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(folder)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| game::is_manifest_file(path))
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Reads the manifest inside `folder`.
pub fn parse(folder: &Path) -> Result<Metadata> {
    let manifest = find_manifest(folder)
        .ok_or_else(|| ModError::manifest(folder, "no .modinfo file found"))?;
    let raw = fs::read(&manifest)
        .map_err(|err| ModError::manifest_source(folder, "unable to read manifest", err))?;
    let fallback_name = folder
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    parse_bytes(&raw, &fallback_name).map_err(|message| ModError::manifest(folder, message))
}

pub fn parse_str(xml: &str, fallback_name: &str) -> std::result::Result<Metadata, String> {
    parse_bytes(xml.as_bytes(), fallback_name)
}

fn parse_bytes(bytes: &[u8], fallback_name: &str) -> std::result::Result<Metadata, String> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut meta = Metadata::default();
    let mut saw_root = false;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| format!("malformed XML at byte {}: {err}", reader.buffer_position()))?;
        match event {
            Event::Start(e) => {
                let name = element_name(&e);
                open_element(&e, &name, &stack, &mut meta, &mut saw_root)?;
                stack.push(name);
                text.clear();
            }
            Event::Empty(e) => {
                let name = element_name(&e);
                open_element(&e, &name, &stack, &mut meta, &mut saw_root)?;
            }
            Event::Text(e) => {
                let value = e.unescape().map_err(|err| format!("bad text: {err}"))?;
                text.push_str(&value);
            }
            Event::CData(e) => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Event::End(_) => {
                let Some(name) = stack.pop() else {
                    return Err("unbalanced closing tag".to_string());
                };
                close_element(&name, &stack, text.trim(), &mut meta);
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(format!("unexpected end of file inside <{}>", stack.join("/")));
    }
    if !saw_root {
        return Err("missing <Mod> root element".to_string());
    }
    if meta.display_name.is_empty() {
        meta.display_name = fallback_name.to_string();
    }
    Ok(meta)
}

fn open_element(
    e: &BytesStart<'_>,
    name: &str,
    stack: &[String],
    meta: &mut Metadata,
    saw_root: &mut bool,
) -> std::result::Result<(), String> {
    if stack.is_empty() {
        if name != "Mod" {
            return Err(format!("expected <Mod> root element, found <{name}>"));
        }
        *saw_root = true;
        meta.id = attr_value(e, b"id").unwrap_or_default();
        meta.version = attr_value(e, b"version").unwrap_or_default();
        return Ok(());
    }
    if name == "Mod" && stack.last().map(String::as_str) == Some("Dependencies") {
        meta.dependencies.push(Dependency {
            id: attr_value(e, b"id").unwrap_or_default(),
            title: attr_value(e, b"title").unwrap_or_default(),
        });
    }
    Ok(())
}

fn close_element(name: &str, parents: &[String], text: &str, meta: &mut Metadata) {
    let parent = parents.last().map(String::as_str);
    if parent == Some("Properties") {
        match name {
            "Name" => meta.display_name = text.to_string(),
            "Description" => meta.description = text.to_string(),
            "Authors" => meta.authors = text.to_string(),
            "AffectsSavedGames" => meta.affects_saved_games = parse_flag(text),
            _ => {}
        }
        return;
    }

    let in_actions = has_ancestor(parents, "ActionGroup") && has_ancestor(parents, "Actions");
    if !in_actions || text.is_empty() {
        return;
    }
    let is_file_entry = FILE_ACTIONS
        .iter()
        .any(|(list, item)| name == *item && parent == Some(*list));
    if is_file_entry {
        meta.affected_files.insert(normalize_file(text));
    }
}

fn has_ancestor(parents: &[String], needle: &str) -> bool {
    parents.iter().any(|name| name == needle)
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn normalize_file(value: &str) -> String {
    value.trim().replace('\\', "/")
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_string()
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == key {
            if let Ok(value) = attr.unescape_value() {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FULL: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Mod id="better-ui" version="1.2" xmlns="ModInfo">
  <Properties>
    <Name>Better UI &amp; Tweaks</Name>
    <Description>Cleaner panels</Description>
    <Authors>Someone</Authors>
    <AffectsSavedGames>1</AffectsSavedGames>
  </Properties>
  <Dependencies>
    <Mod id="base-standard" title="LOC_MODULE_BASE_STANDARD_NAME"/>
    <Mod id="core" title="Core"></Mod>
  </Dependencies>
  <ActionGroups>
    <ActionGroup id="game" scope="game">
      <Actions>
        <UIScripts>
          <Item>ui/panel.js</Item>
          <Item> ui\tooltip.js </Item>
        </UIScripts>
        <LocalizedText>
          <File>text/en_us/Text.xml</File>
        </LocalizedText>
        <UpdateDatabase>
          <Item>data/ignored.xml</Item>
        </UpdateDatabase>
      </Actions>
    </ActionGroup>
  </ActionGroups>
</Mod>"#;

    #[test]
    fn parses_full_manifest() {
        let meta = parse_str(FULL, "better-ui-folder").unwrap();
        assert_eq!(meta.display_name, "Better UI & Tweaks");
        assert_eq!(meta.id, "better-ui");
        assert_eq!(meta.version, "1.2");
        assert_eq!(meta.description, "Cleaner panels");
        assert_eq!(meta.authors, "Someone");
        assert!(meta.affects_saved_games);
        assert_eq!(
            meta.dependencies,
            vec![
                Dependency {
                    id: "base-standard".to_string(),
                    title: "LOC_MODULE_BASE_STANDARD_NAME".to_string(),
                },
                Dependency {
                    id: "core".to_string(),
                    title: "Core".to_string(),
                },
            ]
        );
        let files: Vec<&str> = meta.affected_files.iter().map(String::as_str).collect();
        assert_eq!(files, vec!["text/en_us/Text.xml", "ui/panel.js", "ui/tooltip.js"]);
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let meta = parse_str("<Mod/>", "bare").unwrap();
        assert_eq!(meta.display_name, "bare");
        assert!(meta.id.is_empty());
        assert!(meta.version.is_empty());
        assert!(meta.authors.is_empty());
        assert!(!meta.affects_saved_games);
        assert!(meta.dependencies.is_empty());
        assert!(meta.affected_files.is_empty());
    }

    #[test]
    fn affects_saved_games_accepts_true_literal() {
        let xml = "<Mod><Properties><AffectsSavedGames>True</AffectsSavedGames></Properties></Mod>";
        assert!(parse_str(xml, "m").unwrap().affects_saved_games);
        let xml = "<Mod><Properties><AffectsSavedGames>0</AffectsSavedGames></Properties></Mod>";
        assert!(!parse_str(xml, "m").unwrap().affects_saved_games);
    }

    #[test]
    fn rejects_malformed_xml() {
        assert!(parse_str("<Mod><Properties></Mod>", "m").is_err());
        assert!(parse_str("<Mod><Properties>", "m").is_err());
        assert!(parse_str("<NotAMod/>", "m").is_err());
        assert!(parse_str("", "m").is_err());
    }

    #[test]
    fn items_outside_action_groups_are_ignored() {
        let xml = "<Mod><UIScripts><Item>stray.js</Item></UIScripts></Mod>";
        assert!(parse_str(xml, "m").unwrap().affected_files.is_empty());
    }

    #[test]
    fn parse_reads_manifest_from_folder() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("better-ui");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("better-ui.modinfo"), FULL).unwrap();
        fs::write(folder.join("readme.txt"), "hi").unwrap();

        let meta = parse(&folder).unwrap();
        assert_eq!(meta.id, "better-ui");
        assert_eq!(meta.affected_files.len(), 3);
    }

    #[test]
    fn parse_fails_without_manifest() {
        let dir = TempDir::new().unwrap();
        let err = parse(dir.path()).unwrap_err();
        assert!(matches!(err, ModError::Manifest { .. }));
    }

    #[test]
    fn parse_fails_on_broken_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.modinfo"), "<Mod><Properties>").unwrap();
        let err = parse(dir.path()).unwrap_err();
        assert!(matches!(err, ModError::Manifest { .. }));
    }

    #[test]
    fn find_manifest_prefers_sorted_first() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.modinfo"), "<Mod/>").unwrap();
        fs::write(dir.path().join("a.MODINFO"), "<Mod/>").unwrap();
        let found = find_manifest(dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "a.MODINFO");
    }
}
