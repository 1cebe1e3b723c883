use std::{
    collections::{
        HashMap,
        HashSet,
    },
    path::Path,
};

use regex::{
    escape,
    Regex,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    core::{
        FieldsDict,
        MdankiError,
    },
    note::ID_REGEXP_STR,
};

/// The marker strings that delimit notes inside a document. All of them are
/// user-configurable; the defaults mirror the classic syntax.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntaxSettings {
    pub note_prefix: String,
    pub note_suffix: String,
    pub inline_prefix: String,
    pub inline_suffix: String,
    pub deck_line: String,
    pub tag_line: String,
    pub delete_line: String,
    pub frozen_line: String,
}

impl Default for SyntaxSettings {
    fn default() -> Self {
        SyntaxSettings {
            note_prefix: "START".to_string(),
            note_suffix: "END".to_string(),
            inline_prefix: "STARTI".to_string(),
            inline_suffix: "ENDI".to_string(),
            deck_line: "TARGET DECK".to_string(),
            tag_line: "FILE TAGS".to_string(),
            delete_line: "DELETE".to_string(),
            frozen_line: "FROZEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultSettings {
    /// Marker tag stamped on every note added by a run.
    pub tag: String,
    pub deck: String,
    pub curly_cloze: bool,
    pub highlights_to_cloze: bool,
    pub add_file_link: bool,
    pub add_context: bool,
    /// Wrap written identifiers in an HTML comment.
    pub comment: bool,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        DefaultSettings {
            tag: "Obsidian_to_Anki".to_string(),
            deck: "Default".to_string(),
            curly_cloze: false,
            highlights_to_cloze: false,
            add_file_link: false,
            add_context: false,
            comment: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub vault_name: String,
    pub syntax: SyntaxSettings,
    pub defaults: DefaultSettings,
    /// Note type -> user search pattern; empty string disables the type.
    pub custom_regexps: HashMap<String, String>,
    /// Note types whose fields may carry cloze deletions.
    pub cloze_note_types: Vec<String>,
    /// Note type -> field that receives the file deep link (first schema
    /// field when absent).
    pub file_link_fields: HashMap<String, String>,
    /// Note type -> field that receives the heading breadcrumb.
    pub context_fields: HashMap<String, String>,
    /// Vault-relative folder -> deck override for documents below it.
    pub folder_decks: HashMap<String, String>,
    /// Vault-relative folder -> extra tags for documents below it.
    pub folder_tags: HashMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Settings { cloze_note_types: vec!["Cloze".to_string()], ..Settings::default() }
    }

    /// Keep the per-type pattern table in step with the store's note types.
    pub fn regenerate_regexp_section(&mut self, note_types: &[String]) {
        for note_type in note_types {
            self.custom_regexps.entry(note_type.clone()).or_default();
        }
        self.custom_regexps.retain(|note_type, _| note_types.contains(note_type));
    }
}

/// Everything a document scan needs, with the syntax strings compiled into
/// their regex forms once per run.
pub struct ScanConfig {
    pub settings: Settings,
    pub fields_dict: FieldsDict,
    pub existing_ids: HashSet<i64>,
    pub note_regexp: Regex,
    pub inline_regexp: Regex,
    pub deck_regexp: Regex,
    pub tag_regexp: Regex,
    pub frozen_regexp: Regex,
    pub empty_regexp: Regex,
    pub inline_empty_regexp: Regex,
    pub delete_regexp: Regex,
}

impl ScanConfig {
    pub fn new(
        settings: Settings,
        fields_dict: FieldsDict,
        existing_ids: HashSet<i64>,
    ) -> Result<Self, MdankiError> {
        let syntax = &settings.syntax;
        let note_prefix = escape(&syntax.note_prefix);
        let note_suffix = escape(&syntax.note_suffix);
        let inline_prefix = escape(&syntax.inline_prefix);
        let inline_suffix = escape(&syntax.inline_suffix);

        let note_regexp =
            Regex::new(&format!(r"(?m)^{}\n([\s\S]*?\n){}", note_prefix, note_suffix))?;
        let inline_regexp = Regex::new(&format!(r"{}(.*?){}", inline_prefix, inline_suffix))?;
        let deck_regexp =
            Regex::new(&format!(r"(?m)^{}(?:\n|: )(.*)", escape(&syntax.deck_line)))?;
        let tag_regexp = Regex::new(&format!(r"(?m)^{}(?:\n|: )(.*)", escape(&syntax.tag_line)))?;
        let frozen_regexp = Regex::new(&format!(
            r"{} - (.*?):\n((?:[^\n][\n]?)+)",
            escape(&syntax.frozen_line)
        ))?;
        let empty_regexp = Regex::new(&format!(
            r"(?m)^{}\n(?:<!--)?ID: [\s\S]*?\n{}",
            note_prefix, note_suffix
        ))?;
        let inline_empty_regexp = Regex::new(&format!(
            r"{}\s+(?:<!--)?ID: .*?{}",
            inline_prefix, inline_suffix
        ))?;
        let delete_regexp =
            Regex::new(&format!("{}{}", escape(&syntax.delete_line), ID_REGEXP_STR))?;

        Ok(ScanConfig {
            settings,
            fields_dict,
            existing_ids,
            note_regexp,
            inline_regexp,
            deck_regexp,
            tag_regexp,
            frozen_regexp,
            empty_regexp,
            inline_empty_regexp,
            delete_regexp,
        })
    }

    /// Deck for a document without an in-file override: nearest folder deck
    /// above it, then the run default.
    pub fn deck_for(&self, vault_relative: &Path) -> String {
        let mut dir = vault_relative.parent();
        while let Some(folder) = dir {
            if let Some(deck) = self.settings.folder_decks.get(&folder.to_string_lossy().to_string())
            {
                if !deck.is_empty() {
                    return deck.clone();
                }
            }
            dir = folder.parent();
        }
        self.settings.defaults.deck.clone()
    }

    /// Extra tags contributed by the folders above a document.
    pub fn folder_tags_for(&self, vault_relative: &Path) -> Vec<String> {
        let mut tags = Vec::new();
        let mut dir = vault_relative.parent();
        while let Some(folder) = dir {
            if let Some(folder_tags) =
                self.settings.folder_tags.get(&folder.to_string_lossy().to_string())
            {
                tags.extend(folder_tags.split_whitespace().map(str::to_string));
            }
            dir = folder.parent();
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ScanConfig {
        ScanConfig::new(Settings::new(), FieldsDict::new(), HashSet::new()).unwrap()
    }

    #[test]
    fn note_regexp_matches_block() {
        let config = config();
        let text = "START\nBasic\nFront: hi\nBack: there\nEND\n";
        let caps = config.note_regexp.captures(text).unwrap();
        assert_eq!(caps.get(1).unwrap().as_str(), "Basic\nFront: hi\nBack: there\n");
    }

    #[test]
    fn deck_line_supports_both_shapes() {
        let config = config();
        for text in ["TARGET DECK: Maths", "TARGET DECK\nMaths"] {
            let caps = config.deck_regexp.captures(text).unwrap();
            assert_eq!(caps.get(1).unwrap().as_str(), "Maths");
        }
    }

    #[test]
    fn delete_regexp_captures_identifier() {
        let config = config();
        let caps = config.delete_regexp.captures("DELETE\nID: 5").unwrap();
        assert_eq!(caps.get(1).unwrap().as_str(), "5");
        let commented = config.delete_regexp.captures("DELETE\n<!--ID: 129-->").unwrap();
        assert_eq!(commented.get(1).unwrap().as_str(), "129");
    }

    #[test]
    fn folder_deck_prefers_nearest_ancestor() {
        let mut settings = Settings::new();
        settings.folder_decks.insert("maths".to_string(), "Maths".to_string());
        settings.folder_decks.insert("maths/topology".to_string(), "Topology".to_string());
        let config = ScanConfig::new(settings, FieldsDict::new(), HashSet::new()).unwrap();
        assert_eq!(config.deck_for(Path::new("maths/topology/open_sets.md")), "Topology");
        assert_eq!(config.deck_for(Path::new("maths/algebra.md")), "Maths");
        assert_eq!(config.deck_for(Path::new("diary.md")), "Default");
    }
}
