use std::collections::HashMap;

use regex::Regex;

use crate::{
    config::ScanConfig,
    core::{
        MdankiError,
        NoteRecord,
        ParsedNote,
    },
    format::FormatConverter,
};

pub mod inline;
pub mod pattern;
pub mod standard;

pub use inline::InlineNote;
pub use pattern::PatternNote;
pub use standard::StandardNote;

pub const TAG_PREFIX: &str = "Tags: ";
pub const TAG_SEP: &str = " ";

/// Appended to a user search pattern for passes that expect an identifier.
pub const ID_REGEXP_STR: &str = r"\n(?:<!--)?(?:ID: (\d+).*)";
/// Appended to a user search pattern for passes that expect a tag line.
pub const TAG_REGEXP_STR: &str = r"(Tags: .*)";

/// Per-document inputs shared by every parse call.
pub struct ParseContext<'a> {
    pub deck: &'a str,
    /// Deep link into the vault, empty when file links are disabled.
    pub url: &'a str,
    pub frozen_fields: &'a crate::core::FrozenFieldsDict,
    /// Heading breadcrumb at the match position, empty when disabled.
    pub context: &'a str,
}

/// One note syntax. Implementations are pure functions of their matched
/// span plus the run configuration.
pub trait NoteParser {
    fn parse(
        &self,
        config: &ScanConfig,
        formatter: &mut FormatConverter,
        ctx: &ParseContext<'_>,
    ) -> Result<ParsedNote, MdankiError>;
}

/// Identifier on its own line, optionally comment-wrapped.
pub(crate) fn trailing_id(line: &str) -> Option<i64> {
    let id_regexp = Regex::new(r"^(?:<!--)?ID: (\d+)").unwrap();
    id_regexp.captures(line).and_then(|caps| caps[1].parse().ok())
}

pub(crate) fn cloze_eligible(config: &ScanConfig, note_type: &str) -> bool {
    config.settings.defaults.curly_cloze
        && config.settings.cloze_note_types.iter().any(|cloze_type| cloze_type == note_type)
}

/// Empty value for every schema field, so no field is ever absent.
pub(crate) fn blank_fields(field_names: &[String]) -> HashMap<String, String> {
    field_names.iter().map(|name| (name.clone(), String::new())).collect()
}

/// The tail every parser runs after field assembly: file link, frozen
/// suffixes, context breadcrumb, tags, deck.
pub(crate) fn assemble_record(
    note_type: String,
    field_names: &[String],
    mut fields: HashMap<String, String>,
    note_tags: Vec<String>,
    config: &ScanConfig,
    ctx: &ParseContext<'_>,
) -> NoteRecord {
    let settings = &config.settings;
    if settings.defaults.add_file_link && !ctx.url.is_empty() {
        let link_field = settings
            .file_link_fields
            .get(&note_type)
            .cloned()
            .or_else(|| field_names.first().cloned());
        if let Some(value) = link_field.and_then(|field| fields.get_mut(&field)) {
            value.push_str(&format!(
                r#"<br><a href="{}" class="obsidian-link">Obsidian</a>"#,
                ctx.url
            ));
        }
    }
    if let Some(frozen) = ctx.frozen_fields.get(&note_type) {
        for (field, suffix) in frozen {
            if suffix.is_empty() {
                continue;
            }
            if let Some(value) = fields.get_mut(field) {
                value.push_str(suffix);
            }
        }
    }
    if settings.defaults.add_context && !ctx.context.is_empty() {
        let context_field = settings
            .context_fields
            .get(&note_type)
            .cloned()
            .or_else(|| field_names.first().cloned());
        if let Some(value) = context_field.and_then(|field| fields.get_mut(&field)) {
            value.push_str(&format!("<br>{}", ctx.context));
        }
    }

    let mut note = NoteRecord::new(&settings.defaults.tag);
    note.model_name = note_type;
    note.fields = fields;
    note.tags.extend(note_tags);
    note.deck_name = ctx.deck.to_string();
    note
}
