use regex::Regex;

use crate::{
    config::ScanConfig,
    core::{
        MdankiError,
        ParsedNote,
    },
    format::FormatConverter,
};

use super::{
    assemble_record,
    blank_fields,
    cloze_eligible,
    NoteParser,
    ParseContext,
    TAG_SEP,
};

/// Single-line note: `[Type] Front: ... Back: ...`. Tokens are split on
/// spaces; a token exactly equal to `Field:` switches the active field and
/// is dropped.
pub struct InlineNote<'t> {
    pub text: &'t str,
}

impl NoteParser for InlineNote<'_> {
    fn parse(
        &self,
        config: &ScanConfig,
        formatter: &mut FormatConverter,
        ctx: &ParseContext<'_>,
    ) -> Result<ParsedNote, MdankiError> {
        let id_regexp = Regex::new(r"(?:<!--)?ID: (\d+)").unwrap();
        let tag_regexp = Regex::new(r"Tags: (.*)").unwrap();
        let type_regexp = Regex::new(r"\[(.*?)\]").unwrap();

        let mut text = self.text.trim().to_string();

        let mut identifier = None;
        if let Some(caps) = id_regexp.captures(&text) {
            identifier = caps[1].parse().ok();
            let start = caps.get(0).unwrap().start();
            text.truncate(start);
        }
        if text.trim().is_empty() {
            return Ok(match identifier {
                Some(id) => ParsedNote::Deletion { id },
                None => ParsedNote::Discard,
            });
        }

        let mut note_tags: Vec<String> = Vec::new();
        if let Some(caps) = tag_regexp.captures(&text) {
            note_tags =
                caps[1].split(TAG_SEP).filter(|tag| !tag.is_empty()).map(str::to_string).collect();
            let start = caps.get(0).unwrap().start();
            text.truncate(start);
        }

        let Some(type_caps) = type_regexp.captures(&text) else {
            return Err(MdankiError::Custom(format!(
                "inline note without a [Type] prefix: {}",
                self.text
            )));
        };
        let note_type = type_caps[1].to_string();
        let body = text[type_caps.get(0).unwrap().end()..].to_string();

        let field_names = config
            .fields_dict
            .get(&note_type)
            .ok_or_else(|| MdankiError::UnknownNoteType(note_type.clone()))?;

        let mut fields = blank_fields(field_names);
        let mut current_field = match field_names.first() {
            Some(first) => first.clone(),
            None => return Ok(ParsedNote::Discard),
        };
        for token in body.split(' ') {
            let mut token = token;
            for field in field_names {
                if token == format!("{}:", field) {
                    current_field = field.clone();
                    token = "";
                }
            }
            let value = fields.entry(current_field.clone()).or_default();
            value.push_str(token);
            value.push(' ');
        }

        let cloze = cloze_eligible(config, &note_type);
        let highlights = config.settings.defaults.highlights_to_cloze;
        for name in field_names {
            let value = fields.entry(name.clone()).or_default();
            *value = formatter.format(value.trim(), cloze, highlights).trim().to_string();
        }

        let note = assemble_record(note_type, field_names, fields, note_tags, config, ctx);
        Ok(ParsedNote::Record { note, id: identifier })
    }
}
