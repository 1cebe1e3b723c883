use regex::Captures;

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
    TAG_PREFIX,
    TAG_SEP,
};

/// Note matched by a user-supplied search pattern. Capture groups map
/// positionally onto the note type's field order; when the search pass asked
/// for them, the final group is the identifier and the one before it the tag
/// line.
pub struct PatternNote<'t> {
    pub captures: Captures<'t>,
    pub note_type: &'t str,
    pub search_tags: bool,
    pub search_id: bool,
}

impl NoteParser for PatternNote<'_> {
    fn parse(
        &self,
        config: &ScanConfig,
        formatter: &mut FormatConverter,
        ctx: &ParseContext<'_>,
    ) -> Result<ParsedNote, MdankiError> {
        let mut groups: Vec<Option<&str>> =
            (1..self.captures.len()).map(|i| self.captures.get(i).map(|m| m.as_str())).collect();

        let mut identifier = None;
        if self.search_id {
            identifier = groups.pop().flatten().and_then(|digits| digits.parse().ok());
        }
        let mut note_tags: Vec<String> = Vec::new();
        if self.search_tags {
            if let Some(tag_group) = groups.pop().flatten() {
                let tag_line = tag_group.strip_prefix(TAG_PREFIX).unwrap_or(tag_group);
                note_tags = tag_line
                    .split(TAG_SEP)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect();
            }
        }

        let note_type = self.note_type.to_string();
        let field_names = config
            .fields_dict
            .get(&note_type)
            .ok_or_else(|| MdankiError::UnknownNoteType(note_type.clone()))?;

        let mut fields = blank_fields(field_names);
        for (name, group) in field_names.iter().zip(groups) {
            if let Some(text) = group {
                fields.insert(name.clone(), text.to_string());
            }
        }

        let cloze = cloze_eligible(config, &note_type);
        let highlights = config.settings.defaults.highlights_to_cloze;
        for name in field_names {
            let value = fields.entry(name.clone()).or_default();
            *value = formatter.format(value.trim(), cloze, highlights).trim().to_string();
        }

        let note = assemble_record(note_type, field_names, fields, note_tags, config, ctx);

        // A cloze-capable match that produced no cloze deletions anywhere is
        // not a note at all.
        if cloze && !formatter.note_has_clozes(&note) {
            return Ok(ParsedNote::Discard);
        }
        Ok(ParsedNote::Record { note, id: identifier })
    }
}

#[cfg(test)]
mod tests {
    use regex::Regex;

    use super::super::test_support::{
        config,
        config_with,
        context,
    };
    use super::*;
    use crate::{
        config::Settings,
        core::FrozenFieldsDict,
        note::ID_REGEXP_STR,
    };

    fn parse_with(pattern: &str, text: &str, note_type: &str, tags: bool, id: bool) -> ParsedNote {
        let mut settings = Settings::new();
        settings.defaults.curly_cloze = true;
        let config = config_with(settings);
        let frozen = FrozenFieldsDict::new();
        let ctx = context(&frozen);
        let mut formatter = FormatConverter::new("vault");
        let regexp = Regex::new(pattern).unwrap();
        let captures = regexp.captures(text).expect("pattern should match");
        PatternNote { captures, note_type, search_tags: tags, search_id: id }
            .parse(&config, &mut formatter, &ctx)
            .unwrap()
    }

    #[test]
    fn capture_groups_map_onto_fields_in_order() {
        let parsed = parse_with(r"(?m)^Q: (.*)\nA: (.*)", "Q: why\nA: because", "Basic", false, false);
        let ParsedNote::Record { note, id } = parsed else { panic!("expected record") };
        assert_eq!(id, None);
        assert_eq!(note.fields["Front"], "why");
        assert_eq!(note.fields["Back"], "because");
    }

    #[test]
    fn trailing_identifier_group_is_consumed() {
        let pattern = format!(r"(?m)^Q: (.*)\nA: (.*){}", ID_REGEXP_STR);
        let parsed = parse_with(&pattern, "Q: why\nA: because\nID: 3", "Basic", false, true);
        let ParsedNote::Record { id, .. } = parsed else { panic!("expected record") };
        assert_eq!(id, Some(3));
    }

    #[test]
    fn cloze_type_without_cloze_markers_is_discarded() {
        let parsed =
            parse_with(r"(?m)^(.*\S.*)$", "just a plain sentence", "Cloze", false, false);
        assert!(matches!(parsed, ParsedNote::Discard));
    }

    #[test]
    fn cloze_type_with_braces_is_kept() {
        let parsed =
            parse_with(r"(?m)^(.*\S.*)$", "the capital is {Paris}", "Cloze", false, false);
        let ParsedNote::Record { note, .. } = parsed else { panic!("expected record") };
        assert_eq!(note.fields["Text"], "the capital is {{c1::Paris}}");
    }

    #[test]
    fn missing_optional_groups_leave_fields_empty() {
        let parsed = parse_with(r"(?m)^Q: (.*)(?:\nA: (.*))?", "Q: why", "Basic", false, false);
        let ParsedNote::Record { note, .. } = parsed else { panic!("expected record") };
        assert_eq!(note.fields["Front"], "why");
        assert_eq!(note.fields["Back"], "");
    }

    #[test]
    fn plain_config_keeps_braceless_cloze_matches() {
        // With curly-cloze conversion off, brace-less matches are not
        // penalized.
        let config = config();
        let frozen = FrozenFieldsDict::new();
        let ctx = context(&frozen);
        let mut formatter = FormatConverter::new("vault");
        let regexp = Regex::new(r"(?m)^(.*\S.*)$").unwrap();
        let captures = regexp.captures("plain sentence").unwrap();
        let parsed = PatternNote {
            captures,
            note_type: "Cloze",
            search_tags: false,
            search_id: false,
        }
        .parse(&config, &mut formatter, &ctx)
        .unwrap();
        assert!(matches!(parsed, ParsedNote::Record { .. }));
    }
}
