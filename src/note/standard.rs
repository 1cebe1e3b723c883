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
    trailing_id,
    NoteParser,
    ParseContext,
    TAG_PREFIX,
    TAG_SEP,
};

/// Block note: first line names the type, `Field:` prefixes switch the
/// active field, and unrecognized lines extend whichever field is active.
/// That overflow rule allows multi-line content without repeating the
/// field name.
pub struct StandardNote<'t> {
    pub text: &'t str,
}

impl NoteParser for StandardNote<'_> {
    fn parse(
        &self,
        config: &ScanConfig,
        formatter: &mut FormatConverter,
        ctx: &ParseContext<'_>,
    ) -> Result<ParsedNote, MdankiError> {
        let mut lines: Vec<&str> = self.text.trim().lines().collect();

        let mut identifier = None;
        if let Some(id) = lines.last().copied().and_then(trailing_id) {
            identifier = Some(id);
            lines.pop();
        }
        if lines.is_empty() {
            // A bare identifier between the note markers is a delete request.
            return Ok(match identifier {
                Some(id) => ParsedNote::Deletion { id },
                None => ParsedNote::Discard,
            });
        }

        let mut note_tags: Vec<String> = Vec::new();
        if let Some(tag_line) = lines.last().and_then(|line| line.strip_prefix(TAG_PREFIX)) {
            note_tags =
                tag_line.split(TAG_SEP).filter(|tag| !tag.is_empty()).map(str::to_string).collect();
            lines.pop();
        }

        let (note_type, fields) = fields_from_lines(&lines, config, formatter)?;
        let field_names = &config.fields_dict[&note_type];
        let note = assemble_record(note_type.clone(), field_names, fields, note_tags, config, ctx);
        Ok(ParsedNote::Record { note, id: identifier })
    }
}

/// Assemble and format the fields of a standard note body (first line names
/// the type). Shared with the frozen-field declaration blocks, which use
/// the exact same body syntax.
pub(crate) fn fields_from_lines(
    lines: &[&str],
    config: &ScanConfig,
    formatter: &mut FormatConverter,
) -> Result<(String, std::collections::HashMap<String, String>), MdankiError> {
    let note_type = lines.first().map(|line| line.trim().to_string()).unwrap_or_default();
    let field_names = config
        .fields_dict
        .get(&note_type)
        .ok_or_else(|| MdankiError::UnknownNoteType(note_type.clone()))?;

    let mut fields = blank_fields(field_names);
    let Some(mut current_field) = field_names.first().cloned() else {
        return Ok((note_type, fields));
    };
    for line in &lines[1..] {
        let (rest, field) = field_from_line(line, field_names, &current_field);
        current_field = field;
        let value = fields.entry(current_field.clone()).or_default();
        value.push_str(rest);
        value.push('\n');
    }

    let cloze = cloze_eligible(config, &note_type);
    let highlights = config.settings.defaults.highlights_to_cloze;
    for name in field_names {
        let value = fields.entry(name.clone()).or_default();
        *value = formatter.format(value.trim(), cloze, highlights).trim().to_string();
    }
    Ok((note_type, fields))
}

/// Line starting with a known `Field:` prefix switches the active field;
/// anything else stays with the current one.
fn field_from_line<'l>(
    line: &'l str,
    field_names: &[String],
    current_field: &str,
) -> (&'l str, String) {
    for field in field_names {
        if let Some(rest) = line.strip_prefix(&format!("{}:", field)) {
            return (rest, field.clone());
        }
    }
    (line, current_field.to_string())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{
        config,
        context,
    };
    use super::*;
    use crate::core::FrozenFieldsDict;

    fn parse(text: &str) -> ParsedNote {
        let config = config();
        let frozen = FrozenFieldsDict::new();
        let ctx = context(&frozen);
        let mut formatter = FormatConverter::new("vault");
        StandardNote { text }.parse(&config, &mut formatter, &ctx).unwrap()
    }

    #[test]
    fn parses_basic_note_with_overflow_lines() {
        let parsed = parse("Basic\nThis is a test.\nBack: Test successful!\nand more content\n");
        let ParsedNote::Record { note, id } = parsed else { panic!("expected record") };
        assert_eq!(id, None);
        assert_eq!(note.model_name, "Basic");
        assert_eq!(note.fields["Front"], "This is a test.");
        // The unrecognized line extended the Back field.
        assert_eq!(note.fields["Back"], "Test successful!\nand more content");
    }

    #[test]
    fn trailing_identifier_marks_an_edit() {
        let parsed = parse("Basic\nFront: hi\nBack: there\n<!--ID: 1500-->");
        let ParsedNote::Record { id, .. } = parsed else { panic!("expected record") };
        assert_eq!(id, Some(1500));
    }

    #[test]
    fn trailing_tag_line_is_stripped_into_tags() {
        let parsed = parse("Basic\nFront: hi\nBack: there\nTags: alpha beta");
        let ParsedNote::Record { note, id } = parsed else { panic!("expected record") };
        assert_eq!(id, None);
        assert!(note.tags.contains(&"alpha".to_string()));
        assert!(note.tags.contains(&"beta".to_string()));
        assert_eq!(note.fields["Back"], "there");
    }

    #[test]
    fn bare_identifier_is_a_deletion() {
        let parsed = parse("ID: 42");
        let ParsedNote::Deletion { id } = parsed else { panic!("expected deletion") };
        assert_eq!(id, 42);
    }

    #[test]
    fn unknown_note_type_is_an_error() {
        let config = config();
        let frozen = FrozenFieldsDict::new();
        let ctx = context(&frozen);
        let mut formatter = FormatConverter::new("vault");
        let result = StandardNote { text: "Mystery\nFront: hi\n" }
            .parse(&config, &mut formatter, &ctx);
        assert!(matches!(result, Err(MdankiError::UnknownNoteType(_))));
    }

    #[test]
    fn missing_fields_render_as_empty_strings() {
        let parsed = parse("Basic\nFront: only the front\n");
        let ParsedNote::Record { note, .. } = parsed else { panic!("expected record") };
        assert_eq!(note.fields["Back"], "");
        assert_eq!(note.fields.len(), 2);
    }
}
