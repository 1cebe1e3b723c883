use std::{
    collections::HashMap,
    path::{
        Path,
        PathBuf,
    },
};

use log::{
    info,
    warn,
};
use regex::Regex;

use crate::{
    config::ScanConfig,
    core::{
        FrozenFieldsDict,
        MdankiError,
        NoteRecord,
        ParsedNote,
    },
    format::FormatConverter,
    note::{
        standard::fields_from_lines,
        InlineNote,
        NoteParser,
        ParseContext,
        PatternNote,
        StandardNote,
        ID_REGEXP_STR,
        TAG_REGEXP_STR,
        TAG_SEP,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyntaxKind {
    Standard,
    Inline,
    Pattern,
}

struct Heading {
    offset: usize,
    level: usize,
    text: String,
}

/// One markdown document and everything a scan extracted from it. Owned by
/// the scan that produced it; the orchestrator consumes it by value.
pub struct SourceDocument {
    pub path: PathBuf,
    pub vault_relative: PathBuf,
    pub url: String,
    pub text: String,
    original: String,

    pub target_deck: String,
    pub global_tags: Vec<String>,
    frozen_fields: FrozenFieldsDict,
    headings: Vec<Heading>,
    ignore_spans: Vec<(usize, usize)>,

    pub notes_to_add: Vec<NoteRecord>,
    pub id_indexes: Vec<usize>,
    pub inline_notes_to_add: Vec<NoteRecord>,
    pub inline_id_indexes: Vec<usize>,
    pub regex_notes_to_add: Vec<NoteRecord>,
    pub regex_id_indexes: Vec<usize>,
    pub notes_to_edit: Vec<(NoteRecord, i64)>,
    pub notes_to_delete: Vec<i64>,
    /// Media referenced by this document: file name -> path as written.
    pub detected_media: HashMap<String, String>,

    /// Identifiers returned by the store, positional over
    /// `all_notes_to_add` order. Filled in after phase 1.
    pub note_ids: Vec<Option<i64>>,
    /// Card ids of the edited notes, from `notesInfo`.
    pub card_ids: Vec<i64>,
}

impl SourceDocument {
    pub fn new(
        path: PathBuf,
        vault_relative: PathBuf,
        contents: String,
        config: &ScanConfig,
    ) -> Self {
        let url = if config.settings.defaults.add_file_link
            && !config.settings.vault_name.is_empty()
        {
            file_url(&config.settings.vault_name, &vault_relative)
        } else {
            String::new()
        };
        SourceDocument {
            path,
            vault_relative,
            url,
            original: contents.clone(),
            text: contents,
            target_deck: String::new(),
            global_tags: Vec::new(),
            frozen_fields: FrozenFieldsDict::new(),
            headings: Vec::new(),
            ignore_spans: Vec::new(),
            notes_to_add: Vec::new(),
            id_indexes: Vec::new(),
            inline_notes_to_add: Vec::new(),
            inline_id_indexes: Vec::new(),
            regex_notes_to_add: Vec::new(),
            regex_id_indexes: Vec::new(),
            notes_to_edit: Vec::new(),
            notes_to_delete: Vec::new(),
            detected_media: HashMap::new(),
            note_ids: Vec::new(),
            card_ids: Vec::new(),
        }
    }

    /// Locate every note span in the document and sort them into the
    /// add / edit / delete sets.
    pub fn scan(&mut self, config: &ScanConfig) -> Result<(), MdankiError> {
        let text = self.text.clone();
        let mut formatter = FormatConverter::new(&config.settings.vault_name);

        self.setup_frozen_fields(&text, config, &mut formatter)?;
        self.setup_target_deck(&text, config);
        self.setup_global_tags(&text, config);
        self.collect_headings(&text, &formatter);
        self.add_spans_to_ignore(&text, config, &formatter);

        self.scan_standard_notes(&text, config, &mut formatter);
        self.scan_inline_notes(&text, config, &mut formatter);

        let mut note_types: Vec<&String> = config.settings.custom_regexps.keys().collect();
        note_types.sort();
        for note_type in note_types {
            let pattern = &config.settings.custom_regexps[note_type];
            if !pattern.is_empty() {
                self.search(note_type, pattern, &text, config, &mut formatter)?;
            }
        }

        self.scan_deletions(&text, config);
        self.detected_media = formatter.take_detected_media();
        Ok(())
    }

    fn setup_frozen_fields(
        &mut self,
        text: &str,
        config: &ScanConfig,
        formatter: &mut FormatConverter,
    ) -> Result<(), MdankiError> {
        let mut frozen = FrozenFieldsDict::new();
        for (note_type, fields) in &config.fields_dict {
            frozen.insert(
                note_type.clone(),
                fields.iter().map(|field| (field.clone(), String::new())).collect(),
            );
        }
        for caps in config.frozen_regexp.captures_iter(text) {
            let note_type = caps[1].to_string();
            let body = format!("{}\n{}", note_type, &caps[2]);
            let lines: Vec<&str> = body.lines().collect();
            match fields_from_lines(&lines, config, formatter) {
                Ok((_, fields)) => {
                    frozen.insert(note_type, fields);
                }
                Err(error) => {
                    warn!(
                        "Ignoring frozen fields declaration for {} in {}: {}",
                        note_type,
                        self.path.display(),
                        error
                    );
                }
            }
        }
        self.frozen_fields = frozen;
        Ok(())
    }

    fn setup_target_deck(&mut self, text: &str, config: &ScanConfig) {
        self.target_deck = config
            .deck_regexp
            .captures(text)
            .map(|caps| caps[1].trim().to_string())
            .unwrap_or_else(|| config.deck_for(&self.vault_relative));
        info!("Target deck for {} is {}", self.path.display(), self.target_deck);
    }

    fn setup_global_tags(&mut self, text: &str, config: &ScanConfig) {
        let mut tags: Vec<String> = config
            .tag_regexp
            .captures(text)
            .map(|caps| {
                caps[1].split(TAG_SEP).filter(|tag| !tag.is_empty()).map(str::to_string).collect()
            })
            .unwrap_or_default();
        tags.extend(config.folder_tags_for(&self.vault_relative));
        self.global_tags = tags;
    }

    /// Headings drive the breadcrumb context; ones inside fenced code are
    /// not headings.
    fn collect_headings(&mut self, text: &str, formatter: &FormatConverter) {
        let heading_regexp = Regex::new(r"(?m)^(#{1,6}) (.*)$").unwrap();
        let code_spans = formatter.display_code_spans(text);
        self.headings = heading_regexp
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0).unwrap();
                if contained_in((whole.start(), whole.end()), &code_spans) {
                    return None;
                }
                Some(Heading {
                    offset: whole.start(),
                    level: caps[1].len(),
                    text: caps[2].trim().to_string(),
                })
            })
            .collect();
    }

    /// Breadcrumb of the headings enclosing `position`:
    /// `path > H1 > H2 > ...`.
    fn context_at(&self, position: usize) -> String {
        let mut current: Vec<&Heading> = Vec::new();
        for heading in &self.headings {
            if position < heading.offset {
                break;
            }
            let mut keep = 0;
            for context_heading in &current {
                if heading.level > context_heading.level {
                    keep += 1;
                    continue;
                }
                break;
            }
            current.truncate(keep);
            current.push(heading);
        }
        let mut parts = vec![self.vault_relative.to_string_lossy().into_owned()];
        parts.extend(current.iter().map(|heading| heading.text.clone()));
        parts.join(" > ")
    }

    /// Regions the pattern search must never re-match: recognized note
    /// spans plus math and code spans.
    fn add_spans_to_ignore(&mut self, text: &str, config: &ScanConfig, formatter: &FormatConverter) {
        self.ignore_spans.clear();
        self.ignore_spans.extend(spans(&config.note_regexp, text));
        self.ignore_spans.extend(spans(&config.inline_regexp, text));
        self.ignore_spans.extend(formatter.inline_math_spans(text));
        self.ignore_spans.extend(formatter.display_math_spans(text));
        self.ignore_spans.extend(formatter.inline_code_spans(text));
        self.ignore_spans.extend(formatter.display_code_spans(text));
    }

    fn parse_context_text(&self, config: &ScanConfig, position: usize) -> String {
        if config.settings.defaults.add_context {
            self.context_at(position)
        } else {
            String::new()
        }
    }

    fn scan_standard_notes(
        &mut self,
        text: &str,
        config: &ScanConfig,
        formatter: &mut FormatConverter,
    ) {
        let matches: Vec<(String, usize, usize)> = config
            .note_regexp
            .captures_iter(text)
            .filter_map(|caps| {
                caps.get(1).map(|group| {
                    (group.as_str().to_string(), group.end(), caps.get(0).unwrap().start())
                })
            })
            .collect();
        for (note_text, position, match_start) in matches {
            let parsed = {
                let context_text = self.parse_context_text(config, match_start);
                let ctx = ParseContext {
                    deck: &self.target_deck,
                    url: &self.url,
                    frozen_fields: &self.frozen_fields,
                    context: &context_text,
                };
                StandardNote { text: &note_text }.parse(config, formatter, &ctx)
            };
            match parsed {
                Ok(parsed) => {
                    self.route(parsed, position, SyntaxKind::Standard, config);
                }
                Err(error) => {
                    warn!("Skipping note in {}: {}", self.path.display(), error);
                }
            }
        }
    }

    fn scan_inline_notes(
        &mut self,
        text: &str,
        config: &ScanConfig,
        formatter: &mut FormatConverter,
    ) {
        let matches: Vec<(String, usize, usize)> = config
            .inline_regexp
            .captures_iter(text)
            .filter_map(|caps| {
                caps.get(1).map(|group| {
                    (group.as_str().to_string(), group.end(), caps.get(0).unwrap().start())
                })
            })
            .collect();
        for (note_text, position, match_start) in matches {
            let parsed = {
                let context_text = self.parse_context_text(config, match_start);
                let ctx = ParseContext {
                    deck: &self.target_deck,
                    url: &self.url,
                    frozen_fields: &self.frozen_fields,
                    context: &context_text,
                };
                InlineNote { text: &note_text }.parse(config, formatter, &ctx)
            };
            match parsed {
                Ok(parsed) => {
                    self.route(parsed, position, SyntaxKind::Inline, config);
                }
                Err(error) => {
                    warn!("Skipping inline note in {}: {}", self.path.display(), error);
                }
            }
        }
    }

    /// Run one configured pattern over the document, in four passes:
    /// (tags+id), (id), (tags), (neither). Each accepted match reserves its
    /// span so later passes cannot re-claim the same text.
    fn search(
        &mut self,
        note_type: &str,
        pattern: &str,
        text: &str,
        config: &ScanConfig,
        formatter: &mut FormatConverter,
    ) -> Result<(), MdankiError> {
        for (search_id, search_tags) in [(true, true), (true, false), (false, true), (false, false)]
        {
            let tag_str = if search_tags { TAG_REGEXP_STR } else { "" };
            let id_str = if search_id { ID_REGEXP_STR } else { "" };
            let regexp = Regex::new(&format!("(?m){}{}{}", pattern, tag_str, id_str))?;
            let mut accepted: Vec<(usize, usize)> = Vec::new();
            for caps in regexp.captures_iter(text) {
                let whole = caps.get(0).unwrap();
                let span = (whole.start(), whole.end());
                if contained_in(span, &self.ignore_spans) || contained_in(span, &accepted) {
                    continue;
                }
                let position = whole.end();
                let parsed = {
                    let context_text = self.parse_context_text(config, whole.start());
                    let ctx = ParseContext {
                        deck: &self.target_deck,
                        url: &self.url,
                        frozen_fields: &self.frozen_fields,
                        context: &context_text,
                    };
                    PatternNote { captures: caps, note_type, search_tags, search_id }
                        .parse(config, formatter, &ctx)
                };
                match parsed {
                    Ok(parsed) => {
                        if self.route(parsed, position, SyntaxKind::Pattern, config) {
                            accepted.push(span);
                        }
                    }
                    Err(error) => {
                        warn!("Skipping {} match in {}: {}", note_type, self.path.display(), error);
                    }
                }
            }
            self.ignore_spans.extend(accepted);
        }
        Ok(())
    }

    fn scan_deletions(&mut self, text: &str, config: &ScanConfig) {
        for caps in config.delete_regexp.captures_iter(text) {
            if let Ok(id) = caps[1].parse() {
                self.notes_to_delete.push(id);
            }
        }
    }

    /// Sort a parsed note into the add / edit / delete sets. Returns whether
    /// the match's span should stay reserved.
    fn route(
        &mut self,
        parsed: ParsedNote,
        position: usize,
        kind: SyntaxKind,
        config: &ScanConfig,
    ) -> bool {
        match parsed {
            ParsedNote::Record { mut note, id: None } => {
                note.tags.extend(self.global_tags.iter().cloned());
                match kind {
                    SyntaxKind::Standard => {
                        self.notes_to_add.push(note);
                        self.id_indexes.push(position);
                    }
                    SyntaxKind::Inline => {
                        self.inline_notes_to_add.push(note);
                        self.inline_id_indexes.push(position);
                    }
                    SyntaxKind::Pattern => {
                        self.regex_notes_to_add.push(note);
                        self.regex_id_indexes.push(position);
                    }
                }
                true
            }
            ParsedNote::Record { note, id: Some(id) } => {
                if config.existing_ids.contains(&id) {
                    self.notes_to_edit.push((note, id));
                } else {
                    // Stale or foreign identifier: neither added nor edited.
                    warn!(
                        "Note with id {} in file {} does not exist in Anki",
                        id,
                        self.path.display()
                    );
                }
                true
            }
            ParsedNote::Deletion { id } => {
                self.notes_to_delete.push(id);
                true
            }
            ParsedNote::Discard => {
                info!("Discarding a match without cloze content in {}", self.path.display());
                false
            }
        }
    }

    /// Every note queued for addition, standard then inline then pattern,
    /// the order the store's returned identifiers follow.
    pub fn all_notes_to_add(&self) -> impl Iterator<Item = &NoteRecord> {
        self.notes_to_add
            .iter()
            .chain(self.inline_notes_to_add.iter())
            .chain(self.regex_notes_to_add.iter())
    }

    pub fn add_count(&self) -> usize {
        self.notes_to_add.len() + self.inline_notes_to_add.len() + self.regex_notes_to_add.len()
    }

    /// Insert the identifiers returned by the store at their recorded
    /// offsets, then collapse the blank-line artifacts the insertion can
    /// leave behind.
    pub fn write_ids(&mut self, comment: bool) {
        let mut inserts: Vec<(usize, String)> = Vec::new();
        for (index, &position) in self.id_indexes.iter().enumerate() {
            if let Some(Some(id)) = self.note_ids.get(index) {
                inserts.push((position, id_to_str(*id, false, comment)));
            }
        }
        let offset = self.notes_to_add.len();
        for (index, &position) in self.inline_id_indexes.iter().enumerate() {
            if let Some(Some(id)) = self.note_ids.get(index + offset) {
                inserts.push((position, id_to_str(*id, true, comment)));
            }
        }
        let offset = offset + self.inline_notes_to_add.len();
        for (index, &position) in self.regex_id_indexes.iter().enumerate() {
            if let Some(Some(id)) = self.note_ids.get(index + offset) {
                inserts.push((position, format!("\n{}", id_to_str(*id, false, comment))));
            }
        }
        self.text = string_insert(&self.text, inserts);
        self.fix_newline_ids();
    }

    /// `\n\nID: ...` left by an own-line insertion after a blank line
    /// collapses to a single newline.
    fn fix_newline_ids(&mut self) {
        let double_regexp =
            Regex::new(r"(?:\r\n|\r|\n)((?:\r\n|\r|\n)(?:<!--)?ID: \d+)").unwrap();
        self.text = double_regexp.replace_all(&self.text, "${1}").into_owned();
    }

    /// Strip processed deletion markers from the document text.
    pub fn remove_empties(&mut self, config: &ScanConfig) {
        self.text = config.empty_regexp.replace_all(&self.text, "").into_owned();
        self.text = config.inline_empty_regexp.replace_all(&self.text, "").into_owned();
        self.text = config.delete_regexp.replace_all(&self.text, "").into_owned();
    }

    pub fn changed(&self) -> bool {
        self.text != self.original
    }
}

fn id_to_str(identifier: i64, inline: bool, comment: bool) -> String {
    let mut result = format!("ID: {}", identifier);
    if comment {
        result = format!("<!--{}-->", result);
    }
    if inline {
        result.push(' ');
    } else {
        result.push('\n');
    }
    result
}

fn file_url(vault_name: &str, vault_relative: &Path) -> String {
    format!(
        "obsidian://open?vault={}&file={}",
        urlencoding::encode(vault_name),
        urlencoding::encode(&vault_relative.to_string_lossy())
    )
}

/// Span tuples of every match of `regexp` in `text`.
pub(crate) fn spans(regexp: &Regex, text: &str) -> Vec<(usize, usize)> {
    regexp.find_iter(text).map(|found| (found.start(), found.end())).collect()
}

/// Whether `span` sits inside any of `spans`, with one character of leeway
/// on both ends. The leeway tolerates off-by-one boundary artifacts from
/// the regex matches and is intentional.
pub(crate) fn contained_in(span: (usize, usize), spans: &[(usize, usize)]) -> bool {
    spans.iter().any(|&(start, end)| span.0 + 1 >= start && span.1 <= end + 1)
}

/// Insert strings at the given original-text offsets in one ascending pass,
/// tracking the cumulative length delta so every insertion lands adjacent
/// to its own match no matter how long the earlier insertions were.
pub(crate) fn string_insert(text: &str, mut position_inserts: Vec<(usize, String)>) -> String {
    position_inserts.sort_by_key(|&(position, _)| position);
    let mut result = text.to_string();
    let mut offset = 0;
    for (position, insert_str) in position_inserts {
        result.insert_str(position + offset, &insert_str);
        offset += insert_str.len();
    }
    result
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::{
        config::Settings,
        core::FieldsDict,
    };

    fn fields_dict() -> FieldsDict {
        let mut dict = FieldsDict::new();
        dict.insert("Basic".to_string(), vec!["Front".to_string(), "Back".to_string()]);
        dict.insert("Cloze".to_string(), vec!["Text".to_string(), "Extra".to_string()]);
        dict
    }

    fn config() -> ScanConfig {
        ScanConfig::new(Settings::new(), fields_dict(), HashSet::from([1, 2, 3])).unwrap()
    }

    fn scanned(text: &str, config: &ScanConfig) -> SourceDocument {
        let mut doc = SourceDocument::new(
            PathBuf::from("/vault/test.md"),
            PathBuf::from("test.md"),
            text.to_string(),
            config,
        );
        doc.scan(config).unwrap();
        doc
    }

    #[test]
    fn string_insert_tracks_cumulative_offsets() {
        let out = string_insert("hello", vec![(5, " beep".to_string()), (0, "hi ".to_string()), (3, "!".to_string())]);
        assert_eq!(out, "hi hel!lo beep");
    }

    #[test]
    fn containment_has_one_char_leeway() {
        let spans = vec![(10, 20)];
        assert!(contained_in((9, 21), &spans));
        assert!(contained_in((10, 20), &spans));
        assert!(!contained_in((8, 20), &spans));
        assert!(!contained_in((10, 22), &spans));
    }

    #[test]
    fn scan_classifies_adds_edits_and_deletes() {
        let config = config();
        let text = "START\nBasic\nFront: new note\nEND\n\n\
                    START\nBasic\nFront: old note\n<!--ID: 2-->\nEND\n\n\
                    DELETE\nID: 3\n";
        let doc = scanned(text, &config);
        assert_eq!(doc.notes_to_add.len(), 1);
        assert_eq!(doc.notes_to_edit.len(), 1);
        assert_eq!(doc.notes_to_edit[0].1, 2);
        assert_eq!(doc.notes_to_delete, vec![3]);
    }

    #[test]
    fn unknown_identifier_is_neither_added_nor_edited() {
        let config = config();
        let text = "START\nBasic\nFront: stale\n<!--ID: 999-->\nEND\n";
        let doc = scanned(text, &config);
        assert!(doc.notes_to_add.is_empty());
        assert!(doc.notes_to_edit.is_empty());
        assert!(doc.notes_to_delete.is_empty());
    }

    #[test]
    fn deck_and_tag_lines_override_defaults() {
        let config = config();
        let text = "TARGET DECK: Deep Work\nFILE TAGS: focus study\n\n\
                    START\nBasic\nFront: hi\nEND\n";
        let doc = scanned(text, &config);
        assert_eq!(doc.target_deck, "Deep Work");
        assert_eq!(doc.notes_to_add[0].deck_name, "Deep Work");
        assert!(doc.notes_to_add[0].tags.contains(&"focus".to_string()));
        assert!(doc.notes_to_add[0].tags.contains(&"study".to_string()));
    }

    #[test]
    fn frozen_fields_append_to_every_new_note_of_the_type() {
        let config = config();
        let text = "FROZEN - Basic:\nBack: (from the frozen block)\n\n\
                    START\nBasic\nFront: hi\nBack: there\nEND\n";
        let doc = scanned(text, &config);
        assert!(doc.notes_to_add[0].fields["Back"].contains("(from the frozen block)"));
    }

    #[test]
    fn write_ids_places_each_identifier_adjacent_to_its_note() {
        let config = config();
        let text = "START\nBasic\nFront: one\nEND\n\
                    START\nBasic\nFront: two\nEND\n\
                    START\nBasic\nFront: three\nEND\n";
        let mut doc = scanned(text, &config);
        assert_eq!(doc.add_count(), 3);
        // Differing digit lengths exercise the offset delta tracking.
        doc.note_ids = vec![Some(7), Some(1500000), Some(42)];
        doc.write_ids(false);
        let expected = "START\nBasic\nFront: one\nID: 7\nEND\n\
                        START\nBasic\nFront: two\nID: 1500000\nEND\n\
                        START\nBasic\nFront: three\nID: 42\nEND\n";
        assert_eq!(doc.text, expected);
    }

    #[test]
    fn write_ids_skips_failed_adds_but_keeps_positions() {
        let config = config();
        let text = "START\nBasic\nFront: one\nEND\n\
                    START\nBasic\nFront: two\nEND\n";
        let mut doc = scanned(text, &config);
        doc.note_ids = vec![None, Some(11)];
        doc.write_ids(false);
        assert!(!doc.text.contains("ID: 7"));
        assert_eq!(
            doc.text,
            "START\nBasic\nFront: one\nEND\nSTART\nBasic\nFront: two\nID: 11\nEND\n"
        );
    }

    #[test]
    fn inline_ids_are_written_inside_the_markers() {
        let config = config();
        let text = "STARTI [Basic] q Back: a ENDI\n";
        let mut doc = scanned(text, &config);
        assert_eq!(doc.inline_notes_to_add.len(), 1);
        doc.note_ids = vec![Some(99)];
        doc.write_ids(true);
        assert_eq!(doc.text, "STARTI [Basic] q Back: a <!--ID: 99--> ENDI\n");
    }

    #[test]
    fn deletion_markers_are_removed_after_processing() {
        let config = config();
        let text = "keep this\n\nDELETE\nID: 5\n\nand this\n";
        let mut doc = scanned(text, &config);
        assert_eq!(doc.notes_to_delete, vec![5]);
        doc.remove_empties(&config);
        assert!(!doc.text.contains("DELETE"));
        assert!(!doc.text.contains("ID: 5"));
        assert!(doc.text.contains("keep this"));
        assert!(doc.text.contains("and this"));
    }

    #[test]
    fn bare_identifier_block_is_a_deletion_and_gets_stripped() {
        let config = config();
        let text = "START\nID: 2\nEND\n";
        let mut doc = scanned(text, &config);
        assert_eq!(doc.notes_to_delete, vec![2]);
        doc.remove_empties(&config);
        assert!(!doc.text.contains("ID: 2"));
    }

    #[test]
    fn pattern_search_respects_ignore_spans() {
        let mut settings = Settings::new();
        settings
            .custom_regexps
            .insert("Basic".to_string(), r"^Q: (.*)\nA: (.*)".to_string());
        let config = ScanConfig::new(settings, fields_dict(), HashSet::from([1])).unwrap();
        // The same Q/A shape inside a standard note must not be re-matched
        // by the pattern search.
        let text = "START\nBasic\nFront: something\nQ: inner\nA: nope\nEND\n\nQ: real\nA: yes\n";
        let doc = scanned(text, &config);
        assert_eq!(doc.notes_to_add.len(), 1);
        assert_eq!(doc.regex_notes_to_add.len(), 1);
        assert_eq!(doc.regex_notes_to_add[0].fields["Front"], "real");
    }

    #[test]
    fn discarded_cloze_match_releases_its_span() {
        let mut settings = Settings::new();
        settings.defaults.curly_cloze = true;
        // Cloze runs before Simple (sorted pattern order); Simple may then
        // claim what Cloze discarded.
        settings.custom_regexps.insert("Cloze".to_string(), r"^(.*) :: (.*)$".to_string());
        settings.custom_regexps.insert("Simple".to_string(), r"^(.*) :: (.*)$".to_string());
        let mut dict = fields_dict();
        dict.insert("Simple".to_string(), vec!["Front".to_string(), "Back".to_string()]);
        let config = ScanConfig::new(settings, dict, HashSet::new()).unwrap();
        let text = "plain question :: plain answer\n";
        let doc = scanned(text, &config);
        // No cloze braces anywhere: the Cloze pass discards, Simple claims.
        assert_eq!(doc.regex_notes_to_add.len(), 1);
        assert_eq!(doc.regex_notes_to_add[0].model_name, "Simple");
    }

    #[test]
    fn pattern_note_id_is_written_on_its_own_line() {
        let mut settings = Settings::new();
        settings.custom_regexps.insert("Basic".to_string(), r"^Q: (.*)\nA: (.*)".to_string());
        let config = ScanConfig::new(settings, fields_dict(), HashSet::new()).unwrap();
        let text = "Q: why\nA: because\n";
        let mut doc = scanned(text, &config);
        assert_eq!(doc.regex_notes_to_add.len(), 1);
        doc.note_ids = vec![Some(1234)];
        doc.write_ids(false);
        assert_eq!(doc.text, "Q: why\nA: because\nID: 1234\n\n");
    }

    #[test]
    fn heading_context_builds_a_breadcrumb() {
        let mut settings = Settings::new();
        settings.defaults.add_context = true;
        let config = ScanConfig::new(settings, fields_dict(), HashSet::new()).unwrap();
        let text = "# Biology\n## Cells\n\nSTART\nBasic\nFront: hi\nEND\n";
        let doc = scanned(text, &config);
        assert!(doc.notes_to_add[0].fields["Front"].contains("test.md > Biology > Cells"));
    }
}
