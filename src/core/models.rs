use std::collections::HashMap;

use serde::{
    Deserialize,
    Serialize,
};

/// Note type name -> ordered field names, as reported by `modelFieldNames`.
pub type FieldsDict = HashMap<String, Vec<String>>;

/// Note type name -> field name -> fixed suffix text appended to every
/// new or edited note of that type in a document.
pub type FrozenFieldsDict = HashMap<String, HashMap<String, String>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteOptions {
    pub allow_duplicate: bool,
    pub duplicate_scope: String,
}

impl Default for NoteOptions {
    fn default() -> Self {
        NoteOptions { allow_duplicate: false, duplicate_scope: "deck".to_string() }
    }
}

/// One note payload in AnkiConnect's `addNote`/`updateNoteFields` shape.
///
/// `fields` carries every field of the note type's schema, empty string when
/// a field got no content. The schema's field list drives any ordered
/// traversal; the map itself matches fields by name, which is all the wire
/// protocol needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRecord {
    pub deck_name: String,
    pub model_name: String,
    pub fields: HashMap<String, String>,
    pub options: NoteOptions,
    pub tags: Vec<String>,
    pub audio: Vec<serde_json::Value>,
}

impl NoteRecord {
    /// Fresh record carrying only the run-wide marker tag.
    pub fn new(run_tag: &str) -> Self {
        NoteRecord {
            deck_name: String::new(),
            model_name: String::new(),
            fields: HashMap::new(),
            options: NoteOptions::default(),
            tags: vec![run_tag.to_string()],
            audio: Vec::new(),
        }
    }
}

/// Outcome of parsing one matched note span.
///
/// `Record` with `id: None` is a fresh add; with `Some(id)` an edit
/// candidate. `Deletion` is an explicit delete request. `Discard` is the
/// reserved outcome for a well-formed match that is not a valid note (e.g.
/// a cloze-capable type with no cloze markers anywhere in its fields):
/// dropped, never synced.
#[derive(Debug, Clone)]
pub enum ParsedNote {
    Record { note: NoteRecord, id: Option<i64> },
    Deletion { id: i64 },
    Discard,
}
