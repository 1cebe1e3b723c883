use std::{
    collections::{
        HashMap,
        HashSet,
    },
    time::Duration,
};

use log::info;
use reqwest::Client;
use serde::Serialize;
use serde_json::{
    json,
    Value,
};
use tokio::{
    task,
    time::sleep,
};

use crate::core::{
    FieldsDict,
    MdankiError,
    NoteRecord,
};

pub const ANKI_PORT: u16 = 8765;

/// One AnkiConnect request. Builders below only construct the value; actual
/// traffic happens when a (usually `multi`-wrapped) request is invoked.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub action: String,
    pub version: u32,
    pub params: Value,
}

pub fn request(action: &str, params: Value) -> Request {
    Request { action: action.to_string(), version: 6, params }
}

pub fn multi(actions: Vec<Request>) -> Request {
    request("multi", json!({ "actions": actions }))
}

pub fn add_note(note: &NoteRecord) -> Request {
    request("addNote", json!({ "note": note }))
}

pub fn delete_notes(note_ids: &[i64]) -> Request {
    request("deleteNotes", json!({ "notes": note_ids }))
}

pub fn update_note_fields(id: i64, fields: &HashMap<String, String>) -> Request {
    request("updateNoteFields", json!({ "note": { "id": id, "fields": fields } }))
}

pub fn notes_info(note_ids: &[i64]) -> Request {
    request("notesInfo", json!({ "notes": note_ids }))
}

pub fn change_deck(card_ids: &[i64], deck: &str) -> Request {
    request("changeDeck", json!({ "cards": card_ids, "deck": deck }))
}

pub fn remove_tags(note_ids: &[i64], tags: &str) -> Request {
    request("removeTags", json!({ "notes": note_ids, "tags": tags }))
}

pub fn add_tags(note_ids: &[i64], tags: &str) -> Request {
    request("addTags", json!({ "notes": note_ids, "tags": tags }))
}

pub fn get_tags() -> Request {
    request("getTags", json!({}))
}

pub fn store_media_file(filename: &str, path: &str) -> Request {
    request("storeMediaFile", json!({ "filename": filename, "path": path }))
}

/// Shared client with a request timeout; AnkiConnect answers locally, so a
/// stuck request means the store is gone.
pub fn http_client() -> Result<Client, MdankiError> {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| MdankiError::Custom(format!("HTTP client build failed: {}", e)))
}

/// Validate one `{error, result}` envelope and hand back the result.
/// Anything shaped differently is a protocol violation, not data.
pub fn parse_reply(reply: Value) -> Result<Value, MdankiError> {
    let object = reply
        .as_object()
        .ok_or_else(|| MdankiError::Protocol("response is not an object".to_string()))?;
    if object.len() != 2 {
        return Err(MdankiError::Protocol(
            "response has an unexpected number of fields".to_string(),
        ));
    }
    if !object.contains_key("error") {
        return Err(MdankiError::Protocol(
            "response is missing required error field".to_string(),
        ));
    }
    let result = object
        .get("result")
        .ok_or_else(|| MdankiError::Protocol("response is missing required result field".to_string()))?;
    match &object["error"] {
        Value::Null => Ok(result.clone()),
        Value::String(message) => Err(MdankiError::Anki(message.clone())),
        other => Err(MdankiError::Anki(other.to_string())),
    }
}

/// Unwrap the items of a `multi` result: every item is itself an
/// `{error, result}` envelope, and one item's error must not sink its
/// siblings, so failures come back as per-item `Err`. Items may themselves
/// be `multi` results, and callers can apply this recursively.
pub fn parse_multi_result(result: Value) -> Result<Vec<Result<Value, MdankiError>>, MdankiError> {
    let Value::Array(items) = result else {
        return Err(MdankiError::Protocol("multi result is not an array".to_string()));
    };
    Ok(items.into_iter().map(parse_reply).collect())
}

/// `parse_multi_result` over a still-enveloped `multi` reply.
pub fn parse_multi_reply(reply: Value) -> Result<Vec<Result<Value, MdankiError>>, MdankiError> {
    parse_multi_result(parse_reply(reply)?)
}

pub async fn invoke(client: &Client, action: &str, params: Value) -> Result<Value, MdankiError> {
    let body = json!({ "action": action, "version": 6, "params": params });
    let reply: Value = client
        .post(format!("http://127.0.0.1:{}", ANKI_PORT))
        .json(&body)
        .send()
        .await?
        .json()
        .await?;
    parse_reply(reply)
}

pub async fn invoke_request(client: &Client, req: &Request) -> Result<Value, MdankiError> {
    invoke(client, &req.action, req.params.clone()).await
}

/// Used as the connectivity preflight.
pub async fn get_version(client: &Client) -> Result<u32, MdankiError> {
    let result = invoke(client, "version", json!({})).await?;
    Ok(serde_json::from_value(result)?)
}

/// Wait for AnkiConnect to come up, retrying a bounded number of times.
pub async fn wait_awake(client: &Client, wait_time: u64, max_attempts: u32) -> bool {
    for attempt in 1..=max_attempts {
        match get_version(client).await {
            Ok(version) => {
                info!("AnkiConnect is online. Version: {}", version);
                return true;
            }
            Err(err) => {
                info!(
                    "AnkiConnect attempt {} of {} failed: {}. Retrying in {} seconds...",
                    attempt, max_attempts, err, wait_time
                );
                if attempt < max_attempts {
                    sleep(Duration::from_secs(wait_time)).await;
                }
            }
        }
    }
    false
}

pub async fn get_note_types(client: &Client) -> Result<Vec<String>, MdankiError> {
    let result = invoke(client, "modelNames", json!({})).await?;
    Ok(serde_json::from_value(result)?)
}

/// The authoritative note-type -> ordered-field-names mapping, fetched with
/// one `modelFieldNames` call per note type.
pub async fn fetch_fields_dict(client: &Client) -> Result<FieldsDict, MdankiError> {
    let note_types = get_note_types(client).await?;

    let handles: Vec<_> = note_types
        .into_iter()
        .map(|note_type| {
            let client = client.clone();
            task::spawn(async move {
                let result = invoke(
                    &client,
                    "modelFieldNames",
                    json!({ "modelName": note_type }),
                )
                .await?;
                let fields: Vec<String> = serde_json::from_value(result)?;
                Ok::<(String, Vec<String>), MdankiError>((note_type, fields))
            })
        })
        .collect();

    let mut fields_dict = FieldsDict::new();
    for joined in futures::future::join_all(handles).await {
        let (note_type, fields) =
            joined.map_err(|e| MdankiError::Custom(format!("task join failed: {}", e)))??;
        fields_dict.insert(note_type, fields);
    }
    Ok(fields_dict)
}

/// The universe of identifiers the store knows about.
pub async fn fetch_existing_ids(client: &Client) -> Result<HashSet<i64>, MdankiError> {
    let result = invoke(client, "findNotes", json!({ "query": "" })).await?;
    Ok(serde_json::from_value(result)?)
}
