use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

use log::{
    info,
    warn,
};
use serde_json::Value;
use tokio::task;

use crate::{
    anki::{
        self,
        api,
        Request,
    },
    config::{
        ScanConfig,
        Settings,
    },
    core::MdankiError,
    document::SourceDocument,
    persistence::{
        self,
        SyncCache,
    },
};

const SUPPORTED_EXTS: [&str; 2] = ["md", "txt"];
const PREFLIGHT_WAIT_SECS: u64 = 2;
const PREFLIGHT_MAX_ATTEMPTS: u32 = 5;

/// What one run did, for the final console summary.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub documents_scanned: usize,
    pub documents_skipped: usize,
    pub notes_added: usize,
    pub failed_adds: usize,
    pub notes_edited: usize,
    pub notes_deleted: usize,
    pub media_uploaded: usize,
}

/// One full sync run: preflight, scan changed documents, exchange two
/// batched `multi` requests with the store, write identifiers back, persist
/// the cache. Connectivity failure before the first exchange is applied
/// aborts without touching any document or the cache.
pub async fn run_sync(
    vault_root: &Path,
    recurse: bool,
    mut settings: Settings,
    cache_path: &Path,
) -> Result<SyncReport, MdankiError> {
    let client = anki::http_client()?;
    if !anki::wait_awake(&client, PREFLIGHT_WAIT_SECS, PREFLIGHT_MAX_ATTEMPTS).await {
        return Err(MdankiError::Custom(
            "AnkiConnect is unreachable; nothing was synced".to_string(),
        ));
    }

    let fields_dict = anki::fetch_fields_dict(&client).await?;
    let existing_ids = anki::fetch_existing_ids(&client).await?;
    let mut note_types: Vec<String> = fields_dict.keys().cloned().collect();
    note_types.sort();
    settings.regenerate_regexp_section(&note_types);
    let config = ScanConfig::new(settings, fields_dict, existing_ids)?;

    let mut cache = SyncCache::load(cache_path);
    cache.fields_dict = config.fields_dict.clone();
    let mut report = SyncReport::default();

    let paths = enumerate_documents(vault_root, recurse)?;
    info!("Found {} documents under {}", paths.len(), vault_root.display());

    let mut documents = Vec::new();
    for (path, contents) in read_documents(paths).await? {
        let key = path.to_string_lossy().into_owned();
        if is_unchanged(&cache, &key, &contents) {
            info!("Skipping {} as it is unchanged since the last sync", path.display());
            report.documents_skipped += 1;
            continue;
        }
        let vault_relative = path.strip_prefix(vault_root).unwrap_or(&path).to_path_buf();
        let mut document = SourceDocument::new(path, vault_relative, contents, &config);
        document.scan(&config)?;
        report.documents_scanned += 1;
        documents.push(document);
    }

    if documents.is_empty() {
        info!("No documents changed since the last sync");
        cache.save(cache_path)?;
        return Ok(report);
    }

    let media_jobs = collect_media_jobs(&documents, vault_root, &mut cache);

    info!(
        "Phase 1: {} adds, {} edits, {} deletions, {} media uploads across {} documents",
        documents.iter().map(SourceDocument::add_count).sum::<usize>(),
        documents.iter().map(|document| document.notes_to_edit.len()).sum::<usize>(),
        documents.iter().map(|document| document.notes_to_delete.len()).sum::<usize>(),
        media_jobs.len(),
        documents.len()
    );
    let phase_1 = build_phase_1(&documents, &media_jobs);
    let reply = anki::invoke_request(&client, &phase_1).await?;
    let store_tags = apply_phase_1(&mut documents, reply, &mut report)?;

    for document in &mut documents {
        document.write_ids(config.settings.defaults.comment);
        document.remove_empties(&config);
        if document.changed() {
            persistence::write_safe(&document.path, &document.text)?;
            info!("Updated {}", document.path.display());
        }
        cache
            .file_hashes
            .insert(document.path.to_string_lossy().into_owned(), persistence::hash_text(&document.text));
    }

    info!("Phase 2: deck moves and tag reconciliation");
    let phase_2 = build_phase_2(&documents, &store_tags);
    let reply = anki::invoke_request(&client, &phase_2).await?;
    apply_phase_2(&documents, reply)?;

    cache.save(cache_path)?;
    Ok(report)
}

/// A document is re-scanned whenever its current hash differs from the
/// cached hash, or it has no cached hash.
fn is_unchanged(cache: &SyncCache, key: &str, contents: &str) -> bool {
    cache.file_hashes.get(key).is_some_and(|hash| *hash == persistence::hash_text(contents))
}

/// All supported documents under `root`, digit-aware sorted so `file2`
/// comes before `file10`. Dotfiles and dot-directories are skipped.
pub(crate) fn enumerate_documents(root: &Path, recurse: bool) -> Result<Vec<PathBuf>, MdankiError> {
    let mut found = Vec::new();
    if root.is_file() {
        found.push(root.to_path_buf());
    } else {
        collect_documents(root, recurse, &mut found)?;
    }
    found.sort_by_key(|path| natural_key(&path.to_string_lossy()));
    Ok(found)
}

fn collect_documents(dir: &Path, recurse: bool, found: &mut Vec<PathBuf>) -> Result<(), MdankiError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            if recurse {
                collect_documents(&path, recurse, found)?;
            }
        } else if path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| SUPPORTED_EXTS.contains(&ext.as_str()))
        {
            found.push(path);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum KeyPart {
    Number(u64),
    Text(String),
}

/// Sort key that compares digit runs numerically and the rest
/// case-insensitively.
fn natural_key(name: &str) -> Vec<KeyPart> {
    let mut parts = Vec::new();
    let mut digits = String::new();
    let mut text = String::new();
    for ch in name.chars() {
        if ch.is_ascii_digit() {
            if !text.is_empty() {
                parts.push(KeyPart::Text(std::mem::take(&mut text)));
            }
            digits.push(ch);
        } else {
            if !digits.is_empty() {
                parts.push(number_part(std::mem::take(&mut digits)));
            }
            text.extend(ch.to_lowercase());
        }
    }
    if !digits.is_empty() {
        parts.push(number_part(digits));
    }
    if !text.is_empty() {
        parts.push(KeyPart::Text(text));
    }
    parts
}

fn number_part(digits: String) -> KeyPart {
    digits.parse().map_or(KeyPart::Text(digits), KeyPart::Number)
}

/// Document reads are independent of each other, so they run concurrently.
async fn read_documents(paths: Vec<PathBuf>) -> Result<Vec<(PathBuf, String)>, MdankiError> {
    let handles: Vec<_> = paths
        .into_iter()
        .map(|path| {
            task::spawn(async move {
                let contents = tokio::fs::read_to_string(&path).await?;
                Ok::<(PathBuf, String), MdankiError>((path, contents))
            })
        })
        .collect();
    let mut documents = Vec::new();
    for joined in futures::future::join_all(handles).await {
        documents
            .push(joined.map_err(|e| MdankiError::Custom(format!("task join failed: {}", e)))??);
    }
    Ok(documents)
}

struct MediaJob {
    filename: String,
    path: PathBuf,
}

/// Media files to upload this run, deduplicated by filename: a file
/// referenced by two documents uploads once, and files already in the
/// cross-run set are not uploaded again. The set is extended immediately so
/// later documents in this run see earlier claims.
fn collect_media_jobs(
    documents: &[SourceDocument],
    vault_root: &Path,
    cache: &mut SyncCache,
) -> Vec<MediaJob> {
    let mut jobs = Vec::new();
    for document in documents {
        let document_dir = document.path.parent().unwrap_or(vault_root);
        let mut filenames: Vec<&String> = document.detected_media.keys().collect();
        filenames.sort();
        for filename in filenames {
            if cache.added_media.contains(filename.as_str()) {
                continue;
            }
            cache.added_media.insert(filename.clone());
            let written = &document.detected_media[filename];
            jobs.push(MediaJob {
                filename: filename.clone(),
                path: resolve_media_path(document_dir, vault_root, written),
            });
        }
    }
    jobs
}

/// Paths in embeds are written relative to the document or to the vault
/// root; try the document's directory first.
fn resolve_media_path(document_dir: &Path, vault_root: &Path, written: &str) -> PathBuf {
    let written_path = Path::new(written);
    if written_path.is_absolute() {
        return written_path.to_path_buf();
    }
    let beside = document_dir.join(written_path);
    if beside.exists() {
        beside
    } else {
        vault_root.join(written_path)
    }
}

/// The first aggregated exchange: the global tag list, the media uploads,
/// then one sub-batch per document of adds, note info, field updates and
/// deletions.
fn build_phase_1(documents: &[SourceDocument], media_jobs: &[MediaJob]) -> Request {
    let mut actions = vec![api::get_tags()];
    actions.push(api::multi(
        media_jobs
            .iter()
            .map(|job| api::store_media_file(&job.filename, &job.path.to_string_lossy()))
            .collect(),
    ));
    for document in documents {
        let adds = document.all_notes_to_add().map(api::add_note).collect();
        let edit_ids: Vec<i64> = document.notes_to_edit.iter().map(|(_, id)| *id).collect();
        let updates = document
            .notes_to_edit
            .iter()
            .map(|(note, id)| api::update_note_fields(*id, &note.fields))
            .collect();
        actions.push(api::multi(vec![
            api::multi(adds),
            api::notes_info(&edit_ids),
            api::multi(updates),
            api::delete_notes(&document.notes_to_delete),
        ]));
    }
    api::multi(actions)
}

/// Distribute the phase 1 reply back onto the documents. Identifier
/// assignment is strictly positional: the Nth add reply in a document's
/// batch belongs to the Nth note in that document's add order. A failed
/// item is logged and yields no identifier; siblings proceed.
fn apply_phase_1(
    documents: &mut [SourceDocument],
    reply: Value,
    report: &mut SyncReport,
) -> Result<Vec<String>, MdankiError> {
    let mut items = anki::parse_multi_result(reply)?.into_iter();
    let (Some(tags_item), Some(media_item)) = (items.next(), items.next()) else {
        return Err(MdankiError::Protocol(
            "phase 1 reply has an unexpected number of items".to_string(),
        ));
    };
    if items.len() != documents.len() {
        return Err(MdankiError::Protocol(
            "phase 1 reply has an unexpected number of items".to_string(),
        ));
    }

    let store_tags = match tags_item {
        Ok(value) => serde_json::from_value(value)?,
        Err(error) => {
            warn!("Fetching the tag list failed: {}", error);
            Vec::new()
        }
    };

    match media_item {
        Ok(value) => {
            for item in anki::parse_multi_result(value)? {
                match item {
                    Ok(_) => report.media_uploaded += 1,
                    Err(error) => warn!("Media upload failed: {}", error),
                }
            }
        }
        Err(error) => warn!("Media upload batch failed: {}", error),
    }

    for (document, item) in documents.iter_mut().zip(items) {
        let value = match item {
            Ok(value) => value,
            Err(error) => {
                warn!("Store batch failed for {}: {}", document.path.display(), error);
                continue;
            }
        };
        let parts: [Result<Value, MdankiError>; 4] =
            anki::parse_multi_result(value)?.try_into().map_err(|_| {
                MdankiError::Protocol(
                    "document batch reply has an unexpected number of items".to_string(),
                )
            })?;
        let [adds_item, info_item, updates_item, deletes_item] = parts;

        match adds_item {
            Ok(value) => {
                document.note_ids = anki::parse_multi_result(value)?
                    .into_iter()
                    .map(|add| match add {
                        Ok(value) => value.as_i64(),
                        Err(error) => {
                            warn!("Adding a note from {} failed: {}", document.path.display(), error);
                            None
                        }
                    })
                    .collect();
                report.notes_added += document.note_ids.iter().flatten().count();
                report.failed_adds +=
                    document.note_ids.iter().filter(|id| id.is_none()).count();
            }
            Err(error) => warn!("Add batch failed for {}: {}", document.path.display(), error),
        }

        match info_item {
            Ok(Value::Array(infos)) => {
                for info in infos {
                    if let Some(cards) = info.get("cards").and_then(Value::as_array) {
                        document.card_ids.extend(cards.iter().filter_map(Value::as_i64));
                    }
                }
            }
            Ok(_) => {
                return Err(MdankiError::Protocol("note info reply is not an array".to_string()))
            }
            Err(error) => {
                warn!("Fetching card ids failed for {}: {}", document.path.display(), error)
            }
        }

        match updates_item {
            Ok(value) => {
                for update in anki::parse_multi_result(value)? {
                    match update {
                        Ok(_) => report.notes_edited += 1,
                        Err(error) => {
                            warn!("Updating a note in {} failed: {}", document.path.display(), error)
                        }
                    }
                }
            }
            Err(error) => warn!("Update batch failed for {}: {}", document.path.display(), error),
        }

        match deletes_item {
            Ok(_) => report.notes_deleted += document.notes_to_delete.len(),
            Err(error) => {
                warn!("Deleting notes from {} failed: {}", document.path.display(), error)
            }
        }
    }
    Ok(store_tags)
}

/// The second aggregated exchange, dependent on phase 1's card ids and tag
/// list: move each document's cards to its target deck, clear the store's
/// tag set from its edited notes, then re-add each note's own tags plus the
/// document's global tags. Never mutates documents.
fn build_phase_2(documents: &[SourceDocument], store_tags: &[String]) -> Request {
    let joined_store_tags = store_tags.join(" ");
    let mut actions = Vec::new();
    for document in documents {
        let edit_ids: Vec<i64> = document.notes_to_edit.iter().map(|(_, id)| *id).collect();
        let add_tags = document
            .notes_to_edit
            .iter()
            .map(|(note, id)| {
                let mut tags = note.tags.clone();
                tags.extend(document.global_tags.iter().cloned());
                api::add_tags(&[*id], &tags.join(" "))
            })
            .collect();
        actions.push(api::multi(vec![
            api::change_deck(&document.card_ids, &document.target_deck),
            api::remove_tags(&edit_ids, &joined_store_tags),
            api::multi(add_tags),
        ]));
    }
    api::multi(actions)
}

fn apply_phase_2(documents: &[SourceDocument], reply: Value) -> Result<(), MdankiError> {
    for (document, item) in documents.iter().zip(anki::parse_multi_result(reply)?) {
        let value = match item {
            Ok(value) => value,
            Err(error) => {
                warn!("Deck/tag batch failed for {}: {}", document.path.display(), error);
                continue;
            }
        };
        for part in anki::parse_multi_result(value)? {
            if let Err(error) = part {
                warn!("Deck or tag update failed for {}: {}", document.path.display(), error);
            }
        }
    }
    Ok(())
}
