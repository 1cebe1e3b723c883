use std::{
    collections::{
        HashMap,
        HashSet,
    },
    fs,
    path::{
        Path,
        PathBuf,
    },
};

use log::info;
use md5::{
    Digest,
    Md5,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::core::{
    FieldsDict,
    MdankiError,
};

const APP_NAME: &str = "mdanki";
const CACHE_FILE: &str = "sync_cache.json";
const SETTINGS_FILE: &str = "settings.json";

pub fn get_app_data_dir() -> PathBuf {
    if let Some(data_dir) = dirs::data_local_dir() {
        let app_dir = data_dir.join(APP_NAME);
        let _ = fs::create_dir_all(&app_dir);
        app_dir
    } else {
        PathBuf::from(".")
    }
}

pub fn settings_path() -> PathBuf {
    get_app_data_dir().join(SETTINGS_FILE)
}

pub fn cache_path() -> PathBuf {
    get_app_data_dir().join(CACHE_FILE)
}

pub fn save_json<T: Serialize>(data: &T, path: &Path) -> Result<(), MdankiError> {
    let json = serde_json::to_string_pretty(data)?;
    fs::write(path, json)?;
    info!("Data saved to: {}", path.display());
    Ok(())
}

pub fn load_json<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T, MdankiError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

pub fn load_json_or_default<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> T {
    match load_json::<T>(path) {
        Ok(data) => data,
        Err(error) => {
            log::error!("Failed to load {}: {}. Using defaults.", path.display(), error);
            T::default()
        }
    }
}

/// Cross-run state: which documents were already synced (by content hash)
/// and which media files were already uploaded. Loaded at run start and
/// written back only after a successful store round-trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncCache {
    /// Document path -> MD5 hex of the content at the last successful sync.
    pub file_hashes: HashMap<String, String>,
    /// File names already stored in the store's media collection.
    pub added_media: HashSet<String>,
    /// Note type -> ordered field names, as of the last successful sync.
    pub fields_dict: FieldsDict,
}

impl SyncCache {
    pub fn load(path: &Path) -> Self {
        load_json_or_default(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), MdankiError> {
        save_json(self, path)
    }
}

/// MD5 hex digest of a document's content, the skip-unchanged gate.
pub fn hash_text(text: &str) -> String {
    hex::encode(Md5::digest(text.as_bytes()))
}

/// Atomic write: temp file in the same directory, then rename over the
/// original, so a failed write never leaves a half-written document.
pub fn write_safe(path: &Path, contents: &str) -> Result<(), MdankiError> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        assert_eq!(hash_text("hello"), hash_text("hello"));
        assert_ne!(hash_text("hello"), hash_text("hello!"));
        // 32 hex chars of MD5.
        assert_eq!(hash_text("hello").len(), 32);
    }

    #[test]
    fn cache_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut cache = SyncCache::default();
        cache.file_hashes.insert("a.md".to_string(), hash_text("abc"));
        cache.added_media.insert("img.png".to_string());
        cache
            .fields_dict
            .insert("Basic".to_string(), vec!["Front".to_string(), "Back".to_string()]);
        cache.save(&path).unwrap();

        let loaded = SyncCache::load(&path);
        assert_eq!(loaded.file_hashes["a.md"], hash_text("abc"));
        assert!(loaded.added_media.contains("img.png"));
        assert_eq!(loaded.fields_dict["Basic"], vec!["Front", "Back"]);
    }

    #[test]
    fn missing_cache_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SyncCache::load(&dir.path().join("nope.json"));
        assert!(cache.file_hashes.is_empty());
    }

    #[test]
    fn write_safe_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.md");
        fs::write(&path, "old").unwrap();
        write_safe(&path, "new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        assert!(!path.with_extension("md.tmp").exists());
    }
}
