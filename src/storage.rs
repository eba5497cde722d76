//! Blob storage adapters.
//!
//! Blob names are `/`-separated paths relative to the storage root; a
//! "container" is just a name prefix. [`LocalStorage`] maps names onto a
//! directory tree, [`MemoryStorage`] keeps everything in process.

use std::{
    collections::BTreeMap,
    fs,
    path::{Component, Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info};
use walkdir::WalkDir;

use crate::{
    error::{PipelineError, Result},
    frame::Frame,
    io_utils::{SOURCE_DELIMITER, SOURCE_ENCODING, read_frame, resolve_encoding},
};

/// Sub-prefix that consumed extracts are moved into.
pub const HISTORY_PREFIX: &str = "history/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub name: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

pub trait BlobStorage {
    /// Every blob whose name starts with `prefix`, nested names included.
    fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>>;
    fn download(&self, name: &str) -> Result<Vec<u8>>;
    /// Writes `data` under `name`, replacing any existing blob.
    fn upload(&self, name: &str, data: &[u8], content_type: &str) -> Result<()>;
    /// Moves `name` to `<dest_prefix><file name>`, overwriting, and returns
    /// the new name.
    fn move_to(&self, name: &str, dest_prefix: &str) -> Result<String>;
    fn delete(&self, name: &str) -> Result<()>;

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.list(name)?.iter().any(|entry| entry.name == name))
    }
}

/// Ensures `prefix` ends with exactly one `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    format!("{}/", prefix.trim_end_matches('/'))
}

fn file_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Blob storage rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStorage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let valid = !name.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(PipelineError::Malformed(format!("Invalid blob name '{name}'")));
        }
        Ok(self.root.join(relative))
    }

    fn blob_name(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

impl BlobStorage for LocalStorage {
    fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = self.blob_name(entry.path()) else {
                continue;
            };
            if !name.starts_with(prefix) {
                continue;
            }
            let metadata = entry.metadata().map_err(std::io::Error::from)?;
            let last_modified = metadata.modified()?.into();
            entries.push(BlobEntry {
                name,
                last_modified,
                size: metadata.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn download(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        if !path.is_file() {
            return Err(PipelineError::BlobNotFound(name.to_string()));
        }
        Ok(fs::read(path)?)
    }

    fn upload(&self, name: &str, data: &[u8], content_type: &str) -> Result<()> {
        let path = self.path_for(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)?;
        debug!("Uploaded {} byte(s) to '{name}' ({content_type})", data.len());
        Ok(())
    }

    fn move_to(&self, name: &str, dest_prefix: &str) -> Result<String> {
        let source = self.path_for(name)?;
        if !source.is_file() {
            return Err(PipelineError::BlobNotFound(name.to_string()));
        }
        let target_name = format!("{}{}", normalize_prefix(dest_prefix), file_name(name));
        let target = self.path_for(&target_name)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&source, &target)?;
        Ok(target_name)
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        if !path.is_file() {
            return Err(PipelineError::BlobNotFound(name.to_string()));
        }
        fs::remove_file(path)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Vec<u8>,
    content_type: String,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    blobs: BTreeMap<String, StoredBlob>,
    clock: i64,
}

impl MemoryState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(self.clock)
    }
}

/// In-process blob storage. Every write advances a logical clock, so later
/// uploads always compare as newer.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> Result<T>) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| PipelineError::Malformed("memory storage lock poisoned".to_string()))?;
        f(&mut state)
    }

    pub fn content_type(&self, name: &str) -> Option<String> {
        self.with_state(|state| Ok(state.blobs.get(name).map(|b| b.content_type.clone())))
            .ok()
            .flatten()
    }

    pub fn names(&self) -> Vec<String> {
        self.with_state(|state| Ok(state.blobs.keys().cloned().collect()))
            .unwrap_or_default()
    }
}

impl BlobStorage for MemoryStorage {
    fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        self.with_state(|state| {
            Ok(state
                .blobs
                .range(prefix.to_string()..)
                .take_while(|(name, _)| name.starts_with(prefix))
                .map(|(name, blob)| BlobEntry {
                    name: name.clone(),
                    last_modified: blob.last_modified,
                    size: blob.data.len() as u64,
                })
                .collect())
        })
    }

    fn download(&self, name: &str) -> Result<Vec<u8>> {
        self.with_state(|state| {
            state
                .blobs
                .get(name)
                .map(|blob| blob.data.clone())
                .ok_or_else(|| PipelineError::BlobNotFound(name.to_string()))
        })
    }

    fn upload(&self, name: &str, data: &[u8], content_type: &str) -> Result<()> {
        self.with_state(|state| {
            let last_modified = state.tick();
            state.blobs.insert(
                name.to_string(),
                StoredBlob {
                    data: data.to_vec(),
                    content_type: content_type.to_string(),
                    last_modified,
                },
            );
            Ok(())
        })
    }

    fn move_to(&self, name: &str, dest_prefix: &str) -> Result<String> {
        self.with_state(|state| {
            let blob = state
                .blobs
                .remove(name)
                .ok_or_else(|| PipelineError::BlobNotFound(name.to_string()))?;
            let target = format!("{}{}", normalize_prefix(dest_prefix), file_name(name));
            state.blobs.insert(target.clone(), blob);
            Ok(target)
        })
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.with_state(|state| {
            state
                .blobs
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| PipelineError::BlobNotFound(name.to_string()))
        })
    }
}

/// An extract taken from a customer's source prefix.
#[derive(Debug, Clone)]
pub struct LoadedExtract {
    pub name: String,
    pub archived_as: String,
    pub frame: Frame,
}

/// Takes the newest `.csv` blob directly under `prefix`, moves it into the
/// prefix's `history/` area, and parses it. Returns `Ok(None)` when there is
/// nothing to process.
pub fn load_newest_extract(
    storage: &dyn BlobStorage,
    prefix: &str,
) -> Result<Option<LoadedExtract>> {
    let prefix = normalize_prefix(prefix);
    let history = format!("{prefix}{HISTORY_PREFIX}");

    let newest = storage
        .list(&prefix)?
        .into_iter()
        .filter(|entry| {
            entry.name.to_ascii_lowercase().ends_with(".csv")
                && !entry.name[prefix.len()..].contains('/')
        })
        .max_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.name.cmp(&b.name))
        });
    let Some(newest) = newest else {
        debug!("No extracts waiting under '{prefix}'");
        return Ok(None);
    };

    let data = storage.download(&newest.name)?;
    info!(
        "Loaded {} bytes from {} (last modified: {})",
        data.len(),
        newest.name,
        newest.last_modified
    );
    let archived_as = storage.move_to(&newest.name, &history)?;

    let encoding = resolve_encoding(Some(SOURCE_ENCODING))?;
    let frame = read_frame(&data, SOURCE_DELIMITER, encoding)?;
    Ok(Some(LoadedExtract {
        name: newest.name,
        archived_as,
        frame,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn newest_direct_csv_is_loaded_and_archived() {
        let storage = MemoryStorage::new();
        storage.upload("acme/old.csv", b"a;b\n1;2\n", "text/csv").unwrap();
        storage.upload("acme/nested/newer.csv", b"x\n", "text/csv").unwrap();
        storage.upload("acme/notes.txt", b"ignore", "text/plain").unwrap();
        storage.upload("acme/new.CSV", b"a;b\nmeta;\n3;4\n", "text/csv").unwrap();

        let loaded = load_newest_extract(&storage, "acme").unwrap().unwrap();
        assert_eq!(loaded.name, "acme/new.CSV");
        assert_eq!(loaded.archived_as, "acme/history/new.CSV");
        assert_eq!(loaded.frame.len(), 2);
        assert!(!storage.exists("acme/new.CSV").unwrap());
        assert!(storage.exists("acme/history/new.CSV").unwrap());

        let second = load_newest_extract(&storage, "acme/").unwrap().unwrap();
        assert_eq!(second.name, "acme/old.csv");
        assert!(load_newest_extract(&storage, "acme/").unwrap().is_none());
    }

    #[test]
    fn local_storage_round_trips_blobs() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.upload("out/a/report.json", b"{}", "application/json").unwrap();
        assert_eq!(storage.download("out/a/report.json").unwrap(), b"{}");

        let listed = storage.list("out/").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "out/a/report.json");
        assert_eq!(listed[0].size, 2);

        let moved = storage.move_to("out/a/report.json", "out/archive").unwrap();
        assert_eq!(moved, "out/archive/report.json");
        assert!(matches!(
            storage.download("out/a/report.json"),
            Err(PipelineError::BlobNotFound(_))
        ));
        storage.delete(&moved).unwrap();
        assert!(storage.list("").unwrap().is_empty());
    }

    #[test]
    fn local_storage_rejects_escaping_names() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(storage.upload("../evil.csv", b"", "text/csv").is_err());
        assert!(storage.download("/etc/passwd").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn local_storage_listing_reports_unreadable_directories() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.upload("acme/extract.csv", b"a\n", "text/csv").unwrap();
        let locked = dir.path().join("acme").join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users can read the directory anyway.
        let readable = fs::read_dir(&locked).is_ok();
        let listed = storage.list("acme/");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        if readable {
            assert_eq!(listed.unwrap().len(), 1);
        } else {
            assert!(matches!(listed, Err(PipelineError::Io(_))));
        }
    }
}
