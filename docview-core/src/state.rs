use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::document::{DocumentId, DocumentInfo};
use crate::types::{PageNumber, Rotation, ViewMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub page: PageNumber,
    pub title: String,
    pub timestamp: u64,
}

impl Bookmark {
    pub fn new(page: PageNumber, title: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        Self {
            page,
            title: title.into(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedViewState {
    pub current_page: PageNumber,
    pub scale: f32,
    pub rotation: Rotation,
    pub view_mode: ViewMode,
    pub fit_to_width: bool,
    pub bookmarks: Vec<Bookmark>,
    pub document_version: Option<String>,
}

impl Default for PersistedViewState {
    fn default() -> Self {
        Self {
            current_page: 1,
            scale: 1.0,
            rotation: Rotation::Deg0,
            view_mode: ViewMode::Single,
            fit_to_width: false,
            bookmarks: Vec::new(),
            document_version: None,
        }
    }
}

pub trait StateStore: Send + Sync {
    fn load(&self, doc: &DocumentInfo) -> Result<Option<PersistedViewState>>;
    fn save(&self, doc: &DocumentInfo, state: &PersistedViewState) -> Result<()>;
}

pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {:?}", root))?;
        Ok(Self { root })
    }

    fn state_path(&self, doc: &DocumentInfo) -> PathBuf {
        self.root.join(format!("{}.json", doc.id))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, doc: &DocumentInfo) -> Result<Option<PersistedViewState>> {
        let path = self.state_path(doc);
        if !path.exists() {
            return Ok(None);
        }
        let mut file =
            File::open(&path).with_context(|| format!("failed to open state file {:?}", path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let state = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode state file {:?}", path))?;
        Ok(Some(state))
    }

    fn save(&self, doc: &DocumentInfo, state: &PersistedViewState) -> Result<()> {
        let path = self.state_path(doc);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(state)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp state file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move state into place at {:?}", path))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<HashMap<DocumentId, PersistedViewState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, doc: &DocumentInfo) -> Result<Option<PersistedViewState>> {
        Ok(self.inner.lock().get(&doc.id).cloned())
    }

    fn save(&self, doc: &DocumentInfo, state: &PersistedViewState) -> Result<()> {
        self.inner.lock().insert(doc.id, state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    use crate::document::{document_id_for_source, DocumentMetadata, DocumentSource};

    fn info_for(path: PathBuf) -> DocumentInfo {
        let source = DocumentSource::Path(path);
        DocumentInfo {
            id: document_id_for_source(&source),
            source_key: source.key(),
            page_count: 3,
            version: "v1".into(),
            metadata: DocumentMetadata::default(),
        }
    }

    #[test]
    fn file_state_store_restores_state_with_stable_id() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("sample.pdf");
        std::fs::write(&file_path, b"dummy").unwrap();
        let info = info_for(file_path.clone());

        let store = FileStateStore::new(dir.path().join("state")).unwrap();
        assert!(store.load(&info).unwrap().is_none());

        let state = PersistedViewState {
            current_page: 2,
            scale: 1.5,
            rotation: Rotation::Deg90,
            view_mode: ViewMode::TwoPage,
            bookmarks: vec![Bookmark::new(3, "Results")],
            ..PersistedViewState::default()
        };
        store.save(&info, &state).unwrap();

        let restored = store.load(&info_for(file_path)).unwrap().unwrap();
        assert_eq!(restored, state);
        assert!(!dir
            .path()
            .join("state")
            .join(format!("{}.json.tmp", info.id))
            .exists());
    }

    #[test]
    fn older_state_files_fill_missing_fields() {
        let dir = tempdir().unwrap();
        let info = info_for(dir.path().join("old.pdf"));
        let store = FileStateStore::new(dir.path().to_path_buf()).unwrap();
        std::fs::write(
            dir.path().join(format!("{}.json", info.id)),
            r#"{ "current_page": 4, "scale": 2.0 }"#,
        )
        .unwrap();

        let restored = store.load(&info).unwrap().unwrap();
        assert_eq!(restored.current_page, 4);
        assert_eq!(restored.rotation, Rotation::Deg0);
        assert!(restored.bookmarks.is_empty());
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStateStore::new();
        let info = info_for(PathBuf::from("/tmp/memory.pdf"));
        let state = PersistedViewState {
            current_page: 9,
            ..PersistedViewState::default()
        };
        store.save(&info, &state).unwrap();
        assert_eq!(store.load(&info).unwrap(), Some(state));
    }
}
