use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bitmap::Bitmap;
use crate::error::LoadError;
use crate::types::{PageNumber, PageSize, Rotation, TextRun, Viewport};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0d3a8e-6c1b-5e57-9a0e-8d2f6b41c7a4").expect("valid namespace UUID")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentSource {
    Path(PathBuf),
    Url(String),
    Blob { name: String, bytes: Bytes },
}

impl DocumentSource {
    /// Stable key used to deduplicate opens of the same source.
    pub fn key(&self) -> String {
        match self {
            DocumentSource::Path(path) => format!("path:{}", resolve_path(path).display()),
            DocumentSource::Url(url) => format!("url:{url}"),
            DocumentSource::Blob { name, .. } => {
                format!("blob:{}:{}", name, document_id_for_source(self).simple())
            }
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            DocumentSource::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            DocumentSource::Url(url) => url
                .rsplit('/')
                .find(|segment| !segment.is_empty())
                .unwrap_or(url)
                .to_string(),
            DocumentSource::Blob { name, .. } => name.clone(),
        }
    }
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSource::Path(path) => write!(f, "{}", path.display()),
            DocumentSource::Url(url) => f.write_str(url),
            DocumentSource::Blob { name, bytes } => write!(f, "{name} ({} bytes)", bytes.len()),
        }
    }
}

fn resolve_path(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf())
}

pub fn document_id_for_source(source: &DocumentSource) -> DocumentId {
    match source {
        DocumentSource::Path(path) => {
            let rendered = resolve_path(path);
            Uuid::new_v5(&*DOCUMENT_NAMESPACE, rendered.to_string_lossy().as_bytes())
        }
        DocumentSource::Url(url) => Uuid::new_v5(&*DOCUMENT_NAMESPACE, url.as_bytes()),
        DocumentSource::Blob { name, bytes } => {
            let mut seed = Vec::with_capacity(name.len() + 1 + bytes.len());
            seed.extend_from_slice(name.as_bytes());
            seed.push(0);
            seed.extend_from_slice(bytes);
            Uuid::new_v5(&*DOCUMENT_NAMESPACE, &seed)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub source_key: String,
    pub page_count: usize,
    /// Identity/version tag; changes when the underlying bytes change.
    pub version: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRef {
    pub object: u32,
    pub generation: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    Named(String),
    Explicit(PageRef),
    PageIndex(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawOutlineNode {
    pub title: String,
    pub destination: Option<Destination>,
    pub children: Vec<RawOutlineNode>,
}

impl RawOutlineNode {
    pub fn new(title: impl Into<String>, destination: Option<Destination>) -> Self {
        Self {
            title: title.into(),
            destination,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<RawOutlineNode>) -> Self {
        self.children = children;
        self
    }
}

#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, source: &DocumentSource) -> Result<Arc<dyn DocumentHandle>, LoadError>;
}

#[async_trait]
pub trait DocumentHandle: Send + Sync {
    fn info(&self) -> &DocumentInfo;

    fn page_count(&self) -> usize {
        self.info().page_count
    }

    async fn page(&self, number: PageNumber) -> Result<Arc<dyn PageHandle>>;

    async fn outline(&self) -> Result<Vec<RawOutlineNode>>;

    async fn resolve_destination(&self, name: &str) -> Result<PageRef>;

    async fn page_index(&self, page_ref: &PageRef) -> Result<usize>;

    fn dispose(&self);
}

#[async_trait]
pub trait PageHandle: Send + Sync {
    fn number(&self) -> PageNumber;

    fn size(&self) -> PageSize;

    fn viewport(&self, scale: f32, rotation: Rotation) -> Viewport {
        Viewport::for_page(self.size(), scale, rotation)
    }

    /// Draws the page into `target`, which is already sized for `viewport`
    /// (times the device pixel ratio).
    async fn render(&self, viewport: &Viewport, target: &mut Bitmap) -> Result<()>;

    async fn text_content(&self) -> Result<Vec<TextRun>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn document_id_is_stable_for_same_path() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("sample.pdf");
        std::fs::write(&file_path, b"dummy").unwrap();

        let first = document_id_for_source(&DocumentSource::Path(file_path.clone()));
        let second = document_id_for_source(&DocumentSource::Path(file_path));

        assert_eq!(first, second);
    }

    #[test]
    fn blob_identity_follows_content() {
        let a = DocumentSource::Blob {
            name: "report.pdf".into(),
            bytes: Bytes::from_static(b"one"),
        };
        let b = DocumentSource::Blob {
            name: "report.pdf".into(),
            bytes: Bytes::from_static(b"two"),
        };
        assert_ne!(document_id_for_source(&a), document_id_for_source(&b));
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), a.clone().key());
    }

    #[test]
    fn display_name_prefers_last_url_segment() {
        let source = DocumentSource::Url("https://example.com/docs/guide.pdf".into());
        assert_eq!(source.display_name(), "guide.pdf");
        assert_eq!(source.key(), "url:https://example.com/docs/guide.pdf");
    }
}
