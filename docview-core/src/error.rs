use std::time::Duration;

use thiserror::Error;

use crate::types::PageNumber;

/// Reasons a document could not be opened. Every variant is recoverable by
/// opening the same source again.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("the document is damaged or not in a supported format: {detail}")]
    Corrupted { detail: String },

    #[error("the document could not be found at {location}")]
    NotFound { location: String },

    #[error("the document could not be downloaded: {detail}")]
    Network { detail: String },

    #[error("the document is password protected")]
    AccessProtected,

    #[error("opening the document timed out after {} seconds", .after.as_secs())]
    Timeout { after: Duration },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LoadError {
    pub fn corrupted(detail: impl Into<String>) -> Self {
        Self::Corrupted {
            detail: detail.into(),
        }
    }

    pub fn not_found(location: impl Into<String>) -> Self {
        Self::NotFound {
            location: location.into(),
        }
    }

    pub fn network(detail: impl Into<String>) -> Self {
        Self::Network {
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::Corrupted { .. } => "corrupted",
            LoadError::NotFound { .. } => "not-found",
            LoadError::Network { .. } => "network",
            LoadError::AccessProtected => "protected",
            LoadError::Timeout { .. } => "timeout",
            LoadError::Other(_) => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub page: PageNumber,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("page {page} failed to render: {message}")]
    Page { page: PageNumber, message: String },

    #[error("none of the {} requested pages rendered", .failures.len())]
    NothingRendered { failures: Vec<PageFailure> },
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("text could not be extracted from any of the {pages} pages")]
    NothingScanned { pages: usize },
}

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("no document is open")]
    NoDocument,

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
