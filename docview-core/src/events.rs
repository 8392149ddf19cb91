use std::sync::Arc;

use parking_lot::Mutex;

use crate::document::DocumentId;
use crate::search::SearchMatch;
use crate::surface::SurfaceId;
use crate::types::{NavigationReason, PageNumber, PixelRect, ViewMode};

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    DocumentOpened {
        id: DocumentId,
        page_count: usize,
    },
    DocumentClosed {
        id: DocumentId,
    },
    PageChanged {
        page: PageNumber,
        reason: NavigationReason,
    },
    TotalPagesChanged {
        count: usize,
    },
    ViewModeChanged {
        mode: ViewMode,
        page: PageNumber,
    },
    RenderError {
        page: PageNumber,
        message: String,
    },
    SearchProgress {
        matches_so_far: usize,
        pages_scanned: usize,
    },
    SearchComplete {
        matches: Vec<SearchMatch>,
    },
    RevealMatch {
        page: PageNumber,
        surface: SurfaceId,
        rect: PixelRect,
    },
}

#[derive(Debug, Clone, Default)]
pub struct EventLog {
    inner: Arc<Mutex<Vec<ViewerEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: ViewerEvent) {
        self.inner.lock().push(event);
    }

    pub fn drain(&self) -> Vec<ViewerEvent> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn snapshot(&self) -> Vec<ViewerEvent> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_one_queue() {
        let log = EventLog::new();
        let handle = log.clone();
        handle.push(ViewerEvent::TotalPagesChanged { count: 4 });
        assert_eq!(log.len(), 1);
        assert_eq!(log.snapshot(), handle.snapshot());
        assert_eq!(log.drain().len(), 1);
        assert!(handle.is_empty());
    }
}
