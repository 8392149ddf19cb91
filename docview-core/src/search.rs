use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::document::{DocumentHandle, PageHandle};
use crate::error::SearchError;
use crate::events::{EventLog, ViewerEvent};
use crate::types::{PageNumber, PixelRect, Rotation, TextRun, Viewport};

pub const CONTEXT_CHARS: usize = 20;
const LINE_HEIGHT_FACTOR: f32 = 1.2;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchMatch {
    pub page: PageNumber,
    pub match_text: String,
    pub context_before: String,
    pub context_after: String,
    pub pixel_rect: PixelRect,
    pub run_index: usize,
    pub offset: usize,
    pub scale: f32,
    pub rotation: Rotation,
    document_rect: PixelRect,
}

impl SearchMatch {
    pub fn is_valid_for(&self, scale: f32, rotation: Rotation) -> bool {
        (self.scale - scale).abs() < f32::EPSILON && self.rotation == rotation
    }

    pub fn project(&self, viewport: &Viewport) -> PixelRect {
        Projection::from_viewport(viewport).apply(self.document_rect)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub scale: f32,
    pub rotation: Rotation,
    pub page_width: f32,
    pub page_height: f32,
}

impl Projection {
    pub fn from_viewport(viewport: &Viewport) -> Self {
        let (page_width, page_height) = viewport.unrotated_size();
        Self {
            scale: viewport.scale,
            rotation: viewport.rotation,
            page_width,
            page_height,
        }
    }

    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            rotation: Rotation::Deg0,
            page_width: 0.0,
            page_height: 0.0,
        }
    }

    pub fn apply(&self, rect: PixelRect) -> PixelRect {
        rect.scaled(self.scale).rotated(
            self.rotation,
            self.page_width * self.scale,
            self.page_height * self.scale,
        )
    }
}

fn fold(c: char) -> char {
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(folded), None) => folded,
        _ => c,
    }
}

pub fn is_blank_query(query: &str) -> bool {
    query.trim().is_empty()
}

/// Finds every non-overlapping, case-insensitive occurrence of `query` in
/// `runs`, ordered by run then position.
pub fn find_matches(
    page: PageNumber,
    runs: &[TextRun],
    query: &str,
    projection: &Projection,
) -> Vec<SearchMatch> {
    if is_blank_query(query) {
        return Vec::new();
    }
    let needle: Vec<char> = query.chars().map(fold).collect();
    let mut matches = Vec::new();

    for (run_index, run) in runs.iter().enumerate() {
        let chars: Vec<char> = run.text.chars().collect();
        if chars.len() < needle.len() {
            continue;
        }
        let folded: Vec<char> = chars.iter().copied().map(fold).collect();

        let mut start = 0;
        while start + needle.len() <= folded.len() {
            let Some(position) = folded[start..]
                .windows(needle.len())
                .position(|window| window == needle.as_slice())
            else {
                break;
            };
            let offset = start + position;
            let end = offset + needle.len();

            let document_rect = match_rect(run, offset, needle.len());
            matches.push(SearchMatch {
                page,
                match_text: chars[offset..end].iter().collect(),
                context_before: chars[offset.saturating_sub(CONTEXT_CHARS)..offset]
                    .iter()
                    .collect(),
                context_after: chars[end..(end + CONTEXT_CHARS).min(chars.len())]
                    .iter()
                    .collect(),
                pixel_rect: projection.apply(document_rect),
                run_index,
                offset,
                scale: projection.scale,
                rotation: projection.rotation,
                document_rect,
            });
            start = end;
        }
    }
    matches
}

/// Document-space rect of `len` characters at `offset` inside `run`. The
/// top edge flips from the baseline-origin space of the transform to screen
/// space.
fn match_rect(run: &TextRun, offset: usize, len: usize) -> PixelRect {
    let transform = &run.transform;
    PixelRect {
        left: transform.translate_x() + offset as f32 * transform.scale_x(),
        top: transform.translate_y() - transform.scale_y(),
        width: len as f32 * transform.scale_x(),
        height: transform.scale_y().abs() * LINE_HEIGHT_FACTOR,
    }
}

#[derive(Default)]
pub struct TextIndex {
    runs: Mutex<HashMap<PageNumber, Arc<Vec<TextRun>>>>,
}

impl TextIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_pages(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn clear(&self) {
        self.runs.lock().clear();
    }

    pub async fn extract_page_text(
        &self,
        document: &dyn DocumentHandle,
        page: PageNumber,
    ) -> Result<Arc<Vec<TextRun>>> {
        if let Some(runs) = self.runs.lock().get(&page) {
            return Ok(Arc::clone(runs));
        }
        let handle = document.page(page).await?;
        self.runs_for(handle.as_ref()).await
    }

    async fn runs_for(&self, handle: &dyn PageHandle) -> Result<Arc<Vec<TextRun>>> {
        let page = handle.number();
        if let Some(runs) = self.runs.lock().get(&page) {
            return Ok(Arc::clone(runs));
        }
        let runs = Arc::new(handle.text_content().await?);
        debug!(page, runs = runs.len(), "extracted page text");
        self.runs.lock().insert(page, Arc::clone(&runs));
        Ok(runs)
    }

    async fn scan_page(
        &self,
        document: &dyn DocumentHandle,
        page: PageNumber,
        query: &str,
        scale: f32,
        rotation: Rotation,
    ) -> Result<Vec<SearchMatch>> {
        let handle = document.page(page).await?;
        let runs = self.runs_for(handle.as_ref()).await?;
        let projection = Projection::from_viewport(&handle.viewport(scale, rotation));
        Ok(find_matches(page, &runs, query, &projection))
    }

    /// Scans every page in order. Pages whose text cannot be extracted are
    /// skipped; the search fails only when no page could be scanned.
    #[instrument(skip(self, document, events), fields(pages = document.page_count()))]
    pub async fn search(
        &self,
        document: &dyn DocumentHandle,
        query: &str,
        scale: f32,
        rotation: Rotation,
        events: &EventLog,
    ) -> Result<Vec<SearchMatch>, SearchError> {
        if is_blank_query(query) {
            events.push(ViewerEvent::SearchComplete {
                matches: Vec::new(),
            });
            return Ok(Vec::new());
        }

        let page_count = document.page_count();
        let mut matches = Vec::new();
        let mut pages_scanned = 0;
        let mut failures = 0;

        for page in 1..=page_count {
            match self
                .scan_page(document, page, query, scale, rotation)
                .await
            {
                Ok(found) => {
                    pages_scanned += 1;
                    matches.extend(found);
                    events.push(ViewerEvent::SearchProgress {
                        matches_so_far: matches.len(),
                        pages_scanned,
                    });
                }
                Err(err) => {
                    failures += 1;
                    warn!(?err, page, "skipping page during search");
                }
            }
        }

        if pages_scanned == 0 && failures > 0 {
            return Err(SearchError::NothingScanned { pages: page_count });
        }

        debug!(matches = matches.len(), pages_scanned, "search finished");
        events.push(ViewerEvent::SearchComplete {
            matches: matches.clone(),
        });
        Ok(matches)
    }
}
