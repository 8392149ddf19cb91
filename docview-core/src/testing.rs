use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::bitmap::Bitmap;
use crate::document::{
    document_id_for_source, DocumentHandle, DocumentInfo, DocumentMetadata, DocumentProvider,
    DocumentSource, PageHandle, PageRef, RawOutlineNode,
};
use crate::error::LoadError;
use crate::types::{PageNumber, PageSize, TextRun, Transform, Viewport};

pub fn page_color(page: PageNumber) -> [u8; 3] {
    [(page % 256) as u8, 64, 128]
}

#[derive(Debug, Clone)]
pub struct FakePage {
    number: PageNumber,
    size: PageSize,
    lines: Option<Vec<String>>,
    failing_renders: usize,
    fail_fetch: bool,
}

impl FakePage {
    pub fn new(number: PageNumber) -> Self {
        Self {
            number,
            size: PageSize::A4,
            lines: Some(vec![format!("Page {number}")]),
            failing_renders: 0,
            fail_fetch: false,
        }
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.lines = Some(text.lines().map(str::to_string).collect());
        self
    }

    pub fn with_size(mut self, size: PageSize) -> Self {
        self.size = size;
        self
    }

    pub fn failing_text(mut self) -> Self {
        self.lines = None;
        self
    }

    pub fn failing_render(mut self) -> Self {
        self.failing_renders = usize::MAX;
        self
    }

    /// Fails the first `attempts` renders, then renders normally.
    pub fn failing_first_renders(mut self, attempts: usize) -> Self {
        self.failing_renders = attempts;
        self
    }

    pub fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }
}

#[derive(Default)]
struct Shared {
    renders: Mutex<HashMap<PageNumber, usize>>,
    active_renders: AtomicUsize,
    peak_renders: AtomicUsize,
    text_extractions: AtomicUsize,
    render_gate: Option<Arc<Semaphore>>,
    disposed: AtomicBool,
}

pub struct FakeDocumentBuilder {
    info: DocumentInfo,
    pages: Vec<FakePage>,
    outline: Option<Vec<RawOutlineNode>>,
    destinations: HashMap<String, PageRef>,
    gated: bool,
}

impl FakeDocumentBuilder {
    pub fn page(mut self, page: FakePage) -> Self {
        if let Some(slot) = page
            .number
            .checked_sub(1)
            .and_then(|index| self.pages.get_mut(index))
        {
            *slot = page;
        }
        self
    }

    pub fn outline(mut self, outline: Vec<RawOutlineNode>) -> Self {
        self.outline = Some(outline);
        self
    }

    pub fn failing_outline(mut self) -> Self {
        self.outline = None;
        self
    }

    pub fn named_destination(mut self, name: &str, page_ref: PageRef) -> Self {
        self.destinations.insert(name.to_string(), page_ref);
        self
    }

    pub fn source(mut self, source: &DocumentSource) -> Self {
        self.info.id = document_id_for_source(source);
        self.info.source_key = source.key();
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.info.version = version.to_string();
        self
    }

    /// Renders block until [`FakeDocument::release_renders`] hands out permits.
    pub fn gated_renders(mut self) -> Self {
        self.gated = true;
        self
    }

    pub fn build(self) -> FakeDocument {
        let shared = Shared {
            render_gate: self.gated.then(|| Arc::new(Semaphore::new(0))),
            ..Shared::default()
        };
        FakeDocument {
            info: self.info,
            pages: self.pages,
            outline: self.outline,
            destinations: self.destinations,
            shared: Arc::new(shared),
        }
    }
}

pub struct FakeDocument {
    info: DocumentInfo,
    pages: Vec<FakePage>,
    outline: Option<Vec<RawOutlineNode>>,
    destinations: HashMap<String, PageRef>,
    shared: Arc<Shared>,
}

impl FakeDocument {
    pub fn builder(page_count: usize) -> FakeDocumentBuilder {
        let id = Uuid::new_v4();
        FakeDocumentBuilder {
            info: DocumentInfo {
                id,
                source_key: format!("fake:{id}"),
                page_count,
                version: "1".to_string(),
                metadata: DocumentMetadata {
                    title: Some("Fake document".to_string()),
                    ..DocumentMetadata::default()
                },
            },
            pages: (1..=page_count).map(FakePage::new).collect(),
            outline: Some(Vec::new()),
            destinations: HashMap::new(),
            gated: false,
        }
    }

    pub fn render_count(&self) -> usize {
        self.shared.renders.lock().values().sum()
    }

    pub fn render_count_for(&self, page: PageNumber) -> usize {
        self.shared.renders.lock().get(&page).copied().unwrap_or(0)
    }

    pub fn peak_concurrent_renders(&self) -> usize {
        self.shared.peak_renders.load(Ordering::SeqCst)
    }

    pub fn text_extractions(&self) -> usize {
        self.shared.text_extractions.load(Ordering::SeqCst)
    }

    pub fn release_renders(&self, permits: usize) {
        if let Some(gate) = &self.shared.render_gate {
            gate.add_permits(permits);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentHandle for FakeDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    async fn page(&self, number: PageNumber) -> Result<Arc<dyn PageHandle>> {
        tokio::task::yield_now().await;
        if self.is_disposed() {
            bail!("document has been disposed");
        }
        let Some(page) = number.checked_sub(1).and_then(|index| self.pages.get(index)) else {
            bail!("page {number} out of range");
        };
        if page.fail_fetch {
            bail!("page {number} could not be loaded");
        }
        Ok(Arc::new(FakePageHandle {
            page: page.clone(),
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn outline(&self) -> Result<Vec<RawOutlineNode>> {
        match &self.outline {
            Some(outline) => Ok(outline.clone()),
            None => bail!("outline is damaged"),
        }
    }

    async fn resolve_destination(&self, name: &str) -> Result<PageRef> {
        match self.destinations.get(name) {
            Some(page_ref) => Ok(*page_ref),
            None => bail!("unknown destination {name:?}"),
        }
    }

    async fn page_index(&self, page_ref: &PageRef) -> Result<usize> {
        match (page_ref.object as usize).checked_sub(1) {
            Some(index) => Ok(index),
            None => bail!("invalid page reference {:?}", page_ref),
        }
    }

    fn dispose(&self) {
        self.shared.disposed.store(true, Ordering::SeqCst);
    }
}

struct FakePageHandle {
    page: FakePage,
    shared: Arc<Shared>,
}

#[async_trait]
impl PageHandle for FakePageHandle {
    fn number(&self) -> PageNumber {
        self.page.number
    }

    fn size(&self) -> PageSize {
        self.page.size
    }

    async fn render(&self, _viewport: &Viewport, target: &mut Bitmap) -> Result<()> {
        let attempt = {
            let mut renders = self.shared.renders.lock();
            let count = renders.entry(self.page.number).or_default();
            *count += 1;
            *count
        };
        let _active = ActiveRender::start(&self.shared);
        if let Some(gate) = &self.shared.render_gate {
            gate.acquire().await?.forget();
        }
        tokio::task::yield_now().await;
        if attempt <= self.page.failing_renders {
            bail!("page {} has a broken content stream", self.page.number);
        }
        let (width, height) = (target.width, target.height);
        target.fill_rect(0, 0, width, height, page_color(self.page.number), 1.0);
        Ok(())
    }

    async fn text_content(&self) -> Result<Vec<TextRun>> {
        self.shared.text_extractions.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let Some(lines) = &self.page.lines else {
            bail!("page {} has no extractable text", self.page.number);
        };
        Ok(lines
            .iter()
            .enumerate()
            .map(|(line, text)| TextRun {
                text: text.clone(),
                transform: Transform::new(6.0, 10.0, 72.0, 720.0 - line as f32 * 14.0),
                width: text.chars().count() as f32 * 6.0,
                page: self.page.number,
            })
            .collect())
    }
}

struct ActiveRender<'a>(&'a Shared);

impl<'a> ActiveRender<'a> {
    fn start(shared: &'a Shared) -> Self {
        let active = shared.active_renders.fetch_add(1, Ordering::SeqCst) + 1;
        shared.peak_renders.fetch_max(active, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for ActiveRender<'_> {
    fn drop(&mut self) {
        self.0.active_renders.fetch_sub(1, Ordering::SeqCst);
    }
}

enum ScriptedOpen {
    Fail(fn() -> LoadError),
    Hang,
}

#[derive(Default)]
pub struct FakeProvider {
    documents: Mutex<HashMap<String, Arc<FakeDocument>>>,
    scripted: Mutex<HashMap<String, VecDeque<ScriptedOpen>>>,
    opens: AtomicUsize,
    open_gate: Option<Arc<Semaphore>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens block until [`FakeProvider::release_opens`] hands out permits.
    pub fn gated() -> Self {
        Self {
            open_gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn with_document(self, source: &DocumentSource, builder: FakeDocumentBuilder) -> Self {
        self.insert(source, builder);
        self
    }

    pub fn insert(&self, source: &DocumentSource, builder: FakeDocumentBuilder) -> Arc<FakeDocument> {
        let document = Arc::new(builder.source(source).build());
        self.documents
            .lock()
            .insert(source.key(), Arc::clone(&document));
        document
    }

    pub fn document(&self, source: &DocumentSource) -> Option<Arc<FakeDocument>> {
        self.documents.lock().get(&source.key()).cloned()
    }

    /// The next open of `source` fails with the given error.
    pub fn fail_next(&self, source: &DocumentSource, error: fn() -> LoadError) {
        self.scripted
            .lock()
            .entry(source.key())
            .or_default()
            .push_back(ScriptedOpen::Fail(error));
    }

    /// The next open of `source` never completes.
    pub fn hang_next(&self, source: &DocumentSource) {
        self.scripted
            .lock()
            .entry(source.key())
            .or_default()
            .push_back(ScriptedOpen::Hang);
    }

    pub fn release_opens(&self, permits: usize) {
        if let Some(gate) = &self.open_gate {
            gate.add_permits(permits);
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentProvider for FakeProvider {
    async fn open(&self, source: &DocumentSource) -> Result<Arc<dyn DocumentHandle>, LoadError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if let Some(gate) = &self.open_gate {
            gate.acquire()
                .await
                .map_err(|err| LoadError::Other(err.into()))?
                .forget();
        }

        let key = source.key();
        let scripted = self
            .scripted
            .lock()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(ScriptedOpen::Fail(error)) => return Err(error()),
            Some(ScriptedOpen::Hang) => std::future::pending::<()>().await,
            None => {}
        }

        let document = self.documents.lock().get(&key).cloned();
        match document {
            Some(document) => Ok(document as Arc<dyn DocumentHandle>),
            None => Err(LoadError::not_found(source.to_string())),
        }
    }
}
