use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use docview_core::outline::DEFAULT_MAX_OUTLINE_DEPTH;
use docview_core::{
    document_id_for_source, Bitmap, Destination, DocumentHandle, DocumentInfo, DocumentMetadata,
    DocumentProvider, DocumentSource, LoadError, PageHandle, PageNumber, PageRef, PageSize,
    RawOutlineNode, Rotation, TextRun, Transform, ViewerConfig, Viewport,
};
use image::imageops::{self, FilterType};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

pub const PDFIUM_LIBRARY_ENV: &str = "DOCVIEW_PDFIUM_LIBRARY_PATH";

const MAX_OUTLINE_NODES: usize = 10_000;

pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    /// Binds the first pdfium library that loads, starting with the one
    /// named in `config`.
    pub fn from_config(config: &ViewerConfig) -> Result<Self> {
        let env = std::env::var(PDFIUM_LIBRARY_ENV).ok();
        let candidates = library_candidates(config.pdfium_library.as_deref(), env.as_deref());

        let mut failures = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match candidate.bind() {
                Ok(bindings) => {
                    debug!(library = %candidate, "pdfium bound");
                    return Ok(Self {
                        pdfium: Arc::new(Pdfium::new(bindings)),
                    });
                }
                Err(err) => {
                    debug!(library = %candidate, %err, "pdfium not available");
                    failures.push(format!("{candidate}: {err}"));
                }
            }
        }
        bail!(
            "no usable pdfium library; set `pdfium_library` in the config or {PDFIUM_LIBRARY_ENV} ({})",
            failures.join("; ")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LibraryLocation {
    File(PathBuf),
    System,
}

impl LibraryLocation {
    fn bind(&self) -> Result<Box<dyn PdfiumLibraryBindings>, PdfiumError> {
        match self {
            LibraryLocation::File(path) => Pdfium::bind_to_library(path),
            LibraryLocation::System => Pdfium::bind_to_system_library(),
        }
    }
}

impl std::fmt::Display for LibraryLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryLocation::File(path) => write!(f, "{}", path.display()),
            LibraryLocation::System => f.write_str("system library"),
        }
    }
}

/// Config path, then the environment override, then the working directory,
/// then the system search path.
fn library_candidates(configured: Option<&Path>, env: Option<&str>) -> Vec<LibraryLocation> {
    let mut candidates = Vec::with_capacity(4);
    if let Some(path) = configured {
        candidates.push(LibraryLocation::File(path.to_path_buf()));
    }
    if let Some(path) = env.filter(|path| !path.trim().is_empty()) {
        candidates.push(LibraryLocation::File(PathBuf::from(path)));
    }
    candidates.push(LibraryLocation::File(
        Pdfium::pdfium_platform_library_name_at_path("./"),
    ));
    candidates.push(LibraryLocation::System);
    candidates.dedup();
    candidates
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    #[instrument(skip(self), fields(source = %source))]
    async fn open(&self, source: &DocumentSource) -> Result<Arc<dyn DocumentHandle>, LoadError> {
        let input = match source {
            DocumentSource::Path(path) => Input::File(path.clone()),
            DocumentSource::Url(raw) => Input::File(local_path_for_url(raw)?),
            DocumentSource::Blob { bytes, .. } => Input::Bytes(bytes.to_vec()),
        };
        let pdfium = Arc::clone(&self.pdfium);
        let source = source.clone();
        let document = tokio::task::spawn_blocking(move || load(pdfium, &source, input))
            .await
            .map_err(|err| LoadError::Other(err.into()))??;
        Ok(Arc::new(document))
    }
}

enum Input {
    File(PathBuf),
    Bytes(Vec<u8>),
}

fn local_path_for_url(raw: &str) -> Result<PathBuf, LoadError> {
    let url = Url::parse(raw).map_err(|err| LoadError::not_found(format!("{raw}: {err}")))?;
    if url.scheme() != "file" {
        return Err(LoadError::network(format!(
            "{} documents cannot be fetched by the pdfium backend",
            url.scheme()
        )));
    }
    url.to_file_path()
        .map_err(|_| LoadError::not_found(raw.to_string()))
}

fn load(
    pdfium: Arc<Pdfium>,
    source: &DocumentSource,
    input: Input,
) -> Result<PdfiumDocument, LoadError> {
    let bytes = match input {
        Input::Bytes(bytes) => bytes,
        Input::File(path) => read_file(&path)?,
    };
    let version = Uuid::new_v5(&Uuid::NAMESPACE_OID, &bytes).simple().to_string();

    let document = pdfium
        .load_pdf_from_byte_vec(bytes, None)
        .map_err(|err| load_error(source, err))?;
    // SAFETY: the document borrows the bindings owned by `pdfium`. Both are
    // moved into `Shared`, where `document` is declared before `_pdfium` and
    // is therefore dropped first. `dispose` only ever drops the document.
    let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };

    let info = build_document_info(&document, source, version);
    debug!(pages = info.page_count, "pdf loaded");
    Ok(PdfiumDocument {
        info,
        shared: Arc::new(Shared {
            document: Mutex::new(Some(document)),
            _pdfium: pdfium,
        }),
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>, LoadError> {
    std::fs::read(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            LoadError::not_found(path.display().to_string())
        }
        _ => LoadError::Other(anyhow!(err).context(format!("failed to read {:?}", path))),
    })
}

fn load_error(source: &DocumentSource, err: PdfiumError) -> LoadError {
    match err {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            LoadError::AccessProtected
        }
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::FileError) => {
            LoadError::not_found(source.to_string())
        }
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::FormatError) => {
            LoadError::corrupted(format!("{source} is not a valid PDF"))
        }
        other => LoadError::corrupted(other.to_string()),
    }
}

fn build_document_info(
    document: &PdfDocument<'_>,
    source: &DocumentSource,
    version: String,
) -> DocumentInfo {
    let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
    let metadata = document.metadata();

    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_owned());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().to_owned());
    let keywords = metadata
        .get(PdfDocumentMetadataTagType::Keywords)
        .map(|t| t.value().split(',').map(|s| s.trim().to_owned()).collect())
        .unwrap_or_else(Vec::new);

    DocumentInfo {
        id: document_id_for_source(source),
        source_key: source.key(),
        page_count,
        version,
        metadata: DocumentMetadata {
            title,
            author,
            keywords,
        },
    }
}

struct Shared {
    document: Mutex<Option<PdfDocument<'static>>>,
    _pdfium: Arc<Pdfium>,
}

impl Shared {
    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let guard = self.document.lock();
        match guard.as_ref() {
            Some(document) => f(document),
            None => bail!("document has been disposed"),
        }
    }

    fn with_page<R, F>(&self, number: PageNumber, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        self.with_document(|document| {
            let index = number
                .checked_sub(1)
                .and_then(|index| PdfPageIndex::try_from(index).ok())
                .ok_or_else(|| anyhow!("page {number} is out of supported range"))?;
            let page = document
                .pages()
                .get(index)
                .with_context(|| format!("page {number} out of range"))?;
            f(&page)
        })
    }
}

pub struct PdfiumDocument {
    info: DocumentInfo,
    shared: Arc<Shared>,
}

#[async_trait]
impl DocumentHandle for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    async fn page(&self, number: PageNumber) -> Result<Arc<dyn PageHandle>> {
        let size = self.shared.with_page(number, |page| {
            Ok(PageSize::new(page.width().value, page.height().value))
        })?;
        Ok(Arc::new(PdfiumPage {
            number,
            size,
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn outline(&self) -> Result<Vec<RawOutlineNode>> {
        self.shared.with_document(|document| {
            let mut budget = MAX_OUTLINE_NODES;
            let outline = match document.bookmarks().root() {
                Some(root) => collect_outline(root, 0, &mut budget),
                None => Vec::new(),
            };
            if budget == 0 {
                warn!(limit = MAX_OUTLINE_NODES, "outline truncated");
            }
            Ok(outline)
        })
    }

    /// Unsupported: pdfium resolves named destinations while the bookmarks
    /// are read, so [`collect_outline`] only ever yields page indexes.
    async fn resolve_destination(&self, name: &str) -> Result<PageRef> {
        bail!("pdfium backend does not look up named destination {name:?}")
    }

    /// Unsupported: pdfium does not expose page object numbers.
    async fn page_index(&self, page_ref: &PageRef) -> Result<usize> {
        bail!(
            "pdfium backend cannot map page object {} {} R to an index",
            page_ref.object,
            page_ref.generation
        )
    }

    fn dispose(&self) {
        if self.shared.document.lock().take().is_some() {
            debug!(id = %self.info.id, "pdf document released");
        }
    }
}

/// Walks siblings iteratively and children recursively. The recursion is
/// bounded by the depth cap and the walk by the node budget, so malformed
/// bookmark trees that loop back on themselves still terminate.
fn collect_outline(
    mut bookmark: PdfBookmark<'_>,
    depth: usize,
    budget: &mut usize,
) -> Vec<RawOutlineNode> {
    let mut nodes = Vec::new();
    loop {
        if *budget == 0 {
            break;
        }
        *budget -= 1;

        let title = bookmark.title().unwrap_or_default();
        let destination = bookmark
            .destination()
            .and_then(|destination| destination.page_index().ok())
            .and_then(|index| usize::try_from(index).ok())
            .map(Destination::PageIndex);
        let children = match bookmark.first_child() {
            Some(child) if depth + 1 < DEFAULT_MAX_OUTLINE_DEPTH => {
                collect_outline(child, depth + 1, budget)
            }
            Some(_) => {
                warn!(depth, "outline nested too deeply, children dropped");
                Vec::new()
            }
            None => Vec::new(),
        };
        nodes.push(RawOutlineNode::new(title, destination).with_children(children));

        match bookmark.next_sibling() {
            Some(next) => bookmark = next,
            None => break,
        }
    }
    nodes
}

struct PdfiumPage {
    number: PageNumber,
    size: PageSize,
    shared: Arc<Shared>,
}

#[async_trait]
impl PageHandle for PdfiumPage {
    fn number(&self) -> PageNumber {
        self.number
    }

    fn size(&self) -> PageSize {
        self.size
    }

    #[instrument(skip(self, target), fields(page = self.number))]
    async fn render(&self, viewport: &Viewport, target: &mut Bitmap) -> Result<()> {
        let (width, height) = (target.width, target.height);
        let image = self.shared.with_page(self.number, |page| {
            let config = PdfRenderConfig::new()
                .set_target_size(width as i32, height as i32)
                .rotate(render_rotation(viewport.rotation), false)
                .render_form_data(true);
            let rendered = page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", self.number))?;
            Ok(rendered.as_image().to_rgba8())
        })?;

        let image = if image.width() == width && image.height() == height {
            image
        } else {
            imageops::resize(&image, width, height, FilterType::Triangle)
        };
        target.copy_from(&Bitmap::from_rgba(width, height, image.into_raw())?);
        Ok(())
    }

    /// One run per text segment. The transform carries the average glyph
    /// advance as its horizontal scale, the segment height as its vertical
    /// scale and the baseline measured from the top of the page.
    async fn text_content(&self) -> Result<Vec<TextRun>> {
        let number = self.number;
        let page_height = self.size.height_pt;
        self.shared.with_page(number, |page| {
            let text = page
                .text()
                .with_context(|| format!("failed to extract text for page {number}"))?;
            let runs = text
                .segments()
                .iter()
                .filter_map(|segment| {
                    let content = segment.text();
                    let chars = content.chars().count();
                    if chars == 0 {
                        return None;
                    }
                    let bounds = segment.bounds();
                    let width = bounds.right().value - bounds.left().value;
                    let height = bounds.top().value - bounds.bottom().value;
                    Some(TextRun {
                        text: content,
                        transform: Transform::new(
                            width / chars as f32,
                            height,
                            bounds.left().value,
                            page_height - bounds.bottom().value,
                        ),
                        width,
                        page: number,
                    })
                })
                .collect();
            Ok(runs)
        })
    }
}

fn render_rotation(rotation: Rotation) -> PdfPageRenderRotation {
    match rotation {
        Rotation::Deg0 => PdfPageRenderRotation::None,
        Rotation::Deg90 => PdfPageRenderRotation::Degrees90,
        Rotation::Deg180 => PdfPageRenderRotation::Degrees180,
        Rotation::Deg270 => PdfPageRenderRotation::Degrees270,
    }
}
