pub mod cancel;
pub mod documents;
#[cfg(feature = "pdf")]
pub mod pdfium;
pub mod preload;
pub mod renderer;
pub mod viewer;

pub use cancel::CancelToken;
pub use documents::{DocumentRegistry, DEFAULT_OPEN_TIMEOUT};
#[cfg(feature = "pdf")]
pub use pdfium::{PdfiumDocument, PdfiumProvider};
pub use preload::{preload_order, PreloadHandle, Preloader};
pub use renderer::{PageRenderer, RenderOutcome, RenderParams, RenderPhase, RenderTask};
pub use viewer::Viewer;
