pub mod bitmap;
pub mod cache;
pub mod command;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod keys;
pub mod navigation;
pub mod outline;
pub mod scale;
pub mod search;
pub mod search_cursor;
pub mod state;
pub mod surface;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod types;
pub mod visibility;

pub use bitmap::{Bitmap, Disposable};
pub use cache::{CacheKey, CacheStats, RenderCache, DEFAULT_CACHE_CAPACITY};
pub use command::Command;
pub use config::ViewerConfig;
pub use document::{
    document_id_for_source, Destination, DocumentHandle, DocumentId, DocumentInfo,
    DocumentMetadata, DocumentProvider, DocumentSource, PageHandle, PageRef, RawOutlineNode,
};
pub use error::{LoadError, PageFailure, RenderError, SearchError, ViewerError};
pub use events::{EventLog, ViewerEvent};
pub use keys::{InputMode, KeyAction, KeyMapper};
pub use navigation::{Direction, Navigator, Transition, ViewModeChange};
pub use outline::{flatten, resolve_outline, section_for_page, OutlineItem, OutlineNode};
pub use scale::{compute_scale, ScaleCalculator, ScaleRequest, ZoomControl};
pub use search::{find_matches, Projection, SearchMatch, TextIndex};
pub use search_cursor::SearchResults;
pub use state::{Bookmark, FileStateStore, MemoryStateStore, PersistedViewState, StateStore};
pub use surface::{
    MemorySurface, MemorySurfaceFactory, SurfaceFactory, SurfaceId, SurfaceRegistry,
    TargetSurface,
};
pub use types::{
    NavigationReason, NavigationTarget, PageNumber, PageSize, PixelRect, Rotation, TextRun,
    Transform, ViewMode, Viewport,
};
pub use visibility::VisibilityTracker;
