use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use crate::bitmap::Bitmap;
use crate::types::PageNumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl SurfaceId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SurfaceId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

pub trait TargetSurface: Send + Sync {
    fn id(&self) -> SurfaceId;

    fn blit(&self, page: PageNumber, bitmap: &Bitmap) -> Result<()>;
}

pub trait SurfaceFactory: Send + Sync {
    fn surface_for(&self, page: PageNumber) -> Arc<dyn TargetSurface>;
}

pub struct MemorySurface {
    id: SurfaceId,
    contents: Mutex<Option<(PageNumber, Bitmap)>>,
    blits: AtomicU64,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self {
            id: SurfaceId::next(),
            contents: Mutex::new(None),
            blits: AtomicU64::new(0),
        }
    }

    pub fn blit_count(&self) -> u64 {
        self.blits.load(Ordering::SeqCst)
    }

    pub fn page(&self) -> Option<PageNumber> {
        self.contents.lock().as_ref().map(|(page, _)| *page)
    }

    pub fn snapshot(&self) -> Option<Bitmap> {
        self.contents.lock().as_ref().map(|(_, bitmap)| bitmap.clone())
    }
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetSurface for MemorySurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn blit(&self, page: PageNumber, bitmap: &Bitmap) -> Result<()> {
        anyhow::ensure!(!bitmap.is_disposed(), "cannot blit a disposed bitmap");
        *self.contents.lock() = Some((page, bitmap.clone()));
        self.blits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySurfaceFactory {
    surfaces: Mutex<HashMap<PageNumber, Arc<MemorySurface>>>,
}

impl MemorySurfaceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn surface(&self, page: PageNumber) -> Arc<MemorySurface> {
        Arc::clone(
            self.surfaces
                .lock()
                .entry(page)
                .or_insert_with(|| Arc::new(MemorySurface::new())),
        )
    }
}

impl SurfaceFactory for MemorySurfaceFactory {
    fn surface_for(&self, page: PageNumber) -> Arc<dyn TargetSurface> {
        self.surface(page)
    }
}

/// Which surface currently shows each page. Populated by the renderer after
/// a successful blit.
#[derive(Default)]
pub struct SurfaceRegistry {
    surfaces: Mutex<HashMap<PageNumber, Arc<dyn TargetSurface>>>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, page: PageNumber, surface: Arc<dyn TargetSurface>) {
        let mut surfaces = self.surfaces.lock();
        let id = surface.id();
        // A surface shows one page at a time.
        surfaces.retain(|other_page, other| *other_page == page || other.id() != id);
        surfaces.insert(page, surface);
    }

    pub fn surface_for(&self, page: PageNumber) -> Option<Arc<dyn TargetSurface>> {
        self.surfaces.lock().get(&page).cloned()
    }

    pub fn unregister(&self, page: PageNumber) -> Option<Arc<dyn TargetSurface>> {
        self.surfaces.lock().remove(&page)
    }

    pub fn pages(&self) -> Vec<PageNumber> {
        let mut pages: Vec<_> = self.surfaces.lock().keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    pub fn clear(&self) {
        self.surfaces.lock().clear();
    }
}
