use crate::scale::ZoomControl;
use crate::types::{PageNumber, Rotation, ViewMode};

/// Everything the host (toolbar, keyboard, outline panel) can ask the viewer
/// to do. Keyboard input is mapped onto the same values.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    NextPage { count: usize },
    PrevPage { count: usize },
    GotoPage { page: PageNumber },
    FirstPage,
    LastPage,
    ZoomIn,
    ZoomOut,
    ResetZoom,
    SetZoom { scale: f32, control: ZoomControl },
    Rotate { clockwise: bool },
    SetRotation { rotation: Rotation },
    SetViewMode { mode: ViewMode },
    CycleViewMode,
    SetFitToWidth { enabled: bool },
    Resize { container_width_px: f32 },
    Search { query: String },
    SearchNext { count: usize },
    SearchPrev { count: usize },
    ClearSearch,
    JumpToMatch { index: usize },
    GotoOutlineItem { index: usize },
    AddBookmark { title: Option<String> },
    GotoBookmark { index: usize },
    RemoveBookmark { index: usize },
    /// Drops cached renders of `page` and draws it again.
    RetryPage { page: PageNumber },
}

