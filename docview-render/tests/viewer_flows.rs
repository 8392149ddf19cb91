use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyEventState, KeyModifiers};
use docview_core::testing::{FakeDocument, FakeDocumentBuilder, FakePage, FakeProvider};
use docview_core::{
    Command, Destination, DocumentSource, KeyAction, KeyMapper, LoadError, MemoryStateStore,
    MemorySurfaceFactory, NavigationReason, PageNumber, PageRef, RawOutlineNode, RenderError,
    Rotation, TargetSurface, ViewMode, ViewerConfig, ViewerError, ViewerEvent,
};
use docview_render::Viewer;

fn manual() -> DocumentSource {
    DocumentSource::Path(PathBuf::from("/srv/library/manual.pdf"))
}

fn config() -> ViewerConfig {
    ViewerConfig {
        preload_radius: 0,
        ..ViewerConfig::default()
    }
}

struct Harness {
    viewer: Viewer,
    provider: Arc<FakeProvider>,
    surfaces: Arc<MemorySurfaceFactory>,
}

impl Harness {
    fn new(config: ViewerConfig, builder: FakeDocumentBuilder) -> Self {
        let provider = Arc::new(FakeProvider::new().with_document(&manual(), builder));
        let surfaces = Arc::new(MemorySurfaceFactory::new());
        let viewer = Viewer::new(config, provider.clone(), surfaces.clone());
        Self {
            viewer,
            provider,
            surfaces,
        }
    }

    async fn opened(config: ViewerConfig, builder: FakeDocumentBuilder) -> Self {
        let mut harness = Self::new(config, builder);
        harness.viewer.open(manual()).await.unwrap();
        harness.viewer.events().drain();
        harness
    }

    fn drain(&self) -> Vec<ViewerEvent> {
        self.viewer.events().drain()
    }
}

fn page_changes(events: &[ViewerEvent]) -> Vec<PageNumber> {
    events
        .iter()
        .filter_map(|event| match event {
            ViewerEvent::PageChanged { page, .. } => Some(*page),
            _ => None,
        })
        .collect()
}

fn revealed_pages(events: &[ViewerEvent]) -> Vec<PageNumber> {
    events
        .iter()
        .filter_map(|event| match event {
            ViewerEvent::RevealMatch { page, .. } => Some(*page),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn continuous_scroll_reports_each_page_once() {
    let mut h = Harness::opened(config(), FakeDocument::builder(20)).await;
    h.viewer
        .apply(Command::SetViewMode {
            mode: ViewMode::Continuous,
        })
        .await
        .unwrap();
    h.drain();

    let frames: Vec<Vec<(PageNumber, f32)>> = vec![
        vec![(13, 1.0)],
        vec![(13, 0.7), (14, 0.3)],
        vec![(13, 0.55), (14, 0.45)],
        vec![(13, 0.4), (14, 0.6)],
        vec![(13, 0.1), (14, 0.9)],
        vec![(13, 0.0), (14, 0.6), (15, 0.4)],
        vec![(14, 0.4), (15, 0.6)],
        vec![(14, 0.2), (15, 0.8)],
    ];
    for frame in frames {
        h.viewer.observe_visibility(frame).await.unwrap();
    }

    assert_eq!(page_changes(&h.drain()), vec![13, 14, 15]);
    assert_eq!(h.viewer.visible_pages(), vec![13, 14, 15, 16, 17]);
    assert_eq!(h.surfaces.surface(17).page(), Some(17));
}

#[tokio::test]
async fn visibility_is_ignored_outside_continuous_mode() {
    let mut h = Harness::opened(config(), FakeDocument::builder(20)).await;
    h.viewer.observe_visibility([(9, 1.0)]).await.unwrap();
    assert!(h.drain().is_empty());
    assert_eq!(h.viewer.current_page(), Some(1));
}

#[tokio::test]
async fn two_page_spreads_start_on_odd_pages() {
    let two_page = ViewerConfig {
        default_view_mode: ViewMode::TwoPage,
        ..config()
    };
    let mut h = Harness::opened(two_page, FakeDocument::builder(10)).await;
    assert_eq!(h.viewer.visible_pages(), vec![1, 2]);

    h.viewer.apply(Command::GotoPage { page: 4 }).await.unwrap();
    assert_eq!(h.viewer.current_page(), Some(3));
    assert_eq!(h.surfaces.surface(3).page(), Some(3));
    assert_eq!(h.surfaces.surface(4).page(), Some(4));

    h.viewer.apply(Command::NextPage { count: 1 }).await.unwrap();
    assert_eq!(page_changes(&h.drain()), vec![3, 5]);

    h.viewer
        .apply(Command::SetViewMode {
            mode: ViewMode::Single,
        })
        .await
        .unwrap();
    h.viewer.apply(Command::GotoPage { page: 6 }).await.unwrap();
    let before = h.viewer.generation();
    h.drain();

    h.viewer
        .apply(Command::SetViewMode {
            mode: ViewMode::Dual,
        })
        .await
        .unwrap();
    assert_eq!(
        h.drain(),
        vec![
            ViewerEvent::ViewModeChanged {
                mode: ViewMode::Dual,
                page: 5
            },
            ViewerEvent::PageChanged {
                page: 5,
                reason: NavigationReason::User
            },
        ]
    );
    assert!(h.viewer.generation() > before);
}

#[tokio::test]
async fn search_steps_wrap_and_reveal_each_match() {
    let builder = FakeDocument::builder(6)
        .page(FakePage::new(2).with_text("find the needle"))
        .page(FakePage::new(5).with_text("Needle in a haystack"));
    let mut h = Harness::opened(config(), builder).await;

    assert_eq!(h.viewer.search("needle").await.unwrap(), 2);
    let events = h.drain();
    let progress = events
        .iter()
        .filter(|event| matches!(event, ViewerEvent::SearchProgress { .. }))
        .count();
    assert_eq!(progress, 6);
    assert!(events.iter().any(|event| matches!(
        event,
        ViewerEvent::SearchComplete { matches } if matches.len() == 2
    )));

    let first = h.viewer.search_results().unwrap().matches()[0].clone();
    let reveal = events
        .iter()
        .find_map(|event| match event {
            ViewerEvent::RevealMatch {
                page,
                surface,
                rect,
            } => Some((*page, *surface, *rect)),
            _ => None,
        })
        .expect("first match revealed");
    assert_eq!(reveal, (2, h.surfaces.surface(2).id(), first.pixel_rect));
    assert_eq!(h.viewer.current_page(), Some(2));

    h.viewer.apply(Command::SearchNext { count: 1 }).await.unwrap();
    h.viewer.apply(Command::SearchNext { count: 1 }).await.unwrap();
    h.viewer.apply(Command::SearchPrev { count: 1 }).await.unwrap();
    let events = h.drain();
    assert_eq!(revealed_pages(&events), vec![5, 2, 5]);
    assert!(events.iter().any(|event| *event
        == ViewerEvent::PageChanged {
            page: 5,
            reason: NavigationReason::Search
        }));

    h.viewer.apply(Command::ClearSearch).await.unwrap();
    assert!(h.viewer.search_results().is_none());
    h.viewer.apply(Command::SearchNext { count: 1 }).await.unwrap();
    assert!(h.drain().is_empty());
}

#[tokio::test]
async fn blank_queries_match_nothing() {
    let mut h = Harness::opened(config(), FakeDocument::builder(3)).await;
    assert_eq!(h.viewer.search("   ").await.unwrap(), 0);
    assert_eq!(
        h.drain(),
        vec![ViewerEvent::SearchComplete {
            matches: Vec::new()
        }]
    );
    assert!(!h.viewer.jump_to(0).await.unwrap());
}

#[tokio::test]
async fn search_fails_when_no_page_has_text() {
    let builder = FakeDocument::builder(2)
        .page(FakePage::new(1).failing_text())
        .page(FakePage::new(2).failing_text());
    let mut h = Harness::opened(config(), builder).await;
    let err = h.viewer.search("anything").await;
    assert!(matches!(err, Err(ViewerError::Search(_))));
}

#[tokio::test]
async fn unresolvable_outline_entries_fall_back_to_the_first_page() {
    let outline = vec![
        RawOutlineNode::new("Preface", Some(Destination::Named("missing".into()))),
        RawOutlineNode::new("Appendix", Some(Destination::Named("appendix".into()))),
    ];
    let builder = FakeDocument::builder(10).outline(outline).named_destination(
        "appendix",
        PageRef {
            object: 9,
            generation: 0,
        },
    );
    let mut h = Harness::opened(config(), builder).await;

    let nodes = h.viewer.outline();
    assert_eq!((nodes[0].destination_page, nodes[0].resolved), (1, false));
    assert_eq!((nodes[1].destination_page, nodes[1].resolved), (9, true));

    h.viewer
        .apply(Command::GotoOutlineItem { index: 1 })
        .await
        .unwrap();
    h.viewer
        .apply(Command::GotoOutlineItem { index: 0 })
        .await
        .unwrap();
    assert_eq!(page_changes(&h.drain()), vec![9, 1]);
}

#[tokio::test]
async fn damaged_outline_leaves_the_document_usable() {
    let mut h = Harness::opened(config(), FakeDocument::builder(4).failing_outline()).await;
    assert!(h.viewer.outline().is_empty());
    h.viewer.apply(Command::LastPage).await.unwrap();
    assert_eq!(h.viewer.current_page(), Some(4));
}

#[tokio::test]
async fn failed_open_can_be_retried() {
    let mut h = Harness::new(config(), FakeDocument::builder(3));
    h.provider
        .fail_next(&manual(), || LoadError::network("connection reset"));

    let err = h.viewer.open(manual()).await;
    assert!(matches!(
        err,
        Err(ViewerError::Load(LoadError::Network { .. }))
    ));
    assert!(!h.viewer.is_open());

    h.viewer.retry_open().await.unwrap();
    assert_eq!(h.viewer.page_count(), 3);
    assert!(matches!(
        h.drain().first(),
        Some(ViewerEvent::DocumentOpened { page_count: 3, .. })
    ));
}

#[tokio::test]
async fn hung_open_times_out() {
    let impatient = ViewerConfig {
        open_timeout: Duration::from_millis(50),
        ..config()
    };
    let mut h = Harness::new(impatient, FakeDocument::builder(3));
    h.provider.hang_next(&manual());

    let err = h.viewer.open(manual()).await;
    assert!(matches!(
        err,
        Err(ViewerError::Load(LoadError::Timeout { .. }))
    ));
    h.viewer.retry_open().await.unwrap();
    assert!(h.viewer.is_open());
}

#[tokio::test]
async fn missing_documents_report_not_found() {
    let mut h = Harness::new(config(), FakeDocument::builder(1));
    let other = DocumentSource::Path(PathBuf::from("/srv/library/absent.pdf"));
    let err = h.viewer.open(other).await;
    match err {
        Err(ViewerError::Load(err)) => assert_eq!(err.kind(), "not-found"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn view_state_survives_reopening() {
    let store = Arc::new(MemoryStateStore::new());
    let surfaces = Arc::new(MemorySurfaceFactory::new());

    let first = Arc::new(FakeProvider::new().with_document(&manual(), FakeDocument::builder(12)));
    let mut viewer =
        Viewer::new(config(), first, surfaces.clone()).with_state_store(store.clone());
    viewer.open(manual()).await.unwrap();
    viewer.apply(Command::GotoPage { page: 7 }).await.unwrap();
    viewer
        .apply(Command::Rotate { clockwise: true })
        .await
        .unwrap();
    viewer
        .apply(Command::AddBookmark {
            title: Some("Wiring".into()),
        })
        .await
        .unwrap();
    viewer.close().unwrap();

    let second = Arc::new(FakeProvider::new().with_document(&manual(), FakeDocument::builder(12)));
    let mut viewer =
        Viewer::new(config(), second, surfaces.clone()).with_state_store(store.clone());
    viewer.open(manual()).await.unwrap();
    assert_eq!(viewer.current_page(), Some(7));
    assert_eq!(viewer.rotation(), Some(Rotation::Deg90));
    assert_eq!(viewer.bookmarks()[0].title, "Wiring");
    viewer.close().unwrap();

    // A changed document keeps bookmarks but starts from the top.
    let revised = Arc::new(
        FakeProvider::new().with_document(&manual(), FakeDocument::builder(12).version("2")),
    );
    let mut viewer = Viewer::new(config(), revised, surfaces).with_state_store(store);
    viewer.open(manual()).await.unwrap();
    assert_eq!(viewer.current_page(), Some(1));
    assert_eq!(viewer.rotation(), Some(Rotation::Deg0));
    assert_eq!(viewer.bookmarks().len(), 1);
}

#[tokio::test]
async fn failed_pages_become_events() {
    let builder = FakeDocument::builder(4).page(FakePage::new(2).failing_render());
    let mut h = Harness::opened(config(), builder).await;

    let err = h.viewer.apply(Command::GotoPage { page: 2 }).await;
    assert!(matches!(
        err,
        Err(ViewerError::Render(RenderError::NothingRendered { .. }))
    ));
    assert!(h
        .drain()
        .iter()
        .any(|event| matches!(event, ViewerEvent::RenderError { page: 2, .. })));

    // In a spread the healthy page still renders.
    h.viewer
        .apply(Command::SetViewMode {
            mode: ViewMode::TwoPage,
        })
        .await
        .unwrap();
    assert_eq!(h.viewer.visible_pages(), vec![1, 2]);
    assert_eq!(h.surfaces.surface(1).page(), Some(1));
}

#[tokio::test]
async fn failed_page_can_be_retried_in_place() {
    let builder = FakeDocument::builder(4).page(FakePage::new(2).failing_first_renders(1));
    let mut h = Harness::opened(config(), builder).await;

    let err = h.viewer.apply(Command::GotoPage { page: 2 }).await;
    assert!(matches!(
        err,
        Err(ViewerError::Render(RenderError::NothingRendered { .. }))
    ));
    assert_eq!(h.viewer.current_page(), Some(2));

    // Navigating to the page already shown does not draw it again.
    h.viewer.apply(Command::GotoPage { page: 2 }).await.unwrap();
    assert_eq!(h.surfaces.surface(2).page(), None);

    h.viewer.apply(Command::RetryPage { page: 2 }).await.unwrap();
    assert_eq!(h.surfaces.surface(2).page(), Some(2));
    let document = h.provider.document(&manual()).unwrap();
    assert!(document.render_count_for(2) >= 2);
}

#[tokio::test]
async fn retry_reports_the_page_that_still_fails() {
    let builder = FakeDocument::builder(4).page(FakePage::new(3).failing_render());
    let mut h = Harness::opened(config(), builder).await;
    let _ = h.viewer.apply(Command::GotoPage { page: 3 }).await;
    h.drain();

    match h.viewer.apply(Command::RetryPage { page: 3 }).await {
        Err(ViewerError::Render(RenderError::Page { page, message })) => {
            assert_eq!(page, 3);
            assert!(message.contains("broken content stream"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(h
        .drain()
        .iter()
        .any(|event| matches!(event, ViewerEvent::RenderError { page: 3, .. })));
}

#[tokio::test]
async fn keyboard_input_goes_through_the_same_commands() {
    let mut h = Harness::opened(config(), FakeDocument::builder(30)).await;
    let mut keys = KeyMapper::new();

    for code in [
        KeyCode::Char('1'),
        KeyCode::Char('2'),
        KeyCode::Char('g'),
        KeyCode::PageDown,
        KeyCode::Char('+'),
    ] {
        let event = Event::Key(KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        });
        if let KeyAction::Command(command) = keys.map_event(event) {
            h.viewer
                .apply_from(command, NavigationReason::Keyboard)
                .await
                .unwrap();
        }
    }

    assert_eq!(
        h.drain(),
        vec![
            ViewerEvent::PageChanged {
                page: 12,
                reason: NavigationReason::Keyboard
            },
            ViewerEvent::PageChanged {
                page: 13,
                reason: NavigationReason::Keyboard
            },
        ]
    );
    assert!(h.viewer.scale().unwrap() > 1.0);
}
