use std::sync::Arc;

use docview_core::scale::{ZOOM_IN_FACTOR, ZOOM_OUT_FACTOR};
use docview_core::{
    flatten, resolve_outline, section_for_page, Bookmark, CacheStats, Command, DocumentHandle,
    DocumentInfo, DocumentProvider, DocumentSource, EventLog, MemoryStateStore, NavigationReason,
    NavigationTarget, Navigator, OutlineItem, OutlineNode, PageNumber, PersistedViewState,
    PixelRect, RenderError, Rotation, ScaleCalculator, ScaleRequest, SearchResults, StateStore,
    SurfaceFactory, SurfaceRegistry, TextIndex, Transition, ViewMode, ViewerConfig, ViewerError,
    ViewerEvent, VisibilityTracker, ZoomControl,
};
use tracing::{debug, info, instrument, warn};

use crate::documents::DocumentRegistry;
use crate::preload::Preloader;
use crate::renderer::{PageRenderer, RenderOutcome, RenderParams};

pub struct Viewer {
    config: ViewerConfig,
    provider: Arc<dyn DocumentProvider>,
    store: Arc<dyn StateStore>,
    surfaces: Arc<dyn SurfaceFactory>,
    events: EventLog,
    registry: DocumentRegistry,
    session: Option<Session>,
    last_source: Option<DocumentSource>,
}

impl Viewer {
    pub fn new(
        config: ViewerConfig,
        provider: Arc<dyn DocumentProvider>,
        surfaces: Arc<dyn SurfaceFactory>,
    ) -> Self {
        let registry = DocumentRegistry::new(config.open_timeout);
        Self {
            config,
            provider,
            store: Arc::new(MemoryStateStore::new()),
            surfaces,
            events: EventLog::new(),
            registry,
            session: None,
            last_source: None,
        }
    }

    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Opens `source`, replacing any open document. The previous document's
    /// view state is saved first.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn open(&mut self, source: DocumentSource) -> Result<(), ViewerError> {
        if self.session.is_some() {
            self.close()?;
        }
        self.last_source = Some(source.clone());

        let document = self.registry.open(self.provider.as_ref(), &source).await?;
        let info = document.info().clone();
        let restored = match self.store.load(&info) {
            Ok(state) => state,
            Err(err) => {
                warn!(?err, "ignoring unreadable view state");
                None
            }
        };
        let outline = resolve_outline(document.as_ref(), self.config.max_outline_depth).await;

        let mut session = Session::new(
            &self.config,
            source,
            document,
            outline,
            Arc::clone(&self.surfaces),
            self.events.clone(),
        );
        if let Some(state) = restored {
            session.restore(state);
        }

        self.events.push(ViewerEvent::DocumentOpened {
            id: info.id,
            page_count: info.page_count,
        });
        self.events.push(ViewerEvent::TotalPagesChanged {
            count: info.page_count,
        });
        info!(id = %info.id, pages = info.page_count, "document opened");

        let first_paint = session.refresh().await;
        self.session = Some(session);
        if let Err(err) = first_paint {
            warn!(%err, "initial render failed");
        }
        Ok(())
    }

    pub async fn retry_open(&mut self) -> Result<(), ViewerError> {
        let source = self.last_source.clone().ok_or(ViewerError::NoDocument)?;
        self.open(source).await
    }

    pub fn close(&mut self) -> Result<(), ViewerError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let saved = self.store.save(session.info(), &session.persisted_state());
        session.shutdown();
        self.registry.dispose(&session.source.key());
        self.events.push(ViewerEvent::DocumentClosed {
            id: session.info().id,
        });
        debug!(id = %session.info().id, "document closed");
        saved.map_err(ViewerError::from)
    }

    pub fn persist(&self) -> Result<(), ViewerError> {
        let session = self.session()?;
        self.store
            .save(session.info(), &session.persisted_state())
            .map_err(ViewerError::from)
    }

    pub async fn apply(&mut self, command: Command) -> Result<(), ViewerError> {
        self.apply_from(command, NavigationReason::User).await
    }

    /// Like [`Viewer::apply`], tagging page changes with `reason`.
    #[instrument(skip(self))]
    pub async fn apply_from(
        &mut self,
        command: Command,
        reason: NavigationReason,
    ) -> Result<(), ViewerError> {
        let bookmarks_changed = matches!(
            command,
            Command::AddBookmark { .. } | Command::RemoveBookmark { .. }
        );
        self.session_mut()?.apply(command, reason).await?;
        if bookmarks_changed {
            if let Err(err) = self.persist() {
                warn!(%err, "failed to save bookmarks");
            }
        }
        Ok(())
    }

    /// Feeds intersection ratios from the host's scroll observer. Only
    /// continuous mode follows them.
    pub async fn observe_visibility<I>(&mut self, entries: I) -> Result<(), ViewerError>
    where
        I: IntoIterator<Item = (PageNumber, f32)>,
    {
        let session = self.session_mut()?;
        if session.navigator.view_mode() != ViewMode::Continuous {
            return Ok(());
        }
        let Some(page) = session.visibility.observe_batch(entries) else {
            return Ok(());
        };
        let transition = session.navigator.sync_visible_page(page);
        session.navigate(transition).await
    }

    pub fn begin_transition(&mut self) -> Result<(), ViewerError> {
        self.session_mut()?.navigator.begin_transition();
        Ok(())
    }

    pub async fn finish_transition(&mut self) -> Result<(), ViewerError> {
        let session = self.session_mut()?;
        let transition = session.navigator.finish_transition();
        session.navigate(transition).await
    }

    /// Runs a search and reveals the first match. Returns the match count.
    pub async fn search(&mut self, query: &str) -> Result<usize, ViewerError> {
        let session = self.session_mut()?;
        session.search(query).await?;
        Ok(session.results.as_ref().map_or(0, SearchResults::len))
    }

    /// Selects match `index`, shows its page and emits a reveal event once
    /// the page has rendered. Returns whether the match was revealed.
    pub async fn jump_to(&mut self, index: usize) -> Result<bool, ViewerError> {
        self.session_mut()?.jump_to(index).await
    }

    pub fn document(&self) -> Option<&Arc<dyn DocumentHandle>> {
        self.session.as_ref().map(|session| &session.document)
    }

    pub fn renderer(&self) -> Option<&Arc<PageRenderer>> {
        self.session.as_ref().map(|session| &session.renderer)
    }

    pub fn current_page(&self) -> Option<PageNumber> {
        self.session
            .as_ref()
            .map(|session| session.navigator.current_page())
    }

    pub fn page_count(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |session| session.navigator.page_count())
    }

    pub fn visible_pages(&self) -> Vec<PageNumber> {
        self.session
            .as_ref()
            .map(|session| session.navigator.visible_pages())
            .unwrap_or_default()
    }

    pub fn view_mode(&self) -> ViewMode {
        self.session
            .as_ref()
            .map_or(self.config.default_view_mode, |session| {
                session.navigator.view_mode()
            })
    }

    pub fn generation(&self) -> u64 {
        self.session
            .as_ref()
            .map_or(0, |session| session.navigator.generation())
    }

    pub fn scale(&self) -> Option<f32> {
        self.session.as_ref().map(|session| session.scale)
    }

    pub fn rotation(&self) -> Option<Rotation> {
        self.session.as_ref().map(|session| session.rotation)
    }

    pub fn search_results(&self) -> Option<&SearchResults> {
        self.session
            .as_ref()
            .and_then(|session| session.results.as_ref())
    }

    pub fn highlights(&self, page: PageNumber) -> Vec<PixelRect> {
        self.search_results()
            .map(|results| {
                results
                    .matches_on_page(page)
                    .map(|found| found.pixel_rect)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn outline(&self) -> &[OutlineNode] {
        self.session
            .as_ref()
            .map(|session| session.outline.as_slice())
            .unwrap_or_default()
    }

    pub fn outline_items(&self) -> Vec<OutlineItem> {
        flatten(self.outline())
    }

    pub fn current_section(&self) -> Option<OutlineItem> {
        let page = self.current_page()?;
        section_for_page(&self.outline_items(), page).cloned()
    }

    pub fn bookmarks(&self) -> &[Bookmark] {
        self.session
            .as_ref()
            .map(|session| session.bookmarks.as_slice())
            .unwrap_or_default()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.renderer().map(|renderer| renderer.cache_stats())
    }

    fn session(&self) -> Result<&Session, ViewerError> {
        self.session.as_ref().ok_or(ViewerError::NoDocument)
    }

    fn session_mut(&mut self) -> Result<&mut Session, ViewerError> {
        self.session.as_mut().ok_or(ViewerError::NoDocument)
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(%err, "failed to save view state on shutdown");
        }
        self.registry.dispose_all();
    }
}

struct Session {
    source: DocumentSource,
    document: Arc<dyn DocumentHandle>,
    renderer: Arc<PageRenderer>,
    preloader: Preloader,
    navigator: Navigator,
    visibility: VisibilityTracker,
    text: TextIndex,
    results: Option<SearchResults>,
    outline: Vec<OutlineNode>,
    bookmarks: Vec<Bookmark>,
    surfaces: Arc<dyn SurfaceFactory>,
    events: EventLog,
    calculator: ScaleCalculator,
    request: ScaleRequest,
    scale: f32,
    rotation: Rotation,
}

impl Session {
    fn new(
        config: &ViewerConfig,
        source: DocumentSource,
        document: Arc<dyn DocumentHandle>,
        outline: Vec<OutlineNode>,
        surfaces: Arc<dyn SurfaceFactory>,
        events: EventLog,
    ) -> Self {
        let renderer = Arc::new(PageRenderer::new(
            Arc::clone(&document),
            config.cache_capacity,
            config.device_pixel_ratio,
            Arc::new(SurfaceRegistry::new()),
            events.clone(),
        ));
        let preloader = Preloader::new(
            Arc::clone(&renderer),
            config.preload_radius,
            config.preload_concurrency,
            config.cache_capacity,
        );
        let navigator = Navigator::new(document.page_count(), config.default_view_mode)
            .with_continuous_window(config.continuous_window);
        let request = ScaleRequest {
            view_mode: config.default_view_mode,
            fit_to_width: config.fit_to_width,
            standard_page_width_pt: config.standard_page_width_pt,
            fit_ratio: config.fit_width_ratio,
            ..ScaleRequest::default()
        };
        let mut calculator = ScaleCalculator::default();
        let scale = calculator.compute(&request);
        renderer.set_current_page(navigator.current_page());

        Self {
            source,
            document,
            renderer,
            preloader,
            navigator,
            visibility: VisibilityTracker::new(),
            text: TextIndex::new(),
            results: None,
            outline,
            bookmarks: Vec::new(),
            surfaces,
            events,
            calculator,
            request,
            scale,
            rotation: Rotation::Deg0,
        }
    }

    fn info(&self) -> &DocumentInfo {
        self.document.info()
    }

    fn params(&self) -> RenderParams {
        RenderParams::new(self.scale, self.rotation)
    }

    /// Applies saved state. Page position and zoom are only restored when
    /// the document has not changed since the state was saved.
    fn restore(&mut self, state: PersistedViewState) {
        self.bookmarks = state.bookmarks;
        let version = &self.document.info().version;
        if let Some(saved) = &state.document_version {
            if saved != version {
                debug!(%saved, %version, "document changed since last visit");
                return;
            }
        }

        self.rotation = state.rotation;
        self.request.fit_to_width = state.fit_to_width;
        self.request.explicit_scale = state.scale;
        if state.view_mode != self.navigator.view_mode() {
            self.navigator.set_view_mode(state.view_mode);
            self.request.view_mode = state.view_mode;
        }
        self.navigator.go_to(NavigationTarget::new(
            state.current_page,
            NavigationReason::User,
        ));
        self.renderer.set_current_page(self.navigator.current_page());
        self.scale = self.calculator.compute(&self.request);
    }

    fn persisted_state(&self) -> PersistedViewState {
        PersistedViewState {
            current_page: self.navigator.current_page(),
            scale: self.request.explicit_scale,
            rotation: self.rotation,
            view_mode: self.navigator.view_mode(),
            fit_to_width: self.request.fit_to_width,
            bookmarks: self.bookmarks.clone(),
            document_version: Some(self.info().version.clone()),
        }
    }

    fn shutdown(&self) {
        self.preloader.cancel();
        self.renderer.cancel_all();
        self.renderer.clear();
        self.text.clear();
    }

    async fn apply(&mut self, command: Command, reason: NavigationReason) -> Result<(), ViewerError> {
        match command {
            Command::NextPage { count } => {
                let transition = if count <= 1 {
                    self.navigator.next(reason)
                } else {
                    let step = self.navigator.view_mode().step() * count;
                    let target = self.navigator.current_page().saturating_add(step);
                    self.navigator.go_to(NavigationTarget::new(target, reason))
                };
                self.navigate(transition).await
            }
            Command::PrevPage { count } => {
                let transition = if count <= 1 {
                    self.navigator.prev(reason)
                } else {
                    let step = self.navigator.view_mode().step() * count;
                    let target = self.navigator.current_page().saturating_sub(step);
                    self.navigator.go_to(NavigationTarget::new(target, reason))
                };
                self.navigate(transition).await
            }
            Command::GotoPage { page } => {
                let transition = self.navigator.go_to(NavigationTarget::new(page, reason));
                self.navigate(transition).await
            }
            Command::FirstPage => {
                let transition = self.navigator.first(reason);
                self.navigate(transition).await
            }
            Command::LastPage => {
                let transition = self.navigator.last(reason);
                self.navigate(transition).await
            }
            Command::ZoomIn => self.zoom_to(self.scale * ZOOM_IN_FACTOR).await,
            Command::ZoomOut => self.zoom_to(self.scale * ZOOM_OUT_FACTOR).await,
            Command::ResetZoom => {
                self.request.zoom = ZoomControl::Viewer;
                self.zoom_to(1.0).await
            }
            Command::SetZoom { scale, control } => {
                self.request.zoom = control;
                self.zoom_to(scale).await
            }
            Command::SetFitToWidth { enabled } => {
                self.request.fit_to_width = enabled;
                self.rescale().await
            }
            Command::Resize { container_width_px } => {
                self.request.container_width_px = container_width_px;
                self.rescale().await
            }
            Command::Rotate { clockwise } => {
                let rotation = if clockwise {
                    self.rotation.clockwise()
                } else {
                    self.rotation.counter_clockwise()
                };
                self.rotate_to(rotation).await
            }
            Command::SetRotation { rotation } => self.rotate_to(rotation).await,
            Command::SetViewMode { mode } => self.set_view_mode(mode).await,
            Command::CycleViewMode => {
                let mode = self.navigator.view_mode().cycled();
                self.set_view_mode(mode).await
            }
            Command::Search { query } => self.search(&query).await,
            Command::SearchNext { count } => self.step_search(true, count).await,
            Command::SearchPrev { count } => self.step_search(false, count).await,
            Command::ClearSearch => {
                self.reset_search();
                Ok(())
            }
            Command::JumpToMatch { index } => self.jump_to(index).await.map(drop),
            Command::GotoOutlineItem { index } => {
                let Some(item) = flatten(&self.outline).into_iter().nth(index) else {
                    debug!(index, "no such outline entry");
                    return Ok(());
                };
                let target = NavigationTarget::new(item.page, NavigationReason::Outline);
                let transition = self.navigator.go_to(target);
                self.navigate(transition).await
            }
            Command::AddBookmark { title } => {
                let page = self.navigator.current_page();
                let title = title.unwrap_or_else(|| self.default_bookmark_title(page));
                self.bookmarks.push(Bookmark::new(page, title));
                Ok(())
            }
            Command::GotoBookmark { index } => {
                let Some(bookmark) = self.bookmarks.get(index) else {
                    return Ok(());
                };
                let target = NavigationTarget::new(bookmark.page, NavigationReason::User);
                let transition = self.navigator.go_to(target);
                self.navigate(transition).await
            }
            Command::RemoveBookmark { index } => {
                if index < self.bookmarks.len() {
                    self.bookmarks.remove(index);
                }
                Ok(())
            }
            Command::RetryPage { page } => self.retry_page(page).await,
        }
    }

    async fn retry_page(&mut self, page: PageNumber) -> Result<(), ViewerError> {
        let dropped = self.renderer.invalidate_page(page);
        debug!(page, dropped, "retrying page render");
        let target = self.surfaces.surface_for(page);
        match self.renderer.render_page(page, target, self.params()).wait().await {
            RenderOutcome::Failed { page, message } => {
                Err(RenderError::Page { page, message }.into())
            }
            RenderOutcome::Completed { .. } | RenderOutcome::Cancelled { .. } => Ok(()),
        }
    }

    fn default_bookmark_title(&self, page: PageNumber) -> String {
        section_for_page(&flatten(&self.outline), page)
            .map(|item| item.title.clone())
            .unwrap_or_else(|| format!("Page {page}"))
    }

    async fn navigate(&mut self, transition: Transition) -> Result<(), ViewerError> {
        let Transition::Moved { to, reason, .. } = transition else {
            return Ok(());
        };
        self.events.push(ViewerEvent::PageChanged { page: to, reason });
        self.renderer.set_current_page(to);
        self.refresh().await
    }

    async fn refresh(&mut self) -> Result<(), ViewerError> {
        let params = self.params();
        let requests: Vec<_> = self
            .navigator
            .visible_pages()
            .into_iter()
            .map(|page| (page, self.surfaces.surface_for(page)))
            .collect();
        let rendered = self.renderer.render_batch(requests, params).await;
        self.preloader
            .schedule(self.navigator.current_page(), params);
        rendered?;
        Ok(())
    }

    async fn rotate_to(&mut self, rotation: Rotation) -> Result<(), ViewerError> {
        if rotation == self.rotation {
            return Ok(());
        }
        debug!(from = %self.rotation, to = %rotation, "rotation changed");
        self.rotation = rotation;
        self.reset_search();
        self.refresh().await
    }

    async fn zoom_to(&mut self, scale: f32) -> Result<(), ViewerError> {
        self.request.fit_to_width = false;
        self.request.explicit_scale = self.request.zoom.clamp(scale);
        self.rescale().await
    }

    async fn rescale(&mut self) -> Result<(), ViewerError> {
        self.request.view_mode = self.navigator.view_mode();
        let scale = self.calculator.compute(&self.request);
        if (scale - self.scale).abs() <= f32::EPSILON {
            return Ok(());
        }
        debug!(from = self.scale, to = scale, "scale changed");
        self.scale = scale;
        self.reset_search();
        self.refresh().await
    }

    async fn set_view_mode(&mut self, mode: ViewMode) -> Result<(), ViewerError> {
        if mode == self.navigator.view_mode() {
            return Ok(());
        }
        self.preloader.cancel();
        self.renderer.cancel_all();
        self.renderer.surfaces().clear();
        self.visibility.reset();
        self.reset_search();

        let change = self.navigator.set_view_mode(mode);
        debug!(?change, "view mode changed");
        self.renderer.set_current_page(change.page);
        self.events.push(ViewerEvent::ViewModeChanged {
            mode,
            page: change.page,
        });
        if change.realigned_from.is_some() {
            self.events.push(ViewerEvent::PageChanged {
                page: change.page,
                reason: NavigationReason::User,
            });
        }

        self.request.view_mode = mode;
        self.scale = self.calculator.compute(&self.request);
        self.refresh().await
    }

    fn reset_search(&mut self) {
        if self.results.take().is_some() {
            debug!("search results cleared");
        }
    }

    async fn search(&mut self, query: &str) -> Result<(), ViewerError> {
        let matches = self
            .text
            .search(
                self.document.as_ref(),
                query,
                self.scale,
                self.rotation,
                &self.events,
            )
            .await?;
        if matches.is_empty() {
            self.results = (!query.trim().is_empty()).then(|| SearchResults::new(query, matches));
            return Ok(());
        }
        self.results = Some(SearchResults::new(query, matches));
        self.jump_to(0).await.map(drop)
    }

    async fn step_search(&mut self, forward: bool, count: usize) -> Result<(), ViewerError> {
        let Some(results) = self.results.as_mut() else {
            return Ok(());
        };
        if results.is_empty() {
            return Ok(());
        }
        for _ in 0..count.max(1) {
            if forward {
                results.next();
            } else {
                results.prev();
            }
        }
        match results.current_index() {
            Some(index) => self.jump_to(index).await.map(drop),
            None => Ok(()),
        }
    }

    async fn jump_to(&mut self, index: usize) -> Result<bool, ViewerError> {
        let Some(found) = self
            .results
            .as_mut()
            .and_then(|results| results.select(index))
            .cloned()
        else {
            return Ok(false);
        };

        let target = NavigationTarget::new(found.page, NavigationReason::Search);
        let transition = self.navigator.go_to(target);
        if matches!(transition, Transition::Queued(_)) {
            debug!(page = found.page, "match navigation queued, not revealing yet");
            return Ok(false);
        }
        self.navigate(transition).await?;

        let params = self.params();
        let surface = self.surfaces.surface_for(found.page);
        let outcome = self
            .renderer
            .render_page(found.page, surface, params)
            .wait()
            .await;
        if !outcome.is_completed() {
            debug!(?outcome, "match page did not render");
            return Ok(false);
        }
        let Some(surface) = self.renderer.surfaces().surface_for(found.page) else {
            return Ok(false);
        };

        let rect = if found.is_valid_for(params.scale, params.rotation) {
            found.pixel_rect
        } else {
            let page = self.document.page(found.page).await?;
            found.project(&page.viewport(params.scale, params.rotation))
        };
        self.events.push(ViewerEvent::RevealMatch {
            page: found.page,
            surface: surface.id(),
            rect,
        });
        Ok(true)
    }
}
