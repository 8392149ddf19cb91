use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use docview_core::{
    Bitmap, CacheKey, CacheStats, Disposable, DocumentHandle, EventLog, PageFailure, PageNumber,
    RenderCache, RenderError, Rotation, SurfaceId, SurfaceRegistry, TargetSurface, ViewerEvent,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::cancel::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParams {
    pub scale: f32,
    pub rotation: Rotation,
}

impl RenderParams {
    pub fn new(scale: f32, rotation: Rotation) -> Self {
        Self { scale, rotation }
    }

    pub fn cache_key(&self, page: PageNumber) -> CacheKey {
        CacheKey::new(page, self.scale, self.rotation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Idle,
    Fetching,
    Rendering,
    Promoting,
    Blitting,
    Done,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Completed { page: PageNumber, from_cache: bool },
    Cancelled { page: PageNumber },
    Failed { page: PageNumber, message: String },
}

impl RenderOutcome {
    pub fn page(&self) -> PageNumber {
        match self {
            RenderOutcome::Completed { page, .. }
            | RenderOutcome::Cancelled { page }
            | RenderOutcome::Failed { page, .. } => *page,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RenderOutcome::Completed { .. })
    }
}

pub struct RenderTask {
    page: PageNumber,
    token: CancelToken,
    phase: Arc<Mutex<RenderPhase>>,
    handle: JoinHandle<RenderOutcome>,
}

impl RenderTask {
    pub fn page(&self) -> PageNumber {
        self.page
    }

    pub fn phase(&self) -> RenderPhase {
        *self.phase.lock()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub async fn wait(self) -> RenderOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancelled() => RenderOutcome::Cancelled { page: self.page },
            Err(err) => RenderOutcome::Failed {
                page: self.page,
                message: err.to_string(),
            },
        }
    }
}

struct Ticket {
    id: u64,
    token: CancelToken,
}

enum Halt {
    Cancelled,
    Failed(String),
}

pub struct PageRenderer {
    document: Arc<dyn DocumentHandle>,
    cache: Mutex<RenderCache<Bitmap>>,
    surfaces: Arc<SurfaceRegistry>,
    events: EventLog,
    device_pixel_ratio: f32,
    tickets: Mutex<HashMap<SurfaceId, Ticket>>,
    next_ticket: AtomicU64,
    current_page: AtomicUsize,
    decodes: AtomicUsize,
    user_renders: watch::Sender<usize>,
}

impl PageRenderer {
    pub fn new(
        document: Arc<dyn DocumentHandle>,
        cache_capacity: usize,
        device_pixel_ratio: f32,
        surfaces: Arc<SurfaceRegistry>,
        events: EventLog,
    ) -> Self {
        let (user_renders, _) = watch::channel(0);
        Self {
            document,
            cache: Mutex::new(RenderCache::new(cache_capacity)),
            surfaces,
            events,
            device_pixel_ratio,
            tickets: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
            current_page: AtomicUsize::new(1),
            decodes: AtomicUsize::new(0),
            user_renders,
        }
    }

    pub fn document(&self) -> &Arc<dyn DocumentHandle> {
        &self.document
    }

    pub fn surfaces(&self) -> &Arc<SurfaceRegistry> {
        &self.surfaces
    }

    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    pub fn cached_keys(&self) -> Vec<CacheKey> {
        self.cache.lock().keys()
    }

    pub fn is_cached(&self, page: PageNumber, params: RenderParams) -> bool {
        self.cache.lock().contains(&params.cache_key(page))
    }

    pub fn current_page(&self) -> PageNumber {
        self.current_page.load(Ordering::SeqCst)
    }

    pub fn set_current_page(&self, page: PageNumber) {
        self.current_page.store(page, Ordering::SeqCst);
        self.cache.lock().evict_if_over_capacity(page);
    }

    pub fn user_renders(&self) -> watch::Receiver<usize> {
        self.user_renders.subscribe()
    }

    pub fn render_page(
        self: &Arc<Self>,
        page: PageNumber,
        target: Arc<dyn TargetSurface>,
        params: RenderParams,
    ) -> RenderTask {
        let token = CancelToken::new();
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let surface = target.id();
        {
            let mut tickets = self.tickets.lock();
            let previous = tickets.insert(
                surface,
                Ticket {
                    id: ticket,
                    token: token.clone(),
                },
            );
            if let Some(previous) = previous {
                debug!(page, ?surface, "superseding in-flight render");
                previous.token.cancel();
            }
        }

        self.user_renders.send_modify(|count| *count += 1);
        let phase = Arc::new(Mutex::new(RenderPhase::Idle));
        let renderer = Arc::clone(self);
        let task_token = token.clone();
        let task_phase = Arc::clone(&phase);
        let handle = tokio::spawn(async move {
            let _activity = UserRenderGuard(Arc::clone(&renderer));
            let outcome = renderer
                .run(page, target, params, ticket, &task_token, &task_phase)
                .await;
            renderer.release_ticket(surface, ticket);
            outcome
        });

        RenderTask {
            page,
            token,
            phase,
            handle,
        }
    }

    /// Renders every request and reports per-page failures as events. Errors
    /// only when something failed and nothing completed.
    pub async fn render_batch(
        self: &Arc<Self>,
        requests: Vec<(PageNumber, Arc<dyn TargetSurface>)>,
        params: RenderParams,
    ) -> Result<Vec<RenderOutcome>, RenderError> {
        let tasks: Vec<_> = requests
            .into_iter()
            .map(|(page, target)| self.render_page(page, target, params))
            .collect();

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            outcomes.push(task.wait().await);
        }

        let completed = outcomes.iter().filter(|o| o.is_completed()).count();
        let failures: Vec<_> = outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                RenderOutcome::Failed { page, message } => Some(PageFailure {
                    page: *page,
                    message: message.clone(),
                }),
                _ => None,
            })
            .collect();

        if completed == 0 && !failures.is_empty() {
            return Err(RenderError::NothingRendered { failures });
        }
        Ok(outcomes)
    }

    /// Decodes a page into the cache without touching any surface. Used by
    /// the preloader.
    pub async fn prerender(
        &self,
        page: PageNumber,
        params: RenderParams,
        token: &CancelToken,
    ) -> RenderOutcome {
        let key = params.cache_key(page);
        if self.cache.lock().contains(&key) {
            return RenderOutcome::Completed {
                page,
                from_cache: true,
            };
        }
        let phase = Mutex::new(RenderPhase::Idle);
        match self.decode(page, params, token, &phase).await {
            Ok(bitmap) => {
                let mut cache = self.cache.lock();
                cache.put(key, bitmap);
                cache.evict_if_over_capacity(self.current_page());
                if token.is_cancelled() {
                    RenderOutcome::Cancelled { page }
                } else {
                    RenderOutcome::Completed {
                        page,
                        from_cache: false,
                    }
                }
            }
            Err(Halt::Cancelled) => RenderOutcome::Cancelled { page },
            Err(Halt::Failed(message)) => RenderOutcome::Failed { page, message },
        }
    }

    pub fn cancel_all(&self) {
        let tickets: Vec<_> = self.tickets.lock().drain().collect();
        for (_, ticket) in &tickets {
            ticket.token.cancel();
        }
        if !tickets.is_empty() {
            debug!(cancelled = tickets.len(), "cancelled in-flight renders");
        }
    }

    /// Drops every cached render of `page` so the next request decodes it.
    pub fn invalidate_page(&self, page: PageNumber) -> usize {
        self.cache.lock().invalidate_page(page)
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
        self.surfaces.clear();
    }

    #[instrument(skip(self, target, token, phase), fields(surface = ?target.id()))]
    async fn run(
        &self,
        page: PageNumber,
        target: Arc<dyn TargetSurface>,
        params: RenderParams,
        ticket: u64,
        token: &CancelToken,
        phase: &Mutex<RenderPhase>,
    ) -> RenderOutcome {
        let key = params.cache_key(page);
        {
            let mut cache = self.cache.lock();
            if cache.get(&key).is_some() {
                debug!(page, "render cache hit");
                return self.finish(&mut cache, key, None, &target, ticket, token, phase);
            }
        }

        match self.decode(page, params, token, phase).await {
            Ok(bitmap) => {
                let mut cache = self.cache.lock();
                self.finish(&mut cache, key, Some(bitmap), &target, ticket, token, phase)
            }
            Err(Halt::Cancelled) => {
                set_phase(phase, page, RenderPhase::Cancelled);
                RenderOutcome::Cancelled { page }
            }
            Err(Halt::Failed(message)) => {
                set_phase(phase, page, RenderPhase::Done);
                self.report_failure(page, &message);
                RenderOutcome::Failed { page, message }
            }
        }
    }

    async fn decode(
        &self,
        page: PageNumber,
        params: RenderParams,
        token: &CancelToken,
        phase: &Mutex<RenderPhase>,
    ) -> Result<Bitmap, Halt> {
        set_phase(phase, page, RenderPhase::Fetching);
        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Halt::Cancelled),
            fetched = self.document.page(page) => fetched,
        };
        let handle = fetched.map_err(|err| Halt::Failed(format!("{err:#}")))?;

        let viewport = handle.viewport(params.scale, params.rotation);
        let (width, height) = viewport.device_size(self.device_pixel_ratio);
        let mut bitmap = Bitmap::new(width, height);

        set_phase(phase, page, RenderPhase::Rendering);
        self.decodes.fetch_add(1, Ordering::SeqCst);
        let rendered = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = handle.render(&viewport, &mut bitmap) => Some(result),
        };
        match rendered {
            Some(Ok(())) => Ok(bitmap),
            Some(Err(err)) => {
                bitmap.dispose();
                Err(Halt::Failed(format!("{err:#}")))
            }
            None => {
                bitmap.dispose();
                Err(Halt::Cancelled)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        cache: &mut RenderCache<Bitmap>,
        key: CacheKey,
        fresh: Option<Bitmap>,
        target: &Arc<dyn TargetSurface>,
        ticket: u64,
        token: &CancelToken,
        phase: &Mutex<RenderPhase>,
    ) -> RenderOutcome {
        let page = key.page;
        let from_cache = fresh.is_none();
        if let Some(bitmap) = fresh {
            set_phase(phase, page, RenderPhase::Promoting);
            cache.put(key, bitmap);
        }

        if token.is_cancelled() || !self.is_newest(target.id(), ticket) {
            set_phase(phase, page, RenderPhase::Cancelled);
            cache.evict_if_over_capacity(self.current_page());
            return RenderOutcome::Cancelled { page };
        }

        set_phase(phase, page, RenderPhase::Blitting);
        let blitted = match cache.peek(&key) {
            Some(bitmap) => target.blit(page, bitmap),
            None => Err(anyhow::anyhow!("rendered bitmap missing from cache")),
        };
        cache.evict_if_over_capacity(self.current_page());
        set_phase(phase, page, RenderPhase::Done);

        match blitted {
            Ok(()) => {
                self.surfaces.register(page, Arc::clone(target));
                RenderOutcome::Completed { page, from_cache }
            }
            Err(err) => {
                let message = format!("{err:#}");
                self.report_failure(page, &message);
                RenderOutcome::Failed { page, message }
            }
        }
    }

    fn is_newest(&self, surface: SurfaceId, ticket: u64) -> bool {
        self.tickets
            .lock()
            .get(&surface)
            .map_or(false, |current| current.id == ticket)
    }

    fn release_ticket(&self, surface: SurfaceId, ticket: u64) {
        let mut tickets = self.tickets.lock();
        if tickets.get(&surface).map_or(false, |current| current.id == ticket) {
            tickets.remove(&surface);
        }
    }

    fn report_failure(&self, page: PageNumber, message: &str) {
        warn!(page, error = %message, "page render failed");
        self.events.push(ViewerEvent::RenderError {
            page,
            message: message.to_string(),
        });
    }
}

fn set_phase(phase: &Mutex<RenderPhase>, page: PageNumber, next: RenderPhase) {
    debug!(page, phase = ?next, "render phase");
    *phase.lock() = next;
}

struct UserRenderGuard(Arc<PageRenderer>);

impl Drop for UserRenderGuard {
    fn drop(&mut self) {
        self.0
            .user_renders
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}
