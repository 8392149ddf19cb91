use std::sync::Arc;

use docview_core::PageNumber;
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::renderer::{PageRenderer, RenderOutcome, RenderParams};

pub const DEFAULT_PRELOAD_CONCURRENCY: usize = 2;

/// Pages to warm, nearest first: `current`, then alternating after/before
/// out to `radius`, never more than `limit` pages.
pub fn preload_order(
    current: PageNumber,
    radius: usize,
    page_count: usize,
    limit: usize,
) -> Vec<PageNumber> {
    if page_count == 0 || limit == 0 {
        return Vec::new();
    }
    let current = current.clamp(1, page_count);
    let mut pages = vec![current];
    for distance in 1..=radius {
        if let Some(after) = current.checked_add(distance).filter(|p| *p <= page_count) {
            pages.push(after);
        }
        if let Some(before) = current.checked_sub(distance).filter(|p| *p >= 1) {
            pages.push(before);
        }
    }
    pages.truncate(limit);
    pages
}

pub struct PreloadHandle {
    token: CancelToken,
    jobs: Vec<(PageNumber, JoinHandle<RenderOutcome>)>,
}

impl PreloadHandle {
    pub fn pages(&self) -> Vec<PageNumber> {
        self.jobs.iter().map(|(page, _)| *page).collect()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub async fn join(self) -> Vec<RenderOutcome> {
        let mut outcomes = Vec::with_capacity(self.jobs.len());
        for (page, job) in self.jobs {
            outcomes.push(match job.await {
                Ok(outcome) => outcome,
                Err(err) => RenderOutcome::Failed {
                    page,
                    message: err.to_string(),
                },
            });
        }
        outcomes
    }
}

pub struct Preloader {
    renderer: Arc<PageRenderer>,
    permits: Arc<Semaphore>,
    radius: usize,
    limit: usize,
    active: Mutex<Option<CancelToken>>,
}

impl Preloader {
    pub fn new(renderer: Arc<PageRenderer>, radius: usize, concurrency: usize, limit: usize) -> Self {
        Self {
            renderer,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            radius,
            limit,
            active: Mutex::new(None),
        }
    }

    /// Starts a new pass around `current`, cancelling the previous one.
    pub fn schedule(&self, current: PageNumber, params: RenderParams) -> PreloadHandle {
        let token = CancelToken::new();
        if let Some(previous) = self.active.lock().replace(token.clone()) {
            previous.cancel();
        }

        let page_count = self.renderer.document().page_count();
        let pages = preload_order(current, self.radius, page_count, self.limit);
        debug!(current, ?pages, "scheduling preload");

        let jobs = pages
            .into_iter()
            .map(|page| {
                let renderer = Arc::clone(&self.renderer);
                let permits = Arc::clone(&self.permits);
                let token = token.clone();
                let job = tokio::spawn(async move {
                    preload_page(renderer, permits, page, params, token).await
                });
                (page, job)
            })
            .collect();

        PreloadHandle { token, jobs }
    }

    pub fn cancel(&self) {
        if let Some(token) = self.active.lock().take() {
            token.cancel();
        }
    }
}

async fn preload_page(
    renderer: Arc<PageRenderer>,
    permits: Arc<Semaphore>,
    page: PageNumber,
    params: RenderParams,
    token: CancelToken,
) -> RenderOutcome {
    let _permit = tokio::select! {
        biased;
        _ = token.cancelled() => return RenderOutcome::Cancelled { page },
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return RenderOutcome::Cancelled { page },
        },
    };

    // Yield to user-initiated renders.
    let mut user_renders = renderer.user_renders();
    let idle = tokio::select! {
        biased;
        _ = token.cancelled() => false,
        idle = wait_until_idle(&mut user_renders) => idle,
    };
    if !idle {
        return RenderOutcome::Cancelled { page };
    }

    let outcome = renderer.prerender(page, params, &token).await;
    debug!(page, ?outcome, "preload finished");
    outcome
}

async fn wait_until_idle(user_renders: &mut watch::Receiver<usize>) -> bool {
    user_renders
        .wait_for(|in_flight| *in_flight == 0)
        .await
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    use docview_core::testing::FakeDocument;
    use docview_core::{DocumentHandle, EventLog, MemorySurface, Rotation, SurfaceRegistry};

    #[test]
    fn order_is_nearest_first_and_bounded() {
        assert_eq!(preload_order(5, 2, 10, 10), vec![5, 6, 4, 7, 3]);
        assert_eq!(preload_order(1, 2, 10, 10), vec![1, 2, 3]);
        assert_eq!(preload_order(10, 1, 10, 10), vec![10, 9]);
        assert_eq!(preload_order(5, 3, 10, 4), vec![5, 6, 4, 7]);
        assert!(preload_order(1, 1, 0, 5).is_empty());
    }

    fn setup(document: FakeDocument) -> (Arc<PageRenderer>, Arc<FakeDocument>) {
        let document = Arc::new(document);
        let renderer = Arc::new(PageRenderer::new(
            Arc::clone(&document) as Arc<dyn DocumentHandle>,
            5,
            1.0,
            Arc::new(SurfaceRegistry::new()),
            EventLog::new(),
        ));
        (renderer, document)
    }

    #[tokio::test]
    async fn warms_the_cache_around_the_current_page() {
        let (renderer, document) = setup(FakeDocument::builder(10).build());
        renderer.set_current_page(5);
        let preloader = Preloader::new(Arc::clone(&renderer), 1, 2, 5);
        let params = RenderParams::new(1.0, Rotation::Deg0);

        let outcomes = preloader.schedule(5, params).join().await;
        assert!(outcomes.iter().all(RenderOutcome::is_completed));
        for page in [4, 5, 6] {
            assert!(renderer.is_cached(page, params));
        }

        // Showing a preloaded page is a cache hit.
        let surface = Arc::new(MemorySurface::new());
        let shown = renderer.render_page(6, surface, params).wait().await;
        assert_eq!(
            shown,
            RenderOutcome::Completed {
                page: 6,
                from_cache: true
            }
        );
        assert_eq!(document.render_count_for(6), 1);
    }

    #[tokio::test]
    async fn waits_for_user_renders_to_finish() {
        let (renderer, document) = setup(FakeDocument::builder(10).gated_renders().build());
        let preloader = Preloader::new(Arc::clone(&renderer), 1, 2, 5);
        let params = RenderParams::new(1.0, Rotation::Deg0);

        let user = renderer.render_page(3, Arc::new(MemorySurface::new()), params);
        let preload = preloader.schedule(5, params);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(document.render_count(), 1);

        document.release_renders(4);
        assert!(user.wait().await.is_completed());
        let outcomes = preload.join().await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(document.render_count(), 4);
    }

    #[tokio::test]
    async fn background_renders_are_limited_to_two() {
        let (renderer, document) = setup(FakeDocument::builder(20).gated_renders().build());
        let preloader = Preloader::new(
            Arc::clone(&renderer),
            3,
            DEFAULT_PRELOAD_CONCURRENCY,
            10,
        );
        let params = RenderParams::new(1.0, Rotation::Deg0);

        let pass = preloader.schedule(10, params);
        assert_eq!(pass.pages(), vec![10, 11, 9, 12, 8, 13, 7]);
        for _ in 0..100 {
            if document.render_count() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(document.render_count(), 2);

        document.release_renders(7);
        let outcomes = pass.join().await;
        assert!(outcomes.iter().all(RenderOutcome::is_completed));
        assert_eq!(document.render_count(), 7);
        assert_eq!(document.peak_concurrent_renders(), 2);
    }

    #[tokio::test]
    async fn new_schedule_cancels_the_previous_pass() {
        let (renderer, document) = setup(FakeDocument::builder(10).gated_renders().build());
        let preloader = Preloader::new(Arc::clone(&renderer), 1, 2, 5);
        let params = RenderParams::new(1.0, Rotation::Deg0);

        let first = preloader.schedule(2, params);
        let second = preloader.schedule(8, params);
        document.release_renders(10);

        let cancelled = first.join().await;
        assert!(cancelled
            .iter()
            .all(|outcome| matches!(outcome, RenderOutcome::Cancelled { .. })));
        assert!(second.join().await.iter().all(RenderOutcome::is_completed));
    }
}
