use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use docview_core::{DocumentHandle, DocumentProvider, DocumentSource, LoadError};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

type Slot = Arc<OnceCell<Arc<dyn DocumentHandle>>>;

/// Concurrent opens of the same source share a single provider call. A
/// failed or timed-out open leaves the slot empty so the next call retries.
pub struct DocumentRegistry {
    slots: Mutex<HashMap<String, Slot>>,
    timeout: Duration,
}

impl DocumentRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip(self, provider), fields(source = %source))]
    pub async fn open(
        &self,
        provider: &dyn DocumentProvider,
        source: &DocumentSource,
    ) -> Result<Arc<dyn DocumentHandle>, LoadError> {
        let key = source.key();
        let slot = Arc::clone(self.slots.lock().entry(key.clone()).or_default());

        let timeout = self.timeout;
        let document = slot
            .get_or_try_init(|| async move {
                debug!(%key, "opening document");
                match tokio::time::timeout(timeout, provider.open(source)).await {
                    Ok(opened) => opened,
                    Err(_) => {
                        warn!(%key, ?timeout, "document open timed out");
                        Err(LoadError::Timeout { after: timeout })
                    }
                }
            })
            .await?;

        info!(pages = document.page_count(), "document ready");
        Ok(Arc::clone(document))
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn DocumentHandle>> {
        self.slots
            .lock()
            .get(key)
            .and_then(|slot| slot.get().cloned())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn dispose(&self, key: &str) -> bool {
        let removed = self.slots.lock().remove(key);
        match removed.as_ref().and_then(|slot| slot.get()) {
            Some(document) => {
                debug!(%key, "disposing document");
                document.dispose();
                true
            }
            None => false,
        }
    }

    pub fn dispose_all(&self) {
        let slots: Vec<_> = self.slots.lock().drain().collect();
        for (key, slot) in slots {
            if let Some(document) = slot.get() {
                debug!(%key, "disposing document");
                document.dispose();
            }
        }
    }
}

impl Default for DocumentRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_OPEN_TIMEOUT)
    }
}
