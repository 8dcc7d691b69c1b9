pub mod extractor;
pub mod registry;
pub mod source;
pub mod watch;

use std::sync::Arc;

use epp_framework::datalayer::Gvk;
use epp_framework::{CancellationToken, DataLayerError};
use scc::HashMap;
use tokio_util::task::TaskTracker;
use tracing::info;

pub use registry::DataSourceRegistry;
pub use watch::{EventPump, ObjectCache, WatchError, WatchEvent};

struct PumpHandle {
    sender: flume::Sender<WatchEvent>,
    cache: Arc<ObjectCache>,
}

/// Owner of the data sources and of the per-kind event pumps feeding them.
pub struct Datalayer {
    registry: Arc<DataSourceRegistry>,
    pumps: HashMap<Gvk, PumpHandle>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    buffer: usize,
    namespace: Option<String>,
}

impl Datalayer {
    /// `buffer` bounds each pump's queue; `namespace` restricts delivery to
    /// objects of that namespace (cluster-scoped objects always pass).
    pub fn new(buffer: usize, namespace: Option<String>) -> Self {
        Self {
            registry: Arc::new(DataSourceRegistry::new()),
            pumps: HashMap::default(),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            buffer: buffer.max(1),
            namespace,
        }
    }

    pub fn registry(&self) -> &Arc<DataSourceRegistry> {
        &self.registry
    }

    /// Starts delivering events of `gvk` to its notification source and
    /// returns the channel the watch side feeds. Calling it again for the
    /// same kind returns the existing channel.
    pub fn watch(
        &self,
        gvk: &Gvk,
    ) -> Result<flume::Sender<WatchEvent>, DataLayerError> {
        if let Some(sender) = self.pumps.read(gvk, |_, p| p.sender.clone()) {
            return Ok(sender);
        }
        let source = self
            .registry
            .notification_source(gvk)
            .ok_or_else(|| DataLayerError::NoNotificationSource(gvk.clone()))?;

        let (sender, receiver) = flume::bounded(self.buffer);
        let cache = Arc::new(ObjectCache::default());
        let handle = PumpHandle {
            sender: sender.clone(),
            cache: Arc::clone(&cache),
        };
        if self.pumps.insert(gvk.clone(), handle).is_err() {
            // lost a race with a concurrent call for the same kind
            return self
                .pumps
                .read(gvk, |_, p| p.sender.clone())
                .ok_or_else(|| DataLayerError::NoNotificationSource(gvk.clone()));
        }

        let pump =
            EventPump::new(source, cache, self.namespace.clone(), receiver);
        self.tracker.spawn(pump.run(self.cancel.child_token()));
        info!(gvk = %gvk, buffer = self.buffer, "watching kind");
        Ok(sender)
    }

    /// Last observed objects of a watched kind.
    pub fn object_cache(&self, gvk: &Gvk) -> Option<Arc<ObjectCache>> {
        self.pumps.read(gvk, |_, p| Arc::clone(&p.cache))
    }

    /// Stops all pumps; no `notify` call starts after this returns.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("data layer stopped");
    }
}
