use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use epp_framework::datalayer::{
    DataSource, Endpoint, Extractor, Gvk, NotificationEvent,
    NotificationExtractor, NotificationSource,
};
use epp_framework::{
    CancellationToken, DataLayerError, ExtractionErrors, Plugin, TypedName,
};
use scc::HashMap;
use tracing::{debug, error};

pub const NOTIFICATION_SOURCE_TYPE: &str = "k8s-notification-source";

/// Watches a single kind and dispatches its events to the registered
/// [`NotificationExtractor`]s.
///
/// The framework core owns the watch and calls [`NotificationSource::notify`]
/// once per event; `collect` is a no-op.
pub struct K8sNotificationSource {
    typed_name: TypedName,
    gvk: Gvk,
    /// Keyed by extractor name.
    extractors: HashMap<String, Arc<dyn NotificationExtractor>>,
    stats: NotifyStats,
}

/// Dispatch counters, kept in process only.
#[derive(Debug, Default)]
pub struct NotifyStats {
    events_dispatched: AtomicU64,
    extraction_failures: AtomicU64,
}

impl NotifyStats {
    pub fn events_dispatched(&self) -> u64 {
        self.events_dispatched.load(Ordering::Relaxed)
    }

    pub fn extraction_failures(&self) -> u64 {
        self.extraction_failures.load(Ordering::Relaxed)
    }
}

impl K8sNotificationSource {
    pub fn new(
        plugin_type: impl Into<String>,
        plugin_name: impl Into<String>,
        gvk: Gvk,
    ) -> Self {
        Self {
            typed_name: TypedName::new(plugin_type, plugin_name),
            gvk,
            extractors: HashMap::default(),
            stats: NotifyStats::default(),
        }
    }

    /// Source of the default plugin type.
    pub fn for_kind(plugin_name: impl Into<String>, gvk: Gvk) -> Self {
        Self::new(NOTIFICATION_SOURCE_TYPE, plugin_name, gvk)
    }

    pub fn stats(&self) -> &NotifyStats {
        &self.stats
    }

    fn snapshot(&self) -> Vec<Arc<dyn NotificationExtractor>> {
        let mut out = Vec::with_capacity(self.extractors.len());
        self.extractors.scan(|_, ext| out.push(Arc::clone(ext)));
        out
    }
}

impl Plugin for K8sNotificationSource {
    fn typed_name(&self) -> TypedName {
        self.typed_name.clone()
    }
}

#[async_trait]
impl DataSource for K8sNotificationSource {
    fn extractors(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.extractors.len());
        self.extractors
            .scan(|_, ext| names.push(ext.typed_name().to_string()));
        names.sort();
        names
    }

    /// Only [`NotificationExtractor`]s are accepted; plain extractors are
    /// rejected even though they satisfy the base capability.
    fn add_extractor(
        &self,
        extractor: Arc<dyn Extractor>,
    ) -> Result<(), DataLayerError> {
        let tn = extractor.typed_name();
        if tn.name.is_empty() {
            return Err(DataLayerError::InvalidArgument(format!(
                "cannot add extractor of type `{}` without a name to {}",
                tn.r#type, self.typed_name
            )));
        }
        let Some(ext) = extractor.as_notification_extractor() else {
            return Err(DataLayerError::CapabilityMismatch {
                extractor: tn,
                owner: self.typed_name.clone(),
            });
        };
        if self.extractors.insert(tn.name.clone(), ext).is_err() {
            return Err(DataLayerError::DuplicateExtractor {
                extractor: tn,
                owner: self.typed_name.clone(),
            });
        }
        debug!(source = %self.typed_name, gvk = %self.gvk, extractor = %tn, "registered extractor");
        Ok(())
    }

    async fn collect(
        &self,
        _cancel: &CancellationToken,
        _endpoint: &Endpoint,
    ) -> Result<(), DataLayerError> {
        Ok(())
    }

    fn as_notification_source(
        self: Arc<Self>,
    ) -> Option<Arc<dyn NotificationSource>> {
        Some(self)
    }
}

#[async_trait]
impl NotificationSource for K8sNotificationSource {
    fn gvk(&self) -> &Gvk {
        &self.gvk
    }

    /// Fans the event out to every extractor in turn. Failures are joined and
    /// logged; they never reach the caller and the event is not retried.
    async fn notify(&self, cancel: &CancellationToken, event: NotificationEvent) {
        if cancel.is_cancelled() {
            debug!(gvk = %self.gvk, event_type = %event.r#type, "notify called with a cancelled token");
        }

        let mut errs = ExtractionErrors::default();
        for ext in self.snapshot() {
            if let Err(e) = ext.extract_notification(cancel, &event).await {
                errs.push(ext.typed_name(), e);
            }
        }

        self.stats.events_dispatched.fetch_add(1, Ordering::Relaxed);
        if !errs.is_empty() {
            self.stats
                .extraction_failures
                .fetch_add(errs.len() as u64, Ordering::Relaxed);
            error!(
                gvk = %self.gvk,
                event_type = %event.r#type,
                object = %event.object.key().unwrap_or_default(),
                error = %errs,
                "extractor(s) failed processing notification"
            );
        }
    }
}
