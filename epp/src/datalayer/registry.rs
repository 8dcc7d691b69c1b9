use std::sync::Arc;

use epp_framework::datalayer::{
    DataSource, Endpoint, Extractor, Gvk, NotificationSource,
    unstructured_type,
};
use epp_framework::{CancellationToken, DataLayerError, Plugin, TypedName};
use scc::HashMap;
use tracing::{info, warn};

/// Data sources known to the framework core.
///
/// Source names are unique, and each kind is owned by at most one
/// notification source.
#[derive(Default)]
pub struct DataSourceRegistry {
    sources: HashMap<String, Arc<dyn DataSource>>,
    by_gvk: HashMap<Gvk, Arc<dyn NotificationSource>>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        source: Arc<dyn DataSource>,
    ) -> Result<(), DataLayerError> {
        let tn = source.typed_name();
        if tn.name.is_empty() {
            return Err(DataLayerError::InvalidArgument(format!(
                "cannot register data source of type `{}` without a name",
                tn.r#type
            )));
        }
        if self
            .sources
            .insert(tn.name.clone(), Arc::clone(&source))
            .is_err()
        {
            return Err(DataLayerError::DuplicateSource(tn));
        }

        if let Some(notification) = source.as_notification_source() {
            let gvk = notification.gvk().clone();
            if self.by_gvk.insert(gvk.clone(), notification).is_err() {
                self.sources.remove(&tn.name);
                let existing = self
                    .by_gvk
                    .read(&gvk, |_, s| s.typed_name())
                    .unwrap_or_default();
                return Err(DataLayerError::DuplicateNotificationSource {
                    gvk,
                    existing,
                });
            }
            info!(source = %tn, gvk = %gvk, "registered notification source");
        } else {
            info!(source = %tn, "registered data source");
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DataSource>> {
        self.sources.read(name, |_, s| Arc::clone(s))
    }

    pub fn notification_source(
        &self,
        gvk: &Gvk,
    ) -> Option<Arc<dyn NotificationSource>> {
        self.by_gvk.read(gvk, |_, s| Arc::clone(s))
    }

    pub fn sources(&self) -> Vec<TypedName> {
        let mut out = Vec::with_capacity(self.sources.len());
        self.sources.scan(|_, s| out.push(s.typed_name()));
        out.sort();
        out
    }

    pub fn gvks(&self) -> Vec<Gvk> {
        let mut out = Vec::with_capacity(self.by_gvk.len());
        self.by_gvk.scan(|gvk, _| out.push(gvk.clone()));
        out.sort();
        out
    }

    /// Registers `extractor` on the named source.
    ///
    /// Notification extractors must declare the unstructured input type
    /// before they can be wired to a notification source.
    pub fn add_extractor(
        &self,
        source_name: &str,
        extractor: Arc<dyn Extractor>,
    ) -> Result<(), DataLayerError> {
        let source = self.get(source_name).ok_or_else(|| {
            DataLayerError::SourceNotFound(source_name.to_string())
        })?;

        let is_notification_pair = Arc::clone(&source)
            .as_notification_source()
            .is_some()
            && Arc::clone(&extractor).as_notification_extractor().is_some();
        if is_notification_pair {
            let expected = extractor.expected_input_type();
            let delivered = unstructured_type();
            if expected != delivered {
                return Err(DataLayerError::InputTypeMismatch {
                    extractor: extractor.typed_name(),
                    owner: source.typed_name(),
                    expected: expected.name,
                    delivered: delivered.name,
                });
            }
        }
        source.add_extractor(extractor)
    }

    /// Polls every registered source for `endpoint` and returns how many
    /// failed. Failures are logged, not propagated.
    pub async fn collect(
        &self,
        cancel: &CancellationToken,
        endpoint: &Endpoint,
    ) -> usize {
        let mut sources = Vec::with_capacity(self.sources.len());
        self.sources.scan(|_, s| sources.push(Arc::clone(s)));

        let mut failed = 0;
        for source in sources {
            if let Err(e) = source.collect(cancel, endpoint).await {
                failed += 1;
                warn!(source = %source.typed_name(), endpoint = %endpoint, error = %e, "collect failed");
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use epp_framework::datalayer::{
        DataSource, Endpoint, Extractor, Gvk, InputType, NotificationEvent,
        NotificationExtractor,
    };
    use epp_framework::{CancellationToken, DataLayerError, Plugin, TypedName};

    use super::DataSourceRegistry;
    use crate::datalayer::source::K8sNotificationSource;

    /// Poll-based source that can be told to fail.
    struct PollSource {
        name: &'static str,
        fail: bool,
        polls: AtomicUsize,
    }

    impl Plugin for PollSource {
        fn typed_name(&self) -> TypedName {
            TypedName::new("poll-source", self.name)
        }
    }

    #[async_trait]
    impl DataSource for PollSource {
        fn extractors(&self) -> Vec<String> {
            Vec::new()
        }

        fn add_extractor(
            &self,
            _extractor: Arc<dyn Extractor>,
        ) -> Result<(), DataLayerError> {
            Ok(())
        }

        async fn collect(
            &self,
            _cancel: &CancellationToken,
            _endpoint: &Endpoint,
        ) -> Result<(), DataLayerError> {
            self.polls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(DataLayerError::Collect {
                    owner: self.typed_name(),
                    message: "endpoint unreachable".into(),
                });
            }
            Ok(())
        }
    }

    /// Notification extractor that declares the wrong input type.
    struct TypedExtractor;

    impl Plugin for TypedExtractor {
        fn typed_name(&self) -> TypedName {
            TypedName::new("typed", "metrics")
        }
    }

    impl Extractor for TypedExtractor {
        fn expected_input_type(&self) -> InputType {
            InputType::of::<Vec<u8>>()
        }

        fn as_notification_extractor(
            self: Arc<Self>,
        ) -> Option<Arc<dyn NotificationExtractor>> {
            Some(self)
        }
    }

    #[async_trait]
    impl NotificationExtractor for TypedExtractor {
        async fn extract_notification(
            &self,
            _cancel: &CancellationToken,
            _event: &NotificationEvent,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn pods(name: &str) -> Arc<K8sNotificationSource> {
        Arc::new(K8sNotificationSource::for_kind(
            name,
            Gvk::new("", "v1", "Pod"),
        ))
    }

    #[test]
    fn one_notification_source_per_kind() {
        let registry = DataSourceRegistry::new();
        registry.register(pods("pods-a")).unwrap();

        let err = registry.register(pods("pods-b")).unwrap_err();
        match err {
            DataLayerError::DuplicateNotificationSource { gvk, existing } => {
                assert_eq!(gvk, Gvk::new("", "v1", "Pod"));
                assert_eq!(existing.name, "pods-a");
            }
            other => panic!("unexpected error: {other}"),
        }
        // the losing source is not left half-registered
        assert!(registry.get("pods-b").is_none());
        assert_eq!(registry.sources().len(), 1);
        assert_eq!(registry.gvks(), vec![Gvk::new("", "v1", "Pod")]);
    }

    #[test]
    fn source_names_are_unique() {
        let registry = DataSourceRegistry::new();
        registry.register(pods("pods")).unwrap();
        let other_kind = Arc::new(K8sNotificationSource::for_kind(
            "pods",
            Gvk::new("apps", "v1", "Deployment"),
        ));
        assert!(matches!(
            registry.register(other_kind),
            Err(DataLayerError::DuplicateSource(_))
        ));
        assert!(
            registry
                .notification_source(&Gvk::new("apps", "v1", "Deployment"))
                .is_none()
        );
    }

    #[test]
    fn wiring_checks_declared_input_type() {
        let registry = DataSourceRegistry::new();
        registry.register(pods("pods")).unwrap();

        let err = registry
            .add_extractor("pods", Arc::new(TypedExtractor))
            .unwrap_err();
        assert!(matches!(err, DataLayerError::InputTypeMismatch { .. }));
        assert!(registry.get("pods").unwrap().extractors().is_empty());

        assert!(matches!(
            registry.add_extractor("missing", Arc::new(TypedExtractor)),
            Err(DataLayerError::SourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn collect_polls_every_source() {
        let registry = DataSourceRegistry::new();
        let ok = Arc::new(PollSource {
            name: "ok",
            fail: false,
            polls: AtomicUsize::new(0),
        });
        let broken = Arc::new(PollSource {
            name: "broken",
            fail: true,
            polls: AtomicUsize::new(0),
        });
        registry.register(ok.clone()).unwrap();
        registry.register(broken.clone()).unwrap();
        registry.register(pods("pods")).unwrap();

        let endpoint = Endpoint {
            namespace: "default".into(),
            name: "pod-1".into(),
            address: "10.0.0.1:8000".into(),
        };
        let failed = registry
            .collect(&CancellationToken::new(), &endpoint)
            .await;
        assert_eq!(failed, 1);
        assert_eq!(ok.polls.load(Ordering::Relaxed), 1);
        assert_eq!(broken.polls.load(Ordering::Relaxed), 1);
    }
}
