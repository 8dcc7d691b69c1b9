use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use epp_framework::datalayer::{
    EventType, Extractor, InputType, NotificationEvent, NotificationExtractor,
    Unstructured, unstructured_type,
};
use epp_framework::{CancellationToken, Plugin, TypedName};
use scc::HashMap;
use serde_json::Value;
use tracing::debug;

pub const LORA_EXTRACTOR_TYPE: &str = "lora-adapter-extractor";
pub const DEFAULT_ADAPTER_ANNOTATION: &str =
    "inference.networking.x-k8s.io/lora-adapters";

/// Where an object keeps its identity and its adapter list, as JSON pointers.
///
/// Without an identity pointer the object key (`namespace/name`) is used, so
/// same-named pods of different namespaces stay apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterLocator {
    pub id_pointer: Option<String>,
    pub adapters_pointer: String,
}

impl AdapterLocator {
    pub fn new(
        id_pointer: impl Into<String>,
        adapters_pointer: impl Into<String>,
    ) -> Self {
        Self {
            id_pointer: Some(id_pointer.into()),
            adapters_pointer: adapters_pointer.into(),
        }
    }

    /// Identity from the object key, adapters from the given annotation.
    pub fn from_annotation(key: &str) -> Self {
        let token = key.replace('~', "~0").replace('/', "~1");
        Self {
            id_pointer: None,
            adapters_pointer: format!("/metadata/annotations/{}", token),
        }
    }

    fn identity(&self, object: &Unstructured) -> anyhow::Result<String> {
        match &self.id_pointer {
            Some(pointer) => object
                .pointer(pointer)
                .and_then(Value::as_str)
                .map(String::from)
                .ok_or_else(|| anyhow!("object has no identity at {}", pointer)),
            None => object
                .key()
                .ok_or_else(|| anyhow!("object has no identity at /metadata/name")),
        }
    }
}

impl Default for AdapterLocator {
    fn default() -> Self {
        Self::from_annotation(DEFAULT_ADAPTER_ANNOTATION)
    }
}

/// Adapters currently served by each pod. Read by the scheduler.
#[derive(Clone, Default)]
pub struct AdapterStore {
    pods: Arc<HashMap<String, BTreeSet<String>>>,
}

impl AdapterStore {
    pub fn adapters(&self, pod: &str) -> Option<BTreeSet<String>> {
        self.pods.read(pod, |_, adapters| adapters.clone())
    }

    /// Pods serving `adapter`, sorted by name.
    pub fn pods_with(&self, adapter: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.pods.scan(|pod, adapters| {
            if adapters.contains(adapter) {
                out.push(pod.clone());
            }
        });
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut out = BTreeMap::new();
        self.pods.scan(|pod, adapters| {
            out.insert(pod.clone(), adapters.clone());
        });
        out
    }

    fn set(&self, pod: String, adapters: BTreeSet<String>) {
        self.pods.upsert(pod, adapters);
    }

    fn forget(&self, pod: &str) -> bool {
        self.pods.remove(pod).is_some()
    }
}

/// Tracks which LoRA adapters each pod serves.
///
/// An add/update replaces the pod's entry and a delete removes it, so
/// replaying an observation converges to the same store.
pub struct LoraAdapterExtractor {
    name: String,
    locator: AdapterLocator,
    store: AdapterStore,
}

impl LoraAdapterExtractor {
    pub fn new(
        name: impl Into<String>,
        locator: AdapterLocator,
        store: AdapterStore,
    ) -> Self {
        Self {
            name: name.into(),
            locator,
            store,
        }
    }

    pub fn store(&self) -> &AdapterStore {
        &self.store
    }
}

fn parse_adapters(value: &Value) -> anyhow::Result<BTreeSet<String>> {
    match value {
        Value::Null => Ok(BTreeSet::new()),
        Value::String(list) => Ok(list
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from)
            .collect()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(String::from)
                    .ok_or_else(|| anyhow!("adapter entry {} is not a string", item))
            })
            .collect(),
        other => bail!("expected adapter list, got {}", other),
    }
}

impl Plugin for LoraAdapterExtractor {
    fn typed_name(&self) -> TypedName {
        TypedName::new(LORA_EXTRACTOR_TYPE, self.name.clone())
    }
}

impl Extractor for LoraAdapterExtractor {
    fn expected_input_type(&self) -> InputType {
        unstructured_type()
    }

    fn as_notification_extractor(
        self: Arc<Self>,
    ) -> Option<Arc<dyn NotificationExtractor>> {
        Some(self)
    }
}

#[async_trait]
impl NotificationExtractor for LoraAdapterExtractor {
    async fn extract_notification(
        &self,
        _cancel: &CancellationToken,
        event: &NotificationEvent,
    ) -> anyhow::Result<()> {
        let id = self.locator.identity(&event.object)?;
        let pod = id.as_str();

        match event.r#type {
            EventType::AddOrUpdate => {
                let adapters = match event
                    .object
                    .pointer(&self.locator.adapters_pointer)
                {
                    Some(v) => parse_adapters(v)
                        .with_context(|| format!("pod {}", pod))?,
                    None => BTreeSet::new(),
                };
                debug!(pod, adapters = ?adapters, "tracking adapters");
                self.store.set(pod.to_string(), adapters);
            }
            EventType::Delete => {
                if self.store.forget(pod) {
                    debug!(pod, "forgot adapters");
                }
            }
        }
        Ok(())
    }
}
