use std::io::Read;
use std::sync::Arc;
use std::thread;

use epp_framework::datalayer::{
    NotificationEvent, NotificationSource, Unstructured,
};
use epp_framework::{CancellationToken, DataLayerError};
use scc::HashMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

/// Mutation reported by the watch substrate for one object.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(Unstructured),
    Modified(Unstructured),
    Deleted(Unstructured),
    /// Deletion observed after the final state was lost (e.g. across a
    /// relist); only the object key is known.
    DeletedFinalStateUnknown { key: String },
}

#[derive(thiserror::Error, Debug)]
pub enum WatchError {
    #[error("malformed watch event: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unknown watch event type `{0}`")]
    UnknownType(String),
    #[error("invalid watch object: {0}")]
    InvalidObject(#[from] DataLayerError),
    #[error("watch stream error: {0}")]
    Stream(String),
}

#[derive(Deserialize)]
struct RawWatchEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    object: Value,
}

impl WatchEvent {
    /// Decodes one `kubectl get --watch --output-watch-events -o json`
    /// document. Bookmarks carry no object change and yield `None`.
    pub fn decode(raw: Value) -> Result<Option<WatchEvent>, WatchError> {
        let raw: RawWatchEvent = serde_json::from_value(raw)?;
        let event = match raw.event_type.as_str() {
            "ADDED" => WatchEvent::Added(raw.object.try_into()?),
            "MODIFIED" => WatchEvent::Modified(raw.object.try_into()?),
            "DELETED" => WatchEvent::Deleted(raw.object.try_into()?),
            "BOOKMARK" => return Ok(None),
            "ERROR" => {
                let message = raw
                    .object
                    .pointer("/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                return Err(WatchError::Stream(message));
            }
            other => return Err(WatchError::UnknownType(other.to_string())),
        };
        Ok(Some(event))
    }

    /// Reads a stream of concatenated watch documents. A syntax error ends
    /// the stream; a well-formed but invalid document is reported and skipped.
    pub fn stream_from_reader<R: Read>(
        reader: R,
    ) -> impl Iterator<Item = Result<Option<WatchEvent>, WatchError>> {
        serde_json::Deserializer::from_reader(reader)
            .into_iter::<Value>()
            .map(|doc| -> Result<Option<WatchEvent>, WatchError> {
                WatchEvent::decode(doc?)
            })
    }

    /// Namespace of the affected object, if it is namespaced.
    pub fn namespace(&self) -> Option<&str> {
        match self {
            WatchEvent::Added(obj)
            | WatchEvent::Modified(obj)
            | WatchEvent::Deleted(obj) => obj.namespace(),
            WatchEvent::DeletedFinalStateUnknown { key } => {
                key.split_once('/').map(|(ns, _)| ns)
            }
        }
    }
}

/// Feeds watch documents read from `reader` into `sender` until the input
/// ends or the pump is gone.
///
/// Runs on its own detached thread: a read parked on an open pipe or TTY must
/// not hold up runtime shutdown.
pub fn spawn_feeder<R>(
    name: &str,
    reader: R,
    sender: flume::Sender<WatchEvent>,
) -> std::io::Result<thread::JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new().name(name.to_string()).spawn(move || {
        for item in WatchEvent::stream_from_reader(reader) {
            match item {
                Ok(Some(event)) => {
                    if sender.send(event).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "skipping watch event"),
            }
        }
        debug!("watch input closed");
    })
}

/// Last observed state of every object of one kind, owned by the watch side.
///
/// Events handed to a source are always fresh copies of this state, so an
/// extractor never holds memory the cache refers to.
#[derive(Default)]
pub struct ObjectCache {
    objects: HashMap<String, Arc<Unstructured>>,
}

impl ObjectCache {
    pub fn get(&self, key: &str) -> Option<Arc<Unstructured>> {
        self.objects.read(key, |_, obj| Arc::clone(obj))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Applies a watch event to the cache and classifies it.
    ///
    /// Returns `None` when nothing can be delivered: a tombstone for an
    /// object whose last state was never observed.
    pub fn observe(&self, event: WatchEvent) -> Option<NotificationEvent> {
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                let copy = obj.clone();
                match obj.key() {
                    Some(key) => {
                        self.objects.upsert(key, Arc::new(obj));
                    }
                    None => warn!("caching skipped for object without a name"),
                }
                Some(NotificationEvent::add_or_update(copy))
            }
            WatchEvent::Deleted(obj) => {
                if let Some(key) = obj.key() {
                    self.objects.remove(&key);
                }
                Some(NotificationEvent::delete(obj))
            }
            WatchEvent::DeletedFinalStateUnknown { key } => {
                match self.objects.remove(&key) {
                    Some((_, last)) => Some(NotificationEvent::delete(
                        Unstructured::clone(&last),
                    )),
                    None => {
                        warn!(key = %key, "dropping tombstone for an object never observed");
                        None
                    }
                }
            }
        }
    }
}

/// Drains the watch events of one kind into its notification source.
///
/// Each `notify` completes before the next event is taken, which keeps
/// per-kind order and pushes back on the producer through the bounded
/// channel.
pub struct EventPump {
    source: Arc<dyn NotificationSource>,
    cache: Arc<ObjectCache>,
    namespace: Option<String>,
    events: flume::Receiver<WatchEvent>,
}

impl EventPump {
    pub fn new(
        source: Arc<dyn NotificationSource>,
        cache: Arc<ObjectCache>,
        namespace: Option<String>,
        events: flume::Receiver<WatchEvent>,
    ) -> Self {
        Self {
            source,
            cache,
            namespace,
            events,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let gvk = self.source.gvk().clone();
        debug!(gvk = %gvk, source = %self.source.typed_name(), "event pump started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.events.recv_async() => match next {
                    Ok(event) => self.handle(&cancel, event).await,
                    Err(_) => break,
                },
            }
        }
        debug!(gvk = %gvk, "event pump stopped");
    }

    async fn handle(&self, cancel: &CancellationToken, event: WatchEvent) {
        if let (Some(want), Some(ns)) = (&self.namespace, event.namespace()) {
            if want != ns {
                trace!(namespace = ns, "ignoring event outside the pool namespace");
                return;
            }
        }
        if let Some(notification) = self.cache.observe(event) {
            self.source.notify(cancel, notification).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use epp_framework::datalayer::EventType;
    use serde_json::json;

    use super::*;

    fn pod(name: &str, adapters: &str) -> Unstructured {
        Unstructured::try_from(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": name,
                "namespace": "default",
                "annotations": {"example.io/adapters": adapters}
            }
        }))
        .unwrap()
    }

    #[test]
    fn added_and_modified_become_add_or_update() {
        let cache = ObjectCache::default();
        let ev = cache.observe(WatchEvent::Added(pod("p1", "a"))).unwrap();
        assert_eq!(ev.r#type, EventType::AddOrUpdate);
        let ev = cache.observe(WatchEvent::Modified(pod("p1", "a,b"))).unwrap();
        assert_eq!(ev.r#type, EventType::AddOrUpdate);
        assert_eq!(cache.len(), 1);
        assert_eq!(*cache.get("default/p1").unwrap(), pod("p1", "a,b"));
    }

    #[test]
    fn delivered_copy_does_not_alias_cache() {
        let cache = ObjectCache::default();
        let mut ev = cache.observe(WatchEvent::Added(pod("p1", "a"))).unwrap();
        ev.object.content_mut().remove("metadata");
        assert_eq!(*cache.get("default/p1").unwrap(), pod("p1", "a"));
    }

    #[test]
    fn tombstone_uses_last_observed_state() {
        let cache = ObjectCache::default();
        cache.observe(WatchEvent::Added(pod("p1", "a,b")));
        let ev = cache
            .observe(WatchEvent::DeletedFinalStateUnknown {
                key: "default/p1".into(),
            })
            .unwrap();
        assert_eq!(ev.r#type, EventType::Delete);
        assert_eq!(ev.object, pod("p1", "a,b"));
        assert!(cache.is_empty());
    }

    #[test]
    fn tombstone_for_unknown_object_is_dropped() {
        let cache = ObjectCache::default();
        assert!(
            cache
                .observe(WatchEvent::DeletedFinalStateUnknown {
                    key: "default/ghost".into()
                })
                .is_none()
        );
    }

    #[test]
    fn deleted_evicts_and_delivers_final_state() {
        let cache = ObjectCache::default();
        cache.observe(WatchEvent::Added(pod("p1", "a")));
        let ev = cache.observe(WatchEvent::Deleted(pod("p1", "a,b"))).unwrap();
        assert_eq!(ev, NotificationEvent::delete(pod("p1", "a,b")));
        assert!(cache.get("default/p1").is_none());
    }

    #[test]
    fn decodes_kubectl_watch_stream() {
        let input = r#"
            {"type": "ADDED", "object": {"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "p1"}}}
            {"type": "BOOKMARK", "object": {"kind": "Pod", "metadata": {"resourceVersion": "12"}}}
            {"type": "SYNCED", "object": {}}
            {"type": "DELETED", "object": {"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "p1"}}}
            {"type": "ERROR", "object": {"kind": "Status", "message": "too old resource version"}}
        "#;
        let items: Vec<_> = WatchEvent::stream_from_reader(input.as_bytes()).collect();
        assert_eq!(items.len(), 5);
        assert!(matches!(items[0], Ok(Some(WatchEvent::Added(_)))));
        assert!(matches!(items[1], Ok(None)));
        assert!(matches!(items[2], Err(WatchError::UnknownType(ref t)) if t == "SYNCED"));
        assert!(matches!(items[3], Ok(Some(WatchEvent::Deleted(_)))));
        match &items[4] {
            Err(WatchError::Stream(msg)) => {
                assert_eq!(msg, "too old resource version")
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[test]
    fn rejects_non_object_payload() {
        let err =
            WatchEvent::decode(json!({"type": "ADDED", "object": "p1"}))
                .unwrap_err();
        assert!(matches!(err, WatchError::InvalidObject(_)));
    }

    /// Reader that blocks until a chunk arrives; ends when the chunk
    /// sender is dropped.
    struct ChunkReader {
        chunks: std::sync::mpsc::Receiver<Vec<u8>>,
        pending: std::collections::VecDeque<u8>,
    }

    impl Read for ChunkReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pending.is_empty() {
                match self.chunks.recv() {
                    Ok(chunk) => self.pending.extend(chunk),
                    Err(_) => return Ok(0),
                }
            }
            let n = buf.len().min(self.pending.len());
            for (slot, b) in buf.iter_mut().zip(self.pending.drain(..n)) {
                *slot = b;
            }
            Ok(n)
        }
    }

    fn chunk_reader() -> (std::sync::mpsc::Sender<Vec<u8>>, ChunkReader) {
        let (tx, rx) = std::sync::mpsc::channel();
        let reader = ChunkReader {
            chunks: rx,
            pending: Default::default(),
        };
        (tx, reader)
    }

    const ADDED_P1: &[u8] = br#"{"type": "ADDED", "object": {"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "p1"}}}
"#;

    #[test]
    fn open_input_does_not_hold_up_runtime_shutdown() {
        let (chunks, reader) = chunk_reader();
        let (sender, events) = flume::bounded(4);
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let feeder = rt.block_on(async {
            let feeder = spawn_feeder("watch-test", reader, sender).unwrap();
            chunks.send(ADDED_P1.to_vec()).unwrap();
            let event = events.recv_async().await.unwrap();
            assert!(matches!(event, WatchEvent::Added(_)));
            feeder
        });
        // the feeder is parked on a read that has no data yet
        drop(rt);
        assert!(!feeder.is_finished());

        drop(chunks);
        feeder.join().unwrap();
    }

    #[test]
    fn feeder_stops_when_pump_is_gone() {
        let (chunks, reader) = chunk_reader();
        let (sender, events) = flume::bounded(4);
        drop(events);
        let feeder = spawn_feeder("watch-test", reader, sender).unwrap();
        chunks.send(ADDED_P1.to_vec()).unwrap();
        feeder.join().unwrap();
    }

    #[test]
    fn tombstone_namespace_comes_from_key() {
        let ev = WatchEvent::DeletedFinalStateUnknown {
            key: "inference/p1".into(),
        };
        assert_eq!(ev.namespace(), Some("inference"));
        let ev = WatchEvent::DeletedFinalStateUnknown { key: "node-1".into() };
        assert_eq!(ev.namespace(), None);
    }
}
