use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{DataSource, Extractor, Gvk, Unstructured};

/// Kind of mutation that triggered a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// The object was created or updated.
    AddOrUpdate,
    /// The object was deleted.
    Delete,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::AddOrUpdate => write!(f, "add-or-update"),
            EventType::Delete => write!(f, "delete"),
        }
    }
}

/// Event pushed to notification extractors.
///
/// `object` is a deep copy made by the framework core; for
/// [`EventType::Delete`] it holds the last known state of the object.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub r#type: EventType,
    pub object: Unstructured,
}

impl NotificationEvent {
    pub fn add_or_update(object: Unstructured) -> Self {
        Self {
            r#type: EventType::AddOrUpdate,
            object,
        }
    }

    pub fn delete(last_known: Unstructured) -> Self {
        Self {
            r#type: EventType::Delete,
            object: last_known,
        }
    }
}

/// Extractor fed by a [`NotificationSource`].
///
/// Called synchronously by the source, in event order. Implementations must
/// converge when the same object is observed again, and must not block on
/// unrelated I/O since every other extractor of the source waits behind them.
#[async_trait]
pub trait NotificationExtractor: Extractor {
    async fn extract_notification(
        &self,
        cancel: &CancellationToken,
        event: &NotificationEvent,
    ) -> anyhow::Result<()>;
}

/// Event-driven data source bound to a single resource kind.
///
/// `collect` is a no-op; all data flows through `notify`.
#[async_trait]
pub trait NotificationSource: DataSource {
    /// Kind this source watches, fixed at construction.
    fn gvk(&self) -> &Gvk;

    /// Deliver one event to every registered extractor.
    async fn notify(&self, cancel: &CancellationToken, event: NotificationEvent);
}
