//! Data-layer capability contracts.
//!
//! A [`DataSource`] supplies raw observations, either polled through
//! [`DataSource::collect`] or pushed through a [`NotificationSource`], and
//! fans them out to the [`Extractor`]s registered on it. Capabilities are
//! narrowed at registration time through the `as_*` accessors, so a source
//! can reject a plugin that lacks the refinement it requires.

mod notification;
mod object;

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::DataLayerError;
use crate::plugin::Plugin;

pub use notification::*;
pub use object::*;

/// Object shape an extractor declares it can consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputType {
    pub id: TypeId,
    pub name: &'static str,
}

impl InputType {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A plugin that derives application state from raw observations.
pub trait Extractor: Plugin {
    fn expected_input_type(&self) -> InputType;

    /// Narrow to the notification capability, if implemented.
    fn as_notification_extractor(
        self: Arc<Self>,
    ) -> Option<Arc<dyn NotificationExtractor>> {
        None
    }
}

/// Poll target handed to [`DataSource::collect`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Endpoint {
    pub namespace: String,
    pub name: String,
    pub address: String,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.namespace, self.name, self.address)
    }
}

#[async_trait]
pub trait DataSource: Plugin {
    /// Rendered names of the registered extractors.
    fn extractors(&self) -> Vec<String>;

    fn add_extractor(
        &self,
        extractor: Arc<dyn Extractor>,
    ) -> Result<(), DataLayerError>;

    /// Poll entry point. Push-only sources implement this as a no-op.
    async fn collect(
        &self,
        cancel: &CancellationToken,
        endpoint: &Endpoint,
    ) -> Result<(), DataLayerError>;

    /// Narrow to the notification capability, if implemented.
    fn as_notification_source(
        self: Arc<Self>,
    ) -> Option<Arc<dyn NotificationSource>> {
        None
    }
}
