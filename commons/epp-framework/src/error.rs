use std::fmt;

use crate::datalayer::Gvk;
use crate::plugin::TypedName;

#[derive(thiserror::Error, Debug)]
pub enum DataLayerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(
        "extractor {extractor} does not implement NotificationExtractor (source {owner})"
    )]
    CapabilityMismatch {
        extractor: TypedName,
        owner: TypedName,
    },
    #[error("duplicate extractor {extractor} on data source {owner}")]
    DuplicateExtractor {
        extractor: TypedName,
        owner: TypedName,
    },
    #[error(
        "extractor {extractor} expects input {expected}, source {owner} delivers {delivered}"
    )]
    InputTypeMismatch {
        extractor: TypedName,
        owner: TypedName,
        expected: &'static str,
        delivered: &'static str,
    },
    #[error("duplicate data source {0}")]
    DuplicateSource(TypedName),
    #[error("kind {gvk} is already watched by notification source {existing}")]
    DuplicateNotificationSource { gvk: Gvk, existing: TypedName },
    #[error("no data source `{0}`")]
    SourceNotFound(String),
    #[error("no notification source for kind {0}")]
    NoNotificationSource(Gvk),
    #[error("collect on {owner} failed: {message}")]
    Collect { owner: TypedName, message: String },
}

/// Failures returned by the extractors invoked for one notification.
#[derive(Debug, Default)]
pub struct ExtractionErrors {
    errors: Vec<(TypedName, anyhow::Error)>,
}

impl ExtractionErrors {
    pub fn push(&mut self, extractor: TypedName, err: anyhow::Error) {
        self.errors.push((extractor, err));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(TypedName, anyhow::Error)> {
        self.errors.iter()
    }
}

impl fmt::Display for ExtractionErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (extractor, err)) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "extractor {}: {:#}", extractor, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExtractionErrors {}
