pub mod engine;
pub mod media;
pub mod taxonomy;
pub mod validate;

pub use engine::{IngestContext, IngestionEngine};
pub use media::{MediaAcquirer, MediaOutcome};
pub use taxonomy::{TaxonomyResolver, TermKind};

use crate::catalog::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct IngestError {
    stage: &'static str,
    message: String,
    kind: IngestErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestErrorKind {
    MissingField,
    InvalidField,
    PlatformWrite,
    NotFound,
}

impl IngestError {
    pub fn missing_field(message: impl Into<String>) -> Self {
        Self {
            stage: "validate",
            message: message.into(),
            kind: IngestErrorKind::MissingField,
        }
    }

    pub fn invalid_field(message: impl Into<String>) -> Self {
        Self {
            stage: "validate",
            message: message.into(),
            kind: IngestErrorKind::InvalidField,
        }
    }

    pub fn platform_write(stage: &'static str, err: StoreError) -> Self {
        Self {
            stage,
            message: err.to_string(),
            kind: IngestErrorKind::PlatformWrite,
        }
    }

    pub fn not_found(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: IngestErrorKind::NotFound,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> IngestErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}
