//! Error types for the document generation engine.

use crate::types::{RecordId, TableId};
use thiserror::Error;

/// Record-access errors raised by the relational source.
///
/// These are collaborator faults: the source could not hand back data it was
/// asked for. Binding drift (a mapped field that no longer resolves) is not an
/// error and never surfaces here; merge evaluation treats it as absence.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("Table not found: {0}")]
    TableNotFound(TableId),

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// Mapping persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Invalid stored mapping: {0}")]
    InvalidMapping(String),
}

/// Top-level errors for generation runs.
///
/// Usage faults reject a run before any collaborator is contacted; the rest
/// wrap faults from the template service, the record source, or the mapping
/// store.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No records selected for generation")]
    EmptySelection,

    #[error("Mapping is empty; nothing to merge")]
    EmptyMapping,

    #[error("No template selected for generation")]
    MissingTemplate,

    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("Service authentication failed: {0}")]
    ServiceAuthFailed(String),

    #[error("Service rate limit exceeded: {0}")]
    ServiceRateLimit(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Service request failed: {0}")]
    ServiceRequestFailed(String),

    #[error("Malformed service response: {0}")]
    MalformedResponse(String),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl EngineError {
    /// True for caller-misuse rejections that never reached a collaborator.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            EngineError::EmptySelection
                | EngineError::EmptyMapping
                | EngineError::MissingTemplate
                | EngineError::InvalidMapping(_)
        )
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}
