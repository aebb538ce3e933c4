//! Template engine errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {record_type}/{name}")]
    NotFound { record_type: String, name: String },

    #[error("invalid template reference '{0}': expected 'type/name'")]
    BadReference(String),

    #[error("template inheritance cycle at {0}")]
    InheritanceCycle(String),

    #[error("failed to parse template {path}: {message}")]
    Parse { path: String, message: String },

    #[error("template io error: {0}")]
    Io(#[from] std::io::Error),
}
