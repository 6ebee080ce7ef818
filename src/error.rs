//! Error types for archetype_resource

use crate::record::TypeTag;
use thiserror::Error;

/// Main error type for asset operations
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Load failed for {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    #[error("Dependency chain too deep while loading {path}")]
    DependencyTooDeep { path: String },

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("No loader registered for type {0}")]
    NoLoader(TypeTag),

    #[error("Loading is disabled for type {0}")]
    LoadDisabled(TypeTag),

    #[error("Finish failed for {path}: {reason}")]
    FinishFailed { path: String, reason: String },
}

impl AssetError {
    /// Shorthand for [`AssetError::LoadFailed`] with an owned reason
    pub fn load_failed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for asset operations
pub type Result<T> = std::result::Result<T, AssetError>;

/// Extract a printable message from a caught panic payload
pub(crate) fn panic_reason(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "panic payload of unknown type".to_string(),
        },
    }
}
