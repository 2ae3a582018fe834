//! Error codes and the error type crossing the core API
//!
//! IMPORTANT: Error codes are part of the public API.
//! NEVER rename or remove codes - add new ones only.

use serde::{Deserialize, Serialize};

/// Error code registry (v1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// The requested change is not supported (overloads, volatile functions)
    NotSupported,

    /// Dependent objects prevent the operation
    DependencyError,

    /// An object with the same identity already exists
    AlreadyExists,

    /// A referenced object does not exist
    NotExists,

    /// A configuration could not be decoded or validated
    InvalidConfiguration,

    /// A remote schema could not be fetched or merged
    RemoteSchemaError,

    /// Internal invariant violation or rejected regression
    Unexpected,

    /// The persistent store failed (transport/transaction)
    StoreError,
}

impl ErrorCode {
    /// Get the error code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSupported => "not-supported",
            Self::DependencyError => "dependency-error",
            Self::AlreadyExists => "already-exists",
            Self::NotExists => "not-exists",
            Self::InvalidConfiguration => "invalid-configuration",
            Self::RemoteSchemaError => "remote-schema-error",
            Self::Unexpected => "unexpected",
            Self::StoreError => "store-error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned by schema cache operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct MetadataError {
    /// Stable error code
    pub code: ErrorCode,

    /// Human-readable message
    pub message: String,

    /// Diagnostic payload, e.g. the inconsistencies that caused a rejection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal: Option<serde_json::Value>,
}

impl MetadataError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            internal: None,
        }
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotSupported, message)
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DependencyError, message)
    }

    pub fn not_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotExists, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unexpected, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StoreError, message)
    }

    /// Attach a diagnostic payload
    pub fn with_internal(mut self, internal: serde_json::Value) -> Self {
        self.internal = Some(internal);
        self
    }
}

/// Result alias for schema cache operations
pub type Result<T> = std::result::Result<T, MetadataError>;
