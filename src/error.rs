//! Error types for virtual field definition, registration and resolution.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::ItemId;

/// Boxed error returned by derived value functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors while configuring a single field definition.
#[derive(Debug, Error)]
pub enum FieldError {
    #[error("invalid field name \"{name}\": {reason}")]
    InvalidName { name: String, reason: String },

    #[error(
        "invalid value(s) in exclusion list: {}. Allowed values are: {}",
        invalid.join(", "),
        allowed.join(", ")
    )]
    InvalidExclusionTag {
        invalid: Vec<String>,
        allowed: Vec<&'static str>,
    },
}

/// Errors while registering fields against content types.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("registration needs at least one content type")]
    NoContentTypes,

    #[error("registration needs at least one field")]
    NoFields,

    #[error("field \"{name}\" is registered twice for the same content types")]
    DuplicateField { name: String },

    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Errors while resolving virtual fields on an output surface.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A derived value function failed. The original error is kept as source.
    #[error("field \"{field}\" failed for item {item}: {source}")]
    ResolutionFailure {
        field: String,
        item: ItemId,
        #[source]
        source: BoxError,
    },

    #[error("no accessor for field \"{field}\" on content type \"{content_type}\"")]
    UnknownField { field: String, content_type: String },
}

/// Errors while loading JSON documents.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("expected {expected}, got {actual}")]
    UnexpectedShape {
        expected: &'static str,
        actual: String,
    },
}

/// Errors while building a coordinator from a field manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("manifest does not match schema with {} error(s)", violations.len())]
    Invalid { violations: Vec<ManifestViolation> },

    #[error("field \"{field}\": max_recursive_depth must not be negative, got {depth}")]
    InvalidDepth { field: String, depth: i64 },

    #[error("field \"{field}\": {message}")]
    InvalidField { field: String, message: String },

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

/// Single manifest schema violation with path context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ManifestViolation {
    /// JSON Pointer (RFC 6901) to the offending value.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for ManifestViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl FieldError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        2
    }
}

impl RegistrationError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        2
    }
}

impl ResolveError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ResolveError::ResolutionFailure { .. } => 1,
            ResolveError::UnknownField { .. } => 2,
        }
    }
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}

impl ManifestError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ManifestError::Load(e) => e.exit_code(),
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_exclusion_tag_lists_both_sets() {
        let err = FieldError::InvalidExclusionTag {
            invalid: vec!["bogus".into()],
            allowed: vec!["core", "rest", "rest_revisions", "acf"],
        };
        assert_eq!(
            err.to_string(),
            "invalid value(s) in exclusion list: bogus. Allowed values are: core, rest, rest_revisions, acf"
        );
    }

    #[test]
    fn resolution_failure_keeps_source() {
        use std::error::Error as _;

        let err = ResolveError::ResolutionFailure {
            field: "wordCount".into(),
            item: ItemId::Number(3),
            source: "boom".into(),
        };
        assert_eq!(err.to_string(), "field \"wordCount\" failed for item 3: boom");
        assert_eq!(err.source().map(|s| s.to_string()), Some("boom".into()));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn load_error_exit_codes() {
        let err = LoadError::FileNotFound {
            path: PathBuf::from("items.json"),
        };
        assert_eq!(err.exit_code(), 3);

        let err = LoadError::UnexpectedShape {
            expected: "array",
            actual: "string".into(),
        };
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn manifest_error_exit_codes() {
        let err = ManifestError::Load(LoadError::FileNotFound {
            path: PathBuf::from("fields.json"),
        });
        assert_eq!(err.exit_code(), 3);

        let err = ManifestError::InvalidDepth {
            field: "x".into(),
            depth: -1,
        };
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn manifest_violation_display() {
        let v = ManifestViolation {
            path: "/registrations/0/fields".into(),
            message: "expected array".into(),
        };
        assert_eq!(v.to_string(), "/registrations/0/fields: expected array");
    }
}
