//! Error types for capstan-kube

use thiserror::Error;

/// Result type for capstan-kube operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// A single conflicting field reported by the API server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictCause {
    /// Dotted field path, e.g. "spec.replicas"
    pub field: String,
    /// Server-provided description of the conflict
    pub message: String,
}

/// Status detail of a server-side-apply conflict
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConflictStatus {
    pub causes: Vec<ConflictCause>,
}

impl ConflictStatus {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            causes: vec![ConflictCause {
                field: field.into(),
                message: message.into(),
            }],
        }
    }
}

impl std::fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.causes.is_empty() {
            return write!(f, "no conflict details provided");
        }
        let fields: Vec<&str> = self.causes.iter().map(|c| c.field.as_str()).collect();
        write!(f, "conflicting fields: {}", fields.join(", "))
    }
}

/// Errors surfaced by the cluster gateway
///
/// The apply state machine distinguishes these kinds to pick the next rung of
/// its retry ladder, so classification must stay faithful even for errors
/// coming from a live API server.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterError {
    /// The object (or its kind instance) does not exist
    #[error("object not found: {0}")]
    NotFound(String),

    /// Field-manager or resourceVersion conflict (HTTP 409)
    #[error("conflict: {0}")]
    Conflict(ConflictStatus),

    /// Server-side internal error (HTTP 500); never degraded to replace
    #[error("internal server error: {0}")]
    InternalError(String),

    /// The requested kind is not served by the API surface we discovered
    #[error("no matches for kind: {0}")]
    NoMatch(String),

    /// Conflict resolution could not interpret the server's status
    #[error("unable to resolve field conflicts: {0}")]
    ConflictResolution(String),

    /// Any other transport or API error
    #[error("Kubernetes API error: {0}")]
    Api(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ClusterError::InternalError(_))
    }

    pub fn is_no_match(&self) -> bool {
        matches!(self, ClusterError::NoMatch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_helpers() {
        assert!(ClusterError::NotFound("x".into()).is_not_found());
        assert!(ClusterError::Conflict(ConflictStatus::default()).is_conflict());
        assert!(ClusterError::InternalError("boom".into()).is_internal());
        assert!(ClusterError::NoMatch("Foo.example.com".into()).is_no_match());
        assert!(!ClusterError::Api("other".into()).is_conflict());
    }

    #[test]
    fn test_conflict_status_display() {
        let status = ConflictStatus {
            causes: vec![
                ConflictCause {
                    field: "spec.replicas".into(),
                    message: "owned by kubectl".into(),
                },
                ConflictCause {
                    field: "spec.paused".into(),
                    message: "owned by kubectl".into(),
                },
            ],
        };
        let rendered = status.to_string();
        assert!(rendered.contains("spec.replicas"));
        assert!(rendered.contains("spec.paused"));
    }
}
