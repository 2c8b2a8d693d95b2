//! Error handling for topology construction and synthesis.

use thiserror::Error;

/// Result type for infrastructure operations.
pub type InfraResult<T> = Result<T, InfraError>;

/// Errors that can occur while building, patching or synthesizing a topology.
///
/// The cross-account image resolver itself never produces these: anything it
/// cannot interpret is skipped. Only the surrounding pipeline turns an
/// unresolved execution role into [`InfraError::UnresolvedRegistries`], and
/// only when configured to.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum InfraError {
    /// A construct with the same id already exists under the parent.
    #[error("Duplicate construct: {0}")]
    DuplicateNode(String),

    /// Construct ids must be non-empty and must not contain `/`.
    #[error("Invalid construct id: '{0}'")]
    InvalidId(String),

    /// Node lookup failed.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// The node exists but has a different kind than required.
    #[error("Node {path} is not a {expected}")]
    WrongKind { path: String, expected: &'static str },

    /// Two resources map to the same logical id.
    #[error("Duplicate logical id {logical_id} (from {path})")]
    DuplicateLogicalId { logical_id: String, path: String },

    /// A workflow state was referenced before it was declared.
    #[error("Unknown workflow state: {0}")]
    UnknownState(String),

    /// Two workflow states share a name.
    #[error("Duplicate workflow state: {0}")]
    DuplicateState(String),

    /// The state cannot take (another) outgoing transition.
    #[error("Invalid transition from state {0}")]
    InvalidTransition(String),

    /// Linking two states would create a cycle.
    #[error("Transition cycle detected in state machine")]
    StateCycle,

    /// Cross-account registries were discovered but no execution role was found.
    #[error("No execution role matched '{suffix}'; unresolved registries: {}", .repositories.join(", "))]
    UnresolvedRegistries {
        suffix: String,
        repositories: Vec<String>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InfraError::DuplicateNode("Stack/Batch/JobQueue".to_string());
        assert_eq!(err.to_string(), "Duplicate construct: Stack/Batch/JobQueue");

        let err = InfraError::WrongKind {
            path: "Stack/Batch/VPC".to_string(),
            expected: "role",
        };
        assert_eq!(err.to_string(), "Node Stack/Batch/VPC is not a role");

        let err = InfraError::UnresolvedRegistries {
            suffix: "/batchExecutionRole".to_string(),
            repositories: vec!["repo-a".to_string(), "repo-b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "No execution role matched '/batchExecutionRole'; unresolved registries: repo-a, repo-b"
        );
    }
}
