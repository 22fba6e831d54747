//! AWS error types

use thiserror::Error;

/// Errors returned by the AWS clients
#[derive(Error, Debug)]
pub enum AwsError {
    #[error("ECS cluster {0} not found")]
    ClusterNotFound(String),

    #[error("ECS service not found in cluster {cluster} (tried: {})", .candidates.join(", "))]
    ServiceNotFound {
        cluster: String,
        candidates: Vec<String>,
    },

    #[error("running task not found for service {service} in cluster {cluster}")]
    TaskNotFound { cluster: String, service: String },

    #[error("{operation} failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },

    #[error("timed out after {seconds}s waiting for {what}")]
    Timeout { what: String, seconds: u64 },

    #[error("unexpected response from {operation}: {message}")]
    MissingData {
        operation: &'static str,
        message: String,
    },

    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AwsError {
    pub(crate) fn api(operation: &'static str, message: impl std::fmt::Display) -> Self {
        AwsError::Api {
            operation,
            message: message.to_string(),
        }
    }

    pub(crate) fn missing(operation: &'static str, message: impl Into<String>) -> Self {
        AwsError::MissingData {
            operation,
            message: message.into(),
        }
    }

    /// True for errors caused by an absent cluster, service or task
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AwsError::ClusterNotFound(_)
                | AwsError::ServiceNotFound { .. }
                | AwsError::TaskNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AwsError>;
