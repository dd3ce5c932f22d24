use std::time::Duration;
use thiserror::Error;

/// Errors returned by control-plane calls
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("control plane rejected the workload: {0}")]
    Rejected(String),

    #[error("workload not found: {0}")]
    NotFound(String),

    #[error("control plane request failed: {0}")]
    Api(String),

    #[error("control plane returned a workload without a name")]
    MissingName,
}

impl ClusterError {
    /// Classify a failed create call. Any API response is a rejection.
    pub(crate) fn from_create(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => {
                ClusterError::Rejected(format!("{} ({}): {}", resp.reason, resp.code, resp.message))
            }
            other => ClusterError::Api(other.to_string()),
        }
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound(resp.message),
            other => ClusterError::Api(other.to_string()),
        }
    }
}

/// Why a workload never became usable
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("workload {workload} terminated before becoming ready: {reason}")]
    Terminated { workload: String, reason: String },

    #[error(
        "workload {workload} not running after {waited:?} (last error: {})",
        .last_error.as_deref().unwrap_or("none")
    )]
    Timeout {
        workload: String,
        waited: Duration,
        last_error: Option<String>,
    },

    #[error("wait for workload {workload} cancelled")]
    Cancelled { workload: String },
}
