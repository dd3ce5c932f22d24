use std::io;
use std::time::Duration;

use podrelay_cluster::{ClusterError, WaitError};
use podrelay_proto::SpecError;
use podrelay_transport::DialError;
use thiserror::Error;

/// Terminal error of a forwarding session
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid forward spec: {0}")]
    InvalidSpec(#[from] SpecError),

    #[error("failed to schedule relay workload: {0}")]
    Schedule(#[source] ClusterError),

    #[error("relay workload {workload} terminated before becoming ready: {reason}")]
    WorkloadTerminated { workload: String, reason: String },

    #[error(
        "relay workload {workload} not running after {waited:?} (last error: {})",
        .last_error.as_deref().unwrap_or("none")
    )]
    Timeout {
        workload: String,
        waited: Duration,
        last_error: Option<String>,
    },

    #[error("stream upgrade refused: {0}")]
    Upgrade(#[source] DialError),

    #[error("stream transport failed: {0}")]
    Transport(#[source] DialError),

    #[error("{0}")]
    LocalBind(#[source] DialError),

    #[error("local listener failed: {0}")]
    Forwarding(#[source] io::Error),

    #[error("forwarding cancelled before the session was ready")]
    Cancelled,
}

impl ForwardError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ForwardError::Cancelled)
    }
}

impl From<ClusterError> for ForwardError {
    fn from(err: ClusterError) -> Self {
        ForwardError::Schedule(err)
    }
}

impl From<WaitError> for ForwardError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Terminated { workload, reason } => {
                ForwardError::WorkloadTerminated { workload, reason }
            }
            WaitError::Timeout {
                workload,
                waited,
                last_error,
            } => ForwardError::Timeout {
                workload,
                waited,
                last_error,
            },
            WaitError::Cancelled { .. } => ForwardError::Cancelled,
        }
    }
}

impl From<DialError> for ForwardError {
    fn from(err: DialError) -> Self {
        match err {
            // A relay that is already gone at dial time refused the upgrade
            err @ (DialError::Upgrade { .. } | DialError::Gone(_)) => ForwardError::Upgrade(err),
            err @ DialError::Bind { .. } => ForwardError::LocalBind(err),
            err @ (DialError::Transport(_) | DialError::Closed) => ForwardError::Transport(err),
        }
    }
}
